//! Command-line interface
//!
//! - `serve`: run the HTTP API
//! - `check-config`: load and validate the configuration
//! - `render`: print the artifacts a create request would generate

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::api::{self, AppState};
use crate::cluster::{preview_cluster, ClusterManager, InMemoryIaas};
use crate::config::ServerConfig;
use crate::error::{NexaError, Result};
use crate::templates::{TemplateRegistry, UuidGenerator};
use crate::types::ClusterCreateSpec;

const CURSOR_PURGE_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Parser)]
#[command(author, version, about = "VM-backed cluster lifecycle manager", long_about = None)]
pub struct Cli {
    /// Config file, instead of the default search path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP API
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Load the configuration and report problems
    CheckConfig,
    /// Print the bootstrap artifacts for a cluster create request (YAML or JSON)
    Render {
        spec: PathBuf,
        #[arg(long)]
        script_directory: Option<String>,
    },
}

impl Cli {
    pub fn load_config(&self) -> Result<ServerConfig> {
        match &self.config {
            Some(path) => ServerConfig::load_from_file(path),
            None => ServerConfig::load(),
        }
    }
}

pub struct CliHandler {
    config: ServerConfig,
}

impl CliHandler {
    pub fn new(config: ServerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub async fn serve(mut self, host: Option<String>, port: Option<u16>) -> Result<()> {
        if let Some(host) = host {
            self.config.api.host = host;
        }
        if let Some(port) = port {
            self.config.api.port = port;
        }

        let manager = Arc::new(ClusterManager::from_config(&self.config, Arc::new(InMemoryIaas::new())));
        let state = AppState::new(manager.clone(), &self.config.api.base_url);
        let app = api::router(state).layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
                .max_age(Duration::from_secs(3600)),
        );

        let tracker = manager.tracker().clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(CURSOR_PURGE_INTERVAL);
            loop {
                interval.tick().await;
                tracker.purge_expired();
            }
        });

        let addr = self.config.api.bind_address();
        let listener = TcpListener::bind(&addr).await?;
        info!("Cluster API listening on {}", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| {
                error!("Server error: {}", e);
                NexaError::Io(e.to_string())
            })?;

        info!("Server stopped gracefully");
        Ok(())
    }

    pub fn check_config(&self) -> Result<String> {
        self.config.validate()?;
        serde_yaml::to_string(&self.config).map_err(NexaError::from)
    }

    pub fn render(&self, spec_path: &Path, script_directory: Option<&str>) -> Result<String> {
        let content = fs::read_to_string(spec_path)?;
        // YAML is a superset of JSON, so both formats parse here.
        let spec: ClusterCreateSpec = serde_yaml::from_str(&content)?;
        let registry = TemplateRegistry::with_defaults(Arc::new(UuidGenerator));
        let script_directory = script_directory.unwrap_or(self.config.provisioning.script_directory.as_str());

        let nodes = preview_cluster(&registry, &spec, script_directory, &UuidGenerator)?;
        Ok(serde_json::to_string_pretty(&nodes)?)
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
