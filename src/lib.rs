pub mod api;
pub mod cli;
pub mod cluster;
pub mod config;
pub mod error;
pub mod logging;
pub mod tasks;
pub mod templates;
pub mod types;

// Re-export common types
pub use cluster::ClusterManager;
pub use config::ServerConfig;
pub use error::{NexaError, Result};
pub use tasks::TaskTracker;
pub use templates::TemplateRegistry;
