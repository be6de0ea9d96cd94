use anyhow::Context;
use clap::Parser;
use tracing::info;

use nexa_clusters::cli::{Cli, CliHandler, Commands};
use nexa_clusters::logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.load_config().context("failed to load configuration")?;

    // Dropping the guard stops the file writer, so it lives for all of main.
    let _log_guard = logging::init(&config.logging).context("failed to initialize logging")?;
    if config.logging.file {
        logging::spawn_log_cleanup(config.logging.directory.clone());
    }

    let handler = CliHandler::new(config);
    match cli.command {
        Commands::Serve { host, port } => {
            info!("Starting nexa-clusters {}", env!("CARGO_PKG_VERSION"));
            handler.serve(host, port).await?;
        }
        Commands::CheckConfig => {
            let rendered = handler.check_config()?;
            println!("{}", rendered);
        }
        Commands::Render { spec, script_directory } => {
            let rendered = handler
                .render(&spec, script_directory.as_deref())
                .with_context(|| format!("failed to render {}", spec.display()))?;
            println!("{}", rendered);
        }
    }
    Ok(())
}
