use anyhow::{Context, Result};
use clap::Parser;
use core_pipeline::Orchestrator;
use core_runtime::logging::{init_logging, LoggingConfig};
use tokio_util::sync::CancellationToken;
use tracing::info;

use imgflow::{build_context, secret_store, spawn_event_logger, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut logging = LoggingConfig::default().with_level(cli.log_level);
    if let Some(format) = cli.log_format {
        logging = logging.with_format(format);
    }
    init_logging(logging).context("Failed to initialize logging")?;

    let secrets = secret_store(cli.secrets);
    let ctx = build_context(secrets.as_ref(), &cli.overrides()).await?;
    spawn_event_logger(&ctx);

    let mode = cli.command.mode();
    let orchestrator = Orchestrator::new(ctx);

    if cli.once {
        orchestrator.prepare_workspace().await?;
        let report = orchestrator.run_cycle(mode).await?;
        info!(%report, "Single cycle finished");
        return Ok(());
    }

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, stopping after the current cycle");
            signal.cancel();
        }
    });

    orchestrator.run_forever(mode, shutdown).await?;
    Ok(())
}
