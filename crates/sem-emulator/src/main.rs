//! `sem-emulator`: serves the driver shim from the in-process device model.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use sem_emulator::Emulator;
use sem_server::publisher::StatePublisher;
use sem_server::runtime::{serve, shutdown_flag};
use sem_server::{init_tracing, load_config, CommonArgs};

#[derive(Debug, Parser)]
#[command(
    name = "sem-emulator",
    about = "Virtual SEM answering driver transactions without hardware",
    version
)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    /// Start with the chamber already evacuated.
    #[arg(long, env = "SEM_VACUUM_READY")]
    vacuum_ready: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(&cli.common.config)
        .with_context(|| format!("loading {}", cli.common.config.display()))?;
    cli.common.apply(&mut config);
    if cli.vacuum_ready {
        config.emulator.vacuum_ready = true;
    }

    init_tracing(&config.server.log_level);
    info!(
        "SEM emulator starting (hardware id 0x{:04X})",
        config.emulator.hardware_id
    );

    let publisher = StatePublisher::new(config.events.capacity);
    let (handle, _task) = sem_emulator::spawn(Emulator::new(&config.emulator, publisher.clone()));

    let running = shutdown_flag();
    serve(&config, Arc::new(handle), publisher, running)
        .await
        .context("starting emulator services")?;

    info!("SEM emulator stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_vacuum_ready_flag() {
        let cli = Cli::parse_from(["sem-emulator", "--vacuum-ready", "--legacy-frames"]);
        assert!(cli.vacuum_ready);
        assert!(cli.common.legacy_frames);
    }
}
