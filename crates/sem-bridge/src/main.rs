//! `sem-bridge`: serves the driver shim against the real instrument.
//!
//! Opening the device is fatal on failure; everything else (rule table,
//! event bus clients, individual transactions) degrades and carries on.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use sem_bridge::{open_device, BridgeService, DeviceChannel, InterceptionPolicy};
use sem_server::publisher::StatePublisher;
use sem_server::runtime::{serve, shutdown_flag};
use sem_server::{init_tracing, load_config, CommonArgs};

#[derive(Debug, Parser)]
#[command(
    name = "sem-bridge",
    about = "Relays SEM driver transactions to the instrument over SCSI passthrough",
    version
)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    /// Generic SCSI device node, e.g. /dev/sg2.  Discovered by INQUIRY when
    /// neither this nor the config file names one.
    #[arg(long, env = "SEM_DEVICE")]
    device: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(&cli.common.config)
        .with_context(|| format!("loading {}", cli.common.config.display()))?;
    cli.common.apply(&mut config);
    if cli.device.is_some() {
        config.bridge.device = cli.device;
    }

    init_tracing(&config.server.log_level);
    info!("SEM bridge starting");

    let policy = InterceptionPolicy::from_config(&config.bridge.intercept)
        .context("invalid [[bridge.intercept]] entry")?;
    if !policy.is_empty() {
        info!("{} intercept rule(s) active", policy.len());
    }

    let device = open_device(config.bridge.device.clone()).context("opening SEM device")?;
    let publisher = StatePublisher::new(config.events.capacity);
    let service = BridgeService::new(
        DeviceChannel::new(device),
        policy,
        publisher.clone(),
        &config.bridge,
    );

    let running = shutdown_flag();
    serve(&config, Arc::new(service), publisher, running)
        .await
        .context("starting bridge services")?;

    info!("SEM bridge stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_device_flag() {
        let cli = Cli::parse_from(["sem-bridge", "--device", "/dev/sg3"]);
        assert_eq!(cli.device, Some(PathBuf::from("/dev/sg3")));
    }

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["sem-bridge"]);
        assert!(cli.device.is_none());
        assert!(!cli.common.legacy_frames);
    }
}
