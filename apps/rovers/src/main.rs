mod telemetry;

use anyhow::Context;
use clap::{Parser, Subcommand};
use fleet_control::FleetConfig;
use rover_agent::AgentConfig;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "rovers",
    version,
    about = "Rover fleet control panel and agent",
    arg_required_else_help = true
)]
struct Cli {
    /// Log filter used when RUST_LOG is unset.
    #[arg(long, global = true, default_value = "info")]
    log: String,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Operator-facing control panel: sessions, fleet lifecycle, dispatch.
    ControlPanel,
    /// In-pod agent executing forwarded commands.
    Agent,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    telemetry::init_tracing(&cli.log);

    match cli.mode {
        Mode::ControlPanel => {
            let cfg = FleetConfig::from_env().context("invalid control panel configuration")?;
            fleet_control::run(cfg, shutdown_signal()).await
        }
        Mode::Agent => {
            let cfg = AgentConfig::from_env().context("invalid agent configuration")?;
            rover_agent::run(cfg, shutdown_signal()).await
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modes_are_subcommands() {
        let cli = Cli::try_parse_from(["rovers", "control-panel"]).unwrap();
        assert!(matches!(cli.mode, Mode::ControlPanel));
        let cli = Cli::try_parse_from(["rovers", "agent", "--log", "debug"]).unwrap();
        assert!(matches!(cli.mode, Mode::Agent));
        assert_eq!(cli.log, "debug");
    }

    #[test]
    fn missing_mode_is_an_error() {
        assert!(Cli::try_parse_from(["rovers"]).is_err());
        assert!(Cli::try_parse_from(["rovers", "--rover"]).is_err());
    }
}
