mod signals;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use inky_config::{ConfigError, Settings};
use inky_core::{Agent, AgentConfig, CoreError, DriverPanel, MockPanel, Panel};

/// E-ink display agent.
///
/// Connects to the MQTT broker, registers the device with the picture
/// coordinator, and drives the panel from commands received over the
/// bus. Runs until SIGINT or SIGTERM.
#[derive(Parser)]
#[command(name = "inkyd", version)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Device identifier (overrides the config file).
    #[arg(short = 'd', long, env = "DEVICE_ID")]
    device_id: Option<String>,

    /// Increase log verbosity (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Debug, thiserror::Error)]
enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Core(#[from] CoreError),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("inkyd: {err}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbosity: u8) {
    let filter = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> Result<(), StartupError> {
    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(device_id) = cli.device_id {
        settings.device.id = device_id;
    }

    let config = settings.into_agent_config()?;
    config.validate()?;

    tracing::info!(
        device_id = %config.device.id,
        broker_host = %config.bus.host,
        broker_port = config.bus.port,
        mock_display = config.display.mock,
        "starting inkyd"
    );

    // Panel init is the one fault allowed to abort the process: a
    // display that cannot be probed leaves nothing to run.
    let panel = build_panel(&config)?;

    let agent = Agent::new(&config, panel);
    let shutdown = agent.shutdown_handle();

    tokio::spawn(async move {
        match signals::wait_for_shutdown_signal().await {
            Ok(()) => {
                tracing::info!("termination signal received, shutting down");
                shutdown.cancel();
            }
            Err(e) => tracing::warn!(error = %e, "failed to install signal handlers"),
        }
    });

    agent.run().await?;
    Ok(())
}

fn build_panel(config: &AgentConfig) -> Result<Arc<dyn Panel>, StartupError> {
    if config.display.mock {
        tracing::info!(
            width = config.display.mock_width,
            height = config.display.mock_height,
            "using mock display"
        );
        return Ok(Arc::new(MockPanel::new(
            config.display.mock_width,
            config.display.mock_height,
        )));
    }

    let driver = config.display.driver.as_deref().ok_or_else(|| {
        CoreError::Config {
            message: "display driver command required unless mock mode is enabled".into(),
        }
    })?;

    tracing::info!(driver, orientation = %config.display.orientation, "probing display hardware");
    Ok(Arc::new(DriverPanel::probe(driver)?))
}
