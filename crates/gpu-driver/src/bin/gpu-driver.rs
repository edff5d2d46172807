//! gpu-driver CLI - install, remove and report the vendor GPU driver.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use gpu_driver::{
    CommandRunner, DriverConfig, DriverOps, DriverSpec, EventOutcome, HostProbe,
    LifecycleController, LifecycleEvent, RedrivePolicy, SystemRunner,
};

/// gpu-driver - Provision the GPU kernel driver on this host.
#[derive(Parser)]
#[command(name = "gpu-driver")]
#[command(about = "Install, remove and report the GPU kernel driver")]
struct Cli {
    /// YAML config file (or set `GPU_DRIVER_CONFIG` env var).
    #[arg(long, env = "GPU_DRIVER_CONFIG")]
    config: Option<PathBuf>,

    /// Driver package, overriding the per-OS default from the config.
    #[arg(long, env = "GPU_DRIVER_PACKAGE")]
    driver_package: Option<String>,

    /// Fail any single step that runs longer than this many seconds.
    #[arg(long, env = "GPU_DRIVER_STEP_TIMEOUT")]
    step_timeout: Option<u64>,

    /// Enable verbose logging.
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install the driver and print its version.
    Install {
        /// Total attempts before giving up.
        #[arg(long, default_value = "1")]
        redrive: u32,

        /// Seconds to wait between attempts.
        #[arg(long, default_value = "30")]
        backoff: u64,
    },

    /// Remove the driver, repository, kernel headers and dependencies.
    Remove {
        /// Total attempts before giving up.
        #[arg(long, default_value = "1")]
        redrive: u32,

        /// Seconds to wait between attempts.
        #[arg(long, default_value = "30")]
        backoff: u64,
    },

    /// Print the installed driver version.
    Version,

    /// Print the detected host profile as JSON.
    Probe,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = DriverConfig::load_or_default(cli.config.as_deref())
        .await
        .context("Failed to load config")?;
    if cli.step_timeout.is_some() {
        config.step_timeout_secs = cli.step_timeout;
    }

    let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner);
    let probe = HostProbe::new(runner.clone(), config.os_release_path.clone());

    let request = match cli.command {
        Commands::Probe => {
            let profile = probe.probe().await.context("Failed to probe host")?;
            println!("{}", serde_json::to_string_pretty(&profile)?);
            return Ok(());
        }
        Commands::Version => None,
        Commands::Install { redrive, backoff } => {
            Some((LifecycleEvent::Install, redrive_policy(redrive, backoff)))
        }
        Commands::Remove { redrive, backoff } => {
            Some((LifecycleEvent::Remove, redrive_policy(redrive, backoff)))
        }
    };

    let family = probe
        .detect_os_family()
        .await
        .context("Failed to identify host OS")?;
    let mut spec = DriverSpec::from_config(&config, family);
    if let Some(package) = cli.driver_package {
        spec.package_name = package;
    }
    info!(package = %spec.package_name, family = %family, "Selected driver package");

    let ops = DriverOps::new(spec, config, runner).context("Failed to create driver ops")?;
    let controller = LifecycleController::new(ops);

    let Some((event, policy)) = request else {
        let version = controller
            .version()
            .await
            .context("Failed to query driver version")?;
        println!("{version}");
        return Ok(());
    };

    match controller.redrive(event, policy).await {
        EventOutcome::Completed(Some(version)) => {
            println!("✅ GPU driver installed: {version}");
        }
        EventOutcome::Completed(None) => {
            println!("✅ GPU driver removed");
        }
        EventOutcome::Deferred(e) => {
            bail!("{event} not completed ({}): {e}", controller.status());
        }
    }

    Ok(())
}

fn redrive_policy(attempts: u32, backoff_secs: u64) -> RedrivePolicy {
    RedrivePolicy {
        max_attempts: attempts,
        backoff: Duration::from_secs(backoff_secs),
    }
}
