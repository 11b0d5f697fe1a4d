use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use thanks_core::actuator::{Actuator, CommandActuator, DryRunActuator};
use thanks_core::capture::ScreenCapture;
use thanks_core::config::Config;
use thanks_core::controller::PollController;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser, Debug)]
#[command(author, version, about = "Send Super Thanks for new uploads", long_about = None)]
struct Args {
    /// Config file (default: ~/.config/thanks/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Maximum number of dispatch jobs for this run
    #[arg(short, long)]
    budget: Option<u32>,

    /// Re-dispatch already-seen videos this many times (startup validation)
    #[arg(long)]
    test_runs: Option<u32>,

    /// Log dispatch jobs instead of running the automation program
    #[arg(long)]
    dry_run: bool,

    /// Run a single poll cycle after initialisation, then exit
    #[arg(long)]
    once: bool,
}

fn init_logging(log_path: &std::path::Path) -> anyhow::Result<()> {
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)?;

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);
    let console_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(file_layer)
        .with(console_layer)
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(
                    "info,thanks_core=debug,thanks_daemon=debug,hyper_util=warn,reqwest=warn",
                )
            }),
        )
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config_path = args.config.clone().unwrap_or_else(Config::config_path);
    let mut config = Config::load_from(&config_path)?;
    if let Some(budget) = args.budget {
        config.poll.budget = budget;
    }
    if let Some(test_runs) = args.test_runs {
        config.poll.test_runs = test_runs;
    }
    if args.dry_run {
        config.actuator.dry_run = true;
    }

    init_logging(&config.paths.log_file)?;
    info!("Log file: {:?}", config.paths.log_file);
    info!("Config loaded from: {:?}", config_path);
    info!(
        "budget {}, test runs {}, {} probe workers, cycle {}s",
        config.poll.budget, config.poll.test_runs, config.poll.probe_workers, config.poll.cycle_secs
    );

    let actuator: Arc<dyn Actuator> = if config.actuator.dry_run {
        warn!("dry run: no automation will be started");
        Arc::new(DryRunActuator)
    } else {
        let capture = config
            .capture
            .enabled
            .then(|| ScreenCapture::new(&config.paths.captures_dir, config.capture.clone()));
        Arc::new(CommandActuator::new(config.actuator.clone(), capture))
    };

    let stop = CancellationToken::new();
    let ctrl_c_stop = stop.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("interrupt received, finishing queued jobs");
                ctrl_c_stop.cancel();
            }
            Err(e) => error!("cannot listen for ctrl-c: {}", e),
        }
    });

    let mut controller = PollController::new(&config, actuator, stop)?;
    info!("Ledger: {:?}", controller.ledger().path());
    controller.initialize().await;

    if args.once {
        match controller.run_cycle().await {
            Ok(report) => info!("single cycle: {:?}", report),
            Err(e) => error!("single cycle failed: {:#}", e),
        }
        let budget = controller.tracker().budget();
        controller.finish().await;
        info!("done, budget left {}", budget);
        return Ok(());
    }

    let summary = controller.run().await;
    info!(
        "stopped after {} cycles, {} dispatched, budget left {}",
        summary.cycles, summary.dispatched, summary.remaining_budget
    );
    Ok(())
}
