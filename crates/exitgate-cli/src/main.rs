//! exitgate - parking exit lane process.
//!
//! `run` starts the lane and reads the console: plain lines are scanner
//! bursts, lines starting with `:` are operator commands. The other
//! subcommands start the lane, execute one command, print the answer as JSON
//! and shut the lane down again.

mod console;
mod runtime;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::{Parser, Subcommand};
use exitgate_core::LaneConfig;
use exitgate_engine::{ExitRequest, spawn_scan_bridge};
use exitgate_hardware::GateDriver;
use exitgate_scanner::{ScanIngestor, ScanRules};
use futures::StreamExt;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use console::{CacheAction, GateAction, HELP, OperatorCommand};
use runtime::{LaneRuntime, spawn_event_printer, wait_for_gate_down};

const DEFAULT_CONFIG: &str = "exitgate.toml";
const SCAN_EVENT_CAPACITY: usize = 32;
const MAX_CONSOLE_LINE: usize = 1024;

#[derive(Parser, Debug)]
#[command(name = "exitgate")]
#[command(version, about = "Parking exit lane controller", long_about = None)]
struct Cli {
    /// Lane configuration file; defaults apply when the default file is missing
    #[arg(short, long, default_value = DEFAULT_CONFIG)]
    config: PathBuf,

    /// Log at debug level unless RUST_LOG is set
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the lane: scanner console and operator commands
    Run {
        /// Ignore scanner input on the console
        #[arg(long)]
        no_scanner: bool,
    },

    /// Process one exit
    Exit {
        /// Barcode, member card, record id or plate
        identifier: String,

        #[arg(long)]
        operator: Option<String>,

        #[arg(long = "gate")]
        gate_id: Option<String>,

        /// JPEG to attach as the exit snapshot
        #[arg(long)]
        snapshot: Option<PathBuf>,

        /// Shut down right after the exit instead of waiting for auto-close
        #[arg(long)]
        no_wait: bool,
    },

    /// Barrier control
    #[command(subcommand)]
    Gate(GateCommands),

    /// Member cache maintenance
    #[command(subcommand)]
    Cache(CacheCommands),

    /// Lane, store and cache health
    Diagnostics,

    /// Validate the configuration and print the effective values
    CheckConfig,
}

#[derive(Subcommand, Debug)]
enum GateCommands {
    /// Raise the barrier and wait for auto-close
    Open,
    /// Lower the barrier
    Close,
    /// Current state, timer and recent transitions
    Status,
    /// Clear a hardware fault
    Reset,
    /// Open, hold and close the barrier without a lane
    SelfTest {
        /// Milliseconds to hold the barrier up
        #[arg(long, default_value_t = 1000)]
        hold_ms: u64,
    },
}

#[derive(Subcommand, Debug)]
enum CacheCommands {
    Stats,
    Clear,
    Invalidate { card: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match dispatch(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::from(1)
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

fn load_config(path: &Path) -> Result<LaneConfig> {
    if !path.exists() && path == Path::new(DEFAULT_CONFIG) {
        warn!(path = %path.display(), "configuration file not found, using defaults");
        return Ok(LaneConfig::default());
    }
    LaneConfig::from_file(path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))
}

async fn dispatch(cli: Cli) -> Result<()> {
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Run { no_scanner } => run_lane(&config, no_scanner).await,
        Commands::CheckConfig => check_config(&config),
        Commands::Gate(GateCommands::SelfTest { hold_ms }) => {
            self_test(&config, Duration::from_millis(hold_ms)).await
        }
        Commands::Exit {
            identifier,
            operator,
            gate_id,
            snapshot,
            no_wait,
        } => {
            let mut request = ExitRequest::new(identifier);
            if let Some(operator) = operator {
                request = request.operator(operator);
            }
            if let Some(gate_id) = gate_id {
                request = request.gate_id(gate_id);
            }
            if let Some(path) = snapshot {
                let jpeg = tokio::fs::read(&path)
                    .await
                    .with_context(|| format!("failed to read snapshot {}", path.display()))?;
                request = request.snapshot(Bytes::from(jpeg));
            }
            one_shot_exit(&config, request, !no_wait).await
        }
        Commands::Gate(GateCommands::Open) => {
            one_shot(&config, OperatorCommand::Gate(GateAction::Open), true).await
        }
        Commands::Gate(GateCommands::Close) => {
            one_shot(&config, OperatorCommand::Gate(GateAction::Close), false).await
        }
        Commands::Gate(GateCommands::Status) => {
            one_shot(&config, OperatorCommand::Gate(GateAction::Status), false).await
        }
        Commands::Gate(GateCommands::Reset) => {
            one_shot(&config, OperatorCommand::Gate(GateAction::Reset), false).await
        }
        Commands::Cache(action) => {
            let action = match action {
                CacheCommands::Stats => CacheAction::Stats,
                CacheCommands::Clear => CacheAction::Clear,
                CacheCommands::Invalidate { card } => CacheAction::Invalidate(card),
            };
            one_shot(&config, OperatorCommand::Cache(action), false).await
        }
        Commands::Diagnostics => one_shot(&config, OperatorCommand::Diagnostics, false).await,
    }
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn one_shot(config: &LaneConfig, command: OperatorCommand, wait: bool) -> Result<()> {
    let runtime = LaneRuntime::start(config).await?;
    let lane = runtime.handle();

    let outcome = console::execute(&lane, command).await;
    if let Ok(value) = &outcome {
        print_json(value)?;
        if wait {
            wait_for_gate_down(&lane).await?;
        }
    }

    runtime.shutdown().await;
    outcome.map(|_| ())
}

async fn one_shot_exit(config: &LaneConfig, request: ExitRequest, wait: bool) -> Result<()> {
    let runtime = LaneRuntime::start(config).await?;
    let lane = runtime.handle();

    let result = lane.process_exit(request).await;
    print_json(&serde_json::to_value(&result)?)?;
    if result.success && wait {
        wait_for_gate_down(&lane).await?;
    }

    runtime.shutdown().await;
    Ok(())
}

fn check_config(config: &LaneConfig) -> Result<()> {
    config.validate().context("configuration is invalid")?;
    print!("{}", toml::to_string_pretty(config)?);
    match config.camera.snapshot_url() {
        Some(url) => info!(%url, "camera snapshot endpoint"),
        None => info!("no camera configured"),
    }
    info!("configuration OK");
    Ok(())
}

async fn self_test(config: &LaneConfig, hold: Duration) -> Result<()> {
    let mut driver = GateDriver::from_config(config);
    let outcome = driver.self_test(hold).await;
    print_json(&serde_json::json!({
        "passed": outcome.is_ok(),
        "error": outcome.as_ref().err().map(ToString::to_string),
        "driver": driver.status(),
    }))?;
    outcome.context("gate self-test failed")
}

async fn run_lane(config: &LaneConfig, no_scanner: bool) -> Result<()> {
    let runtime = LaneRuntime::start(config).await?;
    let lane = runtime.handle();

    let (ingestor, scans) = ScanIngestor::spawn(ScanRules::from(&config.scanner), SCAN_EVENT_CAPACITY);
    let input = ingestor.input();
    if no_scanner {
        input.disable();
    }
    let bridge = spawn_scan_bridge(lane.clone(), scans, runtime.shutdown_token());
    let printer = spawn_event_printer(&lane, runtime.shutdown_token());
    let sweeper = runtime.spawn_cache_sweeper();

    info!(gate_id = %config.system.gate_id, "lane running, ':help' lists commands");

    let mut lines = FramedRead::new(
        tokio::io::stdin(),
        LinesCodec::new_with_max_length(MAX_CONSOLE_LINE),
    );
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        let line = tokio::select! {
            _ = &mut ctrl_c => {
                info!("interrupted");
                break;
            }
            line = lines.next() => match line {
                Some(Ok(line)) => line,
                Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                    warn!(max = MAX_CONSOLE_LINE, "console line too long, ignored");
                    continue;
                }
                Some(Err(LinesCodecError::Io(e))) => {
                    warn!(error = %e, "console closed");
                    break;
                }
                None => {
                    info!("console closed");
                    break;
                }
            },
        };

        let Some(command) = line.strip_prefix(':') else {
            input
                .simulate_scan(line.trim_end_matches('\r'))
                .await
                .context("scanner ingestor stopped")?;
            continue;
        };

        match command.parse::<OperatorCommand>() {
            Ok(OperatorCommand::Quit) => break,
            Ok(OperatorCommand::Help) => println!("{HELP}"),
            Ok(OperatorCommand::Scanner(true)) => input.enable(),
            Ok(OperatorCommand::Scanner(false)) => input.disable(),
            // processed exits are printed by the event printer
            Ok(command @ OperatorCommand::Exit { .. }) => {
                if let Err(e) = console::execute(&lane, command).await {
                    warn!("{e:#}");
                }
            }
            Ok(command) => match console::execute(&lane, command).await {
                Ok(value) => println!("{value}"),
                Err(e) => warn!("{e:#}"),
            },
            Err(e) => warn!("{e}"),
        }
    }

    ingestor.shutdown().await;
    runtime.shutdown().await;
    for task in [Some(bridge), Some(printer), sweeper].into_iter().flatten() {
        if let Err(e) = task.await {
            warn!(error = %e, "background task ended abnormally");
        }
    }
    info!("exitgate stopped");
    Ok(())
}
