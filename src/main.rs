use anyhow::{bail, Context, Result};
use clap::Parser;
use heartlink::transport::{MockTransport, SimulatedStrap};
use heartlink::{HeartlinkConfig, MonitorOrchestrator};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;

const SIMULATED_PEER_ID: &str = "simulated-strap";

#[derive(Parser, Debug)]
#[command(name = "heartlink")]
#[command(about = "Heart-rate strap monitor with reconnection, signal quality filtering and alerts")]
#[command(version)]
#[command(long_about = "Keeps a link to a BLE heart-rate strap alive, decodes its measurements, \
rejects noisy readings, raises heart-rate and connectivity alerts, and forwards accepted \
readings upstream with an offline queue for when the upstream is unreachable.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "heartlink.toml", help = "Path to TOML configuration file")]
    config: String,

    /// Enable debug logging (most verbose)
    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    /// Enable verbose logging (info level)
    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration file and exit without starting the monitor")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,

    /// Also write logs to a daily rolling file in this directory
    #[arg(long, value_name = "DIR")]
    log_dir: Option<PathBuf>,

    /// Run against a simulated strap instead of a radio
    #[arg(long)]
    simulate: bool,

    /// Resting heart rate of the simulated strap
    #[arg(long, default_value_t = 72, requires = "simulate")]
    simulate_bpm: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        print_default_config()?;
        return Ok(());
    }

    let _log_guard = init_logging(&args)?;

    info!("Starting heartlink v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let mut config = HeartlinkConfig::load_from_file(&args.config)
        .with_context(|| format!("Failed to load configuration from {}", args.config))?;

    if args.validate_config {
        match config.validate() {
            Ok(()) => {
                info!("Configuration validation successful");
                println!("✓ Configuration is valid");
                return Ok(());
            }
            Err(e) => {
                error!("Configuration validation failed: {}", e);
                eprintln!("✗ Configuration validation failed: {}", e);
                std::process::exit(1);
            }
        }
    }
    config.validate().context("Invalid configuration")?;

    if !args.simulate {
        bail!("No radio backend is built into this binary; run with --simulate");
    }

    if config.device.peer_id.is_none() {
        config.device.peer_id = Some(SIMULATED_PEER_ID.to_string());
    }

    let (transport, transport_events) = MockTransport::new();
    let mut orchestrator =
        MonitorOrchestrator::new(config, Arc::new(transport.clone()), transport_events)
            .context("Failed to create monitor")?;

    orchestrator
        .start()
        .await
        .context("Failed to start monitor")?;

    let strap = SimulatedStrap::new(transport, args.simulate_bpm);
    tokio::spawn(strap.run(orchestrator.cancellation_token()));

    let exit_code = orchestrator
        .run()
        .await
        .context("Monitor failed while running")?;

    info!("heartlink exited with code: {}", exit_code);
    std::process::exit(exit_code);
}

fn init_logging(args: &Args) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("heartlink={}", log_level)));

    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .boxed(),
        Some("pretty") | None => fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_ids(args.debug)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer()
                .with_target(true)
                .with_thread_ids(args.debug)
                .with_file(args.debug)
                .with_line_number(args.debug)
                .boxed()
        }
    };

    let (file_layer, guard) = match &args.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, "heartlink.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(file_layer)
        .with(env_filter)
        .try_init()
        .context("Failed to install log subscriber")?;

    Ok(guard)
}

/// Print default configuration in TOML format
fn print_default_config() -> Result<()> {
    let rendered = toml::to_string_pretty(&HeartlinkConfig::default())
        .context("Failed to render default configuration")?;
    println!("# heartlink configuration file");
    println!("# Every option with its default value; environment variables named");
    println!("# HEARTLINK__<SECTION>__<KEY> override the file.");
    println!();
    println!("{}", rendered);
    Ok(())
}
