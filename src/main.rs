//! PMS Logger CLI
//!
//! Particulate and temperature/humidity logger for the PMS7003.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use chrono_tz::Tz;
use clap::{Parser, Subcommand};
use pms_logger::{
    config::Config,
    core::{summarize, Logger, WindowResult},
    diagnostics::{create_shared_log_with_persistence, read_persisted},
    protocol::{Frame, FrameRead, FrameReader, Particulates},
    sensor,
    serial::{self, ByteSource},
    store::{Database, TIMESTAMP_FORMAT},
    VERSION,
};
use serialport::ClearBuffer;
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Delay between readings in the probe.
const PROBE_INTERVAL: Duration = Duration::from_secs(3);

#[derive(Parser)]
#[command(name = "pms-logger")]
#[command(version = VERSION)]
#[command(about = "Log PMS7003 particulate and DHT22 readings to SQLite", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read, average and store sensor data until interrupted
    Run {
        /// Serial device of the particulate sensor
        #[arg(long)]
        port: Option<String>,

        /// Serial baud rate
        #[arg(long)]
        baud: Option<u32>,

        /// SQLite database file
        #[arg(long, short)]
        database: Option<PathBuf>,

        /// Averaging window length in seconds
        #[arg(long)]
        window_secs: Option<f64>,

        /// IIO device directory of the temperature/humidity sensor
        #[arg(long)]
        env_device: Option<PathBuf>,

        /// Print every stored window to stdout
        #[arg(long)]
        print: bool,
    },

    /// Print decoded sensor readings every few seconds
    Probe {
        /// Serial device of the particulate sensor
        #[arg(long)]
        port: Option<String>,
    },

    /// Show cumulative diagnostics and store status
    Status,

    /// Show summary statistics of stored windows
    Stats,

    /// Export stored windows
    Export {
        /// Output file (stdout if omitted)
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Export format (csv, json or jsonl)
        #[arg(long, default_value = "csv")]
        format: String,
    },

    /// Show configuration
    Config {
        /// Write the effective configuration, defaults included, to the config file
        #[arg(long)]
        init: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            port,
            baud,
            database,
            window_secs,
            env_device,
            print,
        } => cmd_run(port, baud, database, window_secs, env_device, print),
        Commands::Probe { port } => cmd_probe(port),
        Commands::Status => cmd_status(),
        Commands::Stats => cmd_stats(),
        Commands::Export { output, format } => cmd_export(output, &format),
        Commands::Config { init } => cmd_config(init),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn cmd_run(
    port: Option<String>,
    baud: Option<u32>,
    database: Option<PathBuf>,
    window_secs: Option<f64>,
    env_device: Option<PathBuf>,
    print: bool,
) -> Result<()> {
    let mut config = Config::load().context("loading configuration")?;
    if let Some(port) = port {
        config.serial_port = port;
    }
    if let Some(baud) = baud {
        config.baud_rate = baud;
    }
    if let Some(database) = database {
        config.database_path = database;
    }
    if let Some(secs) = window_secs {
        config.window_duration =
            Duration::try_from_secs_f64(secs).context("invalid --window-secs")?;
    }
    if env_device.is_some() {
        config.environment_device = env_device;
    }
    config.validate()?;
    config.ensure_directories()?;

    init_logging(config.log_file.as_deref())?;
    let tz = config.timezone()?;

    info!("-----------------------------------------");
    info!(
        "pms-logger v{VERSION} launched at {}",
        Utc::now().format(TIMESTAMP_FORMAT)
    );

    let db = Database::open(&config.database_path, &config.table)
        .with_context(|| format!("opening database {:?}", config.database_path))?;
    let port = serial::open_port(&config.serial_port, config.baud_rate)
        .with_context(|| format!("opening serial port {}", config.serial_port))?;
    let env_sensor = sensor::from_device(config.environment_device.clone());

    let diagnostics = create_shared_log_with_persistence(config.diagnostics_path());
    info!(
        run_id = %diagnostics.run_id(),
        window_secs = config.window_duration.as_secs_f64(),
        table = %config.table,
        "logging {} to {:?}",
        config.serial_port,
        config.database_path
    );

    let running = Arc::new(AtomicBool::new(true));
    ctrlc_handler(running.clone())?;

    let mut logger = Logger::new(
        port,
        env_sensor,
        db,
        config.window_duration,
        Utc::now(),
        diagnostics.clone(),
    );

    let outcome = logger.run(&running, config.poll_interval, |window| {
        if print {
            print_window(window, tz);
        }
    });

    // Closes the serial port and the database.
    drop(logger);

    if let Err(e) = diagnostics.save() {
        warn!("could not save diagnostics: {e}");
    }
    println!("{}", diagnostics.summary());

    outcome.context("logging stopped")
}

fn cmd_probe(port: Option<String>) -> Result<()> {
    init_logging(None)?;
    let config = Config::load().unwrap_or_default();
    let path = port.unwrap_or(config.serial_port);

    let port = serial::open_port(&path, config.baud_rate)
        .with_context(|| format!("opening serial port {path}"))?;
    let mut reader = FrameReader::new(port);

    println!("Connected to PMS7003 on {path}");
    println!("Supported values:");
    println!("{:?}", Particulates::FIELD_NAMES);
    println!("---------------------");

    loop {
        // Drop the backlog so each reading is fresh.
        reader
            .source_mut()
            .clear(ClearBuffer::Input)
            .context("clearing serial input")?;
        reader.reset();
        thread::sleep(PROBE_INTERVAL);

        match reader.poll() {
            Ok(Some(FrameRead::Valid(frame))) => print_frame(&frame),
            Ok(Some(FrameRead::ChecksumMismatch { frame, computed })) => println!(
                "Checksum mismatch (carried {:#06x}, computed {computed:#06x}), skipped",
                frame.checksum
            ),
            Ok(None) => println!(
                "No frame yet ({} bytes buffered)",
                reader.source_mut().bytes_available()?
            ),
            Err(e) if e.kind() == ErrorKind::TimedOut => println!("No frame yet (read timed out)"),
            Err(e) => return Err(e).context("reading from sensor"),
        }
    }
}

fn cmd_status() -> Result<()> {
    let config = Config::load().unwrap_or_default();

    println!("PMS Logger Status");
    println!("=================");
    println!();

    println!("Configuration:");
    println!("  Serial port: {} @ {} baud", config.serial_port, config.baud_rate);
    println!(
        "  Window duration: {:.1}s",
        config.window_duration.as_secs_f64()
    );
    println!(
        "  Temperature/humidity: {}",
        config
            .environment_device
            .as_ref()
            .map(|d| d.display().to_string())
            .unwrap_or_else(|| "disabled".to_string())
    );
    println!();

    if config.database_path.exists() {
        let db = Database::open(&config.database_path, &config.table)?;
        println!("Store ({:?}, table {}):", config.database_path, db.table());
        println!("  Windows stored: {}", db.count()?);
        if let Some(last) = db.last_timestamp()? {
            println!("  Last window: {}", format_local(last, config.timezone()?));
        }
    } else {
        println!("No database at {:?} yet.", config.database_path);
    }
    println!();

    let stats_path = config.diagnostics_path();
    if stats_path.exists() {
        let stats = read_persisted(&stats_path)
            .with_context(|| format!("reading {stats_path:?}"))?;
        println!("Cumulative Statistics:");
        println!("  Frames decoded: {}", stats.frames_decoded);
        println!("  Checksum failures: {}", stats.checksum_failures);
        println!("  Bytes skipped while syncing: {}", stats.sync_bytes_skipped);
        println!("  Temperature/humidity misses: {}", stats.env_read_failures);
        println!("  Windows persisted: {}", stats.windows_persisted);
        println!("  Empty windows: {}", stats.empty_windows);
        println!("  Last run: {} ({})", stats.last_run_id, stats.last_updated);
    } else {
        println!("No previous run data found.");
    }

    Ok(())
}

fn cmd_stats() -> Result<()> {
    let config = Config::load().unwrap_or_default();
    let db = open_existing(&config)?;
    let rows = db.rows()?;

    if rows.is_empty() {
        println!("No windows stored yet");
        return Ok(());
    }

    let tz = config.timezone()?;
    println!("Windows: {}", rows.len());
    if let (Some(first), Some(last)) = (rows.first(), rows.last()) {
        println!(
            "Period:  {} to {}",
            format_local(first.timestamp, tz),
            format_local(last.timestamp, tz)
        );
    }
    println!();
    println!(
        "{:<18} {:>8} {:>10} {:>10} {:>10} {:>10}",
        "field", "count", "mean", "std dev", "min", "max"
    );
    for field in summarize(&rows) {
        println!(
            "{:<18} {:>8} {:>10.1} {:>10} {:>10.1} {:>10.1}",
            field.name,
            field.count,
            field.mean,
            field
                .std_dev
                .map(|sd| format!("{sd:.1}"))
                .unwrap_or_else(|| "-".to_string()),
            field.min,
            field.max
        );
    }

    Ok(())
}

fn cmd_export(output: Option<PathBuf>, format: &str) -> Result<()> {
    let config = Config::load().unwrap_or_default();
    let db = open_existing(&config)?;

    let mut out: Box<dyn Write> = match &output {
        Some(path) => Box::new(
            std::fs::File::create(path).with_context(|| format!("creating {path:?}"))?,
        ),
        None => Box::new(std::io::stdout().lock()),
    };

    let count = match format {
        "csv" => db.export_csv(&mut out)?,
        "json" => {
            let rows = db.rows()?;
            serde_json::to_writer_pretty(&mut out, &rows)?;
            writeln!(out)?;
            rows.len()
        }
        "jsonl" => {
            let rows = db.rows()?;
            for row in &rows {
                serde_json::to_writer(&mut out, row)?;
                writeln!(out)?;
            }
            rows.len()
        }
        other => bail!("unknown export format '{other}' (expected csv, json or jsonl)"),
    };
    out.flush()?;

    match output {
        Some(path) => eprintln!("Exported {count} windows to {path:?}"),
        None => eprintln!("Exported {count} windows"),
    }
    Ok(())
}

fn cmd_config(init: bool) -> Result<()> {
    let config = Config::load()?;
    if init {
        config.save().context("saving configuration")?;
        println!("Wrote {:?}", Config::config_path());
        return Ok(());
    }

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

/// Open the configured database, refusing to create a new one.
fn open_existing(config: &Config) -> Result<Database> {
    if !config.database_path.exists() {
        bail!(
            "no database at {:?}; run 'pms-logger run' first",
            config.database_path
        );
    }
    Ok(Database::open(&config.database_path, &config.table)?)
}

/// Install the tracing subscriber, appending to `log_file` when given.
fn init_logging(log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {path:?}"))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}

fn format_local(timestamp: chrono::DateTime<Utc>, tz: Tz) -> String {
    timestamp
        .with_timezone(&tz)
        .format("%Y-%m-%d %H:%M:%S %Z")
        .to_string()
}

fn print_window(window: &WindowResult, tz: Tz) {
    let p = &window.particulates;
    println!("DateTime: {}", format_local(window.timestamp, tz));
    match (window.temperature_c, window.humidity_percent) {
        (Some(t), Some(h)) => println!("Temp = {t:.1}°C | Humi = {h:.0}%"),
        _ => println!("Temp/Humi = no data"),
    }
    println!("PM1.0 = {} ug/m3 (ATM {})", p.pm1_0_cf1, p.pm1_0_atm);
    println!("PM2.5 = {} ug/m3 (ATM {})", p.pm2_5_cf1, p.pm2_5_atm);
    println!("PM10  = {} ug/m3 (ATM {})", p.pm10_cf1, p.pm10_atm);
    println!(
        "Counts per 0.1l: >0.3um {} | >0.5um {} | >1.0um {} | >2.5um {} | >5.0um {} | >10um {}",
        p.count_0_3um, p.count_0_5um, p.count_1_0um, p.count_2_5um, p.count_5_0um, p.count_10um
    );
    println!("----------------------------------------");
}

fn print_frame(frame: &Frame) {
    let values: Vec<String> = Particulates::FIELD_NAMES
        .iter()
        .zip(frame.particulates.to_array())
        .map(|(name, value)| format!("{name}: {value}"))
        .collect();
    println!(
        "{{{}, version: {}, error_code: {}}}",
        values.join(", "),
        frame.version,
        frame.error_code
    );
}

/// Set up Ctrl+C handler.
fn ctrlc_handler(running: Arc<AtomicBool>) -> Result<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .context("setting Ctrl+C handler")
}
