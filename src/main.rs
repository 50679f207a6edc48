use async_trait::async_trait;
use chrono::NaiveDateTime;
use clap::{ArgAction, Parser, Subcommand};
use energymeter_link::config::{Config, ConfigError, ConfigLoader, LogFormat, LoggingConfig};
use energymeter_link::format::{format_bytes, format_rate};
use energymeter_link::{
    bundle, ClientError, Confirm, DeletePrompt, Deletion, DeviceId, DeviceInfo, ErrorReport,
    FileEntry, FileName, FixedAnswer, Inventory, MeterService,
};
use serde::Serialize;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use thiserror::Error;
use tokio::signal;
use tracing::debug;
use tracing_subscriber::EnvFilter;

// Command-line arguments
#[derive(Parser, Debug)]
#[command(
    name = "emlink",
    version,
    about = "Talk to the USB energy-meter logger: device info, clock, file listing, downloads and deletion.",
    long_about = "Finds the meter by its USB identity (1999:0512), or uses --port, and runs one command per invocation. Results go to stdout; logs go to stderr."
)]
struct Args {
    /// Print machine-readable JSON instead of text.
    #[arg(long, global = true)]
    json: bool,

    /// Serial port to use instead of USB discovery.
    #[arg(long, global = true)]
    port: Option<String>,

    /// Configuration file (default: EMLINK_CONFIG, ./emlink.toml, then the platform config dir).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// More log output (-v info, -vv debug, -vvv trace).
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Show device id, storage usage and clock.
    Info,
    /// List the log files on the device.
    List,
    /// Write a new device id (0-65533).
    SetId { id: DeviceId },
    /// Set the device clock (default: now).
    SetRtc {
        /// Local time as `YYYY-MM-DD HH:MM:SS`.
        #[arg(long, value_parser = parse_local_time)]
        at: Option<NaiveDateTime>,
    },
    /// Download every log file into a ZIP archive.
    FetchAll {
        /// Archive path (default: output.directory/output.bundle_name).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Download one log file.
    Fetch {
        name: FileName,
        /// Destination path (default: output.directory/NAME).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Delete every log file on the device.
    DeleteAll {
        /// Skip the confirmation prompt.
        #[arg(long)]
        yes: bool,
    },
    /// Delete one log file.
    Delete {
        name: FileName,
        /// Skip the confirmation prompt.
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Bundle(#[from] bundle::BundleError),

    #[error("Failed to write '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Interrupted")]
    Interrupted,
}

// --- Main Application Entry Point ---
#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("emlink: {err}");
            return ExitCode::from(2);
        }
    };
    init_tracing(&config.logging, args.verbose);
    debug!(?config, "configuration loaded");

    let meter = MeterService::from_config(&config);
    let result = tokio::select! {
        result = run(&meter, &args, &config) => result,
        _ = signal::ctrl_c() => Err(CliError::Interrupted),
    };
    meter.close().await;

    match result {
        Ok(()) => ExitCode::SUCCESS,
        // nothing plugged in is not a failure
        Err(CliError::Client(err)) if err.is_benign() => {
            report_error(&args, &CliError::Client(err));
            ExitCode::SUCCESS
        }
        Err(err) => {
            report_error(&args, &err);
            ExitCode::FAILURE
        }
    }
}

fn load_config(args: &Args) -> Result<Config, ConfigError> {
    let loader = match &args.config {
        Some(path) => ConfigLoader::load_from(path)?,
        None => ConfigLoader::load()?,
    };
    let mut config = loader.into_config();
    if let Some(port) = &args.port {
        config.device.port = Some(port.clone());
    }
    config.validate()?;
    Ok(config)
}

fn init_tracing(logging: &LoggingConfig, verbose: u8) {
    let level = match verbose {
        0 => logging.level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.pretty().init(),
        LogFormat::Compact => builder.compact().init(),
    }
}

fn parse_local_time(value: &str) -> Result<NaiveDateTime, String> {
    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .ok_or_else(|| format!("`{value}` is not a `YYYY-MM-DD HH:MM:SS` time"))
}

async fn run(meter: &MeterService, args: &Args, config: &Config) -> Result<(), CliError> {
    match &args.command {
        Cmd::Info => {
            let info = meter.load_info().await?;
            print_info(args.json, &info);
        }
        Cmd::List => {
            let files = meter.load_list().await?;
            print_files(args.json, &files);
        }
        Cmd::SetId { id } => {
            let info = meter.set_id(*id).await?;
            print_applied(args.json, "Device id set", info.as_ref());
        }
        Cmd::SetRtc { at } => {
            let info = match at {
                Some(at) => meter.set_rtc(*at).await?,
                None => meter.sync_clock().await?,
            };
            print_applied(args.json, "Device clock set", info.as_ref());
        }
        Cmd::FetchAll { output } => {
            let blobs = meter.load_all().await?;
            let path = output.clone().unwrap_or_else(|| config.output.bundle_path());
            let saved = match bundle::archive(&blobs)? {
                Some(bytes) => {
                    write_file(&path, &bytes).await?;
                    Some(path)
                }
                None => None,
            };
            let names: Vec<&str> = blobs.iter().map(|b| b.name.as_str()).collect();
            print_download(args.json, meter, &names, saved.as_deref());
        }
        Cmd::Fetch { name, output } => {
            let blob = meter.load_one(name).await?;
            let path = output
                .clone()
                .unwrap_or_else(|| config.output.directory.join(&blob.name));
            write_file(&path, &blob.content).await?;
            print_download(args.json, meter, &[blob.name.as_str()], Some(&path));
        }
        Cmd::DeleteAll { yes } => {
            let outcome = meter.delete_all(confirmer(*yes).as_ref()).await?;
            print_deletion(args.json, &outcome);
        }
        Cmd::Delete { name, yes } => {
            let outcome = meter.delete_one(name, confirmer(*yes).as_ref()).await?;
            print_deletion(args.json, &outcome);
        }
    }
    Ok(())
}

async fn write_file(path: &Path, bytes: &[u8]) -> Result<(), CliError> {
    let write_err = |source| CliError::Write {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }
    tokio::fs::write(path, bytes).await.map_err(write_err)
}

// --- Confirmation ---

/// Asks on the terminal; anything but `y`/`yes` declines.
struct TerminalConfirm;

#[async_trait]
impl Confirm for TerminalConfirm {
    async fn confirm(&self, prompt: &DeletePrompt) -> bool {
        let question = prompt.to_string();
        tokio::task::spawn_blocking(move || {
            eprint!("{question} [y/N] ");
            let _ = std::io::stderr().flush();
            let mut answer = String::new();
            match std::io::stdin().lock().read_line(&mut answer) {
                Ok(_) => matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"),
                Err(_) => false,
            }
        })
        .await
        .unwrap_or(false)
    }
}

fn confirmer(yes: bool) -> Box<dyn Confirm> {
    if yes {
        Box::new(FixedAnswer(true))
    } else {
        Box::new(TerminalConfirm)
    }
}

// --- Output ---

#[derive(Serialize)]
struct InfoView<'a> {
    #[serde(flatten)]
    info: &'a DeviceInfo,
    total_bytes: u64,
    free_bytes: u64,
    used_bytes: u64,
    usage_percent: f64,
}

fn print_info(json: bool, info: &DeviceInfo) {
    if json {
        print_json(&InfoView {
            info,
            total_bytes: info.total_bytes(),
            free_bytes: info.free_bytes(),
            used_bytes: info.used_bytes(),
            usage_percent: info.usage_percent(),
        });
        return;
    }

    let id = if info.has_reserved_id() {
        format!("{} (not set)", info.device_id)
    } else {
        info.device_id.to_string()
    };
    println!("Device id : {id}");
    println!(
        "Storage   : {} used of {} ({:.2}%)",
        format_bytes(info.used_bytes()),
        format_bytes(info.total_bytes()),
        info.usage_percent()
    );
    println!("Clock     : {}", info.rtc.format("%Y-%m-%d %H:%M:%S"));
}

#[derive(Serialize)]
struct ListView<'a> {
    files: &'a [FileEntry],
    inventory: Inventory,
}

fn print_files(json: bool, files: &[FileEntry]) {
    let inventory = Inventory::of(files);
    if json {
        print_json(&ListView { files, inventory });
        return;
    }

    if files.is_empty() {
        println!("No log files on the meter.");
        return;
    }
    let width = files.iter().map(|f| f.name.len()).max().unwrap_or(0);
    for file in files {
        println!(
            "{:<width$}  {:>12}",
            file.name,
            format_bytes(u64::from(file.size_bytes))
        );
    }
    println!(
        "{} file(s), {}",
        inventory.files,
        format_bytes(inventory.bytes)
    );
}

#[derive(Serialize)]
struct DownloadView<'a> {
    files: &'a [&'a str],
    saved_to: Option<&'a Path>,
    transfer: Option<energymeter_link::TransferStats>,
}

fn print_download(json: bool, meter: &MeterService, files: &[&str], saved_to: Option<&Path>) {
    let transfer = meter.last_transfer();
    if json {
        print_json(&DownloadView {
            files,
            saved_to,
            transfer,
        });
        return;
    }

    match saved_to {
        Some(path) => println!("Saved {} file(s) to {}", files.len(), path.display()),
        None => println!("No log files on the meter."),
    }
    if let Some(stats) = transfer {
        println!(
            "Received {} in {:.1} s ({})",
            format_bytes(stats.bytes),
            stats.elapsed_ms as f64 / 1000.0,
            format_rate(stats.bytes_per_second)
        );
    }
}

/// A setting the device accepted, with the re-read info when there is one.
fn print_applied(json: bool, what: &str, info: Option<&DeviceInfo>) {
    match info {
        Some(info) => print_info(json, info),
        None if json => print_json(&serde_json::json!({ "applied": true, "info": null })),
        None => println!("{what}. The device info could not be re-read."),
    }
}

fn print_deletion(json: bool, outcome: &Deletion) {
    if json {
        print_json(outcome);
        return;
    }
    match outcome {
        Deletion::Declined => println!("Cancelled; nothing was deleted."),
        Deletion::Deleted {
            remaining: Some(remaining),
        } => {
            println!("Deleted.");
            print_files(false, remaining);
        }
        Deletion::Deleted { remaining: None } => {
            println!("Deleted. The file list could not be re-read.");
        }
    }
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{text}"),
        Err(err) => eprintln!("emlink: failed to encode output: {err}"),
    }
}

fn report_error(args: &Args, err: &CliError) {
    match err {
        CliError::Client(client) if args.json => print_json(&ErrorReport::from(client)),
        CliError::Client(client) => {
            eprintln!("emlink: {client}");
            if let Some(response) = client.response().filter(|r| !r.is_empty()) {
                eprintln!("  response: {response}");
            }
        }
        other => eprintln!("emlink: {other}"),
    }
}
