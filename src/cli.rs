use std::io::Write;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use owo_colors::OwoColorize;
use tabled::builder::Builder as TableBuilder;
use tabled::settings::Style as TableStyle;
use tokio_stream::StreamExt;
use tracing_subscriber::filter::LevelFilter;

use crate::config::{FetchOptions, ManagerConfig};
use crate::manager::BleManager;
use crate::radio::BtleplugLink;
use crate::radio::model::{DeviceId, DeviceListSnapshot, FoundDevice, ServiceDescriptor};
use crate::telemetry;

/// Command-line options for the BLE central manager demo.
#[derive(Debug, Parser)]
#[command(name = "blem", about = "Scan for BLE peripherals and fetch their services.")]
pub struct Args {
    /// Telemetry verbosity override.
    #[arg(long, global = true)]
    log_level: Option<LogLevel>,
    /// Emits machine-readable JSON instead of tables.
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Command,
}

impl Args {
    #[must_use]
    pub fn log_level(&self) -> Option<LogLevel> {
        self.log_level
    }
}

/// Supported CLI commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Scans for peripherals and prints the discovered list.
    Scan(ScanArgs),
    /// Connects to a peripheral and lists its services.
    Services(ServicesArgs),
}

#[derive(Debug, clap::Args)]
pub struct ScanArgs {
    /// How long to keep the scan open (e.g. `10s`, `2m`).
    #[arg(long, default_value = "10s", value_parser = parse_duration)]
    duration: Duration,
}

#[derive(Debug, clap::Args)]
pub struct ServicesArgs {
    /// Peripheral identity as printed by `scan`.
    device: String,
    /// Bypasses the service cache.
    #[arg(long)]
    no_cache: bool,
    /// Leaves the connection open after fetching.
    #[arg(long)]
    keep_connected: bool,
}

/// Telemetry verbosity levels.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    #[must_use]
    pub(crate) fn as_level_filter(self) -> LevelFilter {
        match self {
            Self::Trace => LevelFilter::TRACE,
            Self::Debug => LevelFilter::DEBUG,
            Self::Info => LevelFilter::INFO,
            Self::Warn => LevelFilter::WARN,
            Self::Error => LevelFilter::ERROR,
        }
    }
}

/// Runs the parsed CLI command against the real radio backend.
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, no adapter is present,
/// or the requested BLE interaction fails.
pub async fn run<W>(args: Args, out: &mut W) -> anyhow::Result<()>
where
    W: Write,
{
    telemetry::initialise_tracing(args.log_level.map(LogLevel::as_level_filter))?;

    let (link, events) = BtleplugLink::new().await?;
    let manager = BleManager::new(link, events, ManagerConfig::default());

    let result = match args.command {
        Command::Scan(scan_args) => run_scan(&manager, &scan_args, args.json, out).await,
        Command::Services(services_args) => {
            run_services(&manager, &services_args, args.json, out).await
        }
    };

    manager.shutdown().await;
    result
}

async fn run_scan<W>(
    manager: &BleManager,
    args: &ScanArgs,
    json: bool,
    out: &mut W,
) -> anyhow::Result<()>
where
    W: Write,
{
    let mut stream = manager.discovered_devices().await?;
    let deadline = tokio::time::sleep(args.duration);
    tokio::pin!(deadline);

    let mut latest: DeviceListSnapshot = stream
        .next()
        .await
        .unwrap_or_default();
    loop {
        tokio::select! {
            () = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => break,
            maybe_snapshot = stream.next() => {
                match maybe_snapshot {
                    Some(snapshot) => latest = snapshot,
                    None => break,
                }
            }
        }
    }

    if json {
        serde_json::to_writer_pretty(&mut *out, latest.as_ref())?;
        writeln!(out)?;
    } else {
        writeln!(out, "{}", format!("{} device(s) discovered", latest.len()).bold())?;
        writeln!(out, "{}", device_table(&latest))?;
    }
    Ok(())
}

async fn run_services<W>(
    manager: &BleManager,
    args: &ServicesArgs,
    json: bool,
    out: &mut W,
) -> anyhow::Result<()>
where
    W: Write,
{
    let device: DeviceId = args.device.as_str().into();
    let options = FetchOptions::builder()
        .use_cache(!args.no_cache)
        .disconnect_after(!args.keep_connected)
        .build();

    let services = manager.fetch_services(&device, options).await?;

    if json {
        serde_json::to_writer_pretty(&mut *out, &services)?;
        writeln!(out)?;
    } else {
        writeln!(
            out,
            "{} {}",
            "✓".green(),
            format!("{} service(s) on {device}", services.len()).bold()
        )?;
        writeln!(out, "{}", service_table(&services))?;
    }
    Ok(())
}

fn device_table(devices: &[FoundDevice]) -> String {
    let mut builder = TableBuilder::default();
    builder.push_record(["id", "name", "rssi", "state"]);
    for device in devices {
        builder.push_record([
            device.id().to_string(),
            device.local_name().unwrap_or("-").to_string(),
            device
                .rssi()
                .map_or_else(|| "-".to_string(), |rssi| rssi.to_string()),
            device.state().to_string(),
        ]);
    }
    let mut table = builder.build();
    table.with(TableStyle::rounded());
    table.to_string()
}

fn service_table(services: &[ServiceDescriptor]) -> String {
    let mut builder = TableBuilder::default();
    builder.push_record(["uuid", "primary"]);
    for service in services {
        builder.push_record([
            service.uuid().to_string(),
            service.is_primary().to_string(),
        ]);
    }
    let mut table = builder.build();
    table.with(TableStyle::rounded());
    table.to_string()
}

fn parse_duration(value: &str) -> Result<Duration, String> {
    humantime::parse_duration(value).map_err(|error| error.to_string())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn device_table_uses_dash_for_missing_fields() {
        let devices = vec![FoundDevice::new("AA:BB".into(), None, None)];
        let rendered = device_table(&devices);
        assert!(rendered.contains("AA:BB"));
        assert!(rendered.contains('-'));
        assert!(rendered.contains("disconnected"));
    }

    #[test]
    fn scan_args_parse_humantime_durations() {
        let args = Args::try_parse_from(["blem", "scan", "--duration", "250ms"])
            .expect("args should parse");
        let Command::Scan(scan) = args.command else {
            panic!("expected scan command");
        };
        assert_eq!(Duration::from_millis(250), scan.duration);
    }

    #[test]
    fn services_args_default_to_cache_and_disconnect() {
        let args = Args::try_parse_from(["blem", "services", "AA:BB"])
            .expect("args should parse");
        let Command::Services(services) = args.command else {
            panic!("expected services command");
        };
        assert!(!services.no_cache);
        assert!(!services.keep_connected);
    }
}
