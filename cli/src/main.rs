// ricohsync-cli: keep a Ricoh camera's clock and geotag in sync from the desktop
//
// Cross-platform (macOS, Linux, Windows) command-line interface over btleplug.

mod ble;
mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use ricohsync_core::{
    Advertisement, Clock, GattProfile, LocationSample, LocationSource, PayloadEncoder,
    SessionManager, SyncState, SystemClock,
};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "ricohsync")]
#[command(about = "RicohSync — camera time & location sync over Bluetooth LE", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List nearby cameras
    Scan {
        /// Seconds to listen (defaults to the configured value)
        #[arg(short, long)]
        seconds: Option<u64>,
        /// Show every device, ignoring the name filter
        #[arg(short, long)]
        all: bool,
    },
    /// Connect to a camera and keep it synced until Ctrl+C
    Sync {
        /// Device id or name fragment (defaults to the configured device)
        device: Option<String>,
        /// Report this position: <latitude>,<longitude>[,<altitude>]
        #[arg(short, long)]
        location: Option<String>,
    },
    /// Print the payload a sync tick would write
    Encode {
        /// RFC 3339 time (defaults to now)
        #[arg(short, long)]
        time: Option<String>,
        /// <latitude>,<longitude>[,<altitude>]
        #[arg(short, long)]
        location: Option<String>,
    },
    /// Configure settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    Set { key: String, value: String },
    Get { key: String },
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    ricohsync_core::init_logging("warn");

    let cli = Cli::parse();

    match cli.command {
        Commands::Scan { seconds, all } => cmd_scan(seconds, all).await,
        Commands::Sync { device, location } => cmd_sync(device, location).await,
        Commands::Encode { time, location } => cmd_encode(time, location),
        Commands::Config { action } => cmd_config(action),
    }
}

async fn cmd_scan(seconds: Option<u64>, all: bool) -> Result<()> {
    let config = config::Config::load()?;
    let seconds = seconds.unwrap_or(config.scan_seconds);
    let filter = if all {
        None
    } else {
        config.name_filter.as_deref()
    };

    println!("{}", format!("Scanning for {}s...", seconds).bold());
    let central = ble::BtleCentral::new(GattProfile::default()).await?;
    let found = central.scan(Duration::from_secs(seconds), filter).await?;

    if found.is_empty() {
        println!("{}", "No devices found.".dimmed());
        if filter.is_some() {
            println!("  Try {} to list every device", "ricohsync scan --all".bright_green());
        }
        return Ok(());
    }

    println!();
    for advertisement in &found {
        let rssi = advertisement
            .rssi
            .map(|rssi| format!("{} dBm", rssi))
            .unwrap_or_else(|| "?".to_string());
        println!(
            "  {:<24} {:<20} {}",
            advertisement.id.bright_cyan(),
            advertisement.name.as_deref().unwrap_or("(unnamed)"),
            rssi.dimmed()
        );
    }
    println!();
    println!(
        "Set a default: {}",
        "ricohsync config set default_device <id>".bright_green()
    );

    Ok(())
}

/// Reports a fixed position, stamped at read time
struct StaticLocation(config::FixedLocation);

impl LocationSource for StaticLocation {
    fn latest(&self) -> Option<LocationSample> {
        Some(self.0.sample())
    }
}

/// No position available; every tick syncs time only
struct NoLocation;

impl LocationSource for NoLocation {
    fn latest(&self) -> Option<LocationSample> {
        None
    }
}

async fn cmd_sync(device: Option<String>, location: Option<String>) -> Result<()> {
    let config = config::Config::load()?;
    let sync_config = config.to_sync_config()?;

    let fixed = match location {
        Some(value) => Some(config::parse_location(&value)?),
        None => config.fixed_location,
    };
    let location: Arc<dyn LocationSource> = match fixed {
        Some(fixed) => Arc::new(StaticLocation(fixed)),
        None => Arc::new(NoLocation),
    };

    let central = Arc::new(ble::BtleCentral::new(sync_config.profile).await?);
    let query = device.or_else(|| config.default_device.clone());
    let advertisement = pick_device(&central, &config, query).await?;

    println!("{}", "RicohSync — Starting...".bold());
    println!("  Camera:   {}", advertisement.to_string().bright_cyan());
    match fixed {
        Some(fixed) => println!(
            "  Location: {:.5}, {:.5}",
            fixed.latitude, fixed.longitude
        ),
        None => println!("  Location: {}", "(time only)".dimmed()),
    }
    println!("  Interval: {}s", sync_config.sync_interval.as_secs());
    println!();
    println!("Press {} to stop", "Ctrl+C".bright_green());
    println!();

    let manager = SessionManager::new(sync_config, central, location, Arc::new(SystemClock))?;
    let mut states = manager.start(advertisement)?;

    let outcome = loop {
        tokio::select! {
            state = states.next() => match state {
                Some(state) => {
                    print_state(&state);
                    if let SyncState::Stopped { error } = state {
                        break error;
                    }
                }
                None => break None,
            },
            _ = tokio::signal::ctrl_c() => {
                println!();
                println!("{}", "Stopping...".dimmed());
                break None;
            }
        }
    };

    manager.stop_all().await;

    match outcome {
        Some(failure) => Err(anyhow::Error::from(failure).context("Sync session failed")),
        None => Ok(()),
    }
}

/// Resolve the camera to sync with from a query or the strongest match nearby
async fn pick_device(
    central: &ble::BtleCentral,
    config: &config::Config,
    query: Option<String>,
) -> Result<Advertisement> {
    println!("{}", format!("Scanning for {}s...", config.scan_seconds).dimmed());
    let scan_time = Duration::from_secs(config.scan_seconds);

    match query {
        Some(query) => {
            let found = central.scan(scan_time, None).await?;
            found
                .into_iter()
                .find(|advertisement| advertisement.matches(&query))
                .with_context(|| format!("No device matching {:?} nearby", query))
        }
        None => {
            let found = central
                .scan(scan_time, config.name_filter.as_deref())
                .await?;
            found
                .into_iter()
                .next()
                .context("No camera found; run `ricohsync scan --all` and pass a device")
        }
    }
}

fn print_state(state: &SyncState) {
    let label = match state {
        SyncState::Starting => state.label().dimmed(),
        SyncState::Connecting { .. } => state.label().yellow(),
        SyncState::Syncing { .. } => state.label().green(),
        SyncState::Stopped { error: None } => state.label().normal(),
        SyncState::Stopped { error: Some(_) } => state.label().bright_red(),
    };

    let detail = match state {
        SyncState::Syncing {
            last_sync_time: Some(time),
            last_location,
            ..
        } => {
            let location = last_location
                .as_ref()
                .map(|l| format!("{:.5}, {:.5}", l.latitude, l.longitude))
                .unwrap_or_else(|| "time only".to_string());
            format!("synced {} ({})", time.format("%Y-%m-%d %H:%M:%S"), location)
        }
        other => other.to_string(),
    };

    println!("{} {:<11} {}", "●".bold(), label, detail);
}

fn cmd_encode(time: Option<String>, location: Option<String>) -> Result<()> {
    let time = match time {
        Some(value) => chrono::DateTime::parse_from_rfc3339(&value)
            .with_context(|| format!("Invalid RFC 3339 time: {}", value))?,
        None => SystemClock.now(),
    };
    let sample = match location {
        Some(value) => Some(config::parse_location(&value)?.sample()),
        None => None,
    };

    let payload = PayloadEncoder::encode(&time, sample.as_ref())?;
    let profile = GattProfile::default();

    println!("{}", "Sync payload".bold());
    println!("  Time:      {}", time.to_rfc3339());
    println!(
        "  {:<10} {}",
        "date-time".bright_cyan(),
        hex::encode(payload.date_time)
    );
    println!("  {:<10} {}", "", profile.date_time.to_string().dimmed());
    match payload.location {
        Some(bytes) => {
            println!("  {:<10} {}", "location".bright_cyan(), hex::encode(bytes));
            println!("  {:<10} {}", "", profile.location.to_string().dimmed());
        }
        None => println!("  {:<10} {}", "location".bright_cyan(), "(none)".dimmed()),
    }
    println!("  {:<10} {}", "combined".bright_cyan(), hex::encode(payload.to_bytes()));

    Ok(())
}

fn cmd_config(action: ConfigAction) -> Result<()> {
    let mut config = config::Config::load()?;

    match action {
        ConfigAction::Set { key, value } => {
            config.set(&key, &value)?;
            config.save()?;
            println!("{} Set {} = {}", "✓".green(), key.bright_cyan(), value);
        }

        ConfigAction::Get { key } => match config.get(&key) {
            Some(value) => println!("{} = {}", key.bright_cyan(), value),
            None if config.list().iter().any(|(k, _)| *k == key) => {
                println!("{} = {}", key.bright_cyan(), "(none)".dimmed());
            }
            None => anyhow::bail!("Unknown config key: {}", key),
        },

        ConfigAction::List => {
            println!("{}", "Configuration".bold());
            println!();

            for (key, value) in config.list() {
                println!("  {:<22} {}", key.bright_cyan(), value);
            }

            println!();
            println!(
                "  File: {}",
                config::Config::config_file()?.display().to_string().dimmed()
            );
        }
    }

    Ok(())
}
