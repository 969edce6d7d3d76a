//! dayahead CLI: fetch, probe and zone listing commands.
//!
//! Commands:
//! - `fetch`: retrieve one configured window, export it, optionally plot it
//! - `probe`: check the token, scan zones, find the latest day with data
//! - `zones`: list the built-in country → zone registry
//!
//! Exit codes: 0 exported, 1 fatal error, 2 nothing to export.

use anyhow::{Context, Result};
use chrono::{Days, NaiveDate};
use clap::{Args, Parser, Subcommand};
use dayahead_core::config::TOKEN_ENV_VAR;
use dayahead_core::period::RequestPeriod;
use dayahead_core::probe::{self, CredentialStatus, ResponseSample};
use dayahead_core::{zones, AppConfig, EntsoeClient, Exporter, RunOutcome};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Exit code when the API had nothing for the window.
const EXIT_NO_DATA: i32 = 2;

#[derive(Parser)]
#[command(
    name = "dayahead",
    about = "Day-ahead electricity prices from the ENTSO-E transparency platform"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch, normalize and export prices for one zone and date range.
    Fetch {
        #[command(flatten)]
        overrides: Overrides,

        /// Start date (YYYY-MM-DD).
        #[arg(long)]
        start: Option<String>,

        /// End date (YYYY-MM-DD), inclusive.
        #[arg(long)]
        end: Option<String>,

        /// Export format: csv or parquet.
        #[arg(long)]
        format: Option<String>,

        /// Output directory for data, metadata and plots.
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Render the line chart and heatmap.
        #[arg(long, default_value_t = false)]
        plots: bool,

        /// Keep prices in EUR/MWh only.
        #[arg(long, default_value_t = false)]
        no_kwh: bool,
    },
    /// Diagnose token validity and data availability.
    Probe {
        #[command(flatten)]
        overrides: Overrides,

        /// Reference date for the search (YYYY-MM-DD). Defaults to today.
        #[arg(long)]
        today: Option<String>,
    },
    /// List known country codes and their zone ids.
    Zones,
}

/// Flags shared by commands that talk to the API.
#[derive(Args)]
struct Overrides {
    /// Path to a JSON or TOML config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Country code (e.g. CY, DE) or a raw zone id.
    #[arg(long)]
    country: Option<String>,

    /// IANA timezone for the local timestamp column.
    #[arg(long)]
    timezone: Option<String>,

    /// API endpoint.
    #[arg(long)]
    api_url: Option<String>,
}

impl Overrides {
    /// File values, then the environment token, then flags.
    fn load(&self) -> Result<AppConfig> {
        let base = match &self.config {
            Some(path) => AppConfig::from_file(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => AppConfig::default(),
        };
        let mut config = base.with_token_override(std::env::var(TOKEN_ENV_VAR).ok());
        if let Some(country) = &self.country {
            config.country_code = country.clone();
        }
        if let Some(tz) = &self.timezone {
            config.timezone = tz.clone();
        }
        if let Some(url) = &self.api_url {
            config.api_url = url.clone();
        }
        Ok(config)
    }
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive("dayahead=info".parse()?))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Fetch {
            overrides,
            start,
            end,
            format,
            output_dir,
            plots,
            no_kwh,
        } => {
            let mut config = overrides.load()?;
            if let Some(start) = start {
                config.start_date = start;
            }
            if let Some(end) = end {
                config.end_date = end;
            }
            if let Some(format) = format {
                config.export_format = format;
            }
            if let Some(dir) = output_dir {
                config.output_dir = dir;
            }
            config.make_plots |= plots;
            if no_kwh {
                config.normalize_to_kwh = false;
            }
            run_fetch(&config)
        }
        Commands::Probe { overrides, today } => {
            let config = overrides.load()?;
            let today = match today {
                Some(s) => NaiveDate::parse_from_str(&s, "%Y-%m-%d")
                    .with_context(|| format!("invalid --today '{s}'"))?,
                None => chrono::Local::now().date_naive(),
            };
            // Only scan other zones when no country was asked for.
            let country = overrides.country.is_some().then(|| config.country_code.clone());
            run_probe(&config, country, today)
        }
        Commands::Zones => {
            for (country, zone) in zones::entries() {
                println!("{country:<4}{zone}");
            }
            Ok(())
        }
    }
}

fn run_fetch(config: &AppConfig) -> Result<()> {
    let validated = config.validate().context("invalid configuration")?;
    let client = EntsoeClient::new(&validated.client_settings())?;
    let exporter = Exporter::new(&config.output_dir);

    match dayahead_core::run(config, &client, &exporter)? {
        RunOutcome::Exported {
            metadata,
            plots,
            dropped_rows,
            skipped_points,
        } => {
            println!(
                "Exported {} rows for {} ({} to {})",
                metadata.record_count, metadata.zone, config.start_date, config.end_date
            );
            println!(
                "  data:     {}",
                config.output_dir.join(&metadata.data_file).display()
            );
            println!(
                "  metadata: {}",
                exporter.metadata_path(&metadata.zone).display()
            );
            for path in &plots {
                println!("  plot:     {}", path.display());
            }
            if dropped_rows > 0 || skipped_points > 0 {
                println!("  skipped {skipped_points} points, dropped {dropped_rows} rows");
            }
            Ok(())
        }
        RunOutcome::NoData { reason } => {
            println!(
                "No data available: {}",
                reason.as_deref().unwrap_or("the API returned an acknowledgement")
            );
            println!("Try `dayahead probe` to find a window that has data.");
            std::process::exit(EXIT_NO_DATA);
        }
        RunOutcome::Empty => {
            println!("The response held no price points; nothing was written.");
            std::process::exit(EXIT_NO_DATA);
        }
    }
}

fn run_probe(config: &AppConfig, country: Option<String>, today: NaiveDate) -> Result<()> {
    let client = EntsoeClient::new(&config.client_settings()?)?;
    let yesterday = today.checked_sub_days(Days::new(1)).unwrap_or(today);

    let check_zone = zones::resolve(probe::CREDENTIAL_CHECK_COUNTRY);
    match probe::check_credential(&client, &check_zone, yesterday)? {
        CredentialStatus::Valid => println!("Token accepted."),
        CredentialStatus::Rejected => {
            eprintln!("Token rejected (HTTP 401). Request a new one from the transparency platform.");
            std::process::exit(1);
        }
        CredentialStatus::Unexpected(status) => {
            eprintln!("Unexpected status {status} while checking the token.");
            std::process::exit(1);
        }
    }

    let candidates: Vec<String> = match country {
        Some(country) => vec![country],
        None => {
            let scan_day = today.checked_sub_days(Days::new(7)).unwrap_or(today);
            println!("\nZones with data on {scan_day}:");
            let results = probe::scan_zones(&client, scan_day);
            for r in &results {
                let mark = if r.availability.has_data() { "yes" } else { "no" };
                println!("  {:<4}{:<18}{mark}", r.country, r.zone);
            }
            let available: Vec<String> = results
                .into_iter()
                .filter(|r| r.availability.has_data())
                .map(|r| r.country)
                .collect();
            println!("{}/{} zones have data", available.len(), zones::entries().len());
            available.into_iter().take(3).collect()
        }
    };

    for country in &candidates {
        let zone = zones::resolve(country);
        if let Some(found) = probe::find_latest_available(&client, &zone, today) {
            println!("\nLatest data for {country}: {found}");
            print_response_sample(&client, &zone, found)?;
            let recommended = probe::recommend_config(config, country, found);
            println!("Recommended config:");
            println!("{}", serde_json::to_string_pretty(&recommended)?);
            return Ok(());
        }
        println!("\nNo data for {country} in the last 90 days.");
    }

    std::process::exit(EXIT_NO_DATA);
}

fn print_response_sample(client: &EntsoeClient, zone: &str, day: NaiveDate) -> Result<()> {
    let period = RequestPeriod::for_days(day, day);
    println!("\nResponse for {day}:");
    println!("  url:  {}", client.request_url(zone, &period.start, &period.end)?);
    match probe::inspect(client, zone, day)? {
        ResponseSample::Document { size, preview } => {
            println!("  size: {size} bytes");
            println!("  first {} characters:", probe::PREVIEW_CHARS);
            println!("{preview}");
        }
        ResponseSample::NoData { reason } => {
            println!(
                "  acknowledgement: {}",
                reason.as_deref().unwrap_or("no reason given")
            );
        }
    }
    Ok(())
}
