//! One configured retrieval, start to finish.
//!
//! Stages run in order: resolve zone, encode period, fetch, parse, normalize,
//! export, and optionally plot. The result is a typed [`RunOutcome`]; the
//! caller decides what to print and which exit code to use.

use crate::config::{AppConfig, ConfigError};
use crate::export::{ExportError, ExportFormat, ExportMetadata, Exporter};
use crate::fetch::{FetchError, FetchOutcome, PriceSource};
use crate::normalize::{normalize, NormalizeOptions};
use crate::parse::parse_document;
use crate::plot::Plotter;
use crate::series::PriceSeries;
use crate::zones;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("fetch: {0}")]
    Fetch(#[from] FetchError),

    #[error("export: {0}")]
    Export(#[from] ExportError),
}

/// How a run ended when nothing fatal happened.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// The API acknowledged the request without data. Nothing was written.
    NoData { reason: Option<String> },
    /// A document arrived but held no usable points. Nothing was written.
    Empty,
    Exported {
        metadata: ExportMetadata,
        /// Chart files written; empty when plotting is off or failed.
        plots: Vec<PathBuf>,
        /// Rows removed for unparsable timestamps.
        dropped_rows: usize,
        /// Points the parser skipped.
        skipped_points: usize,
    },
}

impl RunOutcome {
    pub fn is_exported(&self) -> bool {
        matches!(self, RunOutcome::Exported { .. })
    }
}

/// Run the pipeline for one configuration.
///
/// The exporter's timezone and source label are taken from the run, so the
/// metadata always matches the table.
pub fn run(
    config: &AppConfig,
    source: &dyn PriceSource,
    exporter: &Exporter,
) -> Result<RunOutcome, PipelineError> {
    let validated = config.validate()?;
    // Reject the format before spending a request on it.
    config.export_format.parse::<ExportFormat>()?;

    let zone = zones::resolve(&config.country_code);
    let period = &validated.period;
    info!(
        country = %config.country_code,
        zone = %zone,
        start = %period.start,
        end = %period.end,
        source = source.name(),
        "starting run"
    );

    let doc = match source.fetch(&zone, &period.start, &period.end)? {
        FetchOutcome::Document(doc) => doc,
        FetchOutcome::NoData { reason } => {
            warn!(reason = reason.as_deref().unwrap_or("none given"), "no data for requested window");
            return Ok(RunOutcome::NoData { reason });
        }
    };

    let (series, skipped_points) = match parse_document(&doc) {
        Ok(parsed) => {
            info!(
                points = parsed.report.points,
                skipped = parsed.report.skipped_points,
                "parsed document"
            );
            (parsed.series, parsed.report.skipped_points)
        }
        Err(e) => {
            warn!("{e}; continuing with an empty series");
            (PriceSeries::default(), 0)
        }
    };
    if series.is_empty() {
        warn!("document contained no price points");
        return Ok(RunOutcome::Empty);
    }

    let normalized = normalize(
        &series,
        validated.timezone,
        NormalizeOptions {
            to_kwh: config.normalize_to_kwh,
        },
    );
    if normalized.table.is_empty() {
        warn!(dropped = normalized.report.dropped, "every row was dropped during normalization");
        return Ok(RunOutcome::Empty);
    }

    let exporter = exporter
        .clone()
        .with_timezone(validated.timezone)
        .with_source(source.name());
    let metadata = exporter.save(&normalized.table, &zone, period, &config.export_format)?;

    let plots = if config.make_plots {
        match Plotter::new(exporter.output_dir()).render_all(&normalized.table, &zone) {
            Ok(paths) => paths,
            Err(e) => {
                warn!("{e}; data files were written, skipping plots");
                Vec::new()
            }
        }
    } else {
        Vec::new()
    };

    Ok(RunOutcome::Exported {
        metadata,
        plots,
        dropped_rows: normalized.report.dropped,
        skipped_points,
    })
}
