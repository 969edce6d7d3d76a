//! dayahead core: day-ahead electricity price retrieval and normalization.
//!
//! This crate holds everything but the command line:
//! - Zone registry and request period encoding
//! - Price source trait and the ENTSO-E HTTP client
//! - Namespace-aware XML parsing into an ordered price series
//! - Unit conversion and UTC/local timestamp columns
//! - CSV / Parquet export with a JSON metadata sidecar
//! - PNG line chart and hour-by-day heatmap
//! - Pipeline orchestration and availability diagnostics

pub mod config;
pub mod export;
pub mod fetch;
pub mod normalize;
pub mod parse;
pub mod period;
pub mod pipeline;
pub mod plot;
pub mod probe;
pub mod series;
pub mod zones;

pub use config::{AppConfig, ConfigError, ValidatedConfig};
pub use export::{ExportError, ExportFormat, ExportMetadata, Exporter};
pub use fetch::{EntsoeClient, FetchError, FetchOutcome, PriceSource, RawDocument};
pub use normalize::{normalize, NormalizeOptions, Normalized, PriceTable};
pub use parse::{parse, parse_or_empty, ParseError};
pub use period::{PeriodError, PeriodToken, RequestPeriod};
pub use pipeline::{run, PipelineError, RunOutcome};
pub use series::{PriceRecord, PriceSeries};
