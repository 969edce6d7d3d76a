//! Table export with a JSON metadata sidecar.
//!
//! Layout under the output directory:
//! - `{zone}_prices.csv` or `{zone}_prices.parquet`
//! - `{zone}_metadata.json`
//!
//! The data file is written atomically (temp file, then rename). The format
//! is checked before anything touches the filesystem, so an unsupported
//! format leaves no trace.

use crate::normalize::{
    PriceTable, COL_PRICE_KWH, COL_PRICE_MWH, COL_TIMESTAMP, COL_TIMESTAMP_LOCAL,
    COL_TIMESTAMP_UTC,
};
use crate::period::RequestPeriod;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use tracing::info;

/// Source label recorded in metadata when none is given.
pub const DEFAULT_SOURCE: &str = "ENTSO-E";

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("unsupported export format '{0}' (expected csv or parquet)")]
    UnsupportedFormat(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(String),

    #[error("parquet error: {0}")]
    Parquet(String),

    #[error("metadata error: {0}")]
    Metadata(String),
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> ExportError + '_ {
    move |source| ExportError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Table file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Csv,
    Parquet,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Parquet => "parquet",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "parquet" => Ok(ExportFormat::Parquet),
            _ => Err(ExportError::UnsupportedFormat(s.to_string())),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// How an export was produced. Written once beside the data file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportMetadata {
    pub zone: String,
    pub source: String,
    pub retrieval_time: DateTime<Utc>,
    pub period: RequestPeriod,
    pub normalized_to_kwh: bool,
    pub timezone: String,
    pub columns: Vec<String>,
    pub record_count: usize,
    pub format: ExportFormat,
    pub data_file: String,
    /// BLAKE3 of the data file contents.
    pub data_hash: String,
}

/// Writes tables and sidecars into one output directory.
#[derive(Debug, Clone)]
pub struct Exporter {
    output_dir: PathBuf,
    source: String,
    timezone: Tz,
}

impl Exporter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            source: DEFAULT_SOURCE.to_string(),
            timezone: Tz::UTC,
        }
    }

    /// Fallback zone for tables without local timestamps.
    pub fn with_timezone(mut self, tz: Tz) -> Self {
        self.timezone = tz;
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// `{output_dir}/{zone}_prices.{ext}`
    pub fn data_path(&self, zone: &str, format: ExportFormat) -> PathBuf {
        self.output_dir
            .join(format!("{zone}_prices.{}", format.extension()))
    }

    /// `{output_dir}/{zone}_metadata.json`
    pub fn metadata_path(&self, zone: &str) -> PathBuf {
        self.output_dir.join(format!("{zone}_metadata.json"))
    }

    /// Zone of the table's local column, else the configured fallback.
    fn timezone_for(&self, table: &PriceTable) -> Tz {
        table
            .timestamp_local()
            .and_then(|col| col.first())
            .map(|dt| dt.timezone())
            .unwrap_or(self.timezone)
    }

    /// Write the table and its metadata sidecar.
    ///
    /// If the sidecar cannot be written the data file is removed again, so
    /// a data file never exists without its metadata.
    pub fn save(
        &self,
        table: &PriceTable,
        zone: &str,
        period: &RequestPeriod,
        format: &str,
    ) -> Result<ExportMetadata, ExportError> {
        let format: ExportFormat = format.parse()?;
        let tz = self.timezone_for(table);

        let bytes = match format {
            ExportFormat::Csv => encode_csv(table)?,
            ExportFormat::Parquet => encode_parquet(table, tz)?,
        };

        fs::create_dir_all(&self.output_dir).map_err(io_err(&self.output_dir))?;

        let data_path = self.data_path(zone, format);
        write_atomic(&data_path, &bytes)?;

        let meta = ExportMetadata {
            zone: zone.to_string(),
            source: self.source.clone(),
            retrieval_time: Utc::now(),
            period: period.clone(),
            normalized_to_kwh: table.price_eur_kwh().is_some(),
            timezone: tz.name().to_string(),
            columns: table.columns().iter().map(|c| c.to_string()).collect(),
            record_count: table.len(),
            format,
            data_file: data_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            data_hash: blake3::hash(&bytes).to_hex().to_string(),
        };

        let meta_path = self.metadata_path(zone);
        let written = serde_json::to_string_pretty(&meta)
            .map_err(|e| ExportError::Metadata(format!("serialize: {e}")))
            .and_then(|json| write_atomic(&meta_path, json.as_bytes()));
        if let Err(e) = written {
            let _ = fs::remove_file(&data_path);
            return Err(e);
        }

        info!(
            data = %data_path.display(),
            metadata = %meta_path.display(),
            rows = meta.record_count,
            "export written"
        );
        Ok(meta)
    }

    /// Read back a zone's metadata sidecar.
    pub fn load_metadata(&self, zone: &str) -> Result<ExportMetadata, ExportError> {
        let path = self.metadata_path(zone);
        let content = fs::read_to_string(&path).map_err(io_err(&path))?;
        serde_json::from_str(&content).map_err(|e| ExportError::Metadata(format!("parse: {e}")))
    }

    /// Re-read a CSV export, restoring the local column in the recorded zone.
    pub fn load_csv(&self, zone: &str) -> Result<(PriceTable, ExportMetadata), ExportError> {
        let meta = self.load_metadata(zone)?;
        let tz: Tz = meta
            .timezone
            .parse()
            .map_err(|_| ExportError::Metadata(format!("unknown timezone '{}'", meta.timezone)))?;
        let path = self.data_path(zone, ExportFormat::Csv);
        let content = fs::read(&path).map_err(io_err(&path))?;
        let table = decode_csv(&content, tz)?;
        Ok((table, meta))
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), ExportError> {
    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, bytes).map_err(io_err(&tmp_path))?;
    fs::rename(&tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        ExportError::Io {
            path: path.to_path_buf(),
            source: e,
        }
    })
}

// ── CSV ─────────────────────────────────────────────────────────────

fn encode_csv(table: &PriceTable) -> Result<Vec<u8>, ExportError> {
    let csv_err = |e: csv::Error| ExportError::Csv(e.to_string());
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(table.columns()).map_err(csv_err)?;

    for i in 0..table.len() {
        let mut row: Vec<String> = vec![table.timestamps()[i].clone()];
        if let Some(col) = table.price_eur_mwh() {
            row.push(col[i].to_string());
        }
        if let Some(col) = table.price_eur_kwh() {
            row.push(col[i].to_string());
        }
        if let Some(col) = table.timestamp_utc() {
            row.push(col[i].to_rfc3339());
        }
        if let Some(col) = table.timestamp_local() {
            row.push(col[i].to_rfc3339());
        }
        wtr.write_record(&row).map_err(csv_err)?;
    }

    wtr.into_inner()
        .map_err(|e| ExportError::Csv(format!("flush: {e}")))
}

/// Parse CSV export bytes. Unknown columns are ignored.
pub fn decode_csv(bytes: &[u8], tz: Tz) -> Result<PriceTable, ExportError> {
    let mut rdr = csv::Reader::from_reader(bytes);
    let headers = rdr
        .headers()
        .map_err(|e| ExportError::Csv(e.to_string()))?
        .clone();
    let index = |name: &str| headers.iter().position(|h| h == name);

    let ts_idx = index(COL_TIMESTAMP)
        .ok_or_else(|| ExportError::Csv(format!("missing '{COL_TIMESTAMP}' column")))?;
    let mwh_idx = index(COL_PRICE_MWH);
    let kwh_idx = index(COL_PRICE_KWH);
    let utc_idx = index(COL_TIMESTAMP_UTC);
    let local_idx = index(COL_TIMESTAMP_LOCAL);

    let mut timestamps = Vec::new();
    let mut mwh = mwh_idx.map(|_| Vec::new());
    let mut kwh = kwh_idx.map(|_| Vec::new());
    let mut utc = utc_idx.map(|_| Vec::new());
    let mut local = local_idx.map(|_| Vec::new());

    for (row_no, record) in rdr.records().enumerate() {
        let record = record.map_err(|e| ExportError::Csv(e.to_string()))?;
        let field = |idx: usize| record.get(idx).unwrap_or("");
        let number = |idx: usize| {
            field(idx)
                .parse::<f64>()
                .map_err(|e| ExportError::Csv(format!("row {row_no}: {e}")))
        };
        let instant = |idx: usize| {
            DateTime::parse_from_rfc3339(field(idx))
                .map_err(|e| ExportError::Csv(format!("row {row_no}: {e}")))
        };

        timestamps.push(field(ts_idx).to_string());
        if let (Some(col), Some(idx)) = (mwh.as_mut(), mwh_idx) {
            col.push(number(idx)?);
        }
        if let (Some(col), Some(idx)) = (kwh.as_mut(), kwh_idx) {
            col.push(number(idx)?);
        }
        if let (Some(col), Some(idx)) = (utc.as_mut(), utc_idx) {
            col.push(instant(idx)?.with_timezone(&Utc));
        }
        if let (Some(col), Some(idx)) = (local.as_mut(), local_idx) {
            col.push(instant(idx)?.with_timezone(&tz));
        }
    }

    PriceTable::from_columns(timestamps, mwh, kwh, utc, local)
        .map_err(|e| ExportError::Csv(e.to_string()))
}

// ── Parquet ─────────────────────────────────────────────────────────

fn table_to_dataframe(table: &PriceTable, tz: Tz) -> Result<DataFrame, ExportError> {
    let datetime = |name: &str, millis: Vec<i64>, zone: &str| {
        Column::new(name.into(), millis)
            .cast(&DataType::Datetime(TimeUnit::Milliseconds, Some(zone.into())))
            .map_err(|e| ExportError::Parquet(format!("{name} cast: {e}")))
    };

    let mut columns = vec![Column::new(
        COL_TIMESTAMP.into(),
        table.timestamps().to_vec(),
    )];
    if let Some(col) = table.price_eur_mwh() {
        columns.push(Column::new(COL_PRICE_MWH.into(), col.to_vec()));
    }
    if let Some(col) = table.price_eur_kwh() {
        columns.push(Column::new(COL_PRICE_KWH.into(), col.to_vec()));
    }
    if let Some(col) = table.timestamp_utc() {
        let millis = col.iter().map(|t| t.timestamp_millis()).collect();
        columns.push(datetime(COL_TIMESTAMP_UTC, millis, "UTC")?);
    }
    if let Some(col) = table.timestamp_local() {
        let millis = col.iter().map(|t| t.timestamp_millis()).collect();
        columns.push(datetime(COL_TIMESTAMP_LOCAL, millis, tz.name())?);
    }

    DataFrame::new(columns).map_err(|e| ExportError::Parquet(format!("dataframe creation: {e}")))
}

fn encode_parquet(table: &PriceTable, tz: Tz) -> Result<Vec<u8>, ExportError> {
    let mut df = table_to_dataframe(table, tz)?;
    let mut buf = Vec::new();
    ParquetWriter::new(&mut buf)
        .finish(&mut df)
        .map_err(|e| ExportError::Parquet(format!("write parquet: {e}")))?;
    Ok(buf)
}
