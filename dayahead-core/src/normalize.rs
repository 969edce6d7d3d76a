//! Unit conversion and timezone alignment.
//!
//! [`PriceTable`] is columnar: a raw `timestamp` text column plus optional
//! derived columns. All present columns always have the same length. Each
//! step takes the table by value and hands back a new one, so the steps can
//! be run alone or chained through [`normalize`].

use crate::series::{parse_instant, ParsedInstant, PriceSeries};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tracing::{debug, warn};

pub const COL_TIMESTAMP: &str = "timestamp";
pub const COL_PRICE_MWH: &str = "price_EUR_MWh";
pub const COL_PRICE_KWH: &str = "price_EUR_kWh";
pub const COL_TIMESTAMP_UTC: &str = "timestamp_utc";
pub const COL_TIMESTAMP_LOCAL: &str = "timestamp_local";

const MWH_PER_KWH: f64 = 1000.0;

/// Column lengths disagree.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("column '{column}' has {actual} rows, expected {expected}")]
pub struct ColumnLengthMismatch {
    pub column: &'static str,
    pub expected: usize,
    pub actual: usize,
}

/// Price table with optional derived columns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PriceTable {
    timestamp: Vec<String>,
    price_eur_mwh: Option<Vec<f64>>,
    price_eur_kwh: Option<Vec<f64>>,
    timestamp_utc: Option<Vec<DateTime<Utc>>>,
    timestamp_local: Option<Vec<DateTime<Tz>>>,
}

impl PriceTable {
    /// Build the raw table from a parsed series.
    pub fn from_series(series: &PriceSeries) -> Self {
        Self {
            timestamp: series.iter().map(|r| r.timestamp.to_rfc3339()).collect(),
            price_eur_mwh: Some(series.iter().map(|r| r.price).collect()),
            ..Self::default()
        }
    }

    /// Assemble a table from individual columns, checking their lengths.
    pub fn from_columns(
        timestamp: Vec<String>,
        price_eur_mwh: Option<Vec<f64>>,
        price_eur_kwh: Option<Vec<f64>>,
        timestamp_utc: Option<Vec<DateTime<Utc>>>,
        timestamp_local: Option<Vec<DateTime<Tz>>>,
    ) -> Result<Self, ColumnLengthMismatch> {
        let expected = timestamp.len();
        let check = |column: &'static str, actual: Option<usize>| match actual {
            Some(actual) if actual != expected => Err(ColumnLengthMismatch {
                column,
                expected,
                actual,
            }),
            _ => Ok(()),
        };
        check(COL_PRICE_MWH, price_eur_mwh.as_ref().map(Vec::len))?;
        check(COL_PRICE_KWH, price_eur_kwh.as_ref().map(Vec::len))?;
        check(COL_TIMESTAMP_UTC, timestamp_utc.as_ref().map(Vec::len))?;
        check(COL_TIMESTAMP_LOCAL, timestamp_local.as_ref().map(Vec::len))?;

        Ok(Self {
            timestamp,
            price_eur_mwh,
            price_eur_kwh,
            timestamp_utc,
            timestamp_local,
        })
    }

    pub fn len(&self) -> usize {
        self.timestamp.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamp.is_empty()
    }

    pub fn timestamps(&self) -> &[String] {
        &self.timestamp
    }

    pub fn price_eur_mwh(&self) -> Option<&[f64]> {
        self.price_eur_mwh.as_deref()
    }

    pub fn price_eur_kwh(&self) -> Option<&[f64]> {
        self.price_eur_kwh.as_deref()
    }

    pub fn timestamp_utc(&self) -> Option<&[DateTime<Utc>]> {
        self.timestamp_utc.as_deref()
    }

    pub fn timestamp_local(&self) -> Option<&[DateTime<Tz>]> {
        self.timestamp_local.as_deref()
    }

    /// Names of the present columns, in export order.
    pub fn columns(&self) -> Vec<&'static str> {
        let mut cols = vec![COL_TIMESTAMP];
        if self.price_eur_mwh.is_some() {
            cols.push(COL_PRICE_MWH);
        }
        if self.price_eur_kwh.is_some() {
            cols.push(COL_PRICE_KWH);
        }
        if self.timestamp_utc.is_some() {
            cols.push(COL_TIMESTAMP_UTC);
        }
        if self.timestamp_local.is_some() {
            cols.push(COL_TIMESTAMP_LOCAL);
        }
        cols
    }

    /// Keep only rows whose flag is set, across every column.
    fn retain_rows(&mut self, keep: &[bool]) {
        fn filter<T>(col: &mut Vec<T>, keep: &[bool]) {
            let mut flags = keep.iter();
            col.retain(|_| *flags.next().unwrap_or(&false));
        }
        filter(&mut self.timestamp, keep);
        if let Some(col) = self.price_eur_mwh.as_mut() {
            filter(col, keep);
        }
        if let Some(col) = self.price_eur_kwh.as_mut() {
            filter(col, keep);
        }
        if let Some(col) = self.timestamp_utc.as_mut() {
            filter(col, keep);
        }
        if let Some(col) = self.timestamp_local.as_mut() {
            filter(col, keep);
        }
    }
}

/// Options for [`normalize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NormalizeOptions {
    /// Add the EUR/kWh column.
    pub to_kwh: bool,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self { to_kwh: true }
    }
}

/// Rows removed by [`align_timezones`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AlignReport {
    /// Rows whose raw timestamp could not be parsed.
    pub dropped: usize,
}

/// A normalized table and what normalization did to it.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub table: PriceTable,
    pub report: AlignReport,
}

/// Run the normalization steps over a parsed series.
pub fn normalize(series: &PriceSeries, tz: Tz, opts: NormalizeOptions) -> Normalized {
    let mut table = PriceTable::from_series(series);
    if opts.to_kwh {
        table = to_kilowatt_hours(table);
    }
    let (table, report) = align_timezones(table, tz);
    debug!(rows = table.len(), dropped = report.dropped, tz = tz.name(), "normalized table");
    Normalized { table, report }
}

/// Add `price_EUR_kWh = price_EUR_MWh / 1000`.
///
/// Tables without an EUR/MWh column come back unchanged.
pub fn to_kilowatt_hours(mut table: PriceTable) -> PriceTable {
    if let Some(mwh) = table.price_eur_mwh.as_ref() {
        table.price_eur_kwh = Some(mwh.iter().map(|p| p / MWH_PER_KWH).collect());
    }
    table
}

/// Derive `timestamp_utc` and `timestamp_local` from the raw column.
///
/// Naive timestamps are taken to be UTC; offset-carrying ones are converted.
/// Rows with an unparsable timestamp are dropped from every column and
/// counted. A table that already has `timestamp_utc` is returned as is.
pub fn align_timezones(mut table: PriceTable, tz: Tz) -> (PriceTable, AlignReport) {
    if table.timestamp_utc.is_some() {
        return (table, AlignReport::default());
    }

    let parsed: Vec<Option<DateTime<Utc>>> = table
        .timestamp
        .iter()
        .map(|raw| match parse_instant(raw)? {
            ParsedInstant::Zoned(dt) => Some(dt.with_timezone(&Utc)),
            ParsedInstant::Naive(naive) => Some(naive.and_utc()),
        })
        .collect();

    let keep: Vec<bool> = parsed.iter().map(Option::is_some).collect();
    let dropped = keep.iter().filter(|k| !**k).count();
    if dropped > 0 {
        warn!(dropped, "dropping rows with unparsable timestamps");
        table.retain_rows(&keep);
    }

    let utc: Vec<DateTime<Utc>> = parsed.into_iter().flatten().collect();
    let local = utc.iter().map(|dt| dt.with_timezone(&tz)).collect();
    table.timestamp_utc = Some(utc);
    table.timestamp_local = Some(local);

    (table, AlignReport { dropped })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::PriceRecord;
    use chrono::{TimeZone, Timelike};

    fn series(prices: &[f64]) -> PriceSeries {
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap().fixed_offset();
        PriceSeries::new(
            prices
                .iter()
                .enumerate()
                .map(|(i, p)| PriceRecord {
                    timestamp: start + chrono::Duration::hours(i as i64),
                    price: *p,
                })
                .collect(),
        )
    }

    fn raw_table(timestamps: &[&str], prices: &[f64]) -> PriceTable {
        PriceTable::from_columns(
            timestamps.iter().map(|s| s.to_string()).collect(),
            Some(prices.to_vec()),
            None,
            None,
            None,
        )
        .unwrap()
    }

    #[test]
    fn hundred_per_mwh_is_a_tenth_per_kwh() {
        let table = to_kilowatt_hours(PriceTable::from_series(&series(&[100.0])));
        assert_eq!(table.price_eur_kwh().unwrap(), &[0.1]);
    }

    #[test]
    fn kwh_step_without_source_column_is_noop() {
        let table = PriceTable::from_columns(vec!["2025-01-01T00:00Z".into()], None, None, None, None)
            .unwrap();
        let out = to_kilowatt_hours(table.clone());
        assert_eq!(out, table);
        assert_eq!(out.price_eur_kwh(), None);
    }

    #[test]
    fn align_converts_to_utc_and_local() {
        let table = raw_table(&["2025-01-01T00:00:00+00:00", "2025-07-01T12:00:00+02:00"], &[1.0, 2.0]);
        let (out, report) = align_timezones(table, chrono_tz::Europe::Nicosia);

        assert_eq!(report.dropped, 0);
        let utc = out.timestamp_utc().unwrap();
        assert_eq!(utc[0], Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());
        assert_eq!(utc[1], Utc.with_ymd_and_hms(2025, 7, 1, 10, 0, 0).unwrap());

        let local = out.timestamp_local().unwrap();
        // Same instants, local wall clock: UTC+2 in winter, UTC+3 in summer.
        assert_eq!(local[0], utc[0]);
        assert_eq!(local[0].hour(), 2);
        assert_eq!(local[1].hour(), 13);
    }

    #[test]
    fn naive_timestamps_are_localized_as_utc() {
        let table = raw_table(&["2025-01-01 05:00:00"], &[1.0]);
        let (out, _) = align_timezones(table, chrono_tz::Europe::Berlin);
        assert_eq!(
            out.timestamp_utc().unwrap()[0],
            Utc.with_ymd_and_hms(2025, 1, 1, 5, 0, 0).unwrap()
        );
        assert_eq!(out.timestamp_local().unwrap()[0].hour(), 6);
    }

    #[test]
    fn unparsable_rows_are_dropped_and_counted() {
        let table = to_kilowatt_hours(raw_table(
            &["2025-01-01T00:00Z", "garbage", "2025-01-01T02:00Z", ""],
            &[10.0, 20.0, 30.0, 40.0],
        ));
        let (out, report) = align_timezones(table, chrono_tz::UTC);

        assert_eq!(report.dropped, 2);
        assert_eq!(out.len(), 2);
        assert_eq!(out.price_eur_mwh().unwrap(), &[10.0, 30.0]);
        assert_eq!(out.price_eur_kwh().unwrap(), &[0.01, 0.03]);
        assert_eq!(out.timestamp_utc().unwrap().len(), 2);
        assert_eq!(out.timestamp_local().unwrap().len(), 2);
        assert_eq!(out.timestamps(), &["2025-01-01T00:00Z", "2025-01-01T02:00Z"]);
    }

    #[test]
    fn align_is_idempotent() {
        let (once, _) = align_timezones(raw_table(&["2025-03-30T00:00Z", "bad"], &[1.0, 2.0]), chrono_tz::Europe::Berlin);
        let (twice, report) = align_timezones(once.clone(), chrono_tz::Europe::Berlin);
        assert_eq!(twice, once);
        assert_eq!(report.dropped, 0);
    }

    #[test]
    fn normalize_preserves_row_order() {
        let mut s = series(&[3.0, 1.0, 2.0]);
        s.records.swap(0, 2);
        let out = normalize(&s, chrono_tz::UTC, NormalizeOptions::default());
        assert_eq!(out.table.price_eur_mwh().unwrap(), &[2.0, 1.0, 3.0]);
        let utc = out.table.timestamp_utc().unwrap();
        assert!(utc[0] > utc[2]);
    }

    #[test]
    fn normalize_without_kwh_option() {
        let out = normalize(&series(&[50.0]), chrono_tz::UTC, NormalizeOptions { to_kwh: false });
        assert_eq!(out.table.price_eur_kwh(), None);
        assert_eq!(
            out.table.columns(),
            vec![COL_TIMESTAMP, COL_PRICE_MWH, COL_TIMESTAMP_UTC, COL_TIMESTAMP_LOCAL]
        );
    }

    #[test]
    fn from_columns_rejects_ragged_input() {
        let err = PriceTable::from_columns(vec!["a".into(), "b".into()], Some(vec![1.0]), None, None, None)
            .unwrap_err();
        assert_eq!(err.column, COL_PRICE_MWH);
        assert_eq!(err.expected, 2);
        assert_eq!(err.actual, 1);
    }

    #[test]
    fn empty_series_normalizes_to_empty_table() {
        let out = normalize(&PriceSeries::default(), chrono_tz::UTC, NormalizeOptions::default());
        assert!(out.table.is_empty());
        assert_eq!(out.report.dropped, 0);
        assert_eq!(out.table.columns().len(), 5);
    }
}
