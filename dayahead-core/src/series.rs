//! Price records and timestamp parsing shared by the parser and normalizer.

use chrono::{DateTime, FixedOffset, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// One hourly price, in EUR/MWh.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceRecord {
    pub timestamp: DateTime<FixedOffset>,
    pub price: f64,
}

/// Prices in document order. Empty when the window had no data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceSeries {
    pub records: Vec<PriceRecord>,
}

impl PriceSeries {
    pub fn new(records: Vec<PriceRecord>) -> Self {
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PriceRecord> {
        self.records.iter()
    }
}

/// A timestamp as found in source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParsedInstant {
    /// Carried an explicit offset.
    Zoned(DateTime<FixedOffset>),
    /// No offset; the caller decides which zone it belongs to.
    Naive(NaiveDateTime),
}

const ZONED_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M%:z",
    "%Y-%m-%d %H:%M:%S%:z",
    "%Y-%m-%d %H:%M%:z",
];

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Parse an ISO-8601 style timestamp.
///
/// A trailing `Z` is read as `+00:00`. Minute precision is accepted since
/// the price documents omit seconds.
pub fn parse_instant(raw: &str) -> Option<ParsedInstant> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let text = match trimmed.strip_suffix('Z').or_else(|| trimmed.strip_suffix('z')) {
        Some(head) => format!("{head}+00:00"),
        None => trimmed.to_string(),
    };

    if let Ok(dt) = DateTime::parse_from_rfc3339(&text) {
        return Some(ParsedInstant::Zoned(dt));
    }
    for fmt in ZONED_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(&text, fmt) {
            return Some(ParsedInstant::Zoned(dt));
        }
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(&text, fmt) {
            return Some(ParsedInstant::Naive(dt));
        }
    }
    None
}

/// Parse a timestamp that must carry an offset (or `Z`).
pub fn parse_zoned(raw: &str) -> Option<DateTime<FixedOffset>> {
    match parse_instant(raw)? {
        ParsedInstant::Zoned(dt) => Some(dt),
        ParsedInstant::Naive(_) => None,
    }
}
