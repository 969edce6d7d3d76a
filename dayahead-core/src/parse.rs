//! Publication document parser.
//!
//! Walks the XML once with a namespace-resolving reader. The namespace bound
//! to the root element is taken as the document namespace and every lookup
//! below the root is scoped to it, so a versioned namespace URI needs no code
//! change. Points are emitted in document order (series, period, point) with
//! timestamps rebuilt as `period_start + (position - 1) hours`.
//!
//! A point missing its position or price, or sitting in a period whose start
//! could not be read, is skipped and counted rather than failing the whole
//! document. Only a structurally broken document is a [`ParseError`].

use crate::fetch::RawDocument;
use crate::series::{parse_zoned, PriceRecord, PriceSeries};
use chrono::{DateTime, Duration, FixedOffset};
use quick_xml::events::Event;
use quick_xml::name::{Namespace, ResolveResult};
use quick_xml::reader::NsReader;
use thiserror::Error;
use tracing::{debug, warn};

const HOURLY_RESOLUTION: &str = "PT60M";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("malformed XML document: {0}")]
    Malformed(String),
}

/// Counters gathered while walking a document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParseReport {
    pub time_series: usize,
    pub periods: usize,
    pub points: usize,
    /// Points dropped for a missing or unreadable start, position or price.
    pub skipped_points: usize,
    /// Periods whose declared resolution was not hourly.
    pub non_hourly_periods: usize,
}

/// Parser output with provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedDocument {
    /// Local name of the root element.
    pub root: String,
    /// Namespace URI bound to the root element, if any.
    pub namespace: Option<String>,
    pub series: PriceSeries,
    pub report: ParseReport,
}

/// Parse a document into a price series.
pub fn parse(doc: &RawDocument) -> Result<PriceSeries, ParseError> {
    parse_document(doc).map(|parsed| parsed.series)
}

/// Parse a document, degrading a malformed one to an empty series.
pub fn parse_or_empty(doc: &RawDocument) -> PriceSeries {
    match parse(doc) {
        Ok(series) => series,
        Err(e) => {
            warn!("{e}; continuing with an empty series");
            PriceSeries::default()
        }
    }
}

/// Parse a document and keep the walk's counters.
pub fn parse_document(doc: &RawDocument) -> Result<ParsedDocument, ParseError> {
    let mut reader = NsReader::from_reader(doc.as_bytes());
    let mut buf = Vec::new();

    // Outer None: root not reached yet. Inner None: root has no namespace.
    let mut root_ns: Option<Option<Vec<u8>>> = None;
    let mut root_name = String::new();
    let mut path: Vec<Option<String>> = Vec::new();
    let mut walk = Walk::default();

    loop {
        let (resolved, event) = match reader.read_resolved_event_into(&mut buf) {
            Ok(pair) => pair,
            Err(e) => return Err(ParseError::Malformed(e.to_string())),
        };
        let ns = match resolved {
            ResolveResult::Bound(Namespace(uri)) => Some(uri.to_vec()),
            _ => None,
        };

        match event {
            Event::Start(e) => {
                let local = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                let doc_ns = root_ns.get_or_insert_with(|| {
                    root_name = local.clone();
                    ns.clone()
                });
                path.push((*doc_ns == ns).then_some(local));
                walk.open(&path);
            }
            Event::Empty(e) => {
                let local = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                let doc_ns = root_ns.get_or_insert_with(|| {
                    root_name = local.clone();
                    ns.clone()
                });
                path.push((*doc_ns == ns).then_some(local));
                walk.open(&path);
                walk.close(&path);
                path.pop();
            }
            Event::End(_) => {
                walk.close(&path);
                path.pop();
            }
            Event::Text(t) => {
                let text = t
                    .unescape()
                    .map_err(|e| ParseError::Malformed(e.to_string()))?;
                walk.text(&path, &text);
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    let Some(doc_ns) = root_ns else {
        return Err(ParseError::Malformed("document has no root element".into()));
    };
    if !path.is_empty() {
        return Err(ParseError::Malformed(format!(
            "unexpected end of document inside <{root_name}>"
        )));
    }

    let namespace = doc_ns.map(|uri| String::from_utf8_lossy(&uri).into_owned());
    debug!(
        root = %root_name,
        namespace = namespace.as_deref().unwrap_or(""),
        points = walk.report.points,
        skipped = walk.report.skipped_points,
        "parsed document"
    );

    Ok(ParsedDocument {
        root: root_name,
        namespace,
        series: PriceSeries::new(walk.records),
        report: walk.report,
    })
}

#[derive(Default)]
struct PointDraft {
    position: String,
    price: String,
}

#[derive(Default)]
struct Walk {
    period_start: Option<DateTime<FixedOffset>>,
    start_text: String,
    resolution: String,
    point: PointDraft,
    records: Vec<PriceRecord>,
    report: ParseReport,
}

/// True when the in-namespace element path ends with `suffix`.
fn at(path: &[Option<String>], suffix: &[&str]) -> bool {
    path.len() >= suffix.len()
        && path[path.len() - suffix.len()..]
            .iter()
            .zip(suffix)
            .all(|(seg, want)| seg.as_deref() == Some(*want))
}

impl Walk {
    fn open(&mut self, path: &[Option<String>]) {
        if at(path, &["TimeSeries"]) {
            self.report.time_series += 1;
        } else if at(path, &["TimeSeries", "Period"]) {
            self.report.periods += 1;
            self.period_start = None;
            self.start_text.clear();
            self.resolution.clear();
        } else if at(path, &["TimeSeries", "Period", "Point"]) {
            self.point = PointDraft::default();
        }
    }

    fn text(&mut self, path: &[Option<String>], text: &str) {
        if at(path, &["TimeSeries", "Period", "timeInterval", "start"]) {
            self.start_text.push_str(text);
        } else if at(path, &["TimeSeries", "Period", "resolution"]) {
            self.resolution.push_str(text);
        } else if at(path, &["TimeSeries", "Period", "Point", "position"]) {
            self.point.position.push_str(text);
        } else if at(path, &["TimeSeries", "Period", "Point", "price.amount"]) {
            self.point.price.push_str(text);
        }
    }

    fn close(&mut self, path: &[Option<String>]) {
        if at(path, &["TimeSeries", "Period", "timeInterval", "start"]) {
            self.period_start = parse_zoned(&self.start_text);
            if self.period_start.is_none() {
                warn!(start = %self.start_text.trim(), "unreadable period start");
            }
        } else if at(path, &["TimeSeries", "Period", "Point"]) {
            let draft = std::mem::take(&mut self.point);
            match self.finish_point(&draft) {
                Some(record) => {
                    self.records.push(record);
                    self.report.points += 1;
                }
                None => {
                    debug!(
                        position = %draft.position.trim(),
                        price = %draft.price.trim(),
                        "skipping incomplete point"
                    );
                    self.report.skipped_points += 1;
                }
            }
        } else if at(path, &["TimeSeries", "Period"]) {
            let resolution = self.resolution.trim();
            if !resolution.is_empty() && resolution != HOURLY_RESOLUTION {
                warn!(resolution, "period is not hourly; positions are still read as hours");
                self.report.non_hourly_periods += 1;
            }
        }
    }

    fn finish_point(&self, draft: &PointDraft) -> Option<PriceRecord> {
        let start = self.period_start?;
        let position: i64 = draft.position.trim().parse().ok()?;
        let price: f64 = draft.price.trim().parse().ok()?;
        let offset = Duration::try_hours(position.checked_sub(1)?)?;
        let timestamp = start.checked_add_signed(offset)?;
        Some(PriceRecord { timestamp, price })
    }
}
