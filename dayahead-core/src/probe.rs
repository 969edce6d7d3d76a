//! Availability diagnostics.
//!
//! Helps answer "why is my export empty?": is the token accepted, which
//! zones publish at all, and what is the most recent day that has data.

use crate::config::AppConfig;
use crate::fetch::{FetchError, FetchOutcome, PriceSource};
use crate::period::RequestPeriod;
use crate::zones;
use chrono::{Days, NaiveDate};
use serde::Serialize;
use tracing::{debug, warn};

/// Zone used for the credential check; it publishes reliably.
pub const CREDENTIAL_CHECK_COUNTRY: &str = "FR";

/// Days back from today tried by [`find_latest_available`], nearest first.
pub const SEARCH_OFFSETS: [u64; 9] = [0, 1, 2, 3, 7, 14, 30, 60, 90];

const RECOMMENDED_LOOKBACK_DAYS: u64 = 3;

/// Characters of body kept by [`inspect`].
pub const PREVIEW_CHARS: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialStatus {
    Valid,
    /// HTTP 401.
    Rejected,
    Unexpected(u16),
}

/// Whether a single-day request returned prices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    Data,
    NoData,
    Failed(String),
}

impl Availability {
    pub fn has_data(&self) -> bool {
        matches!(self, Availability::Data)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ZoneAvailability {
    pub country: String,
    pub zone: String,
    pub availability: Availability,
}

fn one_day(source: &dyn PriceSource, zone: &str, day: NaiveDate) -> Result<FetchOutcome, FetchError> {
    let period = RequestPeriod::for_days(day, day);
    source.fetch(zone, &period.start, &period.end)
}

fn availability(source: &dyn PriceSource, zone: &str, day: NaiveDate) -> Availability {
    match one_day(source, zone, day) {
        Ok(FetchOutcome::Document(_)) => Availability::Data,
        Ok(FetchOutcome::NoData { .. }) => Availability::NoData,
        Err(e) => Availability::Failed(e.to_string()),
    }
}

/// Ask for one day of `zone` and classify the answer by status.
///
/// Any successful response counts as valid, even an acknowledgement.
/// Network failures are returned as errors since they say nothing about
/// the token.
pub fn check_credential(
    source: &dyn PriceSource,
    zone: &str,
    day: NaiveDate,
) -> Result<CredentialStatus, FetchError> {
    match one_day(source, zone, day) {
        Ok(_) => Ok(CredentialStatus::Valid),
        Err(FetchError::Transport { status: 401, .. }) => Ok(CredentialStatus::Rejected),
        Err(FetchError::Transport { status, .. }) => Ok(CredentialStatus::Unexpected(status)),
        Err(e) => Err(e),
    }
}

/// Check every registry zone for data on `day`.
pub fn scan_zones(source: &dyn PriceSource, day: NaiveDate) -> Vec<ZoneAvailability> {
    zones::entries()
        .iter()
        .map(|(country, zone)| {
            let availability = availability(source, zone, day);
            debug!(country, zone, ?availability, "zone scanned");
            ZoneAvailability {
                country: country.to_string(),
                zone: zone.to_string(),
                availability,
            }
        })
        .collect()
}

/// Most recent day with data, trying [`SEARCH_OFFSETS`] back from `today`.
pub fn find_latest_available(
    source: &dyn PriceSource,
    zone: &str,
    today: NaiveDate,
) -> Option<NaiveDate> {
    SEARCH_OFFSETS.iter().find_map(|offset| {
        let day = today.checked_sub_days(Days::new(*offset))?;
        match availability(source, zone, day) {
            Availability::Data => Some(day),
            Availability::NoData => None,
            Availability::Failed(e) => {
                warn!(zone, %day, "{e}");
                None
            }
        }
    })
}

/// What one day's response looked like.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseSample {
    Document {
        /// Body size in bytes.
        size: usize,
        /// First [`PREVIEW_CHARS`] characters of the body.
        preview: String,
    },
    NoData { reason: Option<String> },
}

/// Fetch one day of `zone` and keep a bounded look at the answer.
pub fn inspect(
    source: &dyn PriceSource,
    zone: &str,
    day: NaiveDate,
) -> Result<ResponseSample, FetchError> {
    Ok(match one_day(source, zone, day)? {
        FetchOutcome::Document(doc) => ResponseSample::Document {
            size: doc.len(),
            preview: String::from_utf8_lossy(doc.as_bytes())
                .chars()
                .take(PREVIEW_CHARS)
                .collect(),
        },
        FetchOutcome::NoData { reason } => ResponseSample::NoData { reason },
    })
}

/// A configuration that requests the few days ending at `found`.
pub fn recommend_config(base: &AppConfig, country: &str, found: NaiveDate) -> AppConfig {
    let start = found
        .checked_sub_days(Days::new(RECOMMENDED_LOOKBACK_DAYS))
        .unwrap_or(found);
    AppConfig {
        country_code: country.to_string(),
        start_date: start.format("%Y-%m-%d").to_string(),
        end_date: found.format("%Y-%m-%d").to_string(),
        make_plots: true,
        ..base.clone()
    }
}
