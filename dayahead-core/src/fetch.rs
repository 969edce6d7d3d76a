//! Price source trait and the ENTSO-E transparency API client.
//!
//! The [`PriceSource`] trait abstracts the transport so the pipeline and the
//! probe can run against a canned source in tests. The HTTP client issues one
//! blocking request per call: no retry, no backoff.

use crate::period::PeriodToken;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Default transparency platform endpoint.
pub const DEFAULT_API_URL: &str = "https://web-api.tp.entsoe.eu/api";

/// Document type code for day-ahead prices.
pub const DAY_AHEAD_PRICES: &str = "A44";

const ACKNOWLEDGEMENT_ROOT: &[u8] = b"Acknowledgement_MarketDocument";
const BODY_PREFIX_CHARS: usize = 500;

/// Response body as received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDocument(Vec<u8>);

impl RawDocument {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for RawDocument {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<String> for RawDocument {
    fn from(text: String) -> Self {
        Self(text.into_bytes())
    }
}

impl From<&str> for RawDocument {
    fn from(text: &str) -> Self {
        Self(text.as_bytes().to_vec())
    }
}

/// What a successful request produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// A payload to hand to the parser.
    Document(RawDocument),
    /// The API acknowledged the request but has nothing for the window.
    NoData { reason: Option<String> },
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP {status}: {body_prefix}")]
    Transport { status: u16, body_prefix: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

impl FetchError {
    /// Status code for transport failures.
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Transport { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// A source of day-ahead price documents.
pub trait PriceSource {
    /// Human-readable name, recorded in export metadata.
    fn name(&self) -> &str;

    /// Request prices for `zone` over `[start, end)`.
    fn fetch(
        &self,
        zone: &str,
        start: &PeriodToken,
        end: &PeriodToken,
    ) -> Result<FetchOutcome, FetchError>;
}

/// Settings for [`EntsoeClient`].
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub api_url: String,
    pub token: String,
    pub timeout: Duration,
}

/// Blocking client for the transparency platform.
pub struct EntsoeClient {
    client: reqwest::blocking::Client,
    api_url: String,
    token: String,
}

impl EntsoeClient {
    pub fn new(settings: &ClientSettings) -> Result<Self, FetchError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| FetchError::Client(e.to_string()))?;

        Ok(Self {
            client,
            api_url: settings.api_url.clone(),
            token: settings.token.clone(),
        })
    }

    fn request(
        &self,
        zone: &str,
        start: &PeriodToken,
        end: &PeriodToken,
    ) -> reqwest::blocking::RequestBuilder {
        self.client.get(&self.api_url).query(&[
            ("securityToken", self.token.as_str()),
            ("documentType", DAY_AHEAD_PRICES),
            ("in_Domain", zone),
            ("out_Domain", zone),
            ("periodStart", start.as_str()),
            ("periodEnd", end.as_str()),
        ])
    }

    /// The URL [`PriceSource::fetch`] would request, with the token masked.
    pub fn request_url(
        &self,
        zone: &str,
        start: &PeriodToken,
        end: &PeriodToken,
    ) -> Result<String, FetchError> {
        let request = self
            .request(zone, start, end)
            .build()
            .map_err(|e| FetchError::Client(e.to_string()))?;
        let masked = request
            .url()
            .query_pairs()
            .map(|(k, v)| {
                let v = if k == "securityToken" { "***".into() } else { v };
                format!("{k}={v}")
            })
            .collect::<Vec<_>>()
            .join("&");
        Ok(format!("{}?{masked}", self.api_url))
    }
}

impl PriceSource for EntsoeClient {
    fn name(&self) -> &str {
        "ENTSO-E"
    }

    fn fetch(
        &self,
        zone: &str,
        start: &PeriodToken,
        end: &PeriodToken,
    ) -> Result<FetchOutcome, FetchError> {
        info!(zone, start = %start, end = %end, "requesting day-ahead prices");

        let resp = self
            .request(zone, start, end)
            .send()
            .map_err(|e| FetchError::Network(e.to_string()))?;

        let status = resp.status();
        let body = resp
            .bytes()
            .map_err(|e| FetchError::Network(format!("reading response body: {e}")))?;

        if !status.is_success() {
            return Err(FetchError::Transport {
                status: status.as_u16(),
                body_prefix: body_prefix(&body),
            });
        }

        debug!(bytes = body.len(), "received response");
        Ok(classify(RawDocument::from(body.to_vec())))
    }
}

/// Turn a successful body into a document or a no-data acknowledgement.
pub fn classify(doc: RawDocument) -> FetchOutcome {
    match acknowledgement_reason(doc.as_bytes()) {
        Some(reason) => FetchOutcome::NoData { reason },
        None => FetchOutcome::Document(doc),
    }
}

/// If the body is an acknowledgement document, return its reason text.
///
/// The outer `Option` says whether the root is an acknowledgement; the inner
/// one holds `Reason/text` when the document carries it. Bodies that are not
/// XML at all are not acknowledgements.
pub fn acknowledgement_reason(body: &[u8]) -> Option<Option<String>> {
    let mut reader = Reader::from_reader(body);
    let mut buf = Vec::new();
    let mut seen_root = false;
    let mut in_reason = false;
    let mut in_text = false;
    let mut reason: Option<String> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = e.local_name().as_ref().to_vec();
                if !seen_root {
                    if name != ACKNOWLEDGEMENT_ROOT {
                        return None;
                    }
                    seen_root = true;
                } else if name == b"Reason" {
                    in_reason = true;
                } else if in_reason && name == b"text" {
                    in_text = true;
                }
            }
            Ok(Event::Empty(e)) if !seen_root => {
                return (e.local_name().as_ref() == ACKNOWLEDGEMENT_ROOT).then_some(None);
            }
            Ok(Event::Text(t)) if in_text && reason.is_none() => {
                if let Ok(text) = t.unescape() {
                    let text = text.trim();
                    if !text.is_empty() {
                        reason = Some(text.to_string());
                    }
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"text" => in_text = false,
                b"Reason" => in_reason = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            // A broken tail does not change what the root said.
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    seen_root.then_some(reason)
}

fn body_prefix(body: &[u8]) -> String {
    String::from_utf8_lossy(body)
        .chars()
        .take(BODY_PREFIX_CHARS)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::sync::mpsc;

    const ACK: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Acknowledgement_MarketDocument xmlns="urn:iec62325.351:tc57wg16:451-1:acknowledgementdocument:7:0">
  <mRID>2d1c0d06-d1b8-4e7b</mRID>
  <Reason>
    <code>999</code>
    <text>No matching data found for Data item Day-ahead Prices [12.1.D]</text>
  </Reason>
</Acknowledgement_MarketDocument>"#;

    const PUBLICATION: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Publication_MarketDocument xmlns="urn:iec62325.351:tc57wg16:451-3:publicationdocument:7:3">
  <TimeSeries/>
</Publication_MarketDocument>"#;

    #[test]
    fn acknowledgement_yields_no_data_with_reason() {
        match classify(RawDocument::from(ACK)) {
            FetchOutcome::NoData { reason } => assert_eq!(
                reason.as_deref(),
                Some("No matching data found for Data item Day-ahead Prices [12.1.D]")
            ),
            other => panic!("expected NoData, got {other:?}"),
        }
    }

    #[test]
    fn publication_is_a_document() {
        assert!(matches!(
            classify(RawDocument::from(PUBLICATION)),
            FetchOutcome::Document(_)
        ));
    }

    #[test]
    fn non_xml_body_is_a_document() {
        assert!(matches!(
            classify(RawDocument::from("<html><body>oops")),
            FetchOutcome::Document(_)
        ));
        assert!(matches!(
            classify(RawDocument::from("plain text")),
            FetchOutcome::Document(_)
        ));
    }

    #[test]
    fn acknowledgement_without_reason() {
        let body = "<Acknowledgement_MarketDocument><mRID>1</mRID></Acknowledgement_MarketDocument>";
        assert_eq!(acknowledgement_reason(body.as_bytes()), Some(None));
    }

    /// Serve one canned HTTP response and hand back the request line.
    fn serve_once(status_line: &'static str, body: &'static str) -> (String, mpsc::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut request_line = String::new();
            reader.read_line(&mut request_line).unwrap();
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                if line == "\r\n" || line.is_empty() {
                    break;
                }
            }
            let response = format!(
                "HTTP/1.1 {status_line}\r\nContent-Type: text/xml\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(response.as_bytes()).unwrap();
            stream.flush().unwrap();
            tx.send(request_line).unwrap();
        });
        (format!("http://{addr}/api"), rx)
    }

    fn client(url: String) -> EntsoeClient {
        // Loopback requests must not be routed through an ambient proxy.
        EntsoeClient {
            client: reqwest::blocking::Client::builder()
                .timeout(Duration::from_secs(5))
                .no_proxy()
                .build()
                .unwrap(),
            api_url: url,
            token: "secret-token".into(),
        }
    }

    fn tokens() -> (PeriodToken, PeriodToken) {
        let period = crate::period::RequestPeriod::from_dates("2025-01-01", "2025-01-01").unwrap();
        (period.start, period.end)
    }

    #[test]
    fn request_carries_query_parameters() {
        let (url, rx) = serve_once("200 OK", PUBLICATION);
        let (start, end) = tokens();

        let outcome = client(url).fetch("10YCY-TSO------Q", &start, &end).unwrap();
        assert!(matches!(outcome, FetchOutcome::Document(_)));

        let request_line = rx.recv().unwrap();
        assert!(request_line.starts_with("GET /api?"));
        for expected in [
            "securityToken=secret-token",
            "documentType=A44",
            "in_Domain=10YCY-TSO------Q",
            "out_Domain=10YCY-TSO------Q",
            "periodStart=202501010000",
            "periodEnd=202501020000",
        ] {
            assert!(request_line.contains(expected), "missing {expected} in {request_line}");
        }
    }

    #[test]
    fn acknowledgement_over_http_is_no_data() {
        let (url, _rx) = serve_once("200 OK", ACK);
        let (start, end) = tokens();
        let outcome = client(url).fetch("10YCY-TSO------Q", &start, &end).unwrap();
        assert!(matches!(outcome, FetchOutcome::NoData { .. }));
    }

    #[test]
    fn error_status_is_transport_error() {
        let (url, _rx) = serve_once("401 Unauthorized", "<html>Unauthorized</html>");
        let (start, end) = tokens();
        let err = client(url).fetch("10YCY-TSO------Q", &start, &end).unwrap_err();
        match err {
            FetchError::Transport { status, body_prefix } => {
                assert_eq!(status, 401);
                assert_eq!(body_prefix, "<html>Unauthorized</html>");
            }
            other => panic!("expected transport error, got {other:?}"),
        }
    }

    #[test]
    fn request_url_masks_the_token() {
        let (start, end) = tokens();
        let url = client("http://127.0.0.1:9/api".into())
            .request_url("10YCY-TSO------Q", &start, &end)
            .unwrap();
        assert!(url.starts_with("http://127.0.0.1:9/api?securityToken=***&documentType=A44"));
        assert!(url.contains("periodStart=202501010000"));
        assert!(!url.contains("secret-token"));
    }

    #[test]
    fn body_prefix_is_bounded() {
        let long = "x".repeat(2000);
        assert_eq!(body_prefix(long.as_bytes()).len(), BODY_PREFIX_CHARS);
    }
}
