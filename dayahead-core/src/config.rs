//! Run configuration.
//!
//! One [`AppConfig`] is built at startup (file, then environment, then CLI
//! flags) and passed by reference to every stage. [`AppConfig::validate`]
//! turns it into a [`ValidatedConfig`] carrying the parsed pieces the
//! pipeline needs.

use crate::fetch::{ClientSettings, DEFAULT_API_URL};
use crate::period::{PeriodError, RequestPeriod};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable consulted when the file carries no token.
pub const TOKEN_ENV_VAR: &str = "ENTSOE_API_KEY";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no API token configured (set api_token or {TOKEN_ENV_VAR})")]
    MissingCredential,

    #[error("unknown timezone '{0}'")]
    InvalidTimezone(String),

    #[error(transparent)]
    InvalidDate(#[from] PeriodError),

    #[error("read config file {path}: {reason}")]
    Read { path: PathBuf, reason: String },

    #[error("parse config: {0}")]
    Parse(String),
}

/// Configuration as loaded from file and flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    #[serde(alias = "ENTSOE_API_KEY")]
    pub api_token: String,
    pub country_code: String,
    pub start_date: String,
    pub end_date: String,
    pub normalize_to_kwh: bool,
    pub export_format: String,
    pub timezone: String,
    pub make_plots: bool,
    pub output_dir: PathBuf,
    pub api_url: String,
    pub request_timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_token: String::new(),
            country_code: "CY".into(),
            start_date: String::new(),
            end_date: String::new(),
            normalize_to_kwh: true,
            export_format: "csv".into(),
            timezone: "Europe/Nicosia".into(),
            make_plots: false,
            output_dir: PathBuf::from("data"),
            api_url: DEFAULT_API_URL.into(),
            request_timeout_secs: 30,
        }
    }
}

impl AppConfig {
    /// Load from a `.json` or `.toml` file (JSON for any other extension).
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => Self::from_toml(&content),
            _ => Self::from_json(&content),
        }
    }

    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(content).map_err(|e| ConfigError::Parse(format!("JSON: {e}")))
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(format!("TOML: {e}")))
    }

    /// Fill an empty token from `token` (typically the environment).
    pub fn with_token_override(mut self, token: Option<String>) -> Self {
        if self.api_token.trim().is_empty() {
            if let Some(token) = token.filter(|t| !t.trim().is_empty()) {
                self.api_token = token;
            }
        }
        self
    }

    /// HTTP client settings, for callers that need only the credential.
    pub fn client_settings(&self) -> Result<ClientSettings, ConfigError> {
        if self.api_token.trim().is_empty() {
            return Err(ConfigError::MissingCredential);
        }
        Ok(self.settings())
    }

    fn settings(&self) -> ClientSettings {
        ClientSettings {
            api_url: self.api_url.clone(),
            token: self.api_token.clone(),
            timeout: Duration::from_secs(self.request_timeout_secs),
        }
    }

    /// Check the credential, timezone and dates.
    pub fn validate(&self) -> Result<ValidatedConfig, ConfigError> {
        if self.api_token.trim().is_empty() {
            return Err(ConfigError::MissingCredential);
        }
        let timezone = parse_timezone(&self.timezone)?;
        let period = RequestPeriod::from_dates(&self.start_date, &self.end_date)?;
        Ok(ValidatedConfig {
            config: self.clone(),
            timezone,
            period,
        })
    }
}

/// Parse an IANA timezone name.
pub fn parse_timezone(name: &str) -> Result<Tz, ConfigError> {
    name.trim()
        .parse::<Tz>()
        .map_err(|_| ConfigError::InvalidTimezone(name.to_string()))
}

/// A configuration that passed [`AppConfig::validate`].
#[derive(Debug, Clone)]
pub struct ValidatedConfig {
    pub config: AppConfig,
    pub timezone: Tz,
    pub period: RequestPeriod,
}

impl ValidatedConfig {
    pub fn client_settings(&self) -> ClientSettings {
        self.config.settings()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const JSON: &str = r#"{
  "api_token": "abc123",
  "country_code": "DE",
  "start_date": "2025-01-01",
  "end_date": "2025-01-03",
  "normalize_to_kwh": true,
  "export_format": "parquet",
  "timezone": "Europe/Berlin",
  "make_plots": true
}"#;

    #[test]
    fn loads_json_with_defaults_for_missing_keys() {
        let cfg = AppConfig::from_json(JSON).unwrap();
        assert_eq!(cfg.country_code, "DE");
        assert_eq!(cfg.export_format, "parquet");
        assert!(cfg.make_plots);
        assert_eq!(cfg.output_dir, PathBuf::from("data"));
        assert_eq!(cfg.api_url, DEFAULT_API_URL);
        assert_eq!(cfg.request_timeout_secs, 30);
    }

    #[test]
    fn loads_toml() {
        let cfg = AppConfig::from_toml(
            r#"
api_token = "t"
country_code = "FR"
start_date = "2025-02-01"
end_date = "2025-02-01"
timezone = "Europe/Paris"
output_dir = "out"
"#,
        )
        .unwrap();
        assert_eq!(cfg.country_code, "FR");
        assert_eq!(cfg.output_dir, PathBuf::from("out"));
        assert!(cfg.normalize_to_kwh);
    }

    #[test]
    fn legacy_key_name_is_accepted() {
        let cfg = AppConfig::from_json(r#"{"ENTSOE_API_KEY": "legacy"}"#).unwrap();
        assert_eq!(cfg.api_token, "legacy");
    }

    #[test]
    fn from_file_dispatches_on_extension() {
        let dir = tempfile::tempdir().unwrap();
        let json_path = dir.path().join("config.json");
        std::fs::write(&json_path, JSON).unwrap();
        assert_eq!(AppConfig::from_file(&json_path).unwrap().country_code, "DE");

        let toml_path = dir.path().join("config.toml");
        std::fs::write(&toml_path, "country_code = \"NL\"\n").unwrap();
        assert_eq!(AppConfig::from_file(&toml_path).unwrap().country_code, "NL");

        let missing = AppConfig::from_file(&dir.path().join("nope.json"));
        assert!(matches!(missing, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn missing_token_is_rejected_before_anything_else() {
        let cfg = AppConfig {
            api_token: String::new(),
            timezone: "Not/AZone".into(),
            ..AppConfig::from_json(JSON).unwrap()
        }
        .with_token_override(None);
        assert!(matches!(cfg.validate(), Err(ConfigError::MissingCredential)));
    }

    #[test]
    fn token_override_only_fills_empty_token() {
        let empty = AppConfig::default().with_token_override(Some("from-env".into()));
        assert_eq!(empty.api_token, "from-env");

        let set = AppConfig::from_json(JSON)
            .unwrap()
            .with_token_override(Some("from-env".into()));
        assert_eq!(set.api_token, "abc123");
    }

    #[test]
    fn validate_parses_timezone_and_period() {
        let v = AppConfig::from_json(JSON).unwrap().validate().unwrap();
        assert_eq!(v.timezone, chrono_tz::Europe::Berlin);
        assert_eq!(v.period.start.as_str(), "202501010000");
        assert_eq!(v.period.end.as_str(), "202501040000");
        assert_eq!(v.client_settings().token, "abc123");
    }

    #[test]
    fn client_settings_need_only_the_token() {
        let cfg = AppConfig {
            api_token: "t".into(),
            request_timeout_secs: 5,
            ..AppConfig::default()
        };
        let settings = cfg.client_settings().unwrap();
        assert_eq!(settings.timeout, Duration::from_secs(5));
        assert!(matches!(
            AppConfig::default().client_settings(),
            Err(ConfigError::MissingCredential)
        ));
    }

    #[test]
    fn validate_rejects_bad_timezone_and_dates() {
        let bad_tz = AppConfig {
            timezone: "Mars/Olympus".into(),
            ..AppConfig::from_json(JSON).unwrap()
        };
        assert!(matches!(bad_tz.validate(), Err(ConfigError::InvalidTimezone(_))));

        let bad_date = AppConfig {
            start_date: "01.01.2025".into(),
            ..AppConfig::from_json(JSON).unwrap()
        };
        assert!(matches!(bad_date.validate(), Err(ConfigError::InvalidDate(_))));
    }
}
