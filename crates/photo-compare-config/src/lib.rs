#![warn(missing_docs)]
//! # photo-compare-config
//!
//! ## Purpose
//! Holds launch-time inputs and tunables for the capture widget.
//!
//! ## Responsibilities
//! - Parse page query parameters into [`LaunchParams`].
//! - Decide where the reference manifest comes from ([`ManifestSourceSpec`]).
//! - Carry validated widget tunables ([`WidgetConfig`]).
//! - Hold the opaque bearer token and its rotation state ([`TokenStore`]).
//!
//! ## Data flow
//! Page URL -> [`LaunchParams::from_page_url`] -> manifest source selection.
//! Host `photo.auth.update` -> [`TokenStore::rotate`] -> next manifest fetch.
//!
//! ## Error model
//! Malformed inputs return [`ConfigError`]; the widget reports them as
//! manifest load failures.
//!
//! ## Security and privacy notes
//! [`BearerToken`] never prints its value through `Debug` or `Display`.
//!
//! ## Example
//! ```rust
//! use photo_compare_config::{LaunchParams, ManifestSourceSpec};
//!
//! let params = LaunchParams::from_query("?rapport_id=R1&env=test").unwrap();
//! assert!(matches!(params.manifest_source(), ManifestSourceSpec::Parent));
//! ```

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Backend environment selected by the `env` query parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Staging backend.
    Test,
    /// Production backend.
    #[default]
    Live,
}

impl FromStr for Environment {
    type Err = ConfigError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "test" => Ok(Environment::Test),
            "live" => Ok(Environment::Live),
            other => Err(ConfigError::UnknownEnvironment(other.to_string())),
        }
    }
}

/// Opaque bearer token used for manifest refetches.
#[derive(Clone, PartialEq, Eq)]
pub struct BearerToken(String);

impl BearerToken {
    /// Wraps a non-blank token value.
    ///
    /// # Errors
    /// Returns [`ConfigError::EmptyToken`] for blank input.
    pub fn new(raw: impl Into<String>) -> Result<Self, ConfigError> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ConfigError::EmptyToken);
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Raw token value.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Value for an `Authorization` header.
    pub fn authorization_value(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BearerToken(<redacted>)")
    }
}

/// Token lifecycle state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenState {
    /// No token supplied yet.
    Missing,
    /// Token available for requests.
    Active(BearerToken),
}

/// Token holder with explicit rotation transitions.
#[derive(Debug, Clone)]
pub struct TokenStore {
    state: TokenState,
    rotations: u32,
}

impl TokenStore {
    /// Creates a store seeded with the launch token, if any.
    pub fn new(initial: Option<BearerToken>) -> Self {
        Self {
            state: initial.map_or(TokenState::Missing, TokenState::Active),
            rotations: 0,
        }
    }

    /// Current state snapshot.
    pub fn state(&self) -> &TokenState {
        &self.state
    }

    /// Active token, if any.
    pub fn current(&self) -> Option<&BearerToken> {
        match &self.state {
            TokenState::Active(token) => Some(token),
            TokenState::Missing => None,
        }
    }

    /// Replaces the token with a host-supplied one.
    ///
    /// # Errors
    /// Returns [`ConfigError::EmptyToken`] for blank input; the previous token
    /// is kept in that case.
    pub fn rotate(&mut self, raw: &str) -> Result<(), ConfigError> {
        let token = BearerToken::new(raw)?;
        self.state = TokenState::Active(token);
        self.rotations = self.rotations.saturating_add(1);
        tracing::info!(stage = "auth", action = "token_rotated", rotations = self.rotations);
        Ok(())
    }

    /// Drops the token.
    pub fn clear(&mut self) {
        self.state = TokenState::Missing;
    }

    /// Number of successful rotations since launch.
    pub fn rotations(&self) -> u32 {
        self.rotations
    }
}

impl Default for TokenStore {
    fn default() -> Self {
        Self::new(None)
    }
}

/// Where the manifest should be read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestSourceSpec {
    /// Absolute manifest URL (`data_url`).
    Url(Url),
    /// File name resolved against the asset base (`data_file`).
    File(String),
    /// Wait for the parent frame to send `photo.data.provide`.
    Parent,
}

/// Query parameters the widget is launched with.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LaunchParams {
    /// Bearer token for manifest fetches.
    pub token: Option<BearerToken>,
    /// Report identifier.
    pub rapport_id: Option<String>,
    /// Property identifier.
    pub logement_id: Option<String>,
    /// Backend environment.
    pub env: Environment,
    /// Absolute manifest URL.
    pub data_url: Option<Url>,
    /// Bundled manifest file name.
    pub data_file: Option<String>,
    /// Fetch the report manifest list when no manifest arrives by message.
    pub auto_load: bool,
}

impl LaunchParams {
    /// Parses a raw query string (with or without the leading `?`).
    ///
    /// Unknown keys are ignored and empty values count as absent.
    ///
    /// # Errors
    /// Returns [`ConfigError::InvalidDataUrl`] when `data_url` is not an
    /// absolute http(s) URL and [`ConfigError::UnknownEnvironment`] for an
    /// unsupported `env`.
    pub fn from_query(query: &str) -> Result<Self, ConfigError> {
        let query = query.strip_prefix('?').unwrap_or(query);
        let mut params = LaunchParams::default();

        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            let value = value.trim();
            if value.is_empty() {
                continue;
            }

            match key.as_ref() {
                "token" => params.token = Some(BearerToken::new(value)?),
                "rapport_id" => params.rapport_id = Some(value.to_string()),
                "logement_id" => params.logement_id = Some(value.to_string()),
                "env" => params.env = value.parse()?,
                "data_url" => params.data_url = Some(parse_http_url(value, "data_url")?),
                "data_file" => params.data_file = Some(value.to_string()),
                "auto_load" => params.auto_load = flag_enabled(value),
                _ => {}
            }
        }

        Ok(params)
    }

    /// Parses the query part of a full page URL.
    ///
    /// # Errors
    /// Returns [`ConfigError::InvalidPageUrl`] for an unparsable URL, otherwise
    /// the same errors as [`LaunchParams::from_query`].
    pub fn from_page_url(page_url: &str) -> Result<Self, ConfigError> {
        let parsed = Url::parse(page_url)
            .map_err(|error| ConfigError::InvalidPageUrl(error.to_string()))?;
        Self::from_query(parsed.query().unwrap_or_default())
    }

    /// Manifest source in priority order: `data_url`, `data_file`, parent.
    pub fn manifest_source(&self) -> ManifestSourceSpec {
        if let Some(url) = &self.data_url {
            return ManifestSourceSpec::Url(url.clone());
        }
        if let Some(file) = &self.data_file {
            return ManifestSourceSpec::File(file.clone());
        }
        ManifestSourceSpec::Parent
    }
}

/// Report API base URLs per environment.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiEndpoints {
    /// Base URL for `env=test`.
    pub test: Option<String>,
    /// Base URL for `env=live`.
    pub live: Option<String>,
}

impl ApiEndpoints {
    /// Base URL for the given environment.
    ///
    /// # Errors
    /// Returns [`ConfigError::MissingApiBase`] when none is configured.
    pub fn base_for(&self, env: Environment) -> Result<Url, ConfigError> {
        let raw = match env {
            Environment::Test => self.test.as_deref(),
            Environment::Live => self.live.as_deref(),
        }
        .ok_or(ConfigError::MissingApiBase(env))?;
        parse_http_url(raw, "api base")
    }
}

/// Widget tunables. Every field has a default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WidgetConfig {
    /// Upper bound for one `getUserMedia`/enumeration attempt.
    pub attempt_timeout_ms: u64,
    /// Delay between stopping a stream and probing the next camera.
    pub switch_settle_ms: u64,
    /// Delay between the two warm-up requests on iOS.
    pub ios_warmup_settle_ms: u64,
    /// Time to wait for `photo.data.provide` before requesting data.
    pub data_request_grace_ms: u64,
    /// Diagnostic ring buffer capacity.
    pub diagnostic_capacity: usize,
    /// JPEG quality in `1..=100`.
    pub jpeg_quality: u8,
    /// Preferred capture width hint.
    pub ideal_width: u32,
    /// Preferred capture height hint.
    pub ideal_height: u32,
    /// Expected parent origin, if known before the first message.
    pub parent_origin: Option<String>,
    /// Report API base URLs.
    pub api: ApiEndpoints,
    /// Base URL used to resolve `data_file`.
    pub asset_base: Option<String>,
    /// Confirm captures without a preview step.
    pub auto_confirm: bool,
}

impl Default for WidgetConfig {
    fn default() -> Self {
        Self {
            attempt_timeout_ms: 8_000,
            switch_settle_ms: 300,
            ios_warmup_settle_ms: 500,
            data_request_grace_ms: 1_500,
            diagnostic_capacity: 200,
            jpeg_quality: 85,
            ideal_width: 1920,
            ideal_height: 1080,
            parent_origin: None,
            api: ApiEndpoints::default(),
            asset_base: None,
            auto_confirm: false,
        }
    }
}

impl WidgetConfig {
    /// Parses a JSON config blob and validates it.
    ///
    /// # Errors
    /// Returns [`ConfigError::Decode`] for invalid JSON, then any
    /// [`WidgetConfig::validate`] error.
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: WidgetConfig = serde_json::from_str(raw).map_err(ConfigError::Decode)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks ranges and URL fields.
    ///
    /// # Errors
    /// Returns [`ConfigError::OutOfRange`] or [`ConfigError::InvalidDataUrl`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.attempt_timeout_ms == 0 {
            return Err(ConfigError::OutOfRange("attempt_timeout_ms must be > 0"));
        }
        if self.data_request_grace_ms == 0 {
            return Err(ConfigError::OutOfRange("data_request_grace_ms must be > 0"));
        }
        if self.diagnostic_capacity == 0 {
            return Err(ConfigError::OutOfRange("diagnostic_capacity must be > 0"));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(ConfigError::OutOfRange("jpeg_quality must be within 1..=100"));
        }
        if self.ideal_width == 0 || self.ideal_height == 0 {
            return Err(ConfigError::OutOfRange("ideal resolution must be non-zero"));
        }
        if let Some(origin) = &self.parent_origin {
            parse_http_url(origin, "parent_origin")?;
        }
        for (label, base) in [
            ("api.test", &self.api.test),
            ("api.live", &self.api.live),
            ("asset_base", &self.asset_base),
        ] {
            if let Some(raw) = base {
                parse_http_url(raw, label)?;
            }
        }
        Ok(())
    }

    /// [`WidgetConfig::attempt_timeout_ms`] as a duration.
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    /// [`WidgetConfig::switch_settle_ms`] as a duration.
    pub fn switch_settle(&self) -> Duration {
        Duration::from_millis(self.switch_settle_ms)
    }

    /// [`WidgetConfig::ios_warmup_settle_ms`] as a duration.
    pub fn ios_warmup_settle(&self) -> Duration {
        Duration::from_millis(self.ios_warmup_settle_ms)
    }

    /// [`WidgetConfig::data_request_grace_ms`] as a duration.
    pub fn data_request_grace(&self) -> Duration {
        Duration::from_millis(self.data_request_grace_ms)
    }

    /// Resolves a `data_file` name against the asset base.
    ///
    /// # Errors
    /// Returns [`ConfigError::MissingAssetBase`] when no base is configured,
    /// or [`ConfigError::InvalidDataUrl`] when the join fails.
    pub fn resolve_data_file(&self, file: &str) -> Result<Url, ConfigError> {
        let base = self
            .asset_base
            .as_deref()
            .ok_or(ConfigError::MissingAssetBase)?;
        let base = parse_http_url(base, "asset_base")?;
        base.join(file)
            .map_err(|error| ConfigError::InvalidDataUrl(format!("data_file {file}: {error}")))
    }
}

/// Kill-switch style flag parsing: `0`, `false`, `off`, `no` disable, anything
/// else enables.
pub fn flag_enabled(raw: &str) -> bool {
    let normalized = raw.trim().to_ascii_lowercase();
    !matches!(normalized.as_str(), "0" | "false" | "off" | "no")
}

fn parse_http_url(raw: &str, field: &str) -> Result<Url, ConfigError> {
    let parsed = Url::parse(raw)
        .map_err(|error| ConfigError::InvalidDataUrl(format!("{field}: {error}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidDataUrl(format!(
            "{field}: scheme must be http or https"
        )));
    }
    Ok(parsed)
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Token value is blank.
    #[error("token must be non-empty")]
    EmptyToken,
    /// `env` is neither `test` nor `live`.
    #[error("unknown environment: {0}")]
    UnknownEnvironment(String),
    /// A URL field is malformed or not http(s).
    #[error("invalid url: {0}")]
    InvalidDataUrl(String),
    /// Page URL cannot be parsed.
    #[error("invalid page url: {0}")]
    InvalidPageUrl(String),
    /// No API base URL for the selected environment.
    #[error("no api base configured for {0:?}")]
    MissingApiBase(Environment),
    /// `data_file` given without an asset base.
    #[error("no asset base configured for data_file")]
    MissingAssetBase,
    /// Numeric tunable out of range.
    #[error("config out of range: {0}")]
    OutOfRange(&'static str),
    /// JSON decode failure.
    #[error("config decode failure: {0}")]
    Decode(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    //! Unit tests for query parsing and token rotation.

    use super::*;

    #[test]
    fn parses_known_query_parameters() {
        let params = LaunchParams::from_query(
            "?token=abc&rapport_id=R-9&logement_id=L-2&env=TEST&data_url=https%3A%2F%2Fcdn.example.test%2Fm.json&auto_load=1",
        )
        .expect("query should parse");

        assert_eq!(params.token.as_ref().map(BearerToken::as_str), Some("abc"));
        assert_eq!(params.rapport_id.as_deref(), Some("R-9"));
        assert_eq!(params.logement_id.as_deref(), Some("L-2"));
        assert_eq!(params.env, Environment::Test);
        assert!(params.auto_load);
        assert!(matches!(params.manifest_source(), ManifestSourceSpec::Url(_)));
    }

    #[test]
    fn rejects_non_http_data_url() {
        assert!(LaunchParams::from_query("data_url=file%3A%2F%2F%2Fetc%2Fpasswd").is_err());
    }

    #[test]
    fn rotation_keeps_previous_token_on_blank_input() {
        let mut store = TokenStore::new(Some(BearerToken::new("first").unwrap()));
        assert!(store.rotate("   ").is_err());
        assert_eq!(store.current().map(BearerToken::as_str), Some("first"));

        store.rotate("second").expect("rotation should succeed");
        assert_eq!(store.current().map(BearerToken::as_str), Some("second"));
        assert_eq!(store.rotations(), 1);
    }

    #[test]
    fn token_debug_output_is_redacted() {
        let token = BearerToken::new("super-secret").unwrap();
        assert!(!format!("{token:?}").contains("super-secret"));
    }

    #[test]
    fn config_defaults_are_valid_and_partial_json_fills_defaults() {
        WidgetConfig::default().validate().expect("defaults should validate");
        let config = WidgetConfig::from_json(r#"{"jpeg_quality": 70}"#).expect("config should parse");
        assert_eq!(config.jpeg_quality, 70);
        assert_eq!(config.attempt_timeout_ms, 8_000);
        assert!(WidgetConfig::from_json(r#"{"jpeg_quality": 0}"#).is_err());
    }
}
