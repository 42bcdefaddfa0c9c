//! Service configuration.
//!
//! Loaded from a TOML file, then overridden from `ROSTER_*` environment
//! variables, then validated with `validator`.

use crate::error::{RosterSyncError, RosterSyncResult};
use crate::types::{DEFAULT_STUDENT_ROLE, RoleId};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use validator::{Validate, ValidateUrl, ValidationError};

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RosterSyncConfig {
    #[serde(default)]
    #[validate(nested)]
    pub source: SourceConfig,
    #[serde(default)]
    #[validate(nested)]
    pub http: HttpConfig,
    #[serde(default)]
    #[validate(nested)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub database_url: String,
    #[serde(default)]
    pub api: ApiConfig
}

/// Endpoints and credentials of the external academic-records source.
///
/// Empty credentials are allowed: the token client then reports no token and
/// every run is skipped.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SourceConfig {
    #[validate(custom(function = "validate_optional_url"))]
    pub token_url: String,
    #[validate(custom(function = "validate_optional_url"))]
    pub course_url: String,
    #[validate(custom(function = "validate_optional_url"))]
    pub members_url: String,
    pub client_id: String,
    /// Shared secret half of the token signature.
    pub selector_id: String,
    /// Term stamped on fetched courses; the current year when unset.
    pub term: Option<String>
}

impl SourceConfig {
    pub fn has_credentials(&self) -> bool {
        !self.token_url.is_empty() && !self.client_id.is_empty() && !self.selector_id.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct HttpConfig {
    #[validate(range(min = 1, max = 300))]
    pub request_timeout_seconds: u64,
    #[validate(range(max = 3))]
    pub max_retries: usize,
    pub retry_delay_ms: u64
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout_seconds: 30,
            max_retries: 1,
            retry_delay_ms: 500
        }
    }
}

impl HttpConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

/// What a run does when the member list could not be fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchFailurePolicy {
    /// Reconcile against the empty roster; previously synced members depart.
    #[default]
    Reconcile,
    /// Leave the instance untouched until the next run.
    Skip
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SyncConfig {
    #[validate(length(min = 1))]
    pub schedule: String,
    #[validate(range(min = 1, max = 64))]
    pub max_concurrent_runs: usize,
    pub on_fetch_failure: FetchFailurePolicy,
    pub default_role: RoleId
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            schedule: "0 */15 * * * *".to_string(),
            max_concurrent_runs: 4,
            on_fetch_failure: FetchFailurePolicy::Reconcile,
            default_role: DEFAULT_STUDENT_ROLE
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub port: u16,
    pub bearer_token: Option<String>
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            port: 8090,
            bearer_token: None
        }
    }
}

/// Empty means "not configured"; anything else must parse as a URL.
fn validate_optional_url(value: &str) -> Result<(), ValidationError> {
    if value.is_empty() || value.validate_url() {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_url"))
    }
}

impl Default for RosterSyncConfig {
    fn default() -> Self {
        Self {
            source: SourceConfig::default(),
            http: HttpConfig::default(),
            sync: SyncConfig::default(),
            database_url: String::new(),
            api: ApiConfig::default()
        }
    }
}

impl RosterSyncConfig {
    pub fn load_from_toml(path: &Path) -> RosterSyncResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            RosterSyncError::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        })?;

        toml::from_str(&contents)
            .map_err(|e| RosterSyncError::ConfigError(format!("Failed to parse TOML: {}", e)))
    }

    /// File (when given) → environment overrides → validation.
    pub fn load(path: Option<&Path>) -> RosterSyncResult<Self> {
        let mut config = match path {
            Some(path) => Self::load_from_toml(path)?,
            None => Self::default()
        };
        config.apply_env_overrides()?;
        config.validate_config()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> RosterSyncResult<()> {
        override_string("ROSTER_TOKEN_URL", &mut self.source.token_url);
        override_string("ROSTER_COURSE_URL", &mut self.source.course_url);
        override_string("ROSTER_MEMBERS_URL", &mut self.source.members_url);
        override_string("ROSTER_CLIENT_ID", &mut self.source.client_id);
        override_string("ROSTER_SELECTOR_ID", &mut self.source.selector_id);
        if let Ok(term) = env::var("ROSTER_TERM") {
            self.source.term = Some(term);
        }

        override_string("ROSTER_DATABASE_URL", &mut self.database_url);
        override_string("ROSTER_SYNC_SCHEDULE", &mut self.sync.schedule);
        override_parsed("ROSTER_MAX_CONCURRENT_RUNS", &mut self.sync.max_concurrent_runs)?;
        override_parsed("ROSTER_REQUEST_TIMEOUT_SECONDS", &mut self.http.request_timeout_seconds)?;
        override_parsed("ROSTER_API_PORT", &mut self.api.port)?;
        if let Ok(token) = env::var("ROSTER_API_TOKEN") {
            self.api.bearer_token = Some(token);
        }

        Ok(())
    }

    pub fn validate_config(&self) -> RosterSyncResult<()> {
        self.validate()
            .map_err(|e| RosterSyncError::ConfigError(e.to_string()))
    }
}

fn override_string(key: &str, target: &mut String) {
    if let Ok(value) = env::var(key) {
        *target = value;
    }
}

fn override_parsed<T: FromStr>(key: &str, target: &mut T) -> RosterSyncResult<()> {
    if let Ok(raw) = env::var(key) {
        *target = raw
            .parse()
            .map_err(|_| RosterSyncError::ConfigError(format!("{key} has an invalid value: {raw}")))?;
    }
    Ok(())
}
