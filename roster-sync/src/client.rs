use crate::config::{HttpConfig, SourceConfig};
use crate::error::{RosterSyncError, RosterSyncResult};
use crate::token::AccessToken;
use crate::types::{ExternalCourseMapping, ExternalMember};
use async_trait::async_trait;
use chrono::{Datelike, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tokio_retry::RetryIf;
use tokio_retry::strategy::FixedInterval;
use tracing::{debug, warn};

/// Outcome of a degrade-to-empty fetch. `payload` is always usable; `ok`
/// tells whether it reflects what the source reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResult<T> {
    pub ok: bool,
    pub payload: T
}

impl<T: Default> FetchResult<T> {
    pub fn fetched(payload: T) -> Self {
        Self { ok: true, payload }
    }

    pub fn unavailable() -> Self {
        Self {
            ok: false,
            payload: T::default()
        }
    }
}

/// Reads the external course catalog and member lists. Implementations never
/// fail: errors degrade to empty payloads.
#[async_trait]
pub trait RosterSource: Send + Sync {
    async fn fetch_courses(
        &self,
        account_identity: &str,
        token: &AccessToken
    ) -> Vec<ExternalCourseMapping>;

    async fn fetch_members(
        &self,
        external_course_id: &str,
        token: &AccessToken
    ) -> FetchResult<Vec<ExternalMember>>;
}

/// `{status, data}` envelope used by every endpoint of the source.
#[derive(Debug, Deserialize)]
pub(crate) struct Envelope {
    #[serde(default)]
    status: Value,
    #[serde(default)]
    data: Value
}

impl Envelope {
    pub(crate) fn is_success(&self) -> bool {
        match &self.status {
            Value::Number(n) => n.as_i64() == Some(1),
            Value::String(s) => s.trim() == "1",
            Value::Bool(b) => *b,
            _ => false
        }
    }

    /// Payload of a successful response; `None` on a failure flag or a
    /// payload of the wrong shape.
    pub(crate) fn into_data<T: DeserializeOwned>(self) -> Option<T> {
        if !self.is_success() {
            return None;
        }
        match serde_json::from_value(self.data) {
            Ok(data) => Some(data),
            Err(e) => {
                warn!(error = %e, "Roster source returned an unexpected payload");
                None
            }
        }
    }
}

/// Accepts the loosely typed scalars the source emits (student numbers and
/// capacities arrive as either JSON numbers or strings).
pub(crate) fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None
    }
}

/// Form-POST transport shared by the token and roster clients.
#[derive(Clone)]
pub(crate) struct SourceHttp {
    client: Client,
    config: HttpConfig
}

impl SourceHttp {
    pub(crate) fn new(config: &HttpConfig) -> RosterSyncResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(RosterSyncError::HttpError)?;

        Ok(Self {
            client,
            config: config.clone()
        })
    }

    pub(crate) async fn post_form(
        &self,
        url: &str,
        form: &[(&str, String)]
    ) -> RosterSyncResult<Envelope> {
        let strategy =
            FixedInterval::from_millis(self.config.retry_delay_ms).take(self.config.max_retries);

        RetryIf::spawn(
            strategy,
            || self.send_form(url, form),
            RosterSyncError::is_retryable
        )
        .await
    }

    async fn send_form(&self, url: &str, form: &[(&str, String)]) -> RosterSyncResult<Envelope> {
        debug!(url = %url, "Posting to roster source");

        let response = self.client.post(url).form(form).send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RosterSyncError::SourceApiError {
                status: status.as_u16(),
                message: body
            });
        }

        Ok(response.json::<Envelope>().await?)
    }
}

pub struct HttpRosterClient {
    http: SourceHttp,
    source: SourceConfig
}

#[derive(Debug, Deserialize)]
struct CourseEntry {
    #[serde(default)]
    idnumber: Value,
    #[serde(default)]
    category: Value,
    #[serde(default)]
    shortname: Value,
    #[serde(default)]
    stunum: Value
}

impl HttpRosterClient {
    pub fn new(source: SourceConfig, http: &HttpConfig) -> RosterSyncResult<Self> {
        Ok(Self {
            http: SourceHttp::new(http)?,
            source
        })
    }

    fn term(&self) -> String {
        self.source
            .term
            .clone()
            .unwrap_or_else(|| Utc::now().year().to_string())
    }

    fn to_mapping(&self, term: &str, entry: CourseEntry) -> Option<ExternalCourseMapping> {
        let external_course_id = scalar_to_string(&entry.idnumber)?;
        Some(ExternalCourseMapping {
            term: term.to_string(),
            external_course_id,
            college_name: scalar_to_string(&entry.category).unwrap_or_default(),
            course_name: scalar_to_string(&entry.shortname).unwrap_or_default(),
            student_capacity: scalar_to_string(&entry.stunum)
                .and_then(|s| s.parse().ok())
                .unwrap_or(0)
        })
    }
}

#[async_trait]
impl RosterSource for HttpRosterClient {
    async fn fetch_courses(
        &self,
        account_identity: &str,
        token: &AccessToken
    ) -> Vec<ExternalCourseMapping> {
        if self.source.course_url.is_empty() {
            return Vec::new();
        }

        let form = [
            ("username", account_identity.to_string()),
            ("token", token.as_str().to_string())
        ];

        let envelope = match self.http.post_form(&self.source.course_url, &form).await {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(account = %account_identity, error = %e, "Course catalog fetch failed");
                return Vec::new();
            }
        };

        let Some(entries) = envelope.into_data::<Vec<CourseEntry>>() else {
            debug!(account = %account_identity, "Course catalog reported no courses");
            return Vec::new();
        };

        let term = self.term();
        entries
            .into_iter()
            .filter_map(|entry| self.to_mapping(&term, entry))
            .collect()
    }

    async fn fetch_members(
        &self,
        external_course_id: &str,
        token: &AccessToken
    ) -> FetchResult<Vec<ExternalMember>> {
        if self.source.members_url.is_empty() {
            return FetchResult::unavailable();
        }

        let form = [
            ("idnumber", external_course_id.to_string()),
            ("token", token.as_str().to_string())
        ];

        let envelope = match self.http.post_form(&self.source.members_url, &form).await {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(course = %external_course_id, error = %e, "Member list fetch failed");
                return FetchResult::unavailable();
            }
        };

        match envelope.into_data::<Vec<Value>>() {
            Some(identifiers) => FetchResult::fetched(
                identifiers
                    .iter()
                    .filter_map(scalar_to_string)
                    .map(ExternalMember::new)
                    .collect()
            ),
            None => {
                warn!(course = %external_course_id, "Member list reported a failure status");
                FetchResult::unavailable()
            }
        }
    }
}

pub fn create_roster_client(
    source: SourceConfig,
    http: &HttpConfig
) -> RosterSyncResult<Arc<dyn RosterSource>> {
    Ok(Arc::new(HttpRosterClient::new(source, http)?))
}
