//! Analytics API contract: endpoint catalogue, request URLs, fetch errors and
//! the reqwest-backed fetcher.

use std::env;
use std::fmt;
use std::future::Future;
use std::time::Duration;

use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_API_BASE_URL: &str = "https://job-analytic-backend.onrender.com/api/analytics";

/// Filter value meaning "no restriction".
pub const ALL: &str = "All";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Endpoint {
    WorkTypes,
    Qualifications,
    ExperienceLevels,
    WorkTypeDistribution,
    QualificationDistribution,
    ExperienceDistribution,
    SalaryRangeDistribution,
    JobPortalDistribution,
    JobPostingsTrend,
    #[serde(rename = "top_10_companies")]
    Top10Companies,
    CompanySizeVsName,
}

impl Endpoint {
    pub const OPTION_LISTS: [Endpoint; 3] = [
        Endpoint::WorkTypes,
        Endpoint::Qualifications,
        Endpoint::ExperienceLevels,
    ];

    /// Dataset endpoints in full-refresh request order.
    pub const DATASETS: [Endpoint; 8] = [
        Endpoint::WorkTypeDistribution,
        Endpoint::QualificationDistribution,
        Endpoint::ExperienceDistribution,
        Endpoint::SalaryRangeDistribution,
        Endpoint::JobPortalDistribution,
        Endpoint::JobPostingsTrend,
        Endpoint::Top10Companies,
        Endpoint::CompanySizeVsName,
    ];

    pub const GATED: [Endpoint; 2] = [Endpoint::Top10Companies, Endpoint::CompanySizeVsName];

    pub fn path(self) -> &'static str {
        match self {
            Self::WorkTypes => "/work_types",
            Self::Qualifications => "/qualifications",
            Self::ExperienceLevels => "/experience_levels",
            Self::WorkTypeDistribution => "/work_type_distribution",
            Self::QualificationDistribution => "/qualification_distribution",
            Self::ExperienceDistribution => "/experience_distribution",
            Self::SalaryRangeDistribution => "/salary_range_distribution",
            Self::JobPortalDistribution => "/job_portal_distribution",
            Self::JobPostingsTrend => "/job_postings_trend",
            Self::Top10Companies => "/top_10_companies",
            Self::CompanySizeVsName => "/company_size_vs_name",
        }
    }

    /// Query parameter name carrying the filter selection, if any.
    pub fn filter_param(self) -> Option<&'static str> {
        match self {
            Self::WorkTypeDistribution => Some("workType"),
            Self::QualificationDistribution => Some("qualification"),
            Self::ExperienceDistribution => Some("experience"),
            _ => None,
        }
    }

    pub fn is_option_list(self) -> bool {
        Self::OPTION_LISTS.contains(&self)
    }

    pub fn is_gated(self) -> bool {
        Self::GATED.contains(&self)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EndpointRequest {
    pub endpoint: Endpoint,
    pub filter_value: Option<String>,
}

impl EndpointRequest {
    pub fn plain(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            filter_value: None,
        }
    }

    pub fn filtered(endpoint: Endpoint, value: impl Into<String>) -> Self {
        Self {
            endpoint,
            filter_value: Some(value.into()),
        }
    }

    pub fn query(&self) -> Option<(&'static str, &str)> {
        match (self.endpoint.filter_param(), self.filter_value.as_deref()) {
            (Some(param), Some(value)) => Some((param, value)),
            _ => None,
        }
    }

    pub fn url(&self, base_url: &str) -> Result<Url, FetchError> {
        let raw = format!("{}{}", base_url.trim_end_matches('/'), self.endpoint.path());
        let parsed = match self.query() {
            Some(pair) => Url::parse_with_params(&raw, [pair]),
            None => Url::parse(&raw),
        };
        parsed.map_err(|err| FetchError::InvalidUrl {
            endpoint: self.endpoint,
            message: err.to_string(),
        })
    }
}

impl fmt::Display for EndpointRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.query() {
            Some((param, value)) => write!(f, "{}?{}={}", self.endpoint, param, value),
            None => write!(f, "{}", self.endpoint),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("HTTP client build error: {0}")]
    HttpClientBuild(String),
    #[error("invalid URL for {endpoint}: {message}")]
    InvalidUrl { endpoint: Endpoint, message: String },
    #[error("request to {endpoint} failed: {message}")]
    Transport { endpoint: Endpoint, message: String },
    #[error("request to {endpoint} timed out after {timeout_ms}ms")]
    Timeout { endpoint: Endpoint, timeout_ms: u64 },
    #[error("unexpected HTTP status {status} from {endpoint}")]
    Status { endpoint: Endpoint, status: u16 },
    #[error("malformed response from {endpoint}: {message}")]
    Decode { endpoint: Endpoint, message: String },
}

impl FetchError {
    pub fn endpoint(&self) -> Option<Endpoint> {
        match self {
            Self::HttpClientBuild(_) => None,
            Self::InvalidUrl { endpoint, .. }
            | Self::Transport { endpoint, .. }
            | Self::Timeout { endpoint, .. }
            | Self::Status { endpoint, .. }
            | Self::Decode { endpoint, .. } => Some(*endpoint),
        }
    }

    /// Transport failures, timeouts, 429 and 5xx are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { .. } | Self::Timeout { .. } => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::HttpClientBuild(_) | Self::InvalidUrl { .. } | Self::Decode { .. } => false,
        }
    }
}

/// Fetches one endpoint and yields its JSON body.
pub trait AnalyticsFetcher: Send + Sync + 'static {
    fn fetch(
        &self,
        request: &EndpointRequest,
    ) -> impl Future<Output = Result<Value, FetchError>> + Send;
}

pub fn decode_records(endpoint: Endpoint, body: Value) -> Result<Vec<Value>, FetchError> {
    match body {
        Value::Array(items) => Ok(items),
        other => Err(FetchError::Decode {
            endpoint,
            message: format!("expected a JSON array, got {}", json_kind(&other)),
        }),
    }
}

pub fn decode_options(endpoint: Endpoint, body: Value) -> Result<Vec<String>, FetchError> {
    decode_records(endpoint, body)?
        .into_iter()
        .enumerate()
        .map(|(idx, item)| match item {
            Value::String(value) => Ok(value),
            other => Err(FetchError::Decode {
                endpoint,
                message: format!("option {idx} is {}, expected a string", json_kind(&other)),
            }),
        })
        .collect()
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyticsApiConfig {
    pub base_url: String,
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for AnalyticsApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_BASE_URL.to_string(),
            timeout_ms: 10_000,
            max_retries: 2,
            retry_backoff_ms: 200,
        }
    }
}

pub fn api_config_from_env() -> AnalyticsApiConfig {
    let mut config = AnalyticsApiConfig::default();

    if let Ok(base_url) = env::var("JOBDASH_API_BASE_URL") {
        let trimmed = base_url.trim();
        if !trimmed.is_empty() {
            config.base_url = trimmed.to_string();
        }
    }

    if let Some(timeout_ms) = parse_env_number("JOBDASH_HTTP_TIMEOUT_MS") {
        config.timeout_ms = timeout_ms;
    }

    if let Some(max_retries) = parse_env_number("JOBDASH_HTTP_MAX_RETRIES") {
        config.max_retries = max_retries;
    }

    if let Some(retry_backoff_ms) = parse_env_number("JOBDASH_HTTP_RETRY_BACKOFF_MS") {
        config.retry_backoff_ms = retry_backoff_ms;
    }

    config
}

pub(crate) fn parse_env_number<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok()?.trim().parse::<T>().ok()
}

pub struct ReqwestAnalyticsFetcher {
    client: reqwest::Client,
    config: AnalyticsApiConfig,
}

impl ReqwestAnalyticsFetcher {
    pub fn new(config: AnalyticsApiConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|err| FetchError::HttpClientBuild(err.to_string()))?;
        Ok(Self { client, config })
    }

    async fn fetch_once(&self, request: &EndpointRequest) -> Result<Value, FetchError> {
        let endpoint = request.endpoint;
        let url = request.url(&self.config.base_url)?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| self.transport_error(endpoint, err))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                endpoint,
                status: status.as_u16(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|err| self.transport_error(endpoint, err))?;

        serde_json::from_slice(&body).map_err(|err| FetchError::Decode {
            endpoint,
            message: err.to_string(),
        })
    }

    fn transport_error(&self, endpoint: Endpoint, err: reqwest::Error) -> FetchError {
        if err.is_timeout() {
            FetchError::Timeout {
                endpoint,
                timeout_ms: self.config.timeout_ms,
            }
        } else {
            FetchError::Transport {
                endpoint,
                message: err.to_string(),
            }
        }
    }
}

impl AnalyticsFetcher for ReqwestAnalyticsFetcher {
    async fn fetch(&self, request: &EndpointRequest) -> Result<Value, FetchError> {
        retry_with_backoff(&self.config, || self.fetch_once(request)).await
    }
}

pub async fn retry_with_backoff<T, F, Fut>(
    cfg: &AnalyticsApiConfig,
    mut attempt_fn: F,
) -> Result<T, FetchError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let mut attempt: u32 = 0;
    loop {
        match attempt_fn().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt >= cfg.max_retries || !err.is_retryable() => return Err(err),
            Err(err) => {
                attempt = attempt.saturating_add(1);
                let delay = backoff_duration(cfg.retry_backoff_ms, attempt);
                debug!(
                    component = "analytics_api",
                    event = "fetch.retry",
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

fn backoff_duration(base_ms: u64, attempt: u32) -> Duration {
    let shift = attempt.saturating_sub(1).min(10);
    let factor = 1u64 << shift;
    Duration::from_millis(base_ms.saturating_mul(factor))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use crate::test_env::with_env_vars;

    #[test]
    fn catalogue_has_eleven_distinct_paths() {
        let mut paths: Vec<&str> = Endpoint::OPTION_LISTS
            .iter()
            .chain(Endpoint::DATASETS.iter())
            .map(|endpoint| endpoint.path())
            .collect();
        paths.sort_unstable();
        paths.dedup();
        assert_eq!(paths.len(), 11);
        assert!(Endpoint::GATED.iter().all(|e| Endpoint::DATASETS.contains(e)));
    }

    #[test]
    fn only_three_dataset_endpoints_take_filters() {
        let filtered: Vec<Endpoint> = Endpoint::DATASETS
            .iter()
            .copied()
            .filter(|endpoint| endpoint.filter_param().is_some())
            .collect();
        assert_eq!(
            filtered,
            vec![
                Endpoint::WorkTypeDistribution,
                Endpoint::QualificationDistribution,
                Endpoint::ExperienceDistribution,
            ]
        );
    }

    #[test]
    fn filtered_url_encodes_query_value() {
        let req = EndpointRequest::filtered(Endpoint::WorkTypeDistribution, "Full Time & Co");
        let url = req.url("http://localhost:9000/api/analytics/").unwrap();
        assert_eq!(url.path(), "/api/analytics/work_type_distribution");
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(
            pairs,
            vec![("workType".to_string(), "Full Time & Co".to_string())]
        );
    }

    #[test]
    fn plain_url_has_no_query() {
        let req = EndpointRequest::plain(Endpoint::Top10Companies);
        let url = req.url(DEFAULT_API_BASE_URL).unwrap();
        assert_eq!(
            url.as_str(),
            "https://job-analytic-backend.onrender.com/api/analytics/top_10_companies"
        );
    }

    #[test]
    fn filter_value_is_ignored_for_unfiltered_endpoint() {
        let req = EndpointRequest::filtered(Endpoint::SalaryRangeDistribution, "Remote");
        assert_eq!(req.query(), None);
        assert_eq!(req.to_string(), "/salary_range_distribution");
    }

    #[test]
    fn invalid_base_url_is_reported_with_endpoint() {
        let err = EndpointRequest::plain(Endpoint::WorkTypes)
            .url("not a url")
            .unwrap_err();
        assert_eq!(err.endpoint(), Some(Endpoint::WorkTypes));
        assert!(matches!(err, FetchError::InvalidUrl { .. }));
    }

    #[test]
    fn decode_records_rejects_non_arrays() {
        let err = decode_records(Endpoint::JobPostingsTrend, json!({"month": "Jan"})).unwrap_err();
        assert!(err.to_string().contains("an object"));
        assert_eq!(
            decode_records(Endpoint::JobPostingsTrend, json!([])).unwrap(),
            Vec::<Value>::new()
        );
    }

    #[test]
    fn decode_options_requires_strings() {
        let ok = decode_options(Endpoint::WorkTypes, json!(["Full Time", "Intern"])).unwrap();
        assert_eq!(ok, vec!["Full Time", "Intern"]);

        let err = decode_options(Endpoint::WorkTypes, json!(["Full Time", 3])).unwrap_err();
        assert!(err.to_string().contains("option 1 is a number"));
    }

    #[test]
    fn retryable_classification() {
        let endpoint = Endpoint::WorkTypes;
        assert!(FetchError::Status { endpoint, status: 503 }.is_retryable());
        assert!(FetchError::Status { endpoint, status: 429 }.is_retryable());
        assert!(!FetchError::Status { endpoint, status: 404 }.is_retryable());
        assert!(!FetchError::Decode {
            endpoint,
            message: "x".to_string()
        }
        .is_retryable());
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        assert_eq!(backoff_duration(200, 1), Duration::from_millis(200));
        assert_eq!(backoff_duration(200, 2), Duration::from_millis(400));
        assert_eq!(backoff_duration(200, 3), Duration::from_millis(800));
    }

    #[tokio::test]
    async fn retry_gives_up_after_max_retries() {
        let cfg = AnalyticsApiConfig {
            max_retries: 2,
            retry_backoff_ms: 0,
            ..AnalyticsApiConfig::default()
        };
        let counter = AtomicU32::new(0);
        let attempts = &counter;

        let result: Result<(), FetchError> = retry_with_backoff(&cfg, move || async move {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(FetchError::Transport {
                endpoint: Endpoint::WorkTypes,
                message: "connection reset".to_string(),
            })
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_stops_immediately_on_non_retryable_error() {
        let cfg = AnalyticsApiConfig {
            retry_backoff_ms: 0,
            ..AnalyticsApiConfig::default()
        };
        let counter = AtomicU32::new(0);
        let attempts = &counter;

        let result: Result<(), FetchError> = retry_with_backoff(&cfg, move || async move {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(FetchError::Status {
                endpoint: Endpoint::WorkTypes,
                status: 404,
            })
        })
        .await;

        assert!(matches!(result, Err(FetchError::Status { status: 404, .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retry_returns_first_success() {
        let cfg = AnalyticsApiConfig {
            retry_backoff_ms: 0,
            ..AnalyticsApiConfig::default()
        };
        let counter = AtomicU32::new(0);
        let attempts = &counter;

        let value = retry_with_backoff(&cfg, move || async move {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                Err(FetchError::Timeout {
                    endpoint: Endpoint::WorkTypes,
                    timeout_ms: 10,
                })
            } else {
                Ok(n)
            }
        })
        .await
        .unwrap();

        assert_eq!(value, 1);
    }

    #[test]
    fn defaults_when_env_missing() {
        let cfg = with_env_vars(
            &[
                ("JOBDASH_API_BASE_URL", None),
                ("JOBDASH_HTTP_TIMEOUT_MS", None),
                ("JOBDASH_HTTP_MAX_RETRIES", None),
                ("JOBDASH_HTTP_RETRY_BACKOFF_MS", None),
            ],
            api_config_from_env,
        );

        assert_eq!(cfg, AnalyticsApiConfig::default());
    }

    #[test]
    fn parses_overrides_and_ignores_garbage() {
        let cfg = with_env_vars(
            &[
                ("JOBDASH_API_BASE_URL", Some(" http://127.0.0.1:9000/api ")),
                ("JOBDASH_HTTP_TIMEOUT_MS", Some("2500")),
                ("JOBDASH_HTTP_MAX_RETRIES", Some("lots")),
                ("JOBDASH_HTTP_RETRY_BACKOFF_MS", Some("50")),
            ],
            api_config_from_env,
        );

        assert_eq!(cfg.base_url, "http://127.0.0.1:9000/api");
        assert_eq!(cfg.timeout_ms, 2_500);
        assert_eq!(cfg.max_retries, 2);
        assert_eq!(cfg.retry_backoff_ms, 50);
    }
}
