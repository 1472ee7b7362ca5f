// Metrics client: instant queries against a Prometheus-compatible backend.
use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{StatusCode, Url};

use super::prometheus::{QueryResponse, Series};

pub const QUERY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(thiserror::Error, Debug)]
pub enum MetricsError {
    #[error("Metrics transport error: {0}")]
    Transport(String),

    #[error("Metrics backend error ({error_type}): {message}")]
    BackendError { error_type: String, message: String },

    #[error("Malformed metrics response: {0}")]
    MalformedResponse(String),

    #[error("Query returned no series: {0}")]
    NoResult(String),

    #[error("Query returned {count} series, expected exactly one: {expr}")]
    AmbiguousResult { expr: String, count: usize },

    #[error("Invalid metrics endpoint {0:?}")]
    InvalidEndpoint(String),
}

impl MetricsError {
    /// Label value for the poll-error counter.
    pub fn reason(&self) -> &'static str {
        match self {
            MetricsError::Transport(_) => "transport",
            MetricsError::BackendError { .. } => "backend_error",
            MetricsError::MalformedResponse(_) => "malformed_response",
            MetricsError::NoResult(_) => "no_result",
            MetricsError::AmbiguousResult { .. } => "ambiguous_result",
            MetricsError::InvalidEndpoint(_) => "invalid_endpoint",
        }
    }
}

#[async_trait]
pub trait MetricsQuery: Send + Sync {
    /// Exactly one series must match `expr`.
    async fn query_scalar(&self, expr: &str) -> Result<f64, MetricsError>;

    /// Series keyed by the value of `label_key`. Duplicate keys keep the last value.
    async fn query_vector(
        &self,
        expr: &str,
        label_key: &str,
    ) -> Result<HashMap<String, f64>, MetricsError>;
}

#[derive(Clone)]
pub struct PrometheusClient {
    client: reqwest::Client,
    base_url: Url,
}

impl PrometheusClient {
    pub fn new(base_url: Url) -> Result<Self, MetricsError> {
        let client = reqwest::ClientBuilder::new()
            .timeout(QUERY_TIMEOUT)
            .build()
            .map_err(|e| MetricsError::Transport(format!("Failed to build client: {}", e)))?;
        Ok(Self { client, base_url })
    }

    pub fn from_endpoint(endpoint: &str) -> Result<Self, MetricsError> {
        let base_url =
            Url::parse(endpoint).map_err(|_| MetricsError::InvalidEndpoint(endpoint.to_string()))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(MetricsError::InvalidEndpoint(endpoint.to_string()));
        }
        Self::new(base_url)
    }

    fn query_url(&self) -> String {
        format!("{}/api/v1/query", self.base_url.as_str().trim_end_matches('/'))
    }

    async fn instant_query(&self, expr: &str) -> Result<Vec<Series>, MetricsError> {
        let url = self.query_url();
        let start = std::time::Instant::now();
        let resp = self
            .client
            .get(&url)
            .query(&[("query", expr)])
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    MetricsError::Transport(format!("Query timed out after {:?}", QUERY_TIMEOUT))
                } else {
                    MetricsError::Transport(format!("Request failed: {}", e))
                }
            })?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| MetricsError::Transport(format!("Failed to read response: {}", e)))?;

        log::debug!(
            "Query [{}] took: {:.4}s status={}",
            expr,
            start.elapsed().as_secs_f64(),
            status
        );

        if status != StatusCode::OK {
            return Err(MetricsError::Transport(format!("HTTP {}: {}", status, body)));
        }

        let response: QueryResponse = serde_json::from_str(&body)
            .map_err(|e| MetricsError::MalformedResponse(format!("Invalid JSON: {}", e)))?;
        response.into_series()
    }
}

#[async_trait]
impl MetricsQuery for PrometheusClient {
    async fn query_scalar(&self, expr: &str) -> Result<f64, MetricsError> {
        let series = self.instant_query(expr).await?;
        single_value(expr, series)
    }

    async fn query_vector(
        &self,
        expr: &str,
        label_key: &str,
    ) -> Result<HashMap<String, f64>, MetricsError> {
        let series = self.instant_query(expr).await?;
        Ok(index_by_label(series, label_key))
    }
}

pub(crate) fn single_value(expr: &str, series: Vec<Series>) -> Result<f64, MetricsError> {
    match series.as_slice() {
        [] => Err(MetricsError::NoResult(expr.to_string())),
        [only] => Ok(only.value),
        many => Err(MetricsError::AmbiguousResult {
            expr: expr.to_string(),
            count: many.len(),
        }),
    }
}

pub(crate) fn index_by_label(series: Vec<Series>, label_key: &str) -> HashMap<String, f64> {
    let mut values = HashMap::with_capacity(series.len());
    for s in series {
        let Some(key) = s.labels.get(label_key) else {
            log::debug!("Series without label {} ignored: {:?}", label_key, s.labels);
            continue;
        };
        if let Some(previous) = values.insert(key.clone(), s.value) {
            log::warn!(
                "Duplicate series for {}={}: {} replaced by {}",
                label_key,
                key,
                previous,
                s.value
            );
        }
    }
    values
}

/// Escapes a value for a double-quoted PromQL string literal.
pub fn escape_label_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Builds an anchored regex alternation matching exactly `names`.
pub fn name_alternation(names: &[&str]) -> String {
    names
        .iter()
        .map(|n| escape_regex(n))
        .collect::<Vec<_>>()
        .join("|")
}

fn escape_regex(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if "\\.+*?()|[]{}^$".contains(c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
