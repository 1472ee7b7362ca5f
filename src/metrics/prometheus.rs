// Prometheus HTTP API instant-query envelope.
use std::collections::HashMap;

use serde::Deserialize;

use super::query_client::MetricsError;

// {"status": "...", "errorType": "...", "error": "...", "data": {...}}
#[derive(Debug, Deserialize)]
pub struct QueryResponse {
    pub status: String,

    #[serde(rename = "errorType", default)]
    pub error_type: Option<String>,

    #[serde(default)]
    pub error: Option<String>,

    #[serde(default)]
    pub data: Option<QueryData>,
}

#[derive(Debug, Deserialize)]
pub struct QueryData {
    #[serde(rename = "resultType")]
    pub result_type: String,

    // vector: [{metric, value}], scalar: [ts, "num"]
    pub result: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct InstantSample {
    #[serde(default)]
    pub metric: HashMap<String, String>,

    pub value: (f64, String),
}

/// A decoded series: its labels and numeric value.
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub labels: HashMap<String, String>,
    pub value: f64,
}

impl QueryResponse {
    /// Checks the envelope status and decodes the result into series.
    pub fn into_series(self) -> Result<Vec<Series>, MetricsError> {
        if self.status != "success" {
            return Err(MetricsError::BackendError {
                error_type: self.error_type.unwrap_or_else(|| self.status.clone()),
                message: self.error.unwrap_or_default(),
            });
        }
        let data = self
            .data
            .ok_or_else(|| MetricsError::MalformedResponse("missing data".into()))?;

        match data.result_type.as_str() {
            "vector" => {
                let samples: Vec<InstantSample> = serde_json::from_value(data.result)
                    .map_err(|e| MetricsError::MalformedResponse(format!("vector result: {}", e)))?;
                let mut series = Vec::with_capacity(samples.len());
                for s in samples {
                    match parse_sample_value(&s.value.1)? {
                        Some(value) => series.push(Series {
                            value,
                            labels: s.metric,
                        }),
                        None => log::warn!(
                            "Skipping series {:?} with non-finite value {}",
                            s.metric,
                            s.value.1
                        ),
                    }
                }
                Ok(series)
            }
            "scalar" => {
                let (_, value): (f64, String) = serde_json::from_value(data.result)
                    .map_err(|e| MetricsError::MalformedResponse(format!("scalar result: {}", e)))?;
                match parse_sample_value(&value)? {
                    Some(value) => Ok(vec![Series {
                        labels: HashMap::new(),
                        value,
                    }]),
                    None => {
                        log::warn!("Skipping non-finite scalar value {}", value);
                        Ok(Vec::new())
                    }
                }
            }
            other => Err(MetricsError::MalformedResponse(format!(
                "unsupported result type {}",
                other
            ))),
        }
    }
}

// NaN and ±Inf are valid samples (e.g. 0/0 inodes) and come back as None.
fn parse_sample_value(raw: &str) -> Result<Option<f64>, MetricsError> {
    match raw.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(Some(v)),
        Ok(_) => Ok(None),
        Err(_) => Err(MetricsError::MalformedResponse(format!(
            "sample value {:?} is not a number",
            raw
        ))),
    }
}
