//! The `VolumeAutoscaler` custom resource.
//!
//! The spec is read-only input. The status subtree is owned by the poll loop
//! of the object and is replaced on every write.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "storage.autoscaler.dev",
    version = "v1alpha1",
    kind = "VolumeAutoscaler",
    plural = "volumeautoscalers",
    shortname = "vas",
    namespaced,
    status = "VolumeAutoscalerStatus",
    printcolumn = r#"{"name":"Max", "type":"string", "jsonPath":".spec.maxSize"}"#,
    printcolumn = r#"{"name":"Scale Events", "type":"integer", "jsonPath":".status.totalScaleEvents"}"#,
    printcolumn = r#"{"name":"Last Poll", "type":"date", "jsonPath":".status.lastPollTime"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct VolumeAutoscalerSpec {
    /// Which claims to manage. Exactly one of `volumeName` or `selector`.
    pub target: VolumeTarget,

    /// Usage percent that triggers an expansion, 1-99. Defaults to 80.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold_percent: Option<u32>,

    /// Inode usage percent that triggers an expansion, 0-99. 0 disables the check.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inode_threshold_percent: Option<u32>,

    /// Hard ceiling for the claim size, as a quantity. Required.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_size: Option<String>,

    /// Relative growth per expansion, 1-100. Defaults to 20.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub increase_percent: Option<u32>,

    /// Absolute floor for the growth per expansion, as a quantity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub increase_minimum: Option<String>,

    /// Poll interval such as "60s". Defaults to 60s.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_interval: Option<String>,

    /// Minimum spacing between expansions of one claim, such as "5m". Defaults to 5m.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_period: Option<String>,

    /// Base URL of the Prometheus-compatible metrics backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics_endpoint: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VolumeTarget {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<VolumeSelector>,
}

/// Label selector over PersistentVolumeClaims.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSelector {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub match_labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_expressions: Vec<SelectorRequirement>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SelectorRequirement {
    pub key: String,
    /// One of In, NotIn, Exists, DoesNotExist.
    pub operator: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VolumeAutoscalerStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_poll_time: Option<DateTime<Utc>>,

    #[serde(default)]
    pub volumes: Vec<VolumeObservation>,

    #[serde(default)]
    pub total_scale_events: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl VolumeAutoscalerStatus {
    pub fn volume(&self, name: &str) -> Option<&VolumeObservation> {
        self.volumes.iter().find(|v| v.name == name)
    }

    pub fn condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    /// "True" or "False".
    pub status: String,
    pub reason: String,
    #[serde(default)]
    pub message: String,
    pub last_transition_time: DateTime<Utc>,
}

/// Per-claim observation, sizes in bytes.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VolumeObservation {
    pub name: String,
    pub current_size: u64,
    pub usage_bytes: u64,
    pub usage_percent: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inode_percent: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_scale_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_scale_size: Option<u64>,
    /// Outcome of the last evaluation, e.g. BelowThreshold or AtMaxSize.
    #[serde(default)]
    pub reason: String,
}

impl VolumeObservation {
    /// Records a successful expansion, overwriting the previous scale history.
    /// `current_size` stays the observed capacity until the claim reports the new one.
    pub fn record_expansion(&mut self, new_size: u64, at: DateTime<Utc>) {
        self.last_scale_time = Some(at);
        self.last_scale_size = Some(new_size);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::CustomResourceExt;

    #[test]
    fn spec_deserializes_from_camel_case() {
        let spec: VolumeAutoscalerSpec = serde_json::from_value(serde_json::json!({
            "target": {"selector": {"matchLabels": {"app": "db"}}},
            "thresholdPercent": 75,
            "maxSize": "200Gi",
            "increaseMinimum": "10Gi",
            "cooldownPeriod": "10m"
        }))
        .unwrap();
        assert_eq!(spec.threshold_percent, Some(75));
        assert_eq!(spec.max_size.as_deref(), Some("200Gi"));
        assert_eq!(spec.cooldown_period.as_deref(), Some("10m"));
        assert!(spec.target.volume_name.is_none());
        let selector = spec.target.selector.unwrap();
        assert_eq!(selector.match_labels.get("app").map(String::as_str), Some("db"));
    }

    #[test]
    fn status_round_trips_condition_type_field() {
        let status = VolumeAutoscalerStatus {
            conditions: vec![Condition {
                type_: "Ready".into(),
                status: "True".into(),
                reason: "Reconciled".into(),
                message: String::new(),
                last_transition_time: Utc::now(),
            }],
            ..Default::default()
        };
        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value["conditions"][0]["type"], "Ready");
        assert_eq!(value["totalScaleEvents"], 0);
    }

    #[test]
    fn expansion_keeps_observed_capacity() {
        let at = Utc::now();
        let mut observation = VolumeObservation {
            name: "data-0".into(),
            current_size: 100,
            usage_bytes: 85,
            usage_percent: 85.0,
            ..Default::default()
        };
        observation.record_expansion(120, at);
        assert_eq!(observation.current_size, 100);
        assert_eq!(observation.usage_percent, 85.0);
        assert_eq!(observation.last_scale_size, Some(120));
        assert_eq!(observation.last_scale_time, Some(at));
    }

    #[test]
    fn crd_is_namespaced_with_status() {
        let crd = VolumeAutoscaler::crd();
        assert_eq!(crd.spec.scope, "Namespaced");
        assert_eq!(crd.spec.names.kind, "VolumeAutoscaler");
        let version = &crd.spec.versions[0];
        assert!(version.subresources.as_ref().and_then(|s| s.status.as_ref()).is_some());
    }
}
