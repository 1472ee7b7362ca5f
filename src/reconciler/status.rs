// Status subtree writer and condition bookkeeping.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kube::api::{Api, Patch, PatchParams};
use kube::Client;

use crate::crd::{Condition, VolumeAutoscaler, VolumeAutoscalerStatus};
use crate::scaling::scaling_error::ScalingError;

pub const CONDITION_READY: &str = "Ready";
pub const CONDITION_METRICS_AVAILABLE: &str = "MetricsAvailable";
pub const CONDITION_AT_MAX_SIZE: &str = "AtMaxSize";
pub const CONDITION_INVALID_SPEC: &str = "InvalidSpec";

#[async_trait]
pub trait StatusSink: Send + Sync {
    async fn write_status(
        &self,
        namespace: &str,
        name: &str,
        status: &VolumeAutoscalerStatus,
    ) -> Result<(), ScalingError>;
}

pub struct KubeStatusSink {
    client: Client,
    field_manager: String,
}

impl KubeStatusSink {
    pub fn new(client: Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
        }
    }
}

#[async_trait]
impl StatusSink for KubeStatusSink {
    async fn write_status(
        &self,
        namespace: &str,
        name: &str,
        status: &VolumeAutoscalerStatus,
    ) -> Result<(), ScalingError> {
        let api: Api<VolumeAutoscaler> = Api::namespaced(self.client.clone(), namespace);
        let params = PatchParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        };
        let patch = serde_json::json!({ "status": status });
        api.patch_status(name, &params, &Patch::Merge(&patch)).await?;
        Ok(())
    }
}

/// Upserts a condition. `lastTransitionTime` only moves when the status flips.
pub fn set_condition(
    conditions: &mut Vec<Condition>,
    type_: &str,
    status: bool,
    reason: &str,
    message: impl Into<String>,
    now: DateTime<Utc>,
) {
    let status = if status { "True" } else { "False" };
    let message = message.into();
    match conditions.iter_mut().find(|c| c.type_ == type_) {
        Some(existing) => {
            if existing.status != status {
                existing.status = status.to_string();
                existing.last_transition_time = now;
            }
            existing.reason = reason.to_string();
            existing.message = message;
        }
        None => conditions.push(Condition {
            type_: type_.to_string(),
            status: status.to_string(),
            reason: reason.to_string(),
            message,
            last_transition_time: now,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn transition_time_moves_only_on_flip() {
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let t1 = t0 + chrono::Duration::minutes(1);
        let t2 = t0 + chrono::Duration::minutes(2);
        let mut conditions = Vec::new();

        set_condition(&mut conditions, CONDITION_READY, true, "Reconciled", "", t0);
        set_condition(&mut conditions, CONDITION_READY, true, "Reconciled", "2 volumes", t1);
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].last_transition_time, t0);
        assert_eq!(conditions[0].message, "2 volumes");

        set_condition(&mut conditions, CONDITION_READY, false, "MetricsUnavailable", "down", t2);
        assert_eq!(conditions[0].status, "False");
        assert_eq!(conditions[0].reason, "MetricsUnavailable");
        assert_eq!(conditions[0].last_transition_time, t2);
    }

    #[test]
    fn keeps_insertion_order() {
        let now = Utc::now();
        let mut conditions = Vec::new();
        set_condition(&mut conditions, CONDITION_READY, true, "Reconciled", "", now);
        set_condition(&mut conditions, CONDITION_AT_MAX_SIZE, false, "BelowMaxSize", "", now);
        set_condition(&mut conditions, CONDITION_READY, false, "DeadlineExceeded", "", now);
        let types: Vec<_> = conditions.iter().map(|c| c.type_.as_str()).collect();
        assert_eq!(types, vec![CONDITION_READY, CONDITION_AT_MAX_SIZE]);
    }
}
