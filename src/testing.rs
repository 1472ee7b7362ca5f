// In-memory fakes of the controller's collaborators.
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;

use crate::crd::VolumeAutoscalerStatus;
use crate::metrics::query_client::{MetricsError, MetricsQuery};
use crate::reconciler::events::{EventSink, ScaleEvent};
use crate::reconciler::status::StatusSink;
use crate::scaling::scaling_error::ScalingError;
use crate::scaling::volume_api::{VolumeApi, VolumeInfo};

struct FakeClaim {
    info: VolumeInfo,
    labels: HashMap<String, String>,
    revision: u64,
}

#[derive(Default)]
pub struct FakeVolumeApi {
    claims: Mutex<BTreeMap<(String, String), FakeClaim>>,
    classes: Mutex<HashMap<String, bool>>,
    conflicts: Mutex<HashMap<String, usize>>,
    patches: Mutex<Vec<(String, u64)>>,
    patch_attempts: Mutex<usize>,
    class_lookups: Mutex<usize>,
    list_failure: Mutex<Option<String>>,
}

impl FakeVolumeApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a bound claim of class "standard" whose capacity equals its request.
    pub fn add_volume(&self, namespace: &str, name: &str, labels: &[(&str, &str)], size: u64) {
        let claim = FakeClaim {
            info: VolumeInfo {
                name: name.to_string(),
                storage_class: Some("standard".into()),
                current_size: Some(size),
                requested_size: Some(size),
                bound: true,
                resize_in_progress: false,
                resource_version: Some("1".into()),
            },
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            revision: 1,
        };
        self.claims
            .lock()
            .unwrap()
            .insert((namespace.to_string(), name.to_string()), claim);
    }

    pub fn update_volume(&self, namespace: &str, name: &str, f: impl FnOnce(&mut VolumeInfo)) {
        let mut claims = self.claims.lock().unwrap();
        if let Some(claim) = claims.get_mut(&(namespace.to_string(), name.to_string())) {
            f(&mut claim.info);
            bump(claim);
        }
    }

    pub fn volume(&self, namespace: &str, name: &str) -> Option<VolumeInfo> {
        self.claims
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .map(|c| c.info.clone())
    }

    pub fn remove_volume(&self, namespace: &str, name: &str) {
        self.claims
            .lock()
            .unwrap()
            .remove(&(namespace.to_string(), name.to_string()));
    }

    /// Simulates another actor growing the claim.
    pub fn external_resize(&self, namespace: &str, name: &str, size: u64) {
        self.update_volume(namespace, name, |info| {
            info.requested_size = Some(size);
            info.current_size = Some(size);
        });
    }

    /// Every list call fails with a 503 from the API server until cleared.
    pub fn fail_list(&self, message: Option<&str>) {
        *self.list_failure.lock().unwrap() = message.map(str::to_string);
    }

    pub fn set_storage_class(&self, class: &str, allow_expansion: bool) {
        self.classes
            .lock()
            .unwrap()
            .insert(class.to_string(), allow_expansion);
    }

    /// The next `count` patches of `name` fail with a conflict.
    pub fn inject_conflicts(&self, name: &str, count: usize) {
        self.conflicts.lock().unwrap().insert(name.to_string(), count);
    }

    /// Successful patches as (claim, new size).
    pub fn patches(&self) -> Vec<(String, u64)> {
        self.patches.lock().unwrap().clone()
    }

    pub fn patch_attempts(&self) -> usize {
        *self.patch_attempts.lock().unwrap()
    }

    pub fn storage_class_lookups(&self) -> usize {
        *self.class_lookups.lock().unwrap()
    }
}

fn bump(claim: &mut FakeClaim) {
    claim.revision += 1;
    claim.info.resource_version = Some(claim.revision.to_string());
}

// Equality terms only ("k=v,k2=v2").
fn matches_selector(labels: &HashMap<String, String>, selector: &str) -> bool {
    selector.split(',').all(|term| match term.split_once('=') {
        Some((k, v)) => labels.get(k.trim()).map(String::as_str) == Some(v.trim()),
        None => labels.contains_key(term.trim()),
    })
}

#[async_trait]
impl VolumeApi for FakeVolumeApi {
    async fn list_volumes(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<VolumeInfo>, ScalingError> {
        if let Some(message) = self.list_failure.lock().unwrap().clone() {
            return Err(ScalingError::Kube(kube::Error::Api(kube::core::ErrorResponse {
                status: "Failure".into(),
                message,
                reason: "ServiceUnavailable".into(),
                code: 503,
            })));
        }
        Ok(self
            .claims
            .lock()
            .unwrap()
            .iter()
            .filter(|((ns, _), claim)| ns == namespace && matches_selector(&claim.labels, label_selector))
            .map(|(_, claim)| claim.info.clone())
            .collect())
    }

    async fn get_volume(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<VolumeInfo>, ScalingError> {
        Ok(self.volume(namespace, name))
    }

    async fn storage_class_allows_expansion(&self, class: &str) -> Result<bool, ScalingError> {
        *self.class_lookups.lock().unwrap() += 1;
        Ok(self.classes.lock().unwrap().get(class).copied().unwrap_or(false))
    }

    async fn patch_capacity(
        &self,
        namespace: &str,
        name: &str,
        new_size: u64,
        resource_version: Option<&str>,
    ) -> Result<(), ScalingError> {
        *self.patch_attempts.lock().unwrap() += 1;
        let mut claims = self.claims.lock().unwrap();
        let claim = claims
            .get_mut(&(namespace.to_string(), name.to_string()))
            .ok_or_else(|| ScalingError::VolumeNotFound(name.to_string()))?;

        let mut conflicts = self.conflicts.lock().unwrap();
        if let Some(remaining) = conflicts.get_mut(name).filter(|r| **r > 0) {
            *remaining -= 1;
            bump(claim);
            return Err(ScalingError::Conflict(name.to_string()));
        }
        if let Some(rv) = resource_version {
            if claim.info.resource_version.as_deref() != Some(rv) {
                return Err(ScalingError::Conflict(name.to_string()));
            }
        }
        // the fake provisioner resizes instantly
        claim.info.requested_size = Some(new_size);
        claim.info.current_size = Some(new_size);
        bump(claim);
        self.patches.lock().unwrap().push((name.to_string(), new_size));
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeMetrics {
    usage: Mutex<HashMap<String, f64>>,
    inodes: Mutex<HashMap<String, f64>>,
    failure: Mutex<Option<String>>,
    queries: Mutex<Vec<String>>,
}

impl FakeMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_usage(&self, name: &str, bytes: f64) {
        self.usage.lock().unwrap().insert(name.to_string(), bytes);
    }

    pub fn set_inode_percent(&self, name: &str, percent: f64) {
        self.inodes.lock().unwrap().insert(name.to_string(), percent);
    }

    /// Every query fails with a transport error until cleared.
    pub fn fail(&self, message: Option<&str>) {
        *self.failure.lock().unwrap() = message.map(str::to_string);
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }

    fn series_for(&self, expr: &str) -> Result<HashMap<String, f64>, MetricsError> {
        self.queries.lock().unwrap().push(expr.to_string());
        if let Some(message) = self.failure.lock().unwrap().clone() {
            return Err(MetricsError::Transport(message));
        }
        let source = if expr.contains("inodes") {
            &self.inodes
        } else {
            &self.usage
        };
        Ok(source
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _)| expr.contains(name.as_str()))
            .map(|(name, value)| (name.clone(), *value))
            .collect())
    }
}

#[async_trait]
impl MetricsQuery for FakeMetrics {
    async fn query_scalar(&self, expr: &str) -> Result<f64, MetricsError> {
        let series = self.series_for(expr)?;
        let mut values = series.values();
        match (values.next(), values.next()) {
            (None, _) => Err(MetricsError::NoResult(expr.to_string())),
            (Some(value), None) => Ok(*value),
            (Some(_), Some(_)) => Err(MetricsError::AmbiguousResult {
                expr: expr.to_string(),
                count: series.len(),
            }),
        }
    }

    async fn query_vector(
        &self,
        expr: &str,
        _label_key: &str,
    ) -> Result<HashMap<String, f64>, MetricsError> {
        self.series_for(expr)
    }
}

#[derive(Default)]
pub struct FakeStatusSink {
    writes: Mutex<Vec<VolumeAutoscalerStatus>>,
}

impl FakeStatusSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn writes(&self) -> Vec<VolumeAutoscalerStatus> {
        self.writes.lock().unwrap().clone()
    }
}

#[async_trait]
impl StatusSink for FakeStatusSink {
    async fn write_status(
        &self,
        _namespace: &str,
        _name: &str,
        status: &VolumeAutoscalerStatus,
    ) -> Result<(), ScalingError> {
        self.writes.lock().unwrap().push(status.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeEventSink {
    events: Mutex<Vec<ScaleEvent>>,
    delay: Option<Duration>,
}

impl FakeEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every publish sleeps for `delay` before it is recorded.
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn events(&self) -> Vec<ScaleEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventSink for FakeEventSink {
    async fn publish(&self, _reference: &ObjectReference, event: ScaleEvent) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.events.lock().unwrap().push(event);
    }
}
