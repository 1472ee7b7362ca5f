// Volume API: the narrow slice of the Kubernetes API the controller needs.
use async_trait::async_trait;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use k8s_openapi::api::storage::v1::StorageClass;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::{Client, ResourceExt};

use super::quantity::{format_bytes, parse_quantity};
use super::scaling_error::ScalingError;

const STORAGE: &str = "storage";

/// The parts of a PersistentVolumeClaim the controller looks at. Sizes are bytes.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VolumeInfo {
    pub name: String,
    pub storage_class: Option<String>,
    /// `status.capacity.storage`, falling back to the request when unset.
    pub current_size: Option<u64>,
    pub requested_size: Option<u64>,
    pub bound: bool,
    pub resize_in_progress: bool,
    pub resource_version: Option<String>,
}

#[async_trait]
pub trait VolumeApi: Send + Sync {
    async fn list_volumes(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<VolumeInfo>, ScalingError>;

    async fn get_volume(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<VolumeInfo>, ScalingError>;

    /// `allowVolumeExpansion` of the class; a missing class is not expandable.
    async fn storage_class_allows_expansion(&self, class: &str) -> Result<bool, ScalingError>;

    /// Sets `spec.resources.requests.storage`. When `resource_version` is given
    /// the server rejects the patch with [`ScalingError::Conflict`] if the
    /// claim changed since it was read.
    async fn patch_capacity(
        &self,
        namespace: &str,
        name: &str,
        new_size: u64,
        resource_version: Option<&str>,
    ) -> Result<(), ScalingError>;
}

#[derive(Clone)]
pub struct KubeVolumeApi {
    client: Client,
    field_manager: String,
}

impl KubeVolumeApi {
    pub fn new(client: Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
        }
    }

    fn claims(&self, namespace: &str) -> Api<PersistentVolumeClaim> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl VolumeApi for KubeVolumeApi {
    async fn list_volumes(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<VolumeInfo>, ScalingError> {
        let params = ListParams::default().labels(label_selector);
        let claims = self.claims(namespace).list(&params).await?;
        Ok(claims.items.iter().map(volume_info).collect())
    }

    async fn get_volume(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<VolumeInfo>, ScalingError> {
        let claim = self.claims(namespace).get_opt(name).await?;
        Ok(claim.as_ref().map(volume_info))
    }

    async fn storage_class_allows_expansion(&self, class: &str) -> Result<bool, ScalingError> {
        let classes: Api<StorageClass> = Api::all(self.client.clone());
        let class = classes.get_opt(class).await?;
        Ok(class.and_then(|c| c.allow_volume_expansion).unwrap_or(false))
    }

    async fn patch_capacity(
        &self,
        namespace: &str,
        name: &str,
        new_size: u64,
        resource_version: Option<&str>,
    ) -> Result<(), ScalingError> {
        let patch = capacity_patch(new_size, resource_version);
        let params = PatchParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        };
        match self
            .claims(namespace)
            .patch(name, &params, &Patch::Merge(&patch))
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(resp)) if resp.code == 409 => {
                Err(ScalingError::Conflict(name.to_string()))
            }
            Err(kube::Error::Api(resp)) if resp.code == 404 => {
                Err(ScalingError::VolumeNotFound(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Merge patch touching only the storage request (and the optimistic lock).
pub fn capacity_patch(new_size: u64, resource_version: Option<&str>) -> serde_json::Value {
    let mut patch = serde_json::json!({
        "spec": {"resources": {"requests": {"storage": format_bytes(new_size)}}}
    });
    if let Some(rv) = resource_version {
        patch["metadata"] = serde_json::json!({ "resourceVersion": rv });
    }
    patch
}

pub fn volume_info(claim: &PersistentVolumeClaim) -> VolumeInfo {
    let spec = claim.spec.as_ref();
    let status = claim.status.as_ref();

    let requested_size = spec
        .and_then(|s| s.resources.as_ref())
        .and_then(|r| r.requests.as_ref())
        .and_then(|r| r.get(STORAGE))
        .and_then(|q| parse_size(&claim.name_any(), &q.0));
    let capacity = status
        .and_then(|s| s.capacity.as_ref())
        .and_then(|c| c.get(STORAGE))
        .and_then(|q| parse_size(&claim.name_any(), &q.0));

    let resizing_condition = status
        .and_then(|s| s.conditions.as_ref())
        .map(|conds| {
            conds.iter().any(|c| {
                (c.type_ == "Resizing" || c.type_ == "FileSystemResizePending") && c.status == "True"
            })
        })
        .unwrap_or(false);
    let request_ahead = matches!((requested_size, capacity), (Some(req), Some(cap)) if req > cap);

    VolumeInfo {
        name: claim.name_any(),
        storage_class: spec.and_then(|s| s.storage_class_name.clone()),
        current_size: capacity.or(requested_size),
        requested_size,
        bound: status.and_then(|s| s.phase.as_deref()) == Some("Bound"),
        resize_in_progress: resizing_condition || request_ahead,
        resource_version: claim.resource_version(),
    }
}

fn parse_size(name: &str, raw: &str) -> Option<u64> {
    match parse_quantity(raw) {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            log::warn!("Volume {} has unparseable size {:?}: {}", name, raw, e);
            None
        }
    }
}
