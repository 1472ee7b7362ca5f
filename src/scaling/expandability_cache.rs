// Per-cycle cache of StorageClass expandability lookups.
use dashmap::DashMap;

use super::scaling_error::ScalingError;
use super::volume_api::VolumeApi;

/// Lives for a single poll cycle, so no expiry is needed.
#[derive(Default)]
pub struct ExpandabilityCache {
    cache: DashMap<String, bool>,
}

impl ExpandabilityCache {
    pub fn new() -> Self {
        Self {
            cache: DashMap::new(),
        }
    }

    pub async fn allows_expansion(
        &self,
        class: &str,
        api: &dyn VolumeApi,
    ) -> Result<bool, ScalingError> {
        if let Some(entry) = self.cache.get(class) {
            return Ok(*entry);
        }
        let allowed = api.storage_class_allows_expansion(class).await?;
        self.cache.insert(class.to_string(), allowed);
        Ok(allowed)
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }
}
