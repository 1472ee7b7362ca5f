// Resize executor: applies an approved expansion to one claim.
use super::expandability_cache::ExpandabilityCache;
use super::quantity::format_bytes;
use super::scaling_error::ScalingError;
use super::volume_api::{VolumeApi, VolumeInfo};

/// One initial attempt plus one re-fetch-and-retry on conflict.
pub const MAX_RESIZE_ATTEMPTS: u32 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResizeOutcome {
    Resized { from: u64, to: u64 },
    /// The claim already requests at least the target size; nothing was patched.
    AlreadySatisfied { requested: u64 },
}

pub struct ResizeExecutor<'a> {
    api: &'a dyn VolumeApi,
    namespace: &'a str,
    expandability: ExpandabilityCache,
}

impl<'a> ResizeExecutor<'a> {
    /// Create an executor for one poll cycle.
    pub fn new(api: &'a dyn VolumeApi, namespace: &'a str) -> Self {
        Self {
            api,
            namespace,
            expandability: ExpandabilityCache::new(),
        }
    }

    pub async fn resize(
        &self,
        volume: &VolumeInfo,
        target: u64,
    ) -> Result<ResizeOutcome, ScalingError> {
        self.ensure_expandable(volume).await?;

        let mut current = volume.clone();
        for attempt in 1..=MAX_RESIZE_ATTEMPTS {
            let requested = current.requested_size.max(current.current_size).unwrap_or(0);
            if requested >= target {
                return Ok(ResizeOutcome::AlreadySatisfied { requested });
            }

            let result = self
                .api
                .patch_capacity(
                    self.namespace,
                    &current.name,
                    target,
                    current.resource_version.as_deref(),
                )
                .await;
            match result {
                Ok(()) => {
                    log::info!(
                        "[Resize {}/{}] volume={}/{} {} => {}",
                        attempt,
                        MAX_RESIZE_ATTEMPTS,
                        self.namespace,
                        current.name,
                        format_bytes(requested),
                        format_bytes(target)
                    );
                    return Ok(ResizeOutcome::Resized {
                        from: requested,
                        to: target,
                    });
                }
                Err(ScalingError::Conflict(_)) if attempt < MAX_RESIZE_ATTEMPTS => {
                    log::info!(
                        "Resize conflict {}/{} on {}/{}, re-reading",
                        attempt,
                        MAX_RESIZE_ATTEMPTS,
                        self.namespace,
                        current.name
                    );
                    current = self
                        .api
                        .get_volume(self.namespace, &current.name)
                        .await?
                        .ok_or_else(|| ScalingError::VolumeNotFound(current.name.clone()))?;
                }
                Err(err) => return Err(err),
            }
        }
        Err(ScalingError::Conflict(volume.name.clone()))
    }

    async fn ensure_expandable(&self, volume: &VolumeInfo) -> Result<(), ScalingError> {
        let class = volume
            .storage_class
            .as_deref()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| ScalingError::NotExpandable {
                volume: volume.name.clone(),
                reason: "claim has no storage class".into(),
            })?;
        if self.expandability.allows_expansion(class, self.api).await? {
            Ok(())
        } else {
            Err(ScalingError::NotExpandable {
                volume: volume.name.clone(),
                reason: format!("storage class {} does not allow volume expansion", class),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeVolumeApi;

    const GI: u64 = 1 << 30;

    fn setup() -> FakeVolumeApi {
        let api = FakeVolumeApi::new();
        api.set_storage_class("standard", true);
        api.add_volume("db", "data-0", &[], 100 * GI);
        api
    }

    #[tokio::test]
    async fn patches_capacity() {
        let api = setup();
        let volume = api.volume("db", "data-0").unwrap();
        let executor = ResizeExecutor::new(&api, "db");

        let outcome = executor.resize(&volume, 120 * GI).await.unwrap();
        assert_eq!(outcome, ResizeOutcome::Resized { from: 100 * GI, to: 120 * GI });
        assert_eq!(api.patches(), vec![("data-0".to_string(), 120 * GI)]);
        assert_eq!(api.volume("db", "data-0").unwrap().requested_size, Some(120 * GI));
    }

    #[tokio::test]
    async fn retries_once_after_conflict() {
        let api = setup();
        let volume = api.volume("db", "data-0").unwrap();
        api.inject_conflicts("data-0", 1);
        let executor = ResizeExecutor::new(&api, "db");

        let outcome = executor.resize(&volume, 120 * GI).await.unwrap();
        assert!(matches!(outcome, ResizeOutcome::Resized { .. }));
        assert_eq!(api.patch_attempts(), 2);
    }

    #[tokio::test]
    async fn persistent_conflict_is_reported() {
        let api = setup();
        let volume = api.volume("db", "data-0").unwrap();
        api.inject_conflicts("data-0", 5);
        let executor = ResizeExecutor::new(&api, "db");

        let err = executor.resize(&volume, 120 * GI).await.unwrap_err();
        assert!(matches!(err, ScalingError::Conflict(_)));
        assert_eq!(api.patch_attempts(), MAX_RESIZE_ATTEMPTS as usize);
        assert!(api.patches().is_empty());
    }

    #[tokio::test]
    async fn concurrent_growth_satisfies_the_target() {
        let api = setup();
        let stale = api.volume("db", "data-0").unwrap();
        // someone else grew the claim after we read it
        api.external_resize("db", "data-0", 150 * GI);
        let executor = ResizeExecutor::new(&api, "db");

        let outcome = executor.resize(&stale, 120 * GI).await.unwrap();
        assert_eq!(outcome, ResizeOutcome::AlreadySatisfied { requested: 150 * GI });
        assert!(api.patches().is_empty());
    }

    #[tokio::test]
    async fn never_issues_a_shrink() {
        let api = setup();
        let volume = api.volume("db", "data-0").unwrap();
        let executor = ResizeExecutor::new(&api, "db");

        let outcome = executor.resize(&volume, 50 * GI).await.unwrap();
        assert_eq!(outcome, ResizeOutcome::AlreadySatisfied { requested: 100 * GI });
        assert_eq!(api.patch_attempts(), 0);
    }

    #[tokio::test]
    async fn fails_closed_when_class_cannot_expand() {
        let api = setup();
        api.set_storage_class("standard", false);
        let volume = api.volume("db", "data-0").unwrap();
        let executor = ResizeExecutor::new(&api, "db");

        let err = executor.resize(&volume, 120 * GI).await.unwrap_err();
        assert!(matches!(err, ScalingError::NotExpandable { .. }));
        assert_eq!(api.patch_attempts(), 0);

        let mut classless = volume.clone();
        classless.storage_class = None;
        let err = executor.resize(&classless, 120 * GI).await.unwrap_err();
        assert!(matches!(err, ScalingError::NotExpandable { .. }));
    }

    #[tokio::test]
    async fn class_lookup_is_cached_for_the_cycle() {
        let api = setup();
        api.add_volume("db", "data-1", &[], 100 * GI);
        let executor = ResizeExecutor::new(&api, "db");

        for name in ["data-0", "data-1"] {
            let volume = api.volume("db", name).unwrap();
            executor.resize(&volume, 120 * GI).await.unwrap();
        }
        assert_eq!(api.storage_class_lookups(), 1);
    }
}
