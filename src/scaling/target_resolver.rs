// Target resolver: expands an intent target into the claims present right now.
use super::scaling_error::ScalingError;
use super::volume_api::{VolumeApi, VolumeInfo};
use crate::crd::{SelectorRequirement, VolumeSelector, VolumeTarget};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedTarget {
    Named(String),
    /// A label-selector query string, e.g. `app=db,tier in (hot)`.
    Selector(String),
}

/// Exactly one of `volumeName` / `selector` must be set.
pub fn validate_target(target: &VolumeTarget) -> Result<ResolvedTarget, ScalingError> {
    match (&target.volume_name, &target.selector) {
        (Some(_), Some(_)) => Err(ScalingError::InvalidTarget(
            "volumeName and selector are mutually exclusive".into(),
        )),
        (None, None) => Err(ScalingError::InvalidTarget(
            "one of volumeName or selector is required".into(),
        )),
        (Some(name), None) => {
            let name = name.trim();
            if name.is_empty() {
                return Err(ScalingError::InvalidTarget("volumeName is empty".into()));
            }
            Ok(ResolvedTarget::Named(name.to_string()))
        }
        (None, Some(selector)) => selector_string(selector).map(ResolvedTarget::Selector),
    }
}

pub fn selector_string(selector: &VolumeSelector) -> Result<String, ScalingError> {
    let mut terms: Vec<String> = selector
        .match_labels
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect();
    for requirement in &selector.match_expressions {
        terms.push(requirement_term(requirement)?);
    }
    if terms.is_empty() {
        // an empty selector would match every claim in the namespace
        return Err(ScalingError::InvalidTarget("selector has no requirements".into()));
    }
    Ok(terms.join(","))
}

fn requirement_term(req: &SelectorRequirement) -> Result<String, ScalingError> {
    let invalid = |msg: &str| {
        ScalingError::InvalidTarget(format!("selector requirement on {:?}: {}", req.key, msg))
    };
    if req.key.trim().is_empty() {
        return Err(invalid("empty key"));
    }
    match req.operator.as_str() {
        "In" | "NotIn" if req.values.is_empty() => Err(invalid("values required")),
        "In" => Ok(format!("{} in ({})", req.key, req.values.join(","))),
        "NotIn" => Ok(format!("{} notin ({})", req.key, req.values.join(","))),
        "Exists" | "DoesNotExist" if !req.values.is_empty() => Err(invalid("values not allowed")),
        "Exists" => Ok(req.key.clone()),
        "DoesNotExist" => Ok(format!("!{}", req.key)),
        other => Err(invalid(&format!("unknown operator {}", other))),
    }
}

/// Lists the claims matching `target`, ordered by name. An empty result is not an error.
pub async fn resolve_targets(
    api: &dyn VolumeApi,
    namespace: &str,
    target: &ResolvedTarget,
) -> Result<Vec<VolumeInfo>, ScalingError> {
    let mut volumes = match target {
        ResolvedTarget::Named(name) => api.get_volume(namespace, name).await?.into_iter().collect(),
        ResolvedTarget::Selector(selector) => api.list_volumes(namespace, selector).await?,
    };
    volumes.sort_by(|a, b| a.name.cmp(&b.name));
    volumes.dedup_by(|a, b| a.name == b.name);
    Ok(volumes)
}
