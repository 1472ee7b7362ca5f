// Decision engine: pure function from (policy, prior observation, sample, now)
// to (decision, new observation). No I/O.
use chrono::{DateTime, Utc};

use super::scaling_config::ScalingPolicy;
use crate::crd::VolumeObservation;

/// One usage sample for one claim.
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeSample {
    pub name: String,
    /// Current capacity in bytes, `None` when the claim reports no size.
    pub current_size: Option<u64>,
    pub usage_bytes: u64,
    /// Inode usage percent, only present when the inode check is enabled.
    pub inode_percent: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Usage,
    Inodes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoOpReason {
    BelowThreshold,
    CoolingDown,
    AtMaxSize,
}

impl NoOpReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            NoOpReason::BelowThreshold => "BelowThreshold",
            NoOpReason::CoolingDown => "CoolingDown",
            NoOpReason::AtMaxSize => "AtMaxSize",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    NoOp(NoOpReason),
    Expand { new_size: u64, trigger: Trigger },
    /// The sample cannot be evaluated, e.g. the claim reports no capacity.
    Reject(String),
}

impl Decision {
    pub fn reason(&self) -> &'static str {
        match self {
            Decision::NoOp(reason) => reason.as_str(),
            Decision::Expand { .. } => "Expanded",
            Decision::Reject(_) => "InvalidCapacity",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub decision: Decision,
    /// Fresh observation. Scale history is carried over from the prior one;
    /// the caller records a new expansion only once the resize succeeded.
    pub observation: VolumeObservation,
}

pub fn usage_percent(usage_bytes: u64, capacity_bytes: u64) -> f64 {
    if capacity_bytes == 0 {
        return 0.0;
    }
    usage_bytes as f64 / capacity_bytes as f64 * 100.0
}

/// `current + max(ceil(current * increase% / 100), increaseMinimum)`, clamped to `maxSize`.
pub fn next_size(current: u64, policy: &ScalingPolicy) -> u64 {
    let percent_delta =
        (current as u128 * policy.increase_percent as u128).div_ceil(100) as u64;
    let delta = percent_delta.max(policy.increase_minimum);
    current.saturating_add(delta).min(policy.max_size)
}

/// Picks the trigger with the larger margin over its threshold; ties go to usage.
fn trigger(policy: &ScalingPolicy, usage_pct: f64, inode_pct: Option<f64>) -> Option<Trigger> {
    let usage_margin = usage_pct - policy.threshold_percent as f64;
    let inode_margin = match inode_pct {
        Some(pct) if policy.inode_check_enabled() => Some(pct - policy.inode_threshold_percent as f64),
        _ => None,
    };
    match (usage_margin >= 0.0, inode_margin.filter(|m| *m >= 0.0)) {
        (true, Some(inode)) if inode > usage_margin => Some(Trigger::Inodes),
        (true, _) => Some(Trigger::Usage),
        (false, Some(_)) => Some(Trigger::Inodes),
        (false, None) => None,
    }
}

pub fn evaluate(
    policy: &ScalingPolicy,
    prior: Option<&VolumeObservation>,
    sample: &VolumeSample,
    now: DateTime<Utc>,
) -> Evaluation {
    let current = sample.current_size.unwrap_or(0);
    let usage_pct = usage_percent(sample.usage_bytes, current);
    let mut observation = VolumeObservation {
        name: sample.name.clone(),
        current_size: current,
        usage_bytes: sample.usage_bytes,
        usage_percent: usage_pct,
        inode_percent: sample.inode_percent,
        last_scale_time: prior.and_then(|p| p.last_scale_time),
        last_scale_size: prior.and_then(|p| p.last_scale_size),
        reason: String::new(),
    };

    let decision = decide(policy, &observation, sample, now);
    observation.reason = decision.reason().to_string();
    Evaluation {
        decision,
        observation,
    }
}

fn decide(
    policy: &ScalingPolicy,
    observation: &VolumeObservation,
    sample: &VolumeSample,
    now: DateTime<Utc>,
) -> Decision {
    let current = match sample.current_size {
        Some(size) if size > 0 => size,
        _ => return Decision::Reject(format!("volume {} reports no capacity", sample.name)),
    };

    let trigger = match trigger(policy, observation.usage_percent, sample.inode_percent) {
        Some(trigger) => trigger,
        None => return Decision::NoOp(NoOpReason::BelowThreshold),
    };

    // A claim sitting on the ceiling reports AtMaxSize on every triggering
    // cycle, cooldown or not.
    if current >= policy.max_size {
        return Decision::NoOp(NoOpReason::AtMaxSize);
    }

    if let Some(last) = observation.last_scale_time {
        let elapsed = now.signed_duration_since(last);
        let cooldown = chrono::Duration::from_std(policy.cooldown_period)
            .unwrap_or(chrono::Duration::MAX);
        if elapsed < cooldown {
            return Decision::NoOp(NoOpReason::CoolingDown);
        }
    }

    let new_size = next_size(current, policy);
    if new_size <= current {
        return Decision::NoOp(NoOpReason::AtMaxSize);
    }
    Decision::Expand { new_size, trigger }
}
