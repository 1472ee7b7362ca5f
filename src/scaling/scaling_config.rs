use std::time::Duration;

use super::quantity::parse_quantity;
use super::scaling_error::ScalingError;
use crate::crd::VolumeAutoscalerSpec;

pub const DEFAULT_THRESHOLD_PERCENT: u32 = 80;
pub const DEFAULT_INODE_THRESHOLD_PERCENT: u32 = 0;
pub const DEFAULT_INCREASE_PERCENT: u32 = 20;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_COOLDOWN_PERIOD: Duration = Duration::from_secs(5 * 60);

/// Validated autoscaling policy of one intent. Sizes are bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalingPolicy {
    pub threshold_percent: u32,
    pub inode_threshold_percent: u32,
    pub max_size: u64,
    pub increase_percent: u32,
    pub increase_minimum: u64,
    pub poll_interval: Duration,
    pub cooldown_period: Duration,
    pub metrics_endpoint: Option<String>,
}

impl ScalingPolicy {
    /// Applies defaults and range checks to an intent spec.
    pub fn from_spec(spec: &VolumeAutoscalerSpec) -> Result<Self, ScalingError> {
        let threshold_percent = parse_percent(
            spec.threshold_percent,
            "thresholdPercent",
            DEFAULT_THRESHOLD_PERCENT,
            1..=99,
        )?;
        let inode_threshold_percent = parse_percent(
            spec.inode_threshold_percent,
            "inodeThresholdPercent",
            DEFAULT_INODE_THRESHOLD_PERCENT,
            0..=99,
        )?;
        let increase_percent = parse_percent(
            spec.increase_percent,
            "increasePercent",
            DEFAULT_INCREASE_PERCENT,
            1..=100,
        )?;

        let max_size = spec
            .max_size
            .as_deref()
            .ok_or_else(|| ScalingError::InvalidSpec("maxSize is required".into()))
            .and_then(|v| parse_field(v, "maxSize", parse_quantity))?;
        if max_size == 0 {
            return Err(ScalingError::InvalidSpec("maxSize must be positive".into()));
        }

        let increase_minimum = spec
            .increase_minimum
            .as_deref()
            .map(|v| parse_field(v, "increaseMinimum", parse_quantity))
            .transpose()?
            .unwrap_or(0);

        let poll_interval = spec
            .poll_interval
            .as_deref()
            .map(|v| parse_field(v, "pollInterval", humantime::parse_duration))
            .transpose()?
            .unwrap_or(DEFAULT_POLL_INTERVAL);
        if poll_interval.is_zero() {
            return Err(ScalingError::InvalidSpec("pollInterval must be positive".into()));
        }

        let cooldown_period = spec
            .cooldown_period
            .as_deref()
            .map(|v| parse_field(v, "cooldownPeriod", humantime::parse_duration))
            .transpose()?
            .unwrap_or(DEFAULT_COOLDOWN_PERIOD);

        let metrics_endpoint = spec
            .metrics_endpoint
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string);

        Ok(ScalingPolicy {
            threshold_percent,
            inode_threshold_percent,
            max_size,
            increase_percent,
            increase_minimum,
            poll_interval,
            cooldown_period,
            metrics_endpoint,
        })
    }

    pub fn inode_check_enabled(&self) -> bool {
        self.inode_threshold_percent > 0
    }
}

fn parse_percent(
    value: Option<u32>,
    key: &str,
    default: u32,
    range: std::ops::RangeInclusive<u32>,
) -> Result<u32, ScalingError> {
    let value = value.unwrap_or(default);
    if !range.contains(&value) {
        return Err(ScalingError::InvalidSpec(format!(
            "{} {} out of range {}-{}",
            key,
            value,
            range.start(),
            range.end()
        )));
    }
    Ok(value)
}

fn parse_field<T, E: std::fmt::Display>(
    value: &str,
    key: &str,
    parse: impl Fn(&str) -> Result<T, E>,
) -> Result<T, ScalingError> {
    parse(value).map_err(|e| ScalingError::InvalidSpec(format!("Invalid {} value {:?}: {}", key, value, e)))
}
