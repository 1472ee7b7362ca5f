//! One poll loop per `VolumeAutoscaler`.
//!
//! Every tick runs resolve → query → decide → resize → write status, strictly
//! in that order. The loop owns the status subtree of its intent; nothing else
//! writes it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::ObjectReference;
use kube::{Resource, ResourceExt};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::events::{EventSink, ScaleEvent};
use super::status::{
    set_condition, StatusSink, CONDITION_AT_MAX_SIZE, CONDITION_INVALID_SPEC,
    CONDITION_METRICS_AVAILABLE, CONDITION_READY,
};
use crate::crd::{VolumeAutoscaler, VolumeAutoscalerStatus, VolumeObservation};
use crate::metrics::operational;
use crate::metrics::query_client::{MetricsError, MetricsQuery};
use crate::metrics::volume_queries::{inode_percent_query, usage_query, CLAIM_LABEL};
use crate::scaling::decision::{self, Decision, NoOpReason, VolumeSample};
use crate::scaling::quantity::format_bytes;
use crate::scaling::resize_executor::{ResizeExecutor, ResizeOutcome};
use crate::scaling::scaling_config::{ScalingPolicy, DEFAULT_POLL_INTERVAL};
use crate::scaling::scaling_error::ScalingError;
use crate::scaling::target_resolver::{resolve_targets, validate_target, ResolvedTarget};
use crate::scaling::volume_api::{VolumeApi, VolumeInfo};

/// Shared collaborators handed to every loop.
#[derive(Clone)]
pub struct LoopContext {
    pub volumes: Arc<dyn VolumeApi>,
    pub status: Arc<dyn StatusSink>,
    pub events: Arc<dyn EventSink>,
    /// Fraction of the poll interval a cycle may take.
    pub cycle_deadline_ratio: f64,
}

struct LoopSetup {
    policy: ScalingPolicy,
    target: ResolvedTarget,
    metrics: Arc<dyn MetricsQuery>,
}

enum CycleError {
    Config(ScalingError),
    Platform(ScalingError),
    Metrics(MetricsError),
}

impl From<ScalingError> for CycleError {
    fn from(err: ScalingError) -> Self {
        if err.is_configuration() {
            CycleError::Config(err)
        } else {
            CycleError::Platform(err)
        }
    }
}

#[derive(Default)]
struct CycleProgress {
    observations: Vec<VolumeObservation>,
    scale_events: u64,
    at_max: Vec<String>,
}

pub struct PollLoop {
    namespace: String,
    name: String,
    generation: Option<i64>,
    reference: ObjectReference,
    setup: Result<LoopSetup, ScalingError>,
    ctx: LoopContext,
    status: VolumeAutoscalerStatus,
}

impl PollLoop {
    /// Validates the intent once. A configuration error does not stop the
    /// loop; it is reported on every cycle until the spec changes.
    pub fn new<F>(
        intent: &VolumeAutoscaler,
        ctx: LoopContext,
        default_endpoint: Option<&str>,
        connect: F,
    ) -> Self
    where
        F: FnOnce(&str) -> Result<Arc<dyn MetricsQuery>, MetricsError>,
    {
        let setup = build_setup(intent, default_endpoint, connect);
        if let Err(e) = &setup {
            log::warn!(
                "VolumeAutoscaler {}/{} is misconfigured: {}",
                intent.namespace().unwrap_or_default(),
                intent.name_any(),
                e
            );
        }
        Self {
            namespace: intent.namespace().unwrap_or_default(),
            name: intent.name_any(),
            generation: intent.meta().generation,
            reference: intent.object_ref(&()),
            setup,
            ctx,
            status: intent.status.clone().unwrap_or_default(),
        }
    }

    pub fn status(&self) -> &VolumeAutoscalerStatus {
        &self.status
    }

    pub fn poll_interval(&self) -> Duration {
        match &self.setup {
            Ok(setup) => setup.policy.poll_interval,
            Err(_) => DEFAULT_POLL_INTERVAL,
        }
    }

    /// `cycle_deadline_ratio` of the poll interval, as validated by the config.
    pub fn cycle_deadline(&self) -> Duration {
        self.poll_interval().mul_f64(self.ctx.cycle_deadline_ratio)
    }

    /// Ticks until `cancel` fires. A cancelled cycle writes no status.
    pub async fn run(mut self, cancel: CancellationToken) {
        log::info!(
            "Starting poll loop for {}/{} every {:?}",
            self.namespace,
            self.name,
            self.poll_interval()
        );
        let mut ticker = tokio::time::interval(self.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = self.tick(Utc::now()) => {}
            }
        }
        for volume in &self.status.volumes {
            operational::forget_usage(&self.namespace, &volume.name);
        }
        log::info!("Poll loop for {}/{} stopped", self.namespace, self.name);
    }

    /// Runs one cycle and persists the resulting status.
    pub async fn tick(&mut self, now: DateTime<Utc>) {
        let timer = operational::RECONCILE_DURATION_SECONDS.start_timer();
        let next = self.run_cycle(now).await;
        timer.observe_duration();

        let write = self.ctx.status.write_status(&self.namespace, &self.name, &next);
        let deadline = self.cycle_deadline();
        let result = match tokio::time::timeout(deadline, write).await {
            Ok(result) => result,
            Err(_) => Err(ScalingError::Timeout(deadline)),
        };
        if let Err(e) = result {
            operational::record_poll_error("status_write");
            log::warn!("Failed to write status of {}/{}: {}", self.namespace, self.name, e);
        }
        // Kept even when the write failed so scale history survives until the next write.
        self.status = next;
    }

    /// Computes the next status from the current one. No status is written here.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> VolumeAutoscalerStatus {
        let mut next = self.status.clone();
        next.last_poll_time = Some(now);
        next.observed_generation = self.generation;

        let setup = match &self.setup {
            Ok(setup) => setup,
            Err(e) => {
                self.record_config_error(&mut next, e, now);
                return next;
            }
        };
        set_condition(&mut next.conditions, CONDITION_INVALID_SPEC, false, "SpecValid", "", now);

        let mut progress = CycleProgress::default();
        let deadline = self.cycle_deadline();
        let result =
            tokio::time::timeout(deadline, self.evaluate_volumes(setup, now, &mut progress)).await;

        match result {
            Ok(Ok(())) => {
                let evaluated = progress.observations.len();
                let expanded = progress.scale_events;
                next.volumes = progress.observations;
                next.total_scale_events += progress.scale_events;
                set_condition(&mut next.conditions, CONDITION_METRICS_AVAILABLE, true, "QuerySucceeded", "", now);
                set_at_max_condition(&mut next, &progress.at_max, now);
                set_condition(
                    &mut next.conditions,
                    CONDITION_READY,
                    true,
                    "Reconciled",
                    format!("{} volumes evaluated, {} expanded", evaluated, expanded),
                    now,
                );
            }
            Ok(Err(CycleError::Config(e))) => self.record_config_error(&mut next, &e, now),
            Ok(Err(CycleError::Platform(e))) => {
                operational::record_poll_error("platform");
                log::warn!("Listing volumes for {}/{} failed: {}", self.namespace, self.name, e);
                set_condition(&mut next.conditions, CONDITION_READY, false, "PlatformError", e.to_string(), now);
            }
            Ok(Err(CycleError::Metrics(e))) => {
                operational::record_poll_error(e.reason());
                log::warn!(
                    "Metrics query for {}/{} failed, keeping last observations: {}",
                    self.namespace,
                    self.name,
                    e
                );
                set_condition(&mut next.conditions, CONDITION_METRICS_AVAILABLE, false, "QueryFailed", e.to_string(), now);
                set_condition(&mut next.conditions, CONDITION_READY, false, "MetricsUnavailable", e.to_string(), now);
            }
            Err(_) => {
                operational::record_poll_error("deadline_exceeded");
                log::warn!(
                    "Cycle for {}/{} exceeded {:?}, keeping partial results",
                    self.namespace,
                    self.name,
                    deadline
                );
                merge_observations(&mut next.volumes, progress.observations);
                next.total_scale_events += progress.scale_events;
                set_condition(
                    &mut next.conditions,
                    CONDITION_READY,
                    false,
                    "DeadlineExceeded",
                    format!("cycle exceeded {:?}", deadline),
                    now,
                );
            }
        }
        next
    }

    fn record_config_error(&self, next: &mut VolumeAutoscalerStatus, e: &ScalingError, now: DateTime<Utc>) {
        let label = match e {
            ScalingError::InvalidTarget(_) => "invalid_target",
            _ => "invalid_spec",
        };
        operational::record_poll_error(label);
        set_condition(&mut next.conditions, CONDITION_INVALID_SPEC, true, e.reason(), e.to_string(), now);
        set_condition(&mut next.conditions, CONDITION_READY, false, e.reason(), e.to_string(), now);
    }

    async fn evaluate_volumes(
        &self,
        setup: &LoopSetup,
        now: DateTime<Utc>,
        progress: &mut CycleProgress,
    ) -> Result<(), CycleError> {
        let volumes =
            resolve_targets(self.ctx.volumes.as_ref(), &self.namespace, &setup.target).await?;
        for gone in self
            .status
            .volumes
            .iter()
            .filter(|prior| !volumes.iter().any(|v| v.name == prior.name))
        {
            log::info!("Volume {}/{} left the selection", self.namespace, gone.name);
            operational::forget_usage(&self.namespace, &gone.name);
        }
        if volumes.is_empty() {
            log::debug!("No volumes match {}/{}", self.namespace, self.name);
            return Ok(());
        }

        let names: Vec<&str> = volumes.iter().filter(|v| v.bound).map(|v| v.name.as_str()).collect();
        let (usage, inodes) = if names.is_empty() {
            (HashMap::new(), HashMap::new())
        } else {
            let usage = self.sample(setup, &usage_query(&self.namespace, &names)).await?;
            let inodes = if setup.policy.inode_check_enabled() {
                self.sample(setup, &inode_percent_query(&self.namespace, &names)).await?
            } else {
                HashMap::new()
            };
            (usage, inodes)
        };

        let executor = ResizeExecutor::new(self.ctx.volumes.as_ref(), &self.namespace);
        for volume in &volumes {
            let (observation, event) = self
                .evaluate_volume(setup, &executor, volume, &usage, &inodes, now, progress)
                .await;
            // must land in progress before the next await
            progress.observations.push(observation);
            if let Some(event) = event {
                self.ctx.events.publish(&self.reference, event).await;
            }
        }
        Ok(())
    }

    // One round trip. A named target expects exactly one series, and an empty
    // result only means the claim has no sample yet.
    async fn sample(&self, setup: &LoopSetup, expr: &str) -> Result<HashMap<String, f64>, CycleError> {
        match &setup.target {
            ResolvedTarget::Named(name) => match setup.metrics.query_scalar(expr).await {
                Ok(value) => Ok(HashMap::from([(name.clone(), value)])),
                Err(MetricsError::NoResult(_)) => Ok(HashMap::new()),
                Err(e) => Err(CycleError::Metrics(e)),
            },
            ResolvedTarget::Selector(_) => setup
                .metrics
                .query_vector(expr, CLAIM_LABEL)
                .await
                .map_err(CycleError::Metrics),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn evaluate_volume(
        &self,
        setup: &LoopSetup,
        executor: &ResizeExecutor<'_>,
        volume: &VolumeInfo,
        usage: &HashMap<String, f64>,
        inodes: &HashMap<String, f64>,
        now: DateTime<Utc>,
        progress: &mut CycleProgress,
    ) -> (VolumeObservation, Option<ScaleEvent>) {
        let prior = self.status.volume(&volume.name);
        if !volume.bound {
            return (carried_observation(volume, prior, "NotBound"), None);
        }
        if volume.resize_in_progress {
            log::debug!("Volume {}/{} is still resizing", self.namespace, volume.name);
            return (carried_observation(volume, prior, "ResizeInProgress"), None);
        }
        let Some(used) = usage.get(&volume.name) else {
            log::debug!("No usage sample for {}/{}", self.namespace, volume.name);
            return (carried_observation(volume, prior, "NoMetrics"), None);
        };

        let sample = VolumeSample {
            name: volume.name.clone(),
            current_size: volume.current_size,
            usage_bytes: used.max(0.0).round() as u64,
            inode_percent: inodes.get(&volume.name).copied(),
        };
        let evaluation = decision::evaluate(&setup.policy, prior, &sample, now);
        let mut observation = evaluation.observation;
        let mut event = None;
        operational::record_usage(&self.namespace, &volume.name, observation.usage_percent);

        match evaluation.decision {
            Decision::Expand { new_size, trigger } => {
                log::info!(
                    "[Scale] volume={}/{} usage={:.1}% trigger={:?} {} => {}",
                    self.namespace,
                    volume.name,
                    observation.usage_percent,
                    trigger,
                    format_bytes(observation.current_size),
                    format_bytes(new_size)
                );
                match executor.resize(volume, new_size).await {
                    Ok(ResizeOutcome::Resized { from, to }) => {
                        observation.record_expansion(to, now);
                        progress.scale_events += 1;
                        operational::record_scale_event(&self.namespace, &volume.name);
                        let note = format!(
                            "Expanded {} from {} to {} ({:?} trigger)",
                            volume.name,
                            format_bytes(from),
                            format_bytes(to),
                            trigger
                        );
                        event = Some(ScaleEvent::expanded(note));
                    }
                    Ok(ResizeOutcome::AlreadySatisfied { requested }) => {
                        log::info!(
                            "Volume {}/{} already requests {}",
                            self.namespace,
                            volume.name,
                            format_bytes(requested)
                        );
                        observation.reason = "ResizeInProgress".into();
                    }
                    Err(e) => {
                        log::warn!("Resize of {}/{} failed: {}", self.namespace, volume.name, e);
                        observation.reason = e.reason().into();
                        event = Some(ScaleEvent::failed(e.to_string()));
                    }
                }
            }
            Decision::NoOp(NoOpReason::AtMaxSize) => {
                log::info!(
                    "Volume {}/{} is over threshold but capped at {}",
                    self.namespace,
                    volume.name,
                    format_bytes(setup.policy.max_size)
                );
                progress.at_max.push(volume.name.clone());
            }
            Decision::NoOp(reason) => {
                log::debug!("Volume {}/{}: {}", self.namespace, volume.name, reason.as_str());
            }
            Decision::Reject(message) => {
                log::warn!("Volume {}/{} skipped: {}", self.namespace, volume.name, message);
            }
        }
        (observation, event)
    }
}

fn build_setup<F>(
    intent: &VolumeAutoscaler,
    default_endpoint: Option<&str>,
    connect: F,
) -> Result<LoopSetup, ScalingError>
where
    F: FnOnce(&str) -> Result<Arc<dyn MetricsQuery>, MetricsError>,
{
    let target = validate_target(&intent.spec.target)?;
    let policy = ScalingPolicy::from_spec(&intent.spec)?;
    let endpoint = policy
        .metrics_endpoint
        .as_deref()
        .or(default_endpoint)
        .ok_or_else(|| ScalingError::InvalidSpec("metricsEndpoint is required".into()))?;
    let metrics = connect(endpoint).map_err(|e| ScalingError::InvalidSpec(e.to_string()))?;
    Ok(LoopSetup {
        policy,
        target,
        metrics,
    })
}

fn carried_observation(
    volume: &VolumeInfo,
    prior: Option<&VolumeObservation>,
    reason: &str,
) -> VolumeObservation {
    VolumeObservation {
        name: volume.name.clone(),
        current_size: volume.current_size.unwrap_or(0),
        usage_bytes: prior.map(|p| p.usage_bytes).unwrap_or(0),
        usage_percent: prior.map(|p| p.usage_percent).unwrap_or(0.0),
        inode_percent: prior.and_then(|p| p.inode_percent),
        last_scale_time: prior.and_then(|p| p.last_scale_time),
        last_scale_size: prior.and_then(|p| p.last_scale_size),
        reason: reason.to_string(),
    }
}

fn merge_observations(volumes: &mut Vec<VolumeObservation>, fresh: Vec<VolumeObservation>) {
    for observation in fresh {
        match volumes.iter_mut().find(|v| v.name == observation.name) {
            Some(existing) => *existing = observation,
            None => volumes.push(observation),
        }
    }
}

fn set_at_max_condition(next: &mut VolumeAutoscalerStatus, at_max: &[String], now: DateTime<Utc>) {
    if at_max.is_empty() {
        set_condition(&mut next.conditions, CONDITION_AT_MAX_SIZE, false, "BelowMaxSize", "", now);
    } else {
        set_condition(
            &mut next.conditions,
            CONDITION_AT_MAX_SIZE,
            true,
            "AtMaxSize",
            format!("capped at maxSize: {}", at_max.join(", ")),
            now,
        );
    }
}
