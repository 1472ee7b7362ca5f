//! Watches `VolumeAutoscaler` objects and keeps exactly one poll loop running
//! per object, restarting it when the spec generation changes.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use futures::StreamExt;
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Client, ResourceExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::events::KubeEventSink;
use super::poll_loop::{LoopContext, PollLoop};
use super::status::KubeStatusSink;
use crate::config::ControllerConfig;
use crate::crd::VolumeAutoscaler;
use crate::metrics::operational;
use crate::metrics::query_client::{MetricsQuery, PrometheusClient};
use crate::scaling::volume_api::KubeVolumeApi;

struct LoopHandle {
    generation: Option<i64>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Running loops keyed by `namespace/name`.
#[derive(Default)]
pub struct LoopRegistry {
    loops: DashMap<String, LoopHandle>,
}

impl LoopRegistry {
    pub fn new() -> Self {
        Self {
            loops: DashMap::new(),
        }
    }

    /// True when no loop runs for `key` or it runs an older generation.
    pub fn needs_start(&self, key: &str, generation: Option<i64>) -> bool {
        match self.loops.get(key) {
            Some(handle) => handle.generation != generation || handle.task.is_finished(),
            None => true,
        }
    }

    /// Starts a loop under a child token of `parent`, replacing any previous one.
    pub fn start<F>(&self, key: &str, generation: Option<i64>, parent: &CancellationToken, spawn: F)
    where
        F: FnOnce(CancellationToken) -> JoinHandle<()>,
    {
        let cancel = parent.child_token();
        let task = spawn(cancel.clone());
        let previous = self.loops.insert(
            key.to_string(),
            LoopHandle {
                generation,
                cancel,
                task,
            },
        );
        if let Some(previous) = previous {
            previous.cancel.cancel();
        }
    }

    pub fn stop(&self, key: &str) -> bool {
        match self.loops.remove(key) {
            Some((_, handle)) => {
                handle.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Stops every loop whose key is not in `keep`.
    pub fn retain(&self, keep: &HashSet<String>) {
        let stale: Vec<String> = self
            .loops
            .iter()
            .filter(|entry| !keep.contains(entry.key()))
            .map(|entry| entry.key().clone())
            .collect();
        for key in stale {
            log::info!("Stopping poll loop for vanished {}", key);
            self.stop(&key);
        }
    }

    pub fn len(&self) -> usize {
        self.loops.len()
    }

    /// Cancels all loops and waits for them to exit.
    pub async fn shutdown(&self) {
        let keys: Vec<String> = self.loops.iter().map(|e| e.key().clone()).collect();
        let mut tasks = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some((_, handle)) = self.loops.remove(&key) {
                handle.cancel.cancel();
                tasks.push(handle.task);
            }
        }
        for task in tasks {
            if let Err(e) = task.await {
                log::warn!("Poll loop ended abnormally: {}", e);
            }
        }
    }
}

pub fn intent_key(intent: &VolumeAutoscaler) -> String {
    format!("{}/{}", intent.namespace().unwrap_or_default(), intent.name_any())
}

pub struct Supervisor {
    client: Client,
    config: ControllerConfig,
    ctx: LoopContext,
    registry: Arc<LoopRegistry>,
}

impl Supervisor {
    pub fn new(client: Client, config: ControllerConfig) -> Self {
        let ctx = LoopContext {
            volumes: Arc::new(KubeVolumeApi::new(client.clone(), config.field_manager.clone())),
            status: Arc::new(KubeStatusSink::new(client.clone(), config.field_manager.clone())),
            events: Arc::new(KubeEventSink::new(client.clone(), config.field_manager.clone())),
            cycle_deadline_ratio: config.cycle_deadline_ratio,
        };
        Self {
            client,
            config,
            ctx,
            registry: Arc::new(LoopRegistry::new()),
        }
    }

    pub async fn run(self, cancel: CancellationToken) {
        let api: Api<VolumeAutoscaler> = match &self.config.namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        };
        let mut stream = watcher(api, watcher::Config::default())
            .default_backoff()
            .boxed();
        // keys seen during a relist; loops not among them are stale
        let mut relist: Option<HashSet<String>> = None;

        log::info!(
            "Watching VolumeAutoscalers in {}",
            self.config.namespace.as_deref().unwrap_or("all namespaces")
        );
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = stream.next() => event,
            };
            match event {
                Some(Ok(watcher::Event::Init)) => relist = Some(HashSet::new()),
                Some(Ok(watcher::Event::InitApply(intent))) => {
                    if let Some(seen) = relist.as_mut() {
                        seen.insert(intent_key(&intent));
                    }
                    self.ensure_loop(intent, &cancel);
                }
                Some(Ok(watcher::Event::InitDone)) => {
                    if let Some(seen) = relist.take() {
                        self.registry.retain(&seen);
                    }
                }
                Some(Ok(watcher::Event::Apply(intent))) => self.ensure_loop(intent, &cancel),
                Some(Ok(watcher::Event::Delete(intent))) => {
                    let key = intent_key(&intent);
                    if self.registry.stop(&key) {
                        log::info!("Stopped poll loop for deleted {}", key);
                    }
                }
                Some(Err(e)) => {
                    operational::record_poll_error("watch");
                    log::warn!("VolumeAutoscaler watch error: {}", e);
                }
                None => break,
            }
        }
        log::info!("Supervisor shutting down {} poll loops", self.registry.len());
        self.registry.shutdown().await;
    }

    fn ensure_loop(&self, intent: VolumeAutoscaler, parent: &CancellationToken) {
        let key = intent_key(&intent);
        let generation = intent.metadata.generation;
        if !self.registry.needs_start(&key, generation) {
            return;
        }
        let poll_loop = PollLoop::new(
            &intent,
            self.ctx.clone(),
            self.config.metrics_endpoint.as_deref(),
            |endpoint| {
                PrometheusClient::from_endpoint(endpoint).map(|c| Arc::new(c) as Arc<dyn MetricsQuery>)
            },
        );
        log::info!("Starting poll loop for {} (generation {:?})", key, generation);
        self.registry
            .start(&key, generation, parent, |cancel| tokio::spawn(poll_loop.run(cancel)));
    }
}
