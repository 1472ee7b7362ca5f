// Kubernetes Events for expansions and failed expansions.
use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScaleEvent {
    pub warning: bool,
    pub reason: String,
    pub note: String,
}

impl ScaleEvent {
    pub fn expanded(note: impl Into<String>) -> Self {
        Self {
            warning: false,
            reason: "VolumeExpanded".into(),
            note: note.into(),
        }
    }

    pub fn failed(note: impl Into<String>) -> Self {
        Self {
            warning: true,
            reason: "ExpansionFailed".into(),
            note: note.into(),
        }
    }
}

/// Publishing is best effort: failures are logged, never returned.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, reference: &ObjectReference, event: ScaleEvent);
}

pub struct KubeEventSink {
    recorder: Recorder,
}

impl KubeEventSink {
    pub fn new(client: Client, controller: impl Into<String>) -> Self {
        let reporter = Reporter {
            controller: controller.into(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventSink for KubeEventSink {
    async fn publish(&self, reference: &ObjectReference, event: ScaleEvent) {
        let ev = Event {
            type_: if event.warning {
                EventType::Warning
            } else {
                EventType::Normal
            },
            reason: event.reason.clone(),
            note: Some(event.note.clone()),
            action: "Resize".into(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&ev, reference).await {
            log::warn!("Failed to publish event {}: {}", event.reason, e);
        }
    }
}
