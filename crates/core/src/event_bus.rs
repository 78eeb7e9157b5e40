//! Campaign event bus: trait for emitting lifecycle events from the core.
//!
//! Components accept an `Arc<dyn EventSink>` so the surrounding application
//! can route events to its audit log or activity feed.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    CampaignEdited,
    CampaignActivated,
    CampaignPaused,
    CampaignResumed,
    CampaignCompleted,
    DeliveryFailed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudienceEvent {
    pub event_id: Uuid,
    pub event_type: EventType,
    pub campaign_id: Uuid,
    pub customer_id: Option<Uuid>,
    pub detail: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: AudienceEvent);
}

/// No-op sink for tests and callers that don't need event emission.
pub struct NoOpSink;

impl EventSink for NoOpSink {
    fn emit(&self, _event: AudienceEvent) {}
}

/// In-memory sink that captures events for testing.
#[derive(Default)]
pub struct CaptureSink {
    events: Mutex<Vec<AudienceEvent>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AudienceEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.events.lock().len()
    }

    pub fn count_type(&self, event_type: EventType) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for CaptureSink {
    fn emit(&self, event: AudienceEvent) {
        self.events.lock().push(event);
    }
}

pub fn make_event(
    event_type: EventType,
    campaign_id: Uuid,
    customer_id: Option<Uuid>,
    detail: serde_json::Value,
) -> AudienceEvent {
    AudienceEvent {
        event_id: Uuid::new_v4(),
        event_type,
        campaign_id,
        customer_id,
        detail,
        timestamp: Utc::now(),
    }
}

pub fn noop_sink() -> Arc<dyn EventSink> {
    Arc::new(NoOpSink)
}

pub fn capture_sink() -> Arc<CaptureSink> {
    Arc::new(CaptureSink::new())
}
