//! Operational events raised by the engine (tracked conversions, finished
//! attributions, training runs, optimizer outputs).
//!
//! The engine holds an `Arc<dyn EventSink>`; hosts plug in their own pipeline.
//! Without one, events go to the `tracing` log.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::types::{DecisionEvent, DecisionEventType};

pub trait EventSink: Send + Sync {
    fn emit(&self, event: DecisionEvent);
}

impl DecisionEvent {
    pub fn new(
        event_type: DecisionEventType,
        subject_id: impl Into<String>,
        node_id: impl Into<String>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type,
            subject_id: subject_id.into(),
            user_id: None,
            detail: None,
            node_id: node_id.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn for_user(mut self, user_id: Option<String>) -> Self {
        self.user_id = user_id;
        self
    }

    pub fn with_detail(mut self, detail: Option<String>) -> Self {
        self.detail = detail;
        self
    }
}

/// Writes each event as a debug-level log line.
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: DecisionEvent) {
        debug!(
            event_type = ?event.event_type,
            subject_id = %event.subject_id,
            user_id = ?event.user_id,
            detail = ?event.detail,
            node_id = %event.node_id,
            "Decision event"
        );
    }
}

pub fn log_sink() -> Arc<dyn EventSink> {
    Arc::new(LogSink)
}

/// Keeps every event in memory, in emission order.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<DecisionEvent>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn matching(&self, keep: impl Fn(&DecisionEvent) -> bool) -> Vec<DecisionEvent> {
        self.events.lock().iter().filter(|e| keep(e)).cloned().collect()
    }

    pub fn of_type(&self, event_type: DecisionEventType) -> Vec<DecisionEvent> {
        self.matching(|e| e.event_type == event_type)
    }

    pub fn count_type(&self, event_type: DecisionEventType) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }

    pub fn for_user(&self, user_id: &str) -> Vec<DecisionEvent> {
        self.matching(|e| e.user_id.as_deref() == Some(user_id))
    }

    /// Events about one journey, campaign or model.
    pub fn for_subject(&self, subject_id: &str) -> Vec<DecisionEvent> {
        self.matching(|e| e.subject_id == subject_id)
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: DecisionEvent) {
        self.events.lock().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attribution(journey: &str, user: &str) -> DecisionEvent {
        DecisionEvent::new(DecisionEventType::AttributionCompleted, journey, "node-a")
            .for_user(Some(user.into()))
            .with_detail(Some("top=meta credit=0.600".into()))
    }

    #[test]
    fn test_recording_sink_filters_by_user_and_subject() {
        let sink = RecordingSink::new();
        sink.emit(attribution("journey-1", "alice"));
        sink.emit(attribution("journey-2", "bob"));
        sink.emit(DecisionEvent::new(DecisionEventType::BudgetOptimized, "journey-1", "node-a"));

        let alice = sink.for_user("alice");
        assert_eq!(alice.len(), 1);
        assert_eq!(alice[0].subject_id, "journey-1");
        assert_eq!(alice[0].node_id, "node-a");

        let subject = sink.for_subject("journey-1");
        assert_eq!(subject.len(), 2);
        assert_eq!(subject[1].event_type, DecisionEventType::BudgetOptimized);
        assert!(subject[1].user_id.is_none());

        assert_eq!(sink.count_type(DecisionEventType::AttributionCompleted), 2);
        assert!(sink.of_type(DecisionEventType::MarkovTrained).is_empty());
        assert!(sink.for_user("carol").is_empty());
    }

    #[test]
    fn test_log_sink_accepts_events() {
        log_sink().emit(attribution("journey-1", "alice"));
    }
}
