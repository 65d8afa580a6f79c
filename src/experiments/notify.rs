//! Fire-and-forget notifications about campaign conclusions.
//!
//! The winner service never fails because a sink did; it logs the error and
//! reports `notified = false` on the declaration.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification delivery failed: {0}")]
    Delivery(String),
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    WinnerDeclared,
    WinnerAutoDetected,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::WinnerDeclared => "winner_declared",
            EventType::WinnerAutoDetected => "winner_auto_detected",
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub event_type: EventType,
    pub campaign_id: String,
    pub emitted_at: i64,
    pub payload: serde_json::Value,
}

impl Notification {
    pub fn new(
        event_type: EventType,
        campaign_id: &str,
        emitted_at: i64,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            event_type,
            campaign_id: campaign_id.to_string(),
            emitted_at,
            payload,
        }
    }
}

pub trait NotificationSink: Send + Sync {
    fn emit(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Default sink: writes the event to the tracing log and nothing else.
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn emit(&self, notification: &Notification) -> Result<(), NotifyError> {
        tracing::info!(
            event_id = %notification.id,
            event_type = notification.event_type.as_str(),
            campaign_id = %notification.campaign_id,
            payload = %notification.payload,
            "campaign notification"
        );
        Ok(())
    }
}

/// Keeps every emitted event in memory, for assertions and dry runs.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<Notification>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Notification> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl NotificationSink for RecordingSink {
    fn emit(&self, notification: &Notification) -> Result<(), NotifyError> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(notification.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn notification_gets_unique_ids() {
        let a = Notification::new(EventType::WinnerDeclared, "c1", 1, json!({}));
        let b = Notification::new(EventType::WinnerDeclared, "c1", 1, json!({}));
        assert_ne!(a.id, b.id);
        assert!(uuid::Uuid::parse_str(&a.id).is_ok());
    }

    #[test]
    fn recording_sink_keeps_events_in_order() {
        let sink = RecordingSink::new();
        sink.emit(&Notification::new(EventType::WinnerDeclared, "c1", 1, json!({})))
            .unwrap();
        sink.emit(&Notification::new(EventType::WinnerAutoDetected, "c1", 2, json!({})))
            .unwrap();
        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, EventType::WinnerDeclared);
        assert_eq!(events[1].event_type, EventType::WinnerAutoDetected);
    }

    #[test]
    fn event_type_serializes_snake_case() {
        let n = Notification::new(EventType::WinnerAutoDetected, "c1", 5, json!({"variantId": "v2"}));
        let value = serde_json::to_value(&n).unwrap();
        assert_eq!(value["eventType"], "winner_auto_detected");
        assert_eq!(value["campaignId"], "c1");
        assert_eq!(value["payload"]["variantId"], "v2");
    }

    #[test]
    fn tracing_sink_never_fails() {
        assert!(TracingSink
            .emit(&Notification::new(EventType::WinnerDeclared, "c1", 1, json!(null)))
            .is_ok());
    }
}
