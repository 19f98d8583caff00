//! Domain events handed to the notification collaborator.
//! The core never sends user messages itself; it publishes events through an [`EventSink`].

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::domain::Step;
use crate::error::ErrorKind;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DomainEvent {
    PaymentConfirmed {
        telegram_id: i64,
        order_id: Uuid,
        domain_name: String,
        amount_usd: BigDecimal,
        tx_hash: String,
    },
    OverpaymentCredited {
        telegram_id: i64,
        order_id: Uuid,
        domain_name: String,
        excess_usd: BigDecimal,
        tx_hash: String,
    },
    UnderpaymentCredited {
        telegram_id: i64,
        order_id: Uuid,
        domain_name: String,
        received_usd: BigDecimal,
        shortfall_usd: BigDecimal,
        tx_hash: String,
    },
    /// Payment that arrived after the order stopped accepting payments, or a top-up.
    DepositCredited {
        telegram_id: i64,
        order_id: Option<Uuid>,
        amount_usd: BigDecimal,
        tx_hash: String,
    },
    RegistrationStepFailed {
        telegram_id: i64,
        order_id: Uuid,
        domain_name: String,
        step: Step,
        kind: ErrorKind,
        message: String,
        steps_completed: Vec<String>,
    },
    RegistrationCompleted {
        telegram_id: i64,
        order_id: Uuid,
        domain_name: String,
        nameservers: Vec<String>,
        degraded: Vec<Step>,
    },
}

impl DomainEvent {
    pub fn name(&self) -> &'static str {
        match self {
            DomainEvent::PaymentConfirmed { .. } => "payment_confirmed",
            DomainEvent::OverpaymentCredited { .. } => "overpayment_credited",
            DomainEvent::UnderpaymentCredited { .. } => "underpayment_credited",
            DomainEvent::DepositCredited { .. } => "deposit_credited",
            DomainEvent::RegistrationStepFailed { .. } => "registration_step_failed",
            DomainEvent::RegistrationCompleted { .. } => "registration_completed",
        }
    }

    pub fn telegram_id(&self) -> i64 {
        match self {
            DomainEvent::PaymentConfirmed { telegram_id, .. }
            | DomainEvent::OverpaymentCredited { telegram_id, .. }
            | DomainEvent::UnderpaymentCredited { telegram_id, .. }
            | DomainEvent::DepositCredited { telegram_id, .. }
            | DomainEvent::RegistrationStepFailed { telegram_id, .. }
            | DomainEvent::RegistrationCompleted { telegram_id, .. } => *telegram_id,
        }
    }
}

/// Where events go. Publishing must not fail the operation that produced the event.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: DomainEvent);
}

/// Logs every event; the default sink when nothing subscribes.
#[derive(Debug, Default, Clone)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn publish(&self, event: DomainEvent) {
        let payload = serde_json::to_string(&event).unwrap_or_default();
        tracing::info!(
            event = event.name(),
            telegram_id = event.telegram_id(),
            payload = %payload,
            "domain event"
        );
    }
}

/// Fans events out to in-process subscribers (notification workers, tests).
#[derive(Clone)]
pub struct BroadcastEventSink {
    tx: broadcast::Sender<DomainEvent>,
}

impl BroadcastEventSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.tx.subscribe()
    }
}

impl EventSink for BroadcastEventSink {
    fn publish(&self, event: DomainEvent) {
        tracing::debug!(event = event.name(), "broadcasting domain event");
        // No receivers is fine: nobody is listening right now.
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[tokio::test]
    async fn test_broadcast_reaches_subscribers() {
        let sink = BroadcastEventSink::new(8);
        let mut rx = sink.subscribe();
        let order_id = Uuid::new_v4();

        sink.publish(DomainEvent::PaymentConfirmed {
            telegram_id: 7,
            order_id,
            domain_name: "example.com".to_string(),
            amount_usd: BigDecimal::from_str("49.50").unwrap(),
            tx_hash: "0xabc".to_string(),
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.name(), "payment_confirmed");
        assert_eq!(event.telegram_id(), 7);
    }

    #[test]
    fn test_publish_without_subscribers_is_silent() {
        let sink = BroadcastEventSink::new(1);
        sink.publish(DomainEvent::DepositCredited {
            telegram_id: 1,
            order_id: None,
            amount_usd: BigDecimal::from(10),
            tx_hash: "t".to_string(),
        });
    }

    #[test]
    fn test_events_serialize_with_tag() {
        let event = DomainEvent::RegistrationStepFailed {
            telegram_id: 1,
            order_id: Uuid::nil(),
            domain_name: "example.com".to_string(),
            step: Step::Registration,
            kind: ErrorKind::Fatal,
            message: "registrar failed".to_string(),
            steps_completed: vec!["zone_created".to_string()],
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "registration_step_failed");
        assert_eq!(json["step"], "registration");
    }
}
