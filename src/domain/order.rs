//! Order entity and its lifecycle.
//! The order is the unit the registration saga advances; its status only moves forward.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::ErrorKind;

/// How the customer intends to fund the order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Crypto,
    Wallet,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Crypto => "crypto",
            PaymentMethod::Wallet => "wallet",
        }
    }
}

impl FromStr for PaymentMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "crypto" => Ok(PaymentMethod::Crypto),
            "wallet" => Ok(PaymentMethod::Wallet),
            other => Err(format!("unknown payment method: {}", other)),
        }
    }
}

/// A step of the registration saga.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    ZoneCreation,
    ARecord,
    Tls,
    Customer,
    Registration,
    NameserverSwitch,
}

impl Step {
    pub fn as_str(&self) -> &'static str {
        match self {
            Step::ZoneCreation => "zone_creation",
            Step::ARecord => "a_record",
            Step::Tls => "tls",
            Step::Customer => "customer",
            Step::Registration => "registration",
            Step::NameserverSwitch => "nameserver_switch",
        }
    }

    /// Mandatory steps halt the saga when they fail; the others degrade it.
    pub fn is_mandatory(&self) -> bool {
        matches!(self, Step::ZoneCreation | Step::Customer | Step::Registration)
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order lifecycle. Ordered by `rank`; a transition must strictly increase the rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    AwaitingPayment,
    PaymentConfirmed,
    Started,
    ZoneCreated,
    ARecordAdded,
    CustomerReady,
    DomainRegistered,
    NameserversSwitched,
    Completed,
    FailedAtZoneCreation,
    FailedAtCustomer,
    FailedAtRegistration,
    /// A step committed at the provider but its result could not be stored.
    FailedAtPersistence,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::AwaitingPayment => "awaiting_payment",
            OrderStatus::PaymentConfirmed => "payment_confirmed",
            OrderStatus::Started => "started",
            OrderStatus::ZoneCreated => "zone_created",
            OrderStatus::ARecordAdded => "a_record_added",
            OrderStatus::CustomerReady => "customer_ready",
            OrderStatus::DomainRegistered => "domain_registered",
            OrderStatus::NameserversSwitched => "nameservers_switched",
            OrderStatus::Completed => "completed",
            OrderStatus::FailedAtZoneCreation => "failed_at_zone_creation",
            OrderStatus::FailedAtCustomer => "failed_at_customer",
            OrderStatus::FailedAtRegistration => "failed_at_registration",
            OrderStatus::FailedAtPersistence => "failed_at_persistence",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            OrderStatus::AwaitingPayment => 0,
            OrderStatus::PaymentConfirmed => 1,
            OrderStatus::Started => 2,
            OrderStatus::ZoneCreated => 3,
            OrderStatus::ARecordAdded => 4,
            OrderStatus::CustomerReady => 5,
            OrderStatus::DomainRegistered => 6,
            OrderStatus::NameserversSwitched => 7,
            OrderStatus::Completed
            | OrderStatus::FailedAtZoneCreation
            | OrderStatus::FailedAtCustomer
            | OrderStatus::FailedAtRegistration
            | OrderStatus::FailedAtPersistence => 8,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.rank() == 8
    }

    pub fn is_failed(&self) -> bool {
        matches!(
            self,
            OrderStatus::FailedAtZoneCreation
                | OrderStatus::FailedAtCustomer
                | OrderStatus::FailedAtRegistration
                | OrderStatus::FailedAtPersistence
        )
    }

    /// Whether moving from `self` to `next` keeps the lifecycle monotonic.
    pub fn can_advance_to(&self, next: OrderStatus) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }

    /// Terminal failure state for a mandatory step.
    pub fn failed_at(step: Step) -> Option<OrderStatus> {
        match step {
            Step::ZoneCreation => Some(OrderStatus::FailedAtZoneCreation),
            Step::Customer => Some(OrderStatus::FailedAtCustomer),
            Step::Registration => Some(OrderStatus::FailedAtRegistration),
            _ => None,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let status = match s {
            "awaiting_payment" => OrderStatus::AwaitingPayment,
            "payment_confirmed" => OrderStatus::PaymentConfirmed,
            "started" => OrderStatus::Started,
            "zone_created" => OrderStatus::ZoneCreated,
            "a_record_added" => OrderStatus::ARecordAdded,
            "customer_ready" => OrderStatus::CustomerReady,
            "domain_registered" => OrderStatus::DomainRegistered,
            "nameservers_switched" => OrderStatus::NameserversSwitched,
            "completed" => OrderStatus::Completed,
            "failed_at_zone_creation" => OrderStatus::FailedAtZoneCreation,
            "failed_at_customer" => OrderStatus::FailedAtCustomer,
            "failed_at_registration" => OrderStatus::FailedAtRegistration,
            "failed_at_persistence" => OrderStatus::FailedAtPersistence,
            other => return Err(format!("unknown order status: {}", other)),
        };
        Ok(status)
    }
}

/// An optional step that did not take effect, and why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DegradedStep {
    pub step: Step,
    pub kind: ErrorKind,
    pub message: String,
}

/// Progress of the registration saga, persisted with the order after every step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SagaCheckpoint {
    pub zone_id: Option<String>,
    #[serde(default)]
    pub dns_nameservers: Vec<String>,
    #[serde(default)]
    pub a_record_added: bool,
    #[serde(default)]
    pub https_enabled: bool,
    pub customer_id: Option<String>,
    pub domain_id: Option<String>,
    #[serde(default)]
    pub nameservers: Vec<String>,
    #[serde(default)]
    pub nameserver_update_success: bool,
    #[serde(default)]
    pub steps_completed: Vec<String>,
    #[serde(default)]
    pub degraded: Vec<DegradedStep>,
    pub failed_step: Option<Step>,
    pub failure_kind: Option<ErrorKind>,
    pub error: Option<String>,
}

impl SagaCheckpoint {
    pub fn mark(&mut self, label: &str) {
        self.steps_completed.push(label.to_string());
    }

    pub fn degrade(&mut self, step: Step, kind: ErrorKind, message: impl Into<String>) {
        self.degraded.push(DegradedStep {
            step,
            kind,
            message: message.into(),
        });
    }

    pub fn degraded_steps(&self) -> Vec<Step> {
        self.degraded.iter().map(|d| d.step).collect()
    }
}

/// Domain purchase order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub order_id: Uuid,
    pub telegram_id: i64,
    pub domain_name: String,
    pub tld: String,
    pub expected_amount_usd: BigDecimal,
    pub payment_method: PaymentMethod,
    pub crypto_currency: Option<String>,
    pub crypto_amount: Option<BigDecimal>,
    pub payment_address: Option<String>,
    pub status: OrderStatus,
    pub checkpoint: SagaCheckpoint,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Order {
    pub fn new(
        telegram_id: i64,
        domain_name: String,
        tld: String,
        expected_amount_usd: BigDecimal,
        payment_method: PaymentMethod,
        crypto_currency: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            order_id: Uuid::new_v4(),
            telegram_id,
            domain_name,
            tld,
            expected_amount_usd,
            payment_method,
            crypto_currency,
            crypto_amount: None,
            payment_address: None,
            status: OrderStatus::AwaitingPayment,
            checkpoint: SagaCheckpoint::default(),
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }
}
