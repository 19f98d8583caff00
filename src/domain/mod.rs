//! Framework-agnostic entities shared by the saga, the reconciler and the stores.

pub mod money;
pub mod order;
pub mod registered_domain;
pub mod transaction;

pub use order::{DegradedStep, Order, OrderStatus, PaymentMethod, SagaCheckpoint, Step};
pub use registered_domain::RegisteredDomain;
pub use transaction::{Transaction, TransactionKind, TransactionStatus};
