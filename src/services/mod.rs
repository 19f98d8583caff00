pub mod checkout;
pub mod nameservers;

pub use checkout::{payment_callback_url, CheckoutError, CheckoutService};
pub use nameservers::{NameserverError, NameserverService};
