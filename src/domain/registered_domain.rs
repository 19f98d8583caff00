//! Registered domain entity.
//! A row exists only once the registrar has confirmed the registration.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisteredDomain {
    pub id: Uuid,
    pub order_id: Uuid,
    pub telegram_id: i64,
    pub domain_name: String,
    pub registrar_domain_id: String,
    pub dns_zone_id: Option<String>,
    pub nameservers: Vec<String>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RegisteredDomain {
    /// Registration period is one year.
    pub fn new(
        order_id: Uuid,
        telegram_id: i64,
        domain_name: String,
        registrar_domain_id: String,
        dns_zone_id: Option<String>,
        nameservers: Vec<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            order_id,
            telegram_id,
            domain_name,
            registrar_domain_id,
            dns_zone_id,
            nameservers,
            expires_at: now + Duration::days(365),
            created_at: now,
            updated_at: now,
        }
    }
}
