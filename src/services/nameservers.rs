use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use super::checkout::normalize_hostname;
use crate::domain::RegisteredDomain;
use crate::gateway::{services, GatewayError, ResilientGateway};
use crate::ports::{DomainRepository, RepositoryError};
use crate::providers::Registrar;

pub const MIN_NAMESERVERS: usize = 2;
pub const MAX_NAMESERVERS: usize = 6;

#[derive(Error, Debug)]
pub enum NameserverError {
    #[error("invalid nameservers: {0}")]
    Invalid(String),

    /// No domain for the order, or the domain belongs to someone else.
    #[error("no registered domain for order {0}")]
    DomainNotFound(Uuid),

    #[error("registrar refused the nameserver update for {0}")]
    Refused(String),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Lowercases each entry and checks count, duplicates and hostname rules.
pub fn validate_nameservers(nameservers: &[String]) -> Result<Vec<String>, NameserverError> {
    if nameservers.len() < MIN_NAMESERVERS {
        return Err(NameserverError::Invalid(format!(
            "at least {} nameservers are required",
            MIN_NAMESERVERS
        )));
    }
    if nameservers.len() > MAX_NAMESERVERS {
        return Err(NameserverError::Invalid(format!(
            "at most {} nameservers are allowed",
            MAX_NAMESERVERS
        )));
    }

    let mut seen = HashSet::new();
    let mut normalized = Vec::with_capacity(nameservers.len());
    for raw in nameservers {
        let host = normalize_hostname(raw).map_err(NameserverError::Invalid)?;
        if !seen.insert(host.clone()) {
            return Err(NameserverError::Invalid(format!("{} is listed twice", host)));
        }
        normalized.push(host);
    }
    Ok(normalized)
}

/// Points a registered domain at nameservers of the owner's choosing.
///
/// The registrar is asked first; the stored domain only changes once it accepts.
pub struct NameserverService {
    gateway: Arc<ResilientGateway>,
    registrar: Arc<dyn Registrar>,
    domains: Arc<dyn DomainRepository>,
}

impl NameserverService {
    pub fn new(
        gateway: Arc<ResilientGateway>,
        registrar: Arc<dyn Registrar>,
        domains: Arc<dyn DomainRepository>,
    ) -> Self {
        Self {
            gateway,
            registrar,
            domains,
        }
    }

    pub async fn update_nameservers(
        &self,
        order_id: Uuid,
        telegram_id: i64,
        nameservers: &[String],
    ) -> Result<RegisteredDomain, NameserverError> {
        let nameservers = validate_nameservers(nameservers)?;

        let mut domain = self
            .domains
            .find_domain_by_order(order_id)
            .await?
            .filter(|d| d.telegram_id == telegram_id)
            .ok_or(NameserverError::DomainNotFound(order_id))?;

        let registrar = &self.registrar;
        let registrar_id = domain.registrar_domain_id.as_str();
        let accepted = self
            .gateway
            .execute(services::REGISTRAR, || {
                registrar.update_nameservers(registrar_id, &nameservers)
            })
            .await?;
        if !accepted {
            warn!(order_id = %order_id, domain = %domain.domain_name, "registrar refused nameserver update");
            return Err(NameserverError::Refused(domain.domain_name));
        }

        self.domains.update_nameservers(domain.id, &nameservers).await?;
        info!(
            order_id = %order_id,
            domain = %domain.domain_name,
            nameservers = ?nameservers,
            "nameservers updated"
        );

        domain.nameservers = nameservers;
        domain.updated_at = Utc::now();
        Ok(domain)
    }
}
