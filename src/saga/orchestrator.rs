use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::locks::KeyedLocks;
use super::outcome::{RegistrationOutcome, RegistrationReport};
use super::OrchestratorError;
use crate::domain::{Order, OrderStatus, RegisteredDomain, Step};
use crate::error::ErrorKind;
use crate::events::{DomainEvent, EventSink};
use crate::gateway::{services, GatewayError, ResilientGateway};
use crate::ports::{CustomerRepository, DomainRepository, OrderRepository, RepositoryError};
use crate::providers::{DnsProvider, Registrar};

/// Why a running saga stopped before completion.
enum Halt {
    /// A mandatory provider call failed.
    Provider(Step, GatewayError),
    /// The step took effect but its result could not be stored.
    Store(Step, RepositoryError),
}

fn at(step: Step) -> impl FnOnce(RepositoryError) -> Halt {
    move |e| Halt::Store(step, e)
}

pub const DEFAULT_FALLBACK_NAMESERVERS: [&str; 3] = [
    "ns1.openprovider.nl",
    "ns2.openprovider.be",
    "ns3.openprovider.eu",
];

/// Runs the registration saga for paid orders:
/// zone, A record, TLS, customer, registration with registrar defaults, nameserver switch.
///
/// Every step commits on its own and is persisted before the next one starts. Nothing is
/// rolled back; a failed mandatory step leaves the order in that step's failure state, and a
/// step whose result cannot be stored leaves it in `FailedAtPersistence`.
pub struct RegistrationOrchestrator {
    gateway: Arc<ResilientGateway>,
    dns: Arc<dyn DnsProvider>,
    registrar: Arc<dyn Registrar>,
    orders: Arc<dyn OrderRepository>,
    domains: Arc<dyn DomainRepository>,
    customers: Arc<dyn CustomerRepository>,
    events: Arc<dyn EventSink>,
    order_locks: KeyedLocks<Uuid>,
    customer_locks: KeyedLocks<i64>,
    fallback_nameservers: Vec<String>,
    server_ip: Option<String>,
}

impl RegistrationOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        gateway: Arc<ResilientGateway>,
        dns: Arc<dyn DnsProvider>,
        registrar: Arc<dyn Registrar>,
        orders: Arc<dyn OrderRepository>,
        domains: Arc<dyn DomainRepository>,
        customers: Arc<dyn CustomerRepository>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            gateway,
            dns,
            registrar,
            orders,
            domains,
            customers,
            events,
            order_locks: KeyedLocks::new(),
            customer_locks: KeyedLocks::new(),
            fallback_nameservers: DEFAULT_FALLBACK_NAMESERVERS
                .iter()
                .map(|ns| ns.to_string())
                .collect(),
            server_ip: None,
        }
    }

    /// Address the A record points at. Without one the A record and TLS steps are skipped.
    pub fn with_server_ip(mut self, server_ip: Option<String>) -> Self {
        self.server_ip = server_ip;
        self
    }

    pub fn with_fallback_nameservers(mut self, nameservers: Vec<String>) -> Self {
        if !nameservers.is_empty() {
            self.fallback_nameservers = nameservers;
        }
        self
    }

    /// Runs the saga for an order in `PaymentConfirmed`. A second call for the same order
    /// is rejected with `NotStartable`.
    pub async fn start(&self, order_id: Uuid) -> Result<RegistrationOutcome, OrchestratorError> {
        let _guard = self.order_locks.lock(order_id).await;

        let mut order = self.load(order_id).await?;
        if order.status != OrderStatus::PaymentConfirmed {
            return Err(OrchestratorError::NotStartable {
                order_id,
                status: order.status,
            });
        }

        if !self
            .orders
            .transition_order(order_id, OrderStatus::PaymentConfirmed, OrderStatus::Started, &order.checkpoint)
            .await?
        {
            let current = self.load(order_id).await?;
            return Err(OrchestratorError::NotStartable {
                order_id,
                status: current.status,
            });
        }
        order.status = OrderStatus::Started;

        info!(order_id = %order_id, domain = %order.domain_name, "registration started");
        let result = self.run(&mut order).await;
        match result {
            Ok(outcome) => Ok(outcome),
            Err(halt) => Ok(self.halt(order, halt).await),
        }
    }

    async fn load(&self, order_id: Uuid) -> Result<Order, OrchestratorError> {
        match self.orders.get_order(order_id).await {
            Ok(order) => Ok(order),
            Err(RepositoryError::NotFound(_)) => Err(OrchestratorError::OrderNotFound(order_id)),
            Err(e) => Err(e.into()),
        }
    }

    async fn run(&self, order: &mut Order) -> Result<RegistrationOutcome, Halt> {
        let domain = order.domain_name.clone();

        // Zone
        let dns = &self.dns;
        let zone = self
            .gateway
            .execute(services::DNS, || dns.create_zone(&domain))
            .await
            .map_err(|e| Halt::Provider(Step::ZoneCreation, e))?;
        info!(order_id = %order.order_id, zone_id = %zone.zone_id, "DNS zone created");
        order.checkpoint.zone_id = Some(zone.zone_id.clone());
        order.checkpoint.dns_nameservers = zone.nameservers.clone();
        order.checkpoint.mark("zone_created");
        self.advance(order, OrderStatus::ZoneCreated)
            .await
            .map_err(at(Step::ZoneCreation))?;

        // A record, then TLS on top of it
        match &self.server_ip {
            Some(ip) => {
                match self
                    .gateway
                    .execute(services::DNS, || dns.add_record(&zone.zone_id, "A", &domain, ip))
                    .await
                {
                    Ok(record_id) => {
                        info!(order_id = %order.order_id, record_id = %record_id, "A record added");
                        order.checkpoint.a_record_added = true;
                        order.checkpoint.mark("a_record_added");
                    }
                    Err(e) => {
                        warn!(order_id = %order.order_id, error = %e, "A record step degraded");
                        order.checkpoint.degrade(Step::ARecord, e.kind(), e.to_string());
                    }
                }
            }
            None => info!(order_id = %order.order_id, "no server address configured, skipping A record"),
        }

        if order.checkpoint.a_record_added {
            match self
                .gateway
                .execute(services::DNS, || dns.enable_tls(&zone.zone_id))
                .await
            {
                Ok(true) => {
                    order.checkpoint.https_enabled = true;
                    order.checkpoint.mark("tls_enabled");
                }
                Ok(false) => {
                    warn!(order_id = %order.order_id, "DNS provider did not enable TLS");
                    order.checkpoint.degrade(
                        Step::Tls,
                        ErrorKind::BusinessRejection,
                        "DNS provider did not enable TLS",
                    );
                }
                Err(e) => {
                    warn!(order_id = %order.order_id, error = %e, "TLS step degraded");
                    order.checkpoint.degrade(Step::Tls, e.kind(), e.to_string());
                }
            }
        }
        self.advance(order, OrderStatus::ARecordAdded)
            .await
            .map_err(at(Step::ARecord))?;

        // Customer
        let customer_id = self.resolve_customer(order.telegram_id).await?;
        order.checkpoint.customer_id = Some(customer_id.clone());
        order.checkpoint.mark("customer_ready");
        self.advance(order, OrderStatus::CustomerReady)
            .await
            .map_err(at(Step::Customer))?;

        // Registration with the registrar's own nameservers
        let registrar = &self.registrar;
        let domain_id = self
            .gateway
            .execute(services::REGISTRAR, || {
                registrar.register_domain(&domain, &customer_id, None)
            })
            .await
            .map_err(|e| Halt::Provider(Step::Registration, e))?;
        info!(order_id = %order.order_id, domain_id = %domain_id, "domain registered");

        // The registrar has the domain from here on; keep its id even if storing fails.
        order.checkpoint.domain_id = Some(domain_id.clone());
        let record = RegisteredDomain::new(
            order.order_id,
            order.telegram_id,
            domain.clone(),
            domain_id.clone(),
            Some(zone.zone_id.clone()),
            self.fallback_nameservers.clone(),
        );
        self.domains
            .insert_domain(&record)
            .await
            .map_err(at(Step::Registration))?;
        order.checkpoint.nameservers = self.fallback_nameservers.clone();
        order.checkpoint.mark("domain_registered");
        self.advance(order, OrderStatus::DomainRegistered)
            .await
            .map_err(at(Step::Registration))?;

        // Nameserver switch, best effort
        let switched = if zone.nameservers.is_empty() {
            warn!(order_id = %order.order_id, "zone has no nameservers, keeping registrar defaults");
            order.checkpoint.degrade(
                Step::NameserverSwitch,
                ErrorKind::PartialSuccess,
                "zone has no nameservers",
            );
            false
        } else {
            match self
                .gateway
                .execute(services::REGISTRAR, || {
                    registrar.update_nameservers(&domain_id, &zone.nameservers)
                })
                .await
            {
                Ok(true) => true,
                Ok(false) => {
                    warn!(order_id = %order.order_id, "registrar refused nameserver update");
                    order.checkpoint.degrade(
                        Step::NameserverSwitch,
                        ErrorKind::BusinessRejection,
                        "registrar refused nameserver update",
                    );
                    false
                }
                Err(e) => {
                    warn!(order_id = %order.order_id, error = %e, "nameserver switch degraded, keeping fallback");
                    order
                        .checkpoint
                        .degrade(Step::NameserverSwitch, e.kind(), e.to_string());
                    false
                }
            }
        };

        if switched {
            order.checkpoint.nameservers = zone.nameservers.clone();
            order.checkpoint.nameserver_update_success = true;
            self.domains
                .update_nameservers(record.id, &zone.nameservers)
                .await
                .map_err(at(Step::NameserverSwitch))?;
            order.checkpoint.mark("nameservers_switched");
        }
        self.advance(order, OrderStatus::NameserversSwitched)
            .await
            .map_err(at(Step::NameserverSwitch))?;

        let degraded = order.checkpoint.degraded_steps();
        if !degraded.is_empty() {
            order.checkpoint.failure_kind = Some(ErrorKind::PartialSuccess);
        }
        order.checkpoint.mark("completed");
        self.advance(order, OrderStatus::Completed)
            .await
            .map_err(at(Step::NameserverSwitch))?;

        let report = RegistrationReport {
            order_id: order.order_id,
            domain_name: domain.clone(),
            zone_id: zone.zone_id,
            domain_id,
            nameservers: order.checkpoint.nameservers.clone(),
            a_record_added: order.checkpoint.a_record_added,
            https_enabled: order.checkpoint.https_enabled,
            nameserver_update_success: order.checkpoint.nameserver_update_success,
            steps_completed: order.checkpoint.steps_completed.clone(),
        };

        info!(
            order_id = %order.order_id,
            domain = %domain,
            degraded = degraded.len(),
            "registration completed"
        );
        self.events.publish(DomainEvent::RegistrationCompleted {
            telegram_id: order.telegram_id,
            order_id: order.order_id,
            domain_name: domain,
            nameservers: report.nameservers.clone(),
            degraded: degraded.clone(),
        });

        if degraded.is_empty() {
            Ok(RegistrationOutcome::Success(report))
        } else {
            Ok(RegistrationOutcome::PartialSuccess { report, degraded })
        }
    }

    /// Local mapping first; the registrar is asked only on a miss, one caller per user at a time.
    async fn resolve_customer(&self, telegram_id: i64) -> Result<String, Halt> {
        let customers = &self.customers;
        if let Some(customer_id) = customers
            .find_customer(telegram_id)
            .await
            .map_err(at(Step::Customer))?
        {
            return Ok(customer_id);
        }

        let _guard = self.customer_locks.lock(telegram_id).await;
        if let Some(customer_id) = customers
            .find_customer(telegram_id)
            .await
            .map_err(at(Step::Customer))?
        {
            return Ok(customer_id);
        }

        let registrar = &self.registrar;
        let customer_id = self
            .gateway
            .execute(services::REGISTRAR, || registrar.get_or_create_customer(telegram_id))
            .await
            .map_err(|e| Halt::Provider(Step::Customer, e))?;
        customers
            .save_customer(telegram_id, &customer_id)
            .await
            .map_err(at(Step::Customer))
    }

    async fn advance(&self, order: &mut Order, to: OrderStatus) -> Result<(), RepositoryError> {
        let moved = self
            .orders
            .transition_order(order.order_id, order.status, to, &order.checkpoint)
            .await?;
        if !moved {
            return Err(RepositoryError::Conflict(format!(
                "order {} left {} while moving to {}",
                order.order_id, order.status, to
            )));
        }
        order.status = to;
        Ok(())
    }

    /// Records the halt on the order as far as the store allows, then reports it.
    async fn halt(&self, mut order: Order, halt: Halt) -> RegistrationOutcome {
        let (step, kind, cause, source, message, failed) = match &halt {
            Halt::Provider(step, err) => {
                let cause = err.kind();
                let kind = match cause {
                    ErrorKind::BusinessRejection => ErrorKind::BusinessRejection,
                    _ => ErrorKind::Fatal,
                };
                let failed =
                    OrderStatus::failed_at(*step).unwrap_or(OrderStatus::FailedAtPersistence);
                (*step, kind, cause, err.service().to_string(), err.to_string(), failed)
            }
            Halt::Store(step, err) => (
                *step,
                ErrorKind::Fatal,
                ErrorKind::Fatal,
                "store".to_string(),
                format!("could not record {} step: {}", step, err),
                OrderStatus::FailedAtPersistence,
            ),
        };

        order.checkpoint.failed_step = Some(step);
        order.checkpoint.failure_kind = Some(kind);
        order.checkpoint.error = Some(message.clone());

        match self
            .orders
            .transition_order(order.order_id, order.status, failed, &order.checkpoint)
            .await
        {
            Ok(true) => order.status = failed,
            Ok(false) => error!(
                order_id = %order.order_id,
                status = %order.status,
                "failure state not recorded, order moved underneath the saga"
            ),
            Err(e) => error!(
                order_id = %order.order_id,
                status = %order.status,
                error = %e,
                "failure state not recorded"
            ),
        }

        error!(
            order_id = %order.order_id,
            telegram_id = order.telegram_id,
            domain = %order.domain_name,
            step = %step,
            status = %order.status,
            service = %source,
            cause = ?cause,
            error = %message,
            "registration halted, operator attention required"
        );

        let steps_completed = order.checkpoint.steps_completed.clone();
        self.events.publish(DomainEvent::RegistrationStepFailed {
            telegram_id: order.telegram_id,
            order_id: order.order_id,
            domain_name: order.domain_name.clone(),
            step,
            kind,
            message: message.clone(),
            steps_completed: steps_completed.clone(),
        });

        RegistrationOutcome::Failure {
            step,
            kind,
            cause,
            steps_completed,
            message,
        }
    }
}
