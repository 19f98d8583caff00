#![allow(dead_code)]

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use registrar_core::adapters::MemoryStore;
use registrar_core::config::MinConfirmations;
use registrar_core::domain::{Order, OrderStatus, PaymentMethod, RegisteredDomain, SagaCheckpoint};
use registrar_core::events::{DomainEvent, EventSink};
use registrar_core::gateway::{services, BackoffStrategy, ResilientGateway, RetryPolicy, ServiceHealthTracker};
use registrar_core::payments::{PaymentMonitor, PaymentReconciler};
use registrar_core::ports::{DomainRepository, OrderRepository, RepositoryError, RepositoryResult};
use registrar_core::providers::{
    Availability, DnsProvider, DnsZone, IncomingPayment, PaymentGateway, ProviderError,
    ProviderResult, Registrar,
};
use registrar_core::saga::{PricingPolicy, RegistrationOrchestrator};
use registrar_core::services::{payment_callback_url, CheckoutService, NameserverService};
use registrar_core::AppState;

pub const SERVER_IP: &str = "203.0.113.10";
pub const WEBHOOK_SECRET: &str = "test-webhook-secret-0123";
pub const PUBLIC_BASE_URL: &str = "https://bot.example.com";

pub fn zone_nameservers() -> Vec<String> {
    vec![
        "ada.ns.cloudflare.com".to_string(),
        "bob.ns.cloudflare.com".to_string(),
    ]
}

pub fn usd(amount: &str) -> BigDecimal {
    BigDecimal::from_str(amount).unwrap()
}

/// No backoff, small budgets: keeps retry tests fast.
pub fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_retries: 2,
        backoff: BackoffStrategy::Immediate,
        base_delay: Duration::ZERO,
        circuit_breaker_threshold: 3,
        circuit_reset: Duration::from_secs(60),
        timeout: Duration::from_secs(2),
    }
}

pub fn fast_gateway(tracker: Arc<ServiceHealthTracker>) -> ResilientGateway {
    ResilientGateway::new(tracker)
        .with_policy(services::DNS, fast_policy())
        .with_policy(services::REGISTRAR, fast_policy())
        .with_policy(services::PAYMENTS, fast_policy())
        .with_fallback_policy(fast_policy())
}

/// DNS provider whose failures are scripted per test.
#[derive(Default)]
pub struct FakeDns {
    /// Transient failures `create_zone` returns before it succeeds.
    pub zone_failures: AtomicU32,
    pub reject_zone: AtomicBool,
    pub fail_records: AtomicBool,
    pub zone_calls: AtomicU32,
    pub record_calls: AtomicU32,
    pub tls_calls: AtomicU32,
}

#[async_trait]
impl DnsProvider for FakeDns {
    async fn create_zone(&self, domain: &str) -> ProviderResult<DnsZone> {
        self.zone_calls.fetch_add(1, Ordering::SeqCst);
        if self.reject_zone.load(Ordering::SeqCst) {
            return Err(ProviderError::Rejected(format!("{} is not a valid zone", domain)));
        }
        if self
            .zone_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ProviderError::Transient("HTTP 502: bad gateway".to_string()));
        }
        Ok(DnsZone {
            zone_id: format!("zone-{}", domain),
            nameservers: zone_nameservers(),
        })
    }

    async fn add_record(
        &self,
        _zone_id: &str,
        record_type: &str,
        _name: &str,
        _content: &str,
    ) -> ProviderResult<String> {
        self.record_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_records.load(Ordering::SeqCst) {
            return Err(ProviderError::Transient("connection reset".to_string()));
        }
        Ok(format!("rec-{}", record_type))
    }

    async fn enable_tls(&self, _zone_id: &str) -> ProviderResult<bool> {
        self.tls_calls.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }
}

/// Registrar whose failures are scripted per test.
#[derive(Default)]
pub struct FakeRegistrar {
    pub fail_customer: AtomicBool,
    pub fail_register: AtomicBool,
    pub reject_register: AtomicBool,
    pub fail_nameservers: AtomicBool,
    pub refuse_nameservers: AtomicBool,
    pub unavailable: AtomicBool,
    pub customer_calls: AtomicU32,
    pub register_calls: AtomicU32,
    pub nameserver_calls: AtomicU32,
    pub registered_with: Mutex<Vec<Option<Vec<String>>>>,
    pub nameservers_set: Mutex<Vec<Vec<String>>>,
}

#[async_trait]
impl Registrar for FakeRegistrar {
    async fn get_or_create_customer(&self, telegram_id: i64) -> ProviderResult<String> {
        self.customer_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_customer.load(Ordering::SeqCst) {
            return Err(ProviderError::Transient("HTTP 503: maintenance".to_string()));
        }
        // Widens the window for concurrent lookups.
        tokio::time::sleep(Duration::from_millis(20)).await;
        Ok(format!("CUST-{}", telegram_id))
    }

    async fn register_domain(
        &self,
        domain: &str,
        _customer_id: &str,
        nameservers: Option<&[String]>,
    ) -> ProviderResult<String> {
        self.register_calls.fetch_add(1, Ordering::SeqCst);
        self.registered_with
            .lock()
            .unwrap()
            .push(nameservers.map(|ns| ns.to_vec()));
        if self.reject_register.load(Ordering::SeqCst) {
            return Err(ProviderError::Rejected(format!("{} is already registered", domain)));
        }
        if self.fail_register.load(Ordering::SeqCst) {
            return Err(ProviderError::Transient("HTTP 500: internal error".to_string()));
        }
        Ok(format!("DOM-{}", domain))
    }

    async fn update_nameservers(&self, _domain_id: &str, nameservers: &[String]) -> ProviderResult<bool> {
        self.nameserver_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_nameservers.load(Ordering::SeqCst) {
            return Err(ProviderError::Transient("HTTP 504: gateway timeout".to_string()));
        }
        if self.refuse_nameservers.load(Ordering::SeqCst) {
            return Ok(false);
        }
        self.nameservers_set.lock().unwrap().push(nameservers.to_vec());
        Ok(true)
    }

    async fn check_availability(&self, _domain: &str) -> ProviderResult<Availability> {
        Ok(Availability {
            available: !self.unavailable.load(Ordering::SeqCst),
            price: Some(usd("13.00")),
        })
    }
}

/// Payment gateway quoting a fixed 0.00002 BTC per USD.
#[derive(Default)]
pub struct FakePayments {
    pub address_calls: AtomicU32,
    pub rate_calls: AtomicU32,
    pub logs_calls: AtomicU32,
    pub fail_logs: AtomicBool,
    /// Payments reported per callback URL.
    pub received: Mutex<HashMap<String, Vec<IncomingPayment>>>,
}

#[async_trait]
impl PaymentGateway for FakePayments {
    async fn create_address(&self, currency: &str, _callback_url: &str) -> ProviderResult<String> {
        let n = self.address_calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("{}-address-{}", currency.to_lowercase(), n))
    }

    async fn convert_rate(&self, _currency: &str, amount_usd: &BigDecimal) -> ProviderResult<BigDecimal> {
        self.rate_calls.fetch_add(1, Ordering::SeqCst);
        Ok(amount_usd * usd("0.00002"))
    }

    async fn payments_received(&self, _currency: &str, callback_url: &str) -> ProviderResult<Vec<IncomingPayment>> {
        self.logs_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_logs.load(Ordering::SeqCst) {
            return Err(ProviderError::Rejected("Invalid callback".to_string()));
        }
        Ok(self
            .received
            .lock()
            .unwrap()
            .get(callback_url)
            .cloned()
            .unwrap_or_default())
    }
}

/// Domain store that has lost its database connection.
#[derive(Default)]
pub struct FailingDomains;

#[async_trait]
impl DomainRepository for FailingDomains {
    async fn insert_domain(&self, _domain: &RegisteredDomain) -> RepositoryResult<()> {
        Err(RepositoryError::Conflict("db connection lost".to_string()))
    }

    async fn find_domain_by_order(&self, _order_id: uuid::Uuid) -> RepositoryResult<Option<RegisteredDomain>> {
        Ok(None)
    }

    async fn update_nameservers(&self, _domain_id: uuid::Uuid, _nameservers: &[String]) -> RepositoryResult<()> {
        Err(RepositoryError::Conflict("db connection lost".to_string()))
    }
}

/// Keeps every published event for assertions.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<DomainEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<DomainEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events().iter().map(|e| e.name()).collect()
    }
}

impl EventSink for RecordingSink {
    fn publish(&self, event: DomainEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// Everything wired over the in-memory store, with the saga run inline on trigger.
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub dns: Arc<FakeDns>,
    pub registrar: Arc<FakeRegistrar>,
    pub payments: Arc<FakePayments>,
    pub tracker: Arc<ServiceHealthTracker>,
    pub gateway: Arc<ResilientGateway>,
    pub events: Arc<RecordingSink>,
    pub orchestrator: Arc<RegistrationOrchestrator>,
    pub reconciler: Arc<PaymentReconciler>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_server_ip(Some(SERVER_IP.to_string()))
    }

    pub fn with_server_ip(server_ip: Option<String>) -> Self {
        Self::assemble(server_ip, None)
    }

    /// Saga writes registered domains to `domains` instead of the shared store.
    pub fn with_domain_store(domains: Arc<dyn DomainRepository>) -> Self {
        Self::assemble(Some(SERVER_IP.to_string()), Some(domains))
    }

    fn assemble(server_ip: Option<String>, domains: Option<Arc<dyn DomainRepository>>) -> Self {
        let store = Arc::new(MemoryStore::new());
        let domains = domains.unwrap_or_else(|| store.clone() as Arc<dyn DomainRepository>);
        let dns = Arc::new(FakeDns::default());
        let registrar = Arc::new(FakeRegistrar::default());
        let payments = Arc::new(FakePayments::default());
        let tracker = Arc::new(ServiceHealthTracker::new());
        let gateway = Arc::new(fast_gateway(tracker.clone()));
        let events = Arc::new(RecordingSink::default());

        let orchestrator = Arc::new(
            RegistrationOrchestrator::new(
                gateway.clone(),
                dns.clone(),
                registrar.clone(),
                store.clone(),
                domains,
                store.clone(),
                events.clone(),
            )
            .with_server_ip(server_ip),
        );

        let reconciler = Arc::new(PaymentReconciler::new(
            store.clone(),
            store.clone(),
            events.clone(),
            orchestrator.clone(),
        ));

        Self {
            store,
            dns,
            registrar,
            payments,
            tracker,
            gateway,
            events,
            orchestrator,
            reconciler,
        }
    }

    /// Crypto order for `example.com` awaiting `price` USD.
    pub async fn awaiting_order(&self, telegram_id: i64, price: &str) -> Order {
        let mut order = Order::new(
            telegram_id,
            "example.com".to_string(),
            "com".to_string(),
            usd(price),
            PaymentMethod::Crypto,
            Some("BTC".to_string()),
        );
        order.payment_address = Some(format!("btc-address-{}", order.order_id));
        self.store.insert_order(&order).await.unwrap();
        order
    }

    /// Order whose payment is already confirmed, ready for the saga.
    pub async fn paid_order(&self, telegram_id: i64, domain: &str) -> Order {
        let mut order = Order::new(
            telegram_id,
            domain.to_string(),
            domain.split_once('.').map(|(_, tld)| tld).unwrap_or("com").to_string(),
            usd("42.90"),
            PaymentMethod::Crypto,
            Some("BTC".to_string()),
        );
        self.store.insert_order(&order).await.unwrap();
        assert!(self
            .store
            .transition_order(
                order.order_id,
                OrderStatus::AwaitingPayment,
                OrderStatus::PaymentConfirmed,
                &SagaCheckpoint::default(),
            )
            .await
            .unwrap());
        order.status = OrderStatus::PaymentConfirmed;
        order
    }

    pub async fn order(&self, order_id: uuid::Uuid) -> Order {
        self.store.get_order(order_id).await.unwrap()
    }

    /// Reports a payment to the order's address the way the processor's logs would.
    pub fn pay_on_chain(&self, order_id: uuid::Uuid, tx_hash: &str, value_coin: &str, confirmations: u32) {
        self.payments
            .received
            .lock()
            .unwrap()
            .entry(payment_callback_url(PUBLIC_BASE_URL, order_id))
            .or_default()
            .push(IncomingPayment {
                tx_hash: tx_hash.to_string(),
                value_coin: usd(value_coin),
                confirmations,
            });
    }

    pub fn monitor(&self) -> PaymentMonitor {
        PaymentMonitor::new(
            self.store.clone(),
            self.reconciler.clone(),
            self.gateway.clone(),
            self.payments.clone(),
            MinConfirmations::default(),
            PUBLIC_BASE_URL.to_string(),
        )
    }

    pub fn app_state(&self) -> AppState {
        let checkout = Arc::new(CheckoutService::new(
            self.gateway.clone(),
            self.registrar.clone(),
            self.payments.clone(),
            self.store.clone(),
            Arc::new(PricingPolicy::default()),
            PUBLIC_BASE_URL.to_string(),
        ));
        let nameservers = Arc::new(NameserverService::new(
            self.gateway.clone(),
            self.registrar.clone(),
            self.store.clone(),
        ));

        AppState {
            checkout,
            nameservers,
            reconciler: self.reconciler.clone(),
            orders: self.store.clone(),
            domains: self.store.clone(),
            ledger: self.store.clone(),
            gateway: self.gateway.clone(),
            payments: self.payments.clone(),
            webhook_secret: WEBHOOK_SECRET.to_string(),
            min_confirmations: MinConfirmations::default(),
        }
    }
}
