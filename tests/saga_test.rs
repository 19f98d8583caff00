mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use registrar_core::domain::{OrderStatus, Step};
use registrar_core::error::ErrorKind;
use registrar_core::events::DomainEvent;
use registrar_core::ports::{CustomerRepository, DomainRepository};
use registrar_core::saga::{OrchestratorError, RegistrationOutcome, DEFAULT_FALLBACK_NAMESERVERS};

use common::{zone_nameservers, FailingDomains, Harness};

fn fallback_nameservers() -> Vec<String> {
    DEFAULT_FALLBACK_NAMESERVERS.iter().map(|ns| ns.to_string()).collect()
}

#[tokio::test]
async fn test_full_registration_succeeds() {
    let h = Harness::new();
    let order = h.paid_order(1001, "example.com").await;

    let outcome = h.orchestrator.start(order.order_id).await.unwrap();

    let report = match &outcome {
        RegistrationOutcome::Success(report) => report,
        other => panic!("expected success, got {:?}", other),
    };
    assert_eq!(report.zone_id, "zone-example.com");
    assert_eq!(report.domain_id, "DOM-example.com");
    assert_eq!(report.nameservers, zone_nameservers());
    assert!(report.a_record_added);
    assert!(report.https_enabled);
    assert!(report.nameserver_update_success);
    assert_eq!(
        report.steps_completed,
        vec![
            "zone_created",
            "a_record_added",
            "tls_enabled",
            "customer_ready",
            "domain_registered",
            "nameservers_switched",
            "completed",
        ]
    );

    let stored = h.order(order.order_id).await;
    assert_eq!(stored.status, OrderStatus::Completed);
    assert!(stored.completed_at.is_some());
    assert_eq!(stored.checkpoint.customer_id.as_deref(), Some("CUST-1001"));

    let domain = h.store.find_domain_by_order(order.order_id).await.unwrap().unwrap();
    assert_eq!(domain.registrar_domain_id, "DOM-example.com");
    assert_eq!(domain.dns_zone_id.as_deref(), Some("zone-example.com"));
    assert_eq!(domain.nameservers, zone_nameservers());

    assert_eq!(outcome.kind(), None);
    assert!(stored.checkpoint.degraded.is_empty());
    assert_eq!(stored.checkpoint.failure_kind, None);

    // Registered with the registrar's defaults, switched afterwards.
    assert_eq!(*h.registrar.registered_with.lock().unwrap(), vec![None]);
    assert_eq!(h.events.names(), vec!["registration_completed"]);
}

#[tokio::test]
async fn test_missing_server_address_skips_a_record_and_tls() {
    let h = Harness::with_server_ip(None);
    let order = h.paid_order(1002, "example.net").await;

    let outcome = h.orchestrator.start(order.order_id).await.unwrap();

    assert!(matches!(outcome, RegistrationOutcome::Success(_)));
    let report = outcome.report().unwrap();
    assert!(!report.a_record_added);
    assert!(!report.https_enabled);
    assert_eq!(h.dns.record_calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.dns.tls_calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.order(order.order_id).await.status, OrderStatus::Completed);
}

#[tokio::test]
async fn test_failed_a_record_degrades_and_skips_tls() {
    let h = Harness::new();
    h.dns.fail_records.store(true, Ordering::SeqCst);
    let order = h.paid_order(1003, "example.org").await;

    let outcome = h.orchestrator.start(order.order_id).await.unwrap();

    match &outcome {
        RegistrationOutcome::PartialSuccess { report, degraded } => {
            assert_eq!(degraded, &vec![Step::ARecord]);
            assert!(!report.a_record_added);
            assert!(!report.https_enabled);
            assert!(report.nameserver_update_success);
        }
        other => panic!("expected partial success, got {:?}", other),
    }
    assert_eq!(outcome.kind(), Some(ErrorKind::PartialSuccess));
    assert_eq!(h.dns.record_calls.load(Ordering::SeqCst), 3);
    assert_eq!(h.dns.tls_calls.load(Ordering::SeqCst), 0);

    let stored = h.order(order.order_id).await;
    assert_eq!(stored.status, OrderStatus::Completed);
    assert_eq!(stored.checkpoint.failure_kind, Some(ErrorKind::PartialSuccess));
    assert_eq!(stored.checkpoint.degraded.len(), 1);
    let degraded = &stored.checkpoint.degraded[0];
    assert_eq!(degraded.step, Step::ARecord);
    assert_eq!(degraded.kind, ErrorKind::Transient);
    assert!(degraded.message.contains("connection reset"), "{}", degraded.message);
}

#[tokio::test]
async fn test_nameserver_switch_failure_keeps_fallback() {
    let h = Harness::new();
    h.registrar.fail_nameservers.store(true, Ordering::SeqCst);
    let order = h.paid_order(1004, "example.io").await;

    let outcome = h.orchestrator.start(order.order_id).await.unwrap();

    assert_eq!(outcome.degraded(), &[Step::NameserverSwitch]);
    let report = outcome.report().unwrap();
    assert!(!report.nameserver_update_success);
    assert_eq!(report.nameservers, fallback_nameservers());
    assert!(!report.steps_completed.contains(&"nameservers_switched".to_string()));

    let domain = h.store.find_domain_by_order(order.order_id).await.unwrap().unwrap();
    assert_eq!(domain.nameservers, fallback_nameservers());

    let stored = h.order(order.order_id).await;
    assert_eq!(stored.status, OrderStatus::Completed);
    assert!(!stored.checkpoint.nameserver_update_success);
    assert_eq!(stored.checkpoint.failure_kind, Some(ErrorKind::PartialSuccess));
    assert_eq!(stored.checkpoint.degraded_steps(), vec![Step::NameserverSwitch]);
    assert_eq!(stored.checkpoint.degraded[0].kind, ErrorKind::Transient);

    match h.events.events().last() {
        Some(DomainEvent::RegistrationCompleted { degraded, .. }) => {
            assert_eq!(degraded, &vec![Step::NameserverSwitch]);
        }
        other => panic!("expected registration_completed, got {:?}", other),
    }
}

#[tokio::test]
async fn test_refused_nameserver_switch_is_recorded_as_rejection() {
    let h = Harness::new();
    h.registrar.refuse_nameservers.store(true, Ordering::SeqCst);
    let order = h.paid_order(1012, "example.dev").await;

    let outcome = h.orchestrator.start(order.order_id).await.unwrap();

    assert_eq!(outcome.degraded(), &[Step::NameserverSwitch]);
    let stored = h.order(order.order_id).await;
    assert_eq!(stored.checkpoint.degraded[0].kind, ErrorKind::BusinessRejection);
    assert_eq!(h.registrar.nameserver_calls.load(Ordering::SeqCst), 1, "refusals are not retried");
}

#[tokio::test]
async fn test_lost_domain_write_halts_in_persistence_failure() {
    let h = Harness::with_domain_store(Arc::new(FailingDomains));
    let order = h.paid_order(1013, "example.com").await;

    let outcome = h.orchestrator.start(order.order_id).await.unwrap();

    match &outcome {
        RegistrationOutcome::Failure {
            step,
            kind,
            message,
            steps_completed,
            ..
        } => {
            assert_eq!(*step, Step::Registration);
            assert_eq!(*kind, ErrorKind::Fatal);
            assert!(message.contains("db connection lost"), "{}", message);
            assert!(steps_completed.contains(&"customer_ready".to_string()));
            assert!(!steps_completed.contains(&"domain_registered".to_string()));
        }
        other => panic!("expected failure, got {:?}", other),
    }

    // The registrar has the domain; its id is kept so it can be reconciled by hand.
    let stored = h.order(order.order_id).await;
    assert_eq!(stored.status, OrderStatus::FailedAtPersistence);
    assert!(stored.completed_at.is_some());
    assert_eq!(stored.checkpoint.failed_step, Some(Step::Registration));
    assert_eq!(stored.checkpoint.failure_kind, Some(ErrorKind::Fatal));
    assert_eq!(stored.checkpoint.domain_id.as_deref(), Some("DOM-example.com"));
    assert_eq!(h.registrar.register_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.events.names(), vec!["registration_step_failed"]);

    let err = h.orchestrator.start(order.order_id).await.unwrap_err();
    assert!(matches!(
        err,
        OrchestratorError::NotStartable { status: OrderStatus::FailedAtPersistence, .. }
    ));
    assert_eq!(h.registrar.register_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_zone_failure_halts_before_registration() {
    let h = Harness::new();
    h.dns.zone_failures.store(u32::MAX, Ordering::SeqCst);
    let order = h.paid_order(1005, "example.com").await;

    let outcome = h.orchestrator.start(order.order_id).await.unwrap();

    match &outcome {
        RegistrationOutcome::Failure {
            step,
            kind,
            cause,
            steps_completed,
            ..
        } => {
            assert_eq!(*step, Step::ZoneCreation);
            assert_eq!(*kind, ErrorKind::Fatal);
            assert_eq!(*cause, ErrorKind::Transient);
            assert!(steps_completed.is_empty());
        }
        other => panic!("expected failure, got {:?}", other),
    }

    let stored = h.order(order.order_id).await;
    assert_eq!(stored.status, OrderStatus::FailedAtZoneCreation);
    assert_eq!(stored.checkpoint.failed_step, Some(Step::ZoneCreation));
    assert_eq!(h.registrar.register_calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.store.domain_count().await, 0);
    assert_eq!(h.events.names(), vec!["registration_step_failed"]);
}

#[tokio::test]
async fn test_transient_zone_errors_are_retried() {
    let h = Harness::new();
    h.dns.zone_failures.store(2, Ordering::SeqCst);
    let order = h.paid_order(1006, "example.com").await;

    let outcome = h.orchestrator.start(order.order_id).await.unwrap();

    assert!(matches!(outcome, RegistrationOutcome::Success(_)));
    assert_eq!(h.dns.zone_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_rejected_registration_creates_no_domain() {
    let h = Harness::new();
    h.registrar.reject_register.store(true, Ordering::SeqCst);
    let order = h.paid_order(1007, "taken.com").await;

    let outcome = h.orchestrator.start(order.order_id).await.unwrap();

    match &outcome {
        RegistrationOutcome::Failure { step, kind, steps_completed, .. } => {
            assert_eq!(*step, Step::Registration);
            assert_eq!(*kind, ErrorKind::BusinessRejection);
            assert!(steps_completed.contains(&"customer_ready".to_string()));
        }
        other => panic!("expected failure, got {:?}", other),
    }
    assert_eq!(h.registrar.register_calls.load(Ordering::SeqCst), 1, "rejections are not retried");
    assert_eq!(h.store.domain_count().await, 0);

    // Completed steps are not undone.
    let stored = h.order(order.order_id).await;
    assert_eq!(stored.status, OrderStatus::FailedAtRegistration);
    assert_eq!(stored.checkpoint.zone_id.as_deref(), Some("zone-taken.com"));
    assert_eq!(
        h.store.find_customer(1007).await.unwrap().as_deref(),
        Some("CUST-1007")
    );
}

#[tokio::test]
async fn test_customer_failure_is_fatal() {
    let h = Harness::new();
    h.registrar.fail_customer.store(true, Ordering::SeqCst);
    let order = h.paid_order(1008, "example.com").await;

    let outcome = h.orchestrator.start(order.order_id).await.unwrap();

    assert!(outcome.is_failure());
    assert_eq!(h.order(order.order_id).await.status, OrderStatus::FailedAtCustomer);
    assert_eq!(h.registrar.register_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_second_start_is_rejected() {
    let h = Harness::new();
    let order = h.paid_order(1009, "example.com").await;

    h.orchestrator.start(order.order_id).await.unwrap();
    let err = h.orchestrator.start(order.order_id).await.unwrap_err();

    assert!(matches!(
        err,
        OrchestratorError::NotStartable { status: OrderStatus::Completed, .. }
    ));
    assert_eq!(h.registrar.register_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_concurrent_starts_run_once() {
    let h = Harness::new();
    let order = h.paid_order(1010, "example.com").await;

    let (a, b) = tokio::join!(
        h.orchestrator.start(order.order_id),
        h.orchestrator.start(order.order_id)
    );

    assert_eq!([a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count(), 1);
    assert_eq!(h.dns.zone_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.store.domain_count().await, 1);
}

#[tokio::test]
async fn test_unpaid_order_cannot_start() {
    let h = Harness::new();
    let order = h.awaiting_order(1011, "42.90").await;

    let err = h.orchestrator.start(order.order_id).await.unwrap_err();

    assert!(matches!(
        err,
        OrchestratorError::NotStartable { status: OrderStatus::AwaitingPayment, .. }
    ));
}

#[tokio::test]
async fn test_unknown_order() {
    let h = Harness::new();
    let err = h.orchestrator.start(uuid::Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::OrderNotFound(_)));
}

#[tokio::test]
async fn test_concurrent_orders_share_one_customer() {
    let h = Harness::new();
    let first = h.paid_order(2001, "first.com").await;
    let second = h.paid_order(2001, "second.com").await;

    let (a, b) = tokio::join!(
        h.orchestrator.start(first.order_id),
        h.orchestrator.start(second.order_id)
    );

    assert!(matches!(a.unwrap(), RegistrationOutcome::Success(_)));
    assert!(matches!(b.unwrap(), RegistrationOutcome::Success(_)));
    assert_eq!(h.registrar.customer_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_known_customer_skips_registrar_lookup() {
    let h = Harness::new();
    h.store.save_customer(3001, "CUST-EXISTING").await.unwrap();
    let order = h.paid_order(3001, "example.com").await;

    h.orchestrator.start(order.order_id).await.unwrap();

    assert_eq!(h.registrar.customer_calls.load(Ordering::SeqCst), 0);
    assert_eq!(
        h.order(order.order_id).await.checkpoint.customer_id.as_deref(),
        Some("CUST-EXISTING")
    );
}
