//! Integration tests for bus delivery and request/reply semantics
//!
//! Covers routing policy (fan-out vs round-robin), reply completion, timeouts,
//! late replies, recipient failures, and interceptor aborts on every hop.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use contextual_bus_core::{
    keys, BusError, Context, DeliveryKind, DeliveryOptions, Direction, EventBus, Message,
};
use contextual_bus_runtime::{BusConfig, ConsumerContext, LocalEventBus};
use contextual_bus_testing::helpers::TEST_TIMEOUT;
use contextual_bus_testing::{eventually, init_test_tracing, InterceptionLog, RecordingInterceptor};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

// ============================================================================
// Test Fixtures
// ============================================================================

fn options_with_timeout(millis: u64) -> DeliveryOptions {
    DeliveryOptions::new().with_timeout(Duration::from_millis(millis))
}

/// Register a consumer on `address` that counts its deliveries.
fn counting_consumer(bus: &LocalEventBus, address: &str) -> Arc<AtomicUsize> {
    let count = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&count);
    bus.consumer(address, move |delivery| {
        let seen = Arc::clone(&seen);
        async move {
            seen.fetch_add(1, Ordering::SeqCst);
            let _ = delivery.reply("ok");
        }
    });
    count
}

// ============================================================================
// Routing
// ============================================================================

#[tokio::test]
async fn test_publish_reaches_every_consumer() {
    let bus = LocalEventBus::new();
    let first = counting_consumer(&bus, "news");
    let second = counting_consumer(&bus, "news");
    let other = counting_consumer(&bus, "weather");

    bus.publish(&Context::new(), "news", "headline".into(), DeliveryOptions::new());

    assert!(
        eventually(TEST_TIMEOUT, || {
            first.load(Ordering::SeqCst) == 1 && second.load(Ordering::SeqCst) == 1
        })
        .await
    );
    assert_eq!(other.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_send_round_robins_between_consumers() {
    let bus = LocalEventBus::new();
    let first = counting_consumer(&bus, "work");
    let second = counting_consumer(&bus, "work");

    for _ in 0..4 {
        bus.send(&Context::new(), "work", "job".into(), DeliveryOptions::new());
    }

    assert!(
        eventually(TEST_TIMEOUT, || {
            first.load(Ordering::SeqCst) + second.load(Ordering::SeqCst) == 4
        })
        .await
    );
    assert_eq!(first.load(Ordering::SeqCst), 2);
    assert_eq!(second.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_request_picks_exactly_one_consumer() {
    let bus = LocalEventBus::new();
    let first = counting_consumer(&bus, "foo");
    let second = counting_consumer(&bus, "foo");

    bus.request(&Context::new(), "foo", "bar".into(), DeliveryOptions::new())
        .await
        .unwrap();
    bus.request(&Context::new(), "foo", "bar".into(), DeliveryOptions::new())
        .await
        .unwrap();

    assert_eq!(first.load(Ordering::SeqCst), 1);
    assert_eq!(second.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unregistered_consumer_receives_nothing() {
    let bus = LocalEventBus::new();
    let count = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&count);
    let registration = bus.consumer("foo", move |_delivery| {
        let seen = Arc::clone(&seen);
        async move {
            seen.fetch_add(1, Ordering::SeqCst);
        }
    });

    assert!(bus.unregister_consumer(&registration));
    assert!(!bus.unregister_consumer(&registration));
    assert_eq!(bus.consumer_count("foo"), 0);

    let err = bus
        .request(&Context::new(), "foo", "bar".into(), DeliveryOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, BusError::NoConsumer { .. }));
    assert_eq!(count.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_send_without_consumer_is_silent() {
    let bus = LocalEventBus::new();
    bus.send(&Context::new(), "nobody", "x".into(), DeliveryOptions::new());
    bus.publish(&Context::new(), "nobody", "x".into(), DeliveryOptions::new());
    assert_eq!(bus.pending_requests(), 0);
}

// ============================================================================
// Request / Reply
// ============================================================================

#[tokio::test]
async fn test_reply_carries_body_and_headers() {
    let bus = LocalEventBus::new();
    bus.consumer("foo", |delivery| async move {
        let body = format!("{}!", delivery.message().body_str().unwrap_or_default());
        delivery
            .reply_with_options(body, DeliveryOptions::new().with_header("served-by", "foo"))
            .unwrap();
    });

    let reply = bus
        .request(
            &Context::new(),
            "foo",
            "bar".into(),
            DeliveryOptions::new().with_header("accept", "text/plain"),
        )
        .await
        .unwrap();

    assert_eq!(reply.body_str(), Some("bar!"));
    assert_eq!(reply.headers().get("served-by"), Some("foo"));
    assert_eq!(reply.reply_address(), None);
}

#[tokio::test]
async fn test_consumer_sees_request_headers() {
    let bus = LocalEventBus::new();
    bus.consumer("foo", |delivery| async move {
        let accept = delivery.headers().get("accept").unwrap_or("-").to_string();
        let _ = delivery.reply(accept);
    });

    let reply = bus
        .request(
            &Context::new(),
            "foo",
            "bar".into(),
            DeliveryOptions::new().with_header("accept", "text/plain"),
        )
        .await
        .unwrap();

    assert_eq!(reply.body_str(), Some("text/plain"));
}

#[tokio::test]
async fn test_recipient_failure() {
    let bus = LocalEventBus::new();
    bus.consumer("foo", |delivery| async move {
        delivery.fail(42, "not today");
    });

    let err = bus
        .request(&Context::new(), "foo", "bar".into(), DeliveryOptions::new())
        .await
        .unwrap_err();

    assert_eq!(
        err,
        BusError::RecipientFailure {
            address: "foo".to_string(),
            code: 42,
            message: "not today".to_string(),
        }
    );
}

#[tokio::test]
async fn test_timeout_then_late_reply_is_dropped() {
    let bus = LocalEventBus::new();
    let (results_tx, mut results_rx) = mpsc::unbounded_channel();
    bus.consumer("slow", move |delivery| {
        let results_tx = results_tx.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(80)).await;
            results_tx.send(delivery.reply("too late")).unwrap();
        }
    });

    let err = bus
        .request(&Context::new(), "slow", "bar".into(), options_with_timeout(20))
        .await
        .unwrap_err();

    assert_eq!(
        err,
        BusError::Timeout {
            address: "slow".to_string(),
            timeout: Duration::from_millis(20),
        }
    );
    assert_eq!(bus.pending_requests(), 0);

    // The late reply is accepted and discarded
    let late = tokio::time::timeout(Duration::from_secs(1), results_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(late.is_ok());
    assert_eq!(bus.pending_requests(), 0);
}

#[tokio::test]
async fn test_deadline_starts_when_request_is_issued() {
    init_test_tracing();
    let bus = LocalEventBus::new();
    bus.consumer("slow", |delivery| async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        let _ = delivery.reply("late");
    });

    let started = tokio::time::Instant::now();
    let reply = bus.request(&Context::new(), "slow", "bar".into(), options_with_timeout(50));
    tokio::time::sleep(Duration::from_millis(120)).await;

    let err = reply.await.unwrap_err();
    assert!(err.is_timeout());
    assert!(started.elapsed() < Duration::from_millis(150));
    assert_eq!(bus.pending_requests(), 0);
}

#[tokio::test]
async fn test_reply_after_deadline_before_first_poll_times_out() {
    init_test_tracing();
    let bus = LocalEventBus::new();
    let (results_tx, mut results_rx) = mpsc::unbounded_channel();
    bus.consumer("slow", move |delivery| {
        let results_tx = results_tx.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(60)).await;
            results_tx.send(delivery.reply("late")).unwrap();
        }
    });

    let reply = bus.request(&Context::new(), "slow", "bar".into(), options_with_timeout(20));
    // The reply lands while the request future is still unpolled
    let sent = tokio::time::timeout(TEST_TIMEOUT, results_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(sent.is_ok());

    assert_eq!(
        reply.await.unwrap_err(),
        BusError::Timeout {
            address: "slow".to_string(),
            timeout: Duration::from_millis(20),
        }
    );
    assert_eq!(bus.pending_requests(), 0);
}

#[tokio::test]
async fn test_default_timeout_from_config() {
    let bus = LocalEventBus::with_config(
        BusConfig::new().with_default_timeout(Duration::from_millis(15)),
    );
    bus.consumer("silent", |_delivery| async {});

    let err = bus
        .request(&Context::new(), "silent", "bar".into(), DeliveryOptions::new())
        .await
        .unwrap_err();

    assert!(err.is_timeout());
}

#[tokio::test]
async fn test_second_reply_is_ignored() {
    let bus = LocalEventBus::new();
    let (results_tx, mut results_rx) = mpsc::unbounded_channel();
    bus.consumer("foo", move |delivery| {
        let results_tx = results_tx.clone();
        async move {
            let first = delivery.reply("first");
            let second = delivery.reply("second");
            results_tx.send((first, second)).unwrap();
        }
    });

    let reply = bus
        .request(&Context::new(), "foo", "bar".into(), DeliveryOptions::new())
        .await
        .unwrap();
    assert_eq!(reply.body_str(), Some("first"));

    let (first, second) = results_rx.recv().await.unwrap();
    assert!(first.is_ok());
    assert!(second.is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_each_get_their_own_reply() {
    let bus = LocalEventBus::new();
    bus.consumer("echo", |delivery| async move {
        tokio::task::yield_now().await;
        let body = delivery.body().clone();
        let _ = delivery.reply(body);
    });

    let requests = (0..200).map(|i| {
        let bus = bus.clone();
        async move {
            let reply = bus
                .request(
                    &Context::new(),
                    "echo",
                    format!("req-{i}").into(),
                    DeliveryOptions::new(),
                )
                .await
                .unwrap();
            (i, reply)
        }
    });

    for (i, reply) in futures::future::join_all(requests).await {
        assert_eq!(reply.body_str(), Some(format!("req-{i}").as_str()));
    }
    assert_eq!(bus.pending_requests(), 0);
}

// ============================================================================
// Interceptor aborts
// ============================================================================

#[tokio::test]
async fn test_outbound_abort_fails_request_without_delivery() {
    let bus = LocalEventBus::new();
    let count = counting_consumer(&bus, "foo");
    let log = InterceptionLog::new();
    bus.interceptors().register(
        Direction::Outbound,
        RecordingInterceptor::new("gate", &log).aborting("closed"),
    );

    let err = bus
        .request(&Context::new(), "foo", "bar".into(), DeliveryOptions::new())
        .await
        .unwrap_err();

    assert_eq!(
        err,
        BusError::Aborted {
            address: "foo".to_string(),
            interceptor: "gate".to_string(),
            reason: "closed".to_string(),
        }
    );
    assert_eq!(count.load(Ordering::SeqCst), 0);
    assert_eq!(bus.pending_requests(), 0);
}

#[tokio::test]
async fn test_outbound_abort_on_publish_delivers_nothing() {
    let bus = LocalEventBus::new();
    let count = counting_consumer(&bus, "news");
    bus.interceptors()
        .add_outbound("veto", |_event| contextual_bus_core::Interception::abort("no"));

    bus.publish(&Context::new(), "news", "x".into(), DeliveryOptions::new());
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(count.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_inbound_abort_fails_request_without_invoking_consumer() {
    let bus = LocalEventBus::new();
    let count = counting_consumer(&bus, "foo");
    let log = InterceptionLog::new();
    bus.interceptors().register(
        Direction::Inbound,
        RecordingInterceptor::new("auth", &log).aborting_kind(DeliveryKind::Request, "no token"),
    );

    let err = bus
        .request(&Context::new(), "foo", "bar".into(), options_with_timeout(500))
        .await
        .unwrap_err();

    assert!(err.is_aborted());
    assert_eq!(count.load(Ordering::SeqCst), 0);
    assert_eq!(log.names(), vec!["auth"]);
}

#[tokio::test]
async fn test_reply_abort_reaches_both_sides() {
    let bus = LocalEventBus::new();
    let (results_tx, mut results_rx) = mpsc::unbounded_channel();
    bus.consumer("foo", move |delivery| {
        let results_tx = results_tx.clone();
        async move {
            results_tx.send(delivery.reply("secret")).unwrap();
        }
    });
    let log = InterceptionLog::new();
    bus.interceptors().register(
        Direction::Outbound,
        RecordingInterceptor::new("redact", &log).aborting_kind(DeliveryKind::Reply, "redacted"),
    );

    let err = bus
        .request(&Context::new(), "foo", "bar".into(), DeliveryOptions::new())
        .await
        .unwrap_err();
    let replier_result = results_rx.recv().await.unwrap();

    assert!(err.is_aborted());
    assert_eq!(replier_result.unwrap_err(), err);
}

#[tokio::test]
async fn test_inbound_abort_on_reply_fails_request() {
    let bus = LocalEventBus::new();
    bus.consumer("foo", |delivery| async move {
        let _ = delivery.reply("ok");
    });
    bus.interceptors().register(
        Direction::Inbound,
        RecordingInterceptor::new("reply-gate", &InterceptionLog::new())
            .aborting_kind(DeliveryKind::Reply, "tampered"),
    );

    let err = bus
        .request(&Context::new(), "foo", "bar".into(), DeliveryOptions::new())
        .await
        .unwrap_err();

    match err {
        BusError::Aborted {
            interceptor,
            reason,
            ..
        } => {
            assert_eq!(interceptor, "reply-gate");
            assert_eq!(reason, "tampered");
        }
        other => panic!("expected abort, got {other:?}"),
    }
}

#[tokio::test]
async fn test_interceptors_see_each_hop_in_order() {
    let bus = LocalEventBus::new();
    bus.consumer("foo", |delivery| async move {
        let _ = delivery.reply("ok");
    });
    let log = InterceptionLog::new();
    bus.interceptors()
        .register(Direction::Outbound, RecordingInterceptor::new("out", &log));
    bus.interceptors()
        .register(Direction::Inbound, RecordingInterceptor::new("in", &log));

    bus.request(&Context::new(), "foo", "bar".into(), DeliveryOptions::new())
        .await
        .unwrap();

    let hops: Vec<(String, DeliveryKind)> = log
        .records()
        .into_iter()
        .map(|record| (record.name, record.kind))
        .collect();
    assert_eq!(
        hops,
        vec![
            ("out".to_string(), DeliveryKind::Request),
            ("in".to_string(), DeliveryKind::Request),
            ("out".to_string(), DeliveryKind::Reply),
            ("in".to_string(), DeliveryKind::Reply),
        ]
    );
}

#[tokio::test]
async fn test_failure_travels_reply_chains() {
    let bus = LocalEventBus::new();
    bus.consumer("foo", |delivery| async move {
        delivery.fail(42, "not today");
    });
    let log = InterceptionLog::new();
    bus.interceptors()
        .register(Direction::Outbound, RecordingInterceptor::new("out", &log));
    bus.interceptors()
        .register(Direction::Inbound, RecordingInterceptor::new("in", &log));

    let err = bus
        .request(&Context::new(), "foo", "bar".into(), DeliveryOptions::new())
        .await
        .unwrap_err();

    assert!(matches!(err, BusError::RecipientFailure { code: 42, .. }));
    let failure_hops: Vec<_> = log
        .records()
        .into_iter()
        .filter(|record| record.kind == DeliveryKind::Reply)
        .collect();
    assert_eq!(failure_hops.len(), 2);
    for record in failure_hops {
        assert!(record
            .headers
            .contains(&(keys::FAILURE_CODE.to_string(), "42".to_string())));
    }
}

#[tokio::test]
async fn test_reply_interceptor_can_veto_failure() {
    let bus = LocalEventBus::new();
    bus.consumer("foo", |delivery| async move {
        delivery.fail(500, "stack trace");
    });
    bus.interceptors().register(
        Direction::Outbound,
        RecordingInterceptor::new("redact", &InterceptionLog::new())
            .aborting_kind(DeliveryKind::Reply, "redacted"),
    );

    let err = bus
        .request(&Context::new(), "foo", "bar".into(), DeliveryOptions::new())
        .await
        .unwrap_err();

    assert!(err.is_aborted());
    assert_eq!(bus.pending_requests(), 0);
}

// ============================================================================
// Consumer context mode
// ============================================================================

#[tokio::test]
async fn test_fresh_consumer_context_does_not_inherit() {
    let bus = LocalEventBus::with_config(
        BusConfig::new().with_consumer_context(ConsumerContext::Fresh),
    );
    let seen = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&seen);
    bus.consumer("foo", move |delivery| {
        let sink = Arc::clone(&sink);
        async move {
            *sink.lock().unwrap() = Some(delivery.context().snapshot());
            let _ = delivery.reply("ok");
        }
    });

    let context = Context::from_entries([("user", "bob")]);
    bus.request(&context, "foo", "bar".into(), DeliveryOptions::new())
        .await
        .unwrap();

    assert!(seen.lock().unwrap().as_ref().unwrap().is_empty());
}

#[tokio::test]
async fn test_inherited_consumer_context_is_a_snapshot() {
    let bus = LocalEventBus::new();
    let seen = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&seen);
    bus.consumer("foo", move |delivery| {
        let sink = Arc::clone(&sink);
        async move {
            *sink.lock().unwrap() = Some(delivery.context().get("user"));
            let _ = delivery.reply("ok");
        }
    });

    let context = Context::from_entries([("user", "bob")]);
    let reply = bus.request(&context, "foo", "bar".into(), DeliveryOptions::new());
    context.put("user", "mallory");
    reply.await.unwrap();

    assert_eq!(
        seen.lock().unwrap().clone().unwrap().as_deref(),
        Some("bob")
    );
}

#[tokio::test]
async fn test_reply_to_plain_message_is_noop() {
    let bus = LocalEventBus::new();
    let result = bus.reply(
        &Context::new(),
        &Message::new("foo", "bar"),
        "ignored".into(),
        DeliveryOptions::new(),
    );
    assert!(result.is_ok());
    bus.fail(
        &Context::new(),
        &Message::new("foo", "bar"),
        1,
        "ignored".to_string(),
    );
}
