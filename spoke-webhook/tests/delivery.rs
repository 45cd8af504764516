use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use spoke_core::{Clock, Event, EventType, ManualClock, SystemClock};
use spoke_webhook::{
    sign_payload, DeliveryLog, DeliveryStatus, Dispatcher, NewWebhook, RetryPolicy, RetryWorker,
    WebhookConfig, WebhookRegistry,
};

fn test_config() -> WebhookConfig {
    WebhookConfig {
        max_tokens: 100,
        refill_period: Duration::from_secs(1),
        max_logs: 100,
        request_timeout: Duration::from_secs(5),
        check_interval: Duration::from_millis(20),
        retry: RetryPolicy::new(5, Duration::from_millis(50), Duration::from_secs(1), 2.0),
    }
}

fn build(
    config: WebhookConfig,
    clock: Arc<dyn Clock>,
) -> (Dispatcher, Arc<WebhookRegistry>, Arc<DeliveryLog>) {
    let registry = Arc::new(WebhookRegistry::new());
    let log = Arc::new(DeliveryLog::new(config.max_logs));
    let dispatcher = Dispatcher::new(registry.clone(), log.clone(), clock, config);
    (dispatcher, registry, log)
}

fn subscription(url: String, secret: &str, event_type: EventType) -> NewWebhook {
    NewWebhook {
        url,
        secret: secret.to_string(),
        subscribed_events: BTreeSet::from([event_type]),
    }
}

async fn wait_for(mut condition: impl FnMut() -> bool, what: &str) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test]
async fn test_delivery_retries_until_success() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let clock = Arc::new(ManualClock::start_now());
    let (dispatcher, registry, log) = build(test_config(), clock.clone());
    registry
        .register(subscription(
            format!("{}/hook", server.uri()),
            "",
            EventType::VersionPublished,
        ))
        .unwrap();

    let event = Event::empty(EventType::VersionPublished, clock.as_ref());
    let ids = dispatcher.dispatch(&event).await;
    assert_eq!(ids.len(), 1);
    let id = ids[0];

    wait_for(
        || {
            log.get(id)
                .map_or(false, |r| r.attempts == 1 && r.status == DeliveryStatus::Retrying)
        },
        "first attempt to fail",
    )
    .await;

    let worker = RetryWorker::new(dispatcher.clone());

    clock.advance(ChronoDuration::milliseconds(60));
    worker.run_once().await;
    let record = log.get(id).unwrap();
    assert_eq!(record.attempts, 2);
    assert_eq!(record.status, DeliveryStatus::Retrying);

    clock.advance(ChronoDuration::milliseconds(150));
    worker.run_once().await;
    let record = log.get(id).unwrap();
    assert_eq!(record.status, DeliveryStatus::Success);
    assert!(record.attempts >= 3);
    assert!(record.completed_at.is_some());
    assert!(record.duration.is_some());

    let requests = server.received_requests().await.unwrap();
    assert!(requests.len() >= 3, "endpoint saw {} POSTs", requests.len());
}

#[tokio::test]
async fn test_delivery_fails_permanently_after_retry_budget() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let config = WebhookConfig {
        retry: RetryPolicy::new(3, Duration::from_millis(30), Duration::from_secs(1), 2.0),
        ..test_config()
    };
    let clock = Arc::new(ManualClock::start_now());
    let (dispatcher, registry, log) = build(config, clock.clone());
    registry
        .register(subscription(server.uri(), "", EventType::ModuleDeleted))
        .unwrap();

    let event = Event::empty(EventType::ModuleDeleted, clock.as_ref());
    let id = dispatcher.dispatch(&event).await[0];
    wait_for(
        || log.get(id).map_or(false, |r| r.attempts == 1),
        "first attempt",
    )
    .await;

    let worker = RetryWorker::new(dispatcher.clone());
    for _ in 0..2 {
        clock.advance(ChronoDuration::seconds(2));
        worker.run_once().await;
    }

    let record = log.get(id).unwrap();
    assert_eq!(record.attempts, 3);
    assert_eq!(record.status, DeliveryStatus::Failed);
    assert!(record.completed_at.is_some());
    assert!(record.error_message.as_deref().unwrap().contains("503"));

    // A further sweep must not resurrect the terminal record.
    clock.advance(ChronoDuration::seconds(2));
    worker.run_once().await;
    assert_eq!(log.get(id).unwrap().attempts, 3);
}

#[tokio::test]
async fn test_delivery_is_signed_when_secret_present() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let clock = Arc::new(ManualClock::start_now());
    let (dispatcher, registry, log) = build(test_config(), clock.clone());
    registry
        .register(subscription(server.uri(), "hook-secret", EventType::BreakingChange))
        .unwrap();

    let event = Event::empty(EventType::BreakingChange, clock.as_ref());
    let id = dispatcher.dispatch(&event).await[0];
    wait_for(
        || log.get(id).map_or(false, |r| r.status == DeliveryStatus::Success),
        "delivery to succeed",
    )
    .await;

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];

    assert_eq!(
        request.headers.get("Content-Type").unwrap(),
        "application/json"
    );
    assert_eq!(
        request.headers.get("X-Spoke-Event").unwrap(),
        "breaking.change"
    );
    assert_eq!(
        request.headers.get("X-Spoke-Event-ID").unwrap().to_str().unwrap(),
        event.id.to_string()
    );
    let signature = request
        .headers
        .get("X-Spoke-Signature")
        .unwrap()
        .to_str()
        .unwrap();
    assert_eq!(signature, sign_payload("hook-secret", &request.body));

    let delivered: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
    assert_eq!(delivered["type"], "breaking.change");
    assert_eq!(delivered["id"], event.id.to_string());
}

#[tokio::test]
async fn test_unsigned_delivery_when_secret_empty() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let clock = Arc::new(ManualClock::start_now());
    let (dispatcher, registry, log) = build(test_config(), clock.clone());
    registry
        .register(subscription(server.uri(), "", EventType::ModuleCreated))
        .unwrap();

    let event = Event::empty(EventType::ModuleCreated, clock.as_ref());
    let id = dispatcher.dispatch(&event).await[0];
    wait_for(
        || log.get(id).map_or(false, |r| r.status == DeliveryStatus::Success),
        "delivery to succeed",
    )
    .await;

    let requests = server.received_requests().await.unwrap();
    assert!(requests[0].headers.get("X-Spoke-Signature").is_none());
}

#[tokio::test]
async fn test_rate_limit_admits_capacity_then_refills() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let config = WebhookConfig {
        max_tokens: 2,
        refill_period: Duration::from_secs(1),
        ..test_config()
    };
    let clock = Arc::new(ManualClock::start_now());
    let (dispatcher, registry, log) = build(config, clock.clone());
    registry
        .register(subscription(server.uri(), "", EventType::ModuleUpdated))
        .unwrap();

    let mut created = 0;
    for _ in 0..5 {
        let event = Event::empty(EventType::ModuleUpdated, clock.as_ref());
        created += dispatcher.dispatch(&event).await.len();
    }
    assert_eq!(created, 2, "exactly the bucket capacity is admitted");
    assert_eq!(log.len(), 2, "rate-limited deliveries leave no log entry");

    clock.advance(ChronoDuration::seconds(1));
    let event = Event::empty(EventType::ModuleUpdated, clock.as_ref());
    assert_eq!(dispatcher.dispatch(&event).await.len(), 1);
    assert_eq!(log.len(), 3);
}

#[tokio::test]
async fn test_each_subscriber_gets_its_own_delivery_record() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let clock = Arc::new(ManualClock::start_now());
    let (dispatcher, registry, log) = build(test_config(), clock.clone());
    let first = registry
        .register(subscription(server.uri(), "", EventType::ModuleCreated))
        .unwrap();
    let second = registry
        .register(subscription(server.uri(), "", EventType::ModuleCreated))
        .unwrap();

    let event = Event::empty(EventType::ModuleCreated, clock.as_ref());
    let ids = dispatcher.dispatch(&event).await;
    assert_eq!(ids.len(), 2);

    let by_event = log.by_event(event.id);
    assert_eq!(by_event.len(), 2);
    let webhook_ids: BTreeSet<_> = by_event.iter().map(|r| r.webhook_id).collect();
    assert_eq!(webhook_ids, BTreeSet::from([first.id, second.id]));
}

#[tokio::test]
async fn test_inactive_and_unsubscribed_webhooks_are_skipped() {
    let server = MockServer::start().await;
    let clock = Arc::new(ManualClock::start_now());
    let (dispatcher, registry, log) = build(test_config(), clock.clone());

    let webhook = registry
        .register(subscription(server.uri(), "", EventType::ModuleCreated))
        .unwrap();
    registry.deactivate(webhook.id).unwrap();

    let event = Event::empty(EventType::ModuleCreated, clock.as_ref());
    assert!(dispatcher.dispatch(&event).await.is_empty());

    registry.activate(webhook.id).unwrap();
    let unrelated = Event::empty(EventType::VersionDeprecated, clock.as_ref());
    assert!(dispatcher.dispatch(&unrelated).await.is_empty());
    assert!(log.is_empty());
}

#[tokio::test]
async fn test_retry_fails_when_subscriber_deactivated() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let clock = Arc::new(ManualClock::start_now());
    let (dispatcher, registry, log) = build(test_config(), clock.clone());
    let webhook = registry
        .register(subscription(server.uri(), "", EventType::ModuleCreated))
        .unwrap();

    let event = Event::empty(EventType::ModuleCreated, clock.as_ref());
    let id = dispatcher.dispatch(&event).await[0];
    wait_for(
        || log.get(id).map_or(false, |r| r.status == DeliveryStatus::Retrying),
        "first attempt to fail",
    )
    .await;

    registry.deactivate(webhook.id).unwrap();
    clock.advance(ChronoDuration::seconds(2));
    RetryWorker::new(dispatcher.clone()).run_once().await;

    let record = log.get(id).unwrap();
    assert_eq!(record.status, DeliveryStatus::Failed);
    assert_eq!(record.error_message.as_deref(), Some("webhook is inactive"));
    assert!(record.completed_at.is_some());
}

#[tokio::test]
async fn test_retry_fails_when_subscriber_unregistered() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let clock = Arc::new(ManualClock::start_now());
    let (dispatcher, registry, log) = build(test_config(), clock.clone());
    let webhook = registry
        .register(subscription(server.uri(), "", EventType::ModuleCreated))
        .unwrap();

    let event = Event::empty(EventType::ModuleCreated, clock.as_ref());
    let id = dispatcher.dispatch(&event).await[0];
    wait_for(
        || log.get(id).map_or(false, |r| r.status == DeliveryStatus::Retrying),
        "first attempt to fail",
    )
    .await;

    registry.unregister(webhook.id).unwrap();
    clock.advance(ChronoDuration::seconds(2));
    RetryWorker::new(dispatcher.clone()).run_once().await;

    let record = log.get(id).unwrap();
    assert_eq!(record.status, DeliveryStatus::Failed);
    assert_eq!(
        record.error_message.as_deref(),
        Some("webhook no longer registered")
    );
}

#[tokio::test]
async fn test_background_worker_drives_retries_to_success() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    // Real clock: the worker loop has to discover due retries on its own.
    let config = WebhookConfig {
        check_interval: Duration::from_millis(20),
        retry: RetryPolicy::new(5, Duration::from_millis(30), Duration::from_secs(1), 1.5),
        ..test_config()
    };
    let (dispatcher, registry, log) = build(config, Arc::new(SystemClock));
    registry
        .register(subscription(server.uri(), "", EventType::CompilationFailed))
        .unwrap();

    let event = Event::empty(EventType::CompilationFailed, &SystemClock);
    let id = dispatcher.dispatch(&event).await[0];

    let handle = RetryWorker::start(dispatcher.clone());
    wait_for(
        || log.get(id).map_or(false, |r| r.status == DeliveryStatus::Success),
        "worker to drive the delivery to success",
    )
    .await;
    handle.stop().await;

    let record = log.get(id).unwrap();
    assert!(record.attempts >= 3);
}

#[tokio::test]
async fn test_shutdown_leaves_in_flight_deliveries_pending() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let clock = Arc::new(ManualClock::start_now());
    let (dispatcher, registry, log) = build(test_config(), clock.clone());
    registry
        .register(subscription(server.uri(), "", EventType::ModuleCreated))
        .unwrap();

    let event = Event::empty(EventType::ModuleCreated, clock.as_ref());
    let id = dispatcher.dispatch(&event).await[0];
    dispatcher.shutdown();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(
        log.get(id).unwrap().status,
        DeliveryStatus::Pending,
        "cancelled delivery is abandoned, not completed"
    );
}
