use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header::CONTENT_TYPE, Method, Request, StatusCode};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use uuid::Uuid;

use acerto::{
    api,
    config::{GatewayCredentials, Settings},
    domain::{GatewayKind, Order, OrderStatus, PaymentMethod},
    gateways::{testing::FakeGateway, CobrePagGateway, GatewayRegistry},
    repository::{NotificationEndpointRepository, OrderRepository},
    service::ServiceContext,
};

struct Harness {
    app: axum::Router,
    services: Arc<ServiceContext>,
    fake: Arc<FakeGateway>,
}

async fn setup() -> anyhow::Result<Harness> {
    let pool = SqlitePool::connect(":memory:").await?;
    sqlx::migrate!("./migrations").run(&pool).await?;

    let mut settings = Settings::default();
    settings.gateways.cobrepag = Some(GatewayCredentials {
        base_url: "http://cobrepag.invalid".to_string(),
        merchant_id: Some("merchant".to_string()),
        merchant_key: Some("key".to_string()),
        ..Default::default()
    });
    settings.gateways.stripe = Some(GatewayCredentials {
        secret_key: Some("sk_test_1".to_string()),
        webhook_secret: Some("whsec_1".to_string()),
        ..Default::default()
    });
    settings.gateways.legacy_webhook_secret = Some("legacy-secret".to_string());
    // Fail fast in tests: one attempt, no backoff, against a closed port.
    settings.notifications.max_attempts = 1;
    settings.notifications.timeout_secs = 2;
    settings.notifications.retry_delay_secs = 0;
    settings.sync.throttle_ms = 0;
    let settings = Arc::new(settings);

    let http = reqwest::Client::new();
    let fake = Arc::new(FakeGateway::new(GatewayKind::Stripe));
    let mut registry = GatewayRegistry::new();
    registry.register(Arc::new(CobrePagGateway::new(http.clone())));
    registry.register(fake.clone());
    let registry = Arc::new(registry);

    let services = Arc::new(ServiceContext::new(
        pool,
        registry.clone(),
        settings.clone(),
        http,
        CancellationToken::new(),
    ));
    services
        .notification_endpoints
        .ensure_url("http://127.0.0.1:9/hooks")
        .await?;

    let app = api::create_app(services.clone(), registry, settings);
    Ok(Harness {
        app,
        services,
        fake,
    })
}

fn order(id: &str, gateway: GatewayKind, status: OrderStatus) -> Order {
    Order {
        id: Uuid::parse_str(id).unwrap(),
        total_cents: 25900,
        payment_method: PaymentMethod::CreditCard,
        gateway: Some(gateway),
        gateway_transaction_id: None,
        gateway_status: None,
        status,
        created_at: Utc::now(),
        updated_at: Utc::now(),
        shipped_at: None,
        delivered_at: None,
    }
}

async fn post_json(app: &axum::Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri(uri)
                .header(CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

const ORDER_A: &str = "11111111-1111-1111-1111-111111111111";

fn captured_webhook() -> Value {
    json!({
        "attributes": {
            "order_id": ORDER_A,
            "status": {"code": "8", "message": "Capturado"},
            "tid": "99999999999"
        }
    })
}

#[tokio::test]
async fn webhook_marks_pending_order_paid() -> anyhow::Result<()> {
    let h = setup().await?;
    h.services
        .orders
        .create(order(ORDER_A, GatewayKind::Cobrepag, OrderStatus::Pending))
        .await?;

    let (status, body) = post_json(&h.app, "/webhooks/cobrepag", captured_webhook()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["status"], "paid");
    assert_eq!(body["order_id"], ORDER_A);

    let order = h
        .services
        .orders
        .find_by_id(Uuid::parse_str(ORDER_A)?)
        .await?
        .unwrap();
    assert_eq!(order.status, OrderStatus::Paid);
    assert_eq!(order.gateway_transaction_id.as_deref(), Some("99999999999"));
    assert_eq!(order.gateway_status.as_deref(), Some("Capturado"));

    let logs = h.services.orders.payment_logs(order.id).await?;
    assert_eq!(logs.len(), 1);
    assert!(logs[0].success);

    // The downstream notification was attempted (and its failure against a
    // closed port recorded) before the webhook response went out.
    let endpoints = h.services.notification_endpoints.list_enabled().await?;
    assert!(endpoints[0].last_attempt_at.is_some());
    assert!(endpoints[0].last_error.is_some());

    Ok(())
}

#[tokio::test]
async fn webhook_redelivery_is_idempotent() -> anyhow::Result<()> {
    let h = setup().await?;
    h.services
        .orders
        .create(order(ORDER_A, GatewayKind::Cobrepag, OrderStatus::Pending))
        .await?;

    let (first, _) = post_json(&h.app, "/webhooks/cobrepag", captured_webhook()).await;
    let (second, body) = post_json(&h.app, "/webhooks/cobrepag", captured_webhook()).await;
    assert_eq!(first, StatusCode::OK);
    assert_eq!(second, StatusCode::OK);
    assert_eq!(body["status"], "paid");

    let order_id = Uuid::parse_str(ORDER_A)?;
    let order = h.services.orders.find_by_id(order_id).await?.unwrap();
    assert_eq!(order.status, OrderStatus::Paid);

    // Each delivery leaves its own audit entry; the second changes nothing.
    let logs = h.services.orders.payment_logs(order_id).await?;
    assert_eq!(logs.len(), 2);

    Ok(())
}

#[tokio::test]
async fn stale_cancellation_cannot_unpay_an_order() -> anyhow::Result<()> {
    let h = setup().await?;
    h.services
        .orders
        .create(order(ORDER_A, GatewayKind::Cobrepag, OrderStatus::Pending))
        .await?;

    post_json(&h.app, "/webhooks/cobrepag", captured_webhook()).await;

    // A replayed/out-of-order cancellation arrives afterwards
    let (status, body) = post_json(
        &h.app,
        "/webhooks/cobrepag",
        json!({
            "attributes": {
                "order_id": ORDER_A,
                "status": {"code": "7", "message": "Cancelado"},
                "tid": "99999999999"
            }
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "paid");

    let order = h
        .services
        .orders
        .find_by_id(Uuid::parse_str(ORDER_A)?)
        .await?
        .unwrap();
    assert_eq!(order.status, OrderStatus::Paid);

    let logs = h.services.orders.payment_logs(order.id).await?;
    assert_eq!(logs.len(), 2);
    assert!(!logs[1].success);

    Ok(())
}

#[tokio::test]
async fn paid_order_can_still_be_refunded() -> anyhow::Result<()> {
    let h = setup().await?;
    h.services
        .orders
        .create(order(ORDER_A, GatewayKind::Cobrepag, OrderStatus::Paid))
        .await?;

    let (status, body) = post_json(
        &h.app,
        "/webhooks/cobrepag",
        json!({"order_id": ORDER_A, "status": {"codigo": 6, "mensagem": "Estornado"}}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "refunded");

    Ok(())
}

#[tokio::test]
async fn ambiguous_truncated_reference_is_rejected() -> anyhow::Result<()> {
    let h = setup().await?;
    h.services
        .orders
        .create(order(ORDER_A, GatewayKind::Cobrepag, OrderStatus::Pending))
        .await?;
    h.services
        .orders
        .create(order(
            "11111111-1111-1122-2222-222222222222",
            GatewayKind::Cobrepag,
            OrderStatus::Pending,
        ))
        .await?;

    let (status, body) = post_json(
        &h.app,
        "/webhooks/cobrepag",
        json!({"pedido": "11111111-1111-11", "status": {"codigo": 8, "mensagem": "Capturado"}}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    // Neither candidate was touched
    for id in [ORDER_A, "11111111-1111-1122-2222-222222222222"] {
        let order = h
            .services
            .orders
            .find_by_id(Uuid::parse_str(id)?)
            .await?
            .unwrap();
        assert_eq!(order.status, OrderStatus::Pending);
    }

    Ok(())
}

#[tokio::test]
async fn unknown_reference_is_not_found() -> anyhow::Result<()> {
    let h = setup().await?;
    let (status, _) = post_json(
        &h.app,
        "/webhooks/cobrepag",
        json!({"pedido": "deadbeef-dead-be", "status": {"codigo": 8}}),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn unrecognized_payload_is_acknowledged_and_ignored() -> anyhow::Result<()> {
    let h = setup().await?;
    let (status, body) = post_json(&h.app, "/webhooks/cobrepag", json!({"hello": "world"})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert!(body["order_id"].is_null());
    Ok(())
}

#[tokio::test]
async fn legacy_webhook_requires_valid_signature() -> anyhow::Result<()> {
    let h = setup().await?;
    h.services
        .orders
        .create(order(ORDER_A, GatewayKind::Cobrepag, OrderStatus::Pending))
        .await?;

    let body = json!({"order_id": ORDER_A, "status": "cancelled"}).to_string();
    let mut mac = Hmac::<Sha256>::new_from_slice(b"legacy-secret").unwrap();
    mac.update(body.as_bytes());
    let signature = BASE64.encode(mac.finalize().into_bytes());

    // Unsigned: rejected
    let response = h
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/webhooks/legacy")
                .header(CONTENT_TYPE, "application/json")
                .body(Body::from(body.clone()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Signed: the cancellation lands
    let response = h
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/webhooks/legacy")
                .header(CONTENT_TYPE, "application/json")
                .header("X-Webhook-Signature", signature)
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let order = h
        .services
        .orders
        .find_by_id(Uuid::parse_str(ORDER_A)?)
        .await?
        .unwrap();
    assert_eq!(order.status, OrderStatus::Canceled);

    Ok(())
}

#[tokio::test]
async fn order_reference_can_arrive_as_query_parameter() -> anyhow::Result<()> {
    let h = setup().await?;
    h.services
        .orders
        .create(order(ORDER_A, GatewayKind::Cobrepag, OrderStatus::Pending))
        .await?;

    let (status, body) = post_json(
        &h.app,
        &format!("/webhooks/cobrepag?id={}", ORDER_A),
        json!({"status": {"codigo": 8, "mensagem": "Aprovada"}, "tid": "55555"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "paid");

    Ok(())
}

#[tokio::test]
async fn batch_sync_polls_only_recent_pending_orders() -> anyhow::Result<()> {
    let h = setup().await?;

    let mut recent = order(ORDER_A, GatewayKind::Stripe, OrderStatus::Pending);
    recent.gateway_transaction_id = Some("pi_12345678901234567890".to_string());
    h.services.orders.create(recent).await?;
    h.fake
        .set_probe("pi_12345678901234567890", None, Some("succeeded"));

    let mut stale = order(
        "22222222-2222-2222-2222-222222222222",
        GatewayKind::Stripe,
        OrderStatus::Pending,
    );
    stale.created_at = Utc::now() - chrono::Duration::hours(100);
    stale.updated_at = stale.created_at;
    h.services.orders.create(stale).await?;

    let report = h.services.engine.sync_pending_orders(None, None).await?;
    assert_eq!(report.scanned, 1);
    assert_eq!(report.updated, 1);
    assert_eq!(report.failed, 0);

    // Only the recent order was polled; the stale one was left alone.
    assert_eq!(
        h.fake
            .verify_calls
            .load(std::sync::atomic::Ordering::SeqCst),
        1
    );

    let updated = h
        .services
        .orders
        .find_by_id(Uuid::parse_str(ORDER_A)?)
        .await?
        .unwrap();
    assert_eq!(updated.status, OrderStatus::Paid);

    let stale = h
        .services
        .orders
        .find_by_id(Uuid::parse_str("22222222-2222-2222-2222-222222222222")?)
        .await?
        .unwrap();
    assert_eq!(stale.status, OrderStatus::Pending);

    Ok(())
}

#[tokio::test]
async fn single_order_sync_applies_cancellation() -> anyhow::Result<()> {
    let h = setup().await?;

    let mut pending = order(ORDER_A, GatewayKind::Stripe, OrderStatus::Pending);
    pending.gateway_transaction_id = Some("pi_00000000001111111111".to_string());
    h.services.orders.create(pending).await?;
    h.fake
        .set_probe("pi_00000000001111111111", None, Some("canceled"));

    let outcome = h
        .services
        .engine
        .sync_order(Uuid::parse_str(ORDER_A)?)
        .await?;
    assert!(outcome.applied);
    assert_eq!(outcome.status, OrderStatus::Canceled);

    Ok(())
}

#[tokio::test]
async fn sync_degrades_unknown_poll_results_to_pending() -> anyhow::Result<()> {
    let h = setup().await?;

    let mut pending = order(ORDER_A, GatewayKind::Stripe, OrderStatus::Pending);
    pending.gateway_transaction_id = Some("pi_unknown_transaction01".to_string());
    h.services.orders.create(pending).await?;
    // No scripted probe: the fake reports an empty status, like a gateway
    // that has not registered the transaction yet.

    let outcome = h
        .services
        .engine
        .sync_order(Uuid::parse_str(ORDER_A)?)
        .await?;
    assert!(!outcome.applied);
    assert_eq!(outcome.status, OrderStatus::Pending);

    Ok(())
}

#[tokio::test]
async fn cors_preflight_is_answered() -> anyhow::Result<()> {
    let h = setup().await?;
    let response = h
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::OPTIONS)
                .uri("/webhooks/cobrepag")
                .header("Origin", "https://merchant.example")
                .header("Access-Control-Request-Method", "POST")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response
        .headers()
        .contains_key("access-control-allow-origin"));
    Ok(())
}
