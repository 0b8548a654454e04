use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use campaign_channels::DispatchScheduler;
use campaign_core::channels::{OutboundMessage, Transport};
use campaign_core::config::{DispatchConfig, RenderConfig};
use campaign_core::error::TransportError;
use campaign_core::templates::TemplateRenderer;
use campaign_core::types::{Campaign, CampaignStatus, DeliveryRecord, DispatchReport};
use campaign_management::{
    management_router, CampaignSender, InMemoryRecipientDirectory, ManagementState,
    ManagementStore,
};
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

struct AcceptAll;

#[async_trait]
impl Transport for AcceptAll {
    async fn send(&self, message: &OutboundMessage) -> Result<String, TransportError> {
        Ok(format!("ok-{}", message.to))
    }

    fn name(&self) -> &'static str {
        "accept-all"
    }
}

fn app() -> (Router, ManagementState) {
    let store = Arc::new(ManagementStore::new());
    let directory = Arc::new(InMemoryRecipientDirectory::new());
    let scheduler = DispatchScheduler::new(
        &DispatchConfig {
            batch_size: 10,
            inter_batch_delay_ms: 0,
            transport_timeout_ms: 1_000,
        },
        Arc::new(AcceptAll),
        store.clone(),
    )
    .unwrap();
    let sender = Arc::new(CampaignSender::new(
        store.clone(),
        directory.clone(),
        TemplateRenderer::new(&RenderConfig::default()),
        scheduler,
    ));
    let state = ManagementState {
        store,
        directory,
        sender,
    };
    (management_router(state.clone()), state)
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    let request = match body {
        Some(body) => request.body(Body::from(body.to_string())).unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

async fn create_alert(app: &Router) -> Campaign {
    let (status, body) = call(
        app,
        "POST",
        "/api/v1/management/campaigns",
        Some(json!({
            "kind": "alert",
            "subject": "Service notice",
            "content": {"headline": "Planned maintenance", "body": "Tonight at 22:00.", "severity": "warning"}
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    serde_json::from_value(body).unwrap()
}

#[tokio::test]
async fn test_send_flow_over_http() {
    let (app, _) = app();
    let (status, body) = call(
        &app,
        "POST",
        "/api/v1/management/recipients",
        Some(json!({"recipients": [
            {"address": "a@example.com"},
            {"address": "b@example.com", "preferred_send_hour": 9}
        ]})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["created"], 2);

    let campaign = create_alert(&app).await;
    assert_eq!(campaign.status, CampaignStatus::Draft);

    let uri = format!("/api/v1/management/campaigns/{}/send", campaign.id);
    let (status, body) = call(&app, "POST", &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    let report: DispatchReport = serde_json::from_value(body).unwrap();
    assert_eq!(report.scheduled, 2);
    assert_eq!(report.failed, 0);

    let (status, body) = call(&app, "POST", &uri, None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "state_conflict");

    let uri = format!("/api/v1/management/campaigns/{}/deliveries", campaign.id);
    let (status, body) = call(&app, "GET", &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    let records: Vec<DeliveryRecord> = serde_json::from_value(body).unwrap();
    assert_eq!(records.len(), 2);
}

#[tokio::test]
async fn test_unknown_campaign_send_is_not_found() {
    let (app, _) = app();
    let uri = format!("/api/v1/management/campaigns/{}/send", Uuid::new_v4());
    let (status, body) = call(&app, "POST", &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");
}

#[tokio::test]
async fn test_unreachable_roster_maps_to_service_unavailable() {
    let (app, state) = app();
    let campaign = create_alert(&app).await;
    state.directory.set_available(false);

    let uri = format!("/api/v1/management/campaigns/{}/send", campaign.id);
    let (status, body) = call(&app, "POST", &uri, None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "setup_failed");
    assert_eq!(
        state.store.get_campaign(campaign.id).unwrap().status,
        CampaignStatus::Draft
    );
}

#[tokio::test]
async fn test_empty_subject_is_rejected() {
    let (app, _) = app();
    let (status, body) = call(
        &app,
        "POST",
        "/api/v1/management/campaigns",
        Some(json!({"kind": "broadcast", "subject": "  ", "content": {}})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_failed");
}

#[tokio::test]
async fn test_experiment_lifecycle_over_http() {
    let (app, _) = app();
    let (status, body) = call(
        &app,
        "POST",
        "/api/v1/management/experiments",
        Some(json!({"name": "subject test", "axis": "subject", "variants": ["One", "Two"]})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = body["id"].as_str().unwrap().to_string();

    let (status, body) = call(
        &app,
        "POST",
        &format!("/api/v1/management/experiments/{id}/start"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "running");

    let (status, body) = call(
        &app,
        "GET",
        &format!("/api/v1/management/experiments/{id}/distribution"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 2);

    let (status, _) = call(
        &app,
        "POST",
        &format!("/api/v1/management/experiments/{id}/complete"),
        Some(json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_unsubscribe_link() {
    let (app, state) = app();
    let (recipient, _) = state
        .directory
        .upsert(campaign_management::models::NewRecipient {
            address: "leaving@example.com".to_string(),
            preferred_send_hour: None,
        })
        .unwrap();

    let (status, _) = call(
        &app,
        "GET",
        &format!("/unsubscribe/{}", recipient.unsubscribe_token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = call(&app, "GET", "/unsubscribe/not-a-token", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_release_without_body_uses_default_note() {
    let (app, state) = app();
    let campaign = create_alert(&app).await;
    let uri = format!("/api/v1/management/campaigns/{}/release", campaign.id);

    state
        .store
        .try_begin_send(campaign.id, Utc::now() - Duration::hours(2))
        .unwrap();
    let (status, body) = call(&app, "POST", &uri, None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "state_conflict");

    assert!(state.store.flag_for_review(campaign.id));
    let (status, body) = call(&app, "POST", &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    let released: Campaign = serde_json::from_value(body).unwrap();
    assert_eq!(released.status, CampaignStatus::Draft);
    assert_eq!(
        released.failure_note.as_deref(),
        Some("released by operator after stalled send")
    );
}

#[tokio::test]
async fn test_release_with_note() {
    let (app, state) = app();
    let campaign = create_alert(&app).await;
    state
        .store
        .try_begin_send(campaign.id, Utc::now() - Duration::hours(2))
        .unwrap();
    state.store.flag_for_review(campaign.id);

    let uri = format!("/api/v1/management/campaigns/{}/release", campaign.id);
    let (status, body) = call(&app, "POST", &uri, Some(json!({"note": "worker OOM"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["failure_note"], "worker OOM");
}
