//! Axum REST handlers for the management API.

use crate::models::*;
use crate::recipients::InMemoryRecipientDirectory;
use crate::store::ManagementStore;
use crate::workflows::CampaignSender;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Html;
use axum::Json;
use campaign_core::error::CampaignError;
use campaign_core::types::{Campaign, DeliveryRecord, DispatchReport, Experiment};
use std::sync::Arc;
use uuid::Uuid;

/// Shared management state.
#[derive(Clone)]
pub struct ManagementState {
    pub store: Arc<ManagementStore>,
    pub directory: Arc<InMemoryRecipientDirectory>,
    pub sender: Arc<CampaignSender>,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(err: CampaignError) -> ApiError {
    let (status, code) = match &err {
        CampaignError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
        CampaignError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_failed"),
        CampaignError::StateConflict(_) => (StatusCode::CONFLICT, "state_conflict"),
        CampaignError::Setup(_) => (StatusCode::SERVICE_UNAVAILABLE, "setup_failed"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
    };
    (
        status,
        Json(ErrorResponse {
            error: code.to_string(),
            message: err.to_string(),
        }),
    )
}

// ─── Campaigns ─────────────────────────────────────────────────────────────

pub async fn list_campaigns(State(state): State<ManagementState>) -> Json<Vec<Campaign>> {
    Json(state.store.list_campaigns())
}

pub async fn get_campaign(
    State(state): State<ManagementState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Campaign>, StatusCode> {
    state
        .store
        .get_campaign(id)
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

pub async fn create_campaign(
    State(state): State<ManagementState>,
    Json(req): Json<CreateCampaignRequest>,
) -> Result<(StatusCode, Json<Campaign>), ApiError> {
    let campaign = state.store.create_campaign(req).map_err(api_error)?;
    metrics::counter!("management.campaigns.created").increment(1);
    Ok((StatusCode::CREATED, Json(campaign)))
}

/// Synchronous send trigger: returns once every batch has been submitted.
pub async fn send_campaign(
    State(state): State<ManagementState>,
    Path(id): Path<Uuid>,
) -> Result<Json<DispatchReport>, ApiError> {
    state
        .sender
        .submit_for_send(id)
        .await
        .map(Json)
        .map_err(api_error)
}

pub async fn release_campaign(
    State(state): State<ManagementState>,
    Path(id): Path<Uuid>,
    body: Option<Json<ReleaseCampaignRequest>>,
) -> Result<Json<Campaign>, ApiError> {
    let note = body
        .map(|Json(req)| req.note)
        .unwrap_or_else(default_release_note);
    state
        .sender
        .release_stuck(id, note)
        .map(Json)
        .map_err(api_error)
}

pub async fn list_deliveries(
    State(state): State<ManagementState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<DeliveryRecord>>, StatusCode> {
    if state.store.get_campaign(id).is_none() {
        return Err(StatusCode::NOT_FOUND);
    }
    Ok(Json(state.store.deliveries_for(id)))
}

// ─── Experiments ───────────────────────────────────────────────────────────

pub async fn create_experiment(
    State(state): State<ManagementState>,
    Json(req): Json<CreateExperimentRequest>,
) -> Result<(StatusCode, Json<Experiment>), ApiError> {
    let experiment = state.store.create_experiment(req).map_err(api_error)?;
    metrics::counter!("management.experiments.created").increment(1);
    Ok((StatusCode::CREATED, Json(experiment)))
}

pub async fn get_experiment(
    State(state): State<ManagementState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Experiment>, StatusCode> {
    state
        .store
        .get_experiment(id)
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

pub async fn start_experiment(
    State(state): State<ManagementState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Experiment>, ApiError> {
    state.store.start_experiment(id).map(Json).map_err(api_error)
}

pub async fn complete_experiment(
    State(state): State<ManagementState>,
    Path(id): Path<Uuid>,
    Json(req): Json<CompleteExperimentRequest>,
) -> Result<Json<Experiment>, ApiError> {
    state
        .store
        .complete_experiment(id, req.winner)
        .map(Json)
        .map_err(api_error)
}

pub async fn experiment_distribution(
    State(state): State<ManagementState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<VariantCount>>, StatusCode> {
    let experiment = state.store.get_experiment(id).ok_or(StatusCode::NOT_FOUND)?;
    let counts = state.store.variant_distribution(id);
    Ok(Json(
        experiment
            .variants
            .into_iter()
            .map(|v| VariantCount {
                recipients: counts.get(&v.id).copied().unwrap_or(0),
                variant_id: v.id,
                value: v.value,
            })
            .collect(),
    ))
}

// ─── Recipients ────────────────────────────────────────────────────────────

pub async fn upsert_recipients(
    State(state): State<ManagementState>,
    Json(req): Json<UpsertRecipientsRequest>,
) -> Result<Json<UpsertRecipientsResponse>, ApiError> {
    let mut response = UpsertRecipientsResponse {
        created: 0,
        updated: 0,
    };
    for recipient in req.recipients {
        let (_, created) = state.directory.upsert(recipient).map_err(api_error)?;
        if created {
            response.created += 1;
        } else {
            response.updated += 1;
        }
    }
    Ok(Json(response))
}

pub async fn unsubscribe(
    State(state): State<ManagementState>,
    Path(token): Path<String>,
) -> Result<Html<&'static str>, StatusCode> {
    state
        .directory
        .unsubscribe_by_token(&token)
        .map(|_| Html("<p>You have been unsubscribed.</p>"))
        .ok_or(StatusCode::NOT_FOUND)
}

pub async fn health() -> &'static str {
    "OK"
}
