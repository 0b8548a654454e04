//! Request and response bodies for the management API.

use campaign_core::types::{CampaignKind, ExperimentAxis};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ─── Campaign ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCampaignRequest {
    pub kind: CampaignKind,
    pub subject: String,
    pub content: serde_json::Value,
    #[serde(default)]
    pub experiment_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseCampaignRequest {
    #[serde(default = "default_release_note")]
    pub note: String,
}

pub(crate) fn default_release_note() -> String {
    "released by operator after stalled send".to_string()
}

// ─── Experiment ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateExperimentRequest {
    pub name: String,
    pub axis: ExperimentAxis,
    /// Variant values in assignment order.
    pub variants: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompleteExperimentRequest {
    #[serde(default)]
    pub winner: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantCount {
    pub variant_id: Uuid,
    pub value: String,
    pub recipients: usize,
}

// ─── Recipients ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRecipient {
    pub address: String,
    #[serde(default)]
    pub preferred_send_hour: Option<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsertRecipientsRequest {
    pub recipients: Vec<NewRecipient>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsertRecipientsResponse {
    pub created: usize,
    pub updated: usize,
}

// ─── Errors ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}
