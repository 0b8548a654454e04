use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ─── Campaigns ──────────────────────────────────────────────────────────

/// Closed set of campaign layouts. Each kind has its own renderer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CampaignKind {
    Brief,
    Alert,
    Broadcast,
}

impl CampaignKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignKind::Brief => "brief",
            CampaignKind::Alert => "alert",
            CampaignKind::Broadcast => "broadcast",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    #[default]
    Draft,
    Sending,
    Sent,
}

/// One content broadcast. Only the campaign state machine mutates it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: Uuid,
    pub kind: CampaignKind,
    pub subject: String,
    /// Kind-tagged payload supplied by the authoring pipeline.
    pub content: serde_json::Value,
    pub status: CampaignStatus,
    pub experiment_id: Option<Uuid>,
    pub recipient_count: usize,
    pub sent_at: Option<DateTime<Utc>>,
    pub failure_note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub sending_started_at: Option<DateTime<Utc>>,
    /// Set by the reconciliation sweep for campaigns stuck in `sending`.
    #[serde(default)]
    pub needs_review: bool,
}

impl Campaign {
    pub fn draft(
        kind: CampaignKind,
        subject: impl Into<String>,
        content: serde_json::Value,
        experiment_id: Option<Uuid>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            subject: subject.into(),
            content,
            status: CampaignStatus::Draft,
            experiment_id,
            recipient_count: 0,
            sent_at: None,
            failure_note: None,
            created_at: Utc::now(),
            sending_started_at: None,
            needs_review: false,
        }
    }
}

// ─── Recipients ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RecipientStatus {
    Active,
    Unsubscribed,
    Bounced,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipient {
    pub id: Uuid,
    pub address: String,
    pub status: RecipientStatus,
    pub unsubscribe_token: String,
    /// Hour of day (UTC, 0-23) the recipient prefers to receive mail.
    pub preferred_send_hour: Option<u8>,
}

impl Recipient {
    pub fn active(address: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            address: address.into(),
            status: RecipientStatus::Active,
            unsubscribe_token: Uuid::new_v4().simple().to_string(),
            preferred_send_hour: None,
        }
    }
}

// ─── Experimentation ────────────────────────────────────────────────────

/// The single message slot an experiment varies.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentAxis {
    Subject,
    Cta,
    Headline,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentStatus {
    #[default]
    Draft,
    Running,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Variant {
    pub id: Uuid,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Experiment {
    pub id: Uuid,
    pub name: String,
    pub axis: ExperimentAxis,
    pub status: ExperimentStatus,
    /// Order matters: assignment indexes into this list.
    pub variants: Vec<Variant>,
    pub winner: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// First-write-wins record of which variant a recipient saw.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExperimentAssignment {
    pub experiment_id: Uuid,
    pub recipient_id: Uuid,
    pub variant_id: Uuid,
    pub assigned_at: DateTime<Utc>,
}

/// A variant resolved for rendering: the slot to fill and what to put there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignedVariant {
    pub axis: ExperimentAxis,
    pub variant_id: Uuid,
    pub value: String,
}

// ─── Delivery ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Failed,
}

impl DeliveryStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, DeliveryStatus::Pending)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub campaign_id: Uuid,
    pub recipient_id: Uuid,
    pub status: DeliveryStatus,
    pub variant_id: Option<Uuid>,
    pub message_id: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl DeliveryRecord {
    pub fn pending(campaign_id: Uuid, recipient_id: Uuid, variant_id: Option<Uuid>) -> Self {
        Self {
            campaign_id,
            recipient_id,
            status: DeliveryStatus::Pending,
            variant_id,
            message_id: None,
            error: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }
}

/// Result of claiming a recipient's delivery slot for a dispatch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryClaim {
    /// No record existed; a fresh `pending` row was written.
    New,
    /// A `failed` row, or a `pending` row left by an interrupted run, was
    /// reopened for this run.
    Reopened { previous: DeliveryStatus },
    /// The recipient already has a `sent` record.
    AlreadySent,
}

/// Terminal outcome of one send attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Sent { message_id: String },
    Failed { error: String },
}

/// Aggregate result of a dispatch run, returned to the operator.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DispatchReport {
    pub scheduled: usize,
    pub failed: usize,
    /// Recipients that already had a `sent` record for this campaign.
    pub skipped: usize,
    /// Recipients whose earlier `failed` or interrupted `pending` record was
    /// reopened and attempted again. Also counted in `scheduled`/`failed`.
    #[serde(default)]
    pub retried: usize,
    /// Attempts whose outcome could not be written to the delivery ledger.
    /// Also counted in `scheduled`/`failed`, with a note in `errors`.
    #[serde(default)]
    pub unrecorded: usize,
    pub batches: usize,
    pub errors: Vec<String>,
}
