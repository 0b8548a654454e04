//! Storage seams shared across the dispatch path.
//!
//! Implementations must make the conditional inserts atomic: a SQL backend
//! uses a unique key with `ON CONFLICT DO NOTHING`, the in-memory stores
//! hold the shard lock across check and write.

use crate::error::CampaignResult;
use crate::types::{
    DeliveryClaim, DeliveryOutcome, DeliveryRecord, ExperimentAssignment, Recipient,
};
use async_trait::async_trait;
use uuid::Uuid;

/// Read-only view of the recipient directory.
#[async_trait]
pub trait RecipientDirectory: Send + Sync {
    /// Point-in-time snapshot of every active recipient.
    async fn list_active(&self) -> CampaignResult<Vec<Recipient>>;

    async fn unsubscribe_token(&self, recipient_id: Uuid) -> CampaignResult<Option<String>>;
}

#[async_trait]
pub trait AssignmentLedger: Send + Sync {
    /// Store the assignment unless one already exists for the
    /// `(experiment_id, recipient_id)` pair. Returns the stored row, which
    /// is the authoritative assignment whether or not this call wrote it.
    async fn insert_if_absent(
        &self,
        assignment: ExperimentAssignment,
    ) -> CampaignResult<ExperimentAssignment>;

    async fn get(
        &self,
        experiment_id: Uuid,
        recipient_id: Uuid,
    ) -> CampaignResult<Option<ExperimentAssignment>>;
}

#[async_trait]
pub trait DeliveryLedger: Send + Sync {
    /// Claim `(campaign_id, recipient_id)` for this run, atomically:
    /// insert a `pending` row when none exists, reopen a `failed` or
    /// leftover `pending` row as `pending`, leave a `sent` row untouched.
    async fn claim(&self, record: DeliveryRecord) -> CampaignResult<DeliveryClaim>;

    /// Move a pending record to its terminal state. Terminal records are
    /// never rewritten; returns `false` if the record was already terminal.
    async fn complete(
        &self,
        campaign_id: Uuid,
        recipient_id: Uuid,
        outcome: DeliveryOutcome,
    ) -> CampaignResult<bool>;

    async fn list_for_campaign(&self, campaign_id: Uuid) -> CampaignResult<Vec<DeliveryRecord>>;
}
