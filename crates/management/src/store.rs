//! In-memory campaign store backed by DashMap.
//!
//! Holds campaigns, experiments, the experiment-assignment ledger and the
//! delivery ledger. Every conditional write goes through the DashMap entry
//! API or `get_mut`, which hold the shard lock across the check and the
//! write, so concurrent dispatch workers cannot race each other.
//! Production: replace with PostgreSQL, using unique keys on
//! `(experiment_id, recipient_id)` and `(campaign_id, recipient_id)` with
//! `ON CONFLICT DO NOTHING`.

use crate::models::{CreateCampaignRequest, CreateExperimentRequest};
use async_trait::async_trait;
use campaign_core::error::{CampaignError, CampaignResult};
use campaign_core::store::{AssignmentLedger, DeliveryLedger};
use campaign_core::types::*;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashMap;
use tracing::{info, warn};
use uuid::Uuid;

/// Thread-safe in-memory store for the dispatch subsystem's persisted state.
pub struct ManagementStore {
    campaigns: DashMap<Uuid, Campaign>,
    experiments: DashMap<Uuid, Experiment>,
    assignments: DashMap<(Uuid, Uuid), ExperimentAssignment>,
    deliveries: DashMap<(Uuid, Uuid), DeliveryRecord>,
}

impl ManagementStore {
    pub fn new() -> Self {
        info!("Management store initialized (in-memory, development mode)");
        Self {
            campaigns: DashMap::new(),
            experiments: DashMap::new(),
            assignments: DashMap::new(),
            deliveries: DashMap::new(),
        }
    }

    // ─── Campaigns ─────────────────────────────────────────────────────────

    pub fn list_campaigns(&self) -> Vec<Campaign> {
        let mut campaigns: Vec<Campaign> =
            self.campaigns.iter().map(|r| r.value().clone()).collect();
        campaigns.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        campaigns
    }

    pub fn get_campaign(&self, id: Uuid) -> Option<Campaign> {
        self.campaigns.get(&id).map(|r| r.value().clone())
    }

    /// Register a draft handed over by the authoring pipeline.
    pub fn create_campaign(&self, req: CreateCampaignRequest) -> CampaignResult<Campaign> {
        if req.subject.trim().is_empty() {
            return Err(CampaignError::Validation("subject must not be empty".to_string()));
        }
        if let Some(experiment_id) = req.experiment_id {
            if !self.experiments.contains_key(&experiment_id) {
                return Err(CampaignError::NotFound(format!("experiment {experiment_id}")));
            }
        }
        let campaign = Campaign::draft(req.kind, req.subject, req.content, req.experiment_id);
        self.insert_campaign(campaign.clone());
        Ok(campaign)
    }

    pub fn insert_campaign(&self, campaign: Campaign) {
        self.campaigns.insert(campaign.id, campaign);
    }

    /// Atomically flip `draft → sending`. This is the guard against two
    /// dispatch runs over the same campaign: the loser sees `sending`.
    pub fn try_begin_send(&self, id: Uuid, now: DateTime<Utc>) -> CampaignResult<Campaign> {
        let mut entry = self
            .campaigns
            .get_mut(&id)
            .ok_or_else(|| CampaignError::NotFound(format!("campaign {id}")))?;
        let campaign = entry.value_mut();
        if campaign.status != CampaignStatus::Draft {
            return Err(CampaignError::StateConflict(format!(
                "campaign {id} is {:?}, expected Draft",
                campaign.status
            )));
        }
        campaign.status = CampaignStatus::Sending;
        campaign.sending_started_at = Some(now);
        campaign.needs_review = false;
        Ok(campaign.clone())
    }

    /// `sending → sent` for the run that began at `run_started`, stamping the
    /// roster size and send time.
    ///
    /// A run that was released mid-flight still marks a `draft` campaign as
    /// sent, since its deliveries went out. It leaves the campaign alone once
    /// a newer run has taken it over.
    pub fn mark_sent(
        &self,
        id: Uuid,
        run_started: DateTime<Utc>,
        recipient_count: usize,
        now: DateTime<Utc>,
    ) -> CampaignResult<Campaign> {
        let mut entry = self
            .campaigns
            .get_mut(&id)
            .ok_or_else(|| CampaignError::NotFound(format!("campaign {id}")))?;
        let campaign = entry.value_mut();
        let owns_run = campaign.sending_started_at == Some(run_started);
        match campaign.status {
            CampaignStatus::Sending if owns_run => {}
            CampaignStatus::Draft => {
                warn!(campaign_id = %id, "Campaign was released during dispatch, marking sent");
            }
            status => {
                warn!(
                    campaign_id = %id,
                    status = ?status,
                    run_started = %run_started,
                    "Campaign taken over by a newer run, leaving status unchanged"
                );
                return Ok(campaign.clone());
            }
        }
        campaign.status = CampaignStatus::Sent;
        campaign.recipient_count = recipient_count;
        campaign.sent_at = Some(now);
        campaign.failure_note = None;
        campaign.needs_review = false;
        Ok(campaign.clone())
    }

    /// Operator release of a campaign the reconciliation sweep flagged as
    /// stuck. A `sending` campaign that has not been flagged may still have a
    /// live run and is refused.
    pub fn release_flagged(&self, id: Uuid, note: String) -> CampaignResult<Campaign> {
        let mut entry = self
            .campaigns
            .get_mut(&id)
            .ok_or_else(|| CampaignError::NotFound(format!("campaign {id}")))?;
        let campaign = entry.value_mut();
        if campaign.status == CampaignStatus::Sending && !campaign.needs_review {
            return Err(CampaignError::StateConflict(format!(
                "campaign {id} is still within its sending window; it can be released once flagged as stuck"
            )));
        }
        revert(id, campaign, note)
    }

    /// `sending → draft` with a diagnostic note.
    pub fn revert_to_draft(&self, id: Uuid, note: String) -> CampaignResult<Campaign> {
        let mut entry = self
            .campaigns
            .get_mut(&id)
            .ok_or_else(|| CampaignError::NotFound(format!("campaign {id}")))?;
        revert(id, entry.value_mut(), note)
    }

    /// Campaigns in `sending` whose run started at or before `cutoff`.
    pub fn sending_since_before(&self, cutoff: DateTime<Utc>) -> Vec<Campaign> {
        self.campaigns
            .iter()
            .filter(|r| {
                r.status == CampaignStatus::Sending
                    && r.sending_started_at.is_some_and(|started| started <= cutoff)
            })
            .map(|r| r.value().clone())
            .collect()
    }

    /// Flag a campaign for operator review. Returns `true` if newly flagged.
    pub fn flag_for_review(&self, id: Uuid) -> bool {
        match self.campaigns.get_mut(&id) {
            Some(mut entry) if entry.status == CampaignStatus::Sending && !entry.needs_review => {
                entry.needs_review = true;
                true
            }
            _ => false,
        }
    }

    // ─── Experiments ───────────────────────────────────────────────────────

    pub fn create_experiment(&self, req: CreateExperimentRequest) -> CampaignResult<Experiment> {
        if req.variants.len() < 2 {
            return Err(CampaignError::Validation(
                "an experiment needs at least two variants".to_string(),
            ));
        }
        let experiment = Experiment {
            id: Uuid::new_v4(),
            name: req.name,
            axis: req.axis,
            status: ExperimentStatus::Draft,
            variants: req
                .variants
                .into_iter()
                .map(|value| Variant {
                    id: Uuid::new_v4(),
                    value,
                })
                .collect(),
            winner: None,
            created_at: Utc::now(),
        };
        self.experiments.insert(experiment.id, experiment.clone());
        Ok(experiment)
    }

    pub fn insert_experiment(&self, experiment: Experiment) {
        self.experiments.insert(experiment.id, experiment);
    }

    pub fn get_experiment(&self, id: Uuid) -> Option<Experiment> {
        self.experiments.get(&id).map(|r| r.value().clone())
    }

    /// `draft → running`.
    pub fn start_experiment(&self, id: Uuid) -> CampaignResult<Experiment> {
        let mut entry = self
            .experiments
            .get_mut(&id)
            .ok_or_else(|| CampaignError::NotFound(format!("experiment {id}")))?;
        let experiment = entry.value_mut();
        if experiment.status != ExperimentStatus::Draft {
            return Err(CampaignError::StateConflict(format!(
                "experiment {id} is {:?}, expected Draft",
                experiment.status
            )));
        }
        if experiment.variants.len() < 2 {
            return Err(CampaignError::Validation(
                "an experiment needs at least two variants".to_string(),
            ));
        }
        experiment.status = ExperimentStatus::Running;
        Ok(experiment.clone())
    }

    /// `running → completed`, optionally recording the winning variant.
    pub fn complete_experiment(&self, id: Uuid, winner: Option<Uuid>) -> CampaignResult<Experiment> {
        let mut entry = self
            .experiments
            .get_mut(&id)
            .ok_or_else(|| CampaignError::NotFound(format!("experiment {id}")))?;
        let experiment = entry.value_mut();
        if experiment.status != ExperimentStatus::Running {
            return Err(CampaignError::StateConflict(format!(
                "experiment {id} is {:?}, expected Running",
                experiment.status
            )));
        }
        if let Some(winner) = winner {
            if !experiment.variants.iter().any(|v| v.id == winner) {
                return Err(CampaignError::Validation(format!(
                    "variant {winner} is not part of experiment {id}"
                )));
            }
        }
        experiment.status = ExperimentStatus::Completed;
        experiment.winner = winner;
        Ok(experiment.clone())
    }

    /// Number of recorded assignments per variant.
    pub fn variant_distribution(&self, experiment_id: Uuid) -> HashMap<Uuid, usize> {
        let mut counts = HashMap::new();
        for row in self.assignments.iter() {
            if row.experiment_id == experiment_id {
                *counts.entry(row.variant_id).or_insert(0) += 1;
            }
        }
        counts
    }

    // ─── Deliveries ────────────────────────────────────────────────────────

    pub fn deliveries_for(&self, campaign_id: Uuid) -> Vec<DeliveryRecord> {
        let mut records: Vec<DeliveryRecord> = self
            .deliveries
            .iter()
            .filter(|r| r.campaign_id == campaign_id)
            .map(|r| r.value().clone())
            .collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        records
    }
}

fn revert(id: Uuid, campaign: &mut Campaign, note: String) -> CampaignResult<Campaign> {
    if campaign.status != CampaignStatus::Sending {
        return Err(CampaignError::StateConflict(format!(
            "campaign {id} is {:?}, expected Sending",
            campaign.status
        )));
    }
    campaign.status = CampaignStatus::Draft;
    campaign.failure_note = Some(note);
    campaign.sending_started_at = None;
    campaign.needs_review = false;
    Ok(campaign.clone())
}

impl Default for ManagementStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AssignmentLedger for ManagementStore {
    async fn insert_if_absent(
        &self,
        assignment: ExperimentAssignment,
    ) -> CampaignResult<ExperimentAssignment> {
        let key = (assignment.experiment_id, assignment.recipient_id);
        Ok(self.assignments.entry(key).or_insert(assignment).value().clone())
    }

    async fn get(
        &self,
        experiment_id: Uuid,
        recipient_id: Uuid,
    ) -> CampaignResult<Option<ExperimentAssignment>> {
        Ok(self
            .assignments
            .get(&(experiment_id, recipient_id))
            .map(|r| r.value().clone()))
    }
}

#[async_trait]
impl DeliveryLedger for ManagementStore {
    async fn claim(&self, record: DeliveryRecord) -> CampaignResult<DeliveryClaim> {
        match self.deliveries.entry((record.campaign_id, record.recipient_id)) {
            Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(DeliveryClaim::New)
            }
            Entry::Occupied(mut slot) => {
                let existing = slot.get_mut();
                if existing.status == DeliveryStatus::Sent {
                    return Ok(DeliveryClaim::AlreadySent);
                }
                // A failed attempt, or a pending row whose run never finished.
                let previous = existing.status;
                existing.status = DeliveryStatus::Pending;
                existing.variant_id = record.variant_id;
                existing.message_id = None;
                existing.error = None;
                existing.completed_at = None;
                Ok(DeliveryClaim::Reopened { previous })
            }
        }
    }

    async fn complete(
        &self,
        campaign_id: Uuid,
        recipient_id: Uuid,
        outcome: DeliveryOutcome,
    ) -> CampaignResult<bool> {
        let mut entry = self
            .deliveries
            .get_mut(&(campaign_id, recipient_id))
            .ok_or_else(|| {
                CampaignError::Storage(format!(
                    "no delivery record for campaign {campaign_id}, recipient {recipient_id}"
                ))
            })?;
        let record = entry.value_mut();
        if record.status.is_terminal() {
            return Ok(false);
        }
        match outcome {
            DeliveryOutcome::Sent { message_id } => {
                record.status = DeliveryStatus::Sent;
                record.message_id = Some(message_id);
            }
            DeliveryOutcome::Failed { error } => {
                record.status = DeliveryStatus::Failed;
                record.error = Some(error);
            }
        }
        record.completed_at = Some(Utc::now());
        Ok(true)
    }

    async fn list_for_campaign(&self, campaign_id: Uuid) -> CampaignResult<Vec<DeliveryRecord>> {
        Ok(self.deliveries_for(campaign_id))
    }
}
