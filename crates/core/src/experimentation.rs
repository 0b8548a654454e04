//! Experiment variant assignment.
//!
//! Assignment is a pure function of `(experiment_id, recipient_id)`: the same
//! pair always lands in the same bucket, in any process, without consulting
//! stored state. The ledger only records what was shown; the first stored
//! row is authoritative.

use crate::error::{CampaignError, CampaignResult};
use crate::store::AssignmentLedger;
use crate::types::{AssignedVariant, Experiment, ExperimentAssignment, ExperimentStatus, Variant};
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Bucket index for a pair. `variant_count` must be non-zero.
pub fn bucket(experiment_id: &Uuid, recipient_id: &Uuid, variant_count: usize) -> usize {
    let mut hasher = Sha256::new();
    hasher.update(experiment_id.to_string().as_bytes());
    hasher.update(recipient_id.to_string().as_bytes());
    let digest = hasher.finalize();

    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(prefix) % variant_count as u64) as usize
}

/// Deterministically pick a variant. `None` only for an empty list.
pub fn assign_variant<'a>(
    experiment_id: &Uuid,
    recipient_id: &Uuid,
    variants: &'a [Variant],
) -> Option<&'a Variant> {
    if variants.is_empty() {
        return None;
    }
    variants.get(bucket(experiment_id, recipient_id, variants.len()))
}

/// Assigns variants and persists them through an [`AssignmentLedger`].
pub struct ExperimentEngine {
    ledger: Arc<dyn AssignmentLedger>,
}

impl ExperimentEngine {
    pub fn new(ledger: Arc<dyn AssignmentLedger>) -> Self {
        Self { ledger }
    }

    /// Resolve the variant a recipient sees in a running experiment and
    /// record it. A previously stored assignment always wins over the
    /// freshly computed one.
    pub async fn assign_and_record(
        &self,
        experiment: &Experiment,
        recipient_id: Uuid,
    ) -> CampaignResult<Option<AssignedVariant>> {
        if experiment.status != ExperimentStatus::Running {
            return Ok(None);
        }
        let Some(computed) = assign_variant(&experiment.id, &recipient_id, &experiment.variants)
        else {
            return Ok(None);
        };

        let stored = self
            .ledger
            .insert_if_absent(ExperimentAssignment {
                experiment_id: experiment.id,
                recipient_id,
                variant_id: computed.id,
                assigned_at: Utc::now(),
            })
            .await?;

        if stored.variant_id != computed.id {
            debug!(
                experiment_id = %experiment.id,
                recipient_id = %recipient_id,
                stored = %stored.variant_id,
                computed = %computed.id,
                "Keeping previously stored assignment"
            );
        }

        let variant = experiment
            .variants
            .iter()
            .find(|v| v.id == stored.variant_id)
            .ok_or_else(|| {
                CampaignError::Setup(format!(
                    "experiment {} has an assignment to unknown variant {}",
                    experiment.id, stored.variant_id
                ))
            })?;

        Ok(Some(AssignedVariant {
            axis: experiment.axis,
            variant_id: variant.id,
            value: variant.value.clone(),
        }))
    }
}
