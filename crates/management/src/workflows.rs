//! Campaign send lifecycle.
//!
//! `draft → sending → sent`, with `sending → draft` only when the run cannot
//! be set up at all (roster or experiment data unreachable). Per-recipient
//! render and transport failures are data in the [`DispatchReport`]; they
//! never keep a campaign from reaching `sent`.

use crate::store::ManagementStore;
use campaign_channels::{DispatchJob, DispatchScheduler};
use campaign_core::error::{CampaignError, CampaignResult};
use campaign_core::experimentation::ExperimentEngine;
use campaign_core::store::RecipientDirectory;
use campaign_core::templates::TemplateRenderer;
use campaign_core::types::{Campaign, CampaignStatus, DispatchReport, Experiment, ExperimentStatus};
use chrono::{DateTime, Duration, NaiveTime, Utc};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Orchestrates one campaign send: guard, snapshot, assign, render, dispatch.
pub struct CampaignSender {
    store: Arc<ManagementStore>,
    directory: Arc<dyn RecipientDirectory>,
    experiments: ExperimentEngine,
    renderer: TemplateRenderer,
    scheduler: DispatchScheduler,
}

impl CampaignSender {
    pub fn new(
        store: Arc<ManagementStore>,
        directory: Arc<dyn RecipientDirectory>,
        renderer: TemplateRenderer,
        scheduler: DispatchScheduler,
    ) -> Self {
        Self {
            experiments: ExperimentEngine::new(store.clone()),
            store,
            directory,
            renderer,
            scheduler,
        }
    }

    /// Send a draft campaign to the active roster and wait for the result.
    ///
    /// Fails with `NotFound` for an unknown id and `StateConflict` unless the
    /// campaign is in `draft`; in both cases nothing is dispatched. A `Setup`
    /// failure reverts the campaign to `draft` with the error as its note.
    pub async fn submit_for_send(&self, campaign_id: Uuid) -> CampaignResult<DispatchReport> {
        let run_started = Utc::now();
        let campaign = self.store.try_begin_send(campaign_id, run_started)?;
        metrics::counter!("campaign.sends_started", "kind" => campaign.kind.as_str()).increment(1);
        info!(campaign_id = %campaign_id, kind = campaign.kind.as_str(), "Campaign send started");

        let jobs = match self.prepare(&campaign).await {
            Ok(jobs) => jobs,
            Err(e) => {
                error!(campaign_id = %campaign_id, error = %e, "Campaign send setup failed");
                metrics::counter!("campaign.setup_failed").increment(1);
                if let Err(revert) = self.store.revert_to_draft(campaign_id, e.to_string()) {
                    error!(campaign_id = %campaign_id, error = %revert, "Could not revert campaign to draft");
                }
                return Err(e);
            }
        };

        let roster_size = jobs.len();
        let report = self.scheduler.dispatch(campaign_id, jobs).await;
        self.store
            .mark_sent(campaign_id, run_started, roster_size, Utc::now())?;

        metrics::counter!("campaign.sends_completed").increment(1);
        info!(
            campaign_id = %campaign_id,
            recipients = roster_size,
            scheduled = report.scheduled,
            failed = report.failed,
            retried = report.retried,
            "Campaign sent"
        );
        Ok(report)
    }

    /// Operator escape hatch for a campaign stuck in `sending` after a crash.
    /// Only campaigns the reconciliation sweep has flagged can be released;
    /// re-sending one afterwards retries every recipient without a `sent`
    /// delivery record.
    pub fn release_stuck(&self, campaign_id: Uuid, note: String) -> CampaignResult<Campaign> {
        let campaign = self.store.release_flagged(campaign_id, note)?;
        warn!(campaign_id = %campaign_id, "Stuck campaign released to draft by operator");
        Ok(campaign)
    }

    async fn prepare(&self, campaign: &Campaign) -> CampaignResult<Vec<DispatchJob>> {
        debug_assert_eq!(campaign.status, CampaignStatus::Sending);
        let experiment = self.load_experiment(campaign)?;

        let roster = self
            .directory
            .list_active()
            .await
            .map_err(|e| as_setup("recipient roster unavailable", e))?;

        let now = Utc::now();
        let mut jobs = Vec::with_capacity(roster.len());
        for recipient in roster {
            let variant = match &experiment {
                Some(experiment) => self
                    .experiments
                    .assign_and_record(experiment, recipient.id)
                    .await
                    .map_err(|e| as_setup("experiment assignment unavailable", e))?,
                None => None,
            };

            let message = self.renderer.render(
                campaign.kind,
                &campaign.subject,
                &campaign.content,
                variant.as_ref(),
                &recipient.unsubscribe_token,
            );

            jobs.push(DispatchJob {
                recipient_id: recipient.id,
                address: recipient.address,
                variant_id: variant.map(|v| v.variant_id),
                message,
                send_at: scheduled_send_time(recipient.preferred_send_hour, now),
            });
        }
        Ok(jobs)
    }

    fn load_experiment(&self, campaign: &Campaign) -> CampaignResult<Option<Experiment>> {
        let Some(experiment_id) = campaign.experiment_id else {
            return Ok(None);
        };
        let experiment = self.store.get_experiment(experiment_id).ok_or_else(|| {
            CampaignError::Setup(format!("experiment {experiment_id} is unavailable"))
        })?;

        if experiment.status != ExperimentStatus::Running {
            warn!(
                campaign_id = %campaign.id,
                experiment_id = %experiment_id,
                status = ?experiment.status,
                "Linked experiment is not running, sending without variants"
            );
            return Ok(None);
        }
        if experiment.variants.len() < 2 {
            return Err(CampaignError::Setup(format!(
                "experiment {experiment_id} has {} variant(s), needs at least two",
                experiment.variants.len()
            )));
        }
        Ok(Some(experiment))
    }
}

fn as_setup(context: &str, err: CampaignError) -> CampaignError {
    match err {
        CampaignError::Setup(msg) => CampaignError::Setup(format!("{context}: {msg}")),
        other => CampaignError::Setup(format!("{context}: {other}")),
    }
}

/// Next occurrence of the preferred hour (UTC), or `now` without one.
pub fn scheduled_send_time(preferred_hour: Option<u8>, now: DateTime<Utc>) -> DateTime<Utc> {
    let Some(time) = preferred_hour.and_then(|h| NaiveTime::from_hms_opt(h as u32, 0, 0)) else {
        return now;
    };
    let today = DateTime::<Utc>::from_naive_utc_and_offset(now.date_naive().and_time(time), Utc);
    if today >= now {
        today
    } else {
        today + Duration::days(1)
    }
}
