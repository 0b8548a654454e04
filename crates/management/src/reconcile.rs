//! Stuck-campaign reconciliation.
//!
//! A process crash mid-run leaves a campaign in `sending` with nothing
//! driving it. The sweep flags such campaigns for operator review once they
//! have been sending for longer than the configured threshold. It never
//! changes a campaign's status; releasing it is an operator decision.

use crate::store::ManagementStore;
use campaign_core::config::ReconcileConfig;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

pub struct ReconciliationSweep {
    store: Arc<ManagementStore>,
    stuck_after: Duration,
    interval: std::time::Duration,
}

impl ReconciliationSweep {
    pub fn new(store: Arc<ManagementStore>, config: &ReconcileConfig) -> Self {
        Self {
            store,
            stuck_after: Duration::seconds(config.stuck_after_secs as i64),
            interval: std::time::Duration::from_secs(config.interval_secs.max(1)),
        }
    }

    /// Flag campaigns stuck in `sending`. Returns the ids flagged by this pass.
    pub fn sweep(&self, now: DateTime<Utc>) -> Vec<Uuid> {
        let cutoff = now - self.stuck_after;
        let mut flagged = Vec::new();
        for campaign in self.store.sending_since_before(cutoff) {
            if self.store.flag_for_review(campaign.id) {
                warn!(
                    campaign_id = %campaign.id,
                    sending_since = ?campaign.sending_started_at,
                    "Campaign stuck in sending, flagged for operator review"
                );
                metrics::counter!("reconcile.stuck_flagged").increment(1);
                flagged.push(campaign.id);
            }
        }
        flagged
    }

    /// Run the sweep forever on the configured interval.
    pub async fn run(self: Arc<Self>) {
        info!(
            interval_secs = self.interval.as_secs(),
            stuck_after_secs = self.stuck_after.num_seconds(),
            "Reconciliation sweep started"
        );
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            ticker.tick().await;
            self.sweep(Utc::now());
        }
    }
}
