//! Throttled batch dispatch.
//!
//! The roster is cut into fixed-size batches. Every message in a batch is
//! submitted concurrently; the next batch starts only after the whole batch
//! has been submitted and the inter-batch delay has elapsed. Individual
//! failures are recorded and counted, never raised.

use campaign_core::channels::{OutboundMessage, Transport};
use campaign_core::config::DispatchConfig;
use campaign_core::error::{CampaignError, CampaignResult, RenderError, TransportError};
use campaign_core::store::DeliveryLedger;
use campaign_core::templates::RenderedMessage;
use campaign_core::types::{DeliveryClaim, DeliveryOutcome, DeliveryRecord, DispatchReport};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// One recipient's share of a campaign, ready for submission.
#[derive(Debug, Clone)]
pub struct DispatchJob {
    pub recipient_id: Uuid,
    pub address: String,
    pub variant_id: Option<Uuid>,
    /// A render failure travels with the job so it is recorded like any
    /// other per-recipient failure.
    pub message: Result<RenderedMessage, RenderError>,
    pub send_at: DateTime<Utc>,
}

enum JobOutcome {
    Sent,
    Failed(String),
    Skipped,
}

/// What one job contributed to the report.
struct JobReport {
    outcome: JobOutcome,
    reopened: bool,
    /// Set when the terminal outcome could not be written.
    unrecorded: Option<String>,
}

impl JobReport {
    fn new(outcome: JobOutcome) -> Self {
        Self {
            outcome,
            reopened: false,
            unrecorded: None,
        }
    }
}

pub struct DispatchScheduler {
    transport: Arc<dyn Transport>,
    deliveries: Arc<dyn DeliveryLedger>,
    batch_size: usize,
    inter_batch_delay: Duration,
    transport_timeout: Duration,
}

impl DispatchScheduler {
    pub fn new(
        config: &DispatchConfig,
        transport: Arc<dyn Transport>,
        deliveries: Arc<dyn DeliveryLedger>,
    ) -> CampaignResult<Self> {
        if config.batch_size == 0 {
            return Err(CampaignError::Config(
                "dispatch.batch_size must be at least 1".to_string(),
            ));
        }
        info!(
            transport = transport.name(),
            batch_size = config.batch_size,
            inter_batch_delay_ms = config.inter_batch_delay_ms,
            transport_timeout_ms = config.transport_timeout_ms,
            "Dispatch scheduler initialized"
        );
        Ok(Self {
            transport,
            deliveries,
            batch_size: config.batch_size,
            inter_batch_delay: Duration::from_millis(config.inter_batch_delay_ms),
            transport_timeout: Duration::from_millis(config.transport_timeout_ms),
        })
    }

    /// Submit every job and return the aggregate outcome.
    pub async fn dispatch(&self, campaign_id: Uuid, jobs: Vec<DispatchJob>) -> DispatchReport {
        let total = jobs.len();
        let mut report = DispatchReport::default();
        let mut remaining = jobs.into_iter();

        loop {
            let batch: Vec<DispatchJob> = remaining.by_ref().take(self.batch_size).collect();
            if batch.is_empty() {
                break;
            }
            if report.batches > 0 {
                tokio::time::sleep(self.inter_batch_delay).await;
            }
            report.batches += 1;

            let started = Instant::now();
            let size = batch.len();
            let outcomes =
                join_all(batch.into_iter().map(|job| self.deliver(campaign_id, job))).await;

            for job in outcomes {
                match job.outcome {
                    JobOutcome::Sent => report.scheduled += 1,
                    JobOutcome::Skipped => report.skipped += 1,
                    JobOutcome::Failed(message) => {
                        report.failed += 1;
                        report.errors.push(message);
                    }
                }
                if job.reopened {
                    report.retried += 1;
                }
                if let Some(note) = job.unrecorded {
                    report.unrecorded += 1;
                    report.errors.push(note);
                }
            }

            metrics::histogram!("dispatch.batch_latency_ms")
                .record(started.elapsed().as_millis() as f64);
            debug!(
                campaign_id = %campaign_id,
                batch = report.batches,
                size,
                "Batch submitted"
            );
        }

        info!(
            campaign_id = %campaign_id,
            total,
            scheduled = report.scheduled,
            failed = report.failed,
            skipped = report.skipped,
            retried = report.retried,
            unrecorded = report.unrecorded,
            batches = report.batches,
            "Dispatch complete"
        );
        report
    }

    async fn deliver(&self, campaign_id: Uuid, job: DispatchJob) -> JobReport {
        let DispatchJob {
            recipient_id,
            address,
            variant_id,
            message,
            send_at,
        } = job;

        let pending = DeliveryRecord::pending(campaign_id, recipient_id, variant_id);
        let reopened = match self.deliveries.claim(pending).await {
            Ok(DeliveryClaim::New) => false,
            Ok(DeliveryClaim::Reopened { previous }) => {
                info!(
                    campaign_id = %campaign_id,
                    recipient_id = %recipient_id,
                    previous = ?previous,
                    "Reopened earlier delivery for another attempt"
                );
                metrics::counter!("dispatch.reopened").increment(1);
                true
            }
            Ok(DeliveryClaim::AlreadySent) => {
                debug!(campaign_id = %campaign_id, recipient_id = %recipient_id, "Delivery already sent, skipping");
                return JobReport::new(JobOutcome::Skipped);
            }
            Err(e) => {
                // Never send a message the ledger cannot track.
                warn!(campaign_id = %campaign_id, recipient_id = %recipient_id, error = %e, "Could not claim delivery");
                metrics::counter!("dispatch.failed", "reason" => "ledger").increment(1);
                return JobReport::new(JobOutcome::Failed(format!(
                    "{address} ({recipient_id}): {e}"
                )));
            }
        };

        let result = match message {
            Err(render_error) => Err(("render", CampaignError::Render(render_error))),
            Ok(rendered) => {
                let outbound = OutboundMessage {
                    to: address.clone(),
                    subject: rendered.subject,
                    html: rendered.html,
                    send_at,
                };
                match tokio::time::timeout(self.transport_timeout, self.transport.send(&outbound))
                    .await
                {
                    Ok(Ok(message_id)) => Ok(message_id),
                    Ok(Err(e)) => Err(("transport", CampaignError::Transport(e))),
                    Err(_) => Err((
                        "timeout",
                        CampaignError::Transport(TransportError::Timeout(
                            self.transport_timeout.as_millis() as u64,
                        )),
                    )),
                }
            }
        };

        let outcome = match &result {
            Ok(message_id) => DeliveryOutcome::Sent {
                message_id: message_id.clone(),
            },
            Err((_, e)) => DeliveryOutcome::Failed {
                error: e.to_string(),
            },
        };
        let unrecorded = match self.deliveries.complete(campaign_id, recipient_id, outcome).await {
            Ok(_) => None,
            Err(e) => {
                error!(campaign_id = %campaign_id, recipient_id = %recipient_id, error = %e, "Could not record delivery outcome");
                metrics::counter!("dispatch.unrecorded").increment(1);
                let attempt = match &result {
                    Ok(message_id) => format!("sent as {message_id}"),
                    Err(_) => "failed".to_string(),
                };
                Some(format!(
                    "{address} ({recipient_id}): {attempt} but outcome not recorded: {e}"
                ))
            }
        };

        let outcome = match result {
            Ok(_) => {
                metrics::counter!("dispatch.sent").increment(1);
                JobOutcome::Sent
            }
            Err((reason, e)) => {
                metrics::counter!("dispatch.failed", "reason" => reason).increment(1);
                debug!(recipient_id = %recipient_id, error = %e, "Delivery failed");
                JobOutcome::Failed(format!("{address} ({recipient_id}): {e}"))
            }
        };
        JobReport {
            outcome,
            reopened,
            unrecorded,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use campaign_core::types::DeliveryStatus;
    use dashmap::mapref::entry::Entry;
    use dashmap::DashMap;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryDeliveries {
        rows: DashMap<(Uuid, Uuid), DeliveryRecord>,
        reject_outcomes: AtomicBool,
    }

    #[async_trait]
    impl DeliveryLedger for MemoryDeliveries {
        async fn claim(&self, record: DeliveryRecord) -> CampaignResult<DeliveryClaim> {
            let key = (record.campaign_id, record.recipient_id);
            match self.rows.entry(key) {
                Entry::Vacant(slot) => {
                    slot.insert(record);
                    Ok(DeliveryClaim::New)
                }
                Entry::Occupied(mut slot) => {
                    let existing = slot.get_mut();
                    if existing.status == DeliveryStatus::Sent {
                        return Ok(DeliveryClaim::AlreadySent);
                    }
                    let previous = existing.status;
                    *existing = record;
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
            if self.reject_outcomes.load(Ordering::SeqCst) {
                return Err(CampaignError::Storage("ledger offline".to_string()));
            }
            let mut row = self
                .rows
                .get_mut(&(campaign_id, recipient_id))
                .ok_or_else(|| CampaignError::Storage("no pending record".to_string()))?;
            if row.status.is_terminal() {
                return Ok(false);
            }
            match outcome {
                DeliveryOutcome::Sent { message_id } => {
                    row.status = DeliveryStatus::Sent;
                    row.message_id = Some(message_id);
                }
                DeliveryOutcome::Failed { error } => {
                    row.status = DeliveryStatus::Failed;
                    row.error = Some(error);
                }
            }
            Ok(true)
        }

        async fn list_for_campaign(&self, campaign_id: Uuid) -> CampaignResult<Vec<DeliveryRecord>> {
            Ok(self
                .rows
                .iter()
                .filter(|r| r.campaign_id == campaign_id)
                .map(|r| r.value().clone())
                .collect())
        }
    }

    /// Records when each address was submitted; fails a fixed set.
    #[derive(Default)]
    struct ScriptedTransport {
        calls: Mutex<Vec<(String, tokio::time::Instant)>>,
        failing: HashSet<String>,
        stall: Option<Duration>,
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&self, message: &OutboundMessage) -> Result<String, TransportError> {
            self.calls
                .lock()
                .unwrap()
                .push((message.to.clone(), tokio::time::Instant::now()));
            if let Some(stall) = self.stall {
                tokio::time::sleep(stall).await;
            }
            if self.failing.contains(&message.to) {
                return Err(TransportError::Provider("mailbox unavailable".to_string()));
            }
            Ok(format!("msg-{}", message.to))
        }

        fn name(&self) -> &'static str {
            "scripted"
        }
    }

    fn config(batch_size: usize) -> DispatchConfig {
        DispatchConfig {
            batch_size,
            inter_batch_delay_ms: 500,
            transport_timeout_ms: 10_000,
        }
    }

    fn jobs(n: usize) -> Vec<DispatchJob> {
        (0..n)
            .map(|i| DispatchJob {
                recipient_id: Uuid::new_v4(),
                address: format!("reader{i}@example.com"),
                variant_id: None,
                message: Ok(RenderedMessage {
                    subject: "Weekly".to_string(),
                    html: "<p>hi</p>".to_string(),
                }),
                send_at: Utc::now(),
            })
            .collect()
    }

    fn scheduler(
        batch_size: usize,
        transport: Arc<ScriptedTransport>,
        deliveries: Arc<MemoryDeliveries>,
    ) -> DispatchScheduler {
        DispatchScheduler::new(&config(batch_size), transport, deliveries).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_batches_and_delays() {
        let transport = Arc::new(ScriptedTransport::default());
        let deliveries = Arc::new(MemoryDeliveries::default());
        let scheduler = scheduler(10, transport.clone(), deliveries);

        let start = tokio::time::Instant::now();
        let report = scheduler.dispatch(Uuid::new_v4(), jobs(25)).await;

        assert_eq!(report.batches, 3);
        assert_eq!(report.scheduled, 25);
        // ceil(25/10) - 1 delays, none after the last batch.
        assert_eq!(start.elapsed(), Duration::from_millis(1000));

        let calls = transport.calls.lock().unwrap();
        let at = |offset_ms: u64| {
            calls
                .iter()
                .filter(|(_, t)| *t == start + Duration::from_millis(offset_ms))
                .count()
        };
        assert_eq!(at(0), 10);
        assert_eq!(at(500), 10);
        assert_eq!(at(1000), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exact_multiple_has_no_trailing_delay() {
        let transport = Arc::new(ScriptedTransport::default());
        let scheduler = scheduler(100, transport, Arc::new(MemoryDeliveries::default()));

        let start = tokio::time::Instant::now();
        let report = scheduler.dispatch(Uuid::new_v4(), jobs(200)).await;
        assert_eq!(report.batches, 2);
        assert_eq!(start.elapsed(), Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_roster_issues_no_batches() {
        let transport = Arc::new(ScriptedTransport::default());
        let scheduler = scheduler(100, transport.clone(), Arc::new(MemoryDeliveries::default()));

        let start = tokio::time::Instant::now();
        let report = scheduler.dispatch(Uuid::new_v4(), Vec::new()).await;
        assert_eq!(report, DispatchReport::default());
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert!(transport.calls.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_in_second_batch_do_not_stop_run() {
        let roster = jobs(250);
        let failing: HashSet<String> = [roster[120].address.clone(), roster[175].address.clone()]
            .into_iter()
            .collect();
        let transport = Arc::new(ScriptedTransport {
            failing,
            ..Default::default()
        });
        let deliveries = Arc::new(MemoryDeliveries::default());
        let scheduler = scheduler(100, transport, deliveries.clone());
        let campaign_id = Uuid::new_v4();

        let report = scheduler.dispatch(campaign_id, roster).await;

        assert_eq!(report.batches, 3);
        assert_eq!(report.scheduled, 248);
        assert_eq!(report.failed, 2);
        assert_eq!(report.errors.len(), 2);
        assert!(report.errors.iter().all(|e| e.contains("mailbox unavailable")));

        let records = deliveries.list_for_campaign(campaign_id).await.unwrap();
        assert_eq!(records.len(), 250);
        let failed = records
            .iter()
            .filter(|r| r.status == DeliveryStatus::Failed)
            .count();
        assert_eq!(failed, 2);
        assert!(records
            .iter()
            .filter(|r| r.status == DeliveryStatus::Sent)
            .all(|r| r.message_id.is_some()));
    }

    #[tokio::test]
    async fn test_render_failure_skips_transport() {
        let transport = Arc::new(ScriptedTransport::default());
        let deliveries = Arc::new(MemoryDeliveries::default());
        let scheduler = scheduler(10, transport.clone(), deliveries.clone());
        let campaign_id = Uuid::new_v4();

        let mut roster = jobs(3);
        roster[1].message = Err(RenderError::MissingField("headline".to_string()));
        let broken = roster[1].recipient_id;

        let report = scheduler.dispatch(campaign_id, roster).await;
        assert_eq!(report.scheduled, 2);
        assert_eq!(report.failed, 1);
        assert!(report.errors[0].contains("Render error"));
        assert_eq!(transport.calls.lock().unwrap().len(), 2);

        let record = deliveries.rows.get(&(campaign_id, broken)).unwrap();
        assert_eq!(record.status, DeliveryStatus::Failed);
        assert!(record.error.as_deref().unwrap().contains("headline"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_transport_times_out() {
        let transport = Arc::new(ScriptedTransport {
            stall: Some(Duration::from_secs(30)),
            ..Default::default()
        });
        let deliveries = Arc::new(MemoryDeliveries::default());
        let scheduler = scheduler(10, transport, deliveries);

        let report = scheduler.dispatch(Uuid::new_v4(), jobs(2)).await;
        assert_eq!(report.failed, 2);
        assert!(report.errors.iter().all(|e| e.contains("timed out after 10000 ms")));
    }

    #[tokio::test]
    async fn test_sent_record_is_skipped() {
        let transport = Arc::new(ScriptedTransport::default());
        let deliveries = Arc::new(MemoryDeliveries::default());
        let scheduler = scheduler(10, transport.clone(), deliveries.clone());
        let campaign_id = Uuid::new_v4();

        let roster = jobs(3);
        let done = roster[0].recipient_id;
        deliveries
            .claim(DeliveryRecord::pending(campaign_id, done, None))
            .await
            .unwrap();
        deliveries
            .complete(
                campaign_id,
                done,
                DeliveryOutcome::Sent {
                    message_id: "earlier".to_string(),
                },
            )
            .await
            .unwrap();

        let report = scheduler.dispatch(campaign_id, roster).await;
        assert_eq!(report.scheduled, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.retried, 0);
        assert_eq!(transport.calls.lock().unwrap().len(), 2);
        let record = deliveries.rows.get(&(campaign_id, done)).unwrap();
        assert_eq!(record.message_id.as_deref(), Some("earlier"));
    }

    #[tokio::test]
    async fn test_failed_record_is_retried() {
        let transport = Arc::new(ScriptedTransport::default());
        let deliveries = Arc::new(MemoryDeliveries::default());
        let scheduler = scheduler(10, transport.clone(), deliveries.clone());
        let campaign_id = Uuid::new_v4();

        let roster = jobs(2);
        let bounced = roster[1].recipient_id;
        deliveries
            .claim(DeliveryRecord::pending(campaign_id, bounced, None))
            .await
            .unwrap();
        deliveries
            .complete(
                campaign_id,
                bounced,
                DeliveryOutcome::Failed {
                    error: "mailbox full".to_string(),
                },
            )
            .await
            .unwrap();

        let report = scheduler.dispatch(campaign_id, roster).await;
        assert_eq!(report.scheduled, 2);
        assert_eq!(report.retried, 1);
        assert_eq!(transport.calls.lock().unwrap().len(), 2);

        let record = deliveries.rows.get(&(campaign_id, bounced)).unwrap();
        assert_eq!(record.status, DeliveryStatus::Sent);
        assert!(record.error.is_none());
    }

    #[tokio::test]
    async fn test_leftover_pending_record_is_sent() {
        let transport = Arc::new(ScriptedTransport::default());
        let deliveries = Arc::new(MemoryDeliveries::default());
        let scheduler = scheduler(10, transport.clone(), deliveries.clone());
        let campaign_id = Uuid::new_v4();

        let roster = jobs(3);
        let interrupted = roster[0].recipient_id;
        deliveries
            .claim(DeliveryRecord::pending(campaign_id, interrupted, None))
            .await
            .unwrap();

        let report = scheduler.dispatch(campaign_id, roster).await;
        assert_eq!(report.scheduled, 3);
        assert_eq!(report.skipped, 0);
        assert_eq!(report.retried, 1);
        assert_eq!(transport.calls.lock().unwrap().len(), 3);
        assert!(deliveries
            .rows
            .iter()
            .all(|r| r.status == DeliveryStatus::Sent));
    }

    #[tokio::test]
    async fn test_unrecorded_outcome_is_reported() {
        let transport = Arc::new(ScriptedTransport::default());
        let deliveries = Arc::new(MemoryDeliveries::default());
        deliveries.reject_outcomes.store(true, Ordering::SeqCst);
        let scheduler = scheduler(10, transport.clone(), deliveries.clone());

        let report = scheduler.dispatch(Uuid::new_v4(), jobs(2)).await;
        assert_eq!(report.scheduled, 2);
        assert_eq!(report.failed, 0);
        assert_eq!(report.unrecorded, 2);
        assert_eq!(report.errors.len(), 2);
        assert!(report
            .errors
            .iter()
            .all(|e| e.contains("outcome not recorded") && e.contains("ledger offline")));
    }

    #[test]
    fn test_zero_batch_size_is_rejected() {
        let result = DispatchScheduler::new(
            &config(0),
            Arc::new(ScriptedTransport::default()),
            Arc::new(MemoryDeliveries::default()),
        );
        assert!(matches!(result, Err(CampaignError::Config(_))));
    }
}
