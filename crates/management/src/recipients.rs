//! Recipient Store adapter.
//!
//! In-memory stand-in for the recipient directory. The dispatch path only
//! reads it through [`RecipientDirectory`]; subscription changes arrive
//! through the unsubscribe link and bounce handling.

use crate::models::NewRecipient;
use async_trait::async_trait;
use campaign_core::error::{CampaignError, CampaignResult};
use campaign_core::store::RecipientDirectory;
use campaign_core::types::{Recipient, RecipientStatus};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};
use uuid::Uuid;

pub struct InMemoryRecipientDirectory {
    recipients: DashMap<Uuid, Recipient>,
    by_address: DashMap<String, Uuid>,
    by_token: DashMap<String, Uuid>,
    available: AtomicBool,
}

impl InMemoryRecipientDirectory {
    pub fn new() -> Self {
        Self {
            recipients: DashMap::new(),
            by_address: DashMap::new(),
            by_token: DashMap::new(),
            available: AtomicBool::new(true),
        }
    }

    /// Insert a fully-formed recipient, replacing any with the same id.
    pub fn insert(&self, recipient: Recipient) {
        self.by_address
            .insert(recipient.address.to_lowercase(), recipient.id);
        if !recipient.unsubscribe_token.is_empty() {
            self.by_token
                .insert(recipient.unsubscribe_token.clone(), recipient.id);
        }
        self.recipients.insert(recipient.id, recipient);
    }

    /// Add a recipient by address, or update the preferred hour of an
    /// existing one. Returns the recipient and whether it was created.
    /// Existing subscription status is left alone.
    pub fn upsert(&self, new: NewRecipient) -> CampaignResult<(Recipient, bool)> {
        if let Some(hour) = new.preferred_send_hour {
            if hour > 23 {
                return Err(CampaignError::Validation(format!(
                    "preferred_send_hour {hour} is out of range 0-23"
                )));
            }
        }
        let key = new.address.trim().to_lowercase();
        if key.is_empty() {
            return Err(CampaignError::Validation("address must not be empty".to_string()));
        }

        // The address slot stays locked until the recipient is registered,
        // so concurrent upserts of one address resolve to a single recipient.
        match self.by_address.entry(key) {
            Entry::Occupied(mut slot) => {
                if let Some(mut existing) = self.recipients.get_mut(slot.get()) {
                    existing.preferred_send_hour = new.preferred_send_hour;
                    return Ok((existing.clone(), false));
                }
                let recipient = self.register(&new);
                slot.insert(recipient.id);
                Ok((recipient, true))
            }
            Entry::Vacant(slot) => {
                let recipient = self.register(&new);
                slot.insert(recipient.id);
                Ok((recipient, true))
            }
        }
    }

    fn register(&self, new: &NewRecipient) -> Recipient {
        let mut recipient = Recipient::active(new.address.trim());
        recipient.preferred_send_hour = new.preferred_send_hour;
        self.by_token
            .insert(recipient.unsubscribe_token.clone(), recipient.id);
        self.recipients.insert(recipient.id, recipient.clone());
        recipient
    }

    pub fn get(&self, id: Uuid) -> Option<Recipient> {
        self.recipients.get(&id).map(|r| r.value().clone())
    }

    /// Landing point of the footer link.
    pub fn unsubscribe_by_token(&self, token: &str) -> Option<Recipient> {
        let id = *self.by_token.get(token)?.value();
        let mut recipient = self.recipients.get_mut(&id)?;
        if recipient.status == RecipientStatus::Active {
            recipient.status = RecipientStatus::Unsubscribed;
            info!(recipient_id = %id, "Recipient unsubscribed");
            metrics::counter!("recipients.unsubscribed").increment(1);
        }
        Some(recipient.clone())
    }

    pub fn mark_bounced(&self, address: &str) -> Option<Recipient> {
        let id = *self.by_address.get(&address.trim().to_lowercase())?.value();
        let mut recipient = self.recipients.get_mut(&id)?;
        recipient.status = RecipientStatus::Bounced;
        debug!(recipient_id = %id, "Recipient marked bounced");
        Some(recipient.clone())
    }

    /// Simulate the directory being unreachable.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.recipients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recipients.is_empty()
    }

    fn ensure_available(&self) -> CampaignResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CampaignError::Setup(
                "recipient directory unavailable".to_string(),
            ))
        }
    }
}

impl Default for InMemoryRecipientDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecipientDirectory for InMemoryRecipientDirectory {
    async fn list_active(&self) -> CampaignResult<Vec<Recipient>> {
        self.ensure_available()?;
        let mut active: Vec<Recipient> = self
            .recipients
            .iter()
            .filter(|r| r.status == RecipientStatus::Active)
            .map(|r| r.value().clone())
            .collect();
        active.sort_by(|a, b| a.address.cmp(&b.address).then(a.id.cmp(&b.id)));
        Ok(active)
    }

    async fn unsubscribe_token(&self, recipient_id: Uuid) -> CampaignResult<Option<String>> {
        self.ensure_available()?;
        Ok(self
            .recipients
            .get(&recipient_id)
            .map(|r| r.unsubscribe_token.clone()))
    }
}
