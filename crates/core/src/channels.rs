//! Outbound transport contract.
//!
//! The dispatch core knows nothing about a provider beyond this
//! request/response shape: an address, a subject and an HTML body go in,
//! a provider message id or a [`TransportError`] comes out.

use crate::error::TransportError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A fully rendered message bound for one recipient.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutboundMessage {
    pub to: String,
    pub subject: String,
    pub html: String,
    /// Providers that support scheduled delivery hold the message until
    /// this instant; others send immediately.
    pub send_at: DateTime<Utc>,
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Submit one message. Returns the provider's message id.
    async fn send(&self, message: &OutboundMessage) -> Result<String, TransportError>;

    /// Provider name for metrics and logs.
    fn name(&self) -> &'static str;
}
