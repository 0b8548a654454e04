//! SendGrid email transport.
//!
//! Builds the v3 mail-send payload for each message. The HTTP call itself
//! is stubbed: the provider validates the address, counts the send, and
//! returns a synthetic `sg-` message id.

use async_trait::async_trait;
use campaign_core::channels::{OutboundMessage, Transport};
use campaign_core::config::SendGridConfig;
use campaign_core::error::TransportError;
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

/// SendGrid email provider.
pub struct SendGridProvider {
    config: SendGridConfig,
    total_sent: AtomicU64,
    total_rejected: AtomicU64,
}

impl SendGridProvider {
    pub fn new(config: SendGridConfig) -> Self {
        info!(
            from = %config.from_email,
            open_tracking = config.open_tracking,
            click_tracking = config.click_tracking,
            "SendGrid provider initialized"
        );
        Self {
            config,
            total_sent: AtomicU64::new(0),
            total_rejected: AtomicU64::new(0),
        }
    }

    /// Build the SendGrid API payload for a message.
    /// In production: POST to https://api.sendgrid.com/v3/mail/send
    pub fn build_payload(&self, message: &OutboundMessage) -> serde_json::Value {
        let mut payload = serde_json::json!({
            "personalizations": [{
                "to": [{"email": message.to}]
            }],
            "from": {
                "email": self.config.from_email,
                "name": self.config.from_name
            },
            "subject": message.subject,
            "content": [{
                "type": "text/html",
                "value": message.html
            }],
            "tracking_settings": {
                "click_tracking": {"enable": self.config.click_tracking},
                "open_tracking": {"enable": self.config.open_tracking}
            }
        });
        // SendGrid only accepts scheduling into the future.
        if message.send_at > Utc::now() {
            payload["send_at"] = serde_json::json!(message.send_at.timestamp());
        }
        payload
    }

    pub fn total_sent(&self) -> u64 {
        self.total_sent.load(Ordering::Relaxed)
    }

    pub fn total_rejected(&self) -> u64 {
        self.total_rejected.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Transport for SendGridProvider {
    async fn send(&self, message: &OutboundMessage) -> Result<String, TransportError> {
        if !is_deliverable(&message.to) {
            self.total_rejected.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("sendgrid.rejected").increment(1);
            return Err(TransportError::Rejected(message.to.clone()));
        }

        debug!(to = %message.to, subject = %message.subject, "Sending email via SendGrid");
        let _payload = self.build_payload(message);

        self.total_sent.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("sendgrid.emails_sent").increment(1);

        Ok(format!("sg-{}", uuid::Uuid::new_v4()))
    }

    fn name(&self) -> &'static str {
        "sendgrid"
    }
}

/// One `@`, a non-empty local part, and a dotted domain.
fn is_deliverable(address: &str) -> bool {
    let mut parts = address.split('@');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(local), Some(domain), None) => {
            !local.is_empty()
                && !address.chars().any(char::is_whitespace)
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        }
        _ => false,
    }
}
