//! Mail transport interface and its HTTP relay implementation.
//!
//! The transport never retries; a failure goes straight back to the dispatcher,
//! which aborts the log write so nothing is recorded for an alert that was not sent.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Why a mail was not delivered
#[derive(Error, Debug)]
pub enum TransportError {
    /// The relay rejected the message
    #[error("Failed to send mail: {0}")]
    SendFailed(String),
    /// The relay did not answer in time
    #[error("Mail relay did not answer within {0:?}")]
    Timeout(Duration),
    /// The relay could not be reached
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    /// Delivery is disabled
    #[error("No mail relay is configured")]
    NotConfigured,
}

/// A fully rendered message ready for delivery
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutgoingMail {
    /// Recipient addresses
    pub to: Vec<String>,
    /// Subject line
    pub subject: String,
    /// Plain-text body
    pub body_text: String,
    /// HTML body
    pub body_html: String,
}

/// Delivers rendered messages.
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Sends one message, without retrying.
    async fn send(&self, mail: &OutgoingMail) -> Result<(), TransportError>;
}

/// Posts messages as JSON to an HTTP mail relay.
pub struct HttpMailTransport {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    from: String,
}

#[derive(Serialize)]
struct RelayPayload<'a> {
    from: &'a str,
    #[serde(flatten)]
    mail: &'a OutgoingMail,
}

impl HttpMailTransport {
    /// Builds a transport whose every request is bounded by `timeout`.
    pub fn new(
        endpoint: String,
        api_key: Option<String>,
        from: String,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint,
            api_key,
            from,
        })
    }
}

#[async_trait]
impl MailTransport for HttpMailTransport {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), TransportError> {
        let mut request = self.client.post(&self.endpoint).json(&RelayPayload {
            from: &self.from,
            mail,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::SendFailed(format!(
                "relay answered {status}: {body}"
            )));
        }

        debug!(to = ?mail.to, subject = %mail.subject, "Mail accepted by relay");
        Ok(())
    }
}

/// Transport used when no relay is configured. Every send is refused, so alerts
/// that must be emailed fail and leave their dedup slot unclaimed.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledTransport;

#[async_trait]
impl MailTransport for DisabledTransport {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), TransportError> {
        warn!(to = ?mail.to, subject = %mail.subject, "Mail delivery disabled, message not sent");
        Err(TransportError::NotConfigured)
    }
}
