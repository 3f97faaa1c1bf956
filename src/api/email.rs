//! Email delivery seam.
//!
//! Registration and verification flows hand messages to an [`EmailSender`]
//! and never block on real delivery. The default sender logs the payload;
//! production deployments implement the trait against their provider of
//! choice (SMTP, API, broker).

use anyhow::Result;
use tracing::info;

#[derive(Clone, Debug)]
pub struct EmailMessage {
    pub to_email: String,
    pub template: String,
    pub payload_json: String,
}

/// Email delivery abstraction used by the auth handlers.
pub trait EmailSender: Send + Sync {
    /// Deliver a message or return an error.
    fn send(&self, message: &EmailMessage) -> Result<()>;
}

/// Local dev sender that logs the payload instead of sending real email.
#[derive(Clone, Debug)]
pub struct LogEmailSender;

impl EmailSender for LogEmailSender {
    fn send(&self, message: &EmailMessage) -> Result<()> {
        info!(
            to_email = %message.to_email,
            template = %message.template,
            payload = %message.payload_json,
            "email send stub"
        );
        Ok(())
    }
}
