//! Outbound email delivery abstraction.
//!
//! Handlers build a message and hand it to an [`EmailSender`]; the sender
//! decides how to deliver (SMTP, API, etc.) and returns `Ok`/`Err`. The core
//! only records the outcome in the audit trail — delivery retries, templates,
//! and provider specifics live behind the trait.
//!
//! The default sender for local dev is [`LogEmailSender`], which logs the
//! payload and returns `Ok(())`.

use anyhow::Result;
use tracing::info;

#[derive(Clone, Debug)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub html: String,
}

/// Email delivery abstraction.
pub trait EmailSender: Send + Sync {
    /// Deliver a message or return an error so the caller can audit the failure.
    fn send(&self, message: &EmailMessage) -> Result<()>;
}

/// Local dev sender that logs the payload instead of sending real email.
#[derive(Clone, Debug)]
pub struct LogEmailSender;

impl EmailSender for LogEmailSender {
    fn send(&self, message: &EmailMessage) -> Result<()> {
        info!(
            to = %message.to,
            subject = %message.subject,
            body = %message.html,
            "email send stub"
        );
        Ok(())
    }
}

/// Password-reset mail with the frontend reset link.
///
/// The raw token only ever leaves the system through this message.
#[must_use]
pub fn reset_email(frontend_base_url: &str, to: &str, token: &str) -> EmailMessage {
    let base = frontend_base_url.trim_end_matches('/');
    let reset_url = format!("{base}/passwort-zuruecksetzen#token={token}");
    EmailMessage {
        to: to.to_string(),
        subject: "Passwort zurücksetzen – Zielvereinbarungsportal".to_string(),
        html: format!(
            "<p>Über den folgenden Link können Sie ein neues Passwort vergeben. \
             Der Link ist eine Stunde gültig.</p>\
             <p><a href=\"{reset_url}\">{reset_url}</a></p>\
             <p>Falls Sie kein neues Passwort angefordert haben, ignorieren Sie diese E-Mail.</p>"
        ),
    }
}

/// Address-verification mail with the frontend confirmation link.
#[must_use]
pub fn verification_email(frontend_base_url: &str, to: &str, token: &str) -> EmailMessage {
    let base = frontend_base_url.trim_end_matches('/');
    let verify_url = format!("{base}/email-bestaetigen#token={token}");
    EmailMessage {
        to: to.to_string(),
        subject: "E-Mail-Adresse bestätigen – Zielvereinbarungsportal".to_string(),
        html: format!(
            "<p>Bitte bestätigen Sie Ihre E-Mail-Adresse über den folgenden Link. \
             Der Link ist 24 Stunden gültig.</p>\
             <p><a href=\"{verify_url}\">{verify_url}</a></p>"
        ),
    }
}
