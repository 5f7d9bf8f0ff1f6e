//! # Zielportal (Zielvereinbarung Portal Backend)
//!
//! `zielportal` is the backend for a school-inspectorate goal-agreement
//! ("Zielvereinbarung") portal. Inspectorate staff ("Schulamt") sign in with
//! email and password, create goal-agreement forms for schools, and review
//! what schools submit. Schools never get accounts; each form is reachable
//! through exactly one human-enterable access code.
//!
//! ## Sessions
//!
//! Staff authentication uses opaque, cookie-backed server sessions. The
//! cookie value is a high-entropy random token; the database stores only its
//! SHA-256 hash. A session dies when its absolute lifetime (2 hours) or its
//! inactivity window (30 minutes) is exceeded, or when the owning account is
//! deactivated or locked — whichever comes first. Invalidation is detected
//! lazily at read time.
//!
//! ## Abuse protection
//!
//! Every sensitive route passes a per-client sliding-window rate limiter
//! before any credential or token work happens. Accounts lock for 15 minutes
//! after 5 failed logins. Password-reset and verification flows answer
//! identically whether or not an account exists.
//!
//! ## Audit trail
//!
//! Security-relevant outcomes are appended to an audit log. Emails, IPs, and
//! user agents are masked or truncated before the write, and known-sensitive
//! metadata keys are redacted. Audit failures never break the operation that
//! triggered them.

pub mod api;
pub mod cli;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
