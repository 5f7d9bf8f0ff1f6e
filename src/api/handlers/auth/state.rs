//! Auth configuration and shared request state.

use crate::api::email::EmailSender;
use crate::api::rate_limit::RateLimiter;
use std::sync::Arc;

const DEFAULT_SESSION_DURATION_SECONDS: i64 = 2 * 60 * 60;
const DEFAULT_INACTIVITY_TIMEOUT_SECONDS: i64 = 30 * 60;
const DEFAULT_RESET_TOKEN_TTL_SECONDS: i64 = 60 * 60;
const DEFAULT_VERIFICATION_TOKEN_TTL_SECONDS: i64 = 24 * 60 * 60;
const DEFAULT_RESEND_COOLDOWN_SECONDS: i64 = 60;
const DEFAULT_MAX_FAILED_LOGINS: i32 = 5;
const DEFAULT_LOCKOUT_SECONDS: i64 = 15 * 60;
const DEFAULT_MIN_PASSWORD_LENGTH: usize = 12;

/// Fixed parameters of the auth subsystem.
///
/// A session dies from whichever clock runs out first: the absolute duration
/// or the inactivity timeout.
#[derive(Clone, Debug)]
pub struct AuthConfig {
    frontend_base_url: String,
    session_duration_seconds: i64,
    inactivity_timeout_seconds: i64,
    reset_token_ttl_seconds: i64,
    verification_token_ttl_seconds: i64,
    resend_cooldown_seconds: i64,
    max_failed_logins: i32,
    lockout_seconds: i64,
    min_password_length: usize,
}

impl AuthConfig {
    #[must_use]
    pub fn new(frontend_base_url: String) -> Self {
        Self {
            frontend_base_url,
            session_duration_seconds: DEFAULT_SESSION_DURATION_SECONDS,
            inactivity_timeout_seconds: DEFAULT_INACTIVITY_TIMEOUT_SECONDS,
            reset_token_ttl_seconds: DEFAULT_RESET_TOKEN_TTL_SECONDS,
            verification_token_ttl_seconds: DEFAULT_VERIFICATION_TOKEN_TTL_SECONDS,
            resend_cooldown_seconds: DEFAULT_RESEND_COOLDOWN_SECONDS,
            max_failed_logins: DEFAULT_MAX_FAILED_LOGINS,
            lockout_seconds: DEFAULT_LOCKOUT_SECONDS,
            min_password_length: DEFAULT_MIN_PASSWORD_LENGTH,
        }
    }

    #[must_use]
    pub fn with_session_duration_seconds(mut self, seconds: i64) -> Self {
        self.session_duration_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_inactivity_timeout_seconds(mut self, seconds: i64) -> Self {
        self.inactivity_timeout_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_reset_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.reset_token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_verification_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.verification_token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_resend_cooldown_seconds(mut self, seconds: i64) -> Self {
        self.resend_cooldown_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_max_failed_logins(mut self, attempts: i32) -> Self {
        self.max_failed_logins = attempts;
        self
    }

    #[must_use]
    pub fn with_lockout_seconds(mut self, seconds: i64) -> Self {
        self.lockout_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_min_password_length(mut self, length: usize) -> Self {
        self.min_password_length = length;
        self
    }

    pub(crate) fn frontend_base_url(&self) -> &str {
        &self.frontend_base_url
    }

    pub(crate) fn session_duration_seconds(&self) -> i64 {
        self.session_duration_seconds
    }

    pub(crate) fn inactivity_timeout_seconds(&self) -> i64 {
        self.inactivity_timeout_seconds
    }

    pub(crate) fn reset_token_ttl_seconds(&self) -> i64 {
        self.reset_token_ttl_seconds
    }

    pub(crate) fn verification_token_ttl_seconds(&self) -> i64 {
        self.verification_token_ttl_seconds
    }

    pub(crate) fn resend_cooldown_seconds(&self) -> i64 {
        self.resend_cooldown_seconds
    }

    pub(crate) fn max_failed_logins(&self) -> i32 {
        self.max_failed_logins
    }

    pub(crate) fn lockout_seconds(&self) -> i64 {
        self.lockout_seconds
    }

    pub(crate) fn min_password_length(&self) -> usize {
        self.min_password_length
    }

    /// Only mark cookies secure when the frontend is served over HTTPS.
    pub(crate) fn session_cookie_secure(&self) -> bool {
        self.frontend_base_url.starts_with("https://")
    }
}

/// Shared state injected into every auth-adjacent handler.
pub struct AuthState {
    config: AuthConfig,
    rate_limiter: Arc<dyn RateLimiter>,
    email_sender: Arc<dyn EmailSender>,
}

impl AuthState {
    pub fn new(
        config: AuthConfig,
        rate_limiter: Arc<dyn RateLimiter>,
        email_sender: Arc<dyn EmailSender>,
    ) -> Self {
        Self {
            config,
            rate_limiter,
            email_sender,
        }
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub(crate) fn rate_limiter(&self) -> &dyn RateLimiter {
        self.rate_limiter.as_ref()
    }

    pub(crate) fn email_sender(&self) -> &dyn EmailSender {
        self.email_sender.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::email::LogEmailSender;
    use crate::api::rate_limit::NoopRateLimiter;

    #[test]
    fn auth_config_defaults_and_overrides() {
        let config = AuthConfig::new("https://portal.schulamt.de".to_string());

        assert_eq!(config.frontend_base_url(), "https://portal.schulamt.de");
        assert_eq!(config.session_duration_seconds(), 2 * 60 * 60);
        assert_eq!(config.inactivity_timeout_seconds(), 30 * 60);
        assert_eq!(config.reset_token_ttl_seconds(), 60 * 60);
        assert_eq!(config.verification_token_ttl_seconds(), 24 * 60 * 60);
        assert_eq!(config.max_failed_logins(), 5);
        assert_eq!(config.lockout_seconds(), 15 * 60);

        let config = config
            .with_session_duration_seconds(60)
            .with_inactivity_timeout_seconds(30)
            .with_reset_token_ttl_seconds(120)
            .with_verification_token_ttl_seconds(240)
            .with_resend_cooldown_seconds(10)
            .with_max_failed_logins(3)
            .with_lockout_seconds(99)
            .with_min_password_length(8);

        assert_eq!(config.session_duration_seconds(), 60);
        assert_eq!(config.inactivity_timeout_seconds(), 30);
        assert_eq!(config.reset_token_ttl_seconds(), 120);
        assert_eq!(config.verification_token_ttl_seconds(), 240);
        assert_eq!(config.resend_cooldown_seconds(), 10);
        assert_eq!(config.max_failed_logins(), 3);
        assert_eq!(config.lockout_seconds(), 99);
        assert_eq!(config.min_password_length(), 8);
    }

    #[test]
    fn cookie_secure_follows_frontend_scheme() {
        assert!(AuthConfig::new("https://portal.schulamt.de".to_string()).session_cookie_secure());
        assert!(!AuthConfig::new("http://localhost:3000".to_string()).session_cookie_secure());
    }

    #[test]
    fn auth_state_exposes_config() {
        let state = AuthState::new(
            AuthConfig::new("http://localhost:3000".to_string()),
            Arc::new(NoopRateLimiter),
            Arc::new(LogEmailSender),
        );
        assert_eq!(state.config().frontend_base_url(), "http://localhost:3000");
    }
}
