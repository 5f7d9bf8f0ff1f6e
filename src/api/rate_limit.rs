//! Sliding-window rate limiting for portal routes.
//!
//! Counters live in process memory behind a mutex, keyed by
//! `(client, scope)`. A horizontally scaled deployment gets per-process
//! limits only; the limiter is a defense-in-depth control, not a hard
//! security boundary. Clients with no resolvable address all share the
//! `"unknown"` bucket.

use axum::{
    http::{header::RETRY_AFTER, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::debug;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Route families with their own request quota.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RateLimitScope {
    Login,
    FormCreate,
    EntryAutosave,
    CodeRedeem,
    Export,
    Search,
    General,
}

impl RateLimitScope {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::FormCreate => "form-create",
            Self::EntryAutosave => "entry-autosave",
            Self::CodeRedeem => "code-redeem",
            Self::Export => "export",
            Self::Search => "search",
            Self::General => "general",
        }
    }

    /// Default quota for this route family.
    #[must_use]
    pub const fn quota(self) -> RateLimitQuota {
        match self {
            Self::Login => RateLimitQuota::new(5, Duration::from_secs(60)),
            Self::FormCreate => RateLimitQuota::new(10, Duration::from_secs(60)),
            Self::EntryAutosave => RateLimitQuota::new(60, Duration::from_secs(60)),
            Self::CodeRedeem => RateLimitQuota::new(10, Duration::from_secs(60)),
            Self::Export => RateLimitQuota::new(5, Duration::from_secs(60)),
            Self::Search => RateLimitQuota::new(30, Duration::from_secs(60)),
            Self::General => RateLimitQuota::new(100, Duration::from_secs(60)),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimitQuota {
    pub max_requests: u32,
    pub window: Duration,
}

impl RateLimitQuota {
    #[must_use]
    pub const fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed {
        limit: u32,
        remaining: u32,
        reset_after: Duration,
    },
    Limited {
        limit: u32,
        retry_after: Duration,
    },
}

impl RateLimitDecision {
    #[must_use]
    pub fn is_limited(&self) -> bool {
        matches!(self, Self::Limited { .. })
    }
}

pub trait RateLimiter: Send + Sync {
    fn check(&self, client: &str, scope: RateLimitScope) -> RateLimitDecision;
}

/// Limiter that allows everything, for tests.
#[derive(Clone, Debug)]
pub struct NoopRateLimiter;

impl RateLimiter for NoopRateLimiter {
    fn check(&self, _client: &str, scope: RateLimitScope) -> RateLimitDecision {
        let quota = scope.quota();
        RateLimitDecision::Allowed {
            limit: quota.max_requests,
            remaining: quota.max_requests,
            reset_after: Duration::ZERO,
        }
    }
}

struct WindowEntry {
    count: u32,
    reset_at: Instant,
}

/// Process-wide sliding-window counter store.
///
/// Constructed at server startup and injected into request handling; never a
/// module-level singleton.
pub struct SlidingWindowLimiter {
    windows: Mutex<HashMap<(String, RateLimitScope), WindowEntry>>,
}

impl SlidingWindowLimiter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Count a request against an explicit quota.
    ///
    /// The first request in a window starts the count at 1. Requests beyond
    /// the cap are reported limited without incrementing further.
    pub fn check_quota(
        &self,
        client: &str,
        scope: RateLimitScope,
        quota: RateLimitQuota,
    ) -> RateLimitDecision {
        let now = Instant::now();
        let mut windows = self
            .windows
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        let entry = windows
            .entry((client.to_string(), scope))
            .or_insert(WindowEntry {
                count: 0,
                reset_at: now + quota.window,
            });

        if entry.reset_at <= now {
            entry.count = 0;
            entry.reset_at = now + quota.window;
        }

        if entry.count >= quota.max_requests {
            return RateLimitDecision::Limited {
                limit: quota.max_requests,
                retry_after: entry.reset_at.saturating_duration_since(now),
            };
        }

        entry.count += 1;
        RateLimitDecision::Allowed {
            limit: quota.max_requests,
            remaining: quota.max_requests - entry.count,
            reset_after: entry.reset_at.saturating_duration_since(now),
        }
    }

    /// Drop all windows that have elapsed; returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut windows = self
            .windows
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let before = windows.len();
        windows.retain(|_, entry| entry.reset_at > now);
        before - windows.len()
    }
}

impl Default for SlidingWindowLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter for SlidingWindowLimiter {
    fn check(&self, client: &str, scope: RateLimitScope) -> RateLimitDecision {
        self.check_quota(client, scope, scope.quota())
    }
}

/// Periodically purge elapsed windows to bound memory growth.
///
/// Owned by server startup; the caller aborts the handle on shutdown.
pub fn spawn_sweeper(limiter: Arc<SlidingWindowLimiter>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            sleep(SWEEP_INTERVAL).await;
            let removed = limiter.sweep();
            if removed > 0 {
                debug!("rate limiter sweep removed {removed} windows");
            }
        }
    })
}

/// 429 response with the conventional rate-limit headers.
#[must_use]
pub fn limited_response(decision: &RateLimitDecision) -> Response {
    let mut headers = HeaderMap::new();
    if let RateLimitDecision::Limited { limit, retry_after } = decision {
        let retry_secs = retry_after.as_secs().max(1);
        if let Ok(value) = HeaderValue::from_str(&retry_secs.to_string()) {
            headers.insert(RETRY_AFTER, value.clone());
            headers.insert("x-ratelimit-reset", value);
        }
        if let Ok(value) = HeaderValue::from_str(&limit.to_string()) {
            headers.insert("x-ratelimit-limit", value);
        }
        headers.insert("x-ratelimit-remaining", HeaderValue::from_static("0"));
    }
    (
        StatusCode::TOO_MANY_REQUESTS,
        headers,
        "Zu viele Anfragen. Bitte versuchen Sie es später erneut.".to_string(),
    )
        .into_response()
}
