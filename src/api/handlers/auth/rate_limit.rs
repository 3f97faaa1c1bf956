//! Rate limiting primitives for auth flows.
//!
//! Handlers check the client IP first and the normalized email second, so an
//! attacker rotating addresses still runs into the per-account limit. Limits
//! are enforced per instance; cross-instance synchronization is out of scope
//! here.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

const WINDOW: Duration = Duration::from_secs(10 * 60);

// Expired windows are swept lazily once the map grows past this.
const SWEEP_THRESHOLD: usize = 10_000;

#[derive(Clone, Copy, Debug)]
pub enum RateLimitAction {
    Register,
    Login,
    TwoFactorVerify,
    VerifyEmail,
    ResendVerification,
}

impl RateLimitAction {
    const fn key(self) -> &'static str {
        match self {
            Self::Register => "register",
            Self::Login => "login",
            Self::TwoFactorVerify => "2fa",
            Self::VerifyEmail => "verify",
            Self::ResendVerification => "resend",
        }
    }

    /// Attempts allowed per IP address within the window.
    const fn ip_limit(self) -> u32 {
        match self {
            Self::Register | Self::ResendVerification => 10,
            Self::Login => 20,
            Self::TwoFactorVerify | Self::VerifyEmail => 30,
        }
    }

    /// Attempts allowed per account within the window.
    const fn email_limit(self) -> u32 {
        match self {
            Self::Register | Self::ResendVerification => 3,
            Self::Login => 5,
            Self::TwoFactorVerify | Self::VerifyEmail => 10,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    Limited,
}

pub trait RateLimiter: Send + Sync {
    fn check_ip(&self, ip: Option<&str>, action: RateLimitAction) -> RateLimitDecision;
    fn check_email(&self, email: &str, action: RateLimitAction) -> RateLimitDecision;
}

#[derive(Debug)]
struct Window {
    started_at: Instant,
    count: u32,
}

/// In-memory fixed-window limiter keyed by `scope:value:action`.
#[derive(Debug, Default)]
pub struct FixedWindowLimiter {
    windows: Mutex<HashMap<String, Window>>,
}

impl FixedWindowLimiter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn check(&self, key: String, limit: u32) -> RateLimitDecision {
        let mut windows = match self.windows.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let now = Instant::now();

        if windows.len() > SWEEP_THRESHOLD {
            windows.retain(|_, window| now.duration_since(window.started_at) < WINDOW);
        }

        let window = windows.entry(key).or_insert(Window {
            started_at: now,
            count: 0,
        });

        if now.duration_since(window.started_at) >= WINDOW {
            window.started_at = now;
            window.count = 0;
        }

        window.count += 1;

        if window.count > limit {
            RateLimitDecision::Limited
        } else {
            RateLimitDecision::Allowed
        }
    }
}

impl RateLimiter for FixedWindowLimiter {
    fn check_ip(&self, ip: Option<&str>, action: RateLimitAction) -> RateLimitDecision {
        // Without a client address there is nothing to key on; the email
        // check still applies.
        let Some(ip) = ip else {
            return RateLimitDecision::Allowed;
        };
        self.check(format!("ip:{ip}:{}", action.key()), action.ip_limit())
    }

    fn check_email(&self, email: &str, action: RateLimitAction) -> RateLimitDecision {
        self.check(
            format!("email:{email}:{}", action.key()),
            action.email_limit(),
        )
    }
}

#[derive(Clone, Debug)]
pub struct NoopRateLimiter;

impl RateLimiter for NoopRateLimiter {
    fn check_ip(&self, _ip: Option<&str>, _action: RateLimitAction) -> RateLimitDecision {
        RateLimitDecision::Allowed
    }

    fn check_email(&self, _email: &str, _action: RateLimitAction) -> RateLimitDecision {
        RateLimitDecision::Allowed
    }
}
