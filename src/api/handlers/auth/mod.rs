//! Auth handlers and supporting modules.
//!
//! This module coordinates password login, token refresh, TOTP second
//! factors, OAuth sign-in, and the session registry behind `/v1/auth/*`.
//!
//! ## Sessions and tokens
//!
//! Every login path ends in the same place: a `user_sessions` row plus an
//! access/refresh JWT pair whose `sid` claim points at that row. Revoking the
//! row kills both tokens at once, so handlers never have to reason about
//! token state separately from session state.
//!
//! ## Second factor
//!
//! Password holders with TOTP enabled get a short-lived login challenge
//! instead of tokens; `/v1/auth/two-factor/totp/verify-login` trades the
//! challenge plus a TOTP or recovery code for the real pair. Recovery codes
//! are single-use and stored hashed.
//!
//! ## Rate limiting
//!
//! Credential-bearing endpoints check the client IP first and the account
//! email second before doing any work, so the limiter also shields the
//! password hasher.

mod error;
pub(crate) mod login;
pub(crate) mod me;
pub(crate) mod oauth;
pub(crate) mod principal;
mod rate_limit;
pub(crate) mod refresh;
pub(crate) mod register;
pub(crate) mod security_events;
pub(crate) mod session;
mod state;
mod storage;
pub(crate) mod two_factor;
pub(crate) mod types;
mod utils;
pub(crate) mod verification;

pub use rate_limit::{FixedWindowLimiter, NoopRateLimiter, RateLimiter};
pub use state::{AuthConfig, AuthState};
