//! API handlers for the auth service.
//!
//! Route handlers live under `auth`; `health` serves the liveness probe. The
//! modules only share state through the `Extension` layers installed by the
//! server, so each handler can be exercised in isolation.

pub mod auth;
pub mod health;
