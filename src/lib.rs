//! # ThanaWy Auth (Authentication & Session Lifecycle)
//!
//! `thanawy-auth` is the authentication authority for the ThanaWy learning
//! platform. It owns the credential store and everything between a login and
//! a logout: token issuance and refresh, session tracking and revocation,
//! TOTP two-factor with recovery codes, OAuth sign-in bridging, and an
//! append-only security event log. The platform's CRUD services consume this
//! service's token contract and never touch credentials themselves.
//!
//! ## Sessions & Tokens
//!
//! Every login creates a persisted session row. Tokens are HS256 JWTs that
//! reference their session through the `sid` claim: access tokens authorize
//! single requests, refresh tokens rotate the pair and are valid only while
//! their hash matches the session row. Revoking a session
//! (`is_active = false`) invalidates every token referencing it at the next
//! check, regardless of the token's own expiry.
//!
//! ## Two-Factor
//!
//! TOTP enrollment is a two-step state machine (disabled, pending-setup,
//! enabled). Enabling requires a valid code against the fresh secret, and
//! each enrollment ships a batch of ten single-use recovery codes stored
//! only as salted `Argon2id` hashes.
//!
//! ## OAuth
//!
//! Google and Facebook sign-in use a cookie-held CSRF state token that is
//! validated before any provider call is made. Callback resolution converges
//! on the same session + token path as password login; provisioned accounts
//! carry a NULL password hash and cannot password-login.

pub mod api;
pub mod cli;
pub mod events;
pub mod oauth;
pub mod sessions;
pub mod tokens;
pub mod totp;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Context, Result, ensure};
    use std::fs;
    use std::path::{Path, PathBuf};

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        // Should be a hex string (full SHA-1 is 40 chars, but could be short)
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
        assert!(
            GIT_COMMIT_HASH.len() >= 7,
            "GIT_COMMIT_HASH should be at least 7 characters long, got: {GIT_COMMIT_HASH}"
        );
    }

    #[test]
    fn test_app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with(env!("CARGO_PKG_NAME")));
        assert!(APP_USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }

    // Normalize SQL to avoid brittle formatting checks in schema tests.
    fn canonicalize_sql(sql: &str) -> String {
        sql.chars()
            .filter(|ch| !ch.is_whitespace())
            .map(|ch| ch.to_ascii_lowercase())
            .collect()
    }

    fn canonical_sql(path: &Path) -> Result<String> {
        let sql = fs::read_to_string(path)
            .with_context(|| format!("Failed to read SQL file at {}", path.display()))?;
        Ok(canonicalize_sql(&sql))
    }

    fn assert_contains(path: &Path, canonical: &str, needle: &str) -> Result<()> {
        ensure!(
            canonical.contains(needle),
            "Expected {needle} is missing in {}",
            path.display()
        );
        Ok(())
    }

    #[test]
    fn schema_sql_integrity() -> Result<()> {
        let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("db/sql/01_auth.sql");
        let canonical = canonical_sql(&path)?;

        // Revocation and refresh rotation depend on these column contracts.
        assert_contains(&path, &canonical, "is_activebooleannotnulldefaulttrue")?;
        assert_contains(&path, &canonical, "refresh_token_hashbyteanotnullunique")?;

        // NULL password_hash marks OAuth-provisioned accounts.
        assert_contains(&path, &canonical, "password_hashtext,")?;

        // Single-use artifacts all carry a consumed_at marker.
        assert_contains(&path, &canonical, "consumed_attimestamptz")?;

        // One TOTP credential per user.
        assert_contains(&path, &canonical, "user_iduuidnotnulluniquereferencesusers")
    }

    #[test]
    fn init_sql_includes_auth_schema() -> Result<()> {
        let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("db/sql/00_init.sql");
        let canonical = canonical_sql(&path)?;
        assert_contains(&path, &canonical, r"\ir01_auth.sql")
    }

    #[test]
    fn container_entrypoint_targets_init_sql() -> Result<()> {
        let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("db/sql/container-entrypoint.sql");
        let canonical = canonical_sql(&path)?;
        assert_contains(&path, &canonical, r"\i/db/sql/00_init.sql")
    }
}
