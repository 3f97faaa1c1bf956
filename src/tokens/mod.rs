//! Token issuance policy on top of the `session_token` wire format.
//!
//! Every pair is tied to a persisted session through the `sid` claim; the
//! refresh half is additionally pinned to the session row by hash, so a
//! rotated or revoked token can never mint again.

use crate::sessions::{Session, SessionMeta, SessionRepo, repo::is_unique_violation};
use anyhow::{Context, Result, anyhow};
use secrecy::{ExposeSecret, SecretString};
use session_token::{SessionTokenClaims, TokenKind, sign_hs256, verify_hs256};
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

pub const DEFAULT_ACCESS_TTL_SECONDS: i64 = 15 * 60;
pub const DEFAULT_REFRESH_TTL_SECONDS: i64 = 7 * 24 * 60 * 60;

const SESSION_CREATE_ATTEMPTS: usize = 3;

/// Current unix time in seconds, clamped to zero on clock weirdness.
#[must_use]
pub fn now_unix_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
}

/// SHA-256 of a token string; the only form a refresh token is stored in.
#[must_use]
pub fn hash_token(token: &str) -> Vec<u8> {
    Sha256::digest(token.as_bytes()).to_vec()
}

#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Clone)]
pub struct TokenService {
    secret: SecretString,
    access_ttl_seconds: i64,
    refresh_ttl_seconds: i64,
}

impl TokenService {
    #[must_use]
    pub fn new(secret: SecretString) -> Self {
        Self {
            secret,
            access_ttl_seconds: DEFAULT_ACCESS_TTL_SECONDS,
            refresh_ttl_seconds: DEFAULT_REFRESH_TTL_SECONDS,
        }
    }

    #[must_use]
    pub fn with_access_ttl_seconds(mut self, seconds: i64) -> Self {
        self.access_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_refresh_ttl_seconds(mut self, seconds: i64) -> Self {
        self.refresh_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn access_ttl_seconds(&self) -> i64 {
        self.access_ttl_seconds
    }

    /// Session rows expire together with their refresh token.
    #[must_use]
    pub fn refresh_ttl_seconds(&self) -> i64 {
        self.refresh_ttl_seconds
    }

    fn claims(
        &self,
        user_id: Uuid,
        email: &str,
        name: Option<&str>,
        session_id: Uuid,
        kind: TokenKind,
        now: i64,
    ) -> SessionTokenClaims {
        let ttl = match kind {
            TokenKind::Access => self.access_ttl_seconds,
            TokenKind::Refresh => self.refresh_ttl_seconds,
        };

        SessionTokenClaims {
            sub: user_id.to_string(),
            email: email.to_string(),
            name: name.map(ToString::to_string),
            sid: session_id.to_string(),
            kind,
            iat: now,
            exp: now + ttl,
            jti: Uuid::new_v4().to_string(),
        }
    }

    /// Signs a fresh access/refresh pair for an existing session.
    ///
    /// # Errors
    /// Returns an error if signing fails.
    pub fn issue(
        &self,
        user_id: Uuid,
        email: &str,
        name: Option<&str>,
        session_id: Uuid,
    ) -> Result<TokenPair> {
        let now = now_unix_seconds();
        let secret = self.secret.expose_secret().as_bytes();

        let access_token = sign_hs256(
            secret,
            &self.claims(user_id, email, name, session_id, TokenKind::Access, now),
        )
        .context("Failed to sign access token")?;

        let refresh_token = sign_hs256(
            secret,
            &self.claims(user_id, email, name, session_id, TokenKind::Refresh, now),
        )
        .context("Failed to sign refresh token")?;

        Ok(TokenPair {
            access_token,
            refresh_token,
        })
    }

    /// Checks signature, expiry, and kind. Any failure folds to `None`;
    /// callers treat `None` as unauthenticated, never as a server error.
    #[must_use]
    pub fn verify_access(&self, token: &str) -> Option<SessionTokenClaims> {
        self.verify(token, TokenKind::Access)
    }

    #[must_use]
    pub fn verify_refresh(&self, token: &str) -> Option<SessionTokenClaims> {
        self.verify(token, TokenKind::Refresh)
    }

    fn verify(&self, token: &str, kind: TokenKind) -> Option<SessionTokenClaims> {
        verify_hs256(
            token,
            self.secret.expose_secret().as_bytes(),
            kind,
            now_unix_seconds(),
        )
        .ok()
    }

    /// Creates a session row and its first token pair in one step.
    ///
    /// Regenerates the pair and retries when the refresh hash collides with
    /// an existing row.
    ///
    /// # Errors
    /// Returns an error if signing or insertion fails after retries.
    pub async fn start_session(
        &self,
        pool: &PgPool,
        user_id: Uuid,
        email: &str,
        name: Option<&str>,
        meta: &SessionMeta,
    ) -> Result<(Session, TokenPair)> {
        for _ in 0..SESSION_CREATE_ATTEMPTS {
            let session_id = Uuid::new_v4();
            let pair = self.issue(user_id, email, name, session_id)?;
            let refresh_hash = hash_token(&pair.refresh_token);

            match SessionRepo::create(
                pool,
                session_id,
                user_id,
                meta,
                &refresh_hash,
                self.refresh_ttl_seconds,
            )
            .await
            {
                Ok(session) => return Ok((session, pair)),
                Err(err) if is_unique_violation(&err) => {}
                Err(err) => return Err(err).context("Failed to create session"),
            }
        }

        Err(anyhow!("Session insert retries exhausted"))
    }

    /// Exchanges a refresh token for a new pair, rotating the stored hash.
    ///
    /// Lookup, hash comparison, and rotation happen in one statement, so a
    /// token can only ever refresh once. Fails closed: a bad token, an
    /// unknown/inactive/expired session, or a stale hash all yield `None`.
    ///
    /// # Errors
    /// Returns an error if signing or the database update fails.
    pub async fn refresh(
        &self,
        pool: &PgPool,
        refresh_token: &str,
    ) -> Result<Option<(TokenPair, SessionTokenClaims)>> {
        let Some(claims) = self.verify_refresh(refresh_token) else {
            return Ok(None);
        };

        let (Ok(user_id), Ok(session_id)) =
            (Uuid::parse_str(&claims.sub), Uuid::parse_str(&claims.sid))
        else {
            return Ok(None);
        };

        let pair = self.issue(user_id, &claims.email, claims.name.as_deref(), session_id)?;
        let rotated = SessionRepo::rotate_refresh(
            pool,
            session_id,
            &hash_token(refresh_token),
            &hash_token(&pair.refresh_token),
        )
        .await?;

        if !rotated {
            return Ok(None);
        }

        Ok(Some((pair, claims)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::postgres::PgPoolOptions;

    fn service() -> TokenService {
        TokenService::new(SecretString::from(
            "0123456789abcdef0123456789abcdef".to_string(),
        ))
    }

    // Short-circuit paths run before any query, so a lazy pool that never
    // connects is enough.
    fn lazy_pool() -> Result<PgPool> {
        Ok(PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?)
    }

    #[test]
    fn issue_and_verify_round_trip() -> Result<()> {
        let service = service();
        let user_id = Uuid::new_v4();
        let session_id = Uuid::new_v4();

        let pair = service.issue(user_id, "user@example.com", Some("User"), session_id)?;

        let claims = service
            .verify_access(&pair.access_token)
            .ok_or_else(|| anyhow!("access token should verify"))?;
        assert_eq!(claims.sub, user_id.to_string());
        assert_eq!(claims.sid, session_id.to_string());
        assert_eq!(claims.email, "user@example.com");
        assert_eq!(claims.kind, TokenKind::Access);

        let claims = service
            .verify_refresh(&pair.refresh_token)
            .ok_or_else(|| anyhow!("refresh token should verify"))?;
        assert_eq!(claims.kind, TokenKind::Refresh);
        Ok(())
    }

    #[test]
    fn verify_rejects_cross_kind_use() -> Result<()> {
        let service = service();
        let pair = service.issue(Uuid::new_v4(), "user@example.com", None, Uuid::new_v4())?;

        assert!(service.verify_access(&pair.refresh_token).is_none());
        assert!(service.verify_refresh(&pair.access_token).is_none());
        Ok(())
    }

    #[test]
    fn verify_folds_all_failures_to_none() -> Result<()> {
        let service = service();

        assert!(service.verify_access("").is_none());
        assert!(service.verify_access("not-a-token").is_none());

        // Expired: TTL of zero makes exp == iat.
        let expired = service
            .clone()
            .with_access_ttl_seconds(0)
            .issue(Uuid::new_v4(), "user@example.com", None, Uuid::new_v4())?;
        assert!(service.verify_access(&expired.access_token).is_none());

        // Wrong secret.
        let other = TokenService::new(SecretString::from(
            "ffffffffffffffffffffffffffffffff".to_string(),
        ));
        let pair = other.issue(Uuid::new_v4(), "user@example.com", None, Uuid::new_v4())?;
        assert!(service.verify_access(&pair.access_token).is_none());
        Ok(())
    }

    #[test]
    fn token_jtis_are_unique_per_issue() -> Result<()> {
        let service = service();
        let user_id = Uuid::new_v4();
        let session_id = Uuid::new_v4();

        let first = service.issue(user_id, "user@example.com", None, session_id)?;
        let second = service.issue(user_id, "user@example.com", None, session_id)?;
        assert_ne!(first.refresh_token, second.refresh_token);
        assert_ne!(
            hash_token(&first.refresh_token),
            hash_token(&second.refresh_token)
        );
        Ok(())
    }

    #[tokio::test]
    async fn refresh_rejects_garbage_before_touching_db() -> Result<()> {
        let pool = lazy_pool()?;
        let result = service().refresh(&pool, "garbage").await?;
        assert!(result.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn refresh_rejects_access_token_before_touching_db() -> Result<()> {
        let pool = lazy_pool()?;
        let service = service();
        let pair = service.issue(Uuid::new_v4(), "user@example.com", None, Uuid::new_v4())?;

        let result = service.refresh(&pool, &pair.access_token).await?;
        assert!(result.is_none());
        Ok(())
    }
}
