use crate::totp::repo::TotpRepo;
use anyhow::{Result, anyhow};
use sqlx::PgPool;
use totp_rs::{Algorithm, Secret, TOTP};
use uuid::Uuid;

/// Result of an enroll-confirm attempt. Wrong codes leave the pending
/// credential in place so the user can retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmOutcome {
    Enabled,
    AlreadyEnabled,
    IncorrectCode,
    NotEnrolled,
}

/// Everything the client needs to finish enrollment. The secret is shown
/// exactly once; only the raw seed is persisted.
#[derive(Debug, Clone)]
pub struct TotpEnrollment {
    pub credential_id: Uuid,
    pub secret_base32: String,
    pub otpauth_url: String,
    pub qr_png_base64: String,
}

#[derive(Clone)]
pub struct TotpService {
    pool: PgPool,
    issuer: String,
}

impl TotpService {
    #[must_use]
    pub fn new(pool: PgPool, issuer: String) -> Self {
        Self { pool, issuer }
    }

    // SHA1/6 digits/30s step with a skew of one window either side; the
    // parameters every authenticator app defaults to.
    fn totp_for(&self, secret: Vec<u8>, account: &str) -> Result<TOTP> {
        TOTP::new(
            Algorithm::SHA1,
            6,
            1,
            30,
            secret,
            Some(self.issuer.clone()),
            account.to_string(),
        )
        .map_err(|e| anyhow!("TOTP init error: {e}"))
    }

    /// Begins enrollment: generates a secret, stores it unconfirmed, and
    /// returns the provisioning material for the user.
    ///
    /// # Errors
    /// Returns an error if secret generation or database insertion fails.
    pub async fn enroll_begin(&self, user_id: Uuid, user_email: &str) -> Result<TotpEnrollment> {
        let secret = Secret::generate_secret();
        let secret_bytes = secret
            .to_bytes()
            .map_err(|e| anyhow!("Secret gen error: {e}"))?;

        let credential_id = Uuid::new_v4();
        TotpRepo::create_credential(&self.pool, credential_id, user_id, &secret_bytes).await?;

        let totp = self.totp_for(secret_bytes, user_email)?;
        let qr = totp
            .get_qr_base64()
            .map_err(|e| anyhow!("QR gen error: {e}"))?;

        Ok(TotpEnrollment {
            credential_id,
            secret_base32: totp.get_secret_base32(),
            otpauth_url: totp.get_url(),
            qr_png_base64: format!("data:image/png;base64,{qr}"),
        })
    }

    /// Confirms enrollment by verifying the first code against the pending
    /// secret. Only a valid code flips the credential to confirmed.
    ///
    /// # Errors
    /// Returns an error if database access fails.
    pub async fn enroll_confirm(&self, user_id: Uuid, code: &str) -> Result<ConfirmOutcome> {
        let Some(cred) = TotpRepo::get_for_user(&self.pool, user_id).await? else {
            return Ok(ConfirmOutcome::NotEnrolled);
        };

        if cred.confirmed_at.is_some() {
            return Ok(ConfirmOutcome::AlreadyEnabled);
        }

        let totp = self.totp_for(cred.secret.clone(), "user")?;
        if totp.check_current(code).unwrap_or(false) {
            TotpRepo::confirm_credential(&self.pool, user_id).await?;
            TotpRepo::touch_last_used(&self.pool, cred.id).await?;
            Ok(ConfirmOutcome::Enabled)
        } else {
            Ok(ConfirmOutcome::IncorrectCode)
        }
    }

    /// Verifies a login code against the confirmed credential. Verification
    /// is stateless within the time window; single-use tracking exists only
    /// for recovery codes.
    ///
    /// # Errors
    /// Returns an error if database access fails.
    pub async fn verify(&self, user_id: Uuid, code: &str) -> Result<bool> {
        let Some(cred) = TotpRepo::get_active_credential(&self.pool, user_id).await? else {
            return Ok(false);
        };

        let totp = self.totp_for(cred.secret.clone(), "user")?;
        let valid = totp.check_current(code).unwrap_or(false);

        if valid {
            TotpRepo::touch_last_used(&self.pool, cred.id).await?;
        }

        Ok(valid)
    }

    /// Removes the user's TOTP credentials entirely.
    ///
    /// # Errors
    /// Returns an error if database access fails.
    pub async fn disable(&self, user_id: Uuid) -> Result<()> {
        TotpRepo::delete_for_user(&self.pool, user_id).await
    }
}
