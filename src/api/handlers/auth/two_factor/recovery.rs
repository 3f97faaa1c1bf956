//! Recovery code generation and verification helpers.
//!
//! Recovery codes are the fallback factor when the authenticator app is
//! unavailable. Only salted Argon2id hashes are persisted; the plaintext
//! batch is shown to the user exactly once.

use anyhow::{Context, Result, anyhow};
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString};
use rand::{RngCore, rngs::OsRng};
use uuid::Uuid;

pub(super) const RECOVERY_CODE_COUNT: usize = 10;
const RECOVERY_CODE_LEN: usize = 12;
const RECOVERY_CODE_GROUP_SIZE: usize = 4;
// No 0/O/1/I, so codes survive being read over the phone.
const RECOVERY_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// A freshly generated recovery-code batch (plaintext + hashes).
#[derive(Debug)]
pub(super) struct RecoveryCodeBatch {
    pub(super) batch_id: Uuid,
    pub(super) codes: Vec<String>,
    pub(super) code_hashes: Vec<String>,
}

impl RecoveryCodeBatch {
    /// Generate a new recovery-code batch.
    pub(super) fn generate() -> Result<Self> {
        let mut rng = OsRng;
        Self::generate_with_rng(&mut rng)
    }

    fn generate_with_rng<R: RngCore + ?Sized>(rng: &mut R) -> Result<Self> {
        let mut codes = Vec::with_capacity(RECOVERY_CODE_COUNT);
        let mut code_hashes = Vec::with_capacity(RECOVERY_CODE_COUNT);
        for _ in 0..RECOVERY_CODE_COUNT {
            let code = generate_code(rng)?;
            let hash = hash_recovery_code(&code)?;
            codes.push(code);
            code_hashes.push(hash);
        }
        Ok(Self {
            batch_id: Uuid::new_v4(),
            codes,
            code_hashes,
        })
    }
}

/// Normalize a recovery code for verification.
pub(super) fn normalize_recovery_code(input: &str) -> Result<String> {
    let normalized: String = input
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|ch| ch.to_ascii_uppercase())
        .collect();

    if normalized.len() != RECOVERY_CODE_LEN {
        return Err(anyhow!("invalid recovery code length"));
    }

    if !normalized
        .as_bytes()
        .iter()
        .all(|ch| RECOVERY_CODE_ALPHABET.contains(ch))
    {
        return Err(anyhow!("invalid recovery code characters"));
    }

    Ok(normalized)
}

/// Format a normalized recovery code for display.
pub(super) fn format_recovery_code(normalized: &str) -> Result<String> {
    if normalized.len() != RECOVERY_CODE_LEN {
        return Err(anyhow!("invalid recovery code length"));
    }
    let mut out = String::with_capacity(RECOVERY_CODE_LEN + 2);
    for (idx, chunk) in normalized
        .as_bytes()
        .chunks(RECOVERY_CODE_GROUP_SIZE)
        .enumerate()
    {
        if idx > 0 {
            out.push('-');
        }
        out.push_str(std::str::from_utf8(chunk).context("invalid recovery code chunk")?);
    }
    Ok(out)
}

/// Verify a recovery code against a stored hash.
pub(super) fn verify_recovery_code(code: &str, stored_hash: &str) -> Result<bool> {
    let normalized = normalize_recovery_code(code)?;
    let parsed =
        PasswordHash::new(stored_hash).map_err(|_| anyhow!("invalid recovery code hash"))?;
    Ok(Argon2::default()
        .verify_password(normalized.as_bytes(), &parsed)
        .is_ok())
}

/// Generate a single recovery code in grouped form.
fn generate_code<R: RngCore + ?Sized>(rng: &mut R) -> Result<String> {
    let mut raw = [0u8; RECOVERY_CODE_LEN];
    rng.fill_bytes(&mut raw);
    let mut normalized = String::with_capacity(RECOVERY_CODE_LEN);
    for byte in raw {
        let idx = usize::from(byte) % RECOVERY_CODE_ALPHABET.len();
        if let Some(&char_byte) = RECOVERY_CODE_ALPHABET.get(idx) {
            normalized.push(char_byte as char);
        }
    }
    format_recovery_code(&normalized)
}

/// Hash a recovery code with Argon2id and a fresh salt.
fn hash_recovery_code(code: &str) -> Result<String> {
    let normalized = normalize_recovery_code(code)?;
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(normalized.as_bytes(), &salt)
        .map_err(|_| anyhow!("failed to hash recovery code"))?
        .to_string();
    Ok(hash)
}
