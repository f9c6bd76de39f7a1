// password.rs
// Password hashing and signed, time-limited password reset tokens.

use anyhow::{Context, Result};
use data_encoding::BASE64URL_NOPAD;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Reset links stay valid for one hour.
pub const RESET_MAX_AGE_SECONDS: i64 = 3600;

pub fn hash_password(password: &str) -> Result<String> {
    bcrypt::hash(password, bcrypt::DEFAULT_COST).context("hash password")
}

/// Malformed hashes count as a mismatch.
pub fn verify_password(password: &str, hash: &str) -> bool {
    bcrypt::verify(password, hash).unwrap_or(false)
}

#[derive(Clone)]
pub struct ResetTokens {
    secret: Vec<u8>,
    salt: String,
    max_age: i64,
}

impl ResetTokens {
    pub fn new(secret: &str, salt: &str) -> Self {
        ResetTokens {
            secret: secret.as_bytes().to_vec(),
            salt: salt.to_string(),
            max_age: RESET_MAX_AGE_SECONDS,
        }
    }

    fn mac(&self, payload: &str) -> Result<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|_| anyhow::anyhow!("invalid reset token key"))?;
        mac.update(self.salt.as_bytes());
        mac.update(b".");
        mac.update(payload.as_bytes());
        Ok(mac)
    }

    /// Token format: `base64url(email).issued_at.base64url(hmac)`.
    pub fn issue(&self, email: &str, issued_at: i64) -> Result<String> {
        let payload = format!("{}.{}", BASE64URL_NOPAD.encode(email.as_bytes()), issued_at);
        let tag = self.mac(&payload)?.finalize().into_bytes();
        Ok(format!("{payload}.{}", BASE64URL_NOPAD.encode(&tag)))
    }

    /// Returns the email when the signature holds and the token is not older than max age.
    pub fn verify(&self, token: &str, now: i64) -> Option<String> {
        let (payload, tag) = token.rsplit_once('.')?;
        let tag = BASE64URL_NOPAD.decode(tag.as_bytes()).ok()?;
        self.mac(payload).ok()?.verify_slice(&tag).ok()?;

        let (email, issued_at) = payload.split_once('.')?;
        let issued_at: i64 = issued_at.parse().ok()?;
        if now < issued_at || now - issued_at > self.max_age {
            return None;
        }
        let email = BASE64URL_NOPAD.decode(email.as_bytes()).ok()?;
        String::from_utf8(email).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens() -> ResetTokens {
        ResetTokens::new("secret-key", "reset-salt")
    }

    #[test]
    fn token_round_trips_within_max_age() {
        let t = tokens();
        let token = t.issue("ann@example.com", 1_000).unwrap();
        assert_eq!(t.verify(&token, 1_000).as_deref(), Some("ann@example.com"));
        assert_eq!(t.verify(&token, 1_000 + 3600).as_deref(), Some("ann@example.com"));
    }

    #[test]
    fn expired_token_is_rejected() {
        let t = tokens();
        let token = t.issue("ann@example.com", 1_000).unwrap();
        assert!(t.verify(&token, 1_000 + 3601).is_none());
    }

    #[test]
    fn tampered_or_foreign_tokens_are_rejected() {
        let t = tokens();
        let token = t.issue("ann@example.com", 1_000).unwrap();
        let forged = token.replacen(
            &BASE64URL_NOPAD.encode(b"ann@example.com"),
            &BASE64URL_NOPAD.encode(b"root@example.com"),
            1,
        );
        assert!(t.verify(&forged, 1_000).is_none());
        assert!(t.verify("garbage", 1_000).is_none());

        let other_salt = ResetTokens::new("secret-key", "other-salt");
        assert!(other_salt.verify(&token, 1_000).is_none());
    }

    #[test]
    fn bcrypt_hash_verifies() {
        let hash = hash_password("hunter22").unwrap();
        assert!(verify_password("hunter22", &hash));
        assert!(!verify_password("hunter23", &hash));
        assert!(!verify_password("hunter22", "not-a-hash"));
    }
}
