//! Token format capability: protect and unprotect authentication tickets.
//!
//! The opaque token path runs through a [`TokenFormat`]; the default
//! implementation seals the JSON-serialized ticket with AES-256-GCM and a
//! random 96-bit nonce, producing a base64url bearer string. The JWT path
//! lives in [`crate::token`] and bypasses this capability.

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

use std::sync::Arc;

use crate::error::{OidcError, OidcResult};
use crate::options::RandomSource;
use crate::ticket::AuthenticationTicket;

/// Nonce length for AES-256-GCM.
const NONCE_LEN: usize = 12;

/// Protect/unprotect capability for opaque tokens.
pub trait TokenFormat: Send + Sync {
    /// Serializes and protects a ticket into an opaque string.
    ///
    /// # Errors
    ///
    /// Returns an error when serialization or sealing fails.
    fn protect(&self, ticket: &AuthenticationTicket) -> OidcResult<String>;

    /// Unprotects an opaque string back into a ticket.
    ///
    /// Returns `Ok(None)` for data that fails authentication or decoding;
    /// callers treat that as an invalid grant rather than an internal
    /// failure.
    ///
    /// # Errors
    ///
    /// Reserved for backend failures; tampered input is `Ok(None)`.
    fn unprotect(&self, protected: &str) -> OidcResult<Option<AuthenticationTicket>>;
}

/// Symmetric data-protection format: AES-256-GCM over the JSON ticket.
///
/// The nonce is prepended to the ciphertext before base64url encoding, so
/// any instance holding the same key can unprotect.
pub struct DataProtectionFormat {
    key: [u8; 32],
    random: Arc<dyn RandomSource>,
    purpose: &'static str,
}

impl DataProtectionFormat {
    /// Creates a format with a fresh random key.
    ///
    /// Tokens protected by this instance outlive neither the process nor
    /// the instance; share the key across instances for anything else.
    #[must_use]
    pub fn generate(random: Arc<dyn RandomSource>, purpose: &'static str) -> Self {
        let mut key = [0u8; 32];
        random.fill_bytes(&mut key);
        Self { key, random, purpose }
    }

    /// Creates a format from an existing 256-bit key.
    #[must_use]
    pub fn from_key(key: [u8; 32], random: Arc<dyn RandomSource>, purpose: &'static str) -> Self {
        Self { key, random, purpose }
    }

    fn cipher(&self) -> OidcResult<Aes256Gcm> {
        Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| OidcError::ServerError(format!("invalid data-protection key: {e}")))
    }
}

impl TokenFormat for DataProtectionFormat {
    fn protect(&self, ticket: &AuthenticationTicket) -> OidcResult<String> {
        let plaintext = serde_json::to_vec(ticket)
            .map_err(|e| OidcError::ServerError(format!("ticket serialization failed: {e}")))?;

        let cipher = self.cipher()?;

        // Random nonce per message; GCM security collapses on reuse.
        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.random.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_ref())
            .map_err(|e| OidcError::ServerError(format!("sealing failed: {e}")))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);

        Ok(URL_SAFE_NO_PAD.encode(sealed))
    }

    fn unprotect(&self, protected: &str) -> OidcResult<Option<AuthenticationTicket>> {
        let Ok(sealed) = URL_SAFE_NO_PAD.decode(protected) else {
            return Ok(None);
        };
        if sealed.len() < NONCE_LEN {
            return Ok(None);
        }

        let cipher = self.cipher()?;
        let nonce = Nonce::from_slice(&sealed[..NONCE_LEN]);

        let Ok(plaintext) = cipher.decrypt(nonce, &sealed[NONCE_LEN..]) else {
            tracing::warn!(purpose = self.purpose, "rejecting unauthenticated token data");
            return Ok(None);
        };

        match serde_json::from_slice(&plaintext) {
            Ok(ticket) => Ok(Some(ticket)),
            Err(error) => {
                tracing::warn!(purpose = self.purpose, %error, "undecodable ticket payload");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::SystemRandom;
    use crate::ticket::{items, AuthenticationProperties, ClaimsPrincipal};
    use crate::types::TokenUsage;
    use chrono::{Duration, Utc};

    fn ticket() -> AuthenticationTicket {
        let now = Utc::now();
        let mut properties = AuthenticationProperties::new();
        properties.issued_utc = Some(now);
        properties.expires_utc = Some(now + Duration::hours(1));
        properties.set(items::CLIENT_ID, "c1");
        properties.set(items::SCOPE, "openid offline_access");
        let mut ticket = AuthenticationTicket::new(
            ClaimsPrincipal::with_subject("user-1"),
            properties,
            "oidc-server",
        );
        ticket.set_usage(TokenUsage::RefreshToken);
        ticket
    }

    #[test]
    fn protect_unprotect_round_trip() {
        let format = DataProtectionFormat::generate(Arc::new(SystemRandom), "refresh_token");
        let original = ticket();

        let protected = format.protect(&original).unwrap();
        let restored = format.unprotect(&protected).unwrap().unwrap();

        assert_eq!(restored, original);
        assert!(restored.is_refresh_token());
    }

    #[test]
    fn protected_output_is_url_safe_and_nondeterministic() {
        let format = DataProtectionFormat::generate(Arc::new(SystemRandom), "access_token");
        let a = format.protect(&ticket()).unwrap();
        let b = format.protect(&ticket()).unwrap();

        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn tampered_data_yields_none() {
        let format = DataProtectionFormat::generate(Arc::new(SystemRandom), "code");
        let mut protected = format.protect(&ticket()).unwrap();
        let flipped = if protected.ends_with('A') { 'B' } else { 'A' };
        protected.pop();
        protected.push(flipped);

        assert!(format.unprotect(&protected).unwrap().is_none());
        assert!(format.unprotect("not-base64!!!").unwrap().is_none());
        assert!(format.unprotect("AAAA").unwrap().is_none());
    }

    #[test]
    fn wrong_key_yields_none() {
        let a = DataProtectionFormat::from_key([1u8; 32], Arc::new(SystemRandom), "code");
        let b = DataProtectionFormat::from_key([2u8; 32], Arc::new(SystemRandom), "code");

        let protected = a.protect(&ticket()).unwrap();
        assert!(b.unprotect(&protected).unwrap().is_none());
    }
}
