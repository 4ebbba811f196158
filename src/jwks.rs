//! JSON Web Key Set types and derivation from signing credentials.
//!
//! Implements JWKS as defined in:
//! - [RFC 7517](https://tools.ietf.org/html/rfc7517) (JSON Web Key)
//! - [RFC 7518](https://tools.ietf.org/html/rfc7518) (JSON Web Algorithms)

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::options::SigningCredentials;

/// JSON Web Key Set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JsonWebKeySet {
    /// Array of JSON Web Keys.
    pub keys: Vec<JsonWebKey>,
}

impl JsonWebKeySet {
    /// Creates an empty key set.
    #[must_use]
    pub const fn new() -> Self {
        Self { keys: Vec::new() }
    }

    /// Finds a key by its ID.
    #[must_use]
    pub fn find_key(&self, kid: &str) -> Option<&JsonWebKey> {
        self.keys.iter().find(|k| k.kid.as_deref() == Some(kid))
    }

    /// Derives the advertised key set from the signing credentials.
    ///
    /// Keys whose algorithm is outside the RSA signature family are
    /// skipped, as are keys with neither certificate nor RSA components.
    #[must_use]
    pub fn from_credentials(credentials: &[SigningCredentials]) -> Self {
        let keys = credentials
            .iter()
            .filter_map(JsonWebKey::from_credentials)
            .collect();
        Self { keys }
    }
}

/// A single JSON Web Key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonWebKey {
    /// Key type.
    pub kty: String,

    /// Public key use; always `sig` here.
    #[serde(rename = "use")]
    pub key_use: String,

    /// JWA algorithm name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,

    /// Key ID.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,

    /// Key operations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_ops: Option<Vec<String>>,

    /// X.509 certificate SHA-1 thumbprint (base64url).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x5t: Option<String>,

    /// X.509 certificate chain (standard base64 DER).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x5c: Option<Vec<String>>,

    /// RSA public exponent (base64url).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,

    /// RSA modulus (base64url).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
}

impl JsonWebKey {
    /// Builds the JWK for a signing credential, or `None` when the
    /// credential cannot be advertised.
    #[must_use]
    pub fn from_credentials(credentials: &SigningCredentials) -> Option<Self> {
        // Only the RSA signature family is advertised.
        let alg = credentials.algorithm.jwa_name();

        let mut key = Self {
            kty: "RSA".to_string(),
            key_use: "sig".to_string(),
            alg: Some(alg.to_string()),
            kid: credentials.effective_kid(),
            key_ops: None,
            x5t: None,
            x5c: None,
            e: None,
            n: None,
        };

        if let Some(rsa) = &credentials.rsa_components {
            key.n = Some(URL_SAFE_NO_PAD.encode(&rsa.modulus));
            key.e = Some(URL_SAFE_NO_PAD.encode(&rsa.exponent));
        }

        if let Some(cert) = &credentials.certificate {
            key.x5t = Some(cert.x5t());
            key.x5c = Some(vec![cert.x5c_entry()]);
        }

        if key.lacks_key_material() {
            return None;
        }

        Some(key)
    }

    fn lacks_key_material(&self) -> bool {
        self.x5c.is_none() && self.n.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::SigningAlgorithm;

    const PRIVATE_PEM: &[u8] = include_bytes!("../tests/keys/rsa_private.pem");
    const PUBLIC_PEM: &[u8] = include_bytes!("../tests/keys/rsa_public.pem");
    const CERT_DER: &[u8] = include_bytes!("../tests/keys/cert.der");

    fn rsa_credentials() -> SigningCredentials {
        SigningCredentials::from_rsa_pem(SigningAlgorithm::Rs256, PRIVATE_PEM, PUBLIC_PEM).unwrap()
    }

    #[test]
    fn certificate_backed_key_exposes_x5_fields() {
        let credentials = rsa_credentials().with_certificate(CERT_DER.to_vec());
        let key = JsonWebKey::from_credentials(&credentials).unwrap();

        assert_eq!(key.kty, "RSA");
        assert_eq!(key.key_use, "sig");
        assert_eq!(key.alg.as_deref(), Some("RS256"));
        assert!(key.x5t.is_some());
        assert_eq!(key.x5c.as_ref().map(Vec::len), Some(1));
        // kid falls back to the certificate thumbprint.
        let kid = key.kid.unwrap();
        assert_eq!(kid.len(), 40);
        assert!(kid.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn plain_rsa_key_exposes_components_and_derived_kid() {
        let modulus: Vec<u8> = (1..=64).collect();
        let credentials = rsa_credentials().with_rsa_components(modulus.clone(), vec![1, 0, 1]);
        let key = JsonWebKey::from_credentials(&credentials).unwrap();

        assert_eq!(key.n.as_deref(), Some(URL_SAFE_NO_PAD.encode(&modulus).as_str()));
        assert_eq!(key.e.as_deref(), Some("AQAB"));
        assert_eq!(key.kid.as_deref().map(str::len), Some(40));
        assert!(key.x5c.is_none());
    }

    #[test]
    fn bare_key_is_skipped() {
        let credentials = rsa_credentials();
        assert!(JsonWebKey::from_credentials(&credentials).is_none());
        assert!(JsonWebKeySet::from_credentials(&[credentials]).keys.is_empty());
    }

    #[test]
    fn kids_are_unique_across_the_set() {
        let a = rsa_credentials()
            .with_kid("a")
            .with_rsa_components((1..=64).collect(), vec![1, 0, 1]);
        let b = rsa_credentials()
            .with_kid("b")
            .with_rsa_components((1..=64).rev().collect(), vec![1, 0, 1]);

        let set = JsonWebKeySet::from_credentials(&[a, b]);
        assert_eq!(set.keys.len(), 2);
        let kids: std::collections::HashSet<_> =
            set.keys.iter().filter_map(|k| k.kid.clone()).collect();
        assert_eq!(kids.len(), 2);
        assert!(set.find_key("a").is_some());
        assert!(set.find_key("missing").is_none());
    }
}
