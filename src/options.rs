//! Middleware configuration.
//!
//! All behavior is injected through [`ServerOptions`]: endpoint paths,
//! token lifetimes, signing credentials, token formats, and the clock and
//! randomness capabilities. Nothing reads wall time or global randomness
//! directly.

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey};
use rand::Rng;
use std::fmt;
use std::sync::Arc;

use crate::error::{OidcError, OidcResult};
use crate::format::TokenFormat;
use crate::token::JwtHandler;

/// Clock capability.
pub trait Clock: Send + Sync {
    /// Returns the current UTC instant.
    fn utc_now(&self) -> DateTime<Utc>;
}

/// System clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn utc_now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A settable clock for tests.
#[derive(Debug)]
pub struct FixedClock {
    now: std::sync::Mutex<DateTime<Utc>>,
}

impl FixedClock {
    /// Creates a clock pinned at the given instant.
    #[must_use]
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: std::sync::Mutex::new(now),
        }
    }

    /// Moves the clock to a new instant.
    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().expect("clock poisoned") = now;
    }

    /// Advances the clock.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().expect("clock poisoned");
        *now += by;
    }
}

impl Clock for FixedClock {
    fn utc_now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("clock poisoned")
    }
}

/// Randomness capability.
pub trait RandomSource: Send + Sync {
    /// Fills the buffer with random bytes.
    fn fill_bytes(&self, buf: &mut [u8]);
}

/// Cryptographically secure system randomness.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRandom;

impl RandomSource for SystemRandom {
    fn fill_bytes(&self, buf: &mut [u8]) {
        let mut rng = rand::rng();
        rng.fill(buf);
    }
}

/// Generates a URL-safe base64 string from `byte_len` random bytes.
pub(crate) fn random_base64url(random: &dyn RandomSource, byte_len: usize) -> String {
    let mut bytes = vec![0u8; byte_len];
    random.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// JWT signing algorithms exposed by the middleware.
///
/// Only the RSA family is advertised through JWKS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SigningAlgorithm {
    /// RSA PKCS#1 v1.5 with SHA-256.
    Rs256,
    /// RSA PKCS#1 v1.5 with SHA-384.
    Rs384,
    /// RSA PKCS#1 v1.5 with SHA-512.
    Rs512,
}

impl SigningAlgorithm {
    /// Returns the JWA algorithm name.
    #[must_use]
    pub const fn jwa_name(self) -> &'static str {
        match self {
            Self::Rs256 => "RS256",
            Self::Rs384 => "RS384",
            Self::Rs512 => "RS512",
        }
    }

    /// Returns the `jsonwebtoken` algorithm.
    #[must_use]
    pub const fn jwt_algorithm(self) -> Algorithm {
        match self {
            Self::Rs256 => Algorithm::RS256,
            Self::Rs384 => Algorithm::RS384,
            Self::Rs512 => Algorithm::RS512,
        }
    }
}

/// An X.509 certificate backing a signing key.
#[derive(Clone)]
pub struct CertificateData {
    der: Vec<u8>,
}

impl CertificateData {
    /// Wraps a DER-encoded certificate.
    #[must_use]
    pub fn from_der(der: Vec<u8>) -> Self {
        Self { der }
    }

    /// Returns the DER bytes.
    #[must_use]
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// SHA-1 thumbprint, uppercase hex.
    #[must_use]
    pub fn thumbprint(&self) -> String {
        let digest = aws_lc_rs::digest::digest(
            &aws_lc_rs::digest::SHA1_FOR_LEGACY_USE_ONLY,
            &self.der,
        );
        digest
            .as_ref()
            .iter()
            .map(|b| format!("{b:02X}"))
            .collect()
    }

    /// SHA-1 thumbprint, base64url (the JOSE `x5t` form).
    #[must_use]
    pub fn x5t(&self) -> String {
        let digest = aws_lc_rs::digest::digest(
            &aws_lc_rs::digest::SHA1_FOR_LEGACY_USE_ONLY,
            &self.der,
        );
        URL_SAFE_NO_PAD.encode(digest.as_ref())
    }

    /// Standard base64 of the DER bytes (one `x5c` chain element).
    #[must_use]
    pub fn x5c_entry(&self) -> String {
        STANDARD.encode(&self.der)
    }
}

impl fmt::Debug for CertificateData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateData")
            .field("thumbprint", &self.thumbprint())
            .finish()
    }
}

/// RSA public components used for the plain-key JWKS path.
#[derive(Debug, Clone)]
pub struct RsaComponents {
    /// Modulus, big-endian bytes.
    pub modulus: Vec<u8>,
    /// Public exponent, big-endian bytes.
    pub exponent: Vec<u8>,
}

/// A signing credential: key pair, algorithm, and optional X.509 backing.
#[derive(Clone)]
pub struct SigningCredentials {
    /// Explicit key identifier.
    pub kid: Option<String>,

    /// Signing algorithm.
    pub algorithm: SigningAlgorithm,

    encoding_key: EncodingKey,
    decoding_key: DecodingKey,

    /// Backing certificate, when the key came from an X.509 credential.
    pub certificate: Option<CertificateData>,

    /// Public RSA components for the plain-key JWKS path.
    pub rsa_components: Option<RsaComponents>,
}

impl SigningCredentials {
    /// Creates a credential from PEM-encoded RSA keys.
    ///
    /// Accepts PKCS#1 or PKCS#8 private keys and SPKI public keys.
    ///
    /// # Errors
    ///
    /// Returns `OidcError::Config` if either key fails to parse.
    pub fn from_rsa_pem(
        algorithm: SigningAlgorithm,
        private_key_pem: &[u8],
        public_key_pem: &[u8],
    ) -> OidcResult<Self> {
        let encoding_key = EncodingKey::from_rsa_pem(private_key_pem)
            .map_err(|e| OidcError::Config(format!("invalid RSA private key: {e}")))?;
        let decoding_key = DecodingKey::from_rsa_pem(public_key_pem)
            .map_err(|e| OidcError::Config(format!("invalid RSA public key: {e}")))?;

        Ok(Self {
            kid: None,
            algorithm,
            encoding_key,
            decoding_key,
            certificate: None,
            rsa_components: None,
        })
    }

    /// Sets an explicit key identifier.
    #[must_use]
    pub fn with_kid(mut self, kid: impl Into<String>) -> Self {
        self.kid = Some(kid.into());
        self
    }

    /// Attaches the DER-encoded certificate backing this key.
    #[must_use]
    pub fn with_certificate(mut self, der: Vec<u8>) -> Self {
        self.certificate = Some(CertificateData::from_der(der));
        self
    }

    /// Attaches the public RSA components for JWKS exposure.
    #[must_use]
    pub fn with_rsa_components(mut self, modulus: Vec<u8>, exponent: Vec<u8>) -> Self {
        self.rsa_components = Some(RsaComponents { modulus, exponent });
        self
    }

    /// Returns the signing key.
    #[must_use]
    pub(crate) fn encoding_key(&self) -> &EncodingKey {
        &self.encoding_key
    }

    /// Returns the verification key.
    #[must_use]
    pub(crate) fn decoding_key(&self) -> &DecodingKey {
        &self.decoding_key
    }

    /// Resolves the key identifier: the explicit `kid`, the certificate
    /// thumbprint, or the first 40 uppercase characters of the
    /// base64url-encoded modulus.
    #[must_use]
    pub fn effective_kid(&self) -> Option<String> {
        if let Some(kid) = &self.kid {
            return Some(kid.clone());
        }
        if let Some(cert) = &self.certificate {
            return Some(cert.thumbprint());
        }
        self.rsa_components.as_ref().map(|rsa| {
            let encoded = URL_SAFE_NO_PAD.encode(&rsa.modulus);
            encoded.chars().take(40).collect::<String>().to_uppercase()
        })
    }
}

impl fmt::Debug for SigningCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningCredentials")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .field("encoding_key", &"[REDACTED]")
            .field("decoding_key", &"[REDACTED]")
            .field("certificate", &self.certificate)
            .finish()
    }
}

/// Middleware configuration.
///
/// Endpoint paths are enabling switches: a `None` path disables the
/// endpoint entirely.
#[derive(Clone)]
pub struct ServerOptions {
    /// Issuer identifier. Derived from the request host when absent.
    pub issuer: Option<String>,

    /// Authorization endpoint path.
    pub authorization_endpoint_path: Option<String>,
    /// Token endpoint path.
    pub token_endpoint_path: Option<String>,
    /// Validation (introspection) endpoint path.
    pub validation_endpoint_path: Option<String>,
    /// Userinfo (profile) endpoint path.
    pub profile_endpoint_path: Option<String>,
    /// Logout endpoint path.
    pub logout_endpoint_path: Option<String>,
    /// Discovery configuration endpoint path.
    pub configuration_endpoint_path: Option<String>,
    /// JWKS endpoint path.
    pub cryptography_endpoint_path: Option<String>,

    /// Accept plain-HTTP requests. Keep disabled outside development.
    pub allow_insecure_http: bool,

    /// Authorization code lifetime.
    pub authorization_code_lifetime: Duration,
    /// Access token lifetime.
    pub access_token_lifetime: Duration,
    /// Identity token lifetime.
    pub identity_token_lifetime: Duration,
    /// Refresh token lifetime.
    pub refresh_token_lifetime: Duration,

    /// When disabled, tokens minted from a refresh token never outlive it.
    pub use_sliding_expiration: bool,

    /// Ordered signing credentials. The first entry signs; all eligible
    /// entries are advertised through JWKS.
    pub signing_credentials: Vec<SigningCredentials>,

    /// JWT handler for access tokens. `None` keeps access tokens opaque.
    pub access_token_handler: Option<JwtHandler>,
    /// JWT handler for identity tokens.
    pub identity_token_handler: Option<JwtHandler>,

    /// Opaque format for access tokens. Defaulted at construction.
    pub access_token_format: Option<Arc<dyn TokenFormat>>,
    /// Opaque format for refresh tokens. Defaulted at construction.
    pub refresh_token_format: Option<Arc<dyn TokenFormat>>,
    /// Opaque format for authorization codes. Defaulted at construction.
    pub authorization_code_format: Option<Arc<dyn TokenFormat>>,

    /// When enabled, authorization errors without a validated redirect URI
    /// are handed to the host instead of the native error page.
    pub application_can_display_errors: bool,

    /// Clock capability.
    pub clock: Arc<dyn Clock>,

    /// Randomness capability.
    pub random_number_generator: Arc<dyn RandomSource>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            issuer: None,
            authorization_endpoint_path: Some("/connect/authorize".to_string()),
            token_endpoint_path: Some("/connect/token".to_string()),
            validation_endpoint_path: Some("/connect/introspect".to_string()),
            profile_endpoint_path: Some("/connect/userinfo".to_string()),
            logout_endpoint_path: Some("/connect/logout".to_string()),
            configuration_endpoint_path: Some("/.well-known/openid-configuration".to_string()),
            cryptography_endpoint_path: Some("/.well-known/jwks".to_string()),
            allow_insecure_http: false,
            authorization_code_lifetime: Duration::minutes(5),
            access_token_lifetime: Duration::hours(1),
            identity_token_lifetime: Duration::minutes(20),
            refresh_token_lifetime: Duration::days(14),
            use_sliding_expiration: true,
            signing_credentials: Vec::new(),
            access_token_handler: None,
            identity_token_handler: Some(JwtHandler::new()),
            access_token_format: None,
            refresh_token_format: None,
            authorization_code_format: None,
            application_can_display_errors: false,
            clock: Arc::new(SystemClock),
            random_number_generator: Arc::new(SystemRandom),
        }
    }
}

impl ServerOptions {
    /// Returns the issuer for the given request authority, trimming any
    /// trailing slash from a configured value.
    #[must_use]
    pub fn issuer_for(&self, scheme: &str, authority: &str) -> String {
        self.issuer.as_deref().map_or_else(
            || format!("{scheme}://{authority}"),
            |issuer| issuer.trim_end_matches('/').to_string(),
        )
    }

    /// Returns the path configured for the endpoint, when enabled.
    #[must_use]
    pub fn path_for(&self, endpoint: crate::types::Endpoint) -> Option<&str> {
        use crate::types::Endpoint;
        match endpoint {
            Endpoint::Authorization => self.authorization_endpoint_path.as_deref(),
            Endpoint::Token => self.token_endpoint_path.as_deref(),
            Endpoint::Validation => self.validation_endpoint_path.as_deref(),
            Endpoint::Profile => self.profile_endpoint_path.as_deref(),
            Endpoint::Logout => self.logout_endpoint_path.as_deref(),
            Endpoint::Configuration => self.configuration_endpoint_path.as_deref(),
            Endpoint::Cryptography => self.cryptography_endpoint_path.as_deref(),
        }
    }
}

impl fmt::Debug for ServerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerOptions")
            .field("issuer", &self.issuer)
            .field("authorization_endpoint_path", &self.authorization_endpoint_path)
            .field("token_endpoint_path", &self.token_endpoint_path)
            .field("validation_endpoint_path", &self.validation_endpoint_path)
            .field("profile_endpoint_path", &self.profile_endpoint_path)
            .field("logout_endpoint_path", &self.logout_endpoint_path)
            .field("configuration_endpoint_path", &self.configuration_endpoint_path)
            .field("cryptography_endpoint_path", &self.cryptography_endpoint_path)
            .field("allow_insecure_http", &self.allow_insecure_http)
            .field("use_sliding_expiration", &self.use_sliding_expiration)
            .field("signing_credentials", &self.signing_credentials.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_enable_all_endpoints() {
        let options = ServerOptions::default();
        assert_eq!(
            options.authorization_endpoint_path.as_deref(),
            Some("/connect/authorize")
        );
        assert_eq!(
            options.configuration_endpoint_path.as_deref(),
            Some("/.well-known/openid-configuration")
        );
        assert!(!options.allow_insecure_http);
        assert!(options.use_sliding_expiration);
    }

    #[test]
    fn issuer_derivation_and_trimming() {
        let mut options = ServerOptions::default();
        assert_eq!(
            options.issuer_for("https", "auth.example.com"),
            "https://auth.example.com"
        );

        options.issuer = Some("https://issuer.example/".to_string());
        assert_eq!(options.issuer_for("http", "ignored"), "https://issuer.example");
    }

    #[test]
    fn effective_kid_prefers_explicit_then_modulus() {
        let modulus: Vec<u8> = (1..=64).collect();
        let credentials = SigningCredentials {
            kid: None,
            algorithm: SigningAlgorithm::Rs256,
            encoding_key: EncodingKey::from_secret(b"unused"),
            decoding_key: DecodingKey::from_secret(b"unused"),
            certificate: None,
            rsa_components: Some(RsaComponents {
                modulus,
                exponent: vec![1, 0, 1],
            }),
        };

        let kid = credentials.effective_kid().unwrap();
        assert_eq!(kid, "AQIDBAUGBWGJCGSMDQ4PEBESEXQVFHCYGROBHB0E");
        assert_eq!(kid.len(), 40);

        let explicit = SigningCredentials {
            kid: Some("primary".to_string()),
            ..credentials
        };
        assert_eq!(explicit.effective_kid().as_deref(), Some("primary"));
    }

    #[test]
    fn fixed_clock_advances() {
        let start = Utc::now();
        let clock = FixedClock::new(start);
        assert_eq!(clock.utc_now(), start);
        clock.advance(Duration::seconds(30));
        assert_eq!(clock.utc_now(), start + Duration::seconds(30));
    }

    #[test]
    fn system_random_fills() {
        let random = SystemRandom;
        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        random.fill_bytes(&mut a);
        random.fill_bytes(&mut b);
        assert_ne!(a, b);
        assert_eq!(random_base64url(&random, 32).len(), 43);
    }
}
