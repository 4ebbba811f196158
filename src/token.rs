//! Token serialization and deserialization.
//!
//! Four token kinds flow through the [`TokenManager`]: authorization
//! codes, access tokens, identity tokens, and refresh tokens. Codes and
//! refresh tokens are always opaque; access tokens are opaque unless a
//! JWT handler is configured; identity tokens are JWTs.
//!
//! Authorization codes get an extra indirection: the protected payload is
//! stored in the distributed cache under a fresh 256-bit key and the key
//! itself is the bearer string. Dereferencing a code removes the entry
//! before any validation, which is what makes codes one-shot.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::{decode, decode_header, encode, Header, Validation};
use serde_json::{json, Map, Value};
use std::str::FromStr;
use std::sync::Arc;

use crate::cache::DistributedCache;
use crate::error::{OidcError, OidcResult};
use crate::format::TokenFormat;
use crate::options::{random_base64url, ServerOptions, SigningCredentials};
use crate::ticket::{items, AuthenticationTicket, Claim, ClaimsPrincipal};
use crate::types::{claims, destinations, TokenUsage};

/// Computes the left-half SHA-256 hash used for `c_hash` and `at_hash`:
/// base64url of the first 16 bytes of SHA-256 over the ASCII token bytes.
#[must_use]
pub fn left_half_hash(value: &str) -> String {
    let digest = aws_lc_rs::digest::digest(&aws_lc_rs::digest::SHA256, value.as_bytes());
    let bytes = digest.as_ref();
    URL_SAFE_NO_PAD.encode(&bytes[..bytes.len() / 2])
}

/// JWT claims that are reconstructed into ticket state rather than copied
/// into the principal.
const REGISTERED_CLAIMS: &[&str] = &[
    claims::ISS,
    claims::AUD,
    claims::EXP,
    claims::IAT,
    claims::NBF,
    claims::JTI,
    claims::USAGE,
    claims::CONFIDENTIAL,
    claims::SCOPE,
    claims::AZP,
    claims::NONCE,
    claims::AT_HASH,
    claims::C_HASH,
];

/// JWT signing and validation.
///
/// One handler instance covers a token kind; configuring a handler on
/// [`ServerOptions`] switches that kind from the opaque path to JWTs.
#[derive(Debug, Clone, Copy, Default)]
pub struct JwtHandler;

impl JwtHandler {
    /// Creates a handler.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Signs a claims map with the given credentials.
    ///
    /// The header carries `kid` and, when the key is certificate-backed,
    /// `x5t`.
    ///
    /// # Errors
    ///
    /// Returns `OidcError::ServerError` when signing fails.
    pub fn create_token(
        &self,
        claims: &Map<String, Value>,
        credentials: &SigningCredentials,
    ) -> OidcResult<String> {
        let mut header = Header::new(credentials.algorithm.jwt_algorithm());
        header.typ = Some("JWT".to_string());
        header.kid = credentials.effective_kid();
        header.x5t = credentials.certificate.as_ref().map(|c| c.x5t());

        encode(&header, claims, credentials.encoding_key())
            .map_err(|e| OidcError::ServerError(format!("token signing failed: {e}")))
    }

    /// Validates a JWT signature and issuer, returning the claims map.
    ///
    /// Audience and lifetime validation are intentionally disabled; each
    /// endpoint re-checks the lifetime against the injected clock.
    ///
    /// Returns `None` for tokens that fail validation.
    #[must_use]
    pub fn validate_token(
        &self,
        token: &str,
        issuer: &str,
        credentials: &[SigningCredentials],
    ) -> Option<Map<String, Value>> {
        let header = decode_header(token).ok()?;

        // Prefer the credential matching the header kid, then try the rest.
        let mut ordered: Vec<&SigningCredentials> = Vec::with_capacity(credentials.len());
        if let Some(kid) = &header.kid {
            ordered.extend(
                credentials
                    .iter()
                    .filter(|c| c.effective_kid().as_deref() == Some(kid)),
            );
        }
        ordered.extend(credentials.iter());

        for credential in ordered {
            let mut validation = Validation::new(credential.algorithm.jwt_algorithm());
            validation.set_required_spec_claims::<&str>(&[]);
            validation.validate_exp = false;
            validation.validate_nbf = false;
            validation.validate_aud = false;
            validation.set_issuer(&[issuer]);

            if let Ok(data) =
                decode::<Map<String, Value>>(token, credential.decoding_key(), &validation)
            {
                return Some(data.claims);
            }
        }
        None
    }
}

/// Serializes and deserializes the four token kinds.
pub struct TokenManager {
    options: Arc<ServerOptions>,
    cache: Arc<dyn DistributedCache>,
    access_token_format: Arc<dyn TokenFormat>,
    refresh_token_format: Arc<dyn TokenFormat>,
    authorization_code_format: Arc<dyn TokenFormat>,
}

impl TokenManager {
    /// Creates a manager over resolved formats.
    pub(crate) fn new(
        options: Arc<ServerOptions>,
        cache: Arc<dyn DistributedCache>,
        access_token_format: Arc<dyn TokenFormat>,
        refresh_token_format: Arc<dyn TokenFormat>,
        authorization_code_format: Arc<dyn TokenFormat>,
    ) -> Self {
        Self {
            options,
            cache,
            access_token_format,
            refresh_token_format,
            authorization_code_format,
        }
    }

    /// Stamps a ticket for serialization: usage always, lifetimes only
    /// when unset.
    pub(crate) fn stamp(
        &self,
        ticket: &mut AuthenticationTicket,
        usage: TokenUsage,
        now: DateTime<Utc>,
    ) {
        ticket.set_usage(usage);
        let issued = *ticket.properties.issued_utc.get_or_insert(now);
        if ticket.properties.expires_utc.is_none() {
            let lifetime = match usage {
                TokenUsage::Code => self.options.authorization_code_lifetime,
                TokenUsage::AccessToken => self.options.access_token_lifetime,
                TokenUsage::IdToken => self.options.identity_token_lifetime,
                TokenUsage::RefreshToken => self.options.refresh_token_lifetime,
            };
            ticket.properties.expires_utc = Some(issued + lifetime);
        }
    }

    /// Serializes an authorization code.
    ///
    /// The protected ticket is cached under a fresh 256-bit key; the key
    /// is the bearer string handed to the client.
    ///
    /// # Errors
    ///
    /// Returns an error when protection or the cache write fails.
    pub async fn serialize_code(&self, ticket: &AuthenticationTicket) -> OidcResult<String> {
        let payload = self.authorization_code_format.protect(ticket)?;
        let key = random_base64url(self.options.random_number_generator.as_ref(), 32);

        let expires_at = ticket
            .properties
            .expires_utc
            .ok_or_else(|| OidcError::ServerError("code ticket has no expiration".to_string()))?;

        self.cache
            .set(&code_cache_key(&key), payload.into_bytes(), expires_at)
            .await?;

        Ok(key)
    }

    /// Serializes an access token: JWT when a handler is configured,
    /// opaque otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error when signing or protection fails.
    pub fn serialize_access_token(
        &self,
        ticket: &AuthenticationTicket,
        issuer: &str,
    ) -> OidcResult<String> {
        let mut filtered = ticket.clone();
        filtered.principal = filter_claims(&ticket.principal, destinations::ACCESS_TOKEN);

        if let Some(handler) = &self.options.access_token_handler {
            let claims = self.build_jwt_claims(&filtered, issuer, JwtKind::Access)?;
            return handler.create_token(&claims, self.first_credentials()?);
        }
        self.access_token_format.protect(&filtered)
    }

    /// Serializes an identity token.
    ///
    /// `code` and `access_token` must be the already-issued values so
    /// `c_hash` and `at_hash` can be derived from the exact bytes the
    /// client received.
    ///
    /// # Errors
    ///
    /// Returns an error when no JWT handler is configured for identity
    /// tokens or signing fails.
    pub fn serialize_identity_token(
        &self,
        ticket: &AuthenticationTicket,
        issuer: &str,
        code: Option<&str>,
        access_token: Option<&str>,
    ) -> OidcResult<String> {
        let handler = self
            .options
            .identity_token_handler
            .as_ref()
            .ok_or_else(|| {
                OidcError::ServerError("no identity token handler configured".to_string())
            })?;

        let mut filtered = ticket.clone();
        filtered.principal = filter_claims(&ticket.principal, destinations::IDENTITY_TOKEN);

        let mut claims = self.build_jwt_claims(&filtered, issuer, JwtKind::Identity)?;
        if let Some(code) = code {
            claims.insert(claims::C_HASH.to_string(), json!(left_half_hash(code)));
        }
        if let Some(access_token) = access_token {
            claims.insert(
                claims::AT_HASH.to_string(),
                json!(left_half_hash(access_token)),
            );
        }

        handler.create_token(&claims, self.first_credentials()?)
    }

    /// Serializes a refresh token (always opaque, all claims kept).
    ///
    /// # Errors
    ///
    /// Returns an error when protection fails.
    pub fn serialize_refresh_token(&self, ticket: &AuthenticationTicket) -> OidcResult<String> {
        self.refresh_token_format.protect(ticket)
    }

    /// Dereferences an authorization code.
    ///
    /// The cache entry is removed before any validation, so a second
    /// dereference of the same code always yields `None`.
    ///
    /// # Errors
    ///
    /// Propagates cache backend failures.
    pub async fn deserialize_code(&self, code: &str) -> OidcResult<Option<AuthenticationTicket>> {
        let key = code_cache_key(code);
        let Some(payload) = self.cache.get(&key).await? else {
            return Ok(None);
        };
        self.cache.remove(&key).await?;

        let Ok(payload) = String::from_utf8(payload) else {
            tracing::warn!("authorization code payload is not UTF-8");
            return Ok(None);
        };

        let ticket = self.authorization_code_format.unprotect(&payload)?;
        Ok(expect_usage(ticket, TokenUsage::Code))
    }

    /// Deserializes an access token.
    #[must_use]
    pub fn deserialize_access_token(
        &self,
        token: &str,
        issuer: &str,
    ) -> Option<AuthenticationTicket> {
        let ticket = if let Some(handler) = &self.options.access_token_handler {
            let claims =
                handler.validate_token(token, issuer, &self.options.signing_credentials)?;
            Some(ticket_from_jwt_claims(&claims))
        } else {
            self.access_token_format
                .unprotect(token)
                .unwrap_or_else(|error| {
                    tracing::warn!(%error, "access token unprotect failed");
                    None
                })
        };
        expect_usage(ticket, TokenUsage::AccessToken)
    }

    /// Deserializes an identity token.
    #[must_use]
    pub fn deserialize_identity_token(
        &self,
        token: &str,
        issuer: &str,
    ) -> Option<AuthenticationTicket> {
        let handler = self.options.identity_token_handler.as_ref()?;
        let claims = handler.validate_token(token, issuer, &self.options.signing_credentials)?;
        expect_usage(Some(ticket_from_jwt_claims(&claims)), TokenUsage::IdToken)
    }

    /// Deserializes a refresh token.
    #[must_use]
    pub fn deserialize_refresh_token(&self, token: &str) -> Option<AuthenticationTicket> {
        let ticket = self
            .refresh_token_format
            .unprotect(token)
            .unwrap_or_else(|error| {
                tracing::warn!(%error, "refresh token unprotect failed");
                None
            });
        expect_usage(ticket, TokenUsage::RefreshToken)
    }

    fn first_credentials(&self) -> OidcResult<&SigningCredentials> {
        self.options
            .signing_credentials
            .first()
            .ok_or_else(|| OidcError::ServerError("no signing credentials configured".to_string()))
    }

    /// Builds the claims map for a JWT access or identity token.
    fn build_jwt_claims(
        &self,
        ticket: &AuthenticationTicket,
        issuer: &str,
        kind: JwtKind,
    ) -> OidcResult<Map<String, Value>> {
        let subject = ticket
            .principal
            .subject()
            .ok_or_else(|| OidcError::ServerError("ticket has no subject".to_string()))?
            .to_string();

        let mut map = Map::new();
        map.insert(claims::ISS.to_string(), json!(issuer));
        map.insert(claims::SUB.to_string(), json!(subject));
        map.insert(
            claims::JTI.to_string(),
            json!(uuid::Uuid::now_v7().to_string()),
        );

        if let Some(usage) = ticket.properties.get(items::USAGE) {
            map.insert(claims::USAGE.to_string(), json!(usage));
        }
        if let Some(issued) = ticket.properties.issued_utc {
            map.insert(claims::IAT.to_string(), json!(issued.timestamp()));
            map.insert(claims::NBF.to_string(), json!(issued.timestamp()));
        }
        if let Some(expires) = ticket.properties.expires_utc {
            map.insert(claims::EXP.to_string(), json!(expires.timestamp()));
        }

        let audiences: Vec<&str> = match kind {
            JwtKind::Access => ticket.audiences(),
            JwtKind::Identity => ticket
                .properties
                .get(items::CLIENT_ID)
                .map(|c| vec![c])
                .unwrap_or_default(),
        };
        if !audiences.is_empty() {
            map.insert(claims::AUD.to_string(), json!(audiences));
        }

        if let Some(client_id) = ticket.properties.get(items::CLIENT_ID) {
            map.insert(claims::AZP.to_string(), json!(client_id));
        }
        if ticket.is_confidential() {
            map.insert(claims::CONFIDENTIAL.to_string(), json!(true));
        }
        if let Some(scope) = ticket.properties.get(items::SCOPE) {
            let scopes: Vec<&str> = scope.split_whitespace().collect();
            map.insert(claims::SCOPE.to_string(), json!(scopes));
        }
        if kind == JwtKind::Identity {
            if let Some(nonce) = ticket.properties.get(items::NONCE) {
                map.insert(claims::NONCE.to_string(), json!(nonce));
            }
        }

        // The subject is already carried by `sub`; the name identifier is
        // stripped after copying.
        for claim in &ticket.principal.claims {
            if claim.kind == claims::NAME_IDENTIFIER || map.contains_key(&claim.kind) {
                continue;
            }
            map.insert(claim.kind.clone(), json!(claim.value));
        }

        Ok(map)
    }
}

/// Which JWT kind a claims map is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JwtKind {
    Access,
    Identity,
}

fn code_cache_key(key: &str) -> String {
    format!("oidc-server:code:{key}")
}

/// Keeps `sub` and the name identifier, plus any claim destined for the
/// given token kind.
fn filter_claims(principal: &ClaimsPrincipal, destination: &str) -> ClaimsPrincipal {
    ClaimsPrincipal {
        claims: principal
            .claims
            .iter()
            .filter(|c| {
                c.kind == claims::SUB
                    || c.kind == claims::NAME_IDENTIFIER
                    || c.has_destination(destination)
            })
            .cloned()
            .collect(),
    }
}

/// Rejects tickets whose usage does not match the kind being read.
fn expect_usage(
    ticket: Option<AuthenticationTicket>,
    expected: TokenUsage,
) -> Option<AuthenticationTicket> {
    let ticket = ticket?;
    if ticket.usage() == Some(expected) {
        Some(ticket)
    } else {
        tracing::warn!(
            expected = %expected,
            actual = ?ticket.properties.get(items::USAGE),
            "token usage mismatch"
        );
        None
    }
}

/// Rebuilds a ticket from validated JWT claims.
///
/// `issued_utc`/`expires_utc` come from `nbf` (falling back to `iat`) and
/// `exp`; audiences, usage, and confidentiality are restored into the
/// ticket properties.
fn ticket_from_jwt_claims(map: &Map<String, Value>) -> AuthenticationTicket {
    let mut ticket = AuthenticationTicket::new(
        ClaimsPrincipal::new(),
        crate::ticket::AuthenticationProperties::new(),
        "oidc-server",
    );

    if let Some(ts) = map
        .get(claims::NBF)
        .or_else(|| map.get(claims::IAT))
        .and_then(Value::as_i64)
    {
        ticket.properties.issued_utc = Utc.timestamp_opt(ts, 0).single();
    }
    if let Some(ts) = map.get(claims::EXP).and_then(Value::as_i64) {
        ticket.properties.expires_utc = Utc.timestamp_opt(ts, 0).single();
    }

    if let Some(aud) = map.get(claims::AUD) {
        let audiences: Vec<String> = match aud {
            Value::String(s) => vec![s.clone()],
            Value::Array(values) => values
                .iter()
                .filter_map(Value::as_str)
                .map(ToString::to_string)
                .collect(),
            _ => Vec::new(),
        };
        if !audiences.is_empty() {
            ticket.properties.set(items::AUDIENCES, audiences.join(" "));
        }
    }

    if let Some(usage) = map.get(claims::USAGE).and_then(Value::as_str) {
        if let Ok(usage) = TokenUsage::from_str(usage) {
            ticket.set_usage(usage);
        }
    }
    if map.get(claims::CONFIDENTIAL).and_then(Value::as_bool) == Some(true) {
        ticket.set_confidential();
    }
    if let Some(azp) = map.get(claims::AZP).and_then(Value::as_str) {
        ticket.properties.set(items::CLIENT_ID, azp);
    }
    if let Some(nonce) = map.get(claims::NONCE).and_then(Value::as_str) {
        ticket.properties.set(items::NONCE, nonce);
    }
    if let Some(scope) = map.get(claims::SCOPE) {
        let scopes: Vec<&str> = match scope {
            Value::String(s) => s.split_whitespace().collect(),
            Value::Array(values) => values.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        };
        if !scopes.is_empty() {
            ticket.properties.set(items::SCOPE, scopes.join(" "));
        }
    }

    if let Some(sub) = map.get(claims::SUB).and_then(Value::as_str) {
        ticket.principal.push(Claim::new(claims::SUB, sub));
    }
    for (kind, value) in map {
        if REGISTERED_CLAIMS.contains(&kind.as_str()) || kind == claims::SUB {
            continue;
        }
        if let Some(value) = value.as_str() {
            ticket.principal.push(Claim::new(kind.clone(), value));
        }
    }

    ticket
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;
    use crate::format::DataProtectionFormat;
    use crate::options::{Clock, FixedClock, SigningAlgorithm, SystemRandom};
    use crate::ticket::AuthenticationProperties;
    use chrono::Duration;

    const PRIVATE_PEM: &[u8] = include_bytes!("../tests/keys/rsa_private.pem");
    const PUBLIC_PEM: &[u8] = include_bytes!("../tests/keys/rsa_public.pem");

    const ISSUER: &str = "https://auth.example.com";

    fn manager(clock: Arc<FixedClock>, jwt_access: bool) -> TokenManager {
        let random: Arc<dyn crate::options::RandomSource> = Arc::new(SystemRandom);
        let mut options = ServerOptions {
            clock: clock.clone(),
            ..ServerOptions::default()
        };
        options.signing_credentials.push(
            SigningCredentials::from_rsa_pem(SigningAlgorithm::Rs256, PRIVATE_PEM, PUBLIC_PEM)
                .unwrap()
                .with_kid("test-key"),
        );
        if jwt_access {
            options.access_token_handler = Some(JwtHandler::new());
        }

        let cache = Arc::new(InMemoryCache::new(clock));
        TokenManager::new(
            Arc::new(options),
            cache,
            Arc::new(DataProtectionFormat::generate(random.clone(), "access_token")),
            Arc::new(DataProtectionFormat::generate(random.clone(), "refresh_token")),
            Arc::new(DataProtectionFormat::generate(random, "authorization_code")),
        )
    }

    fn ticket(clock: &FixedClock) -> AuthenticationTicket {
        let now = clock.utc_now();
        let mut properties = AuthenticationProperties::new();
        properties.issued_utc = Some(now);
        properties.expires_utc = Some(now + Duration::hours(1));
        properties.set(items::CLIENT_ID, "c1");
        properties.set(items::SCOPE, "openid profile");
        properties.set(items::AUDIENCES, "https://api.example");
        let mut ticket = AuthenticationTicket::new(
            ClaimsPrincipal::with_subject("user-1"),
            properties,
            "oidc-server",
        );
        ticket.set_confidential();
        ticket
    }

    #[test]
    fn at_hash_known_answer() {
        // Example vector from OpenID Connect Core.
        assert_eq!(
            left_half_hash("jHkWEdUXMU1BwAsC4vtUsZwnNvTIxEl0z9K3vx5KF0Y"),
            "77QmUPtjPfzWtF2AnpK9RQ"
        );
    }

    #[tokio::test]
    async fn code_round_trip_is_one_shot() {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let manager = manager(clock.clone(), false);

        let mut t = ticket(&clock);
        manager.stamp(&mut t, TokenUsage::Code, clock.utc_now());

        let code = manager.serialize_code(&t).await.unwrap();
        assert!(code.len() >= 43);

        let restored = manager.deserialize_code(&code).await.unwrap().unwrap();
        assert!(restored.is_code());
        assert_eq!(restored.principal.subject(), Some("user-1"));

        // Second dereference must miss.
        assert!(manager.deserialize_code(&code).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_code_is_a_miss() {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let manager = manager(clock.clone(), false);

        let mut t = ticket(&clock);
        t.properties.expires_utc = Some(clock.utc_now() + Duration::minutes(5));
        manager.stamp(&mut t, TokenUsage::Code, clock.utc_now());

        let code = manager.serialize_code(&t).await.unwrap();
        clock.advance(Duration::minutes(6));
        assert!(manager.deserialize_code(&code).await.unwrap().is_none());
    }

    #[test]
    fn opaque_access_token_round_trip() {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let manager = manager(clock.clone(), false);

        let mut t = ticket(&clock);
        manager.stamp(&mut t, TokenUsage::AccessToken, clock.utc_now());

        let token = manager.serialize_access_token(&t, ISSUER).unwrap();
        let restored = manager.deserialize_access_token(&token, ISSUER).unwrap();

        assert!(restored.is_access_token());
        assert!(restored.is_confidential());
        assert_eq!(restored.audiences(), vec!["https://api.example"]);
        assert_eq!(restored.properties.issued_utc, t.properties.issued_utc);
        assert_eq!(restored.properties.expires_utc, t.properties.expires_utc);
    }

    #[test]
    fn jwt_access_token_round_trip() {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let manager = manager(clock.clone(), true);

        let mut t = ticket(&clock);
        manager.stamp(&mut t, TokenUsage::AccessToken, clock.utc_now());

        let token = manager.serialize_access_token(&t, ISSUER).unwrap();
        assert_eq!(token.matches('.').count(), 2);

        let restored = manager.deserialize_access_token(&token, ISSUER).unwrap();
        assert!(restored.is_access_token());
        assert!(restored.is_confidential());
        assert_eq!(restored.principal.subject(), Some("user-1"));
        assert_eq!(restored.audiences(), vec!["https://api.example"]);
        assert_eq!(restored.properties.get(items::SCOPE), Some("openid profile"));
        // Second-precision truncation through nbf/exp.
        assert_eq!(
            restored.properties.issued_utc.unwrap().timestamp(),
            t.properties.issued_utc.unwrap().timestamp()
        );
        assert_eq!(
            restored.properties.expires_utc.unwrap().timestamp(),
            t.properties.expires_utc.unwrap().timestamp()
        );

        // Wrong issuer is rejected.
        assert!(manager
            .deserialize_access_token(&token, "https://other.example")
            .is_none());
    }

    #[test]
    fn identity_token_carries_nonce_and_hashes() {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let manager = manager(clock.clone(), false);

        let mut t = ticket(&clock);
        t.properties.set(items::NONCE, "n-0S6_WzA2Mj");
        manager.stamp(&mut t, TokenUsage::IdToken, clock.utc_now());

        let code = "SplxlOBeZQQYbYS6WxSbIA";
        let access = "jHkWEdUXMU1BwAsC4vtUsZwnNvTIxEl0z9K3vx5KF0Y";
        let token = manager
            .serialize_identity_token(&t, ISSUER, Some(code), Some(access))
            .unwrap();

        let restored = manager.deserialize_identity_token(&token, ISSUER).unwrap();
        assert!(restored.is_identity_token());
        assert_eq!(restored.properties.get(items::NONCE), Some("n-0S6_WzA2Mj"));
        // Identity token audience is the client.
        assert_eq!(restored.audiences(), vec!["c1"]);

        // Decode the payload directly to check the hash claims.
        let payload = token.split('.').nth(1).unwrap();
        let bytes = URL_SAFE_NO_PAD.decode(payload).unwrap();
        let map: Map<String, Value> = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(
            map.get("at_hash").and_then(Value::as_str),
            Some("77QmUPtjPfzWtF2AnpK9RQ")
        );
        assert_eq!(
            map.get("c_hash").and_then(Value::as_str),
            Some(left_half_hash(code).as_str())
        );
        assert!(map.contains_key("jti"));
    }

    #[test]
    fn refresh_token_round_trip_and_usage_check() {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let manager = manager(clock.clone(), false);

        let mut t = ticket(&clock);
        manager.stamp(&mut t, TokenUsage::RefreshToken, clock.utc_now());

        let token = manager.serialize_refresh_token(&t).unwrap();
        let restored = manager.deserialize_refresh_token(&token).unwrap();
        assert!(restored.is_refresh_token());

        // A refresh token is not an access token.
        assert!(manager.deserialize_access_token(&token, ISSUER).is_none());
    }

    #[test]
    fn destination_filter_applies_to_access_tokens() {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let manager = manager(clock.clone(), false);

        let mut t = ticket(&clock);
        t.principal
            .push(Claim::new("email", "a@b.example").with_destination("id_token"));
        t.principal
            .push(Claim::new("role", "admin").with_destination("token"));
        manager.stamp(&mut t, TokenUsage::AccessToken, clock.utc_now());

        let token = manager.serialize_access_token(&t, ISSUER).unwrap();
        let restored = manager.deserialize_access_token(&token, ISSUER).unwrap();

        assert_eq!(restored.principal.find("role"), Some("admin"));
        assert!(restored.principal.find("email").is_none());
        assert_eq!(restored.principal.subject(), Some("user-1"));
    }

    #[test]
    fn stamp_fills_missing_lifetimes_only() {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let manager = manager(clock.clone(), false);
        let now = clock.utc_now();

        let mut fresh = AuthenticationTicket::new(
            ClaimsPrincipal::with_subject("u"),
            AuthenticationProperties::new(),
            "oidc-server",
        );
        manager.stamp(&mut fresh, TokenUsage::AccessToken, now);
        assert_eq!(fresh.properties.issued_utc, Some(now));
        assert_eq!(
            fresh.properties.expires_utc,
            Some(now + ServerOptions::default().access_token_lifetime)
        );
        assert!(fresh.properties.expires_utc > fresh.properties.issued_utc);

        let mut preset = ticket(&clock);
        let expires = preset.properties.expires_utc;
        manager.stamp(&mut preset, TokenUsage::AccessToken, now);
        assert_eq!(preset.properties.expires_utc, expires);
    }
}
