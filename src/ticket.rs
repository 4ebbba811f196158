//! Authentication tickets.
//!
//! A ticket is the unit of token serialization: a claims principal plus
//! authentication properties (lifetimes and a protocol-context item bag).
//! Every serialized token is the protected form of exactly one ticket, and
//! the ticket's `usage` item disambiguates which token kind it represents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

use crate::types::{claims, TokenUsage};

/// Property-item keys carrying protocol context on a ticket.
pub mod items {
    /// Original `client_id` of the authorization request.
    pub const CLIENT_ID: &str = "client_id";
    /// Original `redirect_uri` of the authorization request.
    pub const REDIRECT_URI: &str = "redirect_uri";
    /// Granted resources.
    pub const RESOURCE: &str = "resource";
    /// Granted scopes.
    pub const SCOPE: &str = "scope";
    /// Nonce of the authorization request.
    pub const NONCE: &str = "nonce";
    /// Token usage tag.
    pub const USAGE: &str = "usage";
    /// Marks a ticket issued to a fully authenticated client.
    pub const CONFIDENTIAL: &str = "confidential";
    /// Audiences of the ticket.
    pub const AUDIENCES: &str = "audiences";
}

/// A single claim about the authenticated principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    /// Claim type.
    pub kind: String,

    /// Claim value.
    pub value: String,

    /// Space-separated token kinds this claim is copied into
    /// (see [`crate::types::destinations`]). `None` keeps the claim out of
    /// access and identity tokens.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
}

impl Claim {
    /// Creates a claim with no destination.
    #[must_use]
    pub fn new(kind: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            value: value.into(),
            destination: None,
        }
    }

    /// Sets the destination list.
    #[must_use]
    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = Some(destination.into());
        self
    }

    /// Checks whether the claim is destined for the given token kind.
    #[must_use]
    pub fn has_destination(&self, destination: &str) -> bool {
        self.destination
            .as_deref()
            .is_some_and(|d| d.split_whitespace().any(|part| part == destination))
    }
}

/// The authenticated principal: an ordered set of claims.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimsPrincipal {
    /// Claims of the main identity.
    pub claims: Vec<Claim>,
}

impl ClaimsPrincipal {
    /// Creates an empty principal.
    #[must_use]
    pub const fn new() -> Self {
        Self { claims: Vec::new() }
    }

    /// Creates a principal with a subject claim.
    #[must_use]
    pub fn with_subject(subject: impl Into<String>) -> Self {
        let mut principal = Self::new();
        principal.claims.push(Claim::new(claims::SUB, subject));
        principal
    }

    /// Adds a claim.
    pub fn push(&mut self, claim: Claim) {
        self.claims.push(claim);
    }

    /// Returns the first claim value of the given type.
    #[must_use]
    pub fn find(&self, kind: &str) -> Option<&str> {
        self.claims
            .iter()
            .find(|c| c.kind == kind)
            .map(|c| c.value.as_str())
    }

    /// Removes every claim of the given type.
    pub fn retain_not(&mut self, kind: &str) {
        self.claims.retain(|c| c.kind != kind);
    }

    /// Returns the subject: the `sub` claim, falling back to the
    /// name-identifier claim.
    #[must_use]
    pub fn subject(&self) -> Option<&str> {
        self.find(claims::SUB)
            .or_else(|| self.find(claims::NAME_IDENTIFIER))
    }
}

/// Authentication properties: lifetimes plus protocol-context items.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticationProperties {
    /// When the ticket was issued.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issued_utc: Option<DateTime<Utc>>,

    /// When the ticket expires.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_utc: Option<DateTime<Utc>>,

    /// Protocol context items.
    pub items: HashMap<String, String>,
}

impl AuthenticationProperties {
    /// Creates empty properties.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns an item value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.items.get(key).map(String::as_str)
    }

    /// Sets an item value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.items.insert(key.into(), value.into());
    }

    /// Removes an item.
    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.items.remove(key)
    }
}

/// An authentication ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticationTicket {
    /// The authenticated principal.
    pub principal: ClaimsPrincipal,

    /// Lifetimes and protocol context.
    pub properties: AuthenticationProperties,

    /// The authentication scheme that produced the principal.
    pub auth_scheme: String,
}

impl AuthenticationTicket {
    /// Creates a ticket.
    #[must_use]
    pub fn new(
        principal: ClaimsPrincipal,
        properties: AuthenticationProperties,
        auth_scheme: impl Into<String>,
    ) -> Self {
        Self {
            principal,
            properties,
            auth_scheme: auth_scheme.into(),
        }
    }

    /// Returns the ticket's usage tag, when set and recognized.
    #[must_use]
    pub fn usage(&self) -> Option<TokenUsage> {
        self.properties
            .get(items::USAGE)
            .and_then(|u| TokenUsage::from_str(u).ok())
    }

    /// Sets the usage tag.
    pub fn set_usage(&mut self, usage: TokenUsage) {
        self.properties.set(items::USAGE, usage.to_string());
    }

    /// Checks whether this ticket is an authorization code.
    #[must_use]
    pub fn is_code(&self) -> bool {
        self.usage() == Some(TokenUsage::Code)
    }

    /// Checks whether this ticket is an access token.
    #[must_use]
    pub fn is_access_token(&self) -> bool {
        self.usage() == Some(TokenUsage::AccessToken)
    }

    /// Checks whether this ticket is an identity token.
    #[must_use]
    pub fn is_identity_token(&self) -> bool {
        self.usage() == Some(TokenUsage::IdToken)
    }

    /// Checks whether this ticket is a refresh token.
    #[must_use]
    pub fn is_refresh_token(&self) -> bool {
        self.usage() == Some(TokenUsage::RefreshToken)
    }

    /// Checks whether the ticket originated from an authenticated client.
    #[must_use]
    pub fn is_confidential(&self) -> bool {
        self.properties.get(items::CONFIDENTIAL) == Some("true")
    }

    /// Marks the ticket as originating from an authenticated client.
    pub fn set_confidential(&mut self) {
        self.properties.set(items::CONFIDENTIAL, "true");
    }

    /// Returns the audiences of the ticket.
    #[must_use]
    pub fn audiences(&self) -> Vec<&str> {
        self.properties
            .get(items::AUDIENCES)
            .map(|a| a.split_whitespace().collect())
            .unwrap_or_default()
    }

    /// Checks whether the ticket has expired at the given instant.
    ///
    /// A ticket without an expiration never expires.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.properties
            .expires_utc
            .is_some_and(|expires| expires <= now)
    }
}
