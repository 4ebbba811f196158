//! Protocol message: the canonical decoded request.
//!
//! Every endpoint works from a [`ProtocolMessage`], an insertion-ordered
//! bag of lowercase parameter names and string values with typed accessors
//! for the parameters the middleware understands. The order is preserved
//! so a message survives the continuation cache byte-for-byte.

use serde::{Deserialize, Serialize};

use crate::types::params;

/// The kind of protocol request a message represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestType {
    /// Authorization (authentication) request.
    AuthenticationRequest,
    /// Token request.
    TokenRequest,
    /// Logout (end session) request.
    LogoutRequest,
}

/// Ordered protocol parameter bag.
///
/// Duplicate parameters are collapsed to their first occurrence, matching
/// the single-valued treatment the validation matrix expects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolMessage {
    request_type: RequestType,
    parameters: Vec<(String, String)>,
}

impl ProtocolMessage {
    /// Creates an empty message of the given kind.
    #[must_use]
    pub const fn new(request_type: RequestType) -> Self {
        Self {
            request_type,
            parameters: Vec::new(),
        }
    }

    /// Creates a message from decoded `(name, value)` pairs.
    ///
    /// Names are lowercased; later duplicates are ignored.
    #[must_use]
    pub fn from_pairs<I, K, V>(request_type: RequestType, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut message = Self::new(request_type);
        for (name, value) in pairs {
            let name = name.as_ref().to_ascii_lowercase();
            if message.get(&name).is_none() {
                message.parameters.push((name, value.into()));
            }
        }
        message
    }

    /// Returns the request kind.
    #[must_use]
    pub const fn request_type(&self) -> RequestType {
        self.request_type
    }

    /// Returns a parameter value by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.parameters
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Sets a parameter, replacing any existing value in place.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into().to_ascii_lowercase();
        let value = value.into();
        if let Some(slot) = self.parameters.iter_mut().find(|(n, _)| *n == name) {
            slot.1 = value;
        } else {
            self.parameters.push((name, value));
        }
    }

    /// Removes a parameter, returning its value when present.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        let index = self.parameters.iter().position(|(n, _)| n == name)?;
        Some(self.parameters.remove(index).1)
    }

    /// Checks whether the parameter is present.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Iterates over the parameters in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.parameters.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Number of parameters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    /// Whether the message has no parameters.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    /// Overlays stored parameters onto this message, only for names that
    /// are not already present.
    ///
    /// This is the continuation-cache merge: live parameters win.
    pub fn overlay(&mut self, stored: &Self) {
        for (name, value) in stored.iter() {
            if !self.contains(name) {
                self.parameters.push((name.to_string(), value.to_string()));
            }
        }
    }

    /// Splits the scope parameter into individual values.
    #[must_use]
    pub fn scopes(&self) -> Vec<&str> {
        self.scope()
            .map(|s| s.split_whitespace().collect())
            .unwrap_or_default()
    }

    /// Checks whether the given scope value was requested.
    #[must_use]
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes().contains(&scope)
    }

    /// Splits the resource parameter into individual values.
    #[must_use]
    pub fn resources(&self) -> Vec<&str> {
        self.resource()
            .map(|s| s.split_whitespace().collect())
            .unwrap_or_default()
    }
}

macro_rules! accessor {
    ($(#[$doc:meta] $name:ident => $param:expr),* $(,)?) => {
        impl ProtocolMessage {
            $(
                #[$doc]
                #[must_use]
                pub fn $name(&self) -> Option<&str> {
                    self.get($param)
                }
            )*
        }
    };
}

accessor! {
    /// `client_id` parameter.
    client_id => params::CLIENT_ID,
    /// `client_secret` parameter.
    client_secret => params::CLIENT_SECRET,
    /// `redirect_uri` parameter.
    redirect_uri => params::REDIRECT_URI,
    /// `response_type` parameter.
    response_type => params::RESPONSE_TYPE,
    /// `response_mode` parameter.
    response_mode => params::RESPONSE_MODE,
    /// `scope` parameter.
    scope => params::SCOPE,
    /// `resource` parameter.
    resource => params::RESOURCE,
    /// `state` parameter.
    state => params::STATE,
    /// `nonce` parameter.
    nonce => params::NONCE,
    /// `grant_type` parameter.
    grant_type => params::GRANT_TYPE,
    /// `code` parameter.
    code => params::CODE,
    /// `refresh_token` parameter.
    refresh_token => params::REFRESH_TOKEN,
    /// `username` parameter.
    username => params::USERNAME,
    /// `password` parameter.
    password => params::PASSWORD,
    /// `id_token_hint` parameter.
    id_token_hint => params::ID_TOKEN_HINT,
    /// `access_token` parameter.
    access_token => params::ACCESS_TOKEN,
    /// `token` parameter.
    token => params::TOKEN,
    /// `token_type_hint` parameter.
    token_type_hint => params::TOKEN_TYPE_HINT,
    /// `post_logout_redirect_uri` parameter.
    post_logout_redirect_uri => params::POST_LOGOUT_REDIRECT_URI,
    /// `unique_id` parameter.
    unique_id => params::UNIQUE_ID,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_pairs_lowercases_and_deduplicates() {
        let message = ProtocolMessage::from_pairs(
            RequestType::AuthenticationRequest,
            [
                ("Client_ID", "c1"),
                ("scope", "openid"),
                ("client_id", "shadowed"),
            ],
        );
        assert_eq!(message.client_id(), Some("c1"));
        assert_eq!(message.len(), 2);
    }

    #[test]
    fn insertion_order_is_preserved() {
        let message = ProtocolMessage::from_pairs(
            RequestType::TokenRequest,
            [("b", "2"), ("a", "1"), ("c", "3")],
        );
        let names: Vec<_> = message.iter().map(|(n, _)| n.to_string()).collect();
        assert_eq!(names, vec!["b", "a", "c"]);
    }

    #[test]
    fn set_replaces_in_place() {
        let mut message =
            ProtocolMessage::from_pairs(RequestType::TokenRequest, [("a", "1"), ("b", "2")]);
        message.set("a", "9");
        assert_eq!(message.get("a"), Some("9"));
        assert_eq!(message.len(), 2);
        let names: Vec<_> = message.iter().map(|(n, _)| n.to_string()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn overlay_only_fills_missing_keys() {
        let mut live = ProtocolMessage::from_pairs(
            RequestType::AuthenticationRequest,
            [("client_id", "live"), ("unique_id", "u1")],
        );
        let stored = ProtocolMessage::from_pairs(
            RequestType::AuthenticationRequest,
            [("client_id", "stored"), ("scope", "openid")],
        );
        live.overlay(&stored);
        assert_eq!(live.client_id(), Some("live"));
        assert_eq!(live.scope(), Some("openid"));
    }

    #[test]
    fn scope_splitting() {
        let message = ProtocolMessage::from_pairs(
            RequestType::AuthenticationRequest,
            [("scope", "openid profile offline_access")],
        );
        assert!(message.has_scope("openid"));
        assert!(message.has_scope("offline_access"));
        assert!(!message.has_scope("email"));
        assert_eq!(message.scopes().len(), 3);
    }
}
