//! Common protocol types and definitions.
//!
//! Implements types from OAuth 2.0 and `OpenID` Connect specifications.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// OAuth 2.0 grant types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    /// Authorization code grant (RFC 6749 Section 4.1).
    #[serde(rename = "authorization_code")]
    AuthorizationCode,

    /// Client credentials grant (RFC 6749 Section 4.4).
    #[serde(rename = "client_credentials")]
    ClientCredentials,

    /// Resource owner password credentials grant (RFC 6749 Section 4.3).
    #[serde(rename = "password")]
    Password,

    /// Refresh token grant (RFC 6749 Section 6).
    #[serde(rename = "refresh_token")]
    RefreshToken,
}

impl fmt::Display for GrantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::AuthorizationCode => "authorization_code",
            Self::ClientCredentials => "client_credentials",
            Self::Password => "password",
            Self::RefreshToken => "refresh_token",
        };
        write!(f, "{s}")
    }
}

impl FromStr for GrantType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "authorization_code" => Ok(Self::AuthorizationCode),
            "client_credentials" => Ok(Self::ClientCredentials),
            "password" => Ok(Self::Password),
            "refresh_token" => Ok(Self::RefreshToken),
            _ => Err(format!("unknown grant type: {s}")),
        }
    }
}

/// OAuth 2.0 response types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    /// No credential is returned (`response_type=none`).
    #[serde(rename = "none")]
    None,

    /// Authorization code response.
    #[serde(rename = "code")]
    Code,

    /// Implicit grant - access token.
    #[serde(rename = "token")]
    Token,

    /// `OpenID` Connect - ID token.
    #[serde(rename = "id_token")]
    IdToken,
}

impl fmt::Display for ResponseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::None => "none",
            Self::Code => "code",
            Self::Token => "token",
            Self::IdToken => "id_token",
        };
        write!(f, "{s}")
    }
}

impl FromStr for ResponseType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "code" => Ok(Self::Code),
            "token" => Ok(Self::Token),
            "id_token" => Ok(Self::IdToken),
            _ => Err(format!("unknown response type: {s}")),
        }
    }
}

/// Combined response types (for hybrid flows).
///
/// Parsed from the space-separated `response_type` parameter. `none` is
/// only valid alone.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResponseTypes(pub HashSet<ResponseType>);

impl ResponseTypes {
    /// Checks whether the given response type was requested.
    #[must_use]
    pub fn contains(&self, response_type: ResponseType) -> bool {
        self.0.contains(&response_type)
    }

    /// Checks if this is the `none` response.
    #[must_use]
    pub fn is_none_flow(&self) -> bool {
        self.0.contains(&ResponseType::None) && self.0.len() == 1
    }

    /// Checks if this is a pure authorization-code flow.
    #[must_use]
    pub fn is_code_flow(&self) -> bool {
        self.0.contains(&ResponseType::Code) && self.0.len() == 1
    }

    /// Checks if this is an implicit flow.
    #[must_use]
    pub fn is_implicit_flow(&self) -> bool {
        !self.0.contains(&ResponseType::Code)
            && (self.0.contains(&ResponseType::Token) || self.0.contains(&ResponseType::IdToken))
    }

    /// Checks if this is a hybrid flow.
    #[must_use]
    pub fn is_hybrid_flow(&self) -> bool {
        self.0.contains(&ResponseType::Code)
            && (self.0.contains(&ResponseType::Token) || self.0.contains(&ResponseType::IdToken))
    }
}

impl FromStr for ResponseTypes {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut types = HashSet::new();
        for part in s.split_whitespace() {
            types.insert(ResponseType::from_str(part)?);
        }
        if types.is_empty() {
            return Err("empty response type".to_string());
        }
        if types.contains(&ResponseType::None) && types.len() > 1 {
            return Err("none cannot be combined with other response types".to_string());
        }
        Ok(Self(types))
    }
}

/// OAuth 2.0 response modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResponseMode {
    /// Query string parameters (default for code).
    #[serde(rename = "query")]
    #[default]
    Query,

    /// Fragment parameters (default for implicit and hybrid).
    #[serde(rename = "fragment")]
    Fragment,

    /// Form POST.
    #[serde(rename = "form_post")]
    FormPost,
}

impl fmt::Display for ResponseMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Query => "query",
            Self::Fragment => "fragment",
            Self::FormPost => "form_post",
        };
        write!(f, "{s}")
    }
}

impl FromStr for ResponseMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "query" => Ok(Self::Query),
            "fragment" => Ok(Self::Fragment),
            "form_post" => Ok(Self::FormPost),
            _ => Err(format!("unknown response mode: {s}")),
        }
    }
}

/// The kind of token a serialized ticket represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenUsage {
    /// One-shot authorization code.
    #[serde(rename = "code")]
    Code,

    /// Bearer access token.
    #[serde(rename = "access_token")]
    AccessToken,

    /// `OpenID` Connect identity token.
    #[serde(rename = "id_token")]
    IdToken,

    /// Long-lived refresh token.
    #[serde(rename = "refresh_token")]
    RefreshToken,
}

impl fmt::Display for TokenUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Code => "code",
            Self::AccessToken => "access_token",
            Self::IdToken => "id_token",
            Self::RefreshToken => "refresh_token",
        };
        write!(f, "{s}")
    }
}

impl FromStr for TokenUsage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "code" => Ok(Self::Code),
            "access_token" => Ok(Self::AccessToken),
            "id_token" => Ok(Self::IdToken),
            "refresh_token" => Ok(Self::RefreshToken),
            _ => Err(format!("unknown token usage: {s}")),
        }
    }
}

/// Protocol endpoints terminated by the middleware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// Authorization endpoint.
    Authorization,
    /// Token endpoint.
    Token,
    /// Validation (introspection) endpoint (RFC 7662).
    Validation,
    /// Userinfo (profile) endpoint.
    Profile,
    /// Logout (end session) endpoint.
    Logout,
    /// Discovery configuration endpoint.
    Configuration,
    /// JWKS (cryptography) endpoint.
    Cryptography,
}

/// Standard OIDC scopes.
pub mod scopes {
    /// `OpenID` Connect scope (required for OIDC).
    pub const OPENID: &str = "openid";
    /// Profile scope (`family_name`, `given_name`, birthdate).
    pub const PROFILE: &str = "profile";
    /// Email scope.
    pub const EMAIL: &str = "email";
    /// Phone scope.
    pub const PHONE: &str = "phone";
    /// Offline access scope (for refresh tokens).
    pub const OFFLINE_ACCESS: &str = "offline_access";
}

/// Protocol parameter names.
pub mod params {
    /// Client identifier.
    pub const CLIENT_ID: &str = "client_id";
    /// Client secret.
    pub const CLIENT_SECRET: &str = "client_secret";
    /// Redirect URI.
    pub const REDIRECT_URI: &str = "redirect_uri";
    /// Response type.
    pub const RESPONSE_TYPE: &str = "response_type";
    /// Response mode.
    pub const RESPONSE_MODE: &str = "response_mode";
    /// Scope.
    pub const SCOPE: &str = "scope";
    /// Resource.
    pub const RESOURCE: &str = "resource";
    /// State.
    pub const STATE: &str = "state";
    /// Nonce.
    pub const NONCE: &str = "nonce";
    /// Grant type.
    pub const GRANT_TYPE: &str = "grant_type";
    /// Authorization code.
    pub const CODE: &str = "code";
    /// Refresh token.
    pub const REFRESH_TOKEN: &str = "refresh_token";
    /// Username (password grant).
    pub const USERNAME: &str = "username";
    /// Password (password grant).
    pub const PASSWORD: &str = "password";
    /// ID token hint.
    pub const ID_TOKEN_HINT: &str = "id_token_hint";
    /// Access token.
    pub const ACCESS_TOKEN: &str = "access_token";
    /// Token under introspection.
    pub const TOKEN: &str = "token";
    /// Token type hint.
    pub const TOKEN_TYPE_HINT: &str = "token_type_hint";
    /// Post-logout redirect URI.
    pub const POST_LOGOUT_REDIRECT_URI: &str = "post_logout_redirect_uri";
    /// Continuation identifier for stored authorization requests.
    pub const UNIQUE_ID: &str = "unique_id";
    /// Request object (rejected, `request_not_supported`).
    pub const REQUEST: &str = "request";
    /// Request URI (rejected, `request_uri_not_supported`).
    pub const REQUEST_URI: &str = "request_uri";
    /// Error code.
    pub const ERROR: &str = "error";
    /// Error description.
    pub const ERROR_DESCRIPTION: &str = "error_description";
    /// Error URI.
    pub const ERROR_URI: &str = "error_uri";
    /// Token type of an issued token.
    pub const TOKEN_TYPE: &str = "token_type";
    /// Token lifetime in seconds.
    pub const EXPIRES_IN: &str = "expires_in";
    /// ID token.
    pub const ID_TOKEN: &str = "id_token";
}

/// Standard claim names.
pub mod claims {
    /// Subject identifier.
    pub const SUB: &str = "sub";
    /// Issuer identifier.
    pub const ISS: &str = "iss";
    /// Audience.
    pub const AUD: &str = "aud";
    /// Expiration time.
    pub const EXP: &str = "exp";
    /// Issued at time.
    pub const IAT: &str = "iat";
    /// Not before time.
    pub const NBF: &str = "nbf";
    /// JWT ID.
    pub const JTI: &str = "jti";
    /// Nonce.
    pub const NONCE: &str = "nonce";
    /// Access token hash.
    pub const AT_HASH: &str = "at_hash";
    /// Code hash.
    pub const C_HASH: &str = "c_hash";
    /// Authorized party.
    pub const AZP: &str = "azp";
    /// Scope.
    pub const SCOPE: &str = "scope";
    /// Token usage tag.
    pub const USAGE: &str = "usage";
    /// Confidentiality marker.
    pub const CONFIDENTIAL: &str = "confidential";
    /// Name identifier (pre-OIDC subject claim).
    pub const NAME_IDENTIFIER: &str = "name_identifier";
    /// Full name.
    pub const NAME: &str = "name";
    /// Given name.
    pub const GIVEN_NAME: &str = "given_name";
    /// Family name.
    pub const FAMILY_NAME: &str = "family_name";
    /// Birthdate.
    pub const BIRTHDATE: &str = "birthdate";
    /// Email address.
    pub const EMAIL: &str = "email";
    /// Phone number.
    pub const PHONE_NUMBER: &str = "phone_number";
}

/// Claim destinations controlling which serialized tokens carry a claim.
pub mod destinations {
    /// The claim is copied into access tokens.
    pub const ACCESS_TOKEN: &str = "token";
    /// The claim is copied into identity tokens.
    pub const IDENTITY_TOKEN: &str = "id_token";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grant_type_from_str() {
        assert_eq!(
            GrantType::from_str("authorization_code").unwrap(),
            GrantType::AuthorizationCode
        );
        assert_eq!(
            GrantType::from_str("refresh_token").unwrap(),
            GrantType::RefreshToken
        );
        assert!(GrantType::from_str("invalid").is_err());
    }

    #[test]
    fn response_types_flow_detection() {
        let code_only: ResponseTypes = "code".parse().unwrap();
        assert!(code_only.is_code_flow());
        assert!(!code_only.is_implicit_flow());
        assert!(!code_only.is_hybrid_flow());

        let implicit: ResponseTypes = "token id_token".parse().unwrap();
        assert!(!implicit.is_code_flow());
        assert!(implicit.is_implicit_flow());
        assert!(!implicit.is_hybrid_flow());

        let hybrid: ResponseTypes = "code id_token".parse().unwrap();
        assert!(!hybrid.is_code_flow());
        assert!(!hybrid.is_implicit_flow());
        assert!(hybrid.is_hybrid_flow());

        let none: ResponseTypes = "none".parse().unwrap();
        assert!(none.is_none_flow());
    }

    #[test]
    fn response_types_reject_unknown_and_mixed_none() {
        assert!(ResponseTypes::from_str("code magic").is_err());
        assert!(ResponseTypes::from_str("none code").is_err());
        assert!(ResponseTypes::from_str("").is_err());
    }

    #[test]
    fn response_mode_round_trip() {
        for s in ["query", "fragment", "form_post"] {
            assert_eq!(ResponseMode::from_str(s).unwrap().to_string(), s);
        }
        assert!(ResponseMode::from_str("web_message").is_err());
    }

    #[test]
    fn token_usage_round_trip() {
        for s in ["code", "access_token", "id_token", "refresh_token"] {
            assert_eq!(TokenUsage::from_str(s).unwrap().to_string(), s);
        }
        assert!(TokenUsage::from_str("saml").is_err());
    }
}
