//! `OpenID` Connect Discovery 1.0 provider metadata.
//!
//! Implements the `OpenID` Provider Metadata as defined in:
//! - [OpenID Connect Discovery 1.0](https://openid.net/specs/openid-connect-discovery-1_0.html)
//! - [RFC 8414](https://tools.ietf.org/html/rfc8414) (OAuth 2.0 Authorization Server Metadata)

use serde::{Deserialize, Serialize};

use crate::options::ServerOptions;
use crate::types::{Endpoint, GrantType, ResponseMode};

/// `OpenID` Provider Metadata, returned by the configuration endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderMetadata {
    /// Issuer identifier.
    pub issuer: String,

    /// Authorization endpoint URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorization_endpoint: Option<String>,

    /// Token endpoint URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_endpoint: Option<String>,

    /// Introspection endpoint URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub introspection_endpoint: Option<String>,

    /// Userinfo endpoint URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub userinfo_endpoint: Option<String>,

    /// End session (logout) endpoint URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_session_endpoint: Option<String>,

    /// JWKS document URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jwks_uri: Option<String>,

    /// Supported grant types, deduced from the enabled endpoints.
    pub grant_types_supported: Vec<String>,

    /// Supported response modes.
    pub response_modes_supported: Vec<ResponseMode>,

    /// Supported response types.
    pub response_types_supported: Vec<String>,

    /// Supported subject identifier types.
    pub subject_types_supported: Vec<String>,

    /// Supported scopes.
    pub scopes_supported: Vec<String>,

    /// Supported identity token signing algorithms.
    pub id_token_signing_alg_values_supported: Vec<String>,
}

impl ProviderMetadata {
    /// Assembles the metadata from live options.
    ///
    /// `issuer` must already be resolved for the current request; endpoint
    /// URLs are the issuer joined with each enabled path.
    #[must_use]
    pub fn from_options(options: &ServerOptions, issuer: &str) -> Self {
        let join = |endpoint: Endpoint| {
            options
                .path_for(endpoint)
                .map(|path| format!("{issuer}{path}"))
        };

        let authorization_enabled = options.authorization_endpoint_path.is_some();
        let token_enabled = options.token_endpoint_path.is_some();

        let mut grant_types_supported = Vec::new();
        if authorization_enabled {
            grant_types_supported.push("implicit".to_string());
        }
        if authorization_enabled && token_enabled {
            grant_types_supported.push(GrantType::AuthorizationCode.to_string());
        }
        if token_enabled {
            grant_types_supported.push(GrantType::ClientCredentials.to_string());
            grant_types_supported.push(GrantType::Password.to_string());
            grant_types_supported.push(GrantType::RefreshToken.to_string());
        }

        // The implicit combinations are always advertised; code-bearing
        // combinations require the token endpoint for redemption.
        let mut response_types_supported = vec![
            "token".to_string(),
            "id_token".to_string(),
            "id_token token".to_string(),
        ];
        if token_enabled {
            response_types_supported.push("code".to_string());
            response_types_supported.push("code token".to_string());
            response_types_supported.push("code id_token".to_string());
            response_types_supported.push("code id_token token".to_string());
        }

        Self {
            issuer: issuer.to_string(),
            authorization_endpoint: join(Endpoint::Authorization),
            token_endpoint: join(Endpoint::Token),
            introspection_endpoint: join(Endpoint::Validation),
            userinfo_endpoint: join(Endpoint::Profile),
            end_session_endpoint: join(Endpoint::Logout),
            jwks_uri: join(Endpoint::Cryptography),
            grant_types_supported,
            response_modes_supported: vec![
                ResponseMode::FormPost,
                ResponseMode::Fragment,
                ResponseMode::Query,
            ],
            response_types_supported,
            subject_types_supported: vec!["public".to_string()],
            scopes_supported: vec!["openid".to_string()],
            id_token_signing_alg_values_supported: vec!["RS256".to_string()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_with_all_endpoints_enabled() {
        let options = ServerOptions::default();
        let metadata = ProviderMetadata::from_options(&options, "https://auth.example.com");

        assert_eq!(metadata.issuer, "https://auth.example.com");
        assert_eq!(
            metadata.authorization_endpoint.as_deref(),
            Some("https://auth.example.com/connect/authorize")
        );
        assert_eq!(
            metadata.jwks_uri.as_deref(),
            Some("https://auth.example.com/.well-known/jwks")
        );
        assert!(metadata.grant_types_supported.contains(&"authorization_code".to_string()));
        assert!(metadata.grant_types_supported.contains(&"refresh_token".to_string()));
        assert!(metadata
            .response_types_supported
            .contains(&"code id_token token".to_string()));
        assert_eq!(metadata.subject_types_supported, vec!["public"]);
        assert_eq!(metadata.id_token_signing_alg_values_supported, vec!["RS256"]);
    }

    #[test]
    fn metadata_without_token_endpoint() {
        let options = ServerOptions {
            token_endpoint_path: None,
            ..ServerOptions::default()
        };
        let metadata = ProviderMetadata::from_options(&options, "https://auth.example.com");

        assert!(metadata.token_endpoint.is_none());
        assert!(!metadata.grant_types_supported.contains(&"authorization_code".to_string()));
        assert!(metadata.grant_types_supported.contains(&"implicit".to_string()));
        assert!(!metadata.response_types_supported.iter().any(|t| t.contains("code")));
        assert!(metadata.response_types_supported.contains(&"id_token token".to_string()));
    }

    #[test]
    fn metadata_serializes_grant_types_as_snake_case() {
        let metadata =
            ProviderMetadata::from_options(&ServerOptions::default(), "https://auth.example.com");
        let json = serde_json::to_string(&metadata).unwrap();
        assert!(json.contains("\"authorization_code\""));
        assert!(json.contains("\"refresh_token\""));
        assert!(json.contains("\"form_post\""));
    }
}
