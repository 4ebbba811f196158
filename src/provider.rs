//! Event provider: the host extensibility surface.
//!
//! The middleware owns the protocol; the host owns clients, users, and
//! consent. Every decision the host can influence flows through a
//! [`ServerProvider`] hook carrying a mutable context. A hook can accept
//! default processing, skip the middleware for the request, or
//! short-circuit with its own response; validating hooks resolve to one of
//! `{Skipped, Validated, Rejected}`.

use async_trait::async_trait;
use axum::response::Response;
use serde_json::{Map, Value};

use crate::discovery::ProviderMetadata;
use crate::error::ErrorPayload;
use crate::jwks::JsonWebKeySet;
use crate::message::ProtocolMessage;
use crate::ticket::AuthenticationTicket;
use crate::types::Endpoint;

/// Flow control shared by endpoint and response hooks.
#[derive(Debug, Default)]
pub enum RequestControl {
    /// Continue default processing.
    #[default]
    Continue,
    /// Stop processing and pass the request through to the next layer.
    Skipped,
    /// Stop processing; the provider supplied the response.
    Handled(Response),
}

impl RequestControl {
    /// Whether default processing should continue.
    #[must_use]
    pub const fn is_continue(&self) -> bool {
        matches!(self, Self::Continue)
    }
}

/// Three-state outcome of a validating hook.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Validation {
    /// The hook made no decision.
    #[default]
    Skipped,
    /// The subject was validated.
    Validated,
    /// The subject was rejected with a protocol error.
    Rejected(ErrorPayload),
}

impl Validation {
    /// Whether the subject was validated.
    #[must_use]
    pub const fn is_validated(&self) -> bool {
        matches!(self, Self::Validated)
    }

    /// Returns the rejection payload, if any.
    #[must_use]
    pub const fn rejection(&self) -> Option<&ErrorPayload> {
        match self {
            Self::Rejected(payload) => Some(payload),
            _ => None,
        }
    }
}

macro_rules! control_methods {
    () => {
        /// Stops processing and passes the request through.
        pub fn skip(&mut self) {
            self.control = RequestControl::Skipped;
        }

        /// Stops processing with the provider's own response.
        pub fn handle_response(&mut self, response: Response) {
            self.control = RequestControl::Handled(response);
        }

        /// Returns the control state, consuming the context.
        #[must_use]
        pub fn into_control(self) -> RequestControl {
            self.control
        }
    };
}

macro_rules! validation_methods {
    () => {
        /// Marks the subject validated.
        pub fn validate(&mut self) {
            self.outcome = Validation::Validated;
        }

        /// Rejects with an error payload.
        pub fn reject(&mut self, payload: ErrorPayload) {
            self.outcome = Validation::Rejected(payload);
        }

        /// Returns the outcome.
        #[must_use]
        pub const fn outcome(&self) -> &Validation {
            &self.outcome
        }
    };
}

/// Context for [`ServerProvider::match_endpoint`].
#[derive(Debug)]
pub struct MatchEndpointContext {
    /// Request path.
    pub path: String,
    /// The endpoint the router matched, overridable by the provider.
    pub endpoint: Option<Endpoint>,
    control: RequestControl,
}

impl MatchEndpointContext {
    pub(crate) fn new(path: String, endpoint: Option<Endpoint>) -> Self {
        Self {
            path,
            endpoint,
            control: RequestControl::Continue,
        }
    }

    control_methods!();
}

/// Context for [`ServerProvider::validate_client_redirect_uri`].
#[derive(Debug)]
pub struct ValidateClientRedirectUriContext {
    /// The client under validation.
    pub client_id: String,
    /// The requested redirect URI; the provider may substitute the
    /// client's registered URI when the request omitted it.
    pub redirect_uri: Option<String>,
    outcome: Validation,
}

impl ValidateClientRedirectUriContext {
    pub(crate) fn new(client_id: String, redirect_uri: Option<String>) -> Self {
        Self {
            client_id,
            redirect_uri,
            outcome: Validation::Skipped,
        }
    }

    /// Validates the client with an explicit redirect URI.
    pub fn validate_with_redirect_uri(&mut self, redirect_uri: impl Into<String>) {
        self.redirect_uri = Some(redirect_uri.into());
        self.outcome = Validation::Validated;
    }

    validation_methods!();
}

/// Context for [`ServerProvider::validate_client_logout_redirect_uri`].
#[derive(Debug)]
pub struct ValidateClientLogoutRedirectUriContext {
    /// The requested post-logout redirect URI; the provider may
    /// substitute the client's registered URI.
    pub post_logout_redirect_uri: String,
    outcome: Validation,
}

impl ValidateClientLogoutRedirectUriContext {
    pub(crate) fn new(post_logout_redirect_uri: String) -> Self {
        Self {
            post_logout_redirect_uri,
            outcome: Validation::Skipped,
        }
    }

    /// Validates the redirect with an explicit (possibly rewritten) URI.
    pub fn validate_with_redirect_uri(&mut self, post_logout_redirect_uri: impl Into<String>) {
        self.post_logout_redirect_uri = post_logout_redirect_uri.into();
        self.outcome = Validation::Validated;
    }

    validation_methods!();
}

/// Context for [`ServerProvider::validate_client_authentication`].
#[derive(Debug)]
pub struct ValidateClientAuthenticationContext {
    /// Client identifier from the form body or `Authorization` header.
    pub client_id: Option<String>,
    /// Client secret, when presented.
    pub client_secret: Option<String>,
    outcome: Validation,
}

impl ValidateClientAuthenticationContext {
    pub(crate) fn new(client_id: Option<String>, client_secret: Option<String>) -> Self {
        Self {
            client_id,
            client_secret,
            outcome: Validation::Skipped,
        }
    }

    validation_methods!();
}

/// Context for [`ServerProvider::validate_authorization_request`].
#[derive(Debug)]
pub struct ValidateAuthorizationRequestContext {
    /// The decoded authorization request.
    pub message: ProtocolMessage,
    outcome: Validation,
}

impl ValidateAuthorizationRequestContext {
    pub(crate) fn new(message: ProtocolMessage) -> Self {
        Self {
            message,
            outcome: Validation::Validated,
        }
    }

    validation_methods!();
}

/// Context for [`ServerProvider::validate_token_request`].
#[derive(Debug)]
pub struct ValidateTokenRequestContext {
    /// The decoded token request.
    pub message: ProtocolMessage,
    /// The authenticated client, when client authentication validated.
    pub client_id: Option<String>,
    outcome: Validation,
}

impl ValidateTokenRequestContext {
    pub(crate) fn new(message: ProtocolMessage, client_id: Option<String>) -> Self {
        Self {
            message,
            client_id,
            outcome: Validation::Validated,
        }
    }

    validation_methods!();
}

/// Context shared by the five grant hooks.
///
/// For `authorization_code` and `refresh_token` the ticket arrives
/// pre-populated from the deserialized grant and the context starts
/// validated; for the credential grants the ticket starts empty and the
/// host must supply one.
#[derive(Debug)]
pub struct GrantContext {
    /// The decoded token request.
    pub message: ProtocolMessage,
    /// The ticket the grant resolves to.
    pub ticket: Option<AuthenticationTicket>,
    outcome: Validation,
}

impl GrantContext {
    pub(crate) fn with_ticket(message: ProtocolMessage, ticket: AuthenticationTicket) -> Self {
        Self {
            message,
            ticket: Some(ticket),
            outcome: Validation::Validated,
        }
    }

    pub(crate) fn empty(message: ProtocolMessage) -> Self {
        Self {
            message,
            ticket: None,
            outcome: Validation::Skipped,
        }
    }

    /// Validates the grant with the given ticket.
    pub fn validate_with_ticket(&mut self, ticket: AuthenticationTicket) {
        self.ticket = Some(ticket);
        self.outcome = Validation::Validated;
    }

    validation_methods!();
}

/// Context for the per-endpoint invocation hooks.
#[derive(Debug)]
pub struct EndpointContext {
    /// The endpoint being invoked.
    pub endpoint: Endpoint,
    /// The decoded request.
    pub message: ProtocolMessage,
    control: RequestControl,
}

impl EndpointContext {
    pub(crate) fn new(endpoint: Endpoint, message: ProtocolMessage) -> Self {
        Self {
            endpoint,
            message,
            control: RequestControl::Continue,
        }
    }

    control_methods!();
}

/// Context for [`ServerProvider::authorization_endpoint_response`] and
/// [`ServerProvider::logout_endpoint_response`]: redirect-style responses
/// built from ordered parameters.
#[derive(Debug)]
pub struct RedirectResponseContext {
    /// Destination the response redirects (or posts) to.
    pub redirect_uri: Option<String>,
    /// Response parameters, mutable before rendering.
    pub parameters: Vec<(String, String)>,
    control: RequestControl,
}

impl RedirectResponseContext {
    pub(crate) fn new(redirect_uri: Option<String>, parameters: Vec<(String, String)>) -> Self {
        Self {
            redirect_uri,
            parameters,
            control: RequestControl::Continue,
        }
    }

    control_methods!();
}

/// Context for the JSON-payload response hooks.
#[derive(Debug)]
pub struct PayloadResponseContext {
    /// The endpoint producing the payload.
    pub endpoint: Endpoint,
    /// The JSON payload, mutable before serialization.
    pub payload: Map<String, Value>,
    control: RequestControl,
}

impl PayloadResponseContext {
    pub(crate) fn new(endpoint: Endpoint, payload: Map<String, Value>) -> Self {
        Self {
            endpoint,
            payload,
            control: RequestControl::Continue,
        }
    }

    control_methods!();
}

/// Context for [`ServerProvider::configuration_endpoint`].
#[derive(Debug)]
pub struct ConfigurationEndpointContext {
    /// The assembled metadata, mutable before serialization.
    pub metadata: ProviderMetadata,
    control: RequestControl,
}

impl ConfigurationEndpointContext {
    pub(crate) fn new(metadata: ProviderMetadata) -> Self {
        Self {
            metadata,
            control: RequestControl::Continue,
        }
    }

    control_methods!();
}

/// Context for [`ServerProvider::cryptography_endpoint`].
#[derive(Debug)]
pub struct CryptographyEndpointContext {
    /// The derived key set, mutable before serialization.
    pub keys: JsonWebKeySet,
    control: RequestControl,
}

impl CryptographyEndpointContext {
    pub(crate) fn new(keys: JsonWebKeySet) -> Self {
        Self {
            keys,
            control: RequestControl::Continue,
        }
    }

    control_methods!();
}

/// The host extensibility surface.
///
/// Every hook defaults to accepting default processing. A minimal host
/// implements [`validate_client_redirect_uri`] (authorization requests are
/// rejected as `invalid_client` otherwise) and whichever grant hooks its
/// flows need.
///
/// [`validate_client_redirect_uri`]: ServerProvider::validate_client_redirect_uri
#[async_trait]
#[allow(unused_variables)]
pub trait ServerProvider: Send + Sync {
    /// Called once routing has matched (or failed to match) an endpoint.
    /// The provider may re-route, skip, or answer the request itself.
    async fn match_endpoint(&self, ctx: &mut MatchEndpointContext) {}

    /// Validates the client and its redirect URI on authorization
    /// requests. Anything but `Validated` rejects with `invalid_client`.
    async fn validate_client_redirect_uri(&self, ctx: &mut ValidateClientRedirectUriContext) {}

    /// Gates `post_logout_redirect_uri` values, once per logout request.
    /// The validated (possibly rewritten) URI is stored on the request
    /// and consumed as-is by [`sign_out`]; anything but `Validated`
    /// rejects the request.
    ///
    /// [`sign_out`]: crate::OidcServer::sign_out
    async fn validate_client_logout_redirect_uri(
        &self,
        ctx: &mut ValidateClientLogoutRedirectUriContext,
    ) {
    }

    /// Authenticates the client on token and introspection requests.
    /// `Skipped` treats the caller as a public client.
    async fn validate_client_authentication(&self, ctx: &mut ValidateClientAuthenticationContext) {
    }

    /// Final host-side validation of an authorization request.
    async fn validate_authorization_request(&self, ctx: &mut ValidateAuthorizationRequestContext) {
    }

    /// Final host-side validation of a token request.
    async fn validate_token_request(&self, ctx: &mut ValidateTokenRequestContext) {}

    /// Approves or rewrites the ticket behind an authorization code.
    async fn grant_authorization_code(&self, ctx: &mut GrantContext) {}

    /// Approves or rewrites the ticket behind a refresh token.
    async fn grant_refresh_token(&self, ctx: &mut GrantContext) {}

    /// Resolves a resource-owner password grant. The host must validate
    /// the credentials and supply a ticket.
    async fn grant_resource_owner_credentials(&self, ctx: &mut GrantContext) {}

    /// Resolves a client-credentials grant for an authenticated client.
    async fn grant_client_credentials(&self, ctx: &mut GrantContext) {}

    /// Resolves an unrecognized grant type. Left unhandled, the request
    /// fails with `unsupported_grant_type`.
    async fn grant_custom_extension(&self, ctx: &mut GrantContext) {}

    /// Invoked on a validated authorization request, before the request is
    /// handed to the host login UI.
    async fn authorization_endpoint(&self, ctx: &mut EndpointContext) {}

    /// Invoked at the start of token endpoint processing.
    async fn token_endpoint(&self, ctx: &mut EndpointContext) {}

    /// Invoked at the start of introspection processing.
    async fn validation_endpoint(&self, ctx: &mut EndpointContext) {}

    /// Invoked at the start of userinfo processing.
    async fn profile_endpoint(&self, ctx: &mut EndpointContext) {}

    /// Invoked at the start of logout processing.
    async fn logout_endpoint(&self, ctx: &mut EndpointContext) {}

    /// Invoked with the assembled discovery metadata.
    async fn configuration_endpoint(&self, ctx: &mut ConfigurationEndpointContext) {}

    /// Invoked with the derived key set.
    async fn cryptography_endpoint(&self, ctx: &mut CryptographyEndpointContext) {}

    /// Rewrites the authorization response before rendering.
    async fn authorization_endpoint_response(&self, ctx: &mut RedirectResponseContext) {}

    /// Rewrites the token response payload before serialization.
    async fn token_endpoint_response(&self, ctx: &mut PayloadResponseContext) {}

    /// Rewrites the introspection payload before serialization.
    async fn validation_endpoint_response(&self, ctx: &mut PayloadResponseContext) {}

    /// Rewrites the userinfo payload before serialization.
    async fn profile_endpoint_response(&self, ctx: &mut PayloadResponseContext) {}

    /// Rewrites the logout redirect before rendering.
    async fn logout_endpoint_response(&self, ctx: &mut RedirectResponseContext) {}
}

/// A provider accepting default processing everywhere.
///
/// Useful for tests and for hosts that only exercise discovery.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultServerProvider;

#[async_trait]
impl ServerProvider for DefaultServerProvider {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::RequestType;

    #[test]
    fn validation_defaults_and_transitions() {
        let mut ctx = ValidateClientAuthenticationContext::new(Some("c1".into()), None);
        assert_eq!(*ctx.outcome(), Validation::Skipped);

        ctx.validate();
        assert!(ctx.outcome().is_validated());

        ctx.reject(ErrorPayload::new("invalid_client"));
        assert_eq!(
            ctx.outcome().rejection().map(|p| p.error.as_str()),
            Some("invalid_client")
        );
    }

    #[test]
    fn grant_context_states() {
        let message = ProtocolMessage::new(RequestType::TokenRequest);
        let mut ctx = GrantContext::empty(message);
        assert!(!ctx.outcome().is_validated());
        assert!(ctx.ticket.is_none());

        let ticket = AuthenticationTicket::new(
            crate::ticket::ClaimsPrincipal::with_subject("u"),
            crate::ticket::AuthenticationProperties::new(),
            "oidc-server",
        );
        ctx.validate_with_ticket(ticket);
        assert!(ctx.outcome().is_validated());
        assert!(ctx.ticket.is_some());
    }

    #[test]
    fn endpoint_context_control() {
        let message = ProtocolMessage::new(RequestType::AuthenticationRequest);
        let mut ctx = EndpointContext::new(Endpoint::Authorization, message);
        assert!(matches!(ctx.into_control(), RequestControl::Continue));

        let message = ProtocolMessage::new(RequestType::AuthenticationRequest);
        ctx = EndpointContext::new(Endpoint::Authorization, message);
        ctx.skip();
        assert!(matches!(ctx.into_control(), RequestControl::Skipped));
    }

    #[tokio::test]
    async fn default_provider_accepts_default_processing() {
        let provider = DefaultServerProvider;
        let mut ctx = MatchEndpointContext::new("/connect/authorize".into(), None);
        provider.match_endpoint(&mut ctx).await;
        assert!(ctx.endpoint.is_none());
        assert!(matches!(ctx.into_control(), RequestControl::Continue));
    }
}
