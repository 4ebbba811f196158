//! The middleware object.
//!
//! [`OidcServer`] terminates the protocol endpoints and passes everything
//! else through to the host. The host finishes authorization and logout
//! flows by calling [`OidcServer::sign_in`] and [`OidcServer::sign_out`]
//! once it has authenticated the user.

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::request::Parts;
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use std::str::FromStr;
use std::sync::Arc;

use crate::cache::{DistributedCache, RequestStore};
use crate::endpoints::{authorization, discovery, introspection, logout, response, token, userinfo};
use crate::error::{ErrorPayload, OidcError, OidcResult};
use crate::format::DataProtectionFormat;
use crate::message::ProtocolMessage;
use crate::options::ServerOptions;
use crate::provider::{
    MatchEndpointContext, RedirectResponseContext, RequestControl, ServerProvider,
};
use crate::ticket::{items, AuthenticationProperties, AuthenticationTicket, ClaimsPrincipal};
use crate::token::TokenManager;
use crate::types::{params, Endpoint, ResponseType, ResponseTypes, TokenUsage};

/// Request-extension handed to the host when a validated authorization
/// request passes through to the login UI.
#[derive(Debug, Clone)]
pub struct AuthorizationContext {
    /// The validated authorization request, including its `unique_id`.
    pub message: ProtocolMessage,
    /// The issuer resolved for this request.
    pub issuer: String,
}

/// Request-extension handed to the host when a logout request passes
/// through.
#[derive(Debug, Clone)]
pub struct LogoutContext {
    /// The decoded logout request.
    pub message: ProtocolMessage,
}

/// Request-extension carrying an authorization error the host chose to
/// render itself (`application_can_display_errors`).
#[derive(Debug, Clone)]
pub struct ErrorContext {
    /// The protocol error.
    pub error: ErrorPayload,
}

/// The authorization server middleware.
pub struct OidcServer<P: ServerProvider> {
    pub(crate) options: Arc<ServerOptions>,
    pub(crate) provider: P,
    pub(crate) tokens: TokenManager,
    pub(crate) requests: RequestStore,
}

impl<P: ServerProvider> OidcServer<P> {
    /// Creates the middleware, validating the configuration.
    ///
    /// # Errors
    ///
    /// Returns `OidcError::Config` when a JWT handler is configured but no
    /// signing credentials are available. Rejecting this at startup beats
    /// failing on the first token request while JWKS advertises nothing.
    pub fn new(
        options: ServerOptions,
        provider: P,
        cache: Arc<dyn DistributedCache>,
    ) -> OidcResult<Self> {
        let needs_signing_keys =
            options.access_token_handler.is_some() || options.identity_token_handler.is_some();
        if needs_signing_keys && options.signing_credentials.is_empty() {
            return Err(OidcError::Config(
                "a JWT token handler is configured but no signing credentials were provided"
                    .to_string(),
            ));
        }

        let options = Arc::new(options);
        let random = options.random_number_generator.clone();

        let access_token_format = options.access_token_format.clone().unwrap_or_else(|| {
            Arc::new(DataProtectionFormat::generate(random.clone(), "access_token"))
        });
        let refresh_token_format = options.refresh_token_format.clone().unwrap_or_else(|| {
            Arc::new(DataProtectionFormat::generate(random.clone(), "refresh_token"))
        });
        let authorization_code_format =
            options.authorization_code_format.clone().unwrap_or_else(|| {
                Arc::new(DataProtectionFormat::generate(random.clone(), "authorization_code"))
            });

        let tokens = TokenManager::new(
            options.clone(),
            cache.clone(),
            access_token_format,
            refresh_token_format,
            authorization_code_format,
        );

        Ok(Self {
            options,
            provider,
            tokens,
            requests: RequestStore::new(cache),
        })
    }

    /// Returns the configuration.
    #[must_use]
    pub fn options(&self) -> &ServerOptions {
        &self.options
    }

    /// Returns the token manager.
    #[must_use]
    pub const fn tokens(&self) -> &TokenManager {
        &self.tokens
    }

    /// Handles one request.
    ///
    /// `Ok(response)` terminates the request; `Err(request)` passes it
    /// through to the next layer, possibly carrying an
    /// [`AuthorizationContext`], [`LogoutContext`], or [`ErrorContext`]
    /// extension for the host.
    ///
    /// # Errors
    ///
    /// The `Err` variant is flow control, not failure: it returns the
    /// request for the next handler.
    pub async fn handle(&self, request: Request<Body>) -> Result<Response, Request<Body>> {
        let path = request.uri().path().to_string();
        let matched = self.match_path(&path);

        let mut ctx = MatchEndpointContext::new(path, matched);
        self.provider.match_endpoint(&mut ctx).await;
        let endpoint = ctx.endpoint;
        match ctx.into_control() {
            RequestControl::Handled(response) => return Ok(response),
            RequestControl::Skipped => return Err(request),
            RequestControl::Continue => {}
        }

        let Some(endpoint) = endpoint else {
            return Err(request);
        };

        match endpoint {
            Endpoint::Authorization => authorization::invoke(self, request).await,
            Endpoint::Token => token::invoke(self, request).await,
            Endpoint::Validation => introspection::invoke(self, request).await,
            Endpoint::Profile => userinfo::invoke(self, request).await,
            Endpoint::Logout => logout::invoke(self, request).await,
            Endpoint::Configuration => discovery::invoke_configuration(self, request).await,
            Endpoint::Cryptography => discovery::invoke_cryptography(self, request).await,
        }
    }

    fn match_path(&self, path: &str) -> Option<Endpoint> {
        [
            Endpoint::Authorization,
            Endpoint::Token,
            Endpoint::Validation,
            Endpoint::Profile,
            Endpoint::Logout,
            Endpoint::Configuration,
            Endpoint::Cryptography,
        ]
        .into_iter()
        .find(|endpoint| self.options.path_for(*endpoint) == Some(path))
    }

    /// Whether the request arrived over a secure transport.
    pub(crate) fn is_secure(&self, parts: &Parts) -> bool {
        if parts.uri.scheme_str() == Some("https") {
            return true;
        }
        parts
            .headers
            .get("x-forwarded-proto")
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.eq_ignore_ascii_case("https"))
    }

    /// Resolves the issuer for a request.
    pub(crate) fn issuer(&self, parts: &Parts) -> String {
        let scheme = if self.is_secure(parts) { "https" } else { "http" };
        let authority = parts
            .uri
            .authority()
            .map(ToString::to_string)
            .or_else(|| {
                parts
                    .headers
                    .get(header::HOST)
                    .and_then(|value| value.to_str().ok())
                    .map(ToString::to_string)
            })
            .unwrap_or_else(|| "localhost".to_string());
        self.options.issuer_for(scheme, &authority)
    }

    /// Reloads a stored authorization request by its `unique_id`.
    ///
    /// # Errors
    ///
    /// Propagates cache backend failures; a missing or expired entry is
    /// `Ok(None)`.
    pub async fn retrieve_authorization_request(
        &self,
        unique_id: &str,
    ) -> OidcResult<Option<ProtocolMessage>> {
        let Some(mut stored) = self.requests.load(unique_id).await? else {
            return Ok(None);
        };
        stored.set(params::UNIQUE_ID, unique_id);
        Ok(Some(stored))
    }

    /// Completes an authorization request after the host authenticated
    /// the user.
    ///
    /// Generates the granted credentials in the order code, access token,
    /// identity token (so `c_hash`/`at_hash` derive from the issued
    /// values), removes the continuation entry, and renders the response
    /// in the request's response mode.
    ///
    /// # Errors
    ///
    /// Returns `server_error` conditions: an unusable response type on the
    /// message, a missing `redirect_uri`, or a serialization failure.
    pub async fn sign_in(
        &self,
        context: &AuthorizationContext,
        principal: ClaimsPrincipal,
        properties: AuthenticationProperties,
    ) -> OidcResult<Response> {
        let message = &context.message;
        let now = self.options.clock.utc_now();

        let response_types = message
            .response_type()
            .and_then(|value| ResponseTypes::from_str(value).ok())
            .ok_or_else(|| {
                OidcError::ServerError("sign-in invoked without a usable response_type".to_string())
            })?;

        let redirect_uri = message.redirect_uri().ok_or_else(|| {
            OidcError::ServerError("sign-in invoked without a redirect_uri".to_string())
        })?;

        let base = self.base_ticket(message, principal, properties);
        let mode = authorization::resolved_response_mode(message, &response_types);

        let mut parameters: Vec<(String, String)> = Vec::new();
        let mut code_value: Option<String> = None;
        let mut access_value: Option<String> = None;

        if response_types.contains(ResponseType::Code) {
            let mut ticket = base.clone();
            self.tokens.stamp(&mut ticket, TokenUsage::Code, now);
            let code = self.tokens.serialize_code(&ticket).await?;
            parameters.push((params::CODE.to_string(), code.clone()));
            code_value = Some(code);
        }

        if response_types.contains(ResponseType::Token) {
            let mut ticket = base.clone();
            self.tokens.stamp(&mut ticket, TokenUsage::AccessToken, now);
            let access_token = self
                .tokens
                .serialize_access_token(&ticket, &context.issuer)?;
            parameters.push((params::ACCESS_TOKEN.to_string(), access_token.clone()));
            parameters.push((params::TOKEN_TYPE.to_string(), "Bearer".to_string()));
            if let Some(expires_in) =
                expires_in_seconds(ticket.properties.expires_utc, now)
            {
                parameters.push((params::EXPIRES_IN.to_string(), expires_in.to_string()));
            }
            access_value = Some(access_token);
        }

        if response_types.contains(ResponseType::IdToken) {
            let mut ticket = base.clone();
            self.tokens.stamp(&mut ticket, TokenUsage::IdToken, now);
            let id_token = self.tokens.serialize_identity_token(
                &ticket,
                &context.issuer,
                code_value.as_deref(),
                access_value.as_deref(),
            )?;
            parameters.push((params::ID_TOKEN.to_string(), id_token));
        }

        if let Some(state) = message.state() {
            parameters.push((params::STATE.to_string(), state.to_string()));
        }

        let mut ctx =
            RedirectResponseContext::new(Some(redirect_uri.to_string()), parameters);
        self.provider.authorization_endpoint_response(&mut ctx).await;
        let redirect_uri = ctx
            .redirect_uri
            .clone()
            .unwrap_or_else(|| redirect_uri.to_string());
        let parameters = std::mem::take(&mut ctx.parameters);
        if let RequestControl::Handled(response) = ctx.into_control() {
            return Ok(response);
        }

        // The continuation entry has served its purpose; removal is
        // best-effort because the entry also times out on its own.
        if let Some(unique_id) = message.unique_id() {
            if let Err(error) = self.requests.remove(unique_id).await {
                tracing::warn!(%error, "failed to remove continuation entry");
            }
        }

        Ok(response::render(mode, &redirect_uri, &parameters))
    }

    /// Completes a logout request after the host signed the user out.
    ///
    /// The logout endpoint has already gated `post_logout_redirect_uri`
    /// through the provider and stored the validated (possibly rewritten)
    /// value on the message, so it is consumed as-is here. When present,
    /// every other message parameter is appended to it as a query string
    /// and the response redirects there; otherwise an empty 200 is
    /// produced.
    ///
    /// # Errors
    ///
    /// Propagates provider failures surfaced as error payloads.
    pub async fn sign_out(&self, message: &ProtocolMessage) -> OidcResult<Response> {
        let redirect_uri = message.post_logout_redirect_uri().map(ToString::to_string);

        let parameters: Vec<(String, String)> = message
            .iter()
            .filter(|(name, _)| *name != params::POST_LOGOUT_REDIRECT_URI)
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();

        let mut ctx = RedirectResponseContext::new(redirect_uri, parameters);
        self.provider.logout_endpoint_response(&mut ctx).await;
        let redirect_uri = ctx.redirect_uri.clone();
        let parameters = std::mem::take(&mut ctx.parameters);
        if let RequestControl::Handled(response) = ctx.into_control() {
            return Ok(response);
        }

        match redirect_uri {
            Some(uri) => Ok(response::render_query(&uri, &parameters)),
            None => Ok(StatusCode::OK.into_response()),
        }
    }

    /// Builds the ticket template shared by every credential issued for
    /// an authorization response.
    fn base_ticket(
        &self,
        message: &ProtocolMessage,
        principal: ClaimsPrincipal,
        mut properties: AuthenticationProperties,
    ) -> AuthenticationTicket {
        if let Some(client_id) = message.client_id() {
            properties.set(items::CLIENT_ID, client_id);
        }
        if let Some(redirect_uri) = message.redirect_uri() {
            properties.set(items::REDIRECT_URI, redirect_uri);
        }
        if let Some(scope) = message.scope() {
            properties.set(items::SCOPE, scope);
        }
        if let Some(nonce) = message.nonce() {
            properties.set(items::NONCE, nonce);
        }
        if let Some(resource) = message.resource() {
            properties.set(items::RESOURCE, resource);
            properties.set(items::AUDIENCES, resource);
        }

        AuthenticationTicket::new(principal, properties, "oidc-server")
    }
}

/// Computes the rounded `expires_in` value, omitted for past instants.
pub(crate) fn expires_in_seconds(
    expires: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Option<i64> {
    let expires = expires?;
    if expires <= now {
        return None;
    }
    let milliseconds = (expires - now).num_milliseconds();
    Some((milliseconds + 500) / 1000)
}

/// Axum middleware: terminate protocol requests, pass everything else on.
///
/// ```rust,ignore
/// let server = Arc::new(OidcServer::new(options, provider, cache)?);
/// let app = Router::new()
///     .fallback(login_ui)
///     .layer(middleware::from_fn_with_state(server.clone(), oidc_middleware));
/// ```
pub async fn oidc_middleware<P: ServerProvider + 'static>(
    State(server): State<Arc<OidcServer<P>>>,
    request: Request,
    next: Next,
) -> Response {
    match server.handle(request).await {
        Ok(response) => response,
        Err(request) => next.run(request).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;
    use crate::options::{FixedClock, SystemClock};
    use crate::provider::DefaultServerProvider;
    use chrono::Duration;

    #[test]
    fn expires_in_rounds_to_nearest_second() {
        let now = Utc::now();
        assert_eq!(
            expires_in_seconds(Some(now + Duration::milliseconds(1499)), now),
            Some(1)
        );
        assert_eq!(
            expires_in_seconds(Some(now + Duration::milliseconds(1500)), now),
            Some(2)
        );
        assert_eq!(expires_in_seconds(Some(now - Duration::seconds(1)), now), None);
        assert_eq!(expires_in_seconds(None, now), None);
    }

    #[test]
    fn construction_requires_signing_keys_for_jwt_handlers() {
        let cache = Arc::new(InMemoryCache::new(Arc::new(SystemClock)));
        let options = ServerOptions::default();
        let result = OidcServer::new(options, DefaultServerProvider, cache.clone());
        assert!(matches!(result, Err(OidcError::Config(_))));

        let mut options = ServerOptions::default();
        options.identity_token_handler = None;
        assert!(OidcServer::new(options, DefaultServerProvider, cache).is_ok());
    }

    #[test]
    fn path_matching_is_exact() {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let cache = Arc::new(InMemoryCache::new(clock));
        let mut options = ServerOptions::default();
        options.identity_token_handler = None;
        let server = OidcServer::new(options, DefaultServerProvider, cache).unwrap();

        assert_eq!(server.match_path("/connect/token"), Some(Endpoint::Token));
        assert_eq!(
            server.match_path("/.well-known/openid-configuration"),
            Some(Endpoint::Configuration)
        );
        assert_eq!(server.match_path("/connect/token/extra"), None);
        assert_eq!(server.match_path("/other"), None);
    }
}
