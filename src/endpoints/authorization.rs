//! Authorization endpoint.
//!
//! Runs the OIDC authorization validation matrix, persists the request
//! into the continuation cache, and hands the request to the host login
//! UI. Errors raised before the redirect URI has been validated render
//! the native error page; later errors redirect back to the client.

use axum::body::Body;
use axum::http::request::Parts;
use axum::http::Request;
use axum::response::Response;
use std::str::FromStr;

use crate::endpoints::{decoder, response};
use crate::error::ErrorPayload;
use crate::message::{ProtocolMessage, RequestType};
use crate::options::random_base64url;
use crate::provider::{
    EndpointContext, RequestControl, ServerProvider, ValidateAuthorizationRequestContext,
    ValidateClientRedirectUriContext, Validation,
};
use crate::server::{AuthorizationContext, ErrorContext, OidcServer};
use crate::types::{params, scopes, Endpoint, ResponseMode, ResponseType, ResponseTypes};

/// Resolves the effective response mode: the explicit parameter when
/// valid, otherwise fragment for implicit and hybrid flows and query for
/// everything else.
pub(crate) fn resolved_response_mode(
    message: &ProtocolMessage,
    response_types: &ResponseTypes,
) -> ResponseMode {
    if let Some(mode) = message
        .response_mode()
        .and_then(|value| ResponseMode::from_str(value).ok())
    {
        return mode;
    }
    if response_types.is_implicit_flow() || response_types.is_hybrid_flow() {
        ResponseMode::Fragment
    } else {
        ResponseMode::Query
    }
}

/// Renders a post-validation error: a redirect back to the client
/// preserving `state`.
fn redirect_error(message: &ProtocolMessage, redirect_uri: &str, payload: &ErrorPayload) -> Response {
    let response_types = message
        .response_type()
        .and_then(|value| ResponseTypes::from_str(value).ok())
        .unwrap_or_default();
    let mode = resolved_response_mode(message, &response_types);
    let parameters = response::error_parameters(payload, message.state());
    response::render(mode, redirect_uri, &parameters)
}

/// Handles the authorization endpoint.
pub(crate) async fn invoke<P: ServerProvider>(
    server: &OidcServer<P>,
    request: Request<Body>,
) -> Result<Response, Request<Body>> {
    let (parts, body) = request.into_parts();

    if !server.options.allow_insecure_http && !server.is_secure(&parts) {
        let payload = ErrorPayload::new("invalid_request")
            .with_description("this server only accepts HTTPS requests");
        return page_or_defer(server, parts, payload);
    }

    let mut message =
        match decoder::decode_request(&parts, body, RequestType::AuthenticationRequest).await {
            Ok(message) => message,
            Err(error) => return page_or_defer(server, parts, error.to_payload()),
        };

    // Resume a stored request; live parameters win over stored ones.
    let mut resumed = false;
    if let Some(unique_id) = message.unique_id().map(ToString::to_string) {
        match server.requests.load(&unique_id).await {
            Ok(Some(stored)) => {
                message.overlay(&stored);
                resumed = true;
            }
            Ok(None) => {
                let payload = ErrorPayload::new("invalid_request")
                    .with_description("the authorization request timeout expired");
                return page_or_defer(server, parts, payload);
            }
            Err(error) => {
                tracing::error!(%error, "continuation cache lookup failed");
                return page_or_defer(server, parts, error.to_payload());
            }
        }
    }

    let Some(client_id) = message.client_id().map(ToString::to_string) else {
        let payload = ErrorPayload::new("invalid_request")
            .with_description("the mandatory client_id parameter was missing");
        return page_or_defer(server, parts, payload);
    };

    // The redirect URI is untrusted until it survives syntactic checks
    // and the client validation hook.
    if let Some(error) = validate_redirect_uri_syntax(server, &message) {
        return page_or_defer(server, parts, error);
    }

    let mut ctx = ValidateClientRedirectUriContext::new(
        client_id,
        message.redirect_uri().map(ToString::to_string),
    );
    server.provider.validate_client_redirect_uri(&mut ctx).await;
    let outcome = ctx.outcome().clone();
    match outcome {
        Validation::Validated => {
            if let Some(uri) = ctx.redirect_uri {
                message.set(params::REDIRECT_URI, uri);
            }
        }
        Validation::Rejected(payload) => return page_or_defer(server, parts, payload),
        Validation::Skipped => {
            let payload = ErrorPayload::new("invalid_client")
                .with_description("the client application was not validated");
            return page_or_defer(server, parts, payload);
        }
    }

    // From here on the redirect URI is trusted, so errors go back to the
    // client when one is available.
    let redirect_uri = message.redirect_uri().map(ToString::to_string);
    let fail = |server: &OidcServer<P>, parts: Parts, message: &ProtocolMessage, payload: ErrorPayload| {
        match &redirect_uri {
            Some(uri) => Ok(redirect_error(message, uri, &payload)),
            None => page_or_defer(server, parts, payload),
        }
    };

    if message.contains(params::REQUEST) {
        let payload = ErrorPayload::new("request_not_supported")
            .with_description("the request parameter is not supported");
        return fail(server, parts, &message, payload);
    }
    if message.contains(params::REQUEST_URI) {
        let payload = ErrorPayload::new("request_uri_not_supported")
            .with_description("the request_uri parameter is not supported");
        return fail(server, parts, &message, payload);
    }

    let Some(response_type) = message.response_type() else {
        let payload = ErrorPayload::new("invalid_request")
            .with_description("the mandatory response_type parameter was missing");
        return fail(server, parts, &message, payload);
    };

    let Ok(response_types) = ResponseTypes::from_str(response_type) else {
        let payload = ErrorPayload::new("unsupported_response_type")
            .with_description("the response_type parameter is not supported");
        return fail(server, parts, &message, payload);
    };

    if let Some(mode) = message.response_mode() {
        if ResponseMode::from_str(mode).is_err() {
            let payload = ErrorPayload::new("invalid_request")
                .with_description("the response_mode parameter is not supported");
            return fail(server, parts, &message, payload);
        }
    }

    // Credentials must not transit the query string.
    let explicit_query = message
        .response_mode()
        .and_then(|value| ResponseMode::from_str(value).ok())
        == Some(ResponseMode::Query);
    if explicit_query
        && (response_types.contains(ResponseType::Token)
            || response_types.contains(ResponseType::IdToken))
    {
        let payload = ErrorPayload::new("invalid_request").with_description(
            "the query response_mode cannot be used with token or id_token response types",
        );
        return fail(server, parts, &message, payload);
    }

    if message.has_scope(scopes::OPENID)
        && (response_types.is_implicit_flow() || response_types.is_hybrid_flow())
        && message.nonce().is_none()
    {
        let payload = ErrorPayload::new("invalid_request")
            .with_description("the mandatory nonce parameter was missing");
        return fail(server, parts, &message, payload);
    }

    if response_types.contains(ResponseType::IdToken) && !message.has_scope(scopes::OPENID) {
        let payload = ErrorPayload::new("invalid_request")
            .with_description("the openid scope is mandatory with the id_token response type");
        return fail(server, parts, &message, payload);
    }

    if response_types.contains(ResponseType::Code) && server.options.token_endpoint_path.is_none() {
        let payload = ErrorPayload::new("unsupported_response_type")
            .with_description("the authorization code flow requires the token endpoint");
        return fail(server, parts, &message, payload);
    }

    let mut ctx = ValidateAuthorizationRequestContext::new(message.clone());
    server.provider.validate_authorization_request(&mut ctx).await;
    if let Some(payload) = ctx.outcome().rejection().cloned() {
        return fail(server, parts, &message, payload);
    }
    message = ctx.message;

    // Persist the request so the host login UI can resume it.
    if !resumed && message.unique_id().is_none() {
        let unique_id =
            random_base64url(server.options.random_number_generator.as_ref(), 32);
        message.set(params::UNIQUE_ID, &unique_id);
        let now = server.options.clock.utc_now();
        if let Err(error) = server.requests.store(&unique_id, &message, now).await {
            tracing::error!(%error, "failed to persist the authorization request");
            return fail(server, parts, &message, error.to_payload());
        }
    }

    let issuer = server.issuer(&parts);
    let mut ctx = EndpointContext::new(Endpoint::Authorization, message);
    server.provider.authorization_endpoint(&mut ctx).await;
    let message = std::mem::replace(&mut ctx.message, ProtocolMessage::new(RequestType::AuthenticationRequest));
    match ctx.into_control() {
        RequestControl::Handled(response) => Ok(response),
        RequestControl::Skipped => Err(Request::from_parts(parts, Body::empty())),
        RequestControl::Continue => {
            // The host login UI takes over from here.
            let mut request = Request::from_parts(parts, Body::empty());
            request
                .extensions_mut()
                .insert(AuthorizationContext { message, issuer });
            Err(request)
        }
    }
}

/// Syntactic redirect URI checks: absolute, fragment-free, and HTTPS
/// unless insecure transports are allowed. The URI is mandatory for
/// `openid` requests.
fn validate_redirect_uri_syntax<P: ServerProvider>(
    server: &OidcServer<P>,
    message: &ProtocolMessage,
) -> Option<ErrorPayload> {
    let Some(redirect_uri) = message.redirect_uri() else {
        if message.has_scope(scopes::OPENID) {
            return Some(
                ErrorPayload::new("invalid_request")
                    .with_description("the mandatory redirect_uri parameter was missing"),
            );
        }
        return None;
    };

    let Ok(parsed) = url::Url::parse(redirect_uri) else {
        return Some(
            ErrorPayload::new("invalid_request")
                .with_description("the redirect_uri parameter must be an absolute URI"),
        );
    };

    if parsed.fragment().is_some() {
        return Some(
            ErrorPayload::new("invalid_request")
                .with_description("the redirect_uri parameter must not include a fragment"),
        );
    }

    if !server.options.allow_insecure_http && parsed.scheme() != "https" {
        return Some(
            ErrorPayload::new("invalid_request")
                .with_description("the redirect_uri parameter must use HTTPS"),
        );
    }

    None
}

/// Renders the native page, or defers to the host when it asked to
/// display errors itself.
fn page_or_defer<P: ServerProvider>(
    server: &OidcServer<P>,
    parts: Parts,
    payload: ErrorPayload,
) -> Result<Response, Request<Body>> {
    if server.options.application_can_display_errors {
        let mut request = Request::from_parts(parts, Body::empty());
        request.extensions_mut().insert(ErrorContext { error: payload });
        Err(request)
    } else {
        Ok(response::native_error_page(&payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message_with(response_type: &str, response_mode: Option<&str>) -> ProtocolMessage {
        let mut pairs = vec![("response_type", response_type)];
        if let Some(mode) = response_mode {
            pairs.push(("response_mode", mode));
        }
        ProtocolMessage::from_pairs(RequestType::AuthenticationRequest, pairs)
    }

    #[test]
    fn response_mode_defaults_by_flow() {
        let code = message_with("code", None);
        let types = ResponseTypes::from_str("code").unwrap();
        assert_eq!(resolved_response_mode(&code, &types), ResponseMode::Query);

        let implicit = message_with("id_token token", None);
        let types = ResponseTypes::from_str("id_token token").unwrap();
        assert_eq!(resolved_response_mode(&implicit, &types), ResponseMode::Fragment);

        let hybrid = message_with("code id_token", None);
        let types = ResponseTypes::from_str("code id_token").unwrap();
        assert_eq!(resolved_response_mode(&hybrid, &types), ResponseMode::Fragment);
    }

    #[test]
    fn explicit_response_mode_wins() {
        let message = message_with("code", Some("form_post"));
        let types = ResponseTypes::from_str("code").unwrap();
        assert_eq!(resolved_response_mode(&message, &types), ResponseMode::FormPost);
    }
}
