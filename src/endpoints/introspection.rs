//! Validation (introspection) endpoint, RFC 7662.
//!
//! Always answers authenticated-or-not callers with a 200; an unknown,
//! expired, or unpresentable token is reported as `{"active": false}`
//! rather than a protocol error.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use serde_json::{json, Map, Value};

use crate::endpoints::token::extract_client_credentials;
use crate::endpoints::{decoder, response};
use crate::error::ErrorPayload;
use crate::message::{ProtocolMessage, RequestType};
use crate::provider::{
    EndpointContext, PayloadResponseContext, RequestControl, ServerProvider,
    ValidateClientAuthenticationContext,
};
use crate::server::OidcServer;
use crate::ticket::{items, AuthenticationTicket};
use crate::types::{claims, Endpoint, TokenUsage};

/// Handles the introspection endpoint.
pub(crate) async fn invoke<P: ServerProvider>(
    server: &OidcServer<P>,
    request: Request<Body>,
) -> Result<Response, Request<Body>> {
    let (parts, body) = request.into_parts();

    if !server.options.allow_insecure_http && !server.is_secure(&parts) {
        return Ok(response::json_error(
            &ErrorPayload::new("invalid_request")
                .with_description("this server only accepts HTTPS requests"),
        ));
    }

    let message = match decoder::decode_request(&parts, body, RequestType::TokenRequest).await {
        Ok(message) => message,
        Err(error) => return Ok(response::json_error(&error.to_payload())),
    };

    let mut ctx = EndpointContext::new(Endpoint::Validation, message);
    server.provider.validation_endpoint(&mut ctx).await;
    let message =
        std::mem::replace(&mut ctx.message, ProtocolMessage::new(RequestType::TokenRequest));
    match ctx.into_control() {
        RequestControl::Handled(response) => return Ok(response),
        RequestControl::Skipped => return Err(Request::from_parts(parts, Body::empty())),
        RequestControl::Continue => {}
    }

    let Some(token) = message.token().map(ToString::to_string) else {
        return Ok(response::json_error(
            &ErrorPayload::new("invalid_request")
                .with_description("the mandatory token parameter was missing"),
        ));
    };

    // Client authentication failures are not protocol errors here; the
    // caller simply learns nothing about the token.
    let credentials = match extract_client_credentials(&message, &parts) {
        Ok(credentials) => credentials,
        Err(_) => return finish(server, inactive()).await,
    };
    let mut ctx =
        ValidateClientAuthenticationContext::new(credentials.client_id, credentials.client_secret);
    server.provider.validate_client_authentication(&mut ctx).await;
    if ctx.outcome().rejection().is_some() {
        return finish(server, inactive()).await;
    }
    let client_authenticated = ctx.outcome().is_validated();
    let caller = ctx.client_id.clone();

    let issuer = server.issuer(&parts);
    let now = server.options.clock.utc_now();

    let Some((ticket, usage)) = lookup(server, &message, &token, &issuer).await else {
        return finish(server, inactive()).await;
    };

    if ticket.is_expired(now) {
        return finish(server, inactive()).await;
    }
    if ticket.is_confidential() && !client_authenticated {
        return finish(server, inactive()).await;
    }

    // Access and identity tokens are audience-scoped; refresh tokens are
    // client-scoped.
    let caller_in_audience = match usage {
        TokenUsage::AccessToken | TokenUsage::IdToken => {
            let audiences = ticket.audiences();
            if audiences.is_empty() {
                true
            } else {
                caller
                    .as_deref()
                    .is_some_and(|caller| audiences.contains(&caller))
            }
        }
        TokenUsage::RefreshToken => match ticket.properties.get(items::CLIENT_ID) {
            Some(owner) => caller.as_deref() == Some(owner),
            None => true,
        },
        TokenUsage::Code => false,
    };
    if !caller_in_audience {
        return finish(server, inactive()).await;
    }

    finish(server, active(&ticket, usage, &issuer)).await
}

/// Resolves the token against each kind, honoring the hint first and then
/// falling back to the access, identity, refresh order.
async fn lookup<P: ServerProvider>(
    server: &OidcServer<P>,
    message: &ProtocolMessage,
    token: &str,
    issuer: &str,
) -> Option<(AuthenticationTicket, TokenUsage)> {
    let mut order = Vec::with_capacity(3);
    match message.token_type_hint() {
        Some("access_token") => order.push(TokenUsage::AccessToken),
        Some("id_token") => order.push(TokenUsage::IdToken),
        Some("refresh_token") => order.push(TokenUsage::RefreshToken),
        _ => {}
    }
    for kind in [
        TokenUsage::AccessToken,
        TokenUsage::IdToken,
        TokenUsage::RefreshToken,
    ] {
        if !order.contains(&kind) {
            order.push(kind);
        }
    }

    for kind in order {
        let ticket = match kind {
            TokenUsage::AccessToken => server.tokens.deserialize_access_token(token, issuer),
            TokenUsage::IdToken => server.tokens.deserialize_identity_token(token, issuer),
            TokenUsage::RefreshToken => server.tokens.deserialize_refresh_token(token),
            TokenUsage::Code => None,
        };
        if let Some(ticket) = ticket {
            return Some((ticket, kind));
        }
    }
    None
}

fn inactive() -> Map<String, Value> {
    let mut payload = Map::new();
    payload.insert("active".to_string(), json!(false));
    payload
}

fn active(ticket: &AuthenticationTicket, usage: TokenUsage, issuer: &str) -> Map<String, Value> {
    let mut payload = Map::new();
    payload.insert("active".to_string(), json!(true));
    payload.insert(claims::ISS.to_string(), json!(issuer));

    if let Some(subject) = ticket.principal.subject() {
        payload.insert(claims::SUB.to_string(), json!(subject));
    }
    let audiences = ticket.audiences();
    if !audiences.is_empty() {
        payload.insert(claims::AUD.to_string(), json!(audiences));
    }
    if let Some(issued) = ticket.properties.issued_utc {
        payload.insert(claims::IAT.to_string(), json!(issued.timestamp()));
        payload.insert(claims::NBF.to_string(), json!(issued.timestamp()));
    }
    if let Some(expires) = ticket.properties.expires_utc {
        payload.insert(claims::EXP.to_string(), json!(expires.timestamp()));
    }
    if usage == TokenUsage::AccessToken {
        payload.insert("token_type".to_string(), json!("Bearer"));
    }
    if let Some(username) = ticket.principal.find(claims::NAME) {
        payload.insert("username".to_string(), json!(username));
    }
    if let Some(scope) = ticket.properties.get(items::SCOPE) {
        payload.insert(claims::SCOPE.to_string(), json!(scope));
    }

    // The audience checks have passed, so the remaining claims may be
    // shared with the caller.
    for claim in &ticket.principal.claims {
        if claim.kind == claims::SUB || claim.kind == claims::NAME_IDENTIFIER {
            continue;
        }
        payload
            .entry(claim.kind.clone())
            .or_insert_with(|| json!(claim.value));
    }

    payload
}

async fn finish<P: ServerProvider>(
    server: &OidcServer<P>,
    payload: Map<String, Value>,
) -> Result<Response, Request<Body>> {
    let mut ctx = PayloadResponseContext::new(Endpoint::Validation, payload);
    server.provider.validation_endpoint_response(&mut ctx).await;
    let payload = std::mem::take(&mut ctx.payload);
    if let RequestControl::Handled(response) = ctx.into_control() {
        return Ok(response);
    }
    Ok(response::json_payload(StatusCode::OK, &payload))
}
