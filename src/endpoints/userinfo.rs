//! Userinfo (profile) endpoint.
//!
//! Accepts the access token from the `access_token` form or query
//! parameter or from an `Authorization: Bearer` header, and returns the
//! claims the granted scopes allow.

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use serde_json::{json, Map, Value};

use crate::endpoints::{decoder, response};
use crate::error::ErrorPayload;
use crate::message::{ProtocolMessage, RequestType};
use crate::provider::{
    EndpointContext, PayloadResponseContext, RequestControl, ServerProvider,
};
use crate::server::OidcServer;
use crate::ticket::{items, AuthenticationTicket};
use crate::types::{claims, scopes, Endpoint};

/// Handles the userinfo endpoint.
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

    let mut ctx = EndpointContext::new(Endpoint::Profile, message);
    server.provider.profile_endpoint(&mut ctx).await;
    let message =
        std::mem::replace(&mut ctx.message, ProtocolMessage::new(RequestType::TokenRequest));
    match ctx.into_control() {
        RequestControl::Handled(response) => return Ok(response),
        RequestControl::Skipped => return Err(Request::from_parts(parts, Body::empty())),
        RequestControl::Continue => {}
    }

    let token = message
        .access_token()
        .map(ToString::to_string)
        .or_else(|| bearer_token(&parts));
    let Some(token) = token else {
        return Ok(response::json_error(
            &ErrorPayload::new("invalid_request")
                .with_description("the mandatory access_token parameter was missing"),
        ));
    };

    let issuer = server.issuer(&parts);
    let Some(ticket) = server.tokens.deserialize_access_token(&token, &issuer) else {
        return Ok(response::json_error(
            &ErrorPayload::new("invalid_grant").with_description("the access token is invalid"),
        ));
    };

    let now = server.options.clock.utc_now();
    if ticket.is_expired(now) {
        return Ok(response::json_error(
            &ErrorPayload::new("invalid_grant").with_description("the access token has expired"),
        ));
    }

    let Some(subject) = ticket.principal.subject() else {
        tracing::error!("access token ticket carries no subject claim");
        return Ok(response::json_error(
            &ErrorPayload::new("server_error")
                .with_description("the access token is not associated with a subject"),
        ));
    };

    let payload = profile_payload(&ticket, subject);

    let mut ctx = PayloadResponseContext::new(Endpoint::Profile, payload);
    server.provider.profile_endpoint_response(&mut ctx).await;
    let payload = std::mem::take(&mut ctx.payload);
    if let RequestControl::Handled(response) = ctx.into_control() {
        return Ok(response);
    }

    Ok(response::json_payload(StatusCode::OK, &payload))
}

/// Extracts a bearer token from the `Authorization` header.
fn bearer_token(parts: &axum::http::request::Parts) -> Option<String> {
    parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
}

/// Builds the scope-gated claims payload.
fn profile_payload(ticket: &AuthenticationTicket, subject: &str) -> Map<String, Value> {
    let granted: Vec<&str> = ticket
        .properties
        .get(items::SCOPE)
        .map(|scope| scope.split_whitespace().collect())
        .unwrap_or_default();

    let mut payload = Map::new();
    payload.insert(claims::SUB.to_string(), json!(subject));

    let mut copy = |claim: &str| {
        if let Some(value) = ticket.principal.find(claim) {
            payload.insert(claim.to_string(), json!(value));
        }
    };

    if granted.contains(&scopes::PROFILE) {
        copy(claims::FAMILY_NAME);
        copy(claims::GIVEN_NAME);
        copy(claims::BIRTHDATE);
    }
    if granted.contains(&scopes::EMAIL) {
        copy(claims::EMAIL);
    }
    if granted.contains(&scopes::PHONE) {
        copy(claims::PHONE_NUMBER);
    }

    payload
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ticket::{AuthenticationProperties, Claim, ClaimsPrincipal};

    fn ticket(scope: &str) -> AuthenticationTicket {
        let mut properties = AuthenticationProperties::new();
        properties.set(items::SCOPE, scope);
        let mut principal = ClaimsPrincipal::with_subject("user-1");
        principal.push(Claim::new(claims::FAMILY_NAME, "Doe"));
        principal.push(Claim::new(claims::GIVEN_NAME, "Jane"));
        principal.push(Claim::new(claims::BIRTHDATE, "1990-01-01"));
        principal.push(Claim::new(claims::EMAIL, "jane@example.com"));
        principal.push(Claim::new(claims::PHONE_NUMBER, "+1-555-0100"));
        AuthenticationTicket::new(principal, properties, "oidc-server")
    }

    #[test]
    fn profile_scope_gates_name_claims() {
        let payload = profile_payload(&ticket("openid profile"), "user-1");
        assert_eq!(payload.get("sub"), Some(&json!("user-1")));
        assert_eq!(payload.get("family_name"), Some(&json!("Doe")));
        assert_eq!(payload.get("given_name"), Some(&json!("Jane")));
        assert_eq!(payload.get("birthdate"), Some(&json!("1990-01-01")));
        assert!(payload.get("email").is_none());
        assert!(payload.get("phone_number").is_none());
    }

    #[test]
    fn email_and_phone_scopes() {
        let payload = profile_payload(&ticket("openid email phone"), "user-1");
        assert_eq!(payload.get("email"), Some(&json!("jane@example.com")));
        assert_eq!(payload.get("phone_number"), Some(&json!("+1-555-0100")));
        assert!(payload.get("family_name").is_none());
    }

    #[test]
    fn bare_openid_scope_yields_subject_only() {
        let payload = profile_payload(&ticket("openid"), "user-1");
        assert_eq!(payload.len(), 1);
        assert_eq!(payload.get("sub"), Some(&json!("user-1")));
    }
}
