//! Token endpoint and grant engine.
//!
//! Dispatches `grant_type` to the matching handler, reconciles the token
//! request against the stored ticket (client identity, redirect URI echo,
//! scope and resource narrowing), runs the provider grant hooks, and
//! composes the token response.

use axum::body::Body;
use axum::http::request::Parts;
use axum::http::{header, Method, Request, StatusCode};
use axum::response::Response;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde_json::{json, Map};
use std::collections::HashSet;

use crate::endpoints::{decoder, response};
use crate::error::ErrorPayload;
use crate::message::{ProtocolMessage, RequestType};
use crate::provider::{
    EndpointContext, GrantContext, PayloadResponseContext, RequestControl, ServerProvider,
    ValidateClientAuthenticationContext, ValidateTokenRequestContext,
};
use crate::server::{expires_in_seconds, OidcServer};
use crate::ticket::{items, AuthenticationTicket};
use crate::types::{params, scopes, Endpoint, GrantType, TokenUsage};

/// Client credentials recovered from the form body or `Authorization`
/// header.
#[derive(Debug, Default)]
pub(crate) struct ClientCredentials {
    pub(crate) client_id: Option<String>,
    pub(crate) client_secret: Option<String>,
}

/// Handles the token endpoint.
pub(crate) async fn invoke<P: ServerProvider>(
    server: &OidcServer<P>,
    request: Request<Body>,
) -> Result<Response, Request<Body>> {
    let (parts, body) = request.into_parts();

    if !server.options.allow_insecure_http && !server.is_secure(&parts) {
        return Ok(reject(
            ErrorPayload::new("invalid_request")
                .with_description("this server only accepts HTTPS requests"),
        ));
    }

    if parts.method != Method::POST {
        return Ok(reject(
            ErrorPayload::new("invalid_request")
                .with_description("the token request must use the POST method"),
        ));
    }

    let message = match decoder::decode_form(&parts, body, RequestType::TokenRequest).await {
        Ok(message) => message,
        Err(error) => return Ok(reject(error.to_payload())),
    };

    let mut ctx = EndpointContext::new(Endpoint::Token, message);
    server.provider.token_endpoint(&mut ctx).await;
    let message = std::mem::replace(&mut ctx.message, ProtocolMessage::new(RequestType::TokenRequest));
    match ctx.into_control() {
        RequestControl::Handled(response) => return Ok(response),
        RequestControl::Skipped => return Err(Request::from_parts(parts, Body::empty())),
        RequestControl::Continue => {}
    }

    match process(server, &parts, message).await {
        Ok(response) => Ok(response),
        Err(payload) => Ok(reject(payload)),
    }
}

async fn process<P: ServerProvider>(
    server: &OidcServer<P>,
    parts: &Parts,
    message: ProtocolMessage,
) -> Result<Response, ErrorPayload> {
    let Some(grant_type) = message.grant_type().map(ToString::to_string) else {
        return Err(ErrorPayload::new("invalid_request")
            .with_description("the mandatory grant_type parameter was missing"));
    };

    validate_grant_parameters(&grant_type, &message)?;

    let credentials = extract_client_credentials(&message, parts)?;
    let mut ctx = ValidateClientAuthenticationContext::new(
        credentials.client_id,
        credentials.client_secret,
    );
    server.provider.validate_client_authentication(&mut ctx).await;
    let client_authenticated = ctx.outcome().is_validated();
    if let Some(payload) = ctx.outcome().rejection().cloned() {
        return Err(payload);
    }
    let client_id = ctx.client_id.clone();

    if grant_type == "client_credentials" && !client_authenticated {
        return Err(ErrorPayload::new("invalid_client").with_description(
            "client authentication is required for the client_credentials grant",
        ));
    }

    let now = server.options.clock.utc_now();
    let issuer = server.issuer(parts);

    // Resolve the grant to a ticket; unknown types go to the custom hook.
    let grant: Option<GrantType> = grant_type.parse().ok();
    let mut source_expiry: Option<DateTime<Utc>> = None;
    let input_ticket = match grant {
        Some(GrantType::AuthorizationCode) => {
            Some(code_grant(server, &message, client_id.as_deref(), now).await?)
        }
        Some(GrantType::RefreshToken) => {
            let ticket = refresh_grant(
                server,
                &message,
                client_id.as_deref(),
                client_authenticated,
                now,
            )?;
            source_expiry = ticket.properties.expires_utc;
            Some(ticket)
        }
        _ => None,
    };

    let mut ctx = ValidateTokenRequestContext::new(message.clone(), client_id.clone());
    server.provider.validate_token_request(&mut ctx).await;
    if let Some(payload) = ctx.outcome().rejection().cloned() {
        return Err(payload);
    }

    let input_times = input_ticket
        .as_ref()
        .map(|t| (t.properties.issued_utc, t.properties.expires_utc));

    let mut ctx = match &input_ticket {
        Some(ticket) => GrantContext::with_ticket(message.clone(), ticket.clone()),
        None => GrantContext::empty(message.clone()),
    };
    match grant {
        Some(GrantType::AuthorizationCode) => {
            server.provider.grant_authorization_code(&mut ctx).await;
        }
        Some(GrantType::RefreshToken) => server.provider.grant_refresh_token(&mut ctx).await,
        Some(GrantType::Password) => {
            server.provider.grant_resource_owner_credentials(&mut ctx).await;
        }
        Some(GrantType::ClientCredentials) => {
            server.provider.grant_client_credentials(&mut ctx).await;
        }
        None => server.provider.grant_custom_extension(&mut ctx).await,
    }

    if let Some(payload) = ctx.outcome().rejection().cloned() {
        return Err(payload);
    }
    let validated = ctx.outcome().is_validated();
    let mut ticket = match (validated, ctx.ticket) {
        (true, Some(ticket)) => ticket,
        _ => return Err(default_grant_error(grant)),
    };

    // A grant handler that left the lifetimes untouched gets fresh ones.
    if let Some((issued, expires)) = input_times {
        if ticket.properties.issued_utc == issued && ticket.properties.expires_utc == expires {
            ticket.properties.issued_utc = None;
            ticket.properties.expires_utc = None;
        }
    }

    if client_authenticated {
        ticket.set_confidential();
    }
    if let Some(client_id) = &client_id {
        if ticket.properties.get(items::CLIENT_ID).is_none() {
            ticket.properties.set(items::CLIENT_ID, client_id.clone());
        }
    }

    compose_response(server, &message, &ticket, grant, source_expiry, &issuer, now).await
}

/// Grant-specific mandatory parameters.
fn validate_grant_parameters(
    grant_type: &str,
    message: &ProtocolMessage,
) -> Result<(), ErrorPayload> {
    let missing = |name: &str| {
        ErrorPayload::new("invalid_request")
            .with_description(format!("the mandatory {name} parameter was missing"))
    };

    if grant_type == "authorization_code" && message.code().is_none() {
        return Err(missing(params::CODE));
    }
    if grant_type == "refresh_token" && message.refresh_token().is_none() {
        return Err(missing(params::REFRESH_TOKEN));
    }
    if grant_type == "password" {
        if message.username().is_none() {
            return Err(missing(params::USERNAME));
        }
        if message.password().is_none() {
            return Err(missing(params::PASSWORD));
        }
    }
    Ok(())
}

/// Reads client credentials from the form, falling back to HTTP Basic.
pub(crate) fn extract_client_credentials(
    message: &ProtocolMessage,
    parts: &Parts,
) -> Result<ClientCredentials, ErrorPayload> {
    if message.client_id().is_some() {
        return Ok(ClientCredentials {
            client_id: message.client_id().map(ToString::to_string),
            client_secret: message.client_secret().map(ToString::to_string),
        });
    }

    let Some(authorization) = parts.headers.get(header::AUTHORIZATION) else {
        return Ok(ClientCredentials::default());
    };

    let invalid = || {
        ErrorPayload::new("invalid_client")
            .with_description("the client credentials in the Authorization header are malformed")
    };

    let value = authorization.to_str().map_err(|_| invalid())?;
    let Some(encoded) = value.strip_prefix("Basic ") else {
        return Ok(ClientCredentials::default());
    };

    let decoded = STANDARD.decode(encoded.trim()).map_err(|_| invalid())?;
    let decoded = String::from_utf8(decoded).map_err(|_| invalid())?;
    let (client_id, client_secret) = decoded.split_once(':').ok_or_else(invalid)?;

    Ok(ClientCredentials {
        client_id: Some(client_id.to_string()),
        client_secret: Some(client_secret.to_string()),
    })
}

/// Redeems an authorization code.
async fn code_grant<P: ServerProvider>(
    server: &OidcServer<P>,
    message: &ProtocolMessage,
    client_id: Option<&str>,
    now: DateTime<Utc>,
) -> Result<AuthenticationTicket, ErrorPayload> {
    let code = message.code().unwrap_or_default();

    let mut ticket = server
        .tokens
        .deserialize_code(code)
        .await
        .map_err(|error| {
            tracing::error!(%error, "authorization code lookup failed");
            error.to_payload()
        })?
        .ok_or_else(|| {
            ErrorPayload::new("invalid_grant")
                .with_description("the authorization code is invalid")
        })?;

    if ticket.is_expired(now) {
        return Err(ErrorPayload::new("invalid_grant")
            .with_description("the authorization code has expired"));
    }

    // The code grant requires the client identity on both sides.
    let stored_client = ticket.properties.get(items::CLIENT_ID).map(ToString::to_string);
    match (stored_client, client_id) {
        (Some(stored), Some(requested)) if stored == requested => {}
        _ => {
            return Err(ErrorPayload::new("invalid_grant").with_description(
                "the authorization code was not issued to this client application",
            ));
        }
    }

    if let Some(original) = ticket.properties.get(items::REDIRECT_URI).map(ToString::to_string) {
        if message.redirect_uri() != Some(original.as_str()) {
            return Err(ErrorPayload::new("invalid_grant")
                .with_description("the redirect_uri parameter does not match"));
        }
    }

    narrow_grant(&mut ticket, message)?;
    Ok(ticket)
}

/// Redeems a refresh token.
fn refresh_grant<P: ServerProvider>(
    server: &OidcServer<P>,
    message: &ProtocolMessage,
    client_id: Option<&str>,
    client_authenticated: bool,
    now: DateTime<Utc>,
) -> Result<AuthenticationTicket, ErrorPayload> {
    let refresh_token = message.refresh_token().unwrap_or_default();

    let mut ticket = server
        .tokens
        .deserialize_refresh_token(refresh_token)
        .ok_or_else(|| {
            ErrorPayload::new("invalid_grant").with_description("the refresh token is invalid")
        })?;

    if ticket.is_expired(now) {
        return Err(
            ErrorPayload::new("invalid_grant").with_description("the refresh token has expired")
        );
    }

    if ticket.is_confidential() && !client_authenticated {
        return Err(ErrorPayload::new("invalid_grant").with_description(
            "client authentication is required to redeem this refresh token",
        ));
    }

    if let (Some(stored), Some(requested)) =
        (ticket.properties.get(items::CLIENT_ID), client_id)
    {
        if stored != requested {
            return Err(ErrorPayload::new("invalid_grant").with_description(
                "the refresh token was not issued to this client application",
            ));
        }
    }

    narrow_grant(&mut ticket, message)?;
    Ok(ticket)
}

/// Applies scope and resource narrowing: explicit values on the token
/// request must be subsets of the ticket's originals and replace them.
fn narrow_grant(
    ticket: &mut AuthenticationTicket,
    message: &ProtocolMessage,
) -> Result<(), ErrorPayload> {
    if let Some(requested) = message.resource() {
        let granted: HashSet<&str> = ticket
            .properties
            .get(items::RESOURCE)
            .map(|value| value.split_whitespace().collect())
            .unwrap_or_default();
        let requested_set: HashSet<&str> = requested.split_whitespace().collect();
        if !requested_set.is_subset(&granted) {
            return Err(ErrorPayload::new("invalid_grant")
                .with_description("the resource parameter exceeds the granted resources"));
        }
        ticket.properties.set(items::RESOURCE, requested);
        ticket.properties.set(items::AUDIENCES, requested);
    }

    if let Some(requested) = message.scope() {
        let granted: HashSet<&str> = ticket
            .properties
            .get(items::SCOPE)
            .map(|value| value.split_whitespace().collect())
            .unwrap_or_default();
        let requested_set: HashSet<&str> = requested.split_whitespace().collect();
        if !requested_set.is_subset(&granted) {
            return Err(ErrorPayload::new("invalid_grant")
                .with_description("the scope parameter exceeds the granted scopes"));
        }
        ticket.properties.set(items::SCOPE, requested);
    }

    Ok(())
}

fn default_grant_error(grant: Option<GrantType>) -> ErrorPayload {
    match grant {
        Some(GrantType::Password) => ErrorPayload::new("invalid_grant")
            .with_description("the resource owner credentials were not validated"),
        Some(GrantType::ClientCredentials) => ErrorPayload::new("invalid_grant")
            .with_description("the client credentials were not validated"),
        Some(GrantType::AuthorizationCode | GrantType::RefreshToken) => {
            ErrorPayload::new("invalid_grant")
                .with_description("the authorization grant was rejected")
        }
        None => ErrorPayload::new("unsupported_grant_type")
            .with_description("the specified grant_type is not supported"),
    }
}

/// Issues the granted tokens and serializes the response payload.
async fn compose_response<P: ServerProvider>(
    server: &OidcServer<P>,
    message: &ProtocolMessage,
    ticket: &AuthenticationTicket,
    grant: Option<GrantType>,
    source_expiry: Option<DateTime<Utc>>,
    issuer: &str,
    now: DateTime<Utc>,
) -> Result<Response, ErrorPayload> {
    let requested_types: Vec<&str> = message
        .response_type()
        .map(|value| value.split_whitespace().collect())
        .unwrap_or_default();
    let omitted = requested_types.is_empty();
    let requested = |kind: &str| omitted || requested_types.contains(&kind);

    let scope = ticket.properties.get(items::SCOPE).unwrap_or_default();
    let scopes: Vec<&str> = scope.split_whitespace().collect();

    let issue_access = requested("token");
    let issue_identity = scopes.contains(&scopes::OPENID) && requested("id_token");
    let issue_refresh = scopes.contains(&scopes::OFFLINE_ACCESS) && requested("refresh_token");

    // With sliding expiration disabled, nothing minted from a refresh
    // token outlives it.
    let cap = |candidate: &mut AuthenticationTicket| {
        if grant == Some(GrantType::RefreshToken) && !server.options.use_sliding_expiration {
            if let (Some(expires), Some(source)) =
                (candidate.properties.expires_utc, source_expiry)
            {
                if expires > source {
                    candidate.properties.expires_utc = Some(source);
                }
            }
        }
    };

    let mut payload = Map::new();
    let mut access_value: Option<String> = None;

    if issue_access {
        let mut access = ticket.clone();
        server.tokens.stamp(&mut access, TokenUsage::AccessToken, now);
        cap(&mut access);
        let value = server
            .tokens
            .serialize_access_token(&access, issuer)
            .map_err(|error| server_error(&error))?;
        payload.insert(params::ACCESS_TOKEN.to_string(), json!(value));
        payload.insert(params::TOKEN_TYPE.to_string(), json!("Bearer"));
        if let Some(expires_in) = expires_in_seconds(access.properties.expires_utc, now) {
            payload.insert(params::EXPIRES_IN.to_string(), json!(expires_in));
        }
        access_value = Some(value);
    }

    if issue_refresh {
        let mut refresh = ticket.clone();
        server.tokens.stamp(&mut refresh, TokenUsage::RefreshToken, now);
        cap(&mut refresh);
        let value = server
            .tokens
            .serialize_refresh_token(&refresh)
            .map_err(|error| server_error(&error))?;
        payload.insert(params::REFRESH_TOKEN.to_string(), json!(value));
    }

    if issue_identity {
        let mut identity = ticket.clone();
        server.tokens.stamp(&mut identity, TokenUsage::IdToken, now);
        cap(&mut identity);
        let value = server
            .tokens
            .serialize_identity_token(&identity, issuer, None, access_value.as_deref())
            .map_err(|error| server_error(&error))?;
        payload.insert(params::ID_TOKEN.to_string(), json!(value));
    }

    if !scope.is_empty() {
        payload.insert(params::SCOPE.to_string(), json!(scope));
    }
    if let Some(resource) = ticket.properties.get(items::RESOURCE) {
        payload.insert(params::RESOURCE.to_string(), json!(resource));
    }

    let mut ctx = PayloadResponseContext::new(Endpoint::Token, payload);
    server.provider.token_endpoint_response(&mut ctx).await;
    let payload = std::mem::take(&mut ctx.payload);
    if let RequestControl::Handled(response) = ctx.into_control() {
        return Ok(response);
    }

    Ok(response::json_payload(StatusCode::OK, &payload))
}

fn server_error(error: &crate::error::OidcError) -> ErrorPayload {
    tracing::error!(%error, "token serialization failed");
    error.to_payload()
}

fn reject(payload: ErrorPayload) -> Response {
    response::json_error(&payload)
}
