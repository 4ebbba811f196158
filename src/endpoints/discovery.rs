//! Discovery endpoints: provider configuration and JWKS.

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::response::Response;
use serde_json::Value;

use crate::discovery::ProviderMetadata;
use crate::endpoints::response;
use crate::error::ErrorPayload;
use crate::jwks::JsonWebKeySet;
use crate::provider::{
    ConfigurationEndpointContext, CryptographyEndpointContext, RequestControl, ServerProvider,
};
use crate::server::OidcServer;

/// Handles `GET /.well-known/openid-configuration`.
pub(crate) async fn invoke_configuration<P: ServerProvider>(
    server: &OidcServer<P>,
    request: Request<Body>,
) -> Result<Response, Request<Body>> {
    let (parts, _body) = request.into_parts();

    if let Some(rejection) = reject_non_get(server, &parts) {
        return Ok(rejection);
    }

    let issuer = server.issuer(&parts);
    let metadata = ProviderMetadata::from_options(&server.options, &issuer);

    let mut ctx = ConfigurationEndpointContext::new(metadata);
    server.provider.configuration_endpoint(&mut ctx).await;
    let metadata = ctx.metadata.clone();
    match ctx.into_control() {
        RequestControl::Handled(response) => return Ok(response),
        RequestControl::Skipped => return Err(Request::from_parts(parts, Body::empty())),
        RequestControl::Continue => {}
    }

    let value = serde_json::to_value(&metadata).unwrap_or(Value::Null);
    Ok(response::json_value(StatusCode::OK, &value))
}

/// Handles `GET /.well-known/jwks`.
pub(crate) async fn invoke_cryptography<P: ServerProvider>(
    server: &OidcServer<P>,
    request: Request<Body>,
) -> Result<Response, Request<Body>> {
    let (parts, _body) = request.into_parts();

    if let Some(rejection) = reject_non_get(server, &parts) {
        return Ok(rejection);
    }

    let keys = JsonWebKeySet::from_credentials(&server.options.signing_credentials);

    let mut ctx = CryptographyEndpointContext::new(keys);
    server.provider.cryptography_endpoint(&mut ctx).await;
    let keys = ctx.keys.clone();
    match ctx.into_control() {
        RequestControl::Handled(response) => return Ok(response),
        RequestControl::Skipped => return Err(Request::from_parts(parts, Body::empty())),
        RequestControl::Continue => {}
    }

    let value = serde_json::to_value(&keys).unwrap_or(Value::Null);
    Ok(response::json_value(StatusCode::OK, &value))
}

fn reject_non_get<P: ServerProvider>(
    server: &OidcServer<P>,
    parts: &axum::http::request::Parts,
) -> Option<Response> {
    if !server.options.allow_insecure_http && !server.is_secure(parts) {
        return Some(response::json_error(
            &ErrorPayload::new("invalid_request")
                .with_description("this server only accepts HTTPS requests"),
        ));
    }
    if parts.method != Method::GET {
        return Some(response::json_error(
            &ErrorPayload::new("invalid_request")
                .with_description("this endpoint only accepts GET requests"),
        ));
    }
    None
}
