//! Logout (end session) endpoint.
//!
//! Validates the optional `post_logout_redirect_uri` and hands the
//! request to the host, which performs the actual sign-out and calls
//! [`crate::OidcServer::sign_out`] to produce the final redirect.

use axum::body::Body;
use axum::http::Request;
use axum::response::Response;

use crate::endpoints::{decoder, response};
use crate::error::ErrorPayload;
use crate::message::{ProtocolMessage, RequestType};
use crate::provider::{
    EndpointContext, RequestControl, ServerProvider, ValidateClientLogoutRedirectUriContext,
    Validation,
};
use crate::server::{LogoutContext, OidcServer};
use crate::types::{params, Endpoint};

/// Handles the logout endpoint.
pub(crate) async fn invoke<P: ServerProvider>(
    server: &OidcServer<P>,
    request: Request<Body>,
) -> Result<Response, Request<Body>> {
    let (parts, body) = request.into_parts();

    if !server.options.allow_insecure_http && !server.is_secure(&parts) {
        return Ok(response::native_error_page(
            &ErrorPayload::new("invalid_request")
                .with_description("this server only accepts HTTPS requests"),
        ));
    }

    let mut message = match decoder::decode_request(&parts, body, RequestType::LogoutRequest).await
    {
        Ok(message) => message,
        Err(error) => return Ok(response::native_error_page(&error.to_payload())),
    };

    // Open-redirect protection: the host must vouch for the target. The
    // hook runs once; the validated (possibly rewritten) URI is stored
    // back on the message and consumed as-is by sign_out.
    if let Some(candidate) = message.post_logout_redirect_uri().map(ToString::to_string) {
        let mut ctx = ValidateClientLogoutRedirectUriContext::new(candidate);
        server
            .provider
            .validate_client_logout_redirect_uri(&mut ctx)
            .await;
        let outcome = ctx.outcome().clone();
        match outcome {
            Validation::Validated => {
                message.set(params::POST_LOGOUT_REDIRECT_URI, ctx.post_logout_redirect_uri);
            }
            Validation::Rejected(payload) => {
                return Ok(response::native_error_page(&payload));
            }
            Validation::Skipped => {
                return Ok(response::native_error_page(
                    &ErrorPayload::new("invalid_request").with_description(
                        "the post_logout_redirect_uri was not validated by the application",
                    ),
                ));
            }
        }
    }

    let mut ctx = EndpointContext::new(Endpoint::Logout, message);
    server.provider.logout_endpoint(&mut ctx).await;
    let message =
        std::mem::replace(&mut ctx.message, ProtocolMessage::new(RequestType::LogoutRequest));
    match ctx.into_control() {
        RequestControl::Handled(response) => Ok(response),
        RequestControl::Skipped => Err(Request::from_parts(parts, Body::empty())),
        RequestControl::Continue => {
            // The host signs the user out and calls sign_out.
            let mut request = Request::from_parts(parts, Body::empty());
            request.extensions_mut().insert(LogoutContext { message });
            Err(request)
        }
    }
}
