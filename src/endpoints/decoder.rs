//! Request decoding.
//!
//! Turns the raw HTTP request into a [`ProtocolMessage`]: query-string
//! parsing for GET, form parsing for POST with the form content type, and
//! the continuation-cache overlay for authorization requests resumed by
//! `unique_id`.

use axum::body::Body;
use axum::http::request::Parts;
use axum::http::{header, Method};

use crate::error::{OidcError, OidcResult};
use crate::message::{ProtocolMessage, RequestType};

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Body read cap; protocol messages are small.
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Checks whether the request carries a form content type, allowing a
/// trailing `; charset=...` and ignoring case.
#[must_use]
pub fn has_form_content_type(parts: &Parts) -> bool {
    parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| {
            value
                .to_ascii_lowercase()
                .starts_with(FORM_CONTENT_TYPE)
        })
}

/// Decodes the query string into a protocol message.
#[must_use]
pub fn decode_query(parts: &Parts, request_type: RequestType) -> ProtocolMessage {
    let query = parts.uri.query().unwrap_or_default();
    let pairs = url::form_urlencoded::parse(query.as_bytes());
    ProtocolMessage::from_pairs(request_type, pairs)
}

/// Reads and decodes a form body into a protocol message.
///
/// # Errors
///
/// Returns `invalid_request` when the content type is not a form or the
/// body cannot be read.
pub async fn decode_form(
    parts: &Parts,
    body: Body,
    request_type: RequestType,
) -> OidcResult<ProtocolMessage> {
    if !has_form_content_type(parts) {
        return Err(OidcError::InvalidRequest(
            "a malformed request has been received: the mandatory \
             'Content-Type' header was missing or invalid"
                .to_string(),
        ));
    }

    let bytes = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|_| OidcError::InvalidRequest("the request body could not be read".to_string()))?;

    let pairs = url::form_urlencoded::parse(&bytes);
    Ok(ProtocolMessage::from_pairs(request_type, pairs))
}

/// Decodes a GET-or-POST endpoint request.
///
/// # Errors
///
/// Returns `invalid_request` for other methods or malformed POST bodies.
pub async fn decode_request(
    parts: &Parts,
    body: Body,
    request_type: RequestType,
) -> OidcResult<ProtocolMessage> {
    match parts.method {
        Method::GET => Ok(decode_query(parts, request_type)),
        Method::POST => decode_form(parts, body, request_type).await,
        _ => Err(OidcError::InvalidRequest(
            "a malformed request has been received: make sure to use either GET or POST"
                .to_string(),
        )),
    }
}
