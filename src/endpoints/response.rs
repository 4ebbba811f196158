//! Response rendering.
//!
//! Authorization responses travel back to the client through one of three
//! response modes; protocol errors render as JSON bodies, redirect
//! parameters, or the native plain-text page depending on the endpoint.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::{Map, Value};

use crate::error::ErrorPayload;
use crate::types::ResponseMode;

const JSON_CONTENT_TYPE: &str = "application/json;charset=UTF-8";
const HTML_CONTENT_TYPE: &str = "text/html;charset=UTF-8";
const TEXT_CONTENT_TYPE: &str = "text/plain;charset=UTF-8";

/// Renders an authorization response in the given mode.
#[must_use]
pub fn render(mode: ResponseMode, redirect_uri: &str, parameters: &[(String, String)]) -> Response {
    match mode {
        ResponseMode::Query => render_query(redirect_uri, parameters),
        ResponseMode::Fragment => render_fragment(redirect_uri, parameters),
        ResponseMode::FormPost => render_form_post(redirect_uri, parameters),
    }
}

/// Appends URL-encoded parameters to the redirect URI query; 302.
#[must_use]
pub fn render_query(redirect_uri: &str, parameters: &[(String, String)]) -> Response {
    let mut location = redirect_uri.to_string();
    let mut separator = if redirect_uri.contains('?') { '&' } else { '?' };
    for (name, value) in parameters {
        location.push(separator);
        location.push_str(&urlencoding::encode(name));
        location.push('=');
        location.push_str(&urlencoding::encode(value));
        separator = '&';
    }
    found(&location)
}

/// Appends parameters after a `#` delimiter, switching to `&` after the
/// first parameter; 302.
#[must_use]
pub fn render_fragment(redirect_uri: &str, parameters: &[(String, String)]) -> Response {
    let mut location = redirect_uri.to_string();
    let mut separator = '#';
    for (name, value) in parameters {
        location.push(separator);
        location.push_str(&urlencoding::encode(name));
        location.push('=');
        location.push_str(&urlencoding::encode(value));
        separator = '&';
    }
    found(&location)
}

/// Renders an auto-submitting HTML form posting to the redirect URI.
#[must_use]
pub fn render_form_post(redirect_uri: &str, parameters: &[(String, String)]) -> Response {
    let fields: String = parameters
        .iter()
        .map(|(name, value)| {
            format!(
                r#"<input type="hidden" name="{}" value="{}" />"#,
                html_escape(name),
                html_escape(value)
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    let html = format!(
        r#"<!doctype html>
<html>
<head><title>Working...</title></head>
<body onload="document.forms[0].submit()">
<form method="post" action="{}">
{}
<noscript><button type="submit">Continue</button></noscript>
</form>
</body>
</html>"#,
        html_escape(redirect_uri),
        fields
    );

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, HTML_CONTENT_TYPE)],
        html,
    )
        .into_response()
}

/// 302 redirect to the given location.
#[must_use]
pub fn found(location: &str) -> Response {
    (
        StatusCode::FOUND,
        [(header::LOCATION, location.to_string())],
        (),
    )
        .into_response()
}

/// Serializes a JSON payload with the protocol cache headers.
#[must_use]
pub fn json_payload(status: StatusCode, payload: &Map<String, Value>) -> Response {
    let body = serde_json::to_string(payload).unwrap_or_else(|_| "{}".to_string());
    (
        status,
        [
            (header::CONTENT_TYPE, JSON_CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache"),
            (header::PRAGMA, "no-cache"),
            (header::EXPIRES, "-1"),
        ],
        body,
    )
        .into_response()
}

/// Serializes any JSON value with the protocol cache headers.
#[must_use]
pub fn json_value(status: StatusCode, value: &Value) -> Response {
    let body = serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string());
    (
        status,
        [
            (header::CONTENT_TYPE, JSON_CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache"),
            (header::PRAGMA, "no-cache"),
            (header::EXPIRES, "-1"),
        ],
        body,
    )
        .into_response()
}

/// JSON error body; 400 for protocol errors, 500 for internal failures.
#[must_use]
pub fn json_error(payload: &ErrorPayload) -> Response {
    let status = if payload.error == "server_error" {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::BAD_REQUEST
    };
    let value = serde_json::to_value(payload).unwrap_or_else(|_| Value::Null);
    json_value(status, &value)
}

/// The native plain-text error page: one `key: value` line per response
/// parameter, 400.
#[must_use]
pub fn native_error_page(payload: &ErrorPayload) -> Response {
    let mut body = format!("error: {}\n", payload.error);
    if let Some(description) = &payload.error_description {
        body.push_str(&format!("error_description: {description}\n"));
    }
    if let Some(uri) = &payload.error_uri {
        body.push_str(&format!("error_uri: {uri}\n"));
    }

    (
        StatusCode::BAD_REQUEST,
        [(header::CONTENT_TYPE, TEXT_CONTENT_TYPE)],
        body,
    )
        .into_response()
}

/// Builds the ordered redirect parameters for an error.
#[must_use]
pub fn error_parameters(payload: &ErrorPayload, state: Option<&str>) -> Vec<(String, String)> {
    let mut parameters = vec![("error".to_string(), payload.error.clone())];
    if let Some(description) = &payload.error_description {
        parameters.push(("error_description".to_string(), description.clone()));
    }
    if let Some(uri) = &payload.error_uri {
        parameters.push(("error_uri".to_string(), uri.clone()));
    }
    if let Some(state) = state {
        parameters.push(("state".to_string(), state.to_string()));
    }
    parameters
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn location(response: &Response) -> String {
        response
            .headers()
            .get(header::LOCATION)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string()
    }

    #[test]
    fn query_mode_appends_with_correct_separator() {
        let params = vec![
            ("code".to_string(), "abc".to_string()),
            ("state".to_string(), "x y".to_string()),
        ];

        let response = render_query("https://app.example/cb", &params);
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(location(&response), "https://app.example/cb?code=abc&state=x%20y");

        let response = render_query("https://app.example/cb?keep=1", &params);
        assert_eq!(
            location(&response),
            "https://app.example/cb?keep=1&code=abc&state=x%20y"
        );
    }

    #[test]
    fn fragment_mode_switches_separator_after_first() {
        let params = vec![
            ("access_token".to_string(), "t".to_string()),
            ("state".to_string(), "s".to_string()),
        ];
        let response = render_fragment("https://app.example/cb", &params);
        assert_eq!(
            location(&response),
            "https://app.example/cb#access_token=t&state=s"
        );
    }

    #[tokio::test]
    async fn form_post_escapes_names_and_values() {
        let params = vec![("state".to_string(), r#"<"danger">"#.to_string())];
        let response = render_form_post("https://app.example/cb?a=<b>", &params);

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/html;charset=UTF-8"
        );

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let html = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(html.contains(r#"action="https://app.example/cb?a=&lt;b&gt;""#));
        assert!(html.contains("&lt;&quot;danger&quot;&gt;"));
        assert!(!html.contains(r#"<"danger">"#));
        assert!(html.contains("document.forms[0].submit()"));
    }

    #[tokio::test]
    async fn native_page_is_plain_text_with_key_value_lines() {
        let payload = ErrorPayload::new("invalid_request").with_description("client_id missing");
        let response = native_error_page(&payload);

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/plain;charset=UTF-8"
        );

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = String::from_utf8(bytes.to_vec()).unwrap();
        assert_eq!(body, "error: invalid_request\nerror_description: client_id missing\n");
    }

    #[test]
    fn json_error_has_no_cache_headers() {
        let response = json_error(&ErrorPayload::new("invalid_grant"));
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(response.headers().get(header::CACHE_CONTROL).unwrap(), "no-cache");
        assert_eq!(response.headers().get(header::PRAGMA).unwrap(), "no-cache");
        assert_eq!(response.headers().get(header::EXPIRES).unwrap(), "-1");

        let server_error = json_error(&ErrorPayload::new("server_error"));
        assert_eq!(server_error.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn error_parameters_preserve_state() {
        let payload = ErrorPayload::new("access_denied").with_description("nope");
        let params = error_parameters(&payload, Some("xyz"));
        assert_eq!(params[0], ("error".to_string(), "access_denied".to_string()));
        assert!(params.contains(&("state".to_string(), "xyz".to_string())));
    }
}
