use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use relay_shared::ErrorResponse;

/// Failures reported to the browser before any response bytes are sent.
///
/// Unparseable upstream lines and client disconnects never become a
/// `GatewayError`: the first are skipped by the filter, the second simply
/// drop the response stream.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("malformed request: {0}")]
    RequestMalformed(String),
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        GatewayError::UpstreamUnavailable(cause_chain(&err))
    }
}

impl From<JsonRejection> for GatewayError {
    fn from(rejection: JsonRejection) -> Self {
        GatewayError::RequestMalformed(rejection.body_text())
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = match &self {
            GatewayError::UpstreamUnavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::RequestMalformed(_) => StatusCode::BAD_REQUEST,
        };
        let body = ErrorResponse {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Render an error with all of its sources, `outer: inner: root`.
///
/// reqwest hides the interesting part (connection refused, dns failure) in
/// the source chain.
pub fn cause_chain(err: &dyn std::error::Error) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !out.ends_with(&text) {
            out.push_str(": ");
            out.push_str(&text);
        }
        source = cause.source();
    }
    out
}
