//! Error kinds the request pipeline produces and their wire representation.
//!
//! Every error surfaces as the JSON object `{"error":{"message","type",
//! "code"}}` with the status code fixed per kind. Upstream failures pass the
//! upstream status through when one was received. A lost mapping is not an
//! error: the restore path answers 200 with partial restoration and an
//! `unresolved` listing, so no variant exists for it here.

use std::fmt;

use http::StatusCode;

use crate::{
    responder::{Responder, json_response},
    store::StoreError,
    types::Response,
};

/// Errors produced by the proxy pipeline.
#[derive(Debug)]
pub enum CloakError {
    /// Request decode failure or unknown model.
    BadRequest(String),
    /// The external auth collaborator rejected the caller.
    AuthFailure(String),
    /// The RBAC collaborator denied the operation.
    PermissionDenied(String),
    /// The in-process limiter rejected the request.
    RateLimited,
    /// The quota check found the window exhausted.
    QuotaExceeded {
        /// Which rolling window ran out.
        window: &'static str,
    },
    /// The secret scanner flagged a critical match; deliberate refusal.
    SecretBlocked {
        /// Names of the rules that matched.
        rules: Vec<String>,
    },
    /// A timeout budget expired.
    UpstreamTimeout {
        /// Which budget expired (request, connect, stream idle).
        stage: &'static str,
    },
    /// Upstream returned a non-2xx status or the transport failed.
    UpstreamError {
        /// Status received from upstream, when one arrived at all.
        status: Option<StatusCode>,
        message: String,
    },
    /// Programming error.
    Internal(String),
}

impl CloakError {
    /// HTTP status code this error surfaces with.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) | Self::SecretBlocked { .. } => StatusCode::BAD_REQUEST,
            Self::AuthFailure(_) => StatusCode::UNAUTHORIZED,
            Self::PermissionDenied(_) => StatusCode::FORBIDDEN,
            Self::RateLimited | Self::QuotaExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::UpstreamError { status, .. } => status.unwrap_or(StatusCode::BAD_GATEWAY),
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Wire-level `type` field.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "invalid_request_error",
            Self::AuthFailure(_) => "auth_error",
            Self::PermissionDenied(_) => "permission_error",
            Self::RateLimited | Self::QuotaExceeded { .. } => "rate_limit_error",
            Self::SecretBlocked { .. } => "security_error",
            Self::UpstreamTimeout { .. } => "timeout_error",
            Self::UpstreamError { .. } => "upstream_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Wire-level `code` field.
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::AuthFailure(_) => "auth_failed",
            Self::PermissionDenied(_) => "permission_denied",
            Self::RateLimited => "rate_limited",
            Self::QuotaExceeded { .. } => "quota_exceeded",
            Self::SecretBlocked { .. } => "secret_blocked",
            Self::UpstreamTimeout { .. } => "upstream_timeout",
            Self::UpstreamError { .. } => "upstream_error",
            Self::Internal(_) => "internal",
        }
    }
}

impl fmt::Display for CloakError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadRequest(msg) => write!(f, "bad request: {msg}"),
            Self::AuthFailure(msg) => write!(f, "authentication failed: {msg}"),
            Self::PermissionDenied(msg) => write!(f, "permission denied: {msg}"),
            Self::RateLimited => write!(f, "rate limit exceeded, retry later"),
            Self::QuotaExceeded { window } => {
                write!(f, "quota exceeded for the current {window} window")
            }
            Self::SecretBlocked { rules } => {
                write!(f, "request blocked: secret material detected ({})", rules.join(", "))
            }
            Self::UpstreamTimeout { stage } => write!(f, "{stage} timeout exceeded"),
            Self::UpstreamError { status, message } => match status {
                Some(s) => write!(f, "upstream returned {s}: {message}"),
                None => write!(f, "upstream transport failure: {message}"),
            },
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for CloakError {}

impl From<StoreError> for CloakError {
    fn from(err: StoreError) -> Self {
        Self::Internal(format!("mapping store: {err}"))
    }
}

impl Responder for CloakError {
    fn into_response(self) -> Response {
        json_response(
            self.status(),
            &serde_json::json!({
                "error": {
                    "message": self.to_string(),
                    "type": self.error_type(),
                    "code": self.code(),
                }
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_the_kind_table() {
        assert_eq!(CloakError::BadRequest("x".into()).status(), 400);
        assert_eq!(CloakError::AuthFailure("x".into()).status(), 401);
        assert_eq!(CloakError::PermissionDenied("x".into()).status(), 403);
        assert_eq!(CloakError::RateLimited.status(), 429);
        assert_eq!(CloakError::QuotaExceeded { window: "hour" }.status(), 429);
        assert_eq!(CloakError::SecretBlocked { rules: vec![] }.status(), 400);
        assert_eq!(CloakError::UpstreamTimeout { stage: "request" }.status(), 504);
        assert_eq!(CloakError::Internal("x".into()).status(), 500);
    }

    #[test]
    fn upstream_status_passes_through() {
        let err = CloakError::UpstreamError {
            status: Some(StatusCode::SERVICE_UNAVAILABLE),
            message: "overloaded".into(),
        };
        assert_eq!(err.status(), 503);

        let err = CloakError::UpstreamError {
            status: None,
            message: "connection reset".into(),
        };
        assert_eq!(err.status(), 502);
    }

    #[test]
    fn secret_block_is_a_security_subtype() {
        let err = CloakError::SecretBlocked {
            rules: vec!["aws-access-key".into()],
        };
        assert_eq!(err.status(), 400);
        assert_eq!(err.error_type(), "security_error");
    }
}
