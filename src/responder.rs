//! Response generation utilities and trait implementations.
//!
//! The `Responder` trait converts handler return values into HTTP responses.
//! Besides the usual string and status-code conversions, the proxy adds a
//! JSON conversion for `serde_json::Value` since almost every endpoint speaks
//! JSON, including the error surface.
//!
//! # Examples
//!
//! ```rust
//! use cloak::responder::Responder;
//! use http::StatusCode;
//!
//! let response = "pong".into_response();
//! assert_eq!(response.status(), 200);
//!
//! let response = (StatusCode::NOT_FOUND, "no such route").into_response();
//! assert_eq!(response.status(), StatusCode::NOT_FOUND);
//!
//! let response = serde_json::json!({"status": "ok"}).into_response();
//! assert_eq!(
//!     response.headers().get("content-type").unwrap(),
//!     "application/json"
//! );
//! ```

use std::{convert::Infallible, fmt::Display};

use bytes::Bytes;
use http::{Response, StatusCode, header};
use http_body_util::Full;

use crate::body::CloakBody;

/// Trait for converting types into HTTP responses.
pub trait Responder {
    /// Converts the implementing type into an HTTP response.
    fn into_response(self) -> Response<CloakBody>;
}

impl Responder for Response<CloakBody> {
    fn into_response(self) -> Response<CloakBody> {
        self
    }
}

impl Responder for &'static str {
    fn into_response(self) -> Response<CloakBody> {
        Response::new(CloakBody::new(Full::from(Bytes::from_static(
            self.as_bytes(),
        ))))
    }
}

impl Responder for String {
    fn into_response(self) -> Response<CloakBody> {
        Response::new(CloakBody::new(Full::from(Bytes::from(self))))
    }
}

impl Responder for () {
    fn into_response(self) -> Response<CloakBody> {
        Response::new(CloakBody::empty())
    }
}

impl Responder for Infallible {
    fn into_response(self) -> Response<CloakBody> {
        match self {}
    }
}

/// Converts a status code and displayable body into a plain text response.
impl<R> Responder for (StatusCode, R)
where
    R: Display,
{
    fn into_response(self) -> Response<CloakBody> {
        let (status, body) = self;
        let mut res = Response::new(CloakBody::new(Full::from(Bytes::from(body.to_string()))));
        *res.status_mut() = status;
        res
    }
}

impl Responder for CloakBody {
    fn into_response(self) -> Response<CloakBody> {
        Response::new(self)
    }
}

/// Serializes a JSON value into a `200 OK` response with the JSON content type.
impl Responder for serde_json::Value {
    fn into_response(self) -> Response<CloakBody> {
        json_response(StatusCode::OK, &self)
    }
}

impl Responder for anyhow::Error {
    fn into_response(self) -> Response<CloakBody> {
        (StatusCode::BAD_REQUEST, self.to_string()).into_response()
    }
}

/// Builds a JSON response with an explicit status code.
///
/// Serialization of `serde_json::Value` cannot fail, so the builder path is
/// infallible here.
pub fn json_response(status: StatusCode, value: &serde_json::Value) -> Response<CloakBody> {
    let body = serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string());
    let mut res = Response::new(CloakBody::from(body));
    *res.status_mut() = status;
    res.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("application/json"),
    );
    res
}
