//! Core type aliases used throughout the proxy.
//!
//! These aliases standardize the request, response, error and middleware types
//! shared by the HTTP plumbing and the anonymization pipeline. Requests carry
//! Hyper's streaming `Incoming` body; responses carry [`CloakBody`], which can
//! wrap both buffered and streaming payloads.
//!
//! [`CloakBody`]: crate::body::CloakBody

use std::sync::Arc;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use http_body_util::combinators::UnsyncBoxBody;
use hyper::body::Incoming;

use crate::{body::CloakBody, middleware::Next};

/// HTTP request type with streaming body support.
pub type Request = hyper::Request<Incoming>;

/// HTTP response type carrying the proxy's body wrapper.
pub type Response = hyper::Response<CloakBody>;

/// Boxed HTTP body type for internal response handling.
pub(crate) type BoxBody = UnsyncBoxBody<Bytes, BoxError>;

/// Boxed error type for thread-safe error handling.
pub(crate) type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Boxed middleware function type for dynamic middleware composition.
///
/// Middleware functions take a request and the next step in the chain, and
/// return a future that resolves to a response. They are stored behind an
/// `Arc` so route- and router-level chains can share them.
pub type BoxMiddleware = Arc<dyn Fn(Request, Next) -> BoxFuture<'static, Response> + Send + Sync>;
