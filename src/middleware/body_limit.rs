//! Request body size limiting middleware.
//!
//! Rejects oversized requests early using the Content-Length header, before
//! any body bytes are read. Requests without a declared length still get a
//! second check when the pipeline collects the body, so this is the fast
//! path, not the only enforcement point.

use std::future::Future;
use std::pin::Pin;

use http::StatusCode;
use http::header::CONTENT_LENGTH;

use crate::middleware::IntoMiddleware;
use crate::middleware::Next;
use crate::responder::{Responder, json_response};
use crate::types::Request;
use crate::types::Response;

/// Request body size limiting middleware configuration.
pub struct BodyLimit {
  limit: usize,
}

impl BodyLimit {
  /// Creates a body limit middleware with a fixed size limit in bytes.
  pub fn new(limit: usize) -> Self {
    Self { limit }
  }
}

impl IntoMiddleware for BodyLimit {
  fn into_middleware(
    self,
  ) -> impl Fn(Request, Next) -> Pin<Box<dyn Future<Output = Response> + Send + 'static>>
  + Clone
  + Send
  + Sync
  + 'static {
    let limit = self.limit;

    move |req: Request, next: Next| {
      Box::pin(async move {
        // Fast-path rejection via Content-Length header
        if let Some(len) = req
          .headers()
          .get(CONTENT_LENGTH)
          .and_then(|v| v.to_str().ok())
          .and_then(|s| s.parse::<usize>().ok())
          && len > limit
        {
          return json_response(
            StatusCode::PAYLOAD_TOO_LARGE,
            &serde_json::json!({
                "error": {
                    "message": format!("request body exceeds the {limit} byte limit"),
                    "type": "invalid_request_error",
                    "code": "body_too_large",
                }
            }),
          );
        }

        next.run(req).await.into_response()
      })
    }
  }
}
