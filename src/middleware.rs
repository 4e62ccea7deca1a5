//! Middleware chain for request and response processing.
//!
//! Middleware composes cross-cutting concerns in front of route handlers:
//! the token-bucket rate limiter and the request body limit both hang off
//! this chain. The `Next` struct walks the remaining chain and finally calls
//! the endpoint handler.
//!
//! # Examples
//!
//! ```rust
//! use cloak::{middleware::Next, types::{Request, Response}};
//!
//! async fn logging_middleware(req: Request, next: Next) -> Response {
//!     tracing::debug!(uri = %req.uri(), "request");
//!     let response = next.run(req).await;
//!     tracing::debug!(status = %response.status(), "response");
//!     response
//! }
//! ```

use std::{future::Future, pin::Pin, sync::Arc};

use crate::{
    handler::BoxHandler,
    types::{BoxMiddleware, Request, Response},
};

pub mod body_limit;

/// Trait for converting types into middleware functions.
pub trait IntoMiddleware {
    fn into_middleware(
        self,
    ) -> impl Fn(Request, Next) -> Pin<Box<dyn Future<Output = Response> + Send + 'static>>
    + Clone
    + Send
    + Sync
    + 'static;
}

/// Represents the next step in the middleware execution chain.
pub struct Next {
    /// Remaining middlewares to be executed in the chain.
    pub middlewares: Arc<Vec<BoxMiddleware>>,
    /// Final endpoint handler to be called after all middlewares.
    pub endpoint: Arc<BoxHandler>,
}

impl Next {
    /// Executes the next middleware or endpoint in the chain.
    pub async fn run(self, req: Request) -> Response {
        if let Some((mw, rest)) = self.middlewares.split_first() {
            let rest = Arc::new(rest.to_vec());
            mw(
                req,
                Next {
                    middlewares: rest,
                    endpoint: self.endpoint.clone(),
                },
            )
            .await
        } else {
            self.endpoint.call(req).await
        }
    }
}
