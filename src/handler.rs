//! Request handler traits and type erasure for route dispatch.
//!
//! Handlers are async functions that take a [`Request`] and return any type
//! implementing [`Responder`]. `BoxHandler` erases the concrete handler type
//! so routes can be stored uniformly in the router.

use std::{future::Future, pin::Pin, sync::Arc};

use futures_util::future::BoxFuture;

use crate::{
    responder::Responder,
    types::{Request, Response},
};

/// Trait for asynchronous HTTP request handlers.
pub trait Handler: Clone + Send + Sync + 'static {
    /// Future type returned by the handler.
    type Future: Future<Output = Response> + Send + 'static;

    /// Calls the handler with the given request.
    fn call(self, req: Request) -> Self::Future;
}

impl<F, Fut, R> Handler for F
where
    F: FnOnce(Request) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: Responder,
{
    type Future = Pin<Box<dyn Future<Output = Response> + Send>>;

    fn call(self, req: Request) -> Self::Future {
        Box::pin(async move { (self)(req).await.into_response() })
    }
}

/// Type-erased handler wrapper for dynamic storage and composition.
#[derive(Clone)]
pub struct BoxHandler {
    inner: Arc<dyn Fn(Request) -> BoxFuture<'static, Response> + Send + Sync>,
}

impl BoxHandler {
    /// Creates a new boxed handler from any handler implementation.
    pub(crate) fn new<H>(h: H) -> Self
    where
        H: Handler,
    {
        let inner = Arc::new(move |req: Request| {
            let handler = h.clone();
            Box::pin(async move { handler.call(req).await }) as BoxFuture<'static, Response>
        });

        Self { inner }
    }

    /// Calls the boxed handler with the provided request.
    pub(crate) fn call(&self, req: Request) -> BoxFuture<'static, Response> {
        (self.inner)(req)
    }
}
