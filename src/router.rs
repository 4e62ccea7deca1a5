//! HTTP request routing and dispatch.
//!
//! The `Router` maps (method, path) pairs to handlers, carries the global
//! middleware chain and the plugin registrations, and dispatches incoming
//! requests through the chain to the matched handler. Unmatched requests get
//! the JSON 404 the completion API shape expects.
//!
//! # Examples
//!
//! ```rust
//! use cloak::{router::Router, responder::Responder, types::Request};
//! use http::Method;
//!
//! async fn health(_req: Request) -> impl Responder {
//!     serde_json::json!({"status": "ok"})
//! }
//!
//! let mut router = Router::new();
//! router.route(Method::GET, "/health", health);
//! ```

use std::sync::{
    Arc, RwLock,
    atomic::{AtomicBool, Ordering},
};

use dashmap::DashMap;
use http::{Method, StatusCode};

use crate::{
    handler::{BoxHandler, Handler},
    middleware::Next,
    plugins::CloakPlugin,
    responder::{Responder, json_response},
    route::Route,
    types::{BoxMiddleware, Request, Response},
};

/// HTTP router for managing routes, middleware, and request dispatching.
pub struct Router {
    /// Map of registered routes keyed by (method, path) pairs.
    routes: DashMap<(Method, String), Arc<Route>>,
    /// Global middleware chain applied to all routes.
    middlewares: RwLock<Vec<BoxMiddleware>>,
    /// Registered plugins for extending functionality.
    plugins: Vec<Box<dyn CloakPlugin>>,
    /// Flag to ensure plugins are initialized only once.
    plugins_initialized: AtomicBool,
}

impl Router {
    /// Creates a new, empty router.
    pub fn new() -> Self {
        Self {
            routes: DashMap::default(),
            middlewares: RwLock::new(Vec::new()),
            plugins: Vec::new(),
            plugins_initialized: AtomicBool::new(false),
        }
    }

    /// Registers a new route with the router.
    pub fn route<H>(&mut self, method: Method, path: &str, handler: H) -> Arc<Route>
    where
        H: Handler,
    {
        let route = Arc::new(Route::new(
            path.to_string(),
            method.clone(),
            BoxHandler::new(handler),
        ));
        self.routes
            .insert((method, path.to_owned()), route.clone());
        route
    }

    /// Dispatches an incoming request to the appropriate route handler.
    ///
    /// Matching is by method and exact path. The global middleware chain runs
    /// before any route-level middleware; the handler runs last.
    pub async fn dispatch(&self, req: Request) -> Response {
        let method = req.method();
        let path = req.uri().path();

        for route in self.routes.iter() {
            if &route.method != method || !route.matches(path) {
                continue;
            }

            let g_mws = self.middlewares.read().unwrap().clone();
            let r_mws = route.middlewares.read().unwrap().clone();
            let mut chain = Vec::new();
            chain.extend(g_mws.into_iter());
            chain.extend(r_mws.into_iter());

            let next = Next {
                middlewares: Arc::new(chain),
                endpoint: Arc::new(route.handler.clone()),
            };
            return next.run(req).await;
        }

        json_response(
            StatusCode::NOT_FOUND,
            &serde_json::json!({
                "error": {
                    "message": format!("unknown route: {} {}", method, path),
                    "type": "invalid_request_error",
                    "code": "not_found",
                }
            }),
        )
        .into_response()
    }

    /// Adds global middleware to the router.
    ///
    /// Global middleware is executed for all routes in the order it was
    /// added, before any route-specific middleware.
    pub fn middleware<F, Fut, R>(&self, f: F) -> &Self
    where
        F: Fn(Request, Next) -> Fut + Clone + Send + Sync + 'static,
        Fut: std::future::Future<Output = R> + Send + 'static,
        R: Responder + Send + 'static,
    {
        let mw: BoxMiddleware = Arc::new(move |req, next| {
            let fut = f(req, next);
            Box::pin(async move { fut.await.into_response() })
        });

        self.middlewares.write().unwrap().push(mw);
        self
    }

    /// Registers a plugin with the router.
    ///
    /// Plugins are initialized once when the server starts.
    pub fn plugin<P>(&mut self, plugin: P) -> &mut Self
    where
        P: CloakPlugin + Clone + Send + Sync + 'static,
    {
        self.plugins.push(Box::new(plugin));
        self
    }

    /// Returns references to all registered plugins.
    pub(crate) fn plugins(&self) -> Vec<&dyn CloakPlugin> {
        self.plugins.iter().map(|plugin| plugin.as_ref()).collect()
    }

    /// Initializes all registered plugins exactly once.
    pub(crate) fn setup_plugins_once(&self) {
        if !self.plugins_initialized.swap(true, Ordering::SeqCst) {
            for plugin in self.plugins() {
                if let Err(err) = plugin.setup(self) {
                    tracing::error!(plugin = plugin.name(), "plugin setup failed: {err}");
                }
            }
        }
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}
