//! HTTP server implementation and lifecycle management.
//!
//! The accept loop is built on Hyper's HTTP/1.1 connection handling. Each
//! incoming TCP connection is served on its own tokio task; each request is
//! dispatched through the router, so thousands of proxied completions can be
//! in flight concurrently with per-request state living on its task.
//!
//! # Examples
//!
//! ```rust,no_run
//! use cloak::{serve, router::Router};
//! use tokio::net::TcpListener;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let listener = TcpListener::bind("127.0.0.1:8080").await?;
//! let router = Router::new();
//! serve(listener, router).await;
//! # Ok(())
//! # }
//! ```

use hyper::{Request, server::conn::http1, service::service_fn};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::net::TcpListener;

use crate::router::Router;
use crate::types::BoxError;

/// Starts the proxy HTTP server with the given listener and router.
pub async fn serve(listener: TcpListener, router: Router) {
    if let Err(err) = run(listener, router).await {
        tracing::error!("server terminated: {err}");
    }
}

/// Runs the main server loop, accepting connections and dispatching requests.
async fn run(listener: TcpListener, router: Router) -> Result<(), BoxError> {
    let router = Arc::new(router);
    router.setup_plugins_once();

    tracing::info!("cloak listening on {}", listener.local_addr()?);

    loop {
        let (stream, addr) = listener.accept().await?;
        let io = hyper_util::rt::TokioIo::new(stream);
        let router = router.clone();

        // Spawn a new task to handle each incoming connection.
        tokio::spawn(async move {
            let svc = service_fn(move |mut req: Request<_>| {
                let router = router.clone();
                async move {
                    req.extensions_mut().insert(addr);
                    Ok::<_, Infallible>(router.dispatch(req).await)
                }
            });

            let mut http = http1::Builder::new();
            http.keep_alive(true);
            let conn = http.serve_connection(io, svc);

            if let Err(err) = conn.await {
                tracing::debug!("error serving connection: {err}");
            }
        });
    }
}
