//! Plugin system for extending the proxy with composable modules.
//!
//! Plugins hook middleware and background tasks onto the router during server
//! startup. The rate limiter ships as a plugin so deployments that disable it
//! simply never register it.
//!
//! # Examples
//!
//! ```rust
//! use cloak::plugins::CloakPlugin;
//! use cloak::router::Router;
//! use anyhow::Result;
//!
//! #[derive(Clone)]
//! struct LoggingPlugin;
//!
//! impl CloakPlugin for LoggingPlugin {
//!     fn name(&self) -> &'static str {
//!         "logging"
//!     }
//!
//!     fn setup(&self, router: &Router) -> Result<()> {
//!         router.middleware(|req, next| async move {
//!             tracing::info!(uri = %req.uri(), "request");
//!             next.run(req).await
//!         });
//!         Ok(())
//!     }
//! }
//! ```

use anyhow::Result;

use crate::router::Router;

/// Token-bucket rate limiting plugin.
pub mod rate_limiter;

/// Trait for implementing proxy plugins.
///
/// Plugins must be thread-safe with a static lifetime; `setup` runs exactly
/// once when the server starts.
pub trait CloakPlugin: Send + Sync + 'static {
  /// Returns the unique name identifier for this plugin.
  fn name(&self) -> &'static str;

  /// Configures and initializes the plugin with the given router.
  fn setup(&self, router: &Router) -> Result<()>;
}
