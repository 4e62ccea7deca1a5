//! A PII-scrubbing reverse proxy for LLM completion APIs.
//!
//! Cloak sits between an application and a remote completion API. For every
//! request it detects sensitive personal information in the caller's prompt,
//! substitutes recoverable `<TYPE_N>` placeholders, forwards the sanitized
//! prompt upstream, and restores the original values in the response — even
//! when the response is a server-sent event stream whose chunks split
//! placeholders at arbitrary byte boundaries.
//!
//! # Request flow
//!
//! ```text
//! RECEIVED → SECRET-SCAN → ANONYMIZE → CACHE-LOOKUP → QUOTA-CHECK
//!          → FORWARD-UPSTREAM → { STREAMING | UNARY } → RESTORE
//!          → CACHE-STORE → RESPOND
//! ```
//!
//! # Key concepts
//! - [`detect`] — black-box detectors composed into non-overlapping spans.
//! - [`strategy`] — placeholder, synthetic, hash, mask, redact rewrites.
//! - [`mapping`] + [`store`] — per-request bidirectional placeholder store
//!   with TTL expiry.
//! - [`deanonymizer`] — exact and fuzzy placeholder recovery.
//! - [`stream_buffer`] — chunk-safe substitution with a bounded carry.
//! - [`pipeline`] — the request state machine gluing everything together.
//!
//! # Compatibility
//! - Runtime: `tokio`
//! - HTTP: `hyper` 1.x
//! - Client wire shape: `POST /v1/chat/completions`, `GET /v1/models`

/// Wire types and JSON helpers for the completion protocol.
pub mod api;

/// HTTP request and response body handling utilities.
pub mod body;

/// Proxy configuration surface.
pub mod config;

/// PII detectors and the composing registry.
pub mod detect;

/// Pipeline error kinds and their wire representation.
pub mod error;

/// Anonymization engine.
pub mod anonymizer;

/// Deanonymization engine with fuzzy recovery.
pub mod deanonymizer;

/// Request handler traits and implementations.
mod handler;

/// Per-request placeholder mapping.
pub mod mapping;

/// Middleware for processing requests in a pipeline.
pub mod middleware;

/// Placeholder token grammar.
pub mod placeholder;

/// The proxy request pipeline and its handlers.
pub mod pipeline;

/// Plugin system for extending the proxy.
pub mod plugins;

/// Per-tenant quota accounting.
pub mod quota;

/// Response generation utilities and traits.
pub mod responder;

/// Bounded response cache.
pub mod cache;

/// Route definition and matching logic.
mod route;

/// Request routing and dispatch functionality.
pub mod router;

/// Secret scanner gating the pipeline.
pub mod scanner;

/// HTTP server implementation.
mod server;

/// Server-Sent Events encoding and upstream frame parsing.
pub mod sse;

/// TTL-scoped mapping persistence.
pub mod store;

/// Rewrite strategies for detected values.
pub mod strategy;

/// Chunk-safe substitution over response streams.
pub mod stream_buffer;

/// Structured logging setup.
pub mod tracing;

/// Core type definitions used throughout the proxy.
pub mod types;

/// Outbound client for the upstream completion API.
pub mod upstream;

pub use bytes::Bytes;
pub use http::{Method, StatusCode, header};
pub use responder::Responder;

/// Starts the HTTP server with the given listener and router.
pub use server::serve;
