//! The proxy request pipeline.
//!
//! A completion request walks a fixed state machine:
//!
//! ```text
//! RECEIVED → SECRET-SCAN → ANONYMIZE → CACHE-LOOKUP → QUOTA-CHECK
//!          → FORWARD-UPSTREAM → { STREAMING | UNARY } → RESTORE
//!          → CACHE-STORE → RESPOND → DONE
//! ```
//!
//! A critical secret finding terminates in BLOCKED before any mapping
//! exists. A cache hit jumps straight to RESTORE through the current
//! request's mapping. A failed quota check or upstream call releases the
//! mapping and consumes no quota. The streaming branch pipes every chunk
//! through the stream buffer and releases the mapping after the final one.
//!
//! Mapping lifecycle: once a record is written to the store, a guard
//! guarantees release on every path out, including cancellation, where the
//! drop handler deletes it eagerly.

use std::sync::Arc;

use bytes::Bytes;
use http::{Method, StatusCode, header};
use http_body_util::BodyExt;
use hyper::body::Incoming;
use serde_json::Value;
use tokio::time::timeout;
use tokio_stream::wrappers::ReceiverStream;

use crate::{
    anonymizer::Anonymizer,
    api::{self, ChatCompletionRequest},
    body::CloakBody,
    cache::ResponseCache,
    config::ProxyConfig,
    deanonymizer::{self, DeanonymizeOptions},
    detect::{DetectorRegistry, RegistryHandle},
    error::CloakError,
    mapping::{Mapping, MappingRecord, unix_now},
    quota::{QuotaLimits, QuotaTracker},
    responder::{Responder, json_response},
    scanner::{ScanAction, SecretScanner},
    sse::{EventStreamParser, Sse, SseEvent},
    store::MappingStore,
    strategy::StrategyTable,
    stream_buffer::StreamBuffer,
    types::{Request, Response},
    upstream::UpstreamClient,
};

/// Everything a request handler needs, shared across all requests.
pub struct ProxyState {
    pub config: ProxyConfig,
    pub registry: RegistryHandle,
    pub strategies: Arc<StrategyTable>,
    pub store: Arc<dyn MappingStore>,
    pub cache: ResponseCache,
    pub quota: QuotaTracker,
    pub scanner: SecretScanner,
    pub upstream: UpstreamClient,
}

impl ProxyState {
    /// Builds the shared state from the configuration and a store backend.
    pub fn new(config: ProxyConfig, store: Arc<dyn MappingStore>) -> anyhow::Result<Self> {
        let mut registry = DetectorRegistry::with_defaults();
        if let Some(path) = &config.custom_pattern_path {
            for detector in crate::detect::load_custom_patterns(path)? {
                registry.register(Arc::new(detector));
            }
        }
        if let Some(dir) = &config.allowlist_dir {
            registry.set_allowlist(crate::detect::load_allowlists(dir)?);
        }

        let upstream = UpstreamClient::new(&config.upstream_url, config.upstream_timeout())?;

        Ok(Self {
            registry: RegistryHandle::new(registry),
            strategies: Arc::new(StrategyTable::default()),
            store,
            cache: ResponseCache::new(config.cache_max_entries, config.cache_ttl()),
            quota: QuotaTracker::new(QuotaLimits {
                per_hour: config.quota_per_hour,
                per_day: config.quota_per_day,
                per_month: config.quota_per_month,
            }),
            scanner: SecretScanner::new(config.compliance_preset),
            upstream,
            config,
        })
    }

    fn deanonymize_options(&self) -> DeanonymizeOptions {
        DeanonymizeOptions {
            fuzzy: self.config.fuzzy_enabled,
            confidence_threshold: self.config.fuzzy_confidence_threshold,
        }
    }
}

/// Deletes the stored mapping on every exit path.
///
/// `release` is the normal path; dropping an armed guard (error return,
/// cancellation, client disconnect) schedules an eager best-effort delete.
struct MappingGuard {
    store: Arc<dyn MappingStore>,
    id: String,
    armed: bool,
}

impl MappingGuard {
    fn new(store: Arc<dyn MappingStore>, id: String) -> Self {
        Self {
            store,
            id,
            armed: true,
        }
    }

    async fn release(mut self) {
        self.armed = false;
        if let Err(err) = self.store.delete(&self.id).await {
            tracing::warn!(mapping_id = %self.id, "mapping release failed: {err}");
        }
    }
}

impl Drop for MappingGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let store = self.store.clone();
        let id = std::mem::take(&mut self.id);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let _ = store.delete(&id).await;
            });
        }
    }
}

/// Tenant supplied by the auth collaborator, defaulting when absent.
fn tenant_of(headers: &http::HeaderMap) -> String {
    headers
        .get("x-tenant-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .unwrap_or("default")
        .to_string()
}

/// Language hint for the detectors.
fn language_of(headers: &http::HeaderMap) -> String {
    headers
        .get("x-language")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .unwrap_or("en")
        .to_string()
}

/// Reads a request body fully, enforcing the configured size limit.
async fn collect_body(body: Incoming, limit: usize) -> Result<Bytes, CloakError> {
    let bytes = body
        .collect()
        .await
        .map_err(|e| CloakError::BadRequest(format!("failed to read request body: {e}")))?
        .to_bytes();

    if bytes.len() > limit {
        return Err(CloakError::BadRequest(format!(
            "request body exceeds the {limit} byte limit"
        )));
    }
    Ok(bytes)
}

/// `POST /v1/chat/completions` entry point with the total request budget.
pub async fn chat_completions(req: Request, state: Arc<ProxyState>) -> Response {
    let deadline = state.config.request_timeout();
    match timeout(deadline, handle_chat(req, state)).await {
        Ok(Ok(response)) => response,
        Ok(Err(err)) => {
            tracing::warn!("completion request failed: {err}");
            err.into_response()
        }
        Err(_) => {
            tracing::warn!("completion request exceeded the total budget");
            CloakError::UpstreamTimeout { stage: "request" }.into_response()
        }
    }
}

async fn handle_chat(req: Request, state: Arc<ProxyState>) -> Result<Response, CloakError> {
    let (parts, body) = req.into_parts();
    let tenant = tenant_of(&parts.headers);
    let language = language_of(&parts.headers);

    // RECEIVED: decode.
    let raw = collect_body(body, state.config.max_body_bytes).await?;
    let mut request: ChatCompletionRequest = serde_json::from_slice(&raw)
        .map_err(|e| CloakError::BadRequest(format!("invalid completion request: {e}")))?;
    if request.model.trim().is_empty() {
        return Err(CloakError::BadRequest("missing model".to_string()));
    }

    // SECRET-SCAN: explicit outcome, BLOCKED is terminal and pre-mapping.
    if state.config.secret_scan_enabled {
        for message in &mut request.messages {
            let outcome = state.scanner.scan(&message.content);
            match outcome.action {
                ScanAction::Block => {
                    let rules = outcome
                        .findings
                        .iter()
                        .map(|f| f.rule.to_string())
                        .collect();
                    return Err(CloakError::SecretBlocked { rules });
                }
                ScanAction::Redact => {
                    if let Some(sanitized) = outcome.sanitized {
                        tracing::warn!(tenant = %tenant, "secret material redacted from prompt");
                        message.content = sanitized;
                    }
                }
                ScanAction::Warn => {
                    tracing::warn!(
                        tenant = %tenant,
                        rules = ?outcome.findings.iter().map(|f| f.rule).collect::<Vec<_>>(),
                        "secret scanner warning"
                    );
                }
                ScanAction::Allow => {}
            }
        }
    }

    // ANONYMIZE: one mapping per request, shared by all messages.
    let mapping = Mapping::new(&tenant, state.config.mapping_ttl());
    let anonymizer = Anonymizer::new(state.registry.snapshot(), state.strategies.clone());
    for message in &mut request.messages {
        message.content = anonymizer.anonymize(&message.content, &language, &mapping);
    }
    if state.config.inject_prompt {
        request.inject_prompt_guard();
    }

    let sanitized_body = serde_json::to_vec(&request)
        .map_err(|e| CloakError::Internal(format!("request serialization: {e}")))?;

    // CACHE-LOOKUP: sanitized-content key; a hit restores through the
    // current request's mapping and skips forward and quota entirely.
    let cache_key = if state.config.cache_enabled && !request.stream {
        let sanitized_text = String::from_utf8_lossy(&sanitized_body);
        let key = ResponseCache::key(&tenant, &request.model, &sanitized_text);
        if let Some(cached) = state.cache.get(&key) {
            tracing::debug!(tenant = %tenant, "response cache hit");
            let record = mapping.to_record();
            let restored = restore_body(cached.as_bytes(), &record, &state.deanonymize_options())?;
            let mut response = json_response(StatusCode::OK, &restored);
            response
                .headers_mut()
                .insert("x-cache", header::HeaderValue::from_static("hit"));
            return Ok(response);
        }
        Some(key)
    } else {
        None
    };

    // QUOTA-CHECK: rejected requests never write their mapping.
    state.quota.check(&tenant, unix_now())?;

    state.store.put(mapping.to_record()).await?;
    let guard = MappingGuard::new(state.store.clone(), mapping.id().to_string());

    // FORWARD-UPSTREAM.
    let upstream_req = build_upstream_request(
        &state.upstream,
        Method::POST,
        "/chat/completions",
        &parts.headers,
        CloakBody::from(sanitized_body),
    )?;
    let upstream_resp = state.upstream.request(upstream_req).await?;
    let status = upstream_resp.status();

    if !status.is_success() {
        // Pass the upstream error JSON through; no quota consumed.
        let body = upstream_resp
            .into_body()
            .collect()
            .await
            .map(|b| b.to_bytes())
            .unwrap_or_default();
        guard.release().await;
        let mut response = hyper::Response::new(CloakBody::from(body));
        *response.status_mut() = status;
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );
        return Ok(response);
    }

    // Forward succeeded: quota is consumed exactly once, streaming or not.
    state.quota.commit(&tenant, unix_now());

    if request.stream {
        return streaming_response(state, upstream_resp, guard, mapping.id(), request.model).await;
    }

    // UNARY: collect, then RESTORE through the store-read record.
    let upstream_body = upstream_resp
        .into_body()
        .collect()
        .await
        .map_err(|e| CloakError::UpstreamError {
            status: None,
            message: format!("reading upstream body: {e}"),
        })?
        .to_bytes();

    let record = state.store.get(mapping.id()).await?;
    let restored = match record {
        Some(record) => restore_body(&upstream_body, &record, &state.deanonymize_options())?,
        None => {
            // MappingLost: answer anyway, with placeholders un-restored.
            tracing::warn!(
                mapping_id = %mapping.id(),
                "mapping expired before restoration; responding partially restored"
            );
            let text = String::from_utf8_lossy(&upstream_body);
            let unresolved = deanonymizer::find_placeholders(&text);
            let mut value: Value = serde_json::from_slice(&upstream_body)
                .map_err(|e| CloakError::UpstreamError {
                    status: Some(status),
                    message: format!("invalid upstream JSON: {e}"),
                })?;
            attach_unresolved(&mut value, unresolved);
            value
        }
    };

    // CACHE-STORE: bodies are cached in sanitized form.
    if let Some(key) = cache_key {
        let sanitized_text = String::from_utf8_lossy(&upstream_body).into_owned();
        state.cache.insert(key, sanitized_text);
    }

    guard.release().await;
    Ok(json_response(StatusCode::OK, &restored))
}

/// Restores every string field of a JSON body through the mapping record.
fn restore_body(
    body: &[u8],
    record: &MappingRecord,
    opts: &DeanonymizeOptions,
) -> Result<Value, CloakError> {
    let mut value: Value = serde_json::from_slice(body).map_err(|e| CloakError::UpstreamError {
        status: None,
        message: format!("invalid upstream JSON: {e}"),
    })?;

    let mut unresolved: Vec<String> = Vec::new();
    api::rewrite_strings(&mut value, &mut |s| {
        let result = deanonymizer::deanonymize(s, record, opts);
        for token in result.unresolved {
            if !unresolved.contains(&token) {
                unresolved.push(token);
            }
        }
        result.text
    });

    if !unresolved.is_empty() {
        tracing::warn!(tokens = ?unresolved, "unrecovered placeholders in response");
        attach_unresolved(&mut value, unresolved);
    }
    Ok(value)
}

/// Adds the `unresolved` observability field to object-shaped bodies.
fn attach_unresolved(value: &mut Value, unresolved: Vec<String>) {
    if unresolved.is_empty() {
        return;
    }
    if let Value::Object(map) = value {
        map.insert("unresolved".to_string(), serde_json::json!(unresolved));
    }
}

/// Builds the forwarded request, passing the caller's authorization through.
fn build_upstream_request(
    upstream: &UpstreamClient,
    method: Method,
    endpoint: &str,
    caller_headers: &http::HeaderMap,
    body: CloakBody,
) -> Result<http::Request<CloakBody>, CloakError> {
    let mut builder = http::Request::builder()
        .method(method)
        .uri(upstream.endpoint(endpoint))
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::ACCEPT, "application/json, text/event-stream");

    if let Some(auth) = caller_headers.get(header::AUTHORIZATION) {
        builder = builder.header(header::AUTHORIZATION, auth.clone());
    }

    builder
        .body(body)
        .map_err(|e| CloakError::Internal(format!("building upstream request: {e}")))
}

/// STREAMING branch: per-chunk restoration through the stream buffer, with
/// the per-chunk idle budget, releasing the mapping after the final chunk.
async fn streaming_response(
    state: Arc<ProxyState>,
    upstream_resp: hyper::Response<Incoming>,
    guard: MappingGuard,
    mapping_id: &str,
    model: String,
) -> Result<Response, CloakError> {
    let record = state.store.get(mapping_id).await?.map(Arc::new);
    if record.is_none() {
        tracing::warn!(
            mapping_id = %mapping_id,
            "mapping absent at stream start; forwarding without restoration"
        );
    }

    let idle = state.config.stream_idle_timeout();
    let max_len = state.config.max_placeholder_length;
    let (tx, rx) = tokio::sync::mpsc::channel::<String>(32);

    tokio::spawn(async move {
        let mut parser = EventStreamParser::new();
        let mut buffer = record.map(|r| StreamBuffer::new(r, max_len));
        let mut body = upstream_resp.into_body();

        loop {
            let frame = match timeout(idle, body.frame()).await {
                Err(_) => {
                    tracing::warn!("upstream stream idle timeout; closing");
                    break;
                }
                Ok(None) => break,
                Ok(Some(Err(err))) => {
                    tracing::warn!("upstream stream error: {err}");
                    break;
                }
                Ok(Some(Ok(frame))) => frame,
            };
            let Some(data) = frame.data_ref() else {
                continue;
            };

            for event in parser.push(data) {
                match event {
                    SseEvent::Data(payload) => {
                        let out = match &mut buffer {
                            Some(buf) => rewrite_chunk(&payload, buf),
                            None => payload,
                        };
                        if tx.send(out).await.is_err() {
                            // Client went away; the armed guard deletes the
                            // mapping eagerly.
                            return;
                        }
                    }
                    SseEvent::Done => {
                        if let Some(buf) = &mut buffer {
                            let rest = buf.flush();
                            if !rest.is_empty() {
                                let chunk = api::flush_chunk(&model, &rest);
                                let _ = tx.send(chunk.to_string()).await;
                            }
                        }
                        let _ = tx.send("[DONE]".to_string()).await;
                        guard.release().await;
                        return;
                    }
                }
            }
        }

        // Abnormal end: release what the buffer still holds, then close.
        if let Some(buf) = &mut buffer {
            let rest = buf.flush();
            if !rest.is_empty() {
                let chunk = api::flush_chunk(&model, &rest);
                let _ = tx.send(chunk.to_string()).await;
            }
        }
        guard.release().await;
    });

    Ok(Sse::new(ReceiverStream::new(rx)).into_response())
}

/// Rewrites one streamed chunk's delta text through the buffer.
///
/// Payloads that are not JSON, or carry no delta text, pass through
/// untouched; output order always matches input order.
fn rewrite_chunk(payload: &str, buffer: &mut StreamBuffer) -> String {
    let Ok(mut value) = serde_json::from_str::<Value>(payload) else {
        return payload.to_string();
    };
    let Some(text) = api::chunk_text(&value) else {
        return payload.to_string();
    };

    let emitted = buffer.push(text);
    api::set_chunk_text(&mut value, &emitted);
    value.to_string()
}

/// `GET /v1/models`: upstream pass-through with a static fallback.
pub async fn models(req: Request, state: Arc<ProxyState>) -> Response {
    let headers = req.headers().clone();

    let fetch = async {
        let upstream_req = build_upstream_request(
            &state.upstream,
            Method::GET,
            "/models",
            &headers,
            CloakBody::empty(),
        )?;
        let response = state.upstream.request(upstream_req).await?;
        let status = response.status();
        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| CloakError::UpstreamError {
                status: None,
                message: e.to_string(),
            })?
            .to_bytes();
        Ok::<_, CloakError>((status, body))
    };

    match timeout(state.config.upstream_timeout(), fetch).await {
        Ok(Ok((status, body))) if status.is_success() => {
            let mut response = hyper::Response::new(CloakBody::from(body));
            response.headers_mut().insert(
                header::CONTENT_TYPE,
                header::HeaderValue::from_static("application/json"),
            );
            response
        }
        Ok(Ok((status, _))) => {
            tracing::debug!(%status, "model list upstream error; serving fallback");
            api::fallback_models().into_response()
        }
        Ok(Err(err)) => {
            tracing::debug!("model list fetch failed ({err}); serving fallback");
            api::fallback_models().into_response()
        }
        Err(_) => {
            tracing::debug!("model list fetch timed out; serving fallback");
            api::fallback_models().into_response()
        }
    }
}

/// `GET /health` liveness probe.
pub async fn health(_req: Request) -> Response {
    serde_json::json!({"status": "ok"}).into_response()
}

#[derive(serde::Deserialize)]
struct TestAnonymizeRequest {
    text: String,
    #[serde(default)]
    language: Option<String>,
}

/// `POST /api/test/anonymize` debug endpoint: runs detection and rewriting
/// without touching the store.
pub async fn test_anonymize(req: Request, state: Arc<ProxyState>) -> Response {
    match handle_test_anonymize(req, state).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn handle_test_anonymize(
    req: Request,
    state: Arc<ProxyState>,
) -> Result<Response, CloakError> {
    let (parts, body) = req.into_parts();
    let raw = collect_body(body, state.config.max_body_bytes).await?;
    let input: TestAnonymizeRequest = serde_json::from_slice(&raw)
        .map_err(|e| CloakError::BadRequest(format!("invalid test request: {e}")))?;

    let tenant = tenant_of(&parts.headers);
    let language = input.language.unwrap_or_else(|| language_of(&parts.headers));

    let mapping = Mapping::new(&tenant, state.config.mapping_ttl());
    let anonymizer = Anonymizer::new(state.registry.snapshot(), state.strategies.clone());
    let anonymized = anonymizer.anonymize(&input.text, &language, &mapping);

    Ok(json_response(
        StatusCode::OK,
        &serde_json::json!({
            "anonymized": anonymized,
            "mapping": mapping.to_record(),
        }),
    ))
}

#[derive(serde::Deserialize)]
struct TestDeanonymizeRequest {
    text: String,
    mapping: MappingRecord,
    #[serde(default)]
    fuzzy: Option<bool>,
    #[serde(default)]
    confidence_threshold: Option<f32>,
}

/// `POST /api/test/deanonymize` debug endpoint: restores against a supplied
/// mapping record.
pub async fn test_deanonymize(req: Request, state: Arc<ProxyState>) -> Response {
    match handle_test_deanonymize(req, state).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn handle_test_deanonymize(
    req: Request,
    state: Arc<ProxyState>,
) -> Result<Response, CloakError> {
    let raw = collect_body(req.into_body(), state.config.max_body_bytes).await?;
    let input: TestDeanonymizeRequest = serde_json::from_slice(&raw)
        .map_err(|e| CloakError::BadRequest(format!("invalid test request: {e}")))?;

    let mut opts = state.deanonymize_options();
    if let Some(fuzzy) = input.fuzzy {
        opts.fuzzy = fuzzy;
    }
    if let Some(threshold) = input.confidence_threshold {
        opts.confidence_threshold = threshold;
    }

    let result = deanonymizer::deanonymize(&input.text, &input.mapping, &opts);
    Ok(json_response(
        StatusCode::OK,
        &serde_json::json!({
            "restored": result.text,
            "replaced": result.replaced,
            "unresolved": result.unresolved,
        }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tenant_defaults_when_header_is_missing() {
        let headers = http::HeaderMap::new();
        assert_eq!(tenant_of(&headers), "default");

        let mut headers = http::HeaderMap::new();
        headers.insert("x-tenant-id", "acme".parse().unwrap());
        assert_eq!(tenant_of(&headers), "acme");
    }

    #[test]
    fn upstream_request_carries_auth_and_joined_path() {
        let upstream =
            UpstreamClient::new("https://api.example.com/v1", std::time::Duration::from_secs(5))
                .unwrap();
        let mut headers = http::HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Bearer sk-test".parse().unwrap());

        let req = build_upstream_request(
            &upstream,
            Method::POST,
            "/chat/completions",
            &headers,
            CloakBody::empty(),
        )
        .unwrap();

        assert_eq!(req.uri().path(), "/v1/chat/completions");
        assert_eq!(
            req.headers().get(header::AUTHORIZATION).unwrap(),
            "Bearer sk-test"
        );
        assert_eq!(
            req.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
    }

    #[test]
    fn unresolved_attaches_only_to_objects() {
        let mut value = serde_json::json!({"ok": true});
        attach_unresolved(&mut value, vec!["<PERSON_1>".into()]);
        assert_eq!(value["unresolved"][0], "<PERSON_1>");

        let mut value = serde_json::json!({"ok": true});
        attach_unresolved(&mut value, vec![]);
        assert!(value.get("unresolved").is_none());
    }

    #[test]
    fn rewrite_chunk_passes_non_json_payloads_through() {
        let record = {
            let mapping = Mapping::new("default", std::time::Duration::from_secs(300));
            mapping.intern("PERSON", "Alice", |n| {
                crate::placeholder::format("PERSON", n)
            });
            Arc::new(mapping.to_record())
        };
        let mut buffer = StreamBuffer::new(record, 25);

        assert_eq!(rewrite_chunk("not json", &mut buffer), "not json");

        let chunk = serde_json::json!({
            "choices": [{"index": 0, "delta": {"content": "<PERSON_1>!"}, "finish_reason": null}],
        })
        .to_string();
        let rewritten = rewrite_chunk(&chunk, &mut buffer);
        let value: Value = serde_json::from_str(&rewritten).unwrap();
        assert_eq!(api::chunk_text(&value), Some("Alice!"));
    }
}
