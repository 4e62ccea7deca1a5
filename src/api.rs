//! Wire types and JSON helpers for the chat-completions protocol.
//!
//! The proxy only understands the envelope of the completion API: the
//! request's `model`, `messages` and `stream` fields, and, on the response
//! side, that string fields may carry placeholders and that stream chunks
//! keep their delta text at a known path. Everything else passes through
//! untouched via the flattened extra fields.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::anonymizer::PROMPT_GUARD;

/// One chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// The request body of `POST /v1/chat/completions`.
///
/// Unknown fields (temperature, tools, ...) are preserved and forwarded
/// verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub stream: bool,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl ChatCompletionRequest {
    /// Prepends the anti-hallucination system message.
    ///
    /// This is message level: caller messages are never mutated, the guard
    /// is an additional system-role message in front of them.
    pub fn inject_prompt_guard(&mut self) {
        self.messages.insert(
            0,
            ChatMessage {
                role: "system".to_string(),
                content: PROMPT_GUARD.to_string(),
            },
        );
    }
}

/// Applies `f` to every string leaf of a JSON value, in place.
///
/// This is how unary responses are restored: the pipeline does not model
/// upstream response semantics, it only walks the strings.
pub fn rewrite_strings(value: &mut Value, f: &mut impl FnMut(&str) -> String) {
    match value {
        Value::String(s) => {
            let rewritten = f(s);
            if rewritten != *s {
                *s = rewritten;
            }
        }
        Value::Array(items) => {
            for item in items {
                rewrite_strings(item, f);
            }
        }
        Value::Object(map) => {
            for (_key, item) in map.iter_mut() {
                rewrite_strings(item, f);
            }
        }
        _ => {}
    }
}

/// Extracts the delta text of a streamed completion chunk, if present.
pub fn chunk_text(chunk: &Value) -> Option<&str> {
    chunk
        .pointer("/choices/0/delta/content")
        .and_then(Value::as_str)
}

/// Replaces the delta text of a streamed completion chunk.
pub fn set_chunk_text(chunk: &mut Value, text: &str) {
    if let Some(slot) = chunk.pointer_mut("/choices/0/delta/content") {
        *slot = Value::String(text.to_string());
    }
}

/// A minimal synthetic chunk carrying text the buffer released at flush.
pub fn flush_chunk(model: &str, text: &str) -> Value {
    serde_json::json!({
        "object": "chat.completion.chunk",
        "model": model,
        "choices": [{
            "index": 0,
            "delta": { "content": text },
            "finish_reason": null,
        }],
    })
}

/// Static model list served when the upstream is unreachable.
pub fn fallback_models() -> Value {
    serde_json::json!({
        "object": "list",
        "data": [
            { "id": "gpt-4o", "object": "model", "owned_by": "upstream" },
            { "id": "gpt-4o-mini", "object": "model", "owned_by": "upstream" },
        ],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_request_fields_round_trip() {
        let raw = serde_json::json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": "hi"}],
            "temperature": 0.2,
            "max_tokens": 64,
        });

        let req: ChatCompletionRequest = serde_json::from_value(raw).unwrap();
        assert!(!req.stream);
        assert_eq!(req.extra["temperature"], 0.2);

        let back = serde_json::to_value(&req).unwrap();
        assert_eq!(back["max_tokens"], 64);
        assert!(back.get("stream").is_none());
    }

    #[test]
    fn prompt_guard_is_prepended_as_a_system_message() {
        let mut req = ChatCompletionRequest {
            model: "gpt-4o".into(),
            messages: vec![ChatMessage {
                role: "user".into(),
                content: "hello".into(),
            }],
            stream: false,
            extra: Default::default(),
        };

        req.inject_prompt_guard();

        assert_eq!(req.messages.len(), 2);
        assert_eq!(req.messages[0].role, "system");
        assert!(req.messages[0].content.contains("<TYPE_N>"));
        // Caller content is untouched.
        assert_eq!(req.messages[1].content, "hello");
    }

    #[test]
    fn rewrite_strings_reaches_nested_values() {
        let mut value = serde_json::json!({
            "choices": [{"message": {"content": "Hi <PERSON_1>"}}],
            "usage": {"total_tokens": 9},
        });

        rewrite_strings(&mut value, &mut |s| s.replace("<PERSON_1>", "Alice"));

        assert_eq!(value["choices"][0]["message"]["content"], "Hi Alice");
        assert_eq!(value["usage"]["total_tokens"], 9);
    }

    #[test]
    fn chunk_text_round_trips() {
        let mut chunk = serde_json::json!({
            "choices": [{"index": 0, "delta": {"content": "Hi <PER"}, "finish_reason": null}],
        });
        assert_eq!(chunk_text(&chunk), Some("Hi <PER"));

        set_chunk_text(&mut chunk, "Hi ");
        assert_eq!(chunk_text(&chunk), Some("Hi "));
    }

    #[test]
    fn role_only_chunks_have_no_text() {
        let chunk = serde_json::json!({
            "choices": [{"index": 0, "delta": {"role": "assistant"}, "finish_reason": null}],
        });
        assert_eq!(chunk_text(&chunk), None);
    }
}
