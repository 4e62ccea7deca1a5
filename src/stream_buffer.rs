//! Chunk-safe placeholder substitution over an unbounded stream.
//!
//! Upstream responses arrive as text chunks that can split a placeholder at
//! any byte boundary. The buffer keeps a sliding suffix carry: every byte
//! that can no longer be the start of a placeholder is emitted immediately,
//! while a pending `<`-run short enough to still close into a valid token is
//! held until the next chunk decides it.
//!
//! Behavior per incoming chunk:
//! - Text before a `<` is always safe and is emitted as-is.
//! - A complete `<...>` token is restored through the mapping when it is an
//!   exact placeholder the mapping knows; otherwise it passes verbatim.
//! - A second `<` before any `>` proves the first run is not a placeholder;
//!   everything before the second `<` is released.
//! - An open run longer than the placeholder length bound cannot close into
//!   a valid token and is released verbatim.
//!
//! Fuzzy variants (other bracket styles) are not handled in-stream: `[`,
//! `{` and `(` are too common in prose, and gatekeeping them would stall
//! every chunk. Non-streaming responses get the full fuzzy pass instead.
//!
//! On close, [`flush`] returns the remaining carry unchanged. The carry
//! never exceeds the placeholder length bound between calls, and never
//! exceeds that bound plus one chunk within a call.
//!
//! [`flush`]: StreamBuffer::flush

use std::sync::Arc;

use crate::{mapping::MappingRecord, placeholder};

/// Sliding-suffix-carry substitution buffer for one response stream.
pub struct StreamBuffer {
    carry: String,
    record: Arc<MappingRecord>,
    max_len: usize,
}

impl StreamBuffer {
    /// Creates a buffer over the request's mapping record.
    pub fn new(record: Arc<MappingRecord>, max_placeholder_len: usize) -> Self {
        Self {
            carry: String::new(),
            record,
            max_len: max_placeholder_len.max(4),
        }
    }

    /// Feeds one chunk, returning every byte that is safe to emit.
    pub fn push(&mut self, chunk: &str) -> String {
        self.carry.push_str(chunk);
        let mut out = String::with_capacity(chunk.len());

        loop {
            let Some(lt) = self.carry.find('<') else {
                // No pending bracket; the whole carry is safe.
                out.push_str(&self.carry);
                self.carry.clear();
                break;
            };

            out.push_str(&self.carry[..lt]);
            self.carry.drain(..lt);

            // Carry now starts at the candidate `<`.
            match self.carry[1..].find(['<', '>']) {
                Some(rel) if self.carry.as_bytes()[rel + 1] == b'>' => {
                    let token_len = rel + 2;
                    let restored = {
                        let token = &self.carry[..token_len];
                        if placeholder::is_exact(token, self.max_len) {
                            self.record.entries.get(token).map(|e| e.original.clone())
                        } else {
                            None
                        }
                    };
                    match restored {
                        Some(original) => out.push_str(&original),
                        None => out.push_str(&self.carry[..token_len]),
                    }
                    self.carry.drain(..token_len);
                }
                Some(rel) => {
                    // Another `<` before any `>`: the first run is dead.
                    out.push_str(&self.carry[..rel + 1]);
                    self.carry.drain(..rel + 1);
                }
                None => {
                    if self.carry.len() > self.max_len {
                        // Too long to ever close into a valid token.
                        out.push_str(&self.carry);
                        self.carry.clear();
                    }
                    break;
                }
            }
        }

        out
    }

    /// Releases the remaining carry verbatim at end of stream.
    pub fn flush(&mut self) -> String {
        std::mem::take(&mut self.carry)
    }

    /// Bytes currently held back awaiting more input.
    pub fn carry_len(&self) -> usize {
        self.carry.len()
    }
}
