//! Deanonymization engine: exact and fuzzy placeholder recovery.
//!
//! The exact pass replaces every wire value recorded in the mapping
//! (placeholders, synthetic values, hash digests) by plain substring
//! substitution, longest key first so a shorter key can never shadow the
//! prefix of a longer one.
//!
//! The fuzzy pass covers the variants upstream models actually emit instead
//! of the exact token: case changes, interior whitespace, alternative
//! brackets (`[]`, `{}`, `()`, `{{}}`), alternative separators (`-`, space,
//! `:`, `#`), and bare forms without brackets. Candidates are canonicalized
//! back to `<TYPE_N>` and looked up in the mapping; overlapping candidates
//! resolve to the longest match. Bare candidates carry a confidence and are
//! accepted only at or above the configured threshold: 0.9 when the bare
//! text is exactly `TYPE_N`, 0.75 for case variants. The default threshold
//! of 0.85 therefore accepts exact-case bare tokens and rejects the rest.
//!
//! Placeholder-shaped tokens still present after both passes are reported as
//! `unresolved`; that is observability, not an error.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::mapping::MappingRecord;
use crate::placeholder;

/// Per-request recovery options.
#[derive(Debug, Clone)]
pub struct DeanonymizeOptions {
    /// Enables the fuzzy variant pass.
    pub fuzzy: bool,
    /// Minimum confidence for accepting bare (bracketless) variants.
    pub confidence_threshold: f32,
}

impl Default for DeanonymizeOptions {
    fn default() -> Self {
        Self {
            fuzzy: true,
            confidence_threshold: 0.85,
        }
    }
}

/// Restoration result.
#[derive(Debug, Clone, PartialEq)]
pub struct Deanonymized {
    /// Text with recovered values substituted back in.
    pub text: String,
    /// How many substitutions were made across both passes.
    pub replaced: usize,
    /// Placeholder-shaped tokens left in the output, deduplicated.
    pub unresolved: Vec<String>,
}

/// Bracketed fuzzy variants: any of `<> [] {} (() {{}}` around an optionally
/// spaced `TYPE sep N`, case-insensitive via canonicalization.
static BRACKETED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(<|\[|\{\{|\{|\()\s*([A-Za-z][A-Za-z0-9_]*)\s*[_\-:#\x20]\s*([0-9]+)\s*(>|\]|\}\}|\}|\))",
    )
    .expect("bracketed variant pattern compiles")
});

/// Bare variants: `TYPE_N` bounded by word boundaries or punctuation.
static BARE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b([A-Za-z][A-Za-z0-9_]*)_([0-9]+)\b").expect("bare variant pattern compiles")
});

/// Exact placeholder shape, for unresolved reporting.
static EXACT_SHAPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<[A-Z][A-Z0-9_]*_[0-9]+>").expect("placeholder shape pattern compiles")
});

/// Restores mapped values in `text` according to the options.
pub fn deanonymize(text: &str, record: &MappingRecord, opts: &DeanonymizeOptions) -> Deanonymized {
    let mut replaced = 0;
    let mut out = exact_pass(text, record, &mut replaced);

    if opts.fuzzy {
        out = fuzzy_pass(&out, record, opts, &mut replaced);
    }

    Deanonymized {
        unresolved: find_placeholders(&out),
        text: out,
        replaced,
    }
}

/// Longest-key-first substring replacement over both mapping indices.
fn exact_pass(text: &str, record: &MappingRecord, replaced: &mut usize) -> String {
    let mut keys: Vec<(&String, &String)> = record
        .entries
        .iter()
        .chain(record.digests.iter())
        .map(|(wire, entry)| (wire, &entry.original))
        .collect();
    keys.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(b.0)));

    let mut out = text.to_string();
    for (wire, original) in keys {
        let hits = out.matches(wire.as_str()).count();
        if hits > 0 {
            out = out.replace(wire.as_str(), original);
            *replaced += hits;
        }
    }
    out
}

struct Candidate<'a> {
    start: usize,
    end: usize,
    original: &'a str,
}

/// Whether open/close brackets form one of the accepted pairs.
fn brackets_pair(open: &str, close: &str) -> bool {
    matches!(
        (open, close),
        ("<", ">") | ("[", "]") | ("{", "}") | ("{{", "}}") | ("(", ")")
    )
}

/// Looks a canonicalized variant up in the mapping's placeholder index.
fn lookup<'a>(record: &'a MappingRecord, ty: &str, num: &str) -> Option<&'a str> {
    let n: u32 = num.parse().ok()?;
    if n == 0 {
        return None;
    }
    let canonical = placeholder::format(&ty.to_ascii_uppercase(), n);
    record
        .entries
        .get(&canonical)
        .map(|entry| entry.original.as_str())
}

/// Collects variant candidates and rewrites the text, longest match first
/// on overlaps.
fn fuzzy_pass(
    text: &str,
    record: &MappingRecord,
    opts: &DeanonymizeOptions,
    replaced: &mut usize,
) -> String {
    let mut candidates: Vec<Candidate> = Vec::new();

    for caps in BRACKETED.captures_iter(text) {
        let open = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        let close = caps.get(4).map(|m| m.as_str()).unwrap_or_default();
        if !brackets_pair(open, close) {
            continue;
        }

        if let Some(original) = lookup(record, &caps[2], &caps[3]) {
            let m = caps.get(0).expect("match always has a full group");
            candidates.push(Candidate {
                start: m.start(),
                end: m.end(),
                original,
            });
        }
    }

    for caps in BARE.captures_iter(text) {
        if let Some(original) = lookup(record, &caps[1], &caps[2]) {
            let m = caps.get(0).expect("match always has a full group");
            let exact_case = caps[1]
                .bytes()
                .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit() || b == b'_');
            let confidence = if exact_case { 0.9 } else { 0.75 };
            if confidence >= opts.confidence_threshold {
                candidates.push(Candidate {
                    start: m.start(),
                    end: m.end(),
                    original,
                });
            }
        }
    }

    if candidates.is_empty() {
        return text.to_string();
    }

    // Earliest start first; at the same start, longest match wins.
    candidates.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| b.end.cmp(&a.end)));

    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for candidate in candidates {
        if candidate.start < cursor {
            continue;
        }
        out.push_str(&text[cursor..candidate.start]);
        out.push_str(candidate.original);
        cursor = candidate.end;
        *replaced += 1;
    }
    out.push_str(&text[cursor..]);
    out
}

/// Exact-grammar placeholder tokens present in `text`, deduplicated in
/// order of first appearance.
pub fn find_placeholders(text: &str) -> Vec<String> {
    let mut seen = Vec::new();
    for m in EXACT_SHAPE.find_iter(text) {
        let token = m.as_str();
        if placeholder::parse(token).is_some() && !seen.iter().any(|s| s == token) {
            seen.push(token.to_string());
        }
    }
    seen
}
