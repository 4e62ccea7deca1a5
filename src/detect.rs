//! PII detectors and the registry that composes them.
//!
//! Detectors are black boxes behind the [`Detector`] trait: given text and a
//! language hint they return candidate [`Span`]s. The registry invokes every
//! registered detector, drops allowlisted terms, resolves overlaps in favor
//! of the higher score (ties toward the longer span, then the earlier
//! start), and returns a canonical list of non-overlapping spans ordered by
//! start offset.
//!
//! The registry itself is stateless across requests and published as an
//! immutable snapshot through [`RegistryHandle`]; a hot reload builds a new
//! registry and swaps the pointer while in-flight requests keep the snapshot
//! they started with.
//!
//! The built-in detectors are regex based (email, phone, IP, credit card
//! with a Luhn check, national id, plus custom patterns loaded from a JSON
//! file). Model-backed name detection plugs in through the same trait and is
//! deliberately not implemented here.

use std::collections::HashSet;
use std::sync::Arc;

use arc_swap::ArcSwap;
use regex::Regex;
use serde::Deserialize;

/// A detection result: a half-open byte range tagged with an entity type.
#[derive(Debug, Clone, PartialEq)]
pub struct Span {
    /// Uppercase entity type, e.g. `EMAIL`.
    pub entity_type: String,
    /// Start byte offset into the scanned text.
    pub start: usize,
    /// End byte offset (exclusive).
    pub end: usize,
    /// Detector confidence in `[0, 1]`.
    pub score: f32,
    /// The matched text.
    pub text: String,
}

impl Span {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Black-box PII detector interface.
pub trait Detector: Send + Sync {
    /// Identifier used in logs.
    fn name(&self) -> &str;

    /// Returns candidate spans for the given text and language hint.
    fn detect(&self, text: &str, language: &str) -> Vec<Span>;
}

/// Regex-backed detector with a fixed entity type and score.
pub struct RegexDetector {
    entity_type: String,
    regex: Regex,
    score: f32,
}

impl RegexDetector {
    /// Compiles a detector from a pattern.
    pub fn new(entity_type: &str, pattern: &str, score: f32) -> anyhow::Result<Self> {
        Ok(Self {
            entity_type: crate::placeholder::normalize_type(entity_type),
            regex: Regex::new(pattern)?,
            score: score.clamp(0.0, 1.0),
        })
    }
}

impl Detector for RegexDetector {
    fn name(&self) -> &str {
        &self.entity_type
    }

    fn detect(&self, text: &str, _language: &str) -> Vec<Span> {
        self.regex
            .find_iter(text)
            .map(|m| Span {
                entity_type: self.entity_type.clone(),
                start: m.start(),
                end: m.end(),
                score: self.score,
                text: m.as_str().to_string(),
            })
            .collect()
    }
}

/// Email address detector.
pub fn email() -> RegexDetector {
    RegexDetector::new(
        "EMAIL",
        r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}",
        0.95,
    )
    .expect("built-in email pattern compiles")
}

/// Phone number detector. Loose on purpose; overlap resolution prefers the
/// higher-scored detectors when digits could be something else.
pub fn phone() -> RegexDetector {
    RegexDetector::new("PHONE", r"\+?[0-9][0-9()\s.\-]{6,14}[0-9]", 0.6)
        .expect("built-in phone pattern compiles")
}

/// US social security number shape.
pub fn national_id() -> RegexDetector {
    RegexDetector::new("ID", r"\b[0-9]{3}-[0-9]{2}-[0-9]{4}\b", 0.85)
        .expect("built-in id pattern compiles")
}

/// IPv4 detector that validates each octet.
pub struct IpDetector {
    regex: Regex,
}

impl IpDetector {
    pub fn new() -> Self {
        Self {
            regex: Regex::new(r"\b[0-9]{1,3}\.[0-9]{1,3}\.[0-9]{1,3}\.[0-9]{1,3}\b")
                .expect("built-in ip pattern compiles"),
        }
    }
}

impl Default for IpDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl Detector for IpDetector {
    fn name(&self) -> &str {
        "IP"
    }

    fn detect(&self, text: &str, _language: &str) -> Vec<Span> {
        self.regex
            .find_iter(text)
            .filter(|m| {
                m.as_str()
                    .split('.')
                    .all(|octet| octet.parse::<u16>().map(|v| v <= 255).unwrap_or(false))
            })
            .map(|m| Span {
                entity_type: "IP".to_string(),
                start: m.start(),
                end: m.end(),
                score: 0.85,
                text: m.as_str().to_string(),
            })
            .collect()
    }
}

/// Credit card detector: digit-run shape plus a Luhn checksum.
pub struct CreditCardDetector {
    regex: Regex,
}

impl CreditCardDetector {
    pub fn new() -> Self {
        Self {
            regex: Regex::new(r"\b(?:[0-9][ \-]?){12,18}[0-9]\b")
                .expect("built-in credit card pattern compiles"),
        }
    }
}

impl Default for CreditCardDetector {
    fn default() -> Self {
        Self::new()
    }
}

fn luhn_valid(digits: &[u8]) -> bool {
    if digits.len() < 13 || digits.len() > 19 {
        return false;
    }
    let mut sum = 0u32;
    for (i, d) in digits.iter().rev().enumerate() {
        let mut v = u32::from(*d);
        if i % 2 == 1 {
            v *= 2;
            if v > 9 {
                v -= 9;
            }
        }
        sum += v;
    }
    sum % 10 == 0
}

impl Detector for CreditCardDetector {
    fn name(&self) -> &str {
        "CREDIT_CARD"
    }

    fn detect(&self, text: &str, _language: &str) -> Vec<Span> {
        self.regex
            .find_iter(text)
            .filter(|m| {
                let digits: Vec<u8> = m
                    .as_str()
                    .bytes()
                    .filter(|b| b.is_ascii_digit())
                    .map(|b| b - b'0')
                    .collect();
                luhn_valid(&digits)
            })
            .map(|m| Span {
                entity_type: "CREDIT_CARD".to_string(),
                start: m.start(),
                end: m.end(),
                score: 0.95,
                text: m.as_str().to_string(),
            })
            .collect()
    }
}

/// Case-insensitive set of terms that must not be treated as PII.
#[derive(Debug, Default, Clone)]
pub struct Allowlist {
    terms: HashSet<String>,
}

impl Allowlist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, term: &str) {
        self.terms.insert(term.trim().to_lowercase());
    }

    pub fn contains(&self, text: &str) -> bool {
        self.terms.contains(&text.trim().to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }
}

impl<S: AsRef<str>> FromIterator<S> for Allowlist {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut list = Self::new();
        for term in iter {
            list.add(term.as_ref());
        }
        list
    }
}

/// Composes registered detectors into canonical span lists.
pub struct DetectorRegistry {
    detectors: Vec<Arc<dyn Detector>>,
    allowlist: Allowlist,
}

impl DetectorRegistry {
    /// An empty registry; useful as a base for custom builds.
    pub fn new() -> Self {
        Self {
            detectors: Vec::new(),
            allowlist: Allowlist::new(),
        }
    }

    /// A registry with the built-in regex detectors registered.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(email()));
        registry.register(Arc::new(phone()));
        registry.register(Arc::new(national_id()));
        registry.register(Arc::new(IpDetector::new()));
        registry.register(Arc::new(CreditCardDetector::new()));
        registry
    }

    pub fn register(&mut self, detector: Arc<dyn Detector>) -> &mut Self {
        self.detectors.push(detector);
        self
    }

    pub fn set_allowlist(&mut self, allowlist: Allowlist) -> &mut Self {
        self.allowlist = allowlist;
        self
    }

    /// Runs every detector and resolves the candidates into a canonical,
    /// non-overlapping list ordered by start offset.
    pub fn detect(&self, text: &str, language: &str) -> Vec<Span> {
        let mut candidates = Vec::new();
        for detector in &self.detectors {
            candidates.extend(detector.detect(text, language));
        }

        candidates.retain(|span| !span.is_empty() && !self.allowlist.contains(&span.text));

        candidates.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| b.len().cmp(&a.len()))
                .then_with(|| a.start.cmp(&b.start))
        });

        let mut accepted: Vec<Span> = Vec::new();
        for candidate in candidates {
            if accepted.iter().all(|span| !span.overlaps(&candidate)) {
                accepted.push(candidate);
            }
        }

        accepted.sort_by_key(|span| span.start);
        accepted
    }
}

impl Default for DetectorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Published registry snapshot with pointer-swap hot reload.
pub struct RegistryHandle {
    inner: ArcSwap<DetectorRegistry>,
}

impl RegistryHandle {
    pub fn new(registry: DetectorRegistry) -> Self {
        Self {
            inner: ArcSwap::from_pointee(registry),
        }
    }

    /// The current snapshot. Callers hold it for the whole request.
    pub fn snapshot(&self) -> Arc<DetectorRegistry> {
        self.inner.load_full()
    }

    /// Publishes a rebuilt registry. In-flight requests are unaffected.
    pub fn publish(&self, registry: DetectorRegistry) {
        self.inner.store(Arc::new(registry));
    }
}

/// One custom pattern file entry.
#[derive(Debug, Deserialize)]
struct CustomPattern {
    entity_type: String,
    pattern: String,
    #[serde(default = "default_custom_score")]
    score: f32,
}

fn default_custom_score() -> f32 {
    0.8
}

/// Loads custom regex detectors from a JSON file.
///
/// The file is a JSON array of `{entity_type, pattern, score?}` objects.
pub fn load_custom_patterns(path: &str) -> anyhow::Result<Vec<RegexDetector>> {
    let raw = std::fs::read_to_string(path)?;
    let patterns: Vec<CustomPattern> = serde_json::from_str(&raw)?;

    patterns
        .iter()
        .map(|p| RegexDetector::new(&p.entity_type, &p.pattern, p.score))
        .collect()
}

/// Loads allowlist terms from every file in a directory, one term per line.
/// Blank lines and `#` comments are skipped.
pub fn load_allowlists(dir: &str) -> anyhow::Result<Allowlist> {
    let mut allowlist = Allowlist::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let content = std::fs::read_to_string(entry.path())?;
        for line in content.lines() {
            let term = line.trim();
            if !term.is_empty() && !term.starts_with('#') {
                allowlist.add(term);
            }
        }
    }
    Ok(allowlist)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_emails_and_orders_by_start() {
        let registry = DetectorRegistry::with_defaults();
        let spans = registry.detect("Write b@example.com or a@example.com today", "en");

        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].text, "b@example.com");
        assert_eq!(spans[1].text, "a@example.com");
        assert!(spans[0].start < spans[1].start);
        assert!(spans.iter().all(|s| s.entity_type == "EMAIL"));
    }

    #[test]
    fn higher_score_wins_overlaps() {
        // A Luhn-valid card number also matches the loose phone shape; the
        // card detector's score must win.
        let registry = DetectorRegistry::with_defaults();
        let spans = registry.detect("Card: 4111 1111 1111 1111.", "en");

        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].entity_type, "CREDIT_CARD");
    }

    #[test]
    fn luhn_rejects_non_card_digit_runs() {
        let detector = CreditCardDetector::new();
        assert!(detector.detect("4111 1111 1111 1112", "en").is_empty());
        assert_eq!(detector.detect("4111 1111 1111 1111", "en").len(), 1);
    }

    #[test]
    fn ip_octets_are_validated() {
        let detector = IpDetector::new();
        assert_eq!(detector.detect("host at 10.0.0.1", "en").len(), 1);
        assert!(detector.detect("version 999.999.999.999", "en").is_empty());

        // At the registry level the validated IP outranks the loose phone shape.
        let registry = DetectorRegistry::with_defaults();
        let spans = registry.detect("host at 10.0.0.1", "en");
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].entity_type, "IP");
    }

    #[test]
    fn allowlisted_terms_are_dropped() {
        let mut registry = DetectorRegistry::with_defaults();
        registry.set_allowlist(Allowlist::from_iter(["support@example.com"]));

        let spans = registry.detect("Mail SUPPORT@example.com or a@example.com", "en");
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].text, "a@example.com");
    }

    #[test]
    fn ties_break_toward_longer_spans() {
        struct Fixed(Vec<Span>);
        impl Detector for Fixed {
            fn name(&self) -> &str {
                "FIXED"
            }
            fn detect(&self, _text: &str, _language: &str) -> Vec<Span> {
                self.0.clone()
            }
        }

        let short = Span {
            entity_type: "A".into(),
            start: 0,
            end: 4,
            score: 0.9,
            text: "shor".into(),
        };
        let long = Span {
            entity_type: "B".into(),
            start: 2,
            end: 10,
            score: 0.9,
            text: "ort-long".into(),
        };

        let mut registry = DetectorRegistry::new();
        registry.register(Arc::new(Fixed(vec![short, long.clone()])));

        let spans = registry.detect("short-long", "en");
        assert_eq!(spans, vec![long]);
    }

    #[test]
    fn snapshot_survives_a_publish() {
        let handle = RegistryHandle::new(DetectorRegistry::with_defaults());
        let snapshot = handle.snapshot();

        handle.publish(DetectorRegistry::new());

        // The old snapshot still detects; new snapshots see the empty registry.
        assert!(!snapshot.detect("a@example.com", "en").is_empty());
        assert!(handle.snapshot().detect("a@example.com", "en").is_empty());
    }
}
