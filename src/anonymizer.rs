//! Anonymization engine: detection, strategy dispatch, text rewriting.
//!
//! The anonymizer orchestrates the detector registry, the strategy table and
//! the per-request mapping: detected spans are replaced by their strategy's
//! wire value, and the text is rebuilt by interleaving the untouched slices
//! with the replacements. Reversible replacements are recorded in the
//! mapping as a side effect of strategy application.
//!
//! The anti-hallucination instruction lives here too, but it is message
//! level: the pipeline prepends it as an additional system message, it is
//! never spliced into caller content.

use std::sync::Arc;

use crate::{detect::DetectorRegistry, mapping::Mapping, strategy, strategy::StrategyTable};

/// System-message text instructing the upstream model to preserve
/// placeholders verbatim.
pub const PROMPT_GUARD: &str = "Some values in this conversation have been replaced by privacy \
placeholders of the form <TYPE_N>, where TYPE is an uppercase category and N a number \
(for example <PERSON_1> or <EMAIL_2>). Treat every placeholder as an opaque identifier: \
repeat it exactly as written, and never translate it, reformat it, or invent new ones.";

/// Detection plus strategy-driven rewriting over one request's mapping.
pub struct Anonymizer {
    registry: Arc<DetectorRegistry>,
    strategies: Arc<StrategyTable>,
}

impl Anonymizer {
    /// Builds an anonymizer over a registry snapshot and strategy table.
    ///
    /// The snapshot is held for the anonymizer's lifetime, so a hot reload
    /// mid-request cannot change which detectors a request sees.
    pub fn new(registry: Arc<DetectorRegistry>, strategies: Arc<StrategyTable>) -> Self {
        Self {
            registry,
            strategies,
        }
    }

    /// Rewrites `text`, recording reversible replacements in `mapping`.
    pub fn anonymize(&self, text: &str, language: &str, mapping: &Mapping) -> String {
        let spans = self.registry.detect(text, language);
        if spans.is_empty() {
            return text.to_string();
        }

        let mut out = String::with_capacity(text.len());
        let mut cursor = 0;
        for span in spans {
            out.push_str(&text[cursor..span.start]);
            let strategy = self.strategies.for_type(&span.entity_type);
            out.push_str(&strategy::apply(
                strategy,
                &span.entity_type,
                &span.text,
                mapping,
            ));
            cursor = span.end;
        }
        out.push_str(&text[cursor..]);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{Detector, Span};
    use std::time::Duration;

    /// Dictionary-backed stand-in for the model-based person detector.
    struct NameDetector(Vec<&'static str>);

    impl Detector for NameDetector {
        fn name(&self) -> &str {
            "PERSON"
        }

        fn detect(&self, text: &str, _language: &str) -> Vec<Span> {
            let mut spans = Vec::new();
            for name in &self.0 {
                let mut offset = 0;
                while let Some(pos) = text[offset..].find(name) {
                    let start = offset + pos;
                    spans.push(Span {
                        entity_type: "PERSON".to_string(),
                        start,
                        end: start + name.len(),
                        score: 0.9,
                        text: (*name).to_string(),
                    });
                    offset = start + name.len();
                }
            }
            spans
        }
    }

    fn anonymizer() -> Anonymizer {
        let mut registry = DetectorRegistry::with_defaults();
        registry.register(Arc::new(NameDetector(vec!["John", "Alice"])));
        Anonymizer::new(Arc::new(registry), Arc::new(StrategyTable::default()))
    }

    #[test]
    fn replaces_spans_and_fills_the_mapping() {
        let mapping = Mapping::new("default", Duration::from_secs(300));
        let out = anonymizer().anonymize("Email John at john@example.com", "en", &mapping);

        assert_eq!(out, "Email <PERSON_1> at <EMAIL_1>");
        assert_eq!(mapping.len(), 2);

        let record = mapping.to_record();
        assert_eq!(record.entries["<PERSON_1>"].original, "John");
        assert_eq!(record.entries["<EMAIL_1>"].original, "john@example.com");
    }

    #[test]
    fn repeated_values_collapse_to_one_placeholder() {
        let mapping = Mapping::new("default", Duration::from_secs(300));
        let out = anonymizer().anonymize("Alice called Alice", "en", &mapping);

        assert_eq!(out, "<PERSON_1> called <PERSON_1>");
        assert_eq!(mapping.len(), 1);
    }

    #[test]
    fn anonymization_is_idempotent() {
        let mapping = Mapping::new("default", Duration::from_secs(300));
        let engine = anonymizer();
        let once = engine.anonymize("Reach Alice at alice@example.com or 10.0.0.1", "en", &mapping);

        let second_mapping = Mapping::new("default", Duration::from_secs(300));
        let twice = engine.anonymize(&once, "en", &second_mapping);

        assert_eq!(once, twice);
        assert!(second_mapping.is_empty());
    }

    #[test]
    fn untouched_text_passes_through() {
        let mapping = Mapping::new("default", Duration::from_secs(300));
        let out = anonymizer().anonymize("nothing sensitive here", "en", &mapping);

        assert_eq!(out, "nothing sensitive here");
        assert!(mapping.is_empty());
    }

    #[test]
    fn prompt_guard_documents_the_exact_format() {
        assert!(PROMPT_GUARD.contains("<TYPE_N>"));
        assert!(PROMPT_GUARD.contains("<PERSON_1>"));
    }
}
