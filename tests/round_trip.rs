//! Cross-module properties of the anonymize/deanonymize/stream chain.

use std::sync::Arc;
use std::time::Duration;

use cloak::anonymizer::Anonymizer;
use cloak::deanonymizer::{DeanonymizeOptions, deanonymize};
use cloak::detect::{Detector, DetectorRegistry, Span};
use cloak::mapping::Mapping;
use cloak::placeholder;
use cloak::strategy::{Strategy, StrategyTable};
use cloak::stream_buffer::StreamBuffer;

/// Dictionary detector standing in for the model-backed person detector.
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

fn engine(strategies: StrategyTable) -> Anonymizer {
    let mut registry = DetectorRegistry::with_defaults();
    registry.register(Arc::new(NameDetector(vec!["Alice", "Bob", "John"])));
    Anonymizer::new(Arc::new(registry), Arc::new(strategies))
}

fn opts() -> DeanonymizeOptions {
    DeanonymizeOptions::default()
}

#[test]
fn round_trip_holds_for_every_reversible_strategy() {
    let inputs = [
        "Email John at john@example.com",
        "Alice called Alice",
        "Bob (10.0.0.7) pinged Alice at alice@example.com and bob@example.com",
        "no pii at all",
    ];

    for strategy in [Strategy::Placeholder, Strategy::Synthetic, Strategy::Hash] {
        for input in inputs {
            let anonymizer = engine(StrategyTable::new(strategy));
            let mapping = Mapping::new("default", Duration::from_secs(300));
            let wire = anonymizer.anonymize(input, "en", &mapping);

            let record = mapping.to_record();
            let restored = deanonymize(&wire, &record, &opts());
            assert_eq!(restored.text, input, "{strategy:?} on {input:?}");
        }
    }
}

#[test]
fn one_way_strategies_do_not_round_trip_and_do_not_map() {
    let anonymizer = engine(StrategyTable::new(Strategy::Redact));
    let mapping = Mapping::new("default", Duration::from_secs(300));
    let wire = anonymizer.anonymize("Email John at john@example.com", "en", &mapping);

    assert_eq!(wire, "Email [REDACTED] at [REDACTED]");
    assert!(mapping.is_empty());
}

#[test]
fn anonymization_is_idempotent_over_its_own_output() {
    let anonymizer = engine(StrategyTable::default());
    let mapping = Mapping::new("default", Duration::from_secs(300));
    let once = anonymizer.anonymize(
        "John <john@example.com> met Alice (card 4111 1111 1111 1111)",
        "en",
        &mapping,
    );

    let second = Mapping::new("default", Duration::from_secs(300));
    let twice = anonymizer.anonymize(&once, "en", &second);
    assert_eq!(once, twice);
    assert!(second.is_empty());
}

#[test]
fn fuzzy_recovery_restores_model_rewritten_variants() {
    let anonymizer = engine(StrategyTable::default());
    let mapping = Mapping::new("default", Duration::from_secs(300));
    anonymizer.anonymize("ask Alice and mail alice@example.com", "en", &mapping);
    let record = mapping.to_record();

    let reply = "I asked [Person_1] to write to {email_1}; PERSON_1 agreed.";
    let restored = deanonymize(reply, &record, &opts());
    assert_eq!(
        restored.text,
        "I asked Alice to write to alice@example.com; Alice agreed."
    );
}

#[test]
fn stream_equals_unary_for_every_chunk_size() {
    let anonymizer = engine(StrategyTable::default());
    let mapping = Mapping::new("default", Duration::from_secs(300));
    anonymizer.anonymize(
        "Alice <alice@example.com> and Bob <bob@example.com>",
        "en",
        &mapping,
    );
    let record = Arc::new(mapping.to_record());

    let reply = "Dear <PERSON_1>, loop in <PERSON_2> (<EMAIL_2>) and cc <EMAIL_1>. \
                 Keep <tags> and math like 1 < 2 intact.";
    let expected = {
        let exact_only = DeanonymizeOptions {
            fuzzy: false,
            confidence_threshold: 0.85,
        };
        deanonymize(reply, &record, &exact_only).text
    };

    for chunk_size in 1..=13 {
        let mut buffer = StreamBuffer::new(record.clone(), placeholder::DEFAULT_MAX_PLACEHOLDER_LEN);
        let mut out = String::new();
        let bytes = reply.as_bytes();
        for chunk in bytes.chunks(chunk_size) {
            out.push_str(&buffer.push(std::str::from_utf8(chunk).unwrap()));
        }
        out.push_str(&buffer.flush());
        assert_eq!(out, expected, "chunk size {chunk_size}");
    }
}

#[test]
fn mapping_numbers_follow_first_appearance_order() {
    let anonymizer = engine(StrategyTable::default());
    let mapping = Mapping::new("default", Duration::from_secs(300));
    let wire = anonymizer.anonymize(
        "b@example.com then a@example.com then b@example.com",
        "en",
        &mapping,
    );

    assert_eq!(wire, "<EMAIL_1> then <EMAIL_2> then <EMAIL_1>");
}
