//! Rewrite strategies for detected PII values.
//!
//! Each entity type resolves to one of five strategies. Placeholder and
//! synthetic are reversible through the mapping's main index; hash is
//! reversible through the digest shadow index; mask and redact are one-way
//! and never enter the mapping.
//!
//! The engine guarantees that two occurrences of the same
//! `(entity_type, original)` within one request produce the same wire value,
//! and that replacement works purely on returned strings so the rewriter can
//! recompute positions (replacement length differs from the original's).

use std::collections::HashMap;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

use crate::{mapping::Mapping, placeholder};

/// The rewrite rule applied to one entity type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// `<TYPE_N>` token; the default.
    Placeholder,
    /// Realistic fake value of the same shape.
    Synthetic,
    /// Hex digest of `entity_type ∥ original`, reversible via the store.
    Hash,
    /// Format-preserving partial reveal; not reversible.
    Mask,
    /// Fixed `[REDACTED]` token; not reversible.
    Redact,
}

impl Strategy {
    /// Whether the strategy records an entry that restoration can use.
    pub fn reversible(self) -> bool {
        matches!(self, Self::Placeholder | Self::Synthetic | Self::Hash)
    }
}

/// Per-entity-type strategy dispatch table.
#[derive(Debug, Clone)]
pub struct StrategyTable {
    per_type: HashMap<String, Strategy>,
    default: Strategy,
}

impl StrategyTable {
    pub fn new(default: Strategy) -> Self {
        Self {
            per_type: HashMap::new(),
            default,
        }
    }

    pub fn set(&mut self, entity_type: &str, strategy: Strategy) -> &mut Self {
        self.per_type
            .insert(placeholder::normalize_type(entity_type), strategy);
        self
    }

    pub fn for_type(&self, entity_type: &str) -> Strategy {
        self.per_type
            .get(entity_type)
            .copied()
            .unwrap_or(self.default)
    }
}

impl Default for StrategyTable {
    fn default() -> Self {
        Self::new(Strategy::Placeholder)
    }
}

/// Produces the wire value for one detected original, recording reversible
/// replacements into the mapping.
pub fn apply(strategy: Strategy, entity_type: &str, original: &str, mapping: &Mapping) -> String {
    match strategy {
        Strategy::Placeholder => {
            mapping.intern(entity_type, original, |n| placeholder::format(entity_type, n))
        }
        Strategy::Synthetic => {
            mapping.intern(entity_type, original, |n| synthetic_value(entity_type, n))
        }
        Strategy::Hash => {
            let digest = sha1_hex(&[entity_type.as_bytes(), original.as_bytes()].concat());
            mapping.insert_digest(&digest, entity_type, original);
            digest
        }
        Strategy::Mask => mask_value(original),
        Strategy::Redact => "[REDACTED]".to_string(),
    }
}

/// Hex sha1 digest, shared with the response-cache keying.
pub(crate) fn sha1_hex(input: &[u8]) -> String {
    let digest = Sha1::digest(input);
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

const FAKE_FIRST_NAMES: &[&str] = &[
    "Avery", "Blake", "Casey", "Dana", "Ellis", "Finley", "Gray", "Harper", "Indigo", "Jules",
    "Kai", "Lane", "Morgan", "Noel", "Oakley", "Parker",
];

const FAKE_LAST_NAMES: &[&str] = &[
    "Adler", "Brooks", "Calder", "Doyle", "Ember", "Frost", "Gale", "Hart", "Iris", "Jensen",
    "Kerr", "Lowe", "Marsh", "North", "Onda", "Pace",
];

/// Deterministic fake value of the same shape, unique per counter number.
fn synthetic_value(entity_type: &str, n: u32) -> String {
    match entity_type {
        "EMAIL" => format!("user{n}@example.com"),
        "PHONE" => format!("+1-555-{:04}", 100 + n),
        "PERSON" => {
            let grid = (FAKE_FIRST_NAMES.len() * FAKE_LAST_NAMES.len()) as u32;
            if n <= grid {
                let idx = (n - 1) as usize;
                format!(
                    "{} {}",
                    FAKE_FIRST_NAMES[idx % FAKE_FIRST_NAMES.len()],
                    FAKE_LAST_NAMES[idx / FAKE_FIRST_NAMES.len()]
                )
            } else {
                format!("Resident {n}")
            }
        }
        "IP" => {
            // TEST-NET ranges, one address per counter value.
            let block = (n - 1) / 254;
            let host = (n - 1) % 254 + 1;
            match block {
                0 => format!("192.0.2.{host}"),
                1 => format!("198.51.100.{host}"),
                _ => format!("203.0.113.{host}"),
            }
        }
        "CREDIT_CARD" => format!("4000-0000-0000-{:04}", n % 10_000),
        _ => format!("{}-sample-{n}", entity_type.to_ascii_lowercase()),
    }
}

/// Keeps the first and last two characters, filling the rest with `*` so the
/// masked value has the original's length.
fn mask_value(original: &str) -> String {
    let chars: Vec<char> = original.chars().collect();
    if chars.len() <= 4 {
        return "*".repeat(chars.len());
    }

    let mut masked = String::with_capacity(original.len());
    masked.extend(&chars[..2]);
    masked.extend(std::iter::repeat_n('*', chars.len() - 4));
    masked.extend(&chars[chars.len() - 2..]);
    masked
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn mapping() -> Mapping {
        Mapping::new("default", Duration::from_secs(300))
    }

    #[test]
    fn placeholder_strategy_interns_into_the_mapping() {
        let m = mapping();
        let wire = apply(Strategy::Placeholder, "EMAIL", "a@example.com", &m);
        assert_eq!(wire, "<EMAIL_1>");
        assert_eq!(m.len(), 1);
    }

    #[test]
    fn same_original_yields_the_same_wire_value() {
        let m = mapping();
        for strategy in [Strategy::Placeholder, Strategy::Synthetic, Strategy::Hash] {
            let a = apply(strategy, "EMAIL", "same@example.com", &m);
            let b = apply(strategy, "EMAIL", "same@example.com", &m);
            assert_eq!(a, b);
        }
    }

    #[test]
    fn only_reversible_strategies_touch_the_mapping() {
        let m = mapping();
        apply(Strategy::Mask, "PHONE", "555-867-5309", &m);
        apply(Strategy::Redact, "ID", "123-45-6789", &m);
        assert!(m.is_empty());

        apply(Strategy::Hash, "PHONE", "555-867-5309", &m);
        assert!(!m.is_empty());
    }

    #[test]
    fn hash_is_stable_and_recorded_in_the_shadow_index() {
        let m = mapping();
        let digest = apply(Strategy::Hash, "EMAIL", "a@example.com", &m);
        assert_eq!(digest.len(), 40);
        assert_eq!(digest, sha1_hex(b"EMAILa@example.com"));

        let record = m.to_record();
        assert_eq!(record.digests[&digest].original, "a@example.com");
    }

    #[test]
    fn synthetic_values_differ_per_counter() {
        let m = mapping();
        let a = apply(Strategy::Synthetic, "EMAIL", "x@example.com", &m);
        let b = apply(Strategy::Synthetic, "EMAIL", "y@example.com", &m);
        assert_ne!(a, b);
        assert_eq!(a, "user1@example.com");
        assert_eq!(b, "user2@example.com");
    }

    #[test]
    fn synthetic_person_names_are_unique_within_the_grid() {
        let mut seen = std::collections::HashSet::new();
        for n in 1..=256u32 {
            assert!(seen.insert(synthetic_value("PERSON", n)));
        }
    }

    #[test]
    fn mask_preserves_length_and_edges() {
        assert_eq!(mask_value("555-867-5309"), "55********09");
        assert_eq!(mask_value("abc"), "***");
    }

    #[test]
    fn strategy_table_dispatches_with_default_fallback() {
        let mut table = StrategyTable::default();
        table.set("credit_card", Strategy::Mask);

        assert_eq!(table.for_type("CREDIT_CARD"), Strategy::Mask);
        assert_eq!(table.for_type("EMAIL"), Strategy::Placeholder);
    }
}
