//! Placeholder token grammar.
//!
//! Placeholders are the wire-level substitutes for detected PII values:
//!
//! ```text
//! placeholder  := "<" TYPE "_" INTEGER ">"
//! TYPE         := [A-Z][A-Z0-9_]*
//! INTEGER      := [1-9][0-9]*
//! ```
//!
//! Neither `<` nor `>` may appear inside, and the total token length is
//! bounded by the configured maximum (25 by default). The grammar is a
//! bit-exact contract between the anonymizer, the deanonymizer and the
//! stream buffer, so all three go through this module.
//!
//! # Examples
//!
//! ```rust
//! use cloak::placeholder;
//!
//! let token = placeholder::format("EMAIL", 1);
//! assert_eq!(token, "<EMAIL_1>");
//! assert!(placeholder::is_exact(&token, 25));
//! assert_eq!(placeholder::parse(&token), Some(("EMAIL", 1)));
//! ```

/// Default upper bound on placeholder token length.
pub const DEFAULT_MAX_PLACEHOLDER_LEN: usize = 25;

/// Formats the canonical wire form `<TYPE_N>`.
pub fn format(entity_type: &str, n: u32) -> String {
    format!("<{entity_type}_{n}>")
}

/// Returns whether the whole token matches the placeholder grammar.
pub fn is_exact(token: &str, max_len: usize) -> bool {
    token.len() <= max_len && parse(token).is_some()
}

/// Parses an exact placeholder into its entity type and number.
pub fn parse(token: &str) -> Option<(&str, u32)> {
    let inner = token.strip_prefix('<')?.strip_suffix('>')?;
    let underscore = inner.rfind('_')?;
    let (ty, rest) = inner.split_at(underscore);
    let digits = &rest[1..];

    if ty.is_empty() || digits.is_empty() {
        return None;
    }

    let mut chars = ty.chars();
    let first = chars.next()?;
    if !first.is_ascii_uppercase() {
        return None;
    }
    if !chars.all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_') {
        return None;
    }

    if digits.starts_with('0') || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let n = digits.parse().ok()?;
    Some((ty, n))
}

/// Normalizes a detector entity name into a grammar-safe TYPE.
///
/// Lowercase letters are uppercased; anything outside `[A-Z0-9_]` becomes an
/// underscore. A leading digit gets an `X` prefix so the TYPE still starts
/// with a letter.
pub fn normalize_type(name: &str) -> String {
    let mut ty: String = name
        .chars()
        .map(|c| {
            let c = c.to_ascii_uppercase();
            if c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if ty.is_empty() || ty.starts_with(|c: char| !c.is_ascii_uppercase()) {
        ty.insert(0, 'X');
    }
    ty
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_and_parses_round_trip() {
        let token = format("CREDIT_CARD", 12);
        assert_eq!(token, "<CREDIT_CARD_12>");
        assert_eq!(parse(&token), Some(("CREDIT_CARD", 12)));
    }

    #[test]
    fn rejects_malformed_tokens() {
        assert_eq!(parse("<person_1>"), None); // lowercase type
        assert_eq!(parse("<PERSON_0>"), None); // zero index
        assert_eq!(parse("<PERSON_01>"), None); // leading zero
        assert_eq!(parse("<PERSON>"), None); // no number
        assert_eq!(parse("<_1>"), None); // empty type
        assert_eq!(parse("<PERSON 1>"), None); // whitespace
        assert_eq!(parse("PERSON_1"), None); // no brackets
        assert_eq!(parse("<PER<SON_1>"), None); // nested bracket
        assert_eq!(parse("<1TYPE_2>"), None); // type starts with digit
    }

    #[test]
    fn numbered_types_parse() {
        assert_eq!(parse("<ID_CARD_2_3>"), Some(("ID_CARD_2", 3)));
    }

    #[test]
    fn length_bound_is_enforced() {
        let token = format("A_VERY_LONG_ENTITY_TYPE_NAME", 1);
        assert!(!is_exact(&token, DEFAULT_MAX_PLACEHOLDER_LEN));
        assert!(is_exact("<EMAIL_1>", DEFAULT_MAX_PLACEHOLDER_LEN));
    }

    #[test]
    fn normalization_produces_grammar_safe_types() {
        assert_eq!(normalize_type("credit card"), "CREDIT_CARD");
        assert_eq!(normalize_type("email"), "EMAIL");
        assert_eq!(normalize_type("4digit"), "X4DIGIT");
    }
}
