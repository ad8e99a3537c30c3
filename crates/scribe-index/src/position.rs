//! Fractional position key generation.
//!
//! Position keys are strings over the 26 lowercase letters, ordered by
//! plain lexicographic comparison. [`between`] produces a key strictly
//! between two existing keys without touching either neighbor, so a
//! document never needs a rebalancing pass.
//!
//! Two servers generating a key in the same gap concurrently can
//! legitimately produce the *same* key; the data model defines no
//! secondary tie-break for that case. This remains an open question of
//! the design, deliberately not resolved here.

use snafu::Snafu;

use scribe_core::constants::MAX_POSITION_CHAR;
use scribe_core::constants::MIN_POSITION_CHAR;

/// Minimum sentinel: an absent lower bound behaves as `"a"`.
pub const MIN_SENTINEL: &str = "a";

/// Maximum sentinel: an absent upper bound behaves as `"z"`.
pub const MAX_SENTINEL: &str = "z";

/// Position key generation errors.
#[derive(Debug, Snafu, PartialEq, Eq)]
pub enum PositionError {
    /// A bound contains a character outside `a..=z`.
    #[snafu(display("invalid character '{character}' in position key '{key}'"))]
    InvalidCharacter { key: String, character: char },

    /// The lower bound does not sort strictly before the upper bound.
    #[snafu(display("position bounds out of order: '{before}' >= '{after}'"))]
    InvertedBounds { before: String, after: String },
}

/// Generate a key strictly between `before` and `after`.
///
/// `None` (or an empty string) defaults to the corresponding sentinel.
/// For any valid `before < after` the result `x` satisfies
/// `before < x < after` under string comparison.
///
/// The walk keeps a shared prefix: equal leading characters are
/// appended and consumed; a gap of two or more yields the midpoint
/// character and terminates; a gap of exactly one appends the lower
/// character and descends with an unbounded upper limit, so keys only
/// grow where the document is locally dense.
pub fn between(before: Option<&str>, after: Option<&str>) -> Result<String, PositionError> {
    let before = normalize(before, MIN_SENTINEL);
    let after = normalize(after, MAX_SENTINEL);

    validate(before)?;
    validate(after)?;

    if before >= after {
        return InvertedBoundsSnafu {
            before: before.to_string(),
            after: after.to_string(),
        }
        .fail();
    }

    let mut prefix = String::new();
    let mut lower = before.as_bytes();
    let mut upper = after.as_bytes();

    loop {
        let low = lower.first().copied().unwrap_or(MIN_POSITION_CHAR as u8);
        let high = upper.first().copied().unwrap_or(MAX_POSITION_CHAR as u8);

        if low == high {
            prefix.push(low as char);
            lower = tail(lower);
            upper = tail(upper);
            continue;
        }

        if high - low >= 2 {
            prefix.push(((low + high) / 2) as char);
            return Ok(prefix);
        }

        // Adjacent characters: no midpoint exists at this depth. Fix
        // the lower character and descend with an open upper limit.
        prefix.push(low as char);
        lower = tail(lower);
        upper = &[];
    }
}

fn normalize<'a>(bound: Option<&'a str>, sentinel: &'a str) -> &'a str {
    match bound {
        Some(key) if !key.is_empty() => key,
        _ => sentinel,
    }
}

fn tail(key: &[u8]) -> &[u8] {
    if key.len() <= 1 { &[] } else { &key[1..] }
}

fn validate(key: &str) -> Result<(), PositionError> {
    for character in key.chars() {
        if !character.is_ascii_lowercase() {
            return InvalidCharacterSnafu {
                key: key.to_string(),
                character,
            }
            .fail();
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mid(before: Option<&str>, after: Option<&str>) -> String {
        between(before, after).unwrap()
    }

    #[test]
    fn unbounded_yields_key_between_sentinels() {
        let key = mid(None, None);
        assert!(MIN_SENTINEL < key.as_str() && key.as_str() < MAX_SENTINEL);
    }

    #[test]
    fn result_is_strictly_between_bounds() {
        let pairs = [
            ("a", "z"),
            ("a", "b"),
            ("b", "c"),
            ("ab", "abb"),
            ("ab", "b"),
            ("m", "mm"),
            ("aa", "ab"),
            ("yz", "z"),
        ];
        for (before, after) in pairs {
            let key = mid(Some(before), Some(after));
            assert!(
                before < key.as_str() && key.as_str() < after,
                "between({before:?}, {after:?}) = {key:?}"
            );
        }
    }

    #[test]
    fn empty_bound_behaves_as_sentinel() {
        assert_eq!(mid(Some(""), Some("")), mid(None, None));
    }

    #[test]
    fn adjacent_characters_descend_instead_of_failing() {
        let key = mid(Some("b"), Some("c"));
        assert!(key.starts_with('b') && key.len() > 1);
    }

    #[test]
    fn repeated_head_inserts_stay_ordered() {
        // Simulates a user typing at the start of a document: each new
        // key must sort before all earlier ones without renumbering.
        let mut head: Option<String> = None;
        let mut keys = Vec::new();
        for _ in 0..64 {
            let key = between(None, head.as_deref()).unwrap();
            if let Some(previous) = &head {
                assert!(key < *previous);
            }
            head = Some(key.clone());
            keys.push(key);
        }
        let mut sorted = keys.clone();
        sorted.sort();
        sorted.reverse();
        assert_eq!(keys, sorted);
    }

    #[test]
    fn dense_gap_grows_key_length_only_locally() {
        // Repeated bisection of one gap lengthens keys there, while a
        // fresh gap elsewhere still yields a single character.
        let mut low = "a".to_string();
        let high = "b";
        for _ in 0..16 {
            let key = between(Some(&low), Some(high)).unwrap();
            assert!(low < key && key.as_str() < high);
            low = key;
        }
        assert_eq!(mid(Some("c"), Some("z")), "n");
    }

    #[test]
    fn inverted_bounds_are_rejected() {
        assert!(matches!(
            between(Some("m"), Some("f")),
            Err(PositionError::InvertedBounds { .. })
        ));
        assert!(matches!(
            between(Some("m"), Some("m")),
            Err(PositionError::InvertedBounds { .. })
        ));
    }

    #[test]
    fn invalid_characters_are_rejected() {
        assert!(matches!(
            between(Some("A"), None),
            Err(PositionError::InvalidCharacter { .. })
        ));
        assert!(matches!(
            between(None, Some("a1")),
            Err(PositionError::InvalidCharacter { .. })
        ));
    }
}
