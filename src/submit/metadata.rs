//! Label and annotation validation
//!
//! User metadata arrives as comma-separated `key=value` strings. Parsing is
//! pure and fails fast: a malformed segment or a collision with a reserved
//! label key aborts the submission before any cluster mutation.

use std::collections::BTreeMap;

use crate::{Error, Result, APP_ID_LABEL, APP_NAME_LABEL};

/// Label keys the pipeline sets itself; user-supplied labels may not use them
pub const RESERVED_LABEL_KEYS: [&str; 2] = [APP_ID_LABEL, APP_NAME_LABEL];

/// Parse an optional comma-separated `key=value` string into a map.
///
/// Whitespace around segments is trimmed, empty segments are dropped, and
/// duplicate keys resolve last-write-wins. A segment without `=` is a
/// [`Error::Configuration`] naming `field`.
pub fn parse_key_value_csv(raw: Option<&str>, field: &str) -> Result<BTreeMap<String, String>> {
    let mut out = BTreeMap::new();
    let Some(raw) = raw else {
        return Ok(out);
    };
    for segment in raw.split(',') {
        let segment = segment.trim();
        if segment.is_empty() {
            continue;
        }
        let Some((key, value)) = segment.split_once('=') else {
            return Err(Error::configuration(format!(
                "{} entry '{}' is not of the form key=value",
                field, segment
            )));
        };
        out.insert(key.trim().to_string(), value.trim().to_string());
    }
    Ok(out)
}

/// Reject user labels that collide with the reserved key set
pub fn reject_reserved_labels(labels: &BTreeMap<String, String>) -> Result<()> {
    for reserved in RESERVED_LABEL_KEYS {
        if labels.contains_key(reserved) {
            return Err(Error::configuration(format!(
                "label '{}' is reserved and set by the submission client itself",
                reserved
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==========================================================================
    // Story: CSV Parsing
    // ==========================================================================

    #[test]
    fn when_csv_is_well_formed_all_pairs_are_kept() {
        let parsed =
            parse_key_value_csv(Some("team=payments, tier=batch"), "driver labels").unwrap();
        assert_eq!(parsed["team"], "payments");
        assert_eq!(parsed["tier"], "batch");
    }

    #[test]
    fn when_csv_is_absent_the_map_is_empty() {
        assert!(parse_key_value_csv(None, "driver labels").unwrap().is_empty());
    }

    #[test]
    fn when_segments_are_empty_they_are_dropped() {
        let parsed = parse_key_value_csv(Some(" ,a=1,, b=2 ,"), "driver labels").unwrap();
        assert_eq!(parsed.len(), 2);
    }

    #[test]
    fn when_keys_repeat_the_last_value_wins() {
        let parsed = parse_key_value_csv(Some("a=1,a=2"), "driver labels").unwrap();
        assert_eq!(parsed["a"], "2");
    }

    #[test]
    fn when_a_value_contains_equals_only_the_first_split_counts() {
        let parsed = parse_key_value_csv(Some("expr=a=b"), "driver annotations").unwrap();
        assert_eq!(parsed["expr"], "a=b");
    }

    #[test]
    fn when_a_segment_has_no_equals_parsing_fails_naming_the_field() {
        let err = parse_key_value_csv(Some("team=payments,oops"), "driver labels").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("driver labels"), "{msg}");
        assert!(msg.contains("oops"), "{msg}");
        assert!(matches!(err, Error::Configuration(_)));
    }

    // ==========================================================================
    // Story: Reserved Keys
    // ==========================================================================

    #[test]
    fn when_labels_avoid_reserved_keys_validation_passes() {
        let labels =
            parse_key_value_csv(Some("team=payments,app=x"), "driver labels").unwrap();
        assert!(reject_reserved_labels(&labels).is_ok());
    }

    #[test]
    fn when_a_reserved_key_appears_validation_fails() {
        for reserved in RESERVED_LABEL_KEYS {
            let csv = format!("team=payments,{}=x", reserved);
            let labels = parse_key_value_csv(Some(&csv), "driver labels").unwrap();
            let err = reject_reserved_labels(&labels).unwrap_err();
            assert!(matches!(err, Error::Configuration(_)));
        }
    }
}
