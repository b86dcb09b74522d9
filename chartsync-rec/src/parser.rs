//! Chart entry parser
//!
//! Turns one externally sourced record into a normalized `ChartRow`. Rank
//! falls back to the record's ordinal position when the source omits one.
//! Also extracts identifiers from markdown watch lists.

use crate::types::{ChartRow, RawRecord, SyncError, SyncResult};
use regex::Regex;
use std::sync::OnceLock;

/// Normalize a source identifier into its canonical `censored_id` form
///
/// Uppercases, trims, and collapses separator runs (whitespace, underscores,
/// repeated hyphens) into a single hyphen. Idempotent: normalizing an already
/// normalized identifier yields the same value.
pub fn normalize_identifier(raw: &str) -> String {
    static SEPARATORS: OnceLock<Regex> = OnceLock::new();
    let separators = SEPARATORS.get_or_init(|| Regex::new(r"[\s_\-]+").expect("static regex"));

    let upper = raw.trim().to_uppercase();
    separators
        .replace_all(&upper, "-")
        .trim_matches('-')
        .to_string()
}

/// Parse one raw record into a ChartRow
///
/// # Arguments
/// * `record` - the record as delivered by the source fetcher
/// * `ordinal` - 1-based position of the record within the chart run, used as
///   the rank when the source does not publish one
pub fn parse_record(record: &RawRecord, ordinal: usize) -> SyncResult<ChartRow> {
    let identifier = normalize_identifier(&record.identifier);
    if identifier.is_empty() {
        return Err(SyncError::ParseFailure(format!(
            "Record at position {} has no identifier",
            ordinal
        )));
    }

    let rank = match record.rank {
        Some(rank) if rank > 0 => rank,
        Some(rank) => {
            return Err(SyncError::ParseFailure(format!(
                "Record {} has non-positive rank {}",
                identifier, rank
            )));
        }
        None => ordinal as i64,
    };

    if let Some(score) = record.score {
        if !score.is_finite() || score < 0.0 {
            return Err(SyncError::ParseFailure(format!(
                "Record {} has invalid score {}",
                identifier, score
            )));
        }
    }

    if let Some(votes) = record.votes {
        if votes < 0 {
            return Err(SyncError::ParseFailure(format!(
                "Record {} has negative votes {}",
                identifier, votes
            )));
        }
    }

    Ok(ChartRow {
        rank,
        identifier,
        score: record.score.unwrap_or(0.0),
        votes: record.votes.unwrap_or(0),
        title: record.title.clone(),
    })
}

/// Extract movie identifiers from free text (markdown watch lists)
///
/// Matches the serial-number shape `ABC-123` (two or more uppercase letters,
/// two or more digits, separator optional), normalizes each hit, and
/// deduplicates preserving first-seen order.
pub fn extract_identifiers(text: &str) -> Vec<String> {
    static SERIAL: OnceLock<Regex> = OnceLock::new();
    let serial = SERIAL.get_or_init(|| {
        Regex::new(r"[A-Z]{2,}[\s_\-]?\d{2,}").expect("static regex")
    });

    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for hit in serial.find_iter(text) {
        let id = normalize_serial(hit.as_str());
        if seen.insert(id.clone()) {
            out.push(id);
        }
    }
    out
}

/// Normalize a bare serial hit, inserting the hyphen the pattern may lack
fn normalize_serial(raw: &str) -> String {
    let normalized = normalize_identifier(raw);
    if normalized.contains('-') {
        return normalized;
    }

    // "ABP123" → "ABP-123"
    match normalized.find(|c: char| c.is_ascii_digit()) {
        Some(split) => format!("{}-{}", &normalized[..split], &normalized[split..]),
        None => normalized,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_is_deterministic_and_idempotent() {
        let variants = ["abp-123", "ABP-123", " abp_123 ", "abp  123", "ABP--123"];
        for v in variants {
            let once = normalize_identifier(v);
            assert_eq!(once, "ABP-123", "from {:?}", v);
            assert_eq!(normalize_identifier(&once), once);
        }
    }

    #[test]
    fn ordinal_supplies_missing_rank() {
        let record = RawRecord {
            identifier: "abc-001".to_string(),
            rank: None,
            score: Some(4.0),
            votes: Some(300),
            title: None,
        };

        let row = parse_record(&record, 7).unwrap();
        assert_eq!(row.rank, 7);
        assert_eq!(row.identifier, "ABC-001");
    }

    #[test]
    fn published_rank_wins_over_ordinal() {
        let record = RawRecord {
            identifier: "abc-001".to_string(),
            rank: Some(3),
            ..Default::default()
        };
        assert_eq!(parse_record(&record, 7).unwrap().rank, 3);
    }

    #[test]
    fn empty_identifier_is_a_parse_failure() {
        let record = RawRecord {
            identifier: "  - ".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            parse_record(&record, 1),
            Err(SyncError::ParseFailure(_))
        ));
    }

    #[test]
    fn invalid_numbers_are_parse_failures() {
        let bad_score = RawRecord {
            identifier: "abc-001".to_string(),
            score: Some(f64::NAN),
            ..Default::default()
        };
        assert!(parse_record(&bad_score, 1).is_err());

        let bad_votes = RawRecord {
            identifier: "abc-001".to_string(),
            votes: Some(-5),
            ..Default::default()
        };
        assert!(parse_record(&bad_votes, 1).is_err());
    }

    #[test]
    fn watch_list_extraction_dedupes_and_normalizes() {
        let text = "# Wanted\n- ABP-123 (good)\n- ABP_123 again\n- SSIS 001\n- STARS001\nnoise 12\n";
        let ids = extract_identifiers(text);
        assert_eq!(ids, vec!["ABP-123", "SSIS-001", "STARS-001"]);
    }
}
