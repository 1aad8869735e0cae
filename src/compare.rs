//! Post-hoc scoring of extracted records against an expected array.
//!
//! Both arrays are serialised to canonical JSON (keys sorted recursively,
//! `", "` / `": "` separators) and compared with a token-sort ratio: split on
//! whitespace, sort the tokens, rejoin, then take the normalised
//! insertion/deletion similarity of the two strings on a 0–100 scale.
//!
//! This is a whole-document score, not a per-record diff. It can reward
//! textually similar but structurally wrong output, and records emitted in a
//! different order can lose points because token order shifts.

use crate::output::Record;
use serde::Serialize;
use serde_json::ser::Formatter;
use serde_json::{Map, Value};
use std::io;

/// Score at or above which a comparison is summarised as a match.
pub const MATCH_THRESHOLD: f64 = 90.0;

/// Summary used when there is nothing to compare against.
pub const NO_EXPECTED_SUMMARY: &str = "no expected data supplied";

/// Score and categorical summary of one comparison.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Comparison {
    pub score: f64,
    pub summary: String,
}

impl Comparison {
    /// The sentinel for an absent or empty expected array. Not a real score.
    pub fn skipped() -> Self {
        Self {
            score: 0.0,
            summary: NO_EXPECTED_SUMMARY.to_string(),
        }
    }

    pub fn is_skipped(&self) -> bool {
        self.summary == NO_EXPECTED_SUMMARY
    }

    fn scored(score: f64) -> Self {
        let summary = if score >= MATCH_THRESHOLD {
            "match>=90"
        } else {
            "match<90"
        };
        Self {
            score,
            summary: summary.to_string(),
        }
    }
}

/// Compare predicted records with expected records.
pub fn compare_json_results(predicted: &[Record], expected: &[Record]) -> Comparison {
    if expected.is_empty() {
        return Comparison::skipped();
    }
    let pred = canonical_json(&records_value(predicted));
    let exp = canonical_json(&records_value(expected));
    Comparison::scored(token_sort_ratio(&pred, &exp))
}

fn records_value(records: &[Record]) -> Value {
    Value::Array(records.iter().cloned().map(Value::Object).collect())
}

/// Deterministic JSON text: object keys sorted at every depth, `", "` between
/// items, `": "` after keys, non-ASCII emitted as-is.
pub fn canonical_json(value: &Value) -> String {
    let sorted = sort_keys(value);
    let mut buf = Vec::new();
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, SpacedFormatter);
    // Serialising a Value into a Vec cannot fail.
    if sorted.serialize(&mut ser).is_err() {
        return String::new();
    }
    String::from_utf8(buf).unwrap_or_default()
}

fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Object(obj) => {
            let mut entries: Vec<(&String, &Value)> = obj.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let mut out = Map::new();
            for (k, v) in entries {
                out.insert(k.clone(), sort_keys(v));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}

/// Compact formatter with a space after every `,` and `:`.
struct SpacedFormatter;

impl Formatter for SpacedFormatter {
    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b": ")
    }
}

/// Token-order-insensitive similarity in `[0, 100]`.
pub fn token_sort_ratio(a: &str, b: &str) -> f64 {
    ratio(&sorted_tokens(a), &sorted_tokens(b))
}

fn sorted_tokens(s: &str) -> String {
    let mut tokens: Vec<&str> = s.split_whitespace().collect();
    tokens.sort_unstable();
    tokens.join(" ")
}

/// Normalised indel similarity: `200 * LCS / (len_a + len_b)`.
pub fn ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 100.0;
    }
    200.0 * lcs_len(&a, &b) as f64 / total as f64
}

/// Longest-common-subsequence length with a single rolling row.
fn lcs_len(a: &[char], b: &[char]) -> usize {
    let (short, long) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    let mut row = vec![0usize; short.len() + 1];
    for &lc in long {
        let mut diag = 0;
        for (j, &sc) in short.iter().enumerate() {
            let up = row[j + 1];
            row[j + 1] = if lc == sc {
                diag + 1
            } else {
                up.max(row[j])
            };
            diag = up;
        }
    }
    row[short.len()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn records(v: Value) -> Vec<Record> {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn identical_input_scores_100() {
        let sample = records(json!([{"assessment": "A", "PBO_n10": "1 (10.0)"}]));
        let c = compare_json_results(&sample, &sample);
        assert_eq!(c.score, 100.0);
        assert_eq!(c.summary, "match>=90");
    }

    #[test]
    fn empty_expected_is_sentinel() {
        let sample = records(json!([{"a": "1"}]));
        let c = compare_json_results(&sample, &[]);
        assert_eq!(c.score, 0.0);
        assert_eq!(c.summary, NO_EXPECTED_SUMMARY);
        assert!(c.is_skipped());
        assert!(compare_json_results(&[], &[]).is_skipped());
    }

    #[test]
    fn differing_value_scores_below_100() {
        let c = compare_json_results(&records(json!([{"a": "1"}])), &records(json!([{"a": "2"}])));
        assert!(c.score < 100.0);
        let expected = if c.score >= 90.0 { "match>=90" } else { "match<90" };
        assert_eq!(c.summary, expected);
    }

    #[test]
    fn key_order_does_not_matter() {
        let a = records(json!([{"x": "1", "y": "2"}]));
        let mut reordered = Map::new();
        reordered.insert("y".into(), json!("2"));
        reordered.insert("x".into(), json!("1"));
        assert_eq!(compare_json_results(&a, &[reordered]).score, 100.0);
    }

    #[test]
    fn unrelated_records_score_low() {
        let pred = records(json!([{"assessment": "ACR20", "PBO_n96": "12 (12.5)"}]));
        let exp = records(json!([
            {"zzz": "qqqqqqqqqqqqqqqq", "www": "vvvvvvvvvvvvvvvvvvvv"},
            {"kkk": "jjjjjjjjjjjjjjjjjj"}
        ]));
        let c = compare_json_results(&pred, &exp);
        assert!(c.score < 90.0, "got {}", c.score);
        assert_eq!(c.summary, "match<90");
    }

    #[test]
    fn canonical_form_sorts_and_spaces() {
        let v = json!([{"b": 1, "a": {"d": [1, 2], "c": "é"}}]);
        assert_eq!(
            canonical_json(&v),
            r#"[{"a": {"c": "é", "d": [1, 2]}, "b": 1}]"#
        );
    }

    #[test]
    fn ratio_edge_cases() {
        assert_eq!(ratio("", ""), 100.0);
        assert_eq!(ratio("abc", ""), 0.0);
        assert_eq!(ratio("abcd", "abcd"), 100.0);
        // LCS("abcd", "abed") = 3 → 6/8
        assert!((ratio("abcd", "abed") - 75.0).abs() < 1e-9);
    }

    #[test]
    fn token_sort_ignores_token_order() {
        assert_eq!(token_sort_ratio("beta alpha", "alpha beta"), 100.0);
        assert_eq!(token_sort_ratio("a  b\n c", "c b a"), 100.0);
    }
}
