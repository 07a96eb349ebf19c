//! Verification status-map parsing.
//!
//! The verification script's contract: its final line is one JSON object
//! mapping every resource id to `"success"` or `"failed"`. The parser
//! scans captured lines in reverse for the last brace-balanced object and
//! reconciles the result against the ids the implementation graph
//! expects.

use std::collections::BTreeMap;

/// Parse the trailing status map from captured script output lines.
///
/// Lines are scanned in reverse; the first line that is a complete JSON
/// object wins. Non-string values are stringified.
pub fn parse_status_map(lines: &[String]) -> Option<BTreeMap<String, String>> {
    for line in lines.iter().rev() {
        let trimmed = line.trim();
        if !(trimmed.starts_with('{') && trimmed.ends_with('}')) {
            continue;
        }
        if let Ok(serde_json::Value::Object(map)) =
            serde_json::from_str::<serde_json::Value>(trimmed)
        {
            return Some(
                map.into_iter()
                    .map(|(k, v)| {
                        let status = v
                            .as_str()
                            .map(String::from)
                            .unwrap_or_else(|| v.to_string());
                        (k, status)
                    })
                    .collect(),
            );
        }
    }
    None
}

/// Fill in `"failed"` for every expected id missing from the map, and
/// return the ids that did not verify.
pub fn reconcile(
    statuses: &mut BTreeMap<String, String>,
    expected_ids: &[String],
) -> Vec<String> {
    for id in expected_ids {
        statuses
            .entry(id.clone())
            .or_insert_with(|| "failed".to_string());
    }
    statuses
        .iter()
        .filter(|(_, status)| status.as_str() != "success")
        .map(|(id, _)| id.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn last_json_line_wins() {
        let output = lines(&[
            "Starting verification...",
            r#"{"stale": "failed"}"#,
            "checking vpc",
            r#"{"vpc-main": "success", "web": "success"}"#,
        ]);
        let map = parse_status_map(&output).unwrap();
        assert_eq!(map.get("vpc-main").map(String::as_str), Some("success"));
        assert!(!map.contains_key("stale"));
    }

    #[test]
    fn prose_only_output_has_no_map() {
        let output = lines(&["all good", "everything passed"]);
        assert!(parse_status_map(&output).is_none());
    }

    #[test]
    fn broken_json_lines_are_skipped() {
        let output = lines(&[r#"{"web": "success"}"#, r#"{"oops: "#]);
        // The broken line does not end with '}', so the earlier map wins.
        let map = parse_status_map(&output).unwrap();
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn reconcile_marks_missing_ids_failed() {
        let mut map: BTreeMap<String, String> =
            [("web".to_string(), "success".to_string())].into();
        let failed = reconcile(
            &mut map,
            &["web".to_string(), "db".to_string(), "vpc-main".to_string()],
        );
        assert_eq!(failed, vec!["db", "vpc-main"]);
        assert_eq!(map.get("db").map(String::as_str), Some("failed"));
    }

    #[test]
    fn reconcile_reports_explicit_failures() {
        let mut map: BTreeMap<String, String> = [
            ("web".to_string(), "failed".to_string()),
            ("vpc-main".to_string(), "success".to_string()),
        ]
        .into();
        let failed = reconcile(&mut map, &["web".to_string(), "vpc-main".to_string()]);
        assert_eq!(failed, vec!["web"]);
    }
}
