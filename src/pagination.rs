//! Cursor and pagination hints extracted from a staged document.
//!
//! Independent of schema inference: a stateless scan that copies the
//! first `pageInfo` object and first numeric `totalCount` found
//! depth-first, and counts rows in the current page.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_next_page: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_previous_page: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_cursor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_cursor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_count: Option<i64>,
    pub current_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

/// Analyze one document. Returns `None` when nothing pagination-shaped
/// exists in it.
pub fn analyze(document: &Value) -> Option<PaginationInfo> {
    let page_info = find_page_info(document);
    let total_count = find_total_count(document);
    let current_count = current_count(document);
    if page_info.is_none() && total_count.is_none() && current_count == 0 {
        return None;
    }

    let mut info = PaginationInfo {
        total_count,
        current_count,
        ..Default::default()
    };
    if let Some(pi) = page_info {
        info.has_next_page = pi.get("hasNextPage").and_then(Value::as_bool);
        info.has_previous_page = pi.get("hasPreviousPage").and_then(Value::as_bool);
        info.end_cursor = pi
            .get("endCursor")
            .and_then(Value::as_str)
            .map(str::to_string);
        info.start_cursor = pi
            .get("startCursor")
            .and_then(Value::as_str)
            .map(str::to_string);
    }

    if info.has_next_page == Some(true) {
        info.suggestion = Some(match &info.end_cursor {
            Some(cursor) => format!(
                "More results are available. Repeat the request with after: \"{cursor}\" to fetch the next page."
            ),
            None => "More results are available on the next page.".to_string(),
        });
    }
    Some(info)
}

/// Depth-first, first match wins.
fn find_page_info(value: &Value) -> Option<&Map<String, Value>> {
    match value {
        Value::Object(obj) => {
            if let Some(Value::Object(pi)) = obj.get("pageInfo") {
                return Some(pi);
            }
            obj.values().find_map(find_page_info)
        }
        Value::Array(items) => items.iter().find_map(find_page_info),
        _ => None,
    }
}

fn find_total_count(value: &Value) -> Option<i64> {
    match value {
        Value::Object(obj) => {
            if let Some(count) = obj.get("totalCount").and_then(Value::as_i64) {
                return Some(count);
            }
            obj.values().find_map(find_total_count)
        }
        Value::Array(items) => items.iter().find_map(find_total_count),
        _ => None,
    }
}

/// Sum of `edges` array lengths; if the document has no `edges` arrays at
/// all, fall back to summing every array length (a deliberate overcount
/// risk when unrelated arrays are present).
fn current_count(value: &Value) -> u64 {
    let mut total = 0u64;
    let mut seen = false;
    sum_edges(value, &mut total, &mut seen);
    if seen {
        total
    } else {
        sum_all_arrays(value)
    }
}

fn sum_edges(value: &Value, total: &mut u64, seen: &mut bool) {
    match value {
        Value::Object(obj) => {
            for (key, child) in obj {
                if key == "edges" {
                    if let Some(items) = child.as_array() {
                        *seen = true;
                        *total += items.len() as u64;
                    }
                }
                sum_edges(child, total, seen);
            }
        }
        Value::Array(items) => {
            for item in items {
                sum_edges(item, total, seen);
            }
        }
        _ => {}
    }
}

fn sum_all_arrays(value: &Value) -> u64 {
    match value {
        Value::Object(obj) => obj.values().map(sum_all_arrays).sum(),
        Value::Array(items) => {
            items.len() as u64 + items.iter().map(sum_all_arrays).sum::<u64>()
        }
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn copies_first_page_info_and_suggests_continuation() {
        let doc = json!({
            "genes": {
                "edges": [{"node": {"id": 1}}, {"node": {"id": 2}}],
                "pageInfo": {
                    "hasNextPage": true,
                    "hasPreviousPage": false,
                    "endCursor": "abc",
                    "startCursor": "aaa"
                },
                "totalCount": 40
            }
        });

        let info = analyze(&doc).expect("pagination");
        assert_eq!(info.has_next_page, Some(true));
        assert_eq!(info.has_previous_page, Some(false));
        assert_eq!(info.end_cursor.as_deref(), Some("abc"));
        assert_eq!(info.total_count, Some(40));
        assert_eq!(info.current_count, 2);
        assert!(info.suggestion.as_deref().unwrap().contains("abc"));
    }

    #[test]
    fn no_suggestion_without_next_page() {
        let doc = json!({"pageInfo": {"hasNextPage": false}, "edges": []});
        let info = analyze(&doc).expect("pagination");
        assert_eq!(info.has_next_page, Some(false));
        assert!(info.suggestion.is_none());
    }

    #[test]
    fn falls_back_to_counting_all_arrays() {
        // No edges arrays anywhere: every array contributes, including
        // unrelated ones.
        let doc = json!({
            "items": [1, 2, 3],
            "tags": ["a", "b"]
        });
        let info = analyze(&doc).expect("pagination");
        assert_eq!(info.current_count, 5);
    }

    #[test]
    fn scalar_document_has_no_pagination() {
        assert_eq!(analyze(&json!(42)), None);
        assert_eq!(analyze(&json!({"total": 7})), None);
    }

    #[test]
    fn first_total_count_wins_depth_first() {
        let doc = json!({
            "a": {"totalCount": 10, "b": {"totalCount": 99}}
        });
        let info = analyze(&doc).expect("pagination");
        assert_eq!(info.total_count, Some(10));
    }
}
