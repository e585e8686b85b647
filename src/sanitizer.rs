//! Best-effort recovery of JSON from free-form model output.
//!
//! Model text is not a trusted machine format. This is a heuristic layer,
//! not a parser: a `None` result is an expected, recoverable outcome.

use std::sync::LazyLock;

use regex::Regex;

/// First `{` to the last `}`, across newlines.
static OBJECT_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)\{.*\}").unwrap());

static TRAILING_COMMA: LazyLock<Regex> = LazyLock::new(|| Regex::new(r",\s*([\]}])").unwrap());

/// Drop commas that directly precede a closing `]` or `}`.
pub fn remove_trailing_commas(json_string: &str) -> String {
    TRAILING_COMMA.replace_all(json_string, "$1").into_owned()
}

/// Extract a parseable JSON string from `response`.
///
/// Valid JSON is returned unchanged. Otherwise the outermost object is cut
/// out, code fences and trailing commas are removed and the result is
/// checked once more.
pub fn clean_json_response(response: &str) -> Option<String> {
    if serde_json::from_str::<serde_json::Value>(response).is_ok() {
        return Some(response.to_string());
    }

    let Some(found) = OBJECT_PATTERN.find(response) else {
        tracing::warn!("No JSON found in response.");
        return None;
    };

    let json_string = found.as_str().replace("```json", "").replace("```", "");
    let json_string = remove_trailing_commas(json_string.trim());

    match serde_json::from_str::<serde_json::Value>(&json_string) {
        Ok(_) => Some(json_string),
        Err(e) => {
            tracing::warn!("Extracted JSON is still invalid: {}", json_string);
            tracing::warn!("JSONDecodeError: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::*;

    #[test]
    fn test_valid_json_is_returned_unchanged() {
        for text in [
            r#"{"functional": ["a"], "non_functional": []}"#,
            "[\"Prompt 1\", \"Prompt 2\"]",
            "  {\"a\" :1}\n",
            "42",
        ] {
            assert_eq!(clean_json_response(text).as_deref(), Some(text));
        }
    }

    #[test]
    fn test_fence_and_trailing_commas() {
        let cleaned = clean_json_response("```json\n{\"a\": [1,2,],}\n```").unwrap();
        let parsed: Value = serde_json::from_str(&cleaned).unwrap();
        assert_eq!(parsed, json!({"a": [1, 2]}));
    }

    #[test]
    fn test_object_wrapped_in_prose() {
        let raw = "Sure! Here are the requirements:\n```json\n{\n  \"functional\": [\"Search books\",\n  ],\n  \"non_functional\": [\"Fast\"]\n}\n```\nLet me know if you need more.";
        let parsed: Value = serde_json::from_str(&clean_json_response(raw).unwrap()).unwrap();
        assert_eq!(
            parsed,
            json!({"functional": ["Search books"], "non_functional": ["Fast"]})
        );
    }

    #[test]
    fn test_no_braces() {
        assert_eq!(clean_json_response("no braces here"), None);
    }

    #[test]
    fn test_greedy_match_spanning_two_objects_is_rejected() {
        assert_eq!(clean_json_response("first {\"a\": 1} then {\"b\": 2}"), None);
    }

    #[test]
    fn test_remove_trailing_commas() {
        assert_eq!(remove_trailing_commas("[1, 2 ,\n ]"), "[1, 2 ]");
        assert_eq!(remove_trailing_commas("{\"a\": \"x,y\"}"), "{\"a\": \"x,y\"}");
    }
}
