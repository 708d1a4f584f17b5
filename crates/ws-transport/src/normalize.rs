//! Converts the error shapes backends actually send into [`BackendError`].
//!
//! Seen in the wild: the canonical envelope, the same fields nested one or
//! more levels under `error`, a bare `error` string, validation lists under
//! `errors`, and plain-text or XML bodies relayed by proxies.

use serde_json::{Map, Value};

use reelup_protocol::envelope::BackendError;

const STATUS_KEYS: &[&str] = &["status", "statusCode", "status_code", "httpStatus", "code"];
const CODE_KEYS: &[&str] = &["code", "Code", "errorCode", "error_code", "name"];
const MESSAGE_KEYS: &[&str] = &[
    "message",
    "Message",
    "msg",
    "error",
    "error_description",
    "reason",
];
const MISSING_KEYS: &[&str] = &["missingFields", "missing_fields", "missing"];
const DETAIL_KEYS: &[&str] = &["details", "detail", "Details"];
const FIELD_KEYS: &[&str] = &["field", "path", "param", "property"];

/// Nesting deeper than this is treated as opaque.
const MAX_DEPTH: usize = 4;

/// Longest message taken from a text body.
const MAX_TEXT_MESSAGE: usize = 200;

/// Normalizes a JSON error value.
///
/// Outer fields win over nested ones, so a transport-level `status` is not
/// overridden by an inner `code`.
pub fn normalize_error(value: &Value) -> BackendError {
    let mut out = BackendError::default();
    absorb(value, &mut out, 0);
    if out.message.is_empty() {
        out.message = out
            .code
            .clone()
            .unwrap_or_else(|| "backend reported an error without a message".into());
    }
    out
}

/// Normalizes a raw response body with a known status.
///
/// JSON bodies go through [`normalize_error`]; XML bodies yield their
/// `Code` and `Message` elements; anything else becomes the message.
pub fn normalize_text(status: u16, body: &str) -> BackendError {
    let trimmed = body.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed)
        && (value.is_object() || value.is_string())
    {
        let mut err = normalize_error(&value);
        if err.status == 0 {
            err.status = status;
        }
        return err;
    }

    let code = xml_element(trimmed, "Code");
    let message = xml_element(trimmed, "Message")
        .or_else(|| trimmed.lines().find(|l| !l.trim().is_empty()).map(str::trim))
        .map(|m| truncate(m, MAX_TEXT_MESSAGE))
        .unwrap_or_else(|| format!("empty response body (status {status})"));

    let mut err = BackendError::new(status, message);
    err.code = code.map(str::to_owned);
    if !trimmed.is_empty() {
        err.details = Some(trimmed.to_string());
    }
    err
}

fn absorb(value: &Value, out: &mut BackendError, depth: usize) {
    match value {
        Value::Object(map) => absorb_object(map, out, depth),
        Value::String(s) => {
            if out.message.is_empty() {
                out.message = s.trim().to_string();
            }
        }
        Value::Null => {}
        other => {
            if out.message.is_empty() {
                out.message = other.to_string();
            }
        }
    }
}

fn absorb_object(map: &Map<String, Value>, out: &mut BackendError, depth: usize) {
    if out.status == 0
        && let Some(status) = STATUS_KEYS.iter().find_map(|k| map.get(*k).and_then(as_status))
    {
        out.status = status;
    }
    if out.code.is_none() {
        out.code = CODE_KEYS
            .iter()
            .find_map(|k| map.get(*k).and_then(Value::as_str))
            .filter(|c| !c.is_empty())
            .map(str::to_owned);
    }
    if out.message.is_empty()
        && let Some(message) = MESSAGE_KEYS
            .iter()
            .find_map(|k| map.get(*k).and_then(Value::as_str))
    {
        out.message = message.trim().to_string();
    }
    if out.missing_fields.is_empty() {
        out.missing_fields = missing_fields(map);
    }
    if out.details.is_none() {
        out.details = DETAIL_KEYS
            .iter()
            .find_map(|k| map.get(*k))
            .filter(|v| !v.is_null())
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            });
    }

    if depth < MAX_DEPTH
        && let Some(inner) = map.get("error").filter(|v| v.is_object())
    {
        absorb(inner, out, depth + 1);
    }
}

fn as_status(value: &Value) -> Option<u16> {
    let n = match value {
        Value::Number(n) => n.as_u64()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    (100..=599).contains(&n).then_some(n as u16)
}

fn missing_fields(map: &Map<String, Value>) -> Vec<String> {
    if let Some(list) = MISSING_KEYS
        .iter()
        .find_map(|k| map.get(*k).and_then(Value::as_array))
    {
        return list
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_owned)
            .collect();
    }

    // Validation lists: [{"field": "courseId", "message": "is required"}]
    map.get("errors")
        .and_then(Value::as_array)
        .map(|errors| {
            errors
                .iter()
                .filter_map(|e| FIELD_KEYS.iter().find_map(|k| e.get(*k)))
                .filter_map(|f| match f {
                    Value::String(s) => Some(s.clone()),
                    Value::Array(parts) => Some(
                        parts
                            .iter()
                            .map(|p| p.as_str().map_or_else(|| p.to_string(), str::to_owned))
                            .collect::<Vec<_>>()
                            .join("."),
                    ),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default()
}

fn xml_element<'a>(body: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = body.find(&open)? + open.len();
    let end = start + body[start..].find(&close)?;
    Some(body[start..end].trim())
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonical_envelope_passes_through() {
        let err = normalize_error(&json!({
            "status": 404,
            "code": "NoSuchUpload",
            "message": "The specified upload does not exist",
            "missingFields": [],
            "details": "uploadId=abc"
        }));
        assert_eq!(err.status, 404);
        assert_eq!(err.code.as_deref(), Some("NoSuchUpload"));
        assert_eq!(err.message, "The specified upload does not exist");
        assert_eq!(err.details.as_deref(), Some("uploadId=abc"));
    }

    #[test]
    fn nested_error_objects_are_flattened() {
        let err = normalize_error(&json!({
            "statusCode": 410,
            "error": { "error": { "code": "SessionExpired", "message": "session has expired" } }
        }));
        assert_eq!(err.status, 410);
        assert_eq!(err.code.as_deref(), Some("SessionExpired"));
        assert_eq!(err.message, "session has expired");
    }

    #[test]
    fn bare_error_string() {
        let err = normalize_error(&json!({ "error": "Unauthorized", "statusCode": "401" }));
        assert_eq!(err.status, 401);
        assert_eq!(err.message, "Unauthorized");
    }

    #[test]
    fn numeric_code_is_a_status() {
        let err = normalize_error(&json!({ "code": 413, "message": "too large" }));
        assert_eq!(err.status, 413);
        assert!(err.code.is_none());
    }

    #[test]
    fn validation_list_yields_missing_fields() {
        let err = normalize_error(&json!({
            "status": 400,
            "message": "Validation failed",
            "errors": [
                { "field": "courseId", "message": "is required" },
                { "path": ["metadata", "title"], "message": "too long" }
            ]
        }));
        assert_eq!(err.missing_fields, vec!["courseId", "metadata.title"]);
    }

    #[test]
    fn message_falls_back_to_code() {
        let err = normalize_error(&json!({ "code": "InternalError" }));
        assert_eq!(err.message, "InternalError");
        let err = normalize_error(&json!({}));
        assert!(!err.message.is_empty());
    }

    #[test]
    fn object_details_are_rendered() {
        let err = normalize_error(&json!({ "message": "bad", "details": { "line": 3 } }));
        assert_eq!(err.details.as_deref(), Some(r#"{"line":3}"#));
    }

    #[test]
    fn xml_body() {
        let body = "<?xml version=\"1.0\"?><Error><Code>NoSuchUpload</Code><Message>The specified upload does not exist.</Message></Error>";
        let err = normalize_text(404, body);
        assert_eq!(err.status, 404);
        assert_eq!(err.code.as_deref(), Some("NoSuchUpload"));
        assert_eq!(err.message, "The specified upload does not exist.");
        assert!(err.details.unwrap().contains("<Error>"));
    }

    #[test]
    fn plain_text_body() {
        let err = normalize_text(400, "\nSyntaxError: Unexpected token - in JSON\n------WebKitFormBoundary");
        assert_eq!(err.status, 400);
        assert_eq!(err.message, "SyntaxError: Unexpected token - in JSON");
        assert!(err.searchable_text().contains("webkitformboundary"));
    }

    #[test]
    fn json_text_body_keeps_inner_status() {
        let err = normalize_text(500, r#"{"status": 503, "message": "busy"}"#);
        assert_eq!(err.status, 503);
        let err = normalize_text(502, r#"{"message": "bad gateway"}"#);
        assert_eq!(err.status, 502);
    }

    #[test]
    fn long_text_is_truncated() {
        let err = normalize_text(500, &"x".repeat(500));
        assert_eq!(err.message.len(), MAX_TEXT_MESSAGE + 3);
        assert_eq!(err.details.unwrap().len(), 500);
    }

    #[test]
    fn empty_body() {
        let err = normalize_text(502, "  ");
        assert_eq!(err.message, "empty response body (status 502)");
        assert!(err.details.is_none());
    }
}
