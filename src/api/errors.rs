use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;

/// Failure of one request against the exam backend.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    #[error("request timed out")]
    Timeout,
    #[error("network error: {0}")]
    Network(String),
    #[error("not authenticated: {0}")]
    Unauthorized(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("rejected: {0}")]
    Validation(String),
    #[error("server error ({status}): {detail}")]
    Server { status: u16, detail: String },
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("unexpected response: {0}")]
    Decode(String),
    #[error("token storage error: {0}")]
    Storage(String),
}

impl ApiError {
    /// Message fit for showing to the user as-is.
    pub fn detail(&self) -> String {
        match self {
            Self::Timeout => "The server did not respond in time".to_string(),
            Self::Network(message) => format!("Network error: {message}"),
            Self::Unauthorized(message)
            | Self::Forbidden(message)
            | Self::NotFound(message)
            | Self::Validation(message)
            | Self::InvalidInput(message) => message.clone(),
            Self::Server { detail, .. } => detail.clone(),
            Self::Decode(message) => format!("Unexpected server response: {message}"),
            Self::Storage(message) => format!("Could not store the session token: {message}"),
        }
    }

    /// Errors that end a session while it is loading.
    pub fn is_not_found_or_denied(&self) -> bool {
        matches!(self, Self::Unauthorized(_) | Self::Forbidden(_) | Self::NotFound(_))
    }

    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout | Self::Network(_) => true,
            Self::Server { status, .. } => *status >= 500,
            _ => false,
        }
    }

    pub(crate) fn from_response(status: StatusCode, body: &str) -> Self {
        let detail = match serde_json::from_str::<Value>(body) {
            Ok(payload) => extract_error_message(&payload),
            Err(_) if !body.trim().is_empty() => Some(body.trim().to_string()),
            Err(_) => None,
        }
        .unwrap_or_else(|| format!("Request failed with status {}", status.as_u16()));

        match status {
            StatusCode::UNAUTHORIZED => Self::Unauthorized(detail),
            StatusCode::FORBIDDEN => Self::Forbidden(detail),
            StatusCode::NOT_FOUND => Self::NotFound(detail),
            StatusCode::BAD_REQUEST | StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => {
                Self::Validation(detail)
            }
            _ => Self::Server { status: status.as_u16(), detail },
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

/// Renders a `{detail: string | [{loc, msg}, ...]}` error body. Bodies without
/// `detail` fall back to their flattened values joined by `, `.
pub(crate) fn extract_error_message(payload: &Value) -> Option<String> {
    if let Some(detail) = payload.get("detail") {
        if let Some(text) = detail.as_str() {
            return Some(text.to_string());
        }
        if let Some(items) = detail.as_array() {
            let joined = items.iter().filter_map(format_validation_entry).collect::<Vec<_>>();
            if !joined.is_empty() {
                return Some(joined.join("; "));
            }
        }
    }

    let mut flattened = Vec::new();
    flatten_values(payload, &mut flattened);
    if flattened.is_empty() {
        None
    } else {
        Some(flattened.join(", "))
    }
}

fn format_validation_entry(item: &Value) -> Option<String> {
    let msg = item.get("msg").and_then(Value::as_str)?;
    let loc = item
        .get("loc")
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .map(|part| match part {
                    Value::String(text) => text.clone(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join(".")
        })
        .filter(|loc| !loc.is_empty());

    Some(match loc {
        Some(loc) => format!("{loc}: {msg}"),
        None => msg.to_string(),
    })
}

fn flatten_values(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::Null => {}
        Value::String(text) => out.push(text.clone()),
        Value::Array(items) => items.iter().for_each(|item| flatten_values(item, out)),
        Value::Object(map) => map.values().for_each(|item| flatten_values(item, out)),
        other => out.push(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn string_detail_is_used_verbatim() {
        let payload = json!({"detail": "Attempt not found"});
        assert_eq!(extract_error_message(&payload).as_deref(), Some("Attempt not found"));
    }

    #[test]
    fn validation_entries_join_loc_and_msg() {
        let payload = json!({"detail": [
            {"loc": ["body", "exam_id"], "msg": "field required", "type": "missing"},
            {"loc": ["query", 0], "msg": "bad index"}
        ]});
        assert_eq!(
            extract_error_message(&payload).as_deref(),
            Some("body.exam_id: field required; query.0: bad index")
        );
    }

    #[test]
    fn bodies_without_detail_are_flattened() {
        let payload = json!({"title": ["too short"], "duration_minutes": "must be positive"});
        let message = extract_error_message(&payload).unwrap();
        assert!(message.contains("too short"));
        assert!(message.contains("must be positive"));
        assert!(message.contains(", "));
    }

    #[test]
    fn status_maps_to_variant() {
        let err = ApiError::from_response(StatusCode::NOT_FOUND, r#"{"detail":"Exam not found"}"#);
        assert!(matches!(err, ApiError::NotFound(ref detail) if detail == "Exam not found"));
        assert!(err.is_not_found_or_denied());

        let err = ApiError::from_response(StatusCode::BAD_GATEWAY, "");
        assert_eq!(err.detail(), "Request failed with status 502");
        assert!(err.is_transient());

        let err = ApiError::from_response(StatusCode::UNPROCESSABLE_ENTITY, "not json");
        assert!(matches!(err, ApiError::Validation(ref detail) if detail == "not json"));
    }
}
