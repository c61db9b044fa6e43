use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A student's answer to one question.
///
/// The wire shape is untagged: single-choice and free-text answers are both
/// plain strings, and the question type tells them apart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnswerValue {
    Text(String),
    Selections(Vec<String>),
    Upload(UploadMetadata),
}

/// What is recorded for an image upload. The file bytes never leave the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadMetadata {
    pub file_name: String,
    pub file_size: u64,
    pub file_type: String,
    pub last_modified: i64,
}

/// Map from question id to answer, ordered so snapshots serialize stably.
pub type AnswerMap = BTreeMap<String, AnswerValue>;

impl AnswerValue {
    /// Whether the value counts towards "answered" progress.
    pub fn is_answered(&self) -> bool {
        match self {
            Self::Text(text) => !text.trim().is_empty(),
            Self::Selections(items) => !items.is_empty(),
            Self::Upload(_) => true,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_selections(&self) -> Option<&[String]> {
        match self {
            Self::Selections(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_upload(&self) -> Option<&UploadMetadata> {
        match self {
            Self::Upload(meta) => Some(meta),
            _ => None,
        }
    }
}

/// Decodes the server-held autosave snapshot.
///
/// The server stores the autosave request body verbatim, so the snapshot can
/// arrive either bare or still wrapped in `{"answers": {...}}`. Null entries
/// and values of an unknown shape are dropped.
pub fn decode_saved_answers(raw: Option<&Value>) -> AnswerMap {
    let mut decoded = AnswerMap::new();

    let Some(Value::Object(map)) = raw else {
        return decoded;
    };

    let entries = match map.get("answers") {
        Some(Value::Object(inner)) if map.len() == 1 => inner,
        _ => map,
    };

    for (question_id, value) in entries {
        if value.is_null() {
            continue;
        }
        match serde_json::from_value::<AnswerValue>(value.clone()) {
            Ok(answer) => {
                decoded.insert(question_id.clone(), answer);
            }
            Err(err) => {
                tracing::warn!(
                    question_id = %question_id,
                    error = %err,
                    "Dropping autosaved answer with unrecognised shape"
                );
            }
        }
    }

    decoded
}
