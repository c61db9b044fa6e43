use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use crate::schemas::answer::{decode_saved_answers, AnswerMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    InProgress,
    Submitted,
    Graded,
}

impl AttemptStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Submitted => "submitted",
            Self::Graded => "graded",
        }
    }

    /// Submitted and graded attempts accept no further edits or autosaves.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Submitted | Self::Graded)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attempt {
    pub id: String,
    pub exam_id: String,
    #[serde(default)]
    pub student_id: Option<String>,
    #[serde(with = "crate::core::time::server_timestamp")]
    pub start_time: OffsetDateTime,
    #[serde(default, with = "crate::core::time::server_timestamp::option")]
    pub end_time: Option<OffsetDateTime>,
    pub status: AttemptStatus,
    #[serde(default)]
    pub total_score: i32,
    #[serde(default)]
    pub auto_saved_answers: Option<Value>,
}

impl Attempt {
    pub fn saved_answers(&self) -> AnswerMap {
        decode_saved_answers(self.auto_saved_answers.as_ref())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StartAttemptRequest<'a> {
    pub exam_id: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct AutoSaveRequest<'a> {
    pub answers: &'a AnswerMap,
}

/// Body of a successful submit. The server answers either with the updated
/// attempt or with a bare acknowledgement message.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SubmitReceipt {
    Attempt(Box<Attempt>),
    Ack {
        #[serde(default)]
        message: Option<String>,
    },
}

impl SubmitReceipt {
    pub fn message(&self) -> &str {
        match self {
            Self::Ack { message: Some(message) } => message,
            _ => "Exam submitted successfully",
        }
    }

    pub fn status(&self) -> AttemptStatus {
        match self {
            Self::Attempt(attempt) => attempt.status,
            Self::Ack { .. } => AttemptStatus::Submitted,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::schemas::answer::AnswerValue;

    #[test]
    fn attempt_decodes_naive_start_time_and_snapshot() {
        let attempt: Attempt = serde_json::from_value(json!({
            "id": "a-1",
            "exam_id": "e-1",
            "student_id": "s-1",
            "start_time": "2025-05-01T09:00:00.250000",
            "end_time": null,
            "status": "in_progress",
            "total_score": 0,
            "auto_saved_answers": {"answers": {"q1": "B"}}
        }))
        .unwrap();

        assert_eq!(attempt.status, AttemptStatus::InProgress);
        assert!(!attempt.status.is_terminal());
        assert!(attempt.end_time.is_none());
        assert_eq!(attempt.saved_answers().get("q1"), Some(&AnswerValue::Text("B".to_string())));
    }

    #[test]
    fn terminal_statuses() {
        assert!(AttemptStatus::Submitted.is_terminal());
        assert!(AttemptStatus::Graded.is_terminal());
        assert_eq!(AttemptStatus::Graded.as_str(), "graded");
    }

    #[test]
    fn autosave_body_wraps_answers() {
        let mut answers = AnswerMap::new();
        answers.insert("q1".to_string(), AnswerValue::Selections(vec!["A".to_string()]));
        let body = serde_json::to_value(AutoSaveRequest { answers: &answers }).unwrap();
        assert_eq!(body, json!({"answers": {"q1": ["A"]}}));
    }

    #[test]
    fn submit_receipt_accepts_ack_or_attempt() {
        let ack: SubmitReceipt =
            serde_json::from_value(json!({"message": "Exam submitted successfully"})).unwrap();
        assert_eq!(ack.status(), AttemptStatus::Submitted);
        assert_eq!(ack.message(), "Exam submitted successfully");

        let updated: SubmitReceipt = serde_json::from_value(json!({
            "id": "a-1",
            "exam_id": "e-1",
            "start_time": "2025-05-01T09:00:00Z",
            "status": "graded"
        }))
        .unwrap();
        assert_eq!(updated.status(), AttemptStatus::Graded);
    }
}
