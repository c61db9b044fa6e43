use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use validator::Validate;

use crate::schemas::question::Question;

/// Exam header as returned by `GET /exams`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExamSummary {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(with = "crate::core::time::server_timestamp")]
    pub start_time: OffsetDateTime,
    #[serde(with = "crate::core::time::server_timestamp")]
    pub end_time: OffsetDateTime,
    pub duration_minutes: u32,
    #[serde(default)]
    pub is_published: bool,
    #[serde(default)]
    pub question_count: Option<u32>,
    #[serde(default)]
    pub created_by: Option<String>,
}

/// Exam content as returned by `GET /exams/{id}`: the header plus the
/// ordered questions. Position in `questions` defines question numbering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exam {
    #[serde(flatten)]
    pub summary: ExamSummary,
    #[serde(default)]
    pub questions: Vec<Question>,
}

impl Exam {
    pub fn id(&self) -> &str {
        &self.summary.id
    }

    pub fn question(&self, question_id: &str) -> Option<&Question> {
        self.questions.iter().find(|question| question.id == question_id)
    }

    pub fn contains_question(&self, question_id: &str) -> bool {
        self.question(question_id).is_some()
    }
}

#[derive(Debug, Clone, Serialize, Validate)]
pub struct ExamCreate {
    #[validate(length(min = 1, message = "title must not be empty"))]
    pub title: String,
    pub description: Option<String>,
    #[serde(with = "crate::core::time::server_timestamp")]
    pub start_time: OffsetDateTime,
    #[serde(with = "crate::core::time::server_timestamp")]
    pub end_time: OffsetDateTime,
    #[validate(range(min = 1, message = "duration_minutes must be at least 1"))]
    pub duration_minutes: u32,
    pub is_published: bool,
    #[validate(length(min = 1, message = "select at least one question"))]
    pub question_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Validate)]
pub struct ExamUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 1, message = "title must not be empty"))]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        with = "crate::core::time::server_timestamp::option"
    )]
    pub start_time: Option<OffsetDateTime>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        with = "crate::core::time::server_timestamp::option"
    )]
    pub end_time: Option<OffsetDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 1, message = "duration_minutes must be at least 1"))]
    pub duration_minutes: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_published: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 1, message = "select at least one question"))]
    pub question_ids: Option<Vec<String>>,
}

/// The exam window must be a real interval.
pub fn validate_exam_window(start: OffsetDateTime, end: OffsetDateTime) -> Result<(), String> {
    if end <= start {
        return Err("end_time must be after start_time".to_string());
    }
    Ok(())
}
