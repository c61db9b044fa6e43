use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use validator::{Validate, ValidationError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    SingleChoice,
    MultiChoice,
    Text,
    ImageUpload,
}

impl QuestionType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SingleChoice => "single_choice",
            Self::MultiChoice => "multi_choice",
            Self::Text => "text",
            Self::ImageUpload => "image_upload",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::SingleChoice => "single choice",
            Self::MultiChoice => "multi choice",
            Self::Text => "text",
            Self::ImageUpload => "image upload",
        }
    }

    pub fn is_choice(self) -> bool {
        matches!(self, Self::SingleChoice | Self::MultiChoice)
    }
}

/// A question as delivered inside exam content or the question bank.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    #[serde(default)]
    pub options: Option<Vec<String>>,
    #[serde(default)]
    pub correct_answers: Option<Vec<Value>>,
    #[serde(default = "default_max_score")]
    pub max_score: i32,
    #[serde(default)]
    pub complexity: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default, with = "crate::core::time::server_timestamp::option")]
    pub created_at: Option<OffsetDateTime>,
}

fn default_max_score() -> i32 {
    1
}

impl Question {
    pub fn options(&self) -> &[String] {
        self.options.as_deref().unwrap_or_default()
    }
}

/// Authoring payload for `POST /questions` and the body of `PUT /questions/{id}`.
#[derive(Debug, Clone, Serialize, Validate)]
pub struct QuestionCreate {
    #[validate(length(min = 1, message = "title must not be empty"))]
    pub title: String,
    pub description: Option<String>,
    #[validate(length(min = 1, message = "complexity must not be empty"))]
    pub complexity: String,
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    #[validate(custom(function = validate_options))]
    pub options: Option<Vec<String>>,
    pub correct_answers: Option<Vec<Value>>,
    #[validate(range(min = 1, message = "max_score must be at least 1"))]
    pub max_score: i32,
    pub tags: Option<Vec<String>>,
}

/// Partial update for `PUT /questions/{id}`; absent fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Validate)]
pub struct QuestionUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 1, message = "title must not be empty"))]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub complexity: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub question_type: Option<QuestionType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(custom(function = validate_options))]
    pub options: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correct_answers: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 1, message = "max_score must be at least 1"))]
    pub max_score: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

/// Query parameters for `GET /questions`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QuestionFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub question_type: Option<QuestionType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub complexity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImportSummary {
    pub message: String,
}

fn validate_options(options: &[String]) -> Result<(), ValidationError> {
    if options.iter().any(|option| option.trim().is_empty()) {
        return Err(ValidationError::new("options_must_not_be_blank"));
    }
    Ok(())
}

/// Checks the cross-field rule that choice questions carry options and a
/// non-empty correct-answer set drawn from them, and other types carry neither.
pub fn validate_question_shape(
    question_type: QuestionType,
    options: Option<&[String]>,
    correct_answers: Option<&[Value]>,
) -> Result<(), String> {
    if !question_type.is_choice() {
        if options.is_some_and(|items| !items.is_empty()) {
            return Err(format!("{} questions must not have options", question_type.as_str()));
        }
        if correct_answers.is_some_and(|items| !items.is_empty()) {
            return Err(format!(
                "{} questions must not have correct answers",
                question_type.as_str()
            ));
        }
        return Ok(());
    }

    let options = options.unwrap_or_default();
    if options.len() < 2 {
        return Err("choice questions need at least two options".to_string());
    }

    let correct = correct_answers.unwrap_or_default();
    if correct.is_empty() {
        return Err("choice questions need at least one correct answer".to_string());
    }
    if question_type == QuestionType::SingleChoice && correct.len() != 1 {
        return Err("single choice questions take exactly one correct answer".to_string());
    }
    for answer in correct {
        let known = answer.as_str().is_some_and(|text| options.iter().any(|option| option == text));
        if !known {
            return Err(format!("correct answer {answer} is not one of the options"));
        }
    }

    Ok(())
}
