use std::path::Path;

use reqwest::multipart::{Form, Part};

use crate::api::client::ApiClient;
use crate::api::errors::ApiError;
use crate::api::validation::{validate_import_file, validate_payload, validate_uuid};
use crate::schemas::question::{
    validate_question_shape, ImportSummary, Question, QuestionCreate, QuestionFilter,
    QuestionUpdate,
};

const XLSX_MIME: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

impl ApiClient {
    pub async fn list_questions(&self, filter: &QuestionFilter) -> Result<Vec<Question>, ApiError> {
        self.get_json_with_query("questions", filter).await
    }

    pub async fn get_question(&self, question_id: &str) -> Result<Question, ApiError> {
        validate_uuid(question_id, "question")?;
        self.get_json(&format!("questions/{question_id}")).await
    }

    pub async fn create_question(&self, payload: &QuestionCreate) -> Result<Question, ApiError> {
        validate_payload(payload)?;
        validate_question_shape(
            payload.question_type,
            payload.options.as_deref(),
            payload.correct_answers.as_deref(),
        )
        .map_err(ApiError::InvalidInput)?;

        let question: Question = self.post_json("questions", payload).await?;
        tracing::info!(
            question_id = %question.id,
            kind = question.question_type.as_str(),
            "Question created"
        );
        Ok(question)
    }

    pub async fn update_question(
        &self,
        question_id: &str,
        payload: &QuestionUpdate,
    ) -> Result<Question, ApiError> {
        validate_uuid(question_id, "question")?;
        validate_payload(payload)?;
        if let Some(question_type) = payload.question_type {
            validate_question_shape(
                question_type,
                payload.options.as_deref(),
                payload.correct_answers.as_deref(),
            )
            .map_err(ApiError::InvalidInput)?;
        }
        self.put_json(&format!("questions/{question_id}"), payload).await
    }

    pub async fn delete_question(&self, question_id: &str) -> Result<(), ApiError> {
        validate_uuid(question_id, "question")?;
        self.delete(&format!("questions/{question_id}")).await
    }

    /// Uploads an `.xlsx` question bank.
    pub async fn import_questions(&self, path: &Path) -> Result<ImportSummary, ApiError> {
        validate_import_file(path)?;

        let bytes = tokio::fs::read(path).await.map_err(|err| {
            ApiError::InvalidInput(format!("Cannot read {}: {err}", path.display()))
        })?;
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("questions.xlsx")
            .to_string();
        let size = bytes.len();

        let part = Part::bytes(bytes)
            .file_name(file_name.clone())
            .mime_str(XLSX_MIME)
            .map_err(|err| ApiError::InvalidInput(err.to_string()))?;
        let form = Form::new().part("file", part);

        let summary: ImportSummary = self.post_multipart("questions/import", form).await?;
        tracing::info!(file = %file_name, size, message = %summary.message, "Questions imported");
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use axum::{
        extract::{Multipart, Query},
        routing::{get, post},
        Json, Router,
    };
    use serde_json::json;

    use crate::api::errors::ApiError;
    use crate::schemas::question::{QuestionCreate, QuestionFilter, QuestionType};
    use crate::test_support;

    #[tokio::test]
    async fn list_questions_sends_filter_as_query() {
        let router = Router::new().route(
            "/api/v1/questions",
            get(|Query(params): Query<HashMap<String, String>>| async move {
                let title = format!(
                    "{}|{}",
                    params.get("search").cloned().unwrap_or_default(),
                    params.get("type").cloned().unwrap_or_default()
                );
                Json(json!([{"id": "q1", "title": title, "type": "text"}]))
            }),
        );
        let server = test_support::serve(router).await;
        let client = test_support::api_client(&server.base_url);

        let filter = QuestionFilter {
            search: Some("cells".to_string()),
            question_type: Some(QuestionType::Text),
            ..QuestionFilter::default()
        };
        let questions = client.list_questions(&filter).await.unwrap();
        assert_eq!(questions[0].title, "cells|text");
    }

    #[tokio::test]
    async fn question_ids_must_be_uuids() {
        let client = test_support::api_client("http://127.0.0.1:9/api/v1");
        let err = client.get_question("q1").await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidInput(_)));
        let err = client.delete_question("1; drop").await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn create_question_checks_shape_before_dispatch() {
        let client = test_support::api_client("http://127.0.0.1:9/api/v1");
        let payload = QuestionCreate {
            title: "Pick".to_string(),
            description: None,
            complexity: "easy".to_string(),
            question_type: QuestionType::SingleChoice,
            options: Some(vec!["A".to_string(), "B".to_string()]),
            correct_answers: None,
            max_score: 1,
            tags: None,
        };
        let err = client.create_question(&payload).await.unwrap_err();
        assert_eq!(err.detail(), "choice questions need at least one correct answer");
    }

    #[tokio::test]
    async fn import_uploads_xlsx_as_multipart_file() {
        let router = Router::new().route(
            "/api/v1/questions/import",
            post(|mut multipart: Multipart| async move {
                let mut seen = String::new();
                while let Ok(Some(field)) = multipart.next_field().await {
                    let name = field.name().unwrap_or_default().to_string();
                    let file = field.file_name().unwrap_or_default().to_string();
                    let len = field.bytes().await.map(|bytes| bytes.len()).unwrap_or(0);
                    seen = format!("{name}:{file}:{len}");
                }
                Json(json!({"message": seen}))
            }),
        );
        let server = test_support::serve(router).await;
        let client = test_support::api_client(&server.base_url);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bank.xlsx");
        std::fs::write(&path, b"PK\x03\x04fake").unwrap();

        let summary = client.import_questions(&path).await.unwrap();
        assert_eq!(summary.message, "file:bank.xlsx:8");

        let err = client.import_questions(&dir.path().join("bank.csv")).await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidInput(_)));
    }
}
