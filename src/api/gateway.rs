use async_trait::async_trait;

use crate::api::client::ApiClient;
use crate::api::errors::ApiError;
use crate::schemas::answer::AnswerMap;
use crate::schemas::attempt::{Attempt, SubmitReceipt};
use crate::schemas::exam::{Exam, ExamSummary};

/// The backend calls an exam-taking session depends on.
#[async_trait]
pub trait ExamGateway: Send + Sync {
    async fn list_exams(&self) -> Result<Vec<ExamSummary>, ApiError>;
    async fn start_attempt(&self, exam_id: &str) -> Result<Attempt, ApiError>;
    async fn fetch_attempt(&self, attempt_id: &str) -> Result<Attempt, ApiError>;
    async fn fetch_exam(&self, exam_id: &str) -> Result<Exam, ApiError>;
    async fn save_answers(&self, attempt_id: &str, answers: &AnswerMap) -> Result<(), ApiError>;
    async fn submit(&self, attempt_id: &str) -> Result<SubmitReceipt, ApiError>;
}

#[async_trait]
impl ExamGateway for ApiClient {
    async fn list_exams(&self) -> Result<Vec<ExamSummary>, ApiError> {
        ApiClient::list_exams(self).await
    }

    async fn start_attempt(&self, exam_id: &str) -> Result<Attempt, ApiError> {
        ApiClient::start_attempt(self, exam_id).await
    }

    async fn fetch_attempt(&self, attempt_id: &str) -> Result<Attempt, ApiError> {
        self.get_attempt(attempt_id).await
    }

    async fn fetch_exam(&self, exam_id: &str) -> Result<Exam, ApiError> {
        self.get_exam(exam_id).await
    }

    async fn save_answers(&self, attempt_id: &str, answers: &AnswerMap) -> Result<(), ApiError> {
        self.auto_save(attempt_id, answers).await
    }

    async fn submit(&self, attempt_id: &str) -> Result<SubmitReceipt, ApiError> {
        self.submit_attempt(attempt_id).await
    }
}
