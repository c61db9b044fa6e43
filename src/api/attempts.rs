use crate::api::client::ApiClient;
use crate::api::errors::ApiError;
use crate::api::validation::validate_path_segment;
use crate::schemas::answer::AnswerMap;
use crate::schemas::attempt::{Attempt, AutoSaveRequest, StartAttemptRequest, SubmitReceipt};

impl ApiClient {
    pub async fn start_attempt(&self, exam_id: &str) -> Result<Attempt, ApiError> {
        validate_path_segment(exam_id, "exam")?;
        let attempt: Attempt =
            self.post_json("attempts", &StartAttemptRequest { exam_id }).await?;
        tracing::info!(attempt_id = %attempt.id, exam_id, "Attempt started");
        Ok(attempt)
    }

    pub async fn get_attempt(&self, attempt_id: &str) -> Result<Attempt, ApiError> {
        validate_path_segment(attempt_id, "attempt")?;
        self.get_json(&format!("attempts/{attempt_id}")).await
    }

    /// Sends the full answer snapshot. The acknowledgement body is ignored.
    pub async fn auto_save(&self, attempt_id: &str, answers: &AnswerMap) -> Result<(), ApiError> {
        validate_path_segment(attempt_id, "attempt")?;
        let path = format!("attempts/{attempt_id}/auto-save");
        self.post_json_ack(&path, &AutoSaveRequest { answers }).await
    }

    pub async fn submit_attempt(&self, attempt_id: &str) -> Result<SubmitReceipt, ApiError> {
        validate_path_segment(attempt_id, "attempt")?;
        self.post_empty(&format!("attempts/{attempt_id}/submit")).await
    }
}
