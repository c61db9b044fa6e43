use crate::api::client::ApiClient;
use crate::api::errors::ApiError;
use crate::api::validation::{validate_path_segment, validate_payload};
use crate::schemas::exam::{validate_exam_window, Exam, ExamCreate, ExamSummary, ExamUpdate};

impl ApiClient {
    pub async fn list_exams(&self) -> Result<Vec<ExamSummary>, ApiError> {
        self.get_json("exams").await
    }

    /// Exam header plus its questions in order.
    pub async fn get_exam(&self, exam_id: &str) -> Result<Exam, ApiError> {
        validate_path_segment(exam_id, "exam")?;
        self.get_json(&format!("exams/{exam_id}")).await
    }

    pub async fn create_exam(&self, payload: &ExamCreate) -> Result<ExamSummary, ApiError> {
        validate_payload(payload)?;
        validate_exam_window(payload.start_time, payload.end_time)
            .map_err(ApiError::InvalidInput)?;
        let exam: ExamSummary = self.post_json("exams", payload).await?;
        tracing::info!(exam_id = %exam.id, title = %exam.title, "Exam created");
        Ok(exam)
    }

    pub async fn update_exam(
        &self,
        exam_id: &str,
        payload: &ExamUpdate,
    ) -> Result<ExamSummary, ApiError> {
        validate_path_segment(exam_id, "exam")?;
        validate_payload(payload)?;
        if let (Some(start), Some(end)) = (payload.start_time, payload.end_time) {
            validate_exam_window(start, end).map_err(ApiError::InvalidInput)?;
        }
        self.put_json(&format!("exams/{exam_id}"), payload).await
    }

    pub async fn delete_exam(&self, exam_id: &str) -> Result<(), ApiError> {
        validate_path_segment(exam_id, "exam")?;
        self.delete(&format!("exams/{exam_id}")).await?;
        tracing::info!(exam_id, "Exam deleted");
        Ok(())
    }
}
