use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::time::Instant;

use crate::api::errors::ApiError;
use crate::api::gateway::ExamGateway;
use crate::api::token::{MemoryTokenStore, TokenStore};
use crate::api::{ApiClient, ClientContext};
use crate::core::time::Clock;
use crate::schemas::answer::AnswerMap;
use crate::schemas::attempt::{Attempt, AttemptStatus, SubmitReceipt};
use crate::schemas::exam::{Exam, ExamSummary};

pub(crate) async fn env_lock() -> OwnedMutexGuard<()> {
    static LOCK: OnceLock<Arc<AsyncMutex<()>>> = OnceLock::new();
    let lock = LOCK.get_or_init(|| Arc::new(AsyncMutex::new(()))).clone();
    lock.lock_owned().await
}

/// Backend stub served on an ephemeral local port for the lifetime of the value.
pub(crate) struct StubServer {
    pub(crate) base_url: String,
    task: tokio::task::JoinHandle<()>,
}

impl Drop for StubServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub(crate) async fn serve(router: axum::Router) -> StubServer {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind stub server");
    let addr = listener.local_addr().expect("stub server addr");
    let task = tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    StubServer { base_url: format!("http://{addr}/api/v1"), task }
}

pub(crate) fn api_client(base_url: &str) -> ApiClient {
    let tokens: Arc<dyn TokenStore> = Arc::new(MemoryTokenStore::new());
    let context = ClientContext::new(base_url, tokens).with_timeout(Duration::from_secs(5));
    ApiClient::new(context).expect("api client")
}

/// Wall clock that advances with tokio's (possibly paused) clock.
pub(crate) struct TokioClock {
    wall: OffsetDateTime,
    origin: Instant,
}

impl TokioClock {
    pub(crate) fn starting_at(wall: OffsetDateTime) -> Self {
        Self { wall, origin: Instant::now() }
    }
}

impl Clock for TokioClock {
    fn now_utc(&self) -> OffsetDateTime {
        self.wall + (Instant::now() - self.origin)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct GatewayCalls {
    pub(crate) listings: usize,
    pub(crate) starts: usize,
    pub(crate) attempt_fetches: usize,
    pub(crate) exam_fetches: usize,
    pub(crate) saves: usize,
    pub(crate) submits: usize,
}

#[derive(Default)]
struct MockState {
    listing: Vec<ExamSummary>,
    attempt: Option<Attempt>,
    exam: Option<Exam>,
    exam_error: Option<ApiError>,
    save_failures: usize,
    submit_failures: usize,
    submit_delay: Duration,
    saved: Vec<(Instant, AnswerMap)>,
    events: Vec<&'static str>,
    calls: GatewayCalls,
}

/// Scripted in-memory backend.
#[derive(Default)]
pub(crate) struct MockGateway {
    state: Mutex<MockState>,
}

impl MockGateway {
    fn with_state<T>(&self, f: impl FnOnce(&mut MockState) -> T) -> T {
        let mut guard = self.state.lock().expect("mock gateway state");
        f(&mut guard)
    }

    pub(crate) fn set_listing(&self, exams: Vec<ExamSummary>) {
        self.with_state(|state| state.listing = exams);
    }

    pub(crate) fn set_attempt(&self, attempt: Attempt) {
        self.with_state(|state| state.attempt = Some(attempt));
    }

    pub(crate) fn set_exam(&self, exam: Exam) {
        self.with_state(|state| state.exam = Some(exam));
    }

    pub(crate) fn fail_exam(&self, error: ApiError) {
        self.with_state(|state| state.exam_error = Some(error));
    }

    pub(crate) fn fail_saves(&self, count: usize) {
        self.with_state(|state| state.save_failures = count);
    }

    pub(crate) fn fail_submits(&self, count: usize) {
        self.with_state(|state| state.submit_failures = count);
    }

    pub(crate) fn delay_submits(&self, delay: Duration) {
        self.with_state(|state| state.submit_delay = delay);
    }

    pub(crate) fn calls(&self) -> GatewayCalls {
        self.with_state(|state| state.calls)
    }

    pub(crate) fn saved(&self) -> Vec<(Instant, AnswerMap)> {
        self.with_state(|state| state.saved.clone())
    }

    pub(crate) fn events(&self) -> Vec<&'static str> {
        self.with_state(|state| state.events.clone())
    }
}

#[async_trait]
impl ExamGateway for MockGateway {
    async fn list_exams(&self) -> Result<Vec<ExamSummary>, ApiError> {
        Ok(self.with_state(|state| {
            state.calls.listings += 1;
            state.listing.clone()
        }))
    }

    async fn start_attempt(&self, exam_id: &str) -> Result<Attempt, ApiError> {
        let attempt = self.with_state(|state| {
            state.calls.starts += 1;
            let id = format!("attempt-{}", state.calls.starts);
            fixtures::attempt(&id, exam_id, OffsetDateTime::now_utc(), AttemptStatus::InProgress)
        });
        Ok(attempt)
    }

    async fn fetch_attempt(&self, attempt_id: &str) -> Result<Attempt, ApiError> {
        self.with_state(|state| {
            state.calls.attempt_fetches += 1;
            state
                .attempt
                .clone()
                .filter(|attempt| attempt.id == attempt_id)
                .ok_or_else(|| ApiError::NotFound("Attempt not found".to_string()))
        })
    }

    async fn fetch_exam(&self, exam_id: &str) -> Result<Exam, ApiError> {
        self.with_state(|state| {
            state.calls.exam_fetches += 1;
            if let Some(error) = state.exam_error.clone() {
                return Err(error);
            }
            state
                .exam
                .clone()
                .filter(|exam| exam.id() == exam_id)
                .ok_or_else(|| ApiError::NotFound("Exam not found".to_string()))
        })
    }

    async fn save_answers(&self, _attempt_id: &str, answers: &AnswerMap) -> Result<(), ApiError> {
        self.with_state(|state| {
            state.calls.saves += 1;
            state.events.push("save");
            if state.save_failures > 0 {
                state.save_failures -= 1;
                return Err(ApiError::Timeout);
            }
            state.saved.push((Instant::now(), answers.clone()));
            Ok(())
        })
    }

    async fn submit(&self, _attempt_id: &str) -> Result<SubmitReceipt, ApiError> {
        let delay = self.with_state(|state| {
            state.calls.submits += 1;
            state.events.push("submit");
            state.submit_delay
        });
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        self.with_state(|state| {
            if state.submit_failures > 0 {
                state.submit_failures -= 1;
                return Err(ApiError::Server {
                    status: 503,
                    detail: "Service temporarily unavailable".to_string(),
                });
            }
            if let Some(attempt) = state.attempt.as_mut() {
                attempt.status = AttemptStatus::Submitted;
            }
            Ok(SubmitReceipt::Ack { message: Some("Exam submitted successfully".to_string()) })
        })
    }
}

pub(crate) mod fixtures {
    use serde_json::json;
    use time::{Duration, OffsetDateTime};

    use crate::schemas::answer::UploadMetadata;
    use crate::schemas::attempt::{Attempt, AttemptStatus};
    use crate::schemas::exam::{Exam, ExamSummary};
    use crate::schemas::question::{Question, QuestionType};

    pub(crate) fn now() -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(1_746_090_000).expect("fixed timestamp")
    }

    fn question(
        id: &str,
        question_type: QuestionType,
        options: Option<&[&str]>,
        correct: Option<serde_json::Value>,
    ) -> Question {
        Question {
            id: id.to_string(),
            title: format!("Question {id}"),
            description: None,
            question_type,
            options: options.map(|items| items.iter().map(|item| item.to_string()).collect()),
            correct_answers: correct.map(|value| vec![value]),
            max_score: 1,
            complexity: Some("easy".to_string()),
            tags: None,
            created_by: None,
            created_at: None,
        }
    }

    pub(crate) fn single_choice(id: &str, options: &[&str]) -> Question {
        let correct = options.first().map(|first| json!(first));
        question(id, QuestionType::SingleChoice, Some(options), correct)
    }

    pub(crate) fn multi_choice(id: &str, options: &[&str]) -> Question {
        let correct = options.first().map(|first| json!(first));
        question(id, QuestionType::MultiChoice, Some(options), correct)
    }

    pub(crate) fn text(id: &str) -> Question {
        question(id, QuestionType::Text, None, None)
    }

    pub(crate) fn image_upload(id: &str) -> Question {
        question(id, QuestionType::ImageUpload, None, None)
    }

    pub(crate) fn exam_summary(
        id: &str,
        start_time: OffsetDateTime,
        end_time: OffsetDateTime,
    ) -> ExamSummary {
        ExamSummary {
            id: id.to_string(),
            title: format!("Exam {id}"),
            description: None,
            start_time,
            end_time,
            duration_minutes: 60,
            is_published: true,
            question_count: None,
            created_by: None,
        }
    }

    pub(crate) fn exam(id: &str, duration_minutes: u32, questions: Vec<Question>) -> Exam {
        let mut summary = exam_summary(id, now() - Duration::days(1), now() + Duration::days(1));
        summary.duration_minutes = duration_minutes;
        Exam { summary, questions }
    }

    pub(crate) fn attempt(
        id: &str,
        exam_id: &str,
        start_time: OffsetDateTime,
        status: AttemptStatus,
    ) -> Attempt {
        Attempt {
            id: id.to_string(),
            exam_id: exam_id.to_string(),
            student_id: Some("student-1".to_string()),
            start_time,
            end_time: None,
            status,
            total_score: 0,
            auto_saved_answers: None,
        }
    }

    pub(crate) fn upload(file_name: &str) -> UploadMetadata {
        UploadMetadata {
            file_name: file_name.to_string(),
            file_size: 1024,
            file_type: "image/png".to_string(),
            last_modified: 1_700_000_000_000,
        }
    }
}
