use std::collections::BTreeSet;

use thiserror::Error;

use crate::api::errors::ApiError;
use crate::api::gateway::ExamGateway;
use crate::schemas::answer::{AnswerMap, AnswerValue};
use crate::schemas::attempt::{Attempt, AttemptStatus, SubmitReceipt};
use crate::schemas::exam::Exam;
use crate::services::answer_buffer::AnswerBuffer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    LoadingAttempt,
    LoadingExam,
    Active,
    Submitting,
    Terminal,
    Error,
}

impl SessionPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LoadingAttempt => "loading_attempt",
            Self::LoadingExam => "loading_exam",
            Self::Active => "active",
            Self::Submitting => "submitting",
            Self::Terminal => "terminal",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStage {
    Attempt,
    Exam,
}

/// Why a session could not be opened. Fatal; the only way out is back to
/// the exam listing.
#[derive(Debug, Clone)]
pub struct SessionFailure {
    pub stage: LoadStage,
    pub error: ApiError,
}

impl SessionFailure {
    pub fn message(&self) -> String {
        let what = match self.stage {
            LoadStage::Attempt => "attempt",
            LoadStage::Exam => "exam",
        };
        format!("Could not load the {what}: {}", self.error.detail())
    }

    pub fn recovery_action(&self) -> &'static str {
        "Back to exams"
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalReason {
    /// This session's own submit went through.
    Submitted { status: AttemptStatus, message: String },
    /// The attempt was already closed when the session opened.
    AlreadyClosed(AttemptStatus),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("answers can only change while the attempt is active (currently {0})")]
    NotActive(&'static str),
    #[error("question {0} is not part of this exam")]
    UnknownQuestion(String),
}

/// State machine for taking one attempt:
/// `loading_attempt -> loading_exam -> active -> submitting -> terminal`,
/// with `error` reachable from either loading phase.
#[derive(Debug)]
pub struct AttemptSession {
    attempt_id: String,
    phase: SessionPhase,
    attempt: Option<Attempt>,
    exam: Option<Exam>,
    question_ids: BTreeSet<String>,
    buffer: AnswerBuffer,
    failure: Option<SessionFailure>,
    submit_error: Option<String>,
    terminal: Option<TerminalReason>,
}

impl AttemptSession {
    pub fn new(attempt_id: impl Into<String>) -> Self {
        Self {
            attempt_id: attempt_id.into(),
            phase: SessionPhase::LoadingAttempt,
            attempt: None,
            exam: None,
            question_ids: BTreeSet::new(),
            buffer: AnswerBuffer::new(),
            failure: None,
            submit_error: None,
            terminal: None,
        }
    }

    /// Fetches the attempt, then its exam, and activates the session. An
    /// attempt that is already submitted or graded goes straight to terminal
    /// without its exam being fetched.
    pub async fn load(&mut self, gateway: &dyn ExamGateway) -> SessionPhase {
        if self.phase != SessionPhase::LoadingAttempt {
            return self.phase;
        }

        let attempt = match gateway.fetch_attempt(&self.attempt_id).await {
            Ok(attempt) => attempt,
            Err(err) => {
                self.fail(LoadStage::Attempt, err);
                return self.phase;
            }
        };
        self.phase = SessionPhase::LoadingExam;

        if attempt.status.is_terminal() {
            tracing::info!(
                attempt_id = %self.attempt_id,
                status = attempt.status.as_str(),
                "Attempt already closed; skipping to results"
            );
            self.terminal = Some(TerminalReason::AlreadyClosed(attempt.status));
            self.attempt = Some(attempt);
            self.phase = SessionPhase::Terminal;
            return self.phase;
        }

        let exam = match gateway.fetch_exam(&attempt.exam_id).await {
            Ok(exam) => exam,
            Err(err) => {
                self.attempt = Some(attempt);
                self.fail(LoadStage::Exam, err);
                return self.phase;
            }
        };

        self.question_ids = exam.questions.iter().map(|question| question.id.clone()).collect();
        self.buffer = AnswerBuffer::seeded(self.restorable(attempt.saved_answers()));
        tracing::info!(
            attempt_id = %self.attempt_id,
            exam_id = %exam.id(),
            questions = exam.questions.len(),
            restored = self.buffer.len(),
            "Attempt session active"
        );

        self.attempt = Some(attempt);
        self.exam = Some(exam);
        self.phase = SessionPhase::Active;
        self.phase
    }

    pub fn set_answer(
        &mut self,
        question_id: &str,
        value: AnswerValue,
    ) -> Result<(), SessionError> {
        if !self.accepts_edits() {
            return Err(SessionError::NotActive(self.phase.as_str()));
        }
        if !self.question_ids.contains(question_id) {
            return Err(SessionError::UnknownQuestion(question_id.to_string()));
        }
        self.buffer.set(question_id, value);
        Ok(())
    }

    /// Enters `submitting` if allowed. Returns `false` while a submit is
    /// already in flight, or outside `active`, in which case nothing must be
    /// sent.
    pub fn begin_submit(&mut self) -> bool {
        if self.phase != SessionPhase::Active {
            tracing::debug!(
                attempt_id = %self.attempt_id,
                phase = self.phase.as_str(),
                "Ignoring submit request"
            );
            return false;
        }
        self.phase = SessionPhase::Submitting;
        self.submit_error = None;
        true
    }

    pub fn finish_submit(&mut self, result: Result<SubmitReceipt, ApiError>) {
        if self.phase != SessionPhase::Submitting {
            return;
        }
        match result {
            Ok(receipt) => {
                tracing::info!(attempt_id = %self.attempt_id, "Attempt submitted");
                self.terminal = Some(TerminalReason::Submitted {
                    status: receipt.status(),
                    message: receipt.message().to_string(),
                });
                if let Some(attempt) = self.attempt.as_mut() {
                    attempt.status = receipt.status();
                }
                self.phase = SessionPhase::Terminal;
            }
            Err(err) => {
                tracing::warn!(attempt_id = %self.attempt_id, error = %err, "Submit failed");
                self.submit_error = Some(err.detail());
                self.phase = SessionPhase::Active;
            }
        }
    }

    /// Begins and completes one submit. Does nothing unless `active`.
    pub async fn submit(&mut self, gateway: &dyn ExamGateway) -> SessionPhase {
        if self.begin_submit() {
            let result = gateway.submit(&self.attempt_id).await;
            self.finish_submit(result);
        }
        self.phase
    }

    pub fn attempt_id(&self) -> &str {
        &self.attempt_id
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn accepts_edits(&self) -> bool {
        self.phase == SessionPhase::Active
    }

    pub fn attempt(&self) -> Option<&Attempt> {
        self.attempt.as_ref()
    }

    pub fn exam(&self) -> Option<&Exam> {
        self.exam.as_ref()
    }

    pub fn buffer(&self) -> &AnswerBuffer {
        &self.buffer
    }

    pub fn answer(&self, question_id: &str) -> Option<&AnswerValue> {
        self.buffer.get(question_id)
    }

    pub fn failure(&self) -> Option<&SessionFailure> {
        self.failure.as_ref()
    }

    pub fn submit_error(&self) -> Option<&str> {
        self.submit_error.as_deref()
    }

    pub fn terminal(&self) -> Option<&TerminalReason> {
        self.terminal.as_ref()
    }

    fn fail(&mut self, stage: LoadStage, error: ApiError) {
        tracing::error!(
            attempt_id = %self.attempt_id,
            stage = ?stage,
            error = %error,
            "Failed to open attempt session"
        );
        self.failure = Some(SessionFailure { stage, error });
        self.phase = SessionPhase::Error;
    }

    fn restorable(&self, saved: AnswerMap) -> AnswerMap {
        let (kept, dropped): (AnswerMap, AnswerMap) =
            saved.into_iter().partition(|(question_id, _)| self.question_ids.contains(question_id));
        if !dropped.is_empty() {
            tracing::warn!(
                attempt_id = %self.attempt_id,
                dropped = dropped.len(),
                "Ignoring autosaved answers for questions outside the exam"
            );
        }
        kept
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{fixtures, MockGateway};

    fn gateway_with_attempt(status: AttemptStatus) -> MockGateway {
        let gateway = MockGateway::default();
        let mut attempt = fixtures::attempt("a-1", "e-1", fixtures::now(), status);
        attempt.auto_saved_answers = Some(serde_json::json!({"q1": "B", "ghost": "x"}));
        gateway.set_attempt(attempt);
        gateway.set_exam(fixtures::exam(
            "e-1",
            60,
            vec![fixtures::single_choice("q1", &["A", "B"]), fixtures::text("q2")],
        ));
        gateway
    }

    #[tokio::test]
    async fn load_activates_and_restores_saved_answers() {
        let gateway = gateway_with_attempt(AttemptStatus::InProgress);
        let mut session = AttemptSession::new("a-1");

        assert_eq!(session.load(&gateway).await, SessionPhase::Active);
        assert_eq!(session.answer("q1"), Some(&AnswerValue::Text("B".to_string())));
        assert!(session.answer("ghost").is_none());
        assert_eq!(gateway.calls().attempt_fetches, 1);
        assert_eq!(gateway.calls().exam_fetches, 1);
    }

    #[tokio::test]
    async fn already_submitted_attempt_goes_straight_to_terminal() {
        let gateway = gateway_with_attempt(AttemptStatus::Submitted);
        let mut session = AttemptSession::new("a-1");

        assert_eq!(session.load(&gateway).await, SessionPhase::Terminal);
        assert_eq!(
            session.terminal(),
            Some(&TerminalReason::AlreadyClosed(AttemptStatus::Submitted))
        );
        assert!(matches!(
            session.set_answer("q1", AnswerValue::Text("A".to_string())),
            Err(SessionError::NotActive("terminal"))
        ));
        assert_eq!(session.submit(&gateway).await, SessionPhase::Terminal);

        let calls = gateway.calls();
        assert_eq!(calls.exam_fetches, 0);
        assert_eq!(calls.saves, 0);
        assert_eq!(calls.submits, 0);
    }

    #[tokio::test]
    async fn missing_attempt_is_fatal() {
        let gateway = MockGateway::default();
        let mut session = AttemptSession::new("nope");

        assert_eq!(session.load(&gateway).await, SessionPhase::Error);
        let failure = session.failure().unwrap();
        assert_eq!(failure.stage, LoadStage::Attempt);
        assert!(failure.error.is_not_found_or_denied());
        assert_eq!(failure.recovery_action(), "Back to exams");
        assert_eq!(gateway.calls().exam_fetches, 0);
    }

    #[tokio::test]
    async fn exam_failure_is_fatal() {
        let gateway = gateway_with_attempt(AttemptStatus::InProgress);
        gateway.fail_exam(ApiError::Forbidden("Not enough permissions".to_string()));
        let mut session = AttemptSession::new("a-1");

        assert_eq!(session.load(&gateway).await, SessionPhase::Error);
        assert_eq!(session.failure().map(|failure| failure.stage), Some(LoadStage::Exam));
        assert!(session.failure().unwrap().message().contains("Not enough permissions"));
    }

    #[tokio::test]
    async fn edits_are_limited_to_exam_questions() {
        let gateway = gateway_with_attempt(AttemptStatus::InProgress);
        let mut session = AttemptSession::new("a-1");
        session.load(&gateway).await;

        session.set_answer("q2", AnswerValue::Text("essay".to_string())).unwrap();
        assert_eq!(session.buffer().revision(), 1);
        assert_eq!(
            session.set_answer("q9", AnswerValue::Text("x".to_string())),
            Err(SessionError::UnknownQuestion("q9".to_string()))
        );
    }

    #[tokio::test]
    async fn reentrant_submit_is_ignored() {
        let gateway = gateway_with_attempt(AttemptStatus::InProgress);
        let mut session = AttemptSession::new("a-1");
        session.load(&gateway).await;

        assert!(session.begin_submit());
        assert!(!session.begin_submit());
        assert!(session.set_answer("q2", AnswerValue::Text("late".to_string())).is_err());
    }

    #[tokio::test]
    async fn failed_submit_returns_to_active_and_keeps_answers() {
        let gateway = gateway_with_attempt(AttemptStatus::InProgress);
        gateway.fail_submits(1);
        let mut session = AttemptSession::new("a-1");
        session.load(&gateway).await;
        session.set_answer("q2", AnswerValue::Text("keep me".to_string())).unwrap();

        assert_eq!(session.submit(&gateway).await, SessionPhase::Active);
        assert!(session.submit_error().is_some());
        assert_eq!(session.answer("q2"), Some(&AnswerValue::Text("keep me".to_string())));

        assert_eq!(session.submit(&gateway).await, SessionPhase::Terminal);
        assert!(matches!(
            session.terminal(),
            Some(TerminalReason::Submitted { status: AttemptStatus::Submitted, .. })
        ));
        assert_eq!(gateway.calls().submits, 2);
    }
}
