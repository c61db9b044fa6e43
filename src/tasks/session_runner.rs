use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::api::errors::ApiError;
use crate::api::gateway::ExamGateway;
use crate::core::config::Settings;
use crate::core::time::Clock;
use crate::schemas::answer::{AnswerMap, AnswerValue};
use crate::schemas::attempt::{AttemptStatus, SubmitReceipt};
use crate::schemas::exam::Exam;
use crate::services::attempt_session::{
    AttemptSession, SessionError, SessionFailure, SessionPhase, TerminalReason,
};
use crate::services::autosave::{AutosaveConfig, AutosaveScheduler, FlushTicket, SaveStatus};
use crate::services::countdown::{Countdown, Thresholds, Tick, Urgency};

const COMMAND_BUFFER: usize = 32;

#[derive(Debug, Clone, Copy)]
pub struct RunnerConfig {
    pub autosave: AutosaveConfig,
    pub thresholds: Thresholds,
    pub tick: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            autosave: AutosaveConfig::default(),
            thresholds: Thresholds::default(),
            tick: Duration::from_secs(1),
        }
    }
}

impl From<&Settings> for RunnerConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            autosave: AutosaveConfig::from(settings.autosave()),
            thresholds: Thresholds::from(settings.timer()),
            tick: Duration::from_secs(1),
        }
    }
}

/// What a front end needs to draw the session. Published after every change.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub phase: SessionPhase,
    pub accepts_edits: bool,
    pub remaining_seconds: i64,
    pub urgency: Urgency,
    pub timer_label: String,
    pub save_status: SaveStatus,
    pub answered: usize,
    pub total_questions: usize,
    pub unsaved_changes: bool,
    pub submit_error: Option<String>,
    pub exam: Option<Arc<Exam>>,
    pub answers: AnswerMap,
}

impl SessionSnapshot {
    pub(crate) fn loading() -> Self {
        Self {
            phase: SessionPhase::LoadingAttempt,
            accepts_edits: false,
            remaining_seconds: 0,
            urgency: Urgency::Normal,
            timer_label: String::new(),
            save_status: SaveStatus::Idle,
            answered: 0,
            total_questions: 0,
            unsaved_changes: false,
            submit_error: None,
            exam: None,
            answers: AnswerMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitRequest {
    Started,
    /// A submit is already running or the session is not active.
    Ignored,
}

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error(transparent)]
    Rejected(#[from] SessionError),
    #[error("session is closed")]
    Closed,
}

#[derive(Debug)]
pub(crate) enum SessionCommand {
    Answer {
        question_id: String,
        value: AnswerValue,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    Submit {
        reply: oneshot::Sender<SubmitRequest>,
    },
    Unload,
}

#[derive(Debug)]
pub enum SessionOutcome {
    Submitted { attempt_id: String, exam_id: String, message: String },
    AlreadyClosed { attempt_id: String, exam_id: String, status: AttemptStatus },
    Failed(SessionFailure),
    /// The session was left while still open. `final_flush` resolves once the
    /// best-effort save has finished, if one was sent.
    Unloaded { unsaved_changes: bool, final_flush: Option<JoinHandle<()>> },
}

/// Front-end side of a running session.
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    snapshots: watch::Receiver<SessionSnapshot>,
    task: JoinHandle<SessionOutcome>,
}

impl SessionHandle {
    pub async fn answer(
        &self,
        question_id: impl Into<String>,
        value: AnswerValue,
    ) -> Result<(), CommandError> {
        let (reply, response) = oneshot::channel();
        let command = SessionCommand::Answer { question_id: question_id.into(), value, reply };
        self.commands.send(command).await.map_err(|_| CommandError::Closed)?;
        response.await.map_err(|_| CommandError::Closed)?.map_err(CommandError::from)
    }

    pub async fn submit(&self) -> Result<SubmitRequest, CommandError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(SessionCommand::Submit { reply })
            .await
            .map_err(|_| CommandError::Closed)?;
        response.await.map_err(|_| CommandError::Closed)
    }

    /// Leaves the session. Safe to call after it has already ended.
    pub async fn unload(&self) {
        let _ = self.commands.send(SessionCommand::Unload).await;
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.clone()
    }

    pub async fn join(self) -> Result<SessionOutcome, JoinError> {
        self.task.await
    }
}

pub fn spawn_session(
    gateway: Arc<dyn ExamGateway>,
    clock: Arc<dyn Clock>,
    attempt_id: impl Into<String>,
    config: RunnerConfig,
) -> SessionHandle {
    let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);
    let (snapshots_tx, snapshots_rx) = watch::channel(SessionSnapshot::loading());
    let runner = SessionRunner {
        gateway,
        clock,
        config,
        session: AttemptSession::new(attempt_id),
        snapshots: snapshots_tx,
        exam: None,
        saved_revision: 0,
    };
    let task = tokio::spawn(runner.run(commands_rx));
    SessionHandle { commands: commands_tx, snapshots: snapshots_rx, task }
}

enum TaskResult {
    Flush { ticket: FlushTicket, revision: u64, outcome: Result<(), ApiError> },
    Submit { saved_revision: Option<u64>, result: Result<SubmitReceipt, ApiError> },
}

struct SessionRunner {
    gateway: Arc<dyn ExamGateway>,
    clock: Arc<dyn Clock>,
    config: RunnerConfig,
    session: AttemptSession,
    snapshots: watch::Sender<SessionSnapshot>,
    exam: Option<Arc<Exam>>,
    saved_revision: u64,
}

impl SessionRunner {
    async fn run(mut self, mut commands: mpsc::Receiver<SessionCommand>) -> SessionOutcome {
        let phase = self.session.load(self.gateway.as_ref()).await;
        if phase != SessionPhase::Active {
            self.publish_closed();
            return self.closed_outcome();
        }

        let (duration_minutes, start_time) = match (self.session.exam(), self.session.attempt()) {
            (Some(exam), Some(attempt)) => {
                self.exam = Some(Arc::new(exam.clone()));
                (exam.summary.duration_minutes, attempt.start_time)
            }
            _ => return self.closed_outcome(),
        };

        let mut countdown = Countdown::new(duration_minutes, start_time, self.config.thresholds);
        let mut scheduler = AutosaveScheduler::new(self.config.autosave, Instant::now());
        let mut tasks: JoinSet<TaskResult> = JoinSet::new();
        let mut ticker = time::interval(self.config.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        self.publish(&countdown, &scheduler);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if countdown.tick(self.clock.now_utc()) == Tick::Expired {
                        tracing::info!(
                            attempt_id = %self.session.attempt_id(),
                            "Time is up; submitting automatically"
                        );
                        self.start_submit(&mut tasks, "expired");
                    }
                }
                _ = sleep_until_deadline(scheduler.next_deadline()) => {
                    let has_answers = !self.session.buffer().is_empty();
                    if let Some(ticket) = scheduler.tick(Instant::now(), has_answers) {
                        self.spawn_flush(&mut tasks, ticket);
                    }
                }
                command = commands.recv() => match command {
                    Some(SessionCommand::Answer { question_id, value, reply }) => {
                        let result = self.session.set_answer(&question_id, value);
                        if result.is_ok() {
                            scheduler.notify_edit(Instant::now());
                        }
                        let _ = reply.send(result);
                    }
                    Some(SessionCommand::Submit { reply }) => {
                        let request = if self.start_submit(&mut tasks, "user") {
                            SubmitRequest::Started
                        } else {
                            SubmitRequest::Ignored
                        };
                        let _ = reply.send(request);
                    }
                    Some(SessionCommand::Unload) | None => {
                        countdown.stop();
                        return self.unload(&mut scheduler, &mut tasks);
                    }
                },
                Some(joined) = tasks.join_next() => {
                    let result = match joined {
                        Ok(result) => result,
                        Err(err) => {
                            tracing::error!(error = %err, "Session I/O task failed");
                            continue;
                        }
                    };
                    match result {
                        TaskResult::Flush { ticket, revision, outcome } => {
                            if let Some(next) =
                                self.finish_flush(&mut scheduler, ticket, revision, outcome)
                            {
                                self.spawn_flush(&mut tasks, next);
                            }
                        }
                        TaskResult::Submit { saved_revision, result } => {
                            if let Some(revision) = saved_revision {
                                self.saved_revision = self.saved_revision.max(revision);
                            }
                            let outcome = if result.is_ok() { "success" } else { "failure" };
                            metrics::counter!("exam_client_submits_total", "outcome" => outcome)
                                .increment(1);
                            self.session.finish_submit(result);
                            if self.session.phase() == SessionPhase::Terminal {
                                countdown.mark_submitted();
                                scheduler.stop();
                                tasks.detach_all();
                                self.publish(&countdown, &scheduler);
                                return self.closed_outcome();
                            }
                        }
                    }
                }
            }

            self.publish(&countdown, &scheduler);
        }
    }

    /// Sends the submit unless one is already running. Edits not yet saved
    /// are flushed first, on the same task, so they reach the backend before
    /// the attempt closes.
    fn start_submit(&mut self, tasks: &mut JoinSet<TaskResult>, cause: &'static str) -> bool {
        if !self.session.begin_submit() {
            return false;
        }
        let attempt_id = self.session.attempt_id().to_string();
        tracing::info!(attempt_id = %attempt_id, cause, "Submitting attempt");

        let revision = self.session.buffer().revision();
        let pending =
            (revision > self.saved_revision).then(|| self.session.buffer().snapshot());
        let gateway = Arc::clone(&self.gateway);
        tasks.spawn(async move {
            let mut saved_revision = None;
            if let Some(answers) = pending {
                match gateway.save_answers(&attempt_id, &answers).await {
                    Ok(()) => saved_revision = Some(revision),
                    Err(err) => tracing::warn!(
                        attempt_id = %attempt_id,
                        error = %err,
                        "Saving answers before submit failed"
                    ),
                }
            }
            let result = gateway.submit(&attempt_id).await;
            TaskResult::Submit { saved_revision, result }
        });
        true
    }

    fn spawn_flush(&self, tasks: &mut JoinSet<TaskResult>, ticket: FlushTicket) {
        let gateway = Arc::clone(&self.gateway);
        let attempt_id = self.session.attempt_id().to_string();
        let answers = self.session.buffer().snapshot();
        let revision = self.session.buffer().revision();
        tracing::debug!(
            attempt_id = %attempt_id,
            trigger = ticket.trigger.as_str(),
            answers = answers.len(),
            "Flushing answers"
        );
        tasks.spawn(async move {
            let outcome = gateway.save_answers(&attempt_id, &answers).await;
            TaskResult::Flush { ticket, revision, outcome }
        });
    }

    fn finish_flush(
        &mut self,
        scheduler: &mut AutosaveScheduler,
        ticket: FlushTicket,
        revision: u64,
        outcome: Result<(), ApiError>,
    ) -> Option<FlushTicket> {
        let label = if outcome.is_ok() { "success" } else { "failure" };
        metrics::counter!(
            "exam_client_autosave_flushes_total",
            "trigger" => ticket.trigger.as_str(),
            "outcome" => label
        )
        .increment(1);

        match outcome {
            Ok(()) => {
                self.saved_revision = self.saved_revision.max(revision);
                scheduler.complete(ticket, Ok(()), Instant::now())
            }
            Err(err) => {
                tracing::warn!(
                    attempt_id = %self.session.attempt_id(),
                    trigger = ticket.trigger.as_str(),
                    error = %err,
                    "Autosave failed"
                );
                scheduler.complete(ticket, Err(err.detail()), Instant::now())
            }
        }
    }

    fn unload(
        &mut self,
        scheduler: &mut AutosaveScheduler,
        tasks: &mut JoinSet<TaskResult>,
    ) -> SessionOutcome {
        let ticket = scheduler.unload();
        tasks.detach_all();
        let unsaved_changes = self.has_unsaved_changes();

        // A submit in flight already carries the pre-submit save.
        let submitting = self.session.phase() == SessionPhase::Submitting;
        let final_flush = if submitting || self.session.buffer().is_empty() {
            None
        } else {
            let gateway = Arc::clone(&self.gateway);
            let attempt_id = self.session.attempt_id().to_string();
            let answers = self.session.buffer().snapshot();
            Some(tokio::spawn(async move {
                let outcome = match gateway.save_answers(&attempt_id, &answers).await {
                    Ok(()) => "success",
                    Err(err) => {
                        tracing::warn!(attempt_id = %attempt_id, error = %err, "Final save failed");
                        "failure"
                    }
                };
                metrics::counter!(
                    "exam_client_autosave_flushes_total",
                    "trigger" => ticket.trigger.as_str(),
                    "outcome" => outcome
                )
                .increment(1);
            }))
        };

        if unsaved_changes {
            tracing::warn!(
                attempt_id = %self.session.attempt_id(),
                "Leaving the exam with unsaved changes"
            );
        }
        SessionOutcome::Unloaded { unsaved_changes, final_flush }
    }

    fn has_unsaved_changes(&self) -> bool {
        self.session.buffer().revision() > self.saved_revision
    }

    fn publish(&self, countdown: &Countdown, scheduler: &AutosaveScheduler) {
        let now = self.clock.now_utc();
        let buffer = self.session.buffer();
        self.snapshots.send_replace(SessionSnapshot {
            phase: self.session.phase(),
            accepts_edits: self.session.accepts_edits(),
            remaining_seconds: countdown.remaining(now),
            urgency: countdown.urgency(now),
            timer_label: countdown.label(now),
            save_status: scheduler.status().clone(),
            answered: buffer.answered_count(),
            total_questions: self.exam.as_ref().map_or(0, |exam| exam.questions.len()),
            unsaved_changes: self.has_unsaved_changes(),
            submit_error: self.session.submit_error().map(str::to_string),
            exam: self.exam.clone(),
            answers: buffer.snapshot(),
        });
    }

    fn publish_closed(&self) {
        self.snapshots.send_modify(|snapshot| {
            snapshot.phase = self.session.phase();
            snapshot.accepts_edits = false;
            if let Some(TerminalReason::AlreadyClosed(_)) = self.session.terminal() {
                snapshot.timer_label = "Exam submitted".to_string();
            }
        });
    }

    fn closed_outcome(&self) -> SessionOutcome {
        let attempt_id = self.session.attempt_id().to_string();
        let exam_id =
            self.session.attempt().map(|attempt| attempt.exam_id.clone()).unwrap_or_default();
        match (self.session.terminal(), self.session.failure()) {
            (Some(TerminalReason::Submitted { message, .. }), _) => {
                SessionOutcome::Submitted { attempt_id, exam_id, message: message.clone() }
            }
            (Some(TerminalReason::AlreadyClosed(status)), _) => {
                SessionOutcome::AlreadyClosed { attempt_id, exam_id, status: *status }
            }
            (None, Some(failure)) => SessionOutcome::Failed(failure.clone()),
            (None, None) => SessionOutcome::Unloaded { unsaved_changes: false, final_flush: None },
        }
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
