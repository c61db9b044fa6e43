use std::env;
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::api::gateway::ExamGateway;
use crate::api::{ApiClient, ClientContext, FileTokenStore, TokenStore};
use crate::core::config::Settings;
use crate::core::shutdown;
use crate::core::time::{format_offset, SystemClock};
use crate::schemas::answer::AnswerValue;
use crate::schemas::auth::LoginForm;
use crate::schemas::question::Question;
use crate::services::attempt_session::SessionPhase;
use crate::services::autosave::SaveStatus;
use crate::services::countdown::Urgency;
use crate::services::exam_listing::{load_listing, start_available_exam, ListedExam};
use crate::services::question_renderer::{
    attach_upload, parse_answer, render, render_text, resolve_option, toggle_option,
    upload_metadata_from_path,
};
use crate::tasks::session_runner::{
    spawn_session, CommandError, RunnerConfig, SessionHandle, SessionOutcome, SessionSnapshot,
    SubmitRequest,
};

const USAGE: &str = "\
usage: exam-client <command>

commands:
  login [--email <email>] [--password <password>]
  exams
  start <exam_id>
  take <attempt_id>";

const SESSION_HELP: &str = "\
show [n] | next | prev | answer <n> <value> | toggle <n> <option> | upload <n> <path>
status | submit | quit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Command {
    Login { email: String, password: String },
    Exams,
    Start { exam_id: String },
    Take { attempt_id: String },
    Help,
}

/// Reads the command line. Login credentials fall back to
/// `EXAM_CLIENT_EMAIL` / `EXAM_CLIENT_PASSWORD`.
pub(crate) fn parse_args(args: impl IntoIterator<Item = String>) -> Result<Command> {
    let mut args = args.into_iter();
    let Some(command) = args.next() else {
        return Ok(Command::Help);
    };

    match command.as_str() {
        "login" => {
            let mut email = env::var("EXAM_CLIENT_EMAIL").ok();
            let mut password = env::var("EXAM_CLIENT_PASSWORD").ok();
            while let Some(arg) = args.next() {
                match arg.as_str() {
                    "--email" => {
                        email = Some(args.next().ok_or_else(|| anyhow!("--email missing value"))?);
                    }
                    "--password" => {
                        password =
                            Some(args.next().ok_or_else(|| anyhow!("--password missing value"))?);
                    }
                    _ => return Err(anyhow!("Unknown argument: {arg}")),
                }
            }
            Ok(Command::Login {
                email: email.ok_or_else(|| anyhow!("login requires --email"))?,
                password: password.ok_or_else(|| anyhow!("login requires --password"))?,
            })
        }
        "exams" => no_more(args, Command::Exams),
        "start" => {
            let exam_id = args.next().ok_or_else(|| anyhow!("start requires an exam id"))?;
            no_more(args, Command::Start { exam_id })
        }
        "take" => {
            let attempt_id = args.next().ok_or_else(|| anyhow!("take requires an attempt id"))?;
            no_more(args, Command::Take { attempt_id })
        }
        "help" | "--help" | "-h" => Ok(Command::Help),
        _ => Err(anyhow!("Unknown command: {command}\n{USAGE}")),
    }
}

fn no_more(mut args: impl Iterator<Item = String>, command: Command) -> Result<Command> {
    match args.next() {
        Some(extra) => Err(anyhow!("Unexpected argument: {extra}")),
        None => Ok(command),
    }
}

/// One line typed inside an open session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SessionInput {
    Show(Option<usize>),
    Next,
    Prev,
    Answer { number: usize, value: String },
    Toggle { number: usize, option: String },
    Upload { number: usize, path: String },
    Status,
    Submit,
    Quit,
    Help,
}

pub(crate) fn parse_session_input(line: &str) -> Result<SessionInput, String> {
    let line = line.trim();
    let (word, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim();

    match word {
        "show" if rest.is_empty() => Ok(SessionInput::Show(None)),
        "show" => question_number(rest).map(|number| SessionInput::Show(Some(number))),
        "next" => Ok(SessionInput::Next),
        "prev" => Ok(SessionInput::Prev),
        "answer" => {
            let (number, value) = numbered(rest, "answer <n> <value>")?;
            Ok(SessionInput::Answer { number, value })
        }
        "toggle" => {
            let (number, option) = numbered(rest, "toggle <n> <option>")?;
            Ok(SessionInput::Toggle { number, option })
        }
        "upload" => {
            let (number, path) = numbered(rest, "upload <n> <path>")?;
            Ok(SessionInput::Upload { number, path })
        }
        "status" => Ok(SessionInput::Status),
        "submit" => Ok(SessionInput::Submit),
        "quit" | "exit" => Ok(SessionInput::Quit),
        "help" | "?" | "" => Ok(SessionInput::Help),
        other => Err(format!("unknown command '{other}'; type help")),
    }
}

fn question_number(raw: &str) -> Result<usize, String> {
    raw.parse::<usize>()
        .ok()
        .filter(|number| *number > 0)
        .ok_or_else(|| format!("'{raw}' is not a question number"))
}

fn numbered(rest: &str, usage: &str) -> Result<(usize, String), String> {
    let (number, value) = rest.split_once(char::is_whitespace).ok_or(format!("usage: {usage}"))?;
    let value = value.trim();
    if value.is_empty() {
        return Err(format!("usage: {usage}"));
    }
    Ok((question_number(number)?, value.to_string()))
}

pub(crate) async fn run(settings: &Settings, command: Command) -> Result<()> {
    if command == Command::Help {
        println!("{USAGE}");
        return Ok(());
    }

    let token_file = FileTokenStore::new(&settings.api().token_file);
    let token_path = token_file.path().to_path_buf();
    let tokens: Arc<dyn TokenStore> = Arc::new(token_file);
    let context = ClientContext::from_settings(settings.api(), tokens).on_unauthorized(|| {
        tracing::warn!("Session expired; run `exam-client login` again");
    });
    tracing::debug!(base_url = context.base_url(), token_file = %token_path.display(), "API ready");
    let client = Arc::new(ApiClient::new(context)?);

    match command {
        Command::Login { email, password } => {
            let token = client.login(&LoginForm { email, password }).await?;
            println!("Logged in as {} ({})", token.user.full_name, token.user.email);
            println!("Session token saved to {}", token_path.display());
            Ok(())
        }
        Command::Exams => list_exams(client.as_ref()).await,
        Command::Start { exam_id } => {
            let attempt = start_available_exam(client.as_ref(), &SystemClock, &exam_id).await?;
            println!("Started attempt {}", attempt.id);
            take(settings, client, &attempt.id).await
        }
        Command::Take { attempt_id } => take(settings, client, &attempt_id).await,
        Command::Help => Ok(()),
    }
}

async fn list_exams(gateway: &dyn ExamGateway) -> Result<()> {
    let listing = load_listing(gateway, &SystemClock).await?;
    let (open, closed): (Vec<_>, Vec<_>) = listing.into_iter().partition(ListedExam::can_start);
    if open.is_empty() {
        println!("No exams available right now");
    } else {
        println!("Available exams (exam-client start <exam_id>):");
        open.iter().for_each(print_listed);
    }
    if !closed.is_empty() {
        println!("\nNot available now:");
        closed.iter().for_each(print_listed);
    }
    Ok(())
}

fn print_listed(item: &ListedExam) {
    let exam = &item.exam;
    println!(
        "{:<14} {}  [{}]\n    {} to {}, {} min",
        item.availability.label(),
        exam.title,
        exam.id,
        format_offset(exam.start_time),
        format_offset(exam.end_time),
        exam.duration_minutes
    );
}

async fn take(settings: &Settings, client: Arc<ApiClient>, attempt_id: &str) -> Result<()> {
    let gateway: Arc<dyn ExamGateway> = client;
    let handle =
        spawn_session(gateway, Arc::new(SystemClock), attempt_id, RunnerConfig::from(settings));

    let mut snapshots = handle.subscribe();
    let loaded = snapshots
        .wait_for(|snapshot| {
            !matches!(snapshot.phase, SessionPhase::LoadingAttempt | SessionPhase::LoadingExam)
        })
        .await
        .map(|snapshot| snapshot.phase == SessionPhase::Active)
        .unwrap_or(false);

    if loaded {
        interact(&handle).await?;
    }

    let outcome = handle.join().await.context("session task failed")?;
    report(outcome, settings.api().timeout()).await
}

async fn interact(handle: &SessionHandle) -> Result<()> {
    let mut snapshots = handle.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let unload = shutdown::unload_signal();
    tokio::pin!(unload);

    let mut current = 1;
    let mut notices;
    {
        let snapshot = snapshots.borrow_and_update().clone();
        notices = Notices::seen(&snapshot);
        print_status(&snapshot);
        show_question(&snapshot, current);
        println!("{SESSION_HELP}");
    }

    loop {
        tokio::select! {
            _ = &mut unload => {
                handle.unload().await;
                return Ok(());
            }
            changed = snapshots.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
                let snapshot = snapshots.borrow_and_update().clone();
                if !matches!(snapshot.phase, SessionPhase::Active | SessionPhase::Submitting) {
                    return Ok(());
                }
                for notice in notices.observe(&snapshot) {
                    println!("{notice}");
                }
            }
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    handle.unload().await;
                    return Ok(());
                };
                let input = match parse_session_input(&line) {
                    Ok(input) => input,
                    Err(message) => {
                        println!("{message}");
                        continue;
                    }
                };
                let snapshot = handle.snapshot();
                let total = snapshot.total_questions;
                match input {
                    SessionInput::Show(number) => {
                        current = number.unwrap_or(current);
                        show_question(&snapshot, current);
                    }
                    SessionInput::Next => {
                        current = (current + 1).min(total.max(1));
                        show_question(&snapshot, current);
                    }
                    SessionInput::Prev => {
                        current = current.saturating_sub(1).max(1);
                        show_question(&snapshot, current);
                    }
                    SessionInput::Answer { number, value } => {
                        edit(handle, &snapshot, number, |question, _, disabled| {
                            parse_answer(question, &value, disabled).map_err(|err| err.to_string())
                        })
                        .await;
                    }
                    SessionInput::Toggle { number, option } => {
                        edit(handle, &snapshot, number, |question, answer, disabled| {
                            let label = resolve_option(question, &option);
                            toggle_option(question, answer, label, disabled)
                                .map_err(|err| err.to_string())
                        })
                        .await;
                    }
                    SessionInput::Upload { number, path } => {
                        edit(handle, &snapshot, number, |question, _, disabled| {
                            upload_metadata_from_path(Path::new(&path))
                                .and_then(|file| attach_upload(question, file, disabled))
                                .map_err(|err| err.to_string())
                        })
                        .await;
                    }
                    SessionInput::Status => print_status(&snapshot),
                    SessionInput::Submit => match handle.submit().await {
                        Ok(SubmitRequest::Started) => println!("Submitting..."),
                        Ok(SubmitRequest::Ignored) => println!("A submit is already in progress"),
                        Err(CommandError::Closed) => return Ok(()),
                        Err(err) => println!("{err}"),
                    },
                    SessionInput::Quit => {
                        handle.unload().await;
                        return Ok(());
                    }
                    SessionInput::Help => println!("{SESSION_HELP}"),
                }
            }
        }
    }
}

async fn edit<F>(handle: &SessionHandle, snapshot: &SessionSnapshot, number: usize, build: F)
where
    F: FnOnce(&Question, Option<&AnswerValue>, bool) -> Result<AnswerValue, String>,
{
    let Some(question) = question_at(snapshot, number) else {
        println!("There is no question {number}");
        return;
    };
    let disabled = !snapshot.accepts_edits;
    let value = match build(question, snapshot.answers.get(&question.id), disabled) {
        Ok(value) => value,
        Err(message) => {
            println!("{message}");
            return;
        }
    };
    match handle.answer(question.id.clone(), value).await {
        Ok(()) => show_question(&handle.snapshot(), number),
        Err(err) => println!("{err}"),
    }
}

fn question_at(snapshot: &SessionSnapshot, number: usize) -> Option<&Question> {
    let exam = snapshot.exam.as_deref()?;
    number.checked_sub(1).and_then(|index| exam.questions.get(index))
}

fn show_question(snapshot: &SessionSnapshot, number: usize) {
    let Some(question) = question_at(snapshot, number) else {
        println!("There is no question {number}");
        return;
    };
    let disabled = !snapshot.accepts_edits;
    let view = render(question, snapshot.answers.get(&question.id), number, disabled);
    println!("{}", render_text(&view));
}

/// What the user has already been told, so each change is announced once.
#[derive(Debug)]
struct Notices {
    urgency: Urgency,
    submit_error: Option<String>,
    save_error: Option<String>,
}

impl Notices {
    fn seen(snapshot: &SessionSnapshot) -> Self {
        Self {
            urgency: snapshot.urgency,
            submit_error: snapshot.submit_error.clone(),
            save_error: save_error(snapshot),
        }
    }

    fn observe(&mut self, snapshot: &SessionSnapshot) -> Vec<String> {
        let mut notices = Vec::new();

        if snapshot.urgency != self.urgency {
            self.urgency = snapshot.urgency;
            match self.urgency {
                Urgency::Warning => notices.push(format!("! {} left", snapshot.timer_label)),
                Urgency::Critical => notices.push(format!("!! {} left", snapshot.timer_label)),
                Urgency::Normal => {}
            }
        }

        if snapshot.submit_error != self.submit_error {
            self.submit_error = snapshot.submit_error.clone();
            if let Some(error) = &self.submit_error {
                notices.push(submit_failed(error));
            }
        }

        // A retry in flight keeps the last error; only a successful save clears it.
        match save_error(snapshot) {
            Some(error) if self.save_error.as_ref() != Some(&error) => {
                notices.push(format!("Save failed: {error}. Retrying..."));
                self.save_error = Some(error);
            }
            None if snapshot.save_status == SaveStatus::Saved && self.save_error.is_some() => {
                notices.push("Answers saved".to_string());
                self.save_error = None;
            }
            _ => {}
        }

        notices
    }
}

fn save_error(snapshot: &SessionSnapshot) -> Option<String> {
    match &snapshot.save_status {
        SaveStatus::Error(message) => Some(message.clone()),
        _ => None,
    }
}

fn submit_failed(error: &str) -> String {
    format!("Submit failed: {error}. Your answers are kept; try submit again.")
}

fn print_status(snapshot: &SessionSnapshot) {
    let title = snapshot.exam.as_deref().map_or("", |exam| exam.summary.title.as_str());
    println!(
        "{title} | time left {} | answered {}/{} | {}",
        snapshot.timer_label,
        snapshot.answered,
        snapshot.total_questions,
        snapshot.save_status.label()
    );
    if let Some(error) = &snapshot.submit_error {
        println!("{}", submit_failed(error));
    }
}

async fn report(outcome: SessionOutcome, flush_timeout: std::time::Duration) -> Result<()> {
    match outcome {
        SessionOutcome::Submitted { attempt_id, exam_id, message } => {
            println!("{message}");
            println!("Results: attempt {attempt_id} (exam {exam_id})");
            Ok(())
        }
        SessionOutcome::AlreadyClosed { attempt_id, exam_id, status } => {
            println!("This attempt is already {}", status.as_str());
            println!("Results: attempt {attempt_id} (exam {exam_id})");
            Ok(())
        }
        SessionOutcome::Failed(failure) => {
            println!("{}", failure.message());
            println!("{}: exam-client exams", failure.recovery_action());
            Err(anyhow!(failure.error))
        }
        SessionOutcome::Unloaded { unsaved_changes, final_flush } => {
            match (unsaved_changes, &final_flush) {
                (true, Some(_)) => {
                    println!("Warning: you had unsaved changes. A final save was sent.")
                }
                (true, None) => println!("Warning: you left while the exam was being submitted."),
                (false, _) => {}
            }
            if let Some(flush) = final_flush {
                if tokio::time::timeout(flush_timeout, flush).await.is_err() {
                    tracing::warn!("Final save did not finish before exit");
                }
            }
            Ok(())
        }
    }
}
