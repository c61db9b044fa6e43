use time::OffsetDateTime;

use crate::api::errors::ApiError;
use crate::api::gateway::ExamGateway;
use crate::core::time::Clock;
use crate::schemas::attempt::Attempt;
use crate::schemas::exam::ExamSummary;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    Ended,
    StartsSoon,
    Available,
    NotAvailable,
}

impl Availability {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ended => "ended",
            Self::StartsSoon => "starts_soon",
            Self::Available => "available",
            Self::NotAvailable => "not_available",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Ended => "Exam Ended",
            Self::StartsSoon => "Starts Soon",
            Self::Available => "Available",
            Self::NotAvailable => "Not Available",
        }
    }
}

/// Badge for one exam. The window check wins over the published flag, so an
/// unpublished exam that has ended still reads as ended.
pub fn availability(exam: &ExamSummary, now: OffsetDateTime) -> Availability {
    if now > exam.end_time {
        Availability::Ended
    } else if now < exam.start_time {
        Availability::StartsSoon
    } else if exam.is_published {
        Availability::Available
    } else {
        Availability::NotAvailable
    }
}

#[derive(Debug, Clone)]
pub struct ListedExam {
    pub exam: ExamSummary,
    pub availability: Availability,
}

impl ListedExam {
    pub fn can_start(&self) -> bool {
        self.availability == Availability::Available
    }
}

/// All exams with their badge, as of the clock's now.
pub async fn load_listing(
    gateway: &dyn ExamGateway,
    clock: &dyn Clock,
) -> Result<Vec<ListedExam>, ApiError> {
    let exams = gateway.list_exams().await?;
    let now = clock.now_utc();
    let listed = exams
        .into_iter()
        .map(|exam| {
            let availability = availability(&exam, now);
            ListedExam { exam, availability }
        })
        .collect::<Vec<_>>();

    tracing::debug!(
        total = listed.len(),
        available = listed.iter().filter(|item| item.can_start()).count(),
        "Exam listing loaded"
    );
    Ok(listed)
}

/// Starts a new attempt. The server allocates the attempt id.
pub async fn start_exam(gateway: &dyn ExamGateway, exam_id: &str) -> Result<Attempt, ApiError> {
    match gateway.start_attempt(exam_id).await {
        Ok(attempt) => Ok(attempt),
        Err(err) => {
            tracing::warn!(exam_id, error = %err, "Failed to start exam");
            Err(err)
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StartError {
    #[error("no exam with id {0}")]
    UnknownExam(String),
    #[error("{title} cannot be started: {label}", label = .availability.label())]
    Unavailable { title: String, availability: Availability },
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Starts an attempt only for an exam the listing currently offers.
pub async fn start_available_exam(
    gateway: &dyn ExamGateway,
    clock: &dyn Clock,
    exam_id: &str,
) -> Result<Attempt, StartError> {
    let listing = load_listing(gateway, clock).await?;
    let listed = listing
        .into_iter()
        .find(|item| item.exam.id == exam_id)
        .ok_or_else(|| StartError::UnknownExam(exam_id.to_string()))?;

    if !listed.can_start() {
        tracing::info!(
            exam_id,
            availability = listed.availability.as_str(),
            "Refusing to start exam outside its window"
        );
        return Err(StartError::Unavailable {
            title: listed.exam.title,
            availability: listed.availability,
        });
    }
    Ok(start_exam(gateway, exam_id).await?)
}
