use std::time::Duration;

use tokio::time::Instant;

use crate::core::config::AutosaveSettings;

const FIRST_RETRY_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    Debounce,
    Periodic,
    Retry,
    /// Issued when triggers fired while another flush was still in flight.
    FollowUp,
    Unload,
}

impl FlushTrigger {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debounce => "debounce",
            Self::Periodic => "periodic",
            Self::Retry => "retry",
            Self::FollowUp => "follow_up",
            Self::Unload => "unload",
        }
    }
}

/// What the UI shows next to the exam: idle, saving, saved (briefly), or error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveStatus {
    Idle,
    Saving,
    Saved,
    Error(String),
}

impl SaveStatus {
    pub fn label(&self) -> String {
        match self {
            Self::Idle => String::new(),
            Self::Saving => "Saving...".to_string(),
            Self::Saved => "Saved".to_string(),
            Self::Error(message) => format!("Save failed: {message}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutosaveConfig {
    pub debounce: Duration,
    pub interval: Duration,
    pub saved_display: Duration,
    pub retry_max: Duration,
}

impl Default for AutosaveConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(2000),
            interval: Duration::from_millis(30000),
            saved_display: Duration::from_millis(2000),
            retry_max: Duration::from_millis(30000),
        }
    }
}

impl From<&AutosaveSettings> for AutosaveConfig {
    fn from(settings: &AutosaveSettings) -> Self {
        Self {
            debounce: settings.debounce(),
            interval: settings.interval(),
            saved_display: settings.saved_display(),
            retry_max: settings.retry_max(),
        }
    }
}

/// Permission to send one snapshot. Hand it back through `complete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushTicket {
    pub id: u64,
    pub trigger: FlushTrigger,
}

/// Decides when the answer buffer is flushed.
///
/// Three triggers share one flush path: a debounce deadline restarted by
/// every edit, a fixed periodic boundary, and an explicit unload. A failed
/// flush arms a retry with exponential backoff. At most one flush is in
/// flight; triggers that fire meanwhile collapse into a single follow-up.
///
/// The scheduler does no I/O and owns no timers. The caller drives it with
/// `tick` at (or after) `next_deadline` and reports results via `complete`.
#[derive(Debug)]
pub struct AutosaveScheduler {
    config: AutosaveConfig,
    status: SaveStatus,
    debounce_at: Option<Instant>,
    periodic_at: Instant,
    retry_at: Option<Instant>,
    saved_until: Option<Instant>,
    in_flight: Option<u64>,
    queued: bool,
    failures: u32,
    next_id: u64,
    stopped: bool,
}

impl AutosaveScheduler {
    pub fn new(config: AutosaveConfig, now: Instant) -> Self {
        Self {
            config,
            status: SaveStatus::Idle,
            debounce_at: None,
            periodic_at: now + config.interval,
            retry_at: None,
            saved_until: None,
            in_flight: None,
            queued: false,
            failures: 0,
            next_id: 0,
            stopped: false,
        }
    }

    pub fn status(&self) -> &SaveStatus {
        &self.status
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Restarts the quiet-period timer.
    pub fn notify_edit(&mut self, now: Instant) {
        if self.stopped {
            return;
        }
        self.debounce_at = Some(now + self.config.debounce);
    }

    /// Fires every deadline that has passed. Periodic boundaries only flush
    /// when there is something to save.
    pub fn tick(&mut self, now: Instant, has_answers: bool) -> Option<FlushTicket> {
        if self.stopped {
            return None;
        }

        if self.status == SaveStatus::Saved && self.saved_until.is_some_and(|until| now >= until) {
            self.status = SaveStatus::Idle;
            self.saved_until = None;
        }

        let mut due = None;
        if self.debounce_at.is_some_and(|at| now >= at) {
            self.debounce_at = None;
            due = Some(FlushTrigger::Debounce);
        }
        if self.retry_at.is_some_and(|at| now >= at) {
            self.retry_at = None;
            due = due.or(Some(FlushTrigger::Retry));
        }
        if now >= self.periodic_at {
            while self.periodic_at <= now {
                self.periodic_at += self.config.interval;
            }
            if has_answers {
                due = due.or(Some(FlushTrigger::Periodic));
            }
        }

        let trigger = due?;
        self.request(trigger)
    }

    /// Flushes immediately unless one is already in flight.
    pub fn flush_now(&mut self, trigger: FlushTrigger) -> Option<FlushTicket> {
        if self.stopped {
            return None;
        }
        self.request(trigger)
    }

    /// Records a finished flush and returns the follow-up flush, if triggers
    /// fired while it was in flight. Results for unknown or superseded
    /// tickets are ignored.
    pub fn complete(
        &mut self,
        ticket: FlushTicket,
        outcome: Result<(), String>,
        now: Instant,
    ) -> Option<FlushTicket> {
        if self.stopped || self.in_flight != Some(ticket.id) {
            return None;
        }
        self.in_flight = None;

        match outcome {
            Ok(()) => {
                self.failures = 0;
                self.retry_at = None;
                self.status = SaveStatus::Saved;
                self.saved_until = Some(now + self.config.saved_display);
            }
            Err(message) => {
                self.failures = self.failures.saturating_add(1);
                self.status = SaveStatus::Error(message);
                self.retry_at = Some(now + self.retry_delay());
            }
        }

        if std::mem::take(&mut self.queued) {
            self.retry_at = None;
            return Some(self.issue(FlushTrigger::FollowUp));
        }
        None
    }

    /// Final best-effort flush. Bypasses the in-flight guard and stops the
    /// scheduler; whatever happens to the request is not reported back.
    pub fn unload(&mut self) -> FlushTicket {
        self.next_id += 1;
        let ticket = FlushTicket { id: self.next_id, trigger: FlushTrigger::Unload };
        self.stop();
        ticket
    }

    /// Cancels every pending deadline. Later results and triggers are ignored.
    pub fn stop(&mut self) {
        self.stopped = true;
        self.debounce_at = None;
        self.retry_at = None;
        self.saved_until = None;
        self.in_flight = None;
        self.queued = false;
    }

    /// Earliest instant at which `tick` has something to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        if self.stopped {
            return None;
        }
        [self.debounce_at, self.retry_at, self.saved_until, Some(self.periodic_at)]
            .into_iter()
            .flatten()
            .min()
    }

    fn request(&mut self, trigger: FlushTrigger) -> Option<FlushTicket> {
        self.retry_at = None;
        if self.in_flight.is_some() {
            self.queued = true;
            tracing::debug!(trigger = trigger.as_str(), "Flush in flight; coalescing trigger");
            return None;
        }
        Some(self.issue(trigger))
    }

    fn issue(&mut self, trigger: FlushTrigger) -> FlushTicket {
        self.next_id += 1;
        self.in_flight = Some(self.next_id);
        self.status = SaveStatus::Saving;
        self.saved_until = None;
        FlushTicket { id: self.next_id, trigger }
    }

    fn retry_delay(&self) -> Duration {
        let exponent = self.failures.saturating_sub(1).min(16);
        FIRST_RETRY_DELAY.saturating_mul(2_u32.pow(exponent)).min(self.config.retry_max)
    }
}
