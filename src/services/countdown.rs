use time::OffsetDateTime;

use crate::core::config::TimerSettings;

/// Seconds left in an attempt.
///
/// Always derived from the server-issued start timestamp, never decremented,
/// so a stalled or suspended process reads the right value on its next tick.
pub fn remaining_seconds(
    duration_minutes: u32,
    start: OffsetDateTime,
    now: OffsetDateTime,
) -> i64 {
    let duration_seconds = i64::from(duration_minutes) * 60;
    let elapsed_seconds = (now - start)
        .whole_milliseconds()
        .div_euclid(1000)
        .clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64;
    duration_seconds.saturating_sub(elapsed_seconds).max(0)
}

/// `H:MM:SS` from one hour up, `M:SS` below.
pub fn format_remaining(seconds: i64) -> String {
    let seconds = seconds.max(0);
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    if hours > 0 {
        format!("{hours}:{minutes:02}:{secs:02}")
    } else {
        format!("{minutes}:{secs:02}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Urgency {
    Normal,
    Warning,
    Critical,
}

impl Urgency {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    pub warning_seconds: i64,
    pub critical_seconds: i64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self { warning_seconds: 300, critical_seconds: 60 }
    }
}

impl From<&TimerSettings> for Thresholds {
    fn from(settings: &TimerSettings) -> Self {
        Self {
            warning_seconds: settings.warning_seconds,
            critical_seconds: settings.critical_seconds,
        }
    }
}

impl Thresholds {
    pub fn classify(&self, remaining: i64) -> Urgency {
        if remaining <= self.critical_seconds {
            Urgency::Critical
        } else if remaining <= self.warning_seconds {
            Urgency::Warning
        } else {
            Urgency::Normal
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    Running { remaining: i64, urgency: Urgency },
    /// Remaining time hit zero on this tick. Reported once.
    Expired,
    /// Expired earlier, stopped, or the attempt is submitted.
    Halted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Running,
    Expired,
    Stopped,
    Submitted,
}

#[derive(Debug, Clone)]
pub struct Countdown {
    duration_minutes: u32,
    start: OffsetDateTime,
    thresholds: Thresholds,
    state: State,
}

impl Countdown {
    pub fn new(duration_minutes: u32, start: OffsetDateTime, thresholds: Thresholds) -> Self {
        Self { duration_minutes, start, thresholds, state: State::Running }
    }

    pub fn remaining(&self, now: OffsetDateTime) -> i64 {
        remaining_seconds(self.duration_minutes, self.start, now)
    }

    pub fn urgency(&self, now: OffsetDateTime) -> Urgency {
        self.thresholds.classify(self.remaining(now))
    }

    pub fn is_running(&self) -> bool {
        self.state == State::Running
    }

    pub fn tick(&mut self, now: OffsetDateTime) -> Tick {
        if self.state != State::Running {
            return Tick::Halted;
        }
        let remaining = self.remaining(now);
        if remaining == 0 {
            self.state = State::Expired;
            return Tick::Expired;
        }
        Tick::Running { remaining, urgency: self.thresholds.classify(remaining) }
    }

    /// Stops ticking without reporting expiry.
    pub fn stop(&mut self) {
        if self.state == State::Running {
            self.state = State::Stopped;
        }
    }

    pub fn mark_submitted(&mut self) {
        self.state = State::Submitted;
    }

    pub fn label(&self, now: OffsetDateTime) -> String {
        match self.state {
            State::Submitted => "Exam submitted".to_string(),
            _ => format_remaining(self.remaining(now)),
        }
    }
}
