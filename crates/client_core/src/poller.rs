//! Per-image status polling schedule and tick evaluation.

use std::time::Duration;

use shared::domain::ImageStatus;

use crate::error::ApiError;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);
pub const DEFAULT_MAX_POLL_ATTEMPTS: u32 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_attempts: DEFAULT_MAX_POLL_ATTEMPTS,
        }
    }
}

impl PollSettings {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Longest time a single poll can stay active.
    pub fn ceiling(&self) -> Duration {
        self.interval * self.max_attempts
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Done,
    Failed,
    TimedOut,
}

impl PollOutcome {
    pub fn final_status(self) -> ImageStatus {
        match self {
            Self::Done => ImageStatus::Done,
            Self::Failed | Self::TimedOut => ImageStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickDecision {
    Continue,
    Finish(PollOutcome),
}

/// Decides what a poll does after its `attempt`-th status request.
///
/// Terminal statuses win even on the last attempt; anything else, errors
/// included, only ends the poll once the attempt ceiling is reached.
pub fn evaluate_tick(
    attempt: u32,
    max_attempts: u32,
    observed: &Result<ImageStatus, ApiError>,
) -> TickDecision {
    match observed {
        Ok(ImageStatus::Done) => TickDecision::Finish(PollOutcome::Done),
        Ok(ImageStatus::Failed) => TickDecision::Finish(PollOutcome::Failed),
        _ if attempt >= max_attempts => TickDecision::Finish(PollOutcome::TimedOut),
        _ => TickDecision::Continue,
    }
}

#[cfg(test)]
#[path = "tests/poller_tests.rs"]
mod tests;
