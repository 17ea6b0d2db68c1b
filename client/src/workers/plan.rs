//! What a log tail does for each deployment status

use crate::models::deployment::{DeploymentStatus, LogEntry};

/// Log fetching decision for one observed status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogPolicy {
    /// Nothing produces logs yet
    Skip,

    /// Fetch now and again after the log interval
    Poll,

    /// Fetch once more, then stop for good
    FinalSnapshot,
}

pub fn log_policy(status: &DeploymentStatus) -> LogPolicy {
    match status {
        DeploymentStatus::Queued => LogPolicy::Skip,
        DeploymentStatus::Building => LogPolicy::Poll,
        _ => LogPolicy::FinalSnapshot,
    }
}

/// Tracks how much of the log stream has been handed out so each snapshot
/// only yields the lines not seen yet.
#[derive(Debug, Default, Clone)]
pub struct LogCursor {
    emitted: usize,
}

impl LogCursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emitted(&self) -> usize {
        self.emitted
    }

    /// Lines of `snapshot` past the cursor. A snapshot shorter than what was
    /// already emitted is a fresh stream (after a rebuild) and is returned whole.
    pub fn advance(&mut self, snapshot: Vec<LogEntry>) -> Vec<LogEntry> {
        if snapshot.len() < self.emitted {
            self.emitted = 0;
        }
        let fresh: Vec<LogEntry> = snapshot.into_iter().skip(self.emitted).collect();
        self.emitted += fresh.len();
        fresh
    }
}
