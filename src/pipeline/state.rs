//! Run state machine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stage of a pipeline run.
///
/// Runs move strictly forward on success. Any non-terminal state may move to
/// `Failed`; `Complete` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    Init,
    Scraping,
    Validating,
    Analyzing,
    Storing,
    Reporting,
    Complete,
    Failed,
}

impl RunState {
    pub fn as_str(self) -> &'static str {
        match self {
            RunState::Init => "INIT",
            RunState::Scraping => "SCRAPING",
            RunState::Validating => "VALIDATING",
            RunState::Analyzing => "ANALYZING",
            RunState::Storing => "STORING",
            RunState::Reporting => "REPORTING",
            RunState::Complete => "COMPLETE",
            RunState::Failed => "FAILED",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Complete | RunState::Failed)
    }

    /// The state that follows this one on success.
    pub fn next(self) -> Option<RunState> {
        match self {
            RunState::Init => Some(RunState::Scraping),
            RunState::Scraping => Some(RunState::Validating),
            RunState::Validating => Some(RunState::Analyzing),
            RunState::Analyzing => Some(RunState::Storing),
            RunState::Storing => Some(RunState::Reporting),
            RunState::Reporting => Some(RunState::Complete),
            RunState::Complete | RunState::Failed => None,
        }
    }

    pub fn can_transition_to(self, target: RunState) -> bool {
        if self.is_terminal() {
            return false;
        }
        target == RunState::Failed || self.next() == Some(target)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
