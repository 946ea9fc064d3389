/// Status definitions for schedulers, spider runs and crawler pools
use std::fmt;

/// Represents the lifecycle state of a long-lived crawl component
///
/// The scheduler moves between `Run` and `Pause` and ends in `Stop`.
/// A spider run starts `Stopped` (registered but idle), becomes `Run` once its
/// root rules have seeded the matrix, and ends in `Stop`.
/// A crawler pool only uses `Run` and `Stop`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Status {
    /// Registered but not started
    Stopped,

    /// Accepting and executing work
    #[default]
    Run,

    /// Temporarily refusing to hand out work
    Pause,

    /// Shutting down; no new work is admitted
    Stop,
}

impl Status {
    /// Returns true if new work may be handed out
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Run)
    }

    /// Returns true if the component has been told to shut down
    pub fn is_stopping(&self) -> bool {
        matches!(self, Self::Stop)
    }

    /// Returns the toggled state for a pause/resume request
    ///
    /// `Run` and `Pause` swap; every other state is returned unchanged.
    pub fn toggled(self) -> Self {
        match self {
            Self::Run => Self::Pause,
            Self::Pause => Self::Run,
            other => other,
        }
    }

    /// Short lowercase name used in log lines
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Run => "run",
            Self::Pause => "pause",
            Self::Stop => "stop",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
