//! Classification of probe results.

use std::fmt;

use pbisect_runtime::CommandStatus;

/// Exit code a command uses to say "cannot test this revision".
pub const SKIP_EXIT_CODE: i32 = 125;

/// Why a probe said nothing about its revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InconclusiveReason {
    /// Command exited with [`SKIP_EXIT_CODE`]
    Skipped,
    /// Probe was cancelled, by narrowing or by the run
    Cancelled,
    /// Command died from a signal or reported a negative status
    Killed(i32),
    /// Workspace could not be built or the command could not start
    Failed(String),
}

/// Result of one probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Good,
    Bad,
    Inconclusive(InconclusiveReason),
    /// Exit status outside every known class
    Unexpected(i32),
}

impl ProbeOutcome {
    /// Map a command status to an outcome, `git bisect run` style.
    pub fn classify(status: CommandStatus) -> Self {
        match status {
            CommandStatus::Exited(0) => ProbeOutcome::Good,
            CommandStatus::Exited(SKIP_EXIT_CODE) => {
                ProbeOutcome::Inconclusive(InconclusiveReason::Skipped)
            }
            CommandStatus::Exited(1..=127) => ProbeOutcome::Bad,
            CommandStatus::Exited(code) if code < 0 => {
                ProbeOutcome::Inconclusive(InconclusiveReason::Killed(code))
            }
            CommandStatus::Exited(code) => ProbeOutcome::Unexpected(code),
            CommandStatus::Signaled(signal) => {
                ProbeOutcome::Inconclusive(InconclusiveReason::Killed(signal))
            }
            CommandStatus::Cancelled => ProbeOutcome::Inconclusive(InconclusiveReason::Cancelled),
        }
    }

    pub fn is_conclusive(&self) -> bool {
        matches!(self, ProbeOutcome::Good | ProbeOutcome::Bad)
    }
}

impl fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeOutcome::Good => write!(f, "good"),
            ProbeOutcome::Bad => write!(f, "bad"),
            ProbeOutcome::Inconclusive(InconclusiveReason::Skipped) => write!(f, "skipped"),
            ProbeOutcome::Inconclusive(InconclusiveReason::Cancelled) => write!(f, "cancelled"),
            ProbeOutcome::Inconclusive(InconclusiveReason::Killed(code)) => {
                write!(f, "killed ({code})")
            }
            ProbeOutcome::Inconclusive(InconclusiveReason::Failed(reason)) => {
                write!(f, "failed: {reason}")
            }
            ProbeOutcome::Unexpected(code) => write!(f, "unexpected exit {code}"),
        }
    }
}
