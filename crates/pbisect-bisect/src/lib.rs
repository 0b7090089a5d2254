//! # pbisect-bisect
//!
//! Parallel first-bad-revision search.
//!
//! Instead of probing one midpoint at a time, many revisions are tested
//! concurrently in a fixed pseudo-random order. Every result narrows the
//! good/bad interval no matter when it arrives, and probes the interval
//! has moved past are cancelled.
//!
//! - [`SearchState`]: the interval, the probe cursor and the active probes
//! - [`Runner`]: dispatches probes through a worker pool and feeds their
//!   outcomes back into the state

pub mod outcome;
pub mod runner;
pub mod sequence;
pub mod state;

pub use outcome::{InconclusiveReason, ProbeOutcome, SKIP_EXIT_CODE};
pub use runner::{BisectOutcome, ProgressSink, Runner, RunnerConfig, RunnerError};
pub use sequence::{ProbeOrder, RevisionSequence};
pub use state::{ActiveProbe, Narrowing, SearchState, Stats};

use std::fmt;

use thiserror::Error;

/// Conclusive probe verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Good,
    Bad,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Good => write!(f, "good"),
            Verdict::Bad => write!(f, "bad"),
        }
    }
}

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Need at least two revisions, got {len}")]
    TooShort { len: usize },

    #[error("Revision {0} appears more than once")]
    DuplicateRevision(String),

    #[error("Probe order is not a permutation of 0..{len}")]
    InvalidOrder { len: usize },

    #[error("Revision {0} is not part of the search")]
    UnknownRevision(String),

    #[error("Revision {revision} reported {verdict} contradicts interval [{start}, {end}]")]
    Conflict {
        revision: String,
        verdict: Verdict,
        start: usize,
        end: usize,
    },
}
