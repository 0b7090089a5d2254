//! # pbisect-runtime
//!
//! Execution machinery shared by every probe of a run:
//! - [`WorkerPool`]: bounded concurrency with cancellable admission
//! - [`Materializer`]: revision trees built from CAS blobs
//! - [`CommandExecutor`]: the verification command, killed on cancellation

pub mod exec;
pub mod pool;
pub mod workspace;

pub use exec::{CommandExecutor, CommandStatus, ProcessExecutor};
pub use pool::{PoolError, Slot, WorkerPool};
pub use workspace::Materializer;

use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("CAS error: {0}")]
    Cas(#[from] pbisect_cas::CasError),

    #[error("History error: {0}")]
    History(#[from] pbisect_history::HistoryError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("Empty command line")]
    EmptyCommand,
}

impl RuntimeError {
    /// Whether the error only reflects a cancellation request.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RuntimeError::Pool(PoolError::Cancelled))
    }
}

pub type Result<T> = std::result::Result<T, RuntimeError>;
