//! Interval tracker for the first-bad-revision search.
//!
//! The tracker owns the `[start, end]` interval, the probe cursor and the
//! set of active probes. All three change under one lock, so a bound update
//! and the cancellation of the probes it excludes happen atomically with
//! respect to [`SearchState::next`]: a probe handed out concurrently with an
//! update is either never handed out for an excluded index or is caught by
//! the update's cancellation scan.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use pbisect_config::{log_search_debug, log_search_info};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::{ProbeOrder, RevisionSequence, SearchError, Verdict};

/// A revision handed out for probing.
#[derive(Debug, Clone)]
pub struct ActiveProbe {
    pub index: usize,
    pub revision: String,
    /// Fires when the interval narrows past `index` or the run is cancelled
    pub token: CancellationToken,
}

/// Effect of a report on the interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Narrowing {
    Narrowed,
    /// The result was already implied by the interval
    Unchanged,
}

/// Point-in-time progress counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Stats {
    /// Probes currently running
    pub pending: usize,
    /// Indices the cursor has not reached yet
    pub left: usize,
    pub total: usize,
    /// `end - start`; the search is done at 1
    pub width: usize,
}

#[derive(Debug)]
struct Inner {
    start: usize,
    end: usize,
    cursor: usize,
    active: HashMap<usize, CancellationToken>,
    done: Option<oneshot::Sender<String>>,
}

/// Shared search state.
#[derive(Debug)]
pub struct SearchState {
    revisions: RevisionSequence,
    order: ProbeOrder,
    parent: CancellationToken,
    inner: Mutex<Inner>,
}

impl SearchState {
    /// Track a search over `revisions`, probing in a shuffle seeded by `seed`.
    ///
    /// Every probe token is a child of `parent`. The receiver yields the
    /// first bad revision once the interval collapses.
    pub fn new(
        revisions: RevisionSequence,
        seed: u64,
        parent: CancellationToken,
    ) -> (Self, oneshot::Receiver<String>) {
        let order = ProbeOrder::shuffled(revisions.len(), seed);
        Self::build(revisions, order, parent)
    }

    /// Like [`SearchState::new`] with an explicit probe order.
    pub fn with_order(
        revisions: RevisionSequence,
        order: ProbeOrder,
        parent: CancellationToken,
    ) -> Result<(Self, oneshot::Receiver<String>), SearchError> {
        if order.len() != revisions.len() {
            return Err(SearchError::InvalidOrder {
                len: revisions.len(),
            });
        }
        Ok(Self::build(revisions, order, parent))
    }

    fn build(
        revisions: RevisionSequence,
        order: ProbeOrder,
        parent: CancellationToken,
    ) -> (Self, oneshot::Receiver<String>) {
        let (tx, rx) = oneshot::channel();
        let mut inner = Inner {
            start: 0,
            end: revisions.len() - 1,
            cursor: 0,
            active: HashMap::new(),
            done: Some(tx),
        };
        // Two revisions: the answer is already known
        emit_if_collapsed(&revisions, &mut inner);

        let state = Self {
            revisions,
            order,
            parent,
            inner: Mutex::new(inner),
        };
        (state, rx)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn revisions(&self) -> &RevisionSequence {
        &self.revisions
    }

    /// Hand out the next untested revision inside the interval.
    ///
    /// Returns `None` once the order is exhausted or the interval has
    /// collapsed. Indices skipped because they fell outside the interval
    /// are never revisited.
    pub fn next(&self) -> Option<ActiveProbe> {
        let mut inner = self.lock();
        if inner.end - inner.start <= 1 {
            return None;
        }

        while inner.cursor < self.order.len() {
            let index = self.order[inner.cursor];
            inner.cursor += 1;
            if index < inner.start || index > inner.end {
                continue;
            }

            let token = self.parent.child_token();
            inner.active.insert(index, token.clone());
            return Some(ActiveProbe {
                index,
                revision: self.revisions[index].to_string(),
                token,
            });
        }
        None
    }

    /// Record that `revision` passed.
    pub fn report_good(&self, revision: &str) -> Result<Narrowing, SearchError> {
        self.report(revision, Verdict::Good)
    }

    /// Record that `revision` failed.
    pub fn report_bad(&self, revision: &str) -> Result<Narrowing, SearchError> {
        self.report(revision, Verdict::Bad)
    }

    fn report(&self, revision: &str, verdict: Verdict) -> Result<Narrowing, SearchError> {
        let index = self
            .revisions
            .index_of(revision)
            .ok_or_else(|| SearchError::UnknownRevision(revision.to_string()))?;

        let mut inner = self.lock();
        let (implied, conflicting) = match verdict {
            Verdict::Good => (index <= inner.start, index >= inner.end),
            Verdict::Bad => (index >= inner.end, index <= inner.start),
        };
        if implied {
            return Ok(Narrowing::Unchanged);
        }
        if conflicting {
            return Err(SearchError::Conflict {
                revision: revision.to_string(),
                verdict,
                start: inner.start,
                end: inner.end,
            });
        }

        match verdict {
            Verdict::Good => inner.start = index,
            Verdict::Bad => inner.end = index,
        }
        log_search_debug!(
            "Interval narrowed",
            revision = revision,
            start = inner.start,
            end = inner.end,
        );

        let (start, end) = (inner.start, inner.end);
        inner.active.retain(|&i, token| {
            let keep = (start..=end).contains(&i);
            if !keep {
                token.cancel();
            }
            keep
        });

        emit_if_collapsed(&self.revisions, &mut inner);
        Ok(Narrowing::Narrowed)
    }

    /// Forget a completed probe. Returns false when it had already been
    /// cancelled by narrowing.
    pub fn finish(&self, probe: &ActiveProbe) -> bool {
        self.lock().active.remove(&probe.index).is_some()
    }

    pub fn stats(&self) -> Stats {
        let inner = self.lock();
        Stats {
            pending: inner.active.len(),
            left: self.order.len().saturating_sub(inner.cursor),
            total: self.revisions.len(),
            width: inner.end - inner.start,
        }
    }

    /// Current `(start, end)` bounds.
    pub fn interval(&self) -> (usize, usize) {
        let inner = self.lock();
        (inner.start, inner.end)
    }

    /// The first bad revision, once known.
    pub fn first_bad(&self) -> Option<String> {
        let inner = self.lock();
        (inner.end - inner.start == 1).then(|| self.revisions[inner.end].to_string())
    }
}

fn emit_if_collapsed(revisions: &RevisionSequence, inner: &mut Inner) {
    if inner.end - inner.start != 1 {
        return;
    }
    if let Some(done) = inner.done.take() {
        let revision = revisions[inner.end].to_string();
        log_search_info!("First bad revision found", revision = revision.as_str());
        // Receiver may be gone if nobody waits for the result
        let _ = done.send(revision);
    }
}
