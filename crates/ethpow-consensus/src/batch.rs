//! Parallel verification of a run of headers.
//!
//! Worker threads pull indices from a shared cursor and verify headers out
//! of order. Each result lands in its slot and the worker reports the index
//! to a committer thread, which releases results strictly in input order.
//! The caller reads them from a channel and may abort at any time.

use crate::error::{ConsensusError, ConsensusResult};
use crate::header::Header;
use alloy_primitives::B256;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

/// Verifies `(header, parent, seal)`.
pub(crate) type VerifyFn = Arc<dyn Fn(&Header, &Header, bool) -> ConsensusResult<()> + Send + Sync>;

/// Stops a running batch. Results not yet emitted are dropped.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle {
    flag: Arc<AtomicBool>,
}

impl AbortHandle {
    pub fn abort(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// A running batch: one result per input header, in input order.
///
/// The channel closes after the last result, or after an abort once the
/// in-flight workers have drained.
pub struct BatchVerification {
    pub results: mpsc::Receiver<ConsensusResult<()>>,
    pub abort: AbortHandle,
}

impl BatchVerification {
    /// Block until the next result. Must not be called from an async context.
    pub fn recv(&mut self) -> Option<ConsensusResult<()>> {
        self.results.blocking_recv()
    }

    /// Block until the batch completes and return every result.
    pub fn collect(mut self) -> Vec<ConsensusResult<()>> {
        let mut out = Vec::new();
        while let Some(result) = self.recv() {
            out.push(result);
        }
        out
    }

    /// A batch whose results are all `Ok`, emitted immediately.
    pub(crate) fn accept_all(count: usize) -> Self {
        let (tx, results) = mpsc::channel(count.max(1));
        for index in 0..count {
            if let Err(e) = tx.try_send(Ok(())) {
                warn!(index, error = %e, "Dropped accepted header result");
            }
        }
        Self {
            results,
            abort: AbortHandle::default(),
        }
    }
}

struct Shared {
    headers: Vec<Header>,
    seals: Vec<bool>,
    external_parents: Vec<Option<Header>>,
    cursor: AtomicUsize,
    abort: AbortHandle,
    slots: Mutex<Vec<Option<ConsensusResult<()>>>>,
    verify: VerifyFn,
}

impl Shared {
    fn parent_of(&self, index: usize) -> Option<&Header> {
        if index > 0 {
            let previous = &self.headers[index - 1];
            if previous.hash() == self.headers[index].parent_hash {
                return Some(previous);
            }
        }
        self.external_parents.get(index).and_then(Option::as_ref)
    }

    fn verify_index(&self, index: usize) -> ConsensusResult<()> {
        let header = &self.headers[index];
        let seal = self.seals.get(index).copied().unwrap_or(false);
        match self.parent_of(index) {
            Some(parent) => (self.verify)(header, parent, seal),
            None => Err(ConsensusError::UnknownAncestor),
        }
    }
}

/// Parents the batch cannot take from itself: the first header's, and
/// that of any header not extending its predecessor. Looked up with
/// `lookup(parent_hash, number)`; linked entries stay `None`.
pub(crate) fn external_parents<F>(headers: &[Header], lookup: F) -> Vec<Option<Header>>
where
    F: Fn(B256, u64) -> Option<Header>,
{
    headers
        .iter()
        .enumerate()
        .map(|(index, header)| {
            if index > 0 && headers[index - 1].hash() == header.parent_hash {
                return None;
            }
            let number = header.number.checked_sub(1)?;
            lookup(header.parent_hash, number)
        })
        .collect()
}

/// Start verifying `headers`. `external_parents[i]` is used for header `i`
/// when `headers[i - 1]` is not its parent; see [`external_parents`].
pub(crate) fn spawn(
    headers: Vec<Header>,
    external_parents: Vec<Option<Header>>,
    seals: Vec<bool>,
    verify: VerifyFn,
) -> BatchVerification {
    let count = headers.len();
    if count == 0 {
        return BatchVerification::accept_all(0);
    }

    let parallelism = thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    let workers = count.min(parallelism);

    let abort = AbortHandle::default();
    let shared = Arc::new(Shared {
        headers,
        seals,
        external_parents,
        cursor: AtomicUsize::new(0),
        abort: abort.clone(),
        slots: Mutex::new((0..count).map(|_| None).collect()),
        verify,
    });

    let (done_tx, done_rx) = mpsc::channel::<usize>(count);
    let (results_tx, results) = mpsc::channel(count);

    debug!(headers = count, workers, "Starting batch header verification");

    for id in 0..workers {
        let shared = Arc::clone(&shared);
        let done_tx = done_tx.clone();
        let spawned = thread::Builder::new()
            .name(format!("header-verifier-{}", id))
            .spawn(move || worker_loop(id, &shared, done_tx));
        if let Err(e) = spawned {
            warn!(worker_id = id, error = %e, "Failed to spawn header verifier");
        }
    }
    drop(done_tx);

    let committer_shared = Arc::clone(&shared);
    let spawned = thread::Builder::new()
        .name("header-committer".to_string())
        .spawn(move || commit_loop(&committer_shared, done_rx, results_tx));
    if let Err(e) = spawned {
        warn!(error = %e, "Failed to spawn header committer");
        abort.abort();
    }

    BatchVerification { results, abort }
}

fn worker_loop(id: usize, shared: &Shared, done: mpsc::Sender<usize>) {
    trace!(worker_id = id, "Header verifier started");
    loop {
        if shared.abort.is_aborted() {
            break;
        }
        let index = shared.cursor.fetch_add(1, Ordering::SeqCst);
        if index >= shared.headers.len() {
            break;
        }
        let result = shared.verify_index(index);
        shared.slots.lock()[index] = Some(result);
        if done.blocking_send(index).is_err() {
            break;
        }
    }
    trace!(worker_id = id, "Header verifier stopped");
}

fn commit_loop(
    shared: &Shared,
    mut done: mpsc::Receiver<usize>,
    results: mpsc::Sender<ConsensusResult<()>>,
) {
    let count = shared.headers.len();
    let mut out = 0;
    // Runs until every worker has dropped its sender.
    while done.blocking_recv().is_some() {
        while out < count {
            if shared.abort.is_aborted() {
                break;
            }
            let Some(result) = shared.slots.lock()[out].take() else {
                break;
            };
            if results.blocking_send(result).is_err() {
                // Receiver gone; nobody wants the rest.
                shared.abort.abort();
                break;
            }
            out += 1;
        }
    }
    if out == count {
        info!(headers = count, "Verified header batch");
    } else {
        debug!(committed = out, headers = count, "Header batch stopped early");
    }
}
