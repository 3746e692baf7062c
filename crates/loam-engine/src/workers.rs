//! Worker pool for heavy per-occupant computations.
//!
//! Pathfinding, crafting searches, anything too slow for the tick
//! thread: the transport or a behavior submits a compute job keyed by
//! occupant, a worker runs it off-thread, and the result comes back
//! as a deferred task on the occupant's realm, applied in the next
//! tick's general phase.
//!
//! Two rules keep this safe:
//!
//! - at most one job per occupant is in flight; a second submission
//!   while the first runs is rejected as [`SubmitOutcome::Busy`]
//! - the result task re-checks the occupant still exists before
//!   touching anything; an occupant destroyed mid-computation makes
//!   the result a logged no-op
//!
//! A panicking job is contained at the worker boundary: the worker
//! logs it, clears the in-flight mark, and keeps serving jobs.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use indexmap::IndexSet;
use log::{debug, error};

use loam_core::OccupantId;
use loam_world::{Realm, RealmTask};

/// Produces the realm task to apply once the computation finishes.
pub type ComputeJob = Box<dyn FnOnce() -> RealmTask + Send>;

/// Result of submitting a job.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Queued for a worker.
    Accepted,
    /// A job for this occupant is already queued or running.
    Busy,
    /// The job channel is full (back-pressure); retry later.
    Full,
    /// The pool has shut down.
    Shutdown,
}

struct Job {
    occupant: OccupantId,
    realm: Arc<Realm>,
    compute: ComputeJob,
}

/// A fixed-size pool of compute workers.
pub struct WorkerPool {
    tx: Option<Sender<Job>>,
    handles: Vec<JoinHandle<()>>,
    in_flight: Arc<Mutex<IndexSet<OccupantId>>>,
}

impl WorkerPool {
    /// Spawn `worker_count` workers (at least one).
    pub fn new(worker_count: usize) -> Self {
        let worker_count = worker_count.max(1);
        let (tx, rx) = crossbeam_channel::bounded::<Job>(worker_count * 4);
        let in_flight = Arc::new(Mutex::new(IndexSet::new()));

        let mut handles = Vec::with_capacity(worker_count);
        for i in 0..worker_count {
            let rx = rx.clone();
            let in_flight = Arc::clone(&in_flight);
            let handle = thread::Builder::new()
                .name(format!("loam-worker-{i}"))
                .spawn(move || worker_loop(rx, in_flight))
                .expect("failed to spawn worker");
            handles.push(handle);
        }

        Self {
            tx: Some(tx),
            handles,
            in_flight,
        }
    }

    /// Submit a computation for an occupant of `realm`.
    ///
    /// `compute` runs on a worker thread and must not touch realm
    /// state; it returns the task that will, applied through the
    /// realm's general queue next tick.
    pub fn submit(
        &self,
        realm: Arc<Realm>,
        occupant: OccupantId,
        compute: impl FnOnce() -> RealmTask + Send + 'static,
    ) -> SubmitOutcome {
        let Some(tx) = self.tx.as_ref() else {
            return SubmitOutcome::Shutdown;
        };
        if !self.in_flight.lock().unwrap().insert(occupant) {
            return SubmitOutcome::Busy;
        }
        let job = Job {
            occupant,
            realm,
            compute: Box::new(compute),
        };
        match tx.try_send(job) {
            Ok(()) => SubmitOutcome::Accepted,
            Err(err) => {
                self.in_flight.lock().unwrap().shift_remove(&occupant);
                match err {
                    crossbeam_channel::TrySendError::Full(_) => SubmitOutcome::Full,
                    crossbeam_channel::TrySendError::Disconnected(_) => SubmitOutcome::Shutdown,
                }
            }
        }
    }

    /// Jobs currently queued or running.
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().unwrap().len()
    }

    /// Close the channel and join every worker. Queued jobs finish
    /// first.
    pub fn shutdown(&mut self) {
        self.tx = None;
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(rx: Receiver<Job>, in_flight: Arc<Mutex<IndexSet<OccupantId>>>) {
    while let Ok(job) = rx.recv() {
        let occupant = job.occupant;
        let result = catch_unwind(AssertUnwindSafe(job.compute));
        in_flight.lock().unwrap().shift_remove(&occupant);
        match result {
            Ok(apply) => job.realm.defer(move |realm| {
                if realm.contains(occupant) {
                    apply(realm);
                } else {
                    debug!("discarding worker result for departed occupant {occupant}");
                }
            }),
            Err(_) => error!("worker job for occupant {occupant} panicked"),
        }
    }
}
