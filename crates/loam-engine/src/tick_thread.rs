//! Per-realm tick cadence thread.
//!
//! Each realm gets one dedicated thread calling [`Realm::tick`] at a
//! fixed rate. The thread owns nothing: the realm is shared via
//! `Arc`, mutation requests arrive through the realm's own deferred
//! queues, and each tick's [`TickReport`] is forwarded on a channel
//! for the dispatcher to fan out to sessions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use log::debug;

use loam_core::RealmId;
use loam_world::{Realm, TickReport};

struct TickLoop {
    realm: Arc<Realm>,
    budget: Duration,
    reports: Sender<TickReport>,
    shutdown: Arc<AtomicBool>,
}

impl TickLoop {
    /// Run until the shutdown flag is set.
    fn run(self) {
        let mut last_tick = Instant::now();
        loop {
            if self.shutdown.load(Ordering::Acquire) {
                break;
            }
            let tick_start = Instant::now();
            let delta = tick_start.duration_since(last_tick).as_secs_f32();
            last_tick = tick_start;

            let report = self.realm.tick(delta);
            // Best-effort: the dispatcher may already be gone during
            // shutdown.
            let _ = self.reports.send(report);

            if let Some(remaining) = self.budget.checked_sub(tick_start.elapsed()) {
                thread::park_timeout(remaining);
            }
        }
        debug!("tick thread for realm {} stopped", self.realm.id());
    }
}

/// Handle to one realm's running tick thread.
pub struct TickThread {
    realm_id: RealmId,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl TickThread {
    /// Start ticking `realm` at `tick_rate_hz`, forwarding reports on
    /// `reports`.
    pub fn spawn(realm: Arc<Realm>, tick_rate_hz: f64, reports: Sender<TickReport>) -> Self {
        let realm_id = realm.id();
        let shutdown = Arc::new(AtomicBool::new(false));
        let tick_loop = TickLoop {
            realm,
            budget: Duration::from_secs_f64(1.0 / tick_rate_hz),
            reports,
            shutdown: Arc::clone(&shutdown),
        };
        let handle = thread::Builder::new()
            .name(format!("loam-tick-{realm_id}"))
            .spawn(move || tick_loop.run())
            .expect("failed to spawn tick thread");
        Self {
            realm_id,
            shutdown: shutdown.clone(),
            handle: Some(handle),
        }
    }

    /// The realm this thread ticks.
    pub fn realm_id(&self) -> RealmId {
        self.realm_id
    }

    /// Signal shutdown and join. The current tick finishes first.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            // Wake it if parked in a budget sleep.
            handle.thread().unpark();
            let _ = handle.join();
        }
    }

    /// Whether the thread is still running.
    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }
}

impl Drop for TickThread {
    fn drop(&mut self) {
        self.stop();
    }
}
