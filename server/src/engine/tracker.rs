//! Process-wide concurrency accounting
//!
//! Counts requests currently awaiting a response across every session,
//! with running-peak tracking. Mutations serialize through one mutex so
//! the peak is observed consistently with the current count; snapshots
//! read the atomics without the lock, which is fine for periodic
//! reporting but must not be used for invariant checks mid-mutation.

use serde::Serialize;
use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;
use tracing::info;

/// Point-in-time view of the counters
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct TrackerSnapshot {
    pub current: i64,
    pub peak: i64,
    pub started: u64,
    pub completed: u64,
}

/// Shared in-flight request counters. Passed by `Arc` to every session
/// engine; never global state.
#[derive(Debug, Default)]
pub struct ConcurrencyTracker {
    // Lock held only across counter updates, never across I/O
    mutation: Mutex<()>,
    current: AtomicI64,
    peak: AtomicI64,
    started: AtomicU64,
    completed: AtomicU64,
}

impl ConcurrencyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Zero all counters. Called exactly once at the start of a run.
    pub fn reset(&self) {
        let _guard = self.mutation.lock().unwrap_or_else(|e| e.into_inner());
        self.current.store(0, Ordering::SeqCst);
        self.peak.store(0, Ordering::SeqCst);
        self.started.store(0, Ordering::SeqCst);
        self.completed.store(0, Ordering::SeqCst);
    }

    /// A request went out and is now awaiting its response
    pub fn increment(&self) {
        let _guard = self.mutation.lock().unwrap_or_else(|e| e.into_inner());
        let current = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.started.fetch_add(1, Ordering::SeqCst);
        if current > self.peak.load(Ordering::SeqCst) {
            self.peak.store(current, Ordering::SeqCst);
        }
    }

    /// A response arrived for an in-flight request
    pub fn decrement_on_completion(&self) {
        let _guard = self.mutation.lock().unwrap_or_else(|e| e.into_inner());
        self.current.fetch_sub(1, Ordering::SeqCst);
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    /// Free the slot of an in-flight request whose response will never
    /// arrive (session terminated first). Does not count a completion.
    pub fn release(&self) {
        let _guard = self.mutation.lock().unwrap_or_else(|e| e.into_inner());
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    /// Lock-free read of the counters; may be slightly stale
    pub fn snapshot(&self) -> TrackerSnapshot {
        TrackerSnapshot {
            current: self.current.load(Ordering::SeqCst),
            peak: self.peak.load(Ordering::SeqCst),
            started: self.started.load(Ordering::SeqCst),
            completed: self.completed.load(Ordering::SeqCst),
        }
    }
}

/// Periodically log and publish the tracker snapshot. Spawned for the
/// duration of a run and aborted when the run ends; correctness never
/// depends on it.
pub async fn monitor_tracker(tracker: std::sync::Arc<ConcurrencyTracker>, interval: Duration) {
    let start = std::time::Instant::now();
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await; // First tick fires immediately
    loop {
        ticker.tick().await;
        let snap = tracker.snapshot();
        info!(
            elapsed_secs = start.elapsed().as_secs(),
            active = snap.current,
            peak = snap.peak,
            started = snap.started,
            completed = snap.completed,
            "concurrency monitor"
        );
        metrics::gauge!("chatload_inflight_requests").set(snap.current as f64);
        metrics::gauge!("chatload_peak_inflight_requests").set(snap.peak as f64);
        metrics::counter!("chatload_requests_started_total").absolute(snap.started);
        metrics::counter!("chatload_responses_completed_total").absolute(snap.completed);
    }
}
