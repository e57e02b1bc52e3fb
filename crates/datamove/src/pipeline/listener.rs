//! Per-unit statistics and exception accumulator.
//!
//! A [`TransferListener`] is shared between the producer, the consumers, the
//! progress reporter and the caller. Counters are atomics and the few
//! non-atomic fields sit behind short-lived locks, so reads are
//! point-in-time snapshots that may lag the true count slightly.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::CursorStats;
use crate::error::{Result, TransferError};

/// How a listener arrives at its totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListenerMode {
    /// One write cursor reports straight into the listener.
    Direct,
    /// Totals are summed over one child counter per consumer.
    Summed,
}

/// Counters of a single write cursor.
#[derive(Debug, Default)]
pub struct CursorCounters {
    label: String,
    rows: AtomicU64,
    batches: AtomicU64,
    commits: AtomicU64,
}

impl CursorCounters {
    fn new(label: String) -> Self {
        Self {
            label,
            ..Default::default()
        }
    }

    /// Publish the latest cursor counters.
    pub fn record(&self, stats: CursorStats) {
        self.rows.store(stats.rows, Ordering::Relaxed);
        self.batches.store(stats.batches, Ordering::Relaxed);
        self.commits.store(stats.commits, Ordering::Relaxed);
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn rows(&self) -> u64 {
        self.rows.load(Ordering::Relaxed)
    }

    pub fn batches(&self) -> u64 {
        self.batches.load(Ordering::Relaxed)
    }

    pub fn commits(&self) -> u64 {
        self.commits.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
struct Timing {
    started_at: Option<DateTime<Utc>>,
    stopped_at: Option<DateTime<Utc>>,
    start: Option<Instant>,
    elapsed: Option<Duration>,
}

/// Statistics and captured errors for one transfer unit.
#[derive(Debug)]
pub struct TransferListener {
    name: String,
    mode: ListenerMode,
    direct: CursorCounters,
    children: Mutex<Vec<Arc<CursorCounters>>>,
    exceptions: Mutex<Vec<TransferError>>,
    timing: Mutex<Timing>,
}

impl TransferListener {
    /// Create a listener for the named unit.
    pub fn new(name: impl Into<String>, mode: ListenerMode) -> Self {
        let name = name.into();
        Self {
            direct: CursorCounters::new(name.clone()),
            name,
            mode,
            children: Mutex::new(Vec::new()),
            exceptions: Mutex::new(Vec::new()),
            timing: Mutex::new(Timing::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> ListenerMode {
        self.mode
    }

    /// Start the response-time timer.
    pub fn start(&self) {
        let mut timing = self.timing.lock();
        timing.started_at = Some(Utc::now());
        timing.start = Some(Instant::now());
        timing.stopped_at = None;
        timing.elapsed = None;
    }

    /// Stop the response-time timer.
    pub fn stop(&self) {
        let mut timing = self.timing.lock();
        timing.stopped_at = Some(Utc::now());
        timing.elapsed = timing.start.map(|s| s.elapsed());
    }

    /// Register a child cursor (summed mode).
    pub fn attach_cursor(&self, label: impl Into<String>) -> Arc<CursorCounters> {
        let counters = Arc::new(CursorCounters::new(label.into()));
        self.children.lock().push(counters.clone());
        counters
    }

    /// Publish cursor counters (direct mode).
    pub fn record_stats(&self, stats: CursorStats) {
        self.direct.record(stats);
    }

    /// Record an exception.
    pub fn record_error(&self, error: &TransferError) {
        self.exceptions.lock().push(error.clone());
    }

    /// Record the error of a failed step and hand the result back.
    pub fn observe<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(ref e) = result {
            self.record_error(e);
        }
        result
    }

    /// Child cursor counters, in attachment order.
    pub fn cursors(&self) -> Vec<Arc<CursorCounters>> {
        match self.mode {
            ListenerMode::Direct => Vec::new(),
            ListenerMode::Summed => self.children.lock().clone(),
        }
    }

    fn total(&self, f: impl Fn(&CursorCounters) -> u64) -> u64 {
        match self.mode {
            ListenerMode::Direct => f(&self.direct),
            ListenerMode::Summed => self.children.lock().iter().map(|c| f(c.as_ref())).sum(),
        }
    }

    pub fn row_count(&self) -> u64 {
        self.total(CursorCounters::rows)
    }

    pub fn batch_count(&self) -> u64 {
        self.total(CursorCounters::batches)
    }

    pub fn commit_count(&self) -> u64 {
        self.total(CursorCounters::commits)
    }

    /// Captured exceptions.
    pub fn exceptions(&self) -> Vec<TransferError> {
        self.exceptions.lock().clone()
    }

    /// 0 when no exception was captured, otherwise the exception count.
    pub fn exit_status(&self) -> usize {
        self.exceptions.lock().len()
    }

    pub fn is_success(&self) -> bool {
        self.exit_status() == 0
    }

    /// Elapsed time: final once stopped, running while in flight.
    pub fn elapsed(&self) -> Duration {
        let timing = self.timing.lock();
        match (timing.elapsed, timing.start) {
            (Some(elapsed), _) => elapsed,
            (None, Some(start)) => start.elapsed(),
            (None, None) => Duration::ZERO,
        }
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.timing.lock().started_at
    }

    pub fn stopped_at(&self) -> Option<DateTime<Utc>> {
        self.timing.lock().stopped_at
    }

    /// Calculate throughput in rows per second.
    pub fn rows_per_second(&self) -> f64 {
        let secs = self.elapsed().as_secs_f64();
        if secs > 0.0 {
            self.row_count() as f64 / secs
        } else {
            0.0
        }
    }

    /// Point-in-time serializable snapshot.
    pub fn report(&self) -> ListenerReport {
        ListenerReport {
            name: self.name.clone(),
            exit_status: self.exit_status(),
            rows: self.row_count(),
            commits: self.commit_count(),
            batches: self.batch_count(),
            elapsed_seconds: self.elapsed().as_secs_f64(),
            started_at: self.started_at(),
            stopped_at: self.stopped_at(),
            errors: self.exceptions().iter().map(|e| e.to_string()).collect(),
        }
    }
}

/// Snapshot of a listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerReport {
    pub name: String,
    pub exit_status: usize,
    pub rows: u64,
    pub commits: u64,
    pub batches: u64,
    pub elapsed_seconds: f64,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub errors: Vec<String>,
}

/// End-to-end outcome of one `run()` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// Unique run identifier.
    pub run_id: String,

    /// Units executed.
    pub transfers_total: usize,

    /// Units with exit status 0.
    pub transfers_succeeded: usize,

    /// Units that captured at least one exception.
    pub transfers_failed: usize,

    /// Rows written across all units.
    pub rows_transferred: u64,

    /// Sum of unit elapsed times in seconds.
    pub duration_seconds: f64,

    /// Names of failed units.
    pub failed: Vec<String>,

    /// Per-unit snapshots.
    pub transfers: Vec<ListenerReport>,
}

impl RunSummary {
    /// Aggregate listeners returned by a run.
    pub fn from_listeners(listeners: &[Arc<TransferListener>]) -> Self {
        let transfers: Vec<ListenerReport> = listeners.iter().map(|l| l.report()).collect();
        let failed: Vec<String> = transfers
            .iter()
            .filter(|r| r.exit_status != 0)
            .map(|r| r.name.clone())
            .collect();

        Self {
            run_id: Uuid::new_v4().to_string(),
            transfers_total: transfers.len(),
            transfers_succeeded: transfers.len() - failed.len(),
            transfers_failed: failed.len(),
            rows_transferred: transfers.iter().map(|r| r.rows).sum(),
            duration_seconds: transfers.iter().map(|r| r.elapsed_seconds).sum(),
            failed,
            transfers,
        }
    }

    /// True when every unit succeeded.
    pub fn is_success(&self) -> bool {
        self.transfers_failed == 0
    }

    /// Format a human-readable summary.
    pub fn summary(&self) -> String {
        format!(
            "{} of {} transfers succeeded, {} rows in {:.2}s",
            self.transfers_succeeded,
            self.transfers_total,
            self.rows_transferred,
            self.duration_seconds
        )
    }

    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
