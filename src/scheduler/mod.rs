//! Scheduler module: the monitoring loop and the state it owns.
//!
//! One background task sweeps every configured probe per tick, records
//! status changes as they happen and writes a periodic snapshot of all
//! probes. Query handlers read the same state concurrently.

mod query;
mod tracker;

pub use tracker::*;

use crate::config::{ConfigError, ServerConfig};
use crate::history::{HistoryEntry, Store, StoreError};
use crate::probe::{check_probe, CheckResult, Checker, Probe};

use chrono::Local;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Scheduler error types.
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("probe not found: {0}")]
    UnknownProbe(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// What one sweep did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub checked: usize,
    pub changes: usize,
    /// Entries written by the periodic snapshot, if one was due.
    pub snapshot: Option<usize>,
}

/// The monitoring engine.
pub struct Scheduler {
    config: ServerConfig,
    store: Arc<Store>,
    checker: Arc<dyn Checker>,
    probes: RwLock<Arc<Vec<Probe>>>,
    current: RwLock<HashMap<String, CheckResult>>,
    tracker: Mutex<StatusTracker>,
    last_snapshot: Mutex<Instant>,
    running: AtomicBool,
    stop: Mutex<Option<broadcast::Sender<()>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    /// Create a stopped scheduler over the given probe set.
    pub fn new(config: ServerConfig, probes: Vec<Probe>, store: Arc<Store>, checker: Arc<dyn Checker>) -> Self {
        Self {
            config,
            store,
            checker,
            probes: RwLock::new(Arc::new(probes)),
            current: RwLock::new(HashMap::new()),
            tracker: Mutex::new(StatusTracker::new()),
            last_snapshot: Mutex::new(Instant::now()),
            running: AtomicBool::new(false),
            stop: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    /// Spawn the monitoring loop. Does nothing if it is already running.
    pub async fn start(self: &Arc<Self>) {
        let mut task = self.task.lock().await;
        if self.running.load(Ordering::SeqCst) {
            return;
        }

        // A loop stopped earlier may still be finishing its last sweep.
        if let Some(previous) = task.take() {
            let _ = previous.await;
        }

        let (stop_tx, stop_rx) = broadcast::channel(1);
        *self.stop.lock().await = Some(stop_tx);
        self.running.store(true, Ordering::SeqCst);

        let scheduler = Arc::clone(self);
        *task = Some(tokio::spawn(scheduler.run_loop(stop_rx)));

        tracing::info!(
            "Monitoring started: {} probes, check every {:?}, snapshot every {:?}",
            self.probes.read().await.len(),
            self.config.check_interval,
            self.config.history_interval
        );
    }

    /// Ask the loop to stop. It exits at its next sleep boundary; an
    /// in-flight sweep is not interrupted.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(stop_tx) = self.stop.lock().await.take() {
            let _ = stop_tx.send(());
        }
        tracing::info!("Monitoring stopped");
    }

    /// Stop the loop and wait for the task to finish.
    pub async fn shutdown(&self) {
        self.stop().await;
        let handle = self.task.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!("Monitoring task ended abnormally: {}", e);
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn run_loop(self: Arc<Self>, mut stop_rx: broadcast::Receiver<()>) {
        let mut interval = tokio::time::interval(self.config.check_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = stop_rx.recv() => break,
                _ = interval.tick() => {}
            }
            if !self.is_running() {
                break;
            }

            match self.run_tick().await {
                Ok(report) => tracing::debug!(
                    "Sweep done: {} checked, {} changes, snapshot {:?}",
                    report.checked,
                    report.changes,
                    report.snapshot
                ),
                Err(e) => {
                    tracing::error!(
                        "Monitoring sweep failed: {}; retrying in {:?}",
                        e,
                        self.config.error_backoff
                    );
                    tokio::select! {
                        _ = stop_rx.recv() => break,
                        _ = tokio::time::sleep(self.config.error_backoff) => {}
                    }
                    interval.reset();
                }
            }
        }

        tracing::debug!("Monitoring loop exited");
    }

    /// Run one sweep over the configured probes.
    ///
    /// A failed history write is logged and the sweep carries on; the first
    /// such failure is returned once every probe has been processed.
    pub async fn run_tick(&self) -> Result<TickReport, SchedulerError> {
        let probes = self.probes.read().await.clone();
        let mut report = TickReport::default();
        let mut first_error = None;

        for probe in probes.iter() {
            let result = check_probe(self.checker.as_ref(), probe).await;
            report.checked += 1;
            match self.observe(result).await {
                Ok(true) => report.changes += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::error!("Failed to record status change for {}: {}", probe.id, e);
                    first_error.get_or_insert(e);
                }
            }
        }

        if self.snapshot_due().await {
            match self.save_snapshot(&probes).await {
                Ok(count) => report.snapshot = Some(count),
                Err(e) => {
                    tracing::error!("Failed to save history snapshot: {}", e);
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(report),
        }
    }

    /// Feed one result through change detection, then publish it.
    /// Returns whether a change entry was written.
    async fn observe(&self, result: CheckResult) -> Result<bool, StoreError> {
        let status = result.status();
        let mut tracker = self.tracker.lock().await;

        let written = match tracker.classify(&result.id, status) {
            Some(change_type) => {
                let previous = tracker.previous(&result.id);
                match previous {
                    None => tracing::info!("Probe {}: initial status {}", result.id, status),
                    Some(prev) => tracing::info!("Probe {}: {} -> {}", result.id, prev, status),
                }
                self.store.record_change(&result, change_type, previous).map(|_| true)
            }
            None => Ok(false),
        };

        tracker.observe(&result.id, status);
        drop(tracker);

        self.current.write().await.insert(result.id.clone(), result);
        written
    }

    async fn snapshot_due(&self) -> bool {
        self.last_snapshot.lock().await.elapsed() >= self.config.history_interval
    }

    /// Write one entry per configured probe with a current status.
    async fn save_snapshot(&self, probes: &[Probe]) -> Result<usize, StoreError> {
        let saved_at = Local::now();
        let entries: Vec<HistoryEntry> = {
            let tracker = self.tracker.lock().await;
            let current = self.current.read().await;
            probes
                .iter()
                .filter_map(|probe| current.get(&probe.id))
                .map(|result| {
                    let mut result = result.clone();
                    result.timestamp = saved_at;
                    let change_type = tracker.snapshot_kind(&result.id, result.status());
                    let previous = tracker.previous(&result.id);
                    HistoryEntry::new(result, change_type, previous)
                })
                .collect()
        };

        let count = self.store.record_snapshot(entries)?;
        *self.last_snapshot.lock().await = Instant::now();
        tracing::info!("History snapshot saved for {} probes", count);
        Ok(count)
    }
}
