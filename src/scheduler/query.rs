//! Read side of the scheduler, plus the two operator actions.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;

use super::{Scheduler, SchedulerError};
use crate::config::load_probes;
use crate::history::{HistoryEntry, HistorySummary};
use crate::probe::{check_probe, CheckResult, CheckStatus, Probe};

impl Scheduler {
    /// The configured probe set.
    pub async fn probes(&self) -> Arc<Vec<Probe>> {
        self.probes.read().await.clone()
    }

    pub async fn find_probe(&self, probe_id: &str) -> Option<Probe> {
        self.probes.read().await.iter().find(|p| p.id == probe_id).cloned()
    }

    /// Latest result per probe, including probes removed by a reload.
    pub async fn current_status(&self) -> HashMap<String, CheckResult> {
        self.current.read().await.clone()
    }

    pub async fn probe_status(&self, probe_id: &str) -> Option<CheckResult> {
        self.current.read().await.get(probe_id).cloned()
    }

    pub async fn previous_status(&self, probe_id: &str) -> Option<CheckStatus> {
        self.tracker.lock().await.previous(probe_id)
    }

    /// History for one day. Read failures are logged and yield nothing.
    pub fn history(&self, date: Option<NaiveDate>, probe_id: Option<&str>) -> Vec<HistoryEntry> {
        match self.store.query(date, probe_id) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::error!("History query failed: {}", e);
                Vec::new()
            }
        }
    }

    pub fn probe_history(&self, probe_id: &str, days: u32) -> Vec<HistoryEntry> {
        self.store.query_multiday(probe_id, days)
    }

    pub fn summary(&self, date: Option<NaiveDate>) -> HistorySummary {
        match self.store.summarize(date) {
            Ok(summary) => summary,
            Err(e) => {
                tracing::error!("History summary failed: {}", e);
                HistorySummary::default()
            }
        }
    }

    /// Check one probe right now. The result is returned only; change
    /// tracking, current status and history are left alone.
    pub async fn check_now(&self, probe_id: &str) -> Result<CheckResult, SchedulerError> {
        let probe = self
            .find_probe(probe_id)
            .await
            .ok_or_else(|| SchedulerError::UnknownProbe(probe_id.to_string()))?;
        tracing::info!("Manual check requested for {}", probe.id);
        Ok(check_probe(self.checker.as_ref(), &probe).await)
    }

    /// Re-read the probe file and swap in the new set. On failure the
    /// current set stays in place.
    pub async fn reload(&self) -> Result<usize, SchedulerError> {
        let probes = load_probes(&self.config.config_file, self.config.max_probes)?;
        let count = probes.len();
        *self.probes.write().await = Arc::new(probes);
        tracing::info!("Probe configuration reloaded: {} probes", count);
        Ok(count)
    }

    pub fn history_interval(&self) -> Duration {
        self.config.history_interval
    }
}
