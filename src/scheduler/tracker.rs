//! Last-known status per probe, used for change detection.

use std::collections::HashMap;

use crate::history::ChangeType;
use crate::probe::CheckStatus;

/// Remembers the last status seen for each probe id.
///
/// Only the status enum is compared; latency or error text changes alone
/// never count as a change.
#[derive(Debug, Default)]
pub struct StatusTracker {
    previous: HashMap<String, CheckStatus>,
}

impl StatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `status` is a change for `probe_id`, and of which kind:
    /// `Initial` when nothing is recorded, `StatusChange` when it differs,
    /// `None` when unchanged.
    pub fn classify(&self, probe_id: &str, status: CheckStatus) -> Option<ChangeType> {
        match self.previous.get(probe_id) {
            None => Some(ChangeType::Initial),
            Some(previous) if *previous != status => Some(ChangeType::StatusChange),
            Some(_) => None,
        }
    }

    /// Classification used for snapshot entries.
    pub fn snapshot_kind(&self, probe_id: &str, status: CheckStatus) -> ChangeType {
        self.classify(probe_id, status).unwrap_or(ChangeType::PeriodicSave)
    }

    pub fn previous(&self, probe_id: &str) -> Option<CheckStatus> {
        self.previous.get(probe_id).copied()
    }

    /// Record `status` as the latest observation, changed or not.
    pub fn observe(&mut self, probe_id: &str, status: CheckStatus) {
        match self.previous.get_mut(probe_id) {
            Some(slot) => *slot = status,
            None => {
                self.previous.insert(probe_id.to_string(), status);
            }
        }
    }
}
