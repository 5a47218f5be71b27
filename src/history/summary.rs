//! Aggregations over history entries.

use std::collections::BTreeMap;

use chrono::{DateTime, Local};
use serde::Serialize;

use super::models::{previous_status, ChangeType, HistoryEntry};
use crate::probe::CheckStatus;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChangeTypeCounts {
    pub initial: usize,
    pub status_change: usize,
    pub periodic_save: usize,
}

impl ChangeTypeCounts {
    pub fn add(&mut self, change_type: ChangeType) {
        match change_type {
            ChangeType::Initial => self.initial += 1,
            ChangeType::StatusChange => self.status_change += 1,
            ChangeType::PeriodicSave => self.periodic_save += 1,
        }
    }
}

/// One row of a probe's change log inside a [`HistorySummary`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeEvent {
    pub timestamp: DateTime<Local>,
    pub status: CheckStatus,
    #[serde(serialize_with = "previous_status::serialize")]
    pub previous_status: Option<CheckStatus>,
    pub change_type: ChangeType,
    pub response_time: Option<f64>,
}

impl From<&HistoryEntry> for ChangeEvent {
    fn from(entry: &HistoryEntry) -> Self {
        Self {
            timestamp: entry.result.timestamp,
            status: entry.result.outcome.status,
            previous_status: entry.previous_status,
            change_type: entry.change_type,
            response_time: entry.result.outcome.response_time,
        }
    }
}

/// Aggregate of one day's partition.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HistorySummary {
    pub total_entries: usize,
    pub entries_by_probe: BTreeMap<String, Vec<ChangeEvent>>,
    pub entries_by_type: ChangeTypeCounts,
}

impl HistorySummary {
    pub fn from_entries(entries: &[HistoryEntry]) -> Self {
        let mut summary = Self {
            total_entries: entries.len(),
            ..Default::default()
        };
        for entry in entries {
            summary
                .entries_by_probe
                .entry(entry.probe_id().to_string())
                .or_default()
                .push(ChangeEvent::from(entry));
            summary.entries_by_type.add(entry.change_type);
        }
        summary
    }
}

/// Distribution of statuses and change types over a probe's history.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HistoryStatistics {
    pub total_entries: usize,
    pub status_distribution: BTreeMap<CheckStatus, usize>,
    pub change_types: ChangeTypeCounts,
}

impl HistoryStatistics {
    pub fn from_entries(entries: &[HistoryEntry]) -> Self {
        let mut stats = Self {
            total_entries: entries.len(),
            ..Default::default()
        };
        for entry in entries {
            *stats.status_distribution.entry(entry.result.outcome.status).or_default() += 1;
            stats.change_types.add(entry.change_type);
        }
        stats
    }
}
