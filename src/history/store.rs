//! Day-partitioned JSON history store.
//!
//! Each calendar day (local time) owns one file, `YYYY-MM-DD.json`, holding
//! a JSON array of [`HistoryEntry`]. Writers serialize on a mutex and
//! replace the file through a rename, so readers never need the lock and
//! never observe a partial file.

use chrono::{Days, Local, NaiveDate};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

use super::models::*;
use super::summary::HistorySummary;
use crate::probe::{CheckResult, CheckStatus};

pub const PARTITION_DATE_FORMAT: &str = "%Y-%m-%d";

/// History store error types.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("history I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed history partition {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// The current day's entries, kept so an append does not re-read the file.
struct DayBuffer {
    date: NaiveDate,
    entries: Vec<HistoryEntry>,
}

/// Thread-safe history store.
pub struct Store {
    dir: PathBuf,
    retention_days: u32,
    today: Mutex<Option<DayBuffer>>,
}

impl Store {
    /// Open (creating if needed) the history directory.
    pub fn new<P: AsRef<Path>>(dir: P, retention_days: u32) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|source| StoreError::Io {
            path: dir.clone(),
            source,
        })?;

        Ok(Self {
            dir,
            retention_days,
            today: Mutex::new(None),
        })
    }

    pub fn partition_path(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(format!("{}.json", date.format(PARTITION_DATE_FORMAT)))
    }

    // --- Writes ---

    /// Append a change entry for `result` to today's partition.
    pub fn record_change(
        &self,
        result: &CheckResult,
        change_type: ChangeType,
        previous_status: Option<CheckStatus>,
    ) -> Result<(), StoreError> {
        let entry = HistoryEntry::new(result.clone(), change_type, previous_status);
        let mut guard = self.lock();
        self.append_locked(&mut guard, today(), vec![entry])
    }

    /// Append a batch of snapshot entries to today's partition, then prune
    /// expired partitions while still holding the write lock.
    pub fn record_snapshot(&self, entries: Vec<HistoryEntry>) -> Result<usize, StoreError> {
        let count = entries.len();
        let date = today();
        let mut guard = self.lock();
        self.append_locked(&mut guard, date, entries)?;
        self.prune_locked(date, self.retention_days);
        Ok(count)
    }

    /// Delete partitions strictly older than today minus `retention_days`.
    pub fn prune(&self, retention_days: u32) -> usize {
        self.prune_as_of(today(), retention_days)
    }

    /// Like [`Store::prune`], measured from `today` instead of the clock.
    pub fn prune_as_of(&self, today: NaiveDate, retention_days: u32) -> usize {
        let _guard = self.lock();
        self.prune_locked(today, retention_days)
    }

    fn lock(&self) -> MutexGuard<'_, Option<DayBuffer>> {
        self.today.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn append_locked(
        &self,
        slot: &mut Option<DayBuffer>,
        date: NaiveDate,
        entries: Vec<HistoryEntry>,
    ) -> Result<(), StoreError> {
        let path = self.partition_path(date);

        if slot.as_ref().map_or(true, |buffer| buffer.date != date) {
            let entries = read_partition(&path)?;
            *slot = Some(DayBuffer { date, entries });
        }
        let buffer = slot.get_or_insert_with(|| DayBuffer {
            date,
            entries: Vec::new(),
        });

        let committed = buffer.entries.len();
        buffer.entries.extend(entries);
        if let Err(e) = write_partition(&path, &buffer.entries) {
            // Abandon the write; the next scheduled write starts from disk state.
            buffer.entries.truncate(committed);
            return Err(e);
        }
        Ok(())
    }

    fn prune_locked(&self, today: NaiveDate, retention_days: u32) -> usize {
        let cutoff = today
            .checked_sub_days(Days::new(u64::from(retention_days)))
            .unwrap_or(NaiveDate::MIN);

        let dir_entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::error!("History: cannot list {}: {}", self.dir.display(), e);
                return 0;
            }
        };

        let mut removed = 0;
        for dir_entry in dir_entries.flatten() {
            let path = dir_entry.path();
            let Some(date) = partition_date(&path) else {
                continue;
            };
            if date >= cutoff {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => {
                    tracing::info!("History: removed expired partition {}", path.display());
                    removed += 1;
                }
                Err(e) => tracing::error!("History: failed to remove {}: {}", path.display(), e),
            }
        }
        removed
    }

    // --- Reads ---

    /// Entries for `date` (default today), optionally for one probe only.
    /// A missing partition yields an empty list.
    pub fn query(&self, date: Option<NaiveDate>, probe_id: Option<&str>) -> Result<Vec<HistoryEntry>, StoreError> {
        let entries = read_partition(&self.partition_path(date.unwrap_or_else(today)))?;
        Ok(match probe_id {
            Some(id) => entries.into_iter().filter(|e| e.probe_id() == id).collect(),
            None => entries,
        })
    }

    /// A probe's entries over the `days` most recent dates, newest first.
    /// Unreadable partitions are skipped. The window never reaches past the
    /// retention period, since older partitions are pruned.
    pub fn query_multiday(&self, probe_id: &str, days: u32) -> Vec<HistoryEntry> {
        let end = today();
        let days = days.min(self.retention_days.saturating_add(1));
        let mut merged = Vec::new();

        for offset in 0..days {
            let Some(date) = end.checked_sub_days(Days::new(u64::from(offset))) else {
                break;
            };
            match self.query(Some(date), Some(probe_id)) {
                Ok(entries) => merged.extend(entries),
                Err(e) => tracing::warn!("History: skipping {}: {}", date, e),
            }
        }

        merged.sort_by(|a, b| b.result.timestamp.cmp(&a.result.timestamp));
        merged
    }

    /// Aggregate one day's partition (default today).
    pub fn summarize(&self, date: Option<NaiveDate>) -> Result<HistorySummary, StoreError> {
        Ok(HistorySummary::from_entries(&self.query(date, None)?))
    }
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

/// Parse `YYYY-MM-DD.json`; anything else is not a partition.
fn partition_date(path: &Path) -> Option<NaiveDate> {
    if path.extension()? != "json" {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    NaiveDate::parse_from_str(stem, PARTITION_DATE_FORMAT).ok()
}

fn read_partition(path: &Path) -> Result<Vec<HistoryEntry>, StoreError> {
    let raw = match fs::read(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(StoreError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    serde_json::from_slice(&raw).map_err(|source| StoreError::Json {
        path: path.to_path_buf(),
        source,
    })
}

fn write_partition(path: &Path, entries: &[HistoryEntry]) -> Result<(), StoreError> {
    let json = serde_json::to_vec_pretty(entries).map_err(|source| StoreError::Json {
        path: path.to_path_buf(),
        source,
    })?;

    let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("partition");
    let tmp = path.with_file_name(format!(".{}.tmp", file_name));
    let io_err = |source: io::Error| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };

    fs::write(&tmp, json).map_err(io_err)?;
    fs::rename(&tmp, path).map_err(io_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::{CheckOutcome, ProbeType};
    use chrono::{Duration as ChronoDuration, TimeZone};
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio_test::{assert_err, assert_ok};

    fn result(id: &str, status: CheckStatus) -> CheckResult {
        let outcome = match status {
            CheckStatus::Online | CheckStatus::Slow => CheckOutcome::responded(status, Duration::from_micros(42_250)),
            _ => CheckOutcome::failed(status, "no response"),
        };
        CheckResult {
            id: id.to_string(),
            name: format!("Probe {}", id),
            probe_type: ProbeType::Ping,
            target: "192.0.2.1".to_string(),
            timestamp: Local::now(),
            outcome,
        }
    }

    fn open_store(retention_days: u32) -> (TempDir, Store) {
        let dir = TempDir::new().unwrap();
        let store = Store::new(dir.path(), retention_days).unwrap();
        (dir, store)
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, PARTITION_DATE_FORMAT).unwrap()
    }

    #[test]
    fn test_query_missing_partition_is_empty() {
        let (_dir, store) = open_store(30);
        let entries = assert_ok!(store.query(Some(date("2001-01-01")), Some("p1")));
        assert!(entries.is_empty());
        assert!(assert_ok!(store.query(None, None)).is_empty());
    }

    #[test]
    fn test_record_change_round_trip() {
        let (_dir, store) = open_store(30);
        let first = result("p1", CheckStatus::Offline);
        let mut http = result("p2", CheckStatus::Error);
        http.probe_type = ProbeType::Http;
        http.outcome.http_status = Some(500);
        http.outcome.response_time = Some(18.5);

        assert_ok!(store.record_change(&first, ChangeType::Initial, None));
        assert_ok!(store.record_change(&http, ChangeType::StatusChange, Some(CheckStatus::Offline)));

        let entries = assert_ok!(store.query(None, None));
        assert_eq!(
            entries,
            vec![
                HistoryEntry::new(first, ChangeType::Initial, None),
                HistoryEntry::new(http, ChangeType::StatusChange, Some(CheckStatus::Offline)),
            ]
        );
    }

    #[test]
    fn test_partition_layout_on_disk() {
        let (_dir, store) = open_store(30);
        assert_ok!(store.record_change(&result("p1", CheckStatus::Offline), ChangeType::Initial, None));

        let path = store.partition_path(today());
        let value: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        let entry = &value[0];
        assert_eq!(entry["id"], "p1");
        assert_eq!(entry["status"], "offline");
        assert_eq!(entry["change_type"], "initial");
        assert_eq!(entry["previous_status"], "unknown");
        assert!(entry["response_time"].is_null());
    }

    #[test]
    fn test_query_filters_by_probe() {
        let (_dir, store) = open_store(30);
        assert_ok!(store.record_change(&result("a", CheckStatus::Online), ChangeType::Initial, None));
        assert_ok!(store.record_change(&result("b", CheckStatus::Online), ChangeType::Initial, None));
        assert_ok!(store.record_change(&result("a", CheckStatus::Offline), ChangeType::StatusChange, Some(CheckStatus::Online)));

        let entries = assert_ok!(store.query(None, Some("a")));
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.probe_id() == "a"));
        assert_eq!(entries[1].result.outcome.status, CheckStatus::Offline);
    }

    #[test]
    fn test_appends_preserve_existing_partition() {
        let (dir, store) = open_store(30);
        assert_ok!(store.record_change(&result("a", CheckStatus::Online), ChangeType::Initial, None));

        // A second store over the same directory starts from what is on disk.
        let reopened = Store::new(dir.path(), 30).unwrap();
        assert_ok!(reopened.record_change(&result("b", CheckStatus::Online), ChangeType::Initial, None));

        let entries = assert_ok!(reopened.query(None, None));
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].probe_id(), "a");
        assert_eq!(entries[1].probe_id(), "b");
    }

    #[test]
    fn test_record_snapshot_appends_batch() {
        let (_dir, store) = open_store(30);
        let batch = vec![
            HistoryEntry::new(result("a", CheckStatus::Online), ChangeType::PeriodicSave, Some(CheckStatus::Online)),
            HistoryEntry::new(result("b", CheckStatus::Offline), ChangeType::PeriodicSave, Some(CheckStatus::Offline)),
        ];
        assert_eq!(assert_ok!(store.record_snapshot(batch.clone())), 2);
        assert_eq!(assert_ok!(store.query(None, None)), batch);
    }

    #[test]
    fn test_record_snapshot_prunes_expired() {
        let (_dir, store) = open_store(2);
        let old = store.partition_path(today() - Days::new(10));
        fs::write(&old, "[]").unwrap();

        assert_ok!(store.record_snapshot(vec![HistoryEntry::new(
            result("a", CheckStatus::Online),
            ChangeType::PeriodicSave,
            Some(CheckStatus::Online),
        )]));
        assert!(!old.exists());
        assert!(store.partition_path(today()).exists());
    }

    #[test]
    fn test_prune_retention_window() {
        let (dir, store) = open_store(30);
        let now = date("2024-06-15");
        for day in ["2024-06-15", "2024-06-14", "2024-06-13", "2024-06-10"] {
            fs::write(store.partition_path(date(day)), "[]").unwrap();
        }
        fs::write(dir.path().join("notes.json"), "{}").unwrap();
        fs::write(dir.path().join("2024-01-01.bak"), "[]").unwrap();

        let removed = store.prune_as_of(now, 2);

        assert_eq!(removed, 1);
        assert!(store.partition_path(date("2024-06-15")).exists());
        assert!(store.partition_path(date("2024-06-14")).exists());
        // Exactly at the cutoff is not strictly older.
        assert!(store.partition_path(date("2024-06-13")).exists());
        assert!(!store.partition_path(date("2024-06-10")).exists());
        assert!(dir.path().join("notes.json").exists());
        assert!(dir.path().join("2024-01-01.bak").exists());
    }

    #[test]
    fn test_query_multiday_newest_first() {
        let (_dir, store) = open_store(30);
        let now = Local::now();

        let mut two_days_ago = result("p1", CheckStatus::Offline);
        two_days_ago.timestamp = now - ChronoDuration::days(2);
        let mut yesterday = result("p1", CheckStatus::Online);
        yesterday.timestamp = now - ChronoDuration::days(1);
        let mut other = result("p2", CheckStatus::Online);
        other.timestamp = now - ChronoDuration::days(1);
        let mut ancient = result("p1", CheckStatus::Online);
        ancient.timestamp = now - ChronoDuration::days(9);

        let write_day = |offset: u64, entries: Vec<HistoryEntry>| {
            write_partition(&store.partition_path(today() - Days::new(offset)), &entries).unwrap();
        };
        write_day(2, vec![HistoryEntry::new(two_days_ago.clone(), ChangeType::Initial, None)]);
        write_day(
            1,
            vec![
                HistoryEntry::new(yesterday.clone(), ChangeType::StatusChange, Some(CheckStatus::Offline)),
                HistoryEntry::new(other, ChangeType::Initial, None),
            ],
        );
        write_day(9, vec![HistoryEntry::new(ancient, ChangeType::Initial, None)]);
        assert_ok!(store.record_change(&result("p1", CheckStatus::Offline), ChangeType::StatusChange, Some(CheckStatus::Online)));

        let merged = store.query_multiday("p1", 7);
        assert_eq!(merged.len(), 3);
        assert!(merged.iter().all(|e| e.probe_id() == "p1"));
        assert!(merged.windows(2).all(|w| w[0].result.timestamp >= w[1].result.timestamp));
        assert_eq!(merged[1].result, yesterday);
        assert_eq!(merged[2].result, two_days_ago);
    }

    #[test]
    fn test_query_multiday_window_capped_by_retention() {
        let (_dir, store) = open_store(30);
        assert_ok!(store.record_change(&result("p1", CheckStatus::Online), ChangeType::Initial, None));

        let mut edge = result("p1", CheckStatus::Offline);
        edge.timestamp = Local::now() - ChronoDuration::days(30);
        write_partition(
            &store.partition_path(today() - Days::new(30)),
            &[HistoryEntry::new(edge, ChangeType::Initial, None)],
        )
        .unwrap();

        let started = std::time::Instant::now();
        let merged = store.query_multiday("p1", u32::MAX);
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_summarize_counts() {
        let (_dir, store) = open_store(30);
        assert_ok!(store.record_change(&result("a", CheckStatus::Offline), ChangeType::Initial, None));
        assert_ok!(store.record_change(&result("a", CheckStatus::Online), ChangeType::StatusChange, Some(CheckStatus::Offline)));
        assert_ok!(store.record_snapshot(vec![HistoryEntry::new(
            result("a", CheckStatus::Online),
            ChangeType::PeriodicSave,
            Some(CheckStatus::Online),
        )]));

        let summary = assert_ok!(store.summarize(None));
        assert_eq!(summary.total_entries, 3);
        assert_eq!(summary.entries_by_type.initial, 1);
        assert_eq!(summary.entries_by_type.status_change, 1);
        assert_eq!(summary.entries_by_type.periodic_save, 1);
        assert_eq!(summary.entries_by_probe["a"].len(), 3);

        assert_eq!(assert_ok!(store.summarize(Some(date("1999-12-31")))).total_entries, 0);
    }

    #[test]
    fn test_malformed_partition_is_an_error() {
        let (_dir, store) = open_store(30);
        let day = date("2024-02-02");
        fs::write(store.partition_path(day), "not json").unwrap();
        assert_err!(store.query(Some(day), None));
    }

    #[test]
    fn test_partition_date_parsing() {
        assert_eq!(partition_date(Path::new("/h/2024-03-09.json")), Some(date("2024-03-09")));
        assert_eq!(partition_date(Path::new("/h/.2024-03-09.json.tmp")), None);
        assert_eq!(partition_date(Path::new("/h/2024-13-40.json")), None);
        assert_eq!(partition_date(Path::new("/h/latest.json")), None);
    }

    #[test]
    fn test_timestamps_survive_round_trip() {
        let (_dir, store) = open_store(30);
        let mut fixed = result("p1", CheckStatus::Online);
        fixed.timestamp = Local.with_ymd_and_hms(2024, 5, 1, 8, 30, 0).unwrap();
        assert_ok!(store.record_change(&fixed, ChangeType::Initial, None));

        let entries = assert_ok!(store.query(None, Some("p1")));
        assert_eq!(entries[0].result.timestamp, fixed.timestamp);
    }
}
