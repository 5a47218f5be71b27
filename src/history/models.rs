//! History model types.

use serde::{Deserialize, Serialize};

use crate::probe::{CheckResult, CheckStatus};

/// Written in place of `previous_status` when a probe has no recorded status.
pub const UNKNOWN_STATUS: &str = "unknown";

/// Why a history entry was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Initial,
    StatusChange,
    PeriodicSave,
}

/// A persisted observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(flatten)]
    pub result: CheckResult,
    pub change_type: ChangeType,
    #[serde(with = "previous_status")]
    pub previous_status: Option<CheckStatus>,
}

impl HistoryEntry {
    pub fn new(result: CheckResult, change_type: ChangeType, previous_status: Option<CheckStatus>) -> Self {
        Self {
            result,
            change_type,
            previous_status,
        }
    }

    pub fn probe_id(&self) -> &str {
        &self.result.id
    }
}

/// `None` round-trips as the `"unknown"` sentinel.
pub(crate) mod previous_status {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use super::UNKNOWN_STATUS;
    use crate::probe::CheckStatus;

    pub fn serialize<S: Serializer>(value: &Option<CheckStatus>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(status) => status.serialize(serializer),
            None => serializer.serialize_str(UNKNOWN_STATUS),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<CheckStatus>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        if raw == UNKNOWN_STATUS {
            return Ok(None);
        }
        raw.parse().map(Some).map_err(D::Error::custom)
    }
}
