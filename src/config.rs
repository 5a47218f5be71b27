//! Configuration module for Uptrail.
//!
//! Server settings come from environment variables with sensible defaults;
//! probe definitions come from a JSON file.

use std::collections::HashSet;
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::probe::Probe;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP port for the query API (default: 5000)
    pub http_port: u16,
    /// Probe definition file (default: "config.json")
    pub config_file: PathBuf,
    /// Directory holding the daily history files (default: "history")
    pub history_dir: PathBuf,
    /// Time between probe sweeps (default: 10s)
    pub check_interval: Duration,
    /// Time between periodic history snapshots (default: 60s)
    pub history_interval: Duration,
    /// Days of history kept on disk (default: 30)
    pub retention_days: u32,
    /// Upper bound on the number of probes loaded (default: 100)
    pub max_probes: usize,
    /// Pause after a failed sweep (default: 5s)
    pub error_backoff: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 5000,
            config_file: PathBuf::from("config.json"),
            history_dir: PathBuf::from("history"),
            check_interval: Duration::from_secs(10),
            history_interval: Duration::from_secs(60),
            retention_days: 30,
            max_probes: 100,
            error_backoff: Duration::from_secs(5),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `UPTRAIL_HTTP_PORT`: HTTP port (default: 5000)
    /// - `UPTRAIL_CONFIG_FILE`: probe definition file (default: "config.json")
    /// - `UPTRAIL_HISTORY_DIR`: history directory (default: "history")
    /// - `UPTRAIL_CHECK_INTERVAL`: seconds between sweeps (default: 10)
    /// - `UPTRAIL_HISTORY_INTERVAL`: seconds between snapshots (default: 60)
    /// - `UPTRAIL_RETENTION_DAYS`: days of history to keep (default: 30)
    /// - `UPTRAIL_MAX_PROBES`: probe cap (default: 100)
    /// - `UPTRAIL_ERROR_BACKOFF`: seconds to pause after a failed sweep (default: 5)
    pub fn load() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();

        parse_into(&lookup, "UPTRAIL_HTTP_PORT", &mut cfg.http_port);
        parse_into(&lookup, "UPTRAIL_RETENTION_DAYS", &mut cfg.retention_days);
        parse_into(&lookup, "UPTRAIL_MAX_PROBES", &mut cfg.max_probes);
        seconds_into(&lookup, "UPTRAIL_CHECK_INTERVAL", &mut cfg.check_interval);
        seconds_into(&lookup, "UPTRAIL_HISTORY_INTERVAL", &mut cfg.history_interval);
        seconds_into(&lookup, "UPTRAIL_ERROR_BACKOFF", &mut cfg.error_backoff);

        if let Some(path) = lookup("UPTRAIL_CONFIG_FILE") {
            cfg.config_file = PathBuf::from(path);
        }
        if let Some(path) = lookup("UPTRAIL_HISTORY_DIR") {
            cfg.history_dir = PathBuf::from(path);
        }

        cfg
    }
}

fn parse_into<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T) {
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse() {
        Ok(value) => *slot = value,
        Err(_) => tracing::warn!("Ignoring invalid {}={:?}, keeping the default", key, raw),
    }
}

fn seconds_into(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut Duration) {
    let Some(raw) = lookup(key) else {
        return;
    };
    let parsed = raw
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|secs| *secs > 0.0)
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok());
    match parsed {
        Some(duration) => *slot = duration,
        None => tracing::warn!("Ignoring invalid {}={:?}, keeping the default", key, raw),
    }
}

/// Probe file errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read probe file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed probe file: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Deserialize)]
struct ProbeFile {
    #[serde(default)]
    probes: Vec<serde_json::Value>,
}

const PROBE_TYPES: [&str; 3] = ["ping", "http", "tcp"];

/// Read and validate the probe definition file.
pub fn load_probes(path: &Path, max_probes: usize) -> Result<Vec<Probe>, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let probes = parse_probes(&raw, max_probes)?;
    tracing::info!("Loaded {} probes from {}", probes.len(), path.display());
    Ok(probes)
}

/// Parse a probe document. Invalid or duplicate entries are skipped with a
/// warning; the survivors are capped at `max_probes` in file order.
pub fn parse_probes(raw: &str, max_probes: usize) -> Result<Vec<Probe>, ConfigError> {
    let file: ProbeFile = serde_json::from_str(raw)?;
    let mut seen = HashSet::new();
    let mut probes = Vec::with_capacity(file.probes.len().min(max_probes));

    for (index, value) in file.probes.into_iter().enumerate() {
        let kind = value.get("type").and_then(|t| t.as_str()).unwrap_or_default();
        if !PROBE_TYPES.contains(&kind) {
            tracing::warn!("Skipping probe #{}: unsupported probe type {:?}", index, kind);
            continue;
        }

        let probe: Probe = match serde_json::from_value(value) {
            Ok(probe) => probe,
            Err(e) => {
                tracing::warn!("Skipping probe #{}: {}", index, e);
                continue;
            }
        };

        if !probe.has_valid_timeout() {
            tracing::warn!(
                "Probe {:?}: ignoring invalid timeout {:?}, using {:?}",
                probe.id,
                probe.timeout,
                probe.timeout()
            );
        }

        if !seen.insert(probe.id.clone()) {
            tracing::warn!("Skipping probe #{}: duplicate id {:?}", index, probe.id);
            continue;
        }
        probes.push(probe);
    }

    if probes.len() > max_probes {
        tracing::warn!("Probe count limited to {} (found {})", max_probes, probes.len());
        probes.truncate(max_probes);
    }

    Ok(probes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::ProbeKind;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.http_port, 5000);
        assert_eq!(cfg.check_interval, Duration::from_secs(10));
        assert_eq!(cfg.history_interval, Duration::from_secs(60));
        assert_eq!(cfg.retention_days, 30);
        assert_eq!(cfg.max_probes, 100);
        assert_eq!(cfg.error_backoff, Duration::from_secs(5));
    }

    #[test]
    fn test_config_from_environment() {
        let vars: HashMap<&str, &str> = [
            ("UPTRAIL_HTTP_PORT", "8081"),
            ("UPTRAIL_CHECK_INTERVAL", "2.5"),
            ("UPTRAIL_HISTORY_DIR", "/var/lib/uptrail"),
            ("UPTRAIL_RETENTION_DAYS", "nope"),
            ("UPTRAIL_HISTORY_INTERVAL", "-1"),
            ("UPTRAIL_ERROR_BACKOFF", "1e20"),
        ]
        .into_iter()
        .collect();

        let cfg = ServerConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string()));
        assert_eq!(cfg.http_port, 8081);
        assert_eq!(cfg.check_interval, Duration::from_millis(2500));
        assert_eq!(cfg.history_dir, PathBuf::from("/var/lib/uptrail"));
        // Invalid values keep the defaults.
        assert_eq!(cfg.retention_days, 30);
        assert_eq!(cfg.history_interval, Duration::from_secs(60));
        assert_eq!(cfg.error_backoff, Duration::from_secs(5));
    }

    #[test]
    fn test_oversized_interval_keeps_default() {
        let cfg = ServerConfig::from_lookup(|key| (key == "UPTRAIL_CHECK_INTERVAL").then(|| "1e20".to_string()));
        assert_eq!(cfg.check_interval, Duration::from_secs(10));
    }

    #[test]
    fn test_parse_probes_keeps_probe_with_oversized_timeout() {
        let raw = r#"{"probes": [
            {"id": "ssh", "name": "SSH", "type": "tcp", "target": "10.0.0.2", "port": 22, "timeout": 1e20}
        ]}"#;

        let probes = parse_probes(raw, 10).unwrap();
        assert_eq!(probes.len(), 1);
        assert_eq!(probes[0].timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_parse_probes() {
        let raw = r#"{"probes": [
            {"id": "gw", "name": "Gateway", "type": "ping", "target": "192.168.1.1", "threshold": 50},
            {"id": "site", "name": "Site", "type": "http", "target": "https://example.com"},
            {"id": "ssh", "name": "SSH", "type": "tcp", "target": "10.0.0.2", "port": 22, "timeout": 2}
        ]}"#;

        let probes = parse_probes(raw, 100).unwrap();
        assert_eq!(probes.len(), 3);
        assert_eq!(probes[0].kind, ProbeKind::Ping { threshold: 50.0 });
        assert_eq!(probes[1].kind, ProbeKind::Http { expected_status: 200 });
        assert_eq!(probes[2].kind, ProbeKind::Tcp { port: 22 });
        assert_eq!(probes[2].timeout(), Duration::from_secs(2));
    }

    #[test]
    fn test_parse_probes_skips_invalid_entries() {
        let raw = r#"{"probes": [
            {"id": "a", "name": "A", "type": "ping", "target": "10.0.0.1"},
            {"id": "b", "name": "B", "type": "dns", "target": "1.1.1.1"},
            {"id": "c", "name": "C", "type": "tcp", "target": "10.0.0.3"},
            {"id": "a", "name": "A again", "type": "ping", "target": "10.0.0.9"},
            {"id": "d", "name": "D", "type": "http", "target": "http://d.local"}
        ]}"#;

        let probes = parse_probes(raw, 100).unwrap();
        let ids: Vec<_> = probes.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, ["a", "d"]);
        assert_eq!(probes[0].target, "10.0.0.1");
    }

    #[test]
    fn test_parse_probes_caps_in_file_order() {
        let entries: Vec<String> = (0..5)
            .map(|i| format!(r#"{{"id": "p{i}", "name": "P{i}", "type": "ping", "target": "10.0.0.{i}"}}"#))
            .collect();
        let raw = format!(r#"{{"probes": [{}]}}"#, entries.join(","));

        let probes = parse_probes(&raw, 3).unwrap();
        let ids: Vec<_> = probes.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, ["p0", "p1", "p2"]);
    }

    #[test]
    fn test_parse_probes_without_list() {
        assert!(parse_probes("{}", 10).unwrap().is_empty());
        assert!(matches!(parse_probes("[oops", 10), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_load_probes_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"probes": [{{"id": "gw", "name": "Gateway", "type": "ping", "target": "10.0.0.1"}}]}}"#).unwrap();

        let probes = load_probes(file.path(), 10).unwrap();
        assert_eq!(probes.len(), 1);

        let missing = load_probes(Path::new("/definitely/not/here.json"), 10);
        assert!(matches!(missing, Err(ConfigError::Read { .. })));
    }
}
