//! Runtime configuration.
//!
//! Deserialized from a JSON file; every field has a default so a partial (or
//! absent) config file still yields a working setup.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub schedules: Schedules,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schedules {
    #[serde(default)]
    pub sync: IntervalSchedule,
    #[serde(default)]
    pub briefs: CronSchedule,
}

impl Default for Schedules {
    fn default() -> Self {
        Self {
            sync: IntervalSchedule::default(),
            briefs: CronSchedule::default(),
        }
    }
}

/// Fixed-interval trigger (the sync loop).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntervalSchedule {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_sync_interval")]
    pub interval_minutes: u64,
    /// Late fires inside this window still run; older misses skip ahead.
    #[serde(default = "default_sync_grace")]
    pub misfire_grace_secs: u64,
}

impl Default for IntervalSchedule {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_minutes: 30,
            misfire_grace_secs: 300,
        }
    }
}

/// Wall-clock cron trigger (daily brief generation).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CronSchedule {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// 5-field cron expression evaluated in `timezone`.
    #[serde(default = "default_brief_cron")]
    pub cron: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_brief_grace")]
    pub misfire_grace_secs: u64,
}

impl Default for CronSchedule {
    fn default() -> Self {
        Self {
            enabled: true,
            cron: default_brief_cron(),
            timezone: default_timezone(),
            misfire_grace_secs: default_brief_grace(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfig {
    /// Upper bound on concurrent per-user sync tasks within one job firing.
    #[serde(default = "default_max_concurrent_users")]
    pub max_concurrent_users: usize,
    #[serde(default = "default_mail_days_back")]
    pub mail_days_back: i64,
    #[serde(default = "default_calendar_days_back")]
    pub calendar_days_back: i64,
    #[serde(default = "default_calendar_days_forward")]
    pub calendar_days_forward: i64,
    #[serde(default = "default_issue_days_back")]
    pub issue_days_back: i64,
    #[serde(default = "default_chat_days_back")]
    pub chat_days_back: i64,
    #[serde(default = "default_docs_days_back")]
    pub docs_days_back: i64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_concurrent_users: 16,
            mail_days_back: 1,
            calendar_days_back: 1,
            calendar_days_forward: 7,
            issue_days_back: 7,
            chat_days_back: 7,
            docs_days_back: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalConfig {
    /// Minimum cosine similarity for the primary vector-search path.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
    #[serde(default = "default_retrieval_limit")]
    pub default_limit: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.7,
            default_limit: 10,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_sync_interval() -> u64 {
    30
}

fn default_sync_grace() -> u64 {
    300
}

fn default_brief_cron() -> String {
    "0 7 * * *".to_string()
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_brief_grace() -> u64 {
    3_600
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_concurrent_users() -> usize {
    16
}

fn default_mail_days_back() -> i64 {
    1
}

fn default_calendar_days_back() -> i64 {
    1
}

fn default_calendar_days_forward() -> i64 {
    7
}

fn default_issue_days_back() -> i64 {
    7
}

fn default_chat_days_back() -> i64 {
    7
}

fn default_docs_days_back() -> i64 {
    30
}

fn default_similarity_threshold() -> f32 {
    0.7
}

fn default_retrieval_limit() -> usize {
    10
}

impl Config {
    /// Load from a JSON file. A missing file yields defaults; a malformed file
    /// is a hard error so a typo never silently reverts the whole config.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            log::info!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError(format!("failed to read {}: {}", path.display(), e)))?;
        serde_json::from_str(&contents)
            .map_err(|e| ConfigError(format!("failed to parse {}: {}", path.display(), e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.schedules.sync.interval_minutes, 30);
        assert_eq!(config.schedules.briefs.cron, "0 7 * * *");
        assert_eq!(config.retry.max_attempts, 3);
        assert!((config.retrieval.similarity_threshold - 0.7).abs() < f32::EPSILON);
    }

    #[test]
    fn test_partial_config_falls_back_per_field() {
        let config: Config =
            serde_json::from_str(r#"{"retry": {"maxAttempts": 5}}"#).expect("parse");
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_delay_ms, 1_000);
        assert_eq!(config.sync.max_concurrent_users, 16);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = Config::load(&dir.path().join("nope.json")).expect("load");
        assert_eq!(config.schedules.sync.interval_minutes, 30);
    }

    #[test]
    fn test_load_malformed_file_errors() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{not json").expect("write");
        assert!(Config::load(&path).is_err());
    }
}
