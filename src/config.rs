//! Ledger configuration.
//!
//! Loaded from an optional JSON file, then overridden from the environment.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::Arc;

use crate::clock::{CanonicalClock, ReferenceClock};
use crate::types::{LedgerError, LedgerResult};

pub const ENV_UTC_OFFSET_MINUTES: &str = "FINANCE_LEDGER_UTC_OFFSET_MINUTES";
pub const ENV_MAX_OCCURRENCES: &str = "FINANCE_LEDGER_MAX_OCCURRENCES";

/// Upper bound on occurrences a single expansion produces
pub const DEFAULT_MAX_OCCURRENCES: usize = 1024;

const MAX_OFFSET_MINUTES: i32 = 14 * 60;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Offset east of UTC, in minutes, used to decide what "today" is
    pub utc_offset_minutes: i32,
    pub max_occurrences: usize,
    /// `tracing` filter directive used when no `RUST_LOG` is set
    pub log_filter: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            utc_offset_minutes: 0,
            max_occurrences: DEFAULT_MAX_OCCURRENCES,
            log_filter: "finance_ledger=info".into(),
        }
    }
}

impl LedgerConfig {
    /// Read a JSON config file; a missing file yields the defaults
    pub fn load(path: impl AsRef<Path>) -> LedgerResult<Self> {
        let path = path.as_ref();
        let config = if path.exists() {
            let data = fs::read_to_string(path).map_err(|err| {
                LedgerError::Config(format!("cannot read {}: {}", path.display(), err))
            })?;
            serde_json::from_str(&data).map_err(|err| {
                LedgerError::Config(format!("invalid config {}: {}", path.display(), err))
            })?
        } else {
            tracing::debug!(path = %path.display(), "config file missing, using defaults");
            LedgerConfig::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by environment variables
    pub fn from_env() -> LedgerResult<Self> {
        LedgerConfig::default().with_env_overrides()
    }

    /// Apply `FINANCE_LEDGER_*` environment overrides
    pub fn with_env_overrides(self) -> LedgerResult<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides<F>(mut self, lookup: F) -> LedgerResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_UTC_OFFSET_MINUTES) {
            self.utc_offset_minutes = raw.trim().parse().map_err(|_| {
                LedgerError::Config(format!("{} must be an integer, got '{}'", ENV_UTC_OFFSET_MINUTES, raw))
            })?;
        }
        if let Some(raw) = lookup(ENV_MAX_OCCURRENCES) {
            self.max_occurrences = raw.trim().parse().map_err(|_| {
                LedgerError::Config(format!("{} must be a positive integer, got '{}'", ENV_MAX_OCCURRENCES, raw))
            })?;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> LedgerResult<()> {
        if !(-MAX_OFFSET_MINUTES..=MAX_OFFSET_MINUTES).contains(&self.utc_offset_minutes) {
            return Err(LedgerError::Config(format!(
                "utc_offset_minutes must be within ±{}, got {}",
                MAX_OFFSET_MINUTES, self.utc_offset_minutes
            )));
        }
        if self.max_occurrences == 0 {
            return Err(LedgerError::Config(
                "max_occurrences must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// The canonical clock described by this config
    pub fn clock(&self) -> LedgerResult<Arc<dyn ReferenceClock>> {
        Ok(Arc::new(CanonicalClock::with_offset_minutes(
            self.utc_offset_minutes,
        )?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = LedgerConfig::load(dir.path().join("ledger.json")).unwrap();
        assert_eq!(config, LedgerConfig::default());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        fs::write(&path, r#"{ "utc_offset_minutes": -300 }"#).unwrap();

        let config = LedgerConfig::load(&path).unwrap();
        assert_eq!(config.utc_offset_minutes, -300);
        assert_eq!(config.max_occurrences, DEFAULT_MAX_OCCURRENCES);
    }

    #[test]
    fn test_malformed_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(LedgerConfig::load(&path), Err(LedgerError::Config(_))));
    }

    #[test]
    fn test_overrides_apply_and_validate() {
        let env: HashMap<&str, &str> = [
            (ENV_UTC_OFFSET_MINUTES, "60"),
            (ENV_MAX_OCCURRENCES, "12"),
        ]
        .into_iter()
        .collect();
        let config = LedgerConfig::default()
            .with_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.utc_offset_minutes, 60);
        assert_eq!(config.max_occurrences, 12);

        let bad = LedgerConfig::default()
            .with_overrides(|key| (key == ENV_MAX_OCCURRENCES).then(|| "0".to_string()));
        assert!(matches!(bad, Err(LedgerError::Config(_))));

        let garbage = LedgerConfig::default()
            .with_overrides(|key| (key == ENV_UTC_OFFSET_MINUTES).then(|| "east".to_string()));
        assert!(garbage.is_err());
    }

    #[test]
    fn test_extreme_offsets_are_config_errors() {
        for minutes in [i32::MIN, i32::MAX] {
            let config = LedgerConfig {
                utc_offset_minutes: minutes,
                ..LedgerConfig::default()
            };
            assert!(matches!(config.validate(), Err(LedgerError::Config(_))));
            assert!(matches!(config.clock(), Err(LedgerError::Config(_))));
        }

        let from_env = LedgerConfig::default().with_overrides(|key| {
            (key == ENV_UTC_OFFSET_MINUTES).then(|| i32::MIN.to_string())
        });
        assert!(matches!(from_env, Err(LedgerError::Config(_))));
    }
}
