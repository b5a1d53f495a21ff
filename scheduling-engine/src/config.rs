use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Result, SchedulingError};
use crate::transaction::TransactionPolicy;

/// Environment variables override file values, e.g.
/// `SCHEDULING__TRANSACTION__MAX_RETRIES=5`.
pub const ENV_PREFIX: &str = "SCHEDULING";

/// Upper bound for `default_horizon_days` (ten years)
pub const MAX_HORIZON_DAYS: i64 = 3660;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulingConfig {
    pub transaction: TransactionPolicy,
    /// Horizon of a recurring series created without an end date
    pub default_horizon_days: i64,
    /// Bulk-insert recurring instances without checking each against existing bookings
    pub skip_conflict_check_for_series: bool,
    /// Budget for notification and video-meeting calls
    pub collaborator_timeout_ms: u64,
    pub notification_cache_ttl_secs: u64,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            transaction: TransactionPolicy::default(),
            default_horizon_days: 365,
            skip_conflict_check_for_series: true,
            collaborator_timeout_ms: 2000,
            notification_cache_ttl_secs: 30,
        }
    }
}

impl SchedulingConfig {
    /// Load from an optional file plus `SCHEDULING__*` environment variables
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path).required(true));
        }
        builder = builder.add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let loaded: Self = builder.build()?.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    pub fn from_toml(source: &str) -> Result<Self> {
        let loaded: Self = ::config::Config::builder()
            .add_source(::config::File::from_str(source, ::config::FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_horizon_days <= 0 {
            return Err(SchedulingError::Config(
                "default_horizon_days must be positive".to_string(),
            ));
        }
        if self.default_horizon_days > MAX_HORIZON_DAYS {
            return Err(SchedulingError::Config(format!(
                "default_horizon_days must not exceed {}",
                MAX_HORIZON_DAYS
            )));
        }
        if self.transaction.timeout_ms == 0 {
            return Err(SchedulingError::Config(
                "transaction.timeout_ms must be positive".to_string(),
            ));
        }
        if self.transaction.max_delay_ms < self.transaction.base_delay_ms {
            return Err(SchedulingError::Config(
                "transaction.max_delay_ms must not be below base_delay_ms".to_string(),
            ));
        }
        Ok(())
    }

    pub fn collaborator_timeout(&self) -> Duration {
        Duration::from_millis(self.collaborator_timeout_ms)
    }

    pub fn notification_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.notification_cache_ttl_secs)
    }
}
