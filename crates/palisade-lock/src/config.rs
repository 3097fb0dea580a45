//! Lock service configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{LockError, Result};

/// Default journal table name.
pub const DEFAULT_TABLE_NAME: &str = "locks";

/// Default blob container name.
pub const DEFAULT_CONTAINER_NAME: &str = "locks";

/// Default journal lease lifespan, in seconds (24 hours).
pub const DEFAULT_LEASE_EXPIRATION_SECONDS: u64 = 86_400;

/// Default waiter-promotion tick interval, in seconds.
pub const DEFAULT_ACQUIREMENT_INTERVAL_SECONDS: u64 = 5;

/// Configuration for the lock coordinator.
///
/// Loading (files, environment) is a deployment concern; this type only
/// carries the validated values.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockConfig {
    /// Credential for the storage backend. Consumed by backend
    /// constructors; never logged.
    pub storage_connection_string: String,

    /// Journal table name.
    #[serde(default = "default_table_name")]
    pub table_name: String,

    /// Blob container holding one coordination blob per resource UID.
    #[serde(default = "default_container_name")]
    pub container_name: String,

    /// Default lease lifespan applied when the caller does not pass one.
    #[serde(default = "default_lease_expiration")]
    pub lease_default_expiration_seconds: u64,

    /// Interval between waiter-promotion ticks.
    #[serde(default = "default_acquirement_interval")]
    pub lease_acquirement_interval_seconds: u64,
}

fn default_table_name() -> String {
    DEFAULT_TABLE_NAME.to_string()
}

fn default_container_name() -> String {
    DEFAULT_CONTAINER_NAME.to_string()
}

fn default_lease_expiration() -> u64 {
    DEFAULT_LEASE_EXPIRATION_SECONDS
}

fn default_acquirement_interval() -> u64 {
    DEFAULT_ACQUIREMENT_INTERVAL_SECONDS
}

impl std::fmt::Debug for LockConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockConfig")
            .field("storage_connection_string", &"[REDACTED]")
            .field("table_name", &self.table_name)
            .field("container_name", &self.container_name)
            .field(
                "lease_default_expiration_seconds",
                &self.lease_default_expiration_seconds,
            )
            .field(
                "lease_acquirement_interval_seconds",
                &self.lease_acquirement_interval_seconds,
            )
            .finish()
    }
}

impl LockConfig {
    /// Creates a configuration with the given connection string and all
    /// other values at their defaults.
    #[must_use]
    pub fn new(storage_connection_string: impl Into<String>) -> Self {
        Self {
            storage_connection_string: storage_connection_string.into(),
            table_name: default_table_name(),
            container_name: default_container_name(),
            lease_default_expiration_seconds: DEFAULT_LEASE_EXPIRATION_SECONDS,
            lease_acquirement_interval_seconds: DEFAULT_ACQUIREMENT_INTERVAL_SECONDS,
        }
    }

    /// Overrides the journal table name.
    #[must_use]
    pub fn with_table_name(mut self, table_name: impl Into<String>) -> Self {
        self.table_name = table_name.into();
        self
    }

    /// Overrides the blob container name.
    #[must_use]
    pub fn with_container_name(mut self, container_name: impl Into<String>) -> Self {
        self.container_name = container_name.into();
        self
    }

    /// Overrides the default lease lifespan.
    #[must_use]
    pub fn with_lease_expiration_seconds(mut self, seconds: u64) -> Self {
        self.lease_default_expiration_seconds = seconds;
        self
    }

    /// Overrides the waiter-promotion tick interval.
    #[must_use]
    pub fn with_acquirement_interval_seconds(mut self, seconds: u64) -> Self {
        self.lease_acquirement_interval_seconds = seconds;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for empty names or credentials and
    /// `OutOfRange` for non-positive durations.
    pub fn validate(&self) -> Result<()> {
        if self.storage_connection_string.trim().is_empty() {
            return Err(LockError::invalid_argument(
                "storage connection string must not be empty",
            ));
        }
        if self.table_name.trim().is_empty() {
            return Err(LockError::invalid_argument("table name must not be empty"));
        }
        if self.container_name.trim().is_empty() {
            return Err(LockError::invalid_argument(
                "container name must not be empty",
            ));
        }
        if self.lease_default_expiration_seconds == 0 {
            return Err(LockError::out_of_range(
                "lease_default_expiration_seconds must be positive",
            ));
        }
        if self.lease_acquirement_interval_seconds == 0 {
            return Err(LockError::out_of_range(
                "lease_acquirement_interval_seconds must be positive",
            ));
        }
        Ok(())
    }

    /// Default lease lifespan as a duration.
    #[must_use]
    pub fn default_lease_lifespan(&self) -> Duration {
        Duration::from_secs(self.lease_default_expiration_seconds)
    }

    /// Waiter-promotion tick interval as a duration.
    #[must_use]
    pub fn acquirement_interval(&self) -> Duration {
        Duration::from_secs(self.lease_acquirement_interval_seconds)
    }
}
