//! Run configuration.
//!
//! A run is described by a [`DriverConfig`], loaded from TOML or taken from one
//! of the built-in profiles.
//!
//! # Example
//!
//! ```ignore
//! use kvdrive_workload::config::{load_profile, DriverConfig};
//!
//! // Load a named profile
//! let config = load_profile("read-heavy").unwrap();
//!
//! // Or load from a TOML file
//! let config = DriverConfig::from_file("custom.toml").unwrap();
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::operation::{OperationKind, Sequence, WorkloadItem};
use crate::values::{SizeDistribution, ThroughputProfile, ValueConfig};

/// Upper bound on concurrent engines per process.
pub const MAX_ENGINES: u32 = 1_024;

/// Error type for configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O error reading a config file.
    #[error("failed to read config from {path}: {source}")]
    Io {
        /// File path.
        path: String,
        /// Underlying error.
        source: std::io::Error,
    },
    /// TOML parse error.
    #[error("failed to parse config: {message}")]
    Parse {
        /// Error message.
        message: String,
    },
    /// Profile not found.
    #[error("profile not found: {name}")]
    NotFound {
        /// Profile name.
        name: String,
    },
    /// Unrecognized operation name.
    #[error("unsupported operation type: {name}")]
    UnknownOperation {
        /// The rejected name.
        name: String,
    },
    /// Malformed operation sequence.
    #[error("invalid sequence: {message}")]
    InvalidSequence {
        /// Error message.
        message: String,
    },
    /// A value outside its allowed range.
    #[error("invalid value for {field}: {message}")]
    InvalidValue {
        /// Offending field.
        field: &'static str,
        /// Error message.
        message: String,
    },
}

/// What to issue and against which keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkloadSection {
    /// Size of the preloaded key range; 0 tracks keys created during the run.
    pub num_keys: u64,
    /// First derived index for reads.
    pub offset_get: u64,
    /// First derived index for deletes.
    pub offset_del: u64,
    /// Cyclic operation sequence.
    pub sequence: Sequence,
}

impl Default for WorkloadSection {
    fn default() -> Self {
        Self {
            num_keys: 0,
            offset_get: 0,
            offset_del: 0,
            sequence: Sequence::new(vec![
                WorkloadItem::new(OperationKind::Create, 1),
                WorkloadItem::new(OperationKind::Get, 1),
                WorkloadItem::new(OperationKind::Update, 1),
                WorkloadItem::new(OperationKind::Get, 1),
                WorkloadItem::new(OperationKind::Destroy, 1),
            ]),
        }
    }
}

/// Pacing configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateSection {
    /// Target requests per second per engine (0 = unlimited).
    pub target: u32,
    /// Optional rate schedule; when set, the target is recomputed periodically.
    pub profile: Option<ThroughputProfile>,
}

impl Default for RateSection {
    fn default() -> Self {
        Self {
            target: 1_000,
            profile: None,
        }
    }
}

/// Process-level run settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSection {
    /// Concurrent engines.
    pub engines: u32,
    /// Run length in seconds; 0 runs until interrupted.
    pub duration_secs: u64,
    /// Base seed; engine `i` uses `seed + i`.
    pub seed: u64,
    /// Moving-window report interval in seconds; 0 disables reports.
    pub report_interval_secs: u64,
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            engines: 1,
            duration_secs: 60,
            seed: 0,
            report_interval_secs: 10,
        }
    }
}

/// A complete run configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Profile name.
    pub name: String,
    /// Description of what this run exercises.
    pub description: String,
    /// Operation mix and key range.
    pub workload: WorkloadSection,
    /// Pacing.
    pub rate: RateSection,
    /// Payload and TTL generation.
    pub values: ValueConfig,
    /// Process-level settings.
    pub run: RunSection,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            description: "Mixed create/read/update/delete at 1000 req/s".to_string(),
            workload: WorkloadSection::default(),
            rate: RateSection::default(),
            values: ValueConfig::default(),
            run: RunSection::default(),
        }
    }
}

impl DriverConfig {
    /// Load a configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            source: e,
        })?;
        Self::from_toml(&contents)
    }

    /// Parse a configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML cannot be parsed.
    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml).map_err(|e| ConfigError::Parse {
            message: e.to_string(),
        })
    }

    /// Serialize the configuration to a TOML string.
    #[must_use]
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }

    /// Checks cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns the first violated constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.workload.sequence.has_runnable(self.workload.num_keys > 0) {
            return Err(ConfigError::InvalidSequence {
                message: format!(
                    "'{}' issues no requests with num_keys={}",
                    self.workload.sequence, self.workload.num_keys
                ),
            });
        }
        if self.run.engines == 0 || self.run.engines > MAX_ENGINES {
            return Err(ConfigError::InvalidValue {
                field: "run.engines",
                message: format!("{} not in 1..={MAX_ENGINES}", self.run.engines),
            });
        }
        let workload = &self.workload;
        if workload.num_keys > 0 {
            if u64::from(self.run.engines) > workload.num_keys {
                return Err(ConfigError::InvalidValue {
                    field: "run.engines",
                    message: format!(
                        "{} engines cannot split {} preloaded keys",
                        self.run.engines, workload.num_keys
                    ),
                });
            }
            for (field, offset) in [
                ("workload.offset_get", workload.offset_get),
                ("workload.offset_del", workload.offset_del),
            ] {
                if offset.checked_add(workload.num_keys).is_none() {
                    return Err(ConfigError::InvalidValue {
                        field,
                        message: format!(
                            "{offset} + num_keys {} overflows the key index",
                            workload.num_keys
                        ),
                    });
                }
            }
        }
        if self.values.ttl_min > self.values.ttl_max {
            return Err(ConfigError::InvalidValue {
                field: "values.ttl_min",
                message: format!(
                    "{} exceeds ttl_max {}",
                    self.values.ttl_min, self.values.ttl_max
                ),
            });
        }
        Ok(())
    }

    /// Run length, or `None` to run until interrupted.
    #[must_use]
    pub const fn duration(&self) -> Option<Duration> {
        if self.run.duration_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.run.duration_secs))
        }
    }

    /// Moving-window report interval, or `None` if disabled.
    #[must_use]
    pub const fn report_interval(&self) -> Option<Duration> {
        if self.run.report_interval_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.run.report_interval_secs))
        }
    }
}

fn profile(
    name: &str,
    desc: &str,
    sequence: &str,
    num_keys: u64,
    offset_del: u64,
    target: u32,
    rate_profile: Option<ThroughputProfile>,
) -> DriverConfig {
    DriverConfig {
        name: name.to_string(),
        description: desc.to_string(),
        workload: WorkloadSection {
            // Built-in sequences are literals covered by tests.
            sequence: sequence.parse().unwrap_or_default(),
            num_keys,
            offset_get: 0,
            offset_del,
        },
        rate: RateSection {
            target,
            profile: rate_profile,
        },
        values: ValueConfig {
            payload: SizeDistribution::Uniform { min: 512, max: 4096 },
            ..ValueConfig::default()
        },
        run: RunSection::default(),
    }
}

/// Built-in run profiles for common scenarios.
#[must_use]
#[rustfmt::skip]
pub fn builtin_profiles() -> HashMap<&'static str, DriverConfig> {
    HashMap::from([
        ("baseline", profile("baseline", "Balanced create/read/update/delete cycle", "create:1,get:1,update:1,get:1,destroy:1", 0, 0, 1_000, None)),
        ("read-heavy", profile("read-heavy", "Skewed reads over a preloaded key range", "get:8,set:1,update:1", 100_000, 0, 5_000, None)),
        ("delete-drain", profile("delete-drain", "Deletes across a preloaded range, restored on exit", "get:4,destroy:1", 10_000, 10_000, 500, None)),
        ("ramp", profile("ramp", "Rate ramps from 500 to 5000 req/s in 12s windows", "create:2,get:6,destroy:2", 0, 0, 500, Some(ThroughputProfile::Ramp { from: 500, to: 5_000, step: 500 }))),
    ])
}

/// Load a built-in profile by name.
///
/// # Errors
///
/// Returns an error if the profile name is not found.
pub fn load_profile(name: &str) -> Result<DriverConfig, ConfigError> {
    builtin_profiles()
        .remove(name)
        .ok_or_else(|| ConfigError::NotFound {
            name: name.to_string(),
        })
}

/// List all available built-in profile names.
#[must_use]
pub fn list_profiles() -> Vec<&'static str> {
    let mut names: Vec<_> = builtin_profiles().keys().copied().collect();
    names.sort_unstable();
    names
}
