//! KV Drive Workload: paced load generation for key-value stores
//!
//! Drives a configurable, cyclic mix of create, get, update, set and destroy
//! requests against a key-value store through the [`StoreClient`] trait, while
//! keeping per-operation request, error and latency statistics.
//!
//! # Key modes
//!
//! - **Dynamic**: keys are created during the run and tracked locally, with
//!   their expiry, so reads and deletes only target keys that still exist.
//! - **Preloaded**: keys are derived deterministically from an index range
//!   loaded before the run. Reads are skewed toward recent indices, deletes
//!   walk a bounded range, and every deleted key is re-created on shutdown.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use kvdrive_workload::{build_engines, load_profile, run_engines, MemoryStoreClient};
//! use tokio_util::sync::CancellationToken;
//!
//! let config = load_profile("baseline")?;
//! let client = Arc::new(MemoryStoreClient::new());
//! let engines = build_engines(&config, &client)?;
//!
//! let cancel = CancellationToken::new();
//! let reports = run_engines(engines, cancel.clone()).await;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod client;
mod driver;
mod engine;
mod error;
mod key;
mod operation;
mod rate;
mod record_store;
mod sampler;
mod stats;
mod values;

pub mod config;

pub use client::{
    ClientError, MemoryStoreClient, MemoryStoreCounters, RequestOptions, StoreClient,
    DEFAULT_TTL_SECS,
};
pub use config::{builtin_profiles, list_profiles, load_profile, ConfigError, DriverConfig};
pub use driver::{build_engines, merge_stats, run_engines};
pub use engine::{
    EngineConfig, EngineState, RunReport, StopReason, TestEngine, CIRCUIT_BREAKER_THRESHOLD,
};
pub use error::{Result, WorkloadError};
pub use key::{derive_key, is_dynamic_key, new_dynamic_key, KEY_LEN};
pub use operation::{OperationKind, Sequence, WorkloadItem};
pub use rate::{pacing_delay, RateController, MIN_SAMPLES, RECALIBRATION_INTERVAL};
pub use record_store::{
    unix_now, DynamicRecords, PreloadedRange, Record, RecordContext, RecordStore,
    RecordStoreError, MAX_DELETES,
};
pub use sampler::sample_skewed;
pub use stats::{KindSummary, Statistics, StatsSummary};
pub use values::{
    RandomValueGenerator, SizeDistribution, ThroughputProfile, ValueConfig, ValueGenerator,
    PAYLOAD_SIZE_MAX, PAYLOAD_SIZE_MIN,
};
