//! Workload engine.
//!
//! A [`TestEngine`] walks a cyclic [`Sequence`] of operations against a
//! [`StoreClient`], one request at a time, until it is cancelled or its
//! circuit breaker trips:
//!
//! ```text
//!   Running ──cancel──▶ Draining ──restore done──▶ Stopped
//!      │                                              ▲
//!      └──────────── >100 consecutive errors ─────────┘
//! ```
//!
//! Draining re-creates every preloaded key the run deleted, so the store ends
//! with the population it started with.

use std::time::Duration;

use bytes::Bytes;
use rand_chacha::ChaCha8Rng;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::client::{RequestOptions, StoreClient};
use crate::config::DriverConfig;
use crate::error::{Result, WorkloadError};
use crate::key::{derive_key, new_dynamic_key};
use crate::operation::{OperationKind, Sequence};
use crate::rate::RateController;
use crate::record_store::{Record, RecordStore};
use crate::stats::Statistics;
use crate::values::ValueGenerator;

/// Consecutive failures tolerated before the run is aborted.
pub const CIRCUIT_BREAKER_THRESHOLD: u32 = 100;

/// Per-engine settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Engine id, used in logs.
    pub id: usize,
    /// Cyclic operation sequence.
    pub sequence: Sequence,
    /// Size of the preloaded key range; 0 selects dynamic mode.
    pub num_keys: u64,
    /// First derived index for reads.
    pub offset_get: u64,
    /// First derived index for deletes.
    pub offset_del: u64,
    /// Target requests per second for fixed-rate pacing (0 = unlimited).
    pub target_rate: u32,
    /// Moving-window report interval.
    pub report_interval: Option<Duration>,
}

impl EngineConfig {
    /// Creates a dynamic-mode configuration with unlimited rate.
    #[must_use]
    pub const fn new(sequence: Sequence) -> Self {
        Self {
            id: 0,
            sequence,
            num_keys: 0,
            offset_get: 0,
            offset_del: 0,
            target_rate: 0,
            report_interval: None,
        }
    }

    /// Targets a preloaded key range.
    #[must_use]
    pub const fn preloaded(mut self, num_keys: u64, offset_get: u64, offset_del: u64) -> Self {
        self.num_keys = num_keys;
        self.offset_get = offset_get;
        self.offset_del = offset_del;
        self
    }

    /// Sets the fixed target rate.
    #[must_use]
    pub const fn target_rate(mut self, rate: u32) -> Self {
        self.target_rate = rate;
        self
    }

    /// Sets the engine id.
    #[must_use]
    pub const fn id(mut self, id: usize) -> Self {
        self.id = id;
        self
    }

    /// Enables periodic moving-window reports.
    #[must_use]
    pub const fn report_interval(mut self, interval: Duration) -> Self {
        self.report_interval = Some(interval);
        self
    }

    /// Derives the configuration of engine `id` out of `engines`.
    ///
    /// A preloaded range is split into contiguous slices whose union is the
    /// whole range, so concurrent engines never delete the same key. The
    /// first `num_keys % engines` engines take one extra key.
    #[must_use]
    pub fn for_engine(config: &DriverConfig, id: usize, engines: usize) -> Self {
        let workload = &config.workload;
        let (num_keys, offset_get, offset_del) = if workload.num_keys == 0 || engines <= 1 {
            (workload.num_keys, workload.offset_get, workload.offset_del)
        } else {
            let (engines, id) = (engines as u64, id as u64);
            let share = workload.num_keys / engines;
            let extra = workload.num_keys % engines;
            let base = share * id + id.min(extra);
            (
                share + u64::from(id < extra),
                workload.offset_get.wrapping_add(base),
                workload.offset_del.wrapping_add(base),
            )
        };
        Self {
            id,
            sequence: workload.sequence.clone(),
            num_keys,
            offset_get,
            offset_del,
            target_rate: config.rate.target,
            report_interval: config.report_interval(),
        }
    }
}

/// Lifecycle state of an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Constructed, not yet running.
    Idle,
    /// Issuing operations.
    Running,
    /// Cancelled; restoring deleted keys.
    Draining,
    /// Terminal.
    Stopped,
}

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The cancellation token fired; restoration ran.
    Cancelled,
    /// Too many consecutive failures; restoration was skipped.
    CircuitBreaker,
}

/// Outcome of a finished run.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Engine id.
    pub engine: usize,
    /// Why the run ended.
    pub stop_reason: StopReason,
    /// Creates issued by the restoration pass.
    pub restore_attempts: u64,
    /// Restoration creates that failed.
    pub restore_failures: u64,
    /// Lifetime statistics, restoration included.
    pub stats: Statistics,
    /// The last, partial moving window.
    pub moving: Statistics,
}

/// Sequential workload engine bound to one store client.
pub struct TestEngine<C, G> {
    config: EngineConfig,
    client: C,
    generator: G,
    rng: ChaCha8Rng,
    store: RecordStore,
    stats: Statistics,
    moving: Statistics,
    rate: RateController,
    consecutive_errors: u32,
    state: EngineState,
    initialized: bool,
}

impl<C: StoreClient, G: ValueGenerator> TestEngine<C, G> {
    /// Creates an engine.
    ///
    /// # Errors
    ///
    /// Returns [`WorkloadError::EmptySequence`] if the sequence would never
    /// issue a request in the configured store mode.
    pub fn new(config: EngineConfig, client: C, generator: G, rng: ChaCha8Rng) -> Result<Self> {
        let store = RecordStore::preloaded(config.num_keys, config.offset_get, config.offset_del);
        if !config.sequence.has_runnable(store.is_preloaded()) {
            return Err(WorkloadError::EmptySequence {
                sequence: config.sequence.to_string(),
            });
        }
        let rate = RateController::fixed(config.target_rate);
        Ok(Self {
            config,
            client,
            generator,
            rng,
            store,
            stats: Statistics::new(),
            moving: Statistics::new(),
            rate,
            consecutive_errors: 0,
            state: EngineState::Idle,
            initialized: false,
        })
    }

    /// Returns the engine configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> EngineState {
        self.state
    }

    /// Returns the record store.
    #[must_use]
    pub const fn store(&self) -> &RecordStore {
        &self.store
    }

    /// Starts the statistics clocks and selects the pacing strategy.
    ///
    /// Called by [`run`](Self::run) if the caller has not done so.
    pub fn initialize(&mut self) {
        if self.initialized {
            return;
        }
        let now = Instant::now();
        self.stats.reset(now);
        self.moving.reset(now);
        self.rate = RateController::for_generator(self.config.target_rate, &mut self.generator);
        self.rate.restart(now);
        self.initialized = true;

        info!(
            engine = self.config.id,
            sequence = %self.config.sequence,
            store = %self.store,
            target_rate = self.rate.target(),
            variable_rate = self.generator.is_variable(),
            "engine initialized"
        );
    }

    /// Runs until `cancel` fires or the circuit breaker trips.
    ///
    /// On cancellation the engine stops issuing new operations, restores every
    /// deleted preloaded key, and only then returns.
    pub async fn run(mut self, cancel: CancellationToken) -> RunReport {
        self.initialize();
        self.state = EngineState::Running;

        let stop_reason = self.drive(&cancel).await;

        let (restore_attempts, restore_failures) = match stop_reason {
            StopReason::Cancelled => {
                self.state = EngineState::Draining;
                self.restore().await
            }
            StopReason::CircuitBreaker => (0, 0),
        };
        self.state = EngineState::Stopped;

        info!(
            engine = self.config.id,
            reason = ?stop_reason,
            requests = self.stats.request_count(),
            errors = self.stats.error_count(),
            restore_attempts,
            restore_failures,
            "engine stopped"
        );

        RunReport {
            engine: self.config.id,
            stop_reason,
            restore_attempts,
            restore_failures,
            stats: self.stats,
            moving: self.moving,
        }
    }

    /// Main loop. Returns only when the run must stop.
    async fn drive(&mut self, cancel: &CancellationToken) -> StopReason {
        let items = self.config.sequence.items().to_vec();
        let preloaded = self.store.is_preloaded();

        loop {
            for item in &items {
                if preloaded && item.kind == OperationKind::Create {
                    continue;
                }
                for _ in 0..item.repeat {
                    if cancel.is_cancelled() {
                        return StopReason::Cancelled;
                    }

                    let op_start = Instant::now();
                    let outcome = self.dispatch(item.kind).await;
                    let elapsed = op_start.elapsed();

                    // Once the delete range is used up, only the delete that
                    // exhausted it is counted.
                    if item.kind == OperationKind::Destroy
                        && self.store.is_delete_exhausted()
                        && !self.store.take_last_delete()
                    {
                        tokio::task::yield_now().await;
                        continue;
                    }

                    self.stats.put(item.kind, elapsed, &outcome);
                    self.moving.put(item.kind, elapsed, &outcome);

                    if let Err(e) = &outcome {
                        error!(engine = self.config.id, kind = %item.kind, error = %e, "operation failed");
                        if preloaded {
                            debug!(engine = self.config.id, store = %self.store, "record store state");
                            self.consecutive_errors += 1;
                            if self.consecutive_errors > CIRCUIT_BREAKER_THRESHOLD {
                                warn!(
                                    engine = self.config.id,
                                    consecutive_errors = self.consecutive_errors,
                                    "too many consecutive errors, aborting run"
                                );
                                return StopReason::CircuitBreaker;
                            }
                        }
                    } else {
                        self.consecutive_errors = 0;
                    }

                    self.maybe_report(op_start);

                    let delay = self
                        .rate
                        .on_request(op_start, &self.stats, &mut self.generator);
                    Self::pause(delay, cancel).await;
                }
            }
        }
    }

    async fn dispatch(&mut self, kind: OperationKind) -> Result<()> {
        match kind {
            OperationKind::Create => self.invoke_create().await,
            OperationKind::Get => self.invoke_get().await,
            OperationKind::Update => self.invoke_update().await,
            OperationKind::Set => self.invoke_set().await,
            OperationKind::Destroy => self.invoke_destroy().await,
        }
    }

    async fn invoke_create(&mut self) -> Result<()> {
        if self.store.is_preloaded() {
            return Ok(());
        }
        let key = new_dynamic_key();
        let payload = self.generator.create_payload();
        let options = RequestOptions::with_ttl(self.generator.ttl());
        let context = self.client.create(key.clone(), payload, options).await?;
        self.store.add(Record::new(key, context));
        Ok(())
    }

    async fn invoke_get(&mut self) -> Result<()> {
        let record = self.store.get(&mut self.rng)?;
        let ttl = if self.generator.disable_get_ttl() {
            0
        } else {
            self.generator.ttl()
        };
        self.client
            .get(record.key, RequestOptions::with_ttl(ttl))
            .await?;
        Ok(())
    }

    async fn invoke_update(&mut self) -> Result<()> {
        let record = self.store.get(&mut self.rng)?;
        let (payload, options) = self.write_args();
        self.client.update(record.key, payload, options).await?;
        Ok(())
    }

    async fn invoke_set(&mut self) -> Result<()> {
        let record = self.store.get(&mut self.rng)?;
        let (payload, options) = self.write_args();
        self.client.set(record.key, payload, options).await?;
        Ok(())
    }

    async fn invoke_destroy(&mut self) -> Result<()> {
        if self.store.is_delete_exhausted() {
            return Ok(());
        }
        let record = self.store.take(&mut self.rng)?;
        self.client.destroy(record.key).await?;
        Ok(())
    }

    fn write_args(&mut self) -> (Bytes, RequestOptions) {
        let payload = self.generator.create_payload();
        (payload, RequestOptions::with_ttl(self.generator.ttl()))
    }

    /// Re-creates every preloaded key deleted during the run.
    ///
    /// Failures are logged and counted; restoration always covers the whole
    /// deleted range.
    async fn restore(&mut self) -> (u64, u64) {
        let count = self.store.next_delete();
        if !self.store.is_preloaded() || count == 0 {
            return (0, 0);
        }

        info!(engine = self.config.id, count, "restoring deleted keys");
        let offset = self.store.offset_del();
        let mut failures = 0;
        for i in 0..count {
            let start = Instant::now();
            let payload = self.generator.create_payload();
            let index = offset.wrapping_add(i);
            let outcome = self
                .client
                .create(derive_key(index), payload, RequestOptions::default())
                .await;
            let elapsed = start.elapsed();

            self.stats.put(OperationKind::Create, elapsed, &outcome);
            self.moving.put(OperationKind::Create, elapsed, &outcome);
            if let Err(e) = &outcome {
                failures += 1;
                error!(engine = self.config.id, index, error = %e, "restore failed");
                debug!(engine = self.config.id, store = %self.store, "record store state");
            }
        }
        (count, failures)
    }

    fn maybe_report(&mut self, now: Instant) {
        let Some(interval) = self.config.report_interval else {
            return;
        };
        if now.saturating_duration_since(self.moving.start_time()) < interval {
            return;
        }
        let window = self.moving.summary();
        info!(
            engine = self.config.id,
            requests = window.requests,
            errors = window.errors,
            throughput = window.throughput,
            "moving window"
        );
        for kind in &window.per_kind {
            debug!(
                engine = self.config.id,
                kind = %kind.kind,
                requests = kind.requests,
                errors = kind.errors,
                p50_ms = kind.latency_p50_ms,
                p99_ms = kind.latency_p99_ms,
                "moving window by kind"
            );
        }
        self.moving.reset(now);
    }

    async fn pause(delay: Duration, cancel: &CancellationToken) {
        if delay.is_zero() {
            tokio::task::yield_now().await;
            return;
        }
        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            () = cancel.cancelled() => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;

    use super::*;
    use crate::client::MemoryStoreClient;
    use crate::values::{RandomValueGenerator, ValueConfig};

    fn engine(config: EngineConfig) -> Result<TestEngine<MemoryStoreClient, RandomValueGenerator>> {
        TestEngine::new(
            config,
            MemoryStoreClient::new(),
            RandomValueGenerator::new(ValueConfig::default(), 1),
            ChaCha8Rng::seed_from_u64(1),
        )
    }

    #[test]
    fn test_preloaded_create_only_sequence_rejected() {
        let config = EngineConfig::new("create:3".parse().unwrap()).preloaded(10, 0, 0);
        assert!(matches!(
            engine(config),
            Err(WorkloadError::EmptySequence { .. })
        ));
    }

    #[test]
    fn test_new_engine_is_idle() {
        let config = EngineConfig::new("create:1,get:1".parse().unwrap());
        let engine = engine(config).unwrap();
        assert_eq!(engine.state(), EngineState::Idle);
        assert!(!engine.store().is_preloaded());
    }

    #[test]
    fn test_for_engine_splits_preloaded_range() {
        let mut driver = DriverConfig::default();
        driver.workload.num_keys = 1_000;
        driver.workload.offset_get = 10;
        driver.workload.offset_del = 5_000;

        let first = EngineConfig::for_engine(&driver, 0, 4);
        let last = EngineConfig::for_engine(&driver, 3, 4);
        assert_eq!(first.num_keys, 250);
        assert_eq!(first.offset_get, 10);
        assert_eq!(first.offset_del, 5_000);
        assert_eq!(last.offset_get, 760);
        assert_eq!(last.offset_del, 5_750);

        let single = EngineConfig::for_engine(&driver, 0, 1);
        assert_eq!(single.num_keys, 1_000);
    }

    #[test]
    fn test_for_engine_slices_cover_range_with_remainder() {
        let mut driver = DriverConfig::default();
        driver.workload.num_keys = 10;
        driver.workload.offset_get = 0;
        driver.workload.offset_del = 100;

        let slices: Vec<EngineConfig> = (0..4)
            .map(|id| EngineConfig::for_engine(&driver, id, 4))
            .collect();
        let sizes: Vec<u64> = slices.iter().map(|c| c.num_keys).collect();
        assert_eq!(sizes, vec![3, 3, 2, 2]);

        let mut next_get = 0;
        let mut next_del = 100;
        for slice in &slices {
            assert_eq!(slice.offset_get, next_get);
            assert_eq!(slice.offset_del, next_del);
            next_get += slice.num_keys;
            next_del += slice.num_keys;
        }
        assert_eq!(next_get, 10);
        assert_eq!(next_del, 110);
    }

    #[test]
    fn test_for_engine_one_key_per_engine() {
        let mut driver = DriverConfig::default();
        driver.workload.num_keys = 4;
        driver.workload.offset_del = 100;

        for id in 0..4 {
            let slice = EngineConfig::for_engine(&driver, id, 4);
            assert_eq!(slice.num_keys, 1);
            assert_eq!(slice.offset_get, id as u64);
            assert_eq!(slice.offset_del, 100 + id as u64);
        }
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let config = EngineConfig::new("get:1".parse().unwrap()).target_rate(50);
        let mut engine = engine(config).unwrap();
        engine.initialize();
        engine.initialize();
        assert_eq!(engine.rate.target(), 50);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_issues_nothing() {
        let config = EngineConfig::new("create:1".parse().unwrap());
        let engine = engine(config).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = engine.run(cancel).await;
        assert_eq!(report.stop_reason, StopReason::Cancelled);
        assert_eq!(report.stats.request_count(), 0);
        assert_eq!(report.restore_attempts, 0);
    }
}
