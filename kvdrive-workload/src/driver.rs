//! Multi-engine driver.
//!
//! Builds one [`TestEngine`] per configured engine around a shared client and
//! runs them concurrently under a single cancellation token.

use std::sync::Arc;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::client::StoreClient;
use crate::config::DriverConfig;
use crate::engine::{EngineConfig, RunReport, TestEngine};
use crate::error::Result;
use crate::stats::Statistics;
use crate::values::{RandomValueGenerator, ValueGenerator};

/// Mixed into the engine seed so payload and key-selection streams differ.
const VALUE_SEED_SALT: u64 = 0x9e37_79b9_7f4a_7c15;

/// Builds the engines described by `config`, all sharing `client`.
///
/// Engine `i` is seeded with `config.run.seed + i`.
///
/// # Errors
///
/// Returns an error if the configuration is invalid.
pub fn build_engines<C: StoreClient>(
    config: &DriverConfig,
    client: &Arc<C>,
) -> Result<Vec<TestEngine<Arc<C>, RandomValueGenerator>>> {
    config.validate()?;
    let engines = config.run.engines as usize;
    (0..engines)
        .map(|id| {
            let seed = config.run.seed.wrapping_add(id as u64);
            let mut generator = RandomValueGenerator::new(config.values.clone(), seed ^ VALUE_SEED_SALT);
            if let Some(profile) = &config.rate.profile {
                generator = generator.with_throughput_profile(profile.clone());
            }
            TestEngine::new(
                EngineConfig::for_engine(config, id, engines),
                Arc::clone(client),
                generator,
                ChaCha8Rng::seed_from_u64(seed),
            )
        })
        .collect()
}

/// Runs `engines` concurrently until `cancel` fires or each one stops.
///
/// Returns the reports ordered by engine id. An engine task that panics is
/// logged and left out.
pub async fn run_engines<C, G>(
    engines: Vec<TestEngine<C, G>>,
    cancel: CancellationToken,
) -> Vec<RunReport>
where
    C: StoreClient + 'static,
    G: ValueGenerator + 'static,
{
    let count = engines.len();
    info!(engines = count, "starting engines");

    let mut tasks = JoinSet::new();
    for engine in engines {
        tasks.spawn(engine.run(cancel.clone()));
    }

    let mut reports = Vec::with_capacity(count);
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(report) => reports.push(report),
            Err(e) => error!(error = %e, "engine task failed"),
        }
    }
    reports.sort_by_key(|r| r.engine);
    reports
}

/// Merges the lifetime statistics of every report.
#[must_use]
pub fn merge_stats(reports: &[RunReport]) -> Statistics {
    let mut merged = Statistics::new();
    if let Some(start) = reports.iter().map(|r| r.stats.start_time()).min() {
        merged.reset(start);
    }
    for report in reports {
        merged.merge(&report.stats);
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MemoryStoreClient;
    use crate::config::load_profile;
    use crate::error::WorkloadError;

    #[test]
    fn test_build_engines_partitions_range() {
        let mut config = load_profile("delete-drain").unwrap();
        config.run.engines = 4;
        let client = Arc::new(MemoryStoreClient::new());

        let engines = build_engines(&config, &client).unwrap();
        assert_eq!(engines.len(), 4);
        for (i, engine) in engines.iter().enumerate() {
            assert_eq!(engine.config().id, i);
            assert_eq!(engine.config().num_keys, 2_500);
            assert_eq!(engine.config().offset_get, 2_500 * i as u64);
            assert_eq!(engine.config().offset_del, 10_000 + 2_500 * i as u64);
        }
    }

    #[test]
    fn test_build_engines_covers_uneven_range() {
        let mut config = load_profile("delete-drain").unwrap();
        config.workload.num_keys = 10;
        config.workload.offset_del = 10;
        config.run.engines = 4;
        let client = Arc::new(MemoryStoreClient::new());

        let engines = build_engines(&config, &client).unwrap();
        let mut covered = Vec::new();
        for engine in &engines {
            let slice = engine.config();
            assert!(slice.num_keys > 0);
            covered.extend(slice.offset_del..slice.offset_del + slice.num_keys);
        }
        assert_eq!(covered, (10..20).collect::<Vec<u64>>());

        config.run.engines = 11;
        assert!(matches!(
            build_engines(&config, &client),
            Err(WorkloadError::Config(_))
        ));
    }

    #[test]
    fn test_build_engines_rejects_invalid_config() {
        let mut config = DriverConfig::default();
        config.run.engines = 0;
        let client = Arc::new(MemoryStoreClient::new());
        assert!(matches!(
            build_engines(&config, &client),
            Err(WorkloadError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_run_engines_empty() {
        let engines: Vec<TestEngine<Arc<MemoryStoreClient>, RandomValueGenerator>> = Vec::new();
        let reports = run_engines(engines, CancellationToken::new()).await;
        assert!(reports.is_empty());
        assert_eq!(merge_stats(&reports).request_count(), 0);
    }
}
