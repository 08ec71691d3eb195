//! Payload, TTL and throughput generation.
//!
//! The engine asks a [`ValueGenerator`] for everything that is not a key: the
//! bytes to write, the TTL to request and, in variable-rate mode, the next
//! target throughput.

use bytes::Bytes;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Minimum payload size.
pub const PAYLOAD_SIZE_MIN: usize = 1;

/// Maximum payload size (200KB).
pub const PAYLOAD_SIZE_MAX: usize = 200 * 1024;

/// Source of payloads, TTLs and target rates.
pub trait ValueGenerator: Send {
    /// Returns a payload for a write.
    fn create_payload(&mut self) -> Bytes;

    /// Returns the TTL in seconds to request.
    fn ttl(&mut self) -> u32;

    /// If true, reads carry no TTL.
    fn disable_get_ttl(&self) -> bool;

    /// If true, the target rate is recomputed periodically via [`throughput`](Self::throughput).
    fn is_variable(&self) -> bool;

    /// Returns the next target rate in requests per second (0 = unlimited).
    fn throughput(&mut self) -> u32;
}

/// Distribution for payload sizes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SizeDistribution {
    /// Fixed size for all payloads.
    Fixed {
        /// Size in bytes.
        size: usize,
    },
    /// Uniform distribution between min and max.
    Uniform {
        /// Minimum size.
        min: usize,
        /// Maximum size.
        max: usize,
    },
    /// Bimodal distribution (small and large payloads).
    Bimodal {
        /// Size of small payloads.
        small: usize,
        /// Size of large payloads.
        large: usize,
        /// Probability of a large payload (0.0 to 1.0).
        large_ratio: f64,
    },
}

impl SizeDistribution {
    /// Samples a size from the distribution, clamped to the payload limits.
    #[must_use]
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> usize {
        let size = match self {
            Self::Fixed { size } => *size,
            Self::Uniform { min, max } => {
                if min >= max {
                    *min
                } else {
                    rng.gen_range(*min..=*max)
                }
            }
            Self::Bimodal {
                small,
                large,
                large_ratio,
            } => {
                if rng.gen::<f64>() < *large_ratio {
                    *large
                } else {
                    *small
                }
            }
        };
        size.clamp(PAYLOAD_SIZE_MIN, PAYLOAD_SIZE_MAX)
    }
}

impl Default for SizeDistribution {
    fn default() -> Self {
        Self::Fixed { size: 2048 }
    }
}

/// Schedule of target rates for variable-rate runs.
///
/// Each call to [`ThroughputProfile::next_rate`] yields the rate for the next
/// recalibration window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "pattern", rename_all = "snake_case")]
pub enum ThroughputProfile {
    /// Same rate every window.
    Constant {
        /// Requests per second.
        rate: u32,
    },
    /// Linear ramp from `from` to `to`, then wraps around.
    Ramp {
        /// First window's rate.
        from: u32,
        /// Last window's rate.
        to: u32,
        /// Increment per window.
        step: u32,
    },
    /// Uniformly random rate per window.
    Random {
        /// Lower bound.
        min: u32,
        /// Upper bound.
        max: u32,
    },
    /// Alternates `burst_windows` windows at `burst_rate` after each
    /// `base_windows` windows at `base_rate`.
    Burst {
        /// Rate outside bursts.
        base_rate: u32,
        /// Rate inside bursts.
        burst_rate: u32,
        /// Windows at base rate per cycle.
        base_windows: u32,
        /// Windows at burst rate per cycle.
        burst_windows: u32,
    },
}

impl ThroughputProfile {
    /// Returns the rate for window number `window`.
    pub fn next_rate<R: Rng + ?Sized>(&self, rng: &mut R, window: u64) -> u32 {
        match self {
            Self::Constant { rate } => *rate,
            Self::Ramp { from, to, step } => {
                let span = u64::from(to.saturating_sub(*from));
                let step = u64::from((*step).max(1));
                let steps = span / step + 1;
                let offset = (window % steps) * step;
                u32::try_from(u64::from(*from) + offset).unwrap_or(*to)
            }
            Self::Random { min, max } => {
                if min >= max {
                    *min
                } else {
                    rng.gen_range(*min..=*max)
                }
            }
            Self::Burst {
                base_rate,
                burst_rate,
                base_windows,
                burst_windows,
            } => {
                let cycle = u64::from(*base_windows) + u64::from(*burst_windows);
                if cycle == 0 || window % cycle < u64::from(*base_windows) {
                    *base_rate
                } else {
                    *burst_rate
                }
            }
        }
    }
}

impl Default for ThroughputProfile {
    fn default() -> Self {
        Self::Constant { rate: 1_000 }
    }
}

/// Settings for [`RandomValueGenerator`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValueConfig {
    /// Minimum TTL in seconds.
    pub ttl_min: u32,
    /// Maximum TTL in seconds.
    pub ttl_max: u32,
    /// Reads carry no TTL.
    pub disable_get_ttl: bool,
    /// Payload size distribution.
    pub payload: SizeDistribution,
}

impl Default for ValueConfig {
    fn default() -> Self {
        Self {
            ttl_min: 1_800,
            ttl_max: 1_800,
            disable_get_ttl: false,
            payload: SizeDistribution::default(),
        }
    }
}

/// Seeded generator of random payloads and TTLs.
#[derive(Debug)]
pub struct RandomValueGenerator {
    config: ValueConfig,
    profile: Option<ThroughputProfile>,
    rng: ChaCha8Rng,
    window: u64,
}

impl RandomValueGenerator {
    /// Creates a fixed-rate generator.
    #[must_use]
    pub fn new(config: ValueConfig, seed: u64) -> Self {
        Self {
            config,
            profile: None,
            rng: ChaCha8Rng::seed_from_u64(seed),
            window: 0,
        }
    }

    /// Switches the generator to variable rate, driven by `profile`.
    #[must_use]
    pub fn with_throughput_profile(mut self, profile: ThroughputProfile) -> Self {
        self.profile = Some(profile);
        self
    }
}

impl ValueGenerator for RandomValueGenerator {
    fn create_payload(&mut self) -> Bytes {
        let size = self.config.payload.sample(&mut self.rng);
        let mut data = vec![0u8; size];
        self.rng.fill(&mut data[..]);
        Bytes::from(data)
    }

    fn ttl(&mut self) -> u32 {
        let (min, max) = (self.config.ttl_min, self.config.ttl_max);
        if min >= max {
            min
        } else {
            self.rng.gen_range(min..=max)
        }
    }

    fn disable_get_ttl(&self) -> bool {
        self.config.disable_get_ttl
    }

    fn is_variable(&self) -> bool {
        self.profile.is_some()
    }

    fn throughput(&mut self) -> u32 {
        let Some(profile) = &self.profile else {
            return 0;
        };
        let rate = profile.next_rate(&mut self.rng, self.window);
        self.window += 1;
        rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_distribution_bounds() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let uniform = SizeDistribution::Uniform { min: 10, max: 20 };
        for _ in 0..500 {
            let size = uniform.sample(&mut rng);
            assert!((10..=20).contains(&size));
        }
        assert_eq!(SizeDistribution::Fixed { size: 0 }.sample(&mut rng), 1);
        assert_eq!(
            SizeDistribution::Fixed { size: usize::MAX }.sample(&mut rng),
            PAYLOAD_SIZE_MAX
        );
    }

    #[test]
    fn test_payload_deterministic_per_seed() {
        let config = ValueConfig {
            payload: SizeDistribution::Uniform { min: 8, max: 64 },
            ..ValueConfig::default()
        };
        let mut a = RandomValueGenerator::new(config.clone(), 5);
        let mut b = RandomValueGenerator::new(config, 5);
        for _ in 0..10 {
            assert_eq!(a.create_payload(), b.create_payload());
        }
    }

    #[test]
    fn test_ttl_range() {
        let config = ValueConfig {
            ttl_min: 60,
            ttl_max: 120,
            ..ValueConfig::default()
        };
        let mut generator = RandomValueGenerator::new(config, 9);
        for _ in 0..200 {
            assert!((60..=120).contains(&generator.ttl()));
        }
    }

    #[test]
    fn test_fixed_generator_not_variable() {
        let mut generator = RandomValueGenerator::new(ValueConfig::default(), 0);
        assert!(!generator.is_variable());
        assert_eq!(generator.throughput(), 0);
    }

    #[test]
    fn test_ramp_profile_wraps() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let ramp = ThroughputProfile::Ramp {
            from: 100,
            to: 300,
            step: 100,
        };
        let rates: Vec<u32> = (0..5).map(|w| ramp.next_rate(&mut rng, w)).collect();
        assert_eq!(rates, vec![100, 200, 300, 100, 200]);
    }

    #[test]
    fn test_burst_profile() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let burst = ThroughputProfile::Burst {
            base_rate: 50,
            burst_rate: 500,
            base_windows: 2,
            burst_windows: 1,
        };
        let rates: Vec<u32> = (0..6).map(|w| burst.next_rate(&mut rng, w)).collect();
        assert_eq!(rates, vec![50, 50, 500, 50, 50, 500]);
    }

    #[test]
    fn test_variable_generator_advances_windows() {
        let mut generator = RandomValueGenerator::new(ValueConfig::default(), 0)
            .with_throughput_profile(ThroughputProfile::Ramp {
                from: 10,
                to: 30,
                step: 10,
            });
        assert!(generator.is_variable());
        assert_eq!(generator.throughput(), 10);
        assert_eq!(generator.throughput(), 20);
        assert_eq!(generator.throughput(), 30);
    }
}
