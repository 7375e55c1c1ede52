//! Pool configuration and environment loading.
//!
//! All options can be loaded from `TIDEPOOL_*` environment variables with
//! sensible defaults. Missing or invalid values fall back to defaults
//! without crashing; hard invariants are enforced by [`PoolConfig::validate`]
//! at pool start.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |---|---|---|
//! | `TIDEPOOL_MIN_WORKERS` | 1 | Lower bound on live workers |
//! | `TIDEPOOL_MAX_WORKERS` | CPU count | Upper bound on live workers |
//! | `TIDEPOOL_BACKLOG_PER_WORKER` | 4 | Backlog divisor for scale-out |
//! | `TIDEPOOL_IDLE_TIMEOUT_MS` | 20000 | Idle time before reclamation |
//! | `TIDEPOOL_WEIGHT_HIGH` | 8 | Base selection weight, high lane |
//! | `TIDEPOOL_WEIGHT_NORMAL` | 3 | Base selection weight, normal lane |
//! | `TIDEPOOL_WEIGHT_LOW` | 1 | Base selection weight, low lane |
//! | `TIDEPOOL_AGING_FACTOR` | 0.1 | Weight boost per second of head age |
//! | `TIDEPOOL_MANAGEMENT_INTERVAL_MS` | 1000 | Autoscaler tick period |

use std::time::Duration;

use thiserror::Error;

use crate::pool::WorkPriority;

/// Base selection weight per priority lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriorityWeights {
    pub high: u32,
    pub normal: u32,
    pub low: u32,
}

impl PriorityWeights {
    /// Weight for one lane.
    pub fn base(&self, priority: WorkPriority) -> u32 {
        match priority {
            WorkPriority::High => self.high,
            WorkPriority::Normal => self.normal,
            WorkPriority::Low => self.low,
        }
    }
}

impl Default for PriorityWeights {
    fn default() -> Self {
        Self {
            high: 8,
            normal: 3,
            low: 1,
        }
    }
}

/// Immutable pool configuration. Validated once at start; never mutated
/// afterwards.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Lower bound on live worker count; always spawned at start.
    pub min_workers: usize,
    /// Upper bound on live worker count; scale-out never exceeds it.
    pub max_workers: usize,
    /// Scale-out divisor: desired workers ≈ ceil(backlog / this).
    pub backlog_per_worker: usize,
    /// A worker idle longer than this may be reclaimed.
    pub idle_timeout: Duration,
    /// Base selection weights.
    pub weights: PriorityWeights,
    /// Additive weight per second of head age for non-empty lanes.
    pub aging_factor: f64,
    /// Period of the autoscaling tick.
    pub management_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_workers: 1,
            max_workers: num_cpus::get().max(1),
            backlog_per_worker: 4,
            idle_timeout: Duration::from_secs(20),
            weights: PriorityWeights::default(),
            aging_factor: 0.1,
            management_interval: Duration::from_secs(1),
        }
    }
}

/// Configuration rejected at pool start.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("worker bounds invalid: min {min}, max {max} (max must be >= max(min, 1))")]
    WorkerBounds { min: usize, max: usize },

    #[error("aging factor must be finite and non-negative, got {0}")]
    AgingFactor(f64),

    #[error("management interval must be positive")]
    ManagementInterval,
}

impl PoolConfig {
    /// Check the hard invariants. Called by `Pool::start`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_workers < self.min_workers.max(1) {
            return Err(ConfigError::WorkerBounds {
                min: self.min_workers,
                max: self.max_workers,
            });
        }
        if !self.aging_factor.is_finite() || self.aging_factor < 0.0 {
            return Err(ConfigError::AgingFactor(self.aging_factor));
        }
        if self.management_interval.is_zero() {
            return Err(ConfigError::ManagementInterval);
        }
        Ok(())
    }

    /// Load configuration from `TIDEPOOL_*` environment variables.
    ///
    /// Missing or unparsable values fall back to defaults; out-of-range
    /// values are floored rather than rejected, so the result always passes
    /// [`validate`](Self::validate) when the defaults do.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let min_workers = parse_usize("TIDEPOOL_MIN_WORKERS", defaults.min_workers);
        let max_workers = parse_usize("TIDEPOOL_MAX_WORKERS", defaults.max_workers)
            .max(min_workers)
            .max(1);
        let backlog_per_worker =
            parse_usize("TIDEPOOL_BACKLOG_PER_WORKER", defaults.backlog_per_worker).max(1);
        let idle_timeout = Duration::from_millis(parse_u64(
            "TIDEPOOL_IDLE_TIMEOUT_MS",
            defaults.idle_timeout.as_millis() as u64,
        ));
        let weights = PriorityWeights {
            high: parse_u32("TIDEPOOL_WEIGHT_HIGH", defaults.weights.high),
            normal: parse_u32("TIDEPOOL_WEIGHT_NORMAL", defaults.weights.normal),
            low: parse_u32("TIDEPOOL_WEIGHT_LOW", defaults.weights.low),
        };
        let aging_factor = parse_f64("TIDEPOOL_AGING_FACTOR", defaults.aging_factor);
        let aging_factor = if aging_factor.is_finite() && aging_factor >= 0.0 {
            aging_factor
        } else {
            defaults.aging_factor
        };
        let management_interval = Duration::from_millis(
            parse_u64(
                "TIDEPOOL_MANAGEMENT_INTERVAL_MS",
                defaults.management_interval.as_millis() as u64,
            )
            .max(1),
        );

        Self {
            min_workers,
            max_workers,
            backlog_per_worker,
            idle_timeout,
            weights,
            aging_factor,
            management_interval,
        }
    }
}

/// Parse a `usize` env var, returning `default` on missing or invalid.
fn parse_usize(key: &str, default: usize) -> usize {
    match std::env::var(key) {
        Ok(val) => val.parse::<usize>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Parse a `u32` env var, returning `default` on missing or invalid.
fn parse_u32(key: &str, default: u32) -> u32 {
    match std::env::var(key) {
        Ok(val) => val.parse::<u32>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Parse a `u64` env var, returning `default` on missing or invalid.
fn parse_u64(key: &str, default: u64) -> u64 {
    match std::env::var(key) {
        Ok(val) => val.parse::<u64>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Parse an `f64` env var, returning `default` on missing or invalid.
fn parse_f64(key: &str, default: f64) -> f64 {
    match std::env::var(key) {
        Ok(val) => val.parse::<f64>().unwrap_or(default),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Serialize env-mutating tests to avoid cross-test pollution.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const ENV_KEYS: &[&str] = &[
        "TIDEPOOL_MIN_WORKERS",
        "TIDEPOOL_MAX_WORKERS",
        "TIDEPOOL_BACKLOG_PER_WORKER",
        "TIDEPOOL_IDLE_TIMEOUT_MS",
        "TIDEPOOL_WEIGHT_HIGH",
        "TIDEPOOL_WEIGHT_NORMAL",
        "TIDEPOOL_WEIGHT_LOW",
        "TIDEPOOL_AGING_FACTOR",
        "TIDEPOOL_MANAGEMENT_INTERVAL_MS",
    ];

    fn clear_env_vars() {
        for k in ENV_KEYS {
            std::env::remove_var(k);
        }
    }

    #[test]
    fn defaults_are_valid_and_sensible() {
        let cfg = PoolConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.min_workers, 1);
        assert!(cfg.max_workers >= 1);
        assert_eq!(cfg.backlog_per_worker, 4);
        assert_eq!(cfg.idle_timeout, Duration::from_secs(20));
        assert_eq!(cfg.weights.base(WorkPriority::High), 8);
        assert_eq!(cfg.weights.base(WorkPriority::Normal), 3);
        assert_eq!(cfg.weights.base(WorkPriority::Low), 1);
        assert_eq!(cfg.management_interval, Duration::from_secs(1));
    }

    #[test]
    fn zero_max_workers_is_rejected() {
        let cfg = PoolConfig {
            min_workers: 0,
            max_workers: 0,
            ..Default::default()
        };
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::WorkerBounds { min: 0, max: 0 })
        );
    }

    #[test]
    fn max_below_min_is_rejected() {
        let cfg = PoolConfig {
            min_workers: 4,
            max_workers: 2,
            ..Default::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::WorkerBounds { min: 4, max: 2 })
        ));
    }

    #[test]
    fn min_zero_with_positive_max_is_valid() {
        let cfg = PoolConfig {
            min_workers: 0,
            max_workers: 1,
            ..Default::default()
        };
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn negative_or_nan_aging_factor_is_rejected() {
        let cfg = PoolConfig {
            aging_factor: -0.5,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::AgingFactor(_))));

        let cfg = PoolConfig {
            aging_factor: f64::NAN,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::AgingFactor(_))));
    }

    #[test]
    fn zero_management_interval_is_rejected() {
        let cfg = PoolConfig {
            management_interval: Duration::ZERO,
            ..Default::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::ManagementInterval));
    }

    #[test]
    fn env_vars_override_defaults() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        std::env::set_var("TIDEPOOL_MIN_WORKERS", "2");
        std::env::set_var("TIDEPOOL_MAX_WORKERS", "16");
        std::env::set_var("TIDEPOOL_BACKLOG_PER_WORKER", "8");
        std::env::set_var("TIDEPOOL_WEIGHT_HIGH", "20");
        std::env::set_var("TIDEPOOL_AGING_FACTOR", "0.5");
        std::env::set_var("TIDEPOOL_MANAGEMENT_INTERVAL_MS", "250");
        let cfg = PoolConfig::from_env();
        assert_eq!(cfg.min_workers, 2);
        assert_eq!(cfg.max_workers, 16);
        assert_eq!(cfg.backlog_per_worker, 8);
        assert_eq!(cfg.weights.high, 20);
        assert!((cfg.aging_factor - 0.5).abs() < f64::EPSILON);
        assert_eq!(cfg.management_interval, Duration::from_millis(250));
        clear_env_vars();
    }

    #[test]
    fn invalid_env_falls_back_to_defaults() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        std::env::set_var("TIDEPOOL_MIN_WORKERS", "not_a_number");
        std::env::set_var("TIDEPOOL_AGING_FACTOR", "-3");
        let cfg = PoolConfig::from_env();
        let defaults = PoolConfig::default();
        assert_eq!(cfg.min_workers, defaults.min_workers);
        assert!((cfg.aging_factor - defaults.aging_factor).abs() < f64::EPSILON);
        clear_env_vars();
    }

    #[test]
    fn env_loading_sanitizes_bounds() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        std::env::set_var("TIDEPOOL_MIN_WORKERS", "8");
        std::env::set_var("TIDEPOOL_MAX_WORKERS", "2");
        std::env::set_var("TIDEPOOL_BACKLOG_PER_WORKER", "0");
        std::env::set_var("TIDEPOOL_MANAGEMENT_INTERVAL_MS", "0");
        let cfg = PoolConfig::from_env();
        assert!(cfg.max_workers >= cfg.min_workers, "max floored to min");
        assert!(cfg.backlog_per_worker >= 1, "divisor must have floor");
        assert!(cfg.validate().is_ok(), "sanitized env config must validate");
        clear_env_vars();
    }
}
