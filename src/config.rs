//! Tunables for lock acquisition, lease lifetime and the task pool.
//!
//! Every struct deserializes with defaults, so a config file only has to name
//! the values it changes. Durations are expressed in milliseconds.

use crate::error::{LockError, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::time::Duration;

/// Attempts made by a single acquisition before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(60);
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(50);
const DEFAULT_BACKOFF_MAX: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    pub retry: RetryPolicy,
    /// How long a granted lease stays valid if its holder never releases it.
    #[serde(rename = "lease_ttl_ms", with = "duration_ms")]
    pub lease_ttl: Duration,
    pub pool: PoolConfig,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            lease_ttl: DEFAULT_LEASE_TTL,
            pool: PoolConfig::default(),
        }
    }
}

impl GuardConfig {
    /// Reads a JSON config document and validates it.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let config: Self = serde_json::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            return Err(LockError::InvalidConfig(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.lease_ttl.is_zero() {
            return Err(LockError::InvalidConfig(
                "lease_ttl_ms must be positive".to_string(),
            ));
        }
        if self.pool.max_workers == 0 {
            return Err(LockError::InvalidConfig(
                "pool.max_workers must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: Backoff::default(),
        }
    }
}

impl RetryPolicy {
    /// A policy that retries immediately, with no pause between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::None,
        }
    }
}

/// Pause inserted between two failed acquisition attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backoff {
    None,
    Fixed {
        #[serde(rename = "delay_ms", with = "duration_ms")]
        delay: Duration,
    },
    /// Doubles from `base` up to `max`. With `jitter`, the actual pause is
    /// drawn uniformly from zero to the computed delay.
    Exponential {
        #[serde(rename = "base_ms", with = "duration_ms")]
        base: Duration,
        #[serde(rename = "max_ms", with = "duration_ms")]
        max: Duration,
        #[serde(default)]
        jitter: bool,
    },
}

impl Default for Backoff {
    fn default() -> Self {
        Self::Exponential {
            base: DEFAULT_BACKOFF_BASE,
            max: DEFAULT_BACKOFF_MAX,
            jitter: true,
        }
    }
}

impl Backoff {
    /// Delay to wait after the given failed attempt (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        match self {
            Self::None => Duration::ZERO,
            Self::Fixed { delay } => *delay,
            Self::Exponential { base, max, jitter } => {
                let shift = attempt.saturating_sub(1).min(16);
                let ceiling = base.saturating_mul(1 << shift).min(*max);
                if *jitter && !ceiling.is_zero() {
                    let millis = ceiling.as_millis() as u64;
                    Duration::from_millis(rand::thread_rng().gen_range(0..=millis))
                } else {
                    ceiling
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Tasks allowed to run at the same time.
    pub max_workers: usize,
    /// Tasks allowed to wait for a worker before submissions are rejected.
    pub queue_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl PoolConfig {
    pub fn capacity(&self) -> usize {
        self.max_workers + self.queue_capacity
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GuardConfig::default();
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.lease_ttl, DEFAULT_LEASE_TTL);
        assert!(config.pool.max_workers >= 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_document_keeps_defaults() {
        let json = r#"{ "retry": { "max_attempts": 3, "backoff": { "kind": "none" } } }"#;
        let config = GuardConfig::from_reader(json.as_bytes()).unwrap();
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.backoff, Backoff::None);
        assert_eq!(config.lease_ttl, DEFAULT_LEASE_TTL);
        assert_eq!(config.pool.queue_capacity, DEFAULT_QUEUE_CAPACITY);
    }

    #[test]
    fn test_durations_in_millis() {
        let json = r#"{
            "lease_ttl_ms": 1500,
            "retry": { "backoff": { "kind": "fixed", "delay_ms": 20 } }
        }"#;
        let config = GuardConfig::from_reader(json.as_bytes()).unwrap();
        assert_eq!(config.lease_ttl, Duration::from_millis(1500));
        assert_eq!(
            config.retry.backoff.delay(4),
            Duration::from_millis(20)
        );
    }

    #[test]
    fn test_validation_rejects_zero_attempts() {
        let json = r#"{ "retry": { "max_attempts": 0 } }"#;
        assert!(matches!(
            GuardConfig::from_reader(json.as_bytes()),
            Err(LockError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_validation_rejects_zero_workers_and_ttl() {
        let mut config = GuardConfig::default();
        config.pool.max_workers = 0;
        assert!(config.validate().is_err());

        let mut config = GuardConfig::default();
        config.lease_ttl = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_exponential_backoff_is_capped() {
        let backoff = Backoff::Exponential {
            base: Duration::from_millis(10),
            max: Duration::from_millis(35),
            jitter: false,
        };
        assert_eq!(backoff.delay(1), Duration::from_millis(10));
        assert_eq!(backoff.delay(2), Duration::from_millis(20));
        assert_eq!(backoff.delay(3), Duration::from_millis(35));
        assert_eq!(backoff.delay(40), Duration::from_millis(35));
    }

    #[test]
    fn test_jitter_stays_below_ceiling() {
        let backoff = Backoff::Exponential {
            base: Duration::from_millis(8),
            max: Duration::from_millis(100),
            jitter: true,
        };
        for attempt in 1..=6 {
            assert!(backoff.delay(attempt) <= Duration::from_millis(100));
        }
        assert_eq!(Backoff::None.delay(3), Duration::ZERO);
    }
}
