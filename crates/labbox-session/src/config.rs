//! Session configuration.

use std::time::Duration;

use labbox_hither::{BrokerConfig, DEFAULT_POOL_CAPACITY};
use labbox_selection::DEFAULT_TICK;

use crate::error::{Error, Result};

pub const ENV_POOL_CAPACITY: &str = "LABBOX_POOL_CAPACITY";
pub const ENV_POOLS: &str = "LABBOX_POOLS";
pub const ENV_CACHE_MAX_ENTRIES: &str = "LABBOX_CACHE_MAX_ENTRIES";
pub const ENV_CACHE_TTL_SECS: &str = "LABBOX_CACHE_TTL_SECS";
pub const ENV_ANIMATION_TICK_MS: &str = "LABBOX_ANIMATION_TICK_MS";

/// Configuration for a session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Capacity of the default calculation pool
    pub pool_capacity: usize,

    /// Named calculation pools
    pub pools: Vec<(String, usize)>,

    /// Bound on cached jobs
    pub cache_max_entries: Option<usize>,

    /// Lifetime of finished jobs in the cache
    pub cache_ttl: Option<Duration>,

    /// Period of the timepoint animation loop
    pub animation_tick: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            pool_capacity: DEFAULT_POOL_CAPACITY,
            pools: Vec::new(),
            cache_max_entries: None,
            cache_ttl: None,
            animation_tick: DEFAULT_TICK,
        }
    }
}

impl SessionConfig {
    /// Create config from environment variables with sensible defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Create config from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let pool_capacity = match lookup(ENV_POOL_CAPACITY) {
            Some(value) => parse_positive(ENV_POOL_CAPACITY, &value)?,
            None => defaults.pool_capacity,
        };

        let pools = lookup(ENV_POOLS)
            .map(|value| parse_pools(&value))
            .transpose()?
            .unwrap_or_default();

        let cache_max_entries = lookup(ENV_CACHE_MAX_ENTRIES)
            .map(|value| parse_positive(ENV_CACHE_MAX_ENTRIES, &value))
            .transpose()?;

        let cache_ttl = lookup(ENV_CACHE_TTL_SECS)
            .map(|value| parse_positive(ENV_CACHE_TTL_SECS, &value))
            .transpose()?
            .map(|secs| Duration::from_secs(secs as u64));

        let animation_tick = match lookup(ENV_ANIMATION_TICK_MS) {
            Some(value) => Duration::from_millis(parse_positive(ENV_ANIMATION_TICK_MS, &value)? as u64),
            None => defaults.animation_tick,
        };

        Ok(Self {
            pool_capacity,
            pools,
            cache_max_entries,
            cache_ttl,
            animation_tick,
        })
    }

    #[must_use]
    pub fn with_pool_capacity(mut self, capacity: usize) -> Self {
        self.pool_capacity = capacity;
        self
    }

    #[must_use]
    pub fn with_pool(mut self, name: impl Into<String>, capacity: usize) -> Self {
        self.pools.push((name.into(), capacity));
        self
    }

    #[must_use]
    pub fn with_cache_max_entries(mut self, max_entries: usize) -> Self {
        self.cache_max_entries = Some(max_entries);
        self
    }

    #[must_use]
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    #[must_use]
    pub fn with_animation_tick(mut self, tick: Duration) -> Self {
        self.animation_tick = tick;
        self
    }

    /// Broker settings derived from this config.
    pub fn broker_config(&self) -> BrokerConfig {
        let mut broker = BrokerConfig::default().with_pool_capacity(self.pool_capacity);
        for (name, capacity) in &self.pools {
            broker = broker.with_pool(name.clone(), *capacity);
        }
        if let Some(max_entries) = self.cache_max_entries {
            broker = broker.with_max_entries(max_entries);
        }
        if let Some(ttl) = self.cache_ttl {
            broker = broker.with_ttl(ttl);
        }
        broker
    }
}

fn parse_positive(name: &str, value: &str) -> Result<usize> {
    match value.trim().parse::<usize>() {
        Ok(parsed) if parsed > 0 => Ok(parsed),
        _ => Err(Error::Config(format!(
            "{name} must be a positive integer, got {value:?}"
        ))),
    }
}

/// Parse `name:capacity,name:capacity`.
fn parse_pools(value: &str) -> Result<Vec<(String, usize)>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (name, capacity) = entry.split_once(':').ok_or_else(|| {
                Error::Config(format!("{ENV_POOLS} entry {entry:?} is not name:capacity"))
            })?;
            let name = name.trim();
            if name.is_empty() {
                return Err(Error::Config(format!("{ENV_POOLS} entry {entry:?} has no name")));
            }
            Ok((name.to_string(), parse_positive(ENV_POOLS, capacity)?))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn defaults_without_variables() {
        let config = SessionConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, SessionConfig::default());
        assert_eq!(config.pool_capacity, 10);
        assert_eq!(config.animation_tick, Duration::from_millis(50));
    }

    #[test]
    fn reads_every_variable() {
        let config = SessionConfig::from_lookup(lookup(&[
            (ENV_POOL_CAPACITY, "4"),
            (ENV_POOLS, "gpu:1, partition2:3"),
            (ENV_CACHE_MAX_ENTRIES, "200"),
            (ENV_CACHE_TTL_SECS, "60"),
            (ENV_ANIMATION_TICK_MS, "20"),
        ]))
        .unwrap();

        assert_eq!(config.pool_capacity, 4);
        assert_eq!(
            config.pools,
            vec![("gpu".to_string(), 1), ("partition2".to_string(), 3)]
        );
        assert_eq!(config.cache_max_entries, Some(200));
        assert_eq!(config.cache_ttl, Some(Duration::from_secs(60)));
        assert_eq!(config.animation_tick, Duration::from_millis(20));
    }

    #[test]
    fn invalid_values_are_config_errors() {
        for vars in [
            [(ENV_POOL_CAPACITY, "0")],
            [(ENV_POOL_CAPACITY, "many")],
            [(ENV_POOLS, "gpu")],
            [(ENV_POOLS, ":2")],
            [(ENV_CACHE_TTL_SECS, "-1")],
        ] {
            let result = SessionConfig::from_lookup(lookup(&vars));
            assert!(matches!(result, Err(Error::Config(_))), "{vars:?}");
        }
    }

    #[test]
    fn broker_config_carries_settings() {
        let broker = SessionConfig::default()
            .with_pool_capacity(3)
            .with_pool("gpu", 1)
            .with_cache_max_entries(5)
            .with_cache_ttl(Duration::from_secs(9))
            .broker_config();

        assert_eq!(broker.pool_capacity, 3);
        assert_eq!(broker.pools, vec![("gpu".to_string(), 1)]);
        assert_eq!(broker.max_entries, Some(5));
        assert_eq!(broker.ttl, Some(Duration::from_secs(9)));
    }
}
