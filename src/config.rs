//! Cache configuration
//!
//! Process-wide settings for the [`EntryCacheManager`](crate::cache::EntryCacheManager)
//! and the per-ledger settings consulted by eviction.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default cache budget (1GB)
pub const DEFAULT_MAX_CACHE_SIZE: u64 = 1024 * 1024 * 1024;

/// Default eviction watermark
pub const DEFAULT_EVICTION_WATERMARK: f64 = 0.9;

/// Default period of the background eviction task
pub const DEFAULT_EVICTION_INTERVAL: Duration = Duration::from_millis(10);

/// Default maximum age of a cached entry
pub const DEFAULT_EVICTION_TIME_THRESHOLD: Duration = Duration::from_millis(1000);

/// Configuration for the entry cache manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CacheManagerConfig {
    /// Byte budget shared by every ledger cache (0 disables caching)
    pub max_cache_size: u64,

    /// Fraction of `max_cache_size` a size-triggered pass brings usage down to
    pub cache_eviction_watermark: f64,

    /// Period of the time-based eviction task
    #[serde(with = "duration_ms", rename = "cacheEvictionIntervalMs")]
    pub cache_eviction_interval: Duration,

    /// Entries older than this are dropped by the time-based task
    #[serde(with = "duration_ms", rename = "cacheEvictionTimeThresholdMillis")]
    pub cache_eviction_time_threshold: Duration,
}

impl Default for CacheManagerConfig {
    fn default() -> Self {
        Self {
            max_cache_size: DEFAULT_MAX_CACHE_SIZE,
            cache_eviction_watermark: DEFAULT_EVICTION_WATERMARK,
            cache_eviction_interval: DEFAULT_EVICTION_INTERVAL,
            cache_eviction_time_threshold: DEFAULT_EVICTION_TIME_THRESHOLD,
        }
    }
}

impl CacheManagerConfig {
    /// Create a config with the given budget and default eviction settings
    pub fn new(max_cache_size: u64) -> Self {
        Self {
            max_cache_size,
            ..Default::default()
        }
    }

    pub fn with_max_cache_size(mut self, max_cache_size: u64) -> Self {
        self.max_cache_size = max_cache_size;
        self
    }

    pub fn with_eviction_watermark(mut self, watermark: f64) -> Self {
        self.cache_eviction_watermark = watermark;
        self
    }

    pub fn with_eviction_interval(mut self, interval: Duration) -> Self {
        self.cache_eviction_interval = interval;
        self
    }

    pub fn with_eviction_time_threshold(mut self, threshold: Duration) -> Self {
        self.cache_eviction_time_threshold = threshold;
        self
    }

    /// Whether caching is enabled at all
    pub fn is_enabled(&self) -> bool {
        self.max_cache_size > 0
    }

    /// Size a size-triggered eviction pass brings the aggregate down to
    pub fn eviction_target(&self) -> u64 {
        eviction_target(self.max_cache_size, self.cache_eviction_watermark)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        validate_watermark(self.cache_eviction_watermark)?;

        if self.cache_eviction_interval.is_zero() {
            return Err(Error::InvalidConfig(
                "cache eviction interval must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

/// `floor(max * watermark)`
pub(crate) fn eviction_target(max_cache_size: u64, watermark: f64) -> u64 {
    (max_cache_size as f64 * watermark).floor() as u64
}

pub(crate) fn validate_watermark(watermark: f64) -> Result<()> {
    if !(watermark > 0.0 && watermark <= 1.0) {
        return Err(Error::InvalidConfig(format!(
            "cache eviction watermark must be in (0, 1], got {}",
            watermark
        )));
    }
    Ok(())
}

/// Per-ledger configuration consulted by the cache
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LedgerConfig {
    /// Prefer evicting entries at or before the slowest active cursor's
    /// mark-deleted position
    pub cache_eviction_by_mark_deleted_position: bool,
}

impl LedgerConfig {
    pub fn with_eviction_by_mark_deleted_position(mut self, enabled: bool) -> Self {
        self.cache_eviction_by_mark_deleted_position = enabled;
        self
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_default_config() {
        let config = CacheManagerConfig::default();
        assert_eq!(config.max_cache_size, DEFAULT_MAX_CACHE_SIZE);
        assert!(config.is_enabled());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_eviction_target_floors() {
        let config = CacheManagerConfig::new(10).with_eviction_watermark(0.8);
        assert_eq!(config.eviction_target(), 8);

        let config = CacheManagerConfig::new(200).with_eviction_watermark(0.8);
        assert_eq!(config.eviction_target(), 160);

        let config = CacheManagerConfig::new(7).with_eviction_watermark(0.5);
        assert_eq!(config.eviction_target(), 3);
    }

    #[test]
    fn test_zero_budget_disables() {
        let config = CacheManagerConfig::new(0);
        assert!(!config.is_enabled());
        assert_eq!(config.eviction_target(), 0);
    }

    #[test]
    fn test_invalid_watermark() {
        for watermark in [0.0, -0.5, 1.5, f64::NAN] {
            let config = CacheManagerConfig::default().with_eviction_watermark(watermark);
            assert_matches!(config.validate(), Err(Error::InvalidConfig(_)));
        }
        let config = CacheManagerConfig::default().with_eviction_watermark(1.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_interval_rejected() {
        let config = CacheManagerConfig::default().with_eviction_interval(Duration::ZERO);
        assert_matches!(config.validate(), Err(Error::InvalidConfig(_)));
    }

    #[test]
    fn test_json_round_trip_uses_millis() {
        let json = r#"{
            "maxCacheSize": 100,
            "cacheEvictionWatermark": 0.8,
            "cacheEvictionIntervalMs": 1000,
            "cacheEvictionTimeThresholdMillis": 20000
        }"#;
        let config: CacheManagerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.max_cache_size, 100);
        assert_eq!(config.cache_eviction_interval, Duration::from_secs(1));
        assert_eq!(config.cache_eviction_time_threshold, Duration::from_secs(20));

        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(value["cacheEvictionIntervalMs"], 1000);
    }

    #[test]
    fn test_partial_json_falls_back_to_defaults() {
        let config: CacheManagerConfig = serde_json::from_str(r#"{"maxCacheSize": 0}"#).unwrap();
        assert_eq!(config.max_cache_size, 0);
        assert_eq!(config.cache_eviction_watermark, DEFAULT_EVICTION_WATERMARK);

        let ledger: LedgerConfig =
            serde_json::from_str(r#"{"cacheEvictionByMarkDeletedPosition": true}"#).unwrap();
        assert!(ledger.cache_eviction_by_mark_deleted_position);
    }
}
