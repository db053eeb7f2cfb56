use crate::{ComponentType, Error, Namespace, Result};
use std::time::Duration;

/// Tuning for an [`IdentifierCacheManager`](crate::IdentifierCacheManager).
#[derive(Debug, Clone, PartialEq)]
pub struct CacheManagerConfig {
    /// Base cache capacity. Concept caches hold this many identifiers,
    /// description caches twice as many and relationship caches four times
    /// as many.
    pub prefetch_count: usize,
    /// Namespaces that get a cache per component type. Other namespaces are
    /// always served straight from the source.
    pub namespaces: Vec<Namespace>,
    /// The refill loop tops up caches that fall below this fraction of
    /// their capacity.
    pub top_up_level: f64,
    /// Consumers top up synchronously when a cache falls below this
    /// fraction of its capacity.
    pub critical_level: f64,
    pub polling_interval: Duration,
    /// How long a consumer waits for a cache's drain lock.
    pub lock_wait_limit: Duration,
}

impl Default for CacheManagerConfig {
    fn default() -> Self {
        Self {
            prefetch_count: 1000,
            namespaces: vec![Namespace::INTERNATIONAL],
            top_up_level: 0.7,
            critical_level: 0.1,
            polling_interval: Duration::from_secs(600),
            lock_wait_limit: Duration::from_secs(5),
        }
    }
}

impl CacheManagerConfig {
    pub fn capacity(&self, component_type: ComponentType) -> usize {
        self.prefetch_count
            .saturating_mul(component_type.prefetch_multiplier())
    }

    pub fn validate(&self) -> Result<()> {
        if self.prefetch_count == 0 {
            return Err(Error::InvalidConfig("prefetch_count must be > 0".into()));
        }
        if !(self.top_up_level > 0.0 && self.top_up_level <= 1.0) {
            return Err(Error::InvalidConfig(format!(
                "top_up_level must be in (0, 1], got {}",
                self.top_up_level
            )));
        }
        if !(self.critical_level >= 0.0 && self.critical_level < self.top_up_level) {
            return Err(Error::InvalidConfig(format!(
                "critical_level must be in [0, top_up_level), got {}",
                self.critical_level
            )));
        }
        if self.polling_interval.is_zero() {
            return Err(Error::InvalidConfig("polling_interval must be > 0".into()));
        }
        if self.lock_wait_limit.is_zero() {
            return Err(Error::InvalidConfig("lock_wait_limit must be > 0".into()));
        }
        Ok(())
    }
}

/// Tuning for a [`RegistrationQueue`](crate::RegistrationQueue).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationConfig {
    /// Largest batch handed to the source in one registration call.
    pub chunk_size: usize,
    pub flush_interval: Duration,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            flush_interval: Duration::from_secs(30),
        }
    }
}

impl RegistrationConfig {
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::InvalidConfig("chunk_size must be > 0".into()));
        }
        if self.flush_interval.is_zero() {
            return Err(Error::InvalidConfig("flush_interval must be > 0".into()));
        }
        Ok(())
    }
}
