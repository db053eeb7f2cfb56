//! The cache tier in front of an [`IdentifierSource`].
//!
//! [`IdentifierCacheManager`] owns one [`IdentifierCache`] per configured
//! namespace and component type. A background task keeps every cache above
//! its top-up level, and consumers drain caches under a bounded-wait lock,
//! falling back to the source when a cache cannot cover a request.

use crate::{
    CacheKey, CacheManagerConfig, ComponentType, IdentifierCache, IdentifierReservedBlock,
    IdentifierSource, Namespace, Partition, Result,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;


pub struct IdentifierCacheManager<S: ?Sized = dyn IdentifierSource> {
    source: Arc<S>,
    config: CacheManagerConfig,
    caches: HashMap<CacheKey, IdentifierCache>,
}

impl<S> IdentifierCacheManager<S>
where
    S: IdentifierSource + ?Sized,
{
    /// Builds one cache per component type for every configured namespace.
    /// Caches start empty; the first refill pass fills them.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`](crate::Error::InvalidConfig) if the
    /// configuration does not validate.
    pub fn new(source: Arc<S>, config: CacheManagerConfig) -> Result<Self> {
        config.validate()?;

        let mut caches = HashMap::with_capacity(config.namespaces.len() * ComponentType::ALL.len());
        for &namespace in &config.namespaces {
            for component_type in ComponentType::ALL {
                let key = CacheKey::new(namespace, namespace.partition(component_type));
                let capacity = config.capacity(component_type);
                tracing::debug!("Created identifier cache {key} with capacity {capacity}");
                caches.insert(key, IdentifierCache::new(key, capacity));
            }
        }

        Ok(Self {
            source,
            config,
            caches,
        })
    }

    pub fn config(&self) -> &CacheManagerConfig {
        &self.config
    }

    pub fn source(&self) -> &Arc<S> {
        &self.source
    }

    pub fn cache(&self, namespace: Namespace, partition: Partition) -> Option<&IdentifierCache> {
        self.caches.get(&CacheKey::new(namespace, partition))
    }

    pub fn caches(&self) -> impl Iterator<Item = &IdentifierCache> {
        self.caches.values()
    }

    /// Returns `true` while any cache is being refilled.
    pub fn top_up_in_progress(&self) -> bool {
        self.caches.values().any(IdentifierCache::is_top_up_in_progress)
    }

    /// One pass of the refill loop: tops up every cache that has fallen below
    /// the top-up level.
    pub async fn check_top_up_required(&self) {
        for cache in self.caches.values() {
            let threshold = self.config.top_up_level * cache.capacity() as f64;
            if (cache.identifiers_available() as f64) < threshold {
                self.top_up(cache, 0).await;
            }
        }
    }

    /// Reserves enough identifiers to bring `cache` back to capacity, plus
    /// `extra_required`. Returns how many were added.
    ///
    /// Does nothing if a refill of the same cache is already running.
    /// Failures are logged and reported as zero identifiers added.
    pub async fn top_up(&self, cache: &IdentifierCache, extra_required: usize) -> usize {
        let Some(_in_progress) = cache.begin_top_up() else {
            tracing::warn!(
                "Top up of identifier cache {} already in progress, skipping",
                cache.key()
            );
            return 0;
        };

        let quantity = cache
            .capacity()
            .saturating_sub(cache.identifiers_available())
            .saturating_add(extra_required);
        if quantity == 0 {
            return 0;
        }

        tracing::info!("Topping up identifier cache {} by {quantity}", cache.key());
        match self
            .source
            .reserve(cache.namespace(), cache.partition(), quantity)
            .await
        {
            Ok(ids) => {
                let added = ids.len();
                cache.top_up(ids);
                tracing::info!(
                    "Identifier cache {} topped up by {added}, {} available",
                    cache.key(),
                    cache.identifiers_available()
                );
                added
            }
            Err(e) => {
                tracing::error!("Failed to top up identifier cache {}: {e}", cache.key());
                0
            }
        }
    }

    /// Puts `quantity` identifiers for `partition` into `block`.
    ///
    /// Served from the matching cache when it holds more than `quantity`
    /// identifiers, otherwise freshly generated by the source. A cache that
    /// has fallen below the critical level is topped up synchronously first.
    ///
    /// # Errors
    ///
    /// - [`Error::LockTimeout`](crate::Error::LockTimeout) if the cache's
    ///   drain lock could not be taken within the configured wait limit.
    /// - Any error from [`IdentifierSource::generate`].
    #[tracing::instrument(level = "debug", skip(self, block))]
    pub async fn populate_id_block(
        &self,
        block: &IdentifierReservedBlock,
        quantity: usize,
        namespace: Namespace,
        partition: Partition,
    ) -> Result<()> {
        if quantity == 0 {
            return Ok(());
        }
        let component_type = partition.component_type();

        if let Some(cache) = self.cache(namespace, partition) {
            let critical = self.config.critical_level * cache.capacity() as f64;
            if (cache.identifiers_available() as f64) < critical {
                tracing::warn!(
                    "Identifier cache {} below critical level ({} available), topping up before draining",
                    cache.key(),
                    cache.identifiers_available()
                );
                self.top_up(cache, quantity.saturating_sub(cache.capacity()))
                    .await;
            }

            if cache.identifiers_available() > quantity {
                let drained = {
                    let guard = cache.lock_within(self.config.lock_wait_limit).await?;
                    // Another consumer may have drained in between.
                    (cache.identifiers_available() > quantity).then(|| guard.take(quantity))
                };
                if let Some(ids) = drained {
                    block.add_all(component_type, ids);
                    return Ok(());
                }
            }
            tracing::debug!(
                "Identifier cache {} cannot cover {quantity}, generating directly",
                cache.key()
            );
        }

        let ids = self
            .source
            .generate(namespace, partition, quantity)
            .await?;
        block.add_all(component_type, ids);
        Ok(())
    }
}

impl<S> IdentifierCacheManager<S>
where
    S: IdentifierSource + ?Sized + 'static,
{
    /// Spawns the refill loop. It runs a top-up pass immediately and then
    /// once per polling interval until `token` is cancelled.
    ///
    /// A pass that outlasts the polling interval is followed straight away by
    /// the next one.
    pub fn spawn_refill(self: Arc<Self>, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let interval = self.config.polling_interval;
            tracing::info!("Identifier cache refill loop started, polling every {interval:?}");

            loop {
                let started = Instant::now();
                tokio::select! {
                    () = token.cancelled() => break,
                    () = self.check_top_up_required() => {}
                }

                let elapsed = started.elapsed();
                match interval.checked_sub(elapsed) {
                    Some(remaining) if !remaining.is_zero() => {
                        tokio::select! {
                            () = token.cancelled() => break,
                            () = tokio::time::sleep(remaining) => {}
                        }
                    }
                    _ => tracing::warn!(
                        "Identifier cache top up took {elapsed:?}, longer than the polling interval of {interval:?}"
                    ),
                }
            }

            tracing::info!("Identifier cache refill loop stopped");
        })
    }
}
