use crate::{Error, IdentifierSource, Namespace, Partition, Result, Sctid};
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use std::collections::HashSet;

/// Supplies candidate item ids to a [`LocalRandomIdentifierSource`].
pub trait ItemIdProvider: Send + Sync {
    fn next_item_id(&self) -> u64;
}

/// Draws uniformly distributed eight digit item ids from the thread-local
/// RNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomItemIdProvider;

impl RandomItemIdProvider {
    pub const MIN: u64 = 10_000_000;
    pub const MAX: u64 = 99_999_999;
}

impl ItemIdProvider for RandomItemIdProvider {
    fn next_item_id(&self) -> u64 {
        rand::rng().random_range(Self::MIN..=Self::MAX)
    }
}

/// An in-process identifier source that mints identifiers from random item
/// ids.
///
/// Every identifier issued by this source is remembered, and candidates that
/// clash with one are drawn again. When the provider keeps producing clashes
/// the batch is abandoned after `max_attempts_per_id × quantity` draws.
pub struct LocalRandomIdentifierSource<P = RandomItemIdProvider> {
    provider: P,
    issued: Mutex<HashSet<Sctid>>,
    max_attempts_per_id: usize,
}

impl LocalRandomIdentifierSource {
    pub fn new() -> Self {
        Self::with_provider(RandomItemIdProvider)
    }
}

impl Default for LocalRandomIdentifierSource {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: ItemIdProvider> LocalRandomIdentifierSource<P> {
    pub const DEFAULT_MAX_ATTEMPTS_PER_ID: usize = 32;

    pub fn with_provider(provider: P) -> Self {
        Self {
            provider,
            issued: Mutex::new(HashSet::new()),
            max_attempts_per_id: Self::DEFAULT_MAX_ATTEMPTS_PER_ID,
        }
    }

    #[must_use]
    pub fn with_max_attempts_per_id(mut self, attempts: usize) -> Self {
        self.max_attempts_per_id = attempts.max(1);
        self
    }

    /// Marks identifiers that already exist elsewhere so they are never
    /// issued.
    pub fn exclude(&self, ids: impl IntoIterator<Item = Sctid>) {
        self.issued.lock().extend(ids);
    }

    /// Number of identifiers issued or excluded so far.
    pub fn issued_count(&self) -> usize {
        self.issued.lock().len()
    }

    fn mint(&self, namespace: Namespace, partition: Partition, quantity: usize) -> Result<Vec<Sctid>> {
        let budget = quantity.saturating_mul(self.max_attempts_per_id);
        let mut issued = self.issued.lock();
        let mut ids = Vec::with_capacity(quantity);
        let mut attempts = 0;

        while ids.len() < quantity {
            if attempts == budget {
                // Release the partial batch so it can be drawn again.
                for id in &ids {
                    issued.remove(id);
                }
                return Err(Error::Authority {
                    operation: "generate".to_string(),
                    reason: format!(
                        "gave up after {attempts} random draws for {quantity} identifiers in partition {partition}"
                    ),
                });
            }
            attempts += 1;

            let id = Sctid::from_parts(self.provider.next_item_id(), namespace, partition)?;
            if issued.insert(id) {
                ids.push(id);
            } else {
                tracing::debug!("Random identifier {id} clashes with an issued identifier, drawing again");
            }
        }
        Ok(ids)
    }
}

#[async_trait]
impl<P: ItemIdProvider> IdentifierSource for LocalRandomIdentifierSource<P> {
    async fn generate(
        &self,
        namespace: Namespace,
        partition: Partition,
        quantity: usize,
    ) -> Result<Vec<Sctid>> {
        self.mint(namespace, partition, quantity)
    }

    async fn reserve(
        &self,
        namespace: Namespace,
        partition: Partition,
        quantity: usize,
    ) -> Result<Vec<Sctid>> {
        self.mint(namespace, partition, quantity)
    }

    async fn register_identifiers(&self, namespace: Namespace, ids: &[Sctid]) -> Result<()> {
        tracing::debug!(
            "Local random source: {} identifiers in namespace {namespace} need no registration",
            ids.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Replays a fixed list of item ids, wrapping around at the end.
    struct Scripted {
        items: Vec<u64>,
        next: AtomicUsize,
    }

    impl Scripted {
        fn new(items: &[u64]) -> Self {
            Self {
                items: items.to_vec(),
                next: AtomicUsize::new(0),
            }
        }
    }

    impl ItemIdProvider for Scripted {
        fn next_item_id(&self) -> u64 {
            let i = self.next.fetch_add(1, Ordering::Relaxed);
            self.items[i % self.items.len()]
        }
    }

    fn partition(raw: &str) -> Partition {
        raw.parse().unwrap()
    }

    #[test]
    fn default_provider_draws_eight_digit_items() {
        let provider = RandomItemIdProvider;
        for _ in 0..1000 {
            let item = provider.next_item_id();
            assert_eq!(item.to_string().len(), 8);
        }
    }

    #[tokio::test]
    async fn mints_distinct_valid_ids() {
        let source = LocalRandomIdentifierSource::new();
        let ns = Namespace::new(1_000_052);
        let ids = source.reserve(ns, partition("11"), 500).await.unwrap();
        let unique: HashSet<_> = ids.iter().copied().collect();
        assert_eq!(unique.len(), 500);
        for id in &ids {
            assert_eq!(id.namespace(), ns);
            assert_eq!(id.partition(), partition("11"));
            assert_eq!(id.to_string().parse::<Sctid>().unwrap(), *id);
        }
        assert_eq!(source.issued_count(), 500);
    }

    #[tokio::test]
    async fn redraws_on_clash() {
        let ns = Namespace::new(1_000_052);
        let source = LocalRandomIdentifierSource::with_provider(Scripted::new(&[
            48_262_910, 48_262_910, 48_262_920,
        ]));
        let ids = source.generate(ns, partition("11"), 2).await.unwrap();
        assert_eq!(ids[0].item(), 48_262_910);
        assert_eq!(ids[1].item(), 48_262_920);
    }

    #[tokio::test]
    async fn excluded_ids_are_never_issued() {
        let ns = Namespace::INTERNATIONAL;
        let taken = Sctid::from_parts(12_345_678, ns, partition("00")).unwrap();
        let source = LocalRandomIdentifierSource::with_provider(Scripted::new(&[12_345_678, 23_456_789]));
        source.exclude([taken]);
        let ids = source.generate(ns, partition("00"), 1).await.unwrap();
        assert_eq!(ids[0].item(), 23_456_789);
    }

    #[tokio::test]
    async fn gives_up_when_provider_is_exhausted() {
        let ns = Namespace::INTERNATIONAL;
        let source = LocalRandomIdentifierSource::with_provider(Scripted::new(&[12_345_678]))
            .with_max_attempts_per_id(4);
        let err = source.generate(ns, partition("00"), 2).await.unwrap_err();
        assert!(matches!(err, Error::Authority { .. }));
        // The one identifier minted before giving up is released again.
        assert_eq!(source.issued_count(), 0);
    }
}
