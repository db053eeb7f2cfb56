use crate::{Error, IdentifierSource, Namespace, Partition, Result, Sctid};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;

/// An in-process identifier source that hands out item ids in ascending
/// order, one independent sequence per (namespace, partition).
///
/// Each sequence can be seeded with the greatest item id already in use
/// (e.g. read from the component store at startup) so that newly minted
/// identifiers never collide with existing content. Without a seed a sequence
/// starts at [`Sctid::min_item`].
///
/// Registration is a no-op: identifiers minted here are owned by this
/// process from the moment they are issued.
///
/// # Example
///
/// ```
/// # tokio_test_block_on(async {
/// use sctid::{IdentifierSource, LocalSequentialIdentifierSource, Namespace, Partition};
///
/// let concepts: Partition = "00".parse().unwrap();
/// let source = LocalSequentialIdentifierSource::new()
///     .with_last_item(Namespace::INTERNATIONAL, concepts, 1_119_302);
///
/// let ids = source.reserve(Namespace::INTERNATIONAL, concepts, 3).await.unwrap();
/// let ids: Vec<String> = ids.iter().map(ToString::to_string).collect();
/// assert_eq!(ids, ["1119303003", "1119304009", "1119305005"]);
/// # });
/// # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
/// # }
/// ```
#[derive(Debug, Default)]
pub struct LocalSequentialIdentifierSource {
    last_items: Mutex<HashMap<(Namespace, Partition), u64>>,
}

impl LocalSequentialIdentifierSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the sequence for (`namespace`, `partition`) so that the next
    /// identifier minted uses item id `last_item + 1`.
    #[must_use]
    pub fn with_last_item(self, namespace: Namespace, partition: Partition, last_item: u64) -> Self {
        self.last_items
            .lock()
            .insert((namespace, partition), last_item);
        self
    }

    /// The last item id handed out (or seeded) for the sequence, if any.
    pub fn last_item(&self, namespace: Namespace, partition: Partition) -> Option<u64> {
        self.last_items.lock().get(&(namespace, partition)).copied()
    }

    fn mint(&self, namespace: Namespace, partition: Partition, quantity: usize) -> Result<Vec<Sctid>> {
        let mut last_items = self.last_items.lock();
        let last = last_items
            .get(&(namespace, partition))
            .copied()
            .unwrap_or(Sctid::min_item(partition) - 1);

        let mut ids = Vec::with_capacity(quantity);
        let mut item = last;
        for _ in 0..quantity {
            item = item.checked_add(1).ok_or_else(|| Error::InvalidSctid {
                sctid: (u128::from(item) + 1).to_string(),
                reason: format!(
                    "item id sequence for namespace {namespace}, partition {partition} is exhausted"
                ),
            })?;
            ids.push(Sctid::from_parts(item, namespace, partition)?);
        }
        // Only advance the sequence once the whole batch was minted.
        last_items.insert((namespace, partition), item);
        Ok(ids)
    }
}

#[async_trait]
impl IdentifierSource for LocalSequentialIdentifierSource {
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
            "Local sequential source: {} identifiers in namespace {namespace} need no registration",
            ids.len()
        );
        Ok(())
    }
}
