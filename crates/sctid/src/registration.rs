use crate::{IdentifierSource, Namespace, RegistrationConfig, Result, Sctid};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Assigned identifiers waiting to be registered, grouped by namespace.
///
/// Writers enqueue what they used once their commit succeeds and move on; a
/// background task (see [`RegistrationQueue::spawn_flush`]) registers the
/// backlog in chunks. Chunks that fail stay queued for the next flush. An
/// identifier enqueued more than once is registered once.
pub struct RegistrationQueue<S: ?Sized = dyn IdentifierSource> {
    source: Arc<S>,
    config: RegistrationConfig,
    pending: Mutex<BTreeMap<Namespace, BTreeSet<Sctid>>>,
}

impl<S> RegistrationQueue<S>
where
    S: IdentifierSource + ?Sized,
{
    pub fn new(source: Arc<S>, config: RegistrationConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            source,
            config,
            pending: Mutex::new(BTreeMap::new()),
        })
    }

    pub fn enqueue(&self, namespace: Namespace, ids: impl IntoIterator<Item = Sctid>) {
        let mut pending = self.pending.lock();
        let queued = pending.entry(namespace).or_default();
        queued.extend(ids);
        if queued.is_empty() {
            pending.remove(&namespace);
        }
    }

    /// Number of identifiers waiting to be registered.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().values().map(BTreeSet::len).sum()
    }

    /// Registers everything queued so far.
    ///
    /// Every chunk is attempted. Chunks that fail are put back on the queue.
    ///
    /// # Errors
    ///
    /// Returns the first registration error, after all chunks were tried.
    /// Returns the number of identifiers registered otherwise.
    pub async fn flush(&self) -> Result<usize> {
        let batch = core::mem::take(&mut *self.pending.lock());
        let mut registered = 0;
        let mut first_error = None;

        for (namespace, ids) in batch {
            let ids: Vec<Sctid> = ids.into_iter().collect();
            for chunk in ids.chunks(self.config.chunk_size) {
                match self.source.register_identifiers(namespace, chunk).await {
                    Ok(()) => registered += chunk.len(),
                    Err(e) => {
                        tracing::error!(
                            "Failed to register {} identifiers in namespace {namespace}, will retry: {e}",
                            chunk.len()
                        );
                        self.enqueue(namespace, chunk.iter().copied());
                        first_error.get_or_insert(e);
                    }
                }
            }
        }

        if registered > 0 {
            tracing::info!("Registered {registered} assigned identifiers");
        }
        first_error.map_or(Ok(registered), Err)
    }
}

impl<S> RegistrationQueue<S>
where
    S: IdentifierSource + ?Sized + 'static,
{
    /// Spawns a task that flushes the queue every flush interval, and once
    /// more when `token` is cancelled.
    pub fn spawn_flush(self: Arc<Self>, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.flush_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {
                        // Failures are logged by flush and retried next tick.
                        let _ = self.flush().await;
                    }
                }
            }

            if self.pending_count() > 0 {
                if let Err(e) = self.flush().await {
                    tracing::warn!(
                        "{} identifiers left unregistered at shutdown: {e}",
                        self.pending_count()
                    );
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::mock::MockSource;
    use crate::{ComponentType, Error};
    use std::time::Duration;

    fn ids(namespace: Namespace, component_type: ComponentType, items: core::ops::Range<u64>) -> Vec<Sctid> {
        items
            .map(|item| Sctid::from_parts(item, namespace, namespace.partition(component_type)).unwrap())
            .collect()
    }

    fn queue(source: Arc<MockSource>, chunk_size: usize) -> RegistrationQueue<MockSource> {
        let config = RegistrationConfig {
            chunk_size,
            ..Default::default()
        };
        RegistrationQueue::new(source, config).unwrap()
    }

    #[tokio::test]
    async fn flush_groups_by_namespace_and_chunks() {
        let source = Arc::new(MockSource::new());
        let queue = queue(source.clone(), 2);
        let se = Namespace::new(1_000_052);
        queue.enqueue(se, ids(se, ComponentType::Concept, 1..4));
        queue.enqueue(Namespace::INTERNATIONAL, ids(Namespace::INTERNATIONAL, ComponentType::Concept, 100..102));
        assert_eq!(queue.pending_count(), 5);

        assert_eq!(queue.flush().await.unwrap(), 5);
        assert_eq!(queue.pending_count(), 0);

        let registered = source.registered.lock();
        let shape: Vec<(Namespace, usize)> = registered.iter().map(|(ns, ids)| (*ns, ids.len())).collect();
        assert_eq!(
            shape,
            vec![(Namespace::INTERNATIONAL, 2), (se, 2), (se, 1)]
        );
    }

    #[tokio::test]
    async fn failed_chunks_stay_queued() {
        let source = Arc::new(MockSource::new());
        *source.fail_register.lock() = Some(ComponentType::Description);
        let queue = queue(source.clone(), 10);
        let intl = Namespace::INTERNATIONAL;
        let se = Namespace::new(1_000_052);
        queue.enqueue(intl, ids(intl, ComponentType::Description, 100..103));
        queue.enqueue(se, ids(se, ComponentType::Concept, 1..3));

        let err = queue.flush().await.unwrap_err();
        assert!(matches!(err, Error::Authority { .. }));
        assert_eq!(queue.pending_count(), 3);

        *source.fail_register.lock() = None;
        assert_eq!(queue.flush().await.unwrap(), 3);
        assert_eq!(queue.pending_count(), 0);
    }

    #[tokio::test]
    async fn duplicate_enqueues_register_once() {
        let source = Arc::new(MockSource::new());
        let queue = queue(source.clone(), 10);
        let se = Namespace::new(1_000_052);
        queue.enqueue(se, ids(se, ComponentType::Concept, 1..3));
        queue.enqueue(se, ids(se, ComponentType::Concept, 2..4));
        assert_eq!(queue.pending_count(), 3);

        assert_eq!(queue.flush().await.unwrap(), 3);
        let registered = source.registered.lock();
        assert_eq!(registered.len(), 1);
        assert_eq!(registered[0].1, ids(se, ComponentType::Concept, 1..4));
    }

    #[tokio::test]
    async fn empty_enqueue_leaves_nothing_behind() {
        let source = Arc::new(MockSource::new());
        let queue = queue(source.clone(), 10);
        queue.enqueue(Namespace::INTERNATIONAL, Vec::new());
        assert_eq!(queue.pending_count(), 0);
        assert_eq!(queue.flush().await.unwrap(), 0);
        assert!(source.registered.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn flush_task_retries_and_drains_on_shutdown() {
        let source = Arc::new(MockSource::new());
        *source.fail_register.lock() = Some(ComponentType::Concept);
        let queue = Arc::new(RegistrationQueue::new(source.clone(), RegistrationConfig::default()).unwrap());
        let token = CancellationToken::new();
        let handle = queue.clone().spawn_flush(token.clone());

        let intl = Namespace::INTERNATIONAL;
        queue.enqueue(intl, ids(intl, ComponentType::Concept, 100..104));
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(queue.pending_count(), 4);

        *source.fail_register.lock() = None;
        queue.enqueue(intl, ids(intl, ComponentType::Concept, 104..106));
        token.cancel();
        handle.await.unwrap();
        assert_eq!(queue.pending_count(), 0);
        assert_eq!(source.registered.lock().len(), 1);
    }
}
