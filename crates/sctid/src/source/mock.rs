//! A scripted identifier source for unit tests.

use crate::{Error, IdentifierSource, LocalSequentialIdentifierSource, Namespace, Partition, Result, Sctid};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// Mints sequential identifiers while recording every call. Each operation
/// can be made to fail or to stall.
#[derive(Default)]
pub(crate) struct MockSource {
    inner: LocalSequentialIdentifierSource,
    pub generate_calls: AtomicUsize,
    pub reserve_calls: AtomicUsize,
    pub reserve_quantities: Mutex<Vec<usize>>,
    pub registered: Mutex<Vec<(Namespace, Vec<Sctid>)>>,
    pub fail_generate: AtomicBool,
    pub fail_reserve: AtomicBool,
    /// Registration fails for batches of this component type.
    pub fail_register: Mutex<Option<crate::ComponentType>>,
    pub reserve_delay: Mutex<Option<Duration>>,
}

impl MockSource {
    pub fn new() -> Self {
        Self::default()
    }

    fn failure(operation: &str) -> Error {
        Error::Authority {
            operation: operation.to_string(),
            reason: "scripted failure".to_string(),
        }
    }
}

#[async_trait]
impl IdentifierSource for MockSource {
    async fn generate(
        &self,
        namespace: Namespace,
        partition: Partition,
        quantity: usize,
    ) -> Result<Vec<Sctid>> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_generate.load(Ordering::SeqCst) {
            return Err(Self::failure("generate"));
        }
        self.inner.generate(namespace, partition, quantity).await
    }

    async fn reserve(
        &self,
        namespace: Namespace,
        partition: Partition,
        quantity: usize,
    ) -> Result<Vec<Sctid>> {
        self.reserve_calls.fetch_add(1, Ordering::SeqCst);
        self.reserve_quantities.lock().push(quantity);
        let delay = *self.reserve_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_reserve.load(Ordering::SeqCst) {
            return Err(Self::failure("reserve"));
        }
        self.inner.reserve(namespace, partition, quantity).await
    }

    async fn register_identifiers(&self, namespace: Namespace, ids: &[Sctid]) -> Result<()> {
        let failing = *self.fail_register.lock();
        if failing.is_some() && ids.first().map(|id| id.component_type()) == failing {
            return Err(Self::failure("register"));
        }
        self.registered.lock().push((namespace, ids.to_vec()));
        Ok(())
    }
}
