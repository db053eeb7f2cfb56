use crate::{Namespace, Partition, Result, Sctid};
use async_trait::async_trait;
use std::sync::Arc;

/// A minimal interface to an identifier authority.
///
/// Implementations may mint identifiers in-process or call out to a remote
/// service. Callers never learn which.
#[async_trait]
pub trait IdentifierSource: Send + Sync {
    /// Mints `quantity` brand-new identifiers.
    async fn generate(
        &self,
        namespace: Namespace,
        partition: Partition,
        quantity: usize,
    ) -> Result<Vec<Sctid>>;

    /// Mints `quantity` identifiers that are held for this caller but not yet
    /// confirmed as used. Confirm them later with
    /// [`Self::register_identifiers`].
    async fn reserve(
        &self,
        namespace: Namespace,
        partition: Partition,
        quantity: usize,
    ) -> Result<Vec<Sctid>>;

    /// Confirms the final assignment of `ids`.
    ///
    /// Fails if any identifier is not `Available`, `Reserved` or `Assigned`
    /// according to the authority.
    async fn register_identifiers(&self, namespace: Namespace, ids: &[Sctid]) -> Result<()>;
}

#[async_trait]
impl<T> IdentifierSource for Arc<T>
where
    T: IdentifierSource + ?Sized,
{
    async fn generate(
        &self,
        namespace: Namespace,
        partition: Partition,
        quantity: usize,
    ) -> Result<Vec<Sctid>> {
        (**self).generate(namespace, partition, quantity).await
    }

    async fn reserve(
        &self,
        namespace: Namespace,
        partition: Partition,
        quantity: usize,
    ) -> Result<Vec<Sctid>> {
        (**self).reserve(namespace, partition, quantity).await
    }

    async fn register_identifiers(&self, namespace: Namespace, ids: &[Sctid]) -> Result<()> {
        (**self).register_identifiers(namespace, ids).await
    }
}
