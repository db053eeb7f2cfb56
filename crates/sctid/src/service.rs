use crate::{
    ComponentType, Error, IdentifierCacheManager, IdentifierReservedBlock, IdentifierSource,
    Namespace, RegistrationConfig, RegistrationQueue, Result, Sctid,
};
use std::sync::Arc;

/// Entry point for writers that need identifiers for a commit.
///
/// ```text
/// let block = service.get_reserved_block(namespace, 1, 3, 5).await?;
/// let concept_id = block.get_id(ComponentType::Concept)?;
/// // ... commit ...
/// service.register_assigned_ids(&block).await?;
/// ```
pub struct IdentifierService<S: ?Sized = dyn IdentifierSource> {
    manager: Arc<IdentifierCacheManager<S>>,
    registration: Arc<RegistrationQueue<S>>,
}

impl<S> IdentifierService<S>
where
    S: IdentifierSource + ?Sized,
{
    pub fn new(manager: Arc<IdentifierCacheManager<S>>, registration: RegistrationConfig) -> Result<Self> {
        let registration = Arc::new(RegistrationQueue::new(manager.source().clone(), registration)?);
        Ok(Self {
            manager,
            registration,
        })
    }

    pub fn manager(&self) -> &Arc<IdentifierCacheManager<S>> {
        &self.manager
    }

    pub fn registration_queue(&self) -> &Arc<RegistrationQueue<S>> {
        &self.registration
    }

    /// Reserves identifiers for a commit that will create the given number of
    /// concepts, descriptions and relationships in `namespace`.
    ///
    /// The three component types are populated concurrently.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Reservation`] wrapping the first failure.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn get_reserved_block(
        &self,
        namespace: Namespace,
        concepts: usize,
        descriptions: usize,
        relationships: usize,
    ) -> Result<IdentifierReservedBlock> {
        let block = IdentifierReservedBlock::new(namespace);
        let manager = &self.manager;

        futures::try_join!(
            manager.populate_id_block(
                &block,
                concepts,
                namespace,
                namespace.partition(ComponentType::Concept),
            ),
            manager.populate_id_block(
                &block,
                descriptions,
                namespace,
                namespace.partition(ComponentType::Description),
            ),
            manager.populate_id_block(
                &block,
                relationships,
                namespace,
                namespace.partition(ComponentType::Relationship),
            ),
        )
        .map_err(|source| Error::Reservation {
            namespace,
            source: Box::new(source),
        })?;

        Ok(block)
    }

    /// Registers every identifier taken from `block`, one call per component
    /// type.
    ///
    /// Reserved identifiers that were never taken are not handed back.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Registration`] listing each component type that
    /// failed. The remaining types are still registered.
    pub async fn register_assigned_ids(&self, block: &IdentifierReservedBlock) -> Result<()> {
        let namespace = block.namespace();
        let mut failures = Vec::new();

        for component_type in ComponentType::ALL {
            let ids = block.ids_assigned(component_type);
            if ids.is_empty() {
                continue;
            }
            if let Err(e) = self
                .manager
                .source()
                .register_identifiers(namespace, &ids)
                .await
            {
                tracing::error!(
                    "Failed to register {} {component_type} identifiers in namespace {namespace}: {e}",
                    ids.len()
                );
                failures.push((component_type, e));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::Registration { failures })
        }
    }

    /// Hands the identifiers taken from `block` to the registration queue
    /// and returns how many were queued.
    pub fn queue_assigned_ids(&self, block: &IdentifierReservedBlock) -> usize {
        let ids: Vec<Sctid> = ComponentType::ALL
            .into_iter()
            .flat_map(|component_type| block.ids_assigned(component_type))
            .collect();
        let queued = ids.len();
        self.registration.enqueue(block.namespace(), ids);
        queued
    }
}

impl IdentifierService {
    pub fn is_concept_id(sctid: &str) -> bool {
        crate::is_concept_id(sctid)
    }

    pub fn is_description_id(sctid: &str) -> bool {
        crate::is_description_id(sctid)
    }

    pub fn is_relationship_id(sctid: &str) -> bool {
        crate::is_relationship_id(sctid)
    }

    pub fn component_type_of(sctid: &str) -> Option<ComponentType> {
        crate::component_type_of(sctid)
    }

    pub fn validate_id(sctid: &str, expected: Option<ComponentType>) -> Result<()> {
        crate::validate_id(sctid, expected)
    }
}
