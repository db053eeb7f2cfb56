use crate::{ComponentType, Error, Namespace, Result, Sctid};
use parking_lot::Mutex;
use std::collections::VecDeque;

#[derive(Debug, Default)]
struct Lane {
    reserved: VecDeque<Sctid>,
    assigned: Vec<Sctid>,
}

/// Identifiers reserved for a single commit, split by component type.
///
/// Writers take identifiers with [`get_id`](Self::get_id); every identifier
/// taken moves to the assigned list, which is what gets registered once the
/// commit succeeds. Each component type is locked independently so the three
/// lanes can be filled concurrently.
#[derive(Debug)]
pub struct IdentifierReservedBlock {
    namespace: Namespace,
    lanes: [Mutex<Lane>; 3],
}

impl IdentifierReservedBlock {
    pub fn new(namespace: Namespace) -> Self {
        Self {
            namespace,
            lanes: Default::default(),
        }
    }

    pub const fn namespace(&self) -> Namespace {
        self.namespace
    }

    fn lane(&self, component_type: ComponentType) -> &Mutex<Lane> {
        &self.lanes[component_type.index()]
    }

    pub fn add_id(&self, component_type: ComponentType, id: Sctid) {
        self.lane(component_type).lock().reserved.push_back(id);
    }

    pub fn add_all(&self, component_type: ComponentType, ids: impl IntoIterator<Item = Sctid>) {
        self.lane(component_type).lock().reserved.extend(ids);
    }

    /// Takes the next reserved identifier and records it as assigned.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BlockExhausted`] if no identifiers of this type
    /// remain. This means the block was sized for fewer components than the
    /// commit is creating.
    pub fn get_id(&self, component_type: ComponentType) -> Result<Sctid> {
        let mut lane = self.lane(component_type).lock();
        let id = lane.reserved.pop_front().ok_or(Error::BlockExhausted {
            component_type,
            namespace: self.namespace,
        })?;
        lane.assigned.push(id);
        Ok(id)
    }

    /// Number of reserved identifiers not yet taken.
    pub fn size(&self, component_type: ComponentType) -> usize {
        self.lane(component_type).lock().reserved.len()
    }

    /// Snapshot of the identifiers taken so far, in the order they were
    /// taken.
    pub fn ids_assigned(&self, component_type: ComponentType) -> Vec<Sctid> {
        self.lane(component_type).lock().assigned.clone()
    }
}
