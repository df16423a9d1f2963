use crate::event::{Entity, Location, MonitoringEvent};
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::Direction;
use std::collections::{BTreeMap, HashMap};

/// Handle to a live transaction in a [`TransactionTree`]
pub type TransactionRef = NodeIndex;

/// Edge from a nested transaction to the transaction it was started inside
#[derive(Debug, Clone, Copy)]
pub struct NestedIn;

/// A write registered on an active transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingWrite {
    pub event: MonitoringEvent,
    /// Position of the write in the replayed trace
    pub index: usize,
    /// Call frame the write was issued from (0 = outside any service candidate)
    pub branch: u64,
}

#[derive(Debug, Clone)]
pub struct Transaction {
    pub id: String,
    pending_writes: BTreeMap<Entity, PendingWrite>,
}

/// What happened to a transaction's writes when it finished
#[derive(Debug, Clone)]
pub struct Completed {
    pub transaction_id: String,
    pub writes: Vec<(Entity, PendingWrite)>,
    /// Parent that absorbed the writes on a nested commit
    pub merged_into: Option<String>,
}

/// Live transactions and the binding table from locations to the innermost
/// transaction bound there.
///
/// Transactions form a forest: starting a transaction at an already bound
/// location nests it under the bound one. Edges point child to parent only.
#[derive(Debug, Default)]
pub struct TransactionTree {
    graph: StableDiGraph<Transaction, NestedIn>,
    bindings: HashMap<Location, TransactionRef>,
}

impl TransactionTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bound(&self, location: &Location) -> Option<TransactionRef> {
        self.bindings.get(location).copied()
    }

    pub fn id(&self, tx: TransactionRef) -> &str {
        self.graph
            .node_weight(tx)
            .map(|t| t.id.as_str())
            .unwrap_or_default()
    }

    pub fn parent(&self, tx: TransactionRef) -> Option<TransactionRef> {
        self.graph
            .neighbors_directed(tx, Direction::Outgoing)
            .next()
    }

    /// Strict ancestors, innermost first
    pub fn ancestors(&self, tx: TransactionRef) -> impl Iterator<Item = TransactionRef> + '_ {
        std::iter::successors(self.parent(tx), move |&p| self.parent(p))
    }

    /// Is a transaction with this id bound at the location, directly or as an
    /// ancestor of the bound one?
    pub fn is_bound(&self, location: &Location, transaction_id: &str) -> bool {
        let Some(bound) = self.bound(location) else {
            return false;
        };
        std::iter::once(bound)
            .chain(self.ancestors(bound))
            .any(|tx| self.id(tx) == transaction_id)
    }

    /// Start a transaction at `location`, nested under whatever is bound
    /// there, and bind it.
    pub fn begin(&mut self, transaction_id: &str, location: &Location) -> TransactionRef {
        let parent = self.bound(location);
        let tx = self.graph.add_node(Transaction {
            id: transaction_id.to_string(),
            pending_writes: BTreeMap::new(),
        });
        if let Some(parent) = parent {
            self.graph.add_edge(tx, parent, NestedIn);
        }
        self.bindings.insert(location.clone(), tx);
        tx
    }

    /// First strict ancestor holding a pending write of `entity`
    pub fn conflicting_ancestor(
        &self,
        tx: TransactionRef,
        entity: &Entity,
    ) -> Option<(TransactionRef, &PendingWrite)> {
        self.ancestors(tx).find_map(|ancestor| {
            self.graph
                .node_weight(ancestor)
                .and_then(|t| t.pending_writes.get(entity))
                .map(|write| (ancestor, write))
        })
    }

    pub fn pending_write(&self, tx: TransactionRef, entity: &Entity) -> Option<&PendingWrite> {
        self.graph
            .node_weight(tx)
            .and_then(|t| t.pending_writes.get(entity))
    }

    /// Register a write on the transaction, replacing an earlier write of the same entity
    pub fn register_write(&mut self, tx: TransactionRef, entity: Entity, write: PendingWrite) {
        if let Some(transaction) = self.graph.node_weight_mut(tx) {
            transaction.pending_writes.insert(entity, write);
        }
    }

    /// Commit the transaction bound at `location`. A nested commit hands its
    /// writes to the parent; the parent is bound again either way.
    pub fn commit(&mut self, location: &Location) -> Option<Completed> {
        let (transaction, parent) = self.unbind(location)?;
        let writes: Vec<_> = transaction.pending_writes.into_iter().collect();

        let merged_into = parent.and_then(|parent| {
            let parent_tx = self.graph.node_weight_mut(parent)?;
            for (entity, write) in &writes {
                parent_tx.pending_writes.insert(entity.clone(), write.clone());
            }
            Some(parent_tx.id.clone())
        });

        Some(Completed {
            transaction_id: transaction.id,
            writes,
            merged_into,
        })
    }

    /// Abort the transaction bound at `location`; its writes are dropped and
    /// the parent is left untouched.
    pub fn abort(&mut self, location: &Location) -> Option<Completed> {
        let (transaction, _) = self.unbind(location)?;
        Some(Completed {
            transaction_id: transaction.id,
            writes: transaction.pending_writes.into_iter().collect(),
            merged_into: None,
        })
    }

    /// Locations that still have a transaction bound
    pub fn open_bindings(&self) -> impl Iterator<Item = (&Location, &str)> {
        self.bindings
            .iter()
            .map(|(location, tx)| (location, self.id(*tx)))
    }

    fn unbind(&mut self, location: &Location) -> Option<(Transaction, Option<TransactionRef>)> {
        let tx = self.bindings.remove(location)?;
        let parent = self.parent(tx);
        let transaction = self.graph.remove_node(tx)?;
        if let Some(parent) = parent {
            self.bindings.insert(location.clone(), parent);
        }
        Some((transaction, parent))
    }
}
