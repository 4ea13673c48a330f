//! Arena of signals and the parent → derived edges between them.
//!
//! The graph records relations only. A derived signal is kept alive by the
//! edge listener its parent holds, never by the graph, and the graph refers to
//! every signal through a weak handle.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use papaya::{HashMap, Operation};

/// Unique identifier of a signal within its runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SignalId(u64);

impl SignalId {
    /// The raw numeric id.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

/// How a signal was constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// A writable signal created directly on the runtime.
    Source,
    /// Output of `map` / `try_map`.
    Map,
    /// Output of `merge`.
    Merge,
}

pub(crate) trait Disposable: Send + Sync {
    fn dispose(&self);
}

/// Ordered, duplicate-free list of signal ids.
///
/// Clone is cheap as the vector is wrapped by `Arc`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Edges(Arc<Vec<SignalId>>);

impl Edges {
    fn new(ids: impl IntoIterator<Item = SignalId>) -> Self {
        let mut out = Vec::new();
        for id in ids {
            if !out.contains(&id) {
                out.push(id);
            }
        }
        Edges(Arc::new(out))
    }

    #[must_use]
    fn added(&self, id: SignalId) -> Self {
        if self.contains(id) {
            return self.clone();
        }
        let mut ids = Vec::clone(&self.0);
        ids.push(id);
        Edges(Arc::new(ids))
    }

    #[must_use]
    fn removed(&self, id: SignalId) -> Self {
        let mut ids = Vec::clone(&self.0);
        ids.retain(|existing| *existing != id);
        Edges(Arc::new(ids))
    }

    /// Returns true if `id` is in the list.
    pub fn contains(&self, id: SignalId) -> bool {
        self.0.contains(&id)
    }

    /// Returns true if there are no edges.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the number of edges.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterate over the ids in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = SignalId> + '_ {
        self.0.iter().copied()
    }

    /// Copy the ids out.
    pub fn to_vec(&self) -> Vec<SignalId> {
        Vec::clone(&self.0)
    }
}

#[derive(Clone)]
pub(crate) struct Node {
    pub kind: NodeKind,
    pub parents: Edges,
    pub children: Edges,
    pub handle: Weak<dyn Disposable>,
}

pub(crate) struct Graph {
    nodes: HashMap<SignalId, Node, ahash::RandomState>,
    next_id: AtomicU64,
}

impl Default for Graph {
    fn default() -> Self {
        Self {
            nodes: HashMap::with_hasher(ahash::RandomState::new()),
            next_id: AtomicU64::new(1),
        }
    }
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve an id for a signal about to be inserted.
    pub fn allocate(&self) -> SignalId {
        SignalId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Insert a node and link it under each live parent.
    pub fn insert(
        &self,
        id: SignalId,
        kind: NodeKind,
        parents: Vec<SignalId>,
        handle: Weak<dyn Disposable>,
    ) {
        let parents = Edges::new(parents);
        self.nodes.pin().insert(
            id,
            Node {
                kind,
                parents: parents.clone(),
                children: Edges::default(),
                handle,
            },
        );
        for parent in parents.iter() {
            self.update(parent, |node| {
                let mut node = node.clone();
                node.children = node.children.added(id);
                Some(node)
            });
        }
    }

    /// Remove a node and unlink it from both its parents and its children.
    ///
    /// Returns the removed node so the caller can cascade over its children.
    pub fn detach(&self, id: SignalId) -> Option<Node> {
        let removed = self.nodes.pin().remove(&id).cloned()?;
        for parent in removed.parents.iter() {
            self.update(parent, |node| {
                let mut node = node.clone();
                node.children = node.children.removed(id);
                Some(node)
            });
        }
        for child in removed.children.iter() {
            self.update(child, |node| {
                let mut node = node.clone();
                node.parents = node.parents.removed(id);
                Some(node)
            });
        }
        Some(removed)
    }

    fn update(&self, id: SignalId, f: impl Fn(&Node) -> Option<Node>) {
        let pinned = self.nodes.pin();
        let _ = pinned.compute(id, |entry| match entry.and_then(|(_, node)| f(node)) {
            Some(node) => Operation::Insert(node),
            None => Operation::Abort(()),
        });
    }

    pub fn contains(&self, id: SignalId) -> bool {
        self.nodes.pin().contains_key(&id)
    }

    pub fn kind(&self, id: SignalId) -> Option<NodeKind> {
        self.nodes.pin().get(&id).map(|node| node.kind)
    }

    pub fn parents(&self, id: SignalId) -> Option<Edges> {
        self.nodes.pin().get(&id).map(|node| node.parents.clone())
    }

    pub fn children(&self, id: SignalId) -> Option<Edges> {
        self.nodes.pin().get(&id).map(|node| node.children.clone())
    }

    pub fn handle(&self, id: SignalId) -> Option<Weak<dyn Disposable>> {
        self.nodes.pin().get(&id).map(|node| node.handle.clone())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }
}
