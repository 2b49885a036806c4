use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock};

static NEXT_ARENA: AtomicU32 = AtomicU32::new(0);

/// Stable handle to a node of one [`Arena`].
/// The arena tag catches handles passed to the wrong runtime.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct EvalId {
    index: u32,
    arena: u32,
}

impl EvalId {
    pub fn index(self) -> u32 {
        self.index
    }
}

/// Append-only arena. Nodes are never freed, so a handed-out id stays
/// valid for the arena's lifetime and nodes can be read while others are
/// being allocated.
pub struct Arena<T> {
    tag: u32,
    nodes: RwLock<Vec<Arc<T>>>,
}

impl<T> Arena<T> {
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            tag: NEXT_ARENA.fetch_add(1, Ordering::Relaxed),
            nodes: RwLock::new(Vec::with_capacity(capacity)),
        }
    }

    /// Allocate a new node, returning its id.
    pub fn alloc(&self, node: T) -> EvalId {
        let mut nodes = self.nodes.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        let index = nodes.len() as u32;
        nodes.push(Arc::new(node));
        EvalId {
            index,
            arena: self.tag,
        }
    }

    /// Check that an id was allocated by this arena.
    pub fn is_valid(&self, id: EvalId) -> bool {
        id.arena == self.tag && (id.index as usize) < self.len()
    }

    pub fn get(&self, id: EvalId) -> Option<Arc<T>> {
        if id.arena != self.tag {
            return None;
        }
        let nodes = self.nodes.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        nodes.get(id.index as usize).cloned()
    }

    pub fn len(&self) -> usize {
        self.nodes.read().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arena_alloc_and_get() {
        let arena = Arena::new();
        let first = arena.alloc("first");
        let second = arena.alloc("second");

        assert_ne!(first, second);
        assert_eq!(arena.len(), 2);
        assert_eq!(*arena.get(first).unwrap(), "first");
        assert_eq!(*arena.get(second).unwrap(), "second");
    }

    #[test]
    fn arena_rejects_foreign_ids() {
        let arena: Arena<i32> = Arena::new();
        let other = Arena::new();
        let id = other.alloc(1);

        assert!(other.is_valid(id));
        assert!(!arena.is_valid(id));
        assert!(arena.get(id).is_none());
    }
}
