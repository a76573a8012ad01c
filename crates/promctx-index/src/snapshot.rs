//! Copy-on-write publication of the knowledge base

use parking_lot::RwLock;
use promctx_core::KnowledgeBase;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Handle to the currently published knowledge base.
///
/// Readers hold on to the `Arc` they got from [`SnapshotHandle::current`]
/// for the duration of a request; a publish swaps the pointer and never
/// mutates a snapshot someone may be reading.
#[derive(Debug, Clone, Default)]
pub struct SnapshotHandle {
    current: Arc<RwLock<Arc<KnowledgeBase>>>,
    version: Arc<AtomicU64>,
}

impl SnapshotHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_knowledge(knowledge: KnowledgeBase) -> Self {
        let handle = Self::new();
        handle.publish(knowledge);
        handle
    }

    pub fn current(&self) -> Arc<KnowledgeBase> {
        Arc::clone(&self.current.read())
    }

    pub fn publish(&self, knowledge: KnowledgeBase) {
        *self.current.write() = Arc::new(knowledge);
        self.version.fetch_add(1, Ordering::SeqCst);
    }

    /// Number of publishes so far; zero until something was published.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    pub fn is_published(&self) -> bool {
        self.version() > 0
    }
}
