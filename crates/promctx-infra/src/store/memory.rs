//! In-memory knowledge store
//!
//! Keeps the knowledge base in process. Useful for tests and for runs that
//! should not touch the filesystem.

use super::KnowledgeStore;
use crate::{InfraError, Result};
use async_trait::async_trait;
use promctx_core::KnowledgeBase;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    knowledge: Arc<RwLock<KnowledgeBase>>,
    saves: Arc<AtomicUsize>,
    fail_saves: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with `knowledge`.
    pub fn with_knowledge(knowledge: KnowledgeBase) -> Self {
        Self {
            knowledge: Arc::new(RwLock::new(knowledge)),
            ..Default::default()
        }
    }

    /// Number of successful saves so far.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Makes subsequent saves fail with [`InfraError::Unavailable`].
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    pub async fn snapshot(&self) -> KnowledgeBase {
        self.knowledge.read().await.clone()
    }
}

#[async_trait]
impl KnowledgeStore for MemoryStore {
    async fn load(&self) -> Result<KnowledgeBase> {
        Ok(self.knowledge.read().await.clone())
    }

    async fn save(&self, knowledge: &KnowledgeBase) -> Result<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(InfraError::Unavailable("memory store rejects saves".to_string()));
        }
        *self.knowledge.write().await = knowledge.clone();
        let saves = self.saves.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(saves, "Knowledge base stored in memory");
        Ok(())
    }
}
