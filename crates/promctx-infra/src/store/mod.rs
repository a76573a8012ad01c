//! Knowledge base persistence

pub mod json;
pub mod memory;

use crate::Result;
use async_trait::async_trait;
use promctx_core::KnowledgeBase;

/// Loads and saves the whole knowledge base as one unit.
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// Loads the stored knowledge base. A store that was never written
    /// yields the empty knowledge base.
    async fn load(&self) -> Result<KnowledgeBase>;

    /// Replaces the stored knowledge base.
    async fn save(&self, knowledge: &KnowledgeBase) -> Result<()>;
}
