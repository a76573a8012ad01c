//! File-backed knowledge store
//!
//! The knowledge base is kept as five pretty-printed JSON documents in one
//! directory. Saves stage every document in a temporary sibling and only
//! rename once all of them were written. Documents being replaced are moved
//! aside first and put back if any rename fails, so a failed save leaves the
//! previous set in place.

use super::KnowledgeStore;
use crate::{InfraError, Result};
use async_trait::async_trait;
use promctx_core::KnowledgeBase;
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};

pub const METRIC_INDEX_FILE: &str = "metric_map.json";
pub const LABEL_INDEX_FILE: &str = "label_map.json";
pub const METRIC_LABEL_FILE: &str = "metric_label_map.json";
pub const LABEL_VALUE_FILE: &str = "label_value_map.json";
pub const HISTORY_FILE: &str = "nlp_to_metric_map.json";

/// Knowledge store backed by JSON documents in a directory
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, file: &str) -> PathBuf {
        self.dir.join(file)
    }

    async fn read_document<T>(&self, file: &str) -> Result<T>
    where
        T: DeserializeOwned + Default,
    {
        let path = self.path(file);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "Document missing, starting empty");
                return Ok(T::default());
            }
            Err(e) => return Err(InfraError::io(&path, e)),
        };

        serde_json::from_str(&content).map_err(|e| InfraError::serialization(file, e.to_string()))
    }

    fn render<T: Serialize>(file: &str, value: &T) -> Result<String> {
        serde_json::to_string_pretty(value).map_err(|e| InfraError::serialization(file, e.to_string()))
    }

    async fn remove_staged(staged: &[(PathBuf, PathBuf)]) {
        for (tmp, _) in staged {
            let _ = tokio::fs::remove_file(tmp).await;
        }
    }

    /// Moves the current document at `target` aside. Returns the backup path,
    /// or `None` when there was no document to keep.
    async fn back_up(target: &Path, suffix: u64) -> Result<Option<PathBuf>> {
        match tokio::fs::metadata(target).await {
            Ok(meta) if meta.is_file() => {}
            _ => return Ok(None),
        }
        let mut name = target.as_os_str().to_owned();
        name.push(format!(".bak.{:016x}", suffix));
        let backup = PathBuf::from(name);
        tokio::fs::rename(target, &backup)
            .await
            .map_err(|e| InfraError::io(target, e))?;
        Ok(Some(backup))
    }

    /// Puts every backup back over its target, dropping documents that were
    /// already moved into place without one.
    async fn restore(backups: &[(PathBuf, Option<PathBuf>)]) {
        for (target, backup) in backups {
            match backup {
                Some(backup) => {
                    if let Err(e) = tokio::fs::rename(backup, target).await {
                        warn!(path = %target.display(), error = %e, "Failed to restore previous document");
                    }
                }
                None => {
                    let _ = tokio::fs::remove_file(target).await;
                }
            }
        }
    }
}

#[async_trait]
impl KnowledgeStore for JsonFileStore {
    #[instrument(skip(self), fields(dir = %self.dir.display()))]
    async fn load(&self) -> Result<KnowledgeBase> {
        let knowledge = KnowledgeBase {
            metric_index: self.read_document(METRIC_INDEX_FILE).await?,
            label_index: self.read_document(LABEL_INDEX_FILE).await?,
            metric_labels: self.read_document(METRIC_LABEL_FILE).await?,
            label_values: self.read_document(LABEL_VALUE_FILE).await?,
            history: self.read_document(HISTORY_FILE).await?,
        };

        info!(
            metrics = knowledge.metric_index.known().len(),
            labels = knowledge.label_index.known().len(),
            history_rows = knowledge.history.len(),
            "Loaded knowledge base"
        );
        Ok(knowledge)
    }

    #[instrument(skip(self, knowledge), fields(dir = %self.dir.display()))]
    async fn save(&self, knowledge: &KnowledgeBase) -> Result<()> {
        let documents = [
            (METRIC_INDEX_FILE, Self::render(METRIC_INDEX_FILE, &knowledge.metric_index)?),
            (LABEL_INDEX_FILE, Self::render(LABEL_INDEX_FILE, &knowledge.label_index)?),
            (METRIC_LABEL_FILE, Self::render(METRIC_LABEL_FILE, &knowledge.metric_labels)?),
            (LABEL_VALUE_FILE, Self::render(LABEL_VALUE_FILE, &knowledge.label_values)?),
            (HISTORY_FILE, Self::render(HISTORY_FILE, &knowledge.history)?),
        ];

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| InfraError::io(&self.dir, e))?;

        let suffix: u64 = rand::thread_rng().gen();
        let mut staged = Vec::with_capacity(documents.len());
        for (file, content) in &documents {
            let target = self.path(file);
            let tmp = self.path(&format!("{}.tmp.{:016x}", file, suffix));
            if let Err(e) = tokio::fs::write(&tmp, content).await {
                staged.push((tmp.clone(), target));
                Self::remove_staged(&staged).await;
                return Err(InfraError::io(&tmp, e));
            }
            staged.push((tmp, target));
        }

        let mut backups = Vec::with_capacity(staged.len());
        for (_, target) in &staged {
            match Self::back_up(target, suffix).await {
                Ok(backup) => backups.push((target.clone(), backup)),
                Err(e) => {
                    Self::restore(&backups).await;
                    Self::remove_staged(&staged).await;
                    return Err(e);
                }
            }
        }

        for (i, (tmp, target)) in staged.iter().enumerate() {
            if let Err(e) = tokio::fs::rename(tmp, target).await {
                warn!(path = %target.display(), error = %e, "Failed to move document into place, rolling back");
                Self::remove_staged(&staged[i..]).await;
                Self::restore(&backups).await;
                return Err(InfraError::io(target, e));
            }
        }

        for backup in backups.iter().filter_map(|(_, backup)| backup.as_ref()) {
            let _ = tokio::fs::remove_file(backup).await;
        }

        info!(documents = staged.len(), "Saved knowledge base");
        Ok(())
    }
}
