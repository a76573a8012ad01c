//! Observable build progress

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// Pipeline stage of a running build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStage {
    Loading,
    FetchingNames,
    FetchingDescriptions,
    UpdatingMetricIndex,
    FetchingLabels,
    UpdatingLabelIndex,
    UpdatingCatalogs,
    Persisting,
}

impl BuildStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildStage::Loading => "loading",
            BuildStage::FetchingNames => "fetching_names",
            BuildStage::FetchingDescriptions => "fetching_descriptions",
            BuildStage::UpdatingMetricIndex => "updating_metric_index",
            BuildStage::FetchingLabels => "fetching_labels",
            BuildStage::UpdatingLabelIndex => "updating_label_index",
            BuildStage::UpdatingCatalogs => "updating_catalogs",
            BuildStage::Persisting => "persisting",
        }
    }
}

impl fmt::Display for BuildStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildState {
    #[default]
    Idle,
    Running,
    Completed,
    Failed,
}

/// Point-in-time view of the builder
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildStatus {
    pub state: BuildState,
    /// Current stage while running, the failing stage after a failure.
    pub stage: Option<BuildStage>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl BuildStatus {
    pub fn is_running(&self) -> bool {
        self.state == BuildState::Running
    }
}

/// Shared, lock-protected build status.
///
/// Writers are the single in-flight build; readers take a clone and never
/// wait on the build itself.
#[derive(Debug, Clone, Default)]
pub struct StatusTracker {
    inner: Arc<RwLock<BuildStatus>>,
}

impl StatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> BuildStatus {
        self.inner.read().clone()
    }

    pub fn start(&self) {
        let mut status = self.inner.write();
        status.state = BuildState::Running;
        status.stage = None;
        status.started_at = Some(Utc::now());
        status.finished_at = None;
        status.last_error = None;
    }

    pub fn enter(&self, stage: BuildStage) {
        self.inner.write().stage = Some(stage);
        info!(stage = %stage, "Build stage started");
    }

    pub fn complete(&self) {
        let mut status = self.inner.write();
        status.state = BuildState::Completed;
        status.stage = None;
        status.finished_at = Some(Utc::now());
    }

    /// Marks the build failed; the stage it failed in is kept.
    pub fn fail(&self, error: &impl fmt::Display) {
        let mut status = self.inner.write();
        status.state = BuildState::Failed;
        status.finished_at = Some(Utc::now());
        status.last_error = Some(error.to_string());
    }
}
