//! # promctx index
//!
//! Builds the synonym indexes and the label catalogs from the monitoring
//! store and the synonym provider, tracks build progress, and publishes
//! finished knowledge bases as immutable snapshots.

pub mod builder;
pub mod error;
pub mod snapshot;
pub mod status;

pub use builder::{name_selector, BuildReport, IndexBuilder, StageReport};
pub use error::{BuildError, Result};
pub use snapshot::SnapshotHandle;
pub use status::{BuildStage, BuildState, BuildStatus, StatusTracker};
