//! Incremental index builder
//!
//! A build diffs the monitoring store's live catalog against the names
//! already indexed, asks the synonym provider about the new names in
//! concurrent batches, refreshes the metric/label/value catalogs, and
//! persists and publishes the result only when every stage succeeded.

use crate::error::{BuildError, Result};
use crate::snapshot::SnapshotHandle;
use crate::status::{BuildStage, BuildStatus, StatusTracker};
use promctx_core::{
    CoreError, IndexConfig, KnowledgeBase, LabelValueCatalog, MetricLabelCatalog,
    MonitoringStore, Series, SynonymIndex, SynonymProvider, METRIC_NAME_LABEL,
};
use promctx_infra::{
    batches, BatchDispatcher, CallGuard, CancellationToken, DispatchOutcome, FailurePolicy,
    KnowledgeStore,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

type SynonymBatch = BTreeMap<String, Vec<String>>;

/// Work done by one index-update or catalog stage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageReport {
    /// Names merged or metrics recorded.
    pub updated: usize,
    pub batches: usize,
}

/// Summary of a successful build
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildReport {
    pub new_metrics: usize,
    pub new_labels: usize,
    pub new_catalog_metrics: usize,
    pub metric_batches: usize,
    pub label_batches: usize,
    pub catalog_batches: usize,
    pub elapsed: Duration,
}

/// Builds and maintains the knowledge base
pub struct IndexBuilder {
    monitoring: Arc<dyn MonitoringStore>,
    synonyms: Arc<dyn SynonymProvider>,
    store: Arc<dyn KnowledgeStore>,
    snapshot: SnapshotHandle,
    config: IndexConfig,
    guard: CallGuard,
    status: StatusTracker,
    in_flight: Mutex<()>,
}

impl IndexBuilder {
    pub fn new(
        monitoring: Arc<dyn MonitoringStore>,
        synonyms: Arc<dyn SynonymProvider>,
        store: Arc<dyn KnowledgeStore>,
        config: IndexConfig,
    ) -> Self {
        let guard = CallGuard::new(config.call_timeout());
        Self {
            monitoring,
            synonyms,
            store,
            snapshot: SnapshotHandle::new(),
            config,
            guard,
            status: StatusTracker::new(),
            in_flight: Mutex::new(()),
        }
    }

    /// Publishes into an existing handle instead of a private one.
    pub fn with_snapshot(mut self, snapshot: SnapshotHandle) -> Self {
        self.snapshot = snapshot;
        self
    }

    pub fn snapshot(&self) -> SnapshotHandle {
        self.snapshot.clone()
    }

    pub fn status(&self) -> BuildStatus {
        self.status.snapshot()
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    /// Loads the persisted knowledge base and publishes it without building.
    pub async fn load(&self) -> Result<Arc<KnowledgeBase>> {
        let knowledge = self.store.load().await.map_err(|source| BuildError::Store {
            stage: BuildStage::Loading,
            source,
        })?;
        self.snapshot.publish(knowledge);
        Ok(self.snapshot.current())
    }

    /// Runs the full pipeline.
    ///
    /// Fails with [`BuildError::AlreadyRunning`] if another build is in
    /// flight. On failure nothing is persisted and the published snapshot is
    /// left as it was.
    #[instrument(skip(self, cancel))]
    pub async fn build(&self, cancel: &CancellationToken) -> Result<BuildReport> {
        let _flight = self.in_flight.try_lock().map_err(|_| BuildError::AlreadyRunning)?;

        self.status.start();
        let started = Instant::now();

        match self.run_stages(cancel).await {
            Ok((knowledge, mut report)) => {
                self.snapshot.publish(knowledge);
                self.status.complete();
                report.elapsed = started.elapsed();
                info!(
                    new_metrics = report.new_metrics,
                    new_labels = report.new_labels,
                    new_catalog_metrics = report.new_catalog_metrics,
                    elapsed_ms = report.elapsed.as_millis() as u64,
                    "Index build completed"
                );
                Ok(report)
            }
            Err(e) => {
                self.status.fail(&e);
                error!(error = %e, "Index build failed");
                Err(e)
            }
        }
    }

    async fn run_stages(&self, cancel: &CancellationToken) -> Result<(KnowledgeBase, BuildReport)> {
        let mut report = BuildReport::default();

        self.status.enter(BuildStage::Loading);
        let mut working = if self.snapshot.is_published() {
            (*self.snapshot.current()).clone()
        } else {
            self.store.load().await.map_err(|source| BuildError::Store {
                stage: BuildStage::Loading,
                source,
            })?
        };

        let metric_names = self
            .call(BuildStage::FetchingNames, "list_metric_names", cancel, self.monitoring.list_metric_names())
            .await?;
        let descriptions = self
            .call(
                BuildStage::FetchingDescriptions,
                "metric_descriptions",
                cancel,
                self.monitoring.metric_descriptions(),
            )
            .await?;

        self.status.enter(BuildStage::UpdatingMetricIndex);
        let metrics = self
            .update_metric_index(&mut working.metric_index, &metric_names, &descriptions, cancel)
            .await?;
        report.new_metrics = metrics.updated;
        report.metric_batches = metrics.batches;

        let label_names = self
            .call(BuildStage::FetchingLabels, "list_label_names", cancel, self.monitoring.list_label_names())
            .await?;

        self.status.enter(BuildStage::UpdatingLabelIndex);
        let labels = self
            .update_label_index(&mut working.label_index, &label_names, cancel)
            .await?;
        report.new_labels = labels.updated;
        report.label_batches = labels.batches;

        self.status.enter(BuildStage::UpdatingCatalogs);
        let catalogs = self
            .refresh_catalogs(
                &mut working.metric_labels,
                &mut working.label_values,
                &metric_names,
                cancel,
            )
            .await?;
        report.new_catalog_metrics = catalogs.updated;
        report.catalog_batches = catalogs.batches;

        self.status.enter(BuildStage::Persisting);
        if cancel.is_cancelled() {
            return Err(BuildError::Cancelled {
                stage: BuildStage::Persisting,
            });
        }
        self.store.save(&working).await.map_err(|source| BuildError::Store {
            stage: BuildStage::Persisting,
            source,
        })?;

        Ok((working, report))
    }

    async fn call<T>(
        &self,
        stage: BuildStage,
        operation: &str,
        cancel: &CancellationToken,
        fut: impl std::future::Future<Output = promctx_core::Result<T>>,
    ) -> Result<T> {
        self.status.enter(stage);
        self.guard
            .run(operation, cancel, fut)
            .await
            .map_err(|e| BuildError::from_guard(stage, e))
    }

    fn dispatcher(&self, name: &str) -> BatchDispatcher {
        BatchDispatcher::new(name, self.guard.clone())
            .with_max_concurrency(self.config.max_concurrent_batches)
    }

    /// Indexes every live metric name not yet in `index`.
    ///
    /// Successful batches are merged even when another batch fails; the
    /// failure with the lowest batch position is returned.
    pub async fn update_metric_index(
        &self,
        index: &mut SynonymIndex,
        live_names: &[String],
        descriptions: &BTreeMap<String, String>,
        cancel: &CancellationToken,
    ) -> Result<StageReport> {
        let fresh = index.diff(live_names);
        if fresh.is_empty() {
            debug!("No new metric names");
            return Ok(StageReport::default());
        }

        let requested = batches(&fresh, self.config.metric_batch_size);
        let units: Vec<BTreeMap<String, String>> = requested
            .iter()
            .map(|batch| {
                batch
                    .iter()
                    .map(|name| {
                        let description = descriptions.get(name).cloned().unwrap_or_default();
                        (name.clone(), description)
                    })
                    .collect()
            })
            .collect();

        info!(names = fresh.len(), batches = units.len(), "Generating metric synonyms");
        let provider = Arc::clone(&self.synonyms);
        let outcome = self
            .dispatcher("metric_synonyms")
            .dispatch(units, cancel, move |_, batch| {
                let provider = Arc::clone(&provider);
                async move { provider.generate_metric_synonyms(batch).await }
            })
            .await;

        merge_batches(index, &requested, outcome, BuildStage::UpdatingMetricIndex)
    }

    /// Indexes every live label name not yet in `index`. The reserved
    /// `__name__` label is skipped.
    pub async fn update_label_index(
        &self,
        index: &mut SynonymIndex,
        live_names: &[String],
        cancel: &CancellationToken,
    ) -> Result<StageReport> {
        let fresh = index.diff(live_names.iter().filter(|name| name.as_str() != METRIC_NAME_LABEL));
        if fresh.is_empty() {
            debug!("No new label names");
            return Ok(StageReport::default());
        }

        let requested = batches(&fresh, self.config.label_batch_size);
        info!(names = fresh.len(), batches = requested.len(), "Generating label synonyms");

        let provider = Arc::clone(&self.synonyms);
        let outcome = self
            .dispatcher("label_synonyms")
            .dispatch(requested.clone(), cancel, move |_, batch| {
                let provider = Arc::clone(&provider);
                async move { provider.generate_label_synonyms(batch).await }
            })
            .await;

        merge_batches(index, &requested, outcome, BuildStage::UpdatingLabelIndex)
    }

    /// Queries label combinations for every metric missing from the catalog.
    ///
    /// Any failed batch fails the stage and nothing is recorded. Metrics
    /// without series stay missing and are queried again next time.
    pub async fn refresh_catalogs(
        &self,
        metric_labels: &mut MetricLabelCatalog,
        label_values: &mut LabelValueCatalog,
        metric_names: &[String],
        cancel: &CancellationToken,
    ) -> Result<StageReport> {
        let missing = metric_labels.missing(metric_names);
        if missing.is_empty() {
            debug!("Catalogs are up to date");
            return Ok(StageReport::default());
        }

        let selectors: Vec<String> = batches(&missing, self.config.catalog_batch_size)
            .iter()
            .map(|batch| name_selector(batch))
            .collect();
        let batch_count = selectors.len();
        info!(metrics = missing.len(), batches = batch_count, "Refreshing label catalogs");

        let monitoring = Arc::clone(&self.monitoring);
        let results = self
            .dispatcher("label_combinations")
            .dispatch(selectors, cancel, move |_, selector| {
                let monitoring = Arc::clone(&monitoring);
                async move { monitoring.query_label_combinations(&selector).await }
            })
            .await
            .resolve(FailurePolicy::FailFast)
            .map_err(|failure| BuildError::from_batch(BuildStage::UpdatingCatalogs, failure))?;

        let before = metric_labels.metric_count();
        for (_, series) in &results {
            record_series(metric_labels, label_values, series);
        }

        Ok(StageReport {
            updated: metric_labels.metric_count() - before,
            batches: batch_count,
        })
    }
}

fn record_series(
    metric_labels: &mut MetricLabelCatalog,
    label_values: &mut LabelValueCatalog,
    series: &[Series],
) {
    for s in series {
        if metric_labels.record_series(s).is_some() {
            label_values.record_series(s);
        }
    }
}

/// `{__name__=~"a|b"}` matching exactly the given metric names.
pub fn name_selector(names: &[String]) -> String {
    let alternatives: Vec<String> = names
        .iter()
        .map(|name| regex::escape(name).replace('\\', "\\\\"))
        .collect();
    format!("{{{}=~\"{}\"}}", METRIC_NAME_LABEL, alternatives.join("|"))
}

fn merge_batches(
    index: &mut SynonymIndex,
    requested: &[Vec<String>],
    outcome: DispatchOutcome<SynonymBatch, CoreError>,
    stage: BuildStage,
) -> Result<StageReport> {
    let batch_count = outcome.len();
    let (successes, first_failure) = outcome.into_parts();

    let mut merged = 0;
    for (position, mut response) in successes {
        let Some(names) = requested.get(position) else {
            continue;
        };
        for name in names {
            let synonyms = response.remove(name).unwrap_or_default();
            if synonyms.is_empty() {
                debug!(name = %name, "No synonyms returned");
            }
            index.merge(name, synonyms);
            merged += 1;
        }
        for unexpected in response.keys() {
            warn!(stage = %stage, batch = position, name = %unexpected, "Ignoring unrequested name in synonym response");
        }
    }

    if let Some(failure) = first_failure {
        warn!(stage = %stage, merged, "Synonym stage finished with failed batches");
        return Err(BuildError::from_batch(stage, failure));
    }

    Ok(StageReport {
        updated: merged,
        batches: batch_count,
    })
}
