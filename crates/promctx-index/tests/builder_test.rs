//! Integration tests for the index builder

use async_trait::async_trait;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use promctx_core::{
    CoreError, IndexConfig, KnowledgeBase, MonitoringStore, Result as CoreResult, Series, SynonymIndex,
    SynonymProvider,
};
use promctx_index::{BuildError, BuildStage, BuildState, IndexBuilder, SnapshotHandle};
use promctx_infra::{CancellationToken, JsonFileStore, KnowledgeStore, MemoryStore};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn names(prefix: &str, count: usize) -> Vec<String> {
    (0..count).map(|i| format!("{}{:02}", prefix, i)).collect()
}

fn series(pairs: &[(&str, &str)]) -> Series {
    Series::new(
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    )
}

#[derive(Default)]
struct FakeMonitoring {
    metrics: Vec<String>,
    labels: Vec<String>,
    descriptions: BTreeMap<String, String>,
    series: Vec<Series>,
    fail_catalog: AtomicBool,
    selectors: Mutex<Vec<String>>,
}

impl FakeMonitoring {
    fn new(metrics: Vec<String>, labels: Vec<String>) -> Self {
        Self {
            metrics,
            labels,
            ..Default::default()
        }
    }

    fn with_series(mut self, series: Vec<Series>) -> Self {
        self.series = series;
        self
    }
}

#[async_trait]
impl MonitoringStore for FakeMonitoring {
    async fn list_metric_names(&self) -> CoreResult<Vec<String>> {
        Ok(self.metrics.clone())
    }

    async fn list_label_names(&self) -> CoreResult<Vec<String>> {
        Ok(self.labels.clone())
    }

    async fn metric_descriptions(&self) -> CoreResult<BTreeMap<String, String>> {
        Ok(self.descriptions.clone())
    }

    async fn query_label_combinations(&self, selector: &str) -> CoreResult<Vec<Series>> {
        self.selectors.lock().push(selector.to_string());
        if self.fail_catalog.load(Ordering::SeqCst) {
            return Err(CoreError::external("prometheus", "query failed"));
        }
        let wanted: Vec<&str> = selector
            .trim_start_matches("{__name__=~\"")
            .trim_end_matches("\"}")
            .split('|')
            .collect();
        Ok(self
            .series
            .iter()
            .filter(|s| s.metric_name().map_or(false, |m| wanted.contains(&m)))
            .cloned()
            .collect())
    }
}

#[derive(Default)]
struct FakeSynonyms {
    metric_batches: Mutex<Vec<Vec<String>>>,
    label_batches: Mutex<Vec<Vec<String>>>,
    fail_on: Option<String>,
    omit: Option<String>,
    extra: Option<String>,
    delay: Option<Duration>,
}

impl FakeSynonyms {
    fn respond(&self, names: Vec<String>) -> CoreResult<BTreeMap<String, Vec<String>>> {
        if let Some(bad) = &self.fail_on {
            if names.contains(bad) {
                return Err(CoreError::external("llm", format!("cannot handle {}", bad)));
            }
        }
        let mut out: BTreeMap<String, Vec<String>> = names
            .into_iter()
            .filter(|n| Some(n) != self.omit.as_ref())
            .map(|n| {
                let alias = format!("{} alias", n);
                (n, vec![alias])
            })
            .collect();
        if let Some(extra) = &self.extra {
            out.insert(extra.clone(), vec!["stray".to_string()]);
        }
        Ok(out)
    }

    fn metric_batches(&self) -> Vec<Vec<String>> {
        let mut batches = self.metric_batches.lock().clone();
        batches.sort();
        batches
    }
}

#[async_trait]
impl SynonymProvider for FakeSynonyms {
    async fn generate_metric_synonyms(
        &self,
        batch: BTreeMap<String, String>,
    ) -> CoreResult<BTreeMap<String, Vec<String>>> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let names: Vec<String> = batch.into_keys().collect();
        self.metric_batches.lock().push(names.clone());
        self.respond(names)
    }

    async fn generate_label_synonyms(
        &self,
        batch: Vec<String>,
    ) -> CoreResult<BTreeMap<String, Vec<String>>> {
        self.label_batches.lock().push(batch.clone());
        self.respond(batch)
    }
}

fn builder(
    monitoring: Arc<FakeMonitoring>,
    synonyms: Arc<FakeSynonyms>,
    store: Arc<dyn KnowledgeStore>,
) -> IndexBuilder {
    IndexBuilder::new(monitoring, synonyms, store, IndexConfig::default())
}

#[tokio::test]
async fn test_first_build_indexes_live_catalog() {
    let monitoring = Arc::new(
        FakeMonitoring::new(
            names("metric_", 12),
            vec!["__name__".to_string(), "job".to_string(), "mode".to_string()],
        )
        .with_series(vec![
            series(&[("__name__", "metric_00"), ("job", "node"), ("mode", "idle")]),
            series(&[("__name__", "metric_00"), ("job", "node"), ("mode", "user")]),
            series(&[("__name__", "metric_11"), ("job", "api")]),
        ]),
    );
    let synonyms = Arc::new(FakeSynonyms::default());
    let store = Arc::new(MemoryStore::new());
    let builder = builder(monitoring, synonyms.clone(), store.clone());

    let report = builder.build(&CancellationToken::new()).await.unwrap();

    assert_eq!(report.new_metrics, 12);
    assert_eq!(report.metric_batches, 2);
    assert_eq!(report.new_labels, 2);
    assert_eq!(report.label_batches, 1);
    assert_eq!(report.new_catalog_metrics, 2);
    assert_eq!(report.catalog_batches, 1);

    assert_eq!(
        synonyms.metric_batches(),
        vec![names("metric_", 10), vec!["metric_10".to_string(), "metric_11".to_string()]]
    );
    assert_eq!(
        synonyms.label_batches.lock().clone(),
        vec![vec!["job".to_string(), "mode".to_string()]]
    );

    let kb = builder.snapshot().current();
    assert!(kb.metric_index.lookup("metric_03 alias").contains("metric_03"));
    assert!(!kb.label_index.is_known("__name__"));
    assert_eq!(
        kb.metric_labels.values_for("metric_00", "mode").unwrap().to_sorted_vec(),
        vec!["idle".to_string(), "user".to_string()]
    );
    assert_eq!(
        kb.label_values.values_for("job").unwrap().to_sorted_vec(),
        vec!["api".to_string(), "node".to_string()]
    );

    assert_eq!(store.save_count(), 1);
    assert_eq!(store.snapshot().await, *kb);

    let status = builder.status();
    assert_eq!(status.state, BuildState::Completed);
    assert!(status.finished_at.is_some());
}

#[tokio::test]
async fn test_rebuild_is_byte_identical() {
    let dir = tempfile::tempdir().unwrap();
    let monitoring = Arc::new(
        FakeMonitoring::new(names("m", 5), vec!["instance".to_string()])
            .with_series(vec![series(&[("__name__", "m00"), ("instance", "a:9100")])]),
    );

    let first = Arc::new(FakeSynonyms::default());
    builder(monitoring.clone(), first, Arc::new(JsonFileStore::new(dir.path())))
        .build(&CancellationToken::new())
        .await
        .unwrap();
    let before = std::fs::read(dir.path().join("metric_map.json")).unwrap();
    let labels_before = std::fs::read(dir.path().join("label_map.json")).unwrap();

    let second = Arc::new(FakeSynonyms::default());
    let report = builder(monitoring, second.clone(), Arc::new(JsonFileStore::new(dir.path())))
        .build(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.new_metrics, 0);
    assert_eq!(report.new_labels, 0);
    assert!(second.metric_batches().is_empty());
    assert_eq!(std::fs::read(dir.path().join("metric_map.json")).unwrap(), before);
    assert_eq!(std::fs::read(dir.path().join("label_map.json")).unwrap(), labels_before);

    let loaded = JsonFileStore::new(dir.path()).load().await.unwrap();
    assert_eq!(loaded.metric_index.known().len(), 5);
}

#[tokio::test]
async fn test_failed_batch_keeps_other_batches_merged() {
    let monitoring = Arc::new(FakeMonitoring::default());
    let synonyms = Arc::new(FakeSynonyms {
        fail_on: Some("m15".to_string()),
        ..Default::default()
    });
    let builder = builder(monitoring, synonyms, Arc::new(MemoryStore::new()));

    let live = names("m", 25);
    let mut index = SynonymIndex::new();
    let err = builder
        .update_metric_index(&mut index, &live, &BTreeMap::new(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.batch(), Some(1));
    assert_eq!(err.stage(), Some(BuildStage::UpdatingMetricIndex));
    assert!(matches!(err, BuildError::ExternalService { .. }));

    for name in &live[..10] {
        assert!(index.is_known(name), "{} should be merged", name);
    }
    for name in &live[10..20] {
        assert!(!index.is_known(name), "{} should not be merged", name);
    }
    for name in &live[20..] {
        assert!(index.is_known(name), "{} should be merged", name);
    }
    assert_eq!(index.diff(&live), live[10..20].to_vec());
}

#[tokio::test]
async fn test_failed_build_persists_nothing() {
    let monitoring = Arc::new(FakeMonitoring::new(names("m", 25), vec![]));
    let synonyms = Arc::new(FakeSynonyms {
        fail_on: Some("m15".to_string()),
        ..Default::default()
    });
    let store = Arc::new(MemoryStore::new());
    let builder = builder(monitoring, synonyms, store.clone());

    let err = builder.build(&CancellationToken::new()).await.unwrap_err();

    assert_eq!(err.batch(), Some(1));
    assert_eq!(store.save_count(), 0);
    assert!(!builder.snapshot().is_published());

    let status = builder.status();
    assert_eq!(status.state, BuildState::Failed);
    assert_eq!(status.stage, Some(BuildStage::UpdatingMetricIndex));
    assert!(status.last_error.unwrap().contains("m15"));
}

#[tokio::test]
async fn test_provider_omissions_and_extras() {
    let monitoring = Arc::new(FakeMonitoring::default());
    let synonyms = Arc::new(FakeSynonyms {
        omit: Some("m01".to_string()),
        extra: Some("never_asked".to_string()),
        ..Default::default()
    });
    let builder = builder(monitoring, synonyms, Arc::new(MemoryStore::new()));

    let mut index = SynonymIndex::new();
    let report = builder
        .update_metric_index(&mut index, &names("m", 3), &BTreeMap::new(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.updated, 3);
    assert!(index.is_known("m01"));
    assert!(index.lookup("m01").contains("m01"));
    assert!(index.lookup("m01 alias").is_empty());
    assert!(!index.is_known("never_asked"));
}

#[tokio::test]
async fn test_catalog_failure_fails_build() {
    let monitoring = Arc::new(FakeMonitoring::new(names("m", 3), vec![]));
    monitoring.fail_catalog.store(true, Ordering::SeqCst);
    let store = Arc::new(MemoryStore::new());
    let builder = builder(monitoring, Arc::new(FakeSynonyms::default()), store.clone());

    let err = builder.build(&CancellationToken::new()).await.unwrap_err();

    assert_eq!(err.stage(), Some(BuildStage::UpdatingCatalogs));
    assert_eq!(store.save_count(), 0);
}

#[tokio::test]
async fn test_metrics_without_series_are_queried_again() {
    let monitoring = Arc::new(
        FakeMonitoring::new(vec!["ghost".to_string(), "up".to_string()], vec![])
            .with_series(vec![series(&[("__name__", "up"), ("job", "node")])]),
    );
    let builder = builder(
        monitoring.clone(),
        Arc::new(FakeSynonyms::default()),
        Arc::new(MemoryStore::new()),
    );

    builder.build(&CancellationToken::new()).await.unwrap();
    let kb = builder.snapshot().current();
    assert!(kb.metric_labels.contains_metric("up"));
    assert!(!kb.metric_labels.contains_metric("ghost"));

    builder.build(&CancellationToken::new()).await.unwrap();
    let selectors = monitoring.selectors.lock().clone();
    assert_eq!(
        selectors,
        vec![
            r#"{__name__=~"ghost|up"}"#.to_string(),
            r#"{__name__=~"ghost"}"#.to_string(),
        ]
    );
}

#[tokio::test]
async fn test_second_build_is_rejected_while_running() {
    let monitoring = Arc::new(FakeMonitoring::new(names("m", 3), vec![]));
    let synonyms = Arc::new(FakeSynonyms {
        delay: Some(Duration::from_millis(300)),
        ..Default::default()
    });
    let builder = Arc::new(builder(monitoring, synonyms, Arc::new(MemoryStore::new())));

    let running = {
        let builder = Arc::clone(&builder);
        tokio::spawn(async move { builder.build(&CancellationToken::new()).await })
    };

    let mut observed = false;
    for _ in 0..100 {
        let status = builder.status();
        if status.is_running() && status.stage == Some(BuildStage::UpdatingMetricIndex) {
            observed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(observed, "build never reached the metric index stage");

    let err = builder.build(&CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, BuildError::AlreadyRunning));

    running.await.unwrap().unwrap();
    assert_eq!(builder.status().state, BuildState::Completed);
}

#[tokio::test]
async fn test_cancelled_build() {
    let monitoring = Arc::new(FakeMonitoring::new(names("m", 3), vec![]));
    let store = Arc::new(MemoryStore::new());
    let builder = builder(monitoring, Arc::new(FakeSynonyms::default()), store.clone());

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = builder.build(&cancel).await.unwrap_err();

    assert!(matches!(
        err,
        BuildError::Cancelled {
            stage: BuildStage::FetchingNames
        }
    ));
    assert_eq!(store.save_count(), 0);
}

async fn wait_for_stage(builder: &IndexBuilder, stage: BuildStage) {
    for _ in 0..200 {
        let status = builder.status();
        if status.is_running() && status.stage == Some(stage) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("build never reached {}", stage);
}

#[tokio::test]
async fn test_cancel_while_batches_in_flight() {
    let monitoring = Arc::new(FakeMonitoring::new(names("m", 25), vec![]));
    let synonyms = Arc::new(FakeSynonyms {
        delay: Some(Duration::from_secs(30)),
        ..Default::default()
    });
    let store = Arc::new(MemoryStore::new());
    let builder = Arc::new(builder(monitoring, synonyms.clone(), store.clone()));
    let cancel = CancellationToken::new();

    let running = {
        let builder = Arc::clone(&builder);
        let cancel = cancel.clone();
        tokio::spawn(async move { builder.build(&cancel).await })
    };

    wait_for_stage(&builder, BuildStage::UpdatingMetricIndex).await;
    cancel.cancel();

    let err = tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .expect("build did not stop after cancellation")
        .unwrap()
        .unwrap_err();

    assert!(matches!(
        err,
        BuildError::Cancelled {
            stage: BuildStage::UpdatingMetricIndex
        }
    ));
    assert!(synonyms.metric_batches().is_empty());
    assert_eq!(store.save_count(), 0);
    assert!(!builder.snapshot().is_published());
    assert_eq!(builder.status().state, BuildState::Failed);
}

#[tokio::test]
async fn test_readers_see_previous_snapshot_during_build() {
    let mut seeded = KnowledgeBase::new();
    seeded.metric_index.merge("legacy_metric", ["legacy"]);
    let snapshot = SnapshotHandle::with_knowledge(seeded);

    let monitoring = Arc::new(FakeMonitoring::new(names("m", 3), vec![]));
    let synonyms = Arc::new(FakeSynonyms {
        delay: Some(Duration::from_millis(300)),
        ..Default::default()
    });
    let builder = Arc::new(
        builder(monitoring, synonyms, Arc::new(MemoryStore::new())).with_snapshot(snapshot.clone()),
    );

    let running = {
        let builder = Arc::clone(&builder);
        tokio::spawn(async move { builder.build(&CancellationToken::new()).await })
    };

    wait_for_stage(&builder, BuildStage::UpdatingMetricIndex).await;
    let during = snapshot.current();
    assert_eq!(snapshot.version(), 1);
    assert!(during.metric_index.lookup("legacy").contains("legacy_metric"));
    assert!(!during.metric_index.is_known("m00"));

    running.await.unwrap().unwrap();

    let after = snapshot.current();
    assert_eq!(snapshot.version(), 2);
    assert!(after.metric_index.lookup("m00 alias").contains("m00"));
    assert!(after.metric_index.lookup("legacy").contains("legacy_metric"));
    // the reader's Arc is untouched by the publish
    assert!(!during.metric_index.is_known("m00"));
}
