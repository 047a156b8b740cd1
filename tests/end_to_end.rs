//! End-to-End Load and Query Tests
//!
//! Archives are written to disk, loaded through the same path the
//! `pmseries load` command takes, and queried back out of an in-process
//! store.
//!
//! # Test Coverage
//!
//! 1. **Counter rates** - Baseline sample then per-second rates
//! 2. **Metric name queries** - Single matching series
//! 3. **Set algebra** - Intersection and union of label matches
//! 4. **Pagination** - Offset beyond the stored samples
//! 5. **Counter wrap** - Correction enabled and disabled
//! 6. **Marks** - No rate across a gap in the record stream
//! 7. **Reloads** - Same identifiers on a second load
//! 8. **Store failures** - No partial results

use pcp_series::error::{Error, StoreError};
use pcp_series::loader::{LoadRequest, LoadSummary, Loader};
use pcp_series::mapper::Mapper;
use pcp_series::query::{parse, Lookup, QueryResult, ResultKind, Solver};
use pcp_series::store::{Keys, MemoryStore, Store};
use pcp_series::types::{TimeWindow, Timestamp};
use pcp_series::SeriesId;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use tempfile::TempDir;

// =============================================================================
// Test Helpers
// =============================================================================

struct Harness {
    store: Arc<MemoryStore>,
    dir: TempDir,
}

impl Harness {
    fn new() -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            dir: TempDir::new().expect("Failed to create temp dir"),
        }
    }

    /// Write an archive document and load it the way `pmseries load` does
    async fn load(&self, name: &str, doc: &Value, counter_wrap: bool) -> LoadSummary {
        let path = self.dir.path().join(name);
        std::fs::write(&path, doc.to_string()).expect("Failed to write archive");

        let expr = format!(r#"source.archive == "{}""#, path.display());
        let request = LoadRequest::from_query(&parse(&expr).unwrap(), TimeWindow::default()).unwrap();

        let store: Arc<dyn Store> = self.store.clone();
        let mapper = Mapper::new(store, Keys::default(), 1024)
            .await
            .expect("Failed to create mapper");
        Loader::new(Arc::new(mapper), counter_wrap)
            .load(&request)
            .await
            .expect("Load failed")
    }

    fn solver(&self) -> Solver {
        Solver::new(self.store.clone(), Keys::default())
    }

    async fn series(&self, expr: &str) -> BTreeSet<SeriesId> {
        let result = self.solver().solve(&parse(expr).unwrap(), None).await.unwrap();
        result.series_ids().into_iter().collect()
    }

    async fn values(&self, expr: &str, window: TimeWindow) -> QueryResult {
        self.solver().solve(&parse(expr).unwrap(), Some(&window)).await.unwrap()
    }
}

fn counter(name: &str, item: u32, value_type: &str) -> Value {
    json!({"names": [name], "pmid": {"domain": 29, "cluster": 0, "item": item},
           "type": value_type, "semantics": "counter", "units": {"dim_count": 1}})
}

fn record(timestamp: f64, metric: &str, value: u64) -> Value {
    json!({"timestamp": timestamp, "values": [{"metric": metric, "value": value}]})
}

fn stored_values(result: &QueryResult) -> Vec<(f64, String)> {
    match result {
        QueryResult::Values(series) => series
            .iter()
            .flat_map(|s| s.values.iter().map(|v| (v.timestamp.as_secs_f64(), v.value.clone())))
            .collect(),
        QueryResult::Series(_) => panic!("expected values"),
    }
}

/// One metric over four disks, with labels placing x,y,z in `a` and y,z,w in `b`
fn disk_archive() -> Value {
    json!({
        "hostname": "db1",
        "labels": {"role": "database"},
        "metrics": [{"names": ["disk.dev.avail"], "pmid": {"domain": 60, "cluster": 1, "item": 2},
                     "type": "u64", "semantics": "instant", "indom": {"domain": 60, "serial": 3}}],
        "indoms": [{"domain": 60, "serial": 3, "instances": [
            {"id": 0, "name": "x", "labels": {"a": "1"}},
            {"id": 1, "name": "y", "labels": {"a": "1", "b": "1"}},
            {"id": 2, "name": "z", "labels": {"a": "1", "b": "1"}},
            {"id": 3, "name": "w", "labels": {"b": "1"}, "notes": {"owner": "ops"}}
        ]}],
        "records": [{"timestamp": 100.0, "values": [{"metric": "disk.dev.avail", "instances": [
            {"inst": 0, "value": 10}, {"inst": 1, "value": 20},
            {"inst": 2, "value": 30}, {"inst": 3, "value": 40}
        ]}]}]
    })
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test]
async fn test_counter_rates_after_baseline() {
    let harness = Harness::new();
    let doc = json!({
        "hostname": "web1",
        "metrics": [counter("test.counter", 1, "u64")],
        "records": [record(1.0, "test.counter", 10), record(2.0, "test.counter", 20), record(3.0, "test.counter", 30)]
    });

    let summary = harness.load("counter.json", &doc, false).await;
    assert_eq!(summary.records, 3);
    assert_eq!(summary.values_stored, 2);
    assert_eq!(summary.series, 1);

    let result = harness.values(r#"metric.name == "test.counter""#, TimeWindow::default()).await;
    assert_eq!(
        stored_values(&result),
        vec![(3.0, "1.000000e+01".to_string()), (2.0, "1.000000e+01".to_string())]
    );
}

#[tokio::test]
async fn test_metric_name_query() {
    let harness = Harness::new();
    let doc = json!({
        "hostname": "web1",
        "metrics": [counter("test.metric", 1, "u64"), counter("other.metric", 2, "u64")],
        "records": [record(1.0, "test.metric", 1)]
    });
    harness.load("metric.json", &doc, false).await;

    let result = harness
        .solver()
        .solve(&parse(r#"metric.name == "test.metric""#).unwrap(), None)
        .await
        .unwrap();
    assert_eq!(result.kind(), ResultKind::Single);

    let names = Lookup::new(harness.store.clone(), Keys::default())
        .metric_names(&result.series_ids())
        .await
        .unwrap();
    assert_eq!(names[0].names, vec!["test.metric"]);
}

#[tokio::test]
async fn test_label_intersection_and_union() {
    let harness = Harness::new();
    harness.load("disks.json", &disk_archive(), false).await;

    let a = harness.series(r#"a == "1""#).await;
    let b = harness.series(r#"b == "1""#).await;
    assert_eq!((a.len(), b.len()), (3, 3));

    let both = harness.series(r#"a == "1" && b == "1""#).await;
    let either = harness.series(r#"a == "1" || b == "1""#).await;
    assert_eq!(both, a.intersection(&b).copied().collect());
    assert_eq!(both.len(), 2);
    assert_eq!(either, a.union(&b).copied().collect());
    assert_eq!(either.len(), 4);

    // Instance names select the same series as their labels
    let yz = harness.series(r#"instance.name =~ "^[yz]$""#).await;
    assert_eq!(yz, both);

    // Context labels reach every series
    assert_eq!(harness.series(r#"role == "database""#).await, either);
}

#[tokio::test]
async fn test_offset_past_stored_values() {
    let harness = Harness::new();
    let doc = json!({
        "hostname": "web1",
        "metrics": [{"names": ["test.gauge"], "pmid": {"domain": 29, "cluster": 0, "item": 9},
                     "type": "u32", "semantics": "instant"}],
        "records": [record(1.0, "test.gauge", 1), record(2.0, "test.gauge", 2), record(3.0, "test.gauge", 3)]
    });
    harness.load("gauge.json", &doc, false).await;

    let all = harness.values(r#"metric.name == "test.gauge""#, TimeWindow::default()).await;
    assert_eq!(stored_values(&all).len(), 3);

    let window = TimeWindow {
        offset: 5,
        count: 10,
        ..Default::default()
    };
    let result = harness.values(r#"metric.name == "test.gauge""#, window).await;
    assert!(result.is_empty());
    assert_eq!(serde_json::to_value(&result).unwrap(), json!({"result": "empty", "series": []}));
}

#[tokio::test]
async fn test_counter_wrap_toggle() {
    let doc = json!({
        "hostname": "web1",
        "metrics": [counter("net.packets", 3, "u32")],
        "records": [record(1.0, "net.packets", 100), record(2.0, "net.packets", 50), record(3.0, "net.packets", 70)]
    });

    let wrapped = Harness::new();
    wrapped.load("wrap.json", &doc, true).await;
    let result = wrapped.values(r#"metric.name == "net.packets""#, TimeWindow::default()).await;
    // (2^32 - 100) + 50 per second
    assert_eq!(
        stored_values(&result),
        vec![(3.0, "2.000000e+01".to_string()), (2.0, "4.294967e+09".to_string())]
    );

    // Without correction the drop is a reset and only re-establishes the baseline
    let reset = Harness::new();
    reset.load("wrap.json", &doc, false).await;
    let result = reset.values(r#"metric.name == "net.packets""#, TimeWindow::default()).await;
    assert_eq!(stored_values(&result), vec![(3.0, "2.000000e+01".to_string())]);
}

#[tokio::test]
async fn test_mark_starts_new_baseline() {
    let harness = Harness::new();
    let doc = json!({
        "hostname": "web1",
        "metrics": [counter("net.bytes", 4, "u64")],
        "records": [
            record(1.0, "net.bytes", 100),
            {"timestamp": 2.0, "mark": true},
            record(10.0, "net.bytes", 500),
            record(11.0, "net.bytes", 510)
        ]
    });

    let summary = harness.load("mark.json", &doc, false).await;
    assert_eq!(summary.records, 4);
    assert_eq!(summary.values_stored, 1);

    let result = harness.values(r#"metric.name == "net.bytes""#, TimeWindow::default()).await;
    assert_eq!(stored_values(&result), vec![(11.0, "1.000000e+01".to_string())]);
}

#[tokio::test]
async fn test_reload_keeps_identifiers() {
    let harness = Harness::new();
    harness.load("disks.json", &disk_archive(), false).await;
    let first = harness.series(r#"metric.name == "disk.dev.avail""#).await;

    harness.load("disks-again.json", &disk_archive(), false).await;
    let second = harness.series(r#"metric.name == "disk.dev.avail""#).await;
    assert_eq!(first, second);
    assert_eq!(first.len(), 4);

    let lookup = Lookup::new(harness.store.clone(), Keys::default());
    assert_eq!(lookup.all_metrics().await.unwrap(), vec!["disk.dev.avail"]);

    // Notes are stored but do not split the identity
    let noted = harness.series(r#"note.owner == "ops""#).await;
    assert_eq!(noted.len(), 1);
    let notes = lookup.notes(&noted.iter().copied().collect::<Vec<_>>()).await.unwrap();
    assert_eq!(notes[0].labels.get("owner").map(String::as_str), Some("ops"));
}

#[tokio::test]
async fn test_store_failure_yields_no_result() {
    let harness = Harness::new();
    harness.load("disks.json", &disk_archive(), false).await;

    harness.store.set_unavailable(true);
    let result = harness
        .solver()
        .solve(&parse(r#"a == "1" && b == "1""#).unwrap(), Some(&TimeWindow::default()))
        .await;
    assert!(matches!(result, Err(Error::Store(StoreError::Connection(_)))));

    harness.store.set_unavailable(false);
    let window = TimeWindow::between(Timestamp::from_secs_f64(0.0), Timestamp::from_secs_f64(200.0));
    let result = harness.values(r#"a == "1" && b == "1""#, window).await;
    assert_eq!(result.len(), 2);
}
