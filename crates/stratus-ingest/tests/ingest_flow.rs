//! End-to-end workflow tests: mock provider, in-memory storage.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use stratus_core::{CanonicalRecord, ChildItem, KindDescriptor, Scope};
use stratus_ingest::{IngestionActivity, InventoryWorkflow, WorkflowOptions};
use stratus_provider::{
    Provider, ProviderDescriptor, ProviderError, ProviderRegistry, ProviderResult, RateLimiter,
    RawRecord,
};
use stratus_store::memory::MemoryStorage;
use stratus_store::VersionedResourceStore;
use stratus_workflow::{
    ActivityOptions, CancellationToken, ExecutionStatus, Heartbeat, RetryPolicy,
};

const SERVER: KindDescriptor = KindDescriptor::new("mock_server").with_children(&["tags"]);
const BUCKET: KindDescriptor = KindDescriptor::new("mock_bucket");

struct MockProvider {
    records: Mutex<HashMap<String, Vec<RawRecord>>>,
    transient_list_failures: AtomicUsize,
    auth_fail_accounts: Mutex<Vec<String>>,
    list_calls: AtomicUsize,
}

impl MockProvider {
    fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            transient_list_failures: AtomicUsize::new(0),
            auth_fail_accounts: Mutex::new(Vec::new()),
            list_calls: AtomicUsize::new(0),
        }
    }

    fn set_records(&self, scope: &Scope, records: Vec<RawRecord>) {
        self.records.lock().unwrap().insert(scope.key(), records);
    }

    fn fail_next_lists(&self, n: usize) {
        self.transient_list_failures.store(n, Ordering::SeqCst);
    }

    fn fail_auth_for(&self, account: &str) {
        self.auth_fail_accounts.lock().unwrap().push(account.to_string());
    }

    fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn test_connection(&self) -> ProviderResult<()> {
        Ok(())
    }

    async fn list(
        &self,
        _kind: &KindDescriptor,
        scope: &Scope,
        heartbeat: &Heartbeat,
    ) -> ProviderResult<Vec<RawRecord>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        heartbeat.beat();

        if self.auth_fail_accounts.lock().unwrap().contains(&scope.account) {
            return Err(ProviderError::auth_failed("mock", "credentials rejected"));
        }
        let remaining = self.transient_list_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_list_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(ProviderError::transient("api briefly unavailable"));
        }

        Ok(self
            .records
            .lock()
            .unwrap()
            .get(&scope.key())
            .cloned()
            .unwrap_or_default())
    }

    fn convert(&self, _kind: &KindDescriptor, raw: RawRecord) -> ProviderResult<CanonicalRecord> {
        let Value::Object(payload) = raw.payload else {
            return Err(ProviderError::malformed(raw.external_id, "not an object"));
        };
        if payload.get("malformed").is_some() {
            return Err(ProviderError::malformed(raw.external_id, "flagged payload"));
        }

        let mut record = CanonicalRecord::new(raw.external_id);
        for (name, value) in payload {
            if name == "tags" {
                if let Value::Object(tags) = value {
                    let items = tags
                        .into_iter()
                        .map(|(key, value)| ChildItem::new(key, value))
                        .collect();
                    record = record.with_children("tags", items);
                }
            } else {
                record = record.with_attribute(name, value);
            }
        }
        Ok(record)
    }
}

fn fast_options() -> WorkflowOptions {
    WorkflowOptions {
        activity: ActivityOptions {
            start_to_close: Duration::from_secs(5),
            heartbeat_timeout: None,
            retry: RetryPolicy {
                initial_delay: Duration::from_millis(1),
                multiplier: 2.0,
                max_delay: Duration::from_millis(10),
                max_attempts: 3,
                jitter: false,
            },
        },
        provider_timeout: Duration::from_secs(10),
    }
}

struct Harness {
    provider: Arc<MockProvider>,
    storage: MemoryStorage,
    registry: ProviderRegistry,
    workflow: InventoryWorkflow<MemoryStorage>,
}

fn harness(kinds: Vec<KindDescriptor>, scopes: Vec<Scope>) -> Harness {
    let provider = Arc::new(MockProvider::new());
    let storage = MemoryStorage::new();
    let store = Arc::new(VersionedResourceStore::new(storage.clone()));
    let limiter = Arc::new(RateLimiter::new());

    let mut registry = ProviderRegistry::new(limiter.clone());
    let instance = provider.clone();
    registry
        .register(
            ProviderDescriptor::new("mock", move || {
                Ok(instance.clone() as Arc<dyn Provider>)
            })
            .requests_per_minute(6000)
            .kinds(kinds)
            .scopes(scopes),
        )
        .unwrap();

    let workflow = InventoryWorkflow::new(IngestionActivity::new(store, limiter))
        .with_options(fast_options());

    Harness {
        provider,
        storage,
        registry,
        workflow,
    }
}

fn raw(id: &str, payload: Value) -> RawRecord {
    RawRecord::new(id, payload)
}

fn scope_a() -> Scope {
    Scope::new("mock", "acct-a").with_region("us-east-1")
}

fn scope_b() -> Scope {
    Scope::new("mock", "acct-b").with_region("us-east-1")
}

#[tokio::test]
async fn test_cycle_ingests_every_scope() {
    let h = harness(vec![SERVER], vec![scope_a(), scope_b()]);
    h.provider.set_records(
        &scope_a(),
        vec![
            raw("srv-1", json!({"name": "web-1", "tags": {"env": "prod"}})),
            raw("srv-2", json!({"name": "web-2"})),
        ],
    );
    h.provider
        .set_records(&scope_b(), vec![raw("srv-3", json!({"name": "db-1"}))]);

    let report = h.workflow.run(&h.registry, &CancellationToken::new()).await;

    assert_eq!(report.results.len(), 2);
    assert_eq!(report.completed(), 2);
    assert_eq!(report.failed(), 0);
    let created: usize = report
        .results
        .iter()
        .filter_map(|r| r.summary.map(|s| s.created))
        .sum();
    assert_eq!(created, 3);
    assert_eq!(h.storage.current_records().len(), 3);

    let srv_1 = h
        .storage
        .current_record("mock_server", &scope_a(), "srv-1")
        .unwrap();
    assert_eq!(srv_1.attributes["name"], json!("web-1"));
    assert_eq!(srv_1.child_items("tags").len(), 1);
}

#[tokio::test]
async fn test_transient_listing_failure_is_retried() {
    let h = harness(vec![SERVER], vec![scope_a()]);
    h.provider
        .set_records(&scope_a(), vec![raw("srv-1", json!({"name": "web-1"}))]);
    h.provider.fail_next_lists(1);

    let report = h.workflow.run(&h.registry, &CancellationToken::new()).await;

    assert_eq!(report.completed(), 1);
    assert_eq!(h.provider.list_calls(), 2);
    assert!(h
        .storage
        .current_record("mock_server", &scope_a(), "srv-1")
        .is_some());
}

#[tokio::test]
async fn test_auth_failure_fails_scope_without_touching_siblings() {
    let h = harness(vec![SERVER], vec![scope_a(), scope_b()]);
    h.provider.fail_auth_for("acct-a");
    h.provider
        .set_records(&scope_b(), vec![raw("srv-3", json!({"name": "db-1"}))]);

    let report = h.workflow.run(&h.registry, &CancellationToken::new()).await;

    assert_eq!(report.completed(), 1);
    assert_eq!(report.failed(), 1);

    let failed = report
        .results
        .iter()
        .find(|r| r.status == ExecutionStatus::Failed)
        .unwrap();
    assert_eq!(failed.scope, scope_a());
    assert!(failed.error.as_ref().unwrap().contains("authentication"));

    // The healthy sibling scope still ingested.
    assert!(h
        .storage
        .current_record("mock_server", &scope_b(), "srv-3")
        .is_some());
    // Permanent errors are not retried: one call per scope.
    assert_eq!(h.provider.list_calls(), 2);
}

#[tokio::test]
async fn test_malformed_record_aborts_whole_batch() {
    let h = harness(vec![SERVER], vec![scope_a()]);
    h.provider.set_records(
        &scope_a(),
        vec![
            raw("srv-1", json!({"name": "web-1"})),
            raw("srv-bad", json!({"malformed": true})),
        ],
    );

    let report = h.workflow.run(&h.registry, &CancellationToken::new()).await;

    assert_eq!(report.failed(), 1);
    // Conversion errors are permanent: no retry.
    assert_eq!(h.provider.list_calls(), 1);
    // Fail-fast means not even the valid record was written.
    assert!(h.storage.current_records().is_empty());
}

#[tokio::test]
async fn test_sweep_failure_never_fails_the_pass() {
    let h = harness(vec![BUCKET], vec![scope_a()]);
    h.provider
        .set_records(&scope_a(), vec![raw("bkt-1", json!({"name": "logs"}))]);

    // A childless create spends three operations; the sweep's stale query
    // is the fourth and fails.
    h.storage.fail_after(3);
    let report = h.workflow.run(&h.registry, &CancellationToken::new()).await;
    h.storage.clear_fault();

    assert_eq!(report.completed(), 1);
    let result = &report.results[0];
    assert_eq!(result.retired, 0);
    assert!(result.error.is_none());
    assert!(h
        .storage
        .current_record("mock_bucket", &scope_a(), "bkt-1")
        .is_some());
}

#[tokio::test]
async fn test_pre_cancelled_cycle_reports_cancelled() {
    let h = harness(vec![SERVER], vec![scope_a()]);
    h.provider
        .set_records(&scope_a(), vec![raw("srv-1", json!({"name": "web-1"}))]);

    let cancel = CancellationToken::new();
    cancel.cancel();
    let report = h.workflow.run(&h.registry, &cancel).await;

    assert_eq!(report.results.len(), 1);
    assert_eq!(report.results[0].status, ExecutionStatus::Cancelled);
    assert_eq!(h.provider.list_calls(), 0);
    assert!(h.storage.current_records().is_empty());
}

#[tokio::test]
async fn test_omitted_resource_is_swept_next_cycle() {
    let h = harness(vec![SERVER], vec![scope_a()]);
    h.provider.set_records(
        &scope_a(),
        vec![
            raw("srv-1", json!({"name": "web-1"})),
            raw("srv-2", json!({"name": "web-2"})),
        ],
    );

    let first = h.workflow.run(&h.registry, &CancellationToken::new()).await;
    assert_eq!(first.completed(), 1);
    assert_eq!(h.storage.current_records().len(), 2);

    // Next cycle no longer reports srv-2.
    h.provider
        .set_records(&scope_a(), vec![raw("srv-1", json!({"name": "web-1"}))]);
    let second = h.workflow.run(&h.registry, &CancellationToken::new()).await;

    assert_eq!(second.completed(), 1);
    assert_eq!(second.results[0].retired, 1);
    assert!(h
        .storage
        .current_record("mock_server", &scope_a(), "srv-1")
        .is_some());
    assert!(h
        .storage
        .current_record("mock_server", &scope_a(), "srv-2")
        .is_none());

    // The retired resource's history interval is closed.
    let rows = h.storage.history_rows("srv-2");
    assert_eq!(rows.len(), 1);
    assert!(rows[0].valid_to.is_some());
}
