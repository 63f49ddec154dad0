//! Shared fakes for runtime tests: an in-memory AppState whose every
//! external service records its calls.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;

use fso_backends::dispatcher::{DispatcherApi, ExecutionSummary, ValidationResult};
use fso_backends::github::{WorkflowApi, WorkflowRun};
use fso_domain::config::Config;
use fso_domain::error::{Error, Result};
use fso_domain::targeting::{
    BatchOverrides, ClientProfile, Flag, TargetingConfig, TargetingRow,
};
use fso_google::storage::ObjectStore;
use fso_google::tasks::{EnqueueOutcome, TaskQueue, TaskRequest};
use fso_properties::PropertyStore;
use fso_rpc::RpcCaller;

use crate::calendar::{Calendar, StaticHolidays};
use crate::config_source::{ActiveTargeting, ConfigProvider};
use crate::runtime::autostop::AutoStopScheduler;
use crate::runtime::control::TaskControl;
use crate::schedule::TriggerStore;
use crate::state::AppState;

// ── Sample configs ──────────────────────────────────────────────────

pub fn sample_client() -> ClientProfile {
    ClientProfile {
        company_name: "株式会社サンプル".into(),
        name: "山田 太郎".into(),
        last_name: "山田".into(),
        first_name: "太郎".into(),
        last_name_kana: "ヤマダ".into(),
        first_name_kana: "タロウ".into(),
        last_name_hiragana: "やまだ".into(),
        first_name_hiragana: "たろう".into(),
        position: "部長".into(),
        gender: "男性".into(),
        email_local: "taro".into(),
        email_domain: "example.co.jp".into(),
        phone_1: "03".into(),
        phone_2: "1234".into(),
        phone_3: "5678".into(),
        postal_1: "100".into(),
        postal_2: "0001".into(),
        address_1: "東京都".into(),
        address_2: "千代田区".into(),
        address_3: "1-1".into(),
        address_4: "サンプルビル".into(),
        department: None,
        website_url: None,
        address_5: None,
    }
}

pub fn sample_config(targeting_id: i64) -> TargetingConfig {
    TargetingConfig {
        targeting: TargetingRow {
            targeting_id,
            client_id: 5,
            active: true,
            description: "campaign".into(),
            subject: "subject".into(),
            message: "message".into(),
            targeting_sql: String::new(),
            ng_companies: vec![],
            max_daily_sends: 500,
            send_start_time: 0,
            send_end_time: 23 * 60 + 59,
            send_days_of_week: (0..=6).collect(),
            concurrent_workflow: 2,
            use_extra_table: Flag::Unset,
            use_serverless: Flag::Explicit(true),
            use_gcp_batch: Flag::Unset,
            session_max_hours: 8.0,
            batch: BatchOverrides::default(),
        },
        client: sample_client(),
    }
}

// ── Fakes ───────────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeConfigProvider {
    pub configs: Mutex<Vec<TargetingConfig>>,
}

#[async_trait]
impl ConfigProvider for FakeConfigProvider {
    async fn list_active_targetings(&self) -> Result<Vec<ActiveTargeting>> {
        Ok(self
            .configs
            .lock()
            .iter()
            .filter(|c| c.targeting.active)
            .map(|c| ActiveTargeting {
                targeting_id: c.targeting.targeting_id,
                client_id: c.targeting.client_id,
                description: c.targeting.description.clone(),
                concurrent_workflow: c.targeting.concurrent_workflow,
                use_extra_table: c.targeting.use_extra_table.is_explicit_true(),
            })
            .collect())
    }

    async fn get_targeting_config(&self, targeting_id: i64) -> Result<Option<TargetingConfig>> {
        Ok(self
            .configs
            .lock()
            .iter()
            .find(|c| c.targeting.targeting_id == targeting_id)
            .cloned())
    }
}

#[derive(Default)]
pub struct FakeRpc {
    pub calls: Mutex<Vec<(String, serde_json::Value)>>,
}

#[async_trait]
impl RpcCaller for FakeRpc {
    async fn call(
        &self,
        name: &str,
        params: serde_json::Value,
        _statement_timeout: Duration,
    ) -> Result<serde_json::Value> {
        self.calls.lock().push((name.to_owned(), params));
        Ok(serde_json::json!({ "inserted": 100 }))
    }
}

#[derive(Default)]
pub struct FakeStorage {
    pub uploads: Mutex<Vec<String>>,
    pub deletes: Mutex<Vec<String>>,
}

#[async_trait]
impl ObjectStore for FakeStorage {
    async fn upload_json(
        &self,
        bucket: &str,
        object: &str,
        _body: &serde_json::Value,
    ) -> Result<String> {
        self.uploads.lock().push(object.to_owned());
        Ok(format!("gs://{bucket}/{object}"))
    }

    async fn delete_object(&self, _bucket: &str, object: &str) -> Result<()> {
        self.deletes.lock().push(object.to_owned());
        Ok(())
    }

    fn signed_get_url(
        &self,
        bucket: &str,
        object: &str,
        _expires_in: Duration,
        _now: DateTime<Utc>,
    ) -> Result<String> {
        Ok(format!("https://signed.example/{bucket}/{object}"))
    }
}

#[derive(Default)]
pub struct FakeTasks {
    pub enqueued: Mutex<Vec<String>>,
    /// Task ids already taken; enqueueing one reports a duplicate.
    pub existing: Mutex<Vec<String>>,
    pub fail_with: Mutex<Option<String>>,
}

#[async_trait]
impl TaskQueue for FakeTasks {
    fn task_name(&self, task_id: &str) -> String {
        format!("projects/p/locations/l/queues/q/tasks/{task_id}")
    }

    async fn enqueue(&self, request: &TaskRequest, _now: DateTime<Utc>) -> Result<EnqueueOutcome> {
        if let Some(message) = self.fail_with.lock().clone() {
            return Err(Error::Http(message));
        }
        let name = self.task_name(&request.task_id);
        if self.existing.lock().contains(&request.task_id) {
            return Ok(EnqueueOutcome::Duplicate { name });
        }
        self.existing.lock().push(request.task_id.clone());
        self.enqueued.lock().push(request.task_id.clone());
        Ok(EnqueueOutcome::Created { name })
    }
}

#[derive(Default)]
pub struct FakeDispatcher {
    pub reject_with: Mutex<Option<String>>,
    pub validated: Mutex<u32>,
}

#[async_trait]
impl DispatcherApi for FakeDispatcher {
    async fn validate_config(&self, _config: &serde_json::Value) -> Result<ValidationResult> {
        *self.validated.lock() += 1;
        match self.reject_with.lock().clone() {
            Some(message) => Ok(ValidationResult {
                valid: false,
                message: Some(message),
            }),
            None => Ok(ValidationResult {
                valid: true,
                message: None,
            }),
        }
    }

    async fn list_running(&self, _targeting_id: Option<i64>) -> Result<Vec<ExecutionSummary>> {
        Ok(vec![])
    }

    async fn cancel_execution(&self, _execution_id: &str) -> Result<()> {
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeWorkflows {
    pub dispatched: Mutex<Vec<serde_json::Value>>,
}

#[async_trait]
impl WorkflowApi for FakeWorkflows {
    async fn dispatch(&self, inputs: serde_json::Value) -> Result<()> {
        self.dispatched.lock().push(inputs);
        Ok(())
    }

    async fn list_running(&self) -> Result<Vec<WorkflowRun>> {
        Ok(vec![])
    }

    async fn cancel_run(&self, _run_id: u64) -> Result<()> {
        Ok(())
    }
}

// ── Harness ─────────────────────────────────────────────────────────

pub struct Harness {
    pub state: AppState,
    pub rpc: Arc<FakeRpc>,
    pub storage: Arc<FakeStorage>,
    pub tasks: Arc<FakeTasks>,
    pub dispatcher: Arc<FakeDispatcher>,
    pub workflows: Arc<FakeWorkflows>,
    pub configs: Arc<FakeConfigProvider>,
    _dir: tempfile::TempDir,
}

impl Harness {
    pub fn new(holidays: Vec<NaiveDate>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.google.bucket = "fs-artifacts".into();
        config.google.tasks_queue_path = "projects/p/locations/l/queues/q".into();
        config.dispatcher.base_url = "https://dispatcher.example.com".into();
        config.dispatcher.audience_service_account = "fs@p.iam.gserviceaccount.com".into();
        let config = Arc::new(config);

        let props = Arc::new(PropertyStore::open(dir.path()));
        let triggers = Arc::new(TriggerStore::new(props.clone()));
        let calendar = Arc::new(Calendar::new(Arc::new(StaticHolidays::new(holidays))));
        let rpc = Arc::new(FakeRpc::default());
        let storage = Arc::new(FakeStorage::default());
        let tasks = Arc::new(FakeTasks::default());
        let dispatcher = Arc::new(FakeDispatcher::default());
        let workflows = Arc::new(FakeWorkflows::default());
        let configs = Arc::new(FakeConfigProvider::default());
        let autostop = Arc::new(AutoStopScheduler::new(
            props.clone(),
            triggers.clone(),
            Duration::from_secs(60),
        ));
        let control = Arc::new(TaskControl::new(
            Some(dispatcher.clone() as Arc<dyn DispatcherApi>),
            Some(workflows.clone() as Arc<dyn WorkflowApi>),
        ));

        let state = AppState {
            config,
            props,
            triggers,
            calendar,
            config_source: configs.clone(),
            rpc: rpc.clone(),
            storage: storage.clone(),
            tasks: Some(tasks.clone()),
            dispatcher: Some(dispatcher.clone()),
            workflow: Some(workflows.clone()),
            autostop,
            control,
        };
        Self {
            state,
            rpc,
            storage,
            tasks,
            dispatcher,
            workflows,
            configs,
            _dir: dir,
        }
    }

    pub fn with_config(self, config: TargetingConfig) -> Self {
        self.configs.configs.lock().push(config);
        self
    }
}
