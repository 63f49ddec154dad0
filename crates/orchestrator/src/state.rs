//! Shared application state wired from the configuration.

use std::sync::Arc;
use std::time::Duration;

use fso_backends::dispatcher::{DispatcherApi, DispatcherClient};
use fso_backends::github::{GithubClient, WorkflowApi};
use fso_domain::config::Config;
use fso_domain::error::Result;
use fso_domain::targeting::{parse_hhmm, DEFAULT_SEND_END_MINUTES};
use fso_google::auth::TokenProvider;
use fso_google::calendar::{HolidayCalendarClient, HolidayLookup};
use fso_google::sheets::SheetsClient;
use fso_google::storage::{ObjectStore, StorageClient};
use fso_google::tasks::{TaskQueue, TasksClient};
use fso_properties::PropertyStore;
use fso_rpc::{RpcCaller, SupabaseRpcClient};

use crate::calendar::{Calendar, StaticHolidays};
use crate::config_source::{ConfigProvider, ConfigSource, RowDefaults};
use crate::runtime::autostop::AutoStopScheduler;
use crate::runtime::control::TaskControl;
use crate::schedule::TriggerStore;

/// Everything a handler needs, grouped by concern:
/// - **Config & state** — config, property store, trigger store
/// - **Calendar & sheets** — business-day predicate, config source
/// - **Remote services** — RPC, storage, tasks, dispatcher, workflows
/// - **Composites** — auto-stop scheduler, task control
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub props: Arc<PropertyStore>,
    pub triggers: Arc<TriggerStore>,
    pub calendar: Arc<Calendar>,
    pub config_source: Arc<dyn ConfigProvider>,
    pub rpc: Arc<dyn RpcCaller>,
    pub storage: Arc<dyn ObjectStore>,
    pub tasks: Option<Arc<dyn TaskQueue>>,
    pub dispatcher: Option<Arc<dyn DispatcherApi>>,
    pub workflow: Option<Arc<dyn WorkflowApi>>,
    pub autostop: Arc<AutoStopScheduler>,
    pub control: Arc<TaskControl>,
}

impl AppState {
    /// Wire every client from the configuration. Optional backends are
    /// `None` when their connection config is absent.
    pub fn build(config: Arc<Config>) -> Result<Self> {
        let props = Arc::new(PropertyStore::open(&config.state_path));
        let triggers = Arc::new(TriggerStore::new(props.clone()));
        let timeout = Duration::from_millis(config.google.timeout_ms);

        let token = Arc::new(TokenProvider::from_file(
            &config.google.service_account_path,
            &config.google.token_endpoint,
            timeout,
        )?);

        let storage: Arc<dyn ObjectStore> = Arc::new(StorageClient::new(
            &config.google.storage_endpoint,
            token.clone(),
            timeout,
        )?);

        let sheets = Arc::new(SheetsClient::new(
            &config.google.sheets_endpoint,
            token.clone(),
            timeout,
        )?);
        let defaults = RowDefaults {
            send_end_minutes: parse_hhmm(&config.scheduling.default_send_end_time)
                .unwrap_or(DEFAULT_SEND_END_MINUTES),
            session_max_hours: config.scheduling.default_session_hours,
        };
        let config_source: Arc<dyn ConfigProvider> = Arc::new(ConfigSource::new(
            sheets,
            &config.google.spreadsheet_id,
            &config.google.client_sheet,
            &config.google.targeting_sheet,
            defaults,
        ));

        let holiday: Arc<dyn HolidayLookup> = if config.google.holiday_calendar_id.is_empty() {
            tracing::warn!("no holiday calendar configured, weekends only");
            Arc::new(StaticHolidays::none())
        } else {
            Arc::new(HolidayCalendarClient::new(
                &config.google.calendar_endpoint,
                &config.google.holiday_calendar_id,
                token.clone(),
                timeout,
            )?)
        };
        let calendar = Arc::new(Calendar::new(holiday));

        let rpc: Arc<dyn RpcCaller> = Arc::new(SupabaseRpcClient::new(&config.supabase)?);

        let tasks: Option<Arc<dyn TaskQueue>> = if config.google.tasks_queue_path.is_empty() {
            None
        } else {
            Some(Arc::new(TasksClient::new(
                &config.google.tasks_endpoint,
                &config.google.tasks_queue_path,
                token.clone(),
                timeout,
            )?))
        };

        let dispatcher: Option<Arc<dyn DispatcherApi>> = if config.dispatcher.base_url.is_empty()
        {
            None
        } else {
            Some(Arc::new(DispatcherClient::new(
                &config.dispatcher.base_url,
                token,
                Duration::from_millis(config.dispatcher.timeout_ms),
            )?))
        };

        let workflow: Option<Arc<dyn WorkflowApi>> =
            if config.github.owner.is_empty() || config.github.repo.is_empty() {
                None
            } else {
                match GithubClient::new(&config.github) {
                    Ok(client) => Some(Arc::new(client)),
                    Err(e) => {
                        tracing::warn!(error = %e, "CI-workflow backend unavailable");
                        None
                    }
                }
            };

        let autostop = Arc::new(AutoStopScheduler::new(
            props.clone(),
            triggers.clone(),
            Duration::from_millis(config.scheduling.auto_stop_min_delay_ms),
        ));
        let control = Arc::new(TaskControl::new(dispatcher.clone(), workflow.clone()));

        Ok(Self {
            config,
            props,
            triggers,
            calendar,
            config_source,
            rpc,
            storage,
            tasks,
            dispatcher,
            workflow,
            autostop,
            control,
        })
    }

    /// True when the queue-backed modes are fully wired: task queue path,
    /// dispatcher URL, and the OIDC audience service account.
    pub fn queue_wired(&self) -> bool {
        self.tasks.is_some()
            && self.dispatcher.is_some()
            && !self.config.dispatcher.audience_service_account.is_empty()
    }
}
