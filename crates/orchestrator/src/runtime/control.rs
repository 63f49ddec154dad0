//! Task control across execution backends.
//!
//! The dispatcher is the source of truth for queue-backed executions; the
//! CI workflow is consulted as a fallback, matching runs by workflow name
//! and extracting targeting ids from commit messages or run titles.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use fso_backends::dispatcher::{DispatcherApi, ExecutionSummary};
use fso_backends::github::{WorkflowApi, WorkflowRun};
use fso_domain::error::{Error, Result};

use super::autostop::StopExecutor;

/// Running-work summary across both backends.
#[derive(Clone, Debug, Default, Serialize)]
pub struct RunningSummary {
    pub success: bool,
    pub dispatcher_executions: Vec<ExecutionSummary>,
    pub workflow_runs: Vec<WorkflowRunSummary>,
    pub total: u32,
}

#[derive(Clone, Debug, Serialize)]
pub struct WorkflowRunSummary {
    pub run_id: u64,
    pub targeting_id: Option<i64>,
    pub title: String,
}

impl From<&WorkflowRun> for WorkflowRunSummary {
    fn from(run: &WorkflowRun) -> Self {
        Self {
            run_id: run.id,
            targeting_id: run.targeting_id(),
            title: run.display_title.clone(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct StopReport {
    pub success: bool,
    pub stopped: u32,
    pub errors: Vec<String>,
}

pub struct TaskControl {
    dispatcher: Option<Arc<dyn DispatcherApi>>,
    workflow: Option<Arc<dyn WorkflowApi>>,
}

impl TaskControl {
    pub fn new(
        dispatcher: Option<Arc<dyn DispatcherApi>>,
        workflow: Option<Arc<dyn WorkflowApi>>,
    ) -> Self {
        Self {
            dispatcher,
            workflow,
        }
    }

    /// List running work on every configured backend.
    pub async fn list_running(&self) -> Result<RunningSummary> {
        let mut summary = RunningSummary {
            success: true,
            ..RunningSummary::default()
        };
        if let Some(dispatcher) = &self.dispatcher {
            summary.dispatcher_executions = dispatcher.list_running(None).await?;
        }
        if let Some(workflow) = &self.workflow {
            summary.workflow_runs = workflow
                .list_running()
                .await?
                .iter()
                .map(WorkflowRunSummary::from)
                .collect();
        }
        summary.total =
            (summary.dispatcher_executions.len() + summary.workflow_runs.len()) as u32;
        Ok(summary)
    }

    /// Cancel everything that is running, on both backends.
    pub async fn stop_all_running(&self) -> StopReport {
        let mut report = StopReport {
            success: true,
            ..StopReport::default()
        };

        if let Some(dispatcher) = &self.dispatcher {
            match dispatcher.list_running(None).await {
                Ok(executions) => {
                    for execution in executions {
                        match dispatcher.cancel_execution(&execution.execution_id).await {
                            Ok(()) => report.stopped += 1,
                            Err(e) => report.errors.push(format!(
                                "execution {}: {e}",
                                execution.execution_id
                            )),
                        }
                    }
                }
                Err(e) => report.errors.push(format!("dispatcher listing: {e}")),
            }
        }

        if let Some(workflow) = &self.workflow {
            match workflow.list_running().await {
                Ok(runs) => {
                    for run in runs {
                        match workflow.cancel_run(run.id).await {
                            Ok(()) => report.stopped += 1,
                            Err(e) => report.errors.push(format!("run {}: {e}", run.id)),
                        }
                    }
                }
                Err(e) => report.errors.push(format!("workflow listing: {e}")),
            }
        }

        report.success = report.errors.is_empty();
        report
    }

    /// Cancel one targeting's work: dispatcher first; when it reports
    /// nothing, fall back to the CI workflow.
    pub async fn stop_specific(&self, targeting_id: i64) -> StopReport {
        let mut report = StopReport {
            success: true,
            ..StopReport::default()
        };

        if let Some(dispatcher) = &self.dispatcher {
            match dispatcher.list_running(Some(targeting_id)).await {
                Ok(executions) if !executions.is_empty() => {
                    for execution in executions {
                        match dispatcher.cancel_execution(&execution.execution_id).await {
                            Ok(()) => report.stopped += 1,
                            Err(e) => report.errors.push(format!(
                                "execution {}: {e}",
                                execution.execution_id
                            )),
                        }
                    }
                    report.success = report.errors.is_empty();
                    return report;
                }
                Ok(_) => {
                    tracing::debug!(targeting_id, "no dispatcher executions, trying workflows");
                }
                Err(e) => report.errors.push(format!("dispatcher listing: {e}")),
            }
        }

        if let Some(workflow) = &self.workflow {
            match workflow.list_running().await {
                Ok(runs) => {
                    for run in runs {
                        if run.targeting_id() == Some(targeting_id) {
                            match workflow.cancel_run(run.id).await {
                                Ok(()) => report.stopped += 1,
                                Err(e) => report.errors.push(format!("run {}: {e}", run.id)),
                            }
                        }
                    }
                }
                Err(e) => report.errors.push(format!("workflow listing: {e}")),
            }
        }

        report.success = report.errors.is_empty();
        report
    }
}

#[async_trait]
impl StopExecutor for TaskControl {
    async fn stop_all(&self) -> Result<u32> {
        let report = self.stop_all_running().await;
        if report.success {
            Ok(report.stopped)
        } else {
            Err(Error::Other(report.errors.join("; ")))
        }
    }

    async fn stop_targeting(&self, targeting_id: i64) -> Result<u32> {
        let report = self.stop_specific(targeting_id).await;
        if report.success {
            Ok(report.stopped)
        } else {
            Err(Error::Other(report.errors.join("; ")))
        }
    }
}
