//! Execution-mode resolution.
//!
//! Per-targeting flags beat global defaults; global defaults order a
//! priority list that always ends with the CI workflow; and the queue-backed
//! modes are only honored when the task-queue wiring is complete.

use serde::Serialize;

use fso_domain::targeting::Flag;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Batch,
    Serverless,
    Github,
}

impl ExecutionMode {
    /// The dispatcher-side mode string; the CI workflow has none.
    pub fn dispatcher_mode(&self) -> Option<&'static str> {
        match self {
            ExecutionMode::Batch => Some("batch"),
            ExecutionMode::Serverless => Some("cloud_run"),
            ExecutionMode::Github => None,
        }
    }
}

/// Everything the resolver looks at, already read from config + properties.
#[derive(Clone, Copy, Debug)]
pub struct ModeInputs {
    pub explicit_batch: Flag,
    pub explicit_serverless: Flag,
    pub global_batch: bool,
    pub global_serverless: bool,
    /// Task queue path + dispatcher URL + audience SA all configured.
    pub queue_wired: bool,
}

/// Resolve the execution mode. The second element is true when a
/// queue-backed choice was demoted to the CI workflow for missing wiring.
pub fn resolve(inputs: ModeInputs) -> (ExecutionMode, bool) {
    let chosen = choose(inputs);
    match chosen {
        ExecutionMode::Batch | ExecutionMode::Serverless if !inputs.queue_wired => {
            tracing::warn!(
                ?chosen,
                "task-queue wiring incomplete, falling back to the CI workflow"
            );
            (ExecutionMode::Github, true)
        }
        other => (other, false),
    }
}

fn choose(inputs: ModeInputs) -> ExecutionMode {
    // Explicit per-targeting settings win outright.
    if inputs.explicit_batch.is_explicit_true() {
        return ExecutionMode::Batch;
    }
    if inputs.explicit_serverless.is_explicit_true() {
        return ExecutionMode::Serverless;
    }

    // Priority list shaped by the global defaults, ending with github.
    let mut order: Vec<ExecutionMode> = Vec::with_capacity(3);
    if inputs.global_batch {
        order.push(ExecutionMode::Batch);
    }
    if inputs.global_serverless {
        order.push(ExecutionMode::Serverless);
    }
    for mode in [ExecutionMode::Batch, ExecutionMode::Serverless, ExecutionMode::Github] {
        if !order.contains(&mode) {
            order.push(mode);
        }
    }

    for mode in order {
        let effective = match mode {
            ExecutionMode::Batch => {
                inputs.explicit_batch.effective(inputs.global_batch)
            }
            ExecutionMode::Serverless => {
                inputs.explicit_serverless.effective(inputs.global_serverless)
            }
            ExecutionMode::Github => true,
        };
        if effective {
            return mode;
        }
    }
    ExecutionMode::Github
}
