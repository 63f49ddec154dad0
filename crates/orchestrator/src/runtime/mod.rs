//! Orchestration runtime: mode resolution, queue building, batch sizing,
//! run-index allocation, dispatch, auto-stop, task control, and the entry
//! handlers composed from them.

#[cfg(test)]
pub(crate) mod testutil;

pub mod autostop;
pub mod batch;
pub mod control;
pub mod dispatch;
pub mod handlers;
pub mod mode;
pub mod payload;
pub mod queue;
pub mod run_index;
