//! Wires the dependency graph, event context, dispatcher, and logger into
//! a single `run_task` entry point, and maps the outcome to a process exit
//! code.

use std::sync::Arc;

use stacked_errors::{Result, StackableErr};

use crate::{
    context::TaskEventContext,
    dispatcher::Dispatcher,
    event::TaskEvent,
    graph::DependencyGraph,
    logger::Logger,
    model::{BehaviourAfterFailure, Container},
    runtime::RuntimeAdapter,
};

/// Non-zero codes the engine itself assigns when the task container never
/// ran to completion. The task container's own exit code always takes
/// precedence over these — it wins even over a cleanup failure that happens
/// after a successful run.
pub mod exit_code {
    /// The dependency graph failed to resolve (cycle, unknown dependency,
    /// wrong task container name) before any run started.
    pub const CONFIGURATION_ERROR: i32 = 2;
    /// A pre-run step failed and aborted the task before the task
    /// container ever started.
    pub const ORCHESTRATION_FAILURE: i32 = 3;
}

pub struct RunOptions {
    pub behaviour_after_failure: BehaviourAfterFailure,
    pub propagate_proxy_environment_variables: bool,
    pub concurrency: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            behaviour_after_failure: BehaviourAfterFailure::default(),
            propagate_proxy_environment_variables: false,
            concurrency: crate::dispatcher::default_concurrency(),
        }
    }
}

/// Resolves the dependency graph rooted at `task_container_name`, drives the
/// task to completion against `runtime`, and returns the process exit code.
pub async fn run_task(
    all_containers: &[Container],
    task_container_name: &str,
    runtime: Arc<dyn RuntimeAdapter>,
    logger: &dyn Logger,
    options: RunOptions,
) -> Result<i32> {
    let graph =
        DependencyGraph::resolve(all_containers, task_container_name).stack_err("resolving dependency graph")?;

    let mut ctx = TaskEventContext::new(
        graph,
        options.behaviour_after_failure,
        options.propagate_proxy_environment_variables,
    );
    ctx.post_event(TaskEvent::TaskStarted);

    let dispatcher = Dispatcher::new(runtime, options.concurrency);
    dispatcher.run(&mut ctx, logger).await;

    Ok(match ctx.task_exit_code() {
        Some(code) => code,
        None if ctx.is_aborting() => exit_code::ORCHESTRATION_FAILURE,
        None => 0,
    })
}
