//! [TaskEvent] — the tagged union the state machine reduces over. Every
//! variant's [TaskEvent::apply] method encodes one row of the
//! transition table; together they are the entirety of the orchestration
//! policy. `apply` only queues further [TaskStep]s or flips the monotonic
//! abort flag — it never touches the runtime.

use crate::{
    context::TaskEventContext,
    model::{Container, RuntimeContainer, RuntimeImage, RuntimeNetwork},
    step::TaskStep,
};

#[derive(Debug, Clone)]
pub enum TaskEvent {
    TaskStarted,
    ImageBuildProgress {
        container: Container,
        step: u64,
        total: u64,
        label: String,
    },
    ImageBuilt {
        container: Container,
        image: RuntimeImage,
    },
    /// The container is carried alongside the image, symmetric with
    /// `ImageBuilt`, so the reducer can tell which container's image just
    /// became ready without a side table. See `DESIGN.md`.
    ImagePulled {
        container: Container,
        image: RuntimeImage,
    },
    TaskNetworkCreated(RuntimeNetwork),
    ContainerCreated {
        container: Container,
        runtime_container: RuntimeContainer,
    },
    ContainerStarted {
        container: Container,
    },
    ContainerBecameHealthy {
        container: Container,
    },
    RunningContainerExited {
        container: Container,
        exit_code: i32,
    },
    ContainerStopped {
        container: Container,
    },
    ContainerRemoved {
        container: Container,
    },
    TaskNetworkDeleted,
    TemporaryFileCreated {
        container: Container,
        path: String,
    },
    TemporaryFileDeleted {
        path: String,
    },

    // --- failure family ---
    ImageBuildFailed {
        container: Container,
        message: String,
    },
    ImagePullFailed {
        container: Container,
        message: String,
    },
    TaskNetworkCreationFailed {
        message: String,
    },
    ContainerCreationFailed {
        container: Container,
        message: String,
    },
    ContainerStartFailed {
        container: Container,
        runtime_container: RuntimeContainer,
        message: String,
    },
    ContainerDidNotBecomeHealthy {
        container: Container,
        runtime_container: RuntimeContainer,
        message: String,
    },
    ContainerStopFailed {
        container: Container,
        runtime_container: RuntimeContainer,
        message: String,
    },
    ContainerRemovalFailed {
        container: Container,
        runtime_container: RuntimeContainer,
        message: String,
    },
    TaskNetworkDeletionFailed {
        message: String,
    },
    TemporaryFileDeletionFailed {
        path: String,
        message: String,
    },
}

impl TaskEvent {
    /// Whether this event aborts the task. Pre-run failures abort; post-run
    /// cleanup failures do not.
    pub fn aborts_task(&self) -> bool {
        matches!(
            self,
            TaskEvent::ImageBuildFailed { .. }
                | TaskEvent::ImagePullFailed { .. }
                | TaskEvent::TaskNetworkCreationFailed { .. }
                | TaskEvent::ContainerCreationFailed { .. }
                | TaskEvent::ContainerStartFailed { .. }
                | TaskEvent::ContainerDidNotBecomeHealthy { .. }
        )
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            TaskEvent::ImageBuildFailed { .. }
                | TaskEvent::ImagePullFailed { .. }
                | TaskEvent::TaskNetworkCreationFailed { .. }
                | TaskEvent::ContainerCreationFailed { .. }
                | TaskEvent::ContainerStartFailed { .. }
                | TaskEvent::ContainerDidNotBecomeHealthy { .. }
                | TaskEvent::ContainerStopFailed { .. }
                | TaskEvent::ContainerRemovalFailed { .. }
                | TaskEvent::TaskNetworkDeletionFailed { .. }
                | TaskEvent::TemporaryFileDeletionFailed { .. }
        )
    }

    pub fn container_name(&self) -> Option<&str> {
        use TaskEvent::*;
        match self {
            ImageBuildProgress { container, .. }
            | ImageBuilt { container, .. }
            | ImagePulled { container, .. }
            | ContainerCreated { container, .. }
            | ContainerStarted { container }
            | ContainerBecameHealthy { container }
            | RunningContainerExited { container, .. }
            | ContainerStopped { container }
            | ContainerRemoved { container }
            | TemporaryFileCreated { container, .. }
            | ImageBuildFailed { container, .. }
            | ImagePullFailed { container, .. }
            | ContainerCreationFailed { container, .. }
            | ContainerStartFailed { container, .. }
            | ContainerDidNotBecomeHealthy { container, .. }
            | ContainerStopFailed { container, .. }
            | ContainerRemovalFailed { container, .. } => Some(&container.name),
            _ => None,
        }
    }

    /// A human-readable failure message, for the loggers.
    pub fn failure_message(&self) -> Option<String> {
        use TaskEvent::*;
        match self {
            ImageBuildFailed { container, message } => {
                Some(format!("building image for \"{}\": {message}", container.name))
            }
            ImagePullFailed { container, message } => {
                Some(format!("pulling image for \"{}\": {message}", container.name))
            }
            TaskNetworkCreationFailed { message } => Some(format!("creating task network: {message}")),
            ContainerCreationFailed { container, message } => {
                Some(format!("creating container \"{}\": {message}", container.name))
            }
            ContainerStartFailed { container, message, .. } => {
                Some(format!("starting container \"{}\": {message}", container.name))
            }
            ContainerDidNotBecomeHealthy { container, message, .. } => {
                Some(format!("\"{}\" did not become healthy: {message}", container.name))
            }
            ContainerStopFailed { container, message, .. } => {
                Some(format!("stopping container \"{}\": {message}", container.name))
            }
            ContainerRemovalFailed { container, message, .. } => {
                Some(format!("removing container \"{}\": {message}", container.name))
            }
            TaskNetworkDeletionFailed { message } => Some(format!("deleting task network: {message}")),
            TemporaryFileDeletionFailed { path, message } => {
                Some(format!("deleting temporary file \"{path}\": {message}"))
            }
            _ => None,
        }
    }

    /// Applies this event's effect on `ctx`: queues whatever steps become
    /// runnable, and flips the abort flag on a qualifying failure. This is
    /// the entirety of the orchestration transition table.
    pub fn apply(&self, ctx: &mut TaskEventContext) {
        use TaskEvent::*;
        match self {
            TaskStarted => {
                for name in ctx.all_container_names() {
                    let container = ctx.container(&name).unwrap().clone();
                    let step = match &container.image_source {
                        crate::model::ImageSource::PullImage(_) => TaskStep::PullImage(container),
                        crate::model::ImageSource::BuildImage { .. } => {
                            TaskStep::BuildImage(container)
                        }
                    };
                    ctx.queue_step(step);
                }
                ctx.queue_step(TaskStep::CreateTaskNetwork);
            }
            ImageBuildProgress { .. } => {}
            ImageBuilt { .. } | ImagePulled { .. } => {
                if ctx.is_network_created() && !ctx.is_aborting() {
                    enqueue_ready_creates(ctx);
                }
            }
            TaskNetworkCreated(_) => {
                if !ctx.is_aborting() {
                    enqueue_ready_creates(ctx);
                }
                maybe_delete_network(ctx);
            }
            ContainerCreated {
                container,
                runtime_container,
            } => {
                if ctx.is_aborting() {
                    abort_one_container(ctx, container, runtime_container);
                } else if ctx.all_dependencies_healthy(&container.name) {
                    enqueue_start_or_run(ctx, container, runtime_container);
                }
            }
            ContainerStarted { container } => {
                if let Some(rc) = ctx.runtime_container_of(&container.name).cloned() {
                    ctx.queue_step(TaskStep::WaitForHealth {
                        container: container.clone(),
                        runtime_container: rc,
                    });
                }
            }
            ContainerBecameHealthy { container } => {
                if !ctx.is_aborting() {
                    enqueue_ready_creates(ctx);
                }
                for dependent_name in ctx.containers_that_depend_on(&container.name) {
                    if !ctx.is_container_created(&dependent_name) {
                        continue;
                    }
                    if !ctx.all_dependencies_healthy(&dependent_name) {
                        continue;
                    }
                    let dependent = ctx.container(&dependent_name).unwrap().clone();
                    let rc = ctx.runtime_container_of(&dependent_name).unwrap().clone();
                    enqueue_start_or_run(ctx, &dependent, &rc);
                }
            }
            RunningContainerExited { container, .. } => {
                for dep_name in ctx.dependencies_of(&container.name).to_vec() {
                    if ctx.is_started(&dep_name) {
                        if let Some(rc) = ctx.runtime_container_of(&dep_name).cloned() {
                            let dep = ctx.container(&dep_name).unwrap().clone();
                            ctx.queue_step(TaskStep::StopContainer {
                                container: dep,
                                runtime_container: rc,
                            });
                        }
                    }
                }
                if let Some(rc) = ctx.runtime_container_of(&container.name).cloned() {
                    ctx.queue_step(TaskStep::RemoveContainer {
                        container: container.clone(),
                        runtime_container: rc,
                    });
                }
            }
            ContainerStopped { container } => {
                if let Some(rc) = ctx.runtime_container_of(&container.name).cloned() {
                    ctx.queue_step(TaskStep::RemoveContainer {
                        container: container.clone(),
                        runtime_container: rc,
                    });
                }
            }
            ContainerRemoved { container } => {
                for path in ctx.temp_files_of(&container.name) {
                    ctx.queue_step(TaskStep::DeleteTemporaryFile {
                        container: container.clone(),
                        path,
                    });
                }
                maybe_delete_network(ctx);
            }
            TaskNetworkDeleted => {
                ctx.queue_step(TaskStep::FinishTask);
            }
            TemporaryFileCreated { .. } | TemporaryFileDeleted { .. } => {}

            ImageBuildFailed { message, .. } => {
                ctx.set_aborting();
                ctx.queue_step(TaskStep::DisplayTaskFailure(
                    self.failure_message().unwrap_or_else(|| message.clone()),
                ));
                abort_cleanup(ctx);
            }
            ImagePullFailed { message, .. } => {
                ctx.set_aborting();
                ctx.queue_step(TaskStep::DisplayTaskFailure(
                    self.failure_message().unwrap_or_else(|| message.clone()),
                ));
                abort_cleanup(ctx);
            }
            TaskNetworkCreationFailed { .. } => {
                ctx.set_aborting();
                ctx.queue_step(TaskStep::DisplayTaskFailure(
                    self.failure_message().unwrap_or_default(),
                ));
                abort_cleanup(ctx);
            }
            ContainerCreationFailed { .. } => {
                ctx.set_aborting();
                ctx.queue_step(TaskStep::DisplayTaskFailure(
                    self.failure_message().unwrap_or_default(),
                ));
                abort_cleanup(ctx);
            }
            ContainerStartFailed { .. } => {
                ctx.set_aborting();
                ctx.queue_step(TaskStep::DisplayTaskFailure(
                    self.failure_message().unwrap_or_default(),
                ));
                abort_cleanup(ctx);
            }
            ContainerDidNotBecomeHealthy { .. } => {
                ctx.set_aborting();
                ctx.queue_step(TaskStep::DisplayTaskFailure(
                    self.failure_message().unwrap_or_default(),
                ));
                abort_cleanup(ctx);
            }

            ContainerStopFailed {
                container,
                runtime_container,
                ..
            } => {
                ctx.queue_step(TaskStep::DisplayTaskFailure(
                    self.failure_message().unwrap_or_default(),
                ));
                // still converge on removal even though the graceful stop
                // failed
                ctx.queue_step(TaskStep::CleanUpContainer {
                    container: container.clone(),
                    runtime_container: runtime_container.clone(),
                });
            }
            ContainerRemovalFailed { .. } => {
                ctx.queue_step(TaskStep::DisplayTaskFailure(
                    self.failure_message().unwrap_or_default(),
                ));
                maybe_delete_network(ctx);
            }
            TaskNetworkDeletionFailed { .. } => {
                ctx.queue_step(TaskStep::DisplayTaskFailure(
                    self.failure_message().unwrap_or_default(),
                ));
                ctx.queue_step(TaskStep::FinishTask);
            }
            TemporaryFileDeletionFailed { .. } => {
                ctx.queue_step(TaskStep::DisplayTaskFailure(
                    self.failure_message().unwrap_or_default(),
                ));
            }
        }
    }
}

fn enqueue_ready_creates(ctx: &mut TaskEventContext) {
    let network = match ctx.network() {
        Some(n) => n.clone(),
        None => return,
    };
    for name in ctx.containers_ready_to_create() {
        let container = ctx.container(&name).unwrap().clone();
        let image = ctx.image_of(&name).unwrap().clone();
        let env = container.environment.clone();
        let command = container.command.clone();
        let propagate = ctx.propagate_proxy_environment_variables();
        ctx.queue_step(TaskStep::CreateContainer {
            container,
            image,
            network: network.clone(),
            command,
            env,
            propagate_proxy_environment_variables: propagate,
        });
    }
}

fn enqueue_start_or_run(ctx: &mut TaskEventContext, container: &Container, rc: &RuntimeContainer) {
    if ctx.is_task_container(&container.name) {
        ctx.queue_step(TaskStep::RunContainer {
            container: container.clone(),
            runtime_container: rc.clone(),
        });
    } else {
        ctx.queue_step(TaskStep::StartContainer {
            container: container.clone(),
            runtime_container: rc.clone(),
        });
    }
}

fn abort_one_container(
    ctx: &mut TaskEventContext,
    container: &Container,
    runtime_container: &RuntimeContainer,
) {
    match ctx.behaviour_after_failure() {
        crate::model::BehaviourAfterFailure::Cleanup => {
            ctx.queue_step(TaskStep::CleanUpContainer {
                container: container.clone(),
                runtime_container: runtime_container.clone(),
            });
        }
        crate::model::BehaviourAfterFailure::DontCleanup => {
            if ctx.mark_manual_removal_advised(&container.name) {
                ctx.queue_step(TaskStep::DisplayTaskFailure(format!(
                    "container \"{}\" ({}) was left running by request; remove it manually with \
                     `docker rm -f {}`",
                    container.name, runtime_container, runtime_container
                )));
            }
        }
    }
}

/// Shared abort-time bookkeeping run from every `abortsTask = true` failure
/// handler: clean up everything already created (including the container
/// that just failed to start or become healthy, which is itself already
/// `ContainerCreated` by the time either of those events fires), cancel
/// anything not yet created, and check whether the run can already finish.
fn abort_cleanup(ctx: &mut TaskEventContext) {
    for name in ctx.created_container_names() {
        if ctx.is_container_terminal(&name) {
            continue;
        }
        let container = ctx.container(&name).unwrap().clone();
        let rc = ctx.runtime_container_of(&name).unwrap().clone();
        abort_one_container(ctx, &container, &rc);
    }
    for name in ctx.all_container_names() {
        if !ctx.is_container_created(&name) && !ctx.is_creation_failed(&name) {
            ctx.cancel_pending_create_container(&name);
        }
    }
    maybe_delete_network(ctx);
}

fn maybe_delete_network(ctx: &mut TaskEventContext) {
    if ctx.is_finish_queued() {
        return;
    }
    if !ctx.all_attempted_containers_terminal() {
        return;
    }
    match ctx.network().cloned() {
        Some(network) => {
            if !ctx.is_network_deletion_queued() {
                ctx.queue_step(TaskStep::DeleteTaskNetwork(network));
            }
        }
        None => {
            // Network creation may still be in flight (e.g. an image build
            // failed before `TaskNetworkCreated` arrived). Only finish once
            // creation has actually resolved one way or the other; otherwise
            // wait for that event to re-trigger this check.
            if ctx.network_creation_resolved() {
                ctx.queue_step(TaskStep::FinishTask);
            }
        }
    }
}
