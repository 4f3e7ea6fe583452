//! Executes a single [TaskStep] against a [RuntimeAdapter], producing the
//! [TaskEvent] the reducer will index and react to. A step runner never
//! touches the [context](crate::context) directly — everything it learns
//! travels back through the event it returns.

use std::{sync::Arc, time::Duration};

use crate::{
    event::TaskEvent,
    model::{ImageSource, RuntimeNetwork},
    runtime::{HealthStreamOutcome, RuntimeAdapter},
    step::TaskStep,
};

/// The default grace period given to a dependency container between a
/// graceful `docker stop` request and a forced removal.
const STOP_GRACE_PERIOD: Duration = Duration::from_secs(10);

pub struct StepRunner {
    runtime: Arc<dyn RuntimeAdapter>,
}

impl StepRunner {
    pub fn new(runtime: Arc<dyn RuntimeAdapter>) -> Self {
        Self { runtime }
    }

    /// Executes `step`, returning the event it produced. `None` for steps
    /// that have no event of their own (`BeginTask`, `DisplayTaskFailure`)
    /// since those are handled by the engine/logger directly.
    pub async fn execute(
        &self,
        step: TaskStep,
        on_progress: &(dyn Fn(String, u64, u64, String) + Send + Sync),
    ) -> Option<TaskEvent> {
        match step {
            TaskStep::BeginTask => None,
            TaskStep::DisplayTaskFailure(_) => None,
            TaskStep::FinishTask => None,

            TaskStep::BuildImage(container) => {
                let (directory, build_args) = match &container.image_source {
                    ImageSource::BuildImage { directory, build_args } => {
                        (directory.clone(), build_args.clone())
                    }
                    ImageSource::PullImage(_) => unreachable!("BuildImage step on a PullImage container"),
                };
                let name = container.name.clone();
                let progress_fn = |line: crate::runtime::BuildProgressLine| {
                    on_progress(name.clone(), line.step, line.total, line.label);
                };
                match self
                    .runtime
                    .build(&container, &directory, &build_args, &progress_fn)
                    .await
                {
                    Ok(image) => Some(TaskEvent::ImageBuilt { container, image }),
                    Err(e) => Some(TaskEvent::ImageBuildFailed {
                        container,
                        message: format!("{e:?}"),
                    }),
                }
            }

            TaskStep::PullImage(container) => {
                let reference = match &container.image_source {
                    ImageSource::PullImage(reference) => reference.clone(),
                    ImageSource::BuildImage { .. } => unreachable!("PullImage step on a BuildImage container"),
                };
                match self.runtime.pull_if_missing(&reference).await {
                    Ok(image) => Some(TaskEvent::ImagePulled { container, image }),
                    Err(e) => Some(TaskEvent::ImagePullFailed {
                        container,
                        message: format!("{e:?}"),
                    }),
                }
            }

            TaskStep::CreateTaskNetwork => {
                let name = crate::misc::random_name("taskforge-net");
                match self.runtime.create_network(&name).await {
                    Ok(network) => Some(TaskEvent::TaskNetworkCreated(network)),
                    Err(e) => Some(TaskEvent::TaskNetworkCreationFailed {
                        message: format!("{e:?}"),
                    }),
                }
            }

            TaskStep::CreateContainer {
                container,
                image,
                network,
                command,
                mut env,
                propagate_proxy_environment_variables,
            } => {
                if propagate_proxy_environment_variables {
                    propagate_proxy_env(&mut env);
                }
                match self
                    .runtime
                    .create(
                        &container,
                        &image,
                        &network,
                        command.as_deref(),
                        &env,
                        &container.ports,
                        &container.volumes,
                    )
                    .await
                {
                    Ok(runtime_container) => Some(TaskEvent::ContainerCreated {
                        container,
                        runtime_container,
                    }),
                    Err(e) => Some(TaskEvent::ContainerCreationFailed {
                        container,
                        message: format!("{e:?}"),
                    }),
                }
            }

            TaskStep::RunContainer {
                container,
                runtime_container,
            } => match self.runtime.run(&runtime_container).await {
                Ok(exit_code) => Some(TaskEvent::RunningContainerExited { container, exit_code }),
                Err(e) => Some(TaskEvent::ContainerStartFailed {
                    container,
                    runtime_container,
                    message: format!("{e:?}"),
                }),
            },

            TaskStep::StartContainer {
                container,
                runtime_container,
            } => match self.runtime.start(&runtime_container).await {
                Ok(()) => Some(TaskEvent::ContainerStarted { container }),
                Err(e) => Some(TaskEvent::ContainerStartFailed {
                    container,
                    runtime_container,
                    message: format!("{e:?}"),
                }),
            },

            TaskStep::WaitForHealth {
                container,
                runtime_container,
            } => self.wait_for_health(container, runtime_container).await,

            TaskStep::StopContainer {
                container,
                runtime_container,
            } => match self.runtime.stop(&runtime_container, STOP_GRACE_PERIOD).await {
                Ok(()) => Some(TaskEvent::ContainerStopped { container }),
                Err(e) => Some(TaskEvent::ContainerStopFailed {
                    container,
                    runtime_container,
                    message: format!("{e:?}"),
                }),
            },

            TaskStep::RemoveContainer {
                container,
                runtime_container,
            } => match self.runtime.remove(&runtime_container).await {
                Ok(()) => Some(TaskEvent::ContainerRemoved { container }),
                Err(e) => Some(TaskEvent::ContainerRemovalFailed {
                    container,
                    runtime_container,
                    message: format!("{e:?}"),
                }),
            },

            TaskStep::CleanUpContainer {
                container,
                runtime_container,
            } => match self.runtime.remove(&runtime_container).await {
                Ok(()) => Some(TaskEvent::ContainerRemoved { container }),
                Err(e) => Some(TaskEvent::ContainerRemovalFailed {
                    container,
                    runtime_container,
                    message: format!("{e:?}"),
                }),
            },

            TaskStep::DeleteTaskNetwork(network) => self.delete_network(network).await,

            TaskStep::DeleteTemporaryFile { container: _, path } => {
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => Some(TaskEvent::TemporaryFileDeleted { path }),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        Some(TaskEvent::TemporaryFileDeleted { path })
                    }
                    Err(e) => Some(TaskEvent::TemporaryFileDeletionFailed {
                        path,
                        message: e.to_string(),
                    }),
                }
            }
        }
    }

    async fn delete_network(&self, network: RuntimeNetwork) -> Option<TaskEvent> {
        match self.runtime.delete_network(&network).await {
            Ok(()) => Some(TaskEvent::TaskNetworkDeleted),
            Err(e) => Some(TaskEvent::TaskNetworkDeletionFailed {
                message: format!("{e:?}"),
            }),
        }
    }

    /// Subscribes to the container's health-filtered event stream until it
    /// reports healthy, unhealthy, a bare exit, or the declared timeout
    /// elapses. Containers with no declared healthcheck at all are healthy
    /// the instant they start and never reach this step meaningfully (the
    /// reducer only queues `WaitForHealth` after `ContainerStarted`, which
    /// always happens, so the check below is what actually short-circuits
    /// them).
    async fn wait_for_health(
        &self,
        container: crate::model::Container,
        runtime_container: crate::model::RuntimeContainer,
    ) -> Option<TaskEvent> {
        let Some(timing) = container.health_check else {
            return Some(TaskEvent::ContainerBecameHealthy { container });
        };

        match self.runtime.inspect_healthcheck_presence(&runtime_container).await {
            Ok(false) => return Some(TaskEvent::ContainerBecameHealthy { container }),
            Err(e) => {
                return Some(TaskEvent::ContainerDidNotBecomeHealthy {
                    container,
                    runtime_container,
                    message: format!("{e:?}"),
                })
            }
            Ok(true) => {}
        }

        let outcome = tokio::time::timeout(timing.timeout(), self.runtime.stream_events(&runtime_container)).await;

        match outcome {
            Ok(Ok(HealthStreamOutcome::Healthy)) => Some(TaskEvent::ContainerBecameHealthy { container }),
            Ok(Ok(HealthStreamOutcome::Unhealthy)) => {
                let message = match self.runtime.last_health_check_result(&runtime_container).await {
                    Ok((exit_code, output)) => format!("exit code {exit_code}: {output}"),
                    Err(e) => format!("{e:?}"),
                };
                Some(TaskEvent::ContainerDidNotBecomeHealthy {
                    container,
                    runtime_container,
                    message,
                })
            }
            Ok(Ok(HealthStreamOutcome::Died)) => Some(TaskEvent::ContainerDidNotBecomeHealthy {
                container,
                runtime_container,
                message: "The container exited before becoming healthy.".to_owned(),
            }),
            Ok(Ok(HealthStreamOutcome::StreamEndedWithExit(code))) => Some(TaskEvent::ContainerDidNotBecomeHealthy {
                container,
                runtime_container,
                message: format!("event stream ended with exit code {code} before reporting a health status"),
            }),
            Ok(Err(e)) => Some(TaskEvent::ContainerDidNotBecomeHealthy {
                container,
                runtime_container,
                message: format!("{e:?}"),
            }),
            Err(_elapsed) => Some(TaskEvent::ContainerDidNotBecomeHealthy {
                container,
                runtime_container,
                message: format!("did not become healthy within {:?}", timing.timeout()),
            }),
        }
    }
}

fn propagate_proxy_env(env: &mut std::collections::BTreeMap<String, String>) {
    const PROXY_VARS: &[&str] = &["HTTP_PROXY", "HTTPS_PROXY", "NO_PROXY", "http_proxy", "https_proxy", "no_proxy"];
    for name in PROXY_VARS {
        if env.contains_key(*name) {
            continue;
        }
        if let Ok(value) = std::env::var(name) {
            env.insert((*name).to_owned(), value);
        }
    }
}
