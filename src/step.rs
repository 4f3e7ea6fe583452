//! [TaskStep] — the tagged union of concrete units of work the
//! [dispatcher](crate::dispatcher) hands to the
//! [step runner](crate::step_runner). Every variant carries enough state to
//! execute independently of the event log.

use std::collections::BTreeMap;

use crate::model::{Container, RuntimeContainer, RuntimeImage, RuntimeNetwork};

#[derive(Debug, Clone)]
pub enum TaskStep {
    BeginTask,
    BuildImage(Container),
    PullImage(Container),
    CreateTaskNetwork,
    CreateContainer {
        container: Container,
        image: RuntimeImage,
        network: RuntimeNetwork,
        command: Option<Vec<String>>,
        env: BTreeMap<String, String>,
        propagate_proxy_environment_variables: bool,
    },
    RunContainer {
        container: Container,
        runtime_container: RuntimeContainer,
    },
    StartContainer {
        container: Container,
        runtime_container: RuntimeContainer,
    },
    WaitForHealth {
        container: Container,
        runtime_container: RuntimeContainer,
    },
    StopContainer {
        container: Container,
        runtime_container: RuntimeContainer,
    },
    RemoveContainer {
        container: Container,
        runtime_container: RuntimeContainer,
    },
    /// Force-remove variant used during abort/cleanup; idempotent under
    /// crash-in-the-middle (a "does not exist" result still yields
    /// `ContainerRemoved`).
    CleanUpContainer {
        container: Container,
        runtime_container: RuntimeContainer,
    },
    DeleteTaskNetwork(RuntimeNetwork),
    DeleteTemporaryFile {
        container: Container,
        path: String,
    },
    DisplayTaskFailure(String),
    FinishTask,
}

/// A coarse tag used for duplicate suppression in the ready queue
/// (dedupes by `(StepKind, primary key)`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StepKind {
    BeginTask,
    BuildImage,
    PullImage,
    CreateTaskNetwork,
    CreateContainer,
    RunContainer,
    StartContainer,
    WaitForHealth,
    StopContainer,
    RemoveContainer,
    CleanUpContainer,
    DeleteTaskNetwork,
    DeleteTemporaryFile,
    DisplayTaskFailure,
    FinishTask,
}

impl TaskStep {
    /// The `(kind, primary key)` pair used to dedupe the ready queue. The
    /// primary key is the container/network/path name the step concerns, or
    /// empty for steps that are inherently singleton (`CreateTaskNetwork`,
    /// `FinishTask`, `BeginTask`).
    pub fn dedup_key(&self) -> (StepKind, String) {
        match self {
            TaskStep::BeginTask => (StepKind::BeginTask, String::new()),
            TaskStep::BuildImage(c) => (StepKind::BuildImage, c.name.clone()),
            TaskStep::PullImage(c) => (StepKind::PullImage, c.name.clone()),
            TaskStep::CreateTaskNetwork => (StepKind::CreateTaskNetwork, String::new()),
            TaskStep::CreateContainer { container, .. } => {
                (StepKind::CreateContainer, container.name.clone())
            }
            TaskStep::RunContainer { container, .. } => {
                (StepKind::RunContainer, container.name.clone())
            }
            TaskStep::StartContainer { container, .. } => {
                (StepKind::StartContainer, container.name.clone())
            }
            TaskStep::WaitForHealth { container, .. } => {
                (StepKind::WaitForHealth, container.name.clone())
            }
            TaskStep::StopContainer { container, .. } => {
                (StepKind::StopContainer, container.name.clone())
            }
            TaskStep::RemoveContainer { container, .. } => {
                (StepKind::RemoveContainer, container.name.clone())
            }
            TaskStep::CleanUpContainer { container, .. } => {
                (StepKind::CleanUpContainer, container.name.clone())
            }
            TaskStep::DeleteTaskNetwork(n) => (StepKind::DeleteTaskNetwork, n.0.clone()),
            TaskStep::DeleteTemporaryFile { path, .. } => {
                (StepKind::DeleteTemporaryFile, path.clone())
            }
            TaskStep::DisplayTaskFailure(msg) => (StepKind::DisplayTaskFailure, msg.clone()),
            TaskStep::FinishTask => (StepKind::FinishTask, String::new()),
        }
    }

    /// Short human label used by the loggers.
    pub fn label(&self) -> String {
        match self {
            TaskStep::BeginTask => "starting task".to_owned(),
            TaskStep::BuildImage(c) => format!("Building {}", c.name),
            TaskStep::PullImage(c) => format!("Pulling {}", c.name),
            TaskStep::CreateTaskNetwork => "Creating task network".to_owned(),
            TaskStep::CreateContainer { container, .. } => {
                format!("Creating {}", container.name)
            }
            TaskStep::RunContainer { container, .. } => format!("Running {}", container.name),
            TaskStep::StartContainer { container, .. } => {
                format!("Starting dependency {}", container.name)
            }
            TaskStep::WaitForHealth { container, .. } => {
                format!("Waiting for {} to become healthy", container.name)
            }
            TaskStep::StopContainer { container, .. } => format!("Stopping {}", container.name),
            TaskStep::RemoveContainer { container, .. } => {
                format!("Removing {}", container.name)
            }
            TaskStep::CleanUpContainer { container, .. } => {
                format!("Cleaning up {}", container.name)
            }
            TaskStep::DeleteTaskNetwork(_) => "Deleting task network".to_owned(),
            TaskStep::DeleteTemporaryFile { path, .. } => format!("Deleting temp file {path}"),
            TaskStep::DisplayTaskFailure(_) => "Task failed".to_owned(),
            TaskStep::FinishTask => "Finishing task".to_owned(),
        }
    }
}
