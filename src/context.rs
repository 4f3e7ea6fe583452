//! Task Event Context — the per-run facade over the append-only event log
//! and the ready-step queue.
//!
//! All orchestration policy runs through this type: [event::TaskEvent::apply]
//! only ever mutates a [TaskEventContext] via [TaskEventContext::queue_step]
//! and the `mark_*` index updates below, never touching the runtime directly
//! — the reducer is pure with respect to enqueuing.
//!
//! The context is owned by a single conceptual writer (the dispatcher's
//! reducer loop); nothing here is internally synchronized, by design — see
//! `DESIGN.md` for why that single-writer discipline is enforced at the
//! dispatcher level instead of with a lock here.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::{
    event::TaskEvent,
    graph::DependencyGraph,
    model::{BehaviourAfterFailure, Container, RuntimeContainer, RuntimeImage, RuntimeNetwork},
    step::{StepKind, TaskStep},
};

#[derive(Debug)]
pub struct TaskEventContext {
    graph: DependencyGraph,
    behaviour_after_failure: BehaviourAfterFailure,
    propagate_proxy_environment_variables: bool,

    event_log: Vec<TaskEvent>,
    is_aborting: bool,

    // --- typed indexes kept alongside the log, so lookups don't have to
    // replay event history ---
    image_ready: BTreeMap<String, RuntimeImage>,
    network: Option<RuntimeNetwork>,
    network_creation_failed: bool,
    network_deleted: bool,
    network_deletion_failed: bool,
    created: BTreeMap<String, RuntimeContainer>,
    creation_failed: BTreeSet<String>,
    started: BTreeSet<String>,
    healthy: BTreeSet<String>,
    exited: BTreeMap<String, i32>,
    stopped: BTreeSet<String>,
    removed: BTreeSet<String>,
    removal_failed: BTreeSet<String>,
    temp_files: Vec<(String, String)>,
    temp_files_deleted: BTreeSet<String>,
    manual_removal_advised: BTreeSet<String>,

    // --- step bookkeeping ---
    ready_queue: VecDeque<TaskStep>,
    /// Every `(kind, key)` ever queued, pending or already processed —
    /// backs `queueStep`'s dedup rule and `getPendingAndProcessedStepsOfType`.
    ever_queued: BTreeSet<(StepKind, String)>,
    attempted_creates: BTreeSet<String>,
    network_deletion_queued: bool,
    finish_queued: bool,

    task_exit_code: Option<i32>,
}

impl TaskEventContext {
    pub fn new(
        graph: DependencyGraph,
        behaviour_after_failure: BehaviourAfterFailure,
        propagate_proxy_environment_variables: bool,
    ) -> Self {
        Self {
            graph,
            behaviour_after_failure,
            propagate_proxy_environment_variables,
            event_log: Vec::new(),
            is_aborting: false,
            image_ready: BTreeMap::new(),
            network: None,
            network_creation_failed: false,
            network_deleted: false,
            network_deletion_failed: false,
            created: BTreeMap::new(),
            creation_failed: BTreeSet::new(),
            started: BTreeSet::new(),
            healthy: BTreeSet::new(),
            exited: BTreeMap::new(),
            stopped: BTreeSet::new(),
            removed: BTreeSet::new(),
            removal_failed: BTreeSet::new(),
            temp_files: Vec::new(),
            temp_files_deleted: BTreeSet::new(),
            manual_removal_advised: BTreeSet::new(),
            ready_queue: VecDeque::new(),
            ever_queued: BTreeSet::new(),
            attempted_creates: BTreeSet::new(),
            network_deletion_queued: false,
            finish_queued: false,
            task_exit_code: None,
        }
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn behaviour_after_failure(&self) -> BehaviourAfterFailure {
        self.behaviour_after_failure
    }

    pub fn propagate_proxy_environment_variables(&self) -> bool {
        self.propagate_proxy_environment_variables
    }

    /// Appends `event` to the log, updates the typed indexes, then invokes
    /// `event.apply(self)`. Handlers are re-entrancy safe: an index update
    /// (e.g. inserting into `healthy`) is a set/map write, so the same event
    /// arriving twice is a no-op the second time, and `apply`'s own enqueues
    /// are protected by `queue_step`'s dedup.
    pub fn post_event(&mut self, event: TaskEvent) {
        self.event_log.push(event.clone());
        self.index_event(&event);
        event.apply(self);
    }

    fn index_event(&mut self, event: &TaskEvent) {
        use TaskEvent::*;
        match event {
            TaskStarted => {}
            ImageBuildProgress { .. } => {}
            ImageBuilt { container, image } => {
                self.image_ready.insert(container.name.clone(), image.clone());
            }
            ImagePulled { container, image } => {
                self.image_ready.insert(container.name.clone(), image.clone());
            }
            TaskNetworkCreated(network) => {
                self.network = Some(network.clone());
            }
            ContainerCreated {
                container,
                runtime_container,
            } => {
                self.created
                    .insert(container.name.clone(), runtime_container.clone());
            }
            ContainerStarted { container } => {
                self.started.insert(container.name.clone());
            }
            ContainerBecameHealthy { container } => {
                self.healthy.insert(container.name.clone());
            }
            RunningContainerExited { container, exit_code } => {
                self.exited.insert(container.name.clone(), *exit_code);
                if self.graph.is_task_container(&container.name) {
                    self.task_exit_code = Some(*exit_code);
                }
            }
            ContainerStopped { container } => {
                self.stopped.insert(container.name.clone());
            }
            ContainerRemoved { container } => {
                self.removed.insert(container.name.clone());
            }
            TaskNetworkDeleted => {
                self.network_deleted = true;
            }
            TemporaryFileCreated { container, path } => {
                self.temp_files.push((container.name.clone(), path.clone()));
            }
            TemporaryFileDeleted { path } => {
                self.temp_files_deleted.insert(path.clone());
            }
            ImageBuildFailed { .. }
            | ImagePullFailed { .. }
            | ContainerCreationFailed { .. }
            | ContainerStartFailed { .. }
            | ContainerDidNotBecomeHealthy { .. }
            | ContainerStopFailed { .. }
            | ContainerRemovalFailed { .. }
            | TemporaryFileDeletionFailed { .. } => {
                if let Some(name) = event.container_name() {
                    match event {
                        ContainerCreationFailed { .. } => {
                            self.creation_failed.insert(name.to_owned());
                        }
                        ContainerRemovalFailed { .. } => {
                            self.removal_failed.insert(name.to_owned());
                        }
                        _ => {}
                    }
                }
            }
            TaskNetworkCreationFailed { .. } => {
                self.network_creation_failed = true;
            }
            TaskNetworkDeletionFailed { .. } => {
                self.network_deletion_failed = true;
            }
        }
    }

    /// Appends `step` to the ready queue unless a step with the same
    /// `(kind, key)` has ever been queued before. Returns `true` if newly
    /// queued.
    pub fn queue_step(&mut self, step: TaskStep) -> bool {
        let key = step.dedup_key();
        if !self.ever_queued.insert(key.clone()) {
            return false;
        }
        if matches!(step, TaskStep::CreateContainer { .. }) {
            self.attempted_creates.insert(key.1.clone());
        }
        if matches!(step, TaskStep::DeleteTaskNetwork(_)) {
            self.network_deletion_queued = true;
        }
        if matches!(step, TaskStep::FinishTask) {
            self.finish_queued = true;
        }
        self.ready_queue.push_back(step);
        true
    }

    /// Removes a still-pending `CreateContainer` step for `container_name`
    /// from the ready queue: cancel it and drop it rather than let it run
    /// against an aborting task. The container is recorded as a creation
    /// failure so that network-deletion gating still terminates.
    pub fn cancel_pending_create_container(&mut self, container_name: &str) {
        let before = self.ready_queue.len();
        self.ready_queue.retain(|s| {
            !matches!(s, TaskStep::CreateContainer { container, .. } if container.name == container_name)
        });
        if self.ready_queue.len() != before {
            self.creation_failed.insert(container_name.to_owned());
        }
    }

    /// Pops the next ready step, if any. Called by the dispatcher.
    pub fn pop_ready_step(&mut self) -> Option<TaskStep> {
        self.ready_queue.pop_front()
    }

    pub fn has_ready_steps(&self) -> bool {
        !self.ready_queue.is_empty()
    }

    pub fn is_aborting(&self) -> bool {
        self.is_aborting
    }

    /// Monotonic: once true, stays true.
    pub fn set_aborting(&mut self) {
        self.is_aborting = true;
    }

    pub fn is_task_container(&self, name: &str) -> bool {
        self.graph.is_task_container(name)
    }

    pub fn container(&self, name: &str) -> Option<&Container> {
        self.graph.get(name)
    }

    pub fn dependencies_of(&self, name: &str) -> &[String] {
        self.graph.dependencies_of(name)
    }

    pub fn containers_that_depend_on(&self, name: &str) -> Vec<String> {
        self.graph.containers_that_depend_on(name)
    }

    pub fn all_dependencies_healthy(&self, name: &str) -> bool {
        self.dependencies_of(name)
            .iter()
            .all(|dep| self.healthy.contains(dep))
    }

    pub fn is_image_ready(&self, name: &str) -> bool {
        self.image_ready.contains_key(name)
    }

    pub fn image_of(&self, name: &str) -> Option<&RuntimeImage> {
        self.image_ready.get(name)
    }

    pub fn is_network_created(&self) -> bool {
        self.network.is_some()
    }

    pub fn network(&self) -> Option<&RuntimeNetwork> {
        self.network.as_ref()
    }

    /// `true` once network creation has resolved one way or the other
    /// (created or failed). `false` while it's still in flight, so callers
    /// deciding whether the run can finish don't mistake "hasn't happened
    /// yet" for "never will".
    pub fn network_creation_resolved(&self) -> bool {
        self.network.is_some() || self.network_creation_failed
    }

    pub fn is_container_created(&self, name: &str) -> bool {
        self.created.contains_key(name)
    }

    pub fn runtime_container_of(&self, name: &str) -> Option<&RuntimeContainer> {
        self.created.get(name)
    }

    pub fn is_healthy(&self, name: &str) -> bool {
        self.healthy.contains(name)
    }

    pub fn is_started(&self, name: &str) -> bool {
        self.started.contains(name)
    }

    /// Names of all containers whose image is ready, whose dependencies (if
    /// any) are all healthy, and which have not had a `CreateContainer` step
    /// queued yet. A container with no dependencies is creatable as soon as
    /// its image is ready; a container with dependencies waits for every one
    /// of them to reach `ContainerBecameHealthy` first.
    pub fn containers_ready_to_create(&self) -> Vec<String> {
        self.graph
            .containers()
            .map(|c| c.name.clone())
            .filter(|name| self.is_image_ready(name))
            .filter(|name| self.all_dependencies_healthy(name))
            .filter(|name| !self.ever_queued.contains(&(StepKind::CreateContainer, name.clone())))
            .collect()
    }

    pub fn created_container_names(&self) -> Vec<String> {
        self.created.keys().cloned().collect()
    }

    pub fn all_container_names(&self) -> Vec<String> {
        self.graph.containers().map(|c| c.name.clone()).collect()
    }

    pub fn is_container_terminal(&self, name: &str) -> bool {
        self.removed.contains(name) || self.removal_failed.contains(name)
    }

    pub fn is_creation_failed(&self, name: &str) -> bool {
        self.creation_failed.contains(name)
    }

    pub fn temp_files_of(&self, container_name: &str) -> Vec<String> {
        self.temp_files
            .iter()
            .filter(|(c, _)| c == container_name)
            .map(|(_, p)| p.clone())
            .collect()
    }

    /// Every container a `CreateContainer` step was ever attempted for is
    /// terminal: either removed, or will never be created
    /// (`ContainerCreationFailed`, including cancellation).
    pub fn all_attempted_containers_terminal(&self) -> bool {
        self.attempted_creates
            .iter()
            .all(|name| self.removed.contains(name) || self.creation_failed.contains(name))
    }

    pub fn is_network_deletion_queued(&self) -> bool {
        self.network_deletion_queued
    }

    pub fn is_finish_queued(&self) -> bool {
        self.finish_queued
    }

    pub fn mark_manual_removal_advised(&mut self, name: &str) -> bool {
        self.manual_removal_advised.insert(name.to_owned())
    }

    /// The task container's exit code if it ran to completion, else `None`
    /// (an orchestration failure occurred before the task container ran).
    pub fn task_exit_code(&self) -> Option<i32> {
        self.task_exit_code
    }

    pub fn event_log(&self) -> &[TaskEvent] {
        &self.event_log
    }
}
