//! The [RuntimeAdapter] trait — the container-engine capability surface the
//! [step runner](crate::step_runner) drives. Exactly one
//! production implementation exists, [bollard_adapter::BollardAdapter],
//! feature-gated behind `bollard` since it pulls in a real Docker Engine API
//! client; a [fake::FakeRuntime] test double lets the reducer and dispatcher
//! be exercised without a daemon.

use std::time::Duration;

use stacked_errors::Result;

use crate::model::{Container, PortBind, RuntimeContainer, RuntimeImage, RuntimeNetwork, VolumeMount};

pub mod parse;

#[cfg(feature = "bollard")]
pub mod bollard_adapter;

pub mod fake;

/// A single line of build output, for the `ImageBuildProgress` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildProgressLine {
    pub step: u64,
    pub total: u64,
    pub label: String,
}

/// The terminal outcome of subscribing to a container's event stream filtered
/// to health-status transitions and its own exit, as `WaitForHealth` does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStreamOutcome {
    /// `health_status: healthy` arrived.
    Healthy,
    /// `health_status: unhealthy` arrived; the step runner still needs to
    /// fetch the last health-check log entry to build a diagnostic message.
    Unhealthy,
    /// The container exited (`die`) before any health status was reported.
    Died,
    /// The event stream itself ended (the adapter's subscription closed)
    /// before a health status arrived, carrying the container's exit code.
    StreamEndedWithExit(i32),
}

/// The capability set the step runner needs from a container engine. Every
/// method is async and fallible; callers are responsible for turning a
/// `Result::Err` into the matching `*Failed` [TaskEvent](crate::event::TaskEvent).
#[async_trait::async_trait]
pub trait RuntimeAdapter: Send + Sync {
    async fn build(
        &self,
        container: &Container,
        directory: &str,
        build_args: &[String],
        on_progress: &(dyn Fn(BuildProgressLine) + Send + Sync),
    ) -> Result<RuntimeImage>;

    async fn pull_if_missing(&self, reference: &str) -> Result<RuntimeImage>;

    async fn create_network(&self, name: &str) -> Result<RuntimeNetwork>;

    async fn delete_network(&self, network: &RuntimeNetwork) -> Result<()>;

    #[allow(clippy::too_many_arguments)]
    async fn create(
        &self,
        container: &Container,
        image: &RuntimeImage,
        network: &RuntimeNetwork,
        command: Option<&[String]>,
        env: &std::collections::BTreeMap<String, String>,
        ports: &[PortBind],
        volumes: &[VolumeMount],
    ) -> Result<RuntimeContainer>;

    /// Starts a container and blocks until it exits, returning the exit code.
    /// Used for the task container, whose output must stream to the user.
    async fn run(&self, runtime_container: &RuntimeContainer) -> Result<i32>;

    /// Starts a container without waiting for it to exit. Used for
    /// dependency containers.
    async fn start(&self, runtime_container: &RuntimeContainer) -> Result<()>;

    async fn stop(&self, runtime_container: &RuntimeContainer, timeout: Duration) -> Result<()>;

    /// Removes a container. Implementations must treat "already gone" as
    /// success, since cleanup may race a container that already exited and
    /// was removed by the engine's own `--rm` semantics.
    async fn remove(&self, runtime_container: &RuntimeContainer) -> Result<()>;

    /// Whether the engine reports a Docker-native healthcheck at all for
    /// this container (distinct from the result of running it).
    async fn inspect_healthcheck_presence(&self, runtime_container: &RuntimeContainer) -> Result<bool>;

    /// Subscribes to the container's event stream, filtered to health-status
    /// transitions and the container exiting, and blocks until the first
    /// terminal one arrives (or the stream itself ends).
    async fn stream_events(&self, runtime_container: &RuntimeContainer) -> Result<HealthStreamOutcome>;

    /// The most recent healthcheck log entry: its probe exit code and
    /// captured output, for building a diagnostic message once
    /// `stream_events` reports `Unhealthy`.
    async fn last_health_check_result(&self, runtime_container: &RuntimeContainer) -> Result<(i32, String)>;
}
