//! The static data model: [Container]s as declared by a project, and the
//! opaque runtime handles the [runtime](crate::runtime) adapter hands back
//! once something has actually been built, pulled, created, or networked.

use std::{collections::BTreeMap, time::Duration};

use serde::{Deserialize, Serialize};

/// Where a [Container]'s image comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageSource {
    /// Pull an existing image by reference (`name:tag`).
    PullImage(String),
    /// Build an image from a directory containing a Dockerfile, with a list
    /// of `--build-arg KEY=VALUE` strings.
    BuildImage {
        directory: String,
        build_args: Vec<String>,
    },
}

/// A `host_port:container_port[/protocol]` mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortBind {
    pub container_port: u16,
    pub host_port: Option<u16>,
    pub protocol: PortProtocol,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PortProtocol {
    Tcp,
    Udp,
}

impl std::fmt::Display for PortProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(if matches!(self, Self::Tcp) { "tcp" } else { "udp" })
    }
}

/// A `host_path:container_path` bind mount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMount {
    pub host_path: String,
    pub container_path: String,
    pub read_only: bool,
}

/// Timing for a container's declared healthcheck. Absence of this on a
/// [Container] means the container is considered healthy the instant it
/// starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheckTiming {
    pub interval: Duration,
    pub retries: u32,
    pub start_period: Duration,
}

impl HealthCheckTiming {
    /// The upper bound the engine waits before giving up on a health check
    /// that the runtime never resolves via its event stream. See
    /// `DESIGN.md` for the rationale behind this formula
    /// (`interval * retries + start_period`).
    pub fn timeout(&self) -> Duration {
        self.interval.saturating_mul(self.retries) + self.start_period
    }
}

/// A container as declared by the project configuration. Immutable for the
/// duration of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    pub name: String,
    pub image_source: ImageSource,
    pub command: Option<Vec<String>>,
    pub working_directory: Option<String>,
    pub environment: BTreeMap<String, String>,
    pub ports: Vec<PortBind>,
    pub volumes: Vec<VolumeMount>,
    pub health_check: Option<HealthCheckTiming>,
    pub run_as_current_user: bool,
    pub dependencies: Vec<String>,
}

impl Container {
    /// A container with no image-source-independent defaults set; callers
    /// fill in the rest with the builder-style `with_*` methods.
    pub fn new(name: impl Into<String>, image_source: ImageSource) -> Self {
        Self {
            name: name.into(),
            image_source,
            command: None,
            working_directory: None,
            environment: BTreeMap::new(),
            ports: Vec::new(),
            volumes: Vec::new(),
            health_check: None,
            run_as_current_user: false,
            dependencies: Vec::new(),
        }
    }

    pub fn with_dependencies(mut self, dependencies: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_health_check(mut self, health_check: HealthCheckTiming) -> Self {
        self.health_check = Some(health_check);
        self
    }

    pub fn with_command(mut self, command: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.command = Some(command.into_iter().map(Into::into).collect());
        self
    }
}

/// A named task: which container runs, what command it runs, and which
/// dependency containers must be healthy first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub name: String,
    pub task_container: String,
    pub command: Option<Vec<String>>,
}

/// Opaque identifier for a created container, one-to-one with a [Container]
/// for the lifetime of a run.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RuntimeContainer(pub String);

/// Opaque identifier/tag for a built or pulled image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeImage(pub String);

/// Opaque identifier for the per-run isolated bridge network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeNetwork(pub String);

impl std::fmt::Display for RuntimeContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Display for RuntimeImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Display for RuntimeNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Whether created resources are cleaned up after a failure, or left running
/// for the user to inspect manually.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BehaviourAfterFailure {
    #[default]
    Cleanup,
    DontCleanup,
}
