//! An in-memory [RuntimeAdapter](super::RuntimeAdapter), scripted by name, so
//! the dispatcher and reducer can be exercised deterministically in tests
//! without a Docker daemon.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use stacked_errors::{Error, Result};

use crate::model::{Container, PortBind, RuntimeContainer, RuntimeImage, RuntimeNetwork, VolumeMount};

use super::{BuildProgressLine, HealthStreamOutcome, RuntimeAdapter};

/// Per-container scripted behaviour. Defaults to "succeed immediately,
/// healthy with no declared healthcheck, exit code 0".
#[derive(Debug, Clone, Default)]
pub struct ContainerScript {
    pub fail_build_or_pull: Option<String>,
    pub fail_create: Option<String>,
    pub fail_start: Option<String>,
    pub health_check_presence: bool,
    pub health_outcome: Option<HealthStreamOutcome>,
    /// `(exit_code, output)` returned from the last health-check log lookup,
    /// consulted only when `health_outcome` is `Unhealthy`.
    pub health_log: Option<(i32, String)>,
    pub exit_code: i32,
}

#[derive(Debug, Default)]
pub struct FakeRuntime {
    scripts: Mutex<BTreeMap<String, ContainerScript>>,
    fail_network_create: Mutex<Option<String>>,
    calls: Mutex<Vec<String>>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, name: impl Into<String>, script: ContainerScript) {
        self.scripts.lock().unwrap().insert(name.into(), script);
    }

    pub fn fail_network_create(&self, message: impl Into<String>) {
        *self.fail_network_create.lock().unwrap() = Some(message.into());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    fn script_of(&self, name: &str) -> ContainerScript {
        self.scripts.lock().unwrap().get(name).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl RuntimeAdapter for FakeRuntime {
    async fn build(
        &self,
        container: &Container,
        _directory: &str,
        _build_args: &[String],
        on_progress: &(dyn Fn(BuildProgressLine) + Send + Sync),
    ) -> Result<RuntimeImage> {
        self.record(format!("build:{}", container.name));
        on_progress(BuildProgressLine {
            step: 1,
            total: 1,
            label: "FROM scratch".to_owned(),
        });
        if let Some(message) = self.script_of(&container.name).fail_build_or_pull {
            return Err(Error::from_kind_locationless(message));
        }
        Ok(RuntimeImage(format!("{}:fake", container.name)))
    }

    async fn pull_if_missing(&self, reference: &str) -> Result<RuntimeImage> {
        self.record(format!("pull:{reference}"));
        Ok(RuntimeImage(reference.to_owned()))
    }

    async fn create_network(&self, name: &str) -> Result<RuntimeNetwork> {
        self.record(format!("create_network:{name}"));
        if let Some(message) = self.fail_network_create.lock().unwrap().clone() {
            return Err(Error::from_kind_locationless(message));
        }
        Ok(RuntimeNetwork(name.to_owned()))
    }

    async fn delete_network(&self, network: &RuntimeNetwork) -> Result<()> {
        self.record(format!("delete_network:{}", network.0));
        Ok(())
    }

    async fn create(
        &self,
        container: &Container,
        _image: &RuntimeImage,
        _network: &RuntimeNetwork,
        _command: Option<&[String]>,
        _env: &BTreeMap<String, String>,
        _ports: &[PortBind],
        _volumes: &[VolumeMount],
    ) -> Result<RuntimeContainer> {
        self.record(format!("create:{}", container.name));
        if let Some(message) = self.script_of(&container.name).fail_create {
            return Err(Error::from_kind_locationless(message));
        }
        Ok(RuntimeContainer(format!("{}-rc", container.name)))
    }

    async fn run(&self, runtime_container: &RuntimeContainer) -> Result<i32> {
        self.record(format!("run:{}", runtime_container.0));
        let name = runtime_container.0.trim_end_matches("-rc");
        let script = self.script_of(name);
        if let Some(message) = script.fail_start {
            return Err(Error::from_kind_locationless(message));
        }
        Ok(script.exit_code)
    }

    async fn start(&self, runtime_container: &RuntimeContainer) -> Result<()> {
        self.record(format!("start:{}", runtime_container.0));
        let name = runtime_container.0.trim_end_matches("-rc");
        if let Some(message) = self.script_of(name).fail_start {
            return Err(Error::from_kind_locationless(message));
        }
        Ok(())
    }

    async fn stop(&self, runtime_container: &RuntimeContainer, _timeout: Duration) -> Result<()> {
        self.record(format!("stop:{}", runtime_container.0));
        Ok(())
    }

    async fn remove(&self, runtime_container: &RuntimeContainer) -> Result<()> {
        self.record(format!("remove:{}", runtime_container.0));
        Ok(())
    }

    async fn inspect_healthcheck_presence(&self, runtime_container: &RuntimeContainer) -> Result<bool> {
        let name = runtime_container.0.trim_end_matches("-rc");
        Ok(self.script_of(name).health_check_presence)
    }

    async fn stream_events(&self, runtime_container: &RuntimeContainer) -> Result<HealthStreamOutcome> {
        self.record(format!("stream_events:{}", runtime_container.0));
        let name = runtime_container.0.trim_end_matches("-rc");
        Ok(self
            .script_of(name)
            .health_outcome
            .unwrap_or(HealthStreamOutcome::Healthy))
    }

    async fn last_health_check_result(&self, runtime_container: &RuntimeContainer) -> Result<(i32, String)> {
        let name = runtime_container.0.trim_end_matches("-rc");
        Ok(self
            .script_of(name)
            .health_log
            .unwrap_or_else(|| (1, "healthcheck command failed".to_owned())))
    }
}

/// Convenience constructor for tests that just need a shared handle.
pub fn shared() -> Arc<FakeRuntime> {
    Arc::new(FakeRuntime::new())
}
