//! Parses a project's YAML configuration into the [model](crate::model)
//! types. This is a thin adapter in front of the engine:
//! the engine's own tests build [Container](crate::model::Container) values
//! directly, the way the teacher's `SuperDockerfile`/`Tarball` builders are
//! exercised without going through any file format at all.

use std::{collections::BTreeMap, time::Duration};

use serde::{Deserialize, Serialize};
use stacked_errors::{Error, Result, StackableErr};

use crate::model::{
    BehaviourAfterFailure, Container, HealthCheckTiming, ImageSource, PortBind, PortProtocol, Task,
    VolumeMount,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(default)]
    pub containers: BTreeMap<String, ContainerSpec>,
    #[serde(default)]
    pub tasks: BTreeMap<String, TaskSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub image: Option<String>,
    pub build_directory: Option<String>,
    #[serde(default)]
    pub build_args: Vec<String>,
    pub command: Option<Vec<String>>,
    pub working_directory: Option<String>,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    #[serde(default)]
    pub ports: Vec<PortBindSpec>,
    #[serde(default)]
    pub volumes: Vec<VolumeSpec>,
    pub health_check: Option<HealthCheckSpec>,
    #[serde(default)]
    pub run_as_current_user: bool,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortBindSpec {
    pub container_port: u16,
    pub host_port: Option<u16>,
    #[serde(default)]
    pub protocol: PortProtocolSpec,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortProtocolSpec {
    #[default]
    Tcp,
    Udp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeSpec {
    pub host_path: String,
    pub container_path: String,
    #[serde(default)]
    pub read_only: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckSpec {
    pub command: Option<Vec<String>>,
    #[serde(with = "humantime_serde_duration")]
    pub interval: Duration,
    pub retries: u32,
    #[serde(with = "humantime_serde_duration")]
    pub start_period: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub container: String,
    pub command: Option<Vec<String>>,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl ProjectConfig {
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let config: ProjectConfig = serde_yaml::from_str(text).stack_err("parsing project config")?;
        config.validate()?;
        Ok(config)
    }

    pub async fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let path = crate::acquire_file_path(path).await.stack()?;
        let text = tokio::fs::read_to_string(&path)
            .await
            .stack_err(format!("reading project config at \"{}\"", path.display()))?;
        Self::from_yaml_str(&text)
    }

    fn validate(&self) -> Result<()> {
        for (name, spec) in &self.containers {
            if spec.image.is_some() == spec.build_directory.is_some() {
                return Err(Error::from_kind_locationless(format!(
                    "container \"{name}\": exactly one of `image` or `build_directory` must be set"
                )));
            }
            for dep in &spec.dependencies {
                if !self.containers.contains_key(dep) {
                    return Err(Error::from_kind_locationless(format!(
                        "container \"{name}\" depends on undeclared container \"{dep}\""
                    )));
                }
            }
        }
        for (name, spec) in &self.tasks {
            if !self.containers.contains_key(&spec.container) {
                return Err(Error::from_kind_locationless(format!(
                    "task \"{name}\" names undeclared task container \"{}\"",
                    spec.container
                )));
            }
        }
        Ok(())
    }

    /// All containers in this project as [Container] values, keyed by name.
    pub fn containers(&self) -> Result<Vec<Container>> {
        self.containers
            .iter()
            .map(|(name, spec)| container_from_spec(name, spec))
            .collect()
    }

    /// Resolves `task_name`'s container plus its command override, matching
    /// the dependency-graph resolver's input contract.
    pub fn task(&self, task_name: &str) -> Result<Task> {
        let spec = self
            .tasks
            .get(task_name)
            .ok_or_else(|| Error::from_kind_locationless(format!("no task named \"{task_name}\"")))?;
        Ok(Task {
            name: task_name.to_owned(),
            task_container: spec.container.clone(),
            command: spec.command.clone(),
        })
    }
}

fn container_from_spec(name: &str, spec: &ContainerSpec) -> Result<Container> {
    let image_source = match (&spec.image, &spec.build_directory) {
        (Some(image), None) => ImageSource::PullImage(image.clone()),
        (None, Some(directory)) => ImageSource::BuildImage {
            directory: directory.clone(),
            build_args: spec.build_args.clone(),
        },
        _ => {
            return Err(Error::from_kind_locationless(format!(
                "container \"{name}\": exactly one of `image` or `build_directory` must be set"
            )))
        }
    };

    let ports = spec
        .ports
        .iter()
        .map(|p| PortBind {
            container_port: p.container_port,
            host_port: p.host_port,
            protocol: match p.protocol {
                PortProtocolSpec::Tcp => PortProtocol::Tcp,
                PortProtocolSpec::Udp => PortProtocol::Udp,
            },
        })
        .collect();

    let volumes = spec
        .volumes
        .iter()
        .map(|v| VolumeMount {
            host_path: v.host_path.clone(),
            container_path: v.container_path.clone(),
            read_only: v.read_only,
        })
        .collect();

    let health_check = spec.health_check.as_ref().map(|h| HealthCheckTiming {
        interval: h.interval,
        retries: h.retries,
        start_period: h.start_period,
    });

    Ok(Container {
        name: name.to_owned(),
        image_source,
        command: spec.command.clone(),
        working_directory: spec.working_directory.clone(),
        environment: spec.environment.clone(),
        ports,
        volumes,
        health_check,
        run_as_current_user: spec.run_as_current_user,
        dependencies: spec.dependencies.clone(),
    })
}

/// `Default` behaviour-after-failure for a run started from the CLI, before
/// `--no-cleanup` is applied.
pub fn default_behaviour_after_failure() -> BehaviourAfterFailure {
    BehaviourAfterFailure::default()
}

/// `humantime`-style `"5s"`/`"500ms"` duration (de)serialization for YAML,
/// without pulling in the `humantime-serde` crate for two fields.
mod humantime_serde_duration {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        format!("{}ms", duration.as_millis()).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let text = String::deserialize(deserializer)?;
        parse_duration(&text).map_err(serde::de::Error::custom)
    }

    fn parse_duration(text: &str) -> std::result::Result<Duration, String> {
        let text = text.trim();
        let (number, unit) = text
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .map(|i| text.split_at(i))
            .ok_or_else(|| format!("duration \"{text}\" has no unit"))?;
        let value: f64 = number
            .parse()
            .map_err(|_| format!("duration \"{text}\" has an invalid number"))?;
        let millis = match unit {
            "ms" => value,
            "s" => value * 1_000.0,
            "m" => value * 60_000.0,
            _ => return Err(format!("duration \"{text}\" has an unrecognized unit \"{unit}\"")),
        };
        Ok(Duration::from_millis(millis as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let yaml = r#"
containers:
  db:
    image: "postgres:16"
  app:
    build_directory: "."
    dependencies: ["db"]
tasks:
  test:
    container: app
    command: ["cargo", "test"]
"#;
        let config = ProjectConfig::from_yaml_str(yaml).unwrap();
        let containers = config.containers().unwrap();
        assert_eq!(containers.len(), 2);
        let task = config.task("test").unwrap();
        assert_eq!(task.task_container, "app");
        assert_eq!(task.command, Some(vec!["cargo".to_owned(), "test".to_owned()]));
    }

    #[test]
    fn rejects_both_image_and_build_directory() {
        let yaml = r#"
containers:
  app:
    image: "x"
    build_directory: "."
tasks: {}
"#;
        assert!(ProjectConfig::from_yaml_str(yaml).is_err());
    }

    #[test]
    fn rejects_unknown_dependency() {
        let yaml = r#"
containers:
  app:
    image: "x"
    dependencies: ["ghost"]
tasks: {}
"#;
        assert!(ProjectConfig::from_yaml_str(yaml).is_err());
    }

    #[test]
    fn parses_health_check_durations() {
        let yaml = r#"
containers:
  db:
    image: "postgres:16"
    health_check:
      interval: "2s"
      retries: 5
      start_period: "10s"
tasks: {}
"#;
        let config = ProjectConfig::from_yaml_str(yaml).unwrap();
        let containers = config.containers().unwrap();
        let db = containers.iter().find(|c| c.name == "db").unwrap();
        let hc = db.health_check.unwrap();
        assert_eq!(hc.interval, Duration::from_secs(2));
        assert_eq!(hc.retries, 5);
        assert_eq!(hc.start_period, Duration::from_secs(10));
    }
}
