//! The production [RuntimeAdapter] backed by the local Docker Engine API via
//! `bollard`, grounded in the teacher's `SuperDockerfile`/`port_bindings_to_bollard_args`
//! helpers. Feature-gated behind `bollard` since it is the only part of the
//! crate that needs a real daemon.

use std::{
    collections::{BTreeMap, HashMap},
    io::Write,
    time::Duration,
};

use async_trait::async_trait;
use bollard::{
    container::{Config, CreateContainerOptions, RemoveContainerOptions, StopContainerOptions},
    image::{BuildImageOptions, CreateImageOptions},
    network::CreateNetworkOptions,
    system::EventsOptions,
    Docker,
};
use futures::StreamExt;
use stacked_errors::{Result, StackableErr};

use crate::model::{Container, PortBind, PortProtocol, RuntimeContainer, RuntimeImage, RuntimeNetwork, VolumeMount};

use super::{parse, BuildProgressLine, HealthStreamOutcome, RuntimeAdapter};

pub struct BollardAdapter {
    docker: Docker,
}

impl BollardAdapter {
    pub fn connect_with_local_defaults() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults().stack_err("BollardAdapter::connect")?;
        Ok(Self { docker })
    }
}

fn port_bindings(ports: &[PortBind]) -> (bollard::container::PortMap, Vec<String>) {
    let mut port_map = bollard::container::PortMap::new();
    let mut exposed = Vec::new();
    for port in ports {
        let protocol = match port.protocol {
            PortProtocol::Tcp => "tcp",
            PortProtocol::Udp => "udp",
        };
        let key = format!("{}/{protocol}", port.container_port);
        port_map.insert(
            key.clone(),
            Some(vec![bollard::service::PortBinding {
                host_ip: None,
                host_port: port.host_port.map(|p| p.to_string()),
            }]),
        );
        exposed.push(key);
    }
    (port_map, exposed)
}

fn bind_mounts(volumes: &[VolumeMount]) -> Vec<String> {
    volumes
        .iter()
        .map(|v| {
            if v.read_only {
                format!("{}:{}:ro", v.host_path, v.container_path)
            } else {
                format!("{}:{}", v.host_path, v.container_path)
            }
        })
        .collect()
}

#[async_trait]
impl RuntimeAdapter for BollardAdapter {
    async fn build(
        &self,
        container: &Container,
        directory: &str,
        build_args: &[String],
        on_progress: &(dyn Fn(BuildProgressLine) + Send + Sync),
    ) -> Result<RuntimeImage> {
        let tag = deterministic_build_tag(&container.name, directory, build_args);

        let mut buildargs = BTreeMap::new();
        for arg in build_args {
            if let Some((k, v)) = arg.split_once('=') {
                buildargs.insert(k.to_owned(), v.to_owned());
            }
        }

        let tarball = build_context_tarball(directory).stack_err("BollardAdapter::build tarball")?;

        let options = BuildImageOptions {
            dockerfile: "Dockerfile".to_owned(),
            t: tag.clone(),
            rm: true,
            buildargs,
            ..Default::default()
        };

        let mut stream = self.docker.build_image(options, None, Some(tarball.into()));
        while let Some(chunk) = stream.next().await {
            let info = chunk.map_err(|e| format!("{e:?}")).stack_err("docker build_image stream")?;
            if let Some(line) = info.stream {
                if let Some(progress) = parse::parse_build_step_line(&line) {
                    on_progress(progress);
                }
            }
            if let Some(error) = info.error {
                return Err(stacked_errors::Error::from_kind_locationless(format!(
                    "building \"{}\": {error}",
                    container.name
                )));
            }
        }

        Ok(RuntimeImage(tag))
    }

    async fn pull_if_missing(&self, reference: &str) -> Result<RuntimeImage> {
        if self.docker.inspect_image(reference).await.is_ok() {
            return Ok(RuntimeImage(reference.to_owned()));
        }

        let options = CreateImageOptions {
            from_image: reference.to_owned(),
            ..Default::default()
        };
        let mut stream = self.docker.create_image(Some(options), None, None);
        while let Some(chunk) = stream.next().await {
            chunk
                .map_err(|e| format!("{e:?}"))
                .stack_err(format!("pulling \"{reference}\""))?;
        }
        Ok(RuntimeImage(reference.to_owned()))
    }

    async fn create_network(&self, name: &str) -> Result<RuntimeNetwork> {
        let options = CreateNetworkOptions {
            name: name.to_owned(),
            driver: "bridge".to_owned(),
            ..Default::default()
        };
        self.docker
            .create_network(options)
            .await
            .map_err(|e| format!("{e:?}"))
            .stack_err("creating task network")?;
        Ok(RuntimeNetwork(name.to_owned()))
    }

    async fn delete_network(&self, network: &RuntimeNetwork) -> Result<()> {
        self.docker
            .remove_network(&network.0)
            .await
            .map_err(|e| format!("{e:?}"))
            .stack_err("deleting task network")
    }

    async fn create(
        &self,
        container: &Container,
        image: &RuntimeImage,
        network: &RuntimeNetwork,
        command: Option<&[String]>,
        env: &BTreeMap<String, String>,
        ports: &[PortBind],
        volumes: &[VolumeMount],
    ) -> Result<RuntimeContainer> {
        let (port_bindings, exposed_ports_list) = port_bindings(ports);
        let exposed_ports = exposed_ports_list
            .into_iter()
            .map(|k| (k, BTreeMap::<(), ()>::new()))
            .collect();

        let env: Vec<String> = env.iter().map(|(k, v)| format!("{k}={v}")).collect();

        let host_config = bollard::service::HostConfig {
            network_mode: Some(network.0.clone()),
            port_bindings: Some(port_bindings),
            binds: Some(bind_mounts(volumes)),
            ..Default::default()
        };

        let config = Config {
            image: Some(image.0.clone()),
            cmd: command.map(|c| c.to_vec()),
            working_dir: container.working_directory.clone(),
            env: Some(env),
            exposed_ports: Some(exposed_ports),
            host_config: Some(host_config),
            user: container.run_as_current_user.then(current_user_spec),
            ..Default::default()
        };

        let runtime_name = format!("taskforge-{}-{}", container.name, &uuid::Uuid::new_v4().to_string()[..8]);
        let options = CreateContainerOptions {
            name: runtime_name.clone(),
            platform: None,
        };

        self.docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| format!("{e:?}"))
            .stack_err(format!("creating container \"{}\"", container.name))?;

        Ok(RuntimeContainer(runtime_name))
    }

    async fn run(&self, runtime_container: &RuntimeContainer) -> Result<i32> {
        self.docker
            .start_container::<String>(&runtime_container.0, None)
            .await
            .map_err(|e| format!("{e:?}"))
            .stack_err("starting container")?;

        let mut wait_stream = self.docker.wait_container::<String>(&runtime_container.0, None);
        let mut exit_code = 0;
        while let Some(result) = wait_stream.next().await {
            let response = result.map_err(|e| format!("{e:?}")).stack_err("waiting on container")?;
            exit_code = response.status_code as i32;
        }
        Ok(exit_code)
    }

    async fn start(&self, runtime_container: &RuntimeContainer) -> Result<()> {
        self.docker
            .start_container::<String>(&runtime_container.0, None)
            .await
            .map_err(|e| format!("{e:?}"))
            .stack_err("starting container")
    }

    async fn stop(&self, runtime_container: &RuntimeContainer, timeout: Duration) -> Result<()> {
        let options = StopContainerOptions {
            t: timeout.as_secs() as i64,
        };
        self.docker
            .stop_container(&runtime_container.0, Some(options))
            .await
            .map_err(|e| format!("{e:?}"))
            .stack_err("stopping container")
    }

    async fn remove(&self, runtime_container: &RuntimeContainer) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        match self.docker.remove_container(&runtime_container.0, Some(options)).await {
            Ok(()) => Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }) => Ok(()),
            Err(e) => Err(stacked_errors::Error::from_kind_locationless(format!("{e:?}")))
                .stack_err("removing container"),
        }
    }

    async fn inspect_healthcheck_presence(&self, runtime_container: &RuntimeContainer) -> Result<bool> {
        let info = self
            .docker
            .inspect_container(&runtime_container.0, None)
            .await
            .map_err(|e| format!("{e:?}"))
            .stack_err("inspecting container")?;
        // bollard already parses the inspect response's `Config.Healthcheck`
        // field into `Option<HealthConfig>`, so `null` vs. present falls out
        // of the `Option` directly: see `parse::healthcheck_is_present` for
        // the same null-vs-anything-else rule applied to the raw JSON text.
        Ok(info.config.and_then(|c| c.healthcheck).is_some())
    }

    async fn stream_events(&self, runtime_container: &RuntimeContainer) -> Result<HealthStreamOutcome> {
        let mut filters = HashMap::new();
        filters.insert("container".to_owned(), vec![runtime_container.0.clone()]);
        filters.insert("event".to_owned(), vec!["health_status".to_owned(), "die".to_owned()]);
        let options = EventsOptions::<String> {
            filters,
            ..Default::default()
        };

        let mut stream = self.docker.events(Some(options));
        while let Some(event) = stream.next().await {
            let event = event.map_err(|e| format!("{e:?}")).stack_err("reading container event stream")?;
            let action = event.action.unwrap_or_default();
            if action == "die" {
                return Ok(HealthStreamOutcome::Died);
            }
            if action.contains("unhealthy") {
                return Ok(HealthStreamOutcome::Unhealthy);
            }
            if action.contains("health_status") {
                return Ok(HealthStreamOutcome::Healthy);
            }
        }

        // the stream closed without a terminal health transition; fall back
        // to whatever exit code the container itself ended up with
        let info = self
            .docker
            .inspect_container(&runtime_container.0, None)
            .await
            .map_err(|e| format!("{e:?}"))
            .stack_err("inspecting container after event stream ended")?;
        let exit_code = info.state.and_then(|s| s.exit_code).unwrap_or(-1) as i32;
        Ok(HealthStreamOutcome::StreamEndedWithExit(exit_code))
    }

    async fn last_health_check_result(&self, runtime_container: &RuntimeContainer) -> Result<(i32, String)> {
        let info = self
            .docker
            .inspect_container(&runtime_container.0, None)
            .await
            .map_err(|e| format!("{e:?}"))
            .stack_err("inspecting container health")?;

        let last_log_entry = info
            .state
            .and_then(|s| s.health)
            .and_then(|h| h.log)
            .and_then(|mut log| log.pop());

        match last_log_entry {
            Some(entry) => Ok((
                entry.exit_code.unwrap_or(-1) as i32,
                entry.output.unwrap_or_default(),
            )),
            None => Ok((-1, "no health-check log entry available".to_owned())),
        }
    }
}

#[cfg(all(unix, feature = "nix_support"))]
fn current_user_spec() -> String {
    format!("{}:{}", nix::unistd::getuid(), nix::unistd::getgid())
}

#[cfg(not(all(unix, feature = "nix_support")))]
fn current_user_spec() -> String {
    String::new()
}

/// Packs a build directory into an uncompressed tar archive, the format
/// `Docker::build_image` expects as its body.
fn build_context_tarball(directory: &str) -> Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    builder
        .append_dir_all(".", directory)
        .stack_err("packing build context")?;
    let mut bytes = builder.into_inner().stack_err("finalizing build context tarball")?;
    bytes.flush().stack()?;
    Ok(bytes)
}

/// A stable tag for a build, so repeated builds of the same container from
/// the same build context reuse one tag instead of minting a fresh one each
/// time. Derived from a SHA3 digest of the build directory, the container
/// name, and its build args, rather than a freshly rolled UUID.
fn deterministic_build_tag(container_name: &str, directory: &str, build_args: &[String]) -> String {
    use sha3::{Digest, Sha3_256};

    let mut hasher = Sha3_256::new();
    hasher.update(directory.as_bytes());
    hasher.update(b"\0");
    hasher.update(container_name.as_bytes());
    for arg in build_args {
        hasher.update(b"\0");
        hasher.update(arg.as_bytes());
    }
    let digest = hasher.finalize();

    let mut suffix = String::with_capacity(16);
    for byte in digest.iter().take(8) {
        suffix.push_str(&format!("{byte:02x}"));
    }
    format!("taskforge/{container_name}:{suffix}")
}
