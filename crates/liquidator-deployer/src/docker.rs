//! Local container deployer.
//!
//! Each instance is a detached container named `<prefix>-<index>`. The
//! deployer never keeps a list of what it started: it derives its
//! instances from the container engine by name, so a restarted manager
//! picks up the containers of its predecessor.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::Deployer;
use crate::error::{DeployerError, DeployerResult};

/// Everything needed to start one container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub env: BTreeMap<String, String>,
}

/// Minimal view of a container engine.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Names of all running containers.
    async fn list_names(&self) -> DeployerResult<Vec<String>>;

    /// Start a detached container.
    async fn run(&self, spec: &ContainerSpec) -> DeployerResult<()>;

    /// Force-remove a container by name.
    async fn remove(&self, name: &str) -> DeployerResult<()>;
}

/// [`ContainerEngine`] driving the `docker` command line.
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
    network: Option<String>,
}

impl DockerCli {
    pub fn new(binary: impl Into<String>, network: Option<String>) -> Self {
        Self {
            binary: binary.into(),
            network,
        }
    }

    async fn exec(&self, args: &[String]) -> DeployerResult<String> {
        debug!(binary = %self.binary, ?args, "running container engine command");
        let output = Command::new(&self.binary).args(args).output().await?;
        if !output.status.success() {
            return Err(DeployerError::Command {
                command: format!("{} {}", self.binary, args.join(" ")),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn run_args(&self, spec: &ContainerSpec) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "--detach".to_string(),
            "--rm".to_string(),
            "--name".to_string(),
            spec.name.clone(),
        ];
        if let Some(network) = &self.network {
            args.push("--network".to_string());
            args.push(network.clone());
        }
        for (key, value) in &spec.env {
            args.push("--env".to_string());
            args.push(format!("{key}={value}"));
        }
        args.push(spec.image.clone());
        args
    }
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new("docker", None)
    }
}

#[async_trait]
impl ContainerEngine for DockerCli {
    async fn list_names(&self) -> DeployerResult<Vec<String>> {
        let stdout = self
            .exec(&["ps".to_string(), "--format".to_string(), "{{.Names}}".to_string()])
            .await?;
        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn run(&self, spec: &ContainerSpec) -> DeployerResult<()> {
        self.exec(&self.run_args(spec)).await.map(|_| ())
    }

    async fn remove(&self, name: &str) -> DeployerResult<()> {
        self.exec(&["rm".to_string(), "--force".to_string(), name.to_string()])
            .await
            .map(|_| ())
    }
}

/// [`Deployer`] running one container per instance.
pub struct DockerDeployer<E: ContainerEngine = DockerCli> {
    role: String,
    image: String,
    env: BTreeMap<String, String>,
    /// Container names are `<prefix>-<index>`.
    prefix: String,
    engine: E,
    /// Instance count requested by the last accepted change, until
    /// observed. Only set once the engine call succeeded.
    desired: Mutex<Option<usize>>,
}

impl<E: ContainerEngine> DockerDeployer<E> {
    /// Create a deployer for `role`. Containers are named
    /// `<name_prefix>-<role>-<index>`.
    pub fn new(
        role: &str,
        image: &str,
        env: BTreeMap<String, String>,
        name_prefix: &str,
        engine: E,
    ) -> DeployerResult<Self> {
        if role.is_empty() || image.is_empty() {
            return Err(DeployerError::InvalidConfig(
                "role and image must not be blank".to_string(),
            ));
        }
        Ok(Self {
            role: role.to_string(),
            image: image.to_string(),
            env,
            prefix: format!("{name_prefix}-{role}"),
            engine,
            desired: Mutex::new(None),
        })
    }

    /// Indices of the containers this deployer owns, ascending.
    async fn instances(&self) -> DeployerResult<Vec<usize>> {
        let names = self.engine.list_names().await?;
        Ok(owned_indices(&self.prefix, &names))
    }

    fn container_name(&self, index: usize) -> String {
        format!("{}-{index}", self.prefix)
    }
}

#[async_trait]
impl<E: ContainerEngine> Deployer for DockerDeployer<E> {
    fn role(&self) -> &str {
        &self.role
    }

    async fn increase(&self) -> DeployerResult<()> {
        if self.is_deploying().await {
            warn!(role = %self.role, "deployment in progress, ignoring increase");
            return Ok(());
        }

        let instances = self.instances().await?;
        let index = next_free_index(&instances);
        let spec = ContainerSpec {
            name: self.container_name(index),
            image: self.image.clone(),
            env: self.env.clone(),
        };

        self.engine.run(&spec).await?;
        *self.desired.lock().await = Some(instances.len() + 1);

        info!(
            role = %self.role,
            name = %spec.name,
            total = instances.len() + 1,
            "deployed new instance"
        );
        Ok(())
    }

    async fn decrease(&self) -> DeployerResult<()> {
        if self.is_deploying().await {
            warn!(role = %self.role, "deployment in progress, ignoring decrease");
            return Ok(());
        }

        let instances = self.instances().await?;
        let Some(&index) = instances.last() else {
            debug!(role = %self.role, "no instances to remove");
            return Ok(());
        };
        let name = self.container_name(index);

        self.engine.remove(&name).await?;
        *self.desired.lock().await = Some(instances.len() - 1);

        info!(
            role = %self.role,
            %name,
            total = instances.len() - 1,
            "removed instance"
        );
        Ok(())
    }

    async fn remove_all(&self) -> DeployerResult<()> {
        let instances = self.instances().await?;
        if instances.is_empty() {
            return Ok(());
        }

        for index in &instances {
            self.engine.remove(&self.container_name(*index)).await?;
        }
        *self.desired.lock().await = Some(0);

        info!(role = %self.role, removed = instances.len(), "removed all instances");
        Ok(())
    }

    async fn count(&self) -> DeployerResult<usize> {
        Ok(self.instances().await?.len())
    }

    async fn is_deploying(&self) -> bool {
        let mut desired = self.desired.lock().await;
        let Some(target) = *desired else {
            return false;
        };

        match self.instances().await {
            Ok(instances) if instances.len() == target => {
                *desired = None;
                false
            }
            Ok(instances) => {
                debug!(
                    role = %self.role,
                    desired = target,
                    observed = instances.len(),
                    "waiting for instances to converge"
                );
                true
            }
            Err(e) => {
                warn!(role = %self.role, error = %e, "unable to observe instances");
                false
            }
        }
    }
}

/// Indices of names shaped `<prefix>-<n>`, sorted ascending.
fn owned_indices(prefix: &str, names: &[String]) -> Vec<usize> {
    let mut indices: Vec<usize> = names
        .iter()
        .filter_map(|name| name.strip_prefix(prefix)?.strip_prefix('-'))
        .filter_map(|suffix| suffix.parse::<usize>().ok())
        .collect();
    indices.sort_unstable();
    indices
}

/// Lowest index not in the sorted `taken` list.
fn next_free_index(taken: &[usize]) -> usize {
    taken
        .iter()
        .enumerate()
        .find(|(expected, index)| *expected != **index)
        .map_or(taken.len(), |(expected, _)| expected)
}
