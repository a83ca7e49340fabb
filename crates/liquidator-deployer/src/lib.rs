//! liquidator-deployer: starts and stops worker-role instances.
//!
//! A [`Deployer`] owns the instances of exactly one worker role and can
//! grow or shrink them one at a time. Two runtimes are supported:
//!
//! ```text
//! Deployer (trait)
//!   ├── DockerDeployer  one container per instance, named <prefix>-<n>
//!   ├── EcsDeployer     one Fargate service, desired count mutated
//!   └── MockDeployer    in-memory, for tests
//! ```
//!
//! # Contract
//!
//! - `increase`/`decrease` are no-ops while `is_deploying()` is true.
//! - `remove_all` with nothing deployed succeeds without doing anything.
//! - `count` only reports instances this deployer manages.

pub mod docker;
pub mod ecs;
pub mod error;
pub mod mock;

use async_trait::async_trait;

pub use docker::{ContainerEngine, ContainerSpec, DockerCli, DockerDeployer};
pub use ecs::{EcsConfig, EcsDeployer, EcsServiceApi, ServiceApi, ServiceStatus};
pub use error::{DeployerError, DeployerResult};
pub use mock::MockDeployer;

/// Runs instances of one worker role on some runtime.
#[async_trait]
pub trait Deployer: Send + Sync {
    /// The worker role this deployer manages.
    fn role(&self) -> &str;

    /// Start one more instance.
    async fn increase(&self) -> DeployerResult<()>;

    /// Stop one instance.
    async fn decrease(&self) -> DeployerResult<()>;

    /// Stop every instance.
    async fn remove_all(&self) -> DeployerResult<()>;

    /// Number of instances currently running.
    async fn count(&self) -> DeployerResult<usize>;

    /// True while a requested change has not converged yet.
    async fn is_deploying(&self) -> bool;
}
