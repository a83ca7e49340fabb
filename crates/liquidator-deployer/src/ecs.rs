//! AWS Elastic Container Service deployer.
//!
//! Each worker role maps to one Fargate service whose desired count is
//! the instance count. The task definition and service are created on
//! first use and reused afterwards.

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_ecs::Client;
use aws_sdk_ecs::error::DisplayErrorContext;
use aws_sdk_ecs::types::{
    AssignPublicIp, AwsVpcConfiguration, Compatibility, ContainerDefinition, CpuArchitecture,
    DeploymentConfiguration, KeyValuePair, LaunchType, NetworkConfiguration, NetworkMode,
    OsFamily, RuntimePlatform, SchedulingStrategy,
};
use tracing::{debug, info, warn};

use crate::Deployer;
use crate::error::{DeployerError, DeployerResult};

/// Upper bound for a single AWS API call.
const AWS_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Cluster placement settings shared by every role's service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EcsConfig {
    pub cluster_arn: String,
    pub cpu_units: i32,
    pub memory_mb: i32,
    pub subnets: Vec<String>,
    pub security_groups: Vec<String>,
}

/// Observed state of a scalable service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ServiceStatus {
    pub running: usize,
    pub pending: usize,
    pub desired: usize,
}

/// The two operations the deployer needs from a cluster scheduler.
#[async_trait]
pub trait ServiceApi: Send + Sync {
    async fn status(&self) -> DeployerResult<ServiceStatus>;

    async fn set_desired(&self, desired: usize) -> DeployerResult<()>;
}

/// [`ServiceApi`] for one ECS service.
pub struct EcsServiceApi {
    client: Client,
    cluster_arn: String,
    service_name: String,
}

impl EcsServiceApi {
    /// Load AWS credentials from the environment and make sure the task
    /// definition and service for `service_name` exist.
    pub async fn provision(
        service_name: &str,
        image: &str,
        env: &BTreeMap<String, String>,
        config: &EcsConfig,
    ) -> DeployerResult<Self> {
        if config.cluster_arn.is_empty() || config.subnets.is_empty() {
            return Err(DeployerError::InvalidConfig(
                "cluster ARN and at least one subnet are required".to_string(),
            ));
        }

        let sdk_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .load()
            .await;
        let api = Self {
            client: Client::new(&sdk_config),
            cluster_arn: config.cluster_arn.clone(),
            service_name: service_name.to_string(),
        };

        let task_definition = api.get_or_create_task_definition(image, env, config).await?;
        api.get_or_create_service(&task_definition, config).await?;
        Ok(api)
    }

    async fn get_or_create_task_definition(
        &self,
        image: &str,
        env: &BTreeMap<String, String>,
        config: &EcsConfig,
    ) -> DeployerResult<String> {
        let existing = with_timeout(
            "describe task definition",
            self.client
                .describe_task_definition()
                .task_definition(&self.service_name)
                .send(),
        )
        .await?;
        if let Ok(output) = existing
            && let Some(arn) = output
                .task_definition()
                .and_then(|definition| definition.task_definition_arn())
        {
            debug!(service = %self.service_name, %arn, "task definition exists");
            return Ok(arn.to_string());
        }

        let environment: Vec<KeyValuePair> = env
            .iter()
            .map(|(key, value)| KeyValuePair::builder().name(key).value(value).build())
            .collect();
        let container = ContainerDefinition::builder()
            .name(&self.service_name)
            .image(image)
            .cpu(config.cpu_units)
            .memory(config.memory_mb)
            .set_environment(Some(environment))
            .build();

        let registered = with_timeout(
            "register task definition",
            self.client
                .register_task_definition()
                .family(&self.service_name)
                .container_definitions(container)
                .runtime_platform(
                    RuntimePlatform::builder()
                        .operating_system_family(OsFamily::Linux)
                        .cpu_architecture(CpuArchitecture::X8664)
                        .build(),
                )
                .cpu(config.cpu_units.to_string())
                .memory(config.memory_mb.to_string())
                .network_mode(NetworkMode::Awsvpc)
                .requires_compatibilities(Compatibility::Fargate)
                .send(),
        )
        .await?
        .map_err(|e| DeployerError::Backend(DisplayErrorContext(e).to_string()))?;

        let arn = registered
            .task_definition()
            .and_then(|definition| definition.task_definition_arn())
            .ok_or_else(|| DeployerError::Backend("task definition has no ARN".to_string()))?
            .to_string();
        info!(service = %self.service_name, %arn, "registered task definition");
        Ok(arn)
    }

    async fn get_or_create_service(
        &self,
        task_definition: &str,
        config: &EcsConfig,
    ) -> DeployerResult<()> {
        if self.describe().await?.is_some() {
            return Ok(());
        }

        let vpc = AwsVpcConfiguration::builder()
            .set_subnets(Some(config.subnets.clone()))
            .set_security_groups(Some(config.security_groups.clone()))
            // A public IP is needed to pull images even though nothing
            // connects to the task.
            .assign_public_ip(AssignPublicIp::Enabled)
            .build()
            .map_err(|e| DeployerError::InvalidConfig(e.to_string()))?;

        with_timeout(
            "create service",
            self.client
                .create_service()
                .service_name(&self.service_name)
                .cluster(&self.cluster_arn)
                // The scaler decides the count.
                .desired_count(0)
                .launch_type(LaunchType::Fargate)
                .deployment_configuration(
                    DeploymentConfiguration::builder()
                        .minimum_healthy_percent(100)
                        .maximum_percent(200)
                        .build(),
                )
                .enable_ecs_managed_tags(true)
                .scheduling_strategy(SchedulingStrategy::Replica)
                .task_definition(task_definition)
                .network_configuration(
                    NetworkConfiguration::builder()
                        .awsvpc_configuration(vpc)
                        .build(),
                )
                .send(),
        )
        .await?
        .map_err(|e| DeployerError::Backend(DisplayErrorContext(e).to_string()))?;

        info!(service = %self.service_name, cluster = %self.cluster_arn, "created service");
        Ok(())
    }

    async fn describe(&self) -> DeployerResult<Option<ServiceStatus>> {
        let output = with_timeout(
            "describe services",
            self.client
                .describe_services()
                .cluster(&self.cluster_arn)
                .services(&self.service_name)
                .send(),
        )
        .await?
        .map_err(|e| DeployerError::Backend(DisplayErrorContext(e).to_string()))?;

        // A single service was requested, so at most one comes back.
        Ok(output.services().first().map(|service| ServiceStatus {
            running: service.running_count().max(0) as usize,
            pending: service.pending_count().max(0) as usize,
            desired: service.desired_count().max(0) as usize,
        }))
    }
}

#[async_trait]
impl ServiceApi for EcsServiceApi {
    async fn status(&self) -> DeployerResult<ServiceStatus> {
        self.describe().await?.ok_or_else(|| {
            DeployerError::Backend(format!(
                "service {} not found in cluster {}",
                self.service_name, self.cluster_arn
            ))
        })
    }

    async fn set_desired(&self, desired: usize) -> DeployerResult<()> {
        let desired = i32::try_from(desired)
            .map_err(|_| DeployerError::InvalidConfig(format!("desired count {desired}")))?;
        with_timeout(
            "update service",
            self.client
                .update_service()
                .cluster(&self.cluster_arn)
                .service(&self.service_name)
                .desired_count(desired)
                .send(),
        )
        .await?
        .map_err(|e| DeployerError::Backend(DisplayErrorContext(e).to_string()))?;
        Ok(())
    }
}

/// [`Deployer`] scaling one cluster service.
pub struct EcsDeployer<A: ServiceApi = EcsServiceApi> {
    role: String,
    api: A,
}

impl EcsDeployer<EcsServiceApi> {
    /// Provision the role's service in the configured cluster.
    pub async fn connect(
        role: &str,
        image: &str,
        env: &BTreeMap<String, String>,
        config: &EcsConfig,
    ) -> DeployerResult<Self> {
        let api = EcsServiceApi::provision(role, image, env, config).await?;
        Ok(Self::new(role, api))
    }
}

impl<A: ServiceApi> EcsDeployer<A> {
    pub fn new(role: &str, api: A) -> Self {
        Self {
            role: role.to_string(),
            api,
        }
    }
}

#[async_trait]
impl<A: ServiceApi> Deployer for EcsDeployer<A> {
    fn role(&self) -> &str {
        &self.role
    }

    async fn increase(&self) -> DeployerResult<()> {
        let status = self.api.status().await?;
        if status.pending != 0 {
            warn!(role = %self.role, "deployment in progress, ignoring increase");
            return Ok(());
        }

        let requested = status.running + 1;
        self.api.set_desired(requested).await?;
        info!(role = %self.role, total = requested, "deployed new instance");
        Ok(())
    }

    async fn decrease(&self) -> DeployerResult<()> {
        let status = self.api.status().await?;
        if status.pending != 0 {
            warn!(role = %self.role, "deployment in progress, ignoring decrease");
            return Ok(());
        }
        if status.running == 0 {
            return Ok(());
        }

        let requested = status.running - 1;
        self.api.set_desired(requested).await?;
        info!(role = %self.role, total = requested, "removed instance");
        Ok(())
    }

    async fn remove_all(&self) -> DeployerResult<()> {
        let status = self.api.status().await?;
        if status.running == 0 && status.desired == 0 {
            return Ok(());
        }

        self.api.set_desired(0).await?;
        info!(role = %self.role, removed = status.running, "removed all instances");
        Ok(())
    }

    async fn count(&self) -> DeployerResult<usize> {
        Ok(self.api.status().await?.running)
    }

    async fn is_deploying(&self) -> bool {
        match self.api.status().await {
            Ok(status) => status.pending != 0,
            Err(e) => {
                warn!(role = %self.role, error = %e, "unable to read service status");
                false
            }
        }
    }
}

async fn with_timeout<F: Future>(what: &'static str, call: F) -> DeployerResult<F::Output> {
    tokio::time::timeout(AWS_CALL_TIMEOUT, call)
        .await
        .map_err(|_| DeployerError::Timeout(what))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeService {
        status: Mutex<ServiceStatus>,
        updates: Mutex<Vec<usize>>,
    }

    impl FakeService {
        fn with(running: usize, pending: usize) -> Self {
            Self {
                status: Mutex::new(ServiceStatus {
                    running,
                    pending,
                    desired: running + pending,
                }),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl ServiceApi for FakeService {
        async fn status(&self) -> DeployerResult<ServiceStatus> {
            Ok(*self.status.lock().unwrap())
        }

        async fn set_desired(&self, desired: usize) -> DeployerResult<()> {
            self.updates.lock().unwrap().push(desired);
            let mut status = self.status.lock().unwrap();
            status.desired = desired;
            status.running = desired;
            Ok(())
        }
    }

    #[tokio::test]
    async fn increase_and_decrease_adjust_desired_from_running() {
        let d = EcsDeployer::new("executor", FakeService::with(2, 0));

        d.increase().await.unwrap();
        assert_eq!(d.count().await.unwrap(), 3);

        d.decrease().await.unwrap();
        assert_eq!(d.count().await.unwrap(), 2);
        assert_eq!(*d.api.updates.lock().unwrap(), vec![3, 2]);
    }

    #[tokio::test]
    async fn pending_tasks_block_changes() {
        let d = EcsDeployer::new("executor", FakeService::with(1, 1));
        assert!(d.is_deploying().await);

        d.increase().await.unwrap();
        d.decrease().await.unwrap();
        assert!(d.api.updates.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn remove_all_on_empty_service_is_noop() {
        let d = EcsDeployer::new("executor", FakeService::with(0, 0));
        d.remove_all().await.unwrap();
        assert!(d.api.updates.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn remove_all_sets_desired_to_zero() {
        let d = EcsDeployer::new("executor", FakeService::with(4, 0));
        d.remove_all().await.unwrap();
        assert_eq!(*d.api.updates.lock().unwrap(), vec![0]);
        assert_eq!(d.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn decrease_at_zero_is_noop() {
        let d = EcsDeployer::new("executor", FakeService::with(0, 0));
        d.decrease().await.unwrap();
        assert!(d.api.updates.lock().unwrap().is_empty());
    }
}
