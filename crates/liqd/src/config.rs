//! Environment-driven configuration.
//!
//! Every option is a flag and an environment variable; the environment
//! is how the daemon is configured in practice.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Parser, ValueEnum};
use liquidator_autoscale::WatermarkConfig;
use liquidator_core::{WorkItemType, WorkerRole};
use liquidator_deployer::EcsConfig;
use liquidator_dispatch::{DEFAULT_LIVENESS_TIMEOUT, DEFAULT_MONITOR_INTERVAL, ManagerConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Json,
    Text,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DeployerType {
    Docker,
    #[value(name = "aws-ecs")]
    AwsEcs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ScalingType {
    Watermark,
}

#[derive(Debug, Parser)]
#[command(name = "liqd", about = "Liquidation bot manager daemon")]
pub struct Cli {
    // ── Logging ────────────────────────────────────────────────────
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[arg(long, env = "LOG_FORMAT", value_enum, ignore_case = true, default_value = "json")]
    pub log_format: LogFormat,

    #[arg(long, env = "SERVICE_NAME", default_value = "manager")]
    pub service_name: String,

    // ── Chain ──────────────────────────────────────────────────────
    #[arg(long, env = "CHAIN_ID")]
    pub chain_id: String,

    #[arg(long, env = "HIVE_ENDPOINT")]
    pub hive_endpoint: String,

    #[arg(long, env = "RPC_ENDPOINT")]
    pub rpc_endpoint: String,

    #[arg(long, env = "RPC_WEBSOCKET_ENDPOINT")]
    pub rpc_websocket_endpoint: String,

    #[arg(long, env = "LCD_ENDPOINT")]
    pub lcd_endpoint: String,

    // ── Queue and cache store ──────────────────────────────────────
    /// `host:port`, or a full redis:// URL.
    #[arg(long, env = "REDIS_ENDPOINT")]
    pub redis_endpoint: String,

    #[arg(long, env = "REDIS_DATABASE")]
    pub redis_database: i64,

    #[arg(long, env = "REDIS_METRICS_DATABASE")]
    pub redis_metrics_database: i64,

    #[arg(long, env = "SCANNER_QUEUE_NAME")]
    pub scanner_queue_name: String,

    #[arg(long, env = "HEALTH_CHECK_QUEUE_NAME")]
    pub health_check_queue_name: String,

    #[arg(long, env = "EXECUTOR_QUEUE_NAME")]
    pub executor_queue_name: String,

    #[arg(long, env = "SCANNER_ITEMS_PER_PACKET", value_parser = clap::value_parser!(u64).range(1..))]
    pub scanner_items_per_packet: u64,

    // ── Deployment ─────────────────────────────────────────────────
    #[arg(long, env = "DEPLOYER_TYPE", value_enum, ignore_case = true)]
    pub deployer_type: DeployerType,

    #[arg(long, env = "SCANNER_IMAGE")]
    pub scanner_image: String,

    #[arg(long, env = "HEALTH_CHECKER_IMAGE")]
    pub health_checker_image: String,

    #[arg(long, env = "EXECUTOR_IMAGE")]
    pub executor_image: String,

    /// JSON object of environment variables for scanner instances.
    #[arg(long, env = "SCANNER_CONFIG", default_value = "{}")]
    pub scanner_config: String,

    #[arg(long, env = "HEALTH_CHECKER_CONFIG", default_value = "{}")]
    pub health_checker_config: String,

    #[arg(long, env = "EXECUTOR_CONFIG", default_value = "{}")]
    pub executor_config: String,

    #[arg(long, env = "DOCKER_BINARY", default_value = "docker")]
    pub docker_binary: String,

    #[arg(long, env = "DOCKER_NETWORK")]
    pub docker_network: Option<String>,

    /// Containers are named `<prefix>-<role>-<n>`.
    #[arg(long, env = "DOCKER_NAME_PREFIX", default_value = "liquidator")]
    pub docker_name_prefix: String,

    #[arg(long, env = "AWS_CLUSTER_ARN")]
    pub aws_cluster_arn: Option<String>,

    #[arg(long, env = "AWS_SERVICE_CPU_UNITS", default_value = "256")]
    pub aws_service_cpu_units: i32,

    #[arg(long, env = "AWS_SERVICE_MEMORY_MB", default_value = "512")]
    pub aws_service_memory_mb: i32,

    #[arg(long, env = "AWS_SERVICE_SUBNETS", value_delimiter = ',')]
    pub aws_service_subnets: Vec<String>,

    #[arg(long, env = "AWS_SERVICE_SECURITY_GROUPS", value_delimiter = ',')]
    pub aws_service_security_groups: Vec<String>,

    // ── Scaling ────────────────────────────────────────────────────
    #[arg(long, env = "SCALING_TYPE", value_enum, ignore_case = true)]
    pub scaling_type: ScalingType,

    #[arg(long, env = "SCANNER_LOW_WATERMARK", default_value = "0")]
    pub scanner_low_watermark: usize,
    #[arg(long, env = "SCANNER_HIGH_WATERMARK", default_value = "1")]
    pub scanner_high_watermark: usize,
    #[arg(long, env = "SCANNER_MIN_INSTANCES", default_value = "1")]
    pub scanner_min_instances: usize,
    #[arg(long, env = "SCANNER_MAX_INSTANCES")]
    pub scanner_max_instances: Option<usize>,

    #[arg(long, env = "HEALTH_CHECKER_LOW_WATERMARK", default_value = "0")]
    pub health_checker_low_watermark: usize,
    #[arg(long, env = "HEALTH_CHECKER_HIGH_WATERMARK", default_value = "1")]
    pub health_checker_high_watermark: usize,
    #[arg(long, env = "HEALTH_CHECKER_MIN_INSTANCES", default_value = "1")]
    pub health_checker_min_instances: usize,
    #[arg(long, env = "HEALTH_CHECKER_MAX_INSTANCES")]
    pub health_checker_max_instances: Option<usize>,

    #[arg(long, env = "EXECUTOR_LOW_WATERMARK", default_value = "0")]
    pub executor_low_watermark: usize,
    #[arg(long, env = "EXECUTOR_HIGH_WATERMARK", default_value = "1")]
    pub executor_high_watermark: usize,
    #[arg(long, env = "EXECUTOR_MIN_INSTANCES", default_value = "1")]
    pub executor_min_instances: usize,
    #[arg(long, env = "EXECUTOR_MAX_INSTANCES")]
    pub executor_max_instances: Option<usize>,

    /// Consecutive watermark breaches before a scaler acts.
    #[arg(long, env = "SCALER_VIOLATION_CAP", default_value = "3")]
    pub scaler_violation_cap: u32,

    // ── Contract ───────────────────────────────────────────────────
    #[arg(long, env = "CONTRACT_ADDRESS")]
    pub contract_address: String,

    #[arg(long, env = "CONTRACT_ITEM_PREFIX", default_value = "")]
    pub contract_item_prefix: String,

    #[arg(long, env = "WORK_ITEM_TYPE", value_parser = parse_work_item_type)]
    pub work_item_type: WorkItemType,

    // ── Metrics ────────────────────────────────────────────────────
    #[arg(long, env = "METRICS_ENABLED", default_value = "false", action = clap::ArgAction::Set)]
    pub metrics_enabled: bool,

    /// Without a key, metrics are written to the log.
    #[arg(long, env = "DD_API_KEY", hide_env_values = true)]
    pub dd_api_key: Option<String>,

    #[arg(long, env = "DD_SITE", default_value = "datadoghq.com")]
    pub dd_site: String,
}

/// Blocking pop timeout used by the queue connection.
pub const QUEUE_POP_TIMEOUT: Duration = Duration::from_secs(5);

fn parse_work_item_type(value: &str) -> Result<WorkItemType, String> {
    value.parse().map_err(|e: liquidator_core::CoreError| e.to_string())
}

impl Cli {
    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            chain_id: self.chain_id.clone(),
            hive_endpoint: self.hive_endpoint.clone(),
            rpc_endpoint: self.rpc_endpoint.clone(),
            rpc_websocket_endpoint: self.rpc_websocket_endpoint.clone(),
            lcd_endpoint: self.lcd_endpoint.clone(),
            scanner_queue: self.scanner_queue_name.clone(),
            health_check_queue: self.health_check_queue_name.clone(),
            executor_queue: self.executor_queue_name.clone(),
            contract_address: self.contract_address.clone(),
            contract_item_prefix: self.contract_item_prefix.clone(),
            work_item_type: self.work_item_type,
            items_per_packet: self.scanner_items_per_packet,
            metrics_enabled: self.metrics_enabled,
            liveness_timeout: DEFAULT_LIVENESS_TIMEOUT,
            monitor_interval: DEFAULT_MONITOR_INTERVAL,
        }
    }

    /// Queue consumed by `role`.
    pub fn queue_name(&self, role: WorkerRole) -> &str {
        match role {
            WorkerRole::Scanner => &self.scanner_queue_name,
            WorkerRole::HealthChecker => &self.health_check_queue_name,
            WorkerRole::Executor => &self.executor_queue_name,
        }
    }

    pub fn image(&self, role: WorkerRole) -> &str {
        match role {
            WorkerRole::Scanner => &self.scanner_image,
            WorkerRole::HealthChecker => &self.health_checker_image,
            WorkerRole::Executor => &self.executor_image,
        }
    }

    /// Environment overrides passed to `role`'s instances.
    pub fn role_env(&self, role: WorkerRole) -> anyhow::Result<BTreeMap<String, String>> {
        let raw = match role {
            WorkerRole::Scanner => &self.scanner_config,
            WorkerRole::HealthChecker => &self.health_checker_config,
            WorkerRole::Executor => &self.executor_config,
        };
        parse_role_env(raw).with_context(|| format!("invalid {role} config"))
    }

    pub fn watermarks(&self, role: WorkerRole) -> WatermarkConfig {
        let (low, high, min_instances, max_instances) = match role {
            WorkerRole::Scanner => (
                self.scanner_low_watermark,
                self.scanner_high_watermark,
                self.scanner_min_instances,
                self.scanner_max_instances,
            ),
            WorkerRole::HealthChecker => (
                self.health_checker_low_watermark,
                self.health_checker_high_watermark,
                self.health_checker_min_instances,
                self.health_checker_max_instances,
            ),
            WorkerRole::Executor => (
                self.executor_low_watermark,
                self.executor_high_watermark,
                self.executor_min_instances,
                self.executor_max_instances,
            ),
        };
        WatermarkConfig {
            low,
            high,
            min_instances,
            max_instances,
            violation_cap: self.scaler_violation_cap,
        }
    }

    pub fn ecs_config(&self) -> anyhow::Result<EcsConfig> {
        let Some(cluster_arn) = self.aws_cluster_arn.clone() else {
            bail!("AWS_CLUSTER_ARN is required for the aws-ecs deployer");
        };
        if self.aws_service_subnets.is_empty() {
            bail!("AWS_SERVICE_SUBNETS is required for the aws-ecs deployer");
        }
        Ok(EcsConfig {
            cluster_arn,
            cpu_units: self.aws_service_cpu_units,
            memory_mb: self.aws_service_memory_mb,
            subnets: self.aws_service_subnets.clone(),
            security_groups: self.aws_service_security_groups.clone(),
        })
    }
}

/// Parse a JSON object of string values. Blank input means no overrides.
pub fn parse_role_env(raw: &str) -> anyhow::Result<BTreeMap<String, String>> {
    if raw.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    Ok(serde_json::from_str(raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    const REQUIRED: &[&str] = &[
        "liqd",
        "--chain-id", "osmosis-1",
        "--hive-endpoint", "http://hive",
        "--rpc-endpoint", "http://rpc:26657",
        "--rpc-websocket-endpoint", "ws://rpc:26657/websocket",
        "--lcd-endpoint", "http://lcd:1317",
        "--redis-endpoint", "localhost:6379",
        "--redis-database", "0",
        "--redis-metrics-database", "1",
        "--scanner-queue-name", "scanner",
        "--health-check-queue-name", "health_check",
        "--executor-queue-name", "executor",
        "--scanner-items-per-packet", "100",
        "--scanner-image", "scanner:latest",
        "--health-checker-image", "health-checker:latest",
        "--executor-image", "executor:latest",
        "--scaling-type", "watermark",
        "--contract-address", "osmo1redbank",
        "--work-item-type", "Redbank",
    ];

    fn parse(extra: &[&str]) -> Result<Cli, clap::Error> {
        let mut args: Vec<&str> = REQUIRED.to_vec();
        args.extend_from_slice(extra);
        if !extra.contains(&"--deployer-type") {
            args.extend_from_slice(&["--deployer-type", "docker"]);
        }
        Cli::try_parse_from(args)
    }

    #[test]
    fn defaults_follow_one_instance_per_role() {
        let cli = parse(&[]).unwrap();
        let marks = cli.watermarks(WorkerRole::Executor);
        assert_eq!((marks.low, marks.high, marks.min_instances), (0, 1, 1));
        assert_eq!(marks.max_instances, None);
        assert_eq!(marks.violation_cap, 3);
        assert_eq!(cli.log_format, LogFormat::Json);
        assert!(!cli.metrics_enabled);
        assert_eq!(cli.deployer_type, DeployerType::Docker);
    }

    #[test]
    fn per_role_overrides() {
        let cli = parse(&[
            "--health-checker-high-watermark", "50",
            "--health-checker-max-instances", "8",
            "--deployer-type", "aws-ecs",
            "--metrics-enabled", "true",
        ])
        .unwrap();
        let marks = cli.watermarks(WorkerRole::HealthChecker);
        assert_eq!(marks.high, 50);
        assert_eq!(marks.max_instances, Some(8));
        assert_eq!(cli.watermarks(WorkerRole::Scanner).high, 1);
        assert_eq!(cli.deployer_type, DeployerType::AwsEcs);
        assert!(cli.metrics_enabled);
    }

    #[test]
    fn zero_items_per_packet_rejected() {
        let mut args: Vec<&str> = REQUIRED.to_vec();
        let at = args.iter().position(|a| *a == "--scanner-items-per-packet").unwrap();
        args[at + 1] = "0";
        args.extend_from_slice(&["--deployer-type", "docker"]);
        assert!(Cli::try_parse_from(args).is_err());
    }

    #[test]
    fn unknown_work_item_type_rejected() {
        assert!(parse(&["--work-item-type", "vault"]).is_err());
    }

    #[test]
    fn role_env_is_json_object() {
        let env = parse_role_env(r#"{"BATCH_SIZE":"200","LOG_LEVEL":"debug"}"#).unwrap();
        assert_eq!(env.get("BATCH_SIZE").map(String::as_str), Some("200"));
        assert!(parse_role_env("").unwrap().is_empty());
        assert!(parse_role_env("[1,2]").is_err());
    }

    #[test]
    fn ecs_requires_cluster_and_subnets() {
        let cli = parse(&[]).unwrap();
        assert!(cli.ecs_config().is_err());

        let cli = parse(&[
            "--aws-cluster-arn", "arn:aws:ecs:eu-west-1:1:cluster/bots",
            "--aws-service-subnets", "subnet-a,subnet-b",
        ])
        .unwrap();
        assert_eq!(cli.ecs_config().unwrap().subnets.len(), 2);
    }

    #[test]
    fn manager_config_carries_contract() {
        let config = parse(&[]).unwrap().manager_config();
        assert!(config.validate().is_ok());
        assert_eq!(config.work_item_type, WorkItemType::Redbank);
        assert_eq!(config.items_per_packet, 100);
    }
}
