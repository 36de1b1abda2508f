//! Operator configuration.
//!
//! Configuration is layered:
//! 1. built-in defaults
//! 2. an optional JSON file named by `OPERATOR_CONFIG`
//! 3. individual environment variables (`CLUSTER_NAME`, `OPERATOR_NAMESPACE`, ...)
//!
//! Durations are written as human readable strings (`"5s"`, `"30m"`, `"1h"`).

use crate::error::ControllerError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Settings of the cooldown queues placed in front of the handlers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CooldownConfig {
    /// Maximum number of remembered event keys
    pub capacity: usize,

    /// How long an admitted key blocks identical events
    #[serde(with = "duration_str")]
    pub ttl: Duration,
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self {
            capacity: 512,
            ttl: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OperatorConfig {
    /// Name of the cluster, part of every WLID
    pub cluster_name: String,

    /// Namespace the operator and its command objects live in
    pub namespace: String,

    /// When set, only these namespaces are watched for pods
    pub include_namespaces: Vec<String>,

    /// Namespaces ignored for pods, unused when `include_namespaces` is set
    pub exclude_namespaces: Vec<String>,

    /// Queue in front of pod, SBOM and workload handlers
    pub cooldown: CooldownConfig,

    /// Queue in front of the profile handlers
    pub profile_cooldown: CooldownConfig,

    /// Period of the polling watches
    #[serde(with = "duration_str")]
    pub generic_watch_period: Duration,

    /// Page size of polling list calls
    pub generic_watch_page_size: u32,

    /// Commands older than this are discarded
    #[serde(with = "duration_str")]
    pub command_max_age: Duration,

    /// Number of concurrent command executors
    pub worker_concurrency: usize,

    /// Commands buffered before submission blocks
    pub worker_queue_size: usize,

    /// Naked pods younger than this are re-checked before being scanned
    #[serde(with = "duration_str")]
    pub pod_scan_guard_time: Duration,

    /// Skip profiles whose workload currently has no pods
    pub skip_profiles_without_instances: bool,

    #[serde(with = "duration_str")]
    pub backoff_initial: Duration,

    #[serde(with = "duration_str")]
    pub backoff_max: Duration,

    /// Vulnerability scanner base URL
    pub vuln_scan_url: String,

    /// Configuration scanner base URL
    pub config_scan_url: String,

    /// Enables watching the workloads listed in `matching_rules_filename`
    pub continuous_scan_enabled: bool,

    pub matching_rules_filename: String,

    /// Address of the probe, metrics and trigger endpoint
    pub listen_addr: String,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            cluster_name: String::new(),
            namespace: "kubescape".to_string(),
            include_namespaces: Vec::new(),
            exclude_namespaces: Vec::new(),
            cooldown: CooldownConfig::default(),
            profile_cooldown: CooldownConfig {
                capacity: 512,
                ttl: Duration::from_secs(15),
            },
            generic_watch_period: Duration::from_secs(60),
            generic_watch_page_size: 100,
            command_max_age: Duration::from_secs(30 * 60),
            worker_concurrency: 3,
            worker_queue_size: 10,
            pod_scan_guard_time: Duration::from_secs(60 * 60),
            skip_profiles_without_instances: false,
            backoff_initial: Duration::from_secs(1),
            backoff_max: Duration::from_secs(5 * 60),
            vuln_scan_url: "http://kubevuln:8080".to_string(),
            config_scan_url: "http://kubescape:8080".to_string(),
            continuous_scan_enabled: false,
            matching_rules_filename: "/etc/config/matchingRules.json".to_string(),
            listen_addr: "0.0.0.0:4002".to_string(),
        }
    }
}

impl OperatorConfig {
    /// Load configuration from the process environment
    pub fn load() -> Result<Self, ControllerError> {
        Self::load_with(|key| std::env::var(key).ok())
    }

    /// Load configuration using `lookup` for environment variables
    pub fn load_with<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match lookup("OPERATOR_CONFIG") {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        config.apply_env(&lookup)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a JSON configuration file, missing fields take their defaults
    pub fn from_file(path: &Path) -> Result<Self, ControllerError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ControllerError::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            ControllerError::InvalidConfig(format!("cannot parse {}: {}", path.display(), e))
        })
    }

    fn apply_env<F>(&mut self, lookup: &F) -> Result<(), ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("CLUSTER_NAME") {
            self.cluster_name = v;
        }
        if let Some(v) = lookup("OPERATOR_NAMESPACE") {
            self.namespace = v;
        }
        if let Some(v) = lookup("VULN_SCAN_URL") {
            self.vuln_scan_url = v;
        }
        if let Some(v) = lookup("CONFIG_SCAN_URL") {
            self.config_scan_url = v;
        }
        if let Some(v) = lookup("LISTEN_ADDR") {
            self.listen_addr = v;
        }
        if let Some(v) = lookup("WORKER_CONCURRENCY") {
            self.worker_concurrency = v.parse().map_err(|_| {
                ControllerError::InvalidConfig(format!("WORKER_CONCURRENCY is not a number: {}", v))
            })?;
        }
        if let Some(v) = lookup("POD_SCAN_GUARD_TIME") {
            self.pod_scan_guard_time = humantime::parse_duration(&v).map_err(|e| {
                ControllerError::InvalidConfig(format!("POD_SCAN_GUARD_TIME: {}", e))
            })?;
        }
        Ok(())
    }

    /// Reject configurations the operator cannot run with
    pub fn validate(&self) -> Result<(), ControllerError> {
        if self.cluster_name.trim().is_empty() {
            return Err(ControllerError::InvalidConfig(
                "cluster name is required (CLUSTER_NAME)".to_string(),
            ));
        }
        if self.worker_concurrency == 0 || self.worker_queue_size == 0 {
            return Err(ControllerError::InvalidConfig(
                "worker pool size and queue size must be positive".to_string(),
            ));
        }
        if self.cooldown.capacity == 0 || self.profile_cooldown.capacity == 0 {
            return Err(ControllerError::InvalidConfig(
                "cooldown capacity must be positive".to_string(),
            ));
        }
        if self.generic_watch_page_size == 0 || self.generic_watch_period.is_zero() {
            return Err(ControllerError::InvalidConfig(
                "polling period and page size must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

mod duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(&humantime::format_duration(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(d)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}
