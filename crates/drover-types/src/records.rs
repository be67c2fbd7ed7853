//! Project, environment, target and approval records
//!
//! These are the rows the release engine reads and writes through its store.
//! Schema details (indexes, soft deletion) belong to the store backend and
//! are out of scope here.

use crate::release::DeployType;
use crate::wire::{ContainerHealthCheck, PortMapping, VolumeMount};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Per-operation script timeouts in seconds; zero means the built-in default
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ScriptTimeouts {
    pub install: u64,
    pub update: u64,
    pub rollback: u64,
    pub uninstall: u64,
}

/// Script deploy configuration: one script per operation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScriptDeployConfig {
    pub work_dir: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub interpreter: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub environment: HashMap<String, String>,

    pub install_script: String,
    pub update_script: String,
    pub rollback_script: String,
    pub uninstall_script: String,

    #[serde(default)]
    pub timeouts: ScriptTimeouts,
}

/// Container deploy configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContainerDeployConfig {
    pub image: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub registry: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub registry_user: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub registry_pass: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image_pull_policy: String,

    pub container_name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<PortMapping>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<VolumeMount>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub environment: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub networks: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub restart_policy: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entrypoint: Vec<String>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub memory_limit: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cpu_limit: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check: Option<ContainerHealthCheck>,

    /// Seconds allowed for the old container to stop
    #[serde(default)]
    pub stop_timeout: i64,
    #[serde(default)]
    pub remove_old: bool,
    #[serde(default)]
    pub pull_before_stop: bool,
}

/// Kubernetes deploy configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KubernetesDeployConfig {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub container_name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub yaml: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub yaml_template: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub registry: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub registry_user: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub registry_pass: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image_pull_policy: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image_pull_secret: String,

    #[serde(default)]
    pub replicas: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub update_strategy: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub max_unavailable: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub max_surge: String,
    #[serde(default)]
    pub min_ready_seconds: i64,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cpu_request: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cpu_limit: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub memory_request: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub memory_limit: String,

    #[serde(rename = "kubeconfig", default, skip_serializing_if = "String::is_empty")]
    pub kube_config: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kube_context: String,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub environment: HashMap<String, String>,

    /// Seconds allowed for the deploy step
    #[serde(default)]
    pub deploy_timeout: i64,
    /// Seconds allowed for the rollout to converge
    #[serde(default)]
    pub rollout_timeout: i64,
}

/// Git-pull deploy configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GitPullDeployConfig {
    pub repo_url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub branch: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tag: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub commit: String,
    #[serde(default)]
    pub depth: i64,
    #[serde(default)]
    pub submodules: bool,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub auth_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ssh_key: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub token: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub username: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub password: String,

    pub work_dir: String,
    #[serde(default)]
    pub clean_before: bool,
    #[serde(default)]
    pub backup_before: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub backup_dir: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub pre_script: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub post_script: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub environment: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub interpreter: String,

    #[serde(default)]
    pub clone_timeout: i64,
    #[serde(default)]
    pub script_timeout: i64,
}

/// A deployable project
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(rename = "type")]
    pub deploy_type: DeployType,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub repo_url: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub script_config: Option<ScriptDeployConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_config: Option<ContainerDeployConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kubernetes_config: Option<KubernetesDeployConfig>,
    #[serde(rename = "gitpull_config", skip_serializing_if = "Option::is_none")]
    pub gitpull_config: Option<GitPullDeployConfig>,

    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// A deployment environment within a project
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Environment {
    pub id: String,
    pub project_id: String,
    /// dev / test / staging / prod
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    #[serde(default)]
    pub require_approval: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub approvers: Vec<String>,

    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// Per-target settings carried into variable resolution and dispatch
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetConfig {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub work_dir: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    #[serde(rename = "kubeconfig", default, skip_serializing_if = "String::is_empty")]
    pub kube_config: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kube_context: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user: String,
}

/// A deployment target: one remote agent within an environment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    pub id: String,
    pub environment_id: String,
    /// Stable identifier of the agent connection addressed on the wire
    pub client_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub config: TargetConfig,
    /// Dispatch ordering hint; lower values deploy first
    #[serde(default)]
    pub priority: i32,

    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// A release pipeline definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: String,
    pub project_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default)]
    pub is_default: bool,

    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// Approval record status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
}

/// Approval gate attached to a release in an approval-requiring environment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Approval {
    pub id: String,
    pub release_id: String,
    pub status: ApprovalStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub approvers: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved_by: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub comment: String,

    pub expire_at: chrono::DateTime<chrono::Utc>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}
