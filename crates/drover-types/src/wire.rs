//! Wire payload/result records
//!
//! These are the JSON bodies exchanged with remote agents, one typed
//! request/result pair per deploy type. The field names are part of the
//! cross-version compatibility surface between server and agent and must not
//! change; optional fields are omitted when empty, matching what agents in
//! the field already parse.

use crate::release::OperationType;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

fn is_zero_i64(n: &i64) -> bool {
    *n == 0
}

fn is_false(b: &bool) -> bool {
    !*b
}

// --- release.execute ---

/// Parameters of a `release.execute` command (script deploy)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReleaseExecuteParams {
    pub release_id: String,
    pub target_id: String,
    pub operation: OperationType,
    pub version: String,
    /// Script content, variables already resolved
    pub script: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub work_dir: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub environment: HashMap<String, String>,
    /// Timeout in seconds
    #[serde(default, skip_serializing_if = "is_zero_i64")]
    pub timeout: i64,
    /// Script interpreter, defaults to /bin/bash on the agent
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub interpreter: String,
}

/// Result of a `release.execute` command
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReleaseExecuteResult {
    pub success: bool,
    pub release_id: String,
    pub target_id: String,
    pub operation: String,
    pub exit_code: i32,
    pub output: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
    pub started_at: String,
    pub finished_at: String,
    #[serde(rename = "duration_ms")]
    pub duration: i64,
}

// --- release.check ---

/// Parameters of a `release.check` command
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReleaseCheckParams {
    pub work_dir: String,
}

/// Result of a `release.check` command
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReleaseCheckResult {
    pub installed: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub install_path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub installed_at: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_updated_at: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

// --- container.deploy ---

/// Host/container port mapping
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortMapping {
    pub host_port: i64,
    pub container_port: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub protocol: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub host_ip: String,
}

/// Host/container volume mount
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VolumeMount {
    pub host_path: String,
    pub container_path: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub read_only: bool,
}

/// Container health check definition
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContainerHealthCheck {
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "is_zero_i64")]
    pub interval: i64,
    #[serde(default, skip_serializing_if = "is_zero_i64")]
    pub timeout: i64,
    #[serde(default, skip_serializing_if = "is_zero_i64")]
    pub retries: i64,
    #[serde(default, skip_serializing_if = "is_zero_i64")]
    pub start_period: i64,
}

/// Parameters of a `container.deploy` command
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContainerDeployParams {
    pub release_id: String,
    pub target_id: String,
    pub operation: OperationType,
    pub version: String,

    // Image
    pub image: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub registry: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub registry_user: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub registry_pass: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image_pull_policy: String,

    // Container
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

    // Resource limits
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub memory_limit: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cpu_limit: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check: Option<ContainerHealthCheck>,

    // Deploy options
    #[serde(default, skip_serializing_if = "is_zero_i64")]
    pub stop_timeout: i64,
    #[serde(default, skip_serializing_if = "is_false")]
    pub remove_old: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub pull_before_stop: bool,
    #[serde(default, skip_serializing_if = "is_zero_i64")]
    pub timeout: i64,
}

/// Result of a `container.deploy` command
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContainerDeployResult {
    pub success: bool,
    pub release_id: String,
    pub target_id: String,
    pub operation: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub container_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub container_name: String,
    pub image_pulled: bool,
    pub old_removed: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub output: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
    pub started_at: String,
    pub finished_at: String,
    #[serde(rename = "duration_ms")]
    pub duration: i64,
}

// --- k8s.deploy ---

/// Parameters of a `k8s.deploy` command
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct K8sDeployParams {
    pub release_id: String,
    pub target_id: String,
    pub operation: OperationType,
    pub version: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub yaml: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub yaml_template: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub container_name: String,

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

    #[serde(default, skip_serializing_if = "is_zero_i64")]
    pub replicas: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub update_strategy: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub max_unavailable: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub max_surge: String,
    #[serde(default, skip_serializing_if = "is_zero_i64")]
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

    #[serde(default, skip_serializing_if = "is_zero_i64")]
    pub timeout: i64,
    #[serde(default, skip_serializing_if = "is_zero_i64")]
    pub rollout_timeout: i64,
    /// Revision to roll back to; 0 means the previous one
    #[serde(default, skip_serializing_if = "is_zero_i64")]
    pub to_revision: i64,
}

/// Result of a `k8s.deploy` command
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct K8sDeployResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image: String,
    pub replicas: i64,
    pub ready_replicas: i64,
    pub revision: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub rollout_status: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub output: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
    pub started_at: String,
    pub finished_at: String,
    #[serde(rename = "duration_ms")]
    pub duration: i64,
}

// --- gitpull.deploy ---

/// Parameters of a `gitpull.deploy` command
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GitPullDeployParams {
    pub release_id: String,
    pub target_id: String,
    pub operation: OperationType,
    pub version: String,

    // Repository
    pub repo_url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub branch: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tag: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub commit: String,
    #[serde(default, skip_serializing_if = "is_zero_i64")]
    pub depth: i64,
    #[serde(default, skip_serializing_if = "is_false")]
    pub submodules: bool,

    // Authentication: none, ssh, token, basic
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

    // Deployment
    pub work_dir: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub clean_before: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub backup_before: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub backup_dir: String,

    // Scripts
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub pre_script: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub post_script: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub environment: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub interpreter: String,

    // Timeouts (seconds)
    #[serde(default, skip_serializing_if = "is_zero_i64")]
    pub clone_timeout: i64,
    #[serde(default, skip_serializing_if = "is_zero_i64")]
    pub script_timeout: i64,
    #[serde(default, skip_serializing_if = "is_zero_i64")]
    pub timeout: i64,
}

/// Result of a `gitpull.deploy` command
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GitPullDeployResult {
    pub success: bool,
    pub release_id: String,
    pub target_id: String,
    pub operation: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub git_output: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub script_output: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub commit: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub branch: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub backup_path: String,
    pub cleaned_before: bool,
    pub backed_up_before: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
    pub started_at: String,
    pub finished_at: String,
    #[serde(rename = "duration_ms")]
    pub duration: i64,
}

// --- git.versions ---

/// Parameters of a `git.versions` command
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GitVersionsParams {
    pub repo_url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub work_dir: String,

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

    #[serde(default, skip_serializing_if = "is_zero_i64")]
    pub max_tags: i64,
    #[serde(default, skip_serializing_if = "is_zero_i64")]
    pub max_commits: i64,
    #[serde(default, skip_serializing_if = "is_false")]
    pub include_branches: bool,
}

/// A Git tag known to the agent
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GitTag {
    pub name: String,
    pub commit: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub created_at: String,
}

/// A Git branch known to the agent
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GitBranch {
    pub name: String,
    pub commit: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_default: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_remote: bool,
}

/// A Git commit known to the agent
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GitCommit {
    pub hash: String,
    pub full_hash: String,
    pub author: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub email: String,
    pub message: String,
    pub created_at: String,
}

/// Result of a `git.versions` command
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GitVersionsResult {
    pub success: bool,
    pub repo_url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub default_branch: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<GitTag>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub branches: Vec<GitBranch>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recent_commits: Vec<GitCommit>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub current_commit: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub current_branch: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execute_params_field_names_are_stable() {
        let params = ReleaseExecuteParams {
            release_id: "r1".into(),
            target_id: "t1".into(),
            operation: OperationType::Install,
            version: "1.2.0".into(),
            script: "echo hi".into(),
            work_dir: "/opt/app".into(),
            timeout: 600,
            ..Default::default()
        };
        let json = serde_json::to_value(&params).unwrap();
        assert_eq!(json["release_id"], "r1");
        assert_eq!(json["operation"], "install");
        assert_eq!(json["work_dir"], "/opt/app");
        assert_eq!(json["timeout"], 600);
        // empty optionals are omitted
        assert!(json.get("interpreter").is_none());
        assert!(json.get("environment").is_none());
    }

    #[test]
    fn execute_result_decodes_agent_payload() {
        let raw = serde_json::json!({
            "success": true,
            "release_id": "r1",
            "target_id": "t1",
            "operation": "update",
            "exit_code": 0,
            "output": "done",
            "started_at": "2024-05-01T10:00:00Z",
            "finished_at": "2024-05-01T10:00:02Z",
            "duration_ms": 2000
        });
        let result: ReleaseExecuteResult = serde_json::from_value(raw).unwrap();
        assert!(result.success);
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.duration, 2000);
        assert!(result.error.is_empty());
    }

    #[test]
    fn k8s_params_use_kubeconfig_name() {
        let params = K8sDeployParams {
            kube_config: "/root/.kube/config".into(),
            ..Default::default()
        };
        let json = serde_json::to_value(&params).unwrap();
        assert_eq!(json["kubeconfig"], "/root/.kube/config");
        assert!(json.get("kube_config").is_none());
    }
}
