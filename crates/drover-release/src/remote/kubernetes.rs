//! Kubernetes deploy path

use super::{command_error_message, dispatch_budget, wait_budget, RemoteExecutor};
use crate::error::Result;
use chrono::Utc;
use drover_types::wire::{K8sDeployParams, K8sDeployResult};
use drover_types::{CommandStatus, KubernetesDeployConfig, OperationType, CMD_K8S_DEPLOY};
use std::collections::HashMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// One Kubernetes deployment on one target
pub struct K8sDeployRequest<'a> {
    pub release_id: &'a str,
    pub target_id: &'a str,
    pub client_id: &'a str,
    pub operation: OperationType,
    pub version: &'a str,
    pub config: &'a KubernetesDeployConfig,
    /// Image reference, variables already resolved
    pub image: String,
    /// Manifest, variables already resolved
    pub yaml: String,
    /// Environment, variables already resolved
    pub environment: HashMap<String, String>,
    /// Revision to roll back to; 0 means the previous one
    pub to_revision: i64,
}

/// Interpreted outcome of a Kubernetes deployment
#[derive(Debug, Clone)]
pub struct K8sOutcome {
    pub success: bool,
    pub namespace: String,
    pub resource_type: String,
    pub resource_name: String,
    pub image: String,
    pub replicas: i64,
    pub ready_replicas: i64,
    pub revision: i64,
    pub rollout_status: String,
    pub output: String,
    pub error: String,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub finished_at: chrono::DateTime<chrono::Utc>,
    pub duration: Duration,
}

impl RemoteExecutor {
    /// Apply a Kubernetes deployment remotely and wait for its outcome
    #[instrument(skip(self, req, cancel), fields(release_id = %req.release_id, target_id = %req.target_id))]
    pub async fn execute_k8s_deploy(
        &self,
        req: &K8sDeployRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<K8sOutcome> {
        let started_at = Utc::now();
        let config = req.config;

        let environment = if !req.environment.is_empty() {
            req.environment.clone()
        } else {
            config.environment.clone()
        };

        let params = K8sDeployParams {
            release_id: req.release_id.to_string(),
            target_id: req.target_id.to_string(),
            operation: req.operation,
            version: req.version.to_string(),
            image: req.image.clone(),
            yaml: req.yaml.clone(),
            yaml_template: config.yaml_template.clone(),
            namespace: config.namespace.clone(),
            resource_type: config.resource_type.clone(),
            resource_name: config.resource_name.clone(),
            container_name: config.container_name.clone(),
            registry: config.registry.clone(),
            registry_user: config.registry_user.clone(),
            registry_pass: config.registry_pass.clone(),
            image_pull_policy: config.image_pull_policy.clone(),
            image_pull_secret: config.image_pull_secret.clone(),
            replicas: config.replicas,
            update_strategy: config.update_strategy.clone(),
            max_unavailable: config.max_unavailable.clone(),
            max_surge: config.max_surge.clone(),
            min_ready_seconds: config.min_ready_seconds,
            cpu_request: config.cpu_request.clone(),
            cpu_limit: config.cpu_limit.clone(),
            memory_request: config.memory_request.clone(),
            memory_limit: config.memory_limit.clone(),
            kube_config: config.kube_config.clone(),
            kube_context: config.kube_context.clone(),
            environment,
            timeout: config.deploy_timeout,
            rollout_timeout: config.rollout_timeout,
            to_revision: req.to_revision,
        };

        // The larger of deploy and rollout budgets, else ten minutes
        let mut timeout = if config.deploy_timeout > 0 {
            config.deploy_timeout as u64
        } else {
            600
        };
        if config.rollout_timeout > 0 && config.rollout_timeout as u64 > timeout {
            timeout = config.rollout_timeout as u64;
        }

        let command = self
            .sender
            .send_command(
                req.client_id,
                CMD_K8S_DEPLOY,
                serde_json::to_value(&params)?,
                dispatch_budget(timeout),
            )
            .await?;

        let final_cmd = self
            .wait_for_completion(&command.id, wait_budget(timeout), cancel)
            .await?;

        let finished_at = Utc::now();
        let duration = (finished_at - started_at).to_std().unwrap_or_default();

        if final_cmd.status == CommandStatus::Completed {
            let deploy: K8sDeployResult =
                serde_json::from_value(final_cmd.result.unwrap_or_default())?;
            Ok(K8sOutcome {
                success: deploy.success,
                namespace: deploy.namespace,
                resource_type: deploy.resource_type,
                resource_name: deploy.resource_name,
                image: deploy.image,
                replicas: deploy.replicas,
                ready_replicas: deploy.ready_replicas,
                revision: deploy.revision,
                rollout_status: deploy.rollout_status,
                output: deploy.output,
                error: deploy.error,
                started_at,
                finished_at,
                duration,
            })
        } else {
            Ok(K8sOutcome {
                success: false,
                namespace: config.namespace.clone(),
                resource_type: config.resource_type.clone(),
                resource_name: config.resource_name.clone(),
                image: req.image.clone(),
                replicas: 0,
                ready_replicas: 0,
                revision: 0,
                rollout_status: String::new(),
                output: String::new(),
                error: command_error_message(&final_cmd),
                started_at,
                finished_at,
                duration,
            })
        }
    }
}
