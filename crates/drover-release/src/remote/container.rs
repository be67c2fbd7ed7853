//! Container deploy path

use super::{command_error_message, dispatch_budget, wait_budget, RemoteExecutor};
use crate::error::Result;
use chrono::Utc;
use drover_types::wire::{ContainerDeployParams, ContainerDeployResult};
use drover_types::{CommandStatus, ContainerDeployConfig, OperationType, CMD_CONTAINER_DEPLOY};
use std::collections::HashMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// One container deployment on one target
pub struct ContainerDeployRequest<'a> {
    pub release_id: &'a str,
    pub target_id: &'a str,
    pub client_id: &'a str,
    pub operation: OperationType,
    pub version: &'a str,
    pub config: &'a ContainerDeployConfig,
    /// Image reference, variables already resolved
    pub image: String,
    /// Container name, variables already resolved
    pub container_name: String,
    /// Environment, variables already resolved
    pub environment: HashMap<String, String>,
}

/// Interpreted outcome of a container deployment
#[derive(Debug, Clone)]
pub struct ContainerOutcome {
    pub success: bool,
    pub container_id: String,
    pub container_name: String,
    pub image_pulled: bool,
    pub old_removed: bool,
    pub output: String,
    pub error: String,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub finished_at: chrono::DateTime<chrono::Utc>,
    pub duration: Duration,
}

impl RemoteExecutor {
    /// Deploy a container remotely and wait for its outcome
    #[instrument(skip(self, req, cancel), fields(release_id = %req.release_id, target_id = %req.target_id))]
    pub async fn execute_container_deploy(
        &self,
        req: &ContainerDeployRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<ContainerOutcome> {
        let started_at = Utc::now();
        let config = req.config;

        let params = ContainerDeployParams {
            release_id: req.release_id.to_string(),
            target_id: req.target_id.to_string(),
            operation: req.operation,
            version: req.version.to_string(),
            image: req.image.clone(),
            registry: config.registry.clone(),
            registry_user: config.registry_user.clone(),
            registry_pass: config.registry_pass.clone(),
            image_pull_policy: config.image_pull_policy.clone(),
            container_name: req.container_name.clone(),
            ports: config.ports.clone(),
            volumes: config.volumes.clone(),
            environment: req.environment.clone(),
            networks: config.networks.clone(),
            restart_policy: config.restart_policy.clone(),
            command: config.command.clone(),
            entrypoint: config.entrypoint.clone(),
            memory_limit: config.memory_limit.clone(),
            cpu_limit: config.cpu_limit.clone(),
            health_check: config.health_check.clone(),
            stop_timeout: config.stop_timeout,
            remove_old: config.remove_old,
            pull_before_stop: config.pull_before_stop,
            timeout: 0,
        };

        // Stop budget plus room for pull/create, else ten minutes
        let timeout = if config.stop_timeout > 0 {
            config.stop_timeout as u64 + 300
        } else {
            600
        };

        let command = self
            .sender
            .send_command(
                req.client_id,
                CMD_CONTAINER_DEPLOY,
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
            let deploy: ContainerDeployResult =
                serde_json::from_value(final_cmd.result.unwrap_or_default())?;
            Ok(ContainerOutcome {
                success: deploy.success,
                container_id: deploy.container_id,
                container_name: deploy.container_name,
                image_pulled: deploy.image_pulled,
                old_removed: deploy.old_removed,
                output: deploy.output,
                error: deploy.error,
                started_at,
                finished_at,
                duration,
            })
        } else {
            Ok(ContainerOutcome {
                success: false,
                container_id: String::new(),
                container_name: req.container_name.clone(),
                image_pulled: false,
                old_removed: false,
                output: String::new(),
                error: command_error_message(&final_cmd),
                started_at,
                finished_at,
                duration,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::FakeSender;
    use super::*;
    use crate::vars::VariableResolver;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn copies_config_into_wire_params() {
        let sender = Arc::new(FakeSender::new());
        sender.reply(
            CMD_CONTAINER_DEPLOY,
            CommandStatus::Completed,
            json!({
                "success": true, "release_id": "r1", "target_id": "t1",
                "operation": "update", "container_id": "abc123",
                "container_name": "web", "image_pulled": true, "old_removed": true,
                "started_at": "", "finished_at": "", "duration_ms": 1500
            }),
            None,
        );
        let exec = RemoteExecutor::new(sender.clone(), VariableResolver::new());

        let config = ContainerDeployConfig {
            image: "registry.local/web:${RELEASE_VERSION}".to_string(),
            container_name: "web".to_string(),
            restart_policy: "always".to_string(),
            stop_timeout: 60,
            remove_old: true,
            ..Default::default()
        };

        let outcome = exec
            .execute_container_deploy(
                &ContainerDeployRequest {
                    release_id: "r1",
                    target_id: "t1",
                    client_id: "c1",
                    operation: OperationType::Update,
                    version: "2.0.0",
                    config: &config,
                    image: "registry.local/web:2.0.0".to_string(),
                    container_name: "web".to_string(),
                    environment: HashMap::new(),
                },
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.container_id, "abc123");
        assert!(outcome.image_pulled);

        let sent = sender.sent.lock().unwrap();
        let (_, _, payload, dispatch_timeout) = &sent[0];
        assert_eq!(payload["image"], "registry.local/web:2.0.0");
        assert_eq!(payload["restart_policy"], "always");
        assert_eq!(payload["remove_old"], true);
        // stop_timeout 60 -> operation 360s -> dispatch 390s
        assert_eq!(*dispatch_timeout, Duration::from_secs(390));
    }

    #[tokio::test]
    async fn timeout_status_reports_synthesized_error() {
        let sender = Arc::new(FakeSender::new());
        sender.reply(CMD_CONTAINER_DEPLOY, CommandStatus::Cancelled, json!(null), None);
        let exec = RemoteExecutor::new(sender, VariableResolver::new());

        let config = ContainerDeployConfig {
            image: "img".to_string(),
            container_name: "web".to_string(),
            ..Default::default()
        };
        let outcome = exec
            .execute_container_deploy(
                &ContainerDeployRequest {
                    release_id: "r1",
                    target_id: "t1",
                    client_id: "c1",
                    operation: OperationType::Install,
                    version: "1.0.0",
                    config: &config,
                    image: "img".to_string(),
                    container_name: "web".to_string(),
                    environment: HashMap::new(),
                },
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(!outcome.success);
        assert_eq!(outcome.error, "command status: cancelled");
    }
}
