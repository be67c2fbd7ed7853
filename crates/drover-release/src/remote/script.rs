//! Script deploy path
//!
//! Sends `release.execute` with the operation's script, variables already
//! resolved, and interprets the typed result.

use super::{
    command_error_message, dispatch_budget, script_operation_timeout, wait_budget, RemoteExecutor,
};
use crate::error::{ReleaseError, Result};
use crate::vars::VariableContext;
use chrono::Utc;
use drover_types::wire::{ReleaseExecuteParams, ReleaseExecuteResult};
use drover_types::{CommandStatus, OperationType, ScriptDeployConfig, CMD_RELEASE_EXECUTE};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// One script deployment on one target
pub struct ScriptExecuteRequest<'a> {
    pub release_id: &'a str,
    pub target_id: &'a str,
    /// Agent connection to address on the wire
    pub client_id: &'a str,
    pub operation: OperationType,
    pub version: &'a str,
    pub config: &'a ScriptDeployConfig,
    pub vars: &'a VariableContext,
    /// Overrides the per-operation timeout when set (seconds)
    pub timeout_override: Option<u64>,
}

/// Interpreted outcome of a script deployment
#[derive(Debug, Clone)]
pub struct ScriptOutcome {
    pub success: bool,
    pub exit_code: i32,
    pub output: String,
    pub error: String,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub finished_at: chrono::DateTime<chrono::Utc>,
    pub duration: Duration,
}

impl RemoteExecutor {
    /// Execute a script deployment remotely and wait for its outcome
    #[instrument(skip(self, req, cancel), fields(release_id = %req.release_id, target_id = %req.target_id, operation = %req.operation))]
    pub async fn execute_script_deploy(
        &self,
        req: &ScriptExecuteRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<ScriptOutcome> {
        let started_at = Utc::now();

        let script = select_script(req.operation, req.config)?;
        let resolved_script = self.resolver.resolve(script, req.vars);
        let work_dir = self.resolver.resolve(&req.config.work_dir, req.vars);
        let environment = self.resolver.resolve_map(&req.config.environment, req.vars);

        let timeout = req
            .timeout_override
            .unwrap_or_else(|| script_operation_timeout(req.operation, Some(req.config)));

        let params = ReleaseExecuteParams {
            release_id: req.release_id.to_string(),
            target_id: req.target_id.to_string(),
            operation: req.operation,
            version: req.version.to_string(),
            script: resolved_script,
            work_dir,
            environment,
            timeout: timeout as i64,
            interpreter: req.config.interpreter.clone(),
        };

        let command = self
            .sender
            .send_command(
                req.client_id,
                CMD_RELEASE_EXECUTE,
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
            let exec: ReleaseExecuteResult =
                serde_json::from_value(final_cmd.result.unwrap_or_default())?;
            Ok(ScriptOutcome {
                success: exec.success,
                exit_code: exec.exit_code,
                output: exec.output,
                error: exec.error,
                started_at,
                finished_at,
                duration,
            })
        } else {
            Ok(ScriptOutcome {
                success: false,
                exit_code: -1,
                output: String::new(),
                error: command_error_message(&final_cmd),
                started_at,
                finished_at,
                duration,
            })
        }
    }

    /// Run an ad-hoc script on one agent, outside any release
    pub async fn execute_script(
        &self,
        client_id: &str,
        script: &str,
        work_dir: &str,
        cancel: &CancellationToken,
    ) -> Result<ScriptOutcome> {
        let started_at = Utc::now();
        let timeout = 300u64;

        let params = ReleaseExecuteParams {
            operation: OperationType::Deploy,
            script: script.to_string(),
            work_dir: work_dir.to_string(),
            interpreter: "/bin/bash".to_string(),
            timeout: timeout as i64,
            ..Default::default()
        };

        let command = self
            .sender
            .send_command(
                client_id,
                CMD_RELEASE_EXECUTE,
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
            let exec: ReleaseExecuteResult =
                serde_json::from_value(final_cmd.result.unwrap_or_default())?;
            Ok(ScriptOutcome {
                success: exec.success,
                exit_code: exec.exit_code,
                output: exec.output,
                error: exec.error,
                started_at,
                finished_at,
                duration,
            })
        } else {
            Ok(ScriptOutcome {
                success: false,
                exit_code: -1,
                output: String::new(),
                error: command_error_message(&final_cmd),
                started_at,
                finished_at,
                duration,
            })
        }
    }
}

/// Pick the operation's script; an empty script is a configuration error
fn select_script(operation: OperationType, config: &ScriptDeployConfig) -> Result<&str> {
    let (script, label) = match operation {
        OperationType::Install => (&config.install_script, "install"),
        OperationType::Update | OperationType::Deploy => (&config.update_script, "update"),
        OperationType::Rollback => (&config.rollback_script, "rollback"),
        OperationType::Uninstall => (&config.uninstall_script, "uninstall"),
    };
    if script.is_empty() {
        return Err(ReleaseError::Validation(format!("{label} script is empty")));
    }
    Ok(script)
}

#[cfg(test)]
mod tests {
    use super::super::tests::FakeSender;
    use super::*;
    use crate::vars::VariableResolver;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn config() -> ScriptDeployConfig {
        ScriptDeployConfig {
            work_dir: "/opt/${RELEASE_VERSION}".to_string(),
            install_script: "install.sh ${RELEASE_VERSION}".to_string(),
            update_script: "update.sh".to_string(),
            rollback_script: "rollback.sh".to_string(),
            uninstall_script: String::new(),
            environment: HashMap::from([(
                "VERSION".to_string(),
                "${RELEASE_VERSION}".to_string(),
            )]),
            ..Default::default()
        }
    }

    fn vars() -> VariableContext {
        VariableContext {
            release_version: "2.0.0".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn resolves_variables_and_nests_timeouts() {
        let sender = Arc::new(FakeSender::new());
        sender.reply(
            CMD_RELEASE_EXECUTE,
            CommandStatus::Completed,
            json!({
                "success": true, "release_id": "r1", "target_id": "t1",
                "operation": "install", "exit_code": 0, "output": "ok",
                "started_at": "", "finished_at": "", "duration_ms": 10
            }),
            None,
        );
        let exec = RemoteExecutor::new(sender.clone(), VariableResolver::new());

        let cfg = config();
        let outcome = exec
            .execute_script_deploy(
                &ScriptExecuteRequest {
                    release_id: "r1",
                    target_id: "t1",
                    client_id: "c1",
                    operation: OperationType::Install,
                    version: "2.0.0",
                    config: &cfg,
                    vars: &vars(),
                    timeout_override: None,
                },
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.exit_code, 0);

        let sent = sender.sent.lock().unwrap();
        let (_, _, payload, dispatch_timeout) = &sent[0];
        assert_eq!(payload["script"], "install.sh 2.0.0");
        assert_eq!(payload["work_dir"], "/opt/2.0.0");
        assert_eq!(payload["environment"]["VERSION"], "2.0.0");
        // install default 600s, dispatch adds 30s slack
        assert_eq!(payload["timeout"], 600);
        assert_eq!(*dispatch_timeout, Duration::from_secs(630));
    }

    #[tokio::test]
    async fn non_completed_status_synthesizes_an_error() {
        let sender = Arc::new(FakeSender::new());
        sender.reply(CMD_RELEASE_EXECUTE, CommandStatus::Timeout, json!(null), None);
        let exec = RemoteExecutor::new(sender, VariableResolver::new());

        let cfg = config();
        let outcome = exec
            .execute_script_deploy(
                &ScriptExecuteRequest {
                    release_id: "r1",
                    target_id: "t1",
                    client_id: "c1",
                    operation: OperationType::Update,
                    version: "2.0.0",
                    config: &cfg,
                    vars: &vars(),
                    timeout_override: None,
                },
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(!outcome.success);
        assert_eq!(outcome.exit_code, -1);
        assert_eq!(outcome.error, "command status: timeout");
    }

    #[tokio::test]
    async fn agent_reported_failure_keeps_its_message() {
        let sender = Arc::new(FakeSender::new());
        sender.reply(
            CMD_RELEASE_EXECUTE,
            CommandStatus::Failed,
            json!(null),
            Some("disk full"),
        );
        let exec = RemoteExecutor::new(sender, VariableResolver::new());

        let cfg = config();
        let outcome = exec
            .execute_script_deploy(
                &ScriptExecuteRequest {
                    release_id: "r1",
                    target_id: "t1",
                    client_id: "c1",
                    operation: OperationType::Rollback,
                    version: "2.0.0",
                    config: &cfg,
                    vars: &vars(),
                    timeout_override: None,
                },
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(!outcome.success);
        assert_eq!(outcome.error, "disk full");
    }

    #[tokio::test]
    async fn missing_script_is_a_validation_error() {
        let exec = RemoteExecutor::new(Arc::new(FakeSender::new()), VariableResolver::new());
        let cfg = config();
        let err = exec
            .execute_script_deploy(
                &ScriptExecuteRequest {
                    release_id: "r1",
                    target_id: "t1",
                    client_id: "c1",
                    operation: OperationType::Uninstall,
                    version: "2.0.0",
                    config: &cfg,
                    vars: &vars(),
                    timeout_override: None,
                },
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ReleaseError::Validation(_)));
        assert!(err.to_string().contains("uninstall script is empty"));
    }
}
