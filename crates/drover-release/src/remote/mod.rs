//! Remote operation translator
//!
//! Bridges a typed deployment intent to the wire and back, one path per
//! deploy type. The command layer is consumed only through the narrow
//! [`CommandSender`] contract: dispatch and lookup, nothing else.
//!
//! Timeout composition is deliberate and nested: the operation timeout is
//! what the agent gets, dispatch is granted 30 extra seconds of network
//! slack, and the local completion wait allows 60 more, so polling never
//! gives up before the remote side's own deadline could plausibly fire.

mod container;
mod gitpull;
mod kubernetes;
mod script;

pub use container::{ContainerDeployRequest, ContainerOutcome};
pub use gitpull::{GitPullDeployRequest, GitPullOutcome, GitVersionsRequest};
pub use kubernetes::{K8sDeployRequest, K8sOutcome};
pub use script::{ScriptExecuteRequest, ScriptOutcome};

use crate::error::{ReleaseError, Result};
use crate::vars::{VariableContext, VariableResolver};
use async_trait::async_trait;
use drover_command::CommandTracker;
use drover_types::wire::{ReleaseCheckParams, ReleaseCheckResult};
use drover_types::{Command, CommandId, OperationType, ScriptDeployConfig, CMD_RELEASE_CHECK};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Extra seconds granted to the transport on top of the operation timeout
const DISPATCH_SLACK: u64 = 30;
/// Extra seconds the local completion wait allows beyond the dispatch budget
const WAIT_SLACK: u64 = 60;
/// Completion polling tick
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Narrow contract over the command tracker
#[async_trait]
pub trait CommandSender: Send + Sync {
    /// Dispatch a command; returns once the transport accepted it
    async fn send_command(
        &self,
        target_id: &str,
        command_type: &str,
        payload: serde_json::Value,
        timeout: Duration,
    ) -> drover_command::Result<Command>;

    /// Look up a command's current state
    async fn get_command(&self, id: &CommandId) -> drover_command::Result<Command>;
}

#[async_trait]
impl CommandSender for CommandTracker {
    async fn send_command(
        &self,
        target_id: &str,
        command_type: &str,
        payload: serde_json::Value,
        timeout: Duration,
    ) -> drover_command::Result<Command> {
        CommandTracker::send_command(self, target_id, command_type, payload, timeout).await
    }

    async fn get_command(&self, id: &CommandId) -> drover_command::Result<Command> {
        CommandTracker::get_command(self, id)
    }
}

/// Drives deployment operations on remote agents
pub struct RemoteExecutor {
    pub(crate) sender: Arc<dyn CommandSender>,
    pub(crate) resolver: VariableResolver,
}

impl RemoteExecutor {
    pub fn new(sender: Arc<dyn CommandSender>, resolver: VariableResolver) -> Self {
        Self { sender, resolver }
    }

    /// Resolve the generic "deploy" intent into install or update
    ///
    /// Explicit operations pass through unchanged. "deploy" first asks the
    /// agent whether the application is installed under the configured work
    /// directory, making deploy idempotent for first-run and repeat-run
    /// targets alike.
    pub async fn determine_operation(
        &self,
        client_id: &str,
        config: Option<&ScriptDeployConfig>,
        vars: &VariableContext,
        requested: OperationType,
        cancel: &CancellationToken,
    ) -> Result<OperationType> {
        if requested != OperationType::Deploy {
            return Ok(requested);
        }

        let work_dir = match config {
            Some(config) if !config.work_dir.is_empty() => config.work_dir.as_str(),
            _ => return Ok(OperationType::Install),
        };

        let (installed, version) = self
            .check_installation(client_id, work_dir, vars, cancel)
            .await?;

        debug!(
            client_id = %client_id,
            installed = installed,
            current_version = %version,
            "Installation check resolved deploy operation"
        );

        if installed {
            Ok(OperationType::Update)
        } else {
            Ok(OperationType::Install)
        }
    }

    /// Ask the agent whether the application is installed
    pub async fn check_installation(
        &self,
        client_id: &str,
        work_dir: &str,
        vars: &VariableContext,
        cancel: &CancellationToken,
    ) -> Result<(bool, String)> {
        let params = ReleaseCheckParams {
            work_dir: self.resolver.resolve(work_dir, vars),
        };

        let command = self
            .sender
            .send_command(
                client_id,
                CMD_RELEASE_CHECK,
                serde_json::to_value(&params)?,
                Duration::from_secs(30),
            )
            .await?;

        let final_cmd = self
            .wait_for_completion(&command.id, Duration::from_secs(60), cancel)
            .await?;

        if final_cmd.status != drover_types::CommandStatus::Completed {
            return Err(ReleaseError::RemoteExecution(format!(
                "check command failed: {}",
                command_error_message(&final_cmd)
            )));
        }

        let check: ReleaseCheckResult =
            serde_json::from_value(final_cmd.result.unwrap_or_default())?;
        Ok((check.installed, check.version))
    }

    /// Poll the command registry until a terminal status or the deadline
    ///
    /// Raced against `cancel`; the release's token reaches every blocking
    /// wait in this crate.
    pub(crate) async fn wait_for_completion(
        &self,
        id: &CommandId,
        budget: Duration,
        cancel: &CancellationToken,
    ) -> Result<Command> {
        let deadline = tokio::time::Instant::now() + budget;
        let mut tick = tokio::time::interval(POLL_INTERVAL);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tick.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Err(ReleaseError::Cancelled),
                _ = tick.tick() => {
                    let command = self.sender.get_command(id).await?;
                    if command.status.is_terminal() {
                        return Ok(command);
                    }
                    if tokio::time::Instant::now() >= deadline {
                        return Err(ReleaseError::Timeout(format!(
                            "command {id} produced no terminal status within {}s",
                            budget.as_secs()
                        )));
                    }
                }
            }
        }
    }
}

/// Timeout for a script operation: explicit override beats the per-operation
/// default (install 600s, update 300s, rollback 180s, uninstall 120s)
pub(crate) fn script_operation_timeout(
    operation: OperationType,
    config: Option<&ScriptDeployConfig>,
) -> u64 {
    let timeouts = config.map(|c| c.timeouts).unwrap_or_default();
    match operation {
        OperationType::Install => {
            if timeouts.install > 0 {
                timeouts.install
            } else {
                600
            }
        }
        OperationType::Update | OperationType::Deploy => {
            if timeouts.update > 0 {
                timeouts.update
            } else {
                300
            }
        }
        OperationType::Rollback => {
            if timeouts.rollback > 0 {
                timeouts.rollback
            } else {
                180
            }
        }
        OperationType::Uninstall => {
            if timeouts.uninstall > 0 {
                timeouts.uninstall
            } else {
                120
            }
        }
    }
}

/// Dispatch budget: operation timeout plus network slack
pub(crate) fn dispatch_budget(operation_timeout: u64) -> Duration {
    Duration::from_secs(operation_timeout + DISPATCH_SLACK)
}

/// Local wait budget: strictly beyond the dispatch budget
pub(crate) fn wait_budget(operation_timeout: u64) -> Duration {
    Duration::from_secs(operation_timeout + WAIT_SLACK)
}

/// The command's error, or a synthesized message when it carried none
pub(crate) fn command_error_message(command: &Command) -> String {
    match &command.error {
        Some(error) if !error.is_empty() => error.clone(),
        _ => format!("command status: {}", command.status),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::Utc;
    use dashmap::DashMap;
    use drover_types::CommandStatus;
    use serde_json::{json, Value};
    use std::sync::Mutex;

    /// One scripted reply
    #[derive(Clone)]
    pub(crate) struct Reply {
        pub(crate) status: CommandStatus,
        pub(crate) result: Value,
        pub(crate) error: Option<String>,
        /// Time until the command settles; None settles immediately
        pub(crate) delay: Option<Duration>,
    }

    /// Scripted command sender: replies per command type (optionally per
    /// target), records every dispatch
    pub(crate) struct FakeSender {
        replies: DashMap<String, Reply>,
        target_replies: DashMap<(String, String), Reply>,
        pub(crate) sent: Mutex<Vec<(String, String, Value, Duration)>>,
        commands: Arc<DashMap<CommandId, Command>>,
    }

    impl FakeSender {
        pub(crate) fn new() -> Self {
            Self {
                replies: DashMap::new(),
                target_replies: DashMap::new(),
                sent: Mutex::new(Vec::new()),
                commands: Arc::new(DashMap::new()),
            }
        }

        pub(crate) fn reply(
            &self,
            command_type: &str,
            status: CommandStatus,
            result: Value,
            error: Option<&str>,
        ) {
            self.replies.insert(
                command_type.to_string(),
                Reply {
                    status,
                    result,
                    error: error.map(|e| e.to_string()),
                    delay: None,
                },
            );
        }

        pub(crate) fn reply_for_target(
            &self,
            target_id: &str,
            command_type: &str,
            status: CommandStatus,
            result: Value,
            error: Option<&str>,
        ) {
            self.target_replies.insert(
                (target_id.to_string(), command_type.to_string()),
                Reply {
                    status,
                    result,
                    error: error.map(|e| e.to_string()),
                    delay: None,
                },
            );
        }

        pub(crate) fn reply_delayed(
            &self,
            target_id: &str,
            command_type: &str,
            delay: Duration,
            status: CommandStatus,
            result: Value,
        ) {
            self.target_replies.insert(
                (target_id.to_string(), command_type.to_string()),
                Reply {
                    status,
                    result,
                    error: None,
                    delay: Some(delay),
                },
            );
        }

        pub(crate) fn sent_types(&self) -> Vec<String> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .map(|(_, t, _, _)| t.clone())
                .collect()
        }

        /// Dispatch count for one target and command type
        pub(crate) fn sent_count(&self, target_id: &str, command_type: &str) -> usize {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .filter(|(t, c, _, _)| t == target_id && c == command_type)
                .count()
        }
    }

    #[async_trait]
    impl CommandSender for FakeSender {
        async fn send_command(
            &self,
            target_id: &str,
            command_type: &str,
            payload: Value,
            timeout: Duration,
        ) -> drover_command::Result<Command> {
            self.sent.lock().unwrap().push((
                target_id.to_string(),
                command_type.to_string(),
                payload.clone(),
                timeout,
            ));

            let reply = self
                .target_replies
                .get(&(target_id.to_string(), command_type.to_string()))
                .map(|r| r.clone())
                .or_else(|| self.replies.get(command_type).map(|r| r.clone()))
                .unwrap_or(Reply {
                    status: CommandStatus::Completed,
                    result: json!({}),
                    error: None,
                    delay: None,
                });

            let id = CommandId::generate();
            let mut command = Command {
                id: id.clone(),
                target_id: target_id.to_string(),
                command_type: command_type.to_string(),
                payload,
                status: CommandStatus::Pending,
                result: None,
                error: None,
                created_at: Utc::now(),
                sent_at: Some(Utc::now()),
                completed_at: None,
                timeout,
            };

            match reply.delay {
                Some(delay) => {
                    self.commands.insert(id.clone(), command.clone());
                    let commands = Arc::clone(&self.commands);
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        if let Some(mut entry) = commands.get_mut(&id) {
                            entry.status = reply.status;
                            entry.result = Some(reply.result);
                            entry.error = reply.error;
                            entry.completed_at = Some(Utc::now());
                        }
                    });
                }
                None => {
                    command.status = reply.status;
                    command.result = Some(reply.result);
                    command.error = reply.error;
                    command.completed_at = reply.status.is_terminal().then(Utc::now);
                    self.commands.insert(id, command.clone());
                }
            }

            Ok(command)
        }

        async fn get_command(&self, id: &CommandId) -> drover_command::Result<Command> {
            self.commands
                .get(id)
                .map(|c| c.clone())
                .ok_or_else(|| drover_command::CommandError::NotFound(id.clone()))
        }
    }

    fn executor(sender: Arc<FakeSender>) -> RemoteExecutor {
        RemoteExecutor::new(sender, VariableResolver::new())
    }

    #[tokio::test]
    async fn explicit_operations_pass_through() {
        let sender = Arc::new(FakeSender::new());
        let exec = executor(sender.clone());

        let op = exec
            .determine_operation(
                "c1",
                None,
                &VariableContext::default(),
                OperationType::Rollback,
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(op, OperationType::Rollback);
        // no check command went out
        assert!(sender.sent_types().is_empty());
    }

    #[tokio::test]
    async fn deploy_maps_to_update_when_installed() {
        let sender = Arc::new(FakeSender::new());
        sender.reply(
            CMD_RELEASE_CHECK,
            CommandStatus::Completed,
            json!({"installed": true, "version": "1.0.0"}),
            None,
        );
        let exec = executor(sender.clone());

        let config = ScriptDeployConfig {
            work_dir: "/opt/app".to_string(),
            ..Default::default()
        };
        let op = exec
            .determine_operation(
                "c1",
                Some(&config),
                &VariableContext::default(),
                OperationType::Deploy,
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(op, OperationType::Update);
        assert_eq!(sent_check_count(&sender), 1);
    }

    #[tokio::test]
    async fn deploy_maps_to_install_when_absent() {
        let sender = Arc::new(FakeSender::new());
        sender.reply(
            CMD_RELEASE_CHECK,
            CommandStatus::Completed,
            json!({"installed": false}),
            None,
        );
        let exec = executor(sender.clone());

        let config = ScriptDeployConfig {
            work_dir: "/opt/app".to_string(),
            ..Default::default()
        };
        let op = exec
            .determine_operation(
                "c1",
                Some(&config),
                &VariableContext::default(),
                OperationType::Deploy,
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(op, OperationType::Install);
    }

    #[tokio::test]
    async fn deploy_without_work_dir_short_circuits_to_install() {
        let sender = Arc::new(FakeSender::new());
        let exec = executor(sender.clone());

        let op = exec
            .determine_operation(
                "c1",
                None,
                &VariableContext::default(),
                OperationType::Deploy,
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(op, OperationType::Install);
        assert!(sender.sent_types().is_empty());
    }

    #[test]
    fn operation_timeout_precedence() {
        // defaults
        assert_eq!(script_operation_timeout(OperationType::Install, None), 600);
        assert_eq!(script_operation_timeout(OperationType::Update, None), 300);
        assert_eq!(script_operation_timeout(OperationType::Rollback, None), 180);
        assert_eq!(
            script_operation_timeout(OperationType::Uninstall, None),
            120
        );

        // explicit override wins
        let config = ScriptDeployConfig {
            timeouts: drover_types::ScriptTimeouts {
                install: 1200,
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(
            script_operation_timeout(OperationType::Install, Some(&config)),
            1200
        );
        // unset override falls back
        assert_eq!(
            script_operation_timeout(OperationType::Update, Some(&config)),
            300
        );
    }

    #[test]
    fn budgets_nest_strictly() {
        let op = 300;
        assert!(dispatch_budget(op) > Duration::from_secs(op));
        assert!(wait_budget(op) > dispatch_budget(op));
    }

    fn sent_check_count(sender: &FakeSender) -> usize {
        sender
            .sent_types()
            .iter()
            .filter(|t| t.as_str() == CMD_RELEASE_CHECK)
            .count()
    }
}
