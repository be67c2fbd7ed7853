//! Cancellable fan-out to many targets
//!
//! One fan-out task dispatches the same command to an ordered list of
//! targets, each as an independent unit, and aggregates the outcomes. The
//! task's cancellation token is checked before every dispatch and raced
//! against every completion wait; targets never dispatched are bulk-marked
//! cancelled. The counted outcomes always satisfy
//! `success + failed + cancelled == total`.

use crate::error::{CommandError, Result};
use crate::tracker::{CommandTracker, WaitOutcome, DEFAULT_TIMEOUT};
use chrono::Utc;
use drover_types::{CommandId, CommandStatus, TaskId};
use serde::Serialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How long a finished task record stays queryable
const TASK_RETENTION: Duration = Duration::from_secs(5 * 60);

/// Fan-out task status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Running,
    Completed,
    Cancelled,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Live fan-out task record
pub(crate) struct FanoutTask {
    pub(crate) target_ids: Vec<String>,
    pub(crate) command_ids: Vec<CommandId>,
    pub(crate) status: TaskStatus,
    pub(crate) cancel: CancellationToken,
    pub(crate) created_at: chrono::DateTime<chrono::Utc>,
}

/// Snapshot of a fan-out task, safe to hand out
#[derive(Debug, Clone, Serialize)]
pub struct TaskInfo {
    pub task_id: TaskId,
    pub target_ids: Vec<String>,
    pub command_ids: Vec<CommandId>,
    pub status: TaskStatus,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Outcome for one target of a fan-out
#[derive(Debug, Clone, Serialize)]
pub struct TargetCommandResult {
    pub target_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_id: Option<CommandId>,
    pub status: CommandStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error: String,
}

impl TargetCommandResult {
    fn cancelled(target_id: &str, reason: &str) -> Self {
        Self {
            target_id: target_id.to_string(),
            command_id: None,
            status: CommandStatus::Cancelled,
            result: None,
            error: reason.to_string(),
        }
    }
}

/// Aggregated response of a fan-out call
#[derive(Debug, Serialize)]
pub struct MulticastResponse {
    pub task_id: TaskId,
    /// True only when every target succeeded
    pub success: bool,
    pub total: usize,
    pub success_count: usize,
    pub failed_count: usize,
    pub cancelled_count: usize,
    pub results: Vec<TargetCommandResult>,
    pub message: String,
    pub status: TaskStatus,
}

impl CommandTracker {
    /// Send the same command to many targets and await every outcome
    ///
    /// Dispatch follows list order. Cancelling the task (see
    /// [`CommandTracker::cancel_task`]) stops further dispatch and marks the
    /// remaining targets cancelled; units already waiting observe the token
    /// and settle as cancelled too.
    pub async fn send_to_multiple(
        &self,
        target_ids: &[String],
        command_type: &str,
        payload: serde_json::Value,
        timeout: Duration,
    ) -> MulticastResponse {
        let timeout = if timeout.is_zero() {
            DEFAULT_TIMEOUT
        } else {
            timeout
        };

        let task_id = TaskId::generate();
        let cancel = self.shutdown.child_token();
        self.tasks.insert(
            task_id.clone(),
            FanoutTask {
                target_ids: target_ids.to_vec(),
                command_ids: Vec::with_capacity(target_ids.len()),
                status: TaskStatus::Running,
                cancel: cancel.clone(),
                created_at: Utc::now(),
            },
        );

        let total = target_ids.len();
        info!(
            task_id = %task_id,
            target_count = total,
            command_type = %command_type,
            timeout_secs = timeout.as_secs(),
            "Sending command to multiple targets"
        );

        let mut results: Vec<Option<TargetCommandResult>> = (0..total).map(|_| None).collect();
        let mut handles = Vec::with_capacity(total);

        for (index, target_id) in target_ids.iter().enumerate() {
            if cancel.is_cancelled() {
                info!(
                    task_id = %task_id,
                    sent_count = index,
                    total = total,
                    "Fan-out task cancelled before dispatch completed"
                );
                for (rest, result) in results.iter_mut().enumerate().skip(index) {
                    *result = Some(TargetCommandResult::cancelled(
                        &target_ids[rest],
                        "Task cancelled before sending",
                    ));
                }
                break;
            }

            let tracker = self.clone();
            let unit_cancel = cancel.clone();
            let unit_task_id = task_id.clone();
            let unit_target = target_id.clone();
            let unit_type = command_type.to_string();
            let unit_payload = payload.clone();
            handles.push(self.background.spawn(async move {
                let result = tracker
                    .run_fanout_unit(
                        &unit_task_id,
                        &unit_target,
                        &unit_type,
                        unit_payload,
                        timeout,
                        &unit_cancel,
                    )
                    .await;
                (index, result)
            }));
        }

        for handle in handles {
            if let Ok((index, result)) = handle.await {
                results[index] = Some(result);
            }
        }

        let results: Vec<TargetCommandResult> = results
            .into_iter()
            .enumerate()
            .map(|(index, result)| {
                // Units aborted mid-flight (tracker shutdown) settle as cancelled
                result.unwrap_or_else(|| {
                    TargetCommandResult::cancelled(&target_ids[index], "Task cancelled")
                })
            })
            .collect();

        let success_count = results
            .iter()
            .filter(|r| r.status == CommandStatus::Completed)
            .count();
        let cancelled_count = results
            .iter()
            .filter(|r| r.status == CommandStatus::Cancelled)
            .count();
        let failed_count = total - success_count - cancelled_count;

        let status = if cancelled_count > 0 {
            TaskStatus::Cancelled
        } else {
            TaskStatus::Completed
        };
        if let Some(mut task) = self.tasks.get_mut(&task_id) {
            if task.status == TaskStatus::Running {
                task.status = status;
            }
        }

        let message = if cancelled_count > 0 {
            format!(
                "Command sent to {total} targets: {success_count} succeeded, {failed_count} failed, {cancelled_count} cancelled"
            )
        } else {
            format!(
                "Command sent to {total} targets: {success_count} succeeded, {failed_count} failed"
            )
        };

        info!(
            task_id = %task_id,
            total = total,
            success = success_count,
            failed = failed_count,
            cancelled = cancelled_count,
            "Fan-out completed"
        );

        // Keep the task record around for a grace period, then drop it
        let tasks = std::sync::Arc::clone(&self.tasks);
        let gc_id = task_id.clone();
        let gc_shutdown = self.shutdown.clone();
        self.background.spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(TASK_RETENTION) => {}
                _ = gc_shutdown.cancelled() => {}
            }
            tasks.remove(&gc_id);
        });

        let final_status = self
            .tasks
            .get(&task_id)
            .map(|t| t.status)
            .unwrap_or(status);

        MulticastResponse {
            task_id,
            success: failed_count == 0 && cancelled_count == 0,
            total,
            success_count,
            failed_count,
            cancelled_count,
            results,
            message,
            status: final_status,
        }
    }

    /// One independent fan-out unit: dispatch, then await the outcome
    async fn run_fanout_unit(
        &self,
        task_id: &TaskId,
        target_id: &str,
        command_type: &str,
        payload: serde_json::Value,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> TargetCommandResult {
        // Re-check right before sending; dispatch may race the cancel
        if cancel.is_cancelled() {
            return TargetCommandResult::cancelled(target_id, "Task cancelled");
        }

        let command = match self
            .send_command(target_id, command_type, payload, timeout)
            .await
        {
            Ok(command) => command,
            Err(err) => {
                warn!(
                    task_id = %task_id,
                    target_id = %target_id,
                    error = %err,
                    "Failed to send command to target"
                );
                return TargetCommandResult {
                    target_id: target_id.to_string(),
                    command_id: None,
                    status: CommandStatus::Failed,
                    result: None,
                    error: err.to_string(),
                };
            }
        };

        if let Some(mut task) = self.tasks.get_mut(task_id) {
            task.command_ids.push(command.id.clone());
        }

        // Allow the agent's own budget plus slack before giving up locally
        let wait_budget = timeout + Duration::from_secs(5);
        match self.wait_for_completion(&command.id, wait_budget, cancel).await {
            WaitOutcome::Completed(final_cmd) => TargetCommandResult {
                target_id: target_id.to_string(),
                command_id: Some(final_cmd.id.clone()),
                status: final_cmd.status,
                result: final_cmd.result,
                error: final_cmd.error.unwrap_or_default(),
            },
            WaitOutcome::Cancelled => {
                Self::update_status(
                    &self.commands,
                    &command.id,
                    CommandStatus::Cancelled,
                    None,
                    Some("Task cancelled".to_string()),
                );
                TargetCommandResult {
                    target_id: target_id.to_string(),
                    command_id: Some(command.id),
                    status: CommandStatus::Cancelled,
                    result: None,
                    error: "Task cancelled".to_string(),
                }
            }
            WaitOutcome::TimedOut => TargetCommandResult {
                target_id: target_id.to_string(),
                command_id: Some(command.id),
                status: CommandStatus::Timeout,
                result: None,
                error: "failed to get command result".to_string(),
            },
            WaitOutcome::NotFound => TargetCommandResult {
                target_id: target_id.to_string(),
                command_id: Some(command.id),
                status: CommandStatus::Failed,
                result: None,
                error: "command not found".to_string(),
            },
        }
    }

    /// Cancel a running fan-out task
    ///
    /// Fires the task's token and retroactively marks every command of the
    /// task still in a non-terminal status as cancelled. This is a local
    /// correction only; messages already in flight are not recalled.
    pub fn cancel_task(&self, task_id: &TaskId) -> Result<()> {
        let (cancel, command_ids) = {
            let mut task = self
                .tasks
                .get_mut(task_id)
                .ok_or_else(|| CommandError::TaskNotFound(task_id.clone()))?;

            if task.status != TaskStatus::Running {
                return Err(CommandError::TaskNotRunning(task.status.to_string()));
            }
            task.status = TaskStatus::Cancelled;
            (task.cancel.clone(), task.command_ids.clone())
        };

        cancel.cancel();

        for command_id in &command_ids {
            let non_terminal = self
                .commands
                .get(command_id)
                .map(|entry| !entry.command.status.is_terminal())
                .unwrap_or(false);
            if non_terminal {
                Self::update_status(
                    &self.commands,
                    command_id,
                    CommandStatus::Cancelled,
                    None,
                    Some("Task cancelled".to_string()),
                );
            }
        }

        info!(
            task_id = %task_id,
            command_count = command_ids.len(),
            "Fan-out task cancelled"
        );

        Ok(())
    }

    /// Snapshot of a fan-out task
    pub fn get_task(&self, task_id: &TaskId) -> Result<TaskInfo> {
        let task = self
            .tasks
            .get(task_id)
            .ok_or_else(|| CommandError::TaskNotFound(task_id.clone()))?;

        Ok(TaskInfo {
            task_id: task_id.clone(),
            target_ids: task.target_ids.clone(),
            command_ids: task.command_ids.clone(),
            status: task.status,
            created_at: task.created_at,
        })
    }
}
