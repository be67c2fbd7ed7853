//! Command tracker
//!
//! Owns the registry of in-flight and completed commands. Dispatch returns
//! immediately; one waiter task per command consumes the transport promise
//! exactly once and records the terminal status. Reads always return copies,
//! never the live entry.

use crate::error::{CommandError, Result};
use crate::multicast::FanoutTask;
use crate::transport::{AckStatus, Promise, Transport, WireMessage};
use chrono::Utc;
use dashmap::DashMap;
use drover_types::command::CommandPayload;
use drover_types::{Command, CommandId, CommandStatus, TaskId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Default acknowledgment budget when the caller passes zero
pub(crate) const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
/// How often the retention sweep runs
const CLEANUP_INTERVAL: Duration = Duration::from_secs(5 * 60);
/// How long terminal commands are kept for lookup
const COMMAND_RETENTION: Duration = Duration::from_secs(30 * 60);

pub(crate) struct CommandEntry {
    pub(crate) command: Command,
    /// Completion signal; fan-out waiters subscribe to this
    pub(crate) status_tx: watch::Sender<CommandStatus>,
}

/// Typed outcome of waiting for a command to complete
#[derive(Debug)]
pub enum WaitOutcome {
    /// The command reached a terminal status
    Completed(Command),
    /// The surrounding task was cancelled before completion
    Cancelled,
    /// The wait deadline elapsed first
    TimedOut,
    /// The command id is unknown (or was swept while waiting)
    NotFound,
}

/// Tracks every command sent to remote agents
///
/// Cloning is cheap and shares the underlying registries.
#[derive(Clone)]
pub struct CommandTracker {
    transport: Arc<dyn Transport>,
    pub(crate) commands: Arc<DashMap<CommandId, CommandEntry>>,
    pub(crate) tasks: Arc<DashMap<TaskId, FanoutTask>>,
    pub(crate) shutdown: CancellationToken,
    pub(crate) background: TaskTracker,
}

impl CommandTracker {
    /// Create a tracker and start its retention sweep
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        let tracker = Self {
            transport,
            commands: Arc::new(DashMap::new()),
            tasks: Arc::new(DashMap::new()),
            shutdown: CancellationToken::new(),
            background: TaskTracker::new(),
        };

        let sweep = tracker.clone();
        tracker.background.spawn(async move {
            sweep.cleanup_loop().await;
        });

        tracker
    }

    /// Send a command to one target
    ///
    /// Returns as soon as the transport accepted the message; the eventual
    /// outcome is observed via [`CommandTracker::get_command`]. A zero
    /// timeout defaults to 30 seconds.
    pub async fn send_command(
        &self,
        target_id: &str,
        command_type: &str,
        payload: serde_json::Value,
        timeout: Duration,
    ) -> Result<Command> {
        let timeout = if timeout.is_zero() {
            DEFAULT_TIMEOUT
        } else {
            timeout
        };

        let id = CommandId::generate();
        let command = Command {
            id: id.clone(),
            target_id: target_id.to_string(),
            command_type: command_type.to_string(),
            payload: payload.clone(),
            status: CommandStatus::Pending,
            result: None,
            error: None,
            created_at: Utc::now(),
            sent_at: None,
            completed_at: None,
            timeout,
        };

        let (status_tx, _) = watch::channel(CommandStatus::Pending);
        self.commands.insert(
            id.clone(),
            CommandEntry {
                command: command.clone(),
                status_tx,
            },
        );

        let body = serde_json::to_value(CommandPayload {
            command_type: command_type.to_string(),
            payload,
        })?;

        let msg = WireMessage {
            msg_id: id.to_string(),
            sender_id: "server".to_string(),
            receiver_id: target_id.to_string(),
            payload: body,
            wait_ack: true,
            timestamp: Utc::now().timestamp_millis(),
        };

        let promise = match self.transport.send_with_promise(target_id, msg, timeout).await {
            Ok(promise) => promise,
            Err(err) => {
                Self::update_status(
                    &self.commands,
                    &id,
                    CommandStatus::Failed,
                    None,
                    Some(format!("send command failed: {err}")),
                );
                return Err(err.into());
            }
        };

        if let Some(mut entry) = self.commands.get_mut(&id) {
            entry.command.sent_at = Some(Utc::now());
        }

        info!(
            command_id = %id,
            target_id = %target_id,
            command_type = %command_type,
            timeout_secs = timeout.as_secs(),
            "Command sent to target"
        );

        let commands = Arc::clone(&self.commands);
        let shutdown = self.shutdown.clone();
        let waiter_id = id.clone();
        self.background.spawn(async move {
            Self::wait_for_ack(commands, waiter_id, promise, shutdown).await;
        });

        Ok(command)
    }

    /// One waiter per command: races the promise against tracker shutdown
    async fn wait_for_ack(
        commands: Arc<DashMap<CommandId, CommandEntry>>,
        id: CommandId,
        promise: Promise,
        shutdown: CancellationToken,
    ) {
        let outcome = tokio::select! {
            res = promise.recv() => res,
            _ = shutdown.cancelled() => return,
        };

        match outcome {
            Ok(ack) => match ack.status {
                AckStatus::Success => {
                    Self::update_status(&commands, &id, CommandStatus::Completed, ack.result, None);
                }
                AckStatus::Failure => {
                    Self::update_status(
                        &commands,
                        &id,
                        CommandStatus::Failed,
                        ack.result,
                        ack.error,
                    );
                }
                AckStatus::Timeout => {
                    Self::update_status(&commands, &id, CommandStatus::Timeout, None, ack.error);
                }
            },
            Err(err) => {
                warn!(command_id = %id, error = %err, "Command acknowledgment failed");
                Self::update_status(
                    &commands,
                    &id,
                    CommandStatus::Timeout,
                    None,
                    Some(err.to_string()),
                );
            }
        }
    }

    /// Record a status transition; terminal states are never overwritten
    pub(crate) fn update_status(
        commands: &DashMap<CommandId, CommandEntry>,
        id: &CommandId,
        status: CommandStatus,
        result: Option<serde_json::Value>,
        error: Option<String>,
    ) {
        let Some(mut entry) = commands.get_mut(id) else {
            return;
        };

        if entry.command.status.is_terminal() {
            // A late ack for a locally-cancelled (or otherwise settled)
            // command is dropped, not merged.
            debug!(
                command_id = %id,
                recorded = %entry.command.status,
                discarded = %status,
                "Dropping status update for settled command"
            );
            return;
        }

        entry.command.status = status;
        if result.is_some() {
            entry.command.result = result;
        }
        if let Some(error) = error {
            if !error.is_empty() {
                entry.command.error = Some(error);
            }
        }
        if status.is_terminal() {
            entry.command.completed_at = Some(Utc::now());
        }

        let _ = entry.status_tx.send(status);
    }

    /// Look up a command; returns a copy, never the live record
    pub fn get_command(&self, id: &CommandId) -> Result<Command> {
        self.commands
            .get(id)
            .map(|entry| entry.command.clone())
            .ok_or_else(|| CommandError::NotFound(id.clone()))
    }

    /// Snapshot of all commands, optionally filtered by target and status
    pub fn list_commands(
        &self,
        target_id: Option<&str>,
        status: Option<CommandStatus>,
    ) -> Vec<Command> {
        self.commands
            .iter()
            .filter(|entry| {
                target_id.map_or(true, |t| entry.command.target_id == t)
                    && status.map_or(true, |s| entry.command.status == s)
            })
            .map(|entry| entry.command.clone())
            .collect()
    }

    /// Await a command's terminal status, racing a cancellation signal and a
    /// deadline. Each concern maps to its own [`WaitOutcome`] variant.
    pub async fn wait_for_completion(
        &self,
        id: &CommandId,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> WaitOutcome {
        let mut status_rx = match self.commands.get(id) {
            Some(entry) => entry.status_tx.subscribe(),
            None => return WaitOutcome::NotFound,
        };

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if status_rx.borrow().is_terminal() {
                return match self.get_command(id) {
                    Ok(command) => WaitOutcome::Completed(command),
                    Err(_) => WaitOutcome::NotFound,
                };
            }

            tokio::select! {
                _ = cancel.cancelled() => return WaitOutcome::Cancelled,
                _ = tokio::time::sleep_until(deadline) => return WaitOutcome::TimedOut,
                changed = status_rx.changed() => {
                    if changed.is_err() {
                        // Entry swept while waiting
                        return WaitOutcome::NotFound;
                    }
                }
            }
        }
    }

    async fn cleanup_loop(&self) {
        let mut tick = tokio::time::interval(CLEANUP_INTERVAL);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it
        tick.tick().await;

        loop {
            tokio::select! {
                _ = tick.tick() => self.cleanup(),
                _ = self.shutdown.cancelled() => return,
            }
        }
    }

    /// Drop terminal commands older than the retention window
    pub(crate) fn cleanup(&self) {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(COMMAND_RETENTION).unwrap_or(chrono::Duration::zero());
        let before = self.commands.len();

        self.commands.retain(|_, entry| {
            let expired = entry.command.status.is_terminal()
                && entry
                    .command
                    .completed_at
                    .is_some_and(|done| done < cutoff);
            !expired
        });

        let removed = before - self.commands.len();
        if removed > 0 {
            debug!(count = removed, "Cleaned up expired commands");
        }
    }

    /// Cancel the tracker's lifecycle and wait for every background task
    /// (command waiters, fan-out units, the sweep) to exit
    pub async fn stop(&self) {
        info!("Stopping command tracker");
        self.shutdown.cancel();
        self.background.close();
        self.background.wait().await;
        info!("Command tracker stopped");
    }
}
