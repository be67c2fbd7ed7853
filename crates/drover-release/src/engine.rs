//! Release engine
//!
//! Owns the release state machine: Pending/Scheduled -> (Approving) ->
//! Running -> Success/Failed, with Paused for canary promotion and
//! Cancelled for explicit cancellation. Terminal statuses are never
//! overwritten. Execution is asynchronous; callers observe progress via the
//! store or the event stream.

use crate::context::ReleaseContext;
use crate::error::{ReleaseError, Result};
use crate::remote::RemoteExecutor;
use crate::store::ReleaseStore;
use crate::strategies::{self, StrategyOutcome};
use chrono::Utc;
use dashmap::DashMap;
use drover_types::{
    Approval, ApprovalStatus, OperationType, Release, ReleaseEvent, ReleaseId, ReleaseStatus,
    ReleaseStrategy, RollbackConfig, Target, TargetResult,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

/// Inputs for creating a release
#[derive(Debug, Clone, Default)]
pub struct CreateReleaseRequest {
    pub project_id: String,
    pub environment_id: String,
    pub pipeline_id: String,
    pub version: String,
    pub operation: OperationType,
    pub variables: HashMap<String, String>,
    /// Explicit target ids; empty means every target of the environment
    pub target_ids: Vec<String>,
    pub strategy: Option<ReleaseStrategy>,
    pub rollback: Option<RollbackConfig>,
    pub scheduled_at: Option<chrono::DateTime<chrono::Utc>>,
    pub created_by: String,
}

/// Orchestrates releases across their targets
#[derive(Clone)]
pub struct ReleaseEngine {
    store: Arc<dyn ReleaseStore>,
    remote: Arc<RemoteExecutor>,
    /// Cancellation token per running release
    running: Arc<DashMap<ReleaseId, CancellationToken>>,
    event_tx: broadcast::Sender<ReleaseEvent>,
}

impl ReleaseEngine {
    pub fn new(store: Arc<dyn ReleaseStore>, remote: Arc<RemoteExecutor>) -> Self {
        let (event_tx, _) = broadcast::channel(1024);
        Self {
            store,
            remote,
            running: Arc::new(DashMap::new()),
            event_tx,
        }
    }

    /// Subscribe to release events
    pub fn subscribe(&self) -> broadcast::Receiver<ReleaseEvent> {
        self.event_tx.subscribe()
    }

    /// Create a release; validates project, environment, pipeline, targets
    #[instrument(skip(self, req), fields(project_id = %req.project_id, version = %req.version))]
    pub async fn create_release(&self, req: CreateReleaseRequest) -> Result<Release> {
        let _project = self
            .store
            .get_project(&req.project_id)
            .await?
            .ok_or_else(|| ReleaseError::NotFound(format!("project {}", req.project_id)))?;

        let environment = self
            .store
            .get_environment(&req.environment_id)
            .await?
            .ok_or_else(|| {
                ReleaseError::NotFound(format!("environment {}", req.environment_id))
            })?;

        let _pipeline = self
            .store
            .get_pipeline(&req.pipeline_id)
            .await?
            .ok_or_else(|| ReleaseError::NotFound(format!("pipeline {}", req.pipeline_id)))?;

        let targets = self.load_targets(&req.target_ids, &req.environment_id).await?;
        if targets.is_empty() {
            return Err(ReleaseError::Validation("no targets found".into()));
        }

        let status = if req.scheduled_at.is_some() {
            ReleaseStatus::Scheduled
        } else {
            ReleaseStatus::Pending
        };

        let results = targets
            .iter()
            .map(|t| TargetResult::pending(&t.id, &t.name))
            .collect();

        let now = Utc::now();
        let mut release = Release {
            id: ReleaseId::generate(),
            project_id: req.project_id,
            environment_id: req.environment_id,
            pipeline_id: req.pipeline_id,
            version: req.version,
            operation: req.operation,
            status,
            strategy: req.strategy.unwrap_or_default(),
            variables: req.variables,
            target_ids: req.target_ids,
            rollback: req.rollback,
            scheduled_at: req.scheduled_at,
            results,
            created_by: req.created_by,
            approved_by: None,
            created_at: now,
            started_at: None,
            finished_at: None,
            updated_at: now,
        };

        self.store.create_release(release.clone()).await?;

        if environment.require_approval {
            release.status = ReleaseStatus::Approving;
            release.updated_at = Utc::now();
            self.store.update_release(release.clone()).await?;

            let approval = Approval {
                id: uuid::Uuid::new_v4().to_string(),
                release_id: release.id.to_string(),
                status: ApprovalStatus::Pending,
                approvers: environment.approvers.clone(),
                approved_by: None,
                comment: String::new(),
                expire_at: Utc::now() + chrono::Duration::hours(1),
                created_at: Utc::now(),
                updated_at: Utc::now(),
            };
            self.store.create_approval(approval).await?;
        }

        info!(release_id = %release.id, status = %release.status, "Release created");

        Ok(release)
    }

    /// Start executing a release
    ///
    /// Requires Pending, Scheduled (start time reached) or Approving (with
    /// an approved record). Returns immediately; the strategy runs in the
    /// background.
    #[instrument(skip(self), fields(release_id = %release_id))]
    pub async fn start_release(&self, release_id: &ReleaseId) -> Result<()> {
        let mut release = self.get_release(release_id).await?;

        match release.status {
            ReleaseStatus::Pending | ReleaseStatus::Scheduled | ReleaseStatus::Approving => {}
            other => {
                return Err(ReleaseError::InvalidState {
                    current: other.to_string(),
                    expected: vec!["pending".into(), "scheduled".into(), "approving".into()],
                });
            }
        }

        if let Some(scheduled_at) = release.scheduled_at {
            if scheduled_at > Utc::now() {
                return Err(ReleaseError::Validation(format!(
                    "release is scheduled for {scheduled_at}"
                )));
            }
        }

        if release.status == ReleaseStatus::Approving {
            let approval = self
                .store
                .get_approval_for_release(release_id)
                .await?
                .ok_or_else(|| {
                    ReleaseError::NotFound(format!("approval for release {release_id}"))
                })?;
            if approval.status != ApprovalStatus::Approved {
                return Err(ReleaseError::Validation("release not approved".into()));
            }
        }

        release.status = ReleaseStatus::Running;
        release.started_at = Some(Utc::now());
        release.updated_at = Utc::now();
        self.store.update_release(release.clone()).await?;
        self.emit_status(release_id, ReleaseStatus::Running);

        self.spawn_execution(release_id.clone());

        Ok(())
    }

    /// Cancel a running or paused release
    ///
    /// Cooperative: fires the release's token, which every strategy wait
    /// observes. Operations already sent to agents are not recalled.
    pub async fn cancel_release(&self, release_id: &ReleaseId) -> Result<()> {
        let mut release = self.get_release(release_id).await?;

        match release.status {
            ReleaseStatus::Running | ReleaseStatus::Paused => {}
            other => {
                return Err(ReleaseError::InvalidState {
                    current: other.to_string(),
                    expected: vec!["running".into(), "paused".into()],
                });
            }
        }

        release.status = ReleaseStatus::Cancelled;
        release.finished_at = Some(Utc::now());
        release.updated_at = Utc::now();
        self.store.update_release(release).await?;
        self.emit_status(release_id, ReleaseStatus::Cancelled);

        if let Some((_, token)) = self.running.remove(release_id) {
            token.cancel();
        }

        info!(release_id = %release_id, "Release cancelled");

        Ok(())
    }

    /// Resume a canary release that paused after a clean canary phase
    ///
    /// Only targets still pending execute; the canary subset is already
    /// terminal and is not touched again.
    pub async fn promote_canary(&self, release_id: &ReleaseId) -> Result<()> {
        let mut release = self.get_release(release_id).await?;

        if release.status != ReleaseStatus::Paused {
            return Err(ReleaseError::InvalidState {
                current: release.status.to_string(),
                expected: vec!["paused".into()],
            });
        }

        release.status = ReleaseStatus::Running;
        release.updated_at = Utc::now();
        self.store.update_release(release).await?;
        self.emit_status(release_id, ReleaseStatus::Running);

        self.spawn_execution(release_id.clone());

        info!(release_id = %release_id, "Canary promoted");

        Ok(())
    }

    /// Approve a release waiting in the Approving state
    pub async fn approve_release(
        &self,
        release_id: &ReleaseId,
        approver: &str,
        comment: Option<&str>,
    ) -> Result<()> {
        let mut approval = self
            .store
            .get_approval_for_release(release_id)
            .await?
            .ok_or_else(|| ReleaseError::NotFound(format!("approval for release {release_id}")))?;

        if approval.status != ApprovalStatus::Pending {
            return Err(ReleaseError::Validation(format!(
                "approval already settled: {:?}",
                approval.status
            )));
        }

        if approval.expire_at < Utc::now() {
            approval.status = ApprovalStatus::Expired;
            approval.updated_at = Utc::now();
            self.store.update_approval(approval).await?;
            return Err(ReleaseError::Validation("approval expired".into()));
        }

        approval.status = ApprovalStatus::Approved;
        approval.approved_by = Some(approver.to_string());
        if let Some(comment) = comment {
            approval.comment = comment.to_string();
        }
        approval.updated_at = Utc::now();
        self.store.update_approval(approval).await?;

        let mut release = self.get_release(release_id).await?;
        release.approved_by = Some(approver.to_string());
        release.updated_at = Utc::now();
        self.store.update_release(release).await?;

        Ok(())
    }

    /// Look up a release
    pub async fn get_release(&self, release_id: &ReleaseId) -> Result<Release> {
        self.store
            .get_release(release_id)
            .await?
            .ok_or_else(|| ReleaseError::NotFound(format!("release {release_id}")))
    }

    /// List releases, newest first, optionally filtered by project
    pub async fn list_releases(
        &self,
        project_id: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<Release>, usize)> {
        Ok(self.store.list_releases(project_id, limit, offset).await?)
    }

    // --- Internal execution ---

    fn spawn_execution(&self, release_id: ReleaseId) {
        let token = CancellationToken::new();
        self.running.insert(release_id.clone(), token.clone());

        let engine = self.clone();
        tokio::spawn(async move {
            engine.execute_release(release_id, token).await;
        });
    }

    async fn execute_release(&self, release_id: ReleaseId, token: CancellationToken) {
        if let Err(err) = self.run_strategy(&release_id, token).await {
            warn!(release_id = %release_id, error = %err, "Release execution failed");

            // Failures before the strategy even ran (missing records, store
            // errors) must still settle the release
            if let Ok(mut release) = self.get_release(&release_id).await {
                if !release.status.is_terminal() {
                    release.status = ReleaseStatus::Failed;
                    release.finished_at = Some(Utc::now());
                    release.updated_at = Utc::now();
                    let _ = self.store.update_release(release).await;
                    self.emit_status(&release_id, ReleaseStatus::Failed);
                }
            }
        }
        self.running.remove(&release_id);
    }

    async fn run_strategy(&self, release_id: &ReleaseId, token: CancellationToken) -> Result<()> {
        let release = self.get_release(release_id).await?;

        let project = self
            .store
            .get_project(&release.project_id)
            .await?
            .ok_or_else(|| ReleaseError::NotFound(format!("project {}", release.project_id)))?;
        let environment = self
            .store
            .get_environment(&release.environment_id)
            .await?
            .ok_or_else(|| {
                ReleaseError::NotFound(format!("environment {}", release.environment_id))
            })?;

        let targets = self
            .load_targets(&release.target_ids, &release.environment_id)
            .await?;

        let strategy = release.strategy.clone();
        let ctx = ReleaseContext::new(
            Arc::clone(&self.store),
            Arc::clone(&self.remote),
            project,
            environment,
            Arc::new(Mutex::new(release)),
            token,
            self.event_tx.clone(),
        );

        let executor = strategies::create_executor(&strategy);
        info!(
            release_id = %release_id,
            strategy = executor.name(),
            target_count = targets.len(),
            "Executing release"
        );

        let outcome = executor.execute(&ctx, &targets).await;

        match outcome {
            Ok(StrategyOutcome::Completed) => {
                if ctx.has_failed_targets().await {
                    self.finish_release(
                        &ctx,
                        ReleaseStatus::Failed,
                        Some("one or more targets failed"),
                    )
                    .await;
                } else {
                    self.finish_release(&ctx, ReleaseStatus::Success, None).await;
                }
            }
            Ok(StrategyOutcome::Paused) => {
                self.pause_release(&ctx).await;
            }
            Ok(StrategyOutcome::Aborted(reason)) => {
                self.finish_release(&ctx, ReleaseStatus::Failed, Some(&reason))
                    .await;
            }
            Ok(StrategyOutcome::Cancelled) => {
                self.finish_release(&ctx, ReleaseStatus::Cancelled, None).await;
            }
            Err(err) => {
                self.finish_release(&ctx, ReleaseStatus::Failed, Some(&err.to_string()))
                    .await;
                return Err(err);
            }
        }

        Ok(())
    }

    /// Record a terminal status; an already-terminal release is left alone
    async fn finish_release(
        &self,
        ctx: &ReleaseContext,
        status: ReleaseStatus,
        reason: Option<&str>,
    ) {
        let release_handle = ctx.release_handle();
        let mut release = release_handle.lock().await;

        if release.status.is_terminal() {
            return;
        }

        release.status = status;
        release.finished_at = Some(Utc::now());
        release.updated_at = Utc::now();

        if let Err(err) = self.store.update_release(release.clone()).await {
            warn!(release_id = %release.id, error = %err, "Failed to persist release status");
        }
        self.emit_status(&release.id, status);

        match reason {
            Some(reason) => {
                warn!(release_id = %release.id, status = %status, reason = %reason, "Release finished")
            }
            None => info!(release_id = %release.id, status = %status, "Release finished"),
        }
    }

    async fn pause_release(&self, ctx: &ReleaseContext) {
        let release_handle = ctx.release_handle();
        let mut release = release_handle.lock().await;

        if release.status.is_terminal() {
            return;
        }

        release.status = ReleaseStatus::Paused;
        release.updated_at = Utc::now();

        if let Err(err) = self.store.update_release(release.clone()).await {
            warn!(release_id = %release.id, error = %err, "Failed to persist release status");
        }
        self.emit_status(&release.id, ReleaseStatus::Paused);

        info!(release_id = %release.id, "Release paused awaiting promotion");
    }

    async fn load_targets(
        &self,
        target_ids: &[String],
        environment_id: &str,
    ) -> Result<Vec<Target>> {
        if target_ids.is_empty() {
            return Ok(self.store.list_targets_for_environment(environment_id).await?);
        }

        let mut targets = Vec::with_capacity(target_ids.len());
        for id in target_ids {
            let target = self
                .store
                .get_target(id)
                .await?
                .ok_or_else(|| ReleaseError::NotFound(format!("target {id}")))?;
            targets.push(target);
        }
        Ok(targets)
    }

    fn emit_status(&self, release_id: &ReleaseId, status: ReleaseStatus) {
        let _ = self.event_tx.send(ReleaseEvent::StatusChanged {
            release_id: release_id.clone(),
            status,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::tests::FakeSender;
    use crate::store::InMemoryReleaseStore;
    use crate::vars::VariableResolver;
    use drover_types::{
        CommandStatus, DeployType, Environment, Pipeline, Project, ReleaseStrategy,
        RollbackGranularity, ScriptDeployConfig, StrategyType, TargetConfig,
        TargetReleaseStatus, CMD_RELEASE_EXECUTE,
    };
    use serde_json::json;
    use std::time::Duration;

    struct Fixture {
        engine: ReleaseEngine,
        store: Arc<InMemoryReleaseStore>,
        sender: Arc<FakeSender>,
    }

    async fn fixture(target_count: usize, require_approval: bool) -> Fixture {
        let store = Arc::new(InMemoryReleaseStore::new());
        let sender = Arc::new(FakeSender::new());
        let remote = Arc::new(RemoteExecutor::new(
            sender.clone(),
            VariableResolver::new(),
        ));
        let engine = ReleaseEngine::new(store.clone(), remote);

        let now = Utc::now();
        store
            .upsert_project(Project {
                id: "p1".into(),
                name: "web".into(),
                description: String::new(),
                deploy_type: DeployType::Script,
                repo_url: String::new(),
                script_config: Some(ScriptDeployConfig {
                    work_dir: "/opt/web".into(),
                    install_script: "install.sh".into(),
                    update_script: "update.sh".into(),
                    rollback_script: "rollback.sh".into(),
                    uninstall_script: "uninstall.sh".into(),
                    ..Default::default()
                }),
                container_config: None,
                kubernetes_config: None,
                gitpull_config: None,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();

        store
            .upsert_environment(Environment {
                id: "e1".into(),
                project_id: "p1".into(),
                name: "prod".into(),
                description: String::new(),
                require_approval,
                approvers: vec!["ops".into()],
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();

        store
            .upsert_pipeline(Pipeline {
                id: "pl1".into(),
                project_id: "p1".into(),
                name: "default".into(),
                description: String::new(),
                is_default: true,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();

        for i in 1..=target_count {
            store
                .upsert_target(Target {
                    id: format!("t{i}"),
                    environment_id: "e1".into(),
                    client_id: format!("c{i}"),
                    name: format!("t{i}"),
                    labels: Default::default(),
                    config: TargetConfig {
                        work_dir: "/opt/web".into(),
                        ..Default::default()
                    },
                    priority: i as i32,
                    created_at: now,
                    updated_at: now,
                })
                .await
                .unwrap();
        }

        // Every agent succeeds unless a test scripts otherwise
        sender.reply(
            CMD_RELEASE_EXECUTE,
            CommandStatus::Completed,
            exec_success("install"),
            None,
        );

        Fixture {
            engine,
            store,
            sender,
        }
    }

    fn exec_success(operation: &str) -> serde_json::Value {
        json!({
            "success": true, "release_id": "r", "target_id": "t",
            "operation": operation, "exit_code": 0, "output": "ok",
            "started_at": "", "finished_at": "", "duration_ms": 5
        })
    }

    fn exec_failure(error: &str) -> serde_json::Value {
        json!({
            "success": false, "release_id": "r", "target_id": "t",
            "operation": "install", "exit_code": 1, "output": "",
            "error": error, "started_at": "", "finished_at": "", "duration_ms": 5
        })
    }

    fn request(strategy: ReleaseStrategy) -> CreateReleaseRequest {
        CreateReleaseRequest {
            project_id: "p1".into(),
            environment_id: "e1".into(),
            pipeline_id: "pl1".into(),
            version: "1.0.0".into(),
            operation: OperationType::Install,
            strategy: Some(strategy),
            created_by: "tester".into(),
            ..Default::default()
        }
    }

    async fn wait_for_status(
        engine: &ReleaseEngine,
        release_id: &ReleaseId,
        status: ReleaseStatus,
    ) -> Release {
        for _ in 0..300 {
            let release = engine.get_release(release_id).await.unwrap();
            if release.status == status {
                return release;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("release never reached {status}");
    }

    #[tokio::test]
    async fn creation_seeds_one_pending_result_per_target() {
        let f = fixture(3, false).await;
        let release = f
            .engine
            .create_release(request(ReleaseStrategy::default()))
            .await
            .unwrap();

        assert_eq!(release.status, ReleaseStatus::Pending);
        assert_eq!(release.results.len(), 3);
        assert!(release
            .results
            .iter()
            .all(|r| r.status == TargetReleaseStatus::Pending));
    }

    #[tokio::test]
    async fn scheduled_release_refuses_an_early_start() {
        let f = fixture(1, false).await;
        let mut req = request(ReleaseStrategy::default());
        req.scheduled_at = Some(Utc::now() + chrono::Duration::hours(2));
        let release = f.engine.create_release(req).await.unwrap();

        assert_eq!(release.status, ReleaseStatus::Scheduled);
        let err = f.engine.start_release(&release.id).await.unwrap_err();
        assert!(err.to_string().contains("scheduled"));
    }

    #[tokio::test]
    async fn rolling_release_succeeds_across_batches_in_order() {
        let f = fixture(5, false).await;
        let strategy = ReleaseStrategy {
            strategy_type: StrategyType::Rolling,
            batch_size: 2,
            ..Default::default()
        };
        let release = f.engine.create_release(request(strategy)).await.unwrap();
        f.engine.start_release(&release.id).await.unwrap();

        let done = wait_for_status(&f.engine, &release.id, ReleaseStatus::Success).await;
        assert!(done
            .results
            .iter()
            .all(|r| r.status == TargetReleaseStatus::Success));
        assert!(done.finished_at.is_some());

        // dispatch order respects batch boundaries: [c1 c2] [c3 c4] [c5]
        let sent: Vec<String> = f
            .sender
            .sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, t, _, _)| t == CMD_RELEASE_EXECUTE)
            .map(|(target, _, _, _)| target.clone())
            .collect();
        assert_eq!(sent.len(), 5);
        let batch_1: std::collections::HashSet<_> = sent[0..2].iter().cloned().collect();
        let batch_2: std::collections::HashSet<_> = sent[2..4].iter().cloned().collect();
        assert_eq!(batch_1, ["c1".to_string(), "c2".to_string()].into());
        assert_eq!(batch_2, ["c3".to_string(), "c4".to_string()].into());
        assert_eq!(sent[4], "c5");
    }

    #[tokio::test]
    async fn rolling_aborts_before_the_next_batch_on_auto_rollback() {
        let f = fixture(3, false).await;
        f.sender.reply_for_target(
            "c2",
            CMD_RELEASE_EXECUTE,
            CommandStatus::Completed,
            exec_failure("service refused to start"),
            None,
        );

        let strategy = ReleaseStrategy {
            strategy_type: StrategyType::Rolling,
            batch_size: 1,
            ..Default::default()
        };
        let mut req = request(strategy);
        req.rollback = Some(RollbackConfig {
            granularity: RollbackGranularity::All,
            auto_rollback: true,
            target_version: String::new(),
        });
        let release = f.engine.create_release(req).await.unwrap();
        f.engine.start_release(&release.id).await.unwrap();

        let done = wait_for_status(&f.engine, &release.id, ReleaseStatus::Failed).await;

        assert_eq!(done.results[0].status, TargetReleaseStatus::Success);
        assert_eq!(done.results[1].status, TargetReleaseStatus::Failed);
        assert!(done.results[1].error.contains("service refused to start"));
        // the third batch never dispatched
        assert_eq!(done.results[2].status, TargetReleaseStatus::Pending);
        assert_eq!(f.sender.sent_count("c3", CMD_RELEASE_EXECUTE), 0);
    }

    #[tokio::test]
    async fn canary_pauses_then_promote_finishes_the_rest() {
        let f = fixture(10, false).await;
        let strategy = ReleaseStrategy {
            strategy_type: StrategyType::Canary,
            canary_percent: 20,
            auto_promote: false,
            ..Default::default()
        };
        let release = f.engine.create_release(request(strategy)).await.unwrap();
        f.engine.start_release(&release.id).await.unwrap();

        let paused = wait_for_status(&f.engine, &release.id, ReleaseStatus::Paused).await;

        // 20% of 10 targets = exactly 2 canary targets, run sequentially
        let succeeded = paused
            .results
            .iter()
            .filter(|r| r.status == TargetReleaseStatus::Success)
            .count();
        assert_eq!(succeeded, 2);
        assert_eq!(
            paused
                .results
                .iter()
                .filter(|r| r.status == TargetReleaseStatus::Pending)
                .count(),
            8
        );

        // it stays paused until promoted
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(
            f.engine.get_release(&release.id).await.unwrap().status,
            ReleaseStatus::Paused
        );

        f.engine.promote_canary(&release.id).await.unwrap();
        let done = wait_for_status(&f.engine, &release.id, ReleaseStatus::Success).await;
        assert!(done
            .results
            .iter()
            .all(|r| r.status == TargetReleaseStatus::Success));

        // canary targets were not executed a second time
        for i in 1..=10 {
            assert_eq!(f.sender.sent_count(&format!("c{i}"), CMD_RELEASE_EXECUTE), 1);
        }
    }

    #[tokio::test]
    async fn canary_failure_never_touches_normal_targets() {
        let f = fixture(5, false).await;
        f.sender.reply_for_target(
            "c1",
            CMD_RELEASE_EXECUTE,
            CommandStatus::Failed,
            json!(null),
            Some("canary exploded"),
        );

        let strategy = ReleaseStrategy {
            strategy_type: StrategyType::Canary,
            canary_percent: 20,
            auto_promote: true,
            ..Default::default()
        };
        let release = f.engine.create_release(request(strategy)).await.unwrap();
        f.engine.start_release(&release.id).await.unwrap();

        let done = wait_for_status(&f.engine, &release.id, ReleaseStatus::Failed).await;
        assert_eq!(done.results[0].status, TargetReleaseStatus::Failed);
        for result in &done.results[1..] {
            assert_eq!(result.status, TargetReleaseStatus::Pending);
        }
        for i in 2..=5 {
            assert_eq!(f.sender.sent_count(&format!("c{i}"), CMD_RELEASE_EXECUTE), 0);
        }
    }

    #[tokio::test]
    async fn blue_green_fails_as_a_whole_when_any_target_fails() {
        let f = fixture(3, false).await;
        f.sender.reply_for_target(
            "c2",
            CMD_RELEASE_EXECUTE,
            CommandStatus::Completed,
            exec_failure("bad green"),
            None,
        );

        let strategy = ReleaseStrategy {
            strategy_type: StrategyType::BlueGreen,
            ..Default::default()
        };
        let release = f.engine.create_release(request(strategy)).await.unwrap();
        f.engine.start_release(&release.id).await.unwrap();

        let done = wait_for_status(&f.engine, &release.id, ReleaseStatus::Failed).await;
        // all targets dispatched concurrently before the verdict
        for i in 1..=3 {
            assert_eq!(f.sender.sent_count(&format!("c{i}"), CMD_RELEASE_EXECUTE), 1);
        }
        assert_eq!(done.results[1].status, TargetReleaseStatus::Failed);
    }

    #[tokio::test]
    async fn cancel_sticks_and_is_never_overwritten() {
        let f = fixture(2, false).await;
        for client in ["c1", "c2"] {
            f.sender.reply_delayed(
                client,
                CMD_RELEASE_EXECUTE,
                Duration::from_secs(60),
                CommandStatus::Completed,
                exec_success("install"),
            );
        }

        let strategy = ReleaseStrategy {
            strategy_type: StrategyType::Rolling,
            batch_size: 1,
            ..Default::default()
        };
        let release = f.engine.create_release(request(strategy)).await.unwrap();
        f.engine.start_release(&release.id).await.unwrap();

        wait_for_status(&f.engine, &release.id, ReleaseStatus::Running).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        f.engine.cancel_release(&release.id).await.unwrap();

        // give the strategy time to unwind; the status must not move again
        tokio::time::sleep(Duration::from_millis(200)).await;
        let done = f.engine.get_release(&release.id).await.unwrap();
        assert_eq!(done.status, ReleaseStatus::Cancelled);
        assert!(done.finished_at.is_some());
        // the second target was never dispatched
        assert_eq!(f.sender.sent_count("c2", CMD_RELEASE_EXECUTE), 0);
    }

    #[tokio::test]
    async fn approval_gates_the_start() {
        let f = fixture(1, true).await;
        let release = f
            .engine
            .create_release(request(ReleaseStrategy::default()))
            .await
            .unwrap();
        assert_eq!(release.status, ReleaseStatus::Approving);
        assert!(f
            .store
            .get_approval_for_release(&release.id)
            .await
            .unwrap()
            .is_some());

        let err = f.engine.start_release(&release.id).await.unwrap_err();
        assert!(err.to_string().contains("not approved"));

        f.engine
            .approve_release(&release.id, "ops", Some("lgtm"))
            .await
            .unwrap();
        f.engine.start_release(&release.id).await.unwrap();

        let done = wait_for_status(&f.engine, &release.id, ReleaseStatus::Success).await;
        assert_eq!(done.approved_by.as_deref(), Some("ops"));
    }

    #[tokio::test]
    async fn unknown_project_fails_creation() {
        let f = fixture(1, false).await;
        let mut req = request(ReleaseStrategy::default());
        req.project_id = "ghost".into();
        let err = f.engine.create_release(req).await.unwrap_err();
        assert!(matches!(err, ReleaseError::NotFound(_)));
    }

    #[tokio::test]
    async fn cancelling_a_finished_release_is_rejected() {
        let f = fixture(1, false).await;
        let release = f
            .engine
            .create_release(request(ReleaseStrategy::default()))
            .await
            .unwrap();
        f.engine.start_release(&release.id).await.unwrap();
        wait_for_status(&f.engine, &release.id, ReleaseStatus::Success).await;

        let err = f.engine.cancel_release(&release.id).await.unwrap_err();
        assert!(matches!(err, ReleaseError::InvalidState { .. }));
    }
}
