//! Release context - execution environment for strategy executors
//!
//! The bridge between rollout sequencing and per-target operation
//! translation. Strategy executors call [`ReleaseContext::run_target`] and
//! nothing else; the context selects the deploy-type path, resolves
//! variables, drives the remote executor and keeps the target result and the
//! persisted release in sync.

use crate::error::{ReleaseError, Result};
use crate::remote::{
    ContainerDeployRequest, GitPullDeployRequest, K8sDeployRequest, RemoteExecutor,
    ScriptExecuteRequest,
};
use crate::store::ReleaseStore;
use crate::vars::VariableContext;
use chrono::Utc;
use drover_types::{
    DeployType, Environment, OperationType, Project, Release, ReleaseEvent, Target,
    TargetReleaseStatus,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Snapshot of the release fields a single target execution needs
struct ReleaseHeader {
    id: String,
    version: String,
    operation: OperationType,
    created_by: String,
    started_at: Option<chrono::DateTime<chrono::Utc>>,
    variables: HashMap<String, String>,
}

/// Context handed to strategy executors
pub struct ReleaseContext {
    store: Arc<dyn ReleaseStore>,
    remote: Arc<RemoteExecutor>,
    project: Project,
    environment: Environment,
    release: Arc<Mutex<Release>>,
    cancel: CancellationToken,
    event_tx: broadcast::Sender<ReleaseEvent>,
}

impl ReleaseContext {
    pub fn new(
        store: Arc<dyn ReleaseStore>,
        remote: Arc<RemoteExecutor>,
        project: Project,
        environment: Environment,
        release: Arc<Mutex<Release>>,
        cancel: CancellationToken,
        event_tx: broadcast::Sender<ReleaseEvent>,
    ) -> Self {
        Self {
            store,
            remote,
            project,
            environment,
            release,
            cancel,
            event_tx,
        }
    }

    /// The release's cooperative cancellation token
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Shared handle to the working release record
    pub(crate) fn release_handle(&self) -> Arc<Mutex<Release>> {
        Arc::clone(&self.release)
    }

    /// Whether any target of the release has failed
    pub async fn has_failed_targets(&self) -> bool {
        self.release.lock().await.has_failed_targets()
    }

    /// Whether the release is configured to abort on target failure
    pub async fn auto_rollback_enabled(&self) -> bool {
        self.release
            .lock()
            .await
            .rollback
            .as_ref()
            .map(|r| r.auto_rollback)
            .unwrap_or(false)
    }

    /// Whether a target has not been executed yet
    pub async fn target_is_pending(&self, target_id: &str) -> bool {
        self.release
            .lock()
            .await
            .results
            .iter()
            .any(|r| r.target_id == target_id && r.status == TargetReleaseStatus::Pending)
    }

    /// Execute the release's operation on one target
    ///
    /// The outcome lands on the target's result slot; sibling targets are
    /// never affected. Persists the release after both mutations.
    pub async fn run_target(&self, target: &Target) {
        let header = {
            let mut release = self.release.lock().await;
            let Some(result) = release.result_mut(&target.id) else {
                warn!(target_id = %target.id, "Target has no result slot, skipping");
                return;
            };
            result.status = TargetReleaseStatus::Running;
            result.started_at = Some(Utc::now());

            ReleaseHeader {
                id: release.id.to_string(),
                version: release.version.clone(),
                operation: release.operation,
                created_by: release.created_by.clone(),
                started_at: release.started_at,
                variables: release.variables.clone(),
            }
        };
        self.persist_and_emit(&target.id).await;

        let vars = self.build_vars(&header, target);
        let outcome = self.execute_deploy(&header, target, &vars).await;

        {
            let mut release = self.release.lock().await;
            if let Some(result) = release.result_mut(&target.id) {
                result.finished_at = Some(Utc::now());
                match &outcome {
                    Ok(()) => {
                        result.status = TargetReleaseStatus::Success;
                        result.error = String::new();
                    }
                    Err(err) => {
                        result.status = TargetReleaseStatus::Failed;
                        result.error = err.to_string();
                    }
                }
            }
        }
        self.persist_and_emit(&target.id).await;

        match outcome {
            Ok(()) => info!(target_id = %target.id, target_name = %target.name, "Target succeeded"),
            Err(err) => {
                warn!(target_id = %target.id, target_name = %target.name, error = %err, "Target failed")
            }
        }
    }

    fn build_vars(&self, header: &ReleaseHeader, target: &Target) -> VariableContext {
        VariableContext {
            release_id: header.id.clone(),
            release_version: header.version.clone(),
            release_env: self.environment.name.clone(),
            release_user: header.created_by.clone(),
            release_time: header.started_at,
            target_id: target.id.clone(),
            target_name: target.name.clone(),
            target_client_id: target.client_id.clone(),
            app_dir: target.config.work_dir.clone(),
            custom: header.variables.clone(),
            ..Default::default()
        }
    }

    /// Select the deploy-type path and drive the remote executor
    async fn execute_deploy(
        &self,
        header: &ReleaseHeader,
        target: &Target,
        vars: &VariableContext,
    ) -> Result<()> {
        if target.client_id.is_empty() {
            return Err(ReleaseError::Validation(format!(
                "target {} has no client id",
                target.id
            )));
        }

        match self.project.deploy_type {
            DeployType::Script => self.deploy_script(header, target, vars).await,
            DeployType::Container => self.deploy_container(header, target, vars).await,
            DeployType::Kubernetes => self.deploy_kubernetes(header, target, vars).await,
            DeployType::GitPull => self.deploy_gitpull(header, target, vars).await,
        }
    }

    async fn deploy_script(
        &self,
        header: &ReleaseHeader,
        target: &Target,
        vars: &VariableContext,
    ) -> Result<()> {
        let config = self
            .project
            .script_config
            .as_ref()
            .ok_or_else(|| ReleaseError::Validation("script config is missing".into()))?;

        let operation = self
            .remote
            .determine_operation(
                &target.client_id,
                Some(config),
                vars,
                header.operation,
                &self.cancel,
            )
            .await?;

        let outcome = self
            .remote
            .execute_script_deploy(
                &ScriptExecuteRequest {
                    release_id: &header.id,
                    target_id: &target.id,
                    client_id: &target.client_id,
                    operation,
                    version: &header.version,
                    config,
                    vars,
                    timeout_override: None,
                },
                &self.cancel,
            )
            .await?;

        if !outcome.success {
            return Err(ReleaseError::RemoteExecution(format!(
                "remote script failed: {}",
                outcome.error
            )));
        }
        Ok(())
    }

    async fn deploy_container(
        &self,
        header: &ReleaseHeader,
        target: &Target,
        vars: &VariableContext,
    ) -> Result<()> {
        let config = self
            .project
            .container_config
            .as_ref()
            .ok_or_else(|| ReleaseError::Validation("container config is missing".into()))?;
        if config.image.is_empty() {
            return Err(ReleaseError::Validation("container image is empty".into()));
        }

        let resolver = &self.remote.resolver;
        let image = resolver.resolve(&config.image, vars);
        let container_name = resolver.resolve(&config.container_name, vars);
        let environment = resolver.resolve_map(&config.environment, vars);

        let outcome = self
            .remote
            .execute_container_deploy(
                &ContainerDeployRequest {
                    release_id: &header.id,
                    target_id: &target.id,
                    client_id: &target.client_id,
                    operation: header.operation,
                    version: &header.version,
                    config,
                    image,
                    container_name,
                    environment,
                },
                &self.cancel,
            )
            .await?;

        if !outcome.success {
            return Err(ReleaseError::RemoteExecution(format!(
                "container deploy failed: {}",
                outcome.error
            )));
        }
        Ok(())
    }

    async fn deploy_kubernetes(
        &self,
        header: &ReleaseHeader,
        target: &Target,
        vars: &VariableContext,
    ) -> Result<()> {
        let config = self
            .project
            .kubernetes_config
            .as_ref()
            .ok_or_else(|| ReleaseError::Validation("kubernetes config is missing".into()))?;

        let resolver = &self.remote.resolver;
        let image = if config.image.is_empty() {
            String::new()
        } else {
            resolver.resolve(&config.image, vars)
        };

        let raw_yaml = if !config.yaml.is_empty() {
            config.yaml.as_str()
        } else {
            config.yaml_template.as_str()
        };
        if raw_yaml.is_empty() && image.is_empty() {
            return Err(ReleaseError::Validation(
                "kubernetes yaml and image are both empty".into(),
            ));
        }
        let yaml = resolver.resolve(raw_yaml, vars);
        let environment = resolver.resolve_map(&config.environment, vars);

        let outcome = self
            .remote
            .execute_k8s_deploy(
                &K8sDeployRequest {
                    release_id: &header.id,
                    target_id: &target.id,
                    client_id: &target.client_id,
                    operation: header.operation,
                    version: &header.version,
                    config,
                    image,
                    yaml,
                    environment,
                    to_revision: 0,
                },
                &self.cancel,
            )
            .await?;

        if !outcome.success {
            return Err(ReleaseError::RemoteExecution(format!(
                "k8s deploy failed: {}",
                outcome.error
            )));
        }
        Ok(())
    }

    async fn deploy_gitpull(
        &self,
        header: &ReleaseHeader,
        target: &Target,
        vars: &VariableContext,
    ) -> Result<()> {
        let config = self
            .project
            .gitpull_config
            .as_ref()
            .ok_or_else(|| ReleaseError::Validation("gitpull config is missing".into()))?;
        if config.repo_url.is_empty() {
            return Err(ReleaseError::Validation("repo url is empty".into()));
        }

        let resolver = &self.remote.resolver;
        let repo_url = resolver.resolve(&config.repo_url, vars);
        let work_dir = resolver.resolve(&config.work_dir, vars);
        let branch = if config.branch.is_empty() {
            String::new()
        } else {
            resolver.resolve(&config.branch, vars)
        };
        let pre_script = if config.pre_script.is_empty() {
            String::new()
        } else {
            resolver.resolve(&config.pre_script, vars)
        };
        let post_script = if config.post_script.is_empty() {
            String::new()
        } else {
            resolver.resolve(&config.post_script, vars)
        };
        let environment = resolver.resolve_map(&config.environment, vars);

        let outcome = self
            .remote
            .execute_gitpull_deploy(
                &GitPullDeployRequest {
                    release_id: &header.id,
                    target_id: &target.id,
                    client_id: &target.client_id,
                    operation: header.operation,
                    version: &header.version,
                    config,
                    repo_url,
                    branch,
                    work_dir,
                    pre_script,
                    post_script,
                    environment,
                },
                &self.cancel,
            )
            .await?;

        if !outcome.success {
            return Err(ReleaseError::RemoteExecution(format!(
                "git pull deploy failed: {}",
                outcome.error
            )));
        }
        Ok(())
    }

    /// Persist the working release and broadcast the target's latest result
    async fn persist_and_emit(&self, target_id: &str) {
        let (snapshot, result) = {
            let mut release = self.release.lock().await;
            release.updated_at = Utc::now();
            let result = release
                .results
                .iter()
                .find(|r| r.target_id == target_id)
                .cloned();
            (release.clone(), result)
        };

        if let Err(err) = self.store.update_release(snapshot.clone()).await {
            warn!(release_id = %snapshot.id, error = %err, "Failed to persist release");
        }

        if let Some(result) = result {
            let _ = self.event_tx.send(ReleaseEvent::TargetUpdated {
                release_id: snapshot.id,
                target_id: target_id.to_string(),
                result,
            });
        }
    }
}
