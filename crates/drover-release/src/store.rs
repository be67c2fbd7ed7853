//! Persistence seam
//!
//! The engine reads and writes everything through [`ReleaseStore`]: create,
//! read and update by id plus query by parent id. Schema and durability are
//! the backend's concern; the in-memory implementation below backs tests and
//! embedded use.

use async_trait::async_trait;
use dashmap::DashMap;
use drover_types::{Approval, Environment, Pipeline, Project, Release, ReleaseId, Target};
use thiserror::Error;

/// Store backend failure
#[derive(Debug, Error)]
#[error("{0}")]
pub struct StoreError(pub String);

/// Result type for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Generic relational store consumed by the release engine
#[async_trait]
pub trait ReleaseStore: Send + Sync {
    async fn upsert_project(&self, project: Project) -> StoreResult<()>;
    async fn get_project(&self, id: &str) -> StoreResult<Option<Project>>;

    async fn upsert_environment(&self, environment: Environment) -> StoreResult<()>;
    async fn get_environment(&self, id: &str) -> StoreResult<Option<Environment>>;

    async fn upsert_pipeline(&self, pipeline: Pipeline) -> StoreResult<()>;
    async fn get_pipeline(&self, id: &str) -> StoreResult<Option<Pipeline>>;

    async fn upsert_target(&self, target: Target) -> StoreResult<()>;
    async fn get_target(&self, id: &str) -> StoreResult<Option<Target>>;
    /// Targets of an environment, ordered by priority then name
    async fn list_targets_for_environment(&self, environment_id: &str)
        -> StoreResult<Vec<Target>>;

    async fn create_release(&self, release: Release) -> StoreResult<()>;
    async fn get_release(&self, id: &ReleaseId) -> StoreResult<Option<Release>>;
    /// Persist the full release record, results included
    async fn update_release(&self, release: Release) -> StoreResult<()>;
    /// Releases, newest first, optionally filtered by project
    async fn list_releases(
        &self,
        project_id: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> StoreResult<(Vec<Release>, usize)>;

    async fn create_approval(&self, approval: Approval) -> StoreResult<()>;
    async fn get_approval_for_release(
        &self,
        release_id: &ReleaseId,
    ) -> StoreResult<Option<Approval>>;
    async fn update_approval(&self, approval: Approval) -> StoreResult<()>;
}

/// In-memory store for tests and embedded deployments
#[derive(Default)]
pub struct InMemoryReleaseStore {
    projects: DashMap<String, Project>,
    environments: DashMap<String, Environment>,
    pipelines: DashMap<String, Pipeline>,
    targets: DashMap<String, Target>,
    /// environment id -> target ids
    targets_by_env: DashMap<String, Vec<String>>,
    releases: DashMap<ReleaseId, Release>,
    /// release id -> approval
    approvals: DashMap<ReleaseId, Approval>,
}

impl InMemoryReleaseStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReleaseStore for InMemoryReleaseStore {
    async fn upsert_project(&self, project: Project) -> StoreResult<()> {
        self.projects.insert(project.id.clone(), project);
        Ok(())
    }

    async fn get_project(&self, id: &str) -> StoreResult<Option<Project>> {
        Ok(self.projects.get(id).map(|p| p.clone()))
    }

    async fn upsert_environment(&self, environment: Environment) -> StoreResult<()> {
        self.environments
            .insert(environment.id.clone(), environment);
        Ok(())
    }

    async fn get_environment(&self, id: &str) -> StoreResult<Option<Environment>> {
        Ok(self.environments.get(id).map(|e| e.clone()))
    }

    async fn upsert_pipeline(&self, pipeline: Pipeline) -> StoreResult<()> {
        self.pipelines.insert(pipeline.id.clone(), pipeline);
        Ok(())
    }

    async fn get_pipeline(&self, id: &str) -> StoreResult<Option<Pipeline>> {
        Ok(self.pipelines.get(id).map(|p| p.clone()))
    }

    async fn upsert_target(&self, target: Target) -> StoreResult<()> {
        let id = target.id.clone();
        let environment_id = target.environment_id.clone();
        self.targets.insert(id.clone(), target);

        let mut ids = self.targets_by_env.entry(environment_id).or_default();
        if !ids.contains(&id) {
            ids.push(id);
        }
        Ok(())
    }

    async fn get_target(&self, id: &str) -> StoreResult<Option<Target>> {
        Ok(self.targets.get(id).map(|t| t.clone()))
    }

    async fn list_targets_for_environment(
        &self,
        environment_id: &str,
    ) -> StoreResult<Vec<Target>> {
        let mut targets: Vec<Target> = self
            .targets_by_env
            .get(environment_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.targets.get(id).map(|t| t.clone()))
                    .collect()
            })
            .unwrap_or_default();

        targets.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.name.cmp(&b.name)));
        Ok(targets)
    }

    async fn create_release(&self, release: Release) -> StoreResult<()> {
        self.releases.insert(release.id.clone(), release);
        Ok(())
    }

    async fn get_release(&self, id: &ReleaseId) -> StoreResult<Option<Release>> {
        Ok(self.releases.get(id).map(|r| r.clone()))
    }

    async fn update_release(&self, release: Release) -> StoreResult<()> {
        self.releases.insert(release.id.clone(), release);
        Ok(())
    }

    async fn list_releases(
        &self,
        project_id: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> StoreResult<(Vec<Release>, usize)> {
        let mut releases: Vec<Release> = self
            .releases
            .iter()
            .filter(|r| project_id.map_or(true, |p| r.project_id == p))
            .map(|r| r.clone())
            .collect();

        releases.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let total = releases.len();
        let page = releases.into_iter().skip(offset).take(limit).collect();
        Ok((page, total))
    }

    async fn create_approval(&self, approval: Approval) -> StoreResult<()> {
        self.approvals
            .insert(ReleaseId::new(approval.release_id.clone()), approval);
        Ok(())
    }

    async fn get_approval_for_release(
        &self,
        release_id: &ReleaseId,
    ) -> StoreResult<Option<Approval>> {
        Ok(self.approvals.get(release_id).map(|a| a.clone()))
    }

    async fn update_approval(&self, approval: Approval) -> StoreResult<()> {
        self.create_approval(approval).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use drover_types::{OperationType, ReleaseStatus, ReleaseStrategy, TargetConfig};

    fn target(id: &str, env: &str, priority: i32) -> Target {
        Target {
            id: id.to_string(),
            environment_id: env.to_string(),
            client_id: format!("client-{id}"),
            name: id.to_string(),
            labels: Default::default(),
            config: TargetConfig::default(),
            priority,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn release(id: &str, project: &str) -> Release {
        Release {
            id: ReleaseId::new(id),
            project_id: project.to_string(),
            environment_id: "env-1".to_string(),
            pipeline_id: "pipe-1".to_string(),
            version: "1.0.0".to_string(),
            operation: OperationType::Deploy,
            status: ReleaseStatus::Pending,
            strategy: ReleaseStrategy::default(),
            variables: Default::default(),
            target_ids: Vec::new(),
            rollback: None,
            scheduled_at: None,
            results: Vec::new(),
            created_by: "tester".to_string(),
            approved_by: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn targets_list_by_environment_in_priority_order() {
        let store = InMemoryReleaseStore::new();
        store.upsert_target(target("b", "env-1", 2)).await.unwrap();
        store.upsert_target(target("a", "env-1", 1)).await.unwrap();
        store.upsert_target(target("c", "env-2", 0)).await.unwrap();

        let listed = store.list_targets_for_environment("env-1").await.unwrap();
        assert_eq!(
            listed.iter().map(|t| t.id.as_str()).collect::<Vec<_>>(),
            vec!["a", "b"]
        );
    }

    #[tokio::test]
    async fn release_listing_filters_and_pages() {
        let store = InMemoryReleaseStore::new();
        for i in 0..5 {
            let mut r = release(&format!("r{i}"), "p1");
            r.created_at = Utc::now() + chrono::Duration::seconds(i);
            store.create_release(r).await.unwrap();
        }
        store.create_release(release("other", "p2")).await.unwrap();

        let (page, total) = store.list_releases(Some("p1"), 2, 1).await.unwrap();
        assert_eq!(total, 5);
        assert_eq!(page.len(), 2);
        // newest first
        assert_eq!(page[0].id, ReleaseId::new("r3"));

        assert!(store.get_project("missing").await.unwrap().is_none());
    }
}
