//! Variable resolution
//!
//! Pure substitution of `${NAME}` and `$NAME` placeholders in scripts, image
//! names, YAML and environment maps. Unresolved names are left verbatim so
//! agent-side shell variables pass through untouched. No side effects.

use regex::Regex;
use std::collections::HashMap;

/// Context a release hands to the resolver for one target
#[derive(Debug, Clone, Default)]
pub struct VariableContext {
    // Release
    pub release_id: String,
    pub release_version: String,
    pub release_env: String,
    pub release_user: String,
    pub release_time: Option<chrono::DateTime<chrono::Utc>>,

    // Target
    pub target_id: String,
    pub target_name: String,
    pub target_host: String,
    pub target_ip: String,
    pub target_client_id: String,

    // Git
    pub git_repo: String,
    pub git_branch: String,
    pub git_commit: String,
    pub git_tag: String,

    // Container
    pub image_registry: String,
    pub image_name: String,
    pub image_tag: String,
    pub container_name: String,

    // Kubernetes
    pub k8s_namespace: String,
    pub k8s_deployment: String,
    pub k8s_replicas: i64,

    // Paths
    pub app_dir: String,
    pub backup_dir: String,
    pub log_dir: String,

    // Operation
    pub current_version: String,
    pub rollback_version: String,

    /// Release-level custom variables, highest precedence
    pub custom: HashMap<String, String>,
}

/// Resolves `${NAME}`/`$NAME` placeholders against a [`VariableContext`]
#[derive(Debug, Clone)]
pub struct VariableResolver {
    pattern: Regex,
    system: HashMap<String, String>,
}

impl VariableResolver {
    pub fn new() -> Self {
        let mut system = HashMap::new();
        if let Ok(hostname) = std::env::var("HOSTNAME") {
            system.insert("HOSTNAME".to_string(), hostname);
        }

        Self {
            // ${VAR} or $VAR
            pattern: Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)")
                .expect("variable pattern is valid"),
            system,
        }
    }

    /// Substitute every known placeholder in `text`; unknown names stay as-is
    pub fn resolve(&self, text: &str, ctx: &VariableContext) -> String {
        let vars = self.build_var_map(ctx);

        self.pattern
            .replace_all(text, |caps: &regex::Captures<'_>| {
                let name = caps
                    .get(1)
                    .or_else(|| caps.get(2))
                    .map(|m| m.as_str())
                    .unwrap_or_default();
                match vars.get(name) {
                    Some(value) => value.clone(),
                    // unresolved: keep the original placeholder
                    None => caps[0].to_string(),
                }
            })
            .into_owned()
    }

    /// Resolve every value of a map, keeping the keys
    pub fn resolve_map(
        &self,
        data: &HashMap<String, String>,
        ctx: &VariableContext,
    ) -> HashMap<String, String> {
        data.iter()
            .map(|(k, v)| (k.clone(), self.resolve(v, ctx)))
            .collect()
    }

    fn build_var_map(&self, ctx: &VariableContext) -> HashMap<String, String> {
        let mut vars = self.system.clone();

        vars.insert("RELEASE_ID".into(), ctx.release_id.clone());
        vars.insert("RELEASE_VERSION".into(), ctx.release_version.clone());
        vars.insert("RELEASE_ENV".into(), ctx.release_env.clone());
        vars.insert("RELEASE_USER".into(), ctx.release_user.clone());
        if let Some(time) = ctx.release_time {
            vars.insert("RELEASE_TIME".into(), time.to_rfc3339());
            vars.insert("RELEASE_TIMESTAMP".into(), time.timestamp().to_string());
        }

        vars.insert("TARGET_ID".into(), ctx.target_id.clone());
        vars.insert("TARGET_NAME".into(), ctx.target_name.clone());
        vars.insert("TARGET_HOST".into(), ctx.target_host.clone());
        vars.insert("TARGET_IP".into(), ctx.target_ip.clone());
        vars.insert("TARGET_CLIENT_ID".into(), ctx.target_client_id.clone());

        vars.insert("GIT_REPO".into(), ctx.git_repo.clone());
        vars.insert("GIT_BRANCH".into(), ctx.git_branch.clone());
        vars.insert("GIT_COMMIT".into(), ctx.git_commit.clone());
        vars.insert("GIT_TAG".into(), ctx.git_tag.clone());

        vars.insert("IMAGE_REGISTRY".into(), ctx.image_registry.clone());
        vars.insert("IMAGE_NAME".into(), ctx.image_name.clone());
        vars.insert("IMAGE_TAG".into(), ctx.image_tag.clone());
        if !ctx.image_registry.is_empty() && !ctx.image_name.is_empty() && !ctx.image_tag.is_empty()
        {
            vars.insert(
                "IMAGE_FULL".into(),
                format!("{}/{}:{}", ctx.image_registry, ctx.image_name, ctx.image_tag),
            );
        }
        vars.insert("CONTAINER_NAME".into(), ctx.container_name.clone());

        vars.insert("K8S_NAMESPACE".into(), ctx.k8s_namespace.clone());
        vars.insert("K8S_DEPLOYMENT".into(), ctx.k8s_deployment.clone());
        vars.insert("K8S_REPLICAS".into(), ctx.k8s_replicas.to_string());

        vars.insert("APP_DIR".into(), ctx.app_dir.clone());
        vars.insert("BACKUP_DIR".into(), ctx.backup_dir.clone());
        vars.insert("LOG_DIR".into(), ctx.log_dir.clone());
        // alias
        vars.insert("WORK_DIR".into(), ctx.app_dir.clone());

        vars.insert("CURRENT_VERSION".into(), ctx.current_version.clone());
        vars.insert("ROLLBACK_VERSION".into(), ctx.rollback_version.clone());

        for (k, v) in &ctx.custom {
            vars.insert(k.clone(), v.clone());
        }

        vars
    }
}

impl Default for VariableResolver {
    fn default() -> Self {
        Self::new()
    }
}
