//! Command lifecycle types
//!
//! A Command is one unit of work dispatched to a single remote agent. It is
//! owned by the command tracker and mutated only through its status-update
//! path; status only advances toward a terminal state, never backwards.

use crate::ids::CommandId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Execute a deployment script on the agent
pub const CMD_RELEASE_EXECUTE: &str = "release.execute";
/// Check whether an application is installed under a work directory
pub const CMD_RELEASE_CHECK: &str = "release.check";
/// Deploy a container image
pub const CMD_CONTAINER_DEPLOY: &str = "container.deploy";
/// Apply or update Kubernetes resources
pub const CMD_K8S_DEPLOY: &str = "k8s.deploy";
/// Deploy by pulling from a Git repository
pub const CMD_GITPULL_DEPLOY: &str = "gitpull.deploy";
/// Query tags/branches/commits of a Git repository
pub const CMD_GIT_VERSIONS: &str = "git.versions";

/// Command execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    /// Dispatched, waiting for the agent to pick it up
    Pending,
    /// The agent reported it is executing
    Executing,
    /// Finished successfully
    Completed,
    /// The agent reported a failure
    Failed,
    /// No terminal acknowledgment arrived within budget
    Timeout,
    /// Cancelled locally; the remote side is not recalled
    Cancelled,
}

impl CommandStatus {
    /// Whether no further transition can occur
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Timeout | Self::Cancelled
        )
    }
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// A tracked command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    /// Command id; also the wire message id
    #[serde(rename = "command_id")]
    pub id: CommandId,

    /// Target agent this command was sent to
    pub target_id: String,

    /// Command type, e.g. `release.execute`
    pub command_type: String,

    /// Raw JSON parameters
    pub payload: serde_json::Value,

    /// Current status
    pub status: CommandStatus,

    /// Raw JSON result, present once the agent acknowledged
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,

    /// Error message for failed/timed-out commands
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Creation time
    pub created_at: chrono::DateTime<chrono::Utc>,

    /// Time the transport accepted the message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<chrono::DateTime<chrono::Utc>>,

    /// Time a terminal status was recorded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,

    /// Acknowledgment budget granted to the agent
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
}

/// Body placed in the wire message payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandPayload {
    pub command_type: String,
    pub payload: serde_json::Value,
}

/// Serde helper for Duration as whole seconds
pub(crate) mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
