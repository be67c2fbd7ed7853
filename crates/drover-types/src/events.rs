//! Engine event stream types

use crate::ids::ReleaseId;
use crate::release::{ReleaseStatus, TargetResult};
use serde::{Deserialize, Serialize};

/// Events emitted by the release engine over its broadcast channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ReleaseEvent {
    /// A release changed status
    StatusChanged {
        release_id: ReleaseId,
        status: ReleaseStatus,
    },

    /// A target result within a release was updated
    TargetUpdated {
        release_id: ReleaseId,
        target_id: String,
        result: TargetResult,
    },
}
