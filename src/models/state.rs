use serde::{Deserialize, Serialize};

/// Lifecycle state shared by clusters, deployments and volumes.
///
/// `running` and `failed` are terminal; `failed` still allows deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "lifecycle_state", rename_all = "lowercase")]
pub enum LifecycleState {
    Pending,
    Creating,
    Running,
    Updating,
    Deploying,
    Failed,
    Deleting,
}

impl LifecycleState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LifecycleState::Running | LifecycleState::Failed)
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LifecycleState::Pending => "pending",
            LifecycleState::Creating => "creating",
            LifecycleState::Running => "running",
            LifecycleState::Updating => "updating",
            LifecycleState::Deploying => "deploying",
            LifecycleState::Failed => "failed",
            LifecycleState::Deleting => "deleting",
        };
        write!(f, "{}", s)
    }
}
