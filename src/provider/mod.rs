// IaaS capability layer. Each cloud is a separate implementation behind the
// `Provider` trait, selected by the cluster's `provider` field.

mod hetzner;
mod retry;

pub use hetzner::HetznerProvider;
pub use retry::RetryBackoff;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::error::ApiError;

/// Labels stamped on every provider resource so teardown can walk them even
/// after a partial create.
pub const LABEL_CLUSTER: &str = "dip/cluster";
pub const LABEL_ROLE: &str = "dip/role";
pub const LABEL_POOL: &str = "dip/pool";

pub const ROLE_CONTROL_PLANE: &str = "control-plane";
pub const ROLE_WORKER: &str = "worker";

pub fn cluster_labels(cluster_id: Uuid, role: &str, pool: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_CLUSTER.to_string(), cluster_id.to_string()),
        (LABEL_ROLE.to_string(), role.to_string()),
        (LABEL_POOL.to_string(), pool.to_string()),
    ])
}

pub fn cluster_selector(cluster_id: Uuid) -> String {
    format!("{}={}", LABEL_CLUSTER, cluster_id)
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("authentication rejected: {0}")]
    Auth(String),

    #[error("quota exceeded: {0}")]
    Quota(String),

    #[error("api error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("retry budget exhausted: {0}")]
    RetriesExhausted(String),
}

impl ProviderError {
    /// Transient failures are retried inside the driver; everything else is
    /// surfaced immediately and fails the running step.
    pub fn is_retriable(&self) -> bool {
        match self {
            ProviderError::Transport(_) => true,
            ProviderError::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

impl From<ProviderError> for ApiError {
    fn from(err: ProviderError) -> Self {
        ApiError::Provider(err.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct ServerSpec {
    pub name: String,
    pub server_type: String,
    pub region: String,
    pub image: String,
    pub user_data: String,
    pub labels: BTreeMap<String, String>,
    pub ssh_key_id: i64,
    pub network_id: Option<i64>,
    pub firewall_id: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub id: i64,
    pub name: String,
    pub public_ip: String,
    pub status: String,
}

#[derive(Debug, Clone)]
pub struct VolumeInfo {
    pub id: i64,
    pub name: String,
    pub size_gb: i32,
    pub labels: BTreeMap<String, String>,
}

/// Volumes carrying this label survive cluster teardown.
pub const LABEL_RETAIN: &str = "dip/retain";

impl VolumeInfo {
    pub fn retained(&self) -> bool {
        self.labels.get(LABEL_RETAIN).map(String::as_str) == Some("true")
    }
}

#[async_trait]
pub trait Provider: Send + Sync + std::fmt::Debug {
    /// Register the control plane's SSH key; an existing key with the same
    /// name is adopted.
    async fn ensure_ssh_key(&self, name: &str, public_key: &str) -> Result<i64, ProviderError>;

    async fn ensure_network(
        &self,
        name: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<i64, ProviderError>;

    async fn ensure_firewall(
        &self,
        name: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<i64, ProviderError>;

    async fn create_server(&self, spec: &ServerSpec) -> Result<ServerInfo, ProviderError>;

    async fn delete_server(&self, id: i64) -> Result<(), ProviderError>;

    async fn server_status(&self, id: i64) -> Result<String, ProviderError>;

    async fn list_servers(&self, label_selector: &str) -> Result<Vec<ServerInfo>, ProviderError>;

    async fn create_volume(
        &self,
        name: &str,
        size_gb: i32,
        region: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<VolumeInfo, ProviderError>;

    async fn delete_volume(&self, id: i64) -> Result<(), ProviderError>;

    async fn attach_volume(&self, volume_id: i64, server_id: i64) -> Result<(), ProviderError>;

    async fn detach_volume(&self, volume_id: i64) -> Result<(), ProviderError>;

    async fn list_volumes(&self, label_selector: &str) -> Result<Vec<VolumeInfo>, ProviderError>;

    async fn list_networks(&self, label_selector: &str) -> Result<Vec<i64>, ProviderError>;

    async fn delete_network(&self, id: i64) -> Result<(), ProviderError>;

    async fn list_firewalls(&self, label_selector: &str) -> Result<Vec<i64>, ProviderError>;

    async fn delete_firewall(&self, id: i64) -> Result<(), ProviderError>;
}

/// Build the driver for a cluster's provider. Providers the catalog admits
/// but the backend does not implement are a validation error, not a guess.
pub fn provider_for(
    name: &str,
    provider_config: &serde_json::Value,
    timeout: Duration,
) -> Result<Arc<dyn Provider>, ApiError> {
    match name {
        "hetzner" => {
            let token = provider_config
                .get("token")
                .and_then(|t| t.as_str())
                .ok_or_else(|| {
                    ApiError::Validation("provider_config.token is required for hetzner".to_string())
                })?;
            Ok(Arc::new(HetznerProvider::new(token, timeout)))
        }
        "digitalocean" => Err(ApiError::Validation(
            "provider 'digitalocean' is not implemented".to_string(),
        )),
        other => Err(ApiError::Validation(format!("unknown provider '{}'", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_carry_cluster_and_pool() {
        let id = Uuid::new_v4();
        let labels = cluster_labels(id, ROLE_WORKER, "workers");
        assert_eq!(labels.get(LABEL_CLUSTER), Some(&id.to_string()));
        assert_eq!(labels.get(LABEL_ROLE), Some(&"worker".to_string()));
        assert_eq!(labels.get(LABEL_POOL), Some(&"workers".to_string()));
    }

    #[test]
    fn digitalocean_is_rejected_not_guessed() {
        let err = provider_for(
            "digitalocean",
            &serde_json::json!({"token": "x"}),
            Duration::from_secs(5),
        )
        .unwrap_err();
        assert_eq!(err.code(), "validation_error");
    }

    #[test]
    fn retriability_classification() {
        assert!(ProviderError::Api { status: 429, message: String::new() }.is_retriable());
        assert!(ProviderError::Api { status: 503, message: String::new() }.is_retriable());
        assert!(!ProviderError::Api { status: 404, message: String::new() }.is_retriable());
        assert!(!ProviderError::Auth("denied".into()).is_retriable());
        assert!(ProviderError::Transport("reset".into()).is_retriable());
    }
}
