use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::application::ConfigValue;
use crate::models::state::LifecycleState;

/// How a deployment endpoint is reached from outside the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessType {
    Subdomain,
    DomainPath,
    ClusterIpPath,
}

impl AccessType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessType::Subdomain => "subdomain",
            AccessType::DomainPath => "domain_path",
            AccessType::ClusterIpPath => "cluster_ip_path",
        }
    }

    pub fn parse(s: &str) -> Option<AccessType> {
        match s {
            "subdomain" => Some(AccessType::Subdomain),
            "domain_path" => Some(AccessType::DomainPath),
            "cluster_ip_path" => Some(AccessType::ClusterIpPath),
            _ => None,
        }
    }

    /// Subdomain and domain-path endpoints only make sense when the cluster
    /// owns a domain name.
    pub fn requires_domain(&self) -> bool {
        matches!(self, AccessType::Subdomain | AccessType::DomainPath)
    }
}

impl std::fmt::Display for AccessType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical form of an endpoint value, used for the cluster-wide
/// uniqueness check. Normalizing twice is a no-op.
pub fn normalize_endpoint_value(access_type: AccessType, value: &str) -> String {
    let trimmed = value.trim().to_ascii_lowercase();
    match access_type {
        AccessType::Subdomain => trimmed.replace('/', ""),
        AccessType::DomainPath | AccessType::ClusterIpPath => {
            let stripped = trimmed.trim_matches('/');
            if stripped.is_empty() {
                "/".to_string()
            } else {
                format!("/{}", stripped)
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub name: String,
    pub access_type: AccessType,
    pub value: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeBinding {
    /// Volume requirement name from the application descriptor.
    pub volume_name: String,
    pub pvc_name: String,
    pub size_gb: i32,
    /// True when the user bound a pre-existing volume instead of a fresh PVC.
    pub existing_volume: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Deployment {
    pub id: Uuid,
    pub cluster_id: Uuid,
    pub name: String,
    pub application: String,
    pub config: BTreeMap<String, ConfigValue>,
    pub pool_name: Option<String>,
    pub namespace: String,
    pub status: LifecycleState,
    pub error_message: Option<String>,
    pub installed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub endpoints: Vec<EndpointConfig>,
    pub volumes: Vec<VolumeBinding>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeploymentCreateRequest {
    pub name: String,
    pub application: String,
    #[serde(default)]
    pub config: BTreeMap<String, ConfigValue>,
    #[serde(default)]
    pub node_pool: Option<String>,
    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,
    #[serde(default)]
    pub volumes: Vec<VolumeBindingRequest>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VolumeBindingRequest {
    /// Volume requirement name from the application descriptor.
    pub name: String,
    #[serde(default)]
    pub size_gb: Option<i32>,
    /// Name of an existing volume to reuse instead of creating a PVC.
    #[serde(default)]
    pub existing_volume: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeploymentUpdateRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub config: Option<BTreeMap<String, ConfigValue>>,
    #[serde(default)]
    pub endpoints: Option<Vec<EndpointConfig>>,
}

#[derive(Debug, Serialize)]
pub struct DeploymentCreateResponse {
    pub id: Uuid,
    pub status: LifecycleState,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CredentialsResponse {
    pub username: String,
    pub password: String,
}

/// Body of the advisory `check-endpoint-existence` route. The same check
/// runs server-side at admission.
#[derive(Debug, Deserialize)]
pub struct EndpointCheckRequest {
    pub access_type: AccessType,
    pub value: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_adds_single_leading_slash() {
        assert_eq!(
            normalize_endpoint_value(AccessType::DomainPath, "grafana"),
            "/grafana"
        );
        assert_eq!(
            normalize_endpoint_value(AccessType::ClusterIpPath, "//spark/"),
            "/spark"
        );
    }

    #[test]
    fn normalization_is_idempotent() {
        for (ty, raw) in [
            (AccessType::Subdomain, "Airflow.Example.COM"),
            (AccessType::DomainPath, "/Grafana/"),
            (AccessType::ClusterIpPath, "prefect"),
        ] {
            let once = normalize_endpoint_value(ty, raw);
            let twice = normalize_endpoint_value(ty, &once);
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn subdomain_normalization_strips_slashes() {
        assert_eq!(
            normalize_endpoint_value(AccessType::Subdomain, "/airflow/"),
            "airflow"
        );
    }

    #[test]
    fn access_type_wire_format() {
        assert_eq!(
            serde_json::to_string(&AccessType::ClusterIpPath).unwrap(),
            r#""cluster_ip_path""#
        );
        assert_eq!(AccessType::parse("domain_path"), Some(AccessType::DomainPath));
        assert_eq!(AccessType::parse("bogus"), None);
    }
}
