use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::deployment::Deployment;
use crate::models::state::LifecycleState;

pub const MIN_POOL_NODES: i32 = 1;
pub const MAX_POOL_NODES: i32 = 20;
pub const MIN_AUTOSCALE: i32 = 0;
pub const MAX_AUTOSCALE: i32 = 10;

/// Cluster row joined with its pools and deployments.
///
/// Provider credentials and the cached kubeconfig are intentionally absent:
/// they never leave the store through a query response.
#[derive(Debug, Clone, Serialize)]
pub struct Cluster {
    pub id: Uuid,
    pub name: String,
    pub provider: String,
    pub k3s_version: String,
    pub domain_name: Option<String>,
    pub access_ip: Option<String>,
    pub additional_components: AdditionalComponents,
    pub status: LifecycleState,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub pools: Vec<Pool>,
    pub deployments: Vec<Deployment>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Pool {
    pub id: Uuid,
    pub cluster_id: Uuid,
    pub name: String,
    pub node_type: String,
    pub region: String,
    pub control_plane: bool,
    pub node_count: Option<i32>,
    pub autoscale_min: Option<i32>,
    pub autoscale_max: Option<i32>,
}

impl Pool {
    /// Number of servers the pool starts with. Autoscaled pools begin at
    /// their minimum.
    pub fn initial_node_count(&self) -> i32 {
        self.node_count
            .or(self.autoscale_min)
            .unwrap_or(MIN_POOL_NODES)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdditionalComponents {
    #[serde(default)]
    pub traefik_dashboard: Option<TraefikDashboardConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraefikDashboardConfig {
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    // Persisted with the cluster row; the store strips it from every read
    // model before it can reach a query response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ClusterCreateRequest {
    pub name: String,
    pub provider: String,
    pub k3s_version: String,
    /// Opaque provider credentials (e.g. the Hetzner API token).
    pub provider_config: serde_json::Value,
    #[serde(default)]
    pub domain_name: Option<String>,
    pub pools: Vec<PoolCreateRequest>,
    #[serde(default)]
    pub additional_components: AdditionalComponents,
}

#[derive(Debug, Deserialize)]
pub struct PoolCreateRequest {
    pub name: String,
    pub node_type: String,
    pub region: String,
    /// Fixed node count. The UI sends this as a string, so both forms are
    /// accepted on the wire.
    #[serde(default, deserialize_with = "node_count_from_wire")]
    pub number_of_nodes: Option<i32>,
    #[serde(default)]
    pub autoscale: Option<AutoscaleRange>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AutoscaleRange {
    pub min: i32,
    pub max: i32,
}

#[derive(Debug, Serialize)]
pub struct ClusterCreateResponse {
    pub name: String,
    pub status: LifecycleState,
}

fn node_count_from_wire<'de, D>(deserializer: D) -> Result<Option<i32>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(i32),
        Str(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Int(n)) => Ok(Some(n)),
        Some(Raw::Str(s)) => s
            .trim()
            .parse::<i32>()
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

/// DNS-label check used for cluster and deployment names.
pub fn is_valid_dns_label(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 63
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !name.starts_with('-')
        && !name.ends_with('-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_count_accepts_string_and_int() {
        let p: PoolCreateRequest = serde_json::from_str(
            r#"{"name":"workers","node_type":"cx32","region":"fsn1","number_of_nodes":"2"}"#,
        )
        .unwrap();
        assert_eq!(p.number_of_nodes, Some(2));

        let p: PoolCreateRequest = serde_json::from_str(
            r#"{"name":"workers","node_type":"cx32","region":"fsn1","number_of_nodes":2}"#,
        )
        .unwrap();
        assert_eq!(p.number_of_nodes, Some(2));
    }

    #[test]
    fn dns_label_rules() {
        assert!(is_valid_dns_label("prod"));
        assert!(is_valid_dns_label("my-cluster-1"));
        assert!(!is_valid_dns_label(""));
        assert!(!is_valid_dns_label("Prod"));
        assert!(!is_valid_dns_label("under_score"));
        assert!(!is_valid_dns_label("-edge"));
        assert!(!is_valid_dns_label(&"a".repeat(64)));
    }
}
