use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::{AdditionalComponents, Cluster, LifecycleState, Pool};
use crate::store::Store;

#[derive(Debug, FromRow)]
struct ClusterRow {
    id: Uuid,
    name: String,
    provider: String,
    k3s_version: String,
    domain_name: Option<String>,
    access_ip: Option<String>,
    additional_components: serde_json::Value,
    status: LifecycleState,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
}

impl ClusterRow {
    fn into_cluster(self, pools: Vec<Pool>, deployments: Vec<crate::models::Deployment>) -> Cluster {
        let mut additional_components: AdditionalComponents =
            serde_json::from_value(self.additional_components).unwrap_or_default();
        // Credentials never leave the store through a read model.
        if let Some(dashboard) = additional_components.traefik_dashboard.as_mut() {
            dashboard.password = None;
        }
        Cluster {
            id: self.id,
            name: self.name,
            provider: self.provider,
            k3s_version: self.k3s_version,
            domain_name: self.domain_name,
            access_ip: self.access_ip,
            additional_components,
            status: self.status,
            error_message: self.error_message,
            created_at: self.created_at,
            pools,
            deployments,
        }
    }
}

pub struct NewCluster {
    pub id: Uuid,
    pub name: String,
    pub provider: String,
    pub provider_config: serde_json::Value,
    pub k3s_version: String,
    pub domain_name: Option<String>,
    pub additional_components: AdditionalComponents,
    pub pools: Vec<NewPool>,
}

pub struct NewPool {
    pub name: String,
    pub node_type: String,
    pub region: String,
    pub control_plane: bool,
    pub node_count: Option<i32>,
    pub autoscale_min: Option<i32>,
    pub autoscale_max: Option<i32>,
}

/// Credential-bearing fields, read only by the orchestrators.
#[derive(Debug, FromRow)]
pub struct ClusterSecrets {
    pub provider: String,
    pub provider_config: serde_json::Value,
    pub kubeconfig: Option<String>,
    /// Raw addon config, password included.
    pub additional_components: serde_json::Value,
}

impl Store {
    /// Insert the cluster and its pools in one transaction. The row starts
    /// in `pending`; the orchestrator moves it forward.
    pub async fn create_cluster(&self, new: NewCluster) -> Result<Uuid, sqlx::Error> {
        let mut tx = self.pool().begin().await?;

        sqlx::query(
            "INSERT INTO clusters \
             (id, name, provider, provider_config, k3s_version, domain_name, additional_components, status) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, 'pending')",
        )
        .bind(new.id)
        .bind(&new.name)
        .bind(&new.provider)
        .bind(&new.provider_config)
        .bind(&new.k3s_version)
        .bind(&new.domain_name)
        .bind(serde_json::to_value(&new.additional_components).unwrap_or_default())
        .execute(&mut *tx)
        .await?;

        for pool in &new.pools {
            sqlx::query(
                "INSERT INTO pools \
                 (id, cluster_id, name, node_type, region, control_plane, node_count, autoscale_min, autoscale_max) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
            )
            .bind(Uuid::new_v4())
            .bind(new.id)
            .bind(&pool.name)
            .bind(&pool.node_type)
            .bind(&pool.region)
            .bind(pool.control_plane)
            .bind(pool.node_count)
            .bind(pool.autoscale_min)
            .bind(pool.autoscale_max)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(new.id)
    }

    pub async fn list_clusters(&self) -> Result<Vec<Cluster>, sqlx::Error> {
        let rows: Vec<ClusterRow> = sqlx::query_as(
            "SELECT id, name, provider, k3s_version, domain_name, access_ip, \
             additional_components, status, error_message, created_at \
             FROM clusters ORDER BY created_at",
        )
        .fetch_all(self.pool())
        .await?;

        let mut clusters = Vec::with_capacity(rows.len());
        for row in rows {
            let pools = self.list_pools(row.id).await?;
            let deployments = self.list_deployments(row.id).await?;
            clusters.push(row.into_cluster(pools, deployments));
        }
        Ok(clusters)
    }

    pub async fn get_cluster(&self, id: Uuid) -> Result<Option<Cluster>, sqlx::Error> {
        let row: Option<ClusterRow> = sqlx::query_as(
            "SELECT id, name, provider, k3s_version, domain_name, access_ip, \
             additional_components, status, error_message, created_at \
             FROM clusters WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await?;

        match row {
            None => Ok(None),
            Some(row) => {
                let pools = self.list_pools(row.id).await?;
                let deployments = self.list_deployments(row.id).await?;
                Ok(Some(row.into_cluster(pools, deployments)))
            }
        }
    }

    pub async fn list_pools(&self, cluster_id: Uuid) -> Result<Vec<Pool>, sqlx::Error> {
        sqlx::query_as(
            "SELECT id, cluster_id, name, node_type, region, control_plane, \
             node_count, autoscale_min, autoscale_max \
             FROM pools WHERE cluster_id = $1 ORDER BY control_plane DESC, name",
        )
        .bind(cluster_id)
        .fetch_all(self.pool())
        .await
    }

    pub async fn get_cluster_secrets(&self, id: Uuid) -> Result<Option<ClusterSecrets>, sqlx::Error> {
        sqlx::query_as(
            "SELECT provider, provider_config, kubeconfig, additional_components \
             FROM clusters WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await
    }

    pub async fn cluster_status(&self, id: Uuid) -> Result<Option<LifecycleState>, sqlx::Error> {
        let status: Option<(LifecycleState,)> =
            sqlx::query_as("SELECT status FROM clusters WHERE id = $1")
                .bind(id)
                .fetch_optional(self.pool())
                .await?;
        Ok(status.map(|(s,)| s))
    }

    /// Status and error message always move together.
    pub async fn set_cluster_status(
        &self,
        id: Uuid,
        status: LifecycleState,
        error: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE clusters SET status = $2, error_message = $3 WHERE id = $1")
            .bind(id)
            .bind(status)
            .bind(error)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Terminal success: `running` plus the access IP and kubeconfig in a
    /// single write.
    pub async fn mark_cluster_running(
        &self,
        id: Uuid,
        access_ip: &str,
        kubeconfig: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE clusters SET status = 'running', access_ip = $2, kubeconfig = $3, \
             error_message = NULL WHERE id = $1",
        )
        .bind(id)
        .bind(access_ip)
        .bind(kubeconfig)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Removes the cluster and, via cascades, its pools, deployments,
    /// endpoint rows and volume bindings in the same transaction.
    pub async fn delete_cluster_row(&self, id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM clusters WHERE id = $1")
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Clusters whose state machines have not reached a terminal state.
    pub async fn clusters_in_flight(&self) -> Result<Vec<(Uuid, String, LifecycleState)>, sqlx::Error> {
        sqlx::query_as(
            "SELECT id, name, status FROM clusters \
             WHERE status NOT IN ('running', 'failed')",
        )
        .fetch_all(self.pool())
        .await
    }
}
