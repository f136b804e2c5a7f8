use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::{
    AccessType, ConfigValue, Deployment, EndpointConfig, LifecycleState, VolumeBinding,
    normalize_endpoint_value,
};
use crate::store::Store;

#[derive(Debug, FromRow)]
struct DeploymentRow {
    id: Uuid,
    cluster_id: Uuid,
    name: String,
    application: String,
    config: serde_json::Value,
    pool_name: Option<String>,
    namespace: String,
    status: LifecycleState,
    error_message: Option<String>,
    installed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct EndpointRow {
    name: String,
    access_type: String,
    value: String,
    enabled: bool,
}

#[derive(Debug, FromRow)]
struct VolumeBindingRow {
    volume_name: String,
    pvc_name: String,
    size_gb: i32,
    existing_volume: bool,
}

/// Enabled endpoint of some deployment in a cluster, used for the
/// cluster-wide uniqueness check.
#[derive(Debug, FromRow)]
pub struct StoredEndpoint {
    pub deployment_id: Uuid,
    pub name: String,
    pub access_type: String,
    pub value: String,
}

pub struct NewDeployment {
    pub id: Uuid,
    pub cluster_id: Uuid,
    pub name: String,
    pub application: String,
    pub config: BTreeMap<String, ConfigValue>,
    pub pool_name: Option<String>,
    pub namespace: String,
    pub endpoints: Vec<EndpointConfig>,
    pub volumes: Vec<VolumeBinding>,
}

impl DeploymentRow {
    fn into_deployment(
        self,
        endpoints: Vec<EndpointConfig>,
        volumes: Vec<VolumeBinding>,
    ) -> Deployment {
        let config: BTreeMap<String, ConfigValue> =
            serde_json::from_value(self.config).unwrap_or_default();
        Deployment {
            id: self.id,
            cluster_id: self.cluster_id,
            name: self.name,
            application: self.application,
            config,
            pool_name: self.pool_name,
            namespace: self.namespace,
            status: self.status,
            error_message: self.error_message,
            installed_at: self.installed_at,
            created_at: self.created_at,
            endpoints,
            volumes,
        }
    }
}

impl Store {
    pub async fn create_deployment(&self, new: NewDeployment) -> Result<Uuid, sqlx::Error> {
        let mut tx = self.pool().begin().await?;

        sqlx::query(
            "INSERT INTO deployments \
             (id, cluster_id, name, application, config, pool_name, namespace, status) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, 'pending')",
        )
        .bind(new.id)
        .bind(new.cluster_id)
        .bind(&new.name)
        .bind(&new.application)
        .bind(serde_json::to_value(&new.config).unwrap_or_default())
        .bind(&new.pool_name)
        .bind(&new.namespace)
        .execute(&mut *tx)
        .await?;

        // The unique index over (cluster_id, access_type, normalized_value)
        // rejects a concurrent admission that raced past the advisory
        // check; the whole transaction rolls back.
        for ep in &new.endpoints {
            sqlx::query(
                "INSERT INTO deployment_endpoints \
                 (id, deployment_id, cluster_id, name, access_type, value, normalized_value, enabled) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            )
            .bind(Uuid::new_v4())
            .bind(new.id)
            .bind(new.cluster_id)
            .bind(&ep.name)
            .bind(ep.access_type.as_str())
            .bind(&ep.value)
            .bind(normalize_endpoint_value(ep.access_type, &ep.value))
            .bind(ep.enabled)
            .execute(&mut *tx)
            .await?;
        }

        for vol in &new.volumes {
            sqlx::query(
                "INSERT INTO deployment_volumes \
                 (id, deployment_id, volume_name, pvc_name, size_gb, existing_volume) \
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(Uuid::new_v4())
            .bind(new.id)
            .bind(&vol.volume_name)
            .bind(&vol.pvc_name)
            .bind(vol.size_gb)
            .bind(vol.existing_volume)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(new.id)
    }

    pub async fn get_deployment(&self, id: Uuid) -> Result<Option<Deployment>, sqlx::Error> {
        let row: Option<DeploymentRow> = sqlx::query_as(
            "SELECT id, cluster_id, name, application, config, pool_name, namespace, \
             status, error_message, installed_at, created_at \
             FROM deployments WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await?;

        match row {
            None => Ok(None),
            Some(row) => {
                let endpoints = self.deployment_endpoints(row.id).await?;
                let volumes = self.deployment_volumes(row.id).await?;
                Ok(Some(row.into_deployment(endpoints, volumes)))
            }
        }
    }

    pub async fn list_deployments(&self, cluster_id: Uuid) -> Result<Vec<Deployment>, sqlx::Error> {
        let rows: Vec<DeploymentRow> = sqlx::query_as(
            "SELECT id, cluster_id, name, application, config, pool_name, namespace, \
             status, error_message, installed_at, created_at \
             FROM deployments WHERE cluster_id = $1 ORDER BY created_at",
        )
        .bind(cluster_id)
        .fetch_all(self.pool())
        .await?;

        let mut deployments = Vec::with_capacity(rows.len());
        for row in rows {
            let endpoints = self.deployment_endpoints(row.id).await?;
            let volumes = self.deployment_volumes(row.id).await?;
            deployments.push(row.into_deployment(endpoints, volumes));
        }
        Ok(deployments)
    }

    async fn deployment_endpoints(&self, id: Uuid) -> Result<Vec<EndpointConfig>, sqlx::Error> {
        let rows: Vec<EndpointRow> = sqlx::query_as(
            "SELECT name, access_type, value, enabled \
             FROM deployment_endpoints WHERE deployment_id = $1 ORDER BY name",
        )
        .bind(id)
        .fetch_all(self.pool())
        .await?;

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                AccessType::parse(&row.access_type).map(|access_type| EndpointConfig {
                    name: row.name,
                    access_type,
                    value: row.value,
                    enabled: row.enabled,
                })
            })
            .collect())
    }

    async fn deployment_volumes(&self, id: Uuid) -> Result<Vec<VolumeBinding>, sqlx::Error> {
        let rows: Vec<VolumeBindingRow> = sqlx::query_as(
            "SELECT volume_name, pvc_name, size_gb, existing_volume \
             FROM deployment_volumes WHERE deployment_id = $1 ORDER BY volume_name",
        )
        .bind(id)
        .fetch_all(self.pool())
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| VolumeBinding {
                volume_name: row.volume_name,
                pvc_name: row.pvc_name,
                size_gb: row.size_gb,
                existing_volume: row.existing_volume,
            })
            .collect())
    }

    /// All enabled endpoints across a cluster's deployments.
    pub async fn cluster_endpoints(&self, cluster_id: Uuid) -> Result<Vec<StoredEndpoint>, sqlx::Error> {
        sqlx::query_as(
            "SELECT e.deployment_id, e.name, e.access_type, e.value \
             FROM deployment_endpoints e \
             JOIN deployments d ON d.id = e.deployment_id \
             WHERE d.cluster_id = $1 AND e.enabled",
        )
        .bind(cluster_id)
        .fetch_all(self.pool())
        .await
    }

    pub async fn set_deployment_status(
        &self,
        id: Uuid,
        status: LifecycleState,
        error: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE deployments SET status = $2, error_message = $3 WHERE id = $1")
            .bind(id)
            .bind(status)
            .bind(error)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn mark_deployment_running(&self, id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE deployments SET status = 'running', error_message = NULL, \
             installed_at = now() WHERE id = $1",
        )
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// The human label can change on update; the release name never does.
    pub async fn rename_deployment(&self, id: Uuid, name: &str) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE deployments SET name = $2 WHERE id = $1")
            .bind(id)
            .bind(name)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn update_deployment_config(
        &self,
        id: Uuid,
        cluster_id: Uuid,
        config: &BTreeMap<String, ConfigValue>,
        endpoints: &[EndpointConfig],
    ) -> Result<(), sqlx::Error> {
        let mut tx = self.pool().begin().await?;

        sqlx::query("UPDATE deployments SET config = $2 WHERE id = $1")
            .bind(id)
            .bind(serde_json::to_value(config).unwrap_or_default())
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM deployment_endpoints WHERE deployment_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        // Same endpoint-identity guarantee as on create: a conflicting
        // concurrent write trips the unique index and rolls this back.
        for ep in endpoints {
            sqlx::query(
                "INSERT INTO deployment_endpoints \
                 (id, deployment_id, cluster_id, name, access_type, value, normalized_value, enabled) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            )
            .bind(Uuid::new_v4())
            .bind(id)
            .bind(cluster_id)
            .bind(&ep.name)
            .bind(ep.access_type.as_str())
            .bind(&ep.value)
            .bind(normalize_endpoint_value(ep.access_type, &ep.value))
            .bind(ep.enabled)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn delete_deployment_row(&self, id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM deployments WHERE id = $1")
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }
}
