use uuid::Uuid;

use crate::models::{LifecycleState, Volume};
use crate::store::Store;

pub struct NewVolume {
    pub id: Uuid,
    pub name: String,
    pub provider: String,
    pub provider_config: serde_json::Value,
    pub region: String,
    pub size_gb: i32,
    pub description: Option<String>,
}

impl Store {
    pub async fn create_volume(&self, new: NewVolume) -> Result<Uuid, sqlx::Error> {
        sqlx::query(
            "INSERT INTO volumes (id, name, provider, provider_config, region, size_gb, description, status) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, 'pending')",
        )
        .bind(new.id)
        .bind(&new.name)
        .bind(&new.provider)
        .bind(&new.provider_config)
        .bind(&new.region)
        .bind(new.size_gb)
        .bind(&new.description)
        .execute(self.pool())
        .await?;
        Ok(new.id)
    }

    /// Credentials blob for provider-side volume operations; never leaves
    /// the store through a query response.
    pub async fn volume_provider_config(&self, id: Uuid) -> Result<Option<serde_json::Value>, sqlx::Error> {
        let row: Option<(serde_json::Value,)> =
            sqlx::query_as("SELECT provider_config FROM volumes WHERE id = $1")
                .bind(id)
                .fetch_optional(self.pool())
                .await?;
        Ok(row.map(|(v,)| v))
    }

    pub async fn list_volumes(&self) -> Result<Vec<Volume>, sqlx::Error> {
        sqlx::query_as(
            "SELECT id, name, provider, provider_id, region, size_gb, status, \
             error_message, description, in_use_count, created_at \
             FROM volumes ORDER BY created_at",
        )
        .fetch_all(self.pool())
        .await
    }

    pub async fn get_volume(&self, id: Uuid) -> Result<Option<Volume>, sqlx::Error> {
        sqlx::query_as(
            "SELECT id, name, provider, provider_id, region, size_gb, status, \
             error_message, description, in_use_count, created_at \
             FROM volumes WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await
    }

    pub async fn get_volume_by_name(&self, name: &str) -> Result<Option<Volume>, sqlx::Error> {
        sqlx::query_as(
            "SELECT id, name, provider, provider_id, region, size_gb, status, \
             error_message, description, in_use_count, created_at \
             FROM volumes WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(self.pool())
        .await
    }

    pub async fn set_volume_status(
        &self,
        id: Uuid,
        status: LifecycleState,
        error: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE volumes SET status = $2, error_message = $3 WHERE id = $1")
            .bind(id)
            .bind(status)
            .bind(error)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn mark_volume_running(&self, id: Uuid, provider_id: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE volumes SET status = 'running', provider_id = $2, error_message = NULL \
             WHERE id = $1",
        )
        .bind(id)
        .bind(provider_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Reserve the volume for a deployment binding. The increment only
    /// succeeds while the volume is `running`, so a delete that already
    /// moved it to `deleting` cannot be bound against.
    pub async fn acquire_volume(&self, name: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE volumes SET in_use_count = in_use_count + 1 \
             WHERE name = $1 AND status = 'running'",
        )
        .bind(name)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Move the volume into `deleting`, but only while nothing references
    /// it. Returns false when a binding exists or a delete already started;
    /// together with `acquire_volume` this closes the bind/delete race.
    pub async fn begin_volume_delete(&self, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE volumes SET status = 'deleting', error_message = NULL \
             WHERE id = $1 AND in_use_count = 0 AND status <> 'deleting'",
        )
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// In-use tracking is a reference count: one per deployment binding the
    /// volume. This is the release side; the count never drops below zero.
    pub async fn adjust_volume_in_use(&self, name: &str, delta: i32) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE volumes SET in_use_count = GREATEST(in_use_count + $2, 0) WHERE name = $1",
        )
        .bind(name)
        .bind(delta)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn delete_volume_row(&self, id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM volumes WHERE id = $1")
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }
}
