// Persistence layer. The store is the single source of truth: orchestrators
// read desired state from here, do the work, and write actual state back.

mod clusters;
mod deployments;
mod volumes;

pub use clusters::{ClusterSecrets, NewCluster, NewPool};
pub use deployments::{NewDeployment, StoredEndpoint};
pub use volumes::NewVolume;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

#[derive(Clone)]
pub struct Store {
    pool: PgPool,
}

impl Store {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .context("failed to connect to database")?;

        Ok(Store { pool })
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("failed to run database migrations")?;

        Ok(())
    }

    pub(crate) fn pool(&self) -> &PgPool {
        &self.pool
    }
}
