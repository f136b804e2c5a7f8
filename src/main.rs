use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use datainfrapilot_backend::catalog::Catalog;
use datainfrapilot_backend::config::Config;
use datainfrapilot_backend::handlers::{
    application_handler, cluster_handler, deployment_handler, health_handler, proxy_handler,
    volume_handler,
};
use datainfrapilot_backend::orchestrator::Orchestrator;
use datainfrapilot_backend::render::Renderer;
use datainfrapilot_backend::store::Store;
use datainfrapilot_backend::{AppState, Services};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    info!("starting datainfrapilot backend");

    // Startup failures are unrecoverable: an unreachable store or a broken
    // template set must take the process down with a non-zero exit.
    let store = match Store::connect(&config.database_url).await {
        Ok(store) => store,
        Err(e) => {
            eprintln!("failed to connect to the store: {:#}", e);
            return Err(e.into());
        }
    };
    if let Err(e) = store.migrate().await {
        eprintln!("failed to run migrations: {:#}", e);
        return Err(e.into());
    }

    let renderer = match Renderer::new() {
        Ok(renderer) => renderer,
        Err(e) => {
            eprintln!("template set is malformed: {}", e);
            return Err(e.into());
        }
    };

    let services = Arc::new(Services {
        config: config.clone(),
        store,
        catalog: Catalog::new(),
        renderer,
    });

    let orchestrator = Orchestrator::new(services.clone());
    orchestrator.start_reconciler();

    let app_state = AppState {
        services,
        orchestrator,
    };

    let app = Router::new()
        .route("/health", get(health_handler::health_check))
        .route(
            "/clusters/",
            get(cluster_handler::list_clusters).post(cluster_handler::create_cluster),
        )
        .route(
            "/clusters/:cluster_id",
            get(cluster_handler::get_cluster).delete(cluster_handler::delete_cluster),
        )
        .route(
            "/clusters/:cluster_id/kubeconfig",
            get(cluster_handler::get_kubeconfig),
        )
        .route(
            "/clusters/:cluster_id/deployments",
            get(deployment_handler::list_deployments).post(deployment_handler::create_deployment),
        )
        .route(
            "/clusters/:cluster_id/deployments/check-endpoint-existence",
            post(deployment_handler::check_endpoint_existence),
        )
        .route(
            "/clusters/:cluster_id/deployments/:deployment_id",
            get(deployment_handler::get_deployment)
                .post(deployment_handler::update_deployment)
                .delete(deployment_handler::delete_deployment),
        )
        .route(
            "/clusters/:cluster_id/deployments/:deployment_id/credentials",
            get(deployment_handler::get_credentials),
        )
        .route("/applications/", get(application_handler::list_applications))
        .route(
            "/applications/:application_id/versions",
            get(application_handler::list_versions),
        )
        .route(
            "/applications/:application_id/access_endpoints",
            get(application_handler::list_access_endpoints),
        )
        .route(
            "/volumes/",
            get(volume_handler::list_volumes).post(volume_handler::create_volume),
        )
        .route("/volumes/:volume_id", delete(volume_handler::delete_volume))
        .route(
            "/deployments/proxy-health-check",
            get(proxy_handler::proxy_health_check),
        )
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(
                    CorsLayer::new()
                        .allow_origin(Any)
                        .allow_methods(Any)
                        .allow_headers(Any),
                ),
        )
        .with_state(app_state);

    let listener = tokio::net::TcpListener::bind(&config.server_address).await?;
    info!("listening on {}", config.server_address);
    axum::serve(listener, app).await?;

    Ok(())
}
