use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use tracing::info;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::models::{
    is_valid_dns_label, Cluster, ClusterCreateRequest, ClusterCreateResponse, LifecycleState,
    MAX_AUTOSCALE, MAX_POOL_NODES, MIN_AUTOSCALE, MIN_POOL_NODES,
};
use crate::orchestrator::ClusterCommand;
use crate::provider::provider_for;
use crate::store::{NewCluster, NewPool};
use crate::AppState;

pub async fn list_clusters(State(state): State<AppState>) -> ApiResult<Json<Vec<Cluster>>> {
    let clusters = state.services.store.list_clusters().await?;
    Ok(Json(clusters))
}

pub async fn get_cluster(
    State(state): State<AppState>,
    Path(cluster_id): Path<Uuid>,
) -> ApiResult<Json<Cluster>> {
    let cluster = state
        .services
        .store
        .get_cluster(cluster_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("cluster".to_string()))?;
    Ok(Json(cluster))
}

pub async fn create_cluster(
    State(state): State<AppState>,
    Json(payload): Json<ClusterCreateRequest>,
) -> ApiResult<(StatusCode, Json<ClusterCreateResponse>)> {
    info!(cluster = %payload.name, provider = %payload.provider, "cluster create requested");

    if !is_valid_dns_label(&payload.name) {
        return Err(ApiError::Validation(
            "cluster name must be a DNS label (1-63 chars of [a-z0-9-])".to_string(),
        ));
    }

    // Fails fast on unknown and unimplemented providers and on credential
    // blobs the driver cannot use.
    provider_for(
        &payload.provider,
        &payload.provider_config,
        state.services.config.provider_timeout,
    )?;

    let pools = validate_pools(&payload)?;

    let cluster_id = Uuid::new_v4();
    state
        .services
        .store
        .create_cluster(NewCluster {
            id: cluster_id,
            name: payload.name.clone(),
            provider: payload.provider.clone(),
            provider_config: payload.provider_config.clone(),
            k3s_version: payload.k3s_version.clone(),
            domain_name: payload.domain_name.clone(),
            additional_components: payload.additional_components.clone(),
            pools,
        })
        .await
        .map_err(|e| match ApiError::from(e) {
            ApiError::Conflict(_) => {
                ApiError::Conflict(format!("cluster '{}' already exists", payload.name))
            }
            other => other,
        })?;

    state
        .orchestrator
        .submit(cluster_id, ClusterCommand::CreateCluster)?;

    Ok((
        StatusCode::CREATED,
        Json(ClusterCreateResponse {
            name: payload.name,
            status: LifecycleState::Creating,
        }),
    ))
}

fn validate_pools(payload: &ClusterCreateRequest) -> ApiResult<Vec<NewPool>> {
    if payload.pools.is_empty() {
        return Err(ApiError::Validation(
            "a cluster needs at least a control-plane pool".to_string(),
        ));
    }

    let mut pools = Vec::with_capacity(payload.pools.len());
    for (index, pool) in payload.pools.iter().enumerate() {
        if !is_valid_dns_label(&pool.name) {
            return Err(ApiError::Validation(format!(
                "pool name '{}' must be a DNS label",
                pool.name
            )));
        }

        // The first pool is the control plane: exactly one node, never
        // autoscaled.
        let control_plane = index == 0;
        if control_plane {
            if pool.autoscale.is_some() {
                return Err(ApiError::Validation(
                    "the control-plane pool cannot be autoscaled".to_string(),
                ));
            }
            if pool.number_of_nodes.unwrap_or(1) != 1 {
                return Err(ApiError::Validation(
                    "the control-plane pool must have exactly one node".to_string(),
                ));
            }
            pools.push(NewPool {
                name: pool.name.clone(),
                node_type: pool.node_type.clone(),
                region: pool.region.clone(),
                control_plane: true,
                node_count: Some(1),
                autoscale_min: None,
                autoscale_max: None,
            });
            continue;
        }

        match pool.autoscale {
            Some(range) => {
                let min = range.min.clamp(MIN_AUTOSCALE, MAX_AUTOSCALE);
                let max = range.max.clamp(1, MAX_AUTOSCALE);
                if min > max {
                    return Err(ApiError::Validation(format!(
                        "pool '{}': autoscale min must not exceed max",
                        pool.name
                    )));
                }
                pools.push(NewPool {
                    name: pool.name.clone(),
                    node_type: pool.node_type.clone(),
                    region: pool.region.clone(),
                    control_plane: false,
                    node_count: None,
                    autoscale_min: Some(min),
                    autoscale_max: Some(max),
                });
            }
            None => {
                let count = pool
                    .number_of_nodes
                    .unwrap_or(MIN_POOL_NODES)
                    .clamp(MIN_POOL_NODES, MAX_POOL_NODES);
                pools.push(NewPool {
                    name: pool.name.clone(),
                    node_type: pool.node_type.clone(),
                    region: pool.region.clone(),
                    control_plane: false,
                    node_count: Some(count),
                    autoscale_min: None,
                    autoscale_max: None,
                });
            }
        }
    }

    Ok(pools)
}

pub async fn delete_cluster(
    State(state): State<AppState>,
    Path(cluster_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let status = state
        .services
        .store
        .cluster_status(cluster_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("cluster".to_string()))?;

    info!(%cluster_id, %status, "cluster delete requested");
    state
        .orchestrator
        .submit(cluster_id, ClusterCommand::DeleteCluster)?;

    Ok(StatusCode::ACCEPTED)
}

pub async fn get_kubeconfig(
    State(state): State<AppState>,
    Path(cluster_id): Path<Uuid>,
) -> ApiResult<Response> {
    let status = state
        .services
        .store
        .cluster_status(cluster_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("cluster".to_string()))?;

    if status != LifecycleState::Running {
        return Err(ApiError::Conflict("cluster is not running".to_string()));
    }

    let secrets = state
        .services
        .store
        .get_cluster_secrets(cluster_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("cluster".to_string()))?;
    let kubeconfig = secrets
        .kubeconfig
        .ok_or_else(|| ApiError::Conflict("cluster has no kubeconfig".to_string()))?;

    Ok((
        [(header::CONTENT_TYPE, "application/yaml")],
        kubeconfig,
    )
        .into_response())
}
