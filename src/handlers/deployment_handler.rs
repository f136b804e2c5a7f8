use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::catalog;
use crate::error::{ApiError, ApiResult};
use crate::models::{
    is_valid_dns_label, Cluster, CredentialsResponse, Deployment, DeploymentCreateRequest,
    DeploymentCreateResponse, DeploymentUpdateRequest, EndpointCheckRequest, EndpointConfig,
    LifecycleState, VolumeBinding, MAX_VOLUME_GB, MIN_VOLUME_GB, normalize_endpoint_value,
};
use crate::orchestrator::{endpoint_taken, read_credentials, ClusterCommand};
use crate::store::NewDeployment;
use crate::AppState;

async fn running_cluster(state: &AppState, cluster_id: Uuid) -> ApiResult<Cluster> {
    let cluster = state
        .services
        .store
        .get_cluster(cluster_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("cluster".to_string()))?;
    if cluster.status != LifecycleState::Running {
        return Err(ApiError::Conflict("cluster is not running".to_string()));
    }
    Ok(cluster)
}

async fn release_volumes(state: &AppState, names: &[&str]) {
    for name in names {
        if let Err(e) = state.services.store.adjust_volume_in_use(name, -1).await {
            warn!(volume = %name, error = %e, "failed to release volume reservation");
        }
    }
}

/// Insert failures carry the violated constraint: the endpoint identity
/// index and the deployment name both surface as 409, with different
/// messages.
fn map_deployment_insert_error(err: sqlx::Error, name: &str) -> ApiError {
    if let sqlx::Error::Database(db) = &err {
        if db.constraint() == Some("deployment_endpoints_identity") {
            return ApiError::Conflict(
                "an enabled endpoint with this access type and value already exists in the cluster"
                    .to_string(),
            );
        }
        if db.is_unique_violation() {
            return ApiError::Conflict(format!(
                "deployment '{}' already exists in this cluster",
                name
            ));
        }
    }
    err.into()
}

async fn deployment_in_cluster(
    state: &AppState,
    cluster_id: Uuid,
    deployment_id: Uuid,
) -> ApiResult<Deployment> {
    let deployment = state
        .services
        .store
        .get_deployment(deployment_id)
        .await?
        .filter(|d| d.cluster_id == cluster_id)
        .ok_or_else(|| ApiError::NotFound("deployment".to_string()))?;
    Ok(deployment)
}

pub async fn list_deployments(
    State(state): State<AppState>,
    Path(cluster_id): Path<Uuid>,
) -> ApiResult<Json<Vec<Deployment>>> {
    state
        .services
        .store
        .get_cluster(cluster_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("cluster".to_string()))?;
    let deployments = state.services.store.list_deployments(cluster_id).await?;
    Ok(Json(deployments))
}

pub async fn get_deployment(
    State(state): State<AppState>,
    Path((cluster_id, deployment_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<Deployment>> {
    let deployment = deployment_in_cluster(&state, cluster_id, deployment_id).await?;
    Ok(Json(deployment))
}

pub async fn create_deployment(
    State(state): State<AppState>,
    Path(cluster_id): Path<Uuid>,
    Json(payload): Json<DeploymentCreateRequest>,
) -> ApiResult<(StatusCode, Json<DeploymentCreateResponse>)> {
    info!(
        cluster = %cluster_id,
        deployment = %payload.name,
        application = %payload.application,
        "deployment create requested"
    );

    let cluster = running_cluster(&state, cluster_id).await?;

    if !is_valid_dns_label(&payload.name) {
        return Err(ApiError::Validation(
            "deployment name must be a DNS label (1-63 chars of [a-z0-9-])".to_string(),
        ));
    }

    let app = state.services.catalog.get(&payload.application)?.clone();

    let issues = state.services.catalog.validate_config(&app, &payload.config);
    if !issues.is_empty() {
        let detail = issues
            .iter()
            .map(|i| format!("{}: {}", i.field, i.message))
            .collect::<Vec<_>>()
            .join("; ");
        return Err(ApiError::Validation(detail));
    }

    if let Some(pool) = payload.node_pool.as_deref() {
        if !cluster.pools.iter().any(|p| p.name == pool) {
            return Err(ApiError::Validation(format!(
                "cluster has no pool named '{}'",
                pool
            )));
        }
    }

    let endpoints = admit_endpoints(&state, &cluster, &app, &payload, None).await?;
    let volumes = admit_volumes(&state, &app, &payload).await?;

    let deployment_id = Uuid::new_v4();
    let namespace = format!("dip-{}", deployment_id);

    // Existing volumes are reserved before the row insert; the reservation
    // is a conditional increment, so it cannot race a volume delete.
    let mut reserved: Vec<&str> = Vec::new();
    for binding in volumes.iter().filter(|b| b.existing_volume) {
        match state.services.store.acquire_volume(&binding.volume_name).await {
            Ok(true) => reserved.push(&binding.volume_name),
            Ok(false) => {
                release_volumes(&state, &reserved).await;
                return Err(ApiError::Conflict(format!(
                    "volume '{}' is not available",
                    binding.volume_name
                )));
            }
            Err(e) => {
                release_volumes(&state, &reserved).await;
                return Err(e.into());
            }
        }
    }

    if let Err(e) = state
        .services
        .store
        .create_deployment(NewDeployment {
            id: deployment_id,
            cluster_id,
            name: payload.name.clone(),
            application: app.id.clone(),
            config: payload.config.clone(),
            pool_name: payload.node_pool.clone(),
            namespace,
            endpoints,
            volumes: volumes.clone(),
        })
        .await
    {
        release_volumes(&state, &reserved).await;
        return Err(map_deployment_insert_error(e, &payload.name));
    }

    state
        .orchestrator
        .submit(cluster_id, ClusterCommand::CreateDeployment { deployment_id })?;

    Ok((
        StatusCode::CREATED,
        Json(DeploymentCreateResponse {
            id: deployment_id,
            status: LifecycleState::Deploying,
        }),
    ))
}

/// Endpoint admission: application policy filtering, domain requirements and
/// cluster-wide uniqueness. The client-side existence poll runs the same
/// predicate, making it advisory.
async fn admit_endpoints(
    state: &AppState,
    cluster: &Cluster,
    app: &crate::models::ApplicationDescriptor,
    payload: &DeploymentCreateRequest,
    exclude_deployment: Option<Uuid>,
) -> ApiResult<Vec<EndpointConfig>> {
    let flower_hidden = app.id == "airflow" && !catalog::flower_active(&payload.config);

    let mut admitted: Vec<EndpointConfig> = Vec::new();
    for endpoint in &payload.endpoints {
        let spec = app
            .endpoints
            .iter()
            .find(|s| s.name == endpoint.name)
            .ok_or_else(|| {
                ApiError::Validation(format!(
                    "application '{}' has no endpoint '{}'",
                    app.id, endpoint.name
                ))
            })?;

        // Policy-hidden endpoints are dropped rather than rejected, so a UI
        // that always sends the schema does not break.
        if flower_hidden && spec.name == "flower-ui" {
            continue;
        }
        if !endpoint.enabled {
            admitted.push(endpoint.clone());
            continue;
        }

        if endpoint.access_type.requires_domain() && cluster.domain_name.is_none() {
            return Err(ApiError::Validation(format!(
                "endpoint '{}' needs the cluster to have a domain name",
                endpoint.name
            )));
        }

        let normalized = normalize_endpoint_value(endpoint.access_type, &endpoint.value);
        let duplicate_in_request = admitted.iter().any(|e| {
            e.enabled
                && e.access_type == endpoint.access_type
                && normalize_endpoint_value(e.access_type, &e.value) == normalized
        });
        if duplicate_in_request
            || endpoint_taken(
                &state.services.store,
                cluster.id,
                endpoint.access_type,
                &endpoint.value,
                exclude_deployment,
            )
            .await?
        {
            return Err(ApiError::Conflict(format!(
                "endpoint {} '{}' is already taken in this cluster",
                endpoint.access_type, normalized
            )));
        }

        admitted.push(endpoint.clone());
    }

    for spec in app.endpoints.iter().filter(|s| s.required) {
        let present = admitted
            .iter()
            .any(|e| e.name == spec.name && e.enabled);
        if !present {
            return Err(ApiError::Validation(format!(
                "required endpoint '{}' is missing",
                spec.name
            )));
        }
    }

    Ok(admitted)
}

async fn admit_volumes(
    state: &AppState,
    app: &crate::models::ApplicationDescriptor,
    payload: &DeploymentCreateRequest,
) -> ApiResult<Vec<VolumeBinding>> {
    let mut bindings = Vec::new();

    for requirement in &app.volume_requirements {
        let request = payload.volumes.iter().find(|v| v.name == requirement.name);

        if let Some(existing) = request.and_then(|r| r.existing_volume.as_deref()) {
            let volume = state
                .services
                .store
                .get_volume_by_name(existing)
                .await?
                .ok_or_else(|| {
                    ApiError::Validation(format!("volume '{}' does not exist", existing))
                })?;
            if volume.status != LifecycleState::Running {
                return Err(ApiError::Conflict(format!(
                    "volume '{}' is not ready",
                    existing
                )));
            }
            bindings.push(VolumeBinding {
                volume_name: volume.name.clone(),
                pvc_name: volume.name,
                size_gb: volume.size_gb,
                existing_volume: true,
            });
            continue;
        }

        let size = request
            .and_then(|r| r.size_gb)
            .unwrap_or(requirement.default_size_gb);
        if !(MIN_VOLUME_GB..=MAX_VOLUME_GB).contains(&size) {
            return Err(ApiError::Validation(format!(
                "volume '{}' size must be between {} and {} GiB",
                requirement.name, MIN_VOLUME_GB, MAX_VOLUME_GB
            )));
        }
        bindings.push(VolumeBinding {
            volume_name: requirement.name.clone(),
            pvc_name: requirement.name.clone(),
            size_gb: size,
            existing_volume: false,
        });
    }

    Ok(bindings)
}

pub async fn update_deployment(
    State(state): State<AppState>,
    Path((cluster_id, deployment_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<DeploymentUpdateRequest>,
) -> ApiResult<Json<DeploymentCreateResponse>> {
    let cluster = running_cluster(&state, cluster_id).await?;
    let deployment = deployment_in_cluster(&state, cluster_id, deployment_id).await?;

    if deployment.status != LifecycleState::Running {
        return Err(ApiError::Conflict(
            "deployment is not in a state that can be updated".to_string(),
        ));
    }

    if let Some(name) = payload.name.as_deref() {
        if !is_valid_dns_label(name) {
            return Err(ApiError::Validation(
                "deployment name must be a DNS label (1-63 chars of [a-z0-9-])".to_string(),
            ));
        }
        if name != deployment.name {
            state
                .services
                .store
                .rename_deployment(deployment_id, name)
                .await
                .map_err(|e| match ApiError::from(e) {
                    ApiError::Conflict(_) => ApiError::Conflict(format!(
                        "deployment '{}' already exists in this cluster",
                        name
                    )),
                    other => other,
                })?;
        }
    }

    let config = payload.config.clone().unwrap_or_else(|| deployment.config.clone());
    let endpoints = payload
        .endpoints
        .clone()
        .unwrap_or_else(|| deployment.endpoints.clone());

    let app = state.services.catalog.get(&deployment.application)?.clone();
    let issues = state.services.catalog.validate_config(&app, &config);
    if !issues.is_empty() {
        let detail = issues
            .iter()
            .map(|i| format!("{}: {}", i.field, i.message))
            .collect::<Vec<_>>()
            .join("; ");
        return Err(ApiError::Validation(detail));
    }

    let probe = DeploymentCreateRequest {
        name: deployment.name.clone(),
        application: deployment.application.clone(),
        config: config.clone(),
        node_pool: deployment.pool_name.clone(),
        endpoints,
        volumes: Vec::new(),
    };
    let admitted = admit_endpoints(&state, &cluster, &app, &probe, Some(deployment_id)).await?;

    state
        .services
        .store
        .update_deployment_config(deployment_id, deployment.cluster_id, &config, &admitted)
        .await
        .map_err(|e| map_deployment_insert_error(e, &deployment.name))?;

    state
        .orchestrator
        .submit(cluster_id, ClusterCommand::UpdateDeployment { deployment_id })?;

    Ok(Json(DeploymentCreateResponse {
        id: deployment_id,
        status: LifecycleState::Updating,
    }))
}

pub async fn delete_deployment(
    State(state): State<AppState>,
    Path((cluster_id, deployment_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<StatusCode> {
    deployment_in_cluster(&state, cluster_id, deployment_id).await?;

    info!(%cluster_id, %deployment_id, "deployment delete requested");
    state
        .orchestrator
        .submit(cluster_id, ClusterCommand::DeleteDeployment { deployment_id })?;

    Ok(StatusCode::ACCEPTED)
}

pub async fn get_credentials(
    State(state): State<AppState>,
    Path((cluster_id, deployment_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<CredentialsResponse>> {
    let cluster = state
        .services
        .store
        .get_cluster(cluster_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("cluster".to_string()))?;
    let deployment = deployment_in_cluster(&state, cluster_id, deployment_id).await?;

    if deployment.status != LifecycleState::Running {
        return Err(ApiError::Conflict("deployment is not running".to_string()));
    }

    let credentials = read_credentials(&state.services, &cluster, &deployment).await?;
    Ok(Json(credentials))
}

pub async fn check_endpoint_existence(
    State(state): State<AppState>,
    Path(cluster_id): Path<Uuid>,
    Json(payload): Json<EndpointCheckRequest>,
) -> ApiResult<Json<bool>> {
    state
        .services
        .store
        .get_cluster(cluster_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("cluster".to_string()))?;

    let taken = endpoint_taken(
        &state.services.store,
        cluster_id,
        payload.access_type,
        &payload.value,
        None,
    )
    .await?;
    Ok(Json(taken))
}
