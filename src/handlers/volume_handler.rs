use std::collections::BTreeMap;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use tracing::{error, info};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::models::{
    is_valid_dns_label, LifecycleState, VolumeCreateRequest, VolumeCreateResponse, VolumeView,
    MAX_VOLUME_GB, MIN_VOLUME_GB,
};
use crate::provider::provider_for;
use crate::store::NewVolume;
use crate::AppState;

pub async fn list_volumes(State(state): State<AppState>) -> ApiResult<Json<Vec<VolumeView>>> {
    let volumes = state.services.store.list_volumes().await?;
    Ok(Json(volumes.into_iter().map(VolumeView::from).collect()))
}

pub async fn create_volume(
    State(state): State<AppState>,
    Json(payload): Json<VolumeCreateRequest>,
) -> ApiResult<(StatusCode, Json<VolumeCreateResponse>)> {
    info!(volume = %payload.name, provider = %payload.provider, size = payload.size, "volume create requested");

    if !is_valid_dns_label(&payload.name) {
        return Err(ApiError::Validation(
            "volume name must be a DNS label (1-63 chars of [a-z0-9-])".to_string(),
        ));
    }
    if !(MIN_VOLUME_GB..=MAX_VOLUME_GB).contains(&payload.size) {
        return Err(ApiError::Validation(format!(
            "volume size must be between {} and {} GiB",
            MIN_VOLUME_GB, MAX_VOLUME_GB
        )));
    }

    let provider = provider_for(
        &payload.provider,
        &payload.provider_config,
        state.services.config.provider_timeout,
    )?;

    let volume_id = Uuid::new_v4();
    state
        .services
        .store
        .create_volume(NewVolume {
            id: volume_id,
            name: payload.name.clone(),
            provider: payload.provider.clone(),
            provider_config: payload.provider_config.clone(),
            region: payload.region.clone(),
            size_gb: payload.size,
            description: payload.description.clone(),
        })
        .await
        .map_err(|e| match ApiError::from(e) {
            ApiError::Conflict(_) => {
                ApiError::Conflict(format!("volume '{}' already exists", payload.name))
            }
            other => other,
        })?;

    // Block-volume creation happens off the request path; the row carries
    // the authoritative status.
    let store = state.services.store.clone();
    let name = payload.name.clone();
    let region = payload.region.clone();
    let size = payload.size;
    tokio::spawn(async move {
        let _ = store
            .set_volume_status(volume_id, LifecycleState::Creating, None)
            .await;
        let labels = BTreeMap::from([("dip/volume".to_string(), volume_id.to_string())]);
        match provider.create_volume(&name, size, &region, &labels).await {
            Ok(info) => {
                if let Err(e) = store
                    .mark_volume_running(volume_id, &info.id.to_string())
                    .await
                {
                    error!(%volume_id, error = %e, "failed to persist volume state");
                }
            }
            Err(e) => {
                error!(%volume_id, error = %e, "volume creation failed");
                let _ = store
                    .set_volume_status(volume_id, LifecycleState::Failed, Some(&e.to_string()))
                    .await;
            }
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(VolumeCreateResponse {
            name: payload.name,
            status: LifecycleState::Creating,
        }),
    ))
}

pub async fn delete_volume(
    State(state): State<AppState>,
    Path(volume_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let volume = state
        .services
        .store
        .get_volume(volume_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("volume".to_string()))?;

    let provider_config = state
        .services
        .store
        .volume_provider_config(volume_id)
        .await?
        .unwrap_or_default();

    // The flip to `deleting` is conditional on the reference count, so a
    // concurrent bind either beats it (and the delete is refused) or finds
    // the volume no longer `running` and fails its reservation.
    if !state.services.store.begin_volume_delete(volume_id).await? {
        return Err(ApiError::Conflict(format!(
            "volume '{}' is bound to a deployment or already being deleted",
            volume.name
        )));
    }

    let store = state.services.store.clone();
    let timeout = state.services.config.provider_timeout;
    tokio::spawn(async move {
        if let Some(provider_id) = volume.provider_id.as_deref().and_then(|id| id.parse::<i64>().ok()) {
            match provider_for(&volume.provider, &provider_config, timeout) {
                Ok(provider) => {
                    if let Err(e) = provider.delete_volume(provider_id).await {
                        error!(%volume_id, error = %e, "provider volume deletion failed");
                        let _ = store
                            .set_volume_status(
                                volume_id,
                                LifecycleState::Failed,
                                Some(&e.to_string()),
                            )
                            .await;
                        return;
                    }
                }
                Err(e) => {
                    let _ = store
                        .set_volume_status(volume_id, LifecycleState::Failed, Some(&e.to_string()))
                        .await;
                    return;
                }
            }
        }

        if let Err(e) = store.delete_volume_row(volume_id).await {
            error!(%volume_id, error = %e, "failed to remove volume row");
        }
    });

    Ok(StatusCode::ACCEPTED)
}
