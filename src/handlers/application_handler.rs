use axum::extract::{Path, State};
use axum::response::Json;

use crate::error::ApiResult;
use crate::models::{AccessEndpointSpec, ApplicationDescriptor};
use crate::AppState;

pub async fn list_applications(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<ApplicationDescriptor>>> {
    let apps = state
        .services
        .catalog
        .list()
        .into_iter()
        .cloned()
        .collect();
    Ok(Json(apps))
}

pub async fn list_versions(
    State(state): State<AppState>,
    Path(application_id): Path<String>,
) -> ApiResult<Json<Vec<String>>> {
    let versions = state.services.catalog.versions(&application_id).await?;
    Ok(Json(versions))
}

pub async fn list_access_endpoints(
    State(state): State<AppState>,
    Path(application_id): Path<String>,
) -> ApiResult<Json<Vec<AccessEndpointSpec>>> {
    let app = state.services.catalog.get(&application_id)?;
    Ok(Json(app.endpoints.clone()))
}
