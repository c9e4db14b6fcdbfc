use axum::extract::State;
use axum::Json;

use crate::state::ApiState;

/// Public: no principal required, same as any other discovery endpoint.
pub async fn catalog(State(state): State<ApiState>) -> Json<Vec<docflow_engines::registry::EngineCatalogEntry>> {
    Json(state.service.engine_catalog())
}
