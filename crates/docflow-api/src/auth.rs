use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use docflow_core::{resolve_principal, Principal};

use crate::state::ApiState;

/// Resolves the caller's `Principal` from either an `Authorization: Bearer`
/// header or an `X-API-Key` header before the handler runs. Absent both, the
/// request proceeds as anonymous — handlers decide whether that's enough.
pub struct AuthenticatedPrincipal(pub Principal);

impl FromRequestParts<ApiState> for AuthenticatedPrincipal {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &ApiState) -> Result<Self, Self::Rejection> {
        let bearer = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));
        let api_key = parts
            .headers
            .get("x-api-key")
            .and_then(|v| v.to_str().ok());

        let principal = resolve_principal(bearer, api_key, &state.auth.admin_api_keys);
        Ok(AuthenticatedPrincipal(principal))
    }
}
