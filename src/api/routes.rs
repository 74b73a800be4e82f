use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::accounts::AccountsClient;
use crate::api::error::ApiError;
use crate::api::response::write_json;
use crate::promoter::Promoter;
use crate::types::UnlockHash;

#[derive(Clone)]
pub struct ApiState {
    pub promoter: Arc<Promoter>,
    pub accounts: Arc<AccountsClient>,
}

/// The body returned by the /health endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthGet {
    pub dbalive: bool,
    pub skydalive: bool,
}

/// The body returned by the /address endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct UserAddressPost {
    pub address: UnlockHash,
}

/// Builds the router with all routes of the service.
pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health_get))
        .route("/address", post(user_address_post))
        .route("/dead/:servername", post(dead_server_post))
        .with_state(state)
}

/// GET /health returns the status of the service's dependencies.
async fn health_get(State(state): State<ApiState>) -> Response {
    let health = state.promoter.health().await;
    write_json(
        StatusCode::OK,
        &HealthGet {
            dbalive: health.db_alive,
            skydalive: health.skyd_alive,
        },
    )
}

/// POST /address returns the caller's primary address, allocating one from
/// the pool if needed. The `Authorization` and `Cookie` headers are
/// forwarded to the accounts service to resolve the user.
async fn user_address_post(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    let cookie = headers.get(header::COOKIE).and_then(|v| v.to_str().ok());

    let sub = state.accounts.user_sub(authorization, cookie).await?;
    let address = state.promoter.address_for_user(&sub).await?;
    Ok(write_json(StatusCode::OK, &UserAddressPost { address }))
}

/// POST /dead/:servername invalidates all addresses minted by a server.
async fn dead_server_post(
    State(state): State<ApiState>,
    Path(servername): Path<String>,
) -> Result<Response, ApiError> {
    if servername.is_empty() {
        return Err(ApiError::BadRequest(
            "name of server wasn't provided".to_string(),
        ));
    }
    state.promoter.mark_server_dead(&servername).await?;
    info!(server = %servername, "marked server dead");
    Ok(StatusCode::OK.into_response())
}
