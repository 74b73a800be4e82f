// The HTTP facade of the service.

use axum::extract::Request;
use axum::ServiceExt;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::Layer;
use tower_http::normalize_path::NormalizePathLayer;

pub mod error;
pub mod response;
pub mod routes;

pub use error::ApiError;
pub use response::ErrorMessage;
pub use routes::{create_router, ApiState, HealthGet, UserAddressPost};

/// Serves the API on the listener until the token is cancelled, then shuts
/// down gracefully. Trailing slashes are stripped before routing.
pub async fn serve(
    listener: TcpListener,
    state: ApiState,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let router = create_router(state);
    let app = NormalizePathLayer::trim_trailing_slash().layer(router);
    axum::serve(listener, ServiceExt::<Request>::into_make_service(app))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}
