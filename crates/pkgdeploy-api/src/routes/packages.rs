//! Package catalog routes.

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::get,
};
use pkgdeploy_core::{PackageDetails, PackageId};
use serde::Serialize;

use crate::AppState;
use crate::error::ApiError;

pub fn router() -> Router<AppState> {
    Router::new().route("/{id}", get(get_package))
}

#[derive(Debug, Serialize)]
pub struct PackageResponse {
    pub rcc: u32,
    pub package: PackageDetails,
}

async fn get_package(
    State(state): State<AppState>,
    Path(id): Path<u32>,
) -> Result<Json<PackageResponse>, ApiError> {
    let package = state.scheduler.get_package_details(PackageId(id)).await?;
    Ok(Json(PackageResponse { rcc: 0, package }))
}

#[cfg(test)]
mod tests {
    use crate::routes::{router, test_support};
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use tower::ServiceExt;

    async fn get(uri: &str) -> (StatusCode, Value) {
        let (state, _) = test_support::state();
        let response = router(state)
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_get_package() {
        let (status, body) = get("/api/v1/packages/3").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["rcc"], 0);
        assert_eq!(body["package"]["name"], "collector");
    }

    #[tokio::test]
    async fn test_unknown_package() {
        let (status, body) = get("/api/v1/packages/99").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["rcc"], 36);
    }
}
