//! API handlers for Sesamo.
//!
//! Route handlers live here; downstream CRUD services consume the resolved
//! principal from the auth module and never re-implement extraction or
//! token verification.

pub mod auth;
pub mod health;

use axum::response::IntoResponse;

/// Undocumented root: service identity only.
pub async fn root() -> impl IntoResponse {
    concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"))
}

#[cfg(test)]
mod tests {
    use super::root;
    use axum::response::IntoResponse;

    #[tokio::test]
    async fn root_reports_name_and_version() {
        let response = root().await.into_response();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
    }
}
