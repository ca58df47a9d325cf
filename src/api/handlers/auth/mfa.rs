//! Two-factor enrollment and recovery-code management endpoints.
//!
//! All routes require a resolved principal; the state-changing ones also
//! pass the anti-forgery check when the request authenticated via cookies.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use std::sync::Arc;

use super::error_response;
use super::orchestrator::AuthOrchestrator;
use super::principal::{require_auth, require_csrf};
use super::state::AuthState;
use super::types::{
    DisableTwoFactorRequest, EnrollFinishRequest, EnrollStartResponse, RecoveryCodesResponse,
};
use super::utils::extract_client_ip;

/// Begin TOTP enrollment: returns the secret and provisioning URI.
#[utoipa::path(
    post,
    path = "/v1/auth/two-factor/enroll/start",
    responses(
        (status = 200, description = "Enrollment started", body = EnrollStartResponse),
        (status = 401, description = "Unauthorized")
    ),
    tag = "auth"
)]
pub async fn enroll_start(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    orchestrator: Extension<Arc<AuthOrchestrator>>,
) -> impl IntoResponse {
    let principal = match require_auth(&headers, &orchestrator).await {
        Ok(principal) => principal,
        Err(status) => return status.into_response(),
    };
    if let Err(status) = require_csrf(&headers, &auth_state, &principal) {
        return status.into_response();
    }

    match orchestrator.enroll_two_factor_start(principal.account_id).await {
        Ok(start) => (
            StatusCode::OK,
            Json(EnrollStartResponse {
                secret: start.secret,
                otpauth_url: start.otpauth_url,
            }),
        )
            .into_response(),
        Err(err) => error_response(&err),
    }
}

/// Confirm enrollment with the first code; returns the recovery codes,
/// shown exactly once.
#[utoipa::path(
    post,
    path = "/v1/auth/two-factor/enroll/finish",
    request_body = EnrollFinishRequest,
    responses(
        (status = 200, description = "Two-factor enabled", body = RecoveryCodesResponse),
        (status = 401, description = "Unauthorized")
    ),
    tag = "auth"
)]
pub async fn enroll_finish(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    orchestrator: Extension<Arc<AuthOrchestrator>>,
    payload: Option<Json<EnrollFinishRequest>>,
) -> impl IntoResponse {
    let principal = match require_auth(&headers, &orchestrator).await {
        Ok(principal) => principal,
        Err(status) => return status.into_response(),
    };
    if let Err(status) = require_csrf(&headers, &auth_state, &principal) {
        return status.into_response();
    }
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response();
    };

    let client_ip = extract_client_ip(&headers);
    match orchestrator
        .enroll_two_factor_confirm(principal.account_id, &request.code, client_ip.as_deref())
        .await
    {
        Ok(recovery_codes) => (
            StatusCode::OK,
            Json(RecoveryCodesResponse { recovery_codes }),
        )
            .into_response(),
        Err(err) => error_response(&err),
    }
}

/// Atomically replace the recovery batch; prior codes stop working.
#[utoipa::path(
    post,
    path = "/v1/auth/two-factor/recovery/regenerate",
    responses(
        (status = 200, description = "New recovery codes", body = RecoveryCodesResponse),
        (status = 401, description = "Unauthorized")
    ),
    tag = "auth"
)]
pub async fn recovery_regenerate(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    orchestrator: Extension<Arc<AuthOrchestrator>>,
) -> impl IntoResponse {
    let principal = match require_auth(&headers, &orchestrator).await {
        Ok(principal) => principal,
        Err(status) => return status.into_response(),
    };
    if let Err(status) = require_csrf(&headers, &auth_state, &principal) {
        return status.into_response();
    }

    let client_ip = extract_client_ip(&headers);
    match orchestrator
        .regenerate_recovery_codes(principal.account_id, client_ip.as_deref())
        .await
    {
        Ok(recovery_codes) => (
            StatusCode::OK,
            Json(RecoveryCodesResponse { recovery_codes }),
        )
            .into_response(),
        Err(err) => error_response(&err),
    }
}

/// Turn off two-factor after a final TOTP or recovery-code proof.
#[utoipa::path(
    post,
    path = "/v1/auth/two-factor/disable",
    request_body = DisableTwoFactorRequest,
    responses(
        (status = 204, description = "Two-factor disabled"),
        (status = 401, description = "Unauthorized")
    ),
    tag = "auth"
)]
pub async fn disable(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    orchestrator: Extension<Arc<AuthOrchestrator>>,
    payload: Option<Json<DisableTwoFactorRequest>>,
) -> impl IntoResponse {
    let principal = match require_auth(&headers, &orchestrator).await {
        Ok(principal) => principal,
        Err(status) => return status.into_response(),
    };
    if let Err(status) = require_csrf(&headers, &auth_state, &principal) {
        return status.into_response();
    }
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response();
    };

    let client_ip = extract_client_ip(&headers);
    match orchestrator
        .disable_two_factor(principal.account_id, &request.code, client_ip.as_deref())
        .await
    {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_response(&err),
    }
}
