//! Registration, email verification, and password reset endpoints.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use std::sync::Arc;
use tracing::{debug, error};

use super::error_response;
use super::orchestrator::{AuthOrchestrator, RegisterOutcome};
use super::types::{
    PasswordResetConfirmRequest, PasswordResetRequest, RegisterRequest, RegisterResponse,
    ResendVerificationRequest, VerifyEmailRequest,
};
use super::utils::extract_client_ip;

fn user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

/// Create an account. Gated by the registration policy; a rejection never
/// confirms which emails are permitted.
#[utoipa::path(
    post,
    path = "/v1/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created", body = RegisterResponse),
        (status = 400, description = "Invalid payload", body = String),
        (status = 403, description = "Registration not permitted", body = String),
        (status = 409, description = "Email already registered", body = String),
        (status = 429, description = "Rate limited", body = String)
    ),
    tag = "auth"
)]
pub async fn register(
    headers: HeaderMap,
    orchestrator: Extension<Arc<AuthOrchestrator>>,
    payload: Option<Json<RegisterRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response();
    };

    let client_ip = extract_client_ip(&headers);
    let outcome = orchestrator
        .register(
            &request.email,
            &request.password,
            client_ip.as_deref(),
            user_agent(&headers).as_deref(),
        )
        .await;

    match outcome {
        Ok(RegisterOutcome::Created { account_id, .. }) => (
            StatusCode::CREATED,
            Json(RegisterResponse {
                account_id: account_id.to_string(),
            }),
        )
            .into_response(),
        Ok(RegisterOutcome::Conflict) => (
            StatusCode::CONFLICT,
            "Email already registered".to_string(),
        )
            .into_response(),
        Err(err) => error_response(&err),
    }
}

/// Consume the emailed single-use token and activate the account.
#[utoipa::path(
    post,
    path = "/v1/auth/verify-email",
    request_body = VerifyEmailRequest,
    responses(
        (status = 204, description = "Email verified"),
        (status = 400, description = "Invalid or expired token", body = String),
        (status = 429, description = "Rate limited", body = String)
    ),
    tag = "auth"
)]
pub async fn verify_email(
    headers: HeaderMap,
    orchestrator: Extension<Arc<AuthOrchestrator>>,
    payload: Option<Json<VerifyEmailRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response();
    };

    let client_ip = extract_client_ip(&headers);
    match orchestrator
        .verify_email(&request.token, client_ip.as_deref())
        .await
    {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_response(&err),
    }
}

/// Resend a verification token (always 204 to avoid account probing).
#[utoipa::path(
    post,
    path = "/v1/auth/resend-verification",
    request_body = ResendVerificationRequest,
    responses(
        (status = 204, description = "Resend accepted")
    ),
    tag = "auth"
)]
pub async fn resend_verification(
    headers: HeaderMap,
    orchestrator: Extension<Arc<AuthOrchestrator>>,
    payload: Option<Json<ResendVerificationRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response();
    };

    let client_ip = extract_client_ip(&headers);
    match orchestrator
        .resend_verification(&request.email, client_ip.as_deref())
        .await
    {
        // The raw token is handed to the email fan-out collaborator; the
        // response stays opaque regardless.
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            debug!("resend verification rejected: {err}");
            StatusCode::NO_CONTENT.into_response()
        }
    }
}

/// Start a password reset (always 204 to avoid account probing).
#[utoipa::path(
    post,
    path = "/v1/auth/password-reset/request",
    request_body = PasswordResetRequest,
    responses(
        (status = 204, description = "Reset accepted")
    ),
    tag = "auth"
)]
pub async fn password_reset_request(
    headers: HeaderMap,
    orchestrator: Extension<Arc<AuthOrchestrator>>,
    payload: Option<Json<PasswordResetRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response();
    };

    let client_ip = extract_client_ip(&headers);
    match orchestrator
        .request_password_reset(&request.email, client_ip.as_deref())
        .await
    {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            error!("password reset request failed: {err}");
            StatusCode::NO_CONTENT.into_response()
        }
    }
}

/// Complete a password reset with the single-use token.
#[utoipa::path(
    post,
    path = "/v1/auth/password-reset/confirm",
    request_body = PasswordResetConfirmRequest,
    responses(
        (status = 204, description = "Password updated"),
        (status = 400, description = "Invalid token or password", body = String),
        (status = 429, description = "Rate limited", body = String)
    ),
    tag = "auth"
)]
pub async fn password_reset_confirm(
    headers: HeaderMap,
    orchestrator: Extension<Arc<AuthOrchestrator>>,
    payload: Option<Json<PasswordResetConfirmRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response();
    };

    let client_ip = extract_client_ip(&headers);
    match orchestrator
        .reset_password(&request.token, &request.new_password, client_ip.as_deref())
        .await
    {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_response(&err),
    }
}
