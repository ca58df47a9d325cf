//! Login, two-factor verification, refresh, session, and logout endpoints.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode, header::SET_COOKIE},
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::error;

use crate::token::TokenPair;

use super::cookies::{access_cookie, clear_cookies, csrf_cookie, refresh_cookie};
use super::error_response;
use super::extract::RequestCarriers;
use super::orchestrator::{AuthOrchestrator, LoginOutcome, find_refresh_token};
use super::principal::require_auth;
use super::state::AuthState;
use super::types::{
    CsrfResponse, LoginRequest, RefreshRequest, RefreshResponse, SessionResponse, TokenResponse,
    TwoFactorChallengeResponse, TwoFactorVerifyRequest,
};
use super::utils::extract_client_ip;

fn user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

/// Build the token response: JSON body for bearer clients plus `Set-Cookie`
/// headers for browser clients.
fn token_response(auth_state: &AuthState, pair: &TokenPair) -> Response {
    let mut headers = HeaderMap::new();
    match (
        access_cookie(auth_state.config(), &pair.access),
        refresh_cookie(auth_state.config(), &pair.refresh),
    ) {
        (Ok(access), Ok(refresh)) => {
            headers.append(SET_COOKIE, access);
            headers.append(SET_COOKIE, refresh);
        }
        _ => {
            error!("failed to build session cookies");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    }
    if auth_state.csrf().enabled() {
        match auth_state
            .csrf()
            .issue()
            .and_then(|token| Ok(csrf_cookie(auth_state.config(), &token)?))
        {
            Ok(cookie) => headers.append(SET_COOKIE, cookie),
            Err(err) => {
                error!("failed to issue CSRF cookie: {err}");
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        };
    }

    let body = TokenResponse {
        access_token: pair.access.clone(),
        refresh_token: pair.refresh.clone(),
        token_type: "Bearer".to_string(),
        expires_in: pair.access_expires_in,
    };
    (StatusCode::OK, headers, Json(body)).into_response()
}

/// Password login. Two-factor accounts get a challenge instead of tokens.
#[utoipa::path(
    post,
    path = "/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Token pair or two-factor challenge", body = TokenResponse),
        (status = 401, description = "Unauthorized", body = String),
        (status = 429, description = "Rate limited", body = String)
    ),
    tag = "auth"
)]
pub async fn login(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    orchestrator: Extension<Arc<AuthOrchestrator>>,
    payload: Option<Json<LoginRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response();
    };

    let client_ip = extract_client_ip(&headers);
    let outcome = orchestrator
        .login(
            &request.email,
            &request.password,
            client_ip.as_deref(),
            user_agent(&headers).as_deref(),
        )
        .await;

    match outcome {
        Ok(LoginOutcome::Authenticated(pair)) => token_response(&auth_state, &pair),
        Ok(LoginOutcome::TwoFactorRequired { challenge }) => (
            StatusCode::OK,
            Json(TwoFactorChallengeResponse {
                two_factor_required: true,
                challenge,
            }),
        )
            .into_response(),
        Err(err) => error_response(&err),
    }
}

/// Complete a pending login with a TOTP or recovery code.
#[utoipa::path(
    post,
    path = "/v1/auth/two-factor/verify",
    request_body = TwoFactorVerifyRequest,
    responses(
        (status = 200, description = "Token pair issued", body = TokenResponse),
        (status = 401, description = "Unauthorized", body = String),
        (status = 429, description = "Rate limited", body = String)
    ),
    tag = "auth"
)]
pub async fn two_factor_verify(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    orchestrator: Extension<Arc<AuthOrchestrator>>,
    payload: Option<Json<TwoFactorVerifyRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response();
    };

    let client_ip = extract_client_ip(&headers);
    match orchestrator
        .verify_two_factor(
            &request.challenge,
            &request.code,
            client_ip.as_deref(),
            user_agent(&headers).as_deref(),
        )
        .await
    {
        Ok(pair) => token_response(&auth_state, &pair),
        Err(err) => error_response(&err),
    }
}

/// Re-issue an access token from a still-valid refresh token. Browser
/// clients rely on the refresh cookie; bearer clients pass the token in the
/// body. The refresh token is never read from the `Authorization` header.
#[utoipa::path(
    post,
    path = "/v1/auth/refresh",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "Access token re-issued", body = RefreshResponse),
        (status = 401, description = "Unauthorized", body = String),
        (status = 429, description = "Rate limited", body = String)
    ),
    tag = "auth"
)]
pub async fn refresh(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    orchestrator: Extension<Arc<AuthOrchestrator>>,
    payload: Option<Json<RefreshRequest>>,
) -> impl IntoResponse {
    let carriers = RequestCarriers::from_headers(&headers);
    let from_cookie = find_refresh_token(&carriers);
    let from_body = payload.and_then(|Json(request)| request.refresh_token);

    // Cookie-borne refreshes are the CSRF-relevant shape; a body-borne token
    // implies a non-browser client.
    if from_cookie.is_some() && from_body.is_none() {
        let (csrf_cookie_value, _) =
            carriers.find_token(super::csrf::CSRF_COOKIE_NAME, false);
        let header_value = headers
            .get(super::csrf::CSRF_HEADER_NAME)
            .and_then(|value| value.to_str().ok());
        if auth_state
            .csrf()
            .validate(
                super::extract::CarrierSource::CookieEntry,
                csrf_cookie_value
                    .as_ref()
                    .map(|extraction| extraction.value.as_str()),
                header_value,
            )
            .is_err()
        {
            return (StatusCode::FORBIDDEN, "CSRF validation failed".to_string())
                .into_response();
        }
    }

    let Some(token) = from_body.or(from_cookie) else {
        return (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()).into_response();
    };

    let client_ip = extract_client_ip(&headers);
    match orchestrator.refresh(&token, client_ip.as_deref()).await {
        Ok(refreshed) => {
            let mut response_headers = HeaderMap::new();
            match access_cookie(auth_state.config(), &refreshed.access) {
                Ok(cookie) => {
                    response_headers.append(SET_COOKIE, cookie);
                }
                Err(err) => {
                    error!("failed to build access cookie: {err}");
                    return StatusCode::INTERNAL_SERVER_ERROR.into_response();
                }
            }
            (
                StatusCode::OK,
                response_headers,
                Json(RefreshResponse {
                    access_token: refreshed.access,
                    token_type: "Bearer".to_string(),
                    expires_in: refreshed.access_expires_in,
                }),
            )
                .into_response()
        }
        Err(err) => error_response(&err),
    }
}

/// Resolve the current access credential, if any.
#[utoipa::path(
    get,
    path = "/v1/auth/session",
    responses(
        (status = 200, description = "Session is active", body = SessionResponse),
        (status = 204, description = "No active session")
    ),
    tag = "auth"
)]
pub async fn session(
    headers: HeaderMap,
    orchestrator: Extension<Arc<AuthOrchestrator>>,
) -> impl IntoResponse {
    match require_auth(&headers, &orchestrator).await {
        Ok(principal) => (
            StatusCode::OK,
            Json(SessionResponse {
                account_id: principal.account_id.to_string(),
                email_verified: principal.email_verified,
            }),
        )
            .into_response(),
        // Missing credentials are "no session", not an error, to avoid
        // leaking auth state.
        Err(StatusCode::UNAUTHORIZED) => StatusCode::NO_CONTENT.into_response(),
        Err(status) => status.into_response(),
    }
}

/// Issue a fresh anti-forgery token for cookie-session clients.
#[utoipa::path(
    get,
    path = "/v1/auth/csrf",
    responses(
        (status = 200, description = "CSRF token issued", body = CsrfResponse)
    ),
    tag = "auth"
)]
pub async fn csrf_token(auth_state: Extension<Arc<AuthState>>) -> impl IntoResponse {
    let token = match auth_state.csrf().issue() {
        Ok(token) => token,
        Err(err) => {
            error!("failed to issue CSRF token: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    let mut headers = HeaderMap::new();
    match csrf_cookie(auth_state.config(), &token) {
        Ok(cookie) => {
            headers.append(SET_COOKIE, cookie);
        }
        Err(err) => {
            error!("failed to build CSRF cookie: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    }
    (
        StatusCode::OK,
        headers,
        Json(CsrfResponse { csrf_token: token }),
    )
        .into_response()
}

/// Logout clears the cookies. Stateless tokens have no server-side session
/// to revoke; discarding the client copies ends the session.
#[utoipa::path(
    post,
    path = "/v1/auth/logout",
    responses(
        (status = 204, description = "Session cleared")
    ),
    tag = "auth"
)]
pub async fn logout(auth_state: Extension<Arc<AuthState>>) -> impl IntoResponse {
    let mut headers = HeaderMap::new();
    for cookie in clear_cookies(auth_state.config()) {
        headers.append(SET_COOKIE, cookie);
    }
    (StatusCode::NO_CONTENT, headers).into_response()
}
