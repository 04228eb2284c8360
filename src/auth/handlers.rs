use axum::{
    extract::{Query, State},
    http::{header::SET_COOKIE, StatusCode},
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use tracing::instrument;

use crate::{
    auth::{
        cookie::{clear_refresh_cookie, refresh_cookie},
        dto::{
            AuthResponse, ChangePasswordRequest, ForgotPasswordRequest, LoginRequest,
            RegisterRequest, ResetPasswordRequest, VerifyEmailQuery,
        },
        error::AuthError,
        extractors::{AuthUser, JsonBody, RefreshCookie},
        repo_types::ProfileUpdate,
        services::SessionGrant,
    },
    response::ApiResponse,
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
        .route("/auth/logout", post(logout))
        .route("/auth/forgot-password", post(forgot_password))
        .route("/auth/reset-password", post(reset_password))
        .route("/auth/verify-email", get(verify_email))
        .route("/auth/resend-verification", post(resend_verification))
        .route("/auth/change-password", put(change_password))
}

pub fn me_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/me", get(get_me))
        .route("/auth/profile", put(update_profile))
}

fn session_response(
    state: &AppState,
    status: StatusCode,
    message: &str,
    grant: SessionGrant,
) -> impl IntoResponse {
    let cookie = refresh_cookie(
        &grant.refresh_token,
        grant.refresh_max_age,
        state.config.cookie_secure,
    );
    let body = ApiResponse::ok(
        message,
        AuthResponse {
            user: grant.user,
            access_token: grant.access_token,
        },
    );
    (status, [(SET_COOKIE, cookie)], Json(body))
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<RegisterRequest>,
) -> Result<impl IntoResponse, AuthError> {
    payload.validate()?;
    let grant = state
        .sessions
        .register(
            &payload.full_name,
            &payload.email,
            &payload.password,
            payload.phone.as_deref(),
        )
        .await?;
    Ok(session_response(
        &state,
        StatusCode::CREATED,
        "Registration successful. Please check your email to verify your account.",
        grant,
    ))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<LoginRequest>,
) -> Result<impl IntoResponse, AuthError> {
    payload.validate()?;
    let grant = state
        .sessions
        .login(&payload.email, &payload.password)
        .await?;
    Ok(session_response(&state, StatusCode::OK, "Login successful", grant))
}

#[instrument(skip_all)]
pub async fn refresh(
    State(state): State<AppState>,
    RefreshCookie(cookie): RefreshCookie,
) -> Result<impl IntoResponse, AuthError> {
    let grant = state.sessions.refresh(cookie.as_deref()).await?;
    Ok(Json(ApiResponse::ok(
        "Token refreshed",
        AuthResponse {
            user: grant.user,
            access_token: grant.access_token,
        },
    )))
}

#[instrument(skip_all)]
pub async fn logout(
    State(state): State<AppState>,
    RefreshCookie(cookie): RefreshCookie,
) -> impl IntoResponse {
    state.sessions.logout(cookie.as_deref()).await;
    (
        [(SET_COOKIE, clear_refresh_cookie(state.config.cookie_secure))],
        Json(ApiResponse::message("Logged out successfully")),
    )
}

#[instrument(skip(state, payload))]
pub async fn forgot_password(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<ForgotPasswordRequest>,
) -> Result<impl IntoResponse, AuthError> {
    payload.validate()?;
    let message = state.sessions.forgot_password(&payload.email).await?;
    Ok(Json(ApiResponse::message(message)))
}

#[instrument(skip(state, payload))]
pub async fn reset_password(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<ResetPasswordRequest>,
) -> Result<impl IntoResponse, AuthError> {
    payload.validate()?;
    state
        .sessions
        .reset_password(&payload.token, &payload.password)
        .await?;
    Ok(Json(ApiResponse::message(
        "Password has been reset. Please log in with your new password.",
    )))
}

#[instrument(skip_all)]
pub async fn verify_email(
    State(state): State<AppState>,
    Query(query): Query<VerifyEmailQuery>,
) -> Result<impl IntoResponse, AuthError> {
    state.sessions.verify_email(query.token.as_deref()).await?;
    Ok(Json(ApiResponse::message("Email verified successfully")))
}

#[instrument(skip(state))]
pub async fn resend_verification(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<impl IntoResponse, AuthError> {
    state.sessions.resend_verification(user_id).await?;
    Ok(Json(ApiResponse::message("Verification email sent")))
}

#[instrument(skip(state, payload))]
pub async fn change_password(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    JsonBody(payload): JsonBody<ChangePasswordRequest>,
) -> Result<impl IntoResponse, AuthError> {
    payload.validate()?;
    state
        .sessions
        .change_password(
            user_id,
            payload.current_password.as_deref(),
            payload.new_password.as_deref(),
        )
        .await?;
    Ok(Json(ApiResponse::message("Password changed successfully")))
}

#[instrument(skip(state))]
pub async fn get_me(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<impl IntoResponse, AuthError> {
    let user = state.sessions.current_user(user_id).await?;
    Ok(Json(ApiResponse::ok("OK", user)))
}

#[instrument(skip(state, payload))]
pub async fn update_profile(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    JsonBody(payload): JsonBody<ProfileUpdate>,
) -> Result<impl IntoResponse, AuthError> {
    payload.validate()?;
    let user = state.sessions.update_profile(user_id, &payload).await?;
    Ok(Json(ApiResponse::ok("Profile updated", user)))
}
