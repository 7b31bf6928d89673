use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::instrument;

use crate::{
    auth::{
        dto::{
            ForgotPasswordRequest, LoginRequest, LoginResponse, MeResponse, MessageResponse,
            PublicUser, RegisterRequest, RegisterResponse, SendOtpRequest, VerifyOtpRequest,
            VerifyOtpResponse,
        },
        extractors::{AppJson, AuthUser},
        services,
    },
    error::AppResult,
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/forgot-password", post(forgot_password))
        .route("/send-otp", post(send_otp))
        .route("/verify-otp", post(verify_otp))
}

pub fn me_routes() -> Router<AppState> {
    Router::new().route("/me", get(get_me))
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    AppJson(payload): AppJson<RegisterRequest>,
) -> AppResult<(StatusCode, Json<RegisterResponse>)> {
    let user = services::register(&state, payload).await?;
    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            message: "User registered successfully. Verify your phone number to activate the account."
                .into(),
            user: PublicUser::from(&user),
        }),
    ))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    AppJson(payload): AppJson<LoginRequest>,
) -> AppResult<Json<LoginResponse>> {
    let outcome = services::login(&state, payload).await?;
    Ok(Json(LoginResponse {
        message: "Login successful".into(),
        token: outcome.token,
        user: PublicUser::from(&outcome.user),
    }))
}

#[instrument(skip(state, payload))]
pub async fn forgot_password(
    State(state): State<AppState>,
    AppJson(payload): AppJson<ForgotPasswordRequest>,
) -> AppResult<Json<MessageResponse>> {
    services::reset_password(&state, payload).await?;
    Ok(Json(MessageResponse::new(
        "Password updated successfully. You can now log in.",
    )))
}

#[instrument(skip(state, payload))]
pub async fn send_otp(
    State(state): State<AppState>,
    AppJson(payload): AppJson<SendOtpRequest>,
) -> AppResult<Json<MessageResponse>> {
    services::request_otp(&state, payload.phone).await?;
    Ok(Json(MessageResponse::new("OTP sent successfully")))
}

#[instrument(skip(state, payload))]
pub async fn verify_otp(
    State(state): State<AppState>,
    AppJson(payload): AppJson<VerifyOtpRequest>,
) -> AppResult<Json<VerifyOtpResponse>> {
    let (token, _user) = services::verify_otp(&state, payload.phone, payload.otp).await?;
    Ok(Json(VerifyOtpResponse {
        message: "OTP verified successfully".into(),
        token,
    }))
}

#[instrument(skip(state))]
pub async fn get_me(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> AppResult<Json<MeResponse>> {
    let user = services::current_user(&state, user_id).await?;
    Ok(Json(MeResponse::from(&user)))
}
