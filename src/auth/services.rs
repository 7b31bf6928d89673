use lazy_static::lazy_static;
use regex::Regex;
use time::{Duration, OffsetDateTime};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    auth::{
        dto::{ForgotPasswordRequest, LoginRequest, RegisterRequest},
        otp::generate_otp,
        repo_types::{NewUser, Role, User},
    },
    error::{AppError, AppResult},
    state::AppState,
};

pub const MIN_PASSWORD_LEN: usize = 8;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^\S+@\S+\.\S+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// E.164-like: optional `+`, no leading zero, at most 15 digits.
pub(crate) fn is_valid_phone(phone: &str) -> bool {
    lazy_static! {
        static ref PHONE_RE: Regex = Regex::new(r"^\+?[1-9]\d{1,14}$").unwrap();
    }
    PHONE_RE.is_match(phone)
}

fn present(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn check_password_strength(password: &str) -> AppResult<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::Validation(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

pub struct LoginOutcome {
    pub token: String,
    pub user: User,
}

pub async fn register(st: &AppState, req: RegisterRequest) -> AppResult<User> {
    let (Some(name), Some(email), Some(phone), Some(password), Some(role)) = (
        present(req.name),
        present(req.email),
        present(req.phone),
        // passwords are taken verbatim, only emptiness is checked
        req.password.filter(|p| !p.is_empty()),
        present(req.role),
    ) else {
        return Err(AppError::Validation(
            "Please provide all required fields".into(),
        ));
    };

    let email = normalize_email(&email);
    if !is_valid_email(&email) {
        warn!(email = %email, "invalid email");
        return Err(AppError::Validation("Please use a valid email address.".into()));
    }
    if !is_valid_phone(&phone) {
        warn!(phone = %phone, "invalid phone");
        return Err(AppError::Validation("Please use a valid phone number.".into()));
    }
    let role = role
        .parse::<Role>()
        .map_err(|_| AppError::Validation("Role must be Customer, Vendor or Admin".into()))?;
    check_password_strength(&password)?;

    if st.store.find_by_email(&email).await?.is_some()
        || st.store.find_by_phone(&phone).await?.is_some()
    {
        warn!(email = %email, phone = %phone, "email or phone already registered");
        return Err(AppError::Conflict("Email or phone already exists".into()));
    }

    let password_hash = st.passwords.hash(&password)?;
    let user = st
        .store
        .insert(NewUser {
            name,
            email,
            phone,
            password_hash,
            role,
        })
        .await?;

    info!(user_id = %user.id, role = %user.role, "user registered");
    Ok(user)
}

/// Issues a fresh challenge for the account owning `phone` and sends it.
/// A failed send withdraws the challenge again.
pub async fn request_otp(st: &AppState, phone: Option<String>) -> AppResult<()> {
    let phone = present(phone).ok_or_else(|| AppError::Validation("Please provide phone".into()))?;
    let user = st
        .store
        .find_by_phone(&phone)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".into()))?;

    let otp = generate_otp(Duration::seconds(st.config.otp_ttl_seconds));
    st.store.set_otp(user.id, &otp).await?;

    if let Err(e) = st.sms.send(&user.phone, &otp.code).await {
        // compensate: withdraw the undelivered code unless a newer one replaced it
        match st.store.clear_otp_if(user.id, &otp.code).await {
            Ok(cleared) => warn!(user_id = %user.id, cleared, "otp withdrawn after failed send"),
            Err(clear_err) => {
                warn!(user_id = %user.id, error = %clear_err, "could not withdraw undelivered otp")
            }
        }
        return Err(e.into());
    }

    info!(user_id = %user.id, expires_at = %otp.expires_at, "otp issued");
    Ok(())
}

/// Returns a bearer token and the activated user.
pub async fn verify_otp(
    st: &AppState,
    phone: Option<String>,
    code: Option<String>,
) -> AppResult<(String, User)> {
    let (Some(phone), Some(code)) = (present(phone), present(code)) else {
        return Err(AppError::Validation("Please provide phone and otp".into()));
    };
    let user = st
        .store
        .find_by_phone(&phone)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".into()))?;

    let now = OffsetDateTime::now_utc();
    let matches = user.otp.as_ref().is_some_and(|o| o.is_valid_at(&code, now));
    if !matches {
        warn!(user_id = %user.id, outstanding = user.otp.is_some(), "otp rejected");
        return Err(AppError::InvalidOtp);
    }

    // a concurrent verify or a newer request may have replaced the code meanwhile
    let user = st
        .store
        .consume_otp(user.id, &code, now)
        .await?
        .ok_or(AppError::InvalidOtp)?;

    let token = st.jwt.sign(user.id, user.role)?;
    info!(user_id = %user.id, "otp verified; account active");
    Ok((token, user))
}

pub async fn login(st: &AppState, req: LoginRequest) -> AppResult<LoginOutcome> {
    let email = present(req.email).map(|e| normalize_email(&e));
    let phone = present(req.phone);
    if email.is_none() && phone.is_none() {
        return Err(AppError::Validation(
            "Please provide either email or phone".into(),
        ));
    }
    let password = req
        .password
        .filter(|p| !p.is_empty())
        .ok_or_else(|| AppError::Validation("Please provide your password".into()))?;

    let mut found = match &email {
        Some(email) => st.store.find_by_email(email).await?,
        None => None,
    };
    // an unknown email still lets a supplied phone identify the account
    if found.is_none() {
        if let Some(phone) = &phone {
            found = st.store.find_by_phone(phone).await?;
        }
    }
    let user = found.ok_or_else(|| AppError::NotFound("User not found".into()))?;

    if !st.passwords.verify(&password, &user.password_hash)? {
        warn!(user_id = %user.id, "login invalid password");
        return Err(AppError::InvalidCredentials);
    }

    let token = st.jwt.sign(user.id, user.role)?;
    info!(user_id = %user.id, "user logged in");
    Ok(LoginOutcome { token, user })
}

/// Sets a new password for the account owning `email`. With
/// `reset_requires_otp` the submitted otp must be live and is consumed.
pub async fn reset_password(st: &AppState, req: ForgotPasswordRequest) -> AppResult<()> {
    let email = present(req.email)
        .map(|e| normalize_email(&e))
        .ok_or_else(|| AppError::Validation("Please provide email".into()))?;
    let user = st
        .store
        .find_by_email(&email)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".into()))?;

    let new_password = req
        .new_password
        .filter(|p| !p.is_empty())
        .ok_or_else(|| AppError::Validation("Please provide the required fields.".into()))?;

    if !st.config.reset_requires_otp {
        check_password_strength(&new_password)?;
        let password_hash = st.passwords.hash(&new_password)?;
        st.store.update_password(user.id, &password_hash).await?;
        info!(user_id = %user.id, "password reset");
        return Ok(());
    }

    let now = OffsetDateTime::now_utc();
    let submitted = present(req.otp).unwrap_or_default();
    if !user.otp.as_ref().is_some_and(|o| o.is_valid_at(&submitted, now)) {
        warn!(user_id = %user.id, "password reset with invalid otp");
        return Err(AppError::InvalidOtp);
    }
    check_password_strength(&new_password)?;

    let password_hash = st.passwords.hash(&new_password)?;
    // the code is spent by the same update that replaces the password
    let replaced = st
        .store
        .update_password_if(user.id, &password_hash, &submitted, now)
        .await?;
    if !replaced {
        warn!(user_id = %user.id, "password reset otp already used or replaced");
        return Err(AppError::InvalidOtp);
    }
    info!(user_id = %user.id, "password reset with otp");
    Ok(())
}

pub async fn current_user(st: &AppState, user_id: Uuid) -> AppResult<User> {
    st.store
        .find_by_id(user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".into()))
}
