use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
}

/// Argon2 cost parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct PasswordConfig {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for PasswordConfig {
    fn default() -> Self {
        Self {
            memory_kib: argon2::Params::DEFAULT_M_COST,
            iterations: argon2::Params::DEFAULT_T_COST,
            parallelism: argon2::Params::DEFAULT_P_COST,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: String,
    pub from_number: String,
    pub timeout_seconds: u64,
}

/// Where one-time codes go. `Log` never delivers anything.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SmsBackend {
    Twilio(TwilioConfig),
    Log,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub store: StoreBackend,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub jwt: JwtConfig,
    pub password: PasswordConfig,
    pub otp_ttl_seconds: i64,
    pub reset_requires_otp: bool,
    pub sms: SmsBackend,
}

/// Upper bound for `OTP_TTL_SECONDS`.
pub const MAX_OTP_TTL_SECONDS: i64 = 24 * 60 * 60;

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let store = match env_or("STORE_BACKEND", "postgres").to_lowercase().as_str() {
            "postgres" => StoreBackend::Postgres,
            "memory" => StoreBackend::Memory,
            other => anyhow::bail!("unknown STORE_BACKEND {other:?}"),
        };
        let database_url = std::env::var("DATABASE_URL").ok();
        if store == StoreBackend::Postgres && database_url.is_none() {
            anyhow::bail!("DATABASE_URL is required when STORE_BACKEND=postgres");
        }

        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET").context("JWT_SECRET is required")?,
            issuer: env_or("JWT_ISSUER", "storefront"),
            audience: env_or("JWT_AUDIENCE", "storefront-users"),
            ttl_minutes: parsed_or("JWT_TTL_MINUTES", 60),
        };

        let defaults = PasswordConfig::default();
        let password = PasswordConfig {
            memory_kib: parsed_or("PASSWORD_MEMORY_KIB", defaults.memory_kib),
            iterations: parsed_or("PASSWORD_ITERATIONS", defaults.iterations),
            parallelism: parsed_or("PASSWORD_PARALLELISM", defaults.parallelism),
        };

        let twilio = match (
            std::env::var("TWILIO_ACCOUNT_SID"),
            std::env::var("TWILIO_AUTH_TOKEN"),
            std::env::var("TWILIO_FROM_NUMBER"),
        ) {
            (Ok(account_sid), Ok(auth_token), Ok(from_number)) => Some(TwilioConfig {
                account_sid,
                auth_token,
                from_number,
                timeout_seconds: parsed_or("SMS_TIMEOUT_SECONDS", 10),
            }),
            _ => None,
        };
        let sms_backend = std::env::var("SMS_BACKEND").ok();
        let sms = resolve_sms(sms_backend.as_deref(), twilio, store)?;

        let otp_ttl_seconds = check_otp_ttl(parsed_or("OTP_TTL_SECONDS", 300))?;

        Ok(Self {
            store,
            database_url,
            database_max_connections: parsed_or("DATABASE_MAX_CONNECTIONS", 10),
            jwt,
            password,
            otp_ttl_seconds,
            reset_requires_otp: parsed_or("RESET_REQUIRES_OTP", false),
            sms,
        })
    }
}

fn check_otp_ttl(seconds: i64) -> anyhow::Result<i64> {
    if seconds <= 0 || seconds > MAX_OTP_TTL_SECONDS {
        anyhow::bail!("OTP_TTL_SECONDS must be within 1..={MAX_OTP_TTL_SECONDS}, got {seconds}");
    }
    Ok(seconds)
}

/// Without an explicit `SMS_BACKEND`, Twilio is used when configured and the
/// log sender is only accepted alongside the in-memory store.
fn resolve_sms(
    explicit: Option<&str>,
    twilio: Option<TwilioConfig>,
    store: StoreBackend,
) -> anyhow::Result<SmsBackend> {
    match explicit.map(|v| v.trim().to_lowercase()).as_deref() {
        Some("log") => Ok(SmsBackend::Log),
        Some("twilio") => twilio
            .map(SmsBackend::Twilio)
            .context("SMS_BACKEND=twilio requires TWILIO_ACCOUNT_SID, TWILIO_AUTH_TOKEN and TWILIO_FROM_NUMBER"),
        Some(other) => anyhow::bail!("unknown SMS_BACKEND {other:?}"),
        None => match (twilio, store) {
            (Some(cfg), _) => Ok(SmsBackend::Twilio(cfg)),
            (None, StoreBackend::Memory) => Ok(SmsBackend::Log),
            (None, StoreBackend::Postgres) => anyhow::bail!(
                "TWILIO_* settings are required; set SMS_BACKEND=log to run without sms delivery"
            ),
        },
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.into())
}

fn parsed_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}
