use std::sync::Arc;

use tracing::{info, warn};

use crate::auth::{
    jwt::JwtKeys,
    memory::MemoryUserStore,
    password::Passwords,
    repo::{PgUserStore, UserStore},
};
use crate::config::{AppConfig, SmsBackend, StoreBackend};
use crate::db;
use crate::sms::{LogSender, OtpSender, TwilioSender};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn UserStore>,
    pub sms: Arc<dyn OtpSender>,
    pub jwt: JwtKeys,
    pub passwords: Passwords,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let store: Arc<dyn UserStore> = match config.store {
            StoreBackend::Postgres => {
                let pool = db::connect(&config).await?;
                db::migrate(&pool).await?;
                Arc::new(PgUserStore::new(pool))
            }
            StoreBackend::Memory => {
                warn!("using in-memory user store; data is lost on restart");
                Arc::new(MemoryUserStore::new())
            }
        };

        let sms: Arc<dyn OtpSender> = match &config.sms {
            SmsBackend::Twilio(twilio) => {
                info!("sms delivery via twilio");
                Arc::new(TwilioSender::new(twilio, config.otp_ttl_seconds)?)
            }
            SmsBackend::Log => {
                warn!("sms backend is log; otp codes will not be delivered");
                Arc::new(LogSender)
            }
        };

        Self::from_parts(config, store, sms)
    }

    pub fn from_parts(
        config: Arc<AppConfig>,
        store: Arc<dyn UserStore>,
        sms: Arc<dyn OtpSender>,
    ) -> anyhow::Result<Self> {
        let jwt = JwtKeys::new(&config.jwt);
        let passwords = Passwords::new(&config.password)?;
        Ok(Self {
            config,
            store,
            sms,
            jwt,
            passwords,
        })
    }
}
