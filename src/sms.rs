use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use tracing::{info, warn};

use crate::config::TwilioConfig;

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("sms request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("sms provider rejected message ({status}): {body}")]
    Rejected { status: u16, body: String },
}

/// Delivers one-time codes to a phone number.
#[async_trait]
pub trait OtpSender: Send + Sync {
    async fn send(&self, phone: &str, code: &str) -> Result<(), DeliveryError>;
}

pub fn otp_message(code: &str, ttl_minutes: i64) -> String {
    format!("Your verification code is {code}. It is valid for {ttl_minutes} minutes.")
}

/// Twilio Programmable Messaging client.
#[derive(Clone)]
pub struct TwilioSender {
    client: reqwest::Client,
    account_sid: String,
    auth_token: String,
    from_number: String,
    base_url: String,
    ttl_minutes: i64,
}

impl TwilioSender {
    pub fn new(cfg: &TwilioConfig, otp_ttl_seconds: i64) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_seconds))
            .build()
            .context("build sms http client")?;
        Ok(Self {
            client,
            account_sid: cfg.account_sid.clone(),
            auth_token: cfg.auth_token.clone(),
            from_number: cfg.from_number.clone(),
            base_url: "https://api.twilio.com".into(),
            ttl_minutes: (otp_ttl_seconds / 60).max(1),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.base_url.trim_end_matches('/'),
            self.account_sid
        )
    }
}

#[async_trait]
impl OtpSender for TwilioSender {
    async fn send(&self, phone: &str, code: &str) -> Result<(), DeliveryError> {
        let body = otp_message(code, self.ttl_minutes);
        let form = [
            ("To", phone),
            ("From", self.from_number.as_str()),
            ("Body", body.as_str()),
        ];
        let res = self
            .client
            .post(self.messages_url())
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&form)
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            warn!(%status, phone, "sms provider rejected message");
            return Err(DeliveryError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        info!(phone, "otp sms sent");
        Ok(())
    }
}

/// Stand-in used when no provider is configured. Never reveals the code.
#[derive(Clone, Default)]
pub struct LogSender;

#[async_trait]
impl OtpSender for LogSender {
    async fn send(&self, phone: &str, _code: &str) -> Result<(), DeliveryError> {
        warn!(phone, "no sms provider configured; otp not delivered");
        Ok(())
    }
}
