use rand::{rngs::OsRng, Rng};
use time::{Duration, OffsetDateTime};

use crate::auth::repo_types::OtpChallenge;

pub const OTP_MIN: u32 = 100_000;
pub const OTP_MAX: u32 = 999_999;

/// Fresh 6-digit challenge expiring `ttl` from now.
pub fn generate_otp(ttl: Duration) -> OtpChallenge {
    generate_otp_at(OffsetDateTime::now_utc(), ttl)
}

pub fn generate_otp_at(now: OffsetDateTime, ttl: Duration) -> OtpChallenge {
    let code = OsRng.gen_range(OTP_MIN..=OTP_MAX);
    OtpChallenge {
        code: code.to_string(),
        expires_at: now + ttl,
    }
}
