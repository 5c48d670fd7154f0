use rand::{rngs::OsRng, Rng};
use time::{Duration, OffsetDateTime};

/// Number of digits in a verification code.
pub const OTP_LENGTH: usize = 6;

/// A pending email verification code and the instant it stops being accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Otp {
    pub code: String,
    pub expires_at: OffsetDateTime,
}

impl Otp {
    pub fn generate(ttl_minutes: i64) -> Self {
        let low = 10u32.pow(OTP_LENGTH as u32 - 1);
        let code = OsRng.gen_range(low..low * 10).to_string();
        Self {
            code,
            expires_at: OffsetDateTime::now_utc() + Duration::minutes(ttl_minutes),
        }
    }
}

/// Exact-match check of a submitted code against the stored pair.
pub fn otp_matches(
    stored_code: Option<&str>,
    stored_expiry: Option<OffsetDateTime>,
    submitted: &str,
    now: OffsetDateTime,
) -> bool {
    match (stored_code, stored_expiry) {
        (Some(code), Some(expiry)) => code == submitted && now <= expiry,
        _ => false,
    }
}
