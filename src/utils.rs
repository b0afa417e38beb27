use std::convert::TryFrom;
use chrono::{DateTime, Duration, NaiveDate, Utc};

use crate::error::Result;

/// The calendar date (UTC) that recommendation batches are keyed on
pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}

/// `secs` as a `Duration`, failing instead of panicking when it doesn't fit
pub fn duration_seconds(secs: u64) -> Result<Duration> {
    i64::try_from(secs)
        .ok()
        .and_then(|s| s.checked_mul(1000))
        .map(Duration::milliseconds)
        .ok_or_else(|| se!("duration out of range {}s", secs))
}

/// Absolute expiration of a token that spotify says is good for `expires_in` seconds
pub fn expires_at_from_now(expires_in: u64) -> Result<DateTime<Utc>> {
    let now = Utc::now();
    now.checked_add_signed(duration_seconds(expires_in)?)
        .ok_or_else(|| se!("can't add {:?}s to time {:?}", expires_in, now))
}

/// A random opaque token, hex encoded
pub fn new_token() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
