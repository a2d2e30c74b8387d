use chrono::{DateTime, Duration, NaiveDate, Utc};

use super::rows::AGE_TOKEN_RE;

/// Approximate UTC posting date for an age token, relative to `now`.
/// A month is always 30 days.
pub fn estimate_date(token: Option<&str>, now: DateTime<Utc>) -> Option<NaiveDate> {
    let caps = AGE_TOKEN_RE.captures(token?)?;
    let amount: i64 = caps[1].parse().ok()?;

    let delta = match caps[2].to_lowercase().as_str() {
        "h" => Duration::try_hours(amount)?,
        "d" => Duration::try_days(amount)?,
        "w" => Duration::try_weeks(amount)?,
        "mo" => Duration::try_days(amount.checked_mul(30)?)?,
        _ => return None,
    };

    now.checked_sub_signed(delta).map(|posted| posted.date_naive())
}
