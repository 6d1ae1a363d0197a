//! Directory timestamp codec
//!
//! Two encodings are in use:
//!
//! - generalized time (`YYYYMMDDHHMMSSZ`, RFC 4517), used by most servers
//!   for `createTimestamp`/`modifyTimestamp`;
//! - Active Directory integer timestamps: 100-nanosecond intervals since
//!   1601-01-01T00:00:00Z (`accountExpires`, `pwdLastSet`, `lastLogon`).
//!
//! Both are stateless and convert to and from `DateTime<Utc>`. Generalized
//! time keeps microseconds; AD timestamps keep the full 100 ns tick.

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{OrmError, OrmResult};

/// Seconds between 1601-01-01 and 1970-01-01.
pub const UNIX_EPOCH_DIFFERENCE: i64 = ((1970 - 1601) * 365 - 3 + 92) * 86_400;

const TICKS_PER_SECOND: i64 = 10_000_000;
const NANOS_PER_TICK: u32 = 100;

/// Largest AD timestamp; `accountExpires` uses it for "never".
pub const AD_NEVER: i64 = i64::MAX;
const GENERALIZED_TIME_FORMAT: &str = "%Y%m%d%H%M%S";

static TIMESTAMP_PREFIX: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"^\d{14}").expect("TIMESTAMP_PREFIX is a valid regex pattern")
});

/// Directory flavour. Selects the timestamp encoding used in filters and
/// serialized entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    #[default]
    Generic,
    ActiveDirectory,
}

impl Dialect {
    /// Pick the dialect from an `active_directory` flag.
    pub fn from_active_directory(active_directory: bool) -> Self {
        if active_directory {
            Dialect::ActiveDirectory
        } else {
            Dialect::Generic
        }
    }

    /// Encode a date-time in this dialect's native format.
    pub fn encode(self, value: &DateTime<Utc>) -> String {
        match self {
            Dialect::Generic => encode_generalized_time(value),
            Dialect::ActiveDirectory => encode_ad_timestamp(value),
        }
    }

    /// Decode a directory timestamp in this dialect's native format.
    pub fn decode(self, raw: &str) -> OrmResult<DateTime<Utc>> {
        match self {
            Dialect::Generic => decode_generalized_time(raw),
            Dialect::ActiveDirectory => decode_ad_timestamp(raw),
        }
    }
}

/// Whether a raw attribute value starts with 14 digits.
pub fn looks_like_timestamp(raw: &str) -> bool {
    TIMESTAMP_PREFIX.is_match(raw)
}

/// Encode as generalized time. A fractional part is emitted only when the
/// value has one.
pub fn encode_generalized_time(value: &DateTime<Utc>) -> String {
    let mut out = value.format(GENERALIZED_TIME_FORMAT).to_string();
    let micros = value.nanosecond() / 1_000;
    if micros != 0 {
        let fraction = format!("{micros:06}");
        out.push('.');
        out.push_str(fraction.trim_end_matches('0'));
    }
    out.push('Z');
    out
}

/// Decode `YYYYMMDDHHMMSS[.f]Z`.
pub fn decode_generalized_time(raw: &str) -> OrmResult<DateTime<Utc>> {
    let invalid = |message: &str| OrmError::InvalidTimestamp {
        value: raw.to_string(),
        message: message.to_string(),
    };

    let body = raw.trim().strip_suffix('Z').unwrap_or(raw.trim());
    let (whole, fraction) = match body.split_once('.') {
        Some((whole, fraction)) => (whole, Some(fraction)),
        None => (body, None),
    };

    if whole.len() != 14 || !whole.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid("expected 14 leading digits"));
    }

    let naive = NaiveDateTime::parse_from_str(whole, GENERALIZED_TIME_FORMAT)
        .map_err(|e| invalid(&e.to_string()))?;

    let nanos = match fraction {
        None => 0,
        Some(f) if f.is_empty() || f.len() > 9 || !f.bytes().all(|b| b.is_ascii_digit()) => {
            return Err(invalid("malformed fractional seconds"));
        }
        Some(f) => format!("{f:0<9}")
            .parse::<u32>()
            .map_err(|e| invalid(&e.to_string()))?,
    };

    naive
        .with_nanosecond(nanos)
        .map(|n| n.and_utc())
        .ok_or_else(|| invalid("fractional seconds out of range"))
}

/// Encode as an Active Directory integer timestamp.
///
/// Instants before 1601 encode as `0` and instants past the last
/// representable tick encode as [`AD_NEVER`].
pub fn encode_ad_timestamp(value: &DateTime<Utc>) -> String {
    let seconds = value.timestamp().saturating_add(UNIX_EPOCH_DIFFERENCE);
    if seconds < 0 {
        return "0".to_string();
    }
    let sub_ticks = i64::from(value.timestamp_subsec_nanos() / NANOS_PER_TICK);
    seconds
        .checked_mul(TICKS_PER_SECOND)
        .and_then(|ticks| ticks.checked_add(sub_ticks))
        .unwrap_or(AD_NEVER)
        .to_string()
}

/// Decode an Active Directory timestamp.
///
/// Integer tick counts are accepted with or without a trailing `.0Z`. The
/// 14-digit generalized-time form AD uses for `whenCreated`/`whenChanged`
/// goes through the generic codec. [`AD_NEVER`] decodes to its instant in
/// year 30828 and encodes back to the same value.
pub fn decode_ad_timestamp(raw: &str) -> OrmResult<DateTime<Utc>> {
    let trimmed = raw.trim();
    let digits = trimmed.strip_suffix(".0Z").unwrap_or(trimmed);
    let is_ticks = trimmed.len() > 17
        || (digits.len() != 14 && !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()));
    if !is_ticks {
        return decode_generalized_time(trimmed);
    }

    let invalid = |message: String| OrmError::InvalidTimestamp {
        value: raw.to_string(),
        message,
    };

    let ticks: i64 = digits.parse().map_err(|e| invalid(format!("{e}")))?;

    let seconds = ticks.div_euclid(TICKS_PER_SECOND) - UNIX_EPOCH_DIFFERENCE;
    let nanos = ticks.rem_euclid(TICKS_PER_SECOND) * i64::from(NANOS_PER_TICK);

    u32::try_from(nanos)
        .ok()
        .and_then(|nanos| DateTime::from_timestamp(seconds, nanos))
        .ok_or_else(|| invalid("timestamp out of range".to_string()))
}
