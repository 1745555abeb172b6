//! Timestamps shared by groups and entries, plus their XML encodings
//!
//! KDBX 3.x writes ISO-8601 strings, KDBX 4.x writes base64 of an i64 (LE)
//! counting seconds since 0001-01-01T00:00:00Z. Both are accepted on read.

use crate::error::{Error, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, NaiveDateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

/// Seconds between 0001-01-01 and the Unix epoch
const EPOCH_OFFSET: i64 = 62_135_596_800;

/// Current time truncated to whole seconds, the resolution the format stores
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(0)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Times {
    pub creation: DateTime<Utc>,
    pub last_modification: DateTime<Utc>,
    pub last_access: DateTime<Utc>,
    pub expiry: DateTime<Utc>,
    pub expires: bool,
    pub usage_count: u64,
    pub location_changed: DateTime<Utc>,
}

impl Default for Times {
    fn default() -> Self {
        Self::now()
    }
}

impl Times {
    pub fn now() -> Self {
        let now = now();
        Self {
            creation: now,
            last_modification: now,
            last_access: now,
            expiry: now,
            expires: false,
            usage_count: 0,
            location_changed: now,
        }
    }

    /// Record an access, and a modification when `modified` is set
    pub fn touch(&mut self, modified: bool) {
        let now = now();
        self.last_access = now;
        if modified {
            self.last_modification = now;
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expires && self.expiry <= Utc::now()
    }
}

/// Encode a timestamp for the given generation
pub fn encode(time: &DateTime<Utc>, legacy: bool) -> String {
    if legacy {
        time.format("%Y-%m-%dT%H:%M:%SZ").to_string()
    } else {
        let secs = time.timestamp() + EPOCH_OFFSET;
        BASE64.encode(secs.to_le_bytes())
    }
}

/// Decode either timestamp form
pub fn decode(text: &str) -> Result<DateTime<Utc>> {
    let text = text.trim();
    let bad = || Error::MalformedDocument(format!("Invalid timestamp '{}'", text));

    if text.contains('-') && text.contains(':') {
        if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
            return Ok(dt.with_timezone(&Utc).trunc_subsecs(0));
        }
        let naive = NaiveDateTime::parse_from_str(text.trim_end_matches('Z'), "%Y-%m-%dT%H:%M:%S")
            .map_err(|_| bad())?;
        return Ok(naive.and_utc());
    }

    let bytes = BASE64.decode(text).map_err(|_| bad())?;
    let raw: [u8; 8] = bytes.as_slice().try_into().map_err(|_| bad())?;
    let secs = i64::from_le_bytes(raw);
    DateTime::from_timestamp(secs.saturating_sub(EPOCH_OFFSET), 0).ok_or_else(bad)
}
