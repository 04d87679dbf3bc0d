use crate::error::IndexerError;
use chrono::{DateTime, FixedOffset, Local, LocalResult, NaiveDateTime, Offset, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

/// `<camera>_<YYYYMMDD>_<HHMMSS>.mp4`
static FLAT_KEY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Za-z0-9_-]+)_(\d{8}_\d{6})\.mp4$").expect("flat key pattern is valid")
});

/// `<camera>/<YYYY>/<MM>/<DD>/<...>_<YYYYMMDD>_<HHMMSS>.mp4`
static HIERARCHICAL_KEY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Za-z0-9_-]+)/\d{4}/\d{2}/\d{2}/.*_(\d{8}_\d{6})\.mp4$")
        .expect("hierarchical key pattern is valid")
});

const KEY_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Result of matching an object key against the segment naming grammars
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedKey {
    /// The key names a segment
    Recognized {
        camera_id: String,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
    },
    /// The key is some other object in the bucket
    Unrecognized,
}

impl ParsedKey {
    pub fn is_recognized(&self) -> bool {
        matches!(self, ParsedKey::Recognized { .. })
    }
}

/// Timezone in which the wall-clock timestamp embedded in a key is read.
///
/// Defaults to the host's local zone. Keys carry no offset, so two deployments
/// in different zones index the same key at different instants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum ParseTimezone {
    /// Host local timezone
    #[default]
    Local,
    /// UTC
    Utc,
    /// Fixed offset from UTC, written `+07:00` or `-0530`
    Fixed(FixedOffset),
}

impl ParseTimezone {
    /// Resolve a wall-clock time in this zone to a UTC instant.
    ///
    /// Ambiguous local times (DST fall-back) resolve to the earliest instant.
    /// Local times skipped by a spring-forward are read with the offset in
    /// force just before the transition, so `02:30` in a `02:00 -> 03:00` gap
    /// lands on `03:30` after it.
    pub fn resolve(&self, naive: &NaiveDateTime) -> Option<DateTime<Utc>> {
        match self {
            ParseTimezone::Local => resolve_wall_clock(&Local, naive),
            ParseTimezone::Utc => Some(Utc.from_utc_datetime(naive)),
            ParseTimezone::Fixed(offset) => resolve_wall_clock(offset, naive),
        }
    }
}

/// Longest DST gap looked back over when resolving a skipped wall-clock time
const MAX_DST_GAP_HOURS: i64 = 3;

fn resolve_wall_clock<Tz: TimeZone>(tz: &Tz, naive: &NaiveDateTime) -> Option<DateTime<Utc>> {
    match tz.from_local_datetime(naive) {
        LocalResult::Single(t) => Some(t.with_timezone(&Utc)),
        LocalResult::Ambiguous(earliest, _) => Some(earliest.with_timezone(&Utc)),
        LocalResult::None => {
            let before = tz
                .from_local_datetime(&(*naive - chrono::Duration::hours(MAX_DST_GAP_HOURS)))
                .earliest()?;
            before
                .offset()
                .fix()
                .from_local_datetime(naive)
                .single()
                .map(|t| t.with_timezone(&Utc))
        }
    }
}

impl FromStr for ParseTimezone {
    type Err = IndexerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "local" => return Ok(ParseTimezone::Local),
            "utc" | "z" => return Ok(ParseTimezone::Utc),
            _ => {}
        }

        parse_fixed_offset(trimmed)
            .map(ParseTimezone::Fixed)
            .ok_or_else(|| {
                IndexerError::Config(format!(
                    "invalid timezone {s:?}: expected local, utc or an offset like +07:00"
                ))
            })
    }
}

impl TryFrom<String> for ParseTimezone {
    type Error = IndexerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for ParseTimezone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseTimezone::Local => f.write_str("local"),
            ParseTimezone::Utc => f.write_str("utc"),
            ParseTimezone::Fixed(offset) => write!(f, "{offset}"),
        }
    }
}

fn parse_fixed_offset(s: &str) -> Option<FixedOffset> {
    let (sign, rest) = match s.as_bytes().first().copied()? {
        b'+' => (1, &s[1..]),
        b'-' => (-1, &s[1..]),
        _ => return None,
    };
    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let hours: i32 = digits[..2].parse().ok()?;
    let minutes: i32 = digits[2..].parse().ok()?;
    if hours > 23 || minutes > 59 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

/// Parse a storage key into camera identity and time range.
///
/// The flat grammar is tried first, then the hierarchical one. Anything else,
/// including a structurally valid key whose timestamp is not a real calendar
/// time, is [`ParsedKey::Unrecognized`]. No overlap checks are made against
/// neighbouring segments.
pub fn parse_key(
    key: &str,
    segment_duration: chrono::Duration,
    timezone: ParseTimezone,
) -> ParsedKey {
    let captures = FLAT_KEY
        .captures(key)
        .or_else(|| HIERARCHICAL_KEY.captures(key));

    let Some(captures) = captures else {
        return ParsedKey::Unrecognized;
    };

    let camera_id = &captures[1];
    let timestamp = &captures[2];

    let Ok(naive) = NaiveDateTime::parse_from_str(timestamp, KEY_TIMESTAMP_FORMAT) else {
        debug!(key = %key, timestamp = %timestamp, "Key timestamp is not a valid date");
        return ParsedKey::Unrecognized;
    };

    let Some(started_at) = timezone.resolve(&naive) else {
        debug!(key = %key, timezone = %timezone, "Key timestamp cannot be resolved in timezone");
        return ParsedKey::Unrecognized;
    };

    let Some(ended_at) = started_at.checked_add_signed(segment_duration) else {
        return ParsedKey::Unrecognized;
    };

    ParsedKey::Recognized {
        camera_id: camera_id.to_string(),
        started_at,
        ended_at,
    }
}

/// Key parser bound to the process-wide segment duration and timezone
#[derive(Debug, Clone, Copy)]
pub struct KeyParser {
    segment_duration: chrono::Duration,
    timezone: ParseTimezone,
}

impl KeyParser {
    pub fn new(segment_duration: Duration, timezone: ParseTimezone) -> Result<Self, IndexerError> {
        let segment_duration = chrono::Duration::from_std(segment_duration).map_err(|e| {
            IndexerError::Config(format!("segment duration out of range: {e}"))
        })?;

        Ok(Self {
            segment_duration,
            timezone,
        })
    }

    pub fn parse(&self, key: &str) -> ParsedKey {
        parse_key(key, self.segment_duration, self.timezone)
    }
}
