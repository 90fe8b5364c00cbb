use std::fmt;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use uuid::Uuid;

use crate::throttler::Verdict;

/// Shape of a valid crash id.
///
/// 25 random hex digits in the familiar 8-4-4-4 grouping, then two digits of
/// year, month and day each, then one trailing digit carrying the throttle
/// verdict.
static CRASH_ID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?x)
        ^
        [0-9a-f]{8}-
        [0-9a-f]{4}-
        [0-9a-f]{4}-
        [0-9a-f]{4}-
        [0-9a-f]{5}
        [0-9]{2}                  # year
        (0[1-9]|1[0-2])           # month
        (0[1-9]|[12][0-9]|3[01])  # day
        [01]                      # throttle verdict
        $
    ",
    )
    .expect("crash id regex is valid")
});

/// Number of leading characters carrying random hex material.
const RANDOM_PREFIX_LEN: usize = 29;

/// A 36-character crash identifier.
///
/// The identifier keeps the shape of a hyphenated UUID but replaces the last
/// seven characters with collection metadata:
///
/// ```text
/// de1bb258-cbbf-4589-a673-34f80250918 0
///                          ^^^^^|____|^
///                          |    yymmdd|
///                          |          throttle verdict
///                          random hex
/// ```
///
/// A downstream consumer that only sees the identifier can recover both the
/// collection date and whether processing was requested, without loading the
/// stored crash. Uniqueness rests on the random prefix; no collision check is
/// performed.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize)]
#[serde(transparent)]
pub struct CrashId(String);

impl CrashId {
    /// Generates a new crash id for the given collection date and verdict.
    ///
    /// Verdicts other than [`Verdict::Defer`] encode the accept digit; only
    /// deferred crashes are marked as saved-but-not-processed.
    pub fn generate(timestamp: DateTime<Utc>, verdict: Verdict) -> Self {
        let uuid = Uuid::new_v4();
        let mut buffer = Uuid::encode_buffer();
        let hyphenated = uuid.as_hyphenated().encode_lower(&mut buffer);

        let mut id = String::with_capacity(36);
        id.push_str(&hyphenated[..RANDOM_PREFIX_LEN]);
        Self::push_suffix(&mut id, timestamp, verdict);
        CrashId(id)
    }

    /// Adopts a client-supplied identifier if it has the right shape.
    ///
    /// The random prefix is kept; the date and verdict digits are always
    /// rewritten to the collector's values so the client cannot dictate
    /// routing.
    pub fn adopt(candidate: &str, timestamp: DateTime<Utc>, verdict: Verdict) -> Option<Self> {
        if !CRASH_ID_RE.is_match(candidate) {
            return None;
        }

        let mut id = String::with_capacity(36);
        id.push_str(&candidate[..RANDOM_PREFIX_LEN]);
        Self::push_suffix(&mut id, timestamp, verdict);
        Some(CrashId(id))
    }

    /// Parses an existing crash id, validating its shape.
    pub fn parse(value: &str) -> Option<Self> {
        CRASH_ID_RE
            .is_match(value)
            .then(|| CrashId(value.to_owned()))
    }

    fn push_suffix(id: &mut String, timestamp: DateTime<Utc>, verdict: Verdict) {
        use fmt::Write;

        let digit = match verdict {
            Verdict::Defer => 1,
            _ => 0,
        };

        write!(
            id,
            "{:02}{:02}{:02}{}",
            timestamp.year() % 100,
            timestamp.month(),
            timestamp.day(),
            digit
        )
        .expect("writing to a string never fails");
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The first three characters, used to spread storage keys.
    pub fn entropy(&self) -> &str {
        &self.0[..3]
    }

    /// The collection date encoded in the identifier.
    pub fn date(&self) -> NaiveDate {
        let digits = &self.0[29..35];
        let year = 2000 + digits[0..2].parse::<i32>().unwrap_or(0);
        let month = digits[2..4].parse::<u32>().unwrap_or(1);
        let day = digits[4..6].parse::<u32>().unwrap_or(1);

        NaiveDate::from_ymd_opt(year, month, day)
            .unwrap_or_else(|| NaiveDate::from_ymd_opt(year, 1, 1).unwrap_or_default())
    }

    /// The collection date as `YYYYMMDD`, as used in storage keys.
    pub fn date_key(&self) -> String {
        format!("20{}", &self.0[29..35])
    }

    /// The throttle digit: `0` for accepted, `1` for deferred crashes.
    pub fn throttle_digit(&self) -> u8 {
        if self.0.ends_with('1') {
            1
        } else {
            0
        }
    }
}

impl fmt::Display for CrashId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CrashId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
