/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use crate::error::EngineError;
use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

/// A calendar date or date-time value.
///
/// Date-only values have no time component at all; floating values carry a
/// wall-clock time with no zone; zoned values keep the local wall-clock time
/// together with the IANA zone it is anchored to. The variant is preserved
/// through arithmetic so that a date-only master never grows a time-of-day
/// and a zoned master keeps its zone across generated instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalDateTime {
    Date(NaiveDate),
    Floating(NaiveDateTime),
    Utc(DateTime<Utc>),
    Zoned { local: NaiveDateTime, tz: Tz },
}

impl CalDateTime {
    pub fn is_date_only(&self) -> bool {
        matches!(self, CalDateTime::Date(_))
    }

    /// UTC timestamp in seconds. Date-only values resolve to midnight UTC,
    /// floating values are interpreted as UTC wall-clock time.
    pub fn timestamp(&self) -> i64 {
        match self {
            CalDateTime::Date(d) => Utc
                .from_utc_datetime(&d.and_hms_opt(0, 0, 0).unwrap_or_default())
                .timestamp(),
            CalDateTime::Floating(dt) => Utc.from_utc_datetime(dt).timestamp(),
            CalDateTime::Utc(dt) => dt.timestamp(),
            CalDateTime::Zoned { local, tz } => resolve_local(*tz, local).timestamp(),
        }
    }

    /// The zone instances generated from this value should be anchored to.
    pub fn tz(&self) -> Option<Tz> {
        match self {
            CalDateTime::Zoned { tz, .. } => Some(*tz),
            _ => None,
        }
    }

    /// Add a signed number of seconds, preserving the variant. Date-only
    /// values advance in whole days; a remainder below one day keeps the
    /// value on the same date.
    pub fn add_seconds(&self, secs: i64) -> CalDateTime {
        match self {
            CalDateTime::Date(d) => CalDateTime::Date(*d + Duration::days(secs / 86_400)),
            CalDateTime::Floating(dt) => CalDateTime::Floating(*dt + Duration::seconds(secs)),
            CalDateTime::Utc(dt) => CalDateTime::Utc(*dt + Duration::seconds(secs)),
            CalDateTime::Zoned { local, tz } => CalDateTime::Zoned {
                local: *local + Duration::seconds(secs),
                tz: *tz,
            },
        }
    }

    /// Seconds from `self` to `other`.
    pub fn seconds_until(&self, other: &CalDateTime) -> i64 {
        other.timestamp() - self.timestamp()
    }

    /// Canonical iCalendar-style rendering, also used as the recurrence-id
    /// key: `YYYYMMDD` for dates, `YYYYMMDDTHHMMSS` for local times and
    /// `YYYYMMDDTHHMMSSZ` for UTC times.
    pub fn to_ics_string(&self) -> String {
        match self {
            CalDateTime::Date(d) => d.format("%Y%m%d").to_string(),
            CalDateTime::Floating(dt) => dt.format("%Y%m%dT%H%M%S").to_string(),
            CalDateTime::Utc(dt) => dt.format("%Y%m%dT%H%M%SZ").to_string(),
            CalDateTime::Zoned { local, .. } => local.format("%Y%m%dT%H%M%S").to_string(),
        }
    }

    /// Render an iCalendar property line for this value, e.g.
    /// `DTSTART;TZID=Europe/Paris:20240101T090000`. Used when assembling
    /// recurrence rule sets for expansion.
    pub fn ics_property(&self, name: &str) -> String {
        match self {
            CalDateTime::Date(d) => format!("{name}:{}T000000Z", d.format("%Y%m%d")),
            CalDateTime::Floating(dt) => format!("{name}:{}Z", dt.format("%Y%m%dT%H%M%S")),
            CalDateTime::Utc(dt) => format!("{name}:{}", dt.format("%Y%m%dT%H%M%SZ")),
            CalDateTime::Zoned { local, tz } => {
                format!("{name};TZID={tz}:{}", local.format("%Y%m%dT%H%M%S"))
            }
        }
    }

    /// Parse a recurrence id under the typing of a master start value.
    ///
    /// Date-only masters truncate the id to its date part. Date-time masters
    /// reinterpret the stamp in the master's own zone, so an id rendered from
    /// any instance of the master round-trips to the same key.
    pub fn parse_recurrence_id(raw: &str, master_start: &CalDateTime) -> Result<Self, EngineError> {
        let malformed = || EngineError::MalformedRecurrenceId(raw.to_string());

        if master_start.is_date_only() {
            let date_part = raw.get(..8).ok_or_else(malformed)?;
            return NaiveDate::parse_from_str(date_part, "%Y%m%d")
                .map(CalDateTime::Date)
                .map_err(|_| malformed());
        }

        let stamp = raw.strip_suffix('Z').unwrap_or(raw);
        let local =
            NaiveDateTime::parse_from_str(stamp, "%Y%m%dT%H%M%S").map_err(|_| malformed())?;

        Ok(match master_start {
            CalDateTime::Floating(_) => CalDateTime::Floating(local),
            CalDateTime::Utc(_) => CalDateTime::Utc(Utc.from_utc_datetime(&local)),
            CalDateTime::Zoned { tz, .. } => CalDateTime::Zoned { local, tz: *tz },
            CalDateTime::Date(_) => unreachable!(),
        })
    }
}

/// Resolve a wall-clock time in a zone, taking the earlier mapping on DST
/// fold and falling back to a UTC interpretation inside a DST gap.
fn resolve_local(tz: Tz, local: &NaiveDateTime) -> DateTime<Tz> {
    match tz.from_local_datetime(local) {
        LocalResult::Single(dt) => dt,
        LocalResult::Ambiguous(first, _) => first,
        LocalResult::None => tz.from_utc_datetime(local),
    }
}
