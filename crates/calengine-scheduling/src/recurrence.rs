/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! On-demand expansion of recurring masters into concrete instances.
//!
//! Expansion is a pure function of the aggregate and the requested window:
//! no collaborator calls, no clocks. Calling it twice with the same inputs
//! yields the same sequence, which makes the result safe to cache.

use calengine_core::{
    config::ExpansionLimits,
    datetime::CalDateTime,
    error::{EngineError, Result},
    event::Event,
    info::EventInfo,
};
use chrono::{DateTime, Duration, Utc};
use rrule::RRuleSet;

/// One concrete occurrence of a recurring master within a window: either a
/// stored override or a generated instance inheriting the master's fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Instance {
    pub start: CalDateTime,
    pub end: CalDateTime,
    pub recurrence_id: String,
    pub is_override: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Expansion {
    pub instances: Vec<Instance>,
    /// The sequence was cut short by the instance or year caps.
    pub truncated: bool,
}

/// Expand a recurring master into the instances intersecting
/// `[range_start, range_end]`. Stored overrides are emitted with their own
/// times and never regenerated; occurrences whose recurrence id has an
/// override are skipped. Expansion is capped by `limits`; exceeding a cap
/// truncates the sequence rather than failing.
pub fn expand(
    info: &EventInfo,
    range_start: DateTime<Utc>,
    range_end: DateTime<Utc>,
    limits: &ExpansionLimits,
) -> Result<Expansion> {
    let master = &info.event;
    if !master.is_recurring() {
        return Ok(Expansion::default());
    }
    let duration = master.effective_duration_secs().unwrap_or(0);

    let mut instances = Vec::new();
    for ov in info.overrides() {
        let ev = &ov.event;
        let (Some(start), Some(end)) = (ev.start, ev.end_datetime()) else {
            continue;
        };
        if start.timestamp() <= range_end.timestamp() && end.timestamp() >= range_start.timestamp()
        {
            instances.push(Instance {
                start,
                end,
                recurrence_id: ev.recurrence_id.clone().unwrap_or_default(),
                is_override: true,
            });
        }
    }

    let (starts, mut truncated) = occurrences(master, range_start, range_end, limits)?;
    for occ in starts {
        let key = occ.to_ics_string();
        if info.override_for(&key).is_some() {
            continue;
        }
        instances.push(Instance {
            start: occ,
            end: occ.add_seconds(duration),
            recurrence_id: key,
            is_override: false,
        });
    }

    instances.sort_by(|a, b| {
        a.start
            .timestamp()
            .cmp(&b.start.timestamp())
            .then_with(|| a.recurrence_id.cmp(&b.recurrence_id))
    });
    if instances.len() > limits.max_instances {
        instances.truncate(limits.max_instances);
        truncated = true;
    }

    Ok(Expansion {
        instances,
        truncated,
    })
}

/// Resolve one recurrence id against the aggregate: the stored override
/// when one exists, otherwise a synthesized proxy instance. The id is
/// parsed under the master's typing; date-only masters truncate it to a
/// date, date-time masters reinterpret it in the master's start zone and
/// add the master's duration for the end.
pub fn resolve_instance(info: &EventInfo, recurrence_id: &str) -> Result<EventInfo> {
    let master = &info.event;
    if !master.is_recurring() {
        return Ok(info.clone());
    }
    let start = master
        .start
        .ok_or(EngineError::MissingRequiredProperty("dtstart"))?;

    let rid = CalDateTime::parse_recurrence_id(recurrence_id, &start)?;
    let key = rid.to_ics_string();
    if let Some(ov) = info.override_for(&key) {
        return Ok(ov.clone());
    }

    let duration = master.effective_duration_secs().unwrap_or(0);
    Ok(EventInfo::new(proxy_event(master, rid, rid.add_seconds(duration), key)))
}

/// Materialize a generated [`Instance`] as a proxy aggregate.
pub fn instance_proxy(info: &EventInfo, instance: &Instance) -> EventInfo {
    EventInfo::new(proxy_event(
        &info.event,
        instance.start,
        instance.end,
        instance.recurrence_id.clone(),
    ))
}

/// A proxy instance inherits every master field except its times and
/// recurrence metadata; it is an override in everything but storage.
fn proxy_event(master: &Event, start: CalDateTime, end: CalDateTime, key: String) -> Event {
    let mut ev = master.clone();
    ev.recurrence_id = Some(key);
    ev.start = Some(start);
    ev.end = Some(end);
    ev.duration_secs = None;
    ev.recurring = Some(false);
    ev.recurrence = None;
    ev.tombstoned = false;
    ev
}

/// Generate the occurrence starts of the master's rule intersecting the
/// window, clamped to `max_years` past the master start and to
/// `max_instances` occurrences.
fn occurrences(
    master: &Event,
    range_start: DateTime<Utc>,
    range_end: DateTime<Utc>,
    limits: &ExpansionLimits,
) -> Result<(Vec<CalDateTime>, bool)> {
    let Some(recurrence) = &master.recurrence else {
        return Ok((Vec::new(), false));
    };
    let start = master
        .start
        .ok_or(EngineError::MissingRequiredProperty("dtstart"))?;

    let start_utc = DateTime::from_timestamp(start.timestamp(), 0)
        .ok_or_else(|| EngineError::Internal("event start out of range".to_string()))?;
    let horizon = start_utc + Duration::days(i64::from(limits.max_years) * 366);
    let clamped = range_end > horizon;
    let effective_end = if clamped { horizon } else { range_end };

    let mut lines = Vec::with_capacity(2 + recurrence.rdates.len() + recurrence.exdates.len());
    lines.push(start.ics_property("DTSTART"));
    lines.push(format!("RRULE:{}", recurrence.rrule));
    for rdate in &recurrence.rdates {
        lines.push(rdate.ics_property("RDATE"));
    }
    for exdate in &recurrence.exdates {
        lines.push(exdate.ics_property("EXDATE"));
    }

    let set: RRuleSet = lines.join("\n").parse().map_err(|e| {
        EngineError::Internal(format!(
            "unparseable recurrence rule for event '{}': {e}",
            master.uid
        ))
    })?;

    // after/before are exclusive; widen by a second to keep the window
    // inclusive on both ends.
    let tz: rrule::Tz = Utc.into();
    let after = (range_start - Duration::seconds(1)).with_timezone(&tz);
    let before = (effective_end + Duration::seconds(1)).with_timezone(&tz);
    let limit = limits.max_instances.min(u16::MAX as usize) as u16;

    let result = set.after(after).before(before).all(limit);
    let starts = result
        .dates
        .iter()
        .map(|occ| occurrence_start(occ, &start))
        .collect();

    Ok((starts, result.limited || clamped))
}

/// Map an occurrence back to the master start's variant so generated
/// instances carry the same date/date-time typing and zone as the master.
fn occurrence_start(occ: &DateTime<rrule::Tz>, master_start: &CalDateTime) -> CalDateTime {
    match master_start {
        CalDateTime::Date(_) => CalDateTime::Date(occ.date_naive()),
        CalDateTime::Floating(_) => CalDateTime::Floating(occ.naive_utc()),
        CalDateTime::Utc(_) => CalDateTime::Utc(occ.with_timezone(&Utc)),
        CalDateTime::Zoned { tz, .. } => CalDateTime::Zoned {
            local: occ.naive_local(),
            tz: *tz,
        },
    }
}
