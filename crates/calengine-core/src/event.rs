/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use crate::datetime::CalDateTime;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityType {
    Event,
    Task,
    Journal,
    Poll,
    Availability,
}

impl EntityType {
    /// Only events, tasks and polls take part in scheduling-message
    /// exchange.
    pub fn is_schedulable(&self) -> bool {
        matches!(self, EntityType::Event | EntityType::Task | EntityType::Poll)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScheduleMethod {
    Publish,
    Request,
    Reply,
    Refresh,
    Cancel,
    Counter,
    DeclineCounter,
    Add,
}

impl ScheduleMethod {
    /// Methods an attendee may answer an invitation with.
    pub fn is_reply_method(&self) -> bool {
        matches!(
            self,
            ScheduleMethod::Reply | ScheduleMethod::Counter | ScheduleMethod::Refresh
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScheduleState {
    #[default]
    Unprocessed,
    Processed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ParticipationStatus {
    #[default]
    NeedsAction,
    Accepted,
    Declined,
    Tentative,
    Delegated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ParticipationRole {
    Chair,
    #[default]
    Required,
    Optional,
    NonParticipant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CuType {
    #[default]
    Individual,
    Group,
    Resource,
    Room,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Transparency {
    #[default]
    Opaque,
    Transparent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventStatus {
    Confirmed,
    Tentative,
    Cancelled,
}

/// A calendar user invited to an event. Identity is the calendar address;
/// the remaining fields describe the user's current participation state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attendee {
    pub uri: String,
    pub common_name: Option<String>,
    pub role: ParticipationRole,
    pub part_stat: ParticipationStatus,
    pub rsvp: bool,
    pub cu_type: CuType,
    pub delegated_to: Option<String>,
    pub delegated_from: Option<String>,
    /// Calendar address of the group this attendee was expanded from.
    pub member: Option<String>,
    pub schedule_status: Option<String>,
}

impl Attendee {
    pub fn new(uri: impl Into<String>) -> Self {
        Attendee {
            uri: uri.into(),
            common_name: None,
            role: ParticipationRole::default(),
            part_stat: ParticipationStatus::default(),
            rsvp: false,
            cu_type: CuType::default(),
            delegated_to: None,
            delegated_from: None,
            member: None,
            schedule_status: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Organizer {
    pub uri: String,
    pub common_name: Option<String>,
    pub schedule_status: Option<String>,
    pub dtstamp: Option<DateTime<Utc>>,
}

impl Organizer {
    pub fn new(uri: impl Into<String>) -> Self {
        Organizer {
            uri: uri.into(),
            common_name: None,
            schedule_status: None,
            dtstamp: None,
        }
    }
}

/// One voter's ballot in a poll entity: the votes this voter has cast,
/// keyed by vote-item identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollBallot {
    pub voter_uri: String,
    pub votes: Vec<PollVote>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollVote {
    pub item_id: i32,
    pub response: Option<i32>,
    pub comment: Option<String>,
}

/// Recurrence metadata carried by a recurring master: the already-parsed
/// rule text plus explicit additional and excluded occurrence dates.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Recurrence {
    pub rrule: String,
    pub rdates: Vec<CalDateTime>,
    pub exdates: Vec<CalDateTime>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alarm {
    /// Seconds relative to the anchor; negative triggers before it.
    pub trigger_secs: i64,
    pub related_to_start: bool,
    /// Alarm injected from a collection or user-home default definition.
    pub is_default: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XProperty {
    pub name: String,
    pub value: String,
}

/// A calendar entity: a master event, a stored override of a recurring
/// master, or an outgoing scheduling-message copy.
///
/// Start, end-or-duration and the recurring flag are optional at the type
/// level; `validate` in the orchestration rejects events that reach add or
/// update without them.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub uid: String,
    /// Canonical recurrence-id key; `None` for masters.
    pub recurrence_id: Option<String>,
    pub entity_type: EntityType,
    pub col_path: String,
    pub name: String,

    pub summary: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub contact: Option<String>,
    pub categories: Vec<String>,
    pub comments: Vec<String>,
    pub x_properties: Vec<XProperty>,

    pub start: Option<CalDateTime>,
    pub end: Option<CalDateTime>,
    pub duration_secs: Option<i64>,
    pub recurring: Option<bool>,
    pub recurrence: Option<Recurrence>,

    pub sequence: i64,
    pub dtstamp: Option<DateTime<Utc>>,
    /// Schedule tag, bumped whenever a scheduling-significant change lands.
    pub stag: Option<String>,
    pub status: Option<EventStatus>,
    pub transparency: Transparency,
    pub alarms: Vec<Alarm>,

    pub organizer: Option<Organizer>,
    pub attendees: Vec<Attendee>,
    pub poll_ballots: Vec<PollBallot>,
    pub poll_items: Vec<String>,
    pub poll_winner: Option<i32>,

    pub schedule_method: Option<ScheduleMethod>,
    pub schedule_state: ScheduleState,
    pub originator: Option<String>,
    pub recipients: Vec<String>,

    pub organizer_scheduling_object: bool,
    pub attendee_scheduling_object: bool,

    /// Master suppressed: the event exists only through its overrides.
    pub suppressed: bool,
    pub tombstoned: bool,
    pub deleted: bool,
    pub public: bool,
}

impl Event {
    pub fn new(entity_type: EntityType) -> Self {
        Event {
            uid: String::new(),
            recurrence_id: None,
            entity_type,
            col_path: String::new(),
            name: String::new(),
            summary: None,
            description: None,
            location: None,
            contact: None,
            categories: Vec::new(),
            comments: Vec::new(),
            x_properties: Vec::new(),
            start: None,
            end: None,
            duration_secs: None,
            recurring: None,
            recurrence: None,
            sequence: 0,
            dtstamp: None,
            stag: None,
            status: None,
            transparency: Transparency::default(),
            alarms: Vec::new(),
            organizer: None,
            attendees: Vec::new(),
            poll_ballots: Vec::new(),
            poll_items: Vec::new(),
            poll_winner: None,
            schedule_method: None,
            schedule_state: ScheduleState::default(),
            originator: None,
            recipients: Vec::new(),
            organizer_scheduling_object: false,
            attendee_scheduling_object: false,
            suppressed: false,
            tombstoned: false,
            deleted: false,
            public: false,
        }
    }

    pub fn is_recurring(&self) -> bool {
        self.recurring == Some(true)
    }

    pub fn is_scheduling_object(&self) -> bool {
        self.organizer_scheduling_object || self.attendee_scheduling_object
    }

    pub fn find_attendee(&self, uri: &str) -> Option<&Attendee> {
        self.attendees.iter().find(|a| a.uri == uri)
    }

    pub fn find_attendee_mut(&mut self, uri: &str) -> Option<&mut Attendee> {
        self.attendees.iter_mut().find(|a| a.uri == uri)
    }

    /// Insert or replace by calendar address; the attendee set is keyed by
    /// uri.
    pub fn add_attendee(&mut self, attendee: Attendee) {
        if let Some(existing) = self.find_attendee_mut(&attendee.uri) {
            *existing = attendee;
        } else {
            self.attendees.push(attendee);
        }
    }

    pub fn remove_attendee(&mut self, uri: &str) -> Option<Attendee> {
        let pos = self.attendees.iter().position(|a| a.uri == uri)?;
        Some(self.attendees.remove(pos))
    }

    pub fn add_recipient(&mut self, uri: impl Into<String>) {
        let uri = uri.into();
        if !self.recipients.contains(&uri) {
            self.recipients.push(uri);
        }
    }

    /// The effective end: an explicit end, or start plus duration.
    pub fn end_datetime(&self) -> Option<CalDateTime> {
        match (&self.end, &self.start, self.duration_secs) {
            (Some(end), _, _) => Some(*end),
            (None, Some(start), Some(secs)) => Some(start.add_seconds(secs)),
            _ => None,
        }
    }

    /// The effective duration in seconds: explicit, or end minus start.
    pub fn effective_duration_secs(&self) -> Option<i64> {
        match (self.duration_secs, &self.start, &self.end) {
            (Some(secs), _, _) => Some(secs),
            (None, Some(start), Some(end)) => Some(start.seconds_until(end)),
            _ => None,
        }
    }

    pub fn update_dtstamp(&mut self, now: DateTime<Utc>) {
        self.dtstamp = Some(now);
        if let Some(org) = &mut self.organizer {
            org.dtstamp = Some(now);
        }
    }

    pub fn update_stag(&mut self, now: DateTime<Utc>) {
        self.stag = Some(format!("{}-{}", now.timestamp(), self.sequence));
    }

    pub fn ballot_for(&self, voter_uri: &str) -> Option<&PollBallot> {
        self.poll_ballots.iter().find(|b| b.voter_uri == voter_uri)
    }

    pub fn remove_ballot(&mut self, voter_uri: &str) -> Option<PollBallot> {
        let pos = self
            .poll_ballots
            .iter()
            .position(|b| b.voter_uri == voter_uri)?;
        Some(self.poll_ballots.remove(pos))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn attendee_set_is_keyed_by_uri() {
        let mut ev = Event::new(EntityType::Event);
        ev.add_attendee(Attendee::new("mailto:a@example.com"));
        let mut again = Attendee::new("mailto:a@example.com");
        again.part_stat = ParticipationStatus::Accepted;
        ev.add_attendee(again);

        assert_eq!(ev.attendees.len(), 1);
        assert_eq!(
            ev.find_attendee("mailto:a@example.com").unwrap().part_stat,
            ParticipationStatus::Accepted
        );
    }

    #[test]
    fn end_falls_back_to_duration() {
        let mut ev = Event::new(EntityType::Event);
        let start = CalDateTime::Utc(Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap());
        ev.start = Some(start);
        ev.duration_secs = Some(3_600);

        assert_eq!(ev.end_datetime(), Some(start.add_seconds(3_600)));
        assert_eq!(ev.effective_duration_secs(), Some(3_600));
    }
}
