/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Construction of outgoing scheduling messages.
//!
//! Every builder works on a read-only view of the stored aggregate and
//! returns a freshly built message, so an outgoing message never aliases
//! the entity it was derived from. Protocol violations are returned as
//! [`ScheduleStatus`] values, not errors.

use crate::ScheduleStatus;
use calengine_core::{
    event::{
        Attendee, EntityType, Event, EventStatus, ParticipationStatus, ScheduleMethod,
    },
    info::EventInfo,
};
use chrono::{DateTime, Utc};

/// A message plus the forwarded copy a delegation produces. The two are
/// routed atomically: when the forwarded REQUEST cannot be delivered the
/// primary reply must not count as sent.
#[derive(Debug, Clone)]
pub struct MessageBundle {
    pub primary: EventInfo,
    pub forwarded: Option<EventInfo>,
}

/// Build an attendee's response to an invitation: a REPLY or COUNTER
/// stripped to the responding attendee, or, when the attendee has
/// delegated, the REPLY/forwarded-REQUEST pair mandated by RFC 2446
/// §4.2.5.
pub fn build_attendee_response(
    source: &EventInfo,
    responder_uri: &str,
    method: ScheduleMethod,
    now: DateTime<Utc>,
) -> Result<MessageBundle, ScheduleStatus> {
    let ev = &source.event;
    let responder = if ev.suppressed {
        source
            .overrides()
            .find_map(|o| o.event.find_attendee(responder_uri))
    } else {
        ev.find_attendee(responder_uri)
    }
    .cloned()
    .ok_or(ScheduleStatus::NotAttendee)?;
    let organizer = ev
        .organizer
        .clone()
        .ok_or(ScheduleStatus::NoRecipients)?;

    let mut out = source.message_copy();
    out.event.recipients.clear();
    out.event.attendees.clear();
    out.event.add_recipient(organizer.uri.clone());
    out.event.originator = Some(responder.uri.clone());
    out.event.update_dtstamp(now);

    if let Some(delegate) = responder.delegated_to.clone() {
        // The delegator replies DELEGATED to the organizer, naming the
        // delegate, and forwards the original request to the delegate.
        out.event.schedule_method = Some(ScheduleMethod::Reply);

        let mut delegator = responder.clone();
        delegator.part_stat = ParticipationStatus::Delegated;
        delegator.rsvp = false;
        out.event.add_attendee(delegator);

        let mut delegate_att = Attendee::new(delegate.clone());
        delegate_att.delegated_from = Some(responder.uri.clone());
        delegate_att.part_stat = ParticipationStatus::NeedsAction;
        delegate_att.rsvp = true;
        delegate_att.role = responder.role;
        out.event.add_attendee(delegate_att.clone());

        let mut forwarded = source.message_copy();
        forwarded.event.schedule_method = Some(ScheduleMethod::Request);
        forwarded.event.recipients.clear();
        forwarded.event.add_recipient(delegate);
        forwarded.event.originator = Some(responder.uri.clone());
        forwarded.event.update_dtstamp(now);
        forwarded.event.add_attendee(delegate_att);

        return Ok(MessageBundle {
            primary: out,
            forwarded: Some(forwarded),
        });
    }

    match method {
        ScheduleMethod::Reply => {
            set_only_attendee(&mut out, source, &responder.uri)?;
            if ev.entity_type == EntityType::Poll {
                set_poll_response(&mut out, source, &responder.uri);
            }
            out.event.schedule_method = Some(ScheduleMethod::Reply);
        }
        ScheduleMethod::Counter => {
            set_only_attendee(&mut out, source, &responder.uri)?;
            out.event.schedule_method = Some(ScheduleMethod::Counter);
        }
        _ => return Err(ScheduleStatus::BadMethod),
    }

    Ok(MessageBundle {
        primary: out,
        forwarded: None,
    })
}

/// Build a REFRESH asking the organizer to resend current state: a
/// minimal, non-recurring event carrying identification and times only.
pub fn build_refresh(
    source: &EventInfo,
    responder: &Attendee,
    comment: Option<&str>,
    now: DateTime<Utc>,
) -> EventInfo {
    let ev = &source.event;
    let mut out = Event::new(ev.entity_type);
    out.schedule_method = Some(ScheduleMethod::Refresh);
    out.uid = ev.uid.clone();
    out.recurrence_id = ev.recurrence_id.clone();
    out.sequence = ev.sequence;
    out.organizer = ev.organizer.clone();
    if let Some(org) = &ev.organizer {
        out.add_recipient(org.uri.clone());
    }
    out.originator = Some(responder.uri.clone());
    out.add_attendee(responder.clone());
    out.start = ev.start;
    out.end = ev.end;
    out.duration_secs = ev.duration_secs;
    out.recurring = Some(false);
    out.update_dtstamp(now);
    if let Some(comment) = comment {
        out.comments.push(comment.to_string());
    }

    EventInfo::new(out)
}

/// Build the declined REPLY an attendee sends when deleting their copy of
/// a meeting.
pub fn build_decline_reply(
    source: &EventInfo,
    responder: &Attendee,
    now: DateTime<Utc>,
) -> Result<EventInfo, ScheduleStatus> {
    let ev = &source.event;
    let organizer = ev
        .organizer
        .clone()
        .ok_or(ScheduleStatus::NoRecipients)?;

    let mut out = Event::new(ev.entity_type);
    out.schedule_method = Some(ScheduleMethod::Reply);
    out.uid = ev.uid.clone();
    out.recurrence_id = ev.recurrence_id.clone();
    out.sequence = ev.sequence;
    out.summary = ev.summary.clone();
    out.organizer = Some(organizer.clone());
    out.add_recipient(organizer.uri);
    out.originator = Some(responder.uri.clone());
    out.start = ev.start;
    out.end = ev.end;
    out.duration_secs = ev.duration_secs;
    out.recurring = Some(false);
    out.update_dtstamp(now);

    let mut attendee = responder.clone();
    attendee.part_stat = ParticipationStatus::Declined;
    out.add_attendee(attendee);

    Ok(EventInfo::new(out))
}

/// Build the CANCEL an organizer sends when withdrawing a meeting. The
/// cancel names the guests, bumps the sequence and carries just enough of
/// the event to identify it.
pub fn build_cancel(source: &EventInfo, now: DateTime<Utc>) -> Result<EventInfo, ScheduleStatus> {
    let ev = &source.event;
    let organizer = ev
        .organizer
        .clone()
        .ok_or(ScheduleStatus::NoRecipients)?;

    let mut out = Event::new(ev.entity_type);
    out.schedule_method = Some(ScheduleMethod::Cancel);
    out.uid = ev.uid.clone();
    out.recurrence_id = ev.recurrence_id.clone();
    out.sequence = ev.sequence + 1;
    out.summary = ev.summary.clone();
    out.status = Some(EventStatus::Cancelled);
    out.originator = Some(organizer.uri.clone());
    out.organizer = Some(organizer.clone());
    out.start = ev.start;
    out.end = ev.end;
    out.duration_secs = ev.duration_secs;
    out.recurring = Some(false);
    out.update_dtstamp(now);

    for attendee in &ev.attendees {
        if attendee.uri != organizer.uri {
            out.add_recipient(attendee.uri.clone());
        }
        out.add_attendee(attendee.clone());
    }

    Ok(EventInfo::new(out))
}

/// Check the attendee shape of an outgoing reply-type message: exactly one
/// attendee per component, except for a delegation reply which carries the
/// delegator/delegate pair.
pub fn check_reply_attendees(message: &EventInfo) -> Result<(), ScheduleStatus> {
    if !message.event.suppressed && !reply_attendees_ok(&message.event) {
        return Err(ScheduleStatus::BadAttendees);
    }
    for ov in message.overrides() {
        if !reply_attendees_ok(&ov.event) {
            return Err(ScheduleStatus::BadAttendees);
        }
    }
    Ok(())
}

fn reply_attendees_ok(ev: &Event) -> bool {
    match ev.attendees.as_slice() {
        [_] => true,
        [a, b] => {
            a.delegated_from.as_deref() == Some(b.uri.as_str())
                || b.delegated_from.as_deref() == Some(a.uri.as_str())
        }
        _ => false,
    }
}

fn set_only_attendee(
    out: &mut EventInfo,
    source: &EventInfo,
    uri: &str,
) -> Result<(), ScheduleStatus> {
    if !source.event.suppressed {
        let attendee = source
            .event
            .find_attendee(uri)
            .cloned()
            .ok_or(ScheduleStatus::NotAttendee)?;
        out.event.attendees.clear();
        out.event.add_attendee(attendee);
    }

    for ov in out.overrides_mut() {
        let attendee = ov
            .event
            .find_attendee(uri)
            .cloned()
            .ok_or(ScheduleStatus::NotAttendee)?;
        ov.event.attendees.clear();
        ov.event.add_attendee(attendee);
    }

    Ok(())
}

/// Keep only the responding voter's ballot on an outgoing poll reply; the
/// organizer merges it into the tally on receipt.
fn set_poll_response(out: &mut EventInfo, source: &EventInfo, uri: &str) {
    out.event.poll_ballots.clear();
    match source.event.ballot_for(uri) {
        Some(ballot) => out.event.poll_ballots.push(ballot.clone()),
        None => tracing::warn!(voter = %uri, "no ballot for responding voter"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use calengine_core::{
        datetime::CalDateTime,
        event::{Organizer, PollBallot, PollVote},
    };
    use chrono::TimeZone;

    fn invite() -> EventInfo {
        let mut ev = Event::new(EntityType::Event);
        ev.uid = "meeting-1".to_string();
        ev.organizer = Some(Organizer::new("mailto:a@example.com"));
        ev.add_attendee(Attendee::new("mailto:a@example.com"));
        let mut b = Attendee::new("mailto:b@example.com");
        b.part_stat = ParticipationStatus::Accepted;
        ev.add_attendee(b);
        ev.originator = Some("mailto:a@example.com".to_string());
        ev.schedule_method = Some(ScheduleMethod::Request);
        ev.start = Some(CalDateTime::Utc(
            Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap(),
        ));
        ev.duration_secs = Some(3_600);
        ev.recurring = Some(false);
        ev.sequence = 2;
        EventInfo::new(ev)
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, 8, 0, 0).unwrap()
    }

    #[test]
    fn reply_is_stripped_to_the_responder() {
        let source = invite();
        let bundle = build_attendee_response(
            &source,
            "mailto:b@example.com",
            ScheduleMethod::Reply,
            now(),
        )
        .unwrap();
        assert!(bundle.forwarded.is_none());

        let out = &bundle.primary.event;
        assert_eq!(out.schedule_method, Some(ScheduleMethod::Reply));
        assert_eq!(out.attendees.len(), 1);
        assert_eq!(out.attendees[0].uri, "mailto:b@example.com");
        assert_eq!(out.attendees[0].part_stat, ParticipationStatus::Accepted);
        assert_eq!(out.recipients, ["mailto:a@example.com"]);
        assert_eq!(out.originator.as_deref(), Some("mailto:b@example.com"));
        assert_eq!(out.uid, "meeting-1");
        assert_eq!(out.sequence, 2);
        assert!(check_reply_attendees(&bundle.primary).is_ok());
        // The source is untouched.
        assert_eq!(source.event.attendees.len(), 2);
    }

    #[test]
    fn counter_carries_the_counter_method() {
        let source = invite();
        let bundle = build_attendee_response(
            &source,
            "mailto:b@example.com",
            ScheduleMethod::Counter,
            now(),
        )
        .unwrap();
        assert_eq!(
            bundle.primary.event.schedule_method,
            Some(ScheduleMethod::Counter)
        );
        assert_eq!(bundle.primary.event.attendees.len(), 1);
    }

    #[test]
    fn unknown_responder_is_not_an_attendee() {
        let source = invite();
        assert_eq!(
            build_attendee_response(
                &source,
                "mailto:nobody@example.com",
                ScheduleMethod::Reply,
                now(),
            )
            .unwrap_err(),
            ScheduleStatus::NotAttendee
        );
    }

    #[test]
    fn delegation_builds_a_reply_and_a_forwarded_request() {
        let mut source = invite();
        source
            .event
            .find_attendee_mut("mailto:b@example.com")
            .unwrap()
            .delegated_to = Some("mailto:c@example.com".to_string());

        let bundle = build_attendee_response(
            &source,
            "mailto:b@example.com",
            ScheduleMethod::Reply,
            now(),
        )
        .unwrap();

        let reply = &bundle.primary.event;
        assert_eq!(reply.schedule_method, Some(ScheduleMethod::Reply));
        assert_eq!(reply.recipients, ["mailto:a@example.com"]);
        let delegator = reply.find_attendee("mailto:b@example.com").unwrap();
        assert_eq!(delegator.part_stat, ParticipationStatus::Delegated);
        assert!(!delegator.rsvp);
        let delegate = reply.find_attendee("mailto:c@example.com").unwrap();
        assert_eq!(delegate.part_stat, ParticipationStatus::NeedsAction);
        assert_eq!(
            delegate.delegated_from.as_deref(),
            Some("mailto:b@example.com")
        );
        assert!(check_reply_attendees(&bundle.primary).is_ok());

        let forwarded = bundle.forwarded.unwrap();
        assert_eq!(
            forwarded.event.schedule_method,
            Some(ScheduleMethod::Request)
        );
        assert_eq!(forwarded.event.recipients, ["mailto:c@example.com"]);
        assert!(forwarded
            .event
            .find_attendee("mailto:c@example.com")
            .is_some());
    }

    #[test]
    fn poll_reply_carries_only_the_responders_ballot() {
        let mut source = invite();
        source.event.entity_type = EntityType::Poll;
        source.event.poll_ballots = vec![
            PollBallot {
                voter_uri: "mailto:a@example.com".to_string(),
                votes: vec![],
            },
            PollBallot {
                voter_uri: "mailto:b@example.com".to_string(),
                votes: vec![PollVote {
                    item_id: 3,
                    response: Some(85),
                    comment: None,
                }],
            },
        ];

        let bundle = build_attendee_response(
            &source,
            "mailto:b@example.com",
            ScheduleMethod::Reply,
            now(),
        )
        .unwrap();

        let ballots = &bundle.primary.event.poll_ballots;
        assert_eq!(ballots.len(), 1);
        assert_eq!(ballots[0].voter_uri, "mailto:b@example.com");
        assert_eq!(ballots[0].votes[0].item_id, 3);
    }

    #[test]
    fn refresh_is_minimal_and_non_recurring() {
        let mut source = invite();
        source.event.recurring = Some(true);
        source.event.summary = Some("standup".to_string());
        let responder = source
            .event
            .find_attendee("mailto:b@example.com")
            .cloned()
            .unwrap();

        let out = build_refresh(&source, &responder, Some("please resend"), now());
        let ev = &out.event;
        assert_eq!(ev.schedule_method, Some(ScheduleMethod::Refresh));
        assert_eq!(ev.uid, "meeting-1");
        assert_eq!(ev.recurring, Some(false));
        assert!(ev.summary.is_none());
        assert_eq!(ev.attendees.len(), 1);
        assert_eq!(ev.comments, ["please resend"]);
        assert_eq!(ev.recipients, ["mailto:a@example.com"]);
    }

    #[test]
    fn cancel_bumps_sequence_and_lists_guests() {
        let source = invite();
        let out = build_cancel(&source, now()).unwrap();
        let ev = &out.event;
        assert_eq!(ev.schedule_method, Some(ScheduleMethod::Cancel));
        assert_eq!(ev.sequence, 3);
        assert_eq!(ev.status, Some(EventStatus::Cancelled));
        assert_eq!(ev.recipients, ["mailto:b@example.com"]);
        assert_eq!(ev.attendees.len(), 2);
    }
}
