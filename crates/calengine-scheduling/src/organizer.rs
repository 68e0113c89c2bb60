/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Organizer-side implicit scheduling: the REQUEST and CANCEL fan-out an
//! organizer mutation produces, and the attendee reply an update to an
//! attendee copy triggers.

use crate::{builder, Engine, ScheduleResult, ScheduleStatus};
use calengine_core::{
    error::Result,
    event::{ScheduleMethod, ScheduleState},
    info::EventInfo,
};
use chrono::{DateTime, Utc};

/// Build the full-state REQUEST an organizer mutation sends to every
/// attendee. The message carries the complete aggregate, including
/// expanded attendees and overrides; recipients are all attendees except
/// the organizer's own entry.
pub fn build_request(
    source: &EventInfo,
    now: DateTime<Utc>,
) -> std::result::Result<EventInfo, ScheduleStatus> {
    let organizer = source
        .event
        .organizer
        .clone()
        .ok_or(ScheduleStatus::NoRecipients)?;

    let mut out = source.message_copy();
    out.event.schedule_method = Some(ScheduleMethod::Request);
    out.event.originator = Some(organizer.uri.clone());
    out.event.recipients.clear();
    let recipient_uris: Vec<String> = out
        .event
        .attendees
        .iter()
        .filter(|a| a.uri != organizer.uri)
        .map(|a| a.uri.clone())
        .collect();
    for uri in recipient_uris {
        out.event.add_recipient(uri);
    }
    out.event.update_dtstamp(now);

    Ok(out)
}

impl Engine<'_> {
    /// Implicit scheduling after an add, update or delete. Organizer
    /// objects fan a REQUEST (or CANCEL when deleting) out to the
    /// attendees; attendee objects with a pending reply answer the
    /// organizer with the attendee's current participation state.
    pub(crate) fn implicit_schedule(
        &mut self,
        info: &mut EventInfo,
        deleting: bool,
    ) -> Result<ScheduleResult> {
        let now = Utc::now();

        if info.event.organizer_scheduling_object {
            let built = if deleting {
                builder::build_cancel(info, now)
            } else {
                build_request(info, now)
            };
            let mut message = match built {
                Ok(message) => message,
                Err(status) => return Ok(ScheduleResult::with_status(status)),
            };

            let result = self.send_message(&mut message)?;
            if !result.ignored {
                message.event.schedule_state = ScheduleState::Processed;
                self.record_attendee_delivery(info, &result);
            }
            Ok(result)
        } else if info.event.attendee_scheduling_object {
            let Some(responder) = self.find_user_attendee(&info.event)? else {
                return Ok(ScheduleResult::with_status(ScheduleStatus::NotAttendee));
            };
            let bundle = match builder::build_attendee_response(
                info,
                &responder.uri,
                ScheduleMethod::Reply,
                now,
            ) {
                Ok(bundle) => bundle,
                Err(status) => return Ok(ScheduleResult::with_status(status)),
            };
            self.respond_with(info, bundle)
        } else {
            Ok(ScheduleResult {
                ignored: true,
                ..Default::default()
            })
        }
    }

    /// Copy per-recipient delivery outcomes back onto the source event's
    /// attendees as iTIP delivery status codes.
    fn record_attendee_delivery(&self, info: &mut EventInfo, result: &ScheduleResult) {
        use crate::RecipientDisposition;

        for (uri, disposition) in &result.recipients {
            let code = match disposition {
                RecipientDisposition::Delivered => "1.2",
                RecipientDisposition::QueuedExternal => "1.1",
                RecipientDisposition::NoAccess => "3.8",
                RecipientDisposition::Failed(_) => "5.1",
            };
            if let Some(attendee) = info.event.find_attendee_mut(uri) {
                attendee.schedule_status = Some(code.to_string());
            }
        }
    }
}
