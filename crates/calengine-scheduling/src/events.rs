/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Event mutation orchestration.
//!
//! Every mutation runs the same machine: validate, classify and expand
//! groups, detect changes, persist, schedule if needed; any error rolls
//! the whole transaction back before it is re-signaled. The master is
//! always evaluated first, then the overrides in recurrence-id order.

use crate::{
    builder::{self, MessageBundle},
    classify::classify,
    recurrence, ScheduleResult, ScheduleStatus, UpdateOutcome,
};
use crate::Engine;
use calengine_core::{
    access::Privilege,
    changes::{ChangeValue, PropertyIndex},
    collection::{Collection, CollectionKind},
    delivery::NotificationKind,
    error::{EngineError, Result},
    event::{Attendee, EntityType, Event, ParticipationStatus, ScheduleMethod, ScheduleState},
    info::EventInfo,
    store::EventKey,
};
use chrono::{DateTime, Utc};

impl Engine<'_> {
    /// Fetch an event by key, optionally resolved to one instance of a
    /// recurring master: the stored override when one matches, otherwise
    /// an instance synthesized from the master.
    pub fn get(&mut self, key: &EventKey, recurrence_id: Option<&str>) -> Result<Option<EventInfo>> {
        let fetched = self.store.fetch_by_key(key)?;
        self.queue_notification(NotificationKind::EntityFetched, u32::from(fetched.is_some()));
        let Some(info) = fetched else {
            return Ok(None);
        };
        match recurrence_id {
            None => Ok(Some(info)),
            Some(rid) => recurrence::resolve_instance(&info, rid).map(Some),
        }
    }

    /// Fetch an event by uid and expand it over a window: stored overrides
    /// intersecting the window plus proxies for the generated instances.
    /// Non-recurring events are returned as-is.
    pub fn get_expanded(
        &mut self,
        col_path: &str,
        uid: &str,
        range_start: DateTime<Utc>,
        range_end: DateTime<Utc>,
    ) -> Result<Vec<EventInfo>> {
        let fetched = self.store.fetch_by_uid(col_path, uid, None)?;
        self.queue_notification(NotificationKind::EntityFetched, u32::from(fetched.is_some()));
        let Some(info) = fetched else {
            return Ok(Vec::new());
        };
        if !info.event.is_recurring() {
            return Ok(vec![info]);
        }

        let expansion = recurrence::expand(&info, range_start, range_end, &self.limits)?;
        let mut out = Vec::with_capacity(expansion.instances.len());
        for instance in &expansion.instances {
            if instance.is_override {
                if let Some(ov) = info.override_for(&instance.recurrence_id) {
                    out.push(ov.clone());
                }
            } else {
                out.push(recurrence::instance_proxy(&info, instance));
            }
        }
        Ok(out)
    }

    /// Add a new event. Assigns a UID when absent, applies default
    /// categories and alarms, resolves alias targets, classifies the
    /// entity and runs implicit scheduling unless suppressed.
    pub fn add(&mut self, info: &mut EventInfo, suppress_invites: bool) -> Result<UpdateOutcome> {
        self.rolling_back(|eng| eng.add_inner(info, suppress_invites))
    }

    /// Update an existing event. A mutation with no detected change
    /// returns `has_changed = false` and performs no write and no
    /// scheduling; a forced update (nothing recorded at all) is treated as
    /// changed.
    pub fn update(&mut self, info: &mut EventInfo, suppress_invites: bool) -> Result<UpdateOutcome> {
        self.rolling_back(|eng| eng.update_inner(info, suppress_invites))
    }

    /// Delete an event, first notifying the other scheduling parties:
    /// attendee copies decline towards the organizer, organizer copies
    /// cancel towards the attendees.
    pub fn delete(&mut self, info: &mut EventInfo, send_scheduling_message: bool) -> Result<bool> {
        self.rolling_back(|eng| eng.delete_inner(info, send_scheduling_message))
    }

    /// Respond to an invitation as an attendee with a REPLY or COUNTER.
    pub fn attendee_respond(
        &mut self,
        info: &mut EventInfo,
        method: ScheduleMethod,
    ) -> Result<ScheduleResult> {
        self.rolling_back(|eng| eng.attendee_respond_inner(info, method))
    }

    /// Ask the organizer to resend current event state. Valid only against
    /// a stored REQUEST, and only for a listed attendee; both violations
    /// are status returns that leave the transaction alive.
    pub fn request_refresh(
        &mut self,
        info: &EventInfo,
        comment: Option<&str>,
    ) -> Result<ScheduleResult> {
        if info.event.schedule_method != Some(ScheduleMethod::Request) {
            return Ok(ScheduleResult::with_status(ScheduleStatus::BadMethod));
        }
        let Some(responder) = self.find_user_attendee(&info.event)? else {
            return Ok(ScheduleResult::with_status(ScheduleStatus::NotAttendee));
        };

        let mut message = builder::build_refresh(info, &responder, comment, Utc::now());
        self.schedule_response(&mut message)
    }

    fn add_inner(&mut self, info: &mut EventInfo, suppress_invites: bool) -> Result<UpdateOutcome> {
        let now = Utc::now();
        info.update_result.adding = true;
        info.update_result.has_changed = true;

        if info.event.uid.is_empty() {
            self.assign_uid(&mut info.event);
        }
        for category in &self.params.default_categories {
            if !info.event.categories.contains(category) {
                info.event.categories.push(category.clone());
            }
        }

        let mut col = self.validate(info)?;
        let filed_into = col.clone();
        if col.is_alias() {
            col = self.resolve_target(col, &mut info.event)?;
            info.event.col_path = col.path.clone();
        }
        if !col.is_calendar_collection() {
            return Err(EngineError::NotSchedulable(col.path));
        }

        if !info.event.public && info.event.alarms.is_empty() {
            self.apply_default_alarms(info, &filed_into, &col);
        }

        let mut scheduling_object = col.scheduling && info.event.is_scheduling_object();
        info.event.update_dtstamp(now);
        if scheduling_object {
            info.event.update_stag(now);
        }

        // Overrides live in the master's collection under the master's name.
        let principal = self.principal_href.clone();
        let master_col_path = info.event.col_path.clone();
        let master_name = info.event.name.clone();
        for ov in info.overrides_mut() {
            classify(&mut ov.event, &mut ov.changes, &principal, self.directory)?;
            ov.event.update_dtstamp(now);
            if col.scheduling && ov.event.is_scheduling_object() {
                scheduling_object = true;
            }
            if scheduling_object {
                ov.event.update_stag(now);
            }
            ov.event.col_path = master_col_path.clone();
            ov.event.name = master_name.clone();
        }

        if info.event.organizer_scheduling_object {
            rsvp_needs_action(&mut info.event);
        }

        let outcome = self.store.save(info, true)?;
        info.update_result.added_instances = outcome.added_instances;
        info.update_result.failed_overrides = outcome.failed_overrides;

        for item in info.contained_items_mut() {
            item.event.col_path = master_col_path.clone();
            item.event.name = master_name.clone();
        }
        for item in info.contained_items() {
            self.store.save(item, true)?;
        }

        self.queue_notification(NotificationKind::EntityAdded, 1);

        let mut scheduling = None;
        if !suppress_invites {
            if info.event.attendee_scheduling_object {
                info.update_result.reply = true;
            }
            if scheduling_object && col.scheduling {
                scheduling = Some(self.implicit_schedule(info, false)?);
            }
        }

        Ok(UpdateOutcome {
            update: info.update_result.clone(),
            scheduling,
        })
    }

    fn update_inner(
        &mut self,
        info: &mut EventInfo,
        suppress_invites: bool,
    ) -> Result<UpdateOutcome> {
        let now = Utc::now();
        info.event.update_dtstamp(now);

        let col = self.validate(info)?;

        let mut organizer_so = false;
        let mut attendee_so = false;
        if col.scheduling {
            organizer_so = info.event.organizer_scheduling_object;
            attendee_so = info.event.attendee_scheduling_object;
        }
        let mut scheduling_object = organizer_so || attendee_so;

        let mut changed =
            self.check_changes(info, organizer_so, attendee_so)? || info.overrides_changed();
        let mut do_reschedule = info.update_result.do_reschedule;

        let principal = self.principal_href.clone();
        for ov in info.overrides_mut() {
            classify(&mut ov.event, &mut ov.changes, &principal, self.directory)?;

            if col.scheduling && ov.event.attendee_scheduling_object {
                scheduling_object = true;
                attendee_so = true;
            }
            if self.check_changes(ov, organizer_so, attendee_so)? {
                changed = true;
            }
            if scheduling_object {
                ov.event.update_stag(now);
            }
            do_reschedule = do_reschedule || ov.update_result.do_reschedule;
        }

        if !changed {
            return Ok(UpdateOutcome {
                update: info.update_result.clone(),
                scheduling: None,
            });
        }
        info.update_result.do_reschedule = do_reschedule;
        if scheduling_object {
            info.event.update_stag(now);
        }

        let outcome = self.store.save(info, false)?;
        info.update_result.added_instances = outcome.added_instances;
        info.update_result.updated_instances = outcome.updated_instances;
        info.update_result.deleted_instances = outcome.deleted_instances;
        info.update_result.failed_overrides = outcome.failed_overrides;

        self.queue_notification(NotificationKind::EntityUpdated, 1);

        let mut scheduling = None;
        if !suppress_invites && scheduling_object {
            if organizer_so {
                rsvp_needs_action(&mut info.event);
            }

            let send_it = organizer_so
                || info.update_result.reply
                || info.overrides().any(|o| o.update_result.reply);
            if send_it {
                scheduling = Some(self.implicit_schedule(info, false)?);
            }
        }

        Ok(UpdateOutcome {
            update: info.update_result.clone(),
            scheduling,
        })
    }

    fn delete_inner(&mut self, info: &mut EventInfo, send_scheduling_message: bool) -> Result<bool> {
        // Tombstoned events still run the full path so access checks fire.
        if !info.event.tombstoned {
            let col = self
                .store
                .collection(&info.event.col_path)?
                .ok_or_else(|| EngineError::CollectionNotFound(info.event.col_path.clone()))?;

            if send_scheduling_message && info.event.is_scheduling_object() && col.scheduling {
                // CalDAV wants the parties told before the rows go away; a
                // scheduling failure must not block the delete itself.
                if info.event.attendee_scheduling_object {
                    if let Err(err) = self.send_decline(info) {
                        tracing::warn!(uid = %info.event.uid, error = %err, "decline on delete failed");
                    }
                } else if info.event.organizer_scheduling_object {
                    info.update_result.deleting = true;
                    if let Err(err) = self.implicit_schedule(info, true) {
                        tracing::warn!(uid = %info.event.uid, error = %err, "cancel on delete failed");
                    }
                }
            }
        }

        if !self.store.delete(info)? {
            self.rollback()?;
            return Ok(false);
        }

        if info.event.entity_type == EntityType::Availability {
            for item in info.contained_items() {
                if !self.store.delete(item)? {
                    self.rollback()?;
                    return Ok(false);
                }
            }
        }

        self.queue_notification(NotificationKind::EntityDeleted, 1);
        Ok(true)
    }

    fn attendee_respond_inner(
        &mut self,
        info: &mut EventInfo,
        method: ScheduleMethod,
    ) -> Result<ScheduleResult> {
        if !matches!(method, ScheduleMethod::Reply | ScheduleMethod::Counter) {
            return Ok(ScheduleResult::with_status(ScheduleStatus::BadMethod));
        }

        // The current principal must be an attendee of the master (unless
        // suppressed) and of every override.
        let mut responder: Option<Attendee> = None;
        if !info.event.suppressed {
            match self.find_user_attendee(&info.event)? {
                Some(attendee) => responder = Some(attendee),
                None => return Ok(ScheduleResult::with_status(ScheduleStatus::NotAttendee)),
            }
        }
        for ov in info.overrides() {
            match self.find_user_attendee(&ov.event)? {
                Some(attendee) => {
                    if responder.is_none() {
                        responder = Some(attendee);
                    }
                }
                None => return Ok(ScheduleResult::with_status(ScheduleStatus::NotAttendee)),
            }
        }
        let Some(responder) = responder else {
            return Ok(ScheduleResult::with_status(ScheduleStatus::NotAttendee));
        };
        if info.event.originator.is_none() {
            return Ok(ScheduleResult::with_status(ScheduleStatus::NoOriginator));
        }

        let bundle =
            match builder::build_attendee_response(info, &responder.uri, method, Utc::now()) {
                Ok(bundle) => bundle,
                Err(status) => return Ok(ScheduleResult::with_status(status)),
            };

        self.respond_with(info, bundle)
    }

    /// Route an attendee response bundle and, on success, record the
    /// scheduling bookkeeping on the stored event: delegation state on the
    /// responder's own entry and the organizer's delivery status.
    pub(crate) fn respond_with(
        &mut self,
        source: &mut EventInfo,
        mut bundle: MessageBundle,
    ) -> Result<ScheduleResult> {
        if let Err(status) = builder::check_reply_attendees(&bundle.primary) {
            return Ok(ScheduleResult::with_status(status));
        }

        // The outbox may be needed for external recipients; check access
        // up front so the whole response fails before anything is sent.
        let outbox = self
            .store
            .special_collection(&self.principal_href, CollectionKind::Outbox)?;
        let decision = self
            .access
            .check(&outbox, &self.principal_href, Privilege::ScheduleReply)?;
        if !decision.allowed {
            return Err(EngineError::NoAccess(outbox.path));
        }

        let delegated = bundle.forwarded.is_some();
        let result = self.send_bundle(&mut bundle)?;
        if result.ignored {
            return Ok(result);
        }

        if result.status.is_none() {
            bundle.primary.event.schedule_state = ScheduleState::Processed;
            if delegated {
                if let Some(responder_uri) = bundle.primary.event.originator.clone() {
                    if let Some(attendee) = source.event.find_attendee_mut(&responder_uri) {
                        attendee.part_stat = ParticipationStatus::Delegated;
                        attendee.rsvp = false;
                    }
                }
            }
            if let Some(organizer) = source.event.organizer.as_mut() {
                organizer.schedule_status = Some("1.2".to_string());
            }
        }

        Ok(result)
    }

    /// Validate an outgoing reply-type message and route it. REFRESH
    /// validation failures return a status and leave unrelated event state
    /// alone.
    pub(crate) fn schedule_response(&mut self, message: &mut EventInfo) -> Result<ScheduleResult> {
        if !message
            .event
            .schedule_method
            .is_some_and(|m| m.is_reply_method())
        {
            return Ok(ScheduleResult::with_status(ScheduleStatus::BadMethod));
        }
        if let Err(status) = builder::check_reply_attendees(message) {
            return Ok(ScheduleResult::with_status(status));
        }

        let outbox = self
            .store
            .special_collection(&self.principal_href, CollectionKind::Outbox)?;
        let decision = self
            .access
            .check(&outbox, &self.principal_href, Privilege::ScheduleReply)?;
        if !decision.allowed {
            return Err(EngineError::NoAccess(outbox.path));
        }

        let result = self.send_message(message)?;
        if result.status.is_none() && !result.ignored {
            message.event.schedule_state = ScheduleState::Processed;
        }
        Ok(result)
    }

    /// The attendee whose calendar address resolves to the acting
    /// principal, looked up fresh through the directory.
    pub(crate) fn find_user_attendee(&self, event: &Event) -> Result<Option<Attendee>> {
        for attendee in &event.attendees {
            if self.directory.caladdr_to_principal(&attendee.uri)?.as_deref()
                == Some(self.principal_href.as_str())
            {
                return Ok(Some(attendee.clone()));
            }
        }
        Ok(None)
    }

    fn send_decline(&mut self, info: &EventInfo) -> Result<ScheduleResult> {
        let Some(responder) = self.find_user_attendee(&info.event)? else {
            return Ok(ScheduleResult::with_status(ScheduleStatus::NotAttendee));
        };
        let mut message = match builder::build_decline_reply(info, &responder, Utc::now()) {
            Ok(message) => message,
            Err(status) => return Ok(ScheduleResult::with_status(status)),
        };
        self.schedule_response(&mut message)
    }

    /// Fail fast on structurally incomplete events, classify the entity
    /// for the acting principal and check write access to the target
    /// collection.
    fn validate(&self, info: &mut EventInfo) -> Result<Collection> {
        if info.event.col_path.is_empty() {
            return Err(EngineError::MissingRequiredProperty("collection path"));
        }
        if info.event.start.is_none() {
            return Err(EngineError::MissingRequiredProperty("dtstart"));
        }
        if info.event.end.is_none() && info.event.duration_secs.is_none() {
            return Err(EngineError::MissingRequiredProperty("dtend or duration"));
        }
        if info.event.recurring.is_none() {
            return Err(EngineError::MissingRequiredProperty("recurring flag"));
        }

        classify(
            &mut info.event,
            &mut info.changes,
            &self.principal_href,
            self.directory,
        )?;

        let col = self
            .store
            .collection(&info.event.col_path)?
            .ok_or_else(|| EngineError::CollectionNotFound(info.event.col_path.clone()))?;

        let decision = self.access.check(&col, &self.principal_href, Privilege::Write)?;
        if !decision.allowed {
            return Err(EngineError::NoAccess(col.path.clone()));
        }

        Ok(col)
    }

    /// Evaluate one change table. Returns whether the entity changed,
    /// fills the update result, and auto-increments the master's sequence
    /// for organizer changes that did not set SEQUENCE themselves.
    /// Overrides never have their sequence bumped.
    fn check_changes(
        &self,
        info: &mut EventInfo,
        organizer_so: bool,
        attendee_so: bool,
    ) -> Result<bool> {
        if info.changes.is_empty() {
            // Forced update: nothing was recorded, assume it changed.
            info.update_result.has_changed = true;
            if attendee_so {
                info.update_result.reply = true;
            }
            return Ok(true);
        }

        let mut sequence_changed = false;
        let mut any_changed = false;
        {
            let ur = &mut info.update_result;
            for (index, entry) in info.changes.entries() {
                if !entry.changed {
                    continue;
                }
                any_changed = true;
                ur.has_changed = true;

                match index {
                    PropertyIndex::Organizer if !organizer_so => {
                        return Err(EngineError::ForbiddenOrganizerChange);
                    }
                    PropertyIndex::Attendee | PropertyIndex::Voter => {
                        ur.added_attendees.extend(attendee_values(&entry.added));
                        ur.deleted_attendees.extend(attendee_values(&entry.removed));
                        if attendee_so {
                            ur.reply = true;
                        }
                    }
                    PropertyIndex::PollWinner if !attendee_so => {
                        ur.poll_winner = info.event.poll_winner;
                    }
                    PropertyIndex::PollItem if attendee_so => {
                        ur.reply = true;
                    }
                    PropertyIndex::Sequence => {
                        sequence_changed = true;
                    }
                    _ => {}
                }

                if organizer_so && index.forces_reschedule() {
                    ur.do_reschedule = true;
                }
            }
        }

        if info.event.recurrence_id.is_none()
            && organizer_so
            && any_changed
            && !sequence_changed
        {
            info.event.sequence += 1;
        }

        Ok(info.update_result.has_changed)
    }

    fn assign_uid(&self, event: &mut Event) {
        let id = uuid::Uuid::new_v4();
        event.uid = match &self.params.uid_domain {
            Some(domain) => format!("{id}@{domain}"),
            None => id.to_string(),
        };
    }

    /// Walk an alias chain to the real collection, carrying the alias's
    /// categories onto the event in public-admin mode. Chains are bounded;
    /// a loop is a non-schedulable target.
    fn resolve_target(&self, mut col: Collection, event: &mut Event) -> Result<Collection> {
        let mut depth = 0usize;
        while col.is_alias() {
            if depth >= MAX_ALIAS_DEPTH {
                return Err(EngineError::NotSchedulable(format!(
                    "alias chain too deep at {}",
                    col.path
                )));
            }
            if self.params.public_admin {
                for category in &col.categories {
                    if !event.categories.contains(category) {
                        event.categories.push(category.clone());
                    }
                }
            }
            let target = col.alias_target.clone().unwrap_or_default();
            col = self
                .store
                .resolve_alias(&col)?
                .ok_or(EngineError::CollectionNotFound(target))?;
            depth += 1;
        }
        Ok(col)
    }

    /// Default alarms from the collection the event was filed into, then
    /// from the resolved target, keyed by entity kind and date-only start.
    fn apply_default_alarms(&self, info: &mut EventInfo, filed_into: &Collection, target: &Collection) {
        let for_event = match info.event.entity_type {
            EntityType::Event => true,
            EntityType::Task => false,
            _ => return,
        };
        let date_only = info.event.start.is_some_and(|s| s.is_date_only());

        let alarm = filed_into
            .default_alarm(for_event, date_only)
            .or_else(|| target.default_alarm(for_event, date_only))
            .cloned();
        if let Some(mut alarm) = alarm {
            alarm.is_default = true;
            info.event.alarms.push(alarm.clone());
            info.changes
                .add_value(PropertyIndex::Alarm, ChangeValue::Alarm(alarm));
        }
    }
}

const MAX_ALIAS_DEPTH: usize = 20;

/// RSVP is requested from everyone who has not answered yet whenever the
/// organizer creates or reissues the event.
fn rsvp_needs_action(event: &mut Event) {
    for attendee in &mut event.attendees {
        if attendee.part_stat == ParticipationStatus::NeedsAction {
            attendee.rsvp = true;
        }
    }
}

fn attendee_values(values: &[ChangeValue]) -> impl Iterator<Item = Attendee> + '_ {
    values.iter().filter_map(|v| match v {
        ChangeValue::Attendee(a) => Some(a.clone()),
        _ => None,
    })
}
