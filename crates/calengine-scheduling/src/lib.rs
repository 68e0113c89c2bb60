/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! iTIP scheduling and recurrence expansion.
//!
//! The engine processes one event mutation at a time inside a caller-owned
//! transaction: classify the event for the current principal, detect what
//! changed, persist, build the scheduling messages the change requires and
//! route them to internal inboxes or the external outbox. Recurring
//! masters are expanded on demand into concrete instances, with stored
//! overrides taking precedence over generated ones.

use ahash::AHashMap;
use calengine_core::{
    access::AccessChecker,
    config::{ExpansionLimits, SystemParams},
    delivery::{MessageDelivery, NotificationKind, NotificationSink},
    directory::DirectoryProvider,
    error::Result,
    store::CalendarStore,
};

pub mod builder;
pub mod classify;
pub mod events;
pub mod organizer;
pub mod outbound;
pub mod recurrence;

/// Protocol-level scheduling conditions. These travel inside
/// [`ScheduleResult`] so the caller can keep the non-scheduling parts of a
/// transaction alive; hard failures use
/// [`EngineError`](calengine_core::error::EngineError) instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleStatus {
    /// The method is not valid for this operation, e.g. REFRESH on a
    /// stored event whose method is not REQUEST.
    BadMethod,
    /// The current principal is not listed as an attendee.
    NotAttendee,
    /// An outgoing reply-type message did not carry exactly one attendee.
    BadAttendees,
    NoOriginator,
    NoRecipients,
    /// One or more recipients could not be delivered to.
    DeliveryFailures,
}

/// Delivery outcome for a single recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecipientDisposition {
    Delivered,
    QueuedExternal,
    NoAccess,
    Failed(String),
}

/// Aggregated outcome of building and routing one scheduling message (or
/// one atomic message bundle).
#[derive(Debug, Clone, Default)]
pub struct ScheduleResult {
    pub status: Option<ScheduleStatus>,
    /// The message was dropped because it does not apply to any recipient.
    pub ignored: bool,
    /// External addresses still awaiting outbound delivery.
    pub external_recipients: Vec<String>,
    pub recipients: AHashMap<String, RecipientDisposition>,
}

impl ScheduleResult {
    pub fn with_status(status: ScheduleStatus) -> Self {
        ScheduleResult {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn delivery_failed(&self) -> bool {
        self.recipients
            .values()
            .any(|d| matches!(d, RecipientDisposition::Failed(_) | RecipientDisposition::NoAccess))
    }
}

/// Outcome of an add or update: the accumulated update result plus the
/// scheduling result when implicit scheduling ran.
#[derive(Debug, Clone)]
pub struct UpdateOutcome {
    pub update: calengine_core::changes::UpdateResult,
    pub scheduling: Option<ScheduleResult>,
}

/// Per-request options for the engine: the acting principal and the
/// configuration snapshot taken at the start of the request.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub principal_href: String,
    pub limits: ExpansionLimits,
    pub params: SystemParams,
}

/// The scheduling engine. One instance serves one logical transaction for
/// one principal; collaborators are borrowed for its lifetime. The engine
/// never parallelizes internally and holds no locks: concurrent edits are
/// the storage layer's concern, surfaced as a retryable conflict at
/// commit.
pub struct Engine<'a> {
    pub(crate) store: &'a dyn CalendarStore,
    pub(crate) directory: &'a dyn DirectoryProvider,
    pub(crate) access: &'a dyn AccessChecker,
    pub(crate) delivery: &'a dyn MessageDelivery,
    pub(crate) notifications: &'a dyn NotificationSink,
    pub(crate) principal_href: String,
    pub(crate) limits: ExpansionLimits,
    pub(crate) params: SystemParams,
    /// Notifications queue here until commit and are dropped on rollback.
    pub(crate) pending_notifications: Vec<(NotificationKind, u32)>,
}

impl<'a> Engine<'a> {
    pub fn new(
        store: &'a dyn CalendarStore,
        directory: &'a dyn DirectoryProvider,
        access: &'a dyn AccessChecker,
        delivery: &'a dyn MessageDelivery,
        notifications: &'a dyn NotificationSink,
        options: EngineOptions,
    ) -> Self {
        Engine {
            store,
            directory,
            access,
            delivery,
            notifications,
            principal_href: options.principal_href,
            limits: options.limits,
            params: options.params,
            pending_notifications: Vec::new(),
        }
    }

    pub fn principal_href(&self) -> &str {
        &self.principal_href
    }

    /// Commit the transaction and flush queued notifications.
    pub fn commit(&mut self) -> Result<()> {
        self.store.commit()?;
        for (kind, count) in self.pending_notifications.drain(..) {
            self.notifications.post(kind, count);
        }
        Ok(())
    }

    /// Roll the transaction back, discarding queued notifications.
    pub fn rollback(&mut self) -> Result<()> {
        self.pending_notifications.clear();
        self.store.rollback()
    }

    pub(crate) fn queue_notification(&mut self, kind: NotificationKind, count: u32) {
        self.pending_notifications.push((kind, count));
    }

    /// Run a fallible step; any error rolls the whole transaction back
    /// before it is re-signaled, so partial writes are never observable.
    pub(crate) fn rolling_back<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        match f(self) {
            Ok(value) => Ok(value),
            Err(err) => {
                self.pending_notifications.clear();
                if let Err(rollback_err) = self.store.rollback() {
                    tracing::warn!(error = %rollback_err, "rollback failed");
                }
                Err(err)
            }
        }
    }
}
