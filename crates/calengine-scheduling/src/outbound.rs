/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Message routing.
//!
//! Recipients resolving to a local principal receive the message in their
//! scheduling inbox; everything else accumulates as external recipients
//! and is flushed through the sender's outbox for mail-based delivery.
//! One recipient failing never blocks the others; the per-recipient
//! outcome is aggregated on the schedule result.

use crate::{builder::MessageBundle, Engine, RecipientDisposition, ScheduleResult, ScheduleStatus};
use calengine_core::{
    access::Privilege,
    collection::CollectionKind,
    delivery::NotificationKind,
    error::Result,
    info::EventInfo,
};

impl Engine<'_> {
    /// Route one message to all of its recipients and aggregate the
    /// per-recipient outcome.
    pub(crate) fn send_message(&mut self, message: &mut EventInfo) -> Result<ScheduleResult> {
        let mut result = ScheduleResult::default();

        let recipients = message.event.recipients.clone();
        if recipients.is_empty() {
            result.ignored = true;
            return Ok(result);
        }

        let privilege = if message
            .event
            .schedule_method
            .is_some_and(|m| m.is_reply_method())
        {
            Privilege::ScheduleReply
        } else {
            Privilege::ScheduleRequest
        };

        for recipient in recipients {
            match self.directory.caladdr_to_principal(&recipient)? {
                Some(principal_href) => {
                    self.deliver_internal(&principal_href, &recipient, privilege, message, &mut result)?;
                }
                None => {
                    result.external_recipients.push(recipient.clone());
                    result
                        .recipients
                        .insert(recipient, RecipientDisposition::QueuedExternal);
                }
            }
        }

        self.flush_external(privilege, message, &mut result)?;

        if result.delivery_failed() {
            result.status = Some(ScheduleStatus::DeliveryFailures);
        }

        Ok(result)
    }

    /// Route a delegation bundle atomically: the forwarded REQUEST goes
    /// first, and when it cannot be delivered the primary reply is not
    /// sent and its recipients are marked failed.
    pub(crate) fn send_bundle(&mut self, bundle: &mut MessageBundle) -> Result<ScheduleResult> {
        let forwarded_result = match &mut bundle.forwarded {
            Some(forwarded) => {
                let result = self.send_message(forwarded)?;
                if result.status.is_some() || result.delivery_failed() {
                    let mut failed = ScheduleResult::with_status(ScheduleStatus::DeliveryFailures);
                    for recipient in &bundle.primary.event.recipients {
                        failed.recipients.insert(
                            recipient.clone(),
                            RecipientDisposition::Failed(
                                "forwarded request to delegate undeliverable".to_string(),
                            ),
                        );
                    }
                    for (recipient, disposition) in result.recipients {
                        failed.recipients.insert(recipient, disposition);
                    }
                    return Ok(failed);
                }
                Some(result)
            }
            None => None,
        };

        let mut result = self.send_message(&mut bundle.primary)?;
        if let Some(forwarded_result) = forwarded_result {
            for (recipient, disposition) in forwarded_result.recipients {
                result.recipients.entry(recipient).or_insert(disposition);
            }
            result
                .external_recipients
                .extend(forwarded_result.external_recipients);
        }

        Ok(result)
    }

    fn deliver_internal(
        &mut self,
        principal_href: &str,
        recipient: &str,
        privilege: Privilege,
        message: &EventInfo,
        result: &mut ScheduleResult,
    ) -> Result<()> {
        let inbox = self
            .store
            .special_collection(principal_href, CollectionKind::Inbox)?;
        let decision = self.access.check(&inbox, &self.principal_href, privilege)?;
        if !decision.allowed {
            result
                .recipients
                .insert(recipient.to_string(), RecipientDisposition::NoAccess);
            return Ok(());
        }

        match self.delivery.enqueue_internal(principal_href, message) {
            Ok(()) => {
                result
                    .recipients
                    .insert(recipient.to_string(), RecipientDisposition::Delivered);
                self.queue_notification(NotificationKind::ScheduleMessageQueued, 1);
            }
            Err(err) => {
                tracing::warn!(recipient, error = %err, "inbox delivery failed");
                result.recipients.insert(
                    recipient.to_string(),
                    RecipientDisposition::Failed(err.to_string()),
                );
            }
        }

        Ok(())
    }

    /// Flush the accumulated external recipients through the sender's
    /// outbox.
    fn flush_external(
        &mut self,
        privilege: Privilege,
        message: &EventInfo,
        result: &mut ScheduleResult,
    ) -> Result<()> {
        if result.external_recipients.is_empty() {
            return Ok(());
        }

        let outbox = self
            .store
            .special_collection(&self.principal_href, CollectionKind::Outbox)?;
        let decision = self.access.check(&outbox, &self.principal_href, privilege)?;
        if !decision.allowed {
            for recipient in &result.external_recipients {
                result
                    .recipients
                    .insert(recipient.clone(), RecipientDisposition::NoAccess);
            }
            return Ok(());
        }

        for recipient in result.external_recipients.clone() {
            match self.delivery.enqueue_external(&recipient, message) {
                Ok(()) => {
                    self.queue_notification(NotificationKind::ScheduleMessageQueued, 1);
                }
                Err(err) => {
                    tracing::warn!(recipient = %recipient, error = %err, "outbox delivery failed");
                    result.recipients.insert(
                        recipient,
                        RecipientDisposition::Failed(err.to_string()),
                    );
                }
            }
        }

        Ok(())
    }
}
