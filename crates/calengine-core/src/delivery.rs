/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use crate::{error::Result, info::EventInfo};

/// Outbound message transport. Internal recipients receive the message in
/// their scheduling inbox; external recipients are queued on the sender's
/// outbox for mail-based delivery.
pub trait MessageDelivery {
    fn enqueue_internal(&self, principal_href: &str, message: &EventInfo) -> Result<()>;

    fn enqueue_external(&self, recipient: &str, message: &EventInfo) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    EntityFetched,
    EntityAdded,
    EntityUpdated,
    EntityDeleted,
    ScheduleMessageQueued,
}

/// Fire-and-forget notification sink. The engine buffers notifications
/// until commit and drops them on rollback.
pub trait NotificationSink {
    fn post(&self, kind: NotificationKind, count: u32);
}
