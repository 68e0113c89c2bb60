/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use crate::event::Alarm;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectionKind {
    Folder,
    Calendar,
    Tasks,
    Poll,
    Inbox,
    Outbox,
    Alias,
    ExternalSubscription,
    Deleted,
}

/// A default alarm definition attached to a collection or to the user
/// home, applied to freshly added events that carry no alarms of their
/// own. Definitions are selected by entity kind and by whether the event
/// start is date-only.
#[derive(Debug, Clone, PartialEq)]
pub struct DefaultAlarm {
    pub for_event: bool,
    pub date_only: bool,
    pub alarm: Alarm,
}

#[derive(Debug, Clone)]
pub struct Collection {
    pub path: String,
    pub owner_href: String,
    pub kind: CollectionKind,
    /// Path of the aliased collection; only for `CollectionKind::Alias`.
    pub alias_target: Option<String>,
    pub categories: Vec<String>,
    /// Scheduling messages are processed for entities in this collection.
    pub scheduling: bool,
    pub default_alarms: Vec<DefaultAlarm>,
}

impl Collection {
    pub fn new(path: impl Into<String>, owner_href: impl Into<String>, kind: CollectionKind) -> Self {
        Collection {
            path: path.into(),
            owner_href: owner_href.into(),
            kind,
            alias_target: None,
            categories: Vec::new(),
            scheduling: matches!(
                kind,
                CollectionKind::Calendar | CollectionKind::Tasks | CollectionKind::Poll
            ),
            default_alarms: Vec::new(),
        }
    }

    /// Collections events can be stored into.
    pub fn is_calendar_collection(&self) -> bool {
        matches!(
            self.kind,
            CollectionKind::Calendar | CollectionKind::Tasks | CollectionKind::Poll
        )
    }

    pub fn is_alias(&self) -> bool {
        self.kind == CollectionKind::Alias
    }

    pub fn default_alarm(&self, for_event: bool, date_only: bool) -> Option<&Alarm> {
        self.default_alarms
            .iter()
            .find(|d| d.for_event == for_event && d.date_only == date_only)
            .map(|d| &d.alarm)
    }
}
