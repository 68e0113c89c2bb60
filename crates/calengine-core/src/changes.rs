/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use crate::event::{Alarm, Attendee};
use ahash::AHashMap;

/// Logical properties tracked for change detection. One index covers a
/// whole multi-valued property; per-value deltas live in the entry's
/// added/removed lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyIndex {
    Dtstart,
    Dtend,
    Duration,
    Summary,
    Description,
    Location,
    Contact,
    Categories,
    Comment,
    Organizer,
    Attendee,
    Voter,
    PollItem,
    PollWinner,
    Sequence,
    Status,
    Transparency,
    Uid,
    RecurrenceId,
    Rrule,
    Rdate,
    Exdate,
    Alarm,
    XProperty,
}

impl PropertyIndex {
    /// Changing one of these on the organizer's copy requires the meeting
    /// to be rescheduled with the attendees.
    pub fn forces_reschedule(&self) -> bool {
        matches!(
            self,
            PropertyIndex::Dtstart
                | PropertyIndex::Dtend
                | PropertyIndex::Duration
                | PropertyIndex::Rrule
                | PropertyIndex::Rdate
                | PropertyIndex::Exdate
                | PropertyIndex::Status
                | PropertyIndex::Transparency
                | PropertyIndex::Location
        )
    }
}

/// A value recorded in a change entry. Attendees keep their full record so
/// downstream notification decisions can read partstat and delegation.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeValue {
    Text(String),
    Attendee(Attendee),
    Alarm(Alarm),
}

#[derive(Debug, Clone, Default)]
pub struct ChangeTableEntry {
    pub changed: bool,
    pub added: Vec<ChangeValue>,
    pub removed: Vec<ChangeValue>,
}

/// Field-level modifications made to one event or override within one
/// transaction. Owned by the [`EventInfo`](crate::info::EventInfo) that is
/// being mutated and discarded when the transaction ends.
#[derive(Debug, Clone, Default)]
pub struct ChangeTable {
    principal_href: String,
    entries: AHashMap<PropertyIndex, ChangeTableEntry>,
}

impl ChangeTable {
    pub fn new(principal_href: impl Into<String>) -> Self {
        ChangeTable {
            principal_href: principal_href.into(),
            entries: AHashMap::new(),
        }
    }

    pub fn principal_href(&self) -> &str {
        &self.principal_href
    }

    /// Record a property mutation. The old value, when known, lands in the
    /// removed list and the new value in the added list.
    pub fn changed(
        &mut self,
        index: PropertyIndex,
        old: Option<ChangeValue>,
        new: Option<ChangeValue>,
    ) {
        let entry = self.entries.entry(index).or_default();
        entry.changed = true;
        if let Some(old) = old {
            entry.removed.push(old);
        }
        if let Some(new) = new {
            entry.added.push(new);
        }
    }

    /// Record that a property was examined and found unchanged. The entry
    /// keeps the table non-empty, which is what distinguishes a detected
    /// no-op from a forced update.
    pub fn note_unchanged(&mut self, index: PropertyIndex) {
        self.entries.entry(index).or_default();
    }

    /// Compare old and new and record the right kind of entry.
    pub fn record(
        &mut self,
        index: PropertyIndex,
        old: Option<ChangeValue>,
        new: Option<ChangeValue>,
    ) {
        if old == new {
            self.note_unchanged(index);
        } else {
            self.changed(index, old, new);
        }
    }

    pub fn add_value(&mut self, index: PropertyIndex, value: ChangeValue) {
        let entry = self.entries.entry(index).or_default();
        entry.changed = true;
        entry.added.push(value);
    }

    pub fn remove_value(&mut self, index: PropertyIndex, value: ChangeValue) {
        let entry = self.entries.entry(index).or_default();
        entry.changed = true;
        entry.removed.push(value);
    }

    pub fn entry(&self, index: PropertyIndex) -> Option<&ChangeTableEntry> {
        self.entries.get(&index)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&PropertyIndex, &ChangeTableEntry)> {
        self.entries.iter()
    }

    /// An empty table means nothing was recorded, not that nothing changed:
    /// callers treat a forced update with no entries as changed.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Accumulated outcome of one add/update/delete, read by the caller and by
/// the scheduling decision points.
#[derive(Debug, Clone, Default)]
pub struct UpdateResult {
    pub adding: bool,
    pub deleting: bool,
    pub has_changed: bool,
    pub do_reschedule: bool,
    /// An attendee's own copy changed in a way the organizer must hear
    /// about.
    pub reply: bool,
    pub added_attendees: Vec<Attendee>,
    pub deleted_attendees: Vec<Attendee>,
    pub poll_winner: Option<i32>,
    pub added_instances: u32,
    pub updated_instances: u32,
    pub deleted_instances: u32,
    pub failed_overrides: Vec<String>,
    pub from_attendee_uri: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recorded_mutation_carries_values() {
        let mut table = ChangeTable::new("/principals/users/a");
        table.changed(
            PropertyIndex::Attendee,
            Some(ChangeValue::Attendee(Attendee::new("mailto:g@example.com"))),
            None,
        );
        table.add_value(
            PropertyIndex::Attendee,
            ChangeValue::Attendee(Attendee::new("mailto:m@example.com")),
        );

        let entry = table.entry(PropertyIndex::Attendee).unwrap();
        assert!(entry.changed);
        assert_eq!(entry.removed.len(), 1);
        assert_eq!(entry.added.len(), 1);
        assert!(!table.is_empty());
    }

    #[test]
    fn reschedule_table_is_time_and_place() {
        assert!(PropertyIndex::Dtstart.forces_reschedule());
        assert!(PropertyIndex::Location.forces_reschedule());
        assert!(!PropertyIndex::Summary.forces_reschedule());
        assert!(!PropertyIndex::Description.forces_reschedule());
    }
}
