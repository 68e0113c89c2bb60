/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use crate::{
    changes::{ChangeTable, UpdateResult},
    error::EngineError,
    event::Event,
};
use std::collections::BTreeMap;

/// Aggregate around one master event: its stored overrides keyed by
/// canonical recurrence id, contained sub-items (availability children),
/// and the per-transaction change table and update result.
///
/// Overrides iterate in recurrence-id order so that change evaluation and
/// scheduling decisions aggregate deterministically: master first, then
/// overrides in key order.
#[derive(Debug, Clone)]
pub struct EventInfo {
    pub event: Event,
    overrides: BTreeMap<String, EventInfo>,
    contained: Vec<EventInfo>,
    pub changes: ChangeTable,
    pub update_result: UpdateResult,
}

impl EventInfo {
    pub fn new(event: Event) -> Self {
        EventInfo {
            event,
            overrides: BTreeMap::new(),
            contained: Vec::new(),
            changes: ChangeTable::default(),
            update_result: UpdateResult::default(),
        }
    }

    /// Attach a stored override. The override event must carry a
    /// recurrence id, unique within this aggregate.
    pub fn add_override(&mut self, info: EventInfo) -> Result<(), EngineError> {
        let rid = info.event.recurrence_id.clone().ok_or_else(|| {
            EngineError::Internal("override without recurrence id".to_string())
        })?;
        if self.overrides.contains_key(&rid) {
            return Err(EngineError::Internal(format!(
                "duplicate override for recurrence id {rid}"
            )));
        }
        self.overrides.insert(rid, info);
        Ok(())
    }

    pub fn overrides(&self) -> impl Iterator<Item = &EventInfo> {
        self.overrides.values()
    }

    pub fn overrides_mut(&mut self) -> impl Iterator<Item = &mut EventInfo> {
        self.overrides.values_mut()
    }

    pub fn override_for(&self, recurrence_id: &str) -> Option<&EventInfo> {
        self.overrides.get(recurrence_id)
    }

    pub fn num_overrides(&self) -> usize {
        self.overrides.len()
    }

    pub fn add_contained_item(&mut self, info: EventInfo) {
        self.contained.push(info);
    }

    pub fn contained_items(&self) -> &[EventInfo] {
        &self.contained
    }

    pub fn contained_items_mut(&mut self) -> &mut [EventInfo] {
        &mut self.contained
    }

    pub fn num_contained_items(&self) -> usize {
        self.contained.len()
    }

    /// True when any change table in the aggregate recorded a mutation.
    pub fn overrides_changed(&self) -> bool {
        self.overrides.values().any(|o| !o.changes.is_empty())
    }

    /// A copy suitable as the starting point of an outgoing message: the
    /// events of the master and every override, without the transient
    /// change table, update result or contained items. Builders construct
    /// messages from this copy so the stored aggregate is never aliased by
    /// an outgoing message.
    pub fn message_copy(&self) -> EventInfo {
        EventInfo {
            event: self.event.clone(),
            overrides: self
                .overrides
                .iter()
                .map(|(rid, ov)| (rid.clone(), ov.message_copy()))
                .collect(),
            contained: Vec::new(),
            changes: ChangeTable::default(),
            update_result: UpdateResult::default(),
        }
    }
}
