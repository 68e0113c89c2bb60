/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use crate::{
    collection::{Collection, CollectionKind},
    error::Result,
    info::EventInfo,
};

/// Key of a stored event within a collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventKey {
    pub col_path: String,
    pub name: String,
}

/// Instance-level outcome of a save, reported by the storage layer.
#[derive(Debug, Clone, Default)]
pub struct SaveOutcome {
    pub added_instances: u32,
    pub updated_instances: u32,
    pub deleted_instances: u32,
    pub failed_overrides: Vec<String>,
}

/// The persistence collaborator. The engine drives it through this narrow
/// contract only; row layout, indexing and optimistic-concurrency checks
/// are its own business. A conflicting concurrent commit surfaces as
/// [`EngineError::ConflictRetry`](crate::error::EngineError::ConflictRetry).
pub trait CalendarStore {
    fn fetch_by_uid(
        &self,
        col_path: &str,
        uid: &str,
        recurrence_id: Option<&str>,
    ) -> Result<Option<EventInfo>>;

    fn fetch_by_key(&self, key: &EventKey) -> Result<Option<EventInfo>>;

    fn save(&self, info: &EventInfo, adding: bool) -> Result<SaveOutcome>;

    /// Remove the event and its overrides. Returns false when nothing was
    /// deleted.
    fn delete(&self, info: &EventInfo) -> Result<bool>;

    fn collection(&self, path: &str) -> Result<Option<Collection>>;

    /// One step of alias resolution: the collection an alias points at, or
    /// `None` when the target is unreachable.
    fn resolve_alias(&self, collection: &Collection) -> Result<Option<Collection>>;

    /// Fetch (creating on demand) a principal's special collection of the
    /// given kind, e.g. the scheduling inbox or outbox.
    fn special_collection(
        &self,
        principal_href: &str,
        kind: CollectionKind,
    ) -> Result<Collection>;

    fn begin(&self) -> Result<()>;
    fn commit(&self) -> Result<()>;
    fn rollback(&self) -> Result<()>;
}
