/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use thiserror::Error;

/// Hard failures. Every variant aborts the running operation and rolls the
/// enclosing transaction back; protocol-level scheduling conditions are not
/// errors and travel as [`ScheduleStatus`](crate#schedule-status) codes
/// instead.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Missing required property: {0}")]
    MissingRequiredProperty(&'static str),

    #[error("Malformed recurrence id: {0}")]
    MalformedRecurrenceId(String),

    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    #[error("Not a schedulable collection: {0}")]
    NotSchedulable(String),

    #[error("Only the organizer may change the organizer property")]
    ForbiddenOrganizerChange,

    #[error("No access to {0}")]
    NoAccess(String),

    #[error("Concurrent modification, retry the transaction")]
    ConflictRetry,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Directory error: {0}")]
    Directory(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
