/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Data model and collaborator contracts for the calendar engine.
//!
//! This crate defines the typed calendar entities (events, attendees,
//! overrides, poll ballots), the per-transaction change table, collection
//! and configuration types, and the traits the scheduling engine drives
//! its external collaborators through: storage, directory, access control,
//! message delivery and notifications.
//!
//! # Schedule status
//!
//! Protocol-level scheduling conditions (bad method, not an attendee, …)
//! are not [`EngineError`](error::EngineError)s; they are returned as
//! status codes on the scheduling result so a caller can keep the rest of
//! a transaction alive. See the scheduling crate for the result type.

pub mod access;
pub mod changes;
pub mod collection;
pub mod config;
pub mod datetime;
pub mod delivery;
pub mod directory;
pub mod error;
pub mod event;
pub mod info;
pub mod store;
