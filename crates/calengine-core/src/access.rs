/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use crate::{collection::Collection, error::Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Privilege {
    Read,
    ReadFreeBusy,
    Write,
    ScheduleRequest,
    ScheduleReply,
}

/// Yes/no outcome of an ACL evaluation with the denying rule, when any.
#[derive(Debug, Clone)]
pub struct AccessDecision {
    pub allowed: bool,
    pub reason: Option<String>,
}

impl AccessDecision {
    pub fn allowed() -> Self {
        AccessDecision {
            allowed: true,
            reason: None,
        }
    }

    pub fn denied(reason: impl Into<String>) -> Self {
        AccessDecision {
            allowed: false,
            reason: Some(reason.into()),
        }
    }
}

/// The access-control collaborator; evaluation itself is out of scope for
/// the engine.
pub trait AccessChecker {
    fn check(
        &self,
        collection: &Collection,
        principal_href: &str,
        privilege: Privilege,
    ) -> Result<AccessDecision>;
}
