/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use crate::{error::Result, event::CuType};
use serde::{Deserialize, Serialize};

/// Directory record for a calendar user or group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrincipalInfo {
    pub href: String,
    pub calendar_address: Option<String>,
    pub email: Option<String>,
    pub kind: PrincipalKind,
    /// Present for groups the directory was able to expand.
    pub members: Option<Vec<PrincipalInfo>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrincipalKind {
    Individual,
    Group,
    Resource,
    Room,
}

impl From<PrincipalKind> for CuType {
    fn from(value: PrincipalKind) -> Self {
        match value {
            PrincipalKind::Individual => CuType::Individual,
            PrincipalKind::Group => CuType::Group,
            PrincipalKind::Resource => CuType::Resource,
            PrincipalKind::Room => CuType::Room,
        }
    }
}

/// The directory collaborator. Lookups are live: the engine never caches
/// membership across transactions, so group changes take effect on the
/// next classification.
pub trait DirectoryProvider {
    /// Map a calendar address to a principal href, `None` for addresses
    /// outside this installation.
    fn caladdr_to_principal(&self, uri: &str) -> Result<Option<String>>;

    /// Expand a group address into its membership. `None` when the address
    /// is not a local expandable group; an `Err` is a directory outage the
    /// caller may choose to swallow.
    fn expand_group(&self, uri: &str, cu_type: CuType) -> Result<Option<PrincipalInfo>>;
}
