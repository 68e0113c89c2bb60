/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Bounds on recurrence expansion. Runaway rules (daily forever) are
/// truncated at these limits rather than failed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ExpansionLimits {
    pub max_years: u32,
    pub max_instances: usize,
}

impl Default for ExpansionLimits {
    fn default() -> Self {
        ExpansionLimits {
            max_years: 5,
            max_instances: 10_000,
        }
    }
}

/// Process-wide behavioral parameters, loaded from the deployment and
/// refreshed on demand.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemParams {
    /// Public-administration mode: alias categories are copied onto events
    /// filed through the alias.
    pub public_admin: bool,
    /// Domain suffix for generated UIDs.
    pub uid_domain: Option<String>,
    /// Categories stamped onto every freshly added event.
    pub default_categories: Vec<String>,
}

struct CacheSlot {
    params: SystemParams,
    loaded_at: Option<DateTime<Utc>>,
}

/// TTL cache around the system parameters. Callers pass the clock in, so
/// staleness is explicit and testable; there are no global statics behind
/// this type.
pub struct SystemParamsCache {
    ttl: Duration,
    loader: Box<dyn Fn() -> SystemParams + Send + Sync>,
    slot: RwLock<CacheSlot>,
}

impl SystemParamsCache {
    pub fn new(
        ttl_secs: i64,
        loader: impl Fn() -> SystemParams + Send + Sync + 'static,
    ) -> Self {
        SystemParamsCache {
            ttl: Duration::seconds(ttl_secs),
            loader: Box::new(loader),
            slot: RwLock::new(CacheSlot {
                params: SystemParams::default(),
                loaded_at: None,
            }),
        }
    }

    /// Return the cached parameters, reloading through the loader when the
    /// TTL has elapsed or the cache was never filled.
    pub fn refresh_if_stale(&self, now: DateTime<Utc>) -> SystemParams {
        {
            let slot = self.slot.read();
            if let Some(loaded_at) = slot.loaded_at {
                if now - loaded_at < self.ttl {
                    return slot.params.clone();
                }
            }
        }

        let params = (self.loader)();
        let mut slot = self.slot.write();
        slot.params = params.clone();
        slot.loaded_at = Some(now);
        params
    }

    pub fn invalidate(&self) {
        self.slot.write().loaded_at = None;
    }
}
