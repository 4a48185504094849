// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 locmux contributors

//! Per-user last-location cache.
//!
//! Four slots per user: fine/coarse crossed with normal/bypass. The
//! bypass slots back settings-bypass consumers and persist across
//! provider disable; the normal slots are cleared whenever the provider
//! becomes disabled for the user. The coarse slots additionally snap to a
//! coarse time axis so a coarse consumer polling the cache cannot
//! reconstruct fine-grained movement.

use crate::types::{Location, PermissionLevel};

/// Minimum spacing of coarse locations, on both the request and the cache
/// time axis: 10 minutes.
pub const MIN_COARSE_INTERVAL_MS: u64 = 10 * 60 * 1000;

/// One user's cached last locations.
#[derive(Debug, Default)]
pub struct LastLocation {
    fine_normal: Option<Location>,
    coarse_normal: Option<Location>,
    fine_bypass: Option<Location>,
    coarse_bypass: Option<Location>,
}

impl LastLocation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update the normal slots from a new fix and its coarse rendition.
    pub fn set(&mut self, fine: &Location, coarse: &Location) {
        Self::update_fine(&mut self.fine_normal, fine);
        Self::update_coarse(&mut self.coarse_normal, coarse);
    }

    /// Update the bypass slots.
    pub fn set_bypass(&mut self, fine: &Location, coarse: &Location) {
        Self::update_fine(&mut self.fine_bypass, fine);
        Self::update_coarse(&mut self.coarse_bypass, coarse);
    }

    /// Read the slot for the given permission level and bypass flag.
    #[must_use]
    pub fn get(&self, level: PermissionLevel, bypass: bool) -> Option<&Location> {
        match (level, bypass) {
            (PermissionLevel::Fine, false) => self.fine_normal.as_ref(),
            (PermissionLevel::Coarse, false) => self.coarse_normal.as_ref(),
            (PermissionLevel::Fine, true) => self.fine_bypass.as_ref(),
            (PermissionLevel::Coarse, true) => self.coarse_bypass.as_ref(),
        }
    }

    /// Whether a fine normal entry exists (gates location injection).
    #[must_use]
    pub fn has_fine_normal(&self) -> bool {
        self.fine_normal.is_some()
    }

    /// Drop the normal slots; bypass slots persist.
    pub fn clear_normal(&mut self) {
        self.fine_normal = None;
        self.coarse_normal = None;
    }

    /// Drop any slot currently holding a mock-derived location.
    pub fn clear_mock(&mut self) {
        for slot in [
            &mut self.fine_normal,
            &mut self.coarse_normal,
            &mut self.fine_bypass,
            &mut self.coarse_bypass,
        ] {
            if slot.as_ref().is_some_and(Location::is_mock) {
                *slot = None;
            }
        }
    }

    /// Fine slots take any strictly newer fix.
    fn update_fine(slot: &mut Option<Location>, candidate: &Location) {
        let newer = slot
            .as_ref()
            .is_none_or(|held| candidate.elapsed_realtime_ms() > held.elapsed_realtime_ms());
        if newer {
            *slot = Some(candidate.clone());
        }
    }

    /// Coarse slots only advance once the candidate is a full coarse
    /// interval past the held entry.
    fn update_coarse(slot: &mut Option<Location>, candidate: &Location) {
        let due = slot.as_ref().is_none_or(|held| {
            candidate.elapsed_realtime_ms()
                >= held.elapsed_realtime_ms().saturating_add(MIN_COARSE_INTERVAL_MS)
        });
        if due {
            *slot = Some(candidate.clone());
        }
    }
}
