// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 locmux contributors

//! Merged provider-level request.
//!
//! Many client requests against one provider collapse into a single
//! [`ProviderRequest`] via [`ProviderRequest::merge`]. The merge is a pure
//! function of the contributing effective requests, which keeps it
//! independently testable against the multiplexer's observable behavior.

use crate::types::{LocationRequest, Quality, WorkSource, PASSIVE_INTERVAL};

/// Sentinel interval meaning "provider should stop producing fixes".
pub const INTERVAL_DISABLED: u64 = u64::MAX;

/// The effective request handed to the provider driver.
///
/// Value-equal; the multiplexer only pushes a new request downstream when
/// it differs from the previously applied one.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderRequest {
    interval_ms: u64,
    quality: Quality,
    low_power: bool,
    bypass: bool,
    work_source: WorkSource,
}

impl ProviderRequest {
    /// The no-op request: tells the provider to stop.
    pub fn disabled() -> Self {
        Self {
            interval_ms: INTERVAL_DISABLED,
            quality: Quality::Balanced,
            low_power: false,
            bypass: false,
            work_source: WorkSource::new(),
        }
    }

    /// Whether the provider should be producing fixes at all.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.interval_ms != INTERVAL_DISABLED
    }

    #[must_use]
    pub fn interval_ms(&self) -> u64 {
        self.interval_ms
    }

    #[must_use]
    pub fn quality(&self) -> Quality {
        self.quality
    }

    #[must_use]
    pub fn low_power(&self) -> bool {
        self.low_power
    }

    /// Whether any contributor bypasses the user-facing location setting.
    #[must_use]
    pub fn bypass(&self) -> bool {
        self.bypass
    }

    #[must_use]
    pub fn work_source(&self) -> &WorkSource {
        &self.work_source
    }

    /// Merge the effective requests of all contributing registrations.
    ///
    /// Passive contributors must be filtered out by the caller; an empty
    /// slice yields the disabled request. The merged values are:
    /// interval and quality take the most demanding contributor, bypass is
    /// the OR, low-power only survives if every contributor asked for it.
    /// Power blame goes to every contributor whose interval is within
    /// `((interval + 1000) / 2) * 3` of the merged interval, so slow
    /// requests are not blamed for the fast cadence they ride along on.
    #[must_use]
    pub fn merge(contributors: &[&LocationRequest]) -> ProviderRequest {
        if contributors.is_empty() {
            return ProviderRequest::disabled();
        }

        let mut interval_ms = INTERVAL_DISABLED;
        let mut quality = Quality::LowPower;
        let mut low_power = true;
        let mut bypass = false;
        for request in contributors {
            debug_assert!(!request.is_passive());
            interval_ms = interval_ms.min(request.interval_ms());
            quality = quality.min(request.quality());
            low_power &= request.low_power();
            bypass |= request.bypass();
        }

        let threshold = interval_ms
            .checked_add(1_000)
            .map(|v| v / 2)
            .and_then(|v| v.checked_mul(3))
            .unwrap_or(PASSIVE_INTERVAL - 1);

        let mut work_source = WorkSource::new();
        for request in contributors {
            if request.interval_ms() <= threshold {
                work_source.merge(request.work_source());
            }
        }

        ProviderRequest {
            interval_ms,
            quality,
            low_power,
            bypass,
            work_source,
        }
    }
}

impl Default for ProviderRequest {
    fn default() -> Self {
        Self::disabled()
    }
}
