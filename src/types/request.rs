// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 locmux contributors

//! Client-side location request.

use crate::types::WorkSource;

/// Sentinel interval meaning "observe only": a passive request never
/// contributes to the merged provider request.
pub const PASSIVE_INTERVAL: u64 = u64::MAX;

/// Requested quality of the fixes.
///
/// The numeric order is significant: lower values are more demanding, and
/// merging picks the numeric minimum so the merged request satisfies the
/// most demanding contributor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u32)]
pub enum Quality {
    /// Best possible accuracy, at any power cost.
    HighAccuracy = 100,
    /// Balance accuracy against power.
    Balanced = 102,
    /// Whatever can be had at minimal power cost.
    LowPower = 203,
}

/// An immutable client request for location updates.
///
/// Build with [`LocationRequest::builder`]. The work source must be
/// non-empty; registration rejects requests without one.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationRequest {
    interval_ms: u64,
    min_update_interval_ms: u64,
    min_update_distance_m: f32,
    quality: Quality,
    max_updates: u32,
    expiration_realtime_ms: u64,
    duration_ms: u64,
    low_power: bool,
    bypass: bool,
    hidden_from_app_ops: bool,
    historical: bool,
    work_source: WorkSource,
}

impl LocationRequest {
    /// Start building a request with the given reporting interval.
    pub fn builder(interval_ms: u64) -> LocationRequestBuilder {
        LocationRequestBuilder {
            interval_ms,
            min_update_interval_ms: None,
            min_update_distance_m: 0.0,
            quality: Quality::Balanced,
            max_updates: u32::MAX,
            expiration_realtime_ms: u64::MAX,
            duration_ms: u64::MAX,
            low_power: false,
            bypass: false,
            hidden_from_app_ops: false,
            historical: true,
            work_source: WorkSource::new(),
        }
    }

    /// Requested reporting interval in milliseconds.
    /// [`PASSIVE_INTERVAL`] marks an observe-only request.
    #[must_use]
    pub fn interval_ms(&self) -> u64 {
        self.interval_ms
    }

    /// Whether this is a passive (observe-only) request.
    #[must_use]
    pub fn is_passive(&self) -> bool {
        self.interval_ms == PASSIVE_INTERVAL
    }

    /// Minimum time between deliveries, in milliseconds.
    #[must_use]
    pub fn min_update_interval_ms(&self) -> u64 {
        self.min_update_interval_ms
    }

    /// Minimum displacement between deliveries, in meters. Zero disables
    /// the displacement gate.
    #[must_use]
    pub fn min_update_distance_m(&self) -> f32 {
        self.min_update_distance_m
    }

    #[must_use]
    pub fn quality(&self) -> Quality {
        self.quality
    }

    /// Number of deliveries after which the subscription removes itself.
    #[must_use]
    pub fn max_updates(&self) -> u32 {
        self.max_updates
    }

    /// Absolute monotonic expiration, in milliseconds since boot.
    /// `u64::MAX` means the request never expires.
    #[must_use]
    pub fn expiration_realtime_ms(&self) -> u64 {
        self.expiration_realtime_ms
    }

    /// Relative lifetime; only meaningful for one-shot requests, where it
    /// is clamped to the one-shot timeout cap before use.
    #[must_use]
    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    /// Whether the client asked for low-power operation.
    #[must_use]
    pub fn low_power(&self) -> bool {
        self.low_power
    }

    /// Whether the request asks to bypass the user-facing location toggle
    /// and blacklist. Stripped unless the caller is privileged to use it.
    #[must_use]
    pub fn bypass(&self) -> bool {
        self.bypass
    }

    /// Whether deliveries are hidden from app-op accounting.
    #[must_use]
    pub fn hidden_from_app_ops(&self) -> bool {
        self.hidden_from_app_ops
    }

    /// Whether the client accepts a cached historical fix on activation.
    #[must_use]
    pub fn historical(&self) -> bool {
        self.historical
    }

    #[must_use]
    pub fn work_source(&self) -> &WorkSource {
        &self.work_source
    }

    pub(crate) fn set_interval_ms(&mut self, interval_ms: u64) {
        self.interval_ms = interval_ms;
    }

    pub(crate) fn set_min_update_interval_ms(&mut self, min_update_interval_ms: u64) {
        self.min_update_interval_ms = min_update_interval_ms;
    }

    pub(crate) fn set_quality(&mut self, quality: Quality) {
        self.quality = quality;
    }

    pub(crate) fn set_bypass(&mut self, bypass: bool) {
        self.bypass = bypass;
    }
}

/// Builder for [`LocationRequest`].
#[derive(Debug, Clone)]
pub struct LocationRequestBuilder {
    interval_ms: u64,
    min_update_interval_ms: Option<u64>,
    min_update_distance_m: f32,
    quality: Quality,
    max_updates: u32,
    expiration_realtime_ms: u64,
    duration_ms: u64,
    low_power: bool,
    bypass: bool,
    hidden_from_app_ops: bool,
    historical: bool,
    work_source: WorkSource,
}

impl LocationRequestBuilder {
    #[must_use]
    pub fn min_update_interval_ms(mut self, value: u64) -> Self {
        self.min_update_interval_ms = Some(value);
        self
    }

    #[must_use]
    pub fn min_update_distance_m(mut self, value: f32) -> Self {
        self.min_update_distance_m = value;
        self
    }

    #[must_use]
    pub fn quality(mut self, value: Quality) -> Self {
        self.quality = value;
        self
    }

    #[must_use]
    pub fn max_updates(mut self, value: u32) -> Self {
        self.max_updates = value.max(1);
        self
    }

    #[must_use]
    pub fn expiration_realtime_ms(mut self, value: u64) -> Self {
        self.expiration_realtime_ms = value;
        self
    }

    #[must_use]
    pub fn duration_ms(mut self, value: u64) -> Self {
        self.duration_ms = value;
        self
    }

    #[must_use]
    pub fn low_power(mut self, value: bool) -> Self {
        self.low_power = value;
        self
    }

    #[must_use]
    pub fn bypass(mut self, value: bool) -> Self {
        self.bypass = value;
        self
    }

    #[must_use]
    pub fn hidden_from_app_ops(mut self, value: bool) -> Self {
        self.hidden_from_app_ops = value;
        self
    }

    #[must_use]
    pub fn historical(mut self, value: bool) -> Self {
        self.historical = value;
        self
    }

    #[must_use]
    pub fn work_source(mut self, value: WorkSource) -> Self {
        self.work_source = value;
        self
    }

    /// Finalize the request. An unset min-update interval defaults to the
    /// reporting interval.
    #[must_use]
    pub fn build(self) -> LocationRequest {
        LocationRequest {
            interval_ms: self.interval_ms,
            min_update_interval_ms: self.min_update_interval_ms.unwrap_or(self.interval_ms),
            min_update_distance_m: self.min_update_distance_m,
            quality: self.quality,
            max_updates: self.max_updates,
            expiration_realtime_ms: self.expiration_realtime_ms,
            duration_ms: self.duration_ms,
            low_power: self.low_power,
            bypass: self.bypass,
            hidden_from_app_ops: self.hidden_from_app_ops,
            historical: self.historical,
            work_source: self.work_source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let request = LocationRequest::builder(5_000)
            .work_source(WorkSource::single(1000, "a"))
            .build();
        assert_eq!(request.interval_ms(), 5_000);
        assert_eq!(request.min_update_interval_ms(), 5_000);
        assert_eq!(request.quality(), Quality::Balanced);
        assert_eq!(request.max_updates(), u32::MAX);
        assert!(!request.is_passive());
        assert!(request.historical());
    }

    #[test]
    fn test_passive_sentinel() {
        let request = LocationRequest::builder(PASSIVE_INTERVAL).build();
        assert!(request.is_passive());
    }

    #[test]
    fn test_quality_order() {
        // Lower value = more demanding; min picks the most demanding.
        assert!(Quality::HighAccuracy < Quality::Balanced);
        assert!(Quality::Balanced < Quality::LowPower);
        assert_eq!(
            Quality::LowPower.min(Quality::HighAccuracy),
            Quality::HighAccuracy
        );
    }

    #[test]
    fn test_max_updates_floor() {
        let request = LocationRequest::builder(1_000).max_updates(0).build();
        assert_eq!(request.max_updates(), 1);
    }
}
