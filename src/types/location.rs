// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 locmux contributors

//! Location fix value type.

use std::sync::Arc;

/// Mean earth radius in meters, used by [`Location::distance_to`].
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// A single position fix.
///
/// Locations are mutable value objects from the point of view of consumers;
/// the multiplexer therefore hands out owned clones on every delivery and
/// never exposes references into its cache.
#[derive(Debug, Clone, PartialEq)]
pub struct Location {
    provider: Arc<str>,
    latitude: f64,
    longitude: f64,
    accuracy_m: Option<f32>,
    time_ms: u64,
    elapsed_realtime_ns: u64,
    mock: bool,
}

impl Location {
    /// Create a fix for the named provider at the given coordinates.
    ///
    /// Timestamps and accuracy start unset; a fix without them is
    /// incomplete and will be dropped by the multiplexer's validation.
    pub fn new(provider: &str, latitude: f64, longitude: f64) -> Self {
        Self {
            provider: Arc::from(provider),
            latitude,
            longitude,
            accuracy_m: None,
            time_ms: 0,
            elapsed_realtime_ns: 0,
            mock: false,
        }
    }

    /// Set the horizontal accuracy in meters.
    #[must_use]
    pub fn with_accuracy(mut self, accuracy_m: f32) -> Self {
        self.accuracy_m = Some(accuracy_m);
        self
    }

    /// Set the UTC timestamp in milliseconds.
    #[must_use]
    pub fn with_time(mut self, time_ms: u64) -> Self {
        self.time_ms = time_ms;
        self
    }

    /// Set the monotonic timestamp in milliseconds since boot.
    #[must_use]
    pub fn with_elapsed_realtime_ms(mut self, elapsed_ms: u64) -> Self {
        self.elapsed_realtime_ns = elapsed_ms.saturating_mul(1_000_000);
        self
    }

    /// Mark the fix as produced by a mock provider.
    #[must_use]
    pub fn with_mock(mut self, mock: bool) -> Self {
        self.mock = mock;
        self
    }

    /// Provider that produced this fix.
    #[must_use]
    pub fn provider(&self) -> &str {
        &self.provider
    }

    #[must_use]
    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    #[must_use]
    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    /// Horizontal accuracy in meters, if known.
    #[must_use]
    pub fn accuracy_m(&self) -> Option<f32> {
        self.accuracy_m
    }

    /// UTC timestamp in milliseconds.
    #[must_use]
    pub fn time_ms(&self) -> u64 {
        self.time_ms
    }

    /// Monotonic timestamp in nanoseconds since boot.
    #[must_use]
    pub fn elapsed_realtime_ns(&self) -> u64 {
        self.elapsed_realtime_ns
    }

    /// Monotonic timestamp in milliseconds since boot.
    #[must_use]
    pub fn elapsed_realtime_ms(&self) -> u64 {
        self.elapsed_realtime_ns / 1_000_000
    }

    /// Whether the fix came from a mock provider.
    #[must_use]
    pub fn is_mock(&self) -> bool {
        self.mock
    }

    /// Age of the fix relative to `now_ms` (monotonic milliseconds).
    #[must_use]
    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.elapsed_realtime_ms())
    }

    /// A fix is complete when it carries a provider, an accuracy and both
    /// timestamps. Incomplete fixes are rejected at the provider boundary.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.provider.is_empty()
            && self.accuracy_m.is_some()
            && self.time_ms > 0
            && self.elapsed_realtime_ns > 0
    }

    /// Replace coordinates and accuracy, keeping timestamps and provenance.
    /// Used by coarsening to derive a deliverable from a fine fix.
    #[must_use]
    pub fn with_coordinates(mut self, latitude: f64, longitude: f64, accuracy_m: f32) -> Self {
        self.latitude = latitude;
        self.longitude = longitude;
        self.accuracy_m = Some(accuracy_m);
        self
    }

    /// Great-circle distance to another fix, in meters (haversine).
    #[must_use]
    pub fn distance_to(&self, other: &Location) -> f32 {
        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let dlat = (other.latitude - self.latitude).to_radians();
        let dlon = (other.longitude - self.longitude).to_radians();

        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().asin();
        (EARTH_RADIUS_M * c) as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fix(lat: f64, lon: f64) -> Location {
        Location::new("gps", lat, lon)
            .with_accuracy(5.0)
            .with_time(1_700_000_000_000)
            .with_elapsed_realtime_ms(10_000)
    }

    #[test]
    fn test_completeness() {
        assert!(fix(1.0, 2.0).is_complete());
        assert!(!Location::new("gps", 1.0, 2.0).is_complete());
        assert!(!fix(1.0, 2.0).with_time(0).is_complete());
    }

    #[test]
    fn test_distance_one_degree_latitude() {
        let a = fix(0.0, 0.0);
        let b = fix(1.0, 0.0);
        let d = a.distance_to(&b);
        // One degree of latitude is roughly 111 km.
        assert!((d - 111_195.0).abs() < 200.0, "distance was {d}");
    }

    #[test]
    fn test_distance_zero() {
        let a = fix(48.2, 16.4);
        assert_eq!(a.distance_to(&a), 0.0);
    }

    #[test]
    fn test_age() {
        let a = fix(0.0, 0.0); // elapsed = 10s
        assert_eq!(a.age_ms(14_000), 4_000);
        assert_eq!(a.age_ms(9_000), 0);
    }
}
