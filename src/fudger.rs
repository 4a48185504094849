// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 locmux contributors

//! Coarse location derivation.
//!
//! Coarse consumers must not be able to recover fine movement by polling:
//! the fudger offsets every fix by a persistent per-instance amount and
//! then snaps it onto a grid sized by the coarse accuracy. Offsets
//! survive across mock sessions and are regenerated only by an explicit
//! [`Fudger::reset_offsets`].

use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

use crate::types::Location;

/// Meters per degree of latitude (spherical approximation).
const METERS_PER_DEGREE_LATITUDE: f64 = 111_000.0;

/// Latitude beyond which longitude degrees degenerate; offsets are
/// clamped here to keep the math stable near the poles.
const MAX_LATITUDE: f64 = 89.999;

/// Derives coarse locations from fine ones.
pub trait Fudger: Send + Sync {
    /// Derive the coarse rendition of a fine fix. Timestamps and
    /// provenance are preserved; coordinates and accuracy change.
    fn create_coarse(&self, fine: &Location) -> Location;

    /// Regenerate the secret offsets. Called when a mock session ends so
    /// a mock cannot probe the grid.
    fn reset_offsets(&self);
}

struct Offsets {
    latitude_m: f64,
    longitude_m: f64,
    seed: u64,
}

/// Deterministic offset-and-snap fudger.
pub struct GridFudger {
    accuracy_m: f32,
    offsets: Mutex<Offsets>,
}

impl GridFudger {
    /// Fudger with a fresh random offset.
    pub fn new(accuracy_m: f32) -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0x9e37_79b9_7f4a_7c15);
        Self::with_seed(accuracy_m, seed)
    }

    /// Fudger with a caller-chosen seed, for reproducible coarsening.
    pub fn with_seed(accuracy_m: f32, seed: u64) -> Self {
        let mut offsets = Offsets {
            latitude_m: 0.0,
            longitude_m: 0.0,
            seed,
        };
        Self::regenerate(&mut offsets, f64::from(accuracy_m));
        Self {
            accuracy_m: accuracy_m.max(1.0),
            offsets: Mutex::new(offsets),
        }
    }

    /// Grid size in meters.
    #[must_use]
    pub fn accuracy_m(&self) -> f32 {
        self.accuracy_m
    }

    fn regenerate(offsets: &mut Offsets, accuracy_m: f64) {
        offsets.latitude_m = Self::next_unit(&mut offsets.seed) * accuracy_m;
        offsets.longitude_m = Self::next_unit(&mut offsets.seed) * accuracy_m;
    }

    /// Next value in [-1, 1) from a 64-bit LCG.
    fn next_unit(seed: &mut u64) -> f64 {
        *seed = seed
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        let unit = (*seed >> 11) as f64 / (1u64 << 53) as f64;
        unit * 2.0 - 1.0
    }
}

impl Fudger for GridFudger {
    fn create_coarse(&self, fine: &Location) -> Location {
        let accuracy_m = f64::from(self.accuracy_m);
        let (offset_lat_m, offset_lon_m) = {
            let offsets = self.offsets.lock();
            (offsets.latitude_m, offsets.longitude_m)
        };

        let mut latitude = fine.latitude() + offset_lat_m / METERS_PER_DEGREE_LATITUDE;
        latitude = latitude.clamp(-MAX_LATITUDE, MAX_LATITUDE);
        let meters_per_degree_longitude = METERS_PER_DEGREE_LATITUDE * latitude.to_radians().cos();
        let mut longitude = fine.longitude() + offset_lon_m / meters_per_degree_longitude;

        // Snap onto the coarse grid.
        let grid_lat = accuracy_m / METERS_PER_DEGREE_LATITUDE;
        let grid_lon = accuracy_m / meters_per_degree_longitude;
        latitude = (latitude / grid_lat).round() * grid_lat;
        longitude = (longitude / grid_lon).round() * grid_lon;

        // Wrap longitude into [-180, 180).
        longitude = (longitude + 180.0).rem_euclid(360.0) - 180.0;

        let accuracy = fine
            .accuracy_m()
            .map_or(self.accuracy_m, |a| a.max(self.accuracy_m));
        fine.clone().with_coordinates(latitude, longitude, accuracy)
    }

    fn reset_offsets(&self) {
        let mut offsets = self.offsets.lock();
        let accuracy_m = f64::from(self.accuracy_m);
        Self::regenerate(&mut offsets, accuracy_m);
    }
}
