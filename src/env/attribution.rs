// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 locmux contributors

//! Power/usage attribution sink.

use parking_lot::Mutex;

use crate::types::{CallerIdentity, ClientKey};

/// Sink for attribution events: which caller is receiving locations from
/// which provider, and whether the subscription is in its high-power
/// regime. Suppressed for requests hidden from app ops.
pub trait AttributionHelper: Send + Sync {
    fn report_location_start(&self, identity: &CallerIdentity, provider: &str, key: &ClientKey);
    fn report_location_stop(&self, identity: &CallerIdentity, provider: &str, key: &ClientKey);
    fn report_high_power_start(&self, identity: &CallerIdentity, provider: &str, key: &ClientKey);
    fn report_high_power_stop(&self, identity: &CallerIdentity, provider: &str, key: &ClientKey);
}

/// Attribution sink that drops everything.
#[derive(Default)]
pub struct NoopAttribution;

impl NoopAttribution {
    pub fn new() -> Self {
        Self
    }
}

impl AttributionHelper for NoopAttribution {
    fn report_location_start(&self, _: &CallerIdentity, _: &str, _: &ClientKey) {}
    fn report_location_stop(&self, _: &CallerIdentity, _: &str, _: &ClientKey) {}
    fn report_high_power_start(&self, _: &CallerIdentity, _: &str, _: &ClientKey) {}
    fn report_high_power_stop(&self, _: &CallerIdentity, _: &str, _: &ClientKey) {}
}

/// Kind of attribution event recorded by [`RecordingAttribution`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributionKind {
    LocationStart,
    LocationStop,
    HighPowerStart,
    HighPowerStop,
}

/// Attribution sink that records events for inspection in tests.
#[derive(Default)]
pub struct RecordingAttribution {
    events: Mutex<Vec<(AttributionKind, CallerIdentity, ClientKey)>>,
}

impl RecordingAttribution {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<(AttributionKind, CallerIdentity, ClientKey)> {
        self.events.lock().clone()
    }

    fn record(&self, kind: AttributionKind, identity: &CallerIdentity, key: &ClientKey) {
        self.events.lock().push((kind, identity.clone(), *key));
    }
}

impl AttributionHelper for RecordingAttribution {
    fn report_location_start(&self, identity: &CallerIdentity, _: &str, key: &ClientKey) {
        self.record(AttributionKind::LocationStart, identity, key);
    }

    fn report_location_stop(&self, identity: &CallerIdentity, _: &str, key: &ClientKey) {
        self.record(AttributionKind::LocationStop, identity, key);
    }

    fn report_high_power_start(&self, identity: &CallerIdentity, _: &str, key: &ClientKey) {
        self.record(AttributionKind::HighPowerStart, identity, key);
    }

    fn report_high_power_stop(&self, identity: &CallerIdentity, _: &str, key: &ClientKey) {
        self.record(AttributionKind::HighPowerStop, identity, key);
    }
}
