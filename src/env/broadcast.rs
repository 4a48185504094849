// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 locmux contributors

//! Outbound provider-changed broadcast.

use parking_lot::Mutex;

use crate::types::UserId;

/// Sink for the user-visible "providers changed" broadcast emitted when a
/// provider's enabled state flips. The multiplexer suppresses it for the
/// `fused` and `passive` providers by legacy contract.
pub trait Broadcasts: Send + Sync {
    fn provider_changed(&self, user: UserId, provider: &str, enabled: bool);
}

/// Broadcast sink that drops everything.
#[derive(Default)]
pub struct NoopBroadcasts;

impl NoopBroadcasts {
    pub fn new() -> Self {
        Self
    }
}

impl Broadcasts for NoopBroadcasts {
    fn provider_changed(&self, _: UserId, _: &str, _: bool) {}
}

/// Broadcast sink that records events for inspection in tests.
#[derive(Default)]
pub struct RecordingBroadcasts {
    events: Mutex<Vec<(UserId, String, bool)>>,
}

impl RecordingBroadcasts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<(UserId, String, bool)> {
        self.events.lock().clone()
    }
}

impl Broadcasts for RecordingBroadcasts {
    fn provider_changed(&self, user: UserId, provider: &str, enabled: bool) {
        self.events.lock().push((user, provider.to_string(), enabled));
    }
}
