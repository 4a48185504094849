// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 locmux contributors

//! Location power-save policy and screen interactivity.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::env::{Listeners, SubscriptionId};

/// Battery-saver restriction applied to location while saving power.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LocationPowerSaveMode {
    /// No restriction.
    #[default]
    NoChange,
    /// Only foreground apps receive locations.
    ForegroundOnly,
    /// GPS is shut off while the screen is off; other providers unaffected.
    GpsDisabledWhenScreenOff,
    /// All providers throttled while the screen is off.
    ThrottleRequestsWhenScreenOff,
    /// All providers shut off while the screen is off.
    AllDisabledWhenScreenOff,
}

pub type PowerSaveListener = Arc<dyn Fn(LocationPowerSaveMode) + Send + Sync>;

/// Current power-save mode with change events.
pub trait LocationPowerSaveModeHelper: Send + Sync {
    fn mode(&self) -> LocationPowerSaveMode;

    fn subscribe(&self, listener: PowerSaveListener) -> SubscriptionId;
    fn unsubscribe(&self, id: SubscriptionId);
}

/// In-memory power-save mode holder.
#[derive(Default)]
pub struct InMemoryPowerMode {
    mode: Mutex<LocationPowerSaveMode>,
    listeners: Listeners<LocationPowerSaveMode>,
}

impl InMemoryPowerMode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_mode(&self, mode: LocationPowerSaveMode) {
        {
            let mut current = self.mode.lock();
            if *current == mode {
                return;
            }
            *current = mode;
        }
        self.listeners.notify(&mode);
    }
}

impl LocationPowerSaveModeHelper for InMemoryPowerMode {
    fn mode(&self) -> LocationPowerSaveMode {
        *self.mode.lock()
    }

    fn subscribe(&self, listener: PowerSaveListener) -> SubscriptionId {
        self.listeners.subscribe_value(listener)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.listeners.unsubscribe(id);
    }
}

pub type ScreenListener = Arc<dyn Fn(bool) + Send + Sync>;

/// Screen interactivity, consulted by the screen-off power-save modes.
pub trait ScreenInteractiveHelper: Send + Sync {
    fn is_interactive(&self) -> bool;

    fn subscribe(&self, listener: ScreenListener) -> SubscriptionId;
    fn unsubscribe(&self, id: SubscriptionId);
}

/// In-memory screen state, interactive by default.
pub struct InMemoryScreen {
    interactive: AtomicBool,
    listeners: Listeners<bool>,
}

impl InMemoryScreen {
    pub fn new() -> Self {
        Self {
            interactive: AtomicBool::new(true),
            listeners: Listeners::new(),
        }
    }

    pub fn set_interactive(&self, interactive: bool) {
        let previous = self.interactive.swap(interactive, Ordering::SeqCst);
        if previous != interactive {
            self.listeners.notify(&interactive);
        }
    }
}

impl Default for InMemoryScreen {
    fn default() -> Self {
        Self::new()
    }
}

impl ScreenInteractiveHelper for InMemoryScreen {
    fn is_interactive(&self) -> bool {
        self.interactive.load(Ordering::SeqCst)
    }

    fn subscribe(&self, listener: ScreenListener) -> SubscriptionId {
        self.listeners.subscribe_value(listener)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.listeners.unsubscribe(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_change_notifies_once() {
        let helper = InMemoryPowerMode::new();
        let events = Arc::new(Mutex::new(Vec::new()));
        let events_clone = Arc::clone(&events);
        helper.subscribe(Arc::new(move |mode| events_clone.lock().push(mode)));

        helper.set_mode(LocationPowerSaveMode::ForegroundOnly);
        helper.set_mode(LocationPowerSaveMode::ForegroundOnly);
        assert_eq!(*events.lock(), vec![LocationPowerSaveMode::ForegroundOnly]);
    }

    #[test]
    fn test_screen_default_interactive() {
        let screen = InMemoryScreen::new();
        assert!(screen.is_interactive());
        screen.set_interactive(false);
        assert!(!screen.is_interactive());
    }
}
