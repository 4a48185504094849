// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 locmux contributors

//! Location settings surface.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::env::{Listeners, SubscriptionId};
use crate::types::UserId;

/// Default background throttle interval: 30 minutes.
pub const DEFAULT_BACKGROUND_THROTTLE_INTERVAL_MS: u64 = 30 * 60 * 1000;

/// Default coarse accuracy grid: 2 km.
pub const DEFAULT_COARSE_ACCURACY_M: f32 = 2_000.0;

/// Individual settings the multiplexer reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Setting {
    /// Per-user location master toggle.
    LocationEnabled,
    /// Interval forced onto background clients.
    BackgroundThrottleInterval,
    /// Per-user package blacklist.
    PackageBlacklist,
    /// Packages exempt from background throttling.
    BackgroundThrottleWhitelist,
    /// Packages allowed to bypass the location toggle.
    IgnoreSettingsWhitelist,
    /// Coarsening grid size in meters.
    CoarseAccuracy,
}

/// A settings change notification. `user` is set for per-user settings.
#[derive(Debug, Clone, Copy)]
pub struct SettingEvent {
    pub setting: Setting,
    pub user: Option<UserId>,
}

pub type SettingListener = Arc<dyn Fn(&SettingEvent) + Send + Sync>;

/// Read access to the location settings, with change notifications.
pub trait SettingsHelper: Send + Sync {
    fn location_enabled(&self, user: UserId) -> bool;
    fn background_throttle_interval_ms(&self) -> u64;
    fn is_package_blacklisted(&self, user: UserId, package: &str) -> bool;
    /// Whether the package is on the background-throttle whitelist.
    fn is_throttle_exempt(&self, package: &str) -> bool;
    /// Whether the package may carry the settings-bypass flag.
    fn is_ignore_settings_allowed(&self, package: &str) -> bool;
    fn coarse_accuracy_m(&self) -> f32;

    fn subscribe(&self, listener: SettingListener) -> SubscriptionId;
    fn unsubscribe(&self, id: SubscriptionId);
}

#[derive(Debug)]
struct SettingsState {
    location_enabled: HashMap<UserId, bool>,
    background_throttle_interval_ms: u64,
    blacklist: HashMap<UserId, HashSet<String>>,
    throttle_whitelist: HashSet<String>,
    ignore_settings_whitelist: HashSet<String>,
    coarse_accuracy_m: f32,
}

/// Settings held in process memory. The embedding platform replaces this
/// with its own settings provider; tests drive it directly.
pub struct InMemorySettings {
    state: Mutex<SettingsState>,
    listeners: Listeners<SettingEvent>,
}

impl InMemorySettings {
    /// All defaults: location enabled, 30 min throttle, 2 km coarse grid,
    /// empty lists.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SettingsState {
                location_enabled: HashMap::new(),
                background_throttle_interval_ms: DEFAULT_BACKGROUND_THROTTLE_INTERVAL_MS,
                blacklist: HashMap::new(),
                throttle_whitelist: HashSet::new(),
                ignore_settings_whitelist: HashSet::new(),
                coarse_accuracy_m: DEFAULT_COARSE_ACCURACY_M,
            }),
            listeners: Listeners::new(),
        }
    }

    pub fn set_location_enabled(&self, user: UserId, enabled: bool) {
        self.state.lock().location_enabled.insert(user, enabled);
        self.listeners.notify(&SettingEvent {
            setting: Setting::LocationEnabled,
            user: Some(user),
        });
    }

    pub fn set_background_throttle_interval_ms(&self, interval_ms: u64) {
        self.state.lock().background_throttle_interval_ms = interval_ms;
        self.listeners.notify(&SettingEvent {
            setting: Setting::BackgroundThrottleInterval,
            user: None,
        });
    }

    pub fn set_package_blacklisted(&self, user: UserId, package: &str, blacklisted: bool) {
        {
            let mut state = self.state.lock();
            let entry = state.blacklist.entry(user).or_default();
            if blacklisted {
                entry.insert(package.to_string());
            } else {
                entry.remove(package);
            }
        }
        self.listeners.notify(&SettingEvent {
            setting: Setting::PackageBlacklist,
            user: Some(user),
        });
    }

    pub fn set_throttle_exempt(&self, package: &str, exempt: bool) {
        {
            let mut state = self.state.lock();
            if exempt {
                state.throttle_whitelist.insert(package.to_string());
            } else {
                state.throttle_whitelist.remove(package);
            }
        }
        self.listeners.notify(&SettingEvent {
            setting: Setting::BackgroundThrottleWhitelist,
            user: None,
        });
    }

    pub fn set_ignore_settings_allowed(&self, package: &str, allowed: bool) {
        {
            let mut state = self.state.lock();
            if allowed {
                state.ignore_settings_whitelist.insert(package.to_string());
            } else {
                state.ignore_settings_whitelist.remove(package);
            }
        }
        self.listeners.notify(&SettingEvent {
            setting: Setting::IgnoreSettingsWhitelist,
            user: None,
        });
    }

    pub fn set_coarse_accuracy_m(&self, accuracy_m: f32) {
        self.state.lock().coarse_accuracy_m = accuracy_m;
        self.listeners.notify(&SettingEvent {
            setting: Setting::CoarseAccuracy,
            user: None,
        });
    }
}

impl Default for InMemorySettings {
    fn default() -> Self {
        Self::new()
    }
}

impl SettingsHelper for InMemorySettings {
    fn location_enabled(&self, user: UserId) -> bool {
        *self
            .state
            .lock()
            .location_enabled
            .get(&user)
            .unwrap_or(&true)
    }

    fn background_throttle_interval_ms(&self) -> u64 {
        self.state.lock().background_throttle_interval_ms
    }

    fn is_package_blacklisted(&self, user: UserId, package: &str) -> bool {
        self.state
            .lock()
            .blacklist
            .get(&user)
            .is_some_and(|set| set.contains(package))
    }

    fn is_throttle_exempt(&self, package: &str) -> bool {
        self.state.lock().throttle_whitelist.contains(package)
    }

    fn is_ignore_settings_allowed(&self, package: &str) -> bool {
        self.state.lock().ignore_settings_whitelist.contains(package)
    }

    fn coarse_accuracy_m(&self) -> f32 {
        self.state.lock().coarse_accuracy_m
    }

    fn subscribe(&self, listener: SettingListener) -> SubscriptionId {
        self.listeners.subscribe(listener)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.listeners.unsubscribe(id);
    }
}
