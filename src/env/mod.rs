// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 locmux contributors

//! External collaborators the multiplexer observes and drives.
//!
//! Each platform facility (settings, users, alarms, permissions, app ops,
//! foreground state, power save, screen, attribution, wakelocks,
//! broadcasts, the clock) is a small capability trait. An embedding
//! platform implements them against its own services; the bundled
//! in-memory implementations make the crate usable standalone and drive
//! the test suite.
//!
//! Helper callbacks re-enter the multiplexer, which takes its internal
//! lock. Implementations must therefore never invoke listeners or alarm
//! callbacks synchronously from inside a subscribe/schedule call.

mod alarms;
mod appops;
mod attribution;
mod broadcast;
mod clock;
mod foreground;
mod permissions;
mod power;
mod settings;
mod users;
mod wakelock;

pub use alarms::{AlarmCallback, AlarmHelper, AlarmToken, ManualAlarms, ThreadAlarms};
pub use appops::{AppOpsHelper, InMemoryAppOps};
pub use attribution::{
    AttributionHelper, AttributionKind, NoopAttribution, RecordingAttribution,
};
pub use broadcast::{Broadcasts, NoopBroadcasts, RecordingBroadcasts};
pub use clock::{Clock, ManualClock, SystemClock};
pub use foreground::{AppForegroundHelper, ForegroundEvent, ForegroundListener, InMemoryForeground};
pub use permissions::{
    InMemoryPermissions, LocationPermissionsHelper, PermissionEvent, PermissionListener,
};
pub use power::{
    InMemoryPowerMode, InMemoryScreen, LocationPowerSaveMode, LocationPowerSaveModeHelper,
    PowerSaveListener, ScreenInteractiveHelper, ScreenListener,
};
pub use settings::{
    InMemorySettings, Setting, SettingEvent, SettingListener, SettingsHelper,
    DEFAULT_BACKGROUND_THROTTLE_INTERVAL_MS, DEFAULT_COARSE_ACCURACY_M,
};
pub use users::{InMemoryUserInfo, UserEvent, UserInfoHelper, UserListener};
pub use wakelock::{CountingWakeLock, NoopWakeLock, WakeLockHelper};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// Handle returned by helper subscriptions, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Subscription list shared by the in-memory helper implementations.
///
/// Notification snapshots the listener list under a short lock and calls
/// the listeners outside it, so a listener may re-enter its helper.
pub struct Listeners<E> {
    entries: Mutex<Vec<(SubscriptionId, Arc<dyn Fn(&E) + Send + Sync>)>>,
    counter: AtomicU64,
}

impl<E> Listeners<E> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            counter: AtomicU64::new(1),
        }
    }

    pub fn subscribe(&self, listener: Arc<dyn Fn(&E) + Send + Sync>) -> SubscriptionId {
        let id = SubscriptionId(self.counter.fetch_add(1, Ordering::Relaxed));
        self.entries.lock().push((id, listener));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.entries.lock().retain(|(entry_id, _)| *entry_id != id);
    }

    pub fn notify(&self, event: &E) {
        let snapshot: Vec<_> = self
            .entries
            .lock()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in snapshot {
            listener(event);
        }
    }
}

impl<E: Copy + 'static> Listeners<E> {
    /// Subscribe a by-value listener for `Copy` event types.
    pub fn subscribe_value(&self, listener: Arc<dyn Fn(E) + Send + Sync>) -> SubscriptionId {
        self.subscribe(Arc::new(move |event: &E| listener(*event)))
    }
}

impl<E> Default for Listeners<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// The bundle of collaborators handed to a manager at construction.
///
/// [`Environment::new`] wires the in-memory implementations and the real
/// alarm thread; replace individual helpers with `with_*`.
#[derive(Clone)]
pub struct Environment {
    pub clock: Arc<dyn Clock>,
    pub settings: Arc<dyn SettingsHelper>,
    pub users: Arc<dyn UserInfoHelper>,
    pub alarms: Arc<dyn AlarmHelper>,
    pub app_ops: Arc<dyn AppOpsHelper>,
    pub permissions: Arc<dyn LocationPermissionsHelper>,
    pub foreground: Arc<dyn AppForegroundHelper>,
    pub power_save: Arc<dyn LocationPowerSaveModeHelper>,
    pub screen: Arc<dyn ScreenInteractiveHelper>,
    pub attribution: Arc<dyn AttributionHelper>,
    pub wake_lock: Arc<dyn WakeLockHelper>,
    pub broadcasts: Arc<dyn Broadcasts>,
}

impl Environment {
    pub fn new() -> Self {
        Self {
            clock: Arc::new(SystemClock::new()),
            settings: Arc::new(InMemorySettings::new()),
            users: Arc::new(InMemoryUserInfo::new()),
            alarms: Arc::new(ThreadAlarms::new()),
            app_ops: Arc::new(InMemoryAppOps::new()),
            permissions: Arc::new(InMemoryPermissions::new()),
            foreground: Arc::new(InMemoryForeground::new()),
            power_save: Arc::new(InMemoryPowerMode::new()),
            screen: Arc::new(InMemoryScreen::new()),
            attribution: Arc::new(NoopAttribution::new()),
            wake_lock: Arc::new(NoopWakeLock::new()),
            broadcasts: Arc::new(NoopBroadcasts::new()),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_settings(mut self, settings: Arc<dyn SettingsHelper>) -> Self {
        self.settings = settings;
        self
    }

    #[must_use]
    pub fn with_users(mut self, users: Arc<dyn UserInfoHelper>) -> Self {
        self.users = users;
        self
    }

    #[must_use]
    pub fn with_alarms(mut self, alarms: Arc<dyn AlarmHelper>) -> Self {
        self.alarms = alarms;
        self
    }

    #[must_use]
    pub fn with_app_ops(mut self, app_ops: Arc<dyn AppOpsHelper>) -> Self {
        self.app_ops = app_ops;
        self
    }

    #[must_use]
    pub fn with_permissions(mut self, permissions: Arc<dyn LocationPermissionsHelper>) -> Self {
        self.permissions = permissions;
        self
    }

    #[must_use]
    pub fn with_foreground(mut self, foreground: Arc<dyn AppForegroundHelper>) -> Self {
        self.foreground = foreground;
        self
    }

    #[must_use]
    pub fn with_power_save(mut self, power_save: Arc<dyn LocationPowerSaveModeHelper>) -> Self {
        self.power_save = power_save;
        self
    }

    #[must_use]
    pub fn with_screen(mut self, screen: Arc<dyn ScreenInteractiveHelper>) -> Self {
        self.screen = screen;
        self
    }

    #[must_use]
    pub fn with_attribution(mut self, attribution: Arc<dyn AttributionHelper>) -> Self {
        self.attribution = attribution;
        self
    }

    #[must_use]
    pub fn with_wake_lock(mut self, wake_lock: Arc<dyn WakeLockHelper>) -> Self {
        self.wake_lock = wake_lock;
        self
    }

    #[must_use]
    pub fn with_broadcasts(mut self, broadcasts: Arc<dyn Broadcasts>) -> Self {
        self.broadcasts = broadcasts;
        self
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}
