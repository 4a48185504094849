// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 locmux contributors

//! App foreground state.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::env::{Listeners, SubscriptionId};

/// Foreground transition for a uid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForegroundEvent {
    pub uid: u32,
    pub foreground: bool,
}

pub type ForegroundListener = Arc<dyn Fn(&ForegroundEvent) + Send + Sync>;

/// Whether an app is currently considered foreground for location.
pub trait AppForegroundHelper: Send + Sync {
    fn is_app_foreground(&self, uid: u32) -> bool;

    fn subscribe(&self, listener: ForegroundListener) -> SubscriptionId;
    fn unsubscribe(&self, id: SubscriptionId);
}

/// In-memory foreground set; uids are background unless marked.
#[derive(Default)]
pub struct InMemoryForeground {
    foreground: Mutex<HashSet<u32>>,
    listeners: Listeners<ForegroundEvent>,
}

impl InMemoryForeground {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_foreground(&self, uid: u32, foreground: bool) {
        {
            let mut set = self.foreground.lock();
            let changed = if foreground {
                set.insert(uid)
            } else {
                set.remove(&uid)
            };
            if !changed {
                return;
            }
        }
        self.listeners.notify(&ForegroundEvent { uid, foreground });
    }
}

impl AppForegroundHelper for InMemoryForeground {
    fn is_app_foreground(&self, uid: u32) -> bool {
        self.foreground.lock().contains(&uid)
    }

    fn subscribe(&self, listener: ForegroundListener) -> SubscriptionId {
        self.listeners.subscribe(listener)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.listeners.unsubscribe(id);
    }
}
