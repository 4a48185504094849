// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 locmux contributors

//! Location permission queries and revocation events.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::env::{Listeners, SubscriptionId};
use crate::types::{CallerIdentity, PermissionLevel};

/// A permission grant may have changed for a package or a uid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionEvent {
    Package(String),
    Uid(u32),
}

pub type PermissionListener = Arc<dyn Fn(&PermissionEvent) + Send + Sync>;

/// Permission state for location access.
pub trait LocationPermissionsHelper: Send + Sync {
    fn has_location_permissions(&self, level: PermissionLevel, identity: &CallerIdentity) -> bool;

    fn subscribe(&self, listener: PermissionListener) -> SubscriptionId;
    fn unsubscribe(&self, id: SubscriptionId);
}

/// In-memory grant table keyed by uid. Unknown uids hold both levels.
#[derive(Default)]
pub struct InMemoryPermissions {
    grants: Mutex<HashMap<u32, Option<PermissionLevel>>>,
    listeners: Listeners<PermissionEvent>,
}

impl InMemoryPermissions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the highest permission level held by a uid; `None` revokes.
    pub fn set_permission(&self, uid: u32, level: Option<PermissionLevel>) {
        self.grants.lock().insert(uid, level);
        self.listeners.notify(&PermissionEvent::Uid(uid));
    }
}

impl LocationPermissionsHelper for InMemoryPermissions {
    fn has_location_permissions(&self, level: PermissionLevel, identity: &CallerIdentity) -> bool {
        match self.grants.lock().get(&identity.uid) {
            None => true,
            Some(Some(PermissionLevel::Fine)) => true,
            Some(Some(PermissionLevel::Coarse)) => level == PermissionLevel::Coarse,
            Some(None) => false,
        }
    }

    fn subscribe(&self, listener: PermissionListener) -> SubscriptionId {
        self.listeners.subscribe(listener)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.listeners.unsubscribe(id);
    }
}
