// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 locmux contributors

//! Root wiring: one manager per named provider.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::env::Environment;
use crate::fudger::Fudger;
use crate::multiplexer::{CurrentLocationHandle, EnabledListener, Multiplexer};
use crate::provider::{LocationProvider, PassiveHook};
use crate::transport::LocationTransport;
use crate::types::{
    CallerIdentity, ClientKey, Location, LocationRequest, PermissionLevel, ProviderRequest, UserId,
};
use crate::Error;

/// Sink for batched fixes, handed through verbatim.
pub type BatchHook = Arc<dyn Fn(&[Location]) + Send + Sync>;

/// Owns the multiplexer for one provider and exposes the public API.
///
/// The provider driver reports back through [`on_report_location`] and
/// [`on_state_changed`]; everything else is the client-facing surface.
///
/// [`on_report_location`]: LocationProviderManager::on_report_location
/// [`on_state_changed`]: LocationProviderManager::on_state_changed
pub struct LocationProviderManager {
    mux: Arc<Multiplexer>,
    provider: Arc<dyn LocationProvider>,
    batch_hook: Mutex<Option<BatchHook>>,
}

impl LocationProviderManager {
    /// Manager with the default grid fudger, sized by the coarse-accuracy
    /// setting and re-created when it changes.
    pub fn new(
        name: &str,
        environment: Environment,
        provider: Arc<dyn LocationProvider>,
    ) -> Self {
        Self {
            mux: Multiplexer::new(name, environment, Arc::clone(&provider), None),
            provider,
            batch_hook: Mutex::new(None),
        }
    }

    /// Manager with a caller-supplied fudger. The coarse-accuracy setting
    /// is then the fudger's own business.
    pub fn with_fudger(
        name: &str,
        environment: Environment,
        provider: Arc<dyn LocationProvider>,
        fudger: Box<dyn Fudger>,
    ) -> Self {
        Self {
            mux: Multiplexer::new(name, environment, Arc::clone(&provider), Some(fudger)),
            provider,
            batch_hook: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.mux.name()
    }

    /// Begin serving requests. Idempotent.
    pub fn start(&self) {
        self.mux.start();
    }

    /// Remove all registrations and stop serving. Idempotent.
    pub fn stop(&self) {
        self.mux.stop();
    }

    /// Whether the provider is enabled for the user.
    #[must_use]
    pub fn is_enabled(&self, user: UserId) -> bool {
        self.mux.is_enabled(user)
    }

    /// The merged request currently applied to the provider.
    #[must_use]
    pub fn current_request(&self) -> ProviderRequest {
        self.mux.current_request()
    }

    /// Register (or replace) a streaming subscription under `key`.
    pub fn register(
        &self,
        key: ClientKey,
        request: LocationRequest,
        identity: CallerIdentity,
        permission: PermissionLevel,
        transport: Arc<dyn LocationTransport>,
    ) -> Result<(), Error> {
        self.mux.register(key, request, identity, permission, transport)
    }

    /// Remove the subscription under `key`. Idempotent.
    pub fn unregister(&self, key: ClientKey) {
        self.mux.unregister(key);
    }

    /// One-shot current-location request; the handle cancels it.
    pub fn get_current_location(
        &self,
        request: LocationRequest,
        identity: CallerIdentity,
        permission: PermissionLevel,
        transport: Arc<dyn LocationTransport>,
    ) -> Result<CurrentLocationHandle, Error> {
        self.mux
            .get_current_location(request, identity, permission, transport)
    }

    /// Gated read of the cached last location for this caller.
    #[must_use]
    pub fn get_last_location(
        &self,
        identity: &CallerIdentity,
        permission: PermissionLevel,
        bypass: bool,
    ) -> Option<Location> {
        self.mux.get_last_location(identity, permission, bypass)
    }

    /// Seed the cache for a user that has no cached fix yet.
    pub fn inject_last_location(&self, location: &Location, user: UserId) {
        self.mux.inject_last_location(location, user);
    }

    /// Forward an extra command to the provider driver.
    pub fn send_extra_command(&self, identity: &CallerIdentity, command: &str) -> bool {
        log::debug!(
            "[{}] extra command {:?} from {}",
            self.name(),
            command,
            identity
        );
        self.provider.send_extra_command(command)
    }

    /// Listen for per-user enabled transitions.
    pub fn add_enabled_listener(&self, listener: EnabledListener) -> u64 {
        self.mux.add_enabled_listener(listener)
    }

    pub fn remove_enabled_listener(&self, id: u64) {
        self.mux.remove_enabled_listener(id);
    }

    /// Install or clear the passive-provider forwarding hook.
    pub fn set_passive_hook(&self, hook: Option<Arc<dyn PassiveHook>>) {
        self.mux.set_passive_hook(hook);
    }

    /// Install or clear the batched-fix hook.
    pub fn set_batch_hook(&self, hook: Option<BatchHook>) {
        *self.batch_hook.lock() = hook;
    }

    /// Provider driver callback: a single fix.
    pub fn on_report_location(&self, location: &Location) {
        self.mux.on_report_location(location);
    }

    /// Provider driver callback: a batch of fixes, handed through
    /// verbatim to the batch hook.
    pub fn on_report_location_batch(&self, batch: &[Location]) {
        let hook = self.batch_hook.lock().clone();
        if let Some(hook) = hook {
            hook(batch);
        }
    }

    /// Provider driver callback: state (allowed/identity/properties/mock)
    /// changed.
    pub fn on_state_changed(&self) {
        self.mux.on_provider_state_changed();
    }

    /// Render the provider event log, oldest record first.
    #[must_use]
    pub fn event_log(&self) -> Vec<String> {
        self.mux.event_log().dump()
    }
}

impl Drop for LocationProviderManager {
    fn drop(&mut self) {
        self.stop();
    }
}
