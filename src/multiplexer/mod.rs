// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 locmux contributors

//! The per-provider location-request multiplexer.
//!
//! Owns every client registration against one provider, merges them into
//! a single provider-level request, fans incoming fixes back out through
//! each registration's acceptance test, and reacts to the policy events
//! that flip eligibility (user switching, permissions, settings, power
//! save, screen state, blacklists).
//!
//! # Locking
//!
//! One coarse mutex protects the whole multiplexer state, including all
//! registration fields. Every public entry point and every helper
//! callback takes it. Nothing slow happens under it: operations that
//! touch the outside world (transport deliveries, provider requests,
//! attribution, broadcasts) are built as [`Op`] values under the lock and
//! dispatched after it is released, in order. Enabled-state listeners
//! additionally run on a dedicated worker thread so a slow listener
//! cannot stall the caller.

mod policy;
mod request;
#[cfg(test)]
mod tests;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use arc_swap::ArcSwap;
use parking_lot::Mutex;

use crate::cache::LastLocation;
use crate::env::{AlarmToken, Environment, SubscriptionId};
use crate::events::{EventLog, LogEvent};
use crate::fudger::{Fudger, GridFudger};
use crate::provider::{LocationProvider, PassiveHook, ProviderState};
use crate::registration::{
    Acceptance, Registration, DELIVERY_WAKELOCK_TIMEOUT_MS, MAX_CURRENT_LOCATION_AGE_MS,
};
use crate::transport::{DeliveryCompletion, LocationTransport};
use crate::types::{
    CallerIdentity, ClientKey, Location, LocationRequest, PermissionLevel, ProviderRequest, UserId,
};
use crate::worker::Worker;
use crate::Error;

pub(crate) use request::MIN_REQUEST_DELAY_MS;

/// Listener for per-user enabled-state transitions.
pub type EnabledListener = Arc<dyn Fn(UserId, bool) + Send + Sync>;

/// Cancellation handle returned by a one-shot current-location request.
///
/// Cancelling removes the registration; doing so twice, or after the
/// request already finished, is a no-op.
pub struct CurrentLocationHandle {
    mux: Weak<Multiplexer>,
    key: ClientKey,
    id: u64,
}

impl CurrentLocationHandle {
    /// The key under which the one-shot is registered.
    #[must_use]
    pub fn key(&self) -> ClientKey {
        self.key
    }

    /// Cancel the request. The caller will not receive anything, not even
    /// the null give-up delivery.
    pub fn cancel(&self) {
        let Some(mux) = self.mux.upgrade() else {
            return;
        };
        let ops = {
            let mut state = mux.state.lock();
            mux.remove_locked(&mut state, self.key, Some(self.id), true)
        };
        mux.dispatch(ops);
    }
}

/// A pending delayed re-registration of the merged request.
struct DelayedRegister {
    generation: u64,
    request: ProviderRequest,
    alarm: AlarmToken,
}

/// Mutable multiplexer state, all behind the one coarse lock.
struct State {
    started: bool,
    enabled: HashMap<UserId, bool>,
    last_locations: HashMap<UserId, LastLocation>,
    /// Insertion-ordered registry; keys are unique.
    regs: Vec<(ClientKey, Registration)>,
    enabled_listeners: Vec<(u64, EnabledListener)>,
    enabled_listener_counter: u64,
    /// The request most recently pushed to the provider.
    applied_request: ProviderRequest,
    delayed: Option<DelayedRegister>,
    delayed_generation: u64,
    provider_state: ProviderState,
    passive_hook: Option<Arc<dyn PassiveHook>>,
}

/// Helper subscriptions installed on start, removed on stop.
enum HelperSub {
    Settings(SubscriptionId),
    Users(SubscriptionId),
    Permissions(SubscriptionId),
    Foreground(SubscriptionId),
    PowerSave(SubscriptionId),
    Screen(SubscriptionId),
}

/// Deferred side effect built under the lock, executed after it.
enum Op {
    Deliver {
        key: ClientKey,
        id: u64,
        transport: Arc<dyn LocationTransport>,
        location: Option<Location>,
        completion: DeliveryCompletion,
        remove_after: bool,
    },
    ProviderEnabled {
        key: ClientKey,
        id: u64,
        transport: Arc<dyn LocationTransport>,
        enabled: bool,
    },
    SetRequest(ProviderRequest),
    LocationStart {
        identity: CallerIdentity,
        key: ClientKey,
    },
    LocationStop {
        identity: CallerIdentity,
        key: ClientKey,
    },
    HighPower {
        identity: CallerIdentity,
        key: ClientKey,
        entering: bool,
    },
    NotifyEnabled {
        user: UserId,
        enabled: bool,
        listeners: Vec<EnabledListener>,
    },
    Broadcast {
        user: UserId,
        enabled: bool,
    },
    Passive {
        hook: Arc<dyn PassiveHook>,
        location: Location,
    },
}

fn find_index(state: &State, key: ClientKey, expected_id: Option<u64>) -> Option<usize> {
    state.regs.iter().position(|(entry_key, reg)| {
        *entry_key == key && expected_id.is_none_or(|id| reg.id() == id)
    })
}

/// The multiplexer for one named provider.
pub struct Multiplexer {
    name: String,
    env: Environment,
    provider: Arc<dyn LocationProvider>,
    fudger: ArcSwap<Box<dyn Fudger>>,
    /// Whether the fudger tracks the coarse-accuracy setting.
    auto_fudger: bool,
    event_log: Arc<EventLog>,
    worker: Worker,
    id_counter: AtomicU64,
    state: Mutex<State>,
    helper_subs: Mutex<Vec<HelperSub>>,
}

impl Multiplexer {
    /// Build a stopped multiplexer. `fudger` defaults to a [`GridFudger`]
    /// sized by the coarse-accuracy setting and re-created when that
    /// setting changes.
    pub fn new(
        name: &str,
        env: Environment,
        provider: Arc<dyn LocationProvider>,
        fudger: Option<Box<dyn Fudger>>,
    ) -> Arc<Self> {
        let auto_fudger = fudger.is_none();
        let fudger = fudger
            .unwrap_or_else(|| Box::new(GridFudger::new(env.settings.coarse_accuracy_m())) as _);
        let event_log = Arc::new(EventLog::new(Arc::clone(&env.clock)));
        Arc::new(Self {
            worker: Worker::new(&format!("locmux-{name}")),
            name: name.to_string(),
            env,
            provider,
            fudger: ArcSwap::from_pointee(fudger),
            auto_fudger,
            event_log,
            id_counter: AtomicU64::new(1),
            state: Mutex::new(State {
                started: false,
                enabled: HashMap::new(),
                last_locations: HashMap::new(),
                regs: Vec::new(),
                enabled_listeners: Vec::new(),
                enabled_listener_counter: 0,
                applied_request: ProviderRequest::disabled(),
                delayed: None,
                delayed_generation: 0,
                provider_state: ProviderState::default(),
                passive_hook: None,
            }),
            helper_subs: Mutex::new(Vec::new()),
        })
    }

    /// Provider name this multiplexer serves.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the provider is enabled for the user.
    #[must_use]
    pub fn is_enabled(&self, user: UserId) -> bool {
        self.state.lock().enabled.get(&user).copied().unwrap_or(false)
    }

    /// The merged request currently applied to the provider.
    #[must_use]
    pub fn current_request(&self) -> ProviderRequest {
        self.state.lock().applied_request.clone()
    }

    /// Whether a delayed re-registration is pending.
    #[must_use]
    pub fn has_delayed_register(&self) -> bool {
        self.state.lock().delayed.is_some()
    }

    pub(crate) fn event_log(&self) -> &Arc<EventLog> {
        &self.event_log
    }

    fn next_id(&self) -> u64 {
        self.id_counter.fetch_add(1, Ordering::Relaxed)
    }

    /// Begin serving: subscribe to the policy surfaces and initialize the
    /// enabled state of every running user. Idempotent.
    pub fn start(self: &Arc<Self>) {
        {
            let mut state = self.state.lock();
            if state.started {
                return;
            }
            state.started = true;
            state.provider_state = self.provider.state();
        }
        self.subscribe_helpers();
        let ops = {
            let mut state = self.state.lock();
            let mut ops = Vec::new();
            for user in self.env.users.running_user_ids() {
                ops.extend(self.on_enabled_changed_locked(&mut state, user));
            }
            ops
        };
        self.dispatch(ops);
        log::debug!("[{}] started", self.name);
    }

    /// Tear down: remove every registration, deliver the final disable
    /// transitions, unsubscribe from the policy surfaces. Idempotent.
    pub fn stop(self: &Arc<Self>) {
        self.unsubscribe_helpers();
        let ops = {
            let mut state = self.state.lock();
            if !state.started {
                return;
            }
            let mut ops = Vec::new();
            let keys: Vec<(ClientKey, u64)> =
                state.regs.iter().map(|(key, reg)| (*key, reg.id())).collect();
            for (key, id) in keys {
                ops.extend(self.remove_locked(&mut state, key, Some(id), false));
            }
            state.started = false;
            let users: Vec<UserId> = state.enabled.keys().copied().collect();
            for user in users {
                ops.extend(self.on_enabled_changed_locked(&mut state, user));
            }
            ops.extend(self.update_provider_request_locked(&mut state));
            if let Some(delayed) = state.delayed.take() {
                self.env.alarms.cancel(delayed.alarm);
            }
            state.enabled.clear();
            state.last_locations.clear();
            ops
        };
        self.dispatch(ops);
        log::debug!("[{}] stopped", self.name);
    }

    /// Register (or replace) a streaming subscription under `key`.
    ///
    /// Replacing inherits the predecessor's last delivered location so
    /// rate limiting and delayed re-registration stay smooth.
    pub fn register(
        self: &Arc<Self>,
        key: ClientKey,
        request: LocationRequest,
        identity: CallerIdentity,
        permission: PermissionLevel,
        transport: Arc<dyn LocationTransport>,
    ) -> Result<(), Error> {
        let ops = {
            let mut state = self.state.lock();
            if !state.started {
                return Err(Error::NotStarted);
            }
            let now = self.env.clock.elapsed_realtime_ms();
            let id = self.next_id();
            let mut reg =
                Registration::continuous(id, request, identity, permission, transport)?;

            let mut ops = Vec::new();
            let existing = find_index(&state, key, None);
            let inherited =
                existing.and_then(|index| state.regs[index].1.last_delivered().cloned());
            if existing.is_some() {
                ops.extend(self.remove_locked(&mut state, key, None, false));
            }
            reg.inherit_last_delivered(inherited);

            self.ensure_enabled_locked(&mut state, reg.user_id());
            {
                let State {
                    ref enabled,
                    ref provider_state,
                    ..
                } = *state;
                let cx = self.policy_context(enabled, provider_state);
                reg.update_permitted(&cx);
                reg.update_foreground(&cx);
                reg.update_effective(&cx);
                reg.update_active(&cx);
            }
            if let Some(entering) =
                reg.update_high_power(state.provider_state.properties.power_requirement)
            {
                ops.push(Op::HighPower {
                    identity: reg.identity().clone(),
                    key,
                    entering,
                });
            }

            self.event_log.record(LogEvent::Registered {
                key,
                identity: reg.identity().clone(),
                interval_ms: reg.request().interval_ms(),
            });
            log::debug!(
                "[{}] +registration {} {} interval={}ms",
                self.name,
                key,
                reg.identity(),
                reg.request().interval_ms()
            );
            if !reg.request().hidden_from_app_ops() {
                ops.push(Op::LocationStart {
                    identity: reg.identity().clone(),
                    key,
                });
            }

            // Death watch, so a dead client does not linger.
            let weak = Arc::downgrade(self);
            let installed = reg.transport().link_to_death(Box::new(move || {
                if let Some(mux) = weak.upgrade() {
                    mux.on_client_death(key, id);
                }
            }));
            reg.set_death_watch(installed);

            // Expiration alarm; a past expiration fires immediately.
            if reg.expiration_ms() != u64::MAX {
                let delay = reg.expiration_ms().saturating_sub(now);
                let weak = Arc::downgrade(self);
                let token = self.env.alarms.schedule(
                    delay,
                    reg.effective().work_source(),
                    Box::new(move || {
                        if let Some(mux) = weak.upgrade() {
                            mux.on_expiration(key, id);
                        }
                    }),
                );
                reg.set_alarm(token);
            }

            let active = reg.active();
            let bypass = reg.effective().bypass();
            let enabled_for_user = state.enabled.get(&reg.user_id()).copied().unwrap_or(false);
            let transport = Arc::clone(reg.transport());
            state.regs.push((key, reg));
            let index = state.regs.len() - 1;

            // A client registering against a disabled provider learns so
            // immediately.
            if !enabled_for_user && !bypass {
                ops.push(Op::ProviderEnabled {
                    key,
                    id,
                    transport,
                    enabled: false,
                });
            }
            if active {
                ops.extend(self.on_active_locked(&mut state, index));
            }
            ops.extend(self.update_provider_request_locked(&mut state));
            ops
        };
        self.dispatch(ops);
        Ok(())
    }

    /// Remove the subscription under `key`, if any. Idempotent.
    pub fn unregister(self: &Arc<Self>, key: ClientKey) {
        let ops = {
            let mut state = self.state.lock();
            self.remove_locked(&mut state, key, None, true)
        };
        self.dispatch(ops);
    }

    /// One-shot current-location request.
    ///
    /// Satisfied from the cache when a fresh enough entry exists,
    /// otherwise from the next provider fix within the (capped) duration;
    /// a request that cannot be satisfied delivers a null give-up.
    pub fn get_current_location(
        self: &Arc<Self>,
        request: LocationRequest,
        identity: CallerIdentity,
        permission: PermissionLevel,
        transport: Arc<dyn LocationTransport>,
    ) -> Result<CurrentLocationHandle, Error> {
        let (key, id, ops) = {
            let mut state = self.state.lock();
            if !state.started {
                return Err(Error::NotStarted);
            }
            let now = self.env.clock.elapsed_realtime_ms();
            let id = self.next_id();
            let key = ClientKey::OneShot(id);
            let mut reg =
                Registration::one_shot(id, request, identity, permission, transport, now)?;

            self.ensure_enabled_locked(&mut state, reg.user_id());
            {
                let State {
                    ref enabled,
                    ref provider_state,
                    ..
                } = *state;
                let cx = self.policy_context(enabled, provider_state);
                reg.update_permitted(&cx);
                reg.update_foreground(&cx);
                reg.update_effective(&cx);
                reg.update_active(&cx);
            }

            self.event_log.record(LogEvent::Registered {
                key,
                identity: reg.identity().clone(),
                interval_ms: reg.request().interval_ms(),
            });
            let mut ops = Vec::new();
            if !reg.request().hidden_from_app_ops() {
                ops.push(Op::LocationStart {
                    identity: reg.identity().clone(),
                    key,
                });
            }

            // One-shot expirations are always finite (duration cap).
            let delay = reg.expiration_ms().saturating_sub(now);
            let weak = Arc::downgrade(self);
            let token = self.env.alarms.schedule(
                delay,
                reg.effective().work_source(),
                Box::new(move || {
                    if let Some(mux) = weak.upgrade() {
                        mux.on_expiration(key, id);
                    }
                }),
            );
            reg.set_alarm(token);

            let active = reg.active();
            let bypass = reg.effective().bypass();
            let transport = Arc::clone(reg.transport());
            state.regs.push((key, reg));
            let index = state.regs.len() - 1;

            if active {
                let immediate = self.on_active_locked(&mut state, index);
                let satisfied = !immediate.is_empty();
                ops.extend(immediate);
                if !satisfied {
                    ops.extend(self.update_provider_request_locked(&mut state));
                }
            } else if !bypass {
                // Fail fast: an inactive one-shot will never be satisfied.
                ops.push(Op::Deliver {
                    key,
                    id,
                    transport,
                    location: None,
                    completion: DeliveryCompletion::noop(),
                    remove_after: true,
                });
            }
            (key, id, ops)
        };
        self.dispatch(ops);
        Ok(CurrentLocationHandle {
            mux: Arc::downgrade(self),
            key,
            id,
        })
    }

    /// Gated read of the cached last location for this caller.
    pub fn get_last_location(
        &self,
        identity: &CallerIdentity,
        permission: PermissionLevel,
        bypass: bool,
    ) -> Option<Location> {
        let state = self.state.lock();
        if !bypass {
            if self
                .env
                .settings
                .is_package_blacklisted(identity.user_id, &identity.package)
            {
                return None;
            }
            if !state.enabled.get(&identity.user_id).copied().unwrap_or(false) {
                return None;
            }
        }
        if !identity.system && identity.user_id != self.env.users.current_user_id() {
            return None;
        }
        if !self.env.app_ops.note_op(permission, identity) {
            return None;
        }
        state
            .last_locations
            .get(&identity.user_id)?
            .get(permission, bypass)
            .cloned()
    }

    /// Seed the cache for a user, but only when nothing is cached yet.
    pub fn inject_last_location(&self, location: &Location, user: UserId) {
        let mut state = self.state.lock();
        let fudger = self.fudger.load_full();
        let coarse = fudger.create_coarse(location);
        let cache = state.last_locations.entry(user).or_default();
        if !cache.has_fine_normal() {
            cache.set(location, &coarse);
            cache.set_bypass(location, &coarse);
        }
    }

    /// Add a listener for per-user enabled transitions. Listeners run on
    /// the multiplexer's worker thread.
    pub fn add_enabled_listener(&self, listener: EnabledListener) -> u64 {
        let mut state = self.state.lock();
        state.enabled_listener_counter += 1;
        let id = state.enabled_listener_counter;
        state.enabled_listeners.push((id, listener));
        id
    }

    /// Remove a previously added enabled listener.
    pub fn remove_enabled_listener(&self, id: u64) {
        self.state
            .lock()
            .enabled_listeners
            .retain(|(entry_id, _)| *entry_id != id);
    }

    /// Install or clear the passive-provider forwarding hook.
    pub fn set_passive_hook(&self, hook: Option<Arc<dyn PassiveHook>>) {
        self.state.lock().passive_hook = hook;
    }

    /// Feed one fix from the provider driver.
    pub fn on_report_location(self: &Arc<Self>, location: &Location) {
        let ops = {
            let mut state = self.state.lock();
            if !state.started {
                return;
            }
            if !location.is_mock() {
                if location.latitude() == 0.0 && location.longitude() == 0.0 {
                    log::warn!("[{}] dropped fix on null island", self.name);
                    return;
                }
                if !location.is_complete() {
                    log::warn!("[{}] dropped incomplete fix", self.name);
                    return;
                }
            }
            self.event_log.record(LogEvent::ReceiveLocation);

            let now = self.env.clock.elapsed_realtime_ms();
            let fudger = self.fudger.load_full();
            let coarse = fudger.create_coarse(location);
            // Cache first, then fan out: a transport that reads the cache
            // mid-delivery sees the fix it is being handed.
            for user in self.env.users.running_user_ids() {
                let enabled = state.enabled.get(&user).copied().unwrap_or(false);
                let cache = state.last_locations.entry(user).or_default();
                cache.set_bypass(location, &coarse);
                if enabled {
                    cache.set(location, &coarse);
                }
            }

            let mut ops = Vec::new();
            let mut expired: Vec<(ClientKey, u64)> = Vec::new();
            {
                let State { ref mut regs, .. } = *state;
                for (key, reg) in regs.iter_mut() {
                    if !reg.active() {
                        continue;
                    }
                    match reg.check_fix(location, now, &**fudger, &*self.env.app_ops) {
                        Acceptance::Expired => expired.push((*key, reg.id())),
                        Acceptance::Rejected => {}
                        Acceptance::Deliver(delivery) => {
                            let op =
                                self.build_delivery(*key, reg, delivery, location.is_mock());
                            ops.push(op);
                        }
                    }
                }
            }
            for (key, id) in expired {
                ops.extend(self.expire_locked(&mut state, key, id));
            }
            if let Some(hook) = state.passive_hook.clone() {
                ops.push(Op::Passive {
                    hook,
                    location: location.clone(),
                });
            }
            ops
        };
        self.dispatch(ops);
    }

    /// Variant behavior when a registration becomes active: one-shots try
    /// the cache under the freshness bound, continuous registrations that
    /// opted into historical delivery catch up from the cache.
    fn on_active_locked(self: &Arc<Self>, state: &mut State, index: usize) -> Vec<Op> {
        enum Outcome {
            Nothing,
            Deliver(Location, bool),
            Expire,
        }

        let now = self.env.clock.elapsed_realtime_ms();
        let fudger = self.fudger.load_full();
        let outcome = {
            let State {
                ref regs,
                ref last_locations,
                ..
            } = *state;
            let (_, reg) = &regs[index];

            let max_age = if reg.is_one_shot() {
                MAX_CURRENT_LOCATION_AGE_MS
            } else {
                if !reg.request().historical() {
                    return Vec::new();
                }
                let cap = reg
                    .last_delivered()
                    .map_or(u64::MAX, |last| last.age_ms(now).saturating_sub(1));
                let max_age = reg.effective().interval_ms().min(cap);
                if max_age <= MIN_REQUEST_DELAY_MS {
                    return Vec::new();
                }
                max_age
            };

            let cached = last_locations
                .get(&reg.user_id())
                .and_then(|cache| cache.get(reg.permission(), reg.effective().bypass()))
                .filter(|location| location.age_ms(now) <= max_age)
                .cloned();
            match cached {
                None => Outcome::Nothing,
                Some(cached) => {
                    let mock = cached.is_mock();
                    match reg.check_cached(&cached, now, &**fudger, &*self.env.app_ops) {
                        Acceptance::Expired => Outcome::Expire,
                        Acceptance::Rejected => Outcome::Nothing,
                        Acceptance::Deliver(delivery) => Outcome::Deliver(delivery, mock),
                    }
                }
            }
        };

        match outcome {
            Outcome::Nothing => Vec::new(),
            Outcome::Deliver(delivery, mock) => {
                let (key, reg) = &mut state.regs[index];
                let key = *key;
                vec![self.build_delivery(key, reg, delivery, mock)]
            }
            Outcome::Expire => {
                let (key, id) = (state.regs[index].0, state.regs[index].1.id());
                self.expire_locked(state, key, id)
            }
        }
    }

    /// Delivery pre-phase: take the wakelock for non-mock continuous
    /// deliveries and record the location as delivered.
    fn build_delivery(
        &self,
        key: ClientKey,
        reg: &mut Registration,
        delivery: Location,
        source_mock: bool,
    ) -> Op {
        let completion = if !reg.is_one_shot() && !source_mock {
            let wake_lock = Arc::clone(&self.env.wake_lock);
            wake_lock.acquire(DELIVERY_WAKELOCK_TIMEOUT_MS, reg.effective().work_source());
            DeliveryCompletion::new(Box::new(move || wake_lock.release()))
        } else {
            DeliveryCompletion::noop()
        };
        reg.set_last_delivered(delivery.clone());
        Op::Deliver {
            key,
            id: reg.id(),
            transport: Arc::clone(reg.transport()),
            location: Some(delivery),
            completion,
            remove_after: reg.is_one_shot(),
        }
    }

    /// A registration hit its expiration: one-shots without bypass give
    /// up with a null delivery, everything else is removed outright.
    fn expire_locked(self: &Arc<Self>, state: &mut State, key: ClientKey, id: u64) -> Vec<Op> {
        let Some(index) = find_index(state, key, Some(id)) else {
            return Vec::new();
        };
        let reg = &state.regs[index].1;
        if reg.is_one_shot() && !reg.effective().bypass() {
            vec![Op::Deliver {
                key,
                id,
                transport: Arc::clone(reg.transport()),
                location: None,
                completion: DeliveryCompletion::noop(),
                remove_after: true,
            }]
        } else {
            self.remove_locked(state, key, Some(id), true)
        }
    }

    fn on_expiration(self: &Arc<Self>, key: ClientKey, id: u64) {
        let ops = {
            let mut state = self.state.lock();
            let Some(index) = find_index(&state, key, Some(id)) else {
                return;
            };
            // The alarm has fired; the token no longer needs cancelling.
            state.regs[index].1.take_alarm();
            self.expire_locked(&mut state, key, id)
        };
        self.dispatch(ops);
    }

    fn on_client_death(self: &Arc<Self>, key: ClientKey, id: u64) {
        log::warn!("[{}] client {} died", self.name, key);
        let ops = {
            let mut state = self.state.lock();
            self.remove_locked(&mut state, key, Some(id), true)
        };
        self.dispatch(ops);
    }

    /// Remove a registration and tear down its resources. Idempotent:
    /// a missing key (or a key that now holds a different registration)
    /// is a no-op.
    fn remove_locked(
        self: &Arc<Self>,
        state: &mut State,
        key: ClientKey,
        expected_id: Option<u64>,
        recompute: bool,
    ) -> Vec<Op> {
        let Some(index) = find_index(state, key, expected_id) else {
            return Vec::new();
        };
        let (key, mut reg) = state.regs.remove(index);
        if let Some(token) = reg.take_alarm() {
            self.env.alarms.cancel(token);
        }
        if reg.has_death_watch() {
            reg.transport().unlink_to_death();
        }
        let mut ops = Vec::new();
        if reg.high_power() && !reg.request().hidden_from_app_ops() {
            ops.push(Op::HighPower {
                identity: reg.identity().clone(),
                key,
                entering: false,
            });
        }
        if !reg.request().hidden_from_app_ops() {
            ops.push(Op::LocationStop {
                identity: reg.identity().clone(),
                key,
            });
        }
        self.event_log.record(LogEvent::Unregistered { key });
        log::debug!("[{}] -registration {}", self.name, key);
        if recompute {
            ops.extend(self.update_provider_request_locked(state));
        }
        ops
    }

    /// Delivery post-phase, re-entered from dispatch after the transport
    /// accepted the location.
    fn finish_delivery_locked(
        self: &Arc<Self>,
        state: &mut State,
        key: ClientKey,
        id: u64,
        remove_after: bool,
    ) -> Vec<Op> {
        let Some(index) = find_index(state, key, Some(id)) else {
            return Vec::new();
        };
        let reg = &mut state.regs[index].1;
        reg.count_delivery();
        if remove_after || reg.num_delivered() >= reg.request().max_updates() {
            self.remove_locked(state, key, Some(id), true)
        } else {
            Vec::new()
        }
    }

    /// Execute deferred operations, outside the lock, in order. Follow-up
    /// operations produced by post-phases join the back of the queue.
    fn dispatch(self: &Arc<Self>, ops: Vec<Op>) {
        let mut queue: VecDeque<Op> = ops.into();
        while let Some(op) = queue.pop_front() {
            match op {
                Op::Deliver {
                    key,
                    id,
                    transport,
                    location,
                    completion,
                    remove_after,
                } => {
                    let present = {
                        let state = self.state.lock();
                        find_index(&state, key, Some(id)).is_some()
                    };
                    if !present {
                        // Removed while queued; release the wakelock.
                        completion.complete();
                        continue;
                    }
                    match transport.deliver_location(location, completion.clone()) {
                        Ok(()) => {
                            self.event_log.record(LogEvent::DeliverLocation { key });
                            let follow = {
                                let mut state = self.state.lock();
                                self.finish_delivery_locked(&mut state, key, id, remove_after)
                            };
                            queue.extend(follow);
                        }
                        Err(err) => {
                            log::warn!(
                                "[{}] delivery to {} failed ({}), removing",
                                self.name,
                                key,
                                err
                            );
                            completion.complete();
                            let follow = {
                                let mut state = self.state.lock();
                                self.remove_locked(&mut state, key, Some(id), true)
                            };
                            queue.extend(follow);
                        }
                    }
                }
                Op::ProviderEnabled {
                    key,
                    id,
                    transport,
                    enabled,
                } => {
                    let present = {
                        let state = self.state.lock();
                        find_index(&state, key, Some(id)).is_some()
                    };
                    if !present {
                        continue;
                    }
                    if let Err(err) = transport.deliver_provider_enabled(&self.name, enabled) {
                        log::warn!(
                            "[{}] enabled delivery to {} failed ({}), removing",
                            self.name,
                            key,
                            err
                        );
                        let follow = {
                            let mut state = self.state.lock();
                            self.remove_locked(&mut state, key, Some(id), true)
                        };
                        queue.extend(follow);
                    }
                }
                Op::SetRequest(request) => {
                    self.event_log.record(LogEvent::UpdateRequest {
                        request: request.clone(),
                    });
                    log::debug!(
                        "[{}] provider request {}",
                        self.name,
                        if request.is_active() {
                            format!("interval={}ms", request.interval_ms())
                        } else {
                            "disabled".to_string()
                        }
                    );
                    self.provider.set_request(&request);
                }
                Op::LocationStart { identity, key } => {
                    self.env
                        .attribution
                        .report_location_start(&identity, &self.name, &key);
                }
                Op::LocationStop { identity, key } => {
                    self.env
                        .attribution
                        .report_location_stop(&identity, &self.name, &key);
                }
                Op::HighPower {
                    identity,
                    key,
                    entering,
                } => {
                    if entering {
                        self.env
                            .attribution
                            .report_high_power_start(&identity, &self.name, &key);
                    } else {
                        self.env
                            .attribution
                            .report_high_power_stop(&identity, &self.name, &key);
                    }
                }
                Op::NotifyEnabled {
                    user,
                    enabled,
                    listeners,
                } => {
                    self.worker.submit(Box::new(move || {
                        for listener in listeners {
                            listener(user, enabled);
                        }
                    }));
                }
                Op::Broadcast { user, enabled } => {
                    self.env.broadcasts.provider_changed(user, &self.name, enabled);
                }
                Op::Passive { hook, location } => {
                    hook.update_location(&location);
                }
            }
        }
    }
}

impl Drop for Multiplexer {
    fn drop(&mut self) {
        // Helper subscriptions hold only weak references, but dropping
        // them eagerly keeps the helpers' lists tidy.
        let subs = std::mem::take(&mut *self.helper_subs.lock());
        self.unsubscribe_list(subs);
    }
}
