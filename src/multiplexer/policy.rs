// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 locmux contributors

//! Policy reaction: the single registration-update API and the handlers
//! behind every external policy surface.
//!
//! Each policy event recomputes only the cached fields it can influence;
//! all handlers funnel through [`Multiplexer::update_registrations_locked`]
//! so eligibility evaluation, variant activation behavior and merged
//! request recomputation happen in one place.

use std::collections::HashMap;
use std::ops::BitOr;
use std::sync::Arc;

use crate::env::{PermissionEvent, Setting, UserEvent};
use crate::events::LogEvent;
use crate::fudger::{Fudger, GridFudger};
use crate::provider::{ProviderState, FUSED_PROVIDER, PASSIVE_PROVIDER};
use crate::registration::{PolicyContext, Registration};
use crate::transport::DeliveryCompletion;
use crate::types::{ClientKey, UserId};

use super::{EnabledListener, HelperSub, Multiplexer, Op, State};

/// Which cached registration fields a policy event invalidates.
///
/// Active-ness is additionally recomputed for any registration whose
/// other cached fields changed, since they all feed the active test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct UpdateMask(u8);

impl UpdateMask {
    pub const PERMITTED: UpdateMask = UpdateMask(1);
    pub const FOREGROUND: UpdateMask = UpdateMask(1 << 1);
    pub const EFFECTIVE: UpdateMask = UpdateMask(1 << 2);
    pub const ACTIVE: UpdateMask = UpdateMask(1 << 3);

    #[must_use]
    pub fn contains(self, other: UpdateMask) -> bool {
        (self.0 & other.0) == other.0
    }
}

impl BitOr for UpdateMask {
    type Output = UpdateMask;

    fn bitor(self, rhs: UpdateMask) -> UpdateMask {
        UpdateMask(self.0 | rhs.0)
    }
}

impl Multiplexer {
    pub(super) fn policy_context<'a>(
        &'a self,
        enabled: &'a HashMap<UserId, bool>,
        provider_state: &'a ProviderState,
    ) -> PolicyContext<'a> {
        PolicyContext {
            settings: &*self.env.settings,
            permissions: &*self.env.permissions,
            foreground: &*self.env.foreground,
            provider_name: self.name.as_str(),
            provider_state,
            enabled,
            current_user: self.env.users.current_user_id(),
            power_mode: self.env.power_save.mode(),
            screen_interactive: self.env.screen.is_interactive(),
        }
    }

    /// Store the enabled state for a user seen for the first time,
    /// without any transition side effects.
    pub(super) fn ensure_enabled_locked(&self, state: &mut State, user: UserId) {
        if !state.enabled.contains_key(&user) {
            let enabled = state.started
                && state.provider_state.allowed
                && self.env.settings.location_enabled(user);
            state.enabled.insert(user, enabled);
        }
    }

    /// Recompute the masked cached fields of every registration matching
    /// the predicate, run variant activation behavior for any that
    /// changed active-ness, and recompute the merged request if anything
    /// moved.
    pub(super) fn update_registrations_locked(
        self: &Arc<Self>,
        state: &mut State,
        mask: UpdateMask,
        pred: &dyn Fn(&Registration) -> bool,
    ) -> Vec<Op> {
        let mut ops = Vec::new();
        let mut any_change = false;
        let mut activated: Vec<usize> = Vec::new();
        let mut gave_up: Vec<(usize, ClientKey, u64)> = Vec::new();
        {
            let State {
                ref enabled,
                ref mut regs,
                ref provider_state,
                ..
            } = *state;
            let cx = self.policy_context(enabled, provider_state);
            for (index, (key, reg)) in regs.iter_mut().enumerate() {
                if !pred(reg) {
                    continue;
                }
                let mut changed = false;
                if mask.contains(UpdateMask::PERMITTED) {
                    changed |= reg.update_permitted(&cx);
                }
                if mask.contains(UpdateMask::FOREGROUND) {
                    changed |= reg.update_foreground(&cx);
                }
                if mask.contains(UpdateMask::EFFECTIVE) {
                    changed |= reg.update_effective(&cx);
                }
                if (mask.contains(UpdateMask::ACTIVE) || changed) && reg.update_active(&cx) {
                    changed = true;
                    if reg.active() {
                        activated.push(index);
                    } else if reg.is_one_shot() && !reg.effective().bypass() {
                        // Fail fast: an inactive one-shot will never be
                        // satisfied, so the caller gets the null now.
                        gave_up.push((index, *key, reg.id()));
                    }
                }
                if let Some(entering) =
                    reg.update_high_power(provider_state.properties.power_requirement)
                {
                    ops.push(Op::HighPower {
                        identity: reg.identity().clone(),
                        key: *key,
                        entering,
                    });
                }
                any_change |= changed;
            }
        }
        for index in activated {
            ops.extend(self.on_active_locked(state, index));
        }
        for (index, key, id) in gave_up {
            let reg = &state.regs[index].1;
            ops.push(Op::Deliver {
                key,
                id,
                transport: Arc::clone(reg.transport()),
                location: None,
                completion: DeliveryCompletion::noop(),
                remove_after: true,
            });
        }
        if any_change {
            ops.extend(self.update_provider_request_locked(state));
        }
        ops
    }

    /// Per-user enabled-state machine:
    /// `enabled = started && provider allowed && user location setting`.
    pub(super) fn on_enabled_changed_locked(
        self: &Arc<Self>,
        state: &mut State,
        user: UserId,
    ) -> Vec<Op> {
        let enabled = state.started
            && state.provider_state.allowed
            && self.env.settings.location_enabled(user);
        match state.enabled.get(&user).copied() {
            // First observation for this user is stored quietly.
            None => {
                state.enabled.insert(user, enabled);
                Vec::new()
            }
            Some(old) if old == enabled => Vec::new(),
            Some(_) => {
                state.enabled.insert(user, enabled);
                self.event_log
                    .record(LogEvent::EnabledChanged { user, enabled });
                log::info!("[{}] enabled u{} = {}", self.name, user, enabled);

                let mut ops = Vec::new();
                if !enabled {
                    if let Some(cache) = state.last_locations.get_mut(&user) {
                        cache.clear_normal();
                    }
                }
                if self.name != FUSED_PROVIDER && self.name != PASSIVE_PROVIDER {
                    ops.push(Op::Broadcast { user, enabled });
                }
                let listeners: Vec<EnabledListener> = state
                    .enabled_listeners
                    .iter()
                    .map(|(_, listener)| Arc::clone(listener))
                    .collect();
                if !listeners.is_empty() {
                    ops.push(Op::NotifyEnabled {
                        user,
                        enabled,
                        listeners,
                    });
                }
                for (key, reg) in &state.regs {
                    if reg.user_id() == user && !reg.is_one_shot() && !reg.effective().bypass() {
                        ops.push(Op::ProviderEnabled {
                            key: *key,
                            id: reg.id(),
                            transport: Arc::clone(reg.transport()),
                            enabled,
                        });
                    }
                }
                ops.extend(self.update_registrations_locked(
                    state,
                    UpdateMask::ACTIVE,
                    &move |reg| reg.user_id() == user,
                ));
                ops
            }
        }
    }

    /// Re-read the provider's state and react to whatever changed:
    /// allowed flips run the enabled machine, a cleared mock overlay
    /// drops mock cache entries and rolls the fudger offsets, and
    /// identity/property changes re-derive registration state.
    pub fn on_provider_state_changed(self: &Arc<Self>) {
        let new_state = self.provider.state();
        let ops = {
            let mut state = self.state.lock();
            let old = std::mem::replace(&mut state.provider_state, new_state.clone());
            if !state.started {
                return;
            }
            let mut ops = Vec::new();
            if old.mock && !new_state.mock {
                for cache in state.last_locations.values_mut() {
                    cache.clear_mock();
                }
                self.fudger.load().reset_offsets();
                self.event_log.record(LogEvent::MockChanged { mock: false });
            } else if !old.mock && new_state.mock {
                self.event_log.record(LogEvent::MockChanged { mock: true });
            }
            if old.allowed != new_state.allowed {
                let mut users: Vec<UserId> = state.enabled.keys().copied().collect();
                for user in self.env.users.running_user_ids() {
                    if !users.contains(&user) {
                        users.push(user);
                    }
                }
                for user in users {
                    ops.extend(self.on_enabled_changed_locked(&mut state, user));
                }
            }
            if old.identity != new_state.identity || old.properties != new_state.properties {
                ops.extend(self.update_registrations_locked(
                    &mut state,
                    UpdateMask::EFFECTIVE | UpdateMask::ACTIVE,
                    &|_| true,
                ));
            }
            ops
        };
        self.dispatch(ops);
    }

    fn on_location_enabled_setting(self: &Arc<Self>, user: Option<UserId>) {
        let ops = {
            let mut state = self.state.lock();
            if !state.started {
                return;
            }
            match user {
                Some(user) => self.on_enabled_changed_locked(&mut state, user),
                None => {
                    let users: Vec<UserId> = state.enabled.keys().copied().collect();
                    let mut ops = Vec::new();
                    for user in users {
                        ops.extend(self.on_enabled_changed_locked(&mut state, user));
                    }
                    ops
                }
            }
        };
        self.dispatch(ops);
    }

    /// Throttle interval or one of the whitelists changed: effective
    /// requests may move.
    fn on_request_settings_changed(self: &Arc<Self>) {
        let ops = {
            let mut state = self.state.lock();
            if !state.started {
                return;
            }
            self.update_registrations_locked(&mut state, UpdateMask::EFFECTIVE, &|_| true)
        };
        self.dispatch(ops);
    }

    fn on_blacklist_changed(self: &Arc<Self>) {
        let ops = {
            let mut state = self.state.lock();
            if !state.started {
                return;
            }
            self.update_registrations_locked(&mut state, UpdateMask::ACTIVE, &|_| true)
        };
        self.dispatch(ops);
    }

    fn on_coarse_accuracy_changed(&self) {
        if !self.auto_fudger {
            return;
        }
        let accuracy_m = self.env.settings.coarse_accuracy_m();
        log::debug!("[{}] coarse accuracy now {}m", self.name, accuracy_m);
        self.fudger
            .store(Arc::new(Box::new(GridFudger::new(accuracy_m)) as Box<dyn Fudger>));
    }

    fn on_permission_event(self: &Arc<Self>, event: &PermissionEvent) {
        let ops = {
            let mut state = self.state.lock();
            if !state.started {
                return;
            }
            let pred: Box<dyn Fn(&Registration) -> bool> = match event {
                PermissionEvent::Uid(uid) => {
                    let uid = *uid;
                    Box::new(move |reg: &Registration| reg.identity().uid == uid)
                }
                PermissionEvent::Package(package) => {
                    let package = package.clone();
                    Box::new(move |reg: &Registration| &*reg.identity().package == package.as_str())
                }
            };
            self.update_registrations_locked(&mut state, UpdateMask::PERMITTED, &*pred)
        };
        self.dispatch(ops);
    }

    fn on_foreground_event(self: &Arc<Self>, uid: u32) {
        let ops = {
            let mut state = self.state.lock();
            if !state.started {
                return;
            }
            // The foreground flag feeds both the background throttle and
            // (under FOREGROUND_ONLY power save) the active test.
            self.update_registrations_locked(
                &mut state,
                UpdateMask::FOREGROUND | UpdateMask::EFFECTIVE,
                &move |reg| reg.identity().uid == uid,
            )
        };
        self.dispatch(ops);
    }

    fn on_power_mode_changed(self: &Arc<Self>) {
        let ops = {
            let mut state = self.state.lock();
            if !state.started {
                return;
            }
            self.update_registrations_locked(&mut state, UpdateMask::ACTIVE, &|_| true)
        };
        self.dispatch(ops);
    }

    fn on_screen_changed(self: &Arc<Self>) {
        let ops = {
            let mut state = self.state.lock();
            if !state.started {
                return;
            }
            self.update_registrations_locked(&mut state, UpdateMask::ACTIVE, &|_| true)
        };
        self.dispatch(ops);
    }

    fn on_user_event(self: &Arc<Self>, event: &UserEvent) {
        let ops = {
            let mut state = self.state.lock();
            if !state.started {
                return;
            }
            match *event {
                UserEvent::Started(user) => self.on_enabled_changed_locked(&mut state, user),
                UserEvent::Stopped(user) => {
                    state.enabled.remove(&user);
                    state.last_locations.remove(&user);
                    self.update_registrations_locked(&mut state, UpdateMask::ACTIVE, &move |reg| {
                        reg.user_id() == user
                    })
                }
                UserEvent::CurrentChanged { from, to } => self.update_registrations_locked(
                    &mut state,
                    UpdateMask::ACTIVE,
                    &move |reg| reg.user_id() == from || reg.user_id() == to,
                ),
            }
        };
        self.dispatch(ops);
    }

    /// Subscribe to every policy surface. Listener closures hold weak
    /// references so a dropped multiplexer cannot be revived by a late
    /// event.
    pub(super) fn subscribe_helpers(self: &Arc<Self>) {
        let mut subs = self.helper_subs.lock();
        if !subs.is_empty() {
            return;
        }

        let weak = Arc::downgrade(self);
        subs.push(HelperSub::Settings(self.env.settings.subscribe(Arc::new(
            move |event| {
                let Some(mux) = weak.upgrade() else { return };
                match event.setting {
                    Setting::LocationEnabled => mux.on_location_enabled_setting(event.user),
                    Setting::BackgroundThrottleInterval
                    | Setting::BackgroundThrottleWhitelist
                    | Setting::IgnoreSettingsWhitelist => mux.on_request_settings_changed(),
                    Setting::PackageBlacklist => mux.on_blacklist_changed(),
                    Setting::CoarseAccuracy => mux.on_coarse_accuracy_changed(),
                }
            },
        ))));

        let weak = Arc::downgrade(self);
        subs.push(HelperSub::Users(self.env.users.subscribe(Arc::new(
            move |event| {
                if let Some(mux) = weak.upgrade() {
                    mux.on_user_event(event);
                }
            },
        ))));

        let weak = Arc::downgrade(self);
        subs.push(HelperSub::Permissions(self.env.permissions.subscribe(
            Arc::new(move |event| {
                if let Some(mux) = weak.upgrade() {
                    mux.on_permission_event(event);
                }
            }),
        )));

        let weak = Arc::downgrade(self);
        subs.push(HelperSub::Foreground(self.env.foreground.subscribe(
            Arc::new(move |event| {
                if let Some(mux) = weak.upgrade() {
                    mux.on_foreground_event(event.uid);
                }
            }),
        )));

        let weak = Arc::downgrade(self);
        subs.push(HelperSub::PowerSave(self.env.power_save.subscribe(
            Arc::new(move |_mode| {
                if let Some(mux) = weak.upgrade() {
                    mux.on_power_mode_changed();
                }
            }),
        )));

        let weak = Arc::downgrade(self);
        subs.push(HelperSub::Screen(self.env.screen.subscribe(Arc::new(
            move |_interactive| {
                if let Some(mux) = weak.upgrade() {
                    mux.on_screen_changed();
                }
            },
        ))));
    }

    pub(super) fn unsubscribe_helpers(&self) {
        let subs = std::mem::take(&mut *self.helper_subs.lock());
        self.unsubscribe_list(subs);
    }

    pub(super) fn unsubscribe_list(&self, subs: Vec<HelperSub>) {
        for sub in subs {
            match sub {
                HelperSub::Settings(id) => self.env.settings.unsubscribe(id),
                HelperSub::Users(id) => self.env.users.unsubscribe(id),
                HelperSub::Permissions(id) => self.env.permissions.unsubscribe(id),
                HelperSub::Foreground(id) => self.env.foreground.unsubscribe(id),
                HelperSub::PowerSave(id) => self.env.power_save.unsubscribe(id),
                HelperSub::Screen(id) => self.env.screen.unsubscribe(id),
            }
        }
    }
}
