// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 locmux contributors

//! One client subscription and its lifecycle state.
//!
//! A registration carries the client's original request, the effective
//! request derived from it (coarse coercion, bypass stripping, background
//! throttling), cached eligibility flags that are only recomputed on
//! their corresponding policy events, and the rate-limiting state used to
//! gate deliveries. The multiplexer owns all registrations in its keyed
//! map; a registration never holds a strong reference back.

use std::collections::HashMap;
use std::sync::Arc;

use crate::cache::MIN_COARSE_INTERVAL_MS;
use crate::env::{
    AlarmToken, AppForegroundHelper, AppOpsHelper, LocationPermissionsHelper,
    LocationPowerSaveMode, SettingsHelper,
};
use crate::fudger::Fudger;
use crate::provider::{PowerRequirement, ProviderState, GPS_PROVIDER};
use crate::transport::LocationTransport;
use crate::types::{
    CallerIdentity, Location, LocationRequest, PermissionLevel, Quality, UserId,
};
use crate::Error;

/// Effective intervals below this count as high power when the provider
/// itself is power hungry: 5 minutes.
pub const HIGH_POWER_INTERVAL_MS: u64 = 5 * 60 * 1000;

/// Cap on the min-update-interval jitter allowance: 5 seconds.
pub const MAX_MIN_UPDATE_INTERVAL_JITTER_MS: u64 = 5_000;

/// How long a delivery may hold the wakelock before the platform lets the
/// device suspend anyway: 30 seconds.
pub const DELIVERY_WAKELOCK_TIMEOUT_MS: u64 = 30_000;

/// Hard cap on a one-shot request's lifetime: 30 seconds.
pub const MAX_ONE_SHOT_DURATION_MS: u64 = 30_000;

/// Freshness bound when satisfying a one-shot from the cache: 10 seconds.
pub const MAX_CURRENT_LOCATION_AGE_MS: u64 = 10_000;

/// Policy inputs needed to recompute a registration's cached state.
///
/// Borrowed from the multiplexer's locked state and environment for the
/// duration of one update pass.
pub(crate) struct PolicyContext<'a> {
    pub settings: &'a dyn SettingsHelper,
    pub permissions: &'a dyn LocationPermissionsHelper,
    pub foreground: &'a dyn AppForegroundHelper,
    pub provider_name: &'a str,
    pub provider_state: &'a ProviderState,
    pub enabled: &'a HashMap<UserId, bool>,
    pub current_user: UserId,
    pub power_mode: LocationPowerSaveMode,
    pub screen_interactive: bool,
}

impl PolicyContext<'_> {
    fn is_provider_package(&self, package: &str) -> bool {
        self.provider_state
            .identity
            .as_ref()
            .is_some_and(|identity| &*identity.package == package)
    }
}

/// Outcome of running an incoming fix through a registration's
/// acceptance test.
#[derive(Debug)]
pub(crate) enum Acceptance {
    /// The registration has expired; remove it.
    Expired,
    /// The fix is filtered out for this registration; keep waiting.
    Rejected,
    /// Deliver this (possibly coarsened) location.
    Deliver(Location),
}

/// Variant-specific resources.
#[derive(Debug)]
pub(crate) enum RegistrationKind {
    /// Streaming subscription.
    Continuous {
        alarm: Option<AlarmToken>,
        death_watch: bool,
    },
    /// Single current-location request.
    OneShot { alarm: Option<AlarmToken> },
}

/// One client subscription.
pub(crate) struct Registration {
    id: u64,
    request: LocationRequest,
    effective: LocationRequest,
    identity: CallerIdentity,
    permission: PermissionLevel,
    transport: Arc<dyn LocationTransport>,
    permitted: bool,
    foreground: bool,
    active: bool,
    high_power: bool,
    last_delivered: Option<Location>,
    num_delivered: u32,
    expiration_ms: u64,
    kind: RegistrationKind,
}

impl Registration {
    /// Streaming registration. Fails on an empty work source.
    pub fn continuous(
        id: u64,
        request: LocationRequest,
        identity: CallerIdentity,
        permission: PermissionLevel,
        transport: Arc<dyn LocationTransport>,
    ) -> Result<Self, Error> {
        if request.work_source().is_empty() {
            return Err(Error::EmptyWorkSource);
        }
        let expiration_ms = request.expiration_realtime_ms();
        Ok(Self {
            id,
            effective: request.clone(),
            request,
            identity,
            permission,
            transport,
            permitted: false,
            foreground: false,
            active: false,
            high_power: false,
            last_delivered: None,
            num_delivered: 0,
            expiration_ms,
            kind: RegistrationKind::Continuous {
                alarm: None,
                death_watch: false,
            },
        })
    }

    /// One-shot registration. The duration is clamped to the one-shot cap
    /// before anything else happens to it.
    pub fn one_shot(
        id: u64,
        request: LocationRequest,
        identity: CallerIdentity,
        permission: PermissionLevel,
        transport: Arc<dyn LocationTransport>,
        now_ms: u64,
    ) -> Result<Self, Error> {
        if request.work_source().is_empty() {
            return Err(Error::EmptyWorkSource);
        }
        if request.is_passive() {
            return Err(Error::InvalidRequest(
                "one-shot request cannot be passive".to_string(),
            ));
        }
        let duration = request.duration_ms().min(MAX_ONE_SHOT_DURATION_MS);
        let expiration_ms = request
            .expiration_realtime_ms()
            .min(now_ms.saturating_add(duration));
        Ok(Self {
            id,
            effective: request.clone(),
            request,
            identity,
            permission,
            transport,
            permitted: false,
            foreground: false,
            active: false,
            high_power: false,
            last_delivered: None,
            num_delivered: 0,
            expiration_ms,
            kind: RegistrationKind::OneShot { alarm: None },
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn identity(&self) -> &CallerIdentity {
        &self.identity
    }

    pub fn user_id(&self) -> UserId {
        self.identity.user_id
    }

    pub fn permission(&self) -> PermissionLevel {
        self.permission
    }

    pub fn request(&self) -> &LocationRequest {
        &self.request
    }

    pub fn effective(&self) -> &LocationRequest {
        &self.effective
    }

    pub fn transport(&self) -> &Arc<dyn LocationTransport> {
        &self.transport
    }

    pub fn active(&self) -> bool {
        self.active
    }

    pub fn high_power(&self) -> bool {
        self.high_power
    }

    pub fn last_delivered(&self) -> Option<&Location> {
        self.last_delivered.as_ref()
    }

    pub fn set_last_delivered(&mut self, location: Location) {
        self.last_delivered = Some(location);
    }

    /// Replace-by-key inherits the predecessor's delivery history so
    /// scheduling (min-interval gating, delayed re-register) benefits.
    pub fn inherit_last_delivered(&mut self, location: Option<Location>) {
        self.last_delivered = location;
    }

    pub fn num_delivered(&self) -> u32 {
        self.num_delivered
    }

    pub fn count_delivery(&mut self) {
        self.num_delivered = self.num_delivered.saturating_add(1);
    }

    pub fn expiration_ms(&self) -> u64 {
        self.expiration_ms
    }

    pub fn is_one_shot(&self) -> bool {
        matches!(self.kind, RegistrationKind::OneShot { .. })
    }

    pub fn set_alarm(&mut self, token: AlarmToken) {
        match &mut self.kind {
            RegistrationKind::Continuous { alarm, .. } | RegistrationKind::OneShot { alarm } => {
                *alarm = Some(token);
            }
        }
    }

    pub fn take_alarm(&mut self) -> Option<AlarmToken> {
        match &mut self.kind {
            RegistrationKind::Continuous { alarm, .. } | RegistrationKind::OneShot { alarm } => {
                alarm.take()
            }
        }
    }

    pub fn set_death_watch(&mut self, installed: bool) {
        if let RegistrationKind::Continuous { death_watch, .. } = &mut self.kind {
            *death_watch = installed;
        }
    }

    pub fn has_death_watch(&self) -> bool {
        matches!(
            self.kind,
            RegistrationKind::Continuous {
                death_watch: true,
                ..
            }
        )
    }

    /// Recompute the effective request from the original.
    ///
    /// Coarse callers are coerced onto the coarse interval grid at low
    /// power; the bypass flag is stripped from callers that are neither
    /// whitelisted nor the provider itself; background callers without a
    /// throttle exemption get the background interval floor.
    pub fn update_effective(&mut self, cx: &PolicyContext<'_>) -> bool {
        let mut effective = self.request.clone();

        if self.permission == PermissionLevel::Coarse {
            effective.set_quality(Quality::LowPower);
            effective.set_interval_ms(effective.interval_ms().max(MIN_COARSE_INTERVAL_MS));
            effective.set_min_update_interval_ms(
                effective.min_update_interval_ms().max(MIN_COARSE_INTERVAL_MS),
            );
        }

        if effective.bypass() {
            let allowed = cx.settings.is_ignore_settings_allowed(&self.identity.package)
                || cx.is_provider_package(&self.identity.package);
            if !allowed {
                effective.set_bypass(false);
            }
        }

        let throttle_exempt = cx.settings.is_throttle_exempt(&self.identity.package)
            || cx.is_provider_package(&self.identity.package);
        if !effective.bypass() && !throttle_exempt && !self.foreground {
            effective.set_interval_ms(
                effective
                    .interval_ms()
                    .max(cx.settings.background_throttle_interval_ms()),
            );
        }

        if effective == self.effective {
            return false;
        }
        self.effective = effective;
        true
    }

    /// Refresh the cached permission flag.
    pub fn update_permitted(&mut self, cx: &PolicyContext<'_>) -> bool {
        let permitted = cx
            .permissions
            .has_location_permissions(self.permission, &self.identity);
        if permitted == self.permitted {
            return false;
        }
        self.permitted = permitted;
        true
    }

    /// Refresh the cached foreground flag.
    pub fn update_foreground(&mut self, cx: &PolicyContext<'_>) -> bool {
        let foreground = cx.foreground.is_app_foreground(self.identity.uid);
        if foreground == self.foreground {
            return false;
        }
        self.foreground = foreground;
        true
    }

    /// Recompute whether this registration may receive deliveries.
    pub fn update_active(&mut self, cx: &PolicyContext<'_>) -> bool {
        let active = self.compute_active(cx);
        if active == self.active {
            return false;
        }
        self.active = active;
        true
    }

    fn compute_active(&self, cx: &PolicyContext<'_>) -> bool {
        if !self.permitted {
            return false;
        }
        if self.effective.bypass() {
            return true;
        }
        let user = self.identity.user_id;
        if !cx.enabled.get(&user).copied().unwrap_or(false) {
            return false;
        }
        if !self.identity.system && user != cx.current_user {
            return false;
        }
        if !self.power_save_allows(cx) {
            return false;
        }
        !cx.settings.is_package_blacklisted(user, &self.identity.package)
    }

    fn power_save_allows(&self, cx: &PolicyContext<'_>) -> bool {
        match cx.power_mode {
            LocationPowerSaveMode::NoChange => true,
            LocationPowerSaveMode::ForegroundOnly => self.foreground,
            LocationPowerSaveMode::GpsDisabledWhenScreenOff => {
                cx.provider_name != GPS_PROVIDER || cx.screen_interactive
            }
            LocationPowerSaveMode::ThrottleRequestsWhenScreenOff
            | LocationPowerSaveMode::AllDisabledWhenScreenOff => cx.screen_interactive,
        }
    }

    /// Recompute the high-power flag. Returns `Some(entering)` on a
    /// transition that should be reported to the attribution sink.
    pub fn update_high_power(&mut self, power_requirement: PowerRequirement) -> Option<bool> {
        let high_power = self.active
            && self.effective.interval_ms() < HIGH_POWER_INTERVAL_MS
            && power_requirement == PowerRequirement::High;
        if high_power == self.high_power {
            return None;
        }
        self.high_power = high_power;
        if self.request.hidden_from_app_ops() {
            return None;
        }
        Some(high_power)
    }

    /// Acceptance test for an incoming fix.
    pub fn check_fix(
        &self,
        fix: &Location,
        now_ms: u64,
        fudger: &dyn Fudger,
        app_ops: &dyn AppOpsHelper,
    ) -> Acceptance {
        self.check_fix_inner(fix, now_ms, fudger, app_ops, false)
    }

    /// Acceptance test for a cache-sourced location already at this
    /// registration's permission level.
    pub fn check_cached(
        &self,
        cached: &Location,
        now_ms: u64,
        fudger: &dyn Fudger,
        app_ops: &dyn AppOpsHelper,
    ) -> Acceptance {
        self.check_fix_inner(cached, now_ms, fudger, app_ops, true)
    }

    fn check_fix_inner(
        &self,
        fix: &Location,
        now_ms: u64,
        fudger: &dyn Fudger,
        app_ops: &dyn AppOpsHelper,
        pre_leveled: bool,
    ) -> Acceptance {
        if now_ms >= self.expiration_ms {
            return Acceptance::Expired;
        }

        let delivery = if pre_leveled || self.permission == PermissionLevel::Fine {
            fix.clone()
        } else {
            fudger.create_coarse(fix)
        };

        if let Some(last) = &self.last_delivered {
            let max_jitter =
                (self.effective.interval_ms() / 10).min(MAX_MIN_UPDATE_INTERVAL_JITTER_MS);
            let floor = self
                .effective
                .min_update_interval_ms()
                .saturating_sub(max_jitter);
            let delta = fix
                .elapsed_realtime_ms()
                .saturating_sub(last.elapsed_realtime_ms());
            if delta < floor {
                return Acceptance::Rejected;
            }

            let min_distance = self.effective.min_update_distance_m();
            if min_distance > 0.0 && fix.distance_to(last) <= min_distance {
                return Acceptance::Rejected;
            }
        }

        if !self.request.hidden_from_app_ops()
            && !app_ops.note_op(self.permission, &self.identity)
        {
            return Acceptance::Rejected;
        }

        Acceptance::Deliver(delivery)
    }
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("id", &self.id)
            .field("identity", &self.identity)
            .field("permission", &self.permission)
            .field("active", &self.active)
            .field("permitted", &self.permitted)
            .field("foreground", &self.foreground)
            .field("high_power", &self.high_power)
            .field("num_delivered", &self.num_delivered)
            .field("expiration_ms", &self.expiration_ms)
            .field("one_shot", &self.is_one_shot())
            .finish()
    }
}
