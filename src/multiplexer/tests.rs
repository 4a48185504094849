// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 locmux contributors

use std::sync::Arc;

use crossbeam::channel::Receiver;
use parking_lot::Mutex;

use super::*;
use crate::env::{
    Clock, InMemoryAppOps, InMemoryForeground, InMemoryPermissions, InMemoryPowerMode,
    InMemoryScreen, InMemorySettings, InMemoryUserInfo, ManualAlarms, ManualClock,
    RecordingBroadcasts,
};
use crate::fudger::GridFudger;
use crate::provider::{ProviderProperties, FUSED_PROVIDER};
use crate::transport::{ChannelTransport, TransportEvent};
use crate::types::WorkSource;

struct FakeProvider {
    state: Mutex<ProviderState>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl FakeProvider {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ProviderState {
                allowed: true,
                identity: None,
                properties: ProviderProperties::default(),
                mock: false,
            }),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().clone()
    }

    fn last_request(&self) -> Option<ProviderRequest> {
        self.requests.lock().last().cloned()
    }
}

impl LocationProvider for FakeProvider {
    fn state(&self) -> ProviderState {
        self.state.lock().clone()
    }

    fn set_request(&self, request: &ProviderRequest) {
        self.requests.lock().push(request.clone());
    }
}

struct Fixture {
    clock: Arc<ManualClock>,
    alarms: Arc<ManualAlarms>,
    settings: Arc<InMemorySettings>,
    permissions: Arc<InMemoryPermissions>,
    broadcasts: Arc<RecordingBroadcasts>,
    provider: Arc<FakeProvider>,
    mux: Arc<Multiplexer>,
}

impl Fixture {
    fn new() -> Self {
        Self::with_name("gps")
    }

    fn with_name(name: &str) -> Self {
        let clock = Arc::new(ManualClock::new(60_000));
        let alarms = Arc::new(ManualAlarms::new(clock.clone()));
        let settings = Arc::new(InMemorySettings::new());
        let permissions = Arc::new(InMemoryPermissions::new());
        let broadcasts = Arc::new(RecordingBroadcasts::new());
        let provider = FakeProvider::new();
        let env = Environment::new()
            .with_clock(clock.clone())
            .with_alarms(alarms.clone())
            .with_settings(settings.clone())
            .with_users(Arc::new(InMemoryUserInfo::new()))
            .with_permissions(permissions.clone())
            .with_foreground(Arc::new(InMemoryForeground::new()))
            .with_power_save(Arc::new(InMemoryPowerMode::new()))
            .with_screen(Arc::new(InMemoryScreen::new()))
            .with_app_ops(Arc::new(InMemoryAppOps::new()))
            .with_broadcasts(broadcasts.clone());
        let mux = Multiplexer::new(
            name,
            env,
            provider.clone(),
            Some(Box::new(GridFudger::with_seed(2_000.0, 7))),
        );
        Self {
            clock,
            alarms,
            settings,
            permissions,
            broadcasts,
            provider,
            mux,
        }
    }

    fn started() -> Self {
        let fixture = Self::new();
        fixture.mux.start();
        fixture
    }

    fn request(&self, interval_ms: u64) -> LocationRequest {
        LocationRequest::builder(interval_ms)
            .work_source(WorkSource::single(10001, "com.example"))
            .build()
    }

    fn identity(&self) -> CallerIdentity {
        CallerIdentity::app(0, 10001, 777, "com.example")
    }

    fn register(&self, key: u64, interval_ms: u64) -> Receiver<TransportEvent> {
        let (sender, receiver) = crossbeam::channel::unbounded();
        self.mux
            .register(
                ClientKey::Listener(key),
                self.request(interval_ms),
                self.identity(),
                PermissionLevel::Fine,
                Arc::new(ChannelTransport::new(sender)),
            )
            .unwrap();
        receiver
    }

    fn fix(&self) -> Location {
        let now = self.clock.elapsed_realtime_ms();
        Location::new("gps", 48.2, 16.3)
            .with_accuracy(5.0)
            .with_time(1_700_000_000_000 + now)
            .with_elapsed_realtime_ms(now)
    }
}

fn delivered(receiver: &Receiver<TransportEvent>) -> Vec<Option<Location>> {
    let mut out = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        if let TransportEvent::Location(location) = event {
            out.push(location);
        }
    }
    out
}

#[test]
fn test_register_requires_start() {
    let fixture = Fixture::new();
    let (sender, _receiver) = crossbeam::channel::unbounded();
    let result = fixture.mux.register(
        ClientKey::Listener(1),
        fixture.request(1_000),
        fixture.identity(),
        PermissionLevel::Fine,
        Arc::new(ChannelTransport::new(sender)),
    );
    assert!(matches!(result, Err(Error::NotStarted)));
}

#[test]
fn test_register_pushes_provider_request() {
    let fixture = Fixture::started();
    let _receiver = fixture.register(1, 5_000);
    assert_eq!(
        fixture.provider.last_request().unwrap().interval_ms(),
        5_000
    );

    fixture.mux.unregister(ClientKey::Listener(1));
    assert!(!fixture.provider.last_request().unwrap().is_active());
    assert!(!fixture.mux.current_request().is_active());
}

#[test]
fn test_unregister_is_idempotent() {
    let fixture = Fixture::started();
    let _receiver = fixture.register(1, 5_000);
    fixture.mux.unregister(ClientKey::Listener(1));
    let requests_after_first = fixture.provider.requests().len();
    fixture.mux.unregister(ClientKey::Listener(1));
    assert_eq!(fixture.provider.requests().len(), requests_after_first);
}

#[test]
fn test_fan_out_delivers_to_active_registrations() {
    let fixture = Fixture::started();
    let receiver_a = fixture.register(1, 1_000);
    let receiver_b = fixture.register(2, 1_000);

    let fix = fixture.fix();
    fixture.mux.on_report_location(&fix);

    assert_eq!(delivered(&receiver_a), vec![Some(fix.clone())]);
    assert_eq!(delivered(&receiver_b), vec![Some(fix)]);
}

#[test]
fn test_replace_inherits_last_delivered() {
    let fixture = Fixture::started();
    let receiver = fixture.register(1, 10_000);
    fixture.mux.on_report_location(&fixture.fix());
    assert_eq!(delivered(&receiver).len(), 1);

    // Same key, fresh registration: the new one must not get a second
    // delivery inside the inherited min-update interval.
    let receiver = fixture.register(1, 10_000);
    fixture.clock.advance_ms(100);
    fixture.mux.on_report_location(&fixture.fix());
    assert!(delivered(&receiver).is_empty());

    // Past the (jitter-adjusted) interval the new registration delivers.
    fixture.clock.advance_ms(9_000);
    fixture.mux.on_report_location(&fixture.fix());
    assert_eq!(delivered(&receiver).len(), 1);
}

#[test]
fn test_max_updates_removes_registration() {
    let fixture = Fixture::started();
    let (sender, receiver) = crossbeam::channel::unbounded();
    fixture
        .mux
        .register(
            ClientKey::Listener(1),
            LocationRequest::builder(1_000)
                .min_update_interval_ms(0)
                .max_updates(2)
                .work_source(WorkSource::single(10001, "com.example"))
                .build(),
            fixture.identity(),
            PermissionLevel::Fine,
            Arc::new(ChannelTransport::new(sender)),
        )
        .unwrap();

    for _ in 0..4 {
        fixture.clock.advance_ms(1_000);
        fixture.mux.on_report_location(&fixture.fix());
    }
    assert_eq!(delivered(&receiver).len(), 2);
    assert!(!fixture.mux.current_request().is_active());
}

#[test]
fn test_delayed_register_and_supersede() {
    let fixture = Fixture::started();
    let _receiver_a = fixture.register(1, 60_000);
    assert_eq!(
        fixture.provider.last_request().unwrap().interval_ms(),
        60_000
    );

    // A fix satisfies A; tightening to 30s can now wait a full 30s.
    fixture.mux.on_report_location(&fixture.fix());
    let _receiver_b = fixture.register(2, 30_000);
    assert!(fixture.mux.has_delayed_register());
    assert_eq!(
        fixture.provider.last_request().unwrap().interval_ms(),
        60_000
    );

    // The delayed push applies when the alarm fires.
    fixture.clock.advance_ms(30_000);
    fixture.alarms.fire_due();
    assert!(!fixture.mux.has_delayed_register());
    assert_eq!(
        fixture.provider.last_request().unwrap().interval_ms(),
        30_000
    );
}

#[test]
fn test_delayed_register_cancelled_when_superseded() {
    let fixture = Fixture::started();
    let _receiver_a = fixture.register(1, 60_000);
    fixture.mux.on_report_location(&fixture.fix());
    let _receiver_b = fixture.register(2, 30_000);
    assert!(fixture.mux.has_delayed_register());

    // Removing B restores the applied request; the pending push dies.
    fixture.mux.unregister(ClientKey::Listener(2));
    assert!(!fixture.mux.has_delayed_register());
    fixture.clock.advance_ms(60_000);
    fixture.alarms.fire_due();
    assert_eq!(
        fixture.provider.last_request().unwrap().interval_ms(),
        60_000
    );
}

#[test]
fn test_expiration_alarm_removes_registration() {
    let fixture = Fixture::started();
    let now = fixture.clock.elapsed_realtime_ms();
    let (sender, receiver) = crossbeam::channel::unbounded();
    fixture
        .mux
        .register(
            ClientKey::Listener(1),
            LocationRequest::builder(1_000)
                .expiration_realtime_ms(now + 5_000)
                .work_source(WorkSource::single(10001, "com.example"))
                .build(),
            fixture.identity(),
            PermissionLevel::Fine,
            Arc::new(ChannelTransport::new(sender)),
        )
        .unwrap();
    assert!(fixture.mux.current_request().is_active());

    fixture.clock.advance_ms(5_000);
    fixture.alarms.fire_due();
    assert!(!fixture.mux.current_request().is_active());
    assert!(delivered(&receiver).is_empty());
}

#[test]
fn test_one_shot_from_cache() {
    let fixture = Fixture::started();
    fixture.mux.on_report_location(&fixture.fix());
    let requests_before = fixture.provider.requests().len();

    fixture.clock.advance_ms(4_000);
    let (sender, receiver) = crossbeam::channel::unbounded();
    let handle = fixture
        .mux
        .get_current_location(
            fixture.request(0),
            fixture.identity(),
            PermissionLevel::Fine,
            Arc::new(ChannelTransport::new(sender)),
        )
        .unwrap();

    let locations = delivered(&receiver);
    assert_eq!(locations.len(), 1);
    assert!(locations[0].is_some());
    // Satisfied wholly from the cache: the provider request never moved.
    assert_eq!(fixture.provider.requests().len(), requests_before);
    // The registration is gone; cancel is a harmless no-op.
    handle.cancel();
}

#[test]
fn test_one_shot_waits_for_fix_when_cache_is_stale() {
    let fixture = Fixture::started();
    fixture.mux.on_report_location(&fixture.fix());
    fixture.clock.advance_ms(60_000);

    let (sender, receiver) = crossbeam::channel::unbounded();
    let _handle = fixture
        .mux
        .get_current_location(
            fixture.request(0),
            fixture.identity(),
            PermissionLevel::Fine,
            Arc::new(ChannelTransport::new(sender)),
        )
        .unwrap();
    assert!(delivered(&receiver).is_empty());
    assert!(fixture.mux.current_request().is_active());

    let fix = fixture.fix();
    fixture.mux.on_report_location(&fix);
    assert_eq!(delivered(&receiver), vec![Some(fix)]);
    assert!(!fixture.mux.current_request().is_active());
}

#[test]
fn test_one_shot_times_out_with_null() {
    let fixture = Fixture::started();
    let (sender, receiver) = crossbeam::channel::unbounded();
    let _handle = fixture
        .mux
        .get_current_location(
            fixture.request(0),
            fixture.identity(),
            PermissionLevel::Fine,
            Arc::new(ChannelTransport::new(sender)),
        )
        .unwrap();

    fixture.clock.advance_ms(30_000);
    fixture.alarms.fire_due();
    assert_eq!(delivered(&receiver), vec![None]);
    assert!(!fixture.mux.current_request().is_active());
}

#[test]
fn test_one_shot_cancel() {
    let fixture = Fixture::started();
    let (sender, receiver) = crossbeam::channel::unbounded();
    let handle = fixture
        .mux
        .get_current_location(
            fixture.request(0),
            fixture.identity(),
            PermissionLevel::Fine,
            Arc::new(ChannelTransport::new(sender)),
        )
        .unwrap();

    handle.cancel();
    handle.cancel();
    fixture.clock.advance_ms(30_000);
    fixture.alarms.fire_due();
    // Cancelled: not even the null give-up arrives.
    assert!(delivered(&receiver).is_empty());
}

#[test]
fn test_one_shot_born_inactive_fails_fast() {
    let fixture = Fixture::started();
    fixture.settings.set_location_enabled(0, false);

    let (sender, receiver) = crossbeam::channel::unbounded();
    let _handle = fixture
        .mux
        .get_current_location(
            fixture.request(0),
            fixture.identity(),
            PermissionLevel::Fine,
            Arc::new(ChannelTransport::new(sender)),
        )
        .unwrap();
    assert_eq!(delivered(&receiver), vec![None]);
}

#[test]
fn test_bypass_one_shot_keeps_waiting_while_inactive() {
    let fixture = Fixture::started();
    fixture.settings.set_ignore_settings_allowed("com.example", true);
    // Revoked permission makes the registration inactive regardless of
    // the bypass flag.
    fixture.permissions.set_permission(10001, None);

    let (sender, receiver) = crossbeam::channel::unbounded();
    let _handle = fixture
        .mux
        .get_current_location(
            LocationRequest::builder(0)
                .bypass(true)
                .work_source(WorkSource::single(10001, "com.example"))
                .build(),
            fixture.identity(),
            PermissionLevel::Fine,
            Arc::new(ChannelTransport::new(sender)),
        )
        .unwrap();
    // No null give-up: a bypass one-shot stays parked while inactive.
    assert!(delivered(&receiver).is_empty());
}

#[test]
fn test_enabled_machine_broadcast_and_cache_clearing() {
    let fixture = Fixture::started();
    let receiver = fixture.register(1, 1_000);
    let fix = fixture.fix();
    fixture.mux.on_report_location(&fix);
    assert_eq!(delivered(&receiver).len(), 1);
    assert!(fixture.mux.is_enabled(0));

    fixture.settings.set_location_enabled(0, false);
    assert!(!fixture.mux.is_enabled(0));
    assert_eq!(fixture.broadcasts.events(), vec![(0, "gps".to_string(), false)]);

    // The client saw the provider-disabled event.
    let mut saw_disabled = false;
    while let Ok(event) = receiver.try_recv() {
        if let TransportEvent::ProviderEnabled { provider, enabled } = event {
            assert_eq!(provider, "gps");
            assert!(!enabled);
            saw_disabled = true;
        }
    }
    assert!(saw_disabled);

    // Normal cache slots were cleared; the provider was told to stop.
    let identity = CallerIdentity::system("com.platform");
    assert!(fixture
        .mux
        .get_last_location(&identity, PermissionLevel::Fine, false)
        .is_none());
    assert!(!fixture.mux.current_request().is_active());
}

#[test]
fn test_fused_enable_transition_not_broadcast() {
    let fixture = Fixture::with_name(FUSED_PROVIDER);
    fixture.mux.start();
    fixture.settings.set_location_enabled(0, false);
    assert!(fixture.broadcasts.events().is_empty());
}

#[test]
fn test_continuous_registration_on_disabled_provider_sees_event() {
    let fixture = Fixture::started();
    fixture.settings.set_location_enabled(0, false);

    let receiver = fixture.register(1, 1_000);
    match receiver.try_recv() {
        Ok(TransportEvent::ProviderEnabled { enabled, .. }) => assert!(!enabled),
        other => panic!("expected provider-enabled event, got {other:?}"),
    }
    // Inactive: no contribution to the merged request.
    assert!(!fixture.mux.current_request().is_active());
}

#[test]
fn test_stop_removes_everything() {
    let fixture = Fixture::started();
    let _receiver_a = fixture.register(1, 60_000);
    fixture.mux.on_report_location(&fixture.fix());
    let _receiver_b = fixture.register(2, 30_000);
    assert!(fixture.mux.has_delayed_register());

    fixture.mux.stop();
    assert!(!fixture.mux.current_request().is_active());
    assert!(!fixture.mux.has_delayed_register());
    assert_eq!(fixture.alarms.pending_count(), 0);
    assert!(matches!(
        fixture.mux.register(
            ClientKey::Listener(3),
            fixture.request(1_000),
            fixture.identity(),
            PermissionLevel::Fine,
            Arc::new(ChannelTransport::new(crossbeam::channel::unbounded().0)),
        ),
        Err(Error::NotStarted)
    ));
}

#[test]
fn test_inject_last_location_only_when_empty() {
    let fixture = Fixture::started();
    let seed = fixture.fix();
    fixture.mux.inject_last_location(&seed, 0);
    let identity = CallerIdentity::system("com.platform");
    assert_eq!(
        fixture
            .mux
            .get_last_location(&identity, PermissionLevel::Fine, false),
        Some(seed.clone())
    );

    // A second injection does not displace the existing entry.
    fixture.clock.advance_ms(1_000);
    let other = fixture.fix();
    fixture.mux.inject_last_location(&other, 0);
    assert_eq!(
        fixture
            .mux
            .get_last_location(&identity, PermissionLevel::Fine, false),
        Some(seed)
    );
}

#[test]
fn test_get_last_location_gates() {
    let fixture = Fixture::started();
    fixture.mux.on_report_location(&fixture.fix());

    let identity = fixture.identity();
    assert!(fixture
        .mux
        .get_last_location(&identity, PermissionLevel::Fine, false)
        .is_some());

    // Blacklisted package reads nothing.
    fixture
        .settings
        .set_package_blacklisted(0, "com.example", true);
    assert!(fixture
        .mux
        .get_last_location(&identity, PermissionLevel::Fine, false)
        .is_none());
    fixture
        .settings
        .set_package_blacklisted(0, "com.example", false);

    // Wrong user reads nothing unless system.
    let other_user = CallerIdentity::app(5, 10001, 777, "com.example");
    assert!(fixture
        .mux
        .get_last_location(&other_user, PermissionLevel::Fine, false)
        .is_none());

    // Coarse readers get the coarse slot, which is fudged.
    let coarse = fixture
        .mux
        .get_last_location(&identity, PermissionLevel::Coarse, false)
        .unwrap();
    assert_eq!(coarse.accuracy_m(), Some(2_000.0));
}

#[test]
fn test_zero_island_and_incomplete_fixes_dropped() {
    let fixture = Fixture::started();
    let receiver = fixture.register(1, 1_000);

    let now = fixture.clock.elapsed_realtime_ms();
    let zero = Location::new("gps", 0.0, 0.0)
        .with_accuracy(5.0)
        .with_time(1)
        .with_elapsed_realtime_ms(now);
    fixture.mux.on_report_location(&zero);

    let incomplete = Location::new("gps", 48.2, 16.3).with_elapsed_realtime_ms(now);
    fixture.mux.on_report_location(&incomplete);

    assert!(delivered(&receiver).is_empty());
}

#[test]
fn test_update_mask_bits() {
    use super::policy::UpdateMask;
    let mask = UpdateMask::PERMITTED | UpdateMask::ACTIVE;
    assert!(mask.contains(UpdateMask::PERMITTED));
    assert!(mask.contains(UpdateMask::ACTIVE));
    assert!(!mask.contains(UpdateMask::FOREGROUND));
    assert!(!mask.contains(UpdateMask::EFFECTIVE));
}
