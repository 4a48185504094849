// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 locmux contributors

//! Shared fixture for the integration tests: a manager wired entirely to
//! in-memory collaborators, a recording provider, and transports that can
//! fail or die on demand.

#![allow(dead_code)]

use std::sync::Arc;

use crossbeam::channel::Receiver;
use parking_lot::Mutex;

use locmux::env::{
    Clock, CountingWakeLock, Environment, InMemoryAppOps, InMemoryForeground,
    InMemoryPermissions, InMemoryPowerMode, InMemoryScreen, InMemorySettings, InMemoryUserInfo,
    ManualAlarms, ManualClock, RecordingAttribution, RecordingBroadcasts,
};
use locmux::fudger::GridFudger;
use locmux::provider::{
    LocationProvider, PowerRequirement, ProviderProperties, ProviderState,
};
use locmux::transport::{
    ChannelTransport, DeliveryCompletion, LocationTransport, TransportError, TransportEvent,
};
use locmux::types::{
    CallerIdentity, ClientKey, Location, LocationRequest, PermissionLevel, ProviderRequest,
    WorkSource,
};
use locmux::LocationProviderManager;

/// Records every request pushed by the multiplexer and lets tests flip
/// the provider-side state.
pub struct FakeProvider {
    state: Mutex<ProviderState>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl FakeProvider {
    pub fn new() -> Arc<Self> {
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

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().clone()
    }

    pub fn last_request(&self) -> Option<ProviderRequest> {
        self.requests.lock().last().cloned()
    }

    /// Mutate the provider-side state. The test must still call
    /// `manager.on_state_changed()` afterwards, like a real driver would.
    pub fn set_allowed(&self, allowed: bool) {
        self.state.lock().allowed = allowed;
    }

    pub fn set_mock(&self, mock: bool) {
        self.state.lock().mock = mock;
    }

    pub fn set_power_requirement(&self, power_requirement: PowerRequirement) {
        self.state.lock().properties.power_requirement = power_requirement;
    }

    pub fn set_identity(&self, identity: Option<CallerIdentity>) {
        self.state.lock().identity = identity;
    }
}

impl LocationProvider for FakeProvider {
    fn state(&self) -> ProviderState {
        self.state.lock().clone()
    }

    fn set_request(&self, request: &ProviderRequest) {
        self.requests.lock().push(request.clone());
    }

    fn send_extra_command(&self, _command: &str) -> bool {
        true
    }
}

/// Transport with a controllable failure mode and a manual death switch.
pub struct DeathTransport {
    events: Mutex<Vec<Option<Location>>>,
    on_death: Mutex<Option<Box<dyn FnOnce() + Send>>>,
    fail_next: Mutex<Option<TransportError>>,
}

impl DeathTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
            on_death: Mutex::new(None),
            fail_next: Mutex::new(None),
        })
    }

    pub fn deliveries(&self) -> Vec<Option<Location>> {
        self.events.lock().clone()
    }

    /// Make the next delivery fail with the given error.
    pub fn fail_next(&self, error: TransportError) {
        *self.fail_next.lock() = Some(error);
    }

    /// Simulate client death: fires the installed death callback once.
    pub fn die(&self) {
        if let Some(callback) = self.on_death.lock().take() {
            callback();
        }
    }
}

impl LocationTransport for DeathTransport {
    fn deliver_location(
        &self,
        location: Option<Location>,
        completion: DeliveryCompletion,
    ) -> Result<(), TransportError> {
        if let Some(error) = self.fail_next.lock().take() {
            return Err(error);
        }
        self.events.lock().push(location);
        completion.complete();
        Ok(())
    }

    fn link_to_death(&self, on_death: Box<dyn FnOnce() + Send>) -> bool {
        *self.on_death.lock() = Some(on_death);
        true
    }

    fn unlink_to_death(&self) {
        self.on_death.lock().take();
    }
}

pub struct Fixture {
    pub clock: Arc<ManualClock>,
    pub alarms: Arc<ManualAlarms>,
    pub settings: Arc<InMemorySettings>,
    pub users: Arc<InMemoryUserInfo>,
    pub permissions: Arc<InMemoryPermissions>,
    pub foreground: Arc<InMemoryForeground>,
    pub power: Arc<InMemoryPowerMode>,
    pub screen: Arc<InMemoryScreen>,
    pub app_ops: Arc<InMemoryAppOps>,
    pub wake_lock: Arc<CountingWakeLock>,
    pub attribution: Arc<RecordingAttribution>,
    pub broadcasts: Arc<RecordingBroadcasts>,
    pub provider: Arc<FakeProvider>,
    pub manager: Arc<LocationProviderManager>,
}

impl Fixture {
    /// A started "gps" manager with a deterministic fudger, time at 60s.
    pub fn started() -> Self {
        let fixture = Self::stopped("gps");
        fixture.manager.start();
        fixture
    }

    pub fn stopped(name: &str) -> Self {
        let clock = Arc::new(ManualClock::new(60_000));
        let alarms = Arc::new(ManualAlarms::new(clock.clone()));
        let settings = Arc::new(InMemorySettings::new());
        let users = Arc::new(InMemoryUserInfo::new());
        let permissions = Arc::new(InMemoryPermissions::new());
        let foreground = Arc::new(InMemoryForeground::new());
        let power = Arc::new(InMemoryPowerMode::new());
        let screen = Arc::new(InMemoryScreen::new());
        let app_ops = Arc::new(InMemoryAppOps::new());
        let wake_lock = Arc::new(CountingWakeLock::new());
        let attribution = Arc::new(RecordingAttribution::new());
        let broadcasts = Arc::new(RecordingBroadcasts::new());
        let provider = FakeProvider::new();

        let env = Environment::new()
            .with_clock(clock.clone())
            .with_alarms(alarms.clone())
            .with_settings(settings.clone())
            .with_users(users.clone())
            .with_permissions(permissions.clone())
            .with_foreground(foreground.clone())
            .with_power_save(power.clone())
            .with_screen(screen.clone())
            .with_app_ops(app_ops.clone())
            .with_wake_lock(wake_lock.clone())
            .with_attribution(attribution.clone())
            .with_broadcasts(broadcasts.clone());

        let manager = Arc::new(LocationProviderManager::with_fudger(
            name,
            env,
            provider.clone(),
            Box::new(GridFudger::with_seed(2_000.0, 7)),
        ));

        Self {
            clock,
            alarms,
            settings,
            users,
            permissions,
            foreground,
            power,
            screen,
            app_ops,
            wake_lock,
            attribution,
            broadcasts,
            provider,
            manager,
        }
    }

    pub fn now(&self) -> u64 {
        self.clock.elapsed_realtime_ms()
    }

    /// A complete fine fix at the current clock, at the default spot.
    pub fn fix(&self) -> Location {
        self.fix_at(48.2082, 16.3738)
    }

    pub fn fix_at(&self, latitude: f64, longitude: f64) -> Location {
        let now = self.now();
        Location::new("gps", latitude, longitude)
            .with_accuracy(5.0)
            .with_time(1_700_000_000_000 + now)
            .with_elapsed_realtime_ms(now)
    }

    pub fn identity(&self) -> CallerIdentity {
        CallerIdentity::app(0, 10001, 777, "com.example")
    }

    pub fn request(&self, interval_ms: u64) -> LocationRequest {
        LocationRequest::builder(interval_ms)
            .work_source(WorkSource::single(10001, "com.example"))
            .build()
    }

    /// Register a fine channel-backed subscription under listener `key`.
    pub fn register(&self, key: u64, request: LocationRequest) -> Receiver<TransportEvent> {
        self.register_as(key, request, self.identity(), PermissionLevel::Fine)
    }

    pub fn register_as(
        &self,
        key: u64,
        request: LocationRequest,
        identity: CallerIdentity,
        permission: PermissionLevel,
    ) -> Receiver<TransportEvent> {
        let (sender, receiver) = crossbeam::channel::unbounded();
        self.manager
            .register(
                ClientKey::Listener(key),
                request,
                identity,
                permission,
                Arc::new(ChannelTransport::new(sender)),
            )
            .unwrap();
        receiver
    }
}

/// Drain the location deliveries (dropping enabled-state events).
pub fn locations(receiver: &Receiver<TransportEvent>) -> Vec<Option<Location>> {
    let mut out = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        if let TransportEvent::Location(location) = event {
            out.push(location);
        }
    }
    out
}
