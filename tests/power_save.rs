// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 locmux contributors

//! Power-save and screen interaction: screen-off modes park registrations
//! without touching the cache, and screen-on restores them.

mod common;

use common::{locations, Fixture};
use locmux::env::LocationPowerSaveMode;
use locmux::types::{PermissionLevel, WorkSource};

#[test]
fn test_all_disabled_when_screen_off() {
    let fixture = Fixture::started();
    let receiver = fixture.register(1, fixture.request(1_000));
    fixture.manager.on_report_location(&fixture.fix());
    assert_eq!(locations(&receiver).len(), 1);

    fixture
        .power
        .set_mode(LocationPowerSaveMode::AllDisabledWhenScreenOff);
    // Mode alone changes nothing while the screen is interactive.
    assert!(fixture.manager.current_request().is_active());

    fixture.screen.set_interactive(false);
    assert!(!fixture.manager.current_request().is_active());

    // Parked, not removed: no deliveries, but the cache keeps its normal
    // slots (only provider-disable clears them).
    fixture.clock.advance_ms(1_000);
    fixture.manager.on_report_location(&fixture.fix());
    assert!(locations(&receiver).is_empty());
    assert!(fixture
        .manager
        .get_last_location(&fixture.identity(), PermissionLevel::Fine, false)
        .is_some());

    // Screen back on: the registration reactivates and the provider
    // request is re-pushed.
    fixture.screen.set_interactive(true);
    assert!(fixture.manager.current_request().is_active());
    fixture.clock.advance_ms(1_000);
    fixture.manager.on_report_location(&fixture.fix());
    assert_eq!(locations(&receiver).len(), 1);
}

#[test]
fn test_gps_disabled_when_screen_off_spares_other_providers() {
    let gps = Fixture::started();
    gps.power
        .set_mode(LocationPowerSaveMode::GpsDisabledWhenScreenOff);
    let _gps_receiver = gps.register(1, gps.request(1_000));
    gps.screen.set_interactive(false);
    assert!(!gps.manager.current_request().is_active());

    let network = Fixture::stopped("network");
    network.manager.start();
    network
        .power
        .set_mode(LocationPowerSaveMode::GpsDisabledWhenScreenOff);
    let _net_receiver = network.register(1, network.request(1_000));
    network.screen.set_interactive(false);
    // Not GPS: the mode does not apply.
    assert!(network.manager.current_request().is_active());
}

#[test]
fn test_foreground_only_mode() {
    let fixture = Fixture::started();
    fixture
        .power
        .set_mode(LocationPowerSaveMode::ForegroundOnly);

    // Background client: inactive under FOREGROUND_ONLY.
    let receiver = fixture.register(1, fixture.request(1_000));
    assert!(!fixture.manager.current_request().is_active());
    fixture.manager.on_report_location(&fixture.fix());
    assert!(locations(&receiver).is_empty());

    // Foregrounding the app re-evaluates eligibility.
    fixture.foreground.set_foreground(10001, true);
    assert!(fixture.manager.current_request().is_active());
    fixture.clock.advance_ms(1_000);
    fixture.manager.on_report_location(&fixture.fix());
    assert_eq!(locations(&receiver).len(), 1);
}

#[test]
fn test_bypass_survives_screen_off() {
    let fixture = Fixture::started();
    fixture.settings.set_ignore_settings_allowed("com.example", true);
    fixture
        .power
        .set_mode(LocationPowerSaveMode::AllDisabledWhenScreenOff);

    let request = locmux::types::LocationRequest::builder(1_000)
        .bypass(true)
        .work_source(WorkSource::single(10001, "com.example"))
        .build();
    let receiver = fixture.register(1, request);
    fixture.screen.set_interactive(false);

    // Settings-bypass registrations ignore the power-save gate.
    assert!(fixture.manager.current_request().is_active());
    fixture.manager.on_report_location(&fixture.fix());
    assert_eq!(locations(&receiver).len(), 1);
}
