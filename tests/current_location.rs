// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 locmux contributors

//! One-shot current-location requests through the public API.

mod common;

use std::sync::Arc;

use common::{locations, Fixture};
use locmux::transport::ChannelTransport;
use locmux::types::PermissionLevel;

#[test]
fn test_current_location_served_from_fresh_cache() {
    let fixture = Fixture::started();
    let fix = fixture.fix();
    fixture.manager.on_report_location(&fix);
    let requests_before = fixture.provider.requests().len();

    // Four seconds later the cache is still inside the freshness bound.
    fixture.clock.advance_ms(4_000);
    let (sender, receiver) = crossbeam::channel::unbounded();
    let _handle = fixture
        .manager
        .get_current_location(
            fixture.request(0),
            fixture.identity(),
            PermissionLevel::Fine,
            Arc::new(ChannelTransport::new(sender)),
        )
        .unwrap();

    assert_eq!(locations(&receiver), vec![Some(fix)]);
    // No provider churn for a cache-satisfied one-shot.
    assert_eq!(fixture.provider.requests().len(), requests_before);
}

#[test]
fn test_current_location_stale_cache_waits_for_provider() {
    let fixture = Fixture::started();
    fixture.manager.on_report_location(&fixture.fix());
    fixture.clock.advance_ms(11_000);

    let (sender, receiver) = crossbeam::channel::unbounded();
    let _handle = fixture
        .manager
        .get_current_location(
            fixture.request(0),
            fixture.identity(),
            PermissionLevel::Fine,
            Arc::new(ChannelTransport::new(sender)),
        )
        .unwrap();
    // Eleven seconds is past the 10s freshness bound.
    assert!(locations(&receiver).is_empty());
    assert!(fixture.manager.current_request().is_active());

    let fix = fixture.fix();
    fixture.manager.on_report_location(&fix);
    assert_eq!(locations(&receiver), vec![Some(fix)]);
    assert!(!fixture.manager.current_request().is_active());
}

#[test]
fn test_current_location_gives_up_with_null() {
    let fixture = Fixture::started();
    let (sender, receiver) = crossbeam::channel::unbounded();
    let _handle = fixture
        .manager
        .get_current_location(
            fixture.request(0),
            fixture.identity(),
            PermissionLevel::Fine,
            Arc::new(ChannelTransport::new(sender)),
        )
        .unwrap();

    // The unbounded duration ask is clamped to the 30s cap.
    fixture.clock.advance_ms(30_000);
    fixture.alarms.fire_due();
    assert_eq!(locations(&receiver), vec![None]);
}

#[test]
fn test_current_location_cancel_is_idempotent() {
    let fixture = Fixture::started();
    let (sender, receiver) = crossbeam::channel::unbounded();
    let handle = fixture
        .manager
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
    assert!(locations(&receiver).is_empty());
    assert!(!fixture.manager.current_request().is_active());
}

#[test]
fn test_current_location_coarse_gets_fudged_fix() {
    let fixture = Fixture::started();
    let fix = fixture.fix();
    fixture.manager.on_report_location(&fix);

    let (sender, receiver) = crossbeam::channel::unbounded();
    let _handle = fixture
        .manager
        .get_current_location(
            fixture.request(0),
            fixture.identity(),
            PermissionLevel::Coarse,
            Arc::new(ChannelTransport::new(sender)),
        )
        .unwrap();

    let delivered = locations(&receiver);
    assert_eq!(delivered.len(), 1);
    let coarse = delivered[0].as_ref().unwrap();
    assert_ne!(coarse.latitude(), fix.latitude());
    assert_eq!(coarse.accuracy_m(), Some(2_000.0));
}
