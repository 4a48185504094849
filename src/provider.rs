// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 locmux contributors

//! Provider adapter surface.

use crate::types::{CallerIdentity, ProviderRequest};

/// Well-known provider names.
pub const GPS_PROVIDER: &str = "gps";
pub const FUSED_PROVIDER: &str = "fused";
pub const NETWORK_PROVIDER: &str = "network";
pub const PASSIVE_PROVIDER: &str = "passive";

/// How much power the provider draws while producing fixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PowerRequirement {
    #[default]
    Low,
    Medium,
    High,
}

/// Static characteristics of a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProviderProperties {
    pub power_requirement: PowerRequirement,
}

/// Snapshot of the provider's externally observable state.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProviderState {
    /// Whether the provider itself is willing to produce fixes.
    pub allowed: bool,
    /// Identity of the provider service, if attributable.
    pub identity: Option<CallerIdentity>,
    pub properties: ProviderProperties,
    /// Whether a mock overlay is currently active.
    pub mock: bool,
}

/// The underlying provider driver (GPS/fused HAL adapter).
///
/// The driver reports fixes and state changes back by calling
/// `LocationProviderManager::on_report_location` and `on_state_changed`.
pub trait LocationProvider: Send + Sync {
    /// Current state snapshot.
    fn state(&self) -> ProviderState;

    /// Push the merged request; [`ProviderRequest::is_active`] false
    /// means stop producing fixes.
    fn set_request(&self, request: &ProviderRequest);

    /// Forward an extra command to the driver. Returns whether the
    /// command was recognized.
    fn send_extra_command(&self, _command: &str) -> bool {
        false
    }
}

/// Sink for forwarding raw fixes to the passive provider's own
/// multiplexer.
pub trait PassiveHook: Send + Sync {
    fn update_location(&self, location: &crate::types::Location);
}
