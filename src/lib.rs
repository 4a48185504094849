// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 locmux contributors

//! # locmux - per-provider location request multiplexer
//!
//! A long-lived component that accepts many concurrent client
//! subscriptions for location updates from a single named provider,
//! merges them into one effective provider-level request, fans incoming
//! fixes back out to the eligible subset of subscribers, and continuously
//! reacts to the policy surfaces that flip eligibility: user switching,
//! permission revocation, power-save mode, foreground state, screen
//! state, settings changes and blacklists.
//!
//! ## Architecture
//!
//! ```text
//! clients                      LocationProviderManager
//!   |  register /                        |
//!   |  get_current_location      +-------+--------+
//!   +--------------------------> |   Multiplexer  | ---> provider driver
//!                                |  (coarse lock) | <--- on_report_location
//!   policy surfaces ---events--> +-------+--------+
//!   (settings, users,                    |
//!    permissions, power,          LastLocation cache
//!    screen, foreground)          per user, 4 slots
//! ```
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use locmux::env::Environment;
//! use locmux::transport::CallbackTransport;
//! use locmux::types::{CallerIdentity, ClientKey, LocationRequest, PermissionLevel, WorkSource};
//! use locmux::LocationProviderManager;
//!
//! # fn provider() -> Arc<dyn locmux::provider::LocationProvider> { unimplemented!() }
//! let manager = LocationProviderManager::new("gps", Environment::new(), provider());
//! manager.start();
//!
//! let request = LocationRequest::builder(5_000)
//!     .work_source(WorkSource::single(10001, "com.example.maps"))
//!     .build();
//! manager.register(
//!     ClientKey::Listener(1),
//!     request,
//!     CallerIdentity::app(0, 10001, 4242, "com.example.maps"),
//!     PermissionLevel::Fine,
//!     Arc::new(CallbackTransport::new(|location| {
//!         println!("fix: {location:?}");
//!     })),
//! )?;
//! # Ok::<(), locmux::Error>(())
//! ```
//!
//! ## Modules
//!
//! - [`manager`] - root wiring and the public API (start here)
//! - [`multiplexer`] - the core registry, merge and fan-out
//! - [`types`] - identities, fixes, requests and their merge
//! - [`env`] - the platform collaborators and their in-memory stand-ins
//! - [`transport`] - delivery sinks
//! - [`provider`] - the provider driver surface
//! - [`cache`] - the per-user last-location cache
//! - [`fudger`] - coarse location derivation

pub mod cache;
pub mod env;
pub mod events;
pub mod fudger;
pub mod manager;
pub mod multiplexer;
pub mod provider;
mod registration;
pub mod transport;
pub mod types;
mod worker;

pub use manager::{BatchHook, LocationProviderManager};
pub use multiplexer::{CurrentLocationHandle, EnabledListener, Multiplexer};

use std::fmt;

/// Errors returned by the configuration-time surface.
///
/// Everything recoverable at runtime (client death, app-op denials,
/// permission revocations, expirations) is absorbed internally and shows
/// up as delivery behavior, never as an error return.
#[derive(Debug)]
pub enum Error {
    /// The request carries no work source to blame power on.
    EmptyWorkSource,
    /// The request is malformed for the operation.
    InvalidRequest(String),
    /// The manager has not been started.
    NotStarted,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::EmptyWorkSource => write!(f, "request work source is empty"),
            Error::InvalidRequest(msg) => write!(f, "invalid request: {msg}"),
            Error::NotStarted => write!(f, "manager is not started"),
        }
    }
}

impl std::error::Error for Error {}

/// Convenience result alias.
pub type Result<T> = std::result::Result<T, Error>;
