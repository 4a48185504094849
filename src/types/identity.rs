// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 locmux contributors

//! Caller identity and subscription keying.

use std::fmt;
use std::sync::Arc;

/// Platform user id. User 0 is the owner on single-user systems.
pub type UserId = u32;

/// Location permission level held by a caller.
///
/// `Coarse` callers receive fudged locations and have their request
/// intervals coerced to the coarse minimum; `Fine` callers receive the
/// provider fix as reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PermissionLevel {
    /// Approximate location only.
    Coarse,
    /// Precise location.
    Fine,
}

/// Identity of the caller behind a subscription or a one-off query.
///
/// Immutable once constructed. The `system` flag marks callers that run as
/// part of the platform itself and are therefore exempt from the
/// current-user gate.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallerIdentity {
    /// User the caller runs as.
    pub user_id: UserId,
    /// Kernel uid of the caller.
    pub uid: u32,
    /// Process id of the caller, used to detect same-process delivery.
    pub pid: u32,
    /// Package name of the caller.
    pub package: Arc<str>,
    /// Optional attribution tag within the package.
    pub attribution_tag: Option<Arc<str>>,
    /// Whether the caller is part of the platform.
    pub system: bool,
}

impl CallerIdentity {
    /// Identity for an ordinary application.
    pub fn app(user_id: UserId, uid: u32, pid: u32, package: &str) -> Self {
        Self {
            user_id,
            uid,
            pid,
            package: Arc::from(package),
            attribution_tag: None,
            system: false,
        }
    }

    /// Identity for a platform component.
    pub fn system(package: &str) -> Self {
        Self {
            user_id: 0,
            uid: 1000,
            pid: std::process::id(),
            package: Arc::from(package),
            attribution_tag: None,
            system: true,
        }
    }

    /// Attach an attribution tag.
    #[must_use]
    pub fn with_attribution_tag(mut self, tag: &str) -> Self {
        self.attribution_tag = Some(Arc::from(tag));
        self
    }
}

impl fmt::Display for CallerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}[{}]", self.uid, self.package, self.user_id)?;
        if let Some(tag) = &self.attribution_tag {
            write!(f, "({})", tag)?;
        }
        Ok(())
    }
}

/// Opaque key identifying one client subscription within a multiplexer.
///
/// The kind mirrors the delivery mechanism the client registered with: a
/// remote listener handle, an intent-like delivery sink, or an
/// internally generated key for one-shot current-location requests.
/// Registering a second subscription under an equal key replaces the first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientKey {
    /// Callback-style client, keyed by its listener handle.
    Listener(u64),
    /// Intent-style client, keyed by its delivery object.
    Intent(u64),
    /// Internally keyed one-shot current-location request.
    OneShot(u64),
}

impl fmt::Display for ClientKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientKey::Listener(id) => write!(f, "listener:{id:#x}"),
            ClientKey::Intent(id) => write!(f, "intent:{id:#x}"),
            ClientKey::OneShot(id) => write!(f, "oneshot:{id:#x}"),
        }
    }
}
