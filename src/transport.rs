// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 locmux contributors

//! Delivery sinks and the single-use completion callback.

use std::fmt;
use std::sync::Arc;

use crossbeam::channel::Sender;
use parking_lot::Mutex;

use crate::types::Location;

/// Why a delivery could not be handed to the client.
///
/// These are the only errors a transport may report; they both mean the
/// client is gone for good and cause the subscription to remove itself.
/// A transport that fails any other way has a programming bug and should
/// panic rather than limp on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// The remote end died (process exit, handle dropped).
    ClientGone,
    /// The delivery object was cancelled by its owner.
    Cancelled,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::ClientGone => write!(f, "client is gone"),
            TransportError::Cancelled => write!(f, "delivery object cancelled"),
        }
    }
}

impl std::error::Error for TransportError {}

/// At-most-once completion callback handed along with each delivery.
///
/// The multiplexer uses it to release the delivery wakelock: the
/// transport invokes it when the client has consumed the location, and
/// the failure path invokes it when the delivery could not be handed
/// over. Invoking it more than once, from any thread, is harmless; only
/// the first call runs the underlying action.
#[derive(Clone)]
pub struct DeliveryCompletion {
    action: Arc<Mutex<Option<Box<dyn FnOnce() + Send>>>>,
}

impl DeliveryCompletion {
    /// Completion wrapping the given action.
    pub fn new(action: Box<dyn FnOnce() + Send>) -> Self {
        Self {
            action: Arc::new(Mutex::new(Some(action))),
        }
    }

    /// Completion with nothing to do (deliveries that hold no wakelock).
    pub fn noop() -> Self {
        Self {
            action: Arc::new(Mutex::new(None)),
        }
    }

    /// Run the action if it has not run yet.
    pub fn complete(&self) {
        let action = self.action.lock().take();
        if let Some(action) = action {
            action();
        }
    }
}

impl fmt::Debug for DeliveryCompletion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliveryCompletion")
            .field("pending", &self.action.lock().is_some())
            .finish()
    }
}

/// A client's delivery sink.
///
/// Locations arrive as owned clones; a sink can never mutate the
/// multiplexer's cache through them. `None` is delivered only to one-shot
/// clients whose request ended without a fix.
pub trait LocationTransport: Send + Sync {
    /// Hand a location (or a one-shot give-up) to the client. The
    /// completion must be invoked once the client has consumed it.
    fn deliver_location(
        &self,
        location: Option<Location>,
        completion: DeliveryCompletion,
    ) -> Result<(), TransportError>;

    /// Tell the client the provider's enabled state changed.
    fn deliver_provider_enabled(
        &self,
        _provider: &str,
        _enabled: bool,
    ) -> Result<(), TransportError> {
        Ok(())
    }

    /// Install a death callback, fired once if the client dies while
    /// registered. Returns false when the transport cannot watch for
    /// death (deliveries will surface [`TransportError::ClientGone`]
    /// instead).
    fn link_to_death(&self, _on_death: Box<dyn FnOnce() + Send>) -> bool {
        false
    }

    /// Remove a previously installed death callback.
    fn unlink_to_death(&self) {}
}

/// Closure-based sink for in-process clients.
pub struct CallbackTransport<F>
where
    F: Fn(Option<Location>) + Send + Sync,
{
    callback: F,
}

impl<F> CallbackTransport<F>
where
    F: Fn(Option<Location>) + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> LocationTransport for CallbackTransport<F>
where
    F: Fn(Option<Location>) + Send + Sync,
{
    fn deliver_location(
        &self,
        location: Option<Location>,
        completion: DeliveryCompletion,
    ) -> Result<(), TransportError> {
        (self.callback)(location);
        completion.complete();
        Ok(())
    }
}

/// Event stream seen by a [`ChannelTransport`] client.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A delivered location, or `None` for a one-shot give-up.
    Location(Option<Location>),
    /// The provider's enabled state changed.
    ProviderEnabled { provider: String, enabled: bool },
}

/// Channel-backed sink. The client holds the receiving end; dropping it
/// reads as client death on the next delivery.
pub struct ChannelTransport {
    sender: Sender<TransportEvent>,
}

impl ChannelTransport {
    pub fn new(sender: Sender<TransportEvent>) -> Self {
        Self { sender }
    }
}

impl LocationTransport for ChannelTransport {
    fn deliver_location(
        &self,
        location: Option<Location>,
        completion: DeliveryCompletion,
    ) -> Result<(), TransportError> {
        self.sender
            .send(TransportEvent::Location(location))
            .map_err(|_| TransportError::ClientGone)?;
        completion.complete();
        Ok(())
    }

    fn deliver_provider_enabled(
        &self,
        provider: &str,
        enabled: bool,
    ) -> Result<(), TransportError> {
        self.sender
            .send(TransportEvent::ProviderEnabled {
                provider: provider.to_string(),
                enabled,
            })
            .map_err(|_| TransportError::ClientGone)
    }
}
