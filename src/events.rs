// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 locmux contributors

//! Bounded event log for diagnostics.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::env::Clock;
use crate::types::{CallerIdentity, ClientKey, ProviderRequest, UserId};

/// Default number of retained records.
const DEFAULT_CAPACITY: usize = 200;

/// One record in the provider event log.
#[derive(Debug, Clone)]
pub enum LogEvent {
    Registered {
        key: ClientKey,
        identity: CallerIdentity,
        interval_ms: u64,
    },
    Unregistered {
        key: ClientKey,
    },
    UpdateRequest {
        request: ProviderRequest,
    },
    ReceiveLocation,
    DeliverLocation {
        key: ClientKey,
    },
    EnabledChanged {
        user: UserId,
        enabled: bool,
    },
    MockChanged {
        mock: bool,
    },
}

impl fmt::Display for LogEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogEvent::Registered {
                key,
                identity,
                interval_ms,
            } => write!(f, "REGISTER {key} {identity} interval={interval_ms}ms"),
            LogEvent::Unregistered { key } => write!(f, "UNREGISTER {key}"),
            LogEvent::UpdateRequest { request } => {
                if request.is_active() {
                    write!(f, "UPDATE_REQUEST interval={}ms", request.interval_ms())
                } else {
                    write!(f, "UPDATE_REQUEST disabled")
                }
            }
            LogEvent::ReceiveLocation => write!(f, "RECEIVE"),
            LogEvent::DeliverLocation { key } => write!(f, "DELIVER {key}"),
            LogEvent::EnabledChanged { user, enabled } => {
                write!(f, "ENABLED u{user}={enabled}")
            }
            LogEvent::MockChanged { mock } => write!(f, "MOCK {mock}"),
        }
    }
}

/// Ring of timestamped records; oldest entries fall off the back.
pub struct EventLog {
    clock: Arc<dyn Clock>,
    entries: Mutex<VecDeque<(u64, LogEvent)>>,
    capacity: usize,
}

impl EventLog {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_capacity(clock, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(clock: Arc<dyn Clock>, capacity: usize) -> Self {
        Self {
            clock,
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY))),
            capacity: capacity.max(1),
        }
    }

    /// Append a record, evicting the oldest if full.
    pub fn record(&self, event: LogEvent) {
        let now = self.clock.elapsed_realtime_ms();
        let mut entries = self.entries.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back((now, event));
    }

    /// Render the retained records, oldest first.
    pub fn dump(&self) -> Vec<String> {
        self.entries
            .lock()
            .iter()
            .map(|(at, event)| format!("+{at}ms {event}"))
            .collect()
    }
}
