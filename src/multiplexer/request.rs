// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 locmux contributors

//! Applying the merged request to the provider, with delayed
//! re-registration.
//!
//! Tightening the provider request right after a fix was delivered wastes
//! power: the fastest client is satisfied for almost a full interval, so
//! the push can wait. The delay is bounded by the new interval, and a
//! pending delayed push is identified by a generation counter so a
//! superseded alarm firing late is a no-op.

use std::sync::Arc;

use crate::types::{LocationRequest, ProviderRequest};

use super::{DelayedRegister, Multiplexer, Op, State};

/// Delays under this threshold are applied immediately: 30 seconds.
pub(crate) const MIN_REQUEST_DELAY_MS: u64 = 30_000;

impl Multiplexer {
    /// Recompute the merged request over the active, non-passive
    /// registrations and push it to the provider, possibly delayed.
    /// Any previously pending delayed push is cancelled.
    pub(super) fn update_provider_request_locked(
        self: &Arc<Self>,
        state: &mut State,
    ) -> Vec<Op> {
        let new_request = {
            let contributors: Vec<&LocationRequest> = state
                .regs
                .iter()
                .filter(|(_, reg)| reg.active() && !reg.effective().is_passive())
                .map(|(_, reg)| reg.effective())
                .collect();
            ProviderRequest::merge(&contributors)
        };

        let old = &state.applied_request;
        if new_request == *old {
            if let Some(delayed) = state.delayed.take() {
                self.env.alarms.cancel(delayed.alarm);
            }
            return Vec::new();
        }

        // A bypass upgrade or a relaxation must reach the provider now;
        // only a tightening may wait.
        let immediate = (!old.bypass() && new_request.bypass())
            || new_request.interval_ms() > old.interval_ms();
        let delay_ms = if immediate {
            0
        } else {
            self.compute_delay_locked(state, &new_request)
        };

        if let Some(delayed) = state.delayed.take() {
            self.env.alarms.cancel(delayed.alarm);
        }

        if delay_ms < MIN_REQUEST_DELAY_MS {
            state.applied_request = new_request.clone();
            return vec![Op::SetRequest(new_request)];
        }

        state.delayed_generation += 1;
        let generation = state.delayed_generation;
        log::debug!(
            "[{}] delaying provider request by {}ms",
            self.name,
            delay_ms
        );
        let weak = Arc::downgrade(self);
        let alarm = self.env.alarms.schedule(
            delay_ms,
            new_request.work_source(),
            Box::new(move || {
                if let Some(mux) = weak.upgrade() {
                    mux.on_delayed_register(generation);
                }
            }),
        );
        state.delayed = Some(DelayedRegister {
            generation,
            request: new_request,
            alarm,
        });
        Vec::new()
    }

    /// How long the new request can wait: the smallest remaining slack
    /// among the contributors, bounded by the new interval. A contributor
    /// that never received anything borrows the age of the applicable
    /// cached location, which suppresses oscillation from rapid
    /// add/remove cycles.
    fn compute_delay_locked(&self, state: &State, new_request: &ProviderRequest) -> u64 {
        let now = self.env.clock.elapsed_realtime_ms();
        let mut delay = new_request.interval_ms();
        for (_, reg) in &state.regs {
            if !reg.active() || reg.effective().is_passive() {
                continue;
            }
            let interval = reg.effective().interval_ms();
            let term = if let Some(last) = reg.last_delivered() {
                interval.saturating_sub(last.age_ms(now))
            } else if !reg.effective().bypass() {
                match state
                    .last_locations
                    .get(&reg.user_id())
                    .and_then(|cache| cache.get(reg.permission(), false))
                {
                    Some(stand_in) => interval.saturating_sub(stand_in.age_ms(now)),
                    None => 0,
                }
            } else {
                0
            };
            delay = delay.min(term);
        }
        delay
    }

    /// A delayed push came due. Applies only if it is still the current
    /// pending one.
    fn on_delayed_register(self: &Arc<Self>, generation: u64) {
        let ops = {
            let mut state = self.state.lock();
            let current = state
                .delayed
                .as_ref()
                .is_some_and(|delayed| delayed.generation == generation);
            if current {
                let delayed = state.delayed.take().expect("checked above");
                state.applied_request = delayed.request.clone();
                vec![Op::SetRequest(delayed.request)]
            } else {
                Vec::new()
            }
        };
        self.dispatch(ops);
    }
}
