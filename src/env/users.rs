// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 locmux contributors

//! System user information.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::env::{Listeners, SubscriptionId};
use crate::types::UserId;

/// User lifecycle notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserEvent {
    Started(UserId),
    Stopped(UserId),
    CurrentChanged { from: UserId, to: UserId },
}

pub type UserListener = Arc<dyn Fn(&UserEvent) + Send + Sync>;

/// Running users and the current (foreground) user.
pub trait UserInfoHelper: Send + Sync {
    fn running_user_ids(&self) -> Vec<UserId>;
    fn current_user_id(&self) -> UserId;

    fn subscribe(&self, listener: UserListener) -> SubscriptionId;
    fn unsubscribe(&self, id: SubscriptionId);
}

struct UserState {
    running: Vec<UserId>,
    current: UserId,
}

/// Single-machine user model: user 0 running and current, more users
/// started and switched by explicit calls.
pub struct InMemoryUserInfo {
    state: Mutex<UserState>,
    listeners: Listeners<UserEvent>,
}

impl InMemoryUserInfo {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(UserState {
                running: vec![0],
                current: 0,
            }),
            listeners: Listeners::new(),
        }
    }

    pub fn start_user(&self, user: UserId) {
        {
            let mut state = self.state.lock();
            if state.running.contains(&user) {
                return;
            }
            state.running.push(user);
        }
        self.listeners.notify(&UserEvent::Started(user));
    }

    pub fn stop_user(&self, user: UserId) {
        {
            let mut state = self.state.lock();
            let Some(index) = state.running.iter().position(|u| *u == user) else {
                return;
            };
            state.running.remove(index);
        }
        self.listeners.notify(&UserEvent::Stopped(user));
    }

    pub fn switch_user(&self, to: UserId) {
        let from = {
            let mut state = self.state.lock();
            let from = state.current;
            if from == to {
                return;
            }
            if !state.running.contains(&to) {
                state.running.push(to);
            }
            state.current = to;
            from
        };
        self.listeners.notify(&UserEvent::CurrentChanged { from, to });
    }
}

impl Default for InMemoryUserInfo {
    fn default() -> Self {
        Self::new()
    }
}

impl UserInfoHelper for InMemoryUserInfo {
    fn running_user_ids(&self) -> Vec<UserId> {
        self.state.lock().running.clone()
    }

    fn current_user_id(&self) -> UserId {
        self.state.lock().current
    }

    fn subscribe(&self, listener: UserListener) -> SubscriptionId {
        self.listeners.subscribe(listener)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.listeners.unsubscribe(id);
    }
}
