// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! In-process signal bus.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use super::{BusError, SignalBus, SignalHandler, Subscription};

/// [`SignalBus`] scoped to the current process.
///
/// Handlers run inline on the posting thread. Useful for wiring several
/// endpoints inside one process and for tests; cross-process signaling needs
/// [`DirectorySignalBus`](super::DirectorySignalBus) or an OS-backed adapter.
#[derive(Default)]
pub struct ProcessSignalBus {
    subscribers: DashMap<String, Vec<(u64, SignalHandler)>>,
    next_token: AtomicU64,
}

impl ProcessSignalBus {
    /// Create a new bus with no subscribers.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl SignalBus for ProcessSignalBus {
    fn post(&self, name: &str) -> Result<(), BusError> {
        // Snapshot first: a handler may subscribe or unsubscribe while running.
        let handlers: Vec<SignalHandler> = match self.subscribers.get(name) {
            Some(entry) => entry.iter().map(|(_, h)| Arc::clone(h)).collect(),
            None => return Ok(()),
        };
        for handler in handlers {
            handler(name);
        }
        Ok(())
    }

    fn subscribe(&self, name: &str, handler: SignalHandler) -> Result<Subscription, BusError> {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .entry(name.to_string())
            .or_default()
            .push((token, handler));
        Ok(Subscription::new(token, name))
    }

    fn unsubscribe(&self, subscription: Subscription) -> Result<(), BusError> {
        let mut removed = false;
        if let Some(mut entry) = self.subscribers.get_mut(subscription.name()) {
            let before = entry.len();
            entry.retain(|(token, _)| *token != subscription.token());
            removed = entry.len() < before;
        }
        self.subscribers
            .remove_if(subscription.name(), |_, handlers| handlers.is_empty());

        if removed {
            Ok(())
        } else {
            Err(BusError::UnknownSubscription {
                token: subscription.token(),
                name: subscription.name().to_string(),
            })
        }
    }
}
