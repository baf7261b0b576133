// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Per-identifier fan-out from one bus subscription to local listeners.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::bus::{SignalBus, SignalHandler, Subscription};
use crate::store::PayloadStore;

/// Callback registered against an identifier; receives the stored payload.
pub type RawListener = Arc<dyn Fn(Bytes) + Send + Sync>;

/// Maintains exactly one bus subscription per identifier that has listeners,
/// no matter how many listeners are registered for it.
#[derive(Clone)]
pub(crate) struct ListenerRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    bus: Arc<dyn SignalBus>,
    store: Arc<dyn PayloadStore>,
    channels: Mutex<HashMap<String, Channel>>,
}

struct Channel {
    subscription: Subscription,
    listeners: Vec<RawListener>,
}

impl ListenerRegistry {
    pub(crate) fn new(bus: Arc<dyn SignalBus>, store: Arc<dyn PayloadStore>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                bus,
                store,
                channels: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Append `listener` for `identifier`, establishing the one bus
    /// subscription for that identifier if this is its first listener.
    pub(crate) fn listen(&self, identifier: &str, listener: RawListener) -> anyhow::Result<()> {
        let mut channels = self.inner.channels.lock();
        if let Some(channel) = channels.get_mut(identifier) {
            channel.listeners.push(listener);
            return Ok(());
        }

        let handler = dispatch_handler(Arc::downgrade(&self.inner), identifier.to_string());
        let subscription = self.inner.bus.subscribe(identifier, handler)?;
        channels.insert(
            identifier.to_string(),
            Channel {
                subscription,
                listeners: vec![listener],
            },
        );
        Ok(())
    }

    /// Drop the bus subscription for `identifier` and discard all of its
    /// listeners, however many are registered. The subscription is removed
    /// before this returns; a re-listen establishes a fresh one.
    pub(crate) fn stop_listening(&self, identifier: &str) {
        let channel = self.inner.channels.lock().remove(identifier);
        let Some(channel) = channel else {
            return;
        };
        // Outside the lock: the dispatch handler takes it.
        if let Err(e) = self.inner.bus.unsubscribe(channel.subscription) {
            warn!(
                target: "wormhole::registry",
                identifier,
                error = %e,
                "failed to remove bus subscription"
            );
        }
    }

    #[cfg(test)]
    fn listener_count(&self, identifier: &str) -> usize {
        self.inner
            .channels
            .lock()
            .get(identifier)
            .map_or(0, |c| c.listeners.len())
    }
}

fn dispatch_handler(inner: Weak<RegistryInner>, identifier: String) -> SignalHandler {
    Arc::new(move |_name| {
        if let Some(inner) = inner.upgrade() {
            inner.dispatch(&identifier);
        }
    })
}

impl RegistryInner {
    fn dispatch(&self, identifier: &str) {
        let payload = match self.store.read(identifier) {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                // The sender may have failed to persist; skipping beats
                // delivering nothing-as-something.
                debug!(
                    target: "wormhole::registry",
                    identifier,
                    "signal without stored payload, dropping"
                );
                return;
            }
            Err(e) => {
                warn!(
                    target: "wormhole::registry",
                    identifier,
                    error = %e,
                    "payload read failed, dropping event"
                );
                return;
            }
        };

        // Snapshot so listeners run outside the lock, in registration order.
        let listeners: Vec<RawListener> = {
            let channels = self.channels.lock();
            match channels.get(identifier) {
                Some(channel) => channel.listeners.clone(),
                None => return,
            }
        };
        for listener in &listeners {
            listener(payload.clone());
        }
    }
}
