// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Ping/pong liveness probing over the signal bus.
//!
//! A probe races the reply signal against a one-shot timer; whichever branch
//! wins completes the probe and the loser becomes a no-op, so the outcome
//! callback fires exactly once per ping.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::warn;

use crate::bus::{SignalBus, SignalHandler, Subscription};

/// Signal-name prefix announcing a liveness probe.
///
/// The probed identifier is concatenated directly after the prefix; the
/// responding side parses it back off with the same fixed prefix.
pub(crate) const PING_PREFIX: &str = "Ping";
/// Signal-name prefix announcing a liveness reply.
pub(crate) const PONG_PREFIX: &str = "Pong";

/// Wait applied to a ping when the caller does not specify one.
pub const DEFAULT_PING_TIMEOUT: Duration = Duration::from_secs(2);

/// Outcome callback for one probe. Invoked with `true` on a pong, `false`
/// on timeout; exactly once either way.
pub(crate) type PingCallback = Box<dyn FnOnce(bool) + Send>;

pub(crate) struct Liveness {
    bus: Arc<dyn SignalBus>,
    runtime: tokio::runtime::Handle,
    tracker: TaskTracker,
    responders: Mutex<HashMap<String, Subscription>>,
}

impl Liveness {
    pub(crate) fn new(
        bus: Arc<dyn SignalBus>,
        runtime: tokio::runtime::Handle,
        tracker: TaskTracker,
    ) -> Self {
        Self {
            bus,
            runtime,
            tracker,
            responders: Mutex::new(HashMap::new()),
        }
    }

    /// Probe whether some process is replying to pings for `identifier`.
    ///
    /// Subscribes for the pong, schedules the timeout, then posts the ping.
    /// If the probe cannot be launched, the error is returned and
    /// `on_result` is never invoked.
    pub(crate) fn ping(
        &self,
        identifier: &str,
        timeout: Duration,
        on_result: PingCallback,
    ) -> anyhow::Result<()> {
        let ping_name = format!("{PING_PREFIX}{identifier}");
        let pong_name = format!("{PONG_PREFIX}{identifier}");

        let probe = Arc::new(PendingProbe::new(Arc::clone(&self.bus), on_result));

        // Hold the subscription slot across subscribe: a stray pong racing
        // in cannot complete the probe before its subscription is recorded.
        {
            let mut slot = probe.subscription.lock();
            let handler_probe = Arc::downgrade(&probe);
            let handler: SignalHandler = Arc::new(move |_name| {
                if let Some(probe) = Weak::upgrade(&handler_probe) {
                    probe.complete(true);
                }
            });
            *slot = Some(self.bus.subscribe(&pong_name, handler)?);
        }

        let timer_probe = Arc::clone(&probe);
        let timer = self.tracker.spawn_on(
            async move {
                tokio::time::sleep(timeout).await;
                timer_probe.complete(false);
            },
            &self.runtime,
        );
        *probe.timer.lock() = Some(timer);

        if let Err(e) = self.bus.post(&ping_name) {
            probe.cancel();
            return Err(e.into());
        }
        Ok(())
    }

    /// Offer liveness replies for `identifier`, for the rest of this
    /// instance's lifetime. Idempotent per identifier; there is no
    /// corresponding stop operation.
    pub(crate) fn reply_to_pings(&self, identifier: &str) -> anyhow::Result<()> {
        let mut responders = self.responders.lock();
        if responders.contains_key(identifier) {
            return Ok(());
        }

        let ping_name = format!("{PING_PREFIX}{identifier}");
        let bus = Arc::clone(&self.bus);
        let handler: SignalHandler = Arc::new(move |name| {
            // The probed identifier is whatever follows the fixed prefix.
            let Some(identifier) = name.strip_prefix(PING_PREFIX) else {
                return;
            };
            let pong_name = format!("{PONG_PREFIX}{identifier}");
            if let Err(e) = bus.post(&pong_name) {
                warn!(
                    target: "wormhole::liveness",
                    identifier,
                    error = %e,
                    "failed to post pong"
                );
            }
        });

        let subscription = self.bus.subscribe(&ping_name, handler)?;
        responders.insert(identifier.to_string(), subscription);
        Ok(())
    }
}

/// Transient state for one in-flight probe.
///
/// Exactly one of the pong branch and the timer branch moves `completed`
/// from false to true; the losing branch observes the flag and does nothing.
/// The callback slot is taken together with the flag, so the outcome is
/// delivered exactly once even if both branches fire back to back.
struct PendingProbe {
    bus: Arc<dyn SignalBus>,
    completed: AtomicBool,
    on_result: Mutex<Option<PingCallback>>,
    subscription: Mutex<Option<Subscription>>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl PendingProbe {
    fn new(bus: Arc<dyn SignalBus>, on_result: PingCallback) -> Self {
        Self {
            bus,
            completed: AtomicBool::new(false),
            on_result: Mutex::new(Some(on_result)),
            subscription: Mutex::new(None),
            timer: Mutex::new(None),
        }
    }

    /// First caller wins; later calls are no-ops.
    fn complete(&self, alive: bool) {
        if self.completed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.teardown();
        if let Some(on_result) = self.on_result.lock().take() {
            on_result(alive);
        }
    }

    /// Tear down without reporting an outcome. Only for probes that never
    /// launched (the ping post itself failed).
    fn cancel(&self) {
        if self.completed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.teardown();
        self.on_result.lock().take();
    }

    fn teardown(&self) {
        if let Some(subscription) = self.subscription.lock().take() {
            if let Err(e) = self.bus.unsubscribe(subscription) {
                warn!(
                    target: "wormhole::liveness",
                    error = %e,
                    "failed to drop pong subscription"
                );
            }
        }
        if let Some(timer) = self.timer.lock().take() {
            timer.abort();
        }
    }
}
