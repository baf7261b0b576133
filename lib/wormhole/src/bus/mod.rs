// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Signal bus seam: fire-and-forget named events across process boundaries.
//!
//! A signal carries no payload of its own. Senders park payloads in the
//! [`PayloadStore`](crate::store::PayloadStore) and post the slot's name here;
//! receivers subscribe by name and fetch the payload on delivery.

mod directory;
mod process;

pub use directory::DirectorySignalBus;
pub use process::ProcessSignalBus;

use std::sync::Arc;

/// Callback invoked for every post matching a subscription's name.
///
/// The handler receives the posted name. Liveness probing relies on this to
/// recover the probed identifier from a `Ping`-prefixed signal.
pub type SignalHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// Errors returned by individual [`SignalBus`] implementations.
#[derive(thiserror::Error, Debug)]
pub enum BusError {
    /// The subscription handle was not issued by this bus, or its entry is gone.
    #[error("unknown subscription {token} for signal '{name}'")]
    UnknownSubscription {
        /// Token carried by the rejected handle.
        token: u64,
        /// Signal name carried by the rejected handle.
        name: String,
    },

    /// The underlying signaling medium failed.
    #[error("signal I/O failed")]
    Io(#[from] std::io::Error),
}

/// Opaque handle for one live bus subscription.
///
/// Not cloneable, and [`SignalBus::unsubscribe`] consumes it, so each handle
/// is spent at most once by construction.
#[derive(Debug)]
pub struct Subscription {
    token: u64,
    name: String,
}

impl Subscription {
    /// Create a handle. Called by [`SignalBus`] implementations when a
    /// subscription is established; the token must be unique per bus.
    pub fn new(token: u64, name: impl Into<String>) -> Self {
        Self {
            token,
            name: name.into(),
        }
    }

    /// Bus-unique token identifying this subscription.
    pub fn token(&self) -> u64 {
        self.token
    }

    /// Signal name this subscription matches.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Machine-local publish/subscribe notification mechanism.
///
/// Contract for implementations:
/// - `post` broadcasts to all current subscribers of `name`, including those
///   in other processes when the medium spans processes. Delivery is
///   at-most-once per subscriber per post and is never replayed for late
///   subscribers. Posts of the same name reach a given subscriber in post
///   order; posts of different names are unordered relative to each other.
/// - `subscribe` registers `handler` to run on the bus's delivery context for
///   every future matching post.
/// - `unsubscribe` takes effect before it returns, though a delivery already
///   in flight on another thread may still complete.
pub trait SignalBus: Send + Sync {
    /// Broadcast `name` to all current subscribers.
    fn post(&self, name: &str) -> Result<(), BusError>;

    /// Register `handler` for every future post of `name`.
    fn subscribe(&self, name: &str, handler: SignalHandler) -> Result<Subscription, BusError>;

    /// Remove the subscription identified by `subscription`.
    fn unsubscribe(&self, subscription: Subscription) -> Result<(), BusError>;
}
