// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! # Wormhole
//!
//! Message passing and liveness checks between sandboxed processes that
//! share a storage area. A sender parks a payload in a shared slot and posts
//! a named signal; receiving processes fan the signal out to their locally
//! registered listeners. Ping/pong probes answer "is the other side
//! running?" by racing a reply signal against a timeout, with an
//! exactly-once outcome callback.

mod liveness;
mod registry;
mod wormhole;

pub mod bus;
pub mod store;

pub use liveness::DEFAULT_PING_TIMEOUT;
pub use registry::RawListener;
pub use wormhole::{Wormhole, WormholeBuilder};

// Re-exports from the collaborator seams for convenience
pub use bus::{
    BusError, DirectorySignalBus, ProcessSignalBus, SignalBus, SignalHandler, Subscription,
};
pub use store::{DirectoryStore, PayloadStore, StoreError};
