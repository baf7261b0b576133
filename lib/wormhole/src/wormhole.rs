// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Wormhole, the public composition of store, bus, fan-out and liveness.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use crate::bus::{DirectorySignalBus, SignalBus};
use crate::liveness::{DEFAULT_PING_TIMEOUT, Liveness};
use crate::registry::{ListenerRegistry, RawListener};
use crate::store::{DirectoryStore, PayloadStore};

/// Subdirectory used under the shared container when none is configured.
const DEFAULT_DIRECTORY: &str = "wormhole";

/// Messaging endpoint for one process.
///
/// Composes the payload store, the signal bus, the listener registry and the
/// liveness protocol behind the four public operations: send, listen/stop,
/// ping and reply-to-pings. Send is fire-and-forget; listening fans a single
/// cross-process signal out to every local listener; ping races a reply
/// against a timeout with an exactly-once outcome callback.
pub struct Wormhole {
    root: PathBuf,
    bus: Arc<dyn SignalBus>,
    store: Arc<dyn PayloadStore>,
    registry: ListenerRegistry,
    liveness: Liveness,
    verbose: bool,
}

/// Builder for [`Wormhole`] allowing incremental configuration.
pub struct WormholeBuilder {
    group: String,
    directory: String,
    container_root: Option<PathBuf>,
    bus: Option<Arc<dyn SignalBus>>,
    store: Option<Arc<dyn PayloadStore>>,
    verbose: bool,
}

impl WormholeBuilder {
    fn new(group: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            directory: DEFAULT_DIRECTORY.to_string(),
            container_root: None,
            bus: None,
            store: None,
            verbose: false,
        }
    }

    /// Subdirectory name inside the shared container. Defaults to
    /// `"wormhole"`; must be non-empty.
    pub fn directory(mut self, directory: impl Into<String>) -> Self {
        self.directory = directory.into();
        self
    }

    /// Filesystem location holding the application group's shared container.
    /// Defaults to the system temp directory.
    pub fn container_root(mut self, container_root: impl Into<PathBuf>) -> Self {
        self.container_root = Some(container_root.into());
        self
    }

    /// Signal bus adapter. Defaults to a [`DirectorySignalBus`] under the
    /// shared root.
    pub fn signal_bus(mut self, bus: Arc<dyn SignalBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Payload store adapter. Defaults to a [`DirectoryStore`] at the shared
    /// root.
    pub fn payload_store(mut self, store: Arc<dyn PayloadStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Emit per-operation diagnostics at debug level.
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Build the endpoint.
    ///
    /// # Panics
    /// If the application group identifier or the directory name is empty;
    /// both are contract preconditions.
    pub fn build(self) -> Result<Arc<Wormhole>> {
        assert!(
            !self.group.is_empty(),
            "application group identifier must be non-empty"
        );
        assert!(!self.directory.is_empty(), "directory name must be non-empty");

        let container_root = self.container_root.unwrap_or_else(std::env::temp_dir);
        let root = container_root.join(&self.group).join(&self.directory);

        let bus: Arc<dyn SignalBus> = match self.bus {
            Some(bus) => bus,
            None => DirectorySignalBus::new(root.join("signals")),
        };
        let store: Arc<dyn PayloadStore> = match self.store {
            Some(store) => store,
            None => Arc::new(DirectoryStore::new(root.clone())),
        };

        let runtime = tokio::runtime::Handle::try_current()
            .context("Wormhole must be built inside a tokio runtime")?;
        let tracker = TaskTracker::new();

        let registry = ListenerRegistry::new(Arc::clone(&bus), Arc::clone(&store));
        let liveness = Liveness::new(Arc::clone(&bus), runtime, tracker);

        Ok(Arc::new(Wormhole {
            root,
            bus,
            store,
            registry,
            liveness,
            verbose: self.verbose,
        }))
    }
}

impl Wormhole {
    /// Create a builder for an endpoint of the given application group.
    ///
    /// # Example
    /// ```ignore
    /// let endpoint = Wormhole::builder("group.com.example.app")
    ///     .directory("wormhole")
    ///     .build()?;
    /// endpoint.send_message("chat", &"hello")
    /// ```
    pub fn builder(group: impl Into<String>) -> WormholeBuilder {
        WormholeBuilder::new(group)
    }

    /// Shared-storage root this endpoint reads and writes.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Serialize `payload` and pass it on to [`send_raw_message`].
    ///
    /// [`send_raw_message`]: Wormhole::send_raw_message
    pub fn send_message<T: Serialize>(&self, identifier: &str, payload: &T) {
        assert!(!identifier.is_empty(), "identifier must be non-empty");

        let encoded = match serde_json::to_vec(payload) {
            Ok(encoded) => Bytes::from(encoded),
            Err(e) => {
                warn!(
                    target: "wormhole",
                    identifier,
                    error = %e,
                    "payload failed to encode, message dropped"
                );
                return;
            }
        };
        self.send_raw_message(identifier, encoded);
    }

    /// Place `payload` in the shared slot for `identifier`, then announce it
    /// on the bus.
    ///
    /// Best effort by design: a store failure drops the message with a log
    /// line and the signal is never posted, and a successful send only means
    /// the local write went through, never that a receiver consumed it.
    pub fn send_raw_message(&self, identifier: &str, payload: Bytes) {
        assert!(!identifier.is_empty(), "identifier must be non-empty");

        if self.verbose {
            debug!(
                target: "wormhole",
                identifier,
                bytes = payload.len(),
                "sending message"
            );
        }
        if let Err(e) = self.store.write(identifier, &payload) {
            warn!(
                target: "wormhole",
                identifier,
                error = %e,
                "payload write failed, message dropped"
            );
            return;
        }
        if let Err(e) = self.bus.post(identifier) {
            warn!(
                target: "wormhole",
                identifier,
                error = %e,
                "signal post failed, message not announced"
            );
        }
    }

    /// Register a typed listener for `identifier`.
    ///
    /// The stored payload is decoded for every delivery; payloads that fail
    /// to decode are skipped with a log line. Listeners for one identifier
    /// run in registration order.
    pub fn listen_for_messages<T, F>(&self, identifier: &str, listener: F) -> Result<()>
    where
        T: DeserializeOwned + Send + 'static,
        F: Fn(T) + Send + Sync + 'static,
    {
        let target_identifier = identifier.to_string();
        let raw: RawListener = Arc::new(move |payload: Bytes| {
            match serde_json::from_slice::<T>(&payload) {
                Ok(value) => listener(value),
                Err(e) => warn!(
                    target: "wormhole",
                    identifier = %target_identifier,
                    error = %e,
                    "stored payload failed to decode, skipping listener"
                ),
            }
        });
        self.listen_for_raw_messages(identifier, raw)
    }

    /// Register a listener receiving the stored payload bytes undecoded.
    pub fn listen_for_raw_messages(&self, identifier: &str, listener: RawListener) -> Result<()> {
        assert!(!identifier.is_empty(), "identifier must be non-empty");

        if self.verbose {
            debug!(target: "wormhole", identifier, "registering listener");
        }
        self.registry.listen(identifier, listener)
    }

    /// Remove the bus subscription for `identifier` and discard all of its
    /// listeners, however many were registered. Takes effect before
    /// returning; listening again afterwards starts fresh.
    pub fn stop_listening_for_messages(&self, identifier: &str) {
        assert!(!identifier.is_empty(), "identifier must be non-empty");

        if self.verbose {
            debug!(target: "wormhole", identifier, "removing all listeners");
        }
        self.registry.stop_listening(identifier)
    }

    /// [`ping_with_timeout`] with the default wait of
    /// [`DEFAULT_PING_TIMEOUT`](crate::DEFAULT_PING_TIMEOUT).
    ///
    /// [`ping_with_timeout`]: Wormhole::ping_with_timeout
    pub fn ping<F>(&self, identifier: &str, on_result: F) -> Result<()>
    where
        F: FnOnce(bool) + Send + 'static,
    {
        self.ping_with_timeout(identifier, DEFAULT_PING_TIMEOUT, on_result)
    }

    /// Probe whether some process replies to pings for `identifier`.
    ///
    /// `on_result` is invoked exactly once: with `true` as soon as a reply
    /// arrives, or with `false` once `timeout` elapses without one. A reply
    /// arriving after the timeout is ignored.
    pub fn ping_with_timeout<F>(
        &self,
        identifier: &str,
        timeout: Duration,
        on_result: F,
    ) -> Result<()>
    where
        F: FnOnce(bool) + Send + 'static,
    {
        assert!(!identifier.is_empty(), "identifier must be non-empty");

        if self.verbose {
            debug!(target: "wormhole", identifier, ?timeout, "probing liveness");
        }
        self.liveness.ping(identifier, timeout, Box::new(on_result))
    }

    /// Reply to liveness probes for `identifier`, for the rest of this
    /// endpoint's lifetime. Idempotent; there is no stop operation.
    pub fn reply_to_pings(&self, identifier: &str) -> Result<()> {
        assert!(!identifier.is_empty(), "identifier must be non-empty");

        if self.verbose {
            debug!(target: "wormhole", identifier, "offering liveness replies");
        }
        self.liveness.reply_to_pings(identifier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::ProcessSignalBus;

    #[tokio::test]
    async fn root_combines_container_group_and_directory() {
        let dir = tempfile::tempdir().unwrap();
        let endpoint = Wormhole::builder("group.test.app")
            .container_root(dir.path())
            .directory("burrow")
            .signal_bus(ProcessSignalBus::new())
            .build()
            .unwrap();

        assert_eq!(endpoint.root(), dir.path().join("group.test.app").join("burrow"));
    }

    #[tokio::test]
    #[should_panic(expected = "application group identifier must be non-empty")]
    async fn empty_group_is_a_precondition_violation() {
        let _ = Wormhole::builder("").build();
    }

    #[tokio::test]
    #[should_panic(expected = "directory name must be non-empty")]
    async fn empty_directory_is_a_precondition_violation() {
        let _ = Wormhole::builder("group.test.app").directory("").build();
    }

    #[tokio::test]
    #[should_panic(expected = "identifier must be non-empty")]
    async fn empty_identifier_on_send_is_a_precondition_violation() {
        let dir = tempfile::tempdir().unwrap();
        let endpoint = Wormhole::builder("group.test.app")
            .container_root(dir.path())
            .signal_bus(ProcessSignalBus::new())
            .build()
            .unwrap();
        endpoint.send_message("", &"payload");
    }

    #[tokio::test]
    async fn send_failure_is_swallowed_and_not_announced() {
        use crate::store::StoreError;

        /// Store double whose writes always fail.
        struct BrokenStore;
        impl PayloadStore for BrokenStore {
            fn write(&self, _identifier: &str, _payload: &[u8]) -> Result<(), StoreError> {
                Err(std::io::Error::other("disk on fire").into())
            }
            fn read(&self, _identifier: &str) -> Result<Option<Bytes>, StoreError> {
                Ok(None)
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let bus = ProcessSignalBus::new();
        let endpoint = Wormhole::builder("group.test.app")
            .container_root(dir.path())
            .signal_bus(Arc::clone(&bus) as Arc<dyn SignalBus>)
            .payload_store(Arc::new(BrokenStore))
            .build()
            .unwrap();

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let raw: RawListener = Arc::new(move |payload: Bytes| {
            let _ = tx.send(payload);
        });
        endpoint.listen_for_raw_messages("chat", raw).unwrap();

        // Write fails, so the signal must never be posted.
        endpoint.send_message("chat", &"hello");
        assert!(rx.try_recv().is_err());
    }
}
