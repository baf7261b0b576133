// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Shared-directory signal bus.

use std::collections::HashMap;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::warn;

use super::{BusError, SignalBus, SignalHandler, Subscription};

const SIGNAL_SUFFIX: &str = ".signal";
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// [`SignalBus`] over a directory shared between sandboxed processes.
///
/// A post bumps the counter file `<name>.signal` (atomic replace, so readers
/// never see a torn value); every bus instance watching the same directory
/// observes the change on its next poll and invokes its local subscribers.
/// Handlers run on the bus's background poll task.
///
/// Rapid successive posts of one name may coalesce into a single delivery,
/// and concurrent posters may lose counter bumps to each other; both stay
/// within the at-most-once contract. Pre-existing counters are taken as the
/// baseline when watching starts, so late subscribers never see old posts.
pub struct DirectorySignalBus {
    signals_dir: PathBuf,
    subscribers: Arc<DashMap<String, Vec<(u64, SignalHandler)>>>,
    next_token: AtomicU64,
    watcher_started: Mutex<bool>,
}

impl DirectorySignalBus {
    /// Create a bus signaling through `signals_dir`. The directory is created
    /// lazily on first post; the poll task starts on first subscribe and
    /// requires a tokio runtime on the calling thread.
    pub fn new(signals_dir: impl Into<PathBuf>) -> Arc<Self> {
        Arc::new(Self {
            signals_dir: signals_dir.into(),
            subscribers: Arc::new(DashMap::new()),
            next_token: AtomicU64::new(0),
            watcher_started: Mutex::new(false),
        })
    }

    fn signal_file(&self, name: &str) -> PathBuf {
        self.signals_dir.join(format!("{name}{SIGNAL_SUFFIX}"))
    }

    fn ensure_watcher_started(&self) {
        let mut started = self.watcher_started.lock();
        if *started {
            return;
        }
        *started = true;
        drop(started);

        self.start_watcher();
    }

    fn start_watcher(&self) {
        let signals_dir = self.signals_dir.clone();
        let subscribers = Arc::downgrade(&self.subscribers);

        tokio::spawn(async move {
            // Baseline scan: counters that already exist are not deliveries.
            let mut known = scan_counters(&signals_dir);

            loop {
                tokio::time::sleep(POLL_INTERVAL).await;

                let Some(subscribers) = Weak::upgrade(&subscribers) else {
                    break; // bus dropped
                };

                let current = scan_counters(&signals_dir);
                for (name, counter) in &current {
                    if known.get(name) == Some(counter) {
                        continue;
                    }
                    let handlers: Vec<SignalHandler> = match subscribers.get(name) {
                        Some(entry) => entry.iter().map(|(_, h)| Arc::clone(h)).collect(),
                        None => continue,
                    };
                    for handler in handlers {
                        handler(name);
                    }
                }
                known = current;
            }
        });
    }
}

impl SignalBus for DirectorySignalBus {
    fn post(&self, name: &str) -> Result<(), BusError> {
        std::fs::create_dir_all(&self.signals_dir)?;

        let path = self.signal_file(name);
        let next = read_counter(&path).unwrap_or(0) + 1;

        let mut tmp = tempfile::NamedTempFile::new_in(&self.signals_dir)?;
        tmp.write_all(next.to_string().as_bytes())?;
        tmp.persist(&path).map_err(|e| e.error)?;
        Ok(())
    }

    fn subscribe(&self, name: &str, handler: SignalHandler) -> Result<Subscription, BusError> {
        self.ensure_watcher_started();

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

fn scan_counters(signals_dir: &Path) -> HashMap<String, u64> {
    let mut counters = HashMap::new();
    let Ok(entries) = std::fs::read_dir(signals_dir) else {
        return counters;
    };
    for entry in entries.flatten() {
        let Ok(file_name) = entry.file_name().into_string() else {
            continue;
        };
        let Some(name) = file_name.strip_suffix(SIGNAL_SUFFIX) else {
            continue;
        };
        match read_counter(&entry.path()) {
            Some(counter) => {
                counters.insert(name.to_string(), counter);
            }
            None => warn!(
                target: "wormhole::bus",
                name,
                "unreadable signal counter, skipping"
            ),
        }
    }
    counters
}

fn read_counter(path: &Path) -> Option<u64> {
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    const RECV_TIMEOUT: Duration = Duration::from_secs(2);

    fn channel_handler(tx: mpsc::UnboundedSender<String>) -> SignalHandler {
        Arc::new(move |name| {
            let _ = tx.send(name.to_string());
        })
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn post_crosses_bus_instances() {
        let dir = tempfile::tempdir().unwrap();
        let poster = DirectorySignalBus::new(dir.path());
        let watcher = DirectorySignalBus::new(dir.path());

        let (tx, mut rx) = mpsc::unbounded_channel();
        watcher.subscribe("chan", channel_handler(tx)).unwrap();

        // Let the watcher take its baseline before the post.
        tokio::time::sleep(Duration::from_millis(100)).await;
        poster.post("chan").unwrap();

        let name = tokio::time::timeout(RECV_TIMEOUT, rx.recv())
            .await
            .expect("delivery within timeout")
            .unwrap();
        assert_eq!(name, "chan");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn no_replay_of_posts_before_subscribe() {
        let dir = tempfile::tempdir().unwrap();
        let poster = DirectorySignalBus::new(dir.path());
        poster.post("chan").unwrap();

        let watcher = DirectorySignalBus::new(dir.path());
        let (tx, mut rx) = mpsc::unbounded_channel();
        watcher.subscribe("chan", channel_handler(tx)).unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(rx.try_recv().is_err(), "old post must not be replayed");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn unsubscribe_stops_delivery() {
        let dir = tempfile::tempdir().unwrap();
        let poster = DirectorySignalBus::new(dir.path());
        let watcher = DirectorySignalBus::new(dir.path());

        let (tx, mut rx) = mpsc::unbounded_channel();
        let sub = watcher.subscribe("chan", channel_handler(tx)).unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        poster.post("chan").unwrap();
        tokio::time::timeout(RECV_TIMEOUT, rx.recv())
            .await
            .expect("first delivery")
            .unwrap();

        watcher.unsubscribe(sub).unwrap();
        poster.post("chan").unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(rx.try_recv().is_err(), "no delivery after unsubscribe");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn same_name_posts_coalesce_at_most() {
        let dir = tempfile::tempdir().unwrap();
        let poster = DirectorySignalBus::new(dir.path());
        let watcher = DirectorySignalBus::new(dir.path());

        let (tx, mut rx) = mpsc::unbounded_channel();
        watcher.subscribe("burst", channel_handler(tx)).unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        for _ in 0..5 {
            poster.post("burst").unwrap();
        }

        // At least one delivery, never more than the posts.
        tokio::time::timeout(RECV_TIMEOUT, rx.recv())
            .await
            .expect("at least one delivery")
            .unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        let mut extra = 0;
        while rx.try_recv().is_ok() {
            extra += 1;
        }
        assert!(extra < 5, "at-most-once per post, got {} extra", extra);
    }
}
