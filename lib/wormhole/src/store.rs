// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Durable payload slots in shared storage, one per identifier.

use std::io;
use std::io::Write as _;
use std::path::PathBuf;

use bytes::Bytes;

const SLOT_SUFFIX: &str = ".archive";

/// Errors returned by [`PayloadStore`] implementations.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    /// The slot could not be read or replaced.
    #[error("payload store I/O failed")]
    Io(#[from] io::Error),
}

/// Durable key-value byte store shared between the cooperating processes.
///
/// One payload occupies one slot per identifier; every write replaces the
/// slot wholesale and the last successful writer wins. Implementations do
/// not serialize concurrent writers beyond the atomicity of `write` itself.
pub trait PayloadStore: Send + Sync {
    /// Atomically replace-or-create the slot named by `identifier`.
    ///
    /// An error means nothing observable was written: a concurrent reader
    /// sees either the previous payload or the new one, never a torn slot.
    fn write(&self, identifier: &str, payload: &[u8]) -> Result<(), StoreError>;

    /// The most recently successfully written payload, or `None` if the slot
    /// was never written or was removed out of band.
    fn read(&self, identifier: &str) -> Result<Option<Bytes>, StoreError>;
}

/// [`PayloadStore`] keeping one `<identifier>.archive` file per slot inside
/// a root directory shared between the sandboxed processes.
///
/// The root is created lazily on first write (idempotent). Atomicity comes
/// from writing a temp file in the same directory and renaming it over the
/// slot.
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    /// Create a store rooted at `root`. Nothing touches the filesystem until
    /// the first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn slot_path(&self, identifier: &str) -> PathBuf {
        self.root.join(format!("{identifier}{SLOT_SUFFIX}"))
    }
}

impl PayloadStore for DirectoryStore {
    fn write(&self, identifier: &str, payload: &[u8]) -> Result<(), StoreError> {
        std::fs::create_dir_all(&self.root)?;

        let mut tmp = tempfile::NamedTempFile::new_in(&self.root)?;
        tmp.write_all(payload)?;
        tmp.persist(self.slot_path(identifier)).map_err(|e| e.error)?;
        Ok(())
    }

    fn read(&self, identifier: &str) -> Result<Option<Bytes>, StoreError> {
        match std::fs::read(self.slot_path(identifier)) {
            Ok(payload) => Ok(Some(Bytes::from(payload))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryStore::new(dir.path());

        store.write("greeting", b"hi").unwrap();
        let payload = store.read("greeting").unwrap().unwrap();
        assert_eq!(&payload[..], b"hi");
    }

    #[test]
    fn read_of_absent_slot_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryStore::new(dir.path());

        assert!(store.read("never-written").unwrap().is_none());
    }

    #[test]
    fn read_before_root_exists_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryStore::new(dir.path().join("not-yet-created"));

        assert!(store.read("greeting").unwrap().is_none());
    }

    #[test]
    fn last_write_wins() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryStore::new(dir.path());

        store.write("slot", b"first").unwrap();
        store.write("slot", b"second").unwrap();
        let payload = store.read("slot").unwrap().unwrap();
        assert_eq!(&payload[..], b"second");
    }

    #[test]
    fn root_created_lazily_on_first_write() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("nested").join("wormhole");
        let store = DirectoryStore::new(&root);

        assert!(!root.exists());
        store.write("slot", b"payload").unwrap();
        assert!(root.exists());

        // Idempotent when the directory already exists.
        store.write("slot", b"again").unwrap();
    }

    #[test]
    fn slot_file_uses_archive_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryStore::new(dir.path());

        store.write("chat", b"x").unwrap();
        assert!(dir.path().join("chat.archive").exists());
    }
}
