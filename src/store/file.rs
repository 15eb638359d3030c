//! Durable JSON-file store.
//!
//! Each room lives in `rooms/<hash>.json` under the store directory. A room
//! file has two lines: the hex xxh64 hash of the second line, then the
//! room's data as JSON. Writes are buffered in memory and reach disk on
//! [`Store::commit`], one atomic rename per room.

use super::memory::RoomData;
use super::{MemoryStore, ReceiptData, Store};
use crate::error::StoreError;
use crate::event::{Direction, Event};
use fs2::FileExt;
use log::{debug, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Compute xxh64 of raw bytes, hex-encoded.
pub(crate) fn line_hash(line: &[u8]) -> String {
    let hash = xxhash_rust::xxh64::xxh64(line, 0);
    format!("{:016x}", hash)
}

#[derive(Serialize, Deserialize)]
struct RoomFile {
    room_id: String,
    data: RoomData,
}

#[derive(Clone, Default)]
struct Pending {
    dirty: BTreeSet<String>,
    removed: BTreeSet<String>,
    wipe: bool,
}

/// A [`Store`] persisted as one JSON file per room.
///
/// The directory is locked exclusively for as long as the store is open, so
/// only one process writes a given store.
pub struct FileStore {
    rooms_dir: PathBuf,
    lock_path: PathBuf,
    _lock: File,
    cache: MemoryStore,
    pending: Mutex<Pending>,
}

impl std::fmt::Debug for FileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStore")
            .field("rooms_dir", &self.rooms_dir)
            .finish()
    }
}

impl FileStore {
    /// Open or create a store in `dir`.
    ///
    /// Room files that fail their integrity hash or do not parse are
    /// skipped with a warning; the room starts empty.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Locked`] if another `FileStore` holds the
    /// directory, or an I/O error if it cannot be created or read.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref();
        let rooms_dir = dir.join("rooms");
        fs::create_dir_all(&rooms_dir)?;

        let lock_path = dir.join("store.lock");
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)?;
        if let Err(e) = lock.try_lock_exclusive() {
            if e.kind() == fs2::lock_contended_error().kind() {
                return Err(StoreError::Locked(lock_path));
            }
            return Err(e.into());
        }

        let mut rooms = HashMap::new();
        for entry in fs::read_dir(&rooms_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match load_room(&path)? {
                Some(file) => {
                    rooms.insert(file.room_id, file.data);
                }
                None => warn!("skipping unreadable room file {}", path.display()),
            }
        }
        debug!("opened store with {} rooms", rooms.len());

        Ok(FileStore {
            rooms_dir,
            lock_path,
            _lock: lock,
            cache: MemoryStore::from_rooms(rooms),
            pending: Mutex::new(Pending::default()),
        })
    }

    /// Path of the lock file guarding this store.
    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    fn room_path(&self, room_id: &str) -> PathBuf {
        self.rooms_dir
            .join(format!("{}.json", line_hash(room_id.as_bytes())))
    }

    fn touch(&self, room_id: &str) {
        let mut pending = self.pending.lock();
        pending.removed.remove(room_id);
        pending.dirty.insert(room_id.to_string());
    }
}

/// Read a room file, verifying its hash.
///
/// Returns `Ok(None)` on a hash mismatch or parse failure.
fn load_room(path: &Path) -> io::Result<Option<RoomFile>> {
    let contents = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    let Some((hash, json)) = contents.split_once('\n') else {
        return Ok(None);
    };
    let json = json.trim_end_matches('\n');
    if line_hash(json.as_bytes()) != hash {
        return Ok(None);
    }
    Ok(serde_json::from_str(json).ok())
}

/// Write a room file atomically: `.tmp` first, sync, then rename.
fn save_room(path: &Path, file: &RoomFile) -> Result<(), StoreError> {
    let tmp_path = path.with_extension("json.tmp");
    let json = serde_json::to_string(file)?;

    let mut out = File::create(&tmp_path)?;
    writeln!(out, "{}", line_hash(json.as_bytes()))?;
    writeln!(out, "{json}")?;
    out.sync_data()?;
    drop(out);

    fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Delete a room file and its `.tmp` sibling. Idempotent.
fn remove_room(path: &Path) -> io::Result<()> {
    for p in [path.to_path_buf(), path.with_extension("json.tmp")] {
        match fs::remove_file(&p) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

impl Store for FileStore {
    fn event_exists(&self, room_id: &str, event_id: &str) -> Result<bool, StoreError> {
        self.cache.event_exists(room_id, event_id)
    }

    fn store_event(
        &self,
        room_id: &str,
        event: &Event,
        direction: Direction,
    ) -> Result<(), StoreError> {
        self.touch(room_id);
        self.cache.store_event(room_id, event, direction)
    }

    fn event(&self, room_id: &str, event_id: &str) -> Result<Option<Event>, StoreError> {
        self.cache.event(room_id, event_id)
    }

    fn replace_event(&self, room_id: &str, event: &Event) -> Result<(), StoreError> {
        self.touch(room_id);
        self.cache.replace_event(room_id, event)
    }

    fn messages(&self, room_id: &str) -> Result<Vec<Event>, StoreError> {
        self.cache.messages(room_id)
    }

    fn store_state(&self, room_id: &str, state: &[Event]) -> Result<(), StoreError> {
        self.touch(room_id);
        self.cache.store_state(room_id, state)
    }

    fn state(&self, room_id: &str) -> Result<Option<Vec<Event>>, StoreError> {
        self.cache.state(room_id)
    }

    fn store_pagination_token(
        &self,
        room_id: &str,
        token: Option<String>,
    ) -> Result<(), StoreError> {
        self.touch(room_id);
        self.cache.store_pagination_token(room_id, token)
    }

    fn pagination_token(&self, room_id: &str) -> Result<Option<String>, StoreError> {
        self.cache.pagination_token(room_id)
    }

    fn reset_pagination(&self, room_id: &str) -> Result<(), StoreError> {
        self.cache.reset_pagination(room_id)
    }

    fn next_messages_for_pagination(
        &self,
        room_id: &str,
        count: usize,
    ) -> Result<Vec<Event>, StoreError> {
        self.cache.next_messages_for_pagination(room_id, count)
    }

    fn remaining_messages_for_pagination(&self, room_id: &str) -> Result<usize, StoreError> {
        self.cache.remaining_messages_for_pagination(room_id)
    }

    fn has_reached_server_pagination_end(&self, room_id: &str) -> Result<bool, StoreError> {
        self.cache.has_reached_server_pagination_end(room_id)
    }

    fn set_reached_server_pagination_end(
        &self,
        room_id: &str,
        reached: bool,
    ) -> Result<(), StoreError> {
        self.touch(room_id);
        self.cache.set_reached_server_pagination_end(room_id, reached)
    }

    fn delete_all_messages(&self, room_id: &str) -> Result<(), StoreError> {
        self.touch(room_id);
        self.cache.delete_all_messages(room_id)
    }

    fn delete_room(&self, room_id: &str) -> Result<(), StoreError> {
        {
            let mut pending = self.pending.lock();
            pending.dirty.remove(room_id);
            pending.removed.insert(room_id.to_string());
        }
        self.cache.delete_room(room_id)
    }

    fn delete_all_data(&self) -> Result<(), StoreError> {
        {
            let mut pending = self.pending.lock();
            pending.dirty.clear();
            pending.removed.clear();
            pending.wipe = true;
        }
        self.cache.delete_all_data()
    }

    fn store_receipt(&self, room_id: &str, receipt: &ReceiptData) -> Result<bool, StoreError> {
        let stored = self.cache.store_receipt(room_id, receipt)?;
        if stored {
            self.touch(room_id);
        }
        Ok(stored)
    }

    fn receipt(&self, room_id: &str, user_id: &str) -> Result<Option<ReceiptData>, StoreError> {
        self.cache.receipt(room_id, user_id)
    }

    /// Write every pending change to disk.
    ///
    /// A change leaves the pending set only once it is on disk, so after an
    /// error the next `commit` retries whatever was not written.
    fn commit(&self) -> Result<(), StoreError> {
        let Pending {
            dirty,
            removed,
            wipe,
        } = self.pending.lock().clone();

        if wipe {
            for entry in fs::read_dir(&self.rooms_dir)? {
                let path = entry?.path();
                if path.extension().and_then(|e| e.to_str()) == Some("json") {
                    remove_room(&path)?;
                }
            }
            self.pending.lock().wipe = false;
        }
        for room_id in &removed {
            remove_room(&self.room_path(room_id))?;
            self.pending.lock().removed.remove(room_id);
        }
        for room_id in &dirty {
            if let Some(data) = self.cache.room_data(room_id) {
                let file = RoomFile {
                    room_id: room_id.clone(),
                    data,
                };
                save_room(&self.room_path(room_id), &file)?;
            }
            self.pending.lock().dirty.remove(room_id);
        }
        debug!(
            "committed {} rooms, removed {}",
            dirty.len(),
            removed.len()
        );
        Ok(())
    }
}
