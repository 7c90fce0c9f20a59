//! Durable room documents.
//!
//! The store contract is deliberately small: load a whole room by code,
//! create one atomically, replace one as a whole document, delete one.
//! Saves are versioned, so two writers that loaded the same document can
//! not silently overwrite each other; [`update_room`] turns that into a
//! reload-mutate-save loop.

mod model;

pub use model::{
    generate_password, generate_room_code, GeneratedCodeEntry, GeneratedCodes, Participant,
    Question, Room, Submission, SubmissionStatus,
};

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::error::{Result, SessionError};

/// How many times a mutation is re-run against a fresh document after a
/// version conflict before giving up.
pub const MAX_SAVE_ATTEMPTS: usize = 3;

#[async_trait]
pub trait RoomStore: Send + Sync {
    async fn load(&self, room_code: &str) -> Result<Option<Room>>;

    /// Insert a new room. Fails with `Conflict` if the code is taken.
    async fn create(&self, room: Room) -> Result<Room>;

    /// Replace the stored document. Fails with `Conflict` if the stored
    /// version moved on since `room` was loaded, `RoomNotFound` if the
    /// room was deleted meanwhile.
    async fn save(&self, room: &Room) -> Result<Room>;

    /// Returns whether a room was removed.
    async fn delete(&self, room_code: &str) -> Result<bool>;
}

/// Reload `room_code`, apply `mutate` and save, retrying on conflicts.
///
/// `mutate` always sees the latest stored document, so any invariant it
/// checks is re-checked right before the write.
pub async fn update_room<T, F>(store: &dyn RoomStore, room_code: &str, mut mutate: F) -> Result<(Room, T)>
where
    F: FnMut(&mut Room) -> Result<T> + Send,
    T: Send,
{
    let mut attempt = 0;
    loop {
        attempt += 1;

        let mut room = store
            .load(room_code)
            .await?
            .ok_or_else(|| SessionError::RoomNotFound(room_code.to_string()))?;

        let value = mutate(&mut room)?;

        match store.save(&room).await {
            Ok(saved) => return Ok((saved, value)),
            Err(SessionError::Conflict(reason)) if attempt < MAX_SAVE_ATTEMPTS => {
                tracing::debug!(
                    room_code = %room_code,
                    attempt = attempt,
                    reason = %reason,
                    "Room changed underneath us, retrying mutation"
                );
            }
            Err(e) => return Err(e),
        }
    }
}

/// Process-local store backing a single server instance.
pub struct MemoryRoomStore {
    rooms: Arc<RwLock<HashMap<String, Room>>>,
}

impl MemoryRoomStore {
    pub fn new() -> Self {
        Self {
            rooms: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for MemoryRoomStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RoomStore for MemoryRoomStore {
    async fn load(&self, room_code: &str) -> Result<Option<Room>> {
        let rooms = self.rooms.read().await;
        Ok(rooms.get(room_code).cloned())
    }

    async fn create(&self, mut room: Room) -> Result<Room> {
        let mut rooms = self.rooms.write().await;

        if rooms.contains_key(&room.room_code) {
            return Err(SessionError::Conflict(format!(
                "room code {} already in use",
                room.room_code
            )));
        }

        room.version = 1;
        rooms.insert(room.room_code.clone(), room.clone());
        Ok(room)
    }

    async fn save(&self, room: &Room) -> Result<Room> {
        let mut rooms = self.rooms.write().await;

        let stored = rooms
            .get_mut(&room.room_code)
            .ok_or_else(|| SessionError::RoomNotFound(room.room_code.clone()))?;

        if stored.version != room.version {
            return Err(SessionError::Conflict(format!(
                "room {} is at version {}, save was based on {}",
                room.room_code, stored.version, room.version
            )));
        }

        let mut next = room.clone();
        next.version += 1;
        next.updated_at = Utc::now();
        *stored = next.clone();
        Ok(next)
    }

    async fn delete(&self, room_code: &str) -> Result<bool> {
        let mut rooms = self.rooms.write().await;
        Ok(rooms.remove(room_code).is_some())
    }
}
