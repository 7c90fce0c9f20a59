use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;

use crate::auth::UserIdentity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
}

/// Ephemeral state of one live connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PresenceEntry {
    pub connection_id: String,
    pub room_code: String,
    pub user_id: String,
    pub username: String,
    pub typing: bool,
    pub cursor_position: u64,
    pub status: PresenceStatus,
}

/// Partial update applied by [`PresenceRegistry::update`].
#[derive(Debug, Clone, Default)]
pub struct PresencePatch {
    pub typing: Option<bool>,
    pub cursor_position: Option<u64>,
    pub status: Option<PresenceStatus>,
}

/// Connection id -> presence, for every live socket in this process.
///
/// Nothing here is persisted: after a restart the registry is empty and
/// clients rejoin. Duplicate tabs of one user get one entry each.
pub struct PresenceRegistry {
    entries: Arc<RwLock<HashMap<String, PresenceEntry>>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register (or move) a connection into a room. When the connection
    /// was in a different room, that room's entry is returned so the caller
    /// can run the leave path for it.
    pub async fn register(
        &self,
        connection_id: &str,
        room_code: &str,
        user: &UserIdentity,
    ) -> Option<PresenceEntry> {
        let entry = PresenceEntry {
            connection_id: connection_id.to_string(),
            room_code: room_code.to_string(),
            user_id: user.user_id.clone(),
            username: user.username.clone(),
            typing: false,
            cursor_position: 0,
            status: PresenceStatus::Online,
        };

        let mut entries = self.entries.write().await;
        let previous = entries
            .insert(connection_id.to_string(), entry)
            .filter(|previous| previous.room_code != room_code)?;

        tracing::info!(
            connection_id = %connection_id,
            from = %previous.room_code,
            to = %room_code,
            "Connection moved to another room"
        );
        Some(previous)
    }

    /// Apply `patch` and return the updated entry, if the connection is known.
    pub async fn update(&self, connection_id: &str, patch: PresencePatch) -> Option<PresenceEntry> {
        let mut entries = self.entries.write().await;
        let entry = entries.get_mut(connection_id)?;

        if let Some(typing) = patch.typing {
            entry.typing = typing;
        }
        if let Some(cursor_position) = patch.cursor_position {
            entry.cursor_position = cursor_position;
        }
        if let Some(status) = patch.status {
            entry.status = status;
        }

        Some(entry.clone())
    }

    pub async fn remove(&self, connection_id: &str) -> Option<PresenceEntry> {
        let mut entries = self.entries.write().await;
        entries.remove(connection_id)
    }

    /// Drop every entry of a room, returning what was removed.
    pub async fn remove_room(&self, room_code: &str) -> Vec<PresenceEntry> {
        let mut entries = self.entries.write().await;
        let connection_ids: Vec<String> = entries
            .values()
            .filter(|e| e.room_code == room_code)
            .map(|e| e.connection_id.clone())
            .collect();

        connection_ids
            .iter()
            .filter_map(|id| entries.remove(id))
            .collect()
    }

    pub async fn get(&self, connection_id: &str) -> Option<PresenceEntry> {
        let entries = self.entries.read().await;
        entries.get(connection_id).cloned()
    }

    pub async fn list_by_room(&self, room_code: &str) -> Vec<PresenceEntry> {
        let entries = self.entries.read().await;
        entries
            .values()
            .filter(|e| e.room_code == room_code)
            .cloned()
            .collect()
    }

    pub async fn room_of(&self, connection_id: &str) -> Option<String> {
        let entries = self.entries.read().await;
        entries.get(connection_id).map(|e| e.room_code.clone())
    }
}

impl Default for PresenceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: &str) -> UserIdentity {
        UserIdentity {
            user_id: id.to_string(),
            username: format!("user {}", id),
        }
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let registry = PresenceRegistry::new();
        registry.register("c1", "ROOM22", &user("u1")).await;

        assert_eq!(registry.room_of("c1").await.as_deref(), Some("ROOM22"));
        assert!(registry.room_of("c2").await.is_none());

        let entry = registry.get("c1").await.unwrap();
        assert_eq!(entry.status, PresenceStatus::Online);
        assert!(!entry.typing);
    }

    #[tokio::test]
    async fn test_duplicate_tabs_get_separate_entries() {
        let registry = PresenceRegistry::new();
        registry.register("tab-1", "ROOM22", &user("u1")).await;
        registry.register("tab-2", "ROOM22", &user("u1")).await;
        registry.register("other", "ROOM33", &user("u2")).await;

        assert_eq!(registry.list_by_room("ROOM22").await.len(), 2);
        assert_eq!(registry.list_by_room("ROOM33").await.len(), 1);
    }

    #[tokio::test]
    async fn test_update_applies_only_given_fields() {
        let registry = PresenceRegistry::new();
        registry.register("c1", "ROOM22", &user("u1")).await;

        let entry = registry
            .update(
                "c1",
                PresencePatch {
                    typing: Some(true),
                    cursor_position: Some(42),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(entry.typing);
        assert_eq!(entry.cursor_position, 42);

        let entry = registry
            .update(
                "c1",
                PresencePatch {
                    typing: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(!entry.typing);
        assert_eq!(entry.cursor_position, 42);

        assert!(registry.update("ghost", PresencePatch::default()).await.is_none());
    }

    #[tokio::test]
    async fn test_remove_and_remove_room() {
        let registry = PresenceRegistry::new();
        registry.register("c1", "ROOM22", &user("u1")).await;
        registry.register("c2", "ROOM22", &user("u2")).await;
        registry.register("c3", "ROOM33", &user("u3")).await;

        assert_eq!(registry.remove("c1").await.unwrap().user_id, "u1");
        assert!(registry.remove("c1").await.is_none());

        let removed = registry.remove_room("ROOM22").await;
        assert_eq!(removed.len(), 1);
        assert!(registry.list_by_room("ROOM22").await.is_empty());
        assert_eq!(registry.list_by_room("ROOM33").await.len(), 1);
    }

    #[tokio::test]
    async fn test_register_moves_connection_between_rooms() {
        let registry = PresenceRegistry::new();
        assert!(registry.register("c1", "ROOM22", &user("u1")).await.is_none());
        assert!(registry.register("c1", "ROOM22", &user("u1")).await.is_none());

        let left = registry.register("c1", "ROOM33", &user("u1")).await.unwrap();
        assert_eq!(left.room_code, "ROOM22");
        assert!(registry.list_by_room("ROOM22").await.is_empty());
        assert_eq!(registry.room_of("c1").await.as_deref(), Some("ROOM33"));
    }
}
