use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use warp::ws::Message;

use super::events::ServerEvent;
use super::presence::PresenceRegistry;
use crate::store::Room;

/// Outbound half of a socket, drained by its writer task.
pub type ConnectionSender = mpsc::UnboundedSender<Message>;

/// Delivers events to live connections: a whole room, a room minus the
/// sender, or exactly one connection.
///
/// Room membership comes from the presence registry at send time, and the
/// admin's connection from the room document, so reconnects are picked up
/// without any re-subscription.
pub struct Broadcaster {
    connections: Arc<RwLock<HashMap<String, ConnectionSender>>>,
    presence: Arc<PresenceRegistry>,
}

impl Broadcaster {
    pub fn new(presence: Arc<PresenceRegistry>) -> Self {
        Self {
            connections: Arc::new(RwLock::new(HashMap::new())),
            presence,
        }
    }

    pub async fn attach(&self, connection_id: &str, sender: ConnectionSender) {
        let mut connections = self.connections.write().await;
        connections.insert(connection_id.to_string(), sender);
    }

    pub async fn detach(&self, connection_id: &str) -> bool {
        let mut connections = self.connections.write().await;
        connections.remove(connection_id).is_some()
    }

    pub async fn is_attached(&self, connection_id: &str) -> bool {
        let connections = self.connections.read().await;
        connections.contains_key(connection_id)
    }

    /// Send to one connection. Returns whether it was delivered to a live
    /// outbound channel.
    pub async fn send_to(&self, connection_id: &str, event: &ServerEvent) -> bool {
        let Some(text) = encode(event) else {
            return false;
        };

        let connections = self.connections.read().await;
        deliver(&connections, connection_id, &text)
    }

    /// Send to the admin's current connection, if the admin is online.
    pub async fn send_to_admin(&self, room: &Room, event: &ServerEvent) -> bool {
        match room.admin_connection() {
            Some(connection_id) => self.send_to(connection_id, event).await,
            None => {
                tracing::debug!(room_code = %room.room_code, "Admin offline, event not delivered");
                false
            }
        }
    }

    /// Send to every connection registered in `room_code`.
    pub async fn broadcast_room(&self, room_code: &str, event: &ServerEvent) -> usize {
        self.broadcast(room_code, None, event).await
    }

    /// Send to every connection in `room_code` except `sender`.
    pub async fn broadcast_room_except(&self, room_code: &str, sender: &str, event: &ServerEvent) -> usize {
        self.broadcast(room_code, Some(sender), event).await
    }

    async fn broadcast(&self, room_code: &str, except: Option<&str>, event: &ServerEvent) -> usize {
        let Some(text) = encode(event) else {
            return 0;
        };

        let members = self.presence.list_by_room(room_code).await;
        let connections = self.connections.read().await;

        members
            .iter()
            .filter(|member| Some(member.connection_id.as_str()) != except)
            .filter(|member| deliver(&connections, &member.connection_id, &text))
            .count()
    }

    /// Ask the connection's writer to send a close frame and stop.
    pub async fn close(&self, connection_id: &str) {
        let sender = {
            let mut connections = self.connections.write().await;
            connections.remove(connection_id)
        };

        if let Some(sender) = sender {
            if sender.send(Message::close()).is_err() {
                tracing::debug!(connection_id = %connection_id, "Connection already gone");
            }
        }
    }
}

fn encode(event: &ServerEvent) -> Option<String> {
    match serde_json::to_string(event) {
        Ok(text) => Some(text),
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize server event");
            None
        }
    }
}

fn deliver(connections: &HashMap<String, ConnectionSender>, connection_id: &str, text: &str) -> bool {
    match connections.get(connection_id) {
        Some(sender) => match sender.send(Message::text(text)) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(connection_id = %connection_id, error = %e, "Failed to queue message");
                false
            }
        },
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::UserIdentity;

    fn user(id: &str) -> UserIdentity {
        UserIdentity {
            user_id: id.to_string(),
            username: id.to_string(),
        }
    }

    async fn setup() -> (Broadcaster, HashMap<&'static str, mpsc::UnboundedReceiver<Message>>) {
        let presence = Arc::new(PresenceRegistry::new());
        let broadcaster = Broadcaster::new(presence.clone());
        let mut receivers = HashMap::new();

        for (conn, room) in [("a", "ROOM22"), ("b", "ROOM22"), ("c", "ROOM33")] {
            let (tx, rx) = mpsc::unbounded_channel();
            broadcaster.attach(conn, tx).await;
            presence.register(conn, room, &user(conn)).await;
            receivers.insert(conn, rx);
        }

        (broadcaster, receivers)
    }

    fn event() -> ServerEvent {
        ServerEvent::RoomClosed {
            message: "bye".to_string(),
        }
    }

    #[tokio::test]
    async fn test_room_broadcast_stays_in_room() {
        let (broadcaster, mut rx) = setup().await;

        assert_eq!(broadcaster.broadcast_room("ROOM22", &event()).await, 2);
        assert!(rx.get_mut("a").unwrap().try_recv().is_ok());
        assert!(rx.get_mut("b").unwrap().try_recv().is_ok());
        assert!(rx.get_mut("c").unwrap().try_recv().is_err());
    }

    #[tokio::test]
    async fn test_broadcast_except_skips_sender() {
        let (broadcaster, mut rx) = setup().await;

        assert_eq!(broadcaster.broadcast_room_except("ROOM22", "a", &event()).await, 1);
        assert!(rx.get_mut("a").unwrap().try_recv().is_err());
        assert!(rx.get_mut("b").unwrap().try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_direct_send_and_close() {
        let (broadcaster, mut rx) = setup().await;

        assert!(broadcaster.send_to("c", &event()).await);
        let message = rx.get_mut("c").unwrap().try_recv().unwrap();
        assert!(message.to_str().unwrap().contains("RoomClosed"));

        broadcaster.close("c").await;
        assert!(rx.get_mut("c").unwrap().try_recv().unwrap().is_close());
        assert!(!broadcaster.is_attached("c").await);
        assert!(!broadcaster.send_to("c", &event()).await);
    }

    #[tokio::test]
    async fn test_send_to_admin_follows_room_document() {
        let (broadcaster, mut rx) = setup().await;
        let mut room = Room::new("ROOM22".into(), "pw".into(), &user("admin"), Some("a".into()));

        assert!(broadcaster.send_to_admin(&room, &event()).await);
        assert!(rx.get_mut("a").unwrap().try_recv().is_ok());

        room.upsert_participant(&user("admin"), "b");
        assert!(broadcaster.send_to_admin(&room, &event()).await);
        assert!(rx.get_mut("b").unwrap().try_recv().is_ok());
        assert!(rx.get_mut("a").unwrap().try_recv().is_err());
    }
}
