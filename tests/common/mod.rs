#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use warp::ws::Message;

use interview_room::agent::{AnalyzeRequest, CodeAgent};
use interview_room::auth::{CredentialVerifier, UserIdentity};
use interview_room::error::{Result, SessionError};
use interview_room::session::{ClientMessage, RoomSessionController};
use interview_room::store::{GeneratedCodes, MemoryRoomStore, Room, RoomStore};

pub const ADMIN_TOKEN: &str = "admin-token";
pub const ALICE_TOKEN: &str = "alice-token";
pub const BOB_TOKEN: &str = "bob-token";

/// Token -> identity table standing in for the real JWT verifier.
pub struct StaticVerifier {
    users: HashMap<String, UserIdentity>,
}

impl StaticVerifier {
    pub fn new() -> Self {
        let users = [
            (ADMIN_TOKEN, "u-admin", "ada"),
            (ALICE_TOKEN, "u-alice", "alice"),
            (BOB_TOKEN, "u-bob", "bob"),
        ]
        .into_iter()
        .map(|(token, id, name)| {
            (
                token.to_string(),
                UserIdentity {
                    user_id: id.to_string(),
                    username: name.to_string(),
                },
            )
        })
        .collect();

        Self { users }
    }
}

#[async_trait]
impl CredentialVerifier for StaticVerifier {
    async fn verify(&self, token: &str) -> Option<UserIdentity> {
        self.users.get(token).cloned()
    }
}

/// Scripted code agent with call counters.
pub struct FakeAgent {
    pub generate_calls: AtomicUsize,
    pub analyze_calls: AtomicUsize,
    pub fail_generate: AtomicBool,
    pub delay: Duration,
}

impl FakeAgent {
    pub fn new() -> Self {
        Self {
            generate_calls: AtomicUsize::new(0),
            analyze_calls: AtomicUsize::new(0),
            fail_generate: AtomicBool::new(false),
            delay: Duration::from_millis(20),
        }
    }

    pub fn generate_calls(&self) -> usize {
        self.generate_calls.load(Ordering::SeqCst)
    }

    pub fn analyze_calls(&self) -> usize {
        self.analyze_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CodeAgent for FakeAgent {
    async fn generate(&self, question: &str, language: &str) -> Result<GeneratedCodes> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;

        if self.fail_generate.load(Ordering::SeqCst) {
            return Err(SessionError::upstream("No generated code returned from code agent"));
        }

        Ok([
            ("gemini".to_string(), format!("# gemini {} for {}", language, question)),
            ("chatgpt".to_string(), format!("# chatgpt {}", language)),
            ("claude".to_string(), format!("# claude {}", language)),
        ]
        .into())
    }

    async fn analyze(&self, request: &AnalyzeRequest) -> Result<Value> {
        self.analyze_calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;

        Ok(json!({
            "question": request.question,
            "user_code": request.user_code,
            "generated_codes": { "original": request.gemini_code },
            "similar_lines": { "original_vs_user": [] },
            "score": 0.5
        }))
    }

    async fn health(&self) -> bool {
        true
    }
}

/// A controller over an in-memory store, with fakes on both seams.
pub struct Harness {
    pub controller: Arc<RoomSessionController>,
    pub store: Arc<MemoryRoomStore>,
    pub agent: Arc<FakeAgent>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_agent(FakeAgent::new())
    }

    pub fn with_agent(agent: FakeAgent) -> Self {
        let store = Arc::new(MemoryRoomStore::new());
        let agent = Arc::new(agent);
        let controller = Arc::new(RoomSessionController::new(
            Arc::new(StaticVerifier::new()),
            store.clone(),
            agent.clone(),
            16,
        ));

        Self {
            controller,
            store,
            agent,
        }
    }

    /// Attach a channel-backed connection and swallow its `Connected` event.
    pub async fn connect(&self, connection_id: &str) -> TestClient {
        let (tx, rx) = mpsc::unbounded_channel();
        self.controller.connect(connection_id, tx).await;

        let mut client = TestClient {
            connection_id: connection_id.to_string(),
            rx,
            controller: self.controller.clone(),
        };
        client.expect("Connected").await;
        client
    }

    pub async fn room(&self, room_code: &str) -> Option<Room> {
        self.store.load(room_code).await.unwrap()
    }

    /// Admin connection `admin` creates a room; returns its code and password.
    pub async fn create_room(&self, admin: &mut TestClient) -> (String, String) {
        admin
            .send(ClientMessage::CreateRoom {
                token: ADMIN_TOKEN.to_string(),
            })
            .await;
        let created = admin.expect("RoomCreated").await;
        (
            created["room_code"].as_str().unwrap().to_string(),
            created["password"].as_str().unwrap().to_string(),
        )
    }

    pub async fn join(&self, client: &mut TestClient, token: &str, room_code: &str, password: &str) -> Value {
        client
            .send(ClientMessage::JoinRoom {
                token: token.to_string(),
                room_code: room_code.to_string(),
                password: password.to_string(),
            })
            .await;
        client.expect("JoinAccepted").await
    }

    pub async fn post_question(&self, admin: &mut TestClient, room_code: &str, text: &str) -> String {
        admin
            .send(ClientMessage::SubmitQuestion {
                token: ADMIN_TOKEN.to_string(),
                room_code: room_code.to_string(),
                question_text: text.to_string(),
                language_hint: None,
            })
            .await;
        let event = admin.expect("NewQuestion").await;
        event["current_question_id"].as_str().unwrap().to_string()
    }

    pub async fn submit_code(&self, client: &mut TestClient, token: &str, room_code: &str, language: &str) -> String {
        client
            .send(ClientMessage::SubmitCode {
                token: token.to_string(),
                room_code: room_code.to_string(),
                language: language.to_string(),
                code: "def solve(xs):\n    return xs[::-1]".to_string(),
                question_id: None,
            })
            .await;
        let ack = client.expect("SubmissionAccepted").await;
        ack["submission_id"].as_str().unwrap().to_string()
    }
}

/// Receiving end of one connection.
pub struct TestClient {
    pub connection_id: String,
    rx: mpsc::UnboundedReceiver<Message>,
    controller: Arc<RoomSessionController>,
}

impl TestClient {
    pub async fn send(&self, message: ClientMessage) {
        self.controller.handle_message(&self.connection_id, message).await;
    }

    /// Next frame, or `None` after a close frame or timeout.
    pub async fn next_frame(&mut self) -> Option<Message> {
        tokio::time::timeout(Duration::from_secs(2), self.rx.recv())
            .await
            .ok()
            .flatten()
    }

    /// Skip frames until an event of `kind` arrives.
    pub async fn expect(&mut self, kind: &str) -> Value {
        loop {
            let frame = self
                .next_frame()
                .await
                .unwrap_or_else(|| panic!("{}: no {} event", self.connection_id, kind));
            if frame.is_close() {
                panic!("{}: closed while waiting for {}", self.connection_id, kind);
            }
            let event: Value = serde_json::from_str(frame.to_str().unwrap()).unwrap();
            if event["type"] == kind {
                return event;
            }
        }
    }

    /// Everything already queued for this connection, without waiting.
    pub fn drain(&mut self) -> Vec<Value> {
        let mut events = Vec::new();
        while let Ok(frame) = self.rx.try_recv() {
            if let Ok(text) = frame.to_str() {
                events.push(serde_json::from_str(text).unwrap());
            } else if frame.is_close() {
                events.push(json!({ "type": "__close__" }));
            }
        }
        events
    }

    pub fn assert_none(&mut self, kind: &str) {
        let events = self.drain();
        assert!(
            events.iter().all(|e| e["type"] != kind),
            "{} unexpectedly received {}: {:?}",
            self.connection_id,
            kind,
            events
        );
    }
}

/// Poll `condition` until it holds or two seconds pass.
pub async fn wait_until<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if condition().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}
