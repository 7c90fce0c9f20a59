use std::sync::Arc;

use crate::agent::CodeAgent;
use crate::auth::{CredentialVerifier, UserIdentity};
use crate::error::{Result, SessionError};
use crate::generation::{GenerationJob, GenerationQueue};
use crate::store::{
    generate_password, generate_room_code, update_room, Question, Room, RoomStore, Submission,
};

use super::analysis::{AnalysisGate, AnalysisOutcome};
use super::broadcast::{Broadcaster, ConnectionSender};
use super::events::{ClientMessage, ServerEvent};
use super::presence::{PresenceEntry, PresencePatch, PresenceRegistry, PresenceStatus};

/// Attempts at finding an unused room code before giving up.
const MAX_ROOM_CODE_ATTEMPTS: usize = 5;

const ROOM_CLOSED_MESSAGE: &str = "Room has been closed by the admin";

/// Entry point for everything a connection asks of a room.
///
/// Each operation verifies the caller, reloads the room right before
/// mutating it, and answers through the [`Broadcaster`]. Failures are
/// reported to the calling connection only.
pub struct RoomSessionController {
    verifier: Arc<dyn CredentialVerifier>,
    store: Arc<dyn RoomStore>,
    presence: Arc<PresenceRegistry>,
    broadcaster: Arc<Broadcaster>,
    generation: GenerationQueue,
    analysis: AnalysisGate,
}

impl RoomSessionController {
    /// Wires the session components and starts the generation worker.
    pub fn new(
        verifier: Arc<dyn CredentialVerifier>,
        store: Arc<dyn RoomStore>,
        agent: Arc<dyn CodeAgent>,
        queue_capacity: usize,
    ) -> Self {
        let presence = Arc::new(PresenceRegistry::new());
        let broadcaster = Arc::new(Broadcaster::new(presence.clone()));
        let generation = GenerationQueue::start(
            store.clone(),
            agent.clone(),
            broadcaster.clone(),
            queue_capacity,
        );
        let analysis = AnalysisGate::new(store.clone(), agent);

        Self {
            verifier,
            store,
            presence,
            broadcaster,
            generation,
            analysis,
        }
    }

    pub fn store(&self) -> &Arc<dyn RoomStore> {
        &self.store
    }

    pub fn presence(&self) -> &Arc<PresenceRegistry> {
        &self.presence
    }

    pub fn generation(&self) -> &GenerationQueue {
        &self.generation
    }

    /// Attach a new socket and announce its connection id to it.
    pub async fn connect(&self, connection_id: &str, sender: ConnectionSender) {
        self.broadcaster.attach(connection_id, sender).await;
        self.broadcaster
            .send_to(
                connection_id,
                &ServerEvent::Connected {
                    connection_id: connection_id.to_string(),
                },
            )
            .await;

        tracing::info!(connection_id = %connection_id, "Connection attached");
    }

    /// Tear down a socket: presence first, then the durable participant row.
    pub async fn disconnect(&self, connection_id: &str) {
        self.broadcaster.detach(connection_id).await;

        let Some(entry) = self.presence.remove(connection_id).await else {
            tracing::info!(connection_id = %connection_id, "Connection closed outside a room");
            return;
        };

        self.leave_room(entry).await;
    }

    /// Announce that a connection left `entry`'s room and release its
    /// participant row there. The presence entry is already gone.
    async fn leave_room(&self, entry: PresenceEntry) {
        let room_code = entry.room_code.clone();
        let connection_id = entry.connection_id.clone();

        self.broadcaster
            .broadcast_room(&room_code, &ServerEvent::UserDisconnected { user: entry })
            .await;

        if let Err(e) = self.mark_offline(&room_code, &connection_id).await {
            tracing::warn!(
                room_code = %room_code,
                connection_id = %connection_id,
                error = %e,
                "Failed to mark participant offline"
            );
        }

        tracing::info!(room_code = %room_code, connection_id = %connection_id, "Connection left room");
    }

    /// Put the connection in `room_code`, leaving whichever room it was in.
    async fn enter_room(&self, connection_id: &str, room_code: &str, user: &UserIdentity) {
        if let Some(previous) = self.presence.register(connection_id, room_code, user).await {
            self.leave_room(previous).await;
        }
    }

    async fn mark_offline(&self, room_code: &str, connection_id: &str) -> Result<()> {
        let owned = self
            .store
            .load(room_code)
            .await?
            .map(|room| {
                room.participants
                    .iter()
                    .any(|p| p.connection_id.as_deref() == Some(connection_id))
            })
            .unwrap_or(false);

        // A stale tab or an ended room: nothing to write.
        if !owned {
            return Ok(());
        }

        update_room(self.store.as_ref(), room_code, |room| Ok(room.mark_offline(connection_id))).await?;
        Ok(())
    }

    /// Dispatch one inbound message. Any failure becomes a single error
    /// notice to the sender.
    pub async fn handle_message(&self, connection_id: &str, message: ClientMessage) {
        if let Err(e) = self.dispatch(connection_id, message).await {
            tracing::warn!(connection_id = %connection_id, error = %e, "Room operation failed");
            self.broadcaster
                .send_to(connection_id, &ServerEvent::error(e.client_message()))
                .await;
        }
    }

    /// Answer a frame that could not be parsed.
    pub async fn reject_malformed(&self, connection_id: &str, error: SessionError) {
        tracing::warn!(connection_id = %connection_id, error = %error, "Rejecting malformed message");
        self.broadcaster
            .send_to(connection_id, &ServerEvent::error(error.client_message()))
            .await;
    }

    async fn dispatch(&self, connection_id: &str, message: ClientMessage) -> Result<()> {
        match message {
            ClientMessage::CreateRoom { token } => {
                self.create_room(connection_id, &token).await?;
            }
            ClientMessage::JoinRoom {
                token,
                room_code,
                password,
            } => {
                self.join_room(connection_id, &token, &room_code, &password).await?;
            }
            ClientMessage::SubmitQuestion {
                token,
                room_code,
                question_text,
                language_hint,
            } => {
                self.submit_question(connection_id, &token, &room_code, &question_text, language_hint)
                    .await?;
            }
            ClientMessage::SubmitCode {
                token,
                room_code,
                language,
                code,
                question_id,
            } => {
                self.submit_code(connection_id, &token, &room_code, &language, &code, question_id)
                    .await?;
            }
            ClientMessage::RequestGenerate {
                token,
                room_code,
                language,
            } => {
                self.request_generate(connection_id, &token, &room_code, &language).await?;
            }
            ClientMessage::RequestAnalysis {
                token,
                room_code,
                submission_id,
            } => {
                self.request_analysis(connection_id, &token, &room_code, &submission_id)
                    .await?;
            }
            ClientMessage::EndRoom { token, room_code } => {
                self.end_room(connection_id, &token, &room_code).await?;
            }
            other => self.relay(connection_id, other).await,
        }

        Ok(())
    }

    async fn authenticate(&self, token: &str) -> Result<UserIdentity> {
        self.verifier
            .verify(token)
            .await
            .ok_or_else(|| SessionError::unauthorized("invalid or missing token"))
    }

    async fn load_room(&self, room_code: &str) -> Result<Room> {
        self.store
            .load(room_code)
            .await?
            .ok_or_else(|| SessionError::RoomNotFound(room_code.to_string()))
    }

    async fn load_room_as_admin(&self, room_code: &str, user: &UserIdentity) -> Result<Room> {
        let room = self.load_room(room_code).await?;
        if !room.is_admin(&user.user_id) {
            return Err(SessionError::forbidden("admin only"));
        }
        Ok(room)
    }

    /// Create a room owned by the caller. Returns (room code, password).
    pub async fn create_room(&self, connection_id: &str, token: &str) -> Result<(String, String)> {
        let user = self.authenticate(token).await?;

        let mut attempt = 0;
        let room = loop {
            attempt += 1;
            let room = Room::new(
                generate_room_code(),
                generate_password(),
                &user,
                Some(connection_id.to_string()),
            );

            match self.store.create(room).await {
                Ok(room) => break room,
                Err(SessionError::Conflict(reason)) if attempt < MAX_ROOM_CODE_ATTEMPTS => {
                    tracing::debug!(attempt = attempt, reason = %reason, "Room code taken, retrying");
                }
                Err(e) => return Err(e),
            }
        };

        self.enter_room(connection_id, &room.room_code, &user).await;

        tracing::info!(
            room_code = %room.room_code,
            admin_id = %user.user_id,
            connection_id = %connection_id,
            "Room created"
        );

        self.broadcaster
            .send_to(
                connection_id,
                &ServerEvent::RoomCreated {
                    room_code: room.room_code.clone(),
                    password: room.password.clone(),
                },
            )
            .await;

        Ok((room.room_code, room.password))
    }

    /// Join (or rejoin) a room with its password.
    pub async fn join_room(
        &self,
        connection_id: &str,
        token: &str,
        room_code: &str,
        password: &str,
    ) -> Result<Room> {
        let user = self.authenticate(token).await?;

        let (room, created) = update_room(self.store.as_ref(), room_code, |room| {
            if !room.password_matches(password) {
                return Err(SessionError::unauthorized("invalid room password"));
            }
            Ok(room.upsert_participant(&user, connection_id))
        })
        .await?;

        self.enter_room(connection_id, room_code, &user).await;

        tracing::info!(
            room_code = %room_code,
            user_id = %user.user_id,
            connection_id = %connection_id,
            rejoin = !created,
            "User joined room"
        );

        self.broadcaster
            .broadcast_room_except(
                room_code,
                connection_id,
                &ServerEvent::UserJoined {
                    username: user.username.clone(),
                    connection_id: connection_id.to_string(),
                },
            )
            .await;

        self.broadcaster
            .send_to(
                connection_id,
                &ServerEvent::JoinAccepted {
                    room_code: room.room_code.clone(),
                    participants: room.participants.clone(),
                    admin: room.admin_id.clone(),
                    questions: room.questions.clone(),
                    current_question_id: room.current_question_id.clone(),
                    is_admin: room.is_admin(&user.user_id),
                },
            )
            .await;

        Ok(room)
    }

    /// Post a question and make it the current one. Admin only.
    pub async fn submit_question(
        &self,
        connection_id: &str,
        token: &str,
        room_code: &str,
        text: &str,
        language_hint: Option<String>,
    ) -> Result<Question> {
        let user = self.authenticate(token).await?;

        let text = text.trim();
        if text.is_empty() {
            return Err(SessionError::InvalidMessage("question text is empty".to_string()));
        }

        let (_, question) = update_room(self.store.as_ref(), room_code, |room| {
            if !room.is_admin(&user.user_id) {
                return Err(SessionError::forbidden("admin only"));
            }
            Ok(room
                .push_question(Question::new(text.to_string(), language_hint.clone()))
                .clone())
        })
        .await?;

        tracing::info!(
            room_code = %room_code,
            question_id = %question.id,
            connection_id = %connection_id,
            "Question posted"
        );

        self.broadcaster
            .broadcast_room(
                room_code,
                &ServerEvent::NewQuestion {
                    current_question_id: question.id.clone(),
                    question: question.clone(),
                },
            )
            .await;

        Ok(question)
    }

    /// Store a candidate's code and hand it to the admin. Warms the
    /// reference cache for the pair when needed.
    pub async fn submit_code(
        &self,
        connection_id: &str,
        token: &str,
        room_code: &str,
        language: &str,
        code: &str,
        question_id: Option<String>,
    ) -> Result<Submission> {
        let user = self.authenticate(token).await?;

        let (room, submission) = update_room(self.store.as_ref(), room_code, |room| {
            if room.participant(&user.user_id).is_none() {
                return Err(SessionError::forbidden("not a participant of this room"));
            }

            let target = match &question_id {
                Some(id) => room
                    .question(id)
                    .map(|q| q.id.clone())
                    .ok_or_else(|| SessionError::QuestionNotFound(id.clone()))?,
                None => room
                    .current_question()
                    .map(|q| q.id.clone())
                    .ok_or_else(|| SessionError::QuestionNotFound("no current question".to_string()))?,
            };

            let submission = Submission::new(&user, target, language.to_string(), code.to_string());
            Ok(room.push_submission(submission).clone())
        })
        .await?;

        tracing::info!(
            room_code = %room_code,
            submission_id = %submission.id,
            question_id = %submission.question_id,
            language = %language,
            "Submission stored"
        );

        self.broadcaster
            .send_to_admin(
                &room,
                &ServerEvent::SubmissionReceived {
                    submission: submission.clone(),
                },
            )
            .await;

        self.broadcaster
            .send_to(
                connection_id,
                &ServerEvent::SubmissionAccepted {
                    submission_id: submission.id.clone(),
                    question_id: submission.question_id.clone(),
                },
            )
            .await;

        if room.generated_for(&submission.question_id, language).is_none() {
            let job = GenerationJob {
                room_code: room_code.to_string(),
                language: language.to_string(),
                question_id: submission.question_id.clone(),
            };
            // The submission is already stored; a full queue only delays the cache.
            if let Err(e) = self.generation.enqueue(job) {
                tracing::warn!(room_code = %room_code, error = %e, "Could not queue generation for submission");
            }
        }

        Ok(submission)
    }

    /// Queue generation for the current question. Admin only.
    pub async fn request_generate(
        &self,
        connection_id: &str,
        token: &str,
        room_code: &str,
        language: &str,
    ) -> Result<GenerationJob> {
        let user = self.authenticate(token).await?;
        let room = self.load_room_as_admin(room_code, &user).await?;

        let question_id = room
            .current_question_id
            .clone()
            .ok_or_else(|| SessionError::QuestionNotFound("no current question".to_string()))?;

        let job = GenerationJob {
            room_code: room_code.to_string(),
            language: language.to_string(),
            question_id,
        };
        self.generation.enqueue(job.clone())?;

        self.broadcaster
            .send_to(
                connection_id,
                &ServerEvent::GenerationQueued {
                    language: job.language.clone(),
                    question_id: job.question_id.clone(),
                },
            )
            .await;

        Ok(job)
    }

    /// Analyze a submission against the stored references. Admin only.
    pub async fn request_analysis(
        &self,
        connection_id: &str,
        token: &str,
        room_code: &str,
        submission_id: &str,
    ) -> Result<AnalysisOutcome> {
        let user = self.authenticate(token).await?;
        self.load_room_as_admin(room_code, &user).await?;

        let outcome = self.analysis.analyze(room_code, submission_id).await?;

        self.broadcaster
            .send_to(
                connection_id,
                &ServerEvent::AnalysisComplete {
                    submission_id: outcome.submission_id.clone(),
                    analysis: outcome.analysis.clone(),
                    cached: outcome.cached,
                },
            )
            .await;

        Ok(outcome)
    }

    /// Delete the room and drop every connection in it. Admin only.
    pub async fn end_room(&self, connection_id: &str, token: &str, room_code: &str) -> Result<()> {
        let user = self.authenticate(token).await?;
        self.load_room_as_admin(room_code, &user).await?;

        if !self.store.delete(room_code).await? {
            return Err(SessionError::RoomNotFound(room_code.to_string()));
        }

        self.broadcaster
            .broadcast_room(
                room_code,
                &ServerEvent::RoomClosed {
                    message: ROOM_CLOSED_MESSAGE.to_string(),
                },
            )
            .await;

        let members = self.presence.remove_room(room_code).await;
        for member in &members {
            self.broadcaster.close(&member.connection_id).await;
        }

        tracing::info!(
            room_code = %room_code,
            connection_id = %connection_id,
            closed_connections = members.len(),
            "Room ended"
        );

        Ok(())
    }

    /// Forward a presence-only action within the sender's room.
    async fn relay(&self, connection_id: &str, message: ClientMessage) {
        let Some(room_code) = self.presence.room_of(connection_id).await else {
            tracing::debug!(connection_id = %connection_id, "Dropping presence action outside a room");
            return;
        };

        let event = match message {
            ClientMessage::TypingStart { cursor_position } => {
                let patch = PresencePatch {
                    typing: Some(true),
                    cursor_position,
                    ..Default::default()
                };
                match self.presence.update(connection_id, patch).await {
                    Some(user) => ServerEvent::TypingStart { user },
                    None => return,
                }
            }
            ClientMessage::TypingPause => {
                let patch = PresencePatch {
                    typing: Some(false),
                    ..Default::default()
                };
                match self.presence.update(connection_id, patch).await {
                    Some(user) => ServerEvent::TypingPause { user },
                    None => return,
                }
            }
            ClientMessage::CursorMove { cursor_position } => {
                let patch = PresencePatch {
                    cursor_position: Some(cursor_position),
                    ..Default::default()
                };
                match self.presence.update(connection_id, patch).await {
                    Some(user) => ServerEvent::CursorMove { user },
                    None => return,
                }
            }
            ClientMessage::UserOnline => {
                self.set_status(connection_id, PresenceStatus::Online).await;
                ServerEvent::UserOnline {
                    connection_id: connection_id.to_string(),
                }
            }
            ClientMessage::UserOffline => {
                self.set_status(connection_id, PresenceStatus::Offline).await;
                ServerEvent::UserOffline {
                    connection_id: connection_id.to_string(),
                }
            }
            ClientMessage::FileCreated { file } => ServerEvent::FileCreated { file },
            ClientMessage::FileUpdated { file } => ServerEvent::FileUpdated { file },
            ClientMessage::FileRenamed { file } => ServerEvent::FileRenamed { file },
            ClientMessage::FileDeleted { id } => ServerEvent::FileDeleted { id },
            ClientMessage::SendMessage { message } => ServerEvent::ReceiveMessage { message },
            ClientMessage::DrawingUpdate { snapshot } => ServerEvent::DrawingUpdate { snapshot },
            ClientMessage::RequestDrawing => ServerEvent::RequestDrawing {
                connection_id: connection_id.to_string(),
            },
            ClientMessage::SyncFiles {
                files,
                current_file,
                connection_id: target,
            } => {
                self.send_within_room(&room_code, &target, ServerEvent::SyncFiles { files, current_file })
                    .await;
                return;
            }
            ClientMessage::SyncDrawing {
                drawing_data,
                connection_id: target,
            } => {
                self.send_within_room(&room_code, &target, ServerEvent::SyncDrawing { drawing_data })
                    .await;
                return;
            }
            other => {
                tracing::warn!(connection_id = %connection_id, message = ?other, "Unexpected relay message");
                return;
            }
        };

        self.broadcaster
            .broadcast_room_except(&room_code, connection_id, &event)
            .await;
    }

    async fn set_status(&self, connection_id: &str, status: PresenceStatus) {
        let patch = PresencePatch {
            status: Some(status),
            ..Default::default()
        };
        self.presence.update(connection_id, patch).await;
    }

    /// Direct relay, only to a connection in the same room as the sender.
    async fn send_within_room(&self, room_code: &str, target: &str, event: ServerEvent) {
        if self.presence.room_of(target).await.as_deref() != Some(room_code) {
            tracing::debug!(room_code = %room_code, target = %target, "Relay target is not in the room");
            return;
        }
        self.broadcaster.send_to(target, &event).await;
    }
}
