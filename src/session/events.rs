use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::presence::PresenceEntry;
use crate::store::{GeneratedCodes, Participant, Question, Submission};

/// Messages a client sends over its room socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    CreateRoom {
        token: String,
    },

    JoinRoom {
        token: String,
        room_code: String,
        password: String,
    },

    SubmitQuestion {
        token: String,
        room_code: String,
        question_text: String,
        #[serde(default)]
        language_hint: Option<String>,
    },

    SubmitCode {
        token: String,
        room_code: String,
        language: String,
        code: String,
        #[serde(default)]
        question_id: Option<String>,
    },

    RequestGenerate {
        token: String,
        room_code: String,
        language: String,
    },

    RequestAnalysis {
        token: String,
        room_code: String,
        submission_id: String,
    },

    EndRoom {
        token: String,
        room_code: String,
    },

    // Presence-only actions, scoped to the sender's current room.
    TypingStart {
        #[serde(default)]
        cursor_position: Option<u64>,
    },

    TypingPause,

    CursorMove {
        cursor_position: u64,
    },

    UserOnline,

    UserOffline,

    FileCreated {
        file: Value,
    },

    FileUpdated {
        file: Value,
    },

    FileRenamed {
        file: Value,
    },

    FileDeleted {
        id: String,
    },

    SyncFiles {
        files: Value,
        #[serde(default)]
        current_file: Value,
        connection_id: String,
    },

    SendMessage {
        message: Value,
    },

    RequestDrawing,

    SyncDrawing {
        drawing_data: Value,
        connection_id: String,
    },

    DrawingUpdate {
        snapshot: Value,
    },
}

/// Events the server delivers to connections.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    Connected {
        connection_id: String,
    },

    RoomCreated {
        room_code: String,
        password: String,
    },

    JoinAccepted {
        room_code: String,
        participants: Vec<Participant>,
        admin: String,
        questions: Vec<Question>,
        current_question_id: Option<String>,
        is_admin: bool,
    },

    UserJoined {
        username: String,
        connection_id: String,
    },

    UserDisconnected {
        user: PresenceEntry,
    },

    NewQuestion {
        question: Question,
        current_question_id: String,
    },

    /// Admin only; carries the candidate's code.
    SubmissionReceived {
        submission: Submission,
    },

    SubmissionAccepted {
        submission_id: String,
        question_id: String,
    },

    GenerationQueued {
        language: String,
        question_id: String,
    },

    GenerationComplete {
        language: String,
        question_id: String,
        generated_codes: GeneratedCodes,
    },

    GenerationFailed {
        language: String,
        question_id: String,
        error: String,
    },

    AnalysisComplete {
        submission_id: String,
        analysis: Value,
        cached: bool,
    },

    RoomClosed {
        message: String,
    },

    Error {
        message: String,
    },

    TypingStart {
        user: PresenceEntry,
    },

    TypingPause {
        user: PresenceEntry,
    },

    CursorMove {
        user: PresenceEntry,
    },

    UserOnline {
        connection_id: String,
    },

    UserOffline {
        connection_id: String,
    },

    FileCreated {
        file: Value,
    },

    FileUpdated {
        file: Value,
    },

    FileRenamed {
        file: Value,
    },

    FileDeleted {
        id: String,
    },

    SyncFiles {
        files: Value,
        current_file: Value,
    },

    ReceiveMessage {
        message: Value,
    },

    RequestDrawing {
        connection_id: String,
    },

    SyncDrawing {
        drawing_data: Value,
    },

    DrawingUpdate {
        snapshot: Value,
    },
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error {
            message: message.into(),
        }
    }
}
