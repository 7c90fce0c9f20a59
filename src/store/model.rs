use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::UserIdentity;
use crate::error::{Result, SessionError};

/// Unambiguous alphabet for shareable room codes (no 0/O, 1/I).
const ROOM_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const ROOM_CODE_LEN: usize = 6;

const PASSWORD_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const PASSWORD_LEN: usize = 8;

/// Generated code keyed by model name.
pub type GeneratedCodes = BTreeMap<String, String>;

#[derive(Debug, Clone, Serialize)]
pub struct Room {
    pub room_code: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub admin_id: String,
    pub participants: Vec<Participant>,
    pub questions: Vec<Question>,
    pub current_question_id: Option<String>,
    pub submissions: Vec<Submission>,
    pub generated_codes: Vec<GeneratedCodeEntry>,
    /// Bumped by every successful save.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Participant {
    pub user_id: String,
    pub username: String,
    pub connection_id: Option<String>,
    pub online: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Question {
    pub id: String,
    pub text: String,
    pub language_hint: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionStatus {
    Pending,
    Analyzed,
}

#[derive(Debug, Clone, Serialize)]
pub struct Submission {
    pub id: String,
    pub user_id: String,
    pub username: String,
    pub question_id: String,
    pub language: String,
    pub code: String,
    pub status: SubmissionStatus,
    pub analysis: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GeneratedCodeEntry {
    pub question_id: String,
    pub language: String,
    pub generated_codes: GeneratedCodes,
    pub generated_at: DateTime<Utc>,
}

/// Generate a random shareable room code
pub fn generate_room_code() -> String {
    random_string(ROOM_CODE_ALPHABET, ROOM_CODE_LEN)
}

/// Generate a random room password
pub fn generate_password() -> String {
    random_string(PASSWORD_ALPHABET, PASSWORD_LEN)
}

fn random_string(alphabet: &[u8], len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| alphabet[rng.gen_range(0..alphabet.len())] as char)
        .collect()
}

impl Room {
    /// A fresh room owned by `admin`, who is also its first participant.
    pub fn new(
        room_code: String,
        password: String,
        admin: &UserIdentity,
        connection_id: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            room_code,
            password,
            admin_id: admin.user_id.clone(),
            participants: vec![Participant {
                user_id: admin.user_id.clone(),
                username: admin.username.clone(),
                online: connection_id.is_some(),
                connection_id,
            }],
            questions: Vec::new(),
            current_question_id: None,
            submissions: Vec::new(),
            generated_codes: Vec::new(),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_admin(&self, user_id: &str) -> bool {
        self.admin_id == user_id
    }

    pub fn password_matches(&self, candidate: &str) -> bool {
        self.password == candidate
    }

    pub fn participant(&self, user_id: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.user_id == user_id)
    }

    /// Add `user` or refresh its existing row in place.
    /// Returns true when a new participant row was created.
    pub fn upsert_participant(&mut self, user: &UserIdentity, connection_id: &str) -> bool {
        if let Some(existing) = self.participants.iter_mut().find(|p| p.user_id == user.user_id) {
            existing.connection_id = Some(connection_id.to_string());
            existing.online = true;
            existing.username = user.username.clone();
            return false;
        }

        self.participants.push(Participant {
            user_id: user.user_id.clone(),
            username: user.username.clone(),
            connection_id: Some(connection_id.to_string()),
            online: true,
        });
        true
    }

    /// Mark offline whichever participant currently owns `connection_id`.
    /// A stale tab closing does not touch the row of a newer connection.
    pub fn mark_offline(&mut self, connection_id: &str) -> bool {
        match self
            .participants
            .iter_mut()
            .find(|p| p.connection_id.as_deref() == Some(connection_id))
        {
            Some(participant) => {
                participant.connection_id = None;
                participant.online = false;
                true
            }
            None => false,
        }
    }

    /// The admin's most recent live connection, resolved from the document.
    pub fn admin_connection(&self) -> Option<&str> {
        self.participant(&self.admin_id)
            .filter(|p| p.online)
            .and_then(|p| p.connection_id.as_deref())
    }

    /// Append a question and point the current-question reference at it.
    pub fn push_question(&mut self, question: Question) -> &Question {
        self.current_question_id = Some(question.id.clone());
        self.questions.push(question);
        &self.questions[self.questions.len() - 1]
    }

    pub fn question(&self, question_id: &str) -> Option<&Question> {
        self.questions.iter().find(|q| q.id == question_id)
    }

    pub fn current_question(&self) -> Option<&Question> {
        self.current_question_id
            .as_deref()
            .and_then(|id| self.question(id))
    }

    pub fn push_submission(&mut self, submission: Submission) -> &Submission {
        self.submissions.push(submission);
        &self.submissions[self.submissions.len() - 1]
    }

    pub fn submission(&self, submission_id: &str) -> Option<&Submission> {
        self.submissions.iter().find(|s| s.id == submission_id)
    }

    pub fn generated_for(&self, question_id: &str, language: &str) -> Option<&GeneratedCodeEntry> {
        self.generated_codes
            .iter()
            .find(|g| g.question_id == question_id && g.language == language)
    }

    /// Append a generated entry unless one already exists for its pair.
    /// Returns false when the entry was refused as a duplicate.
    pub fn record_generated(&mut self, entry: GeneratedCodeEntry) -> bool {
        if self.generated_for(&entry.question_id, &entry.language).is_some() {
            return false;
        }
        self.generated_codes.push(entry);
        true
    }

    /// Store an analysis on a pending submission. An already analyzed
    /// submission keeps its first report, which is returned unchanged.
    pub fn record_analysis(
        &mut self,
        submission_id: &str,
        analysis: serde_json::Value,
    ) -> Result<&Submission> {
        let submission = self
            .submissions
            .iter_mut()
            .find(|s| s.id == submission_id)
            .ok_or_else(|| SessionError::SubmissionNotFound(submission_id.to_string()))?;

        if submission.status == SubmissionStatus::Pending {
            submission.analysis = Some(analysis);
            submission.status = SubmissionStatus::Analyzed;
        }

        Ok(submission)
    }
}

impl Question {
    pub fn new(text: String, language_hint: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            text,
            language_hint,
            created_at: Utc::now(),
        }
    }
}

impl Submission {
    pub fn new(user: &UserIdentity, question_id: String, language: String, code: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user.user_id.clone(),
            username: user.username.clone(),
            question_id,
            language,
            code,
            status: SubmissionStatus::Pending,
            analysis: None,
            created_at: Utc::now(),
        }
    }
}

impl GeneratedCodeEntry {
    pub fn new(question_id: String, language: String, generated_codes: GeneratedCodes) -> Self {
        Self {
            question_id,
            language,
            generated_codes,
            generated_at: Utc::now(),
        }
    }
}
