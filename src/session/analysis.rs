use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;

use crate::agent::{normalize_analysis, AnalyzeRequest, CodeAgent};
use crate::error::{Result, SessionError};
use crate::store::{update_room, RoomStore};

#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisOutcome {
    pub submission_id: String,
    pub analysis: Value,
    /// True when the stored report was returned without calling the agent.
    pub cached: bool,
}

/// Guard around the analyze RPC.
///
/// A submission is analyzed at most once: a stored report is always
/// returned as is, and concurrent requests for the same submission queue
/// up behind a per-submission lock so only the first reaches the agent.
pub struct AnalysisGate {
    store: Arc<dyn RoomStore>,
    agent: Arc<dyn CodeAgent>,
    in_flight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl AnalysisGate {
    pub fn new(store: Arc<dyn RoomStore>, agent: Arc<dyn CodeAgent>) -> Self {
        Self {
            store,
            agent,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub async fn analyze(&self, room_code: &str, submission_id: &str) -> Result<AnalysisOutcome> {
        let key = format!("{}/{}", room_code, submission_id);
        let lock = {
            let mut in_flight = self.in_flight.lock().await;
            in_flight.entry(key.clone()).or_default().clone()
        };

        let result = {
            let _guard = lock.lock().await;
            self.analyze_once(room_code, submission_id).await
        };

        let mut in_flight = self.in_flight.lock().await;
        drop(lock);
        // Clones are only handed out under the map lock, so a count of one
        // means nobody else is waiting on this submission.
        if in_flight.get(&key).is_some_and(|l| Arc::strong_count(l) == 1) {
            in_flight.remove(&key);
        }

        result
    }

    async fn analyze_once(&self, room_code: &str, submission_id: &str) -> Result<AnalysisOutcome> {
        let room = self
            .store
            .load(room_code)
            .await?
            .ok_or_else(|| SessionError::RoomNotFound(room_code.to_string()))?;

        let submission = room
            .submission(submission_id)
            .ok_or_else(|| SessionError::SubmissionNotFound(submission_id.to_string()))?;

        if let Some(analysis) = &submission.analysis {
            tracing::info!(room_code = %room_code, submission_id = %submission_id, "Returning cached analysis");
            return Ok(AnalysisOutcome {
                submission_id: submission_id.to_string(),
                analysis: analysis.clone(),
                cached: true,
            });
        }

        let generated = room
            .generated_for(&submission.question_id, &submission.language)
            .ok_or_else(|| {
                SessionError::NotReady(format!(
                    "reference solutions for {} are not generated yet",
                    submission.language
                ))
            })?;

        let question = room
            .question(&submission.question_id)
            .ok_or_else(|| SessionError::QuestionNotFound(submission.question_id.clone()))?;

        let request = AnalyzeRequest::new(
            &question.text,
            &submission.language,
            &submission.code,
            &generated.generated_codes,
        );

        tracing::info!(
            room_code = %room_code,
            submission_id = %submission_id,
            language = %submission.language,
            "Requesting submission analysis"
        );

        let mut report = self.agent.analyze(&request).await?;
        normalize_analysis(&mut report);

        let (_, analysis) = update_room(self.store.as_ref(), room_code, |room| {
            room.record_analysis(submission_id, report.clone())
                .map(|s| s.analysis.clone().unwrap_or(Value::Null))
        })
        .await?;

        tracing::info!(room_code = %room_code, submission_id = %submission_id, "Analysis stored");

        Ok(AnalysisOutcome {
            submission_id: submission_id.to_string(),
            analysis,
            cached: false,
        })
    }
}
