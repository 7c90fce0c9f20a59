use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::agent::CodeAgent;
use crate::error::{Result, SessionError};
use crate::session::{Broadcaster, ServerEvent};
use crate::store::{update_room, GeneratedCodeEntry, RoomStore};

/// One request to produce reference solutions for a (question, language)
/// pair of a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationJob {
    pub room_code: String,
    pub language: String,
    pub question_id: String,
}

/// What the worker did with a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// A new entry was stored and the admin notified.
    Completed,
    /// Nothing to do: the pair was already generated or the room is gone.
    Skipped(&'static str),
    /// The admin was sent a failure notice.
    Failed(String),
}

/// Snapshot of the worker counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub enqueued: u64,
    pub completed: u64,
    pub skipped: u64,
    pub failed: u64,
}

impl QueueStats {
    /// Jobs accepted but not yet finished.
    pub fn pending(&self) -> u64 {
        self.enqueued
            .saturating_sub(self.completed + self.skipped + self.failed)
    }
}

#[derive(Default)]
struct Counters {
    enqueued: AtomicU64,
    completed: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
}

impl Counters {
    fn record(&self, outcome: &JobOutcome) {
        let counter = match outcome {
            JobOutcome::Completed => &self.completed,
            JobOutcome::Skipped(_) => &self.skipped,
            JobOutcome::Failed(_) => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

struct Worker {
    store: Arc<dyn RoomStore>,
    agent: Arc<dyn CodeAgent>,
    broadcaster: Arc<Broadcaster>,
}

/// Handle to the generation queue
///
/// Jobs go through a bounded FIFO channel to a single background worker,
/// so generation calls never run in parallel. Enqueueing never waits on
/// the agent. The handle is cheap to clone.
#[derive(Clone)]
pub struct GenerationQueue {
    sender: mpsc::Sender<GenerationJob>,
    counters: Arc<Counters>,
}

impl GenerationQueue {
    /// Creates the queue and spawns its worker on the current runtime
    pub fn start(
        store: Arc<dyn RoomStore>,
        agent: Arc<dyn CodeAgent>,
        broadcaster: Arc<Broadcaster>,
        capacity: usize,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let counters = Arc::new(Counters::default());

        let worker = Worker {
            store,
            agent,
            broadcaster,
        };
        tokio::spawn(Self::process_jobs(worker, receiver, counters.clone()));

        Self { sender, counters }
    }

    /// Queues a job without waiting for it to run.
    pub fn enqueue(&self, job: GenerationJob) -> Result<()> {
        tracing::info!(
            room_code = %job.room_code,
            question_id = %job.question_id,
            language = %job.language,
            "Queueing generation job"
        );

        // Counted up front so the worker can never finish a job it was not
        // yet credited with.
        self.counters.enqueued.fetch_add(1, Ordering::Relaxed);

        let result = self.sender.try_send(job);
        if result.is_err() {
            self.counters.enqueued.fetch_sub(1, Ordering::Relaxed);
        }

        match result {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(job)) => {
                tracing::warn!(room_code = %job.room_code, "Generation queue is full");
                Err(SessionError::upstream("generation queue is full, try again later"))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(SessionError::internal("generation worker has stopped"))
            }
        }
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            enqueued: self.counters.enqueued.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            skipped: self.counters.skipped.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    async fn process_jobs(
        worker: Worker,
        mut receiver: mpsc::Receiver<GenerationJob>,
        counters: Arc<Counters>,
    ) {
        tracing::info!("Generation worker started");

        while let Some(job) = receiver.recv().await {
            tracing::info!(
                room_code = %job.room_code,
                question_id = %job.question_id,
                language = %job.language,
                "Processing generation job"
            );

            let outcome = worker.process_job(&job).await;
            counters.record(&outcome);

            match &outcome {
                JobOutcome::Completed => tracing::info!(room_code = %job.room_code, "Generation job completed"),
                JobOutcome::Skipped(reason) => {
                    tracing::info!(room_code = %job.room_code, reason = %reason, "Generation job skipped")
                }
                JobOutcome::Failed(error) => {
                    tracing::error!(room_code = %job.room_code, error = %error, "Generation job failed")
                }
            }
        }

        tracing::info!("Generation worker stopped");
    }
}

impl Worker {
    async fn process_job(&self, job: &GenerationJob) -> JobOutcome {
        // Fresh copy: other operations may have touched the room since enqueue.
        let room = match self.store.load(&job.room_code).await {
            Ok(Some(room)) => room,
            Ok(None) => return JobOutcome::Skipped("room no longer exists"),
            Err(e) => return self.fail(job, e).await,
        };

        if room.generated_for(&job.question_id, &job.language).is_some() {
            return JobOutcome::Skipped("already generated");
        }

        let question_text = match room.question(&job.question_id) {
            Some(question) => question.text.clone(),
            None => {
                return self
                    .fail(job, SessionError::QuestionNotFound(job.question_id.clone()))
                    .await
            }
        };

        let codes = match self.agent.generate(&question_text, &job.language).await {
            Ok(codes) => codes,
            Err(e) => return self.fail(job, e).await,
        };

        let entry = GeneratedCodeEntry::new(job.question_id.clone(), job.language.clone(), codes.clone());
        let stored = update_room(self.store.as_ref(), &job.room_code, |room| {
            Ok(room.record_generated(entry.clone()))
        })
        .await;

        match stored {
            Ok((room, true)) => {
                self.broadcaster
                    .send_to_admin(
                        &room,
                        &ServerEvent::GenerationComplete {
                            language: job.language.clone(),
                            question_id: job.question_id.clone(),
                            generated_codes: codes,
                        },
                    )
                    .await;
                JobOutcome::Completed
            }
            Ok((_, false)) => JobOutcome::Skipped("already generated"),
            Err(SessionError::RoomNotFound(_)) => JobOutcome::Skipped("room no longer exists"),
            Err(e) => self.fail(job, e).await,
        }
    }

    /// Tell the admin about a failed job. The admin connection is looked
    /// up from the current document, not the one the job started with.
    async fn fail(&self, job: &GenerationJob, error: SessionError) -> JobOutcome {
        let message = error.client_message();

        match self.store.load(&job.room_code).await {
            Ok(Some(room)) => {
                self.broadcaster
                    .send_to_admin(
                        &room,
                        &ServerEvent::GenerationFailed {
                            language: job.language.clone(),
                            question_id: job.question_id.clone(),
                            error: message.clone(),
                        },
                    )
                    .await;
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(room_code = %job.room_code, error = %e, "Could not notify admin"),
        }

        JobOutcome::Failed(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::Value;

    use super::*;
    use crate::agent::AnalyzeRequest;
    use crate::auth::UserIdentity;
    use crate::session::PresenceRegistry;
    use crate::store::{GeneratedCodes, MemoryRoomStore, Question, Room};

    struct CountingAgent {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl CodeAgent for CountingAgent {
        async fn generate(&self, _question: &str, language: &str) -> Result<GeneratedCodes> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            if self.fail {
                return Err(SessionError::upstream("No generated code returned from code agent"));
            }
            Ok([("gemini".to_string(), format!("// {}", language))].into())
        }

        async fn analyze(&self, _request: &AnalyzeRequest) -> Result<Value> {
            Ok(Value::Null)
        }

        async fn health(&self) -> bool {
            true
        }
    }

    struct Fixture {
        store: Arc<MemoryRoomStore>,
        agent: Arc<CountingAgent>,
        queue: GenerationQueue,
        admin_rx: mpsc::UnboundedReceiver<warp::ws::Message>,
        question_id: String,
    }

    async fn fixture(fail: bool) -> Fixture {
        let store = Arc::new(MemoryRoomStore::new());
        let admin = UserIdentity {
            user_id: "admin".into(),
            username: "Ada".into(),
        };
        let mut room = Room::new("ROOM22".into(), "pw".into(), &admin, Some("admin-conn".into()));
        let question_id = room.push_question(Question::new("Reverse a list".into(), None)).id.clone();
        store.create(room).await.unwrap();

        let broadcaster = Arc::new(Broadcaster::new(Arc::new(PresenceRegistry::new())));
        let (tx, admin_rx) = mpsc::unbounded_channel();
        broadcaster.attach("admin-conn", tx).await;

        let agent = Arc::new(CountingAgent {
            calls: AtomicUsize::new(0),
            fail,
        });
        let queue = GenerationQueue::start(store.clone(), agent.clone(), broadcaster, 8);

        Fixture {
            store,
            agent,
            queue,
            admin_rx,
            question_id,
        }
    }

    fn job(question_id: &str) -> GenerationJob {
        GenerationJob {
            room_code: "ROOM22".into(),
            language: "python".into(),
            question_id: question_id.into(),
        }
    }

    async fn drain(queue: &GenerationQueue) {
        for _ in 0..200 {
            if queue.stats().pending() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("generation queue did not drain: {:?}", queue.stats());
    }

    fn next_event(rx: &mut mpsc::UnboundedReceiver<warp::ws::Message>) -> Value {
        let message = rx.try_recv().unwrap();
        serde_json::from_str(message.to_str().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_duplicate_jobs_converge_to_one_entry() {
        let mut f = fixture(false).await;

        for _ in 0..3 {
            f.queue.enqueue(job(&f.question_id)).unwrap();
        }
        drain(&f.queue).await;

        let room = f.store.load("ROOM22").await.unwrap().unwrap();
        assert_eq!(room.generated_codes.len(), 1);
        assert_eq!(f.agent.calls.load(Ordering::SeqCst), 1);

        let stats = f.queue.stats();
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.skipped, 2);

        let event = next_event(&mut f.admin_rx);
        assert_eq!(event["type"], "GenerationComplete");
        assert_eq!(event["generated_codes"]["gemini"], "// python");
        assert!(f.admin_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_failed_job_notifies_admin_and_worker_survives() {
        let mut f = fixture(true).await;

        f.queue.enqueue(job(&f.question_id)).unwrap();
        f.queue.enqueue(job("no-such-question")).unwrap();
        drain(&f.queue).await;

        assert_eq!(f.queue.stats().failed, 2);

        let first = next_event(&mut f.admin_rx);
        assert_eq!(first["type"], "GenerationFailed");
        assert!(first["error"].as_str().unwrap().contains("No generated code"));

        let second = next_event(&mut f.admin_rx);
        assert_eq!(second["type"], "GenerationFailed");
        assert_eq!(second["question_id"], "no-such-question");

        let room = f.store.load("ROOM22").await.unwrap().unwrap();
        assert!(room.generated_codes.is_empty());
    }

    #[tokio::test]
    async fn test_job_for_deleted_room_is_skipped() {
        let f = fixture(false).await;
        f.store.delete("ROOM22").await.unwrap();

        f.queue.enqueue(job(&f.question_id)).unwrap();
        drain(&f.queue).await;

        assert_eq!(f.queue.stats().skipped, 1);
        assert_eq!(f.agent.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_full_queue_rejects_job() {
        // No worker draining the channel.
        let (sender, _receiver) = mpsc::channel(1);
        let queue = GenerationQueue {
            sender,
            counters: Arc::new(Counters::default()),
        };

        queue.enqueue(job("q1")).unwrap();
        let err = queue.enqueue(job("q1")).unwrap_err();
        assert!(matches!(err, SessionError::UpstreamFailure(_)));
        assert_eq!(queue.stats().enqueued, 1);
    }
}
