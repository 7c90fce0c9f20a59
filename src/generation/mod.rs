//! Generation pipeline
//!
//! Reference solutions are produced lazily, the first time a submission
//! arrives for a (question, language) pair, or when the admin asks for
//! them. A single worker drains a FIFO queue; every job reloads the room
//! and re-checks the pair right before writing, so duplicate jobs for the
//! same pair end up as no-ops and at most one entry is ever stored.

mod queue;

pub use queue::{GenerationJob, GenerationQueue, JobOutcome, QueueStats};
