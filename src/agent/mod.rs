//! External code agent integration
//!
//! The agent produces reference solutions for a (question, language) pair
//! and compares a candidate's code against them. Both RPCs are safe to
//! repeat from our side; caching and de-duplication live in the
//! generation pipeline and the analysis gate, not here.
//!
//! - `config`: base URL and per-call timeouts
//! - `client`: reqwest-backed [`AgentClient`]
//! - `normalize`: request building and report key normalisation

mod client;
mod config;
mod normalize;

pub use client::AgentClient;
pub use config::AgentConfig;
pub use normalize::{normalize_analysis, AnalyzeRequest, MODEL_KEYS};

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::store::GeneratedCodes;

#[async_trait]
pub trait CodeAgent: Send + Sync {
    /// Reference solutions keyed by model name. An empty answer is an error.
    async fn generate(&self, question: &str, language: &str) -> Result<GeneratedCodes>;

    /// Raw comparison report; callers normalise it.
    async fn analyze(&self, request: &AnalyzeRequest) -> Result<Value>;

    /// Liveness probe, for UX only.
    async fn health(&self) -> bool;
}
