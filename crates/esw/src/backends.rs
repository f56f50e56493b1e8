//! 🔌 Backends -- where the real I/O happens.
//!
//! 🎭 The writer does not know or care whether its documents end up in a
//! real cluster or in a `Vec` that a test is about to squint at. It only knows
//! two capabilities: open a session, and push a bulk request through it.
//!
//! # Knowledge Graph 🧠
//! - Pattern: [`BulkBackend`] opens → [`BulkSession`] per `write` call → `close` on every exit path
//! - `ElasticsearchBackend`: reqwest, `GET /` to say hello, `POST /_bulk` to do the work
//! - `InMemoryBackend`: hoards submitted documents for test assertions, can be told to misbehave
//! - Ancient proverb: "He who hardcodes the HTTP client, mocks nothing and tests in production."

use anyhow::Result;
use async_trait::async_trait;
use tokio::time::Instant;

use crate::common::Document;
use crate::errors::SubmissionCause;

pub mod elasticsearch;
pub mod in_mem;

pub use elasticsearch::{ElasticsearchBackend, ElasticsearchSession};
pub use in_mem::{InMemoryBackend, InMemorySession, SubmittedBulk};

/// 🧾 What the cluster said about a bulk request it accepted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkAck {
    /// ✅ How many index actions came back with a 2xx status.
    pub acknowledged: usize,
    /// 💀 A description of the first action that did not, if any.
    pub first_failure: Option<String>,
}

/// 🚪 Something that can open a session to a bulk-indexing endpoint.
#[async_trait]
pub trait BulkBackend: std::fmt::Debug + Send + Sync {
    type Session: BulkSession;

    /// 📡 Open a session to `url`. An `Err` here means nothing was, or will be, written.
    async fn open(&self, url: &str) -> Result<Self::Session>;
}

/// 📦 One open session. Lives for exactly one `write` call.
///
/// # Contract 📜
/// - `bulk_index` sends every document as a single bulk request. No retries. Retries are not our personality.
/// - `deadline` is a hard stop; implementations should not outlive it.
/// - `close` MUST be called once the session is done, success or failure.
/// - `release_abandoned` is the fallback when the `write` future is dropped before `close` runs.
#[async_trait]
pub trait BulkSession: std::fmt::Debug + Send {
    async fn bulk_index(
        &mut self,
        index: &str,
        document_type: &str,
        documents: &[Document],
        deadline: Instant,
    ) -> std::result::Result<BulkAck, SubmissionCause>;

    /// 🗑️ Release the session.
    async fn close(&mut self) -> Result<()>;

    /// 🧹 Release the session without awaiting anything. Runs from `Drop`, so it must not block.
    ///
    /// The default does nothing, which is right for backends whose resources free themselves on drop.
    fn release_abandoned(&mut self) {}
}
