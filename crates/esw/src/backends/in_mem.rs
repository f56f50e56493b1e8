//! 📦 A backend that never forgets. Unlike my dad, who forgot my soccer game in 1998.
//!
//! `InMemoryBackend` hands out sessions that push every bulk request into a
//! shared `Vec`, wrapped in a Mutex wrapped in an Arc. It's types all the way down.
//! It can also be told to misbehave: refuse connections, acknowledge only some
//! actions, fail the submission outright, or stall forever. Method acting for failure modes.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::warn;

use crate::backends::{BulkAck, BulkBackend, BulkSession};
use crate::common::Document;
use crate::errors::SubmissionCause;

/// 🧾 One bulk request, exactly as the writer submitted it.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmittedBulk {
    pub url: String,
    pub index: String,
    pub document_type: String,
    pub documents: Vec<Document>,
    pub deadline: Instant,
}

#[derive(Debug, Default)]
struct Ledger {
    submitted: Vec<SubmittedBulk>,
    sessions_opened: usize,
    sessions_closed: usize,
    sessions_abandoned: usize,
}

#[derive(Debug, Clone, Default)]
enum Temperament {
    #[default]
    Agreeable,
    RefusesConnections,
    AcknowledgesAtMost(usize),
    FailsWith(SubmissionCause),
    Stalls,
}

/// 🧪 The stunt double for a cluster.
///
/// Clone-able so tests can keep a handle after giving one to a writer.
/// The `Arc` means every clone shares the same ledger.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBackend {
    ledger: Arc<Mutex<Ledger>>,
    temperament: Temperament,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// 🚫 Every `open` fails, like a cluster behind a firewall nobody remembers configuring.
    pub fn refusing_connections(mut self) -> Self {
        self.temperament = Temperament::RefusesConnections;
        self
    }

    /// ⚠️ Record everything, but acknowledge no more than `limit` actions per request.
    pub fn acknowledging_at_most(mut self, limit: usize) -> Self {
        self.temperament = Temperament::AcknowledgesAtMost(limit);
        self
    }

    /// 💀 Record everything, then fail the submission with `cause`.
    pub fn failing_with(mut self, cause: SubmissionCause) -> Self {
        self.temperament = Temperament::FailsWith(cause);
        self
    }

    /// 🐌 Record everything, then never answer. Somebody else has to give up first.
    pub fn stalling(mut self) -> Self {
        self.temperament = Temperament::Stalls;
        self
    }

    pub async fn submitted(&self) -> Vec<SubmittedBulk> {
        self.ledger.lock().await.submitted.clone()
    }

    pub async fn sessions_opened(&self) -> usize {
        self.ledger.lock().await.sessions_opened
    }

    pub async fn sessions_closed(&self) -> usize {
        self.ledger.lock().await.sessions_closed
    }

    /// 🧹 Sessions released by a dropped `write` rather than a polite `close`.
    pub async fn sessions_abandoned(&self) -> usize {
        self.ledger.lock().await.sessions_abandoned
    }
}

#[async_trait]
impl BulkBackend for InMemoryBackend {
    type Session = InMemorySession;

    async fn open(&self, url: &str) -> Result<InMemorySession> {
        if let Temperament::RefusesConnections = self.temperament {
            anyhow::bail!("💀 connection refused by '{url}' (it was told to)");
        }
        self.ledger.lock().await.sessions_opened += 1;
        Ok(InMemorySession {
            url: url.to_string(),
            ledger: Arc::clone(&self.ledger),
            temperament: self.temperament.clone(),
        })
    }
}

/// 📦 A session into the in-memory ledger.
#[derive(Debug)]
pub struct InMemorySession {
    url: String,
    ledger: Arc<Mutex<Ledger>>,
    temperament: Temperament,
}

#[async_trait]
impl BulkSession for InMemorySession {
    async fn bulk_index(
        &mut self,
        index: &str,
        document_type: &str,
        documents: &[Document],
        deadline: Instant,
    ) -> std::result::Result<BulkAck, SubmissionCause> {
        // 🔒 The Mutex is load-bearing. Do not remove. I know it looks optional. It isn't.
        self.ledger.lock().await.submitted.push(SubmittedBulk {
            url: self.url.clone(),
            index: index.to_string(),
            document_type: document_type.to_string(),
            documents: documents.to_vec(),
            deadline,
        });

        match &self.temperament {
            Temperament::Stalls => std::future::pending().await,
            Temperament::FailsWith(cause) => Err(cause.clone()),
            Temperament::AcknowledgesAtMost(limit) => {
                let acknowledged = documents.len().min(*limit);
                let first_failure = (acknowledged < documents.len())
                    .then(|| "status 429: es_rejected_execution_exception: queue is full".to_string());
                Ok(BulkAck {
                    acknowledged,
                    first_failure,
                })
            }
            Temperament::Agreeable | Temperament::RefusesConnections => Ok(BulkAck {
                acknowledged: documents.len(),
                first_failure: None,
            }),
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.ledger.lock().await.sessions_closed += 1;
        Ok(())
    }

    fn release_abandoned(&mut self) {
        match self.ledger.try_lock() {
            Ok(mut ledger) => {
                ledger.sessions_closed += 1;
                ledger.sessions_abandoned += 1;
            }
            Err(_) => warn!(
                "🧹 ledger was busy, abandoned session from '{}' went uncounted",
                self.url
            ),
        }
    }
}
