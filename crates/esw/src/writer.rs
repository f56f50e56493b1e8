//! 🎬 *[a batch of samples arrives. some of them are NaN. nobody is surprised.]*
//!
//! ✍️ The Sample Writer -- the one component this crate exists for.
//!
//! One batch in, one bulk request out. For each call it opens a session,
//! translates samples into documents (skipping the ones whose value is not a
//! real number), submits them in one go, checks that every action was
//! acknowledged, and closes the session on the way out no matter what.
//!
//! ⚠️ Failures come back as `Err`. They do not get formatted into a string and
//! quietly dropped on the floor. We have been to that party. We left early. 🦆

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer};
use tokio::time::{Instant, timeout_at};
use tracing::{debug, trace};

use crate::backends::{BulkBackend, BulkSession, ElasticsearchBackend};
use crate::common::{Document, Sample};
use crate::errors::{SubmissionCause, WriteError};
use crate::observer::{TracingObserver, WriteObserver};

/// 🏷️ What [`SampleWriter::name`] returns.
pub const WRITER_NAME: &str = "Elasticsearch";

/// 📡 Where the documents go. Set once, never mutated.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct WriterConfig {
    /// 📡 Cluster root, e.g. `http://localhost:9200`.
    #[serde(deserialize_with = "text_or_scalar")]
    pub url: String,
    /// 📦 `ESW_WRITER__INDEX=2024` arrives as a number. It is still an index name.
    #[serde(deserialize_with = "text_or_scalar")]
    pub index: String,
    /// 📦 Empty means "typeless cluster", and `_type` is left off the wire.
    #[serde(deserialize_with = "text_or_scalar")]
    pub document_type: String,
    /// ⏰ Deadline for a whole `write` call when the caller brings none.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

// ⏰ 30 seconds. Long enough for a meaty bulk request, short enough to notice a dead cluster.
fn default_request_timeout_secs() -> u64 {
    30
}

fn default_connect_timeout_secs() -> u64 {
    10
}

/// 🔢 Env values are parsed as the most specific type figment can find, so
/// names made of digits show up as numbers. Take them back as text.
fn text_or_scalar<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum TextOrScalar {
        Text(String),
        Unsigned(u64),
        Signed(i64),
        Float(f64),
        Flag(bool),
    }

    Ok(match TextOrScalar::deserialize(deserializer)? {
        TextOrScalar::Text(text) => text,
        TextOrScalar::Unsigned(number) => number.to_string(),
        TextOrScalar::Signed(number) => number.to_string(),
        TextOrScalar::Float(number) => number.to_string(),
        TextOrScalar::Flag(flag) => flag.to_string(),
    })
}

impl WriterConfig {
    pub fn new(
        url: impl Into<String>,
        index: impl Into<String>,
        document_type: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            index: index.into(),
            document_type: document_type.into(),
            request_timeout_secs: default_request_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// 🔌 The seam a hosting pipeline registers writers through.
#[async_trait]
pub trait SampleSink: Send + Sync {
    /// 📥 Write one batch. `Ok` means every valid sample was acknowledged.
    async fn write(&self, samples: &[Sample]) -> Result<(), WriteError>;

    /// 🏷️ A fixed, human-readable name for logs and registration.
    fn name(&self) -> &'static str;
}

/// ✍️ Writes batches of samples into one index through a [`BulkBackend`].
///
/// Holds no state between calls, so `&self` is all `write` needs and
/// concurrent calls do not step on each other.
#[derive(Debug)]
pub struct SampleWriter<B: BulkBackend = ElasticsearchBackend> {
    config: WriterConfig,
    backend: B,
    observer: Arc<dyn WriteObserver>,
}

impl SampleWriter<ElasticsearchBackend> {
    /// 🏗️ Stores the three coordinates. No I/O happens until the first `write`.
    pub fn new(
        endpoint: impl Into<String>,
        index: impl Into<String>,
        document_type: impl Into<String>,
    ) -> Self {
        Self::from_config(WriterConfig::new(endpoint, index, document_type))
    }

    pub fn from_config(config: WriterConfig) -> Self {
        let backend = ElasticsearchBackend::new(config.connect_timeout(), config.request_timeout());
        Self::with_backend(config, backend)
    }
}

impl<B: BulkBackend> SampleWriter<B> {
    pub fn with_backend(config: WriterConfig, backend: B) -> Self {
        Self {
            config,
            backend,
            observer: Arc::new(TracingObserver),
        }
    }

    /// 👀 Swap the default tracing observer for your own.
    pub fn with_observer(mut self, observer: Arc<dyn WriteObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn config(&self) -> &WriterConfig {
        &self.config
    }

    pub fn name(&self) -> &'static str {
        WRITER_NAME
    }

    /// 📥 Write a batch, giving up after the configured request timeout.
    pub async fn write(&self, samples: &[Sample]) -> Result<(), WriteError> {
        self.write_with_deadline(samples, deadline_after(self.config.request_timeout()))
            .await
    }

    /// 📥 Write a batch, giving up at `deadline`.
    ///
    /// An empty batch succeeds without touching the network.
    pub async fn write_with_deadline(
        &self,
        samples: &[Sample],
        deadline: Instant,
    ) -> Result<(), WriteError> {
        if samples.is_empty() {
            trace!("📭 Empty batch, nothing to send, nobody to bother");
            return Ok(());
        }

        let mut guard = SessionGuard::new(self.open_session(deadline).await?);
        let outcome = self
            .write_in_session(&mut guard.session, samples, deadline)
            .await;

        // 🗑️ Close on every path. A close failure never masks the write's own verdict.
        if let Err(close_error) = guard.close().await {
            self.observer.session_close_failed(&close_error);
        }
        outcome
    }

    async fn open_session(&self, deadline: Instant) -> Result<B::Session, WriteError> {
        let endpoint = &self.config.url;
        match timeout_at(deadline, self.backend.open(endpoint)).await {
            Ok(Ok(session)) => Ok(session),
            Ok(Err(open_error)) => Err(WriteError::Connection {
                endpoint: endpoint.clone(),
                reason: format!("{open_error:#}"),
            }),
            Err(_) => Err(WriteError::Connection {
                endpoint: endpoint.clone(),
                reason: "the deadline passed before a session could be opened".to_string(),
            }),
        }
    }

    async fn write_in_session(
        &self,
        session: &mut B::Session,
        samples: &[Sample],
        deadline: Instant,
    ) -> Result<(), WriteError> {
        let documents = self.documents_from(samples);
        if documents.is_empty() {
            debug!(
                "📭 All {} samples were skipped, no bulk request for you",
                samples.len()
            );
            return Ok(());
        }

        let submission = session.bulk_index(
            &self.config.index,
            &self.config.document_type,
            &documents,
            deadline,
        );
        let ack = timeout_at(deadline, submission)
            .await
            .unwrap_or(Err(SubmissionCause::DeadlineExceeded))
            .map_err(|cause| self.submission_failed(documents.len(), cause))?;

        let pending = documents.len().saturating_sub(ack.acknowledged);
        if pending > 0 {
            return Err(self.submission_failed(
                documents.len(),
                SubmissionCause::Unacknowledged {
                    pending,
                    first_failure: ack.first_failure,
                },
            ));
        }

        self.observer
            .batch_submitted(&self.config.index, documents.len());
        Ok(())
    }

    fn documents_from(&self, samples: &[Sample]) -> Vec<Document> {
        samples
            .iter()
            .filter_map(|sample| {
                let document = Document::from_sample(sample);
                if document.is_none() {
                    self.observer.sample_skipped(sample);
                }
                document
            })
            .collect()
    }

    fn submission_failed(&self, documents: usize, cause: SubmissionCause) -> WriteError {
        WriteError::Submission {
            index: self.config.index.clone(),
            documents,
            cause,
        }
    }
}

// ⏰ Thirty years. Any timeout past this is a config typo, not a plan.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// ⏰ `now + timeout`, clamped so an enormous timeout cannot overflow the clock.
fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout.min(FAR_FUTURE)).unwrap_or(now)
}

/// 🔒 Owns a session for the length of one `write`.
///
/// `close` is the polite exit. If the `write` future is dropped before it
/// gets there, `Drop` hands the session to `release_abandoned` instead.
struct SessionGuard<S: BulkSession> {
    session: S,
    closed: bool,
}

impl<S: BulkSession> SessionGuard<S> {
    fn new(session: S) -> Self {
        Self {
            session,
            closed: false,
        }
    }

    async fn close(mut self) -> anyhow::Result<()> {
        let result = self.session.close().await;
        self.closed = true;
        result
    }
}

impl<S: BulkSession> Drop for SessionGuard<S> {
    fn drop(&mut self) {
        if !self.closed {
            debug!("🧹 write was cancelled mid-flight, releasing the abandoned session");
            self.session.release_abandoned();
        }
    }
}

#[async_trait]
impl<B: BulkBackend> SampleSink for SampleWriter<B> {
    async fn write(&self, samples: &[Sample]) -> Result<(), WriteError> {
        SampleWriter::write(self, samples).await
    }

    fn name(&self) -> &'static str {
        WRITER_NAME
    }
}
