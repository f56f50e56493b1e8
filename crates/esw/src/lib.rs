//! 📈 esw -- forwards metric samples into Elasticsearch, one bulk request per batch.
//!
//! The heart of it is [`SampleWriter`]: hand it a batch of [`Sample`]s, it
//! turns the finite ones into [`Document`]s and ships them through `_bulk`.
//! [`run`] is the small driver the CLI uses to stream an NDJSON file of
//! samples through a writer, batch by batch.

pub mod app_config;
pub mod backends;
pub mod common;
pub mod errors;
pub mod input;
pub mod observer;
pub mod writer;

use std::path::Path;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{debug, info};

pub use app_config::{AppConfig, InputConfig};
pub use backends::{BulkAck, BulkBackend, BulkSession, ElasticsearchBackend, InMemoryBackend};
pub use common::{Document, METRIC_NAME_LABEL, Sample};
pub use errors::{SubmissionCause, WriteError};
pub use observer::{TracingObserver, WriteObserver};
pub use writer::{SampleSink, SampleWriter, WRITER_NAME, WriterConfig};

/// 📊 What a [`run`] accomplished, for the CLI to brag about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub writer_name: &'static str,
    pub index: String,
    pub samples_read: usize,
    pub batches_written: usize,
}

/// 🚀 Stream the samples in `samples_path` into the configured cluster.
pub async fn run(app_config: AppConfig, samples_path: &Path) -> Result<RunSummary> {
    let writer = SampleWriter::from_config(app_config.writer.clone());
    info!(
        "🚀 Writing samples from '{}' into '{}' (index '{}')",
        samples_path.display(),
        app_config.writer.url,
        app_config.writer.index
    );

    let file = tokio::fs::File::open(samples_path).await.with_context(|| {
        format!(
            "💀 Could not open the sample file '{}'. It exists in our hearts, but apparently not on disk.",
            samples_path.display()
        )
    })?;

    let (samples_read, batches_written) =
        pump_samples(&writer, BufReader::new(file), app_config.input.batch_size).await?;

    Ok(RunSummary {
        writer_name: writer.name(),
        index: app_config.writer.index,
        samples_read,
        batches_written,
    })
}

/// 🔄 Read NDJSON samples from `reader` and write them in batches of `batch_size`.
///
/// Returns `(samples_read, batches_written)`. Stops at the first bad line or failed write.
pub async fn pump_samples<S, R>(sink: &S, reader: R, batch_size: usize) -> Result<(usize, usize)>
where
    S: SampleSink + ?Sized,
    R: AsyncBufRead + Unpin,
{
    let batch_size = batch_size.max(1);
    let mut lines = reader.lines();
    let mut batch = Vec::with_capacity(batch_size);
    let mut samples_read = 0;
    let mut batches_written = 0;
    let mut line_number = 0;

    while let Some(line) = lines
        .next_line()
        .await
        .context("💀 Reading the sample input failed mid-stream")?
    {
        line_number += 1;
        if line.trim().is_empty() {
            continue;
        }
        let sample = input::parse_sample_line(&line)
            .with_context(|| format!("💀 Line {line_number} of the sample input is not a sample"))?;
        batch.push(sample);
        samples_read += 1;

        if batch.len() >= batch_size {
            flush_batch(sink, &mut batch, batches_written).await?;
            batches_written += 1;
        }
    }

    if !batch.is_empty() {
        flush_batch(sink, &mut batch, batches_written).await?;
        batches_written += 1;
    }

    Ok((samples_read, batches_written))
}

async fn flush_batch<S: SampleSink + ?Sized>(
    sink: &S,
    batch: &mut Vec<Sample>,
    batch_number: usize,
) -> Result<()> {
    debug!("📦 Flushing batch #{} of {} samples", batch_number, batch.len());
    sink.write(batch).await.with_context(|| {
        format!(
            "💀 {} could not take batch #{} ({} samples)",
            sink.name(),
            batch_number,
            batch.len()
        )
    })?;
    batch.clear();
    Ok(())
}
