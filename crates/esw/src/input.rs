//! 📥 NDJSON sample input -- one sample per line, no surprises (some surprises).
//!
//! ```text
//! {"labels":{"__name__":"up","instance":"a"},"value":1.0,"timestamp":1000}
//! {"labels":{"__name__":"up","instance":"b"},"value":"NaN","timestamp":1001}
//! ```
//!
//! `value` is a JSON number or a string, because JSON cannot spell NaN and
//! the metrics world insists on producing it. `timestamp` is epoch seconds.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use chrono::DateTime;
use serde::Deserialize;

use crate::common::Sample;

#[derive(Debug, Deserialize)]
struct SampleRecord {
    #[serde(default)]
    labels: BTreeMap<String, String>,
    value: SampleValue,
    timestamp: i64,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SampleValue {
    Number(f64),
    Text(String),
}

impl SampleValue {
    fn into_f64(self) -> Result<f64> {
        match self {
            SampleValue::Number(number) => Ok(number),
            // -- f64's parser already speaks "NaN", "+Inf", "-inf", any casing
            SampleValue::Text(text) => text
                .trim()
                .parse::<f64>()
                .with_context(|| format!("💀 '{text}' is not a number, not even a weird one")),
        }
    }
}

/// 🔍 Parse one NDJSON line into a [`Sample`].
pub fn parse_sample_line(line: &str) -> Result<Sample> {
    let record: SampleRecord = serde_json::from_str(line)
        .context("💀 This line is not a sample. It might not even be JSON. It's giving 'copy-pasted from a terminal'.")?;
    let value = record.value.into_f64()?;
    let timestamp = DateTime::from_timestamp(record.timestamp, 0).with_context(|| {
        format!(
            "💀 timestamp {} is outside the range of human history as chrono understands it",
            record.timestamp
        )
    })?;

    Ok(Sample {
        labels: record.labels,
        value,
        timestamp,
    })
}
