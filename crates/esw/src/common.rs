//! 📦 Common data structures -- the building blocks of esw
//!
//! 🎬 COLD OPEN -- INT. METRICS PIPELINE -- EVERY 15 SECONDS, FOREVER
//!
//! A scraper wakes up. It pokes an exporter. The exporter says `up 1`.
//! The scraper writes it down, hands it off, and goes back to sleep.
//! Fifteen seconds later it does the exact same thing. It has done this
//! four million times. It will do it four million more. It does not complain.
//!
//! This module holds the two shapes that matter: the [`Sample`] as the
//! pipeline hands it to us, and the [`Document`] as Elasticsearch wants to
//! receive it. Translating one into the other is the whole trick. 🦆

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// 🏷️ The label that carries the metric name. Prometheus folklore, do not rename.
pub const METRIC_NAME_LABEL: &str = "__name__";

/// 📈 One observation from the metrics pipeline.
///
/// The metric name lives inside `labels` under [`METRIC_NAME_LABEL`], the same
/// way the pipeline ships it. Labels are a map, so keys are unique by
/// construction and duplicate-key drama is a type error, not a runtime one.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// 🏷️ Every label, metric name included.
    pub labels: BTreeMap<String, String>,
    /// 🔢 The number. Possibly NaN. Possibly infinite. Possibly a lie, but that's upstream's problem.
    pub value: f64,
    /// ⏰ Wall-clock time of the observation.
    pub timestamp: DateTime<Utc>,
}

impl Sample {
    /// 🏗️ Build a sample from a metric name plus the rest of its labels.
    ///
    /// A `__name__` entry inside `labels` gets overwritten by `metric`.
    /// There can be only one. Highlander rules.
    pub fn new<I, K, V>(metric: &str, labels: I, value: f64, timestamp: DateTime<Utc>) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut the_labels: BTreeMap<String, String> = labels
            .into_iter()
            .map(|(key, value)| (key.into(), value.into()))
            .collect();
        the_labels.insert(METRIC_NAME_LABEL.to_string(), metric.to_string());
        Self {
            labels: the_labels,
            value,
            timestamp,
        }
    }

    /// 🎯 The metric name, or `""` when the sample shows up without one.
    pub fn metric_name(&self) -> &str {
        self.labels
            .get(METRIC_NAME_LABEL)
            .map(String::as_str)
            .unwrap_or_default()
    }
}

/// 📄 The on-the-wire shape Elasticsearch indexes, one per valid [`Sample`].
///
/// ```text
/// {"metric":"up","timestamp":1000,"value":1.0,"tags":{"instance":"a"}}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Document {
    pub metric: String,
    /// ⏰ Epoch seconds. Sub-second precision is politely escorted out of the building.
    pub timestamp: i64,
    pub value: f64,
    /// 🏷️ Every label except the metric name, which got promoted to `metric`.
    pub tags: BTreeMap<String, String>,
}

impl Document {
    /// 🔄 Translate a sample into a document.
    ///
    /// Returns `None` when the value is NaN or infinite. JSON has no spelling
    /// for either, and Elasticsearch would reject the whole document anyway.
    pub fn from_sample(sample: &Sample) -> Option<Self> {
        if !sample.value.is_finite() {
            return None;
        }

        let tags = sample
            .labels
            .iter()
            .filter(|(key, _)| key.as_str() != METRIC_NAME_LABEL)
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        Some(Self {
            metric: sample.metric_name().to_string(),
            // -- floors toward negative infinity, so 1969 stays in 1969
            timestamp: sample.timestamp.timestamp(),
            value: sample.value,
            tags,
        })
    }
}
