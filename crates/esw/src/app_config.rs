//! 🔧 App Configuration -- the sacred TOML-to-struct pipeline.
//!
//! 📡 "Config not found: We looked everywhere. Under the couch. Behind the fridge.
//! In the junk drawer. Nothing." -- every developer at 3am 🦆
//!
//! 🏗️ Powered by Figment, because manually parsing env vars is a form of
//! self-harm that even the borrow checker wouldn't approve of.
//!
//! The writer itself only ever sees a [`WriterConfig`]. Everything else in
//! here is for the process hosting it.

use std::path::Path;

use anyhow::Context;
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;
use tracing::info;

use crate::writer::WriterConfig;

/// 📦 One struct to rule them all, one struct to find them,
/// one struct to bring them all, and in the Figment bind them.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub writer: WriterConfig,
    #[serde(default)]
    pub input: InputConfig,
}

/// 📥 How the sample file gets chopped into batches.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct InputConfig {
    /// 📦 Samples per `write` call. Zero gets bumped to one, because a batch of nothing is a philosophy, not a batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

// 📦 500 samples: roughly what a single scrape of a chatty exporter coughs up.
fn default_batch_size() -> usize {
    500
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
        }
    }
}

/// 🚀 Load the config from `ESW_*` env vars, plus a TOML file if one was given.
///
/// Nested keys use a double underscore: `ESW_WRITER__URL`, `ESW_INPUT__BATCH_SIZE`.
/// When both sources set a key, the file wins.
pub fn load_config(config_file_name: Option<&Path>) -> anyhow::Result<AppConfig> {
    info!(
        "🔧 Loading configuration: {:#?}",
        config_file_name.unwrap_or(Path::new(""))
    );

    let config = Figment::new().merge(Env::prefixed("ESW_").split("__"));
    let config = match config_file_name {
        Some(file_name) => config.merge(Toml::file(file_name)),
        None => config,
    };

    let context_msg = match config_file_name {
        Some(path) => format!(
            "💀 Failed to parse configuration from file '{}' and environment variables (ESW_*). \
             Check that [writer] has url, index and document_type.",
            path.display()
        ),
        None => "💀 Failed to parse configuration from environment variables (ESW_*). \
                 No file was provided, so this one's all on the environment. Classic."
            .to_string(),
    };

    config.extract().context(context_msg)
}
