//! Configuration loading and parsing.
//!
//! Parses `gotracer.toml` (or an override path provided by the binary).
//! Recognized keys: `[mirror] ignore = [..]` adds directory names to the
//! built-in skip rules, `[toolchain] command = "go"` selects the executable
//! used to build and run the instrumented mirror. Unknown fields are ignored
//! (TOML deserialization tolerance) to allow forward evolution without
//! immediate warnings; a missing or unparseable file yields defaults.

use anyhow::Result;
use serde::Deserialize;
use std::{fs, path::PathBuf};
use tracing::debug;

#[derive(Debug, Deserialize, Default, Clone)]
pub struct MirrorConfig {
    /// Extra directory names pruned from the mirror walk.
    #[serde(default)]
    pub ignore: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ToolchainConfig {
    #[serde(default = "ToolchainConfig::default_command")]
    pub command: String,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            command: Self::default_command(),
        }
    }
}

impl ToolchainConfig {
    fn default_command() -> String {
        "go".to_string()
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct ConfigFile {
    #[serde(default)]
    pub mirror: MirrorConfig,
    #[serde(default)]
    pub toolchain: ToolchainConfig,
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub raw: Option<String>, // original file string (optional)
    pub file: ConfigFile,    // parsed (or default) data
}

/// Best-effort config path: `gotracer.toml` in the working directory.
pub fn discover() -> PathBuf {
    PathBuf::from("gotracer.toml")
}

pub fn load_from(path: Option<PathBuf>) -> Result<Config> {
    let path = path.unwrap_or_else(discover);
    if let Ok(content) = fs::read_to_string(&path) {
        match toml::from_str::<ConfigFile>(&content) {
            Ok(file) => Ok(Config {
                raw: Some(content),
                file,
            }),
            Err(e) => {
                debug!(target: "config", path = %path.display(), error = %e, "config_parse_fallback");
                Ok(Config::default())
            }
        }
    } else {
        Ok(Config::default())
    }
}
