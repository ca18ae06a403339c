//! Where session records live.
//!
//! - Linux: ~/.local/share/trialrig/<experiment>/
//! - Windows: %APPDATA%\trialrig\<experiment>\
//! - MacOS: ~/Library/Application Support/trialrig/<experiment>/

use chrono::{DateTime, Local};
use std::fs;
use std::path::{Path, PathBuf};

use crate::DaemonError;

pub struct AppPaths {
    data_dir: PathBuf,
}

impl AppPaths {
    pub fn new(experiment: &str) -> Result<Self, DaemonError> {
        let base = dirs::data_dir().ok_or(DaemonError::NoDataDir)?;
        Self::under(&base, experiment)
    }

    /// Same layout rooted somewhere other than the OS data dir.
    pub fn under(base: &Path, experiment: &str) -> Result<Self, DaemonError> {
        let data_dir = base.join("trialrig").join(sanitize(experiment));
        fs::create_dir_all(&data_dir)?;
        Ok(Self { data_dir })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn session_file(&self, started: DateTime<Local>) -> PathBuf {
        self.data_dir
            .join(format!("session-{}.jsonl", started.format("%Y%m%d-%H%M%S")))
    }
}

/// Experiment names become directory names.
fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "session".to_string()
    } else {
        cleaned
    }
}
