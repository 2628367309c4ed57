// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Tutka Resume Support
 * Per-template dispatch cursor persisted between runs
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};

/// Records, per template id, the index past the last successfully
/// dispatched target. On resume the scheduler skips targets below it.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ResumeConfig {
    #[serde(default)]
    cursors: HashMap<String, usize>,
}

impl ResumeConfig {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("No resume file at {}; starting fresh", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read resume file {}", path.display()))?;
        let parsed = serde_json::from_str(&content)
            .with_context(|| format!("Malformed resume file {}", path.display()))?;
        info!("Resuming from {}", path.display());
        Ok(parsed)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self).context("Serialize resume state")?;
        std::fs::write(path, content)
            .with_context(|| format!("Cannot write resume file {}", path.display()))?;
        Ok(())
    }

    pub fn cursor(&self, template_id: &str) -> usize {
        self.cursors.get(template_id).copied().unwrap_or(0)
    }

    pub fn set_cursor(&mut self, template_id: &str, index: usize) {
        let entry = self.cursors.entry(template_id.to_string()).or_insert(0);
        if index > *entry {
            *entry = index;
        }
    }
}

/// Thread-safe wrapper the scheduler's workers update concurrently
#[derive(Debug, Default)]
pub struct ResumeState {
    inner: Mutex<ResumeConfig>,
}

impl ResumeState {
    pub fn new(config: ResumeConfig) -> Self {
        Self {
            inner: Mutex::new(config),
        }
    }

    pub fn cursor(&self, template_id: &str) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .cursor(template_id)
    }

    pub fn mark_dispatched(&self, template_id: &str, index: usize) {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .set_cursor(template_id, index + 1);
        debug!("Resume cursor {template_id} -> {}", index + 1);
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .save(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_monotonic() {
        let mut config = ResumeConfig::default();
        config.set_cursor("t1", 5);
        config.set_cursor("t1", 3);
        assert_eq!(config.cursor("t1"), 5);
        assert_eq!(config.cursor("unknown"), 0);
    }

    #[test]
    fn test_round_trip() {
        let dir = std::env::temp_dir().join("tutka-resume-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("resume.json");

        let state = ResumeState::default();
        state.mark_dispatched("t1", 9);
        state.save(&path).unwrap();

        let loaded = ResumeConfig::load(&path).unwrap();
        assert_eq!(loaded.cursor("t1"), 10);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_missing_file_is_fresh() {
        let config = ResumeConfig::load(Path::new("/nonexistent/resume.json")).unwrap();
        assert_eq!(config.cursor("any"), 0);
    }
}
