// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Tutka Output Writers
 * Result sinks: colored human lines and line-delimited JSON
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

use anyhow::{Context, Result};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use tracing::error;

use crate::types::ResultEvent;

/// Pluggable result sink. Implementations must be safe to call from many
/// workers at once.
pub trait Sink: Send + Sync {
    fn write_event(&self, event: &ResultEvent);
}

/// Standard writer: stdout plus an optional file, as human lines or JSONL
pub struct StandardWriter {
    jsonl: bool,
    color: bool,
    silent: bool,
    file: Option<Mutex<std::fs::File>>,
    stdout: Mutex<std::io::Stdout>,
}

impl StandardWriter {
    pub fn new(jsonl: bool, color: bool, silent: bool, output_path: Option<&Path>) -> Result<Self> {
        let file = match output_path {
            Some(path) => {
                let file = std::fs::File::create(path)
                    .with_context(|| format!("Cannot create output file {}", path.display()))?;
                Some(Mutex::new(file))
            }
            None => None,
        };
        Ok(Self {
            jsonl,
            color,
            silent,
            file,
            stdout: Mutex::new(std::io::stdout()),
        })
    }

    fn render(&self, event: &ResultEvent, color: bool) -> String {
        if self.jsonl {
            serde_json::to_string(event).unwrap_or_else(|e| {
                error!("Failed to serialize result event: {e}");
                String::new()
            })
        } else {
            event.format_line(color)
        }
    }
}

impl Sink for StandardWriter {
    fn write_event(&self, event: &ResultEvent) {
        // silent mode still prints findings, only without color
        let line = self.render(event, self.color && !self.silent);
        if !line.is_empty() {
            let mut stdout = self.stdout.lock().unwrap_or_else(|e| e.into_inner());
            let _ = writeln!(stdout, "{line}");
        }
        if let Some(file) = &self.file {
            // files never carry color
            let line = self.render(event, false);
            if !line.is_empty() {
                let mut file = file.lock().unwrap_or_else(|e| e.into_inner());
                if let Err(e) = writeln!(file, "{line}") {
                    error!("Failed to write output file: {e}");
                }
            }
        }
    }
}

/// Test sink collecting events in memory
#[derive(Default)]
pub struct MemorySink {
    pub events: Mutex<Vec<ResultEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&self) -> Vec<ResultEvent> {
        std::mem::take(&mut self.events.lock().unwrap_or_else(|e| e.into_inner()))
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Sink for MemorySink {
    fn write_event(&self, event: &ResultEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Severity, TemplateInfo};

    fn event() -> ResultEvent {
        ResultEvent {
            template_id: "t".into(),
            info: TemplateInfo {
                name: "T".into(),
                severity: Severity::High,
                ..Default::default()
            },
            protocol: "http".into(),
            host: "example.com".into(),
            matched_at: "http://example.com/x".into(),
            matcher_name: None,
            extracted_results: vec![],
            request: None,
            response: None,
            interaction: None,
            timestamp: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_memory_sink_collects() {
        let sink = MemorySink::new();
        sink.write_event(&event());
        sink.write_event(&event());
        assert_eq!(sink.len(), 2);
        assert_eq!(sink.take().len(), 2);
        assert!(sink.is_empty());
    }

    #[test]
    fn test_file_output() {
        let dir = std::env::temp_dir().join("tutka-output-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("results.jsonl");
        let writer = StandardWriter::new(true, false, true, Some(&path)).unwrap();
        writer.write_event(&event());
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("\"template-id\":\"t\""));
        std::fs::remove_file(&path).ok();
    }
}
