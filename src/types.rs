// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Tutka Core Types
 * Result events, severity levels and scan statistics
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Finding severity, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Unknown,
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Default for Severity {
    fn default() -> Self {
        Severity::Info
    }
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Unknown => "unknown",
            Severity::Info => "info",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Option<Severity> {
        match s.to_ascii_lowercase().as_str() {
            "unknown" => Some(Severity::Unknown),
            "info" => Some(Severity::Info),
            "low" => Some(Severity::Low),
            "medium" => Some(Severity::Medium),
            "high" => Some(Severity::High),
            "critical" => Some(Severity::Critical),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification block of the template info section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Classification {
    #[serde(rename = "cvss-metrics", default, skip_serializing_if = "Option::is_none")]
    pub cvss_metrics: Option<String>,
    #[serde(rename = "cvss-score", default, skip_serializing_if = "Option::is_none")]
    pub cvss_score: Option<f64>,
    #[serde(rename = "cve-id", default, skip_serializing_if = "Option::is_none")]
    pub cve_id: Option<String>,
    #[serde(rename = "cwe-id", default, skip_serializing_if = "Option::is_none")]
    pub cwe_id: Option<String>,
}

/// Template info block
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemplateInfo {
    pub name: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reference: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classification: Option<Classification>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Out-of-band interaction payload attached to deferred findings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interaction {
    pub protocol: String,
    #[serde(rename = "unique-id")]
    pub unique_id: String,
    #[serde(rename = "full-id")]
    pub full_id: String,
    #[serde(rename = "raw-request", default)]
    pub raw_request: String,
    #[serde(rename = "raw-response", default)]
    pub raw_response: String,
    #[serde(rename = "remote-address", default)]
    pub remote_address: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// A single finding emitted when matchers fire.
/// Field order is stable for JSONL output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultEvent {
    #[serde(rename = "template-id")]
    pub template_id: String,
    pub info: TemplateInfo,
    pub protocol: String,
    pub host: String,
    #[serde(rename = "matched-at")]
    pub matched_at: String,
    #[serde(rename = "matcher-name", skip_serializing_if = "Option::is_none")]
    pub matcher_name: Option<String>,
    #[serde(rename = "extracted-results", default, skip_serializing_if = "Vec::is_empty")]
    pub extracted_results: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interaction: Option<Interaction>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl ResultEvent {
    /// Dedup key: at most one event per (template, target, matcher name)
    /// unless the template enables multi-match.
    pub fn dedup_key(&self) -> String {
        format!(
            "{}|{}|{}",
            self.template_id,
            self.host,
            self.matcher_name.as_deref().unwrap_or("")
        )
    }

    /// Human-readable single line form
    pub fn format_line(&self, color: bool) -> String {
        if color {
            let sev_color = match self.info.severity {
                Severity::Critical => "\x1b[95m",
                Severity::High => "\x1b[91m",
                Severity::Medium => "\x1b[93m",
                Severity::Low => "\x1b[92m",
                _ => "\x1b[94m",
            };
            format!(
                "[\x1b[92m{}\x1b[0m] [\x1b[94m{}\x1b[0m] [{}{}\x1b[0m] {}",
                self.template_id, self.protocol, sev_color, self.info.severity, self.matched_at
            )
        } else {
            format!(
                "[{}] [{}] [{}] {}",
                self.template_id, self.protocol, self.info.severity, self.matched_at
            )
        }
    }
}

/// Scan-wide counters, updated lock-free from workers
#[derive(Debug, Default)]
pub struct ScanStats {
    pub templates_loaded: AtomicU64,
    pub templates_discarded: AtomicU64,
    pub requests_issued: AtomicU64,
    pub matches: AtomicU64,
    pub errors: AtomicU64,
    pub hosts_skipped: AtomicU64,
}

impl ScanStats {
    pub fn incr_requests(&self) {
        self.requests_issued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_matches(&self) {
        self.matches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_errors(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_hosts_skipped(&self) {
        self.hosts_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn summary(&self) -> String {
        format!(
            "templates={} discarded={} requests={} matches={} errors={} hosts_skipped={}",
            self.templates_loaded.load(Ordering::Relaxed),
            self.templates_discarded.load(Ordering::Relaxed),
            self.requests_issued.load(Ordering::Relaxed),
            self.matches.load(Ordering::Relaxed),
            self.errors.load(Ordering::Relaxed),
            self.hosts_skipped.load(Ordering::Relaxed),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Info < Severity::Low);
    }

    #[test]
    fn test_severity_parse() {
        assert_eq!(Severity::parse("HIGH"), Some(Severity::High));
        assert_eq!(Severity::parse("info"), Some(Severity::Info));
        assert_eq!(Severity::parse("bogus"), None);
    }

    #[test]
    fn test_result_event_line_format() {
        let event = ResultEvent {
            template_id: "exposed-panel".into(),
            info: TemplateInfo {
                name: "Exposed Panel".into(),
                severity: Severity::Medium,
                ..Default::default()
            },
            protocol: "http".into(),
            host: "example.com".into(),
            matched_at: "https://example.com/admin".into(),
            matcher_name: Some("panel".into()),
            extracted_results: vec![],
            request: None,
            response: None,
            interaction: None,
            timestamp: chrono::Utc::now(),
        };
        assert_eq!(
            event.format_line(false),
            "[exposed-panel] [http] [medium] https://example.com/admin"
        );
    }

    #[test]
    fn test_jsonl_field_names() {
        let event = ResultEvent {
            template_id: "t1".into(),
            info: TemplateInfo::default(),
            protocol: "dns".into(),
            host: "example.com".into(),
            matched_at: "example.com".into(),
            matcher_name: None,
            extracted_results: vec!["a".into()],
            request: None,
            response: None,
            interaction: None,
            timestamp: chrono::Utc::now(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"template-id\":\"t1\""));
        assert!(json.contains("\"matched-at\""));
        assert!(json.contains("\"extracted-results\""));
    }
}
