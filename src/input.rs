// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Tutka Target Inputs
 * Scan subject model and target list providers
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{BufRead, IsTerminal};
use std::path::Path;
use tracing::debug;
use url::Url;

/// A scan subject. Identity is `input` plus the optional DNS override.
/// Immutable once a scan batch begins; executions clone it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MetaInput {
    /// URL, host, or host:port
    pub input: String,
    /// Override DNS resolution with a fixed address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_ip: Option<String>,
    /// Pre-authenticated cookies seeded into every execution's jar
    #[serde(default, skip_serializing_if = "std::collections::BTreeMap::is_empty")]
    pub cookies: std::collections::BTreeMap<String, String>,
}

impl MetaInput {
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            custom_ip: None,
            cookies: Default::default(),
        }
    }

    pub fn with_ip(input: impl Into<String>, ip: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            custom_ip: Some(ip.into()),
            cookies: Default::default(),
        }
    }

    /// Normalized host key used by the host error cache. Scheme and default
    /// ports are stripped; explicit non-default ports are kept.
    pub fn host_key(&self) -> String {
        if let Ok(url) = Url::parse(&self.input) {
            if let Some(host) = url.host_str() {
                return match url.port() {
                    Some(port) => format!("{host}:{port}"),
                    None => host.to_string(),
                };
            }
        }
        // bare host or host:port
        self.input
            .trim_end_matches('/')
            .trim_start_matches("//")
            .to_string()
    }

    /// Hostname without any port, for DNS style lookups
    pub fn hostname(&self) -> String {
        let key = self.host_key();
        match key.rsplit_once(':') {
            Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host.to_string(),
            _ => key,
        }
    }

    /// The input as a base URL, defaulting the scheme to http
    pub fn base_url(&self) -> String {
        if self.input.starts_with("http://") || self.input.starts_with("https://") {
            self.input.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", self.input.trim_end_matches('/'))
        }
    }

    /// Port of the target, if one is present
    pub fn port(&self) -> Option<u16> {
        if let Ok(url) = Url::parse(&self.input) {
            return url.port_or_known_default();
        }
        self.input
            .rsplit_once(':')
            .and_then(|(_, p)| p.parse::<u16>().ok())
    }
}

impl fmt::Display for MetaInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.custom_ip {
            Some(ip) => write!(f, "{} [{}]", self.input, ip),
            None => f.write_str(&self.input),
        }
    }
}

/// Structured target file format: a list of MetaInput records
#[derive(Debug, Deserialize)]
struct TargetFile {
    targets: Vec<MetaInput>,
}

/// Collects targets from CLI flags, list files, structured files and stdin.
#[derive(Debug, Default)]
pub struct InputProvider {
    targets: Vec<MetaInput>,
}

impl InputProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, input: impl Into<String>) {
        let input = input.into();
        let trimmed = input.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            return;
        }
        self.targets.push(MetaInput::new(trimmed));
    }

    pub fn add_meta(&mut self, meta: MetaInput) {
        self.targets.push(meta);
    }

    /// Load a plain list file, one target per line
    pub fn load_list(&mut self, path: &Path) -> Result<()> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read target list {}", path.display()))?;
        for line in content.lines() {
            self.add(line);
        }
        debug!("Loaded {} targets from {}", self.targets.len(), path.display());
        Ok(())
    }

    /// Load a structured YAML or JSON file of MetaInput records
    pub fn load_structured(&mut self, path: &Path) -> Result<()> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read target file {}", path.display()))?;
        let parsed: TargetFile = if path.extension().and_then(|e| e.to_str()) == Some("json") {
            serde_json::from_str(&content)
                .with_context(|| format!("Invalid JSON target file {}", path.display()))?
        } else {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Invalid YAML target file {}", path.display()))?
        };
        for meta in parsed.targets {
            self.targets.push(meta);
        }
        Ok(())
    }

    /// Read targets from stdin when it is piped
    pub fn load_stdin(&mut self) {
        let stdin = std::io::stdin();
        if stdin.is_terminal() {
            return;
        }
        for line in stdin.lock().lines().map_while(Result::ok) {
            self.add(line);
        }
    }

    /// Dedupe by identity while preserving order
    pub fn finalize(mut self) -> Vec<MetaInput> {
        let mut seen = std::collections::HashSet::new();
        self.targets.retain(|t| seen.insert(t.clone()));
        self.targets
    }

    pub fn count(&self) -> usize {
        self.targets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_key_normalization() {
        assert_eq!(MetaInput::new("https://example.com/path").host_key(), "example.com");
        assert_eq!(MetaInput::new("https://example.com:8443/").host_key(), "example.com:8443");
        assert_eq!(MetaInput::new("example.com:25").host_key(), "example.com:25");
        assert_eq!(MetaInput::new("example.com").host_key(), "example.com");
    }

    #[test]
    fn test_hostname_strips_port() {
        assert_eq!(MetaInput::new("example.com:8080").hostname(), "example.com");
        assert_eq!(MetaInput::new("https://example.com:8443").hostname(), "example.com");
    }

    #[test]
    fn test_base_url_scheme_default() {
        assert_eq!(MetaInput::new("example.com").base_url(), "http://example.com");
        assert_eq!(
            MetaInput::new("https://example.com/").base_url(),
            "https://example.com"
        );
    }

    #[test]
    fn test_provider_dedupes_and_skips_comments() {
        let mut provider = InputProvider::new();
        provider.add("example.com");
        provider.add("# comment");
        provider.add("");
        provider.add("example.com");
        provider.add("other.example");
        let targets = provider.finalize();
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].input, "example.com");
    }

    #[test]
    fn test_structured_yaml_targets() {
        let dir = std::env::temp_dir().join("tutka-input-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("targets.yaml");
        std::fs::write(
            &path,
            "targets:\n  - input: https://example.com\n    cookies:\n      session: abc123\n  - input: internal.example\n    custom_ip: 10.0.0.5\n",
        )
        .unwrap();

        let mut provider = InputProvider::new();
        provider.load_structured(&path).unwrap();
        let targets = provider.finalize();
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].cookies.get("session").map(String::as_str), Some("abc123"));
        assert_eq!(targets[1].custom_ip.as_deref(), Some("10.0.0.5"));
        std::fs::remove_file(&path).ok();
    }
}
