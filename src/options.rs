// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Tutka Scan Options
 * Explicit configuration constructed once at scan init
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

use anyhow::{bail, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::types::Severity;

/// All knobs for one scan. Built once at startup from CLI flags, the
/// environment and the ignore file, then passed by reference everywhere.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Templates run concurrently (`-c`)
    pub template_concurrency: usize,
    /// Targets per template run concurrently (`-bulk-size`)
    pub bulk_size: usize,
    /// Requests per second; 0 means unlimited unless a minute budget is set
    pub rate_limit: u32,
    /// Requests per minute; replaces the per-second bucket when set
    pub rate_limit_minute: u32,
    /// Host error threshold before a host is skipped
    pub max_host_errors: u32,
    /// Tracked hosts bound in the error cache
    pub max_host_error_hosts: u64,
    /// Per-request timeout
    pub timeout: Duration,
    /// Stage retries on transient failure
    pub retries: u32,
    /// Minimum severities to run; empty means all
    pub severities: Vec<Severity>,
    /// Tag include filter; empty means all
    pub tags: Vec<String>,
    /// Tag exclude filter, merged with the ignore file at startup
    pub exclude_tags: Vec<String>,
    /// Scan-wide deadline; None means unbounded
    pub scan_timeout: Option<Duration>,
    /// Stop after this many matched results; None means unbounded
    pub max_results: Option<u64>,
    /// Interactsh server URL; None disables OOB correlation
    pub interactsh_url: Option<String>,
    /// Interactsh poll interval
    pub interactsh_poll_interval: Duration,
    /// Interactsh pending-record cooldown
    pub interactsh_cooldown: Duration,
    /// Outbound proxy
    pub proxy: Option<String>,
    /// Extra global variables (`-var key=value`)
    pub vars: HashMap<String, String>,
    /// Resume file path
    pub resume_path: Option<PathBuf>,
    /// Emit every matcher hit instead of deduping per (template, target, matcher)
    pub multi_match: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            template_concurrency: 25,
            bulk_size: 25,
            rate_limit: 150,
            rate_limit_minute: 0,
            max_host_errors: 30,
            max_host_error_hosts: 10_000,
            timeout: Duration::from_secs(10),
            retries: 1,
            severities: Vec::new(),
            tags: Vec::new(),
            exclude_tags: Vec::new(),
            scan_timeout: None,
            max_results: None,
            interactsh_url: None,
            interactsh_poll_interval: Duration::from_secs(5),
            interactsh_cooldown: Duration::from_secs(300),
            proxy: None,
            vars: HashMap::new(),
            resume_path: None,
            multi_match: false,
        }
    }
}

impl ScanOptions {
    /// Startup validation; a scan never begins with an invalid config.
    pub fn validate(&self) -> Result<()> {
        if self.template_concurrency == 0 {
            bail!("template concurrency must be at least 1");
        }
        if self.bulk_size == 0 {
            bail!("bulk size must be at least 1");
        }
        if self.timeout.is_zero() {
            bail!("request timeout must be non-zero");
        }
        if let Some(proxy) = &self.proxy {
            url::Url::parse(proxy).map_err(|e| anyhow::anyhow!("invalid proxy {proxy}: {e}"))?;
        }
        if let Some(url) = &self.interactsh_url {
            url::Url::parse(url)
                .map_err(|e| anyhow::anyhow!("invalid interactsh server {url}: {e}"))?;
        }
        Ok(())
    }

    /// Pick up proxy configuration from the environment when no flag was given
    pub fn apply_env(&mut self) {
        if self.proxy.is_none() {
            self.proxy = std::env::var("HTTPS_PROXY")
                .or_else(|_| std::env::var("HTTP_PROXY"))
                .ok()
                .filter(|p| !p.is_empty());
            if let Some(p) = &self.proxy {
                debug!("Using proxy from environment: {p}");
            }
        }
    }
}

/// Persistent ignore file: tags known to produce weak matches, excluded at
/// startup. Lives next to the templates directory.
#[derive(Debug, Default, Deserialize)]
pub struct IgnoreFile {
    #[serde(default)]
    pub tags: Vec<String>,
}

impl IgnoreFile {
    pub const FILE_NAME: &'static str = ".templates-ignore.yaml";

    /// Read the ignore file from the templates directory, or from the path
    /// in `TUTKA_IGNORE_FILE`. A missing file is an empty ignore list.
    pub fn read(templates_dir: &Path) -> IgnoreFile {
        let path = std::env::var("TUTKA_IGNORE_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| templates_dir.join(Self::FILE_NAME));
        match std::fs::read_to_string(&path) {
            Ok(content) => match serde_yaml::from_str(&content) {
                Ok(parsed) => {
                    debug!("Loaded ignore file {} ", path.display());
                    parsed
                }
                Err(e) => {
                    tracing::warn!("Ignoring malformed ignore file {}: {e}", path.display());
                    IgnoreFile::default()
                }
            },
            Err(_) => IgnoreFile::default(),
        }
    }
}
