// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Tutka CLI
 * Command line interface definition
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

use clap::Parser;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::options::{IgnoreFile, ScanOptions};
use crate::types::Severity;

#[derive(Debug, Parser)]
#[command(
    name = "tutka",
    version,
    about = "Bountyy Tutka - template-driven vulnerability scanner"
)]
pub struct Cli {
    /// Template files or directories
    #[arg(short = 't', long = "templates", num_args = 1..)]
    pub templates: Vec<PathBuf>,

    /// Target URL / host to scan (repeatable)
    #[arg(short = 'u', long = "target")]
    pub targets: Vec<String>,

    /// File containing a list of targets, one per line
    #[arg(short = 'l', long = "list")]
    pub list: Option<PathBuf>,

    /// Structured target file (YAML/JSON MetaInput records)
    #[arg(long = "targets-file")]
    pub targets_file: Option<PathBuf>,

    /// Templates run concurrently
    #[arg(short = 'c', long = "concurrency", default_value_t = 25)]
    pub concurrency: usize,

    /// Targets scanned concurrently per template
    #[arg(long = "bulk-size", default_value_t = 25)]
    pub bulk_size: usize,

    /// Requests per second (0 = unlimited)
    #[arg(long = "rate-limit", visible_alias = "rl", default_value_t = 150)]
    pub rate_limit: u32,

    /// Requests per minute; overrides the per-second budget
    #[arg(long = "rate-limit-minute", visible_alias = "rlm", default_value_t = 0)]
    pub rate_limit_minute: u32,

    /// Errors before a host is skipped
    #[arg(long = "max-host-error", visible_alias = "mhe", default_value_t = 30)]
    pub max_host_error: u32,

    /// Per-request timeout in seconds
    #[arg(long = "timeout", default_value_t = 10)]
    pub timeout: u64,

    /// Retries per failed stage
    #[arg(long = "retries", default_value_t = 1)]
    pub retries: u32,

    /// Only run templates of these severities
    #[arg(long = "severity", short = 's', value_delimiter = ',')]
    pub severity: Vec<String>,

    /// Only run templates carrying these tags
    #[arg(long = "tags", value_delimiter = ',')]
    pub tags: Vec<String>,

    /// Exclude templates carrying these tags
    #[arg(long = "exclude-tags", value_delimiter = ',')]
    pub exclude_tags: Vec<String>,

    /// Output file
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,

    /// Emit findings as line-delimited JSON
    #[arg(short = 'j', long = "jsonl")]
    pub jsonl: bool,

    /// Print findings only
    #[arg(long = "silent")]
    pub silent: bool,

    /// Verbose logging
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Disable colored output
    #[arg(long = "no-color", visible_alias = "nc")]
    pub no_color: bool,

    /// Interactsh server URL for OOB correlation
    #[arg(long = "interactsh-url", default_value = "https://oast.pro")]
    pub interactsh_url: String,

    /// Disable OOB correlation entirely
    #[arg(long = "no-interactsh")]
    pub no_interactsh: bool,

    /// Resume file recording dispatch progress
    #[arg(long = "resume")]
    pub resume: Option<PathBuf>,

    /// Outbound proxy (http/https/socks5)
    #[arg(long = "proxy")]
    pub proxy: Option<String>,

    /// Stop after this many matched results
    #[arg(long = "max-results")]
    pub max_results: Option<u64>,

    /// Scan-wide timeout in seconds
    #[arg(long = "scan-timeout")]
    pub scan_timeout: Option<u64>,

    /// Periodic progress statistics
    #[arg(long = "stats")]
    pub stats: bool,

    /// Extra template variables, key=value (repeatable)
    #[arg(long = "var")]
    pub vars: Vec<String>,

    /// Exit with a distinct code when findings matched
    #[arg(long = "exit-on-match")]
    pub exit_on_match: bool,
}

impl Cli {
    /// Fold flags, environment and the ignore file into ScanOptions.
    pub fn to_options(&self) -> ScanOptions {
        let mut vars = HashMap::new();
        for pair in &self.vars {
            if let Some((k, v)) = pair.split_once('=') {
                vars.insert(k.trim().to_string(), v.to_string());
            }
        }

        let mut exclude_tags = self.exclude_tags.clone();
        if let Some(templates_dir) = self.templates.first() {
            let dir = if templates_dir.is_dir() {
                templates_dir.clone()
            } else {
                templates_dir
                    .parent()
                    .map(|p| p.to_path_buf())
                    .unwrap_or_else(|| PathBuf::from("."))
            };
            for tag in IgnoreFile::read(&dir).tags {
                if !exclude_tags.contains(&tag) {
                    exclude_tags.push(tag);
                }
            }
        }

        let mut options = ScanOptions {
            template_concurrency: self.concurrency,
            bulk_size: self.bulk_size,
            rate_limit: self.rate_limit,
            rate_limit_minute: self.rate_limit_minute,
            max_host_errors: self.max_host_error,
            timeout: Duration::from_secs(self.timeout),
            retries: self.retries,
            severities: self
                .severity
                .iter()
                .filter_map(|s| Severity::parse(s))
                .collect(),
            tags: self.tags.clone(),
            exclude_tags,
            scan_timeout: self.scan_timeout.map(Duration::from_secs),
            max_results: self.max_results,
            interactsh_url: if self.no_interactsh {
                None
            } else {
                Some(self.interactsh_url.clone())
            },
            proxy: self.proxy.clone(),
            vars,
            resume_path: self.resume.clone(),
            ..Default::default()
        };
        options.apply_env();
        options
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::parse_from(["tutka", "-t", "templates/", "-u", "example.com"]);
        let options = cli.to_options();
        assert_eq!(options.template_concurrency, 25);
        assert_eq!(options.bulk_size, 25);
        assert_eq!(options.rate_limit, 150);
        assert_eq!(options.max_host_errors, 30);
        assert!(options.interactsh_url.is_some());
    }

    #[test]
    fn test_no_interactsh_disables_oob() {
        let cli = Cli::parse_from(["tutka", "-t", "x", "--no-interactsh"]);
        assert!(cli.to_options().interactsh_url.is_none());
    }

    #[test]
    fn test_vars_parsing() {
        let cli = Cli::parse_from(["tutka", "-t", "x", "--var", "token=abc", "--var", "bad"]);
        let options = cli.to_options();
        assert_eq!(options.vars.get("token").map(String::as_str), Some("abc"));
        assert_eq!(options.vars.len(), 1);
    }

    #[test]
    fn test_severity_list() {
        let cli = Cli::parse_from(["tutka", "-t", "x", "--severity", "high,critical"]);
        let options = cli.to_options();
        assert_eq!(options.severities.len(), 2);
    }
}
