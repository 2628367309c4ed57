// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Tutka Template Model
 * Declarative probe documents: parsing, filtering and compilation
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use tracing::{debug, warn};

use crate::errors::TemplateError;
use crate::extractors::{CompiledExtractor, ExtractorDef};
use crate::matchers::{CompiledMatcher, Condition, MatcherDef};
use crate::options::ScanOptions;
use crate::payloads::{AttackType, PayloadDefs, PayloadSets};
use crate::types::TemplateInfo;

/// Closed protocol variant set. New protocols extend this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    Dns,
    Network,
    Ssl,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Dns => "dns",
            Protocol::Network => "network",
            Protocol::Ssl => "ssl",
        }
    }

    /// Dispatch ordering bucket: lower cost classes run first
    pub fn cost_class(&self) -> u8 {
        match self {
            Protocol::Http => 1,
            Protocol::Dns => 2,
            Protocol::Network => 2,
            Protocol::Ssl => 2,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw template document as parsed from YAML
#[derive(Debug, Clone, Deserialize)]
pub struct TemplateDoc {
    pub id: String,
    pub info: TemplateInfo,
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
    #[serde(rename = "self-contained", default)]
    pub self_contained: bool,
    #[serde(rename = "stop-at-first-match", default)]
    pub stop_at_first_match: bool,
    #[serde(alias = "requests", default)]
    pub http: Vec<HttpRequestDef>,
    #[serde(default)]
    pub dns: Vec<DnsRequestDef>,
    #[serde(alias = "tcp", default)]
    pub network: Vec<NetworkRequestDef>,
    #[serde(default)]
    pub ssl: Vec<SslRequestDef>,
    #[serde(default)]
    pub workflows: Vec<WorkflowNodeDef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpRequestDef {
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub path: Vec<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<String>,
    /// Raw request blocks; header/body split on the blank line
    #[serde(default)]
    pub raw: Vec<String>,
    #[serde(default)]
    pub payloads: PayloadDefs,
    #[serde(default)]
    pub attack: AttackType,
    #[serde(rename = "matchers-condition", default)]
    pub matchers_condition: Condition,
    #[serde(default)]
    pub matchers: Vec<MatcherDef>,
    #[serde(default)]
    pub extractors: Vec<ExtractorDef>,
    #[serde(rename = "stop-at-first-match", default)]
    pub stop_at_first_match: bool,
    /// Evaluate matchers on every response instead of the first hit
    #[serde(rename = "iterate-all", default)]
    pub iterate_all: bool,
}

fn default_method() -> String {
    "GET".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct DnsRequestDef {
    /// Query name; `{{FQDN}}` interpolates to the target hostname
    #[serde(default = "default_dns_name")]
    pub name: String,
    #[serde(rename = "type", default = "default_dns_type")]
    pub record_type: String,
    #[serde(rename = "matchers-condition", default)]
    pub matchers_condition: Condition,
    #[serde(default)]
    pub matchers: Vec<MatcherDef>,
    #[serde(default)]
    pub extractors: Vec<ExtractorDef>,
}

fn default_dns_name() -> String {
    "{{FQDN}}".to_string()
}

fn default_dns_type() -> String {
    "A".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkRequestDef {
    /// Destinations; entries like `{{Hostname}}` or `tls://{{Host}}:443`
    #[serde(default)]
    pub host: Vec<String>,
    /// Data written to the socket, in order
    #[serde(default)]
    pub inputs: Vec<NetworkInput>,
    #[serde(rename = "read-size", default = "default_read_size")]
    pub read_size: usize,
    #[serde(rename = "matchers-condition", default)]
    pub matchers_condition: Condition,
    #[serde(default)]
    pub matchers: Vec<MatcherDef>,
    #[serde(default)]
    pub extractors: Vec<ExtractorDef>,
}

fn default_read_size() -> usize {
    4096
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkInput {
    pub data: String,
    /// `hex` decodes the data before writing
    #[serde(rename = "type", default)]
    pub encoding: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SslRequestDef {
    #[serde(default = "default_ssl_address")]
    pub address: String,
    #[serde(rename = "matchers-condition", default)]
    pub matchers_condition: Condition,
    #[serde(default)]
    pub matchers: Vec<MatcherDef>,
    #[serde(default)]
    pub extractors: Vec<ExtractorDef>,
}

fn default_ssl_address() -> String {
    "{{Host}}:{{Port}}".to_string()
}

/// Workflow node: a template reference gated on prior matcher outcome
#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowNodeDef {
    pub template: String,
    /// Only these named matchers gate descent when present
    #[serde(default)]
    pub matchers: Vec<String>,
    #[serde(default)]
    pub subtemplates: Vec<WorkflowNodeDef>,
}

/// Protocol-specific request data of a compiled stage
#[derive(Debug, Clone)]
pub enum StageRequest {
    Http(HttpRequestDef),
    Dns(DnsRequestDef),
    Network(NetworkRequestDef),
    Ssl(SslRequestDef),
}

/// One compiled stage: request plus compiled matchers/extractors
#[derive(Debug, Clone)]
pub struct CompiledStage {
    pub request: StageRequest,
    pub matchers: Vec<CompiledMatcher>,
    pub matchers_condition: Condition,
    pub extractors: Vec<CompiledExtractor>,
    pub stop_at_first_match: bool,
    pub iterate_all: bool,
    pub payloads: PayloadSets,
    pub attack: AttackType,
    /// Stage carries `{{interactsh-url}}` and needs OOB correlation
    pub uses_interactsh: bool,
    /// Matchers reference interactsh parts and must be deferred
    pub defers_matching: bool,
}

/// A template compiled and ready to execute
#[derive(Debug, Clone)]
pub struct CompiledTemplate {
    pub id: String,
    pub info: TemplateInfo,
    pub protocol: Protocol,
    pub variables: BTreeMap<String, String>,
    pub self_contained: bool,
    pub stop_at_first_match: bool,
    pub stages: Vec<CompiledStage>,
}

impl CompiledTemplate {
    /// Advertised request count for progress accounting
    pub fn requests(&self) -> usize {
        self.stages
            .iter()
            .map(|s| {
                let payload_count = if s.payloads.is_empty() {
                    1
                } else {
                    s.payloads.count(s.attack)
                };
                let paths = match &s.request {
                    StageRequest::Http(h) => h.path.len().max(h.raw.len()).max(1),
                    _ => 1,
                };
                payload_count * paths
            })
            .sum()
    }

    /// Clustering key for single-stage HTTP templates whose base request
    /// is static. None when the template cannot cluster.
    pub fn cluster_key(&self) -> Option<String> {
        if self.protocol != Protocol::Http || self.stages.len() != 1 || self.self_contained {
            return None;
        }
        // template variables make the interpolated request differ even
        // when the declared request bytes are identical
        if !self.variables.is_empty() {
            return None;
        }
        let stage = &self.stages[0];
        if !stage.payloads.is_empty() || stage.uses_interactsh {
            return None;
        }
        match &stage.request {
            StageRequest::Http(h) if h.raw.is_empty() => Some(format!(
                "{}|{}|{}|{}",
                h.method,
                h.path.join(","),
                h.headers
                    .iter()
                    .map(|(k, v)| format!("{k}:{v}"))
                    .collect::<Vec<_>>()
                    .join(";"),
                h.body.as_deref().unwrap_or("")
            )),
            _ => None,
        }
    }

    /// Destinations of a self-contained template
    pub fn self_contained_targets(&self) -> Vec<String> {
        let mut out = Vec::new();
        for stage in &self.stages {
            match &stage.request {
                StageRequest::Http(h) => {
                    for path in &h.path {
                        if path.starts_with("http://") || path.starts_with("https://") {
                            out.push(path.clone());
                        }
                    }
                }
                StageRequest::Network(n) => out.extend(n.host.clone()),
                _ => {}
            }
        }
        out
    }
}

fn contains_interactsh_placeholder(text: &str) -> bool {
    text.contains("{{interactsh-url}}")
}

fn matcher_refs_interactsh(def: &MatcherDef) -> bool {
    def.dsl.iter().any(|d| d.contains("interactsh_"))
        || def.words.iter().any(|w| w.contains("interactsh_"))
}

/// Compile one parsed document. Any failure discards the template.
pub fn compile(doc: TemplateDoc) -> Result<CompiledTemplate, TemplateError> {
    let id = doc.id.clone();

    let (protocol, count) = match (
        !doc.http.is_empty(),
        !doc.dns.is_empty(),
        !doc.network.is_empty(),
        !doc.ssl.is_empty(),
    ) {
        (true, false, false, false) => (Protocol::Http, doc.http.len()),
        (false, true, false, false) => (Protocol::Dns, doc.dns.len()),
        (false, false, true, false) => (Protocol::Network, doc.network.len()),
        (false, false, false, true) => (Protocol::Ssl, doc.ssl.len()),
        _ => return Err(TemplateError::MissingProtocol { id }),
    };
    debug!("Compiling template {id} ({protocol}, {count} stage(s))");

    let mut stages = Vec::with_capacity(count);
    match protocol {
        Protocol::Http => {
            for def in &doc.http {
                let uses_interactsh = def.path.iter().any(|p| contains_interactsh_placeholder(p))
                    || def
                        .headers
                        .values()
                        .any(|v| contains_interactsh_placeholder(v))
                    || def
                        .body
                        .as_deref()
                        .map(contains_interactsh_placeholder)
                        .unwrap_or(false)
                    || def.raw.iter().any(|r| contains_interactsh_placeholder(r));
                stages.push(compile_stage(
                    &id,
                    StageRequest::Http(def.clone()),
                    &def.matchers,
                    def.matchers_condition,
                    &def.extractors,
                    def.stop_at_first_match,
                    def.iterate_all,
                    &def.payloads,
                    def.attack,
                    uses_interactsh,
                )?);
            }
        }
        Protocol::Dns => {
            for def in &doc.dns {
                stages.push(compile_stage(
                    &id,
                    StageRequest::Dns(def.clone()),
                    &def.matchers,
                    def.matchers_condition,
                    &def.extractors,
                    false,
                    false,
                    &PayloadDefs::new(),
                    AttackType::default(),
                    false,
                )?);
            }
        }
        Protocol::Network => {
            for def in &doc.network {
                let uses_interactsh = def
                    .inputs
                    .iter()
                    .any(|i| contains_interactsh_placeholder(&i.data));
                stages.push(compile_stage(
                    &id,
                    StageRequest::Network(def.clone()),
                    &def.matchers,
                    def.matchers_condition,
                    &def.extractors,
                    false,
                    false,
                    &PayloadDefs::new(),
                    AttackType::default(),
                    uses_interactsh,
                )?);
            }
        }
        Protocol::Ssl => {
            for def in &doc.ssl {
                stages.push(compile_stage(
                    &id,
                    StageRequest::Ssl(def.clone()),
                    &def.matchers,
                    def.matchers_condition,
                    &def.extractors,
                    false,
                    false,
                    &PayloadDefs::new(),
                    AttackType::default(),
                    false,
                )?);
            }
        }
    }

    Ok(CompiledTemplate {
        id: doc.id,
        info: doc.info,
        protocol,
        variables: doc.variables,
        self_contained: doc.self_contained,
        stop_at_first_match: doc.stop_at_first_match,
        stages,
    })
}

#[allow(clippy::too_many_arguments)]
fn compile_stage(
    id: &str,
    request: StageRequest,
    matcher_defs: &[MatcherDef],
    matchers_condition: Condition,
    extractor_defs: &[ExtractorDef],
    stop_at_first_match: bool,
    iterate_all: bool,
    payload_defs: &PayloadDefs,
    attack: AttackType,
    uses_interactsh: bool,
) -> Result<CompiledStage, TemplateError> {
    let mut matchers = Vec::with_capacity(matcher_defs.len());
    let mut defers_matching = false;
    for def in matcher_defs {
        if matcher_refs_interactsh(def) {
            defers_matching = true;
        }
        matchers.push(CompiledMatcher::compile(def.clone(), id)?);
    }
    let mut extractors = Vec::with_capacity(extractor_defs.len());
    for def in extractor_defs {
        extractors.push(CompiledExtractor::compile(def.clone(), id)?);
    }
    let payloads = PayloadSets::resolve(payload_defs, id)?;
    Ok(CompiledStage {
        request,
        matchers,
        matchers_condition,
        extractors,
        stop_at_first_match,
        iterate_all,
        payloads,
        attack,
        uses_interactsh,
        defers_matching: defers_matching && uses_interactsh,
    })
}

/// Parsed workflow document
#[derive(Debug, Clone)]
pub struct Workflow {
    pub id: String,
    pub info: TemplateInfo,
    pub nodes: Vec<WorkflowNodeDef>,
}

/// Everything loaded for one scan
#[derive(Debug, Default)]
pub struct TemplateStore {
    pub templates: Vec<CompiledTemplate>,
    pub workflows: Vec<Workflow>,
}

impl TemplateStore {
    pub fn find(&self, id: &str) -> Option<&CompiledTemplate> {
        self.templates.iter().find(|t| t.id == id)
    }
}

/// Severity / tag filtering before compilation
fn passes_filters(doc: &TemplateDoc, options: &ScanOptions) -> bool {
    if !options.severities.is_empty() && !options.severities.contains(&doc.info.severity) {
        return false;
    }
    if !options.tags.is_empty()
        && !doc
            .info
            .tags
            .iter()
            .any(|t| options.tags.iter().any(|f| f.eq_ignore_ascii_case(t)))
    {
        return false;
    }
    if doc
        .info
        .tags
        .iter()
        .any(|t| options.exclude_tags.iter().any(|f| f.eq_ignore_ascii_case(t)))
    {
        return false;
    }
    true
}

/// Parse a single template document
pub fn parse(content: &str) -> Result<TemplateDoc, TemplateError> {
    serde_yaml::from_str(content).map_err(|e| TemplateError::Parse {
        id: "<unparsed>".to_string(),
        reason: e.to_string(),
    })
}

/// Load templates from files and directories. Parse or compile failures
/// discard the template and the scan continues.
pub fn load_all(
    paths: &[std::path::PathBuf],
    options: &ScanOptions,
    stats: &crate::types::ScanStats,
) -> TemplateStore {
    let mut store = TemplateStore::default();
    let mut files = Vec::new();
    for path in paths {
        collect_template_files(path, &mut files);
    }
    for file in files {
        let content = match std::fs::read_to_string(&file) {
            Ok(c) => c,
            Err(e) => {
                warn!("Skipping unreadable template {}: {e}", file.display());
                stats
                    .templates_discarded
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                continue;
            }
        };
        match parse(&content) {
            Ok(doc) if !doc.workflows.is_empty() => {
                store.workflows.push(Workflow {
                    id: doc.id,
                    info: doc.info,
                    nodes: doc.workflows,
                });
                stats
                    .templates_loaded
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            }
            Ok(doc) => {
                if !passes_filters(&doc, options) {
                    debug!("Filtered out template {}", doc.id);
                    continue;
                }
                match compile(doc) {
                    Ok(compiled) => {
                        store.templates.push(compiled);
                        stats
                            .templates_loaded
                            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    }
                    Err(e) => {
                        warn!("Discarding template {}: {e}", file.display());
                        stats
                            .templates_discarded
                            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    }
                }
            }
            Err(e) => {
                warn!("Discarding template {}: {e}", file.display());
                stats
                    .templates_discarded
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            }
        }
    }
    store
}

fn collect_template_files(path: &Path, out: &mut Vec<std::path::PathBuf>) {
    if path.is_file() {
        out.push(path.to_path_buf());
        return;
    }
    let entries = match std::fs::read_dir(path) {
        Ok(e) => e,
        Err(e) => {
            warn!("Cannot read templates directory {}: {e}", path.display());
            return;
        }
    };
    for entry in entries.flatten() {
        let p = entry.path();
        if p.is_dir() {
            collect_template_files(&p, out);
        } else if matches!(
            p.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        ) {
            out.push(p);
        }
    }
    out.sort();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Severity;

    const BASIC_HTTP: &str = r#"
id: exposed-panel
info:
  name: Exposed Admin Panel
  author: bountyy
  severity: medium
  tags: [panel, exposure]
http:
  - method: GET
    path:
      - "{{BaseURL}}/admin"
    matchers-condition: and
    matchers:
      - type: status
        status:
          - 200
      - type: word
        words:
          - "Admin Console"
"#;

    #[test]
    fn test_parse_and_compile_http_template() {
        let doc = parse(BASIC_HTTP).unwrap();
        assert_eq!(doc.id, "exposed-panel");
        assert_eq!(doc.info.severity, Severity::Medium);
        let compiled = compile(doc).unwrap();
        assert_eq!(compiled.protocol, Protocol::Http);
        assert_eq!(compiled.stages.len(), 1);
        assert_eq!(compiled.stages[0].matchers.len(), 2);
        assert_eq!(compiled.stages[0].matchers_condition, Condition::And);
        assert_eq!(compiled.requests(), 1);
    }

    #[test]
    fn test_missing_protocol_rejected() {
        let doc = parse("id: empty\ninfo:\n  name: x\n").unwrap();
        assert!(matches!(
            compile(doc),
            Err(TemplateError::MissingProtocol { .. })
        ));
    }

    #[test]
    fn test_interactsh_detection() {
        let yaml = r#"
id: blind-ssrf
info:
  name: Blind SSRF
  severity: high
http:
  - method: GET
    path:
      - "{{BaseURL}}/fetch?url=http://{{interactsh-url}}/probe"
    matchers:
      - type: word
        part: all
        words:
          - "dns"
        dsl:
          - "interactsh_protocol == 'dns'"
"#;
        let compiled = compile(parse(yaml).unwrap()).unwrap();
        assert!(compiled.stages[0].uses_interactsh);
        assert!(compiled.stages[0].defers_matching);
    }

    #[test]
    fn test_cluster_key_static_get() {
        let compiled = compile(parse(BASIC_HTTP).unwrap()).unwrap();
        assert!(compiled.cluster_key().is_some());

        let yaml = r#"
id: fuzzer
info:
  name: Fuzzer
  severity: low
http:
  - method: GET
    path:
      - "{{BaseURL}}/{{word}}"
    payloads:
      word:
        - admin
        - login
    matchers:
      - type: status
        status: [200]
"#;
        let fuzz = compile(parse(yaml).unwrap()).unwrap();
        assert!(fuzz.cluster_key().is_none());
    }

    #[test]
    fn test_cluster_key_excludes_template_variables() {
        let yaml = r#"
id: marked
info:
  name: Marked
  severity: info
variables:
  marker: probe-one
http:
  - method: GET
    path:
      - "{{BaseURL}}/{{marker}}"
    matchers:
      - type: status
        status: [200]
"#;
        let compiled = compile(parse(yaml).unwrap()).unwrap();
        assert!(compiled.cluster_key().is_none());
    }

    #[test]
    fn test_dns_template() {
        let yaml = r#"
id: cname-check
info:
  name: CNAME check
  severity: info
dns:
  - name: "{{FQDN}}"
    type: CNAME
    matchers:
      - type: word
        words:
          - "github.io"
"#;
        let compiled = compile(parse(yaml).unwrap()).unwrap();
        assert_eq!(compiled.protocol, Protocol::Dns);
    }

    #[test]
    fn test_workflow_doc() {
        let yaml = r#"
id: tech-chain
info:
  name: Detect then exploit
  severity: info
workflows:
  - template: tech-detect
    matchers:
      - wordpress
    subtemplates:
      - template: wp-exploit
"#;
        let doc = parse(yaml).unwrap();
        assert_eq!(doc.workflows.len(), 1);
        assert_eq!(doc.workflows[0].subtemplates.len(), 1);
    }

    #[test]
    fn test_severity_filter() {
        let options = ScanOptions {
            severities: vec![Severity::Critical],
            ..Default::default()
        };
        let doc = parse(BASIC_HTTP).unwrap();
        assert!(!passes_filters(&doc, &options));
    }

    #[test]
    fn test_exclude_tags_filter() {
        let options = ScanOptions {
            exclude_tags: vec!["panel".into()],
            ..Default::default()
        };
        let doc = parse(BASIC_HTTP).unwrap();
        assert!(!passes_filters(&doc, &options));
    }

    #[test]
    fn test_requests_counts_payload_expansion() {
        let yaml = r#"
id: brute
info:
  name: Brute
  severity: low
http:
  - method: POST
    path:
      - "{{BaseURL}}/login"
    payloads:
      user: [a, b]
      pass: [x, y, z]
    attack: clusterbomb
    matchers:
      - type: status
        status: [302]
"#;
        let compiled = compile(parse(yaml).unwrap()).unwrap();
        assert_eq!(compiled.requests(), 6);
    }
}
