// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Tutka Extractors
 * Named captures from stage responses
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use crate::context::VariableEnvironment;
use crate::dsl::{CompiledExpression, DslValue};
use crate::errors::TemplateError;
use crate::matchers::{ResponseData, ResponsePart};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractorKind {
    Regex,
    Kval,
    Xpath,
    Json,
    Dsl,
}

/// Extractor declaration from the template document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractorDef {
    #[serde(rename = "type")]
    pub kind: ExtractorKind,
    /// Captures land in the stage environment under this name; anonymous
    /// extractor outputs only attach to the emitted event.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub part: ResponsePart,
    #[serde(default)]
    pub regex: Vec<String>,
    /// Regex submatch group
    #[serde(default)]
    pub group: usize,
    /// Header / cookie keys for kval
    #[serde(default)]
    pub kval: Vec<String>,
    #[serde(default)]
    pub xpath: Vec<String>,
    /// Attribute to read from xpath-selected elements
    #[serde(default)]
    pub attribute: Option<String>,
    /// JSON field paths, dot separated
    #[serde(default)]
    pub json: Vec<String>,
    #[serde(default)]
    pub dsl: Vec<String>,
    /// Internal extractors feed later stages but are not reported
    #[serde(default)]
    pub internal: bool,
}

#[derive(Debug, Clone)]
pub struct CompiledExtractor {
    pub def: ExtractorDef,
    regexes: Vec<Regex>,
    selectors: Vec<scraper::Selector>,
    dsl: Vec<CompiledExpression>,
}

impl CompiledExtractor {
    pub fn compile(def: ExtractorDef, template_id: &str) -> Result<Self, TemplateError> {
        let mut regexes = Vec::new();
        for pattern in &def.regex {
            let re = Regex::new(pattern).map_err(|_| TemplateError::InvalidRegex {
                id: template_id.to_string(),
                pattern: pattern.clone(),
            })?;
            regexes.push(re);
        }
        let mut selectors = Vec::new();
        for xpath in &def.xpath {
            let css = xpath_to_css(xpath).ok_or_else(|| TemplateError::Parse {
                id: template_id.to_string(),
                reason: format!("unsupported xpath expression {xpath:?}"),
            })?;
            let selector = scraper::Selector::parse(&css).map_err(|e| TemplateError::Parse {
                id: template_id.to_string(),
                reason: format!("xpath {xpath:?} -> selector {css:?}: {e:?}"),
            })?;
            selectors.push(selector);
        }
        let mut dsl = Vec::new();
        for expr in &def.dsl {
            let compiled =
                CompiledExpression::compile(expr).map_err(|e| TemplateError::InvalidDsl {
                    id: template_id.to_string(),
                    reason: format!("{expr:?}: {e}"),
                })?;
            dsl.push(compiled);
        }
        Ok(Self {
            def,
            regexes,
            selectors,
            dsl,
        })
    }

    /// Run the extractor; returns captured values in document order.
    pub fn extract(&self, response: &ResponseData, env: &VariableEnvironment) -> Vec<String> {
        match self.def.kind {
            ExtractorKind::Regex => {
                let haystack = part_text(response, self.def.part);
                let mut out = Vec::new();
                for re in &self.regexes {
                    for caps in re.captures_iter(&haystack) {
                        if let Some(m) = caps.get(self.def.group) {
                            out.push(m.as_str().to_string());
                        }
                    }
                }
                out
            }
            ExtractorKind::Kval => {
                let mut out = Vec::new();
                for key in &self.def.kval {
                    // header names are matched case-insensitively, with
                    // underscores accepted for dashes
                    let wanted = key.to_lowercase().replace('_', "-");
                    for line in response.headers.lines() {
                        if let Some((name, value)) = line.split_once(':') {
                            if name.trim().to_lowercase() == wanted {
                                out.push(value.trim().to_string());
                            }
                        }
                    }
                }
                out
            }
            ExtractorKind::Xpath => {
                let document = scraper::Html::parse_document(&response.body);
                let mut out = Vec::new();
                for selector in &self.selectors {
                    for element in document.select(selector) {
                        match &self.def.attribute {
                            Some(attr) => {
                                if let Some(value) = element.value().attr(attr) {
                                    out.push(value.to_string());
                                }
                            }
                            None => {
                                let text: String = element.text().collect::<Vec<_>>().join("");
                                let text = text.trim().to_string();
                                if !text.is_empty() {
                                    out.push(text);
                                }
                            }
                        }
                    }
                }
                out
            }
            ExtractorKind::Json => {
                let parsed: serde_json::Value = match serde_json::from_str(&response.body) {
                    Ok(v) => v,
                    Err(_) => return Vec::new(),
                };
                let mut out = Vec::new();
                for path in &self.def.json {
                    collect_json_path(&parsed, path, &mut out);
                }
                out
            }
            ExtractorKind::Dsl => {
                let mut out = Vec::new();
                for expr in &self.dsl {
                    match expr.evaluate(env) {
                        Ok(DslValue::String(s)) if s.is_empty() => {}
                        Ok(v) => out.push(v.to_string()),
                        Err(e) => debug!("DSL extractor yielded nothing: {e}"),
                    }
                }
                out
            }
        }
    }
}

fn part_text(response: &ResponseData, part: ResponsePart) -> String {
    match part {
        ResponsePart::Body => response.body.clone(),
        ResponsePart::Header => response.headers.clone(),
        ResponsePart::Response | ResponsePart::All => {
            format!("{}\n{}", response.headers, response.body)
        }
    }
}

/// Translate the common absolute-path XPath subset into a scraper
/// selector: `//tag`, `//tag[@attr='v']`, `/html/body/div`, with an
/// optional trailing `/@attr` handled by the caller via `attribute`.
/// Unsupported axes return None and fail template compilation.
fn xpath_to_css(xpath: &str) -> Option<String> {
    let mut expr = xpath.trim().to_string();
    if expr.is_empty() || expr.contains("::") || expr.contains("..") {
        return None;
    }
    // trailing attribute selection
    if let Some(idx) = expr.rfind("/@") {
        expr.truncate(idx);
    }
    let descendant = expr.starts_with("//");
    let trimmed = expr.trim_start_matches('/');
    let mut css_parts = Vec::new();
    for step in trimmed.split('/') {
        if step.is_empty() {
            return None;
        }
        let css = if let Some((tag, predicate)) = step.split_once('[') {
            let predicate = predicate.strip_suffix(']')?;
            let predicate = predicate.strip_prefix('@')?;
            let (attr, value) = match predicate.split_once('=') {
                Some((attr, value)) => {
                    let value = value.trim_matches('\'').trim_matches('"');
                    (attr, Some(value))
                }
                None => (predicate, None),
            };
            match value {
                Some(v) => format!("{tag}[{attr}=\"{v}\"]"),
                None => format!("{tag}[{attr}]"),
            }
        } else {
            step.to_string()
        };
        if css.contains('(') || css.contains('*') {
            return None;
        }
        css_parts.push(css);
    }
    if css_parts.is_empty() {
        return None;
    }
    Some(if descendant {
        css_parts.join(" ")
    } else {
        css_parts.join(" > ")
    })
}

fn collect_json_path(value: &serde_json::Value, path: &str, out: &mut Vec<String>) {
    let mut current = value;
    for segment in path.trim_start_matches('.').split('.') {
        if segment.is_empty() {
            continue;
        }
        match current {
            serde_json::Value::Object(map) => match map.get(segment) {
                Some(next) => current = next,
                None => return,
            },
            serde_json::Value::Array(items) => match segment.parse::<usize>() {
                Ok(idx) if idx < items.len() => current = &items[idx],
                _ => return,
            },
            _ => return,
        }
    }
    match current {
        serde_json::Value::String(s) => out.push(s.clone()),
        serde_json::Value::Array(items) => {
            for item in items {
                match item {
                    serde_json::Value::String(s) => out.push(s.clone()),
                    other => out.push(other.to_string()),
                }
            }
        }
        serde_json::Value::Null => {}
        other => out.push(other.to_string()),
    }
}

/// Run every extractor; named captures go into the returned map (joined
/// into the stage environment by the executor), all values are returned
/// for event attachment.
pub fn evaluate_all(
    extractors: &[CompiledExtractor],
    response: &ResponseData,
    env: &VariableEnvironment,
) -> (HashMap<String, Vec<String>>, Vec<String>) {
    let mut named: HashMap<String, Vec<String>> = HashMap::new();
    let mut all = Vec::new();
    for extractor in extractors {
        let values = extractor.extract(response, env);
        if values.is_empty() {
            continue;
        }
        if let Some(name) = &extractor.def.name {
            named.entry(name.clone()).or_default().extend(values.clone());
        }
        if !extractor.def.internal {
            all.extend(values);
        }
    }
    (named, all)
}
