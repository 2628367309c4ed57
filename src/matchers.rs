// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Tutka Matchers
 * Match predicates over stage responses
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use crate::context::VariableEnvironment;
use crate::dsl::CompiledExpression;
use crate::errors::TemplateError;

/// Which part of the response a matcher inspects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ResponsePart {
    #[default]
    Body,
    Header,
    /// Headers and body together
    Response,
    All,
}

/// and/or across a matcher's own patterns, or across a matcher group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Condition {
    And,
    Or,
}

impl Default for Condition {
    fn default() -> Self {
        Condition::Or
    }
}

/// Matcher declaration, straight from the template document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatcherDef {
    #[serde(rename = "type")]
    pub kind: MatcherKind,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub part: ResponsePart,
    #[serde(default)]
    pub condition: Condition,
    #[serde(default)]
    pub negative: bool,
    #[serde(rename = "case-insensitive", default)]
    pub case_insensitive: bool,
    #[serde(default)]
    pub status: Vec<u16>,
    #[serde(default)]
    pub size: Vec<usize>,
    #[serde(default)]
    pub words: Vec<String>,
    #[serde(default)]
    pub regex: Vec<String>,
    #[serde(default)]
    pub binary: Vec<String>,
    #[serde(default)]
    pub dsl: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatcherKind {
    Status,
    Size,
    Word,
    Regex,
    Binary,
    Dsl,
}

/// Stage response view the matchers evaluate against
#[derive(Debug, Clone, Default)]
pub struct ResponseData {
    pub status: Option<u16>,
    pub headers: String,
    pub body: String,
    pub matched_at: String,
}

impl ResponseData {
    fn part(&self, part: ResponsePart) -> String {
        match part {
            ResponsePart::Body => self.body.clone(),
            ResponsePart::Header => self.headers.clone(),
            ResponsePart::Response | ResponsePart::All => {
                format!("{}\n{}", self.headers, self.body)
            }
        }
    }
}

/// Compiled matcher: regexes precompiled, DSL parsed, hex decoded.
#[derive(Debug, Clone)]
pub struct CompiledMatcher {
    pub def: MatcherDef,
    regexes: Vec<Regex>,
    binaries: Vec<Vec<u8>>,
    dsl: Vec<CompiledExpression>,
}

impl CompiledMatcher {
    pub fn compile(def: MatcherDef, template_id: &str) -> Result<Self, TemplateError> {
        let mut regexes = Vec::new();
        for pattern in &def.regex {
            let re = Regex::new(pattern).map_err(|_| TemplateError::InvalidRegex {
                id: template_id.to_string(),
                pattern: pattern.clone(),
            })?;
            regexes.push(re);
        }
        let mut binaries = Vec::new();
        for hex_str in &def.binary {
            let bytes = hex::decode(hex_str).map_err(|e| TemplateError::Parse {
                id: template_id.to_string(),
                reason: format!("invalid binary matcher {hex_str:?}: {e}"),
            })?;
            binaries.push(bytes);
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
            binaries,
            dsl,
        })
    }

    /// Evaluate against a response. Returns (matched, matched snippets).
    /// `negative` inverts the raw outcome; inverted matches carry no
    /// snippets.
    pub fn matches(
        &self,
        response: &ResponseData,
        env: &VariableEnvironment,
    ) -> (bool, Vec<String>) {
        let (raw, snippets) = self.matches_raw(response, env);
        if self.def.negative {
            (!raw, Vec::new())
        } else {
            (raw, snippets)
        }
    }

    fn matches_raw(
        &self,
        response: &ResponseData,
        env: &VariableEnvironment,
    ) -> (bool, Vec<String>) {
        match self.def.kind {
            MatcherKind::Status => {
                let status = match response.status {
                    Some(s) => s,
                    None => return (false, Vec::new()),
                };
                let hit = self.def.status.contains(&status);
                let snippets = if hit { vec![status.to_string()] } else { vec![] };
                (hit, snippets)
            }
            MatcherKind::Size => {
                let len = response.body.len();
                let hit = self.def.size.contains(&len);
                let snippets = if hit { vec![len.to_string()] } else { vec![] };
                (hit, snippets)
            }
            MatcherKind::Word => {
                let haystack = response.part(self.def.part);
                let haystack = if self.def.case_insensitive {
                    haystack.to_lowercase()
                } else {
                    haystack
                };
                let mut hits = Vec::new();
                for word in &self.def.words {
                    // interpolate so words may reference variables
                    let needle = env.interpolate(word);
                    let needle = if self.def.case_insensitive {
                        needle.to_lowercase()
                    } else {
                        needle
                    };
                    let found = haystack.contains(&needle);
                    match self.def.condition {
                        Condition::And if !found => return (false, Vec::new()),
                        Condition::Or if found => hits.push(needle),
                        _ => {
                            if found {
                                hits.push(needle);
                            }
                        }
                    }
                }
                match self.def.condition {
                    Condition::And => (hits.len() == self.def.words.len(), hits),
                    Condition::Or => (!hits.is_empty(), hits),
                }
            }
            MatcherKind::Regex => {
                let haystack = response.part(self.def.part);
                let mut hits = Vec::new();
                for re in &self.regexes {
                    match re.find(&haystack) {
                        Some(m) => hits.push(m.as_str().to_string()),
                        None => {
                            if self.def.condition == Condition::And {
                                return (false, Vec::new());
                            }
                        }
                    }
                }
                match self.def.condition {
                    Condition::And => (hits.len() == self.regexes.len(), hits),
                    Condition::Or => (!hits.is_empty(), hits),
                }
            }
            MatcherKind::Binary => {
                let haystack = response.part(self.def.part);
                let bytes = haystack.as_bytes();
                let mut hits = Vec::new();
                for (needle, hex_src) in self.binaries.iter().zip(&self.def.binary) {
                    let found = bytes
                        .windows(needle.len().max(1))
                        .any(|w| w == needle.as_slice());
                    if found {
                        hits.push(hex_src.clone());
                    } else if self.def.condition == Condition::And {
                        return (false, Vec::new());
                    }
                }
                match self.def.condition {
                    Condition::And => (hits.len() == self.binaries.len(), hits),
                    Condition::Or => (!hits.is_empty(), hits),
                }
            }
            MatcherKind::Dsl => {
                let mut hits = Vec::new();
                for expr in &self.dsl {
                    // undefined variables fail this matcher closed
                    match expr.evaluate(env) {
                        Ok(v) if v.as_bool() => hits.push(expr.source().to_string()),
                        Ok(_) => {
                            if self.def.condition == Condition::And {
                                return (false, Vec::new());
                            }
                        }
                        Err(e) => {
                            debug!("DSL matcher failed closed: {e}");
                            if self.def.condition == Condition::And {
                                return (false, Vec::new());
                            }
                        }
                    }
                }
                match self.def.condition {
                    Condition::And => (hits.len() == self.dsl.len(), hits),
                    Condition::Or => (!hits.is_empty(), hits),
                }
            }
        }
    }
}

/// Outcome of evaluating a stage's matcher group
#[derive(Debug, Clone, Default)]
pub struct MatchOutcome {
    pub matched: bool,
    /// matcher name -> matched snippets, list-ordered
    pub matches: Vec<(Option<String>, Vec<String>)>,
}

/// Evaluate a matcher group in list order with short-circuit per the
/// group condition.
pub fn evaluate_group(
    matchers: &[CompiledMatcher],
    condition: Condition,
    response: &ResponseData,
    env: &VariableEnvironment,
) -> MatchOutcome {
    if matchers.is_empty() {
        return MatchOutcome::default();
    }
    let mut outcome = MatchOutcome::default();
    for matcher in matchers {
        let (hit, snippets) = matcher.matches(response, env);
        match condition {
            Condition::And => {
                if !hit {
                    return MatchOutcome::default();
                }
                outcome.matches.push((matcher.def.name.clone(), snippets));
            }
            Condition::Or => {
                if hit {
                    outcome.matched = true;
                    outcome.matches.push((matcher.def.name.clone(), snippets));
                }
            }
        }
    }
    if condition == Condition::And {
        outcome.matched = true;
    }
    outcome
}

/// Build the stage-local response variables every matcher / extractor /
/// DSL evaluation sees.
pub fn response_variables(response: &ResponseData) -> HashMap<String, crate::dsl::DslValue> {
    use crate::dsl::DslValue;
    let mut vars = HashMap::new();
    if let Some(status) = response.status {
        vars.insert("status_code".to_string(), DslValue::Int(status as i64));
    }
    vars.insert("body".to_string(), DslValue::String(response.body.clone()));
    vars.insert(
        "all_headers".to_string(),
        DslValue::String(response.headers.clone()),
    );
    vars.insert(
        "header".to_string(),
        DslValue::String(response.headers.clone()),
    );
    vars.insert(
        "content_length".to_string(),
        DslValue::Int(response.body.len() as i64),
    );
    vars
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(def: MatcherDef) -> CompiledMatcher {
        CompiledMatcher::compile(def, "test").unwrap()
    }

    fn status_matcher(codes: Vec<u16>) -> MatcherDef {
        MatcherDef {
            kind: MatcherKind::Status,
            name: None,
            part: ResponsePart::Body,
            condition: Condition::Or,
            negative: false,
            case_insensitive: false,
            status: codes,
            size: vec![],
            words: vec![],
            regex: vec![],
            binary: vec![],
            dsl: vec![],
        }
    }

    fn word_matcher(words: Vec<&str>, condition: Condition) -> MatcherDef {
        MatcherDef {
            kind: MatcherKind::Word,
            name: None,
            part: ResponsePart::Body,
            condition,
            negative: false,
            case_insensitive: false,
            status: vec![],
            size: vec![],
            words: words.into_iter().map(String::from).collect(),
            regex: vec![],
            binary: vec![],
            dsl: vec![],
        }
    }

    fn response(status: u16, body: &str) -> ResponseData {
        ResponseData {
            status: Some(status),
            headers: "Server: nginx\nContent-Type: text/html".into(),
            body: body.into(),
            matched_at: "http://example.com/".into(),
        }
    }

    #[test]
    fn test_status_matcher() {
        let m = compile(status_matcher(vec![200, 204]));
        let env = VariableEnvironment::new();
        assert!(m.matches(&response(200, ""), &env).0);
        assert!(!m.matches(&response(404, ""), &env).0);
    }

    #[test]
    fn test_word_matcher_or_and() {
        let env = VariableEnvironment::new();
        let or = compile(word_matcher(vec!["admin", "login"], Condition::Or));
        assert!(or.matches(&response(200, "the login page"), &env).0);

        let and = compile(word_matcher(vec!["admin", "login"], Condition::And));
        assert!(!and.matches(&response(200, "the login page"), &env).0);
        assert!(and.matches(&response(200, "admin login page"), &env).0);
    }

    #[test]
    fn test_word_case_insensitive() {
        let mut def = word_matcher(vec!["ADMIN"], Condition::Or);
        def.case_insensitive = true;
        let m = compile(def);
        let env = VariableEnvironment::new();
        assert!(m.matches(&response(200, "the admin page"), &env).0);
    }

    #[test]
    fn test_word_part_header() {
        let mut def = word_matcher(vec!["nginx"], Condition::Or);
        def.part = ResponsePart::Header;
        let m = compile(def);
        let env = VariableEnvironment::new();
        assert!(m.matches(&response(200, "no server here"), &env).0);
    }

    #[test]
    fn test_negative_matcher_inverts() {
        let mut def = word_matcher(vec!["error"], Condition::Or);
        def.negative = true;
        let m = compile(def);
        let env = VariableEnvironment::new();
        assert!(m.matches(&response(200, "all fine"), &env).0);
        assert!(!m.matches(&response(200, "an error occurred"), &env).0);
    }

    #[test]
    fn test_regex_matcher() {
        let def = MatcherDef {
            kind: MatcherKind::Regex,
            regex: vec![r"version [0-9]+\.[0-9]+".into()],
            ..status_matcher(vec![])
        };
        let m = compile(def);
        let env = VariableEnvironment::new();
        let (hit, snippets) = m.matches(&response(200, "running version 2.14 now"), &env);
        assert!(hit);
        assert_eq!(snippets, vec!["version 2.14"]);
    }

    #[test]
    fn test_invalid_regex_is_compile_error() {
        let def = MatcherDef {
            kind: MatcherKind::Regex,
            regex: vec!["([unclosed".into()],
            ..status_matcher(vec![])
        };
        assert!(CompiledMatcher::compile(def, "t").is_err());
    }

    #[test]
    fn test_binary_matcher() {
        let def = MatcherDef {
            kind: MatcherKind::Binary,
            binary: vec!["504b0304".into()], // zip magic
            ..status_matcher(vec![])
        };
        let m = compile(def);
        let env = VariableEnvironment::new();
        let body = String::from_utf8_lossy(&[0x50, 0x4b, 0x03, 0x04, 0x20]).into_owned();
        let resp = ResponseData {
            status: Some(200),
            headers: String::new(),
            body,
            matched_at: String::new(),
        };
        assert!(m.matches(&resp, &env).0);
    }

    #[test]
    fn test_dsl_matcher_fails_closed_on_undefined() {
        let def = MatcherDef {
            kind: MatcherKind::Dsl,
            dsl: vec!["never_bound == 'x'".into()],
            ..status_matcher(vec![])
        };
        let m = compile(def);
        let env = VariableEnvironment::new();
        assert!(!m.matches(&response(200, ""), &env).0);
    }

    #[test]
    fn test_group_and_short_circuits() {
        let env = VariableEnvironment::new();
        let matchers = vec![
            compile(status_matcher(vec![200])),
            compile(word_matcher(vec!["admin"], Condition::Or)),
        ];
        let out = evaluate_group(
            &matchers,
            Condition::And,
            &response(200, "plain page"),
            &env,
        );
        assert!(!out.matched);

        let out = evaluate_group(
            &matchers,
            Condition::And,
            &response(200, "admin page"),
            &env,
        );
        assert!(out.matched);
        assert_eq!(out.matches.len(), 2);
    }

    #[test]
    fn test_group_or_collects_all_hits() {
        let env = VariableEnvironment::new();
        let matchers = vec![
            compile(MatcherDef {
                name: Some("status-ok".into()),
                ..status_matcher(vec![200])
            }),
            compile(MatcherDef {
                name: Some("word-hit".into()),
                ..word_matcher(vec!["admin"], Condition::Or)
            }),
        ];
        let out = evaluate_group(&matchers, Condition::Or, &response(200, "admin"), &env);
        assert!(out.matched);
        assert_eq!(out.matches.len(), 2);
        assert_eq!(out.matches[0].0.as_deref(), Some("status-ok"));
    }
}
