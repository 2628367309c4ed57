// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Tutka Execution Context
 * Per-execution variable environment with template interpolation
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::dsl::{CompiledExpression, DslValue, VariableLookup};
use crate::input::MetaInput;

/// Per-execution keyed store with three layers, looked up innermost-first:
/// stage-local (response fields, extractor outputs), template (declared
/// variables), global (scan options, per-target values).
#[derive(Debug, Clone, Default)]
pub struct VariableEnvironment {
    stage: HashMap<String, DslValue>,
    template: HashMap<String, DslValue>,
    global: HashMap<String, DslValue>,
}

impl VariableEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the global layer from target metadata
    pub fn for_target(target: &MetaInput) -> Self {
        let mut env = Self::new();
        env.set_global("Host", DslValue::String(target.hostname()));
        env.set_global("Hostname", DslValue::String(target.host_key()));
        env.set_global("BaseURL", DslValue::String(target.base_url()));
        env.set_global("RootURL", DslValue::String(target.base_url()));
        env.set_global("input", DslValue::String(target.input.clone()));
        if let Some(port) = target.port() {
            env.set_global("Port", DslValue::Int(port as i64));
        }
        if let Some(ip) = &target.custom_ip {
            env.set_global("ip", DslValue::String(ip.clone()));
        }
        env
    }

    pub fn set_stage(&mut self, key: impl Into<String>, value: DslValue) {
        self.stage.insert(key.into(), value);
    }

    pub fn set_template(&mut self, key: impl Into<String>, value: DslValue) {
        self.template.insert(key.into(), value);
    }

    pub fn set_global(&mut self, key: impl Into<String>, value: DslValue) {
        self.global.insert(key.into(), value);
    }

    /// Merge driver-returned values into the stage layer; later stages of
    /// the same execution see them, other executions never do.
    pub fn merge_stage(&mut self, values: HashMap<String, DslValue>) {
        self.stage.extend(values);
    }

    pub fn get(&self, key: &str) -> Option<DslValue> {
        self.stage
            .get(key)
            .or_else(|| self.template.get(key))
            .or_else(|| self.global.get(key))
            .cloned()
    }

    /// Snapshot of every visible binding, innermost winning
    pub fn flatten(&self) -> HashMap<String, DslValue> {
        let mut out = self.global.clone();
        out.extend(self.template.clone());
        out.extend(self.stage.clone());
        out
    }

    /// Replace every `{{ expr }}` token by evaluating the expression in
    /// this environment. Undefined variables interpolate to empty string;
    /// an expression that fails to compile is left in place.
    pub fn interpolate(&self, input: &str) -> String {
        if !input.contains("{{") {
            return input.to_string();
        }
        let mut out = String::with_capacity(input.len());
        let mut rest = input;
        while let Some(start) = rest.find("{{") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            match after.find("}}") {
                Some(end) => {
                    let expr_src = after[..end].trim();
                    // plain names resolve directly; placeholder names may
                    // carry dashes the expression grammar does not accept
                    if let Some(value) = self.get(expr_src) {
                        out.push_str(&value.to_string());
                    } else {
                        match CompiledExpression::compile(expr_src)
                            .and_then(|e| e.evaluate_lenient(self))
                        {
                            Ok(value) => out.push_str(&value.to_string()),
                            Err(e) => {
                                debug!("Interpolation left {{{{{expr_src}}}}} in place: {e}");
                                out.push_str("{{");
                                out.push_str(&after[..end]);
                                out.push_str("}}");
                            }
                        }
                    }
                    rest = &after[end + 2..];
                }
                None => {
                    out.push_str("{{");
                    rest = after;
                }
            }
        }
        out.push_str(rest);
        out
    }
}

impl VariableLookup for VariableEnvironment {
    fn lookup(&self, name: &str) -> Option<DslValue> {
        self.get(name)
    }
}

/// Per-(template, target) execution instance. Contexts are cloned from
/// scan-level state, never shared between executions.
pub struct ExecutionContext {
    /// The scan subject, cloned per execution
    pub target: MetaInput,
    /// Execution-scoped environment
    pub env: VariableEnvironment,
    /// Correlation id, also used for interactsh registration
    pub correlation_id: String,
    /// Scan-wide cancellation
    pub cancel: CancellationToken,
    /// Cookie store shared by the stages of this execution only
    pub cookie_jar: Arc<reqwest::cookie::Jar>,
}

impl ExecutionContext {
    pub fn new(target: MetaInput, cancel: CancellationToken) -> Self {
        let env = VariableEnvironment::for_target(&target);
        let cookie_jar = Arc::new(reqwest::cookie::Jar::default());
        // pre-authenticated cookies from structured targets
        if !target.cookies.is_empty() {
            if let Ok(url) = target.base_url().parse() {
                for (name, value) in &target.cookies {
                    cookie_jar.add_cookie_str(&format!("{name}={value}"), &url);
                }
            }
        }
        Self {
            target,
            env,
            correlation_id: uuid::Uuid::new_v4().simple().to_string(),
            cancel,
            cookie_jar,
        }
    }

    /// Child context for a workflow subtemplate: same target, fresh stage
    /// state, parent's extracted values in the global layer.
    pub fn child_with(&self, inherited: HashMap<String, DslValue>) -> Self {
        let mut ctx = Self::new(self.target.clone(), self.cancel.clone());
        for (k, v) in inherited {
            ctx.env.set_global(k, v);
        }
        ctx
    }
}
