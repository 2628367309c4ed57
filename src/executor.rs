// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Tutka Template Executor
 * Per-(template, target) state machine over stages
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::context::ExecutionContext;
use crate::dsl::DslValue;
use crate::errors::ScanError;
use crate::extractors::evaluate_all;
use crate::input::MetaInput;
use crate::interactsh::{InteractshClient, PendingRequest};
use crate::matchers::{evaluate_group, MatchOutcome};
use crate::protocols::{execute_stage, InternalEvent, ProtocolRuntime};
use crate::template::{CompiledStage, CompiledTemplate};
use crate::types::ResultEvent;

/// Response excerpt cap on emitted events
const EXCERPT_LIMIT: usize = 4096;

/// Everything one execution produced, for the engine and for workflow
/// gating.
#[derive(Debug, Default)]
pub struct ExecutionOutcome {
    pub events: Vec<ResultEvent>,
    pub matched: bool,
    /// Names of matchers that fired, for workflow node filters
    pub matched_names: Vec<String>,
    /// Named extractor captures, carried into workflow children
    pub extracted: HashMap<String, Vec<String>>,
}

/// Drives one template against one target: seeds the environment,
/// iterates stages, threads variables, and emits result events.
pub struct TemplateExecutor {
    runtime: Arc<ProtocolRuntime>,
    interactsh: Option<Arc<InteractshClient>>,
}

impl TemplateExecutor {
    pub fn new(runtime: Arc<ProtocolRuntime>, interactsh: Option<Arc<InteractshClient>>) -> Self {
        Self { runtime, interactsh }
    }

    pub fn runtime(&self) -> &Arc<ProtocolRuntime> {
        &self.runtime
    }

    /// Execute the full template. `inherited` seeds the global layer for
    /// workflow children.
    pub async fn execute(
        &self,
        template: &CompiledTemplate,
        target: &MetaInput,
        cancel: CancellationToken,
        inherited: Option<HashMap<String, DslValue>>,
    ) -> Result<ExecutionOutcome, ScanError> {
        let mut ctx = ExecutionContext::new(target.clone(), cancel);
        if let Some(inherited) = inherited {
            for (k, v) in inherited {
                ctx.env.set_global(k, v);
            }
        }
        for (k, v) in &self.runtime.options.vars {
            ctx.env.set_global(k.clone(), DslValue::String(v.clone()));
        }
        // template variables interpolate once per execution, before stage 1
        for (k, v) in &template.variables {
            let value = ctx.env.interpolate(v);
            ctx.env.set_template(k.clone(), DslValue::String(value));
        }

        let mut outcome = ExecutionOutcome::default();
        let mut emitted: HashSet<String> = HashSet::new();
        let host_key = ctx.target.host_key();

        'stages: for (stage_index, stage) in template.stages.iter().enumerate() {
            if ctx.cancel.is_cancelled() {
                return Err(ScanError::Cancelled);
            }
            // a blacklisted host ends the whole execution
            if !template.self_contained && self.runtime.host_errors.check(&host_key) {
                self.runtime.stats.incr_hosts_skipped();
                debug!(
                    "Skipping {} stage {stage_index} for {host_key}: host over error threshold",
                    template.id
                );
                return Err(ScanError::HostSkipped {
                    host: host_key.clone(),
                    errors: self.runtime.host_errors.error_count(&host_key),
                });
            }

            let tuples: Vec<Vec<(String, String)>> = if stage.payloads.is_empty() {
                vec![Vec::new()]
            } else {
                stage.payloads.iter(stage.attack).collect()
            };

            for tuple in tuples {
                if ctx.cancel.is_cancelled() {
                    return Err(ScanError::Cancelled);
                }
                // payload values live in the stage layer of a per-tuple
                // environment so tuples never see each other's bindings
                let mut exec_ctx = ExecutionContext {
                    target: ctx.target.clone(),
                    env: ctx.env.clone(),
                    correlation_id: ctx.correlation_id.clone(),
                    cancel: ctx.cancel.clone(),
                    cookie_jar: Arc::clone(&ctx.cookie_jar),
                };
                for (name, value) in &tuple {
                    exec_ctx
                        .env
                        .set_stage(name.clone(), DslValue::String(value.clone()));
                }
                if stage.uses_interactsh {
                    if let Some(interactsh) = &self.interactsh {
                        // one correlation per driver invocation
                        exec_ctx.correlation_id = uuid::Uuid::new_v4().simple().to_string();
                        let oob_url = interactsh.new_interaction_url(&exec_ctx.correlation_id);
                        exec_ctx
                            .env
                            .set_stage("interactsh-url", DslValue::String(oob_url));
                    }
                }

                let events = self
                    .run_stage_with_retries(template, stage, &exec_ctx)
                    .await?;

                for event in &events {
                    // stage-local writes feed later stages of this execution
                    ctx.env.merge_stage(event.variables.clone());
                    exec_ctx.env.merge_stage(event.variables.clone());
                    // numbered copies let multi-stage expressions reach any
                    // earlier response (status_code_1, body_2, ...)
                    for (name, value) in &event.variables {
                        let numbered = format!("{name}_{}", stage_index + 1);
                        ctx.env.set_stage(numbered.clone(), value.clone());
                        exec_ctx.env.set_stage(numbered, value.clone());
                    }

                    let match_outcome = match &event.matched {
                        Some(pre_computed) => pre_computed.clone(),
                        None => {
                            if stage.defers_matching {
                                MatchOutcome::default()
                            } else {
                                evaluate_group(
                                    &stage.matchers,
                                    stage.matchers_condition,
                                    &event.response,
                                    &exec_ctx.env,
                                )
                            }
                        }
                    };

                    let (named, attached) =
                        evaluate_all(&stage.extractors, &event.response, &exec_ctx.env);
                    for (name, values) in &named {
                        let joined = values.join(",");
                        ctx.env
                            .set_stage(name.clone(), DslValue::String(joined.clone()));
                        exec_ctx
                            .env
                            .set_stage(name.clone(), DslValue::String(joined));
                        outcome
                            .extracted
                            .entry(name.clone())
                            .or_default()
                            .extend(values.clone());
                    }

                    // an extractor hit with no matchers declared also
                    // constitutes a finding
                    let extractor_only = stage.matchers.is_empty() && !attached.is_empty();
                    if match_outcome.matched || extractor_only {
                        outcome.matched = true;
                        for (name, _) in &match_outcome.matches {
                            if let Some(name) = name {
                                outcome.matched_names.push(name.clone());
                            }
                        }
                        self.emit(
                            template,
                            &ctx,
                            event,
                            &match_outcome,
                            attached,
                            &mut emitted,
                            &mut outcome.events,
                        );
                        if template.stop_at_first_match || stage.stop_at_first_match {
                            break 'stages;
                        }
                    }
                }

                // deferred matchers finish later, on interaction arrival
                if stage.defers_matching {
                    if let Some(interactsh) = &self.interactsh {
                        let request_excerpt =
                            events.iter().find_map(|e| e.raw_request.clone());
                        let matched_at = events
                            .iter()
                            .map(|e| e.response.matched_at.clone())
                            .find(|m| !m.is_empty())
                            .unwrap_or_else(|| ctx.target.input.clone());
                        interactsh
                            .register_request(
                                exec_ctx.correlation_id.clone(),
                                PendingRequest {
                                    template_id: template.id.clone(),
                                    info: template.info.clone(),
                                    protocol: template.protocol.as_str().to_string(),
                                    host: ctx.target.input.clone(),
                                    matched_at,
                                    request_excerpt,
                                    matchers: stage.matchers.clone(),
                                    matchers_condition: stage.matchers_condition,
                                    env: exec_ctx.env.clone(),
                                },
                            )
                            .await;
                    }
                }
            }
        }

        Ok(outcome)
    }

    async fn run_stage_with_retries(
        &self,
        template: &CompiledTemplate,
        stage: &CompiledStage,
        ctx: &ExecutionContext,
    ) -> Result<Vec<InternalEvent>, ScanError> {
        let retries = self.runtime.options.retries;
        let mut attempt = 0;
        loop {
            match execute_stage(template.protocol, &self.runtime, stage, ctx).await {
                Ok(events) => return Ok(events),
                Err(err @ (ScanError::Cancelled | ScanError::HostSkipped { .. })) => {
                    return Err(err)
                }
                Err(err) if attempt < retries && err.is_retryable() => {
                    attempt += 1;
                    debug!(
                        "Retrying {} stage (attempt {attempt}/{retries}): {err}",
                        template.id
                    );
                }
                Err(err) => {
                    // the stage yields no matcher evaluation; the
                    // execution proceeds to the next stage
                    warn!("Stage failed for {} against {}: {err}", template.id, ctx.target);
                    return Ok(Vec::new());
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn emit(
        &self,
        template: &CompiledTemplate,
        ctx: &ExecutionContext,
        event: &InternalEvent,
        outcome: &MatchOutcome,
        extracted: Vec<String>,
        emitted: &mut HashSet<String>,
        events: &mut Vec<ResultEvent>,
    ) {
        let matcher_name = outcome.matches.iter().find_map(|(name, _)| name.clone());
        let result = ResultEvent {
            template_id: template.id.clone(),
            info: template.info.clone(),
            protocol: template.protocol.as_str().to_string(),
            host: ctx.target.input.clone(),
            matched_at: if event.response.matched_at.is_empty() {
                ctx.target.input.clone()
            } else {
                event.response.matched_at.clone()
            },
            matcher_name,
            extracted_results: extracted,
            request: event.raw_request.clone().map(|r| truncate(&r)),
            response: Some(truncate(&event.response.body)),
            interaction: None,
            timestamp: chrono::Utc::now(),
        };
        // at most one event per (template, target, matcher name) unless
        // multi-match is enabled
        if !self.runtime.options.multi_match && !emitted.insert(result.dedup_key()) {
            return;
        }
        self.runtime.stats.incr_matches();
        events.push(result);
    }
}

fn truncate(text: &str) -> String {
    if text.len() <= EXCERPT_LIMIT {
        text.to_string()
    } else {
        let mut end = EXCERPT_LIMIT;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text[..end].to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let text = "ä".repeat(EXCERPT_LIMIT);
        let out = truncate(&text);
        assert!(out.len() <= EXCERPT_LIMIT);
        assert!(out.chars().all(|c| c == 'ä'));
    }

    #[test]
    fn test_truncate_short_passthrough() {
        assert_eq!(truncate("abc"), "abc");
    }
}
