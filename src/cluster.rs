// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Tutka HTTP Request Clustering
 * One physical request shared by templates with identical base requests
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::context::ExecutionContext;
use crate::errors::ScanError;
use crate::extractors::evaluate_all;
use crate::input::MetaInput;
use crate::matchers::evaluate_group;
use crate::protocols::{self, ProtocolRuntime};
use crate::template::CompiledTemplate;
use crate::types::ResultEvent;

/// Group cluster-capable templates by their base request identity.
/// Returns (clusters with 2+ members, leftovers that run standalone).
pub fn build_clusters(
    templates: Vec<Arc<CompiledTemplate>>,
) -> (Vec<Vec<Arc<CompiledTemplate>>>, Vec<Arc<CompiledTemplate>>) {
    let mut by_key: HashMap<String, Vec<Arc<CompiledTemplate>>> = HashMap::new();
    let mut standalone = Vec::new();
    for template in templates {
        match template.cluster_key() {
            Some(key) => by_key.entry(key).or_default().push(template),
            None => standalone.push(template),
        }
    }
    let mut clusters = Vec::new();
    for (_, members) in by_key {
        if members.len() > 1 {
            debug!(
                "Clustered {} templates over one base request: {}",
                members.len(),
                members
                    .iter()
                    .map(|t| t.id.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            clusters.push(members);
        } else {
            standalone.extend(members);
        }
    }
    (clusters, standalone)
}

/// Execute one cluster against one target: the shared base request is
/// issued once and every member evaluates its own matchers against the
/// shared responses. Emitted results are identical to an unclustered run.
pub async fn execute_cluster(
    runtime: &Arc<ProtocolRuntime>,
    members: &[Arc<CompiledTemplate>],
    target: &MetaInput,
    cancel: CancellationToken,
) -> Result<Vec<ResultEvent>, ScanError> {
    let lead = &members[0];
    let mut ctx = ExecutionContext::new(target.clone(), cancel);
    // the member envs below clone this one; seed the same scan globals an
    // unclustered execution would see
    for (k, v) in &runtime.options.vars {
        ctx.env
            .set_global(k.clone(), crate::dsl::DslValue::String(v.clone()));
    }

    // a neutral copy of the shared stage: no matchers, no early stop, so
    // every response is observed exactly as an unclustered run would
    let mut shared_stage = lead.stages[0].clone();
    shared_stage.matchers = Vec::new();
    shared_stage.extractors = Vec::new();
    shared_stage.stop_at_first_match = false;

    let events = protocols::execute_stage(lead.protocol, runtime, &shared_stage, &ctx).await?;

    let mut results = Vec::new();
    for member in members {
        let stage = &member.stages[0];
        let mut emitted = std::collections::HashSet::new();
        for event in &events {
            let mut env = ctx.env.clone();
            env.merge_stage(event.variables.clone());

            let outcome =
                evaluate_group(&stage.matchers, stage.matchers_condition, &event.response, &env);
            let (_, attached) = evaluate_all(&stage.extractors, &event.response, &env);
            let extractor_only = stage.matchers.is_empty() && !attached.is_empty();
            if !outcome.matched && !extractor_only {
                continue;
            }

            let matcher_name = outcome.matches.iter().find_map(|(name, _)| name.clone());
            let result = ResultEvent {
                template_id: member.id.clone(),
                info: member.info.clone(),
                protocol: member.protocol.as_str().to_string(),
                host: target.input.clone(),
                matched_at: event.response.matched_at.clone(),
                matcher_name,
                extracted_results: attached,
                request: event.raw_request.clone(),
                response: Some(event.response.body.chars().take(4096).collect()),
                interaction: None,
                timestamp: chrono::Utc::now(),
            };
            if !runtime.options.multi_match && !emitted.insert(result.dedup_key()) {
                continue;
            }
            runtime.stats.incr_matches();
            results.push(result);

            if member.stop_at_first_match || stage.stop_at_first_match {
                break;
            }
        }
    }
    Ok(results)
}
