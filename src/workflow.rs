// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Tutka Workflow Orchestrator
 * Conditional chaining of templates by matcher outcome
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::dsl::DslValue;
use crate::errors::ScanError;
use crate::executor::TemplateExecutor;
use crate::input::MetaInput;
use crate::template::{TemplateStore, Workflow, WorkflowNodeDef};
use crate::types::ResultEvent;

/// Runs a workflow DAG for one target. Each node executes its template;
/// children run only when the node matched (optionally filtered by
/// matcher names), carrying the parent's extracted variables forward in a
/// fresh execution context.
pub struct WorkflowOrchestrator<'a> {
    executor: &'a TemplateExecutor,
    store: &'a TemplateStore,
}

impl<'a> WorkflowOrchestrator<'a> {
    pub fn new(executor: &'a TemplateExecutor, store: &'a TemplateStore) -> Self {
        Self { executor, store }
    }

    pub async fn execute(
        &self,
        workflow: &Workflow,
        target: &MetaInput,
        cancel: CancellationToken,
    ) -> Result<Vec<ResultEvent>, ScanError> {
        let mut events = Vec::new();
        for node in &workflow.nodes {
            self.run_node(node, target, cancel.clone(), HashMap::new(), &mut events)
                .await?;
        }
        Ok(events)
    }

    /// Box the recursion: async fns cannot recurse directly.
    fn run_node<'b>(
        &'b self,
        node: &'b WorkflowNodeDef,
        target: &'b MetaInput,
        cancel: CancellationToken,
        inherited: HashMap<String, DslValue>,
        events: &'b mut Vec<ResultEvent>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), ScanError>> + Send + 'b>>
    {
        Box::pin(async move {
            if cancel.is_cancelled() {
                return Err(ScanError::Cancelled);
            }
            let Some(template) = self.store.find(&node.template) else {
                warn!("Workflow references unknown template {}", node.template);
                return Ok(());
            };

            let outcome = self
                .executor
                .execute(template, target, cancel.clone(), Some(inherited.clone()))
                .await?;
            events.extend(outcome.events);

            // descend only on match; node filters restrict to named matchers
            let gate_open = if node.matchers.is_empty() {
                outcome.matched
            } else {
                outcome
                    .matched_names
                    .iter()
                    .any(|name| node.matchers.contains(name))
            };
            if !gate_open {
                debug!(
                    "Workflow node {} did not match against {target}; not descending",
                    node.template
                );
                return Ok(());
            }

            // children see the parent's extracted values plus anything the
            // parent itself inherited
            let mut child_vars = inherited;
            for (name, values) in &outcome.extracted {
                child_vars.insert(name.clone(), DslValue::String(values.join(",")));
            }
            for child in &node.subtemplates {
                self.run_node(child, target, cancel.clone(), child_vars.clone(), events)
                    .await?;
            }
            Ok(())
        })
    }
}
