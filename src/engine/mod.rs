// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Tutka Scan Engine
 * Work expansion, bounded dispatch, cancellation and stop conditions
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

pub mod work_pool;

use futures::stream::{self, StreamExt};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cluster;
use crate::errors::ScanError;
use crate::executor::TemplateExecutor;
use crate::host_errors::HostErrorCache;
use crate::input::MetaInput;
use crate::interactsh::InteractshClient;
use crate::options::ScanOptions;
use crate::output::Sink;
use crate::protocols::ProtocolRuntime;
use crate::rate_limiter::RateLimiter;
use crate::resume::{ResumeConfig, ResumeState};
use crate::template::{CompiledTemplate, Protocol, TemplateStore, Workflow};
use crate::types::{ResultEvent, ScanStats};
use crate::workflow::WorkflowOrchestrator;
use work_pool::WorkPool;

/// One schedulable unit of work
enum WorkUnit {
    SelfContained(Arc<CompiledTemplate>),
    Cluster(Vec<Arc<CompiledTemplate>>),
    Template(Arc<CompiledTemplate>),
    Workflow(Arc<Workflow>),
}

impl WorkUnit {
    fn describe(&self) -> String {
        match self {
            WorkUnit::SelfContained(t) => format!("self-contained {}", t.id),
            WorkUnit::Cluster(members) => format!("cluster of {}", members.len()),
            WorkUnit::Template(t) => t.id.clone(),
            WorkUnit::Workflow(w) => format!("workflow {}", w.id),
        }
    }
}

/// The scan scheduler: expands (template x target) work, bounds
/// concurrency globally and per template, and owns cancellation.
pub struct ScanEngine {
    options: ScanOptions,
    runtime: Arc<ProtocolRuntime>,
    executor: Arc<TemplateExecutor>,
    interactsh: Option<Arc<InteractshClient>>,
    sink: Arc<dyn Sink>,
    stats: Arc<ScanStats>,
    cancel: CancellationToken,
    resume: Option<Arc<ResumeState>>,
}

impl ScanEngine {
    pub async fn new(
        options: ScanOptions,
        sink: Arc<dyn Sink>,
        stats: Arc<ScanStats>,
    ) -> anyhow::Result<Self> {
        let host_errors = Arc::new(HostErrorCache::new(
            options.max_host_errors,
            options.max_host_error_hosts,
            crate::host_errors::DEFAULT_TRACKING_TIME,
        ));
        let rate_limiter =
            RateLimiter::from_options(options.rate_limit, options.rate_limit_minute);
        let runtime = Arc::new(ProtocolRuntime::new(
            options.clone(),
            rate_limiter,
            host_errors,
            Arc::clone(&stats),
        )?);

        let interactsh = match &options.interactsh_url {
            Some(server) => {
                let oob_sink = Arc::clone(&sink);
                let oob_stats = Arc::clone(&stats);
                let client = Arc::new(InteractshClient::new(
                    server,
                    options.interactsh_poll_interval,
                    options.interactsh_cooldown,
                    runtime.http_client().clone(),
                    Arc::new(move |event| {
                        oob_stats.incr_matches();
                        oob_sink.write_event(&event);
                    }),
                ));
                client.start().await;
                Some(client)
            }
            None => None,
        };

        let executor = Arc::new(TemplateExecutor::new(
            Arc::clone(&runtime),
            interactsh.clone(),
        ));

        let resume = match &options.resume_path {
            Some(path) => Some(Arc::new(ResumeState::new(ResumeConfig::load(path)?))),
            None => None,
        };

        Ok(Self {
            options,
            runtime,
            executor,
            interactsh,
            sink,
            stats,
            cancel: CancellationToken::new(),
            resume,
        })
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn stats(&self) -> &Arc<ScanStats> {
        &self.stats
    }

    /// Run the full scan. Exits when all work is dispatched and every
    /// pool is idle, cancellation fires, or the matched-result cap is
    /// reached.
    pub async fn execute_scan(
        &self,
        store: Arc<TemplateStore>,
        targets: Arc<Vec<MetaInput>>,
    ) -> Result<(), ScanError> {
        if let Some(timeout) = self.options.scan_timeout {
            let cancel = self.cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                warn!("Scan timeout reached; cancelling");
                cancel.cancel();
            });
        }

        let units = self.plan(&store);
        info!(
            "Dispatching {} work unit(s) over {} target(s)",
            units.len(),
            targets.len()
        );

        let mut pool: WorkPool<()> = WorkPool::new(self.options.template_concurrency);
        for unit in units {
            if self.cancel.is_cancelled() {
                debug!("Cancellation before dispatch; draining");
                break;
            }
            if self.reached_max_results() {
                info!("Matched-result cap reached; stopping dispatch");
                self.cancel.cancel();
                break;
            }
            let engine = self.handles();
            let store = Arc::clone(&store);
            let targets = Arc::clone(&targets);
            debug!("Dispatching {}", unit.describe());
            pool.spawn(async move {
                engine.run_unit(unit, store, targets).await;
            })
            .await;
        }
        pool.drain().await;

        if let (Some(resume), Some(path)) = (&self.resume, &self.options.resume_path) {
            if let Err(e) = resume.save(path) {
                warn!("Failed to persist resume state: {e}");
            }
        }

        if self.cancel.is_cancelled() {
            debug!("Scan ended by cancellation; partial results remain valid");
        }
        Ok(())
    }

    /// Work order: self-contained, then cluster-capable HTTP, then the
    /// rest grouped by protocol cost class, workflows last.
    fn plan(&self, store: &TemplateStore) -> Vec<WorkUnit> {
        let mut units = Vec::new();

        let mut self_contained = Vec::new();
        let mut http = Vec::new();
        let mut other: Vec<Arc<CompiledTemplate>> = Vec::new();
        for template in &store.templates {
            let template = Arc::new(template.clone());
            if template.self_contained {
                self_contained.push(template);
            } else if template.protocol == Protocol::Http {
                http.push(template);
            } else {
                other.push(template);
            }
        }
        other.sort_by_key(|t| t.protocol.cost_class());

        for template in self_contained {
            units.push(WorkUnit::SelfContained(template));
        }
        let (clusters, standalone) = cluster::build_clusters(http);
        for members in clusters {
            units.push(WorkUnit::Cluster(members));
        }
        for template in standalone {
            units.push(WorkUnit::Template(template));
        }
        for template in other {
            units.push(WorkUnit::Template(template));
        }
        for workflow in &store.workflows {
            units.push(WorkUnit::Workflow(Arc::new(workflow.clone())));
        }
        units
    }

    fn handles(&self) -> EngineHandles {
        EngineHandles {
            options: self.options.clone(),
            runtime: Arc::clone(&self.runtime),
            executor: Arc::clone(&self.executor),
            sink: Arc::clone(&self.sink),
            stats: Arc::clone(&self.stats),
            cancel: self.cancel.clone(),
            resume: self.resume.clone(),
        }
    }

    fn reached_max_results(&self) -> bool {
        match self.options.max_results {
            Some(max) => self.stats.matches.load(Ordering::Relaxed) >= max,
            None => false,
        }
    }

    /// Release every shared resource. Interactsh drains gracefully: its
    /// stop signal is separate from scan cancellation.
    pub async fn close(&self) {
        if let Some(interactsh) = &self.interactsh {
            if interactsh.pending_count().await > 0 {
                debug!("Draining pending OOB correlations before close");
                tokio::time::sleep(self.options.interactsh_poll_interval).await;
            }
            interactsh.close().await;
        }
        self.runtime.host_errors.close();
    }
}

/// Cloned handle set moved into scheduled tasks
struct EngineHandles {
    options: ScanOptions,
    runtime: Arc<ProtocolRuntime>,
    executor: Arc<TemplateExecutor>,
    sink: Arc<dyn Sink>,
    stats: Arc<ScanStats>,
    cancel: CancellationToken,
    resume: Option<Arc<ResumeState>>,
}

impl EngineHandles {
    async fn run_unit(
        &self,
        unit: WorkUnit,
        store: Arc<TemplateStore>,
        targets: Arc<Vec<MetaInput>>,
    ) {
        match unit {
            WorkUnit::SelfContained(template) => {
                // the target input is ignored; the template carries its own
                let placeholder = template
                    .self_contained_targets()
                    .first()
                    .map(|t| MetaInput::new(t.clone()))
                    .unwrap_or_else(|| MetaInput::new(template.id.clone()));
                match self
                    .executor
                    .execute(&template, &placeholder, self.cancel.clone(), None)
                    .await
                {
                    Ok(outcome) => self.forward(outcome.events),
                    Err(e) => self.note_failure(&template.id, &placeholder, e),
                }
            }
            WorkUnit::Cluster(members) => {
                let ids: Vec<String> = members.iter().map(|m| m.id.clone()).collect();
                let cursor_key = ids.join("+");
                let members = &members;
                self.for_each_target(&cursor_key, targets, |target| async move {
                    match cluster::execute_cluster(
                        &self.runtime,
                        members,
                        &target,
                        self.cancel.clone(),
                    )
                    .await
                    {
                        Ok(events) => self.forward(events),
                        Err(e) => self.note_failure(&members[0].id, &target, e),
                    }
                })
                .await;
            }
            WorkUnit::Template(template) => {
                let id = template.id.clone();
                let template = &template;
                self.for_each_target(&id, targets, |target| async move {
                    match self
                        .executor
                        .execute(template, &target, self.cancel.clone(), None)
                        .await
                    {
                        Ok(outcome) => self.forward(outcome.events),
                        Err(e) => self.note_failure(&template.id, &target, e),
                    }
                })
                .await;
            }
            WorkUnit::Workflow(workflow) => {
                let id = workflow.id.clone();
                let workflow = &workflow;
                let store = &store;
                self.for_each_target(&id, targets, |target| async move {
                    let orchestrator =
                        WorkflowOrchestrator::new(self.executor.as_ref(), store.as_ref());
                    match orchestrator
                        .execute(workflow, &target, self.cancel.clone())
                        .await
                    {
                        Ok(events) => self.forward(events),
                        Err(e) => self.note_failure(&workflow.id, &target, e),
                    }
                })
                .await;
            }
        }
    }

    /// Iterate the target stream for one unit with bulk-size bounded
    /// concurrency, resume-cursor skipping and dispatch bookkeeping.
    async fn for_each_target<F, Fut>(
        &self,
        cursor_key: &str,
        targets: Arc<Vec<MetaInput>>,
        run: F,
    ) where
        F: Fn(MetaInput) -> Fut,
        Fut: std::future::Future<Output = ()>,
    {
        let skip = self
            .resume
            .as_ref()
            .map(|r| r.cursor(cursor_key))
            .unwrap_or(0);
        if skip > 0 {
            debug!("Resume: skipping first {skip} target(s) for {cursor_key}");
        }
        stream::iter(targets.iter().enumerate().skip(skip))
            .for_each_concurrent(self.options.bulk_size, |(index, target)| {
                let run = &run;
                async move {
                    if self.cancel.is_cancelled() || self.reached_max_results() {
                        return;
                    }
                    run(target.clone()).await;
                    if let Some(resume) = &self.resume {
                        resume.mark_dispatched(cursor_key, index);
                    }
                }
            })
            .await;
    }

    fn forward(&self, events: Vec<ResultEvent>) {
        for event in events {
            self.sink.write_event(&event);
        }
        if self.reached_max_results() {
            info!("Matched-result cap reached; cancelling remaining work");
            self.cancel.cancel();
        }
    }

    fn reached_max_results(&self) -> bool {
        match self.options.max_results {
            Some(max) => self.stats.matches.load(Ordering::Relaxed) >= max,
            None => false,
        }
    }

    fn note_failure(&self, unit: &str, target: &MetaInput, error: ScanError) {
        match error {
            ScanError::Cancelled => {}
            ScanError::HostSkipped { .. } => {
                debug!("{unit} skipped {target}: {error}");
            }
            other => {
                self.stats.incr_errors();
                debug!("{unit} failed against {target}: {other}");
            }
        }
    }
}
