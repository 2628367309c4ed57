// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Tutka Protocol Drivers
 * Uniform execution contract over a closed protocol variant set
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

pub mod dns;
pub mod http;
pub mod network;
pub mod ssl;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::context::ExecutionContext;
use crate::dsl::DslValue;
use crate::errors::NetworkError;
use crate::host_errors::HostErrorCache;
use crate::matchers::{MatchOutcome, ResponseData};
use crate::options::ScanOptions;
use crate::rate_limiter::RateLimiter;
use crate::template::{CompiledStage, Protocol};
use crate::types::ScanStats;

/// One stage outcome handed back to the executor
#[derive(Debug, Clone)]
pub struct InternalEvent {
    pub response: ResponseData,
    /// Stage-local variables produced by the driver
    pub variables: HashMap<String, DslValue>,
    pub raw_request: Option<String>,
    pub duration: Duration,
    /// Pre-computed matcher outcome when the driver owns matching
    /// (HTTP does); None delegates evaluation to the executor.
    pub matched: Option<MatchOutcome>,
}

/// Shared handles every driver needs. Drivers keep no mutable state of
/// their own across calls.
pub struct ProtocolRuntime {
    pub options: ScanOptions,
    pub rate_limiter: RateLimiter,
    pub host_errors: Arc<HostErrorCache>,
    pub stats: Arc<ScanStats>,
    http_client: reqwest::Client,
    resolver: hickory_resolver::TokioAsyncResolver,
}

impl ProtocolRuntime {
    pub fn new(
        options: ScanOptions,
        rate_limiter: RateLimiter,
        host_errors: Arc<HostErrorCache>,
        stats: Arc<ScanStats>,
    ) -> anyhow::Result<Self> {
        let http_client = http::build_client(&options)?;
        let resolver = hickory_resolver::TokioAsyncResolver::tokio(
            hickory_resolver::config::ResolverConfig::default(),
            hickory_resolver::config::ResolverOpts::default(),
        );
        Ok(Self {
            options,
            rate_limiter,
            host_errors,
            stats,
            http_client,
            resolver,
        })
    }

    pub fn http_client(&self) -> &reqwest::Client {
        &self.http_client
    }

    pub fn resolver(&self) -> &hickory_resolver::TokioAsyncResolver {
        &self.resolver
    }

    /// Gate every network operation: cancellation, host error cache,
    /// then the shared rate limiter.
    pub async fn before_request(
        &self,
        ctx: &ExecutionContext,
        host_key: &str,
    ) -> Result<(), crate::errors::ScanError> {
        if ctx.cancel.is_cancelled() {
            return Err(crate::errors::ScanError::Cancelled);
        }
        if self.host_errors.check(host_key) {
            self.stats.incr_hosts_skipped();
            return Err(crate::errors::ScanError::HostSkipped {
                host: host_key.to_string(),
                errors: self.host_errors.error_count(host_key),
            });
        }
        self.rate_limiter.take(&ctx.cancel).await?;
        self.stats.incr_requests();
        Ok(())
    }

    /// Record a dial-class failure against the host
    pub fn after_failure(&self, host_key: &str, error: &NetworkError) {
        self.stats.incr_errors();
        self.host_errors.mark_failed(host_key, error);
    }
}

/// Execute one stage of the given protocol. The driver honors
/// cancellation, consults the rate limiter before each operation, and
/// reports dial failures to the host error cache.
pub async fn execute_stage(
    protocol: Protocol,
    runtime: &ProtocolRuntime,
    stage: &CompiledStage,
    ctx: &ExecutionContext,
) -> Result<Vec<InternalEvent>, crate::errors::ScanError> {
    match protocol {
        Protocol::Http => http::execute(runtime, stage, ctx).await,
        Protocol::Dns => dns::execute(runtime, stage, ctx).await,
        Protocol::Network => network::execute(runtime, stage, ctx).await,
        Protocol::Ssl => ssl::execute(runtime, stage, ctx).await,
    }
}
