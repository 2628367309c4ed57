// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Tutka Interactsh Correlator
 * Out-of-band interaction registration, polling and deferred
 * matcher replay
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::VariableEnvironment;
use crate::dsl::DslValue;
use crate::matchers::{evaluate_group, CompiledMatcher, Condition, ResponseData};
use crate::types::{Interaction, ResultEvent, TemplateInfo};

/// Callback invoked for every OOB-completed finding
pub type EventSink = Arc<dyn Fn(ResultEvent) + Send + Sync>;

/// Maximum backoff between failed polls
const MAX_POLL_BACKOFF: Duration = Duration::from_secs(60);

/// Everything needed to finish matcher evaluation when an interaction
/// arrives for a correlation id.
pub struct PendingRequest {
    pub template_id: String,
    pub info: TemplateInfo,
    pub protocol: String,
    pub host: String,
    pub matched_at: String,
    pub request_excerpt: Option<String>,
    pub matchers: Vec<CompiledMatcher>,
    pub matchers_condition: Condition,
    /// Environment snapshot including extracted values
    pub env: VariableEnvironment,
}

struct PendingRecord {
    request: PendingRequest,
    registered_at: Instant,
}

/// Wire shape of one polled interaction
#[derive(Debug, Clone, Deserialize)]
pub struct WireInteraction {
    pub protocol: String,
    #[serde(rename = "unique-id", default)]
    pub unique_id: String,
    #[serde(rename = "full-id", default)]
    pub full_id: String,
    #[serde(rename = "raw-request", default)]
    pub raw_request: String,
    #[serde(rename = "raw-response", default)]
    pub raw_response: String,
    #[serde(rename = "remote-address", default)]
    pub remote_address: String,
}

#[derive(Debug, Deserialize)]
struct PollResponse {
    #[serde(default)]
    data: Vec<WireInteraction>,
}

/// OOB correlator. Registration is concurrent with a background poll
/// loop; the lock is never held across network I/O. The correlator owns
/// a stop signal separate from the scan-wide token so already-registered
/// interactions drain gracefully after scan completion.
pub struct InteractshClient {
    server: String,
    server_host: String,
    pending: Arc<RwLock<HashMap<String, PendingRecord>>>,
    sink: EventSink,
    cooldown: Duration,
    poll_interval: Duration,
    stop: CancellationToken,
    client: reqwest::Client,
    poll_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl InteractshClient {
    pub fn new(
        server: &str,
        poll_interval: Duration,
        cooldown: Duration,
        client: reqwest::Client,
        sink: EventSink,
    ) -> Self {
        let server_host = url::Url::parse(server)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_string()))
            .unwrap_or_else(|| server.to_string());
        Self {
            server: server.trim_end_matches('/').to_string(),
            server_host,
            pending: Arc::new(RwLock::new(HashMap::new())),
            sink,
            cooldown,
            poll_interval,
            stop: CancellationToken::new(),
            client,
            poll_handle: Mutex::new(None),
        }
    }

    /// Mint a fresh OOB URL for a correlation id
    pub fn new_interaction_url(&self, correlation_id: &str) -> String {
        format!("{correlation_id}.{}", self.server_host)
    }

    /// Stash the raw request, extracted vars and the matchers needed to
    /// finish evaluation when an interaction arrives.
    pub async fn register_request(&self, correlation_id: String, request: PendingRequest) {
        debug!(
            "Registered OOB correlation {correlation_id} for template {}",
            request.template_id
        );
        let mut pending = self.pending.write().await;
        pending.insert(
            correlation_id,
            PendingRecord {
                request,
                registered_at: Instant::now(),
            },
        );
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.read().await.len()
    }

    /// Start the background poll loop
    pub async fn start(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            this.poll_loop().await;
        });
        *self.poll_handle.lock().await = Some(handle);
    }

    async fn poll_loop(&self) {
        info!(
            "Interactsh poll loop started ({}, every {:?})",
            self.server, self.poll_interval
        );
        let mut consecutive_failures: u32 = 0;
        loop {
            let delay = if consecutive_failures == 0 {
                self.poll_interval
            } else {
                // exponential backoff on poll errors
                (self.poll_interval * 2u32.saturating_pow(consecutive_failures))
                    .min(MAX_POLL_BACKOFF)
            };
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.stop.cancelled() => break,
            }

            self.expire_stale().await;

            match self.fetch_interactions().await {
                Ok(interactions) => {
                    consecutive_failures = 0;
                    for interaction in interactions {
                        self.deliver(interaction).await;
                    }
                }
                Err(e) => {
                    consecutive_failures = consecutive_failures.saturating_add(1);
                    // OOB correlation is best-effort; errors never surface
                    // to the executor
                    warn!("Interactsh poll failed ({consecutive_failures}): {e}");
                }
            }
        }
        debug!("Interactsh poll loop stopped");
    }

    async fn fetch_interactions(&self) -> anyhow::Result<Vec<WireInteraction>> {
        // snapshot ids without holding the lock during I/O
        let ids: Vec<String> = {
            let pending = self.pending.read().await;
            pending.keys().cloned().collect()
        };
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!("{}/poll?id={}", self.server, ids.join(","));
        let response = self.client.get(&url).send().await?.error_for_status()?;
        let parsed: PollResponse = response.json().await?;
        Ok(parsed.data)
    }

    /// Correlate one interaction and replay the stored matchers. Also the
    /// direct injection path used by tests.
    pub async fn deliver(&self, interaction: WireInteraction) {
        let correlation_id = if !interaction.full_id.is_empty() {
            interaction.full_id.clone()
        } else {
            interaction.unique_id.clone()
        };
        // the interaction subdomain may carry extra labels
        let correlation_key = correlation_id
            .split('.')
            .next()
            .unwrap_or(&correlation_id)
            .to_string();

        let record = {
            let mut pending = self.pending.write().await;
            pending.remove(&correlation_key)
        };
        let Some(record) = record else {
            debug!("Uncorrelated interaction {correlation_key}");
            return;
        };

        let request = record.request;
        let mut env = request.env.clone();
        env.set_stage(
            "interactsh_protocol",
            DslValue::String(interaction.protocol.clone()),
        );
        env.set_stage(
            "interactsh_request",
            DslValue::String(interaction.raw_request.clone()),
        );
        env.set_stage(
            "interactsh_response",
            DslValue::String(interaction.raw_response.clone()),
        );

        // replay against the combined request + interaction payload
        let response = ResponseData {
            status: None,
            headers: String::new(),
            body: format!("{}\n{}", interaction.raw_request, interaction.raw_response),
            matched_at: request.matched_at.clone(),
        };
        let outcome = evaluate_group(
            &request.matchers,
            request.matchers_condition,
            &response,
            &env,
        );
        if !outcome.matched {
            debug!(
                "Interaction for {} did not satisfy deferred matchers",
                request.template_id
            );
            return;
        }

        let matcher_name = outcome.matches.iter().find_map(|(name, _)| name.clone());
        let event = ResultEvent {
            template_id: request.template_id,
            info: request.info,
            protocol: request.protocol,
            host: request.host,
            matched_at: request.matched_at,
            matcher_name,
            extracted_results: Vec::new(),
            request: request.request_excerpt,
            response: None,
            interaction: Some(Interaction {
                protocol: interaction.protocol,
                unique_id: interaction.unique_id,
                full_id: interaction.full_id,
                raw_request: interaction.raw_request,
                raw_response: interaction.raw_response,
                remote_address: interaction.remote_address,
                timestamp: chrono::Utc::now(),
            }),
            timestamp: chrono::Utc::now(),
        };
        info!("OOB interaction completed finding for {}", event.template_id);
        (self.sink)(event);
    }

    /// Drop records past the cooldown
    async fn expire_stale(&self) {
        let mut pending = self.pending.write().await;
        let before = pending.len();
        pending.retain(|_, record| record.registered_at.elapsed() < self.cooldown);
        let expired = before - pending.len();
        if expired > 0 {
            debug!("Expired {expired} pending OOB record(s)");
        }
    }

    /// Stop polling and deregister
    pub async fn close(&self) {
        self.stop.cancel();
        if let Some(handle) = self.poll_handle.lock().await.take() {
            let _ = handle.await;
        }
        self.pending.write().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matchers::{CompiledMatcher, MatcherDef, MatcherKind, ResponsePart};
    use std::sync::Mutex as StdMutex;

    fn dsl_matcher(expr: &str) -> CompiledMatcher {
        CompiledMatcher::compile(
            MatcherDef {
                kind: MatcherKind::Dsl,
                name: Some("oob".into()),
                part: ResponsePart::Body,
                condition: Condition::Or,
                negative: false,
                case_insensitive: false,
                status: vec![],
                size: vec![],
                words: vec![],
                regex: vec![],
                binary: vec![],
                dsl: vec![expr.into()],
            },
            "t",
        )
        .unwrap()
    }

    fn client_with_sink() -> (Arc<InteractshClient>, Arc<StdMutex<Vec<ResultEvent>>>) {
        let captured = Arc::new(StdMutex::new(Vec::new()));
        let sink_events = Arc::clone(&captured);
        let sink: EventSink = Arc::new(move |event| {
            sink_events.lock().unwrap().push(event);
        });
        let client = Arc::new(InteractshClient::new(
            "https://oast.example",
            Duration::from_secs(5),
            Duration::from_secs(300),
            reqwest::Client::new(),
            sink,
        ));
        (client, captured)
    }

    fn pending(matcher: CompiledMatcher) -> PendingRequest {
        PendingRequest {
            template_id: "blind-ssrf".into(),
            info: TemplateInfo {
                name: "Blind SSRF".into(),
                ..Default::default()
            },
            protocol: "http".into(),
            host: "example.com".into(),
            matched_at: "http://example.com/fetch".into(),
            request_excerpt: Some("GET /fetch".into()),
            matchers: vec![matcher],
            matchers_condition: Condition::Or,
            env: VariableEnvironment::new(),
        }
    }

    #[test]
    fn test_interaction_url_shape() {
        let (client, _) = client_with_sink();
        let url = client.new_interaction_url("cafebabe");
        assert_eq!(url, "cafebabe.oast.example");
    }

    #[tokio::test]
    async fn test_matched_interaction_emits_event() {
        let (client, captured) = client_with_sink();
        client
            .register_request(
                "corr1".into(),
                pending(dsl_matcher("interactsh_protocol == 'dns'")),
            )
            .await;

        client
            .deliver(WireInteraction {
                protocol: "dns".into(),
                unique_id: "corr1".into(),
                full_id: "corr1.oast.example".into(),
                raw_request: "A? corr1.oast.example".into(),
                raw_response: "NOERROR".into(),
                remote_address: "10.1.2.3".into(),
            })
            .await;

        let events = captured.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].template_id, "blind-ssrf");
        let interaction = events[0].interaction.as_ref().unwrap();
        assert_eq!(interaction.protocol, "dns");
        assert_eq!(events[0].matcher_name.as_deref(), Some("oob"));
    }

    #[tokio::test]
    async fn test_unmatched_interaction_is_dropped() {
        let (client, captured) = client_with_sink();
        client
            .register_request(
                "corr2".into(),
                pending(dsl_matcher("interactsh_protocol == 'smtp'")),
            )
            .await;

        client
            .deliver(WireInteraction {
                protocol: "dns".into(),
                unique_id: "corr2".into(),
                full_id: String::new(),
                raw_request: String::new(),
                raw_response: String::new(),
                remote_address: String::new(),
            })
            .await;

        assert!(captured.lock().unwrap().is_empty());
        // the record is consumed either way
        assert_eq!(client.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_uncorrelated_interaction_ignored() {
        let (client, captured) = client_with_sink();
        client
            .deliver(WireInteraction {
                protocol: "http".into(),
                unique_id: "unknown".into(),
                full_id: String::new(),
                raw_request: String::new(),
                raw_response: String::new(),
                remote_address: String::new(),
            })
            .await;
        assert!(captured.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cooldown_expires_records() {
        let captured = Arc::new(StdMutex::new(Vec::new()));
        let sink_events = Arc::clone(&captured);
        let sink: EventSink = Arc::new(move |event| {
            sink_events.lock().unwrap().push(event);
        });
        let client = InteractshClient::new(
            "https://oast.example",
            Duration::from_secs(5),
            Duration::from_millis(20),
            reqwest::Client::new(),
            sink,
        );
        client
            .register_request("corr3".into(), pending(dsl_matcher("true")))
            .await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        client.expire_stale().await;
        assert_eq!(client.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_close_clears_pending() {
        let (client, _) = client_with_sink();
        client
            .register_request("corr4".into(), pending(dsl_matcher("true")))
            .await;
        client.close().await;
        assert_eq!(client.pending_count().await, 0);
    }
}
