// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Tutka HTTP Driver
 * Template-driven HTTP stage execution over a pooled reqwest client
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

use anyhow::{Context, Result};
use reqwest::cookie::CookieStore;
use reqwest::Method;
use std::time::{Duration, Instant};
use tracing::debug;

use super::{InternalEvent, ProtocolRuntime};
use crate::context::ExecutionContext;
use crate::dsl::DslValue;
use crate::errors::{NetworkError, ScanError};
use crate::matchers::{evaluate_group, response_variables, ResponseData};
use crate::template::{CompiledStage, StageRequest};

/// Maximum response body size (10MB) to prevent memory exhaustion
const MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

const DEFAULT_POOL_IDLE_PER_HOST: usize = 32;

/// Shared client for the whole scan. Cookies are handled per execution,
/// so the client itself carries no cookie store.
pub fn build_client(options: &crate::options::ScanOptions) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .timeout(options.timeout)
        .connect_timeout(options.timeout)
        .redirect(reqwest::redirect::Policy::limited(5))
        .danger_accept_invalid_certs(true)
        .user_agent(concat!("Tutka/", env!("CARGO_PKG_VERSION")))
        .pool_max_idle_per_host(DEFAULT_POOL_IDLE_PER_HOST)
        .pool_idle_timeout(Duration::from_secs(90))
        .tcp_keepalive(Duration::from_secs(60))
        .tcp_nodelay(true);

    if let Some(proxy) = &options.proxy {
        builder = builder.proxy(reqwest::Proxy::all(proxy).context("Invalid proxy URL")?);
    }

    builder.build().context("Failed to create HTTP client")
}

/// Execute one HTTP stage: every path (or raw block) in order. The HTTP
/// driver owns matching, so each event carries a pre-computed outcome.
pub async fn execute(
    runtime: &ProtocolRuntime,
    stage: &CompiledStage,
    ctx: &ExecutionContext,
) -> Result<Vec<InternalEvent>, ScanError> {
    let def = match &stage.request {
        StageRequest::Http(def) => def,
        _ => return Err(ScanError::General("stage is not http".into())),
    };

    let host_key = ctx.target.host_key();
    let mut events = Vec::new();

    let requests: Vec<PreparedRequest> = if def.raw.is_empty() {
        def.path
            .iter()
            .map(|path| PreparedRequest {
                method: def.method.clone(),
                url: ctx.env.interpolate(path),
                headers: def
                    .headers
                    .iter()
                    .map(|(k, v)| (k.clone(), ctx.env.interpolate(v)))
                    .collect(),
                body: def.body.as_ref().map(|b| ctx.env.interpolate(b)),
            })
            .collect()
    } else {
        def.raw
            .iter()
            .filter_map(|raw| parse_raw_request(&ctx.env.interpolate(raw), &ctx.target.base_url()))
            .collect()
    };

    for prepared in requests {
        runtime.before_request(ctx, &host_key).await?;

        let started = Instant::now();
        match send(runtime, ctx, &prepared).await {
            Ok(response) => {
                let duration = started.elapsed();
                let mut variables = response_variables(&response);
                variables.insert(
                    "duration".to_string(),
                    DslValue::Int(duration.as_millis() as i64),
                );

                // driver-owned matching: evaluate against an environment
                // that already sees this response's variables
                let mut match_env = ctx.env.clone();
                match_env.merge_stage(variables.clone());
                let outcome = if stage.defers_matching {
                    // deferred until an interaction arrives
                    crate::matchers::MatchOutcome::default()
                } else {
                    evaluate_group(
                        &stage.matchers,
                        stage.matchers_condition,
                        &response,
                        &match_env,
                    )
                };
                let matched = outcome.matched;

                events.push(InternalEvent {
                    response,
                    variables,
                    raw_request: Some(prepared.describe()),
                    duration,
                    matched: Some(outcome),
                });

                if matched && stage.stop_at_first_match && !stage.iterate_all {
                    break;
                }
            }
            Err(net_err) => {
                debug!("HTTP request to {} failed: {net_err}", prepared.url);
                runtime.after_failure(&host_key, &net_err);
                // transient stage error: no matcher evaluation, next path
                continue;
            }
        }
    }

    Ok(events)
}

struct PreparedRequest {
    method: String,
    url: String,
    headers: Vec<(String, String)>,
    body: Option<String>,
}

impl PreparedRequest {
    fn describe(&self) -> String {
        let mut out = format!("{} {}", self.method, self.url);
        for (k, v) in &self.headers {
            out.push_str(&format!("\n{k}: {v}"));
        }
        if let Some(body) = &self.body {
            out.push_str("\n\n");
            out.push_str(body);
        }
        out
    }
}

async fn send(
    runtime: &ProtocolRuntime,
    ctx: &ExecutionContext,
    prepared: &PreparedRequest,
) -> Result<ResponseData, NetworkError> {
    let url: reqwest::Url = prepared
        .url
        .parse()
        .map_err(|_| NetworkError::InvalidTarget {
            target: prepared.url.clone(),
        })?;
    let method = Method::from_bytes(prepared.method.as_bytes()).map_err(|_| {
        NetworkError::InvalidTarget {
            target: format!("invalid method {}", prepared.method),
        }
    })?;

    let mut request = runtime.http_client().request(method, url.clone());
    for (name, value) in &prepared.headers {
        request = request.header(name.as_str(), value.as_str());
    }
    // per-execution cookie jar
    if let Some(cookies) = ctx.cookie_jar.cookies(&url) {
        request = request.header(reqwest::header::COOKIE, cookies);
    }
    if let Some(body) = &prepared.body {
        request = request.body(body.clone());
    }

    let send_fut = request.send();
    let response = tokio::select! {
        result = send_fut => result.map_err(NetworkError::from)?,
        _ = ctx.cancel.cancelled() => {
            return Err(NetworkError::Other("cancelled".into()));
        }
    };

    let status = response.status().as_u16();
    let final_url = response.url().to_string();

    // capture Set-Cookie into the execution jar before consuming the body
    let set_cookies: Vec<_> = response
        .headers()
        .get_all(reqwest::header::SET_COOKIE)
        .iter()
        .cloned()
        .collect();
    if !set_cookies.is_empty() {
        let mut iter = set_cookies.iter();
        ctx.cookie_jar.set_cookies(&mut iter, &url);
    }

    let headers = response
        .headers()
        .iter()
        .map(|(k, v)| format!("{}: {}", k, v.to_str().unwrap_or("")))
        .collect::<Vec<_>>()
        .join("\n");

    let bytes = response.bytes().await.map_err(NetworkError::from)?;
    let truncated = &bytes[..bytes.len().min(MAX_BODY_SIZE)];
    let body = String::from_utf8_lossy(truncated).into_owned();

    Ok(ResponseData {
        status: Some(status),
        headers,
        body,
        matched_at: final_url,
    })
}

/// Split a raw request block into request line, headers and body. The
/// target of relative request lines is the execution's base URL.
fn parse_raw_request(raw: &str, base_url: &str) -> Option<PreparedRequest> {
    let raw = raw.trim_start_matches(['\n', '\r']);
    let (head, body) = match raw.split_once("\n\n") {
        Some((head, body)) => (head, Some(body.to_string())),
        None => (raw, None),
    };
    let mut lines = head.lines();
    let request_line = lines.next()?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next()?.to_string();
    let path = parts.next()?.to_string();

    let url = if path.starts_with("http://") || path.starts_with("https://") {
        path
    } else {
        format!("{}{}", base_url.trim_end_matches('/'), path)
    };

    let mut headers = Vec::new();
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            let name = name.trim();
            // Host comes from the URL
            if name.eq_ignore_ascii_case("host") {
                continue;
            }
            headers.push((name.to_string(), value.trim().to_string()));
        }
    }
    Some(PreparedRequest {
        method,
        url,
        headers,
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_raw_request() {
        let raw = "POST /api/login HTTP/1.1\nHost: ignored.example\nContent-Type: application/json\n\n{\"user\":\"x\"}";
        let prepared = parse_raw_request(raw, "http://example.com").unwrap();
        assert_eq!(prepared.method, "POST");
        assert_eq!(prepared.url, "http://example.com/api/login");
        assert_eq!(prepared.headers.len(), 1);
        assert_eq!(prepared.body.as_deref(), Some("{\"user\":\"x\"}"));
    }

    #[test]
    fn test_parse_raw_request_absolute_url() {
        let raw = "GET https://other.example/x HTTP/1.1\n";
        let prepared = parse_raw_request(raw, "http://example.com").unwrap();
        assert_eq!(prepared.url, "https://other.example/x");
    }

    #[test]
    fn test_build_client_rejects_bad_proxy() {
        let options = crate::options::ScanOptions {
            proxy: Some("::: not a proxy".into()),
            ..Default::default()
        };
        assert!(build_client(&options).is_err());
    }

    #[test]
    fn test_prepared_request_describe() {
        let prepared = PreparedRequest {
            method: "GET".into(),
            url: "http://example.com/a".into(),
            headers: vec![("X-Probe".into(), "1".into())],
            body: None,
        };
        let text = prepared.describe();
        assert!(text.starts_with("GET http://example.com/a"));
        assert!(text.contains("X-Probe: 1"));
    }
}
