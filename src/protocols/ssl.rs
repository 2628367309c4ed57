// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Tutka SSL Driver
 * TLS handshake probe and peer certificate grab
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

use std::time::Instant;
use tokio::net::TcpStream;
use tokio_native_tls::TlsConnector;
use tracing::debug;

use super::{InternalEvent, ProtocolRuntime};
use crate::context::ExecutionContext;
use crate::dsl::DslValue;
use crate::errors::{NetworkError, ScanError};
use crate::matchers::ResponseData;
use crate::template::{CompiledStage, StageRequest};

/// Execute one SSL stage: connect, handshake, expose the peer certificate
/// to matchers. Matching is delegated to the executor.
pub async fn execute(
    runtime: &ProtocolRuntime,
    stage: &CompiledStage,
    ctx: &ExecutionContext,
) -> Result<Vec<InternalEvent>, ScanError> {
    let def = match &stage.request {
        StageRequest::Ssl(def) => def,
        _ => return Err(ScanError::General("stage is not ssl".into())),
    };

    let host_key = ctx.target.host_key();

    let mut env = ctx.env.clone();
    if ctx.target.port().is_none() {
        env.set_stage("Port", DslValue::Int(443));
    }
    let address = env.interpolate(&def.address);
    let sni_host = address
        .rsplit_once(':')
        .map(|(h, _)| h.to_string())
        .unwrap_or_else(|| address.clone());

    runtime.before_request(ctx, &host_key).await?;

    let started = Instant::now();
    match handshake(runtime, ctx, &address, &sni_host).await {
        Ok(cert_der) => {
            let duration = started.elapsed();
            let cert_hex = cert_der.as_deref().map(hex::encode).unwrap_or_default();
            let response = ResponseData {
                status: None,
                headers: format!("handshake: ok\nsni: {sni_host}"),
                body: cert_hex.clone(),
                matched_at: address.clone(),
            };
            let mut variables = crate::matchers::response_variables(&response);
            variables.insert("handshake_ok".to_string(), DslValue::Bool(true));
            variables.insert("peer_certificate".to_string(), DslValue::String(cert_hex));
            variables.insert("sni".to_string(), DslValue::String(sni_host));
            variables.insert(
                "duration".to_string(),
                DslValue::Int(duration.as_millis() as i64),
            );
            Ok(vec![InternalEvent {
                response,
                variables,
                raw_request: Some(format!("tls-handshake {address}")),
                duration,
                matched: None,
            }])
        }
        Err(net_err) => {
            debug!("TLS handshake with {address} failed: {net_err}");
            runtime.after_failure(&host_key, &net_err);
            Err(ScanError::Network(net_err))
        }
    }
}

async fn handshake(
    runtime: &ProtocolRuntime,
    ctx: &ExecutionContext,
    address: &str,
    sni_host: &str,
) -> Result<Option<Vec<u8>>, NetworkError> {
    let timeout = runtime.options.timeout;

    let connector = native_tls::TlsConnector::builder()
        .danger_accept_invalid_certs(true)
        .danger_accept_invalid_hostnames(true)
        .build()
        .map_err(|e| NetworkError::TlsHandshakeFailed {
            host: sni_host.to_string(),
            reason: e.to_string(),
        })?;
    let connector = TlsConnector::from(connector);

    let tcp = tokio::select! {
        result = tokio::time::timeout(timeout, TcpStream::connect(address)) => match result {
            Ok(Ok(stream)) => stream,
            Ok(Err(io_err)) => return Err(io_err.into()),
            Err(_) => {
                return Err(NetworkError::ConnectionTimeout {
                    target: address.to_string(),
                    timeout,
                })
            }
        },
        _ = ctx.cancel.cancelled() => return Err(NetworkError::Other("cancelled".into())),
    };

    let tls = tokio::select! {
        result = tokio::time::timeout(timeout, connector.connect(sni_host, tcp)) => match result {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(NetworkError::TlsHandshakeFailed {
                    host: sni_host.to_string(),
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                return Err(NetworkError::TlsHandshakeFailed {
                    host: sni_host.to_string(),
                    reason: format!("handshake timeout after {timeout:?}"),
                })
            }
        },
        _ = ctx.cancel.cancelled() => return Err(NetworkError::Other("cancelled".into())),
    };

    let cert = tls
        .get_ref()
        .peer_certificate()
        .ok()
        .flatten()
        .and_then(|c| c.to_der().ok());
    Ok(cert)
}
