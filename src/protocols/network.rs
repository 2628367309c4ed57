// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Tutka Network Driver
 * Raw TCP stage execution
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

use std::time::Instant;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use super::{InternalEvent, ProtocolRuntime};
use crate::context::ExecutionContext;
use crate::dsl::DslValue;
use crate::errors::{NetworkError, ScanError};
use crate::matchers::ResponseData;
use crate::template::{CompiledStage, StageRequest};

/// Execute one raw TCP stage against every declared host expression.
/// Matching is delegated to the executor.
pub async fn execute(
    runtime: &ProtocolRuntime,
    stage: &CompiledStage,
    ctx: &ExecutionContext,
) -> Result<Vec<InternalEvent>, ScanError> {
    let def = match &stage.request {
        StageRequest::Network(def) => def,
        _ => return Err(ScanError::General("stage is not network".into())),
    };

    let host_key = ctx.target.host_key();
    let mut events = Vec::new();

    let hosts: Vec<String> = if def.host.is_empty() {
        vec![ctx.target.host_key()]
    } else {
        def.host.iter().map(|h| ctx.env.interpolate(h)).collect()
    };

    for address in hosts {
        // custom_ip overrides DNS for the scan subject itself
        let dial_addr = match (&ctx.target.custom_ip, address == ctx.target.host_key()) {
            (Some(ip), true) => match address.rsplit_once(':') {
                Some((_, port)) => format!("{ip}:{port}"),
                None => ip.clone(),
            },
            _ => address.clone(),
        };

        runtime.before_request(ctx, &host_key).await?;

        let started = Instant::now();
        match exchange(runtime, ctx, &dial_addr, def).await {
            Ok(data) => {
                let duration = started.elapsed();
                let response = ResponseData {
                    status: None,
                    headers: String::new(),
                    body: String::from_utf8_lossy(&data).into_owned(),
                    matched_at: address.clone(),
                };
                let mut variables = crate::matchers::response_variables(&response);
                variables.insert("raw".to_string(), DslValue::String(hex::encode(&data)));
                variables.insert(
                    "duration".to_string(),
                    DslValue::Int(duration.as_millis() as i64),
                );
                events.push(InternalEvent {
                    response,
                    variables,
                    raw_request: None,
                    duration,
                    matched: None,
                });
            }
            Err(net_err) => {
                debug!("TCP exchange with {dial_addr} failed: {net_err}");
                runtime.after_failure(&host_key, &net_err);
            }
        }
    }

    Ok(events)
}

async fn exchange(
    runtime: &ProtocolRuntime,
    ctx: &ExecutionContext,
    address: &str,
    def: &crate::template::NetworkRequestDef,
) -> Result<Vec<u8>, NetworkError> {
    let timeout = runtime.options.timeout;

    let connect = tokio::time::timeout(timeout, TcpStream::connect(address));
    let mut stream = tokio::select! {
        result = connect => match result {
            Ok(Ok(stream)) => stream,
            Ok(Err(io_err)) => {
                let mut err: NetworkError = io_err.into();
                attach_target(&mut err, address);
                return Err(err);
            }
            Err(_) => {
                return Err(NetworkError::ConnectionTimeout {
                    target: address.to_string(),
                    timeout,
                })
            }
        },
        _ = ctx.cancel.cancelled() => return Err(NetworkError::Other("cancelled".into())),
    };

    for input in &def.inputs {
        let data = ctx.env.interpolate(&input.data);
        let bytes = match input.encoding.as_deref() {
            Some("hex") => hex::decode(&data)
                .map_err(|e| NetworkError::Other(format!("invalid hex input: {e}")))?,
            _ => data.into_bytes(),
        };
        stream.write_all(&bytes).await.map_err(|e| {
            let mut err: NetworkError = e.into();
            attach_target(&mut err, address);
            err
        })?;
    }
    stream.flush().await.map_err(NetworkError::from)?;

    let mut buf = vec![0u8; def.read_size];
    let read = tokio::select! {
        result = tokio::time::timeout(timeout, stream.read(&mut buf)) => match result {
            Ok(Ok(n)) => n,
            Ok(Err(io_err)) => {
                let mut err: NetworkError = io_err.into();
                attach_target(&mut err, address);
                return Err(err);
            }
            // a banner-less service is still a response
            Err(_) => 0,
        },
        _ = ctx.cancel.cancelled() => return Err(NetworkError::Other("cancelled".into())),
    };
    buf.truncate(read);
    Ok(buf)
}

fn attach_target(err: &mut NetworkError, address: &str) {
    match err {
        NetworkError::ConnectionRefused { target }
        | NetworkError::ConnectionReset { target }
        | NetworkError::NoRouteToHost { target }
        | NetworkError::ConnectionTimeout { target, .. } => {
            if target.is_empty() {
                *target = address.to_string();
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attach_target_fills_empty() {
        let mut err = NetworkError::ConnectionRefused {
            target: String::new(),
        };
        attach_target(&mut err, "10.0.0.1:22");
        match err {
            NetworkError::ConnectionRefused { target } => assert_eq!(target, "10.0.0.1:22"),
            _ => unreachable!(),
        }
    }
}
