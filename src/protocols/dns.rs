// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Tutka DNS Driver
 * Record lookups via hickory-resolver
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

use hickory_resolver::error::ResolveErrorKind;
use hickory_resolver::proto::rr::RecordType;
use std::str::FromStr;
use std::time::Instant;
use tracing::debug;

use super::{InternalEvent, ProtocolRuntime};
use crate::context::ExecutionContext;
use crate::dsl::DslValue;
use crate::errors::{NetworkError, ScanError};
use crate::matchers::ResponseData;
use crate::template::{CompiledStage, StageRequest};

/// Execute one DNS stage. Matching is delegated to the executor.
pub async fn execute(
    runtime: &ProtocolRuntime,
    stage: &CompiledStage,
    ctx: &ExecutionContext,
) -> Result<Vec<InternalEvent>, ScanError> {
    let def = match &stage.request {
        StageRequest::Dns(def) => def,
        _ => return Err(ScanError::General("stage is not dns".into())),
    };

    let host_key = ctx.target.host_key();
    runtime.before_request(ctx, &host_key).await?;

    let mut env = ctx.env.clone();
    env.set_stage("FQDN", DslValue::String(ctx.target.hostname()));
    let name = env.interpolate(&def.name);
    let record_type =
        RecordType::from_str(&def.record_type.to_uppercase()).unwrap_or(RecordType::A);

    debug!("DNS lookup {record_type} {name}");
    let started = Instant::now();
    let lookup = tokio::select! {
        result = runtime.resolver().lookup(name.as_str(), record_type) => result,
        _ = ctx.cancel.cancelled() => return Err(ScanError::Cancelled),
    };
    let duration = started.elapsed();

    let (answers, rcode) = match lookup {
        Ok(lookup) => {
            let answers: Vec<String> = lookup.iter().map(|r| r.to_string()).collect();
            (answers, "NOERROR".to_string())
        }
        Err(err) => match err.kind() {
            // an empty answer is a response worth matching on, not a failure
            ResolveErrorKind::NoRecordsFound { response_code, .. } => {
                (Vec::new(), response_code.to_string())
            }
            _ => {
                let net_err = NetworkError::DnsResolutionFailed {
                    host: name.clone(),
                    reason: err.to_string(),
                };
                runtime.after_failure(&host_key, &net_err);
                return Err(ScanError::Network(net_err));
            }
        },
    };

    let body = answers.join("\n");
    let response = ResponseData {
        status: None,
        headers: format!("rcode: {rcode}"),
        body: body.clone(),
        matched_at: name.clone(),
    };

    let mut variables = crate::matchers::response_variables(&response);
    variables.insert("answers".to_string(), DslValue::String(body));
    variables.insert("rcode".to_string(), DslValue::String(rcode));
    variables.insert("question".to_string(), DslValue::String(name));
    variables.insert(
        "duration".to_string(),
        DslValue::Int(duration.as_millis() as i64),
    );

    Ok(vec![InternalEvent {
        response,
        variables,
        raw_request: Some(format!("{} {}", def.record_type, def.name)),
        duration,
        matched: None,
    }])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_type_parsing() {
        assert_eq!(RecordType::from_str("CNAME").unwrap(), RecordType::CNAME);
        assert_eq!(RecordType::from_str("TXT").unwrap(), RecordType::TXT);
    }
}
