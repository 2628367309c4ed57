// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Tutka DSL Function Registry
 * Helper functions available to template expressions
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

use base64::Engine;
use md5::{Digest as Md5Digest, Md5};
use once_cell::sync::Lazy;
use rand::Rng;
use sha2::{Digest, Sha256};
use std::collections::HashMap;

use super::{DslError, DslValue};

type Handler = fn(&[DslValue]) -> Result<DslValue, DslError>;

struct Function {
    /// Accepted argument counts
    arities: &'static [usize],
    handler: Handler,
}

static REGISTRY: Lazy<HashMap<&'static str, Function>> = Lazy::new(|| {
    let mut table: HashMap<&'static str, Function> = HashMap::new();
    let mut reg = |name: &'static str, arities: &'static [usize], handler: Handler| {
        table.insert(name, Function { arities, handler });
    };

    reg("md5", &[1], fn_md5);
    reg("sha256", &[1], fn_sha256);
    reg("base64", &[1], fn_base64);
    reg("base64_decode", &[1], fn_base64_decode);
    reg("hex_encode", &[1], fn_hex_encode);
    reg("hex_decode", &[1], fn_hex_decode);
    reg("url_encode", &[1], fn_url_encode);
    reg("url_decode", &[1], fn_url_decode);
    reg("to_upper", &[1], fn_to_upper);
    reg("to_lower", &[1], fn_to_lower);
    reg("trim_space", &[1], fn_trim_space);
    reg("len", &[1], fn_len);
    reg("contains", &[2], fn_contains);
    reg("icontains", &[2], fn_icontains);
    reg("starts_with", &[2], fn_starts_with);
    reg("ends_with", &[2], fn_ends_with);
    reg("replace", &[3], fn_replace);
    reg("regex", &[2], fn_regex);
    reg("rand_text_alpha", &[1], fn_rand_text_alpha);
    reg("rand_text_alphanumeric", &[1], fn_rand_text_alphanumeric);
    reg("rand_int", &[0, 2], fn_rand_int);
    reg("dns_name", &[1], fn_dns_name);
    reg("to_string", &[1], fn_to_string);
    reg("to_number", &[1], fn_to_number);

    table
});

/// Compile-time check: unknown names and wrong arities are template errors.
pub(crate) fn validate(name: &str, arity: usize) -> Result<(), DslError> {
    match REGISTRY.get(name) {
        None => Err(DslError::UnknownFunction(name.to_string())),
        Some(f) if !f.arities.contains(&arity) => Err(DslError::Arity {
            name: name.to_string(),
            expected: f
                .arities
                .iter()
                .map(|a| a.to_string())
                .collect::<Vec<_>>()
                .join(" or "),
            got: arity,
        }),
        Some(_) => Ok(()),
    }
}

pub(crate) fn invoke(name: &str, args: &[DslValue]) -> Result<DslValue, DslError> {
    let f = REGISTRY
        .get(name)
        .ok_or_else(|| DslError::UnknownFunction(name.to_string()))?;
    (f.handler)(args)
}

/// Names of all registered functions, for diagnostics
pub fn function_names() -> Vec<&'static str> {
    let mut names: Vec<_> = REGISTRY.keys().copied().collect();
    names.sort_unstable();
    names
}

fn str_arg(args: &[DslValue], idx: usize) -> String {
    args[idx].to_string()
}

fn int_arg(args: &[DslValue], idx: usize) -> Result<i64, DslError> {
    match &args[idx] {
        DslValue::Int(i) => Ok(*i),
        DslValue::String(s) => s
            .parse()
            .map_err(|_| DslError::Type(format!("expected integer, got {s:?}"))),
        other => Err(DslError::Type(format!("expected integer, got {other:?}"))),
    }
}

fn fn_md5(args: &[DslValue]) -> Result<DslValue, DslError> {
    let mut hasher = Md5::new();
    hasher.update(str_arg(args, 0).as_bytes());
    Ok(DslValue::String(hex::encode(hasher.finalize())))
}

fn fn_sha256(args: &[DslValue]) -> Result<DslValue, DslError> {
    let digest = Sha256::digest(str_arg(args, 0).as_bytes());
    Ok(DslValue::String(hex::encode(digest)))
}

fn fn_base64(args: &[DslValue]) -> Result<DslValue, DslError> {
    Ok(DslValue::String(
        base64::engine::general_purpose::STANDARD.encode(str_arg(args, 0)),
    ))
}

fn fn_base64_decode(args: &[DslValue]) -> Result<DslValue, DslError> {
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(str_arg(args, 0))
        .map_err(|e| DslError::Type(format!("invalid base64: {e}")))?;
    Ok(DslValue::String(
        String::from_utf8_lossy(&decoded).into_owned(),
    ))
}

fn fn_hex_encode(args: &[DslValue]) -> Result<DslValue, DslError> {
    Ok(DslValue::String(hex::encode(str_arg(args, 0))))
}

fn fn_hex_decode(args: &[DslValue]) -> Result<DslValue, DslError> {
    let decoded =
        hex::decode(str_arg(args, 0)).map_err(|e| DslError::Type(format!("invalid hex: {e}")))?;
    Ok(DslValue::String(
        String::from_utf8_lossy(&decoded).into_owned(),
    ))
}

fn fn_url_encode(args: &[DslValue]) -> Result<DslValue, DslError> {
    let input = str_arg(args, 0);
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    Ok(DslValue::String(out))
}

fn fn_url_decode(args: &[DslValue]) -> Result<DslValue, DslError> {
    let input = str_arg(args, 0);
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => match hex::decode([bytes[i + 1], bytes[i + 2]]) {
                Ok(decoded) => {
                    out.extend_from_slice(&decoded);
                    i += 3;
                }
                Err(_) => {
                    out.push(b'%');
                    i += 1;
                }
            },
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    Ok(DslValue::String(String::from_utf8_lossy(&out).into_owned()))
}

fn fn_to_upper(args: &[DslValue]) -> Result<DslValue, DslError> {
    Ok(DslValue::String(str_arg(args, 0).to_uppercase()))
}

fn fn_to_lower(args: &[DslValue]) -> Result<DslValue, DslError> {
    Ok(DslValue::String(str_arg(args, 0).to_lowercase()))
}

fn fn_trim_space(args: &[DslValue]) -> Result<DslValue, DslError> {
    Ok(DslValue::String(str_arg(args, 0).trim().to_string()))
}

fn fn_len(args: &[DslValue]) -> Result<DslValue, DslError> {
    Ok(DslValue::Int(str_arg(args, 0).len() as i64))
}

fn fn_contains(args: &[DslValue]) -> Result<DslValue, DslError> {
    Ok(DslValue::Bool(
        str_arg(args, 0).contains(&str_arg(args, 1)),
    ))
}

fn fn_icontains(args: &[DslValue]) -> Result<DslValue, DslError> {
    Ok(DslValue::Bool(
        str_arg(args, 0)
            .to_lowercase()
            .contains(&str_arg(args, 1).to_lowercase()),
    ))
}

fn fn_starts_with(args: &[DslValue]) -> Result<DslValue, DslError> {
    Ok(DslValue::Bool(
        str_arg(args, 0).starts_with(&str_arg(args, 1)),
    ))
}

fn fn_ends_with(args: &[DslValue]) -> Result<DslValue, DslError> {
    Ok(DslValue::Bool(
        str_arg(args, 0).ends_with(&str_arg(args, 1)),
    ))
}

fn fn_replace(args: &[DslValue]) -> Result<DslValue, DslError> {
    Ok(DslValue::String(str_arg(args, 0).replace(
        &str_arg(args, 1),
        &str_arg(args, 2),
    )))
}

fn fn_regex(args: &[DslValue]) -> Result<DslValue, DslError> {
    let pattern = str_arg(args, 0);
    let re = regex::Regex::new(&pattern)
        .map_err(|e| DslError::Type(format!("invalid regex {pattern:?}: {e}")))?;
    Ok(DslValue::Bool(re.is_match(&str_arg(args, 1))))
}

fn rand_text(len: usize, charset: &[u8]) -> String {
    let mut rng = rand::rng();
    (0..len)
        .map(|_| charset[rng.random_range(0..charset.len())] as char)
        .collect()
}

fn fn_rand_text_alpha(args: &[DslValue]) -> Result<DslValue, DslError> {
    let len = int_arg(args, 0)?.max(0) as usize;
    Ok(DslValue::String(rand_text(
        len,
        b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ",
    )))
}

fn fn_rand_text_alphanumeric(args: &[DslValue]) -> Result<DslValue, DslError> {
    let len = int_arg(args, 0)?.max(0) as usize;
    Ok(DslValue::String(rand_text(
        len,
        b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789",
    )))
}

fn fn_rand_int(args: &[DslValue]) -> Result<DslValue, DslError> {
    let mut rng = rand::rng();
    let (lo, hi) = if args.len() == 2 {
        (int_arg(args, 0)?, int_arg(args, 1)?)
    } else {
        (0, i64::MAX)
    };
    if lo >= hi {
        return Err(DslError::Type("rand_int: empty range".into()));
    }
    Ok(DslValue::Int(rng.random_range(lo..hi)))
}

/// Sanitize into a DNS-safe label sequence: lowercase, alnum and hyphens,
/// 63-char label cap.
fn fn_dns_name(args: &[DslValue]) -> Result<DslValue, DslError> {
    let sanitized: String = str_arg(args, 0)
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();
    let labels: Vec<String> = sanitized
        .split('.')
        .map(|l| l.chars().take(63).collect())
        .collect();
    Ok(DslValue::String(labels.join(".")))
}

fn fn_to_string(args: &[DslValue]) -> Result<DslValue, DslError> {
    Ok(DslValue::String(args[0].to_string()))
}

fn fn_to_number(args: &[DslValue]) -> Result<DslValue, DslError> {
    let s = str_arg(args, 0);
    if let Ok(i) = s.parse::<i64>() {
        return Ok(DslValue::Int(i));
    }
    s.parse::<f64>()
        .map(DslValue::Float)
        .map_err(|_| DslError::Type(format!("not a number: {s:?}")))
}
