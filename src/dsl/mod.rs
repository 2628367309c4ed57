// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Tutka Expression DSL
 * Small pure expression language for matchers, extractors and
 * template interpolation
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

mod functions;
mod lexer;
mod parser;

pub use functions::function_names;

use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

use parser::Expr;

/// Evaluation result value
#[derive(Debug, Clone, PartialEq)]
pub enum DslValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl DslValue {
    pub fn as_bool(&self) -> bool {
        match self {
            DslValue::Bool(b) => *b,
            DslValue::Int(i) => *i != 0,
            DslValue::Float(f) => *f != 0.0,
            DslValue::String(s) => !s.is_empty(),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            DslValue::Int(i) => Some(*i as f64),
            DslValue::Float(f) => Some(*f),
            DslValue::String(s) => s.parse().ok(),
            DslValue::Bool(_) => None,
        }
    }
}

impl fmt::Display for DslValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DslValue::String(s) => f.write_str(s),
            DslValue::Int(i) => write!(f, "{i}"),
            DslValue::Float(v) => write!(f, "{v}"),
            DslValue::Bool(b) => write!(f, "{b}"),
        }
    }
}

impl From<&str> for DslValue {
    fn from(s: &str) -> Self {
        DslValue::String(s.to_string())
    }
}

impl From<String> for DslValue {
    fn from(s: String) -> Self {
        DslValue::String(s)
    }
}

impl From<i64> for DslValue {
    fn from(i: i64) -> Self {
        DslValue::Int(i)
    }
}

impl From<bool> for DslValue {
    fn from(b: bool) -> Self {
        DslValue::Bool(b)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DslError {
    #[error("Syntax error at offset {offset}: {message}")]
    Syntax { offset: usize, message: String },

    #[error("Unknown function: {0}")]
    UnknownFunction(String),

    #[error("Function {name} expects {expected} argument(s), got {got}")]
    Arity {
        name: String,
        expected: String,
        got: usize,
    },

    #[error("Undefined variable: {0}")]
    UndefinedVariable(String),

    #[error("Type error: {0}")]
    Type(String),
}

/// Variable resolution interface for evaluation
pub trait VariableLookup {
    fn lookup(&self, name: &str) -> Option<DslValue>;
}

impl VariableLookup for HashMap<String, DslValue> {
    fn lookup(&self, name: &str) -> Option<DslValue> {
        self.get(name).cloned()
    }
}

impl VariableLookup for HashMap<String, String> {
    fn lookup(&self, name: &str) -> Option<DslValue> {
        self.get(name).map(|s| DslValue::String(s.clone()))
    }
}

/// A parsed expression. Function names and arities are validated at
/// compile time; unknown functions never reach evaluation.
#[derive(Debug, Clone)]
pub struct CompiledExpression {
    source: String,
    expr: Expr,
}

impl CompiledExpression {
    pub fn compile(source: &str) -> Result<Self, DslError> {
        let expr = parser::parse(source)?;
        Ok(Self {
            source: source.to_string(),
            expr,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Strict evaluation: undefined variables are errors. Used by matcher
    /// DSL evaluation, which fails closed on them.
    pub fn evaluate(&self, env: &dyn VariableLookup) -> Result<DslValue, DslError> {
        eval_expr(&self.expr, env, false)
    }

    /// Lenient evaluation: undefined variables become empty strings. Used
    /// during template interpolation.
    pub fn evaluate_lenient(&self, env: &dyn VariableLookup) -> Result<DslValue, DslError> {
        eval_expr(&self.expr, env, true)
    }
}

fn eval_expr(expr: &Expr, env: &dyn VariableLookup, lenient: bool) -> Result<DslValue, DslError> {
    match expr {
        Expr::String(s) => Ok(DslValue::String(s.clone())),
        Expr::Int(i) => Ok(DslValue::Int(*i)),
        Expr::Float(f) => Ok(DslValue::Float(*f)),
        Expr::Bool(b) => Ok(DslValue::Bool(*b)),
        Expr::Variable(name) => match env.lookup(name) {
            Some(v) => Ok(v),
            None if lenient => Ok(DslValue::String(String::new())),
            None => Err(DslError::UndefinedVariable(name.clone())),
        },
        Expr::Not(inner) => Ok(DslValue::Bool(!eval_expr(inner, env, lenient)?.as_bool())),
        Expr::Neg(inner) => {
            let v = eval_expr(inner, env, lenient)?;
            match v {
                DslValue::Int(i) => Ok(DslValue::Int(-i)),
                DslValue::Float(f) => Ok(DslValue::Float(-f)),
                other => Err(DslError::Type(format!("cannot negate {other:?}"))),
            }
        }
        Expr::And(lhs, rhs) => {
            // short-circuit
            if !eval_expr(lhs, env, lenient)?.as_bool() {
                return Ok(DslValue::Bool(false));
            }
            Ok(DslValue::Bool(eval_expr(rhs, env, lenient)?.as_bool()))
        }
        Expr::Or(lhs, rhs) => {
            if eval_expr(lhs, env, lenient)?.as_bool() {
                return Ok(DslValue::Bool(true));
            }
            Ok(DslValue::Bool(eval_expr(rhs, env, lenient)?.as_bool()))
        }
        Expr::Compare(op, lhs, rhs) => {
            let l = eval_expr(lhs, env, lenient)?;
            let r = eval_expr(rhs, env, lenient)?;
            Ok(DslValue::Bool(compare(*op, &l, &r)?))
        }
        Expr::Arith(op, lhs, rhs) => {
            let l = eval_expr(lhs, env, lenient)?;
            let r = eval_expr(rhs, env, lenient)?;
            arith(*op, &l, &r)
        }
        Expr::Ternary(cond, then, alt) => {
            if eval_expr(cond, env, lenient)?.as_bool() {
                eval_expr(then, env, lenient)
            } else {
                eval_expr(alt, env, lenient)
            }
        }
        Expr::Call(name, args) => {
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                values.push(eval_expr(arg, env, lenient)?);
            }
            functions::invoke(name, &values)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

fn compare(op: CompareOp, l: &DslValue, r: &DslValue) -> Result<bool, DslError> {
    // numeric comparison when both sides are numeric, string otherwise
    if let (Some(a), Some(b)) = (l.as_f64(), r.as_f64()) {
        return Ok(match op {
            CompareOp::Eq => a == b,
            CompareOp::Ne => a != b,
            CompareOp::Lt => a < b,
            CompareOp::Le => a <= b,
            CompareOp::Gt => a > b,
            CompareOp::Ge => a >= b,
        });
    }
    let a = l.to_string();
    let b = r.to_string();
    Ok(match op {
        CompareOp::Eq => a == b,
        CompareOp::Ne => a != b,
        CompareOp::Lt => a < b,
        CompareOp::Le => a <= b,
        CompareOp::Gt => a > b,
        CompareOp::Ge => a >= b,
    })
}

fn arith(op: ArithOp, l: &DslValue, r: &DslValue) -> Result<DslValue, DslError> {
    // string concatenation with +
    if op == ArithOp::Add {
        if let (DslValue::String(a), b) = (l, r) {
            return Ok(DslValue::String(format!("{a}{b}")));
        }
        if let (a, DslValue::String(b)) = (l, r) {
            return Ok(DslValue::String(format!("{a}{b}")));
        }
    }
    if let (DslValue::Int(a), DslValue::Int(b)) = (l, r) {
        return match op {
            ArithOp::Add => Ok(DslValue::Int(a + b)),
            ArithOp::Sub => Ok(DslValue::Int(a - b)),
            ArithOp::Mul => Ok(DslValue::Int(a * b)),
            ArithOp::Div => {
                if *b == 0 {
                    Err(DslError::Type("division by zero".into()))
                } else {
                    Ok(DslValue::Int(a / b))
                }
            }
            ArithOp::Mod => {
                if *b == 0 {
                    Err(DslError::Type("division by zero".into()))
                } else {
                    Ok(DslValue::Int(a % b))
                }
            }
        };
    }
    let a = l
        .as_f64()
        .ok_or_else(|| DslError::Type(format!("non-numeric operand {l:?}")))?;
    let b = r
        .as_f64()
        .ok_or_else(|| DslError::Type(format!("non-numeric operand {r:?}")))?;
    let out = match op {
        ArithOp::Add => a + b,
        ArithOp::Sub => a - b,
        ArithOp::Mul => a * b,
        ArithOp::Div => a / b,
        ArithOp::Mod => a % b,
    };
    Ok(DslValue::Float(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, DslValue)]) -> HashMap<String, DslValue> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_literal_and_comparison() {
        let expr = CompiledExpression::compile("status_code == 200").unwrap();
        let e = env(&[("status_code", DslValue::Int(200))]);
        assert_eq!(expr.evaluate(&e).unwrap(), DslValue::Bool(true));
    }

    #[test]
    fn test_logical_short_circuit() {
        let expr = CompiledExpression::compile(
            "status_code == 200 && contains(body, 'admin')",
        )
        .unwrap();
        let e = env(&[
            ("status_code", DslValue::Int(200)),
            ("body", DslValue::String("the admin panel".into())),
        ]);
        assert_eq!(expr.evaluate(&e).unwrap(), DslValue::Bool(true));

        let e2 = env(&[
            ("status_code", DslValue::Int(404)),
            ("body", DslValue::String("nope".into())),
        ]);
        assert_eq!(expr.evaluate(&e2).unwrap(), DslValue::Bool(false));
    }

    #[test]
    fn test_undefined_variable_strict_vs_lenient() {
        let expr = CompiledExpression::compile("missing_var").unwrap();
        let e: HashMap<String, DslValue> = HashMap::new();
        assert_eq!(
            expr.evaluate(&e),
            Err(DslError::UndefinedVariable("missing_var".into()))
        );
        assert_eq!(
            expr.evaluate_lenient(&e).unwrap(),
            DslValue::String(String::new())
        );
    }

    #[test]
    fn test_unknown_function_is_compile_error() {
        let err = CompiledExpression::compile("frobnicate(body)").unwrap_err();
        assert_eq!(err, DslError::UnknownFunction("frobnicate".into()));
    }

    #[test]
    fn test_arity_validated_at_compile_time() {
        let err = CompiledExpression::compile("md5()").unwrap_err();
        assert!(matches!(err, DslError::Arity { .. }));
    }

    #[test]
    fn test_ternary() {
        let expr = CompiledExpression::compile("status_code == 200 ? 'ok' : 'bad'").unwrap();
        let e = env(&[("status_code", DslValue::Int(200))]);
        assert_eq!(expr.evaluate(&e).unwrap(), DslValue::String("ok".into()));
    }

    #[test]
    fn test_string_concat() {
        let expr = CompiledExpression::compile("'a' + 'b' + 1").unwrap();
        let e: HashMap<String, DslValue> = HashMap::new();
        assert_eq!(expr.evaluate(&e).unwrap(), DslValue::String("ab1".into()));
    }

    #[test]
    fn test_negation_and_not() {
        let expr = CompiledExpression::compile("!contains('abc', 'z')").unwrap();
        let e: HashMap<String, DslValue> = HashMap::new();
        assert_eq!(expr.evaluate(&e).unwrap(), DslValue::Bool(true));
    }

    #[test]
    fn test_arithmetic() {
        let expr = CompiledExpression::compile("(2 + 3) * 4 % 7").unwrap();
        let e: HashMap<String, DslValue> = HashMap::new();
        assert_eq!(expr.evaluate(&e).unwrap(), DslValue::Int(6));
    }
}
