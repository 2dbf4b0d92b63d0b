//! Evaluator for the filter expression DSL (spec §4.2).

use super::ast::{CmpOp, Expr, Literal};
use crate::normalize::ResolvedFields;
use crate::path;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub struct EvalError(pub String);

/// Everything the evaluator can resolve a `spec.*` field path against.
pub struct EvalContext<'a> {
    pub source: &'a str,
    pub category: &'a str,
    pub resolved: &'a ResolvedFields,
    pub payload: &'a Value,
}

#[derive(Debug, Clone, PartialEq)]
enum FieldValue {
    Str(String),
    Num(f64),
    Severity(crate::k8s::observation::Severity),
    Missing,
}

/// Evaluates `expr` against `ctx`, returning `(pass, reason)` per spec §4.2.
pub fn eval(expr: &Expr, ctx: &EvalContext<'_>) -> Result<(bool, String), EvalError> {
    match expr {
        Expr::Not(inner) => {
            let (pass, reason) = eval(inner, ctx)?;
            Ok((!pass, format!("NOT ({reason})")))
        }
        Expr::And(lhs, rhs) => {
            let (lp, lr) = eval(lhs, ctx)?;
            if !lp {
                return Ok((false, format!("AND short-circuit: {lr}")));
            }
            let (rp, rr) = eval(rhs, ctx)?;
            Ok((rp, format!("{lr} AND {rr}")))
        }
        Expr::Or(lhs, rhs) => {
            let (lp, lr) = eval(lhs, ctx)?;
            if lp {
                return Ok((true, format!("OR short-circuit: {lr}")));
            }
            let (rp, rr) = eval(rhs, ctx)?;
            Ok((rp, format!("{lr} OR {rr}")))
        }
        Expr::Exists { field, negated } => {
            let present = !matches!(resolve(field, ctx), FieldValue::Missing);
            let pass = present != *negated;
            Ok((pass, format!("{field} EXISTS={present}")))
        }
        Expr::Contains { field, needle } => {
            let value = resolve_str(field, ctx)?;
            Ok((
                value.contains(needle.as_str()),
                format!("{field} CONTAINS {needle:?}"),
            ))
        }
        Expr::StartsWith { field, prefix } => {
            let value = resolve_str(field, ctx)?;
            Ok((
                value.starts_with(prefix.as_str()),
                format!("{field} STARTS_WITH {prefix:?}"),
            ))
        }
        Expr::EndsWith { field, suffix } => {
            let value = resolve_str(field, ctx)?;
            Ok((
                value.ends_with(suffix.as_str()),
                format!("{field} ENDS_WITH {suffix:?}"),
            ))
        }
        Expr::In { field, list, negated } => {
            let value = resolve(field, ctx);
            let mut hit = false;
            for lit in list {
                if compare(&value, &lit_to_value(lit), CmpOp::Eq)? {
                    hit = true;
                    break;
                }
            }
            let pass = hit != *negated;
            Ok((pass, format!("{field} IN {list:?} = {pass}")))
        }
        Expr::Compare { field, op, literal } => {
            let value = resolve(field, ctx);
            let pass = compare(&value, &lit_to_value(literal), *op)?;
            Ok((pass, format!("{field} {op:?} {literal:?} = {pass}")))
        }
    }
}

fn lit_to_value(lit: &Literal) -> FieldValue {
    match lit {
        Literal::String(s) => FieldValue::Str(s.clone()),
        Literal::Number(n) => FieldValue::Num(*n),
        Literal::List(_) => FieldValue::Missing,
    }
}

fn resolve(field: &str, ctx: &EvalContext<'_>) -> FieldValue {
    let rest = field.strip_prefix("spec.").unwrap_or(field);
    match rest {
        "severity" => ctx
            .resolved
            .severity
            .map(FieldValue::Severity)
            .unwrap_or(FieldValue::Missing),
        "priority" => ctx.resolved.priority.map(FieldValue::Num).unwrap_or(FieldValue::Missing),
        "eventType" => FieldValue::Str(ctx.resolved.event_type.clone()),
        "category" => FieldValue::Str(ctx.category.to_string()),
        "source" => FieldValue::Str(ctx.source.to_string()),
        other if other.starts_with("resource.") => {
            let Some(resource) = &ctx.resolved.resource else {
                return FieldValue::Missing;
            };
            match other.trim_start_matches("resource.") {
                "name" => FieldValue::Str(resource.name.clone()),
                "kind" => FieldValue::Str(resource.kind.clone()),
                "apiVersion" => FieldValue::Str(resource.api_version.clone()),
                "namespace" => resource
                    .namespace
                    .clone()
                    .map(FieldValue::Str)
                    .unwrap_or(FieldValue::Missing),
                _ => FieldValue::Missing,
            }
        }
        other if other.starts_with("details.") => {
            let sub_path = other.trim_start_matches("details.");
            match path::extract(ctx.payload, sub_path) {
                Some(Value::Number(n)) => n.as_f64().map(FieldValue::Num).unwrap_or(FieldValue::Missing),
                Some(Value::String(s)) => FieldValue::Str(s.clone()),
                Some(other) => FieldValue::Str(other.to_string()),
                None => FieldValue::Missing,
            }
        }
        _ => FieldValue::Missing,
    }
}

fn resolve_str(field: &str, ctx: &EvalContext<'_>) -> Result<String, EvalError> {
    match resolve(field, ctx) {
        FieldValue::Str(s) => Ok(s),
        FieldValue::Severity(s) => Ok(format!("{s:?}").to_ascii_uppercase()),
        FieldValue::Num(n) => Ok(n.to_string()),
        FieldValue::Missing => Ok(String::new()),
    }
}

fn compare(lhs: &FieldValue, rhs: &FieldValue, op: CmpOp) -> Result<bool, EvalError> {
    use std::cmp::Ordering;

    let ordering = match (lhs, rhs) {
        (FieldValue::Missing, _) | (_, FieldValue::Missing) => return Ok(false),
        (FieldValue::Severity(a), FieldValue::Str(b)) => {
            let b = crate::k8s::observation::Severity::parse_token(b).ok_or_else(|| {
                EvalError(format!("{b:?} is not a valid severity token"))
            })?;
            a.cmp(&b)
        }
        (FieldValue::Severity(a), FieldValue::Severity(b)) => a.cmp(b),
        (FieldValue::Num(a), FieldValue::Num(b)) => {
            a.partial_cmp(b).unwrap_or(Ordering::Equal)
        }
        (FieldValue::Str(a), FieldValue::Str(b)) => a.cmp(b),
        (FieldValue::Severity(_), FieldValue::Num(_))
        | (FieldValue::Num(_), FieldValue::Severity(_))
        | (FieldValue::Num(_), FieldValue::Str(_))
        | (FieldValue::Str(_), FieldValue::Num(_)) => {
            return Err(EvalError(
                "mixed string/numeric comparison has no defined ordering".to_string(),
            ))
        }
    };

    Ok(match op {
        CmpOp::Eq => ordering == Ordering::Equal,
        CmpOp::Ne => ordering != Ordering::Equal,
        CmpOp::Lt => ordering == Ordering::Less,
        CmpOp::Le => ordering != Ordering::Greater,
        CmpOp::Gt => ordering == Ordering::Greater,
        CmpOp::Ge => ordering != Ordering::Less,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::expr::parser::parse;
    use crate::k8s::observation::Severity;
    use serde_json::json;

    fn ctx(resolved: &ResolvedFields, payload: &Value) -> EvalContext<'_> {
        EvalContext {
            source: "trivy",
            category: "security",
            resolved,
            payload,
        }
    }

    #[test]
    fn severity_ordinal_comparison() {
        let mut resolved = ResolvedFields::default();
        resolved.severity = Some(Severity::High);
        let payload = json!({});
        let expr = parse(r#"spec.severity >= "HIGH""#).unwrap();
        let (pass, _) = eval(&expr, &ctx(&resolved, &payload)).unwrap();
        assert!(pass);

        let expr = parse(r#"spec.severity >= "CRITICAL""#).unwrap();
        let (pass, _) = eval(&expr, &ctx(&resolved, &payload)).unwrap();
        assert!(!pass);
    }

    #[test]
    fn details_path_contains() {
        // `spec.details.*` indexes directly into the raw payload, since
        // `details` on the normalized Observation is the payload verbatim.
        let resolved = ResolvedFields::default();
        let payload = json!({"cve_id": "CVE-2024-1234"});
        let expr = parse(r#"spec.details.cve_id CONTAINS "2024""#).unwrap();
        let (pass, _) = eval(&expr, &ctx(&resolved, &payload)).unwrap();
        assert!(pass);
    }

    #[test]
    fn exists_and_not_exists() {
        let resolved = ResolvedFields::default();
        let payload = json!({"cve_id": "X"});
        let expr = parse("spec.details.cve_id EXISTS").unwrap();
        assert!(eval(&expr, &ctx(&resolved, &payload)).unwrap().0);

        let expr = parse("spec.details.missing NOT EXISTS").unwrap();
        assert!(eval(&expr, &ctx(&resolved, &payload)).unwrap().0);
    }

    #[test]
    fn mixed_type_comparison_is_an_error() {
        let mut resolved = ResolvedFields::default();
        resolved.priority = Some(0.5);
        let payload = json!({});
        let expr = parse(r#"spec.priority >= "high""#).unwrap();
        assert!(eval(&expr, &ctx(&resolved, &payload)).is_err());
    }
}
