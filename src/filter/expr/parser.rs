//! Pest-grammar-driven parser for the filter expression DSL (spec §4.2).
//!
//! Precedence, low to high: `OR`, `AND`, `NOT`, comparison/set/string ops —
//! encoded directly in `grammar.pest` rather than in hand-written descent
//! methods. Macros (`is_critical`, `is_high`, `is_security`, `is_compliance`)
//! expand to their equivalent comparison once the tree is walked, so the
//! evaluator never sees them.

use pest::iterators::Pair;
use pest::Parser as _;

use super::ast::{CmpOp, Expr, Literal};

#[derive(pest_derive::Parser)]
#[grammar = "filter/expr/grammar.pest"]
struct ExprParser;

#[derive(Debug, Clone, PartialEq)]
pub struct ParseError(pub String);

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<pest::error::Error<Rule>> for ParseError {
    fn from(e: pest::error::Error<Rule>) -> Self {
        ParseError(e.to_string())
    }
}

pub fn parse(input: &str) -> Result<Expr, ParseError> {
    let mut program = ExprParser::parse(Rule::program, input)?;
    let or_expr = program
        .next()
        .and_then(|p| p.into_inner().next())
        .ok_or_else(|| ParseError("empty expression".to_string()))?;
    build_or(or_expr)
}

fn build_or(pair: Pair<Rule>) -> Result<Expr, ParseError> {
    let mut inner = pair.into_inner();
    let mut lhs = build_and(inner.next().ok_or_else(|| ParseError("empty OR expression".to_string()))?)?;
    for rhs_pair in inner {
        let rhs = build_and(rhs_pair)?;
        lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
    }
    Ok(lhs)
}

fn build_and(pair: Pair<Rule>) -> Result<Expr, ParseError> {
    let mut inner = pair.into_inner();
    let mut lhs = build_not(inner.next().ok_or_else(|| ParseError("empty AND expression".to_string()))?)?;
    for rhs_pair in inner {
        let rhs = build_not(rhs_pair)?;
        lhs = Expr::And(Box::new(lhs), Box::new(rhs));
    }
    Ok(lhs)
}

fn build_not(pair: Pair<Rule>) -> Result<Expr, ParseError> {
    let inner = pair
        .into_inner()
        .next()
        .ok_or_else(|| ParseError("empty NOT expression".to_string()))?;
    match inner.as_rule() {
        Rule::not_expr => Ok(Expr::Not(Box::new(build_not(inner)?))),
        Rule::atom => build_atom(inner),
        other => Err(ParseError(format!("unexpected rule under not_expr: {other:?}"))),
    }
}

fn build_atom(pair: Pair<Rule>) -> Result<Expr, ParseError> {
    let inner = pair
        .into_inner()
        .next()
        .ok_or_else(|| ParseError("empty atom".to_string()))?;
    match inner.as_rule() {
        Rule::paren_expr => {
            let or_expr = inner
                .into_inner()
                .next()
                .ok_or_else(|| ParseError("empty parenthesized expression".to_string()))?;
            build_or(or_expr)
        }
        Rule::predicate => build_predicate(inner),
        other => Err(ParseError(format!("unexpected rule under atom: {other:?}"))),
    }
}

fn build_predicate(pair: Pair<Rule>) -> Result<Expr, ParseError> {
    let mut inner = pair.into_inner();
    let field = inner
        .next()
        .ok_or_else(|| ParseError("predicate has no field".to_string()))?
        .as_str()
        .to_string();

    if let Some(expanded) = expand_macro(&field) {
        return Ok(expanded);
    }

    validate_field(&field)?;

    let tail = inner
        .next()
        .ok_or_else(|| ParseError(format!("expected an operator after field {field:?}")))?;
    build_predicate_tail(field, tail)
}

fn build_predicate_tail(field: String, pair: Pair<Rule>) -> Result<Expr, ParseError> {
    match pair.as_rule() {
        Rule::cmp_tail => {
            let mut inner = pair.into_inner();
            let op = parse_cmp_op(inner.next().expect("cmp_tail has a cmp_op"))?;
            let literal = build_literal(inner.next().expect("cmp_tail has a literal"))?;
            Ok(Expr::Compare { field, op, literal })
        }
        Rule::in_tail => {
            let list_pair = pair.into_inner().next().expect("in_tail has a list_literal");
            Ok(Expr::In {
                field,
                list: build_list(list_pair)?,
                negated: false,
            })
        }
        Rule::not_in_tail => {
            let list_pair = pair.into_inner().next().expect("not_in_tail has a list_literal");
            Ok(Expr::In {
                field,
                list: build_list(list_pair)?,
                negated: true,
            })
        }
        Rule::exists_tail => Ok(Expr::Exists { field, negated: false }),
        Rule::not_exists_tail => Ok(Expr::Exists { field, negated: true }),
        Rule::contains_tail => {
            let needle = build_string(pair.into_inner().next().expect("contains_tail has a string"))?;
            Ok(Expr::Contains { field, needle })
        }
        Rule::starts_with_tail => {
            let prefix = build_string(pair.into_inner().next().expect("starts_with_tail has a string"))?;
            Ok(Expr::StartsWith { field, prefix })
        }
        Rule::ends_with_tail => {
            let suffix = build_string(pair.into_inner().next().expect("ends_with_tail has a string"))?;
            Ok(Expr::EndsWith { field, suffix })
        }
        other => Err(ParseError(format!("unexpected predicate tail rule: {other:?}"))),
    }
}

fn parse_cmp_op(pair: Pair<Rule>) -> Result<CmpOp, ParseError> {
    match pair.as_str() {
        "=" => Ok(CmpOp::Eq),
        "!=" => Ok(CmpOp::Ne),
        "<" => Ok(CmpOp::Lt),
        "<=" => Ok(CmpOp::Le),
        ">" => Ok(CmpOp::Gt),
        ">=" => Ok(CmpOp::Ge),
        other => Err(ParseError(format!("unknown comparison operator {other:?}"))),
    }
}

fn build_literal(pair: Pair<Rule>) -> Result<Literal, ParseError> {
    match pair.as_rule() {
        Rule::string => Ok(Literal::String(build_string(pair)?)),
        Rule::number => pair
            .as_str()
            .parse::<f64>()
            .map(Literal::Number)
            .map_err(|e| ParseError(format!("invalid number literal: {e}"))),
        Rule::list_literal => Ok(Literal::List(build_list(pair)?)),
        other => Err(ParseError(format!("unexpected literal rule: {other:?}"))),
    }
}

fn build_list(pair: Pair<Rule>) -> Result<Vec<Literal>, ParseError> {
    pair.into_inner().map(build_literal).collect()
}

fn build_string(pair: Pair<Rule>) -> Result<String, ParseError> {
    let inner = pair
        .into_inner()
        .next()
        .ok_or_else(|| ParseError("empty string literal".to_string()))?;
    Ok(inner.as_str().replace("\\\"", "\""))
}

/// Validates that `field` starts with a recognized root segment. An
/// expression referencing a field the evaluator could never resolve is a
/// parse-time error (spec §8's boundary behavior), not a silent `false`.
fn validate_field(field: &str) -> Result<(), ParseError> {
    let rest = field
        .strip_prefix("spec.")
        .ok_or_else(|| ParseError(format!("field {field:?} must start with \"spec.\"")))?;
    let root = rest.split('.').next().unwrap_or("");
    const KNOWN_ROOTS: &[&str] = &[
        "severity",
        "priority",
        "eventType",
        "category",
        "source",
        "resource",
        "details",
    ];
    if KNOWN_ROOTS.contains(&root) {
        Ok(())
    } else {
        Err(ParseError(format!("unknown identifier root {root:?} in {field:?}")))
    }
}

/// Expands the four parse-time macros into their equivalent comparison.
fn expand_macro(name: &str) -> Option<Expr> {
    match name {
        "is_critical" => Some(Expr::Compare {
            field: "spec.severity".to_string(),
            op: CmpOp::Eq,
            literal: Literal::String("CRITICAL".to_string()),
        }),
        "is_high" => Some(Expr::Compare {
            field: "spec.severity".to_string(),
            op: CmpOp::Ge,
            literal: Literal::String("HIGH".to_string()),
        }),
        "is_security" => Some(Expr::Compare {
            field: "spec.category".to_string(),
            op: CmpOp::Eq,
            literal: Literal::String("security".to_string()),
        }),
        "is_compliance" => Some(Expr::Compare {
            field: "spec.category".to_string(),
            op: CmpOp::Eq,
            literal: Literal::String("compliance".to_string()),
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_or_not_precedence() {
        // NOT binds tighter than AND, which binds tighter than OR.
        let expr = parse(r#"is_security OR NOT is_high AND spec.eventType = "x""#).unwrap();
        match expr {
            Expr::Or(lhs, rhs) => {
                assert!(matches!(*lhs, Expr::Compare { .. }));
                assert!(matches!(*rhs, Expr::And(_, _)));
            }
            other => panic!("expected Or at top level, got {other:?}"),
        }
    }

    #[test]
    fn parses_parenthesized_expression() {
        let expr = parse(r#"(spec.severity = "HIGH" OR spec.severity = "CRITICAL") AND spec.details.cve_id EXISTS"#).unwrap();
        assert!(matches!(expr, Expr::And(_, _)));
    }

    #[test]
    fn rejects_unknown_trailing_tokens() {
        assert!(parse(r#"spec.severity = "HIGH" )"#).is_err());
    }

    #[test]
    fn rejects_unknown_identifier_without_operator() {
        assert!(parse("spec.severity").is_err());
    }

    #[test]
    fn parses_list_literal() {
        let expr = parse(r#"spec.severity IN ["HIGH", "CRITICAL"]"#).unwrap();
        match expr {
            Expr::In { list, negated, .. } => {
                assert!(!negated);
                assert_eq!(list.len(), 2);
            }
            other => panic!("expected In, got {other:?}"),
        }
    }

    #[test]
    fn parses_not_in() {
        let expr = parse(r#"spec.severity NOT IN ["LOW"]"#).unwrap();
        assert!(matches!(expr, Expr::In { negated: true, .. }));
    }

    #[test]
    fn parses_escaped_string_literal() {
        let expr = parse(r#"spec.details.msg CONTAINS "say \"hi\"""#).unwrap();
        match expr {
            Expr::Contains { needle, .. } => assert_eq!(needle, r#"say "hi""#),
            other => panic!("expected Contains, got {other:?}"),
        }
    }
}
