//! Fingerprinting (C1, spec §3.4 / §4.1): a deterministic 128-bit content
//! hash used as the default dedup key.

use std::fmt;

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::k8s::observation::{Category, ResourceRef, Severity};

/// A 16-byte fingerprint, hex-encoded on display. Uses the `hex` crate for
/// encoding rather than generic `{:x?}` formatting, per spec §4.1's "hot
/// path" requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 16]);

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// A separator byte sequence that cannot appear in any component string:
/// components are first individually escaped so a literal occurrence of the
/// separator in, say, a resource name can't forge a collision by shifting
/// field boundaries.
const SEPARATOR: &str = "\u{1}";

/// Computes the fingerprint for a normalized event.
///
/// Joins, in fixed order, `source`, `category`, `severity`, `event_type`,
/// the resource tuple, and a stable-key-ordered serialization of the
/// `critical_fields` subset of `details`, then takes the first 16 bytes of
/// the SHA-256 digest.
pub fn compute(
    source: &str,
    category: Category,
    severity: Severity,
    event_type: &str,
    resource: Option<&ResourceRef>,
    details: Option<&Value>,
    critical_fields: &[String],
) -> Fingerprint {
    let mut hasher = Sha256::new();
    push(&mut hasher, source);
    push(&mut hasher, category_token(category));
    push(&mut hasher, severity_token(severity));
    push(&mut hasher, event_type);
    push(&mut hasher, &resource_token(resource));
    push(&mut hasher, &critical_fields_token(details, critical_fields));

    let digest = hasher.finalize();
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Fingerprint(bytes)
}

fn push(hasher: &mut Sha256, component: &str) {
    hasher.update(component.escape_default().to_string().as_bytes());
    hasher.update(SEPARATOR.as_bytes());
}

fn category_token(category: Category) -> &'static str {
    match category {
        Category::Security => "security",
        Category::Compliance => "compliance",
        Category::Performance => "performance",
        Category::Operations => "operations",
        Category::Cost => "cost",
    }
}

fn severity_token(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical => "critical",
        Severity::High => "high",
        Severity::Medium => "medium",
        Severity::Low => "low",
        Severity::Info => "info",
    }
}

fn resource_token(resource: Option<&ResourceRef>) -> String {
    match resource {
        Some(r) => format!(
            "{}/{}/{}/{}",
            r.api_version,
            r.kind,
            r.namespace.as_deref().unwrap_or(""),
            r.name
        ),
        None => String::new(),
    }
}

/// Stable-key-ordered projection of the critical details fields: sorts the
/// declared field paths lexicographically so the same set of critical
/// fields always serializes identically regardless of declaration order.
fn critical_fields_token(details: Option<&Value>, critical_fields: &[String]) -> String {
    let Some(details) = details else {
        return String::new();
    };
    let mut sorted = critical_fields.to_vec();
    sorted.sort();
    let mut out = String::new();
    for field in sorted {
        let value = crate::path::extract_str(details, &field).unwrap_or_default();
        out.push_str(&field);
        out.push('=');
        out.push_str(&value);
        out.push(';');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_across_calls() {
        let a = compute(
            "trivy",
            Category::Security,
            Severity::High,
            "cve_found",
            None,
            None,
            &[],
        );
        let b = compute(
            "trivy",
            Category::Security,
            Severity::High,
            "cve_found",
            None,
            None,
            &[],
        );
        assert_eq!(a, b);
        assert_eq!(a.to_string().len(), 32);
    }

    #[test]
    fn differs_on_resource() {
        let r1 = ResourceRef {
            api_version: "v1".into(),
            kind: "Pod".into(),
            name: "a".into(),
            namespace: Some("prod".into()),
        };
        let r2 = ResourceRef {
            name: "b".into(),
            ..r1.clone()
        };
        let a = compute(
            "trivy",
            Category::Security,
            Severity::High,
            "cve_found",
            Some(&r1),
            None,
            &[],
        );
        let b = compute(
            "trivy",
            Category::Security,
            Severity::High,
            "cve_found",
            Some(&r2),
            None,
            &[],
        );
        assert_ne!(a, b);
    }

    #[test]
    fn critical_field_order_does_not_matter() {
        let details = serde_json::json!({"a": "1", "b": "2"});
        let fields_ab = vec!["a".to_string(), "b".to_string()];
        let fields_ba = vec!["b".to_string(), "a".to_string()];
        let a = compute(
            "src",
            Category::Security,
            Severity::Low,
            "t",
            None,
            Some(&details),
            &fields_ab,
        );
        let b = compute(
            "src",
            Category::Security,
            Severity::Low,
            "t",
            None,
            Some(&details),
            &fields_ba,
        );
        assert_eq!(a, b);
    }
}
