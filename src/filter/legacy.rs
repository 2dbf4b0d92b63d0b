//! Legacy list-predicate filter mode (spec §4.2): all specified predicates
//! must pass.

use crate::k8s::ingester::FilterConfig;
use crate::normalize::ResolvedFields;

/// Evaluates the legacy list predicates against a resolved event. Returns
/// `(pass, reason)` the same shape as the expression evaluator, so callers
/// don't need to branch on which mode produced the verdict.
pub fn evaluate(config: &FilterConfig, resolved: &ResolvedFields) -> (bool, String) {
    if let Some(min_priority) = config.min_priority {
        match resolved.priority {
            Some(priority) if priority >= min_priority => {}
            Some(priority) => {
                return (
                    false,
                    format!("priority {priority} below minPriority {min_priority}"),
                )
            }
            None => return (false, "priority unavailable for minPriority check".to_string()),
        }
    }

    if let Some(min_severity) = config.min_severity {
        match resolved.severity {
            Some(severity) if severity >= min_severity => {}
            Some(severity) => {
                return (
                    false,
                    format!("severity {severity:?} below minSeverity {min_severity:?}"),
                )
            }
            None => return (false, "severity unavailable for minSeverity check".to_string()),
        }
    }

    if !config.include_namespaces.is_empty() {
        let ns = resolved.namespace.as_deref();
        if !ns.is_some_and(|ns| config.include_namespaces.iter().any(|n| n == ns)) {
            return (false, "namespace not in includeNamespaces".to_string());
        }
    }

    if !config.exclude_namespaces.is_empty() {
        let ns = resolved.namespace.as_deref();
        if ns.is_some_and(|ns| config.exclude_namespaces.iter().any(|n| n == ns)) {
            return (false, "namespace in excludeNamespaces".to_string());
        }
    }

    if !config.include_types.is_empty() && !config.include_types.contains(&resolved.event_type) {
        return (false, "eventType not in includeTypes".to_string());
    }

    if config.exclude_types.contains(&resolved.event_type) {
        return (false, "eventType in excludeTypes".to_string());
    }

    (true, "admitted by legacy filter".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::k8s::observation::Severity;

    #[test]
    fn min_severity_rejects_lower() {
        let config = FilterConfig {
            min_severity: Some(Severity::High),
            ..Default::default()
        };
        let mut resolved = ResolvedFields::default();
        resolved.severity = Some(Severity::Medium);
        let (pass, _) = evaluate(&config, &resolved);
        assert!(!pass);
    }

    #[test]
    fn namespace_allowlist() {
        let config = FilterConfig {
            include_namespaces: vec!["prod".to_string()],
            ..Default::default()
        };
        let mut resolved = ResolvedFields::default();
        resolved.namespace = Some("staging".to_string());
        assert!(!evaluate(&config, &resolved).0);
        resolved.namespace = Some("prod".to_string());
        assert!(evaluate(&config, &resolved).0);
    }

    #[test]
    fn empty_config_admits_everything() {
        let config = FilterConfig::default();
        let resolved = ResolvedFields::default();
        assert!(evaluate(&config, &resolved).0);
    }
}
