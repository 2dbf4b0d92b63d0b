//! Filter engine (C2, spec §4.2): expression DSL or legacy list predicates.

pub mod expr;
pub mod legacy;

use metrics::counter;
use tracing::warn;

use crate::event::RawEvent;
use crate::k8s::ingester::{FilterConfig, IngesterSpec};
use crate::normalize::{self, ResolvedFields};
use expr::{CompiledExpr, EvalContext};

/// A filter, compiled once at ingester construction time. Expression-mode
/// parse failures are absorbed here: the filter falls back to legacy mode
/// permanently for this ingester rather than failing construction, per
/// spec §4.2 ("A parse error must not crash the pipeline").
#[derive(Clone)]
pub enum CompiledFilter {
    Expression(CompiledExpr, FilterConfig),
    Legacy(FilterConfig),
}

impl CompiledFilter {
    pub fn compile(source_name: &str, config: &FilterConfig) -> Self {
        if let Some(expression) = &config.expression {
            match CompiledExpr::compile(expression) {
                Ok(compiled) => return CompiledFilter::Expression(compiled, config.clone()),
                Err(e) => {
                    counter!(
                        "zen_watcher_ingesters_config_errors_total",
                        "source" => source_name.to_string(),
                        "reason" => "filter_parse_error",
                    )
                    .increment(1);
                    warn!(
                        source = source_name,
                        error = %e,
                        "[CONFIG_ERROR] failed to parse filter expression, falling back to legacy filters"
                    );
                }
            }
        }
        CompiledFilter::Legacy(config.clone())
    }

    /// Evaluates the filter against a raw event. Returns `(admit, reason)`
    /// on success; an evaluation failure (e.g. a mixed string/numeric
    /// comparison) drops the event with a `FILTER_ERROR`, per spec §8's
    /// boundary behavior, without touching the ingester's permanent mode.
    pub fn evaluate(&self, raw: &RawEvent, ingester: &IngesterSpec) -> (bool, String) {
        let resolved = normalize::resolve_fields(raw, &ingester.normalization);
        match self {
            CompiledFilter::Legacy(config) => legacy::evaluate(config, &resolved),
            CompiledFilter::Expression(compiled, fallback_config) => {
                let ctx = build_eval_context(ingester, &resolved, raw);
                match compiled.evaluate(&ctx) {
                    Ok(result) => result,
                    Err(e) => {
                        counter!(
                            "zen_watcher_filter_errors_total",
                            "source" => ingester.source.clone(),
                        )
                        .increment(1);
                        warn!(
                            source = %ingester.source,
                            error = %e.0,
                            "[FILTER_ERROR] expression evaluation failed, dropping event"
                        );
                        // Fall back to legacy evaluation is deliberately not
                        // done per-event: a single bad comparison means the
                        // event is dropped, not that the ingester's mode
                        // changes. `fallback_config` exists only so this
                        // variant and `Legacy` share one `FilterConfig`
                        // shape for reconciliation diffing.
                        let _ = fallback_config;
                        (false, format!("FILTER_ERROR: {}", e.0))
                    }
                }
            }
        }
    }
}

fn build_eval_context<'a>(
    ingester: &'a IngesterSpec,
    resolved: &'a ResolvedFields,
    raw: &'a RawEvent,
) -> EvalContext<'a> {
    EvalContext {
        source: &ingester.source,
        category: category_token(ingester.normalization.domain),
        resolved,
        payload: &raw.payload,
    }
}

fn category_token(category: crate::k8s::observation::Category) -> &'static str {
    use crate::k8s::observation::Category;
    match category {
        Category::Security => "security",
        Category::Compliance => "compliance",
        Category::Performance => "performance",
        Category::Operations => "operations",
        Category::Cost => "cost",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::k8s::ingester::{IngesterKind, NormalizationConfig, ProcessingConfig};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn ingester(filter: FilterConfig) -> IngesterSpec {
        IngesterSpec {
            source: "trivy".into(),
            ingester: IngesterKind::Informer,
            informer: None,
            webhook: None,
            logs: None,
            filters: filter,
            deduplication: Default::default(),
            normalization: NormalizationConfig {
                domain: crate::k8s::observation::Category::Security,
                event_type: "cve_found".into(),
                priority: BTreeMap::new(),
                field_mappings: BTreeMap::new(),
                critical_fields: vec![],
            },
            destinations: vec![],
            processing: ProcessingConfig::default(),
        }
    }

    #[test]
    fn falls_back_to_legacy_on_parse_error() {
        let config = FilterConfig {
            expression: Some("not valid ((".to_string()),
            ..Default::default()
        };
        let compiled = CompiledFilter::compile("trivy", &config);
        assert!(matches!(compiled, CompiledFilter::Legacy(_)));
    }

    #[test]
    fn expression_mode_admits_matching_event() {
        let config = FilterConfig {
            expression: Some(r#"spec.severity >= "HIGH""#.to_string()),
            ..Default::default()
        };
        let compiled = CompiledFilter::compile("trivy", &config);
        let mut raw = RawEvent::new("trivy", json!({}));
        raw.hint.native_severity = Some("HIGH".to_string());
        let spec = ingester(config);
        let (pass, _) = compiled.evaluate(&raw, &spec);
        assert!(pass);
    }
}
