//! Kubernetes custom resource types and the shared client bootstrap (C12).

pub mod client;
pub mod ingester;
pub mod observation;

pub use client::ClientSet;
pub use ingester::{Ingester, IngesterSpec, IngesterStatus};
pub use observation::{Observation, ObservationSpec, ObservationStatus};

/// Heuristic plural-resource → kind singularization shared by every call
/// site that builds a `kube::core::ApiResource` for a user-declared GVR
/// (the Ingester and destination schemas never carry an explicit `kind`,
/// only `group`/`version`/`resource`).
///
/// `observations` → `Observation`, `vulnerabilityreports` →
/// `Vulnerabilityreports` with no inner capitalization restored — good
/// enough for the one destination the core ships a schema for and for any
/// CRD whose plural is a plain `s`-suffixed form of its kind.
pub fn gvr_to_kind(resource: &str) -> String {
    let singular = if let Some(stem) = resource.strip_suffix("ies") {
        format!("{stem}y")
    } else if let Some(stem) = resource.strip_suffix('s') {
        stem.to_string()
    } else {
        resource.to_string()
    };
    let mut chars = singular.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => singular,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn singularizes_common_plurals() {
        assert_eq!(gvr_to_kind("observations"), "Observation");
        assert_eq!(gvr_to_kind("policies"), "Policy");
        assert_eq!(gvr_to_kind("ingesters"), "Ingester");
    }
}
