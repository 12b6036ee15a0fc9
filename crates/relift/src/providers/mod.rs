//! Capability provider clients, one module per pipeline stage.
//!
//! Each stage has a closed enum over its providers (preference order is
//! decided by the stage executor's chain, not here); every variant
//! speaks the single `ProviderClient` invocation contract.

pub mod analysis;
pub mod generation;
pub mod planning;
pub mod publishing;
pub mod validation;

pub use analysis::{AnalysisProvider, InferredAnalyzer, StructuredAnalyzer};
pub use generation::{GenerationProvider, MinimalSynthesizer, ScaffoldGenerator};
pub use planning::{BlueprintPlanner, PlanningProvider};
pub use publishing::{HttpPublisher, PublishingProvider};
pub use validation::{ArtifactVerifier, ValidationProvider};

/// Converts an identifier like `konv` or `credit_limit` to PascalCase.
pub(crate) fn pascal_case(name: &str) -> String {
    name.split(|c: char| c == '_' || c == '-' || c.is_whitespace())
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => {
                    first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                }
                None => String::new(),
            }
        })
        .collect()
}

/// Converts free text like "credit limit check" to a snake_case identifier.
pub(crate) fn snake_case(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect::<String>()
        .split('_')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}
