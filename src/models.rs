//! Core data models used throughout the classification pipeline.
//!
//! These types represent the tests handed over by the upstream parser, the
//! taxonomy produced by the AI provider, and the bookkeeping (token usage)
//! that flows alongside it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Domain name used internally for tests the provider left unassigned.
pub const UNCATEGORIZED_DOMAIN: &str = "Uncategorized";
/// Feature name paired with [`UNCATEGORIZED_DOMAIN`].
pub const UNCATEGORIZED_FEATURE: &str = "Uncategorized Tests";
/// Catch-all name some providers emit on their own.
pub const GENERAL_BUCKET: &str = "General";

/// A single test case discovered by the upstream parser.
///
/// `index` is unique within one classification run and is the only handle
/// the provider uses to reference a test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
    pub index: usize,
    pub name: String,
    #[serde(default)]
    pub suite_path: String,
    #[serde(default)]
    pub file_path: String,
}

/// All tests of one source file. Never split across chunks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileGroup {
    pub path: String,
    pub tests: Vec<TestCase>,
}

/// A leaf grouping of tests within a domain (e.g. "Login").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureGroup {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub test_indices: Vec<usize>,
}

/// A top-level business classification (e.g. "Authentication").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainGroup {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub features: Vec<FeatureGroup>,
}

/// The full domain → feature → test-index structure of one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Taxonomy {
    #[serde(default)]
    pub domains: Vec<DomainGroup>,
}

impl Taxonomy {
    pub fn new(domains: Vec<DomainGroup>) -> Self {
        Self { domains }
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }

    /// Every test index referenced by any feature, duplicates included.
    pub fn indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.domains
            .iter()
            .flat_map(|d| d.features.iter())
            .flat_map(|f| f.test_indices.iter().copied())
    }

    /// Distinct set of referenced test indices.
    pub fn index_set(&self) -> BTreeSet<usize> {
        self.indices().collect()
    }

    /// Number of index references (counts duplicates).
    pub fn test_count(&self) -> usize {
        self.indices().count()
    }

    pub fn domain(&self, name: &str) -> Option<&DomainGroup> {
        self.domains.iter().find(|d| d.name == name)
    }
}

/// Token accounting reported by the provider, summed across chunks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub candidates_tokens: u64,
    pub total_tokens: u64,
    #[serde(default)]
    pub model: String,
}

impl TokenUsage {
    /// Add `other` into `self`. The model name sticks to the first one seen.
    pub fn add(&mut self, other: &TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.candidates_tokens += other.candidates_tokens;
        self.total_tokens += other.total_tokens;
        if self.model.is_empty() {
            self.model = other.model.clone();
        }
    }
}

/// Flat test → domain/feature assignment used by the post-processor.
#[derive(Debug, Clone, PartialEq)]
pub struct TestAssignment {
    pub index: usize,
    pub domain: String,
    pub feature: String,
    pub domain_description: String,
    pub feature_description: String,
    pub domain_confidence: f64,
    pub feature_confidence: f64,
    pub file_path: String,
    pub suite_path: String,
    pub test_name: String,
}

impl TestAssignment {
    /// True when the assignment still points at a catch-all bucket.
    pub fn is_catch_all(&self) -> bool {
        is_sentinel_pair(&self.domain, &self.feature)
    }
}

/// Whether a domain/feature pair is one of the internal catch-all buckets.
///
/// A blank or sentinel domain is always a catch-all. Under a real domain only
/// the "Uncategorized" feature names count; "General" is a legitimate feature.
pub fn is_sentinel_pair(domain: &str, feature: &str) -> bool {
    let feature = feature.trim();
    is_sentinel_domain(domain)
        || feature.is_empty()
        || feature.eq_ignore_ascii_case(UNCATEGORIZED_FEATURE)
        || feature.eq_ignore_ascii_case(UNCATEGORIZED_DOMAIN)
}

/// Whether a domain name alone is a catch-all bucket.
pub fn is_sentinel_domain(domain: &str) -> bool {
    let domain = domain.trim();
    domain.is_empty()
        || domain.eq_ignore_ascii_case(UNCATEGORIZED_DOMAIN)
        || domain.eq_ignore_ascii_case(GENERAL_BUCKET)
}

/// Flatten file groups into a list of tests in file-then-test order.
///
/// Tests without their own `file_path` inherit the group path.
pub fn all_tests(files: &[FileGroup]) -> Vec<TestCase> {
    files
        .iter()
        .flat_map(|f| {
            f.tests.iter().map(move |t| {
                let mut test = t.clone();
                if test.file_path.is_empty() {
                    test.file_path = f.path.clone();
                }
                test
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_add_is_additive() {
        let mut total = TokenUsage::default();
        total.add(&TokenUsage {
            prompt_tokens: 10,
            candidates_tokens: 5,
            total_tokens: 15,
            model: "m".into(),
        });
        total.add(&TokenUsage {
            prompt_tokens: 1,
            candidates_tokens: 2,
            total_tokens: 3,
            model: "other".into(),
        });
        assert_eq!(total.prompt_tokens, 11);
        assert_eq!(total.candidates_tokens, 7);
        assert_eq!(total.total_tokens, 18);
        assert_eq!(total.model, "m");
    }

    #[test]
    fn sentinel_detection() {
        assert!(is_sentinel_pair("Uncategorized", "Uncategorized Tests"));
        assert!(is_sentinel_pair("general", "General"));
        assert!(is_sentinel_pair("", "Login"));
        assert!(is_sentinel_pair("Billing", "uncategorized tests"));
        assert!(!is_sentinel_pair("Authentication", "General"));
        assert!(!is_sentinel_pair("Billing", "Invoices"));
    }

    #[test]
    fn taxonomy_deserializes_camel_case() {
        let json = r#"{"domains":[{"name":"Auth","confidence":0.9,
            "features":[{"name":"Login","testIndices":[0,2]}]}]}"#;
        let t: Taxonomy = serde_json::from_str(json).unwrap();
        assert_eq!(t.domains[0].features[0].test_indices, vec![0, 2]);
        assert_eq!(t.index_set().len(), 2);
    }
}
