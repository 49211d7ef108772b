//! Coverage validation and recovery for provider output.
//!
//! The provider is trusted for names, never for structure. [`validate`]
//! guarantees that every expected index appears in exactly one feature of
//! the cleaned output:
//!
//! - indices outside the expected set are dropped,
//! - repeated indices keep their first occurrence only,
//! - expected indices nobody claimed go to `Uncategorized / Uncategorized Tests`.
//!
//! None of these conditions is an error; they are logged as quality signals.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::models::{
    DomainGroup, FeatureGroup, Taxonomy, UNCATEGORIZED_DOMAIN, UNCATEGORIZED_FEATURE,
};

/// What [`validate`] had to fix.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationReport {
    pub expected: usize,
    /// Indices outside the expected set, in encounter order.
    pub invalid: Vec<usize>,
    /// Extra occurrences of an index already assigned.
    pub duplicates: Vec<usize>,
    /// Expected indices that no feature covered, sorted.
    pub missing: Vec<usize>,
}

impl ValidationReport {
    pub fn is_clean(&self) -> bool {
        self.invalid.is_empty() && self.duplicates.is_empty() && self.missing.is_empty()
    }

    pub fn missing_ratio(&self) -> f64 {
        if self.expected == 0 {
            0.0
        } else {
            self.missing.len() as f64 / self.expected as f64
        }
    }

    /// Fold another report in, e.g. when summarising all chunks of a run.
    pub fn absorb(&mut self, other: &ValidationReport) {
        self.expected += other.expected;
        self.invalid.extend_from_slice(&other.invalid);
        self.duplicates.extend_from_slice(&other.duplicates);
        self.missing.extend_from_slice(&other.missing);
    }
}

/// Clean `output` against `expected` and recover missing indices.
///
/// `missing_threshold` is the missing fraction above which the chunk is
/// logged at error level instead of warn.
pub fn validate(
    mut output: Taxonomy,
    expected: &BTreeSet<usize>,
    missing_threshold: f64,
) -> (Taxonomy, ValidationReport) {
    let mut report = ValidationReport {
        expected: expected.len(),
        ..Default::default()
    };
    let mut seen = BTreeSet::new();

    for domain in &mut output.domains {
        for feature in &mut domain.features {
            feature.test_indices.retain(|&index| {
                if !expected.contains(&index) {
                    report.invalid.push(index);
                    false
                } else if !seen.insert(index) {
                    report.duplicates.push(index);
                    false
                } else {
                    true
                }
            });
        }
        domain.features.retain(|f| !f.test_indices.is_empty());
    }
    output.domains.retain(|d| !d.features.is_empty());

    report.missing = expected.difference(&seen).copied().collect();
    if !report.missing.is_empty() {
        attach_uncategorized(&mut output, report.missing.clone());
    }

    log_report(&report, missing_threshold);
    (output, report)
}

fn attach_uncategorized(output: &mut Taxonomy, indices: Vec<usize>) {
    let domain = match output
        .domains
        .iter()
        .position(|d| d.name == UNCATEGORIZED_DOMAIN)
    {
        Some(pos) => &mut output.domains[pos],
        None => {
            output.domains.push(DomainGroup {
                name: UNCATEGORIZED_DOMAIN.to_string(),
                description: "Tests the classifier did not assign".to_string(),
                confidence: 0.0,
                features: Vec::new(),
            });
            let last = output.domains.len() - 1;
            &mut output.domains[last]
        }
    };

    match domain
        .features
        .iter_mut()
        .find(|f| f.name == UNCATEGORIZED_FEATURE)
    {
        Some(feature) => {
            feature.test_indices.extend(indices);
            feature.test_indices.sort_unstable();
        }
        None => domain.features.push(FeatureGroup {
            name: UNCATEGORIZED_FEATURE.to_string(),
            description: String::new(),
            confidence: 0.0,
            test_indices: indices,
        }),
    }
}

fn log_report(report: &ValidationReport, missing_threshold: f64) {
    if !report.invalid.is_empty() {
        tracing::warn!(
            count = report.invalid.len(),
            sample = ?&report.invalid[..report.invalid.len().min(10)],
            "dropped out-of-range test indices"
        );
    }
    if !report.duplicates.is_empty() {
        tracing::warn!(
            count = report.duplicates.len(),
            "dropped duplicate test assignments"
        );
    }
    if report.missing.is_empty() {
        return;
    }
    let ratio = report.missing_ratio();
    if ratio > missing_threshold {
        tracing::error!(
            missing = report.missing.len(),
            expected = report.expected,
            ratio,
            "high share of tests left unclassified"
        );
    } else {
        tracing::warn!(
            missing = report.missing.len(),
            expected = report.expected,
            ratio,
            "recovered unclassified tests"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn feature(name: &str, indices: Vec<usize>) -> FeatureGroup {
        FeatureGroup {
            name: name.into(),
            description: String::new(),
            confidence: 0.8,
            test_indices: indices,
        }
    }

    fn taxonomy(features: Vec<FeatureGroup>) -> Taxonomy {
        Taxonomy::new(vec![DomainGroup {
            name: "Auth".into(),
            description: String::new(),
            confidence: 0.8,
            features,
        }])
    }

    fn expected(n: usize) -> BTreeSet<usize> {
        (0..n).collect()
    }

    #[test]
    fn missing_indices_go_to_uncategorized() {
        let (out, report) = validate(
            taxonomy(vec![feature("Login", vec![0, 1, 3])]),
            &expected(5),
            0.05,
        );
        assert_eq!(report.missing, vec![2, 4]);
        let unc = out.domain(UNCATEGORIZED_DOMAIN).unwrap();
        assert_eq!(unc.features[0].name, UNCATEGORIZED_FEATURE);
        assert_eq!(unc.features[0].test_indices, vec![2, 4]);
        assert_eq!(out.index_set(), expected(5));
    }

    #[test]
    fn out_of_range_index_is_dropped() {
        let (out, report) = validate(
            taxonomy(vec![feature("Login", vec![0, 1, 2, 3, 4, 999])]),
            &expected(5),
            0.05,
        );
        assert_eq!(report.invalid, vec![999]);
        assert!(report.missing.is_empty());
        assert_eq!(out.domains[0].features[0].test_indices, vec![0, 1, 2, 3, 4]);
        assert!(out.domain(UNCATEGORIZED_DOMAIN).is_none());
    }

    #[test]
    fn duplicates_keep_first_occurrence() {
        let (out, report) = validate(
            taxonomy(vec![feature("Login", vec![0, 1]), feature("Logout", vec![1, 2])]),
            &expected(3),
            0.05,
        );
        assert_eq!(report.duplicates, vec![1]);
        assert_eq!(out.domains[0].features[1].test_indices, vec![2]);
        assert_eq!(out.test_count(), 3);
    }

    #[test]
    fn emptied_groups_are_removed() {
        let (out, report) = validate(
            taxonomy(vec![feature("Ghost", vec![42])]),
            &expected(2),
            0.05,
        );
        assert_eq!(out.domains.len(), 1);
        assert_eq!(out.domains[0].name, UNCATEGORIZED_DOMAIN);
        assert_eq!(report.missing_ratio(), 1.0);
    }

    #[test]
    fn merges_into_existing_uncategorized() {
        let input = Taxonomy::new(vec![DomainGroup {
            name: UNCATEGORIZED_DOMAIN.into(),
            description: String::new(),
            confidence: 0.0,
            features: vec![feature(UNCATEGORIZED_FEATURE, vec![3])],
        }]);
        let (out, _) = validate(input, &expected(4), 0.05);
        assert_eq!(out.domains.len(), 1);
        assert_eq!(out.domains[0].features.len(), 1);
        assert_eq!(out.domains[0].features[0].test_indices, vec![0, 1, 2, 3]);
    }

    #[test]
    fn clean_output_untouched() {
        let input = taxonomy(vec![feature("Login", vec![0, 1])]);
        let (out, report) = validate(input.clone(), &expected(2), 0.05);
        assert!(report.is_clean());
        assert_eq!(out, input);
    }
}
