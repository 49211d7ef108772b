//! Final quality gate applied to a merged, validated taxonomy.
//!
//! Works on the flat test → domain/feature assignment list:
//!
//! 1. **Domain normalization**: names that fold to the same key (case,
//!    whitespace, separators, known abbreviations) are rewritten to the
//!    longest member of their class, ties broken alphabetically.
//! 2. **Uncategorized elimination**: any assignment still in a catch-all
//!    bucket gets a domain and feature derived from its file path.
//!
//! The rebuilt taxonomy never exposes a catch-all bucket and covers every
//! input test exactly once.

use std::collections::{BTreeMap, HashMap};

use crate::models::{
    is_sentinel_domain, is_sentinel_pair, DomainGroup, FeatureGroup, Taxonomy, TestAssignment, TestCase,
    UNCATEGORIZED_DOMAIN, UNCATEGORIZED_FEATURE,
};

/// Confidence recorded for path-derived assignments.
const HEURISTIC_CONFIDENCE: f64 = 0.3;

const FALLBACK_DOMAIN: &str = "Core";
const FALLBACK_FEATURE: &str = "Miscellaneous";

/// Abbreviations folded into their long form when grouping domain names.
const ABBREVIATIONS: &[(&str, &str)] = &[
    ("auth", "authentication"),
    ("authn", "authentication"),
    ("authz", "authorization"),
    ("cfg", "configuration"),
    ("config", "configuration"),
    ("conf", "configuration"),
    ("db", "database"),
    ("admin", "administration"),
    ("perf", "performance"),
    ("ui", "user interface"),
    ("util", "utilities"),
    ("utils", "utilities"),
    ("msg", "messaging"),
    ("notif", "notifications"),
    ("nav", "navigation"),
    ("i18n", "internationalization"),
    ("l10n", "localization"),
    ("mgmt", "management"),
    ("sync", "synchronization"),
];

/// Directory names that say nothing about the business area.
const GENERIC_SEGMENTS: &[&str] = &[
    "", ".", "..", "test", "tests", "testing", "spec", "specs", "src", "lib", "libs",
    "__tests__", "__test__", "e2e", "unit", "integration", "it", "app", "apps", "main", "java",
    "kotlin", "scala", "go", "python", "js", "ts", "pkg", "internal", "cmd", "com", "org", "net",
    "io", "source", "sources", "fixtures", "helpers", "support", "common", "shared", "core",
    "general", "misc", "uncategorized",
];

/// Flatten a taxonomy into one assignment per test.
///
/// Tests the taxonomy does not mention are added under the catch-all pair so
/// the elimination pass picks them up.
pub fn flatten(taxonomy: &Taxonomy, tests: &[TestCase]) -> Vec<TestAssignment> {
    let by_index: HashMap<usize, &TestCase> = tests.iter().map(|t| (t.index, t)).collect();
    let mut assigned = std::collections::HashSet::new();
    let mut out = Vec::with_capacity(tests.len());

    for domain in &taxonomy.domains {
        for feature in &domain.features {
            for index in &feature.test_indices {
                let Some(test) = by_index.get(index) else {
                    continue;
                };
                if !assigned.insert(*index) {
                    continue;
                }
                out.push(TestAssignment {
                    index: *index,
                    domain: domain.name.clone(),
                    feature: feature.name.clone(),
                    domain_description: domain.description.clone(),
                    feature_description: feature.description.clone(),
                    domain_confidence: domain.confidence,
                    feature_confidence: feature.confidence,
                    file_path: test.file_path.clone(),
                    suite_path: test.suite_path.clone(),
                    test_name: test.name.clone(),
                });
            }
        }
    }

    for test in tests {
        if assigned.insert(test.index) {
            out.push(TestAssignment {
                index: test.index,
                domain: UNCATEGORIZED_DOMAIN.to_string(),
                feature: UNCATEGORIZED_FEATURE.to_string(),
                domain_description: String::new(),
                feature_description: String::new(),
                domain_confidence: 0.0,
                feature_confidence: 0.0,
                file_path: test.file_path.clone(),
                suite_path: test.suite_path.clone(),
                test_name: test.name.clone(),
            });
        }
    }
    out
}

/// Grouping key of a domain name: lowercase words with abbreviations expanded.
pub fn fold_key(name: &str) -> String {
    let lowered = name.to_lowercase();
    lowered
        .split(|c: char| c.is_whitespace() || c == '_' || c == '-')
        .filter(|w| !w.is_empty())
        .map(|w| {
            ABBREVIATIONS
                .iter()
                .find(|(short, _)| *short == w)
                .map(|(_, long)| *long)
                .unwrap_or(w)
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Rewrite every domain to the canonical member of its equivalence class.
///
/// Returns the number of assignments whose domain changed.
pub fn normalize_domains(assignments: &mut [TestAssignment]) -> usize {
    let mut classes: BTreeMap<String, String> = BTreeMap::new();
    for a in assignments.iter() {
        let name = a.domain.trim();
        if name.is_empty() {
            continue;
        }
        let key = fold_key(name);
        classes
            .entry(key)
            .and_modify(|canonical| {
                if prefers(name, canonical) {
                    *canonical = name.to_string();
                }
            })
            .or_insert_with(|| name.to_string());
    }

    let mut changed = 0;
    for a in assignments.iter_mut() {
        let key = fold_key(a.domain.trim());
        if let Some(canonical) = classes.get(&key) {
            if a.domain != *canonical {
                a.domain = canonical.clone();
                changed += 1;
            }
        }
    }
    if changed > 0 {
        tracing::info!(changed, classes = classes.len(), "normalized domain names");
    }
    changed
}

/// Longest wins; equal length falls back to alphabetical order.
fn prefers(candidate: &str, current: &str) -> bool {
    let (lc, lo) = (candidate.chars().count(), current.chars().count());
    lc > lo || (lc == lo && candidate < current)
}

/// Replace catch-all assignments with path-derived domain/feature names.
///
/// A real domain paired with a catch-all feature keeps its domain; only the
/// feature is derived. Returns the number of assignments rewritten.
pub fn eliminate_uncategorized(assignments: &mut [TestAssignment]) -> usize {
    let mut rewritten = 0;
    for a in assignments.iter_mut().filter(|a| a.is_catch_all()) {
        let (domain, feature) = derive_from_path(&a.file_path, &a.suite_path);
        if is_sentinel_domain(&a.domain) {
            a.domain = domain;
            a.domain_description = String::new();
            a.domain_confidence = HEURISTIC_CONFIDENCE;
        }
        a.feature = feature;
        a.feature_description = String::new();
        a.feature_confidence = HEURISTIC_CONFIDENCE;
        rewritten += 1;
    }
    if rewritten > 0 {
        tracing::info!(rewritten, "assigned path-derived domains to unclassified tests");
    }
    rewritten
}

/// Heuristic domain/feature from a test's file path and suite path.
///
/// Domain comes from the first meaningful directory, feature from the file
/// stem with test markers removed. Never returns a catch-all pair.
pub fn derive_from_path(file_path: &str, suite_path: &str) -> (String, String) {
    let segments: Vec<&str> = file_path
        .split(['/', '\\'])
        .filter(|s| !s.is_empty())
        .collect();

    let (dirs, file) = match segments.split_last() {
        Some((file, dirs)) => (dirs.to_vec(), Some(*file)),
        None => (Vec::new(), None),
    };

    let meaningful_dirs: Vec<String> = dirs
        .iter()
        .filter(|d| !is_generic(d))
        .map(|d| title_case(d))
        .filter(|d| !d.is_empty())
        .collect();

    let stem = file.map(file_stem).map(|s| title_case(&s)).filter(|s| {
        !s.is_empty() && !is_generic(&s.to_lowercase())
    });

    let suite = suite_path
        .split(['>', '/', ':'])
        .map(str::trim)
        .find(|s| !s.is_empty() && !is_generic(&s.to_lowercase()))
        .map(title_case)
        .filter(|s| !s.is_empty());

    let domain = meaningful_dirs
        .first()
        .cloned()
        .or_else(|| stem.clone())
        .or_else(|| suite.clone())
        .unwrap_or_else(|| FALLBACK_DOMAIN.to_string());

    let feature = [stem, meaningful_dirs.get(1).cloned(), suite]
        .into_iter()
        .flatten()
        .find(|f| *f != domain)
        .unwrap_or_else(|| FALLBACK_FEATURE.to_string());

    if is_sentinel_pair(&domain, &feature) {
        return (FALLBACK_DOMAIN.to_string(), FALLBACK_FEATURE.to_string());
    }
    (domain, feature)
}

fn is_generic(segment: &str) -> bool {
    let lower = segment.to_lowercase();
    GENERIC_SEGMENTS.contains(&lower.as_str())
}

/// File name without extensions and test markers (`login_test.go` → `login`).
fn file_stem(file: &str) -> String {
    let base = file.split('.').next().unwrap_or(file);
    let mut stem = base.to_string();

    for suffix in ["_test", "_tests", "_spec", "-test", "-spec", "Tests", "Test", "Spec", "IT"] {
        if stem.len() > suffix.len() && stem.ends_with(suffix) {
            stem.truncate(stem.len() - suffix.len());
            break;
        }
    }
    for prefix in ["test_", "test-", "Test"] {
        if stem.len() > prefix.len() && stem.starts_with(prefix) {
            let rest = &stem[prefix.len()..];
            // "Testimonials" is a word, "TestLogin" is a marker
            if prefix != "Test" || rest.starts_with(|c: char| c.is_uppercase()) {
                stem = rest.to_string();
            }
            break;
        }
    }
    stem
}

/// Split on separators and camelCase boundaries, then capitalise each word.
fn title_case(raw: &str) -> String {
    let mut words: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;

    for c in raw.chars() {
        if c == '_' || c == '-' || c == ' ' || c == '.' {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            prev_lower = false;
            continue;
        }
        if c.is_uppercase() && prev_lower && !current.is_empty() {
            words.push(std::mem::take(&mut current));
        }
        prev_lower = c.is_lowercase() || c.is_ascii_digit();
        current.push(c);
    }
    if !current.is_empty() {
        words.push(current);
    }

    words
        .iter()
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Rebuild a taxonomy from assignments.
///
/// Domains and features keep first-seen order; indices are sorted. Domain
/// confidence is the mean over its assignments.
pub fn assemble(assignments: &[TestAssignment]) -> Taxonomy {
    struct DomainBuild {
        group: DomainGroup,
        confidence_sum: f64,
        count: usize,
        features: HashMap<String, usize>,
    }

    let mut domains: Vec<DomainBuild> = Vec::new();
    let mut by_name: HashMap<String, usize> = HashMap::new();

    for a in assignments {
        let slot = *by_name.entry(a.domain.clone()).or_insert_with(|| {
            domains.push(DomainBuild {
                group: DomainGroup {
                    name: a.domain.clone(),
                    description: String::new(),
                    confidence: 0.0,
                    features: Vec::new(),
                },
                confidence_sum: 0.0,
                count: 0,
                features: HashMap::new(),
            });
            domains.len() - 1
        });
        let build = &mut domains[slot];
        build.confidence_sum += a.domain_confidence;
        build.count += 1;
        if build.group.description.is_empty() {
            build.group.description = a.domain_description.clone();
        }

        let feature_slot = match build.features.get(&a.feature) {
            Some(&i) => i,
            None => {
                build.group.features.push(FeatureGroup {
                    name: a.feature.clone(),
                    description: a.feature_description.clone(),
                    confidence: a.feature_confidence,
                    test_indices: Vec::new(),
                });
                let i = build.group.features.len() - 1;
                build.features.insert(a.feature.clone(), i);
                i
            }
        };
        let feature = &mut build.group.features[feature_slot];
        if feature.description.is_empty() {
            feature.description = a.feature_description.clone();
        }
        feature.test_indices.push(a.index);
    }

    Taxonomy::new(
        domains
            .into_iter()
            .map(|mut b| {
                b.group.confidence = b.confidence_sum / b.count.max(1) as f64;
                for f in &mut b.group.features {
                    f.test_indices.sort_unstable();
                }
                b.group
            })
            .collect(),
    )
}

/// Run every post-processing pass and return the publishable taxonomy.
pub fn finalize(taxonomy: &Taxonomy, tests: &[TestCase]) -> Taxonomy {
    let mut assignments = flatten(taxonomy, tests);
    normalize_domains(&mut assignments);
    eliminate_uncategorized(&mut assignments);
    // Path-derived names may be variants of provider names.
    normalize_domains(&mut assignments);
    assemble(&assignments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn test(index: usize, file: &str) -> TestCase {
        TestCase {
            index,
            name: format!("test {}", index),
            suite_path: String::new(),
            file_path: file.into(),
        }
    }

    fn assignment(index: usize, domain: &str, feature: &str, file: &str) -> TestAssignment {
        TestAssignment {
            index,
            domain: domain.into(),
            feature: feature.into(),
            domain_description: String::new(),
            feature_description: String::new(),
            domain_confidence: 0.8,
            feature_confidence: 0.8,
            file_path: file.into(),
            suite_path: String::new(),
            test_name: String::new(),
        }
    }

    #[test]
    fn auth_variants_collapse_to_authentication() {
        let mut list = vec![
            assignment(0, "Auth", "Login", "a"),
            assignment(1, "Authentication", "Logout", "b"),
            assignment(2, "auth", "Reset", "c"),
        ];
        let changed = normalize_domains(&mut list);
        assert_eq!(changed, 2);
        assert!(list.iter().all(|a| a.domain == "Authentication"));
    }

    #[test]
    fn equal_length_tie_breaks_alphabetically() {
        let mut list = vec![
            assignment(0, "user profile", "A", "a"),
            assignment(1, "User Profile", "B", "b"),
            assignment(2, "User_Profile", "C", "c"),
        ];
        normalize_domains(&mut list);
        assert!(list.iter().all(|a| a.domain == "User Profile"));
    }

    #[test]
    fn unrelated_domains_untouched() {
        let mut list = vec![
            assignment(0, "Billing", "A", "a"),
            assignment(1, "Shipping", "B", "b"),
        ];
        assert_eq!(normalize_domains(&mut list), 0);
    }

    #[test]
    fn derives_names_from_path() {
        assert_eq!(
            derive_from_path("src/test/java/com/shop/checkout/PaymentServiceTest.java", ""),
            ("Shop".to_string(), "Payment Service".to_string())
        );
        assert_eq!(
            derive_from_path("tests/user_profile/test_avatar_upload.py", ""),
            ("User Profile".to_string(), "Avatar Upload".to_string())
        );
        assert_eq!(
            derive_from_path("cart.spec.ts", ""),
            ("Cart".to_string(), FALLBACK_FEATURE.to_string())
        );
    }

    #[test]
    fn derivation_never_yields_sentinel() {
        for path in ["", "tests/test.go", "general/uncategorized_test.py", "src/lib/"] {
            let (d, f) = derive_from_path(path, "");
            assert!(!is_sentinel_pair(&d, &f), "{path} -> {d}/{f}");
        }
    }

    #[test]
    fn real_domain_survives_catch_all_feature() {
        let mut list = vec![
            assignment(0, "Billing", UNCATEGORIZED_FEATURE, "src/payments/refund_test.go"),
            assignment(1, UNCATEGORIZED_DOMAIN, UNCATEGORIZED_FEATURE, "src/payments/refund_test.go"),
        ];
        assert_eq!(eliminate_uncategorized(&mut list), 2);

        assert_eq!(list[0].domain, "Billing");
        assert_eq!(list[0].domain_confidence, 0.8);
        assert_eq!(list[0].feature, "Refund");
        assert_eq!(list[0].feature_confidence, HEURISTIC_CONFIDENCE);

        assert_eq!(list[1].domain, "Payments");
        assert_eq!(list[1].feature, "Refund");
    }

    #[test]
    fn suite_path_used_when_path_is_generic() {
        let (d, f) = derive_from_path("tests/test_main.py", "Orders > create");
        assert_eq!(d, "Orders");
        assert_eq!(f, FALLBACK_FEATURE);
    }

    #[test]
    fn finalize_has_no_catch_all_and_full_coverage() {
        let tests = vec![
            test(0, "tests/auth/login_test.go"),
            test(1, "tests/auth/login_test.go"),
            test(2, "tests/billing/invoice_test.go"),
            test(3, "tests/billing/refund_test.go"),
        ];
        let taxonomy = Taxonomy::new(vec![
            DomainGroup {
                name: "auth".into(),
                description: "Identity".into(),
                confidence: 0.9,
                features: vec![FeatureGroup {
                    name: "Login".into(),
                    description: String::new(),
                    confidence: 0.9,
                    test_indices: vec![1, 0],
                }],
            },
            DomainGroup {
                name: UNCATEGORIZED_DOMAIN.into(),
                description: String::new(),
                confidence: 0.0,
                features: vec![FeatureGroup {
                    name: UNCATEGORIZED_FEATURE.into(),
                    description: String::new(),
                    confidence: 0.0,
                    test_indices: vec![2],
                }],
            },
        ]);
        // index 3 is absent from the taxonomy altogether
        let out = finalize(&taxonomy, &tests);

        for d in &out.domains {
            for f in &d.features {
                assert!(!is_sentinel_pair(&d.name, &f.name));
            }
        }
        let mut all: Vec<usize> = out.indices().collect();
        all.sort_unstable();
        assert_eq!(all, vec![0, 1, 2, 3]);

        let billing = out.domain("Billing").unwrap();
        let features: Vec<&str> = billing.features.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(features, vec!["Invoice", "Refund"]);
        assert_eq!(out.domain("auth").unwrap().features[0].test_indices, vec![0, 1]);
    }

    #[test]
    fn path_derived_domain_joins_provider_class() {
        let tests = vec![test(0, "a/x_test.go"), test(1, "auth/session_test.go")];
        let taxonomy = Taxonomy::new(vec![DomainGroup {
            name: "Authentication".into(),
            description: String::new(),
            confidence: 0.9,
            features: vec![FeatureGroup {
                name: "Login".into(),
                description: String::new(),
                confidence: 0.9,
                test_indices: vec![0],
            }],
        }]);
        let out = finalize(&taxonomy, &tests);
        assert_eq!(out.domains.len(), 1);
        assert_eq!(out.domains[0].name, "Authentication");
        assert_eq!(out.domains[0].features[1].name, "Session");
    }

    #[test]
    fn title_case_splits_words() {
        assert_eq!(title_case("userProfile"), "User Profile");
        assert_eq!(title_case("order-history_v2"), "Order History V2");
        assert_eq!(file_stem("TestLoginFlow"), "LoginFlow");
        assert_eq!(file_stem("Testimonials"), "Testimonials");
    }
}
