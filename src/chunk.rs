//! File-boundary test chunker and local index remapping.
//!
//! Splits the discovered test files into [`Chunk`]s bounded by a maximum test
//! count and an estimated prompt token budget. Splitting only happens between
//! files: all tests of a file always land in the same chunk, so a single file
//! larger than the limit produces an oversized chunk of its own.
//!
//! Each chunk is sent to the provider in a dense local index space `0..N-1`;
//! [`reindex`] builds that view plus an [`IndexMap`], and [`restore`] maps a
//! classification back into global indices.

use serde::Serialize;

use crate::config::ChunkingConfig;
use crate::models::{FileGroup, Taxonomy, TestCase};

/// Approximate chars-per-token ratio used for name lengths.
const CHARS_PER_TOKEN: usize = 4;

/// A size-bounded group of whole files sent to the provider in one call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Chunk {
    pub files: Vec<FileGroup>,
}

impl Chunk {
    pub fn test_count(&self) -> usize {
        self.files.iter().map(|f| f.tests.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn tests(&self) -> impl Iterator<Item = &TestCase> {
        self.files.iter().flat_map(|f| f.tests.iter())
    }
}

/// Token cost model for a chunk prompt.
#[derive(Debug, Clone, Copy)]
pub struct TokenBudget {
    pub max_tokens: usize,
    pub base_prompt_tokens: usize,
    pub per_file_tokens: usize,
    pub per_test_tokens: usize,
}

impl From<&ChunkingConfig> for TokenBudget {
    fn from(c: &ChunkingConfig) -> Self {
        Self {
            max_tokens: c.max_tokens,
            base_prompt_tokens: c.base_prompt_tokens,
            per_file_tokens: c.per_file_tokens,
            per_test_tokens: c.per_test_tokens,
        }
    }
}

impl TokenBudget {
    /// Cost of one file's lines in the prompt, excluding the base prompt.
    pub fn file_cost(&self, file: &FileGroup) -> usize {
        let text_chars: usize = file.path.len()
            + file
                .tests
                .iter()
                .map(|t| t.name.len() + t.suite_path.len())
                .sum::<usize>();
        self.per_file_tokens + self.per_test_tokens * file.tests.len() + text_chars / CHARS_PER_TOKEN
    }

    pub fn estimate(&self, chunk: &Chunk) -> usize {
        self.base_prompt_tokens + chunk.files.iter().map(|f| self.file_cost(f)).sum::<usize>()
    }
}

/// Greedily pack files into chunks bounded by `max_tests` and `budget`.
///
/// A chunk is closed when the next file would push it over either limit and
/// the chunk already holds something. Files with no tests are skipped.
pub fn partition(files: &[FileGroup], max_tests: usize, budget: &TokenBudget) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut current = Chunk::default();
    let mut current_tests = 0usize;
    let mut current_tokens = budget.base_prompt_tokens;

    for file in files {
        if file.tests.is_empty() {
            continue;
        }

        let file_tests = file.tests.len();
        let file_tokens = budget.file_cost(file);

        let over_tests = current_tests + file_tests > max_tests;
        let over_tokens = current_tokens + file_tokens > budget.max_tokens;

        if (over_tests || over_tokens) && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            current_tests = 0;
            current_tokens = budget.base_prompt_tokens;
        }

        current.files.push(file.clone());
        current_tests += file_tests;
        current_tokens += file_tokens;
    }

    // Flush remaining
    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}

/// Position = local index, value = global index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexMap(Vec<usize>);

impl IndexMap {
    pub fn global(&self, local: usize) -> Option<usize> {
        self.0.get(local).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn globals(&self) -> &[usize] {
        &self.0
    }
}

/// Copy `chunk` with tests renumbered `0..N-1` in file-then-test order.
pub fn reindex(chunk: &Chunk) -> (Chunk, IndexMap) {
    let mut map = Vec::with_capacity(chunk.test_count());
    let files = chunk
        .files
        .iter()
        .map(|file| FileGroup {
            path: file.path.clone(),
            tests: file
                .tests
                .iter()
                .map(|test| {
                    let local = map.len();
                    map.push(test.index);
                    TestCase {
                        index: local,
                        ..test.clone()
                    }
                })
                .collect(),
        })
        .collect();

    (Chunk { files }, IndexMap(map))
}

/// Rewrite every `test_indices` entry from local to global index space.
///
/// Locals with no mapping are dropped; validation runs before restore and
/// has already reported them.
pub fn restore(mut output: Taxonomy, map: &IndexMap) -> Taxonomy {
    for domain in &mut output.domains {
        for feature in &mut domain.features {
            feature.test_indices = feature
                .test_indices
                .iter()
                .filter_map(|&local| map.global(local))
                .collect();
        }
    }
    output
}

/// Summary of a partition, printed by `taxo plan`.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkPlan {
    pub files: usize,
    pub tests: usize,
    pub chunks: usize,
    pub largest_chunk_tests: usize,
    pub oversized_chunks: usize,
    pub estimated_tokens: usize,
}

pub fn plan(files: &[FileGroup], max_tests: usize, budget: &TokenBudget) -> ChunkPlan {
    let chunks = partition(files, max_tests, budget);
    ChunkPlan {
        files: files.iter().filter(|f| !f.tests.is_empty()).count(),
        tests: files.iter().map(|f| f.tests.len()).sum(),
        chunks: chunks.len(),
        largest_chunk_tests: chunks.iter().map(Chunk::test_count).max().unwrap_or(0),
        oversized_chunks: chunks
            .iter()
            .filter(|c| c.test_count() > max_tests || budget.estimate(c) > budget.max_tokens)
            .count(),
        estimated_tokens: chunks.iter().map(|c| budget.estimate(c)).sum(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DomainGroup, FeatureGroup};
    use std::collections::HashSet;

    fn budget(max_tokens: usize) -> TokenBudget {
        TokenBudget {
            max_tokens,
            base_prompt_tokens: 0,
            per_file_tokens: 0,
            per_test_tokens: 1,
        }
    }

    fn files(count: usize, tests_per_file: usize) -> Vec<FileGroup> {
        let mut next = 0;
        (0..count)
            .map(|f| FileGroup {
                path: format!("f{}", f),
                tests: (0..tests_per_file)
                    .map(|_| {
                        let t = TestCase {
                            index: next + 100,
                            name: String::new(),
                            suite_path: String::new(),
                            file_path: format!("f{}", f),
                        };
                        next += 1;
                        t
                    })
                    .collect(),
            })
            .collect()
    }

    #[test]
    fn ten_files_of_thirty_make_two_chunks() {
        let input = files(10, 30);
        let chunks = partition(&input, 250, &budget(usize::MAX));
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].test_count(), 240);
        assert_eq!(chunks[1].test_count(), 60);
    }

    #[test]
    fn no_file_appears_in_two_chunks() {
        let input = files(37, 7);
        let chunks = partition(&input, 20, &budget(usize::MAX));
        let mut seen = HashSet::new();
        for chunk in &chunks {
            for file in &chunk.files {
                assert!(seen.insert(file.path.clone()), "{} split", file.path);
                assert_eq!(file.tests.len(), 7);
            }
        }
        assert_eq!(seen.len(), 37);
    }

    #[test]
    fn oversized_file_gets_its_own_chunk() {
        let mut input = files(3, 2);
        input[1].tests.extend(files(1, 50).remove(0).tests);
        let chunks = partition(&input, 10, &budget(usize::MAX));
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[1].files.len(), 1);
        assert_eq!(chunks[1].test_count(), 52);
    }

    #[test]
    fn token_budget_closes_chunk() {
        let input = files(4, 5);
        // 5 tokens per file, budget of 12 tokens fits two files
        let chunks = partition(&input, 1000, &budget(12));
        assert_eq!(chunks.len(), 2);
    }

    #[test]
    fn empty_files_are_skipped() {
        let mut input = files(2, 3);
        input.insert(1, FileGroup {
            path: "empty".into(),
            tests: vec![],
        });
        let chunks = partition(&input, 100, &budget(usize::MAX));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].files.len(), 2);
    }

    #[test]
    fn reindex_then_restore_recovers_globals() {
        let input = files(3, 4);
        let chunk = Chunk { files: input };
        let (local, map) = reindex(&chunk);

        let locals: Vec<usize> = local.tests().map(|t| t.index).collect();
        assert_eq!(locals, (0..12).collect::<Vec<_>>());

        let output = Taxonomy::new(vec![DomainGroup {
            name: "D".into(),
            description: String::new(),
            confidence: 1.0,
            features: vec![FeatureGroup {
                name: "F".into(),
                description: String::new(),
                confidence: 1.0,
                test_indices: locals,
            }],
        }]);
        let restored = restore(output, &map);
        let globals: Vec<usize> = chunk.tests().map(|t| t.index).collect();
        assert_eq!(restored.domains[0].features[0].test_indices, globals);
    }

    #[test]
    fn restore_drops_unmapped_locals() {
        let (_, map) = reindex(&Chunk { files: files(1, 2) });
        let output = Taxonomy::new(vec![DomainGroup {
            name: "D".into(),
            description: String::new(),
            confidence: 1.0,
            features: vec![FeatureGroup {
                name: "F".into(),
                description: String::new(),
                confidence: 1.0,
                test_indices: vec![0, 999],
            }],
        }]);
        let restored = restore(output, &map);
        assert_eq!(restored.domains[0].features[0].test_indices, vec![100]);
    }

    #[test]
    fn plan_counts_oversized() {
        let mut input = files(2, 2);
        input[0].tests.extend(files(1, 20).remove(0).tests);
        let p = plan(&input, 10, &budget(usize::MAX));
        assert_eq!(p.chunks, 2);
        assert_eq!(p.oversized_chunks, 1);
        assert_eq!(p.largest_chunk_tests, 22);
        assert_eq!(p.tests, 24);
    }
}
