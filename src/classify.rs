//! Wave-parallel classification orchestration.
//!
//! Coordinates a full run: partition → anchor chunk → waves → merge →
//! validation → post-processing.
//!
//! ```text
//!  chunk 0 (alone) ──▶ anchors
//!                        │
//!        ┌───────────────┼───────────────┐
//!        ▼               ▼               ▼
//!   chunk 1..=k     (wave of ≤ wave_concurrency, shared anchors)
//!        └───────────────┬───────────────┘
//!                        ▼
//!        merge in chunk order ──▶ anchors ──▶ next wave
//! ```
//!
//! A failure after at least one completed chunk writes a [`ChunkProgress`]
//! checkpoint before propagating; the next run with the same key resumes
//! at the first unfinished chunk.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::checkpoint::{ChunkProgress, ProgressKey, ProgressStore};
use crate::chunk::{partition, reindex, restore, Chunk, TokenBudget};
use crate::config::Config;
use crate::error::{ClassifyError, PipelineFailure};
use crate::merge::merge;
use crate::models::{all_tests, DomainGroup, FileGroup, Taxonomy, TokenUsage, UNCATEGORIZED_DOMAIN};
use crate::postprocess::finalize;
use crate::progress::{ClassifyProgressEvent, NoProgress, ProgressReporter};
use crate::prompt::{build_chunk_prompt, parse_taxonomy, SYSTEM_PROMPT};
use crate::provider::GenerateRequest;
use crate::reliability::{Phase, ReliableClient};
use crate::validate::{validate, ValidationReport};

/// Result of a successful run.
#[derive(Debug, Clone)]
pub struct ClassificationOutcome {
    /// Final, post-processed taxonomy in global index space.
    pub taxonomy: Taxonomy,
    /// Usage across all chunks, including chunks restored from a checkpoint.
    pub usage: TokenUsage,
    pub total_chunks: usize,
    /// First chunk classified by this invocation (0 unless resumed).
    pub resumed_from: usize,
    /// Chunk classifications performed by this invocation.
    pub chunks_classified: usize,
    /// Structural fixes applied to this invocation's chunk outputs.
    pub validation: ValidationReport,
}

struct ChunkResult {
    output: Taxonomy,
    usage: TokenUsage,
    report: ValidationReport,
}

/// Mutable state of one run.
struct RunState {
    outputs: Vec<Taxonomy>,
    anchors: Vec<DomainGroup>,
    usage: TokenUsage,
    validation: ValidationReport,
    classified: usize,
}

impl RunState {
    fn accept(&mut self, result: ChunkResult) {
        self.outputs.push(result.output);
        self.usage.add(&result.usage);
        self.validation.absorb(&result.report);
        self.classified += 1;
    }

    fn refresh_anchors(&mut self) {
        self.anchors = anchor_domains(&self.outputs);
    }
}

/// Anchor vocabulary: merged domains so far, without catch-all buckets.
fn anchor_domains(outputs: &[Taxonomy]) -> Vec<DomainGroup> {
    merge(outputs)
        .domains
        .into_iter()
        .filter(|d| d.name != UNCATEGORIZED_DOMAIN)
        .collect()
}

/// Drives chunked classification against a [`ReliableClient`].
pub struct Classifier {
    config: Config,
    client: ReliableClient,
    store: Arc<dyn ProgressStore>,
    reporter: Box<dyn ProgressReporter>,
}

impl Classifier {
    pub fn new(config: Config, client: ReliableClient, store: Arc<dyn ProgressStore>) -> Self {
        Self {
            config,
            client,
            store,
            reporter: Box::new(NoProgress),
        }
    }

    pub fn with_reporter(mut self, reporter: Box<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn store(&self) -> &Arc<dyn ProgressStore> {
        &self.store
    }

    /// Classify every test in `files` into a taxonomy.
    ///
    /// `analysis_id` keys the resumable checkpoint together with `language`
    /// and the model; pass an empty id to key by input content instead.
    pub async fn classify(
        &self,
        files: &[FileGroup],
        language: &str,
        analysis_id: &str,
        cancel: &CancellationToken,
    ) -> Result<ClassificationOutcome, PipelineFailure> {
        let tests = all_tests(files);
        if tests.is_empty() {
            return Err(ClassifyError::InvalidInput("no tests to classify".to_string()).into());
        }

        let budget = TokenBudget::from(&self.config.chunking);
        let chunks = partition(files, self.config.chunking.max_tests, &budget);
        let total = chunks.len();
        let key = ProgressKey::for_run(analysis_id, language, self.client.model_name(), files);

        self.reporter.report(ClassifyProgressEvent::Planned {
            chunks: total as u64,
            tests: tests.len() as u64,
        });
        tracing::info!(
            analysis_id = %key.analysis_id,
            language,
            tests = tests.len(),
            chunks = total,
            "starting classification"
        );

        let mut state = self.load_state(&key, total).await?;
        let resumed_from = state.outputs.len();
        if resumed_from > 0 {
            self.reporter.report(ClassifyProgressEvent::Resumed {
                from: resumed_from as u64,
                total: total as u64,
            });
        }

        // Anchor chunk runs alone.
        if state.outputs.is_empty() {
            self.reporter
                .report(ClassifyProgressEvent::Wave { wave: 0, chunks: 1 });
            match self.classify_chunk(0, &chunks[0], &[], language, cancel).await {
                Ok(result) => {
                    state.accept(result);
                    state.refresh_anchors();
                    self.report_done(&state, total);
                }
                Err(err) => return Err(self.fail(&key, &state, total, 0, err).await),
            }
            if total > 1 {
                if let Err(err) = pause(self.config.orchestrator.chunk_delay(), cancel).await {
                    return Err(self.fail(&key, &state, total, 1, err).await);
                }
            }
        }

        let concurrency = self.config.orchestrator.wave_concurrency.max(1);
        let mut wave_number = 1u64;
        while state.outputs.len() < total {
            let start = state.outputs.len();
            let end = (start + concurrency).min(total);

            if cancel.is_cancelled() {
                return Err(self
                    .fail(&key, &state, total, start, ClassifyError::Cancelled)
                    .await);
            }

            self.reporter.report(ClassifyProgressEvent::Wave {
                wave: wave_number,
                chunks: (end - start) as u64,
            });
            tracing::debug!(wave = wave_number, start, end, "launching wave");

            // First failure cancels the rest of the wave; the run token
            // still reaches every call through the child.
            let wave_cancel = cancel.child_token();
            let anchors = &state.anchors;
            let mut pending: FuturesUnordered<_> = (start..end)
                .map(|i| {
                    let chunk = &chunks[i];
                    let token = &wave_cancel;
                    async move {
                        let result = self.classify_chunk(i, chunk, anchors, language, token).await;
                        (i, result)
                    }
                })
                .collect();

            let mut slots: Vec<Option<ChunkResult>> = (start..end).map(|_| None).collect();
            let mut failure: Option<(usize, ClassifyError)> = None;
            while let Some((index, result)) = pending.next().await {
                match result {
                    Ok(r) => slots[index - start] = Some(r),
                    Err(err) if failure.is_none() => {
                        tracing::debug!(chunk = index, error = %err, "chunk failed, cancelling wave");
                        wave_cancel.cancel();
                        failure = Some((index, err));
                    }
                    Err(_) => {}
                }
            }
            drop(pending);

            // Merge in chunk order; only the contiguous completed prefix is kept.
            let mut contiguous = true;
            for slot in slots {
                match slot {
                    Some(r) if contiguous => state.accept(r),
                    // Tokens were spent even if the output is redone on resume.
                    Some(r) => state.usage.add(&r.usage),
                    None => contiguous = false,
                }
            }

            if let Some((index, err)) = failure {
                return Err(self.fail(&key, &state, total, index, err).await);
            }

            state.refresh_anchors();
            self.report_done(&state, total);
            wave_number += 1;

            if state.outputs.len() < total {
                if let Err(err) = pause(self.config.orchestrator.chunk_delay(), cancel).await {
                    let next = state.outputs.len();
                    return Err(self.fail(&key, &state, total, next, err).await);
                }
            }
        }

        if let Err(e) = self.store.delete(&key).await {
            tracing::warn!(error = %e, "failed to delete checkpoint after success");
        }

        let merged = merge(&state.outputs);
        let expected: BTreeSet<usize> = tests.iter().map(|t| t.index).collect();
        let (validated, final_report) =
            validate(merged, &expected, self.config.validation.missing_threshold);
        if !final_report.is_clean() {
            tracing::warn!(
                invalid = final_report.invalid.len(),
                duplicates = final_report.duplicates.len(),
                missing = final_report.missing.len(),
                "merged taxonomy needed repair"
            );
        }
        let taxonomy = finalize(&validated, &tests);

        tracing::info!(
            domains = taxonomy.domains.len(),
            total_tokens = state.usage.total_tokens,
            chunks_classified = state.classified,
            "classification complete"
        );

        Ok(ClassificationOutcome {
            taxonomy,
            usage: state.usage,
            total_chunks: total,
            resumed_from,
            chunks_classified: state.classified,
            validation: state.validation,
        })
    }

    async fn load_state(&self, key: &ProgressKey, total: usize) -> Result<RunState, PipelineFailure> {
        let mut state = RunState {
            outputs: Vec::new(),
            anchors: Vec::new(),
            usage: TokenUsage::default(),
            validation: ValidationReport::default(),
            classified: 0,
        };

        let Some(progress) = self.store.get(key).await? else {
            return Ok(state);
        };

        let consistent = progress.total_chunks == total
            && progress.completed_chunks == progress.completed_outputs.len()
            && progress.completed_chunks <= total;
        if !consistent {
            tracing::warn!(
                saved_total = progress.total_chunks,
                total,
                "discarding checkpoint that does not match the current input"
            );
            self.store.delete(key).await?;
            return Ok(state);
        }

        tracing::info!(
            completed = progress.completed_chunks,
            total,
            "resuming from checkpoint"
        );
        state.outputs = progress.completed_outputs;
        state.usage = progress.total_usage;
        state.anchors = if progress.anchor_domains.is_empty() {
            anchor_domains(&state.outputs)
        } else {
            progress.anchor_domains
        };
        Ok(state)
    }

    async fn classify_chunk(
        &self,
        index: usize,
        chunk: &Chunk,
        anchors: &[DomainGroup],
        language: &str,
        cancel: &CancellationToken,
    ) -> Result<ChunkResult, ClassifyError> {
        let span = tracing::info_span!("chunk", index, tests = chunk.test_count());
        async move {
            let (local, map) = reindex(chunk);
            let prompt = build_chunk_prompt(&local, language, anchors);
            let request =
                GenerateRequest::new(SYSTEM_PROMPT, prompt).with_limits(&self.config.provider);

            let (raw, usage) = self
                .client
                .call(Phase::Classification, &request, parse_taxonomy, cancel)
                .await?;

            let expected: BTreeSet<usize> = (0..map.len()).collect();
            let (clean, report) =
                validate(raw, &expected, self.config.validation.missing_threshold);
            let output = restore(clean, &map);

            tracing::debug!(
                domains = output.domains.len(),
                tokens = usage.total_tokens,
                "chunk classified"
            );
            Ok::<_, ClassifyError>(ChunkResult {
                output,
                usage,
                report,
            })
        }
        .instrument(span)
        .await
    }

    fn report_done(&self, state: &RunState, total: usize) {
        self.reporter.report(ClassifyProgressEvent::Classified {
            n: state.outputs.len() as u64,
            total: total as u64,
        });
    }

    /// Checkpoint completed work (if any) and build the run-level failure.
    async fn fail(
        &self,
        key: &ProgressKey,
        state: &RunState,
        total: usize,
        failed_chunk: usize,
        err: ClassifyError,
    ) -> PipelineFailure {
        let completed = state.outputs.len();
        let mut checkpointed = false;

        if completed > 0 {
            let progress = ChunkProgress {
                completed_chunks: completed,
                completed_outputs: state.outputs.clone(),
                anchor_domains: state.anchors.clone(),
                total_chunks: total,
                total_usage: state.usage.clone(),
            };
            match self.store.save(key, &progress).await {
                Ok(()) => checkpointed = true,
                Err(e) => tracing::error!(error = %e, "failed to save checkpoint"),
            }
        }

        tracing::error!(
            failed_chunk,
            completed,
            total,
            checkpointed,
            error = %err,
            hint = err.action_hint(),
            "classification failed"
        );

        PipelineFailure {
            source: err,
            completed_chunks: completed,
            failed_chunk,
            total_chunks: total,
            checkpointed,
        }
    }
}

/// Cancellable delay between sequential steps.
async fn pause(delay: Duration, cancel: &CancellationToken) -> Result<(), ClassifyError> {
    if delay.is_zero() {
        return Ok(());
    }
    tokio::select! {
        _ = cancel.cancelled() => Err(ClassifyError::Cancelled),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn taxonomy(domain: &str, indices: Vec<usize>) -> Taxonomy {
        Taxonomy::new(vec![DomainGroup {
            name: domain.into(),
            description: String::new(),
            confidence: 1.0,
            features: vec![crate::models::FeatureGroup {
                name: "F".into(),
                description: String::new(),
                confidence: 1.0,
                test_indices: indices,
            }],
        }])
    }

    #[test]
    fn anchors_skip_catch_all() {
        let anchors = anchor_domains(&[
            taxonomy("Billing", vec![0]),
            taxonomy(UNCATEGORIZED_DOMAIN, vec![1]),
            taxonomy("Billing", vec![2]),
        ]);
        assert_eq!(anchors.len(), 1);
        assert_eq!(anchors[0].name, "Billing");
        assert_eq!(anchors[0].features.len(), 2);
    }

    #[tokio::test]
    async fn zero_delay_never_waits() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(pause(Duration::ZERO, &cancel).await.is_ok());
        assert_eq!(
            pause(Duration::from_secs(5), &cancel).await,
            Err(ClassifyError::Cancelled)
        );
    }
}
