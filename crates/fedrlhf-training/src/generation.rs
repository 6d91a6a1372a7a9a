//! Pairwise candidate generation.

use crate::dataset::{PairwiseSample, PromptRecord};
use crate::error::TrainingResult;
use crate::progress::{ProgressEvent, ProgressSink};
use crate::prompts::PromptTemplate;
use fedrlhf_abstraction::{LanguageModel, SamplingParams};
use tracing::{debug, info, warn};

/// Prompts per generation call for pairwise data.
pub const PAIRWISE_BATCH: usize = 10;

/// Sampling settings used for preference data: `top_p = 1.0`, `temperature = 0.7`,
/// sampled, at least two sequences per prompt.
#[must_use]
pub fn pairwise_sampling(max_new_tokens: u32, num_completions: u32) -> SamplingParams {
    SamplingParams {
        top_p: 1.0,
        temperature: 0.7,
        do_sample: true,
        max_new_tokens,
        num_return_sequences: num_completions.max(2),
    }
}

/// Assigns decoded sequences back to the prompts they were generated from.
///
/// A sequence belongs to the first prompt (in batch order) it contains verbatim. The
/// prompt text is removed, the rest trimmed and `</s>` dropped. Sequences that contain
/// none of the prompts are discarded; the returned count says how many.
#[must_use]
pub fn attribute_responses(input_texts: &[String], responses: &[String]) -> (Vec<Vec<String>>, usize) {
    let mut response_map = vec![Vec::new(); input_texts.len()];
    let mut dropped = 0;

    for res in responses {
        match input_texts.iter().position(|text| res.contains(text.as_str())) {
            Some(idx) => {
                let completion = res.replace(input_texts[idx].as_str(), "");
                response_map[idx].push(completion.trim().replace("</s>", ""));
            }
            None => dropped += 1,
        }
    }

    (response_map, dropped)
}

/// Every unordered pair `(a, b)` with `a` before `b`, in lexicographic index order.
#[must_use]
pub fn combinations(items: &[String]) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for (i, a) in items.iter().enumerate() {
        for b in &items[i + 1..] {
            out.push((a.clone(), b.clone()));
        }
    }
    out
}

/// Samples completions for every prompt and forms all pairwise combinations.
///
/// With `k` completions per prompt each prompt yields `k * (k - 1) / 2` samples.
pub async fn generate_pairwise_data<M: LanguageModel + ?Sized>(
    prompts: &[PromptRecord],
    model: &mut M,
    template: &PromptTemplate,
    params: &SamplingParams,
    progress: &dyn ProgressSink,
) -> TrainingResult<Vec<PairwiseSample>> {
    let stage = "generate";
    let batches = prompts.len().div_ceil(PAIRWISE_BATCH) as u64;
    progress.on_event(ProgressEvent::Started { stage: stage.to_string(), total: Some(batches) });

    let mut samples = Vec::new();
    let mut total_dropped = 0;

    for (step, input_data) in prompts.chunks(PAIRWISE_BATCH).enumerate() {
        let input_texts = input_data
            .iter()
            .map(|record| template.format_map(record))
            .collect::<TrainingResult<Vec<_>>>()?;

        let responses = model.generate(&input_texts, params).await?;
        let (response_map, dropped) = attribute_responses(&input_texts, &responses);
        total_dropped += dropped;

        for (record, completions) in input_data.iter().zip(&response_map) {
            debug!(record = ?record.0, "Prompt record");
            for (j, res) in completions.iter().enumerate() {
                debug!("Generated {j}-th response: {res}");
            }
            for (output_a, output_b) in combinations(completions) {
                samples.push(PairwiseSample::new(record.clone(), output_a, output_b));
            }
        }

        progress.on_event(ProgressEvent::Step {
            stage: stage.to_string(),
            step: step as u64 + 1,
            total: Some(batches),
        });
    }

    if total_dropped > 0 {
        warn!(dropped = total_dropped, "Generated sequences could not be matched to their prompt");
    }
    info!(prompts = prompts.len(), samples = samples.len(), "Pairwise generation finished");
    progress.on_event(ProgressEvent::Finished { stage: stage.to_string() });
    Ok(samples)
}
