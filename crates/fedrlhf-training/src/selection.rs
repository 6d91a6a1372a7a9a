//! Preference selection between two candidates.
//!
//! A comparison prompt shows both candidates and the model's next-token logits over
//! [`CHOICES`] decide: index 0 prefers `output_A`. With several adapters every
//! non-default adapter votes and the majority wins.

use crate::dataset::PairwiseSample;
use crate::error::{TrainingError, TrainingResult};
use crate::progress::{ProgressEvent, ProgressSink};
use crate::prompts::{CHOICES, PromptTemplate};
use fedrlhf_abstraction::{ComparisonQuery, DEFAULT_ADAPTER, LanguageModel};
use rand::Rng;
use rand::seq::SliceRandom;
use tracing::{debug, info};

/// Comparison prompts per forward pass.
pub const SELECT_BATCH: usize = 10;

/// Most frequent value; ties go to the smallest value. Empty input yields 0.
#[must_use]
pub fn majority_vote(votes: &[usize]) -> usize {
    let Some(max) = votes.iter().max() else {
        return 0;
    };
    let mut counts = vec![0usize; max + 1];
    for v in votes {
        counts[*v] += 1;
    }
    // first index holding the maximum count
    let mut best = 0;
    for (idx, count) in counts.iter().enumerate() {
        if *count > counts[best] {
            best = idx;
        }
    }
    best
}

/// Per-example majority across voters; `voters[v][i]` is voter `v`'s pick for example `i`.
pub fn column_majority(voters: &[Vec<usize>]) -> TrainingResult<Vec<usize>> {
    let Some(first) = voters.first() else {
        return Ok(Vec::new());
    };
    if let Some(bad) = voters.iter().find(|v| v.len() != first.len()) {
        return Err(TrainingError::Trainer(format!(
            "voters disagree on example count ({} vs {})",
            first.len(),
            bad.len()
        )));
    }
    Ok((0..first.len())
        .map(|i| majority_vote(&voters.iter().map(|v| v[i]).collect::<Vec<_>>()))
        .collect())
}

/// Index of the largest logit; the first one on ties.
pub(crate) fn argmax(row: &[f32]) -> usize {
    let mut best = 0;
    for (idx, value) in row.iter().enumerate() {
        if *value > row[best] {
            best = idx;
        }
    }
    best
}

/// How a batch of comparisons is decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectorMode {
    /// The model as currently configured decides.
    Single,
    /// Every listed adapter decides; the majority wins.
    AdapterVote(Vec<String>),
}

impl SelectorMode {
    /// `AdapterVote` over the non-default adapters when the model carries more than one
    /// adapter, otherwise `Single`.
    #[must_use]
    pub fn detect<M: LanguageModel + ?Sized>(model: &M) -> Self {
        let names = model.adapter_names();
        if names.len() <= 1 {
            return Self::Single;
        }
        Self::voters(&names)
    }

    /// `AdapterVote` over the non-default names in `names`.
    #[must_use]
    pub fn voters(names: &[String]) -> Self {
        let voters: Vec<String> = names.iter().filter(|n| *n != DEFAULT_ADAPTER).cloned().collect();
        if voters.is_empty() { Self::Single } else { Self::AdapterVote(voters) }
    }
}

/// Builds comparison queries for `(output_A, output_B)` pairs of `records`.
///
/// The placeholder target is drawn at random and only shapes the forced-decoding input.
pub fn build_queries<R: Rng + ?Sized>(
    template: &PromptTemplate,
    samples: &[PairwiseSample],
    rng: &mut R,
) -> TrainingResult<Vec<ComparisonQuery>> {
    samples
        .iter()
        .map(|sample| {
            let prompt = template.format_with_extra(
                &sample.prompt,
                &[("output_A", sample.output_a.as_str()), ("output_B", sample.output_b.as_str())],
            )?;
            let target = CHOICES.choose(rng).copied().unwrap_or(CHOICES[0]).to_string();
            Ok(ComparisonQuery { prompt, target })
        })
        .collect()
}

/// Decides one batch of comparisons. Returns 0 (A preferred) or 1 per query.
pub async fn predict_batch<M: LanguageModel + ?Sized>(
    model: &mut M,
    queries: &[ComparisonQuery],
    mode: &SelectorMode,
) -> TrainingResult<Vec<usize>> {
    let choices: Vec<String> = CHOICES.iter().map(ToString::to_string).collect();
    match mode {
        SelectorMode::Single => {
            let logits = model.choice_logits(queries, &choices).await?;
            Ok(logits.iter().map(|row| argmax(row)).collect())
        }
        SelectorMode::AdapterVote(names) => {
            let mut collective: Vec<Vec<usize>> = Vec::with_capacity(names.len());
            for name in names {
                model.set_active_adapter(name)?;
                let logits = model.choice_logits(queries, &choices).await?;
                collective.push(logits.iter().map(|row| argmax(row)).collect());
            }
            column_majority(&collective)
        }
    }
}

/// Labels every sample's `choice` in place, batch by batch.
pub async fn choose_better_response<M: LanguageModel + ?Sized, R: Rng + ?Sized>(
    samples: &mut [PairwiseSample],
    model: &mut M,
    template: &PromptTemplate,
    rng: &mut R,
    progress: &dyn ProgressSink,
) -> TrainingResult<()> {
    let mode = SelectorMode::detect(model);
    info!(mode = ?mode, samples = samples.len(), "Selecting the better response");

    let stage = "select";
    let batches = samples.len().div_ceil(SELECT_BATCH) as u64;
    progress.on_event(ProgressEvent::Started { stage: stage.to_string(), total: Some(batches) });

    for (step, batch) in samples.chunks_mut(SELECT_BATCH).enumerate() {
        let queries = build_queries(template, batch, rng)?;
        let predicted = predict_batch(model, &queries, &mode).await?;
        for (sample, choice) in batch.iter_mut().zip(predicted) {
            sample.choice = Some(choice as u8);
        }
        debug!(batch = step, "Labeled comparison batch");
        progress.on_event(ProgressEvent::Step {
            stage: stage.to_string(),
            step: step as u64 + 1,
            total: Some(batches),
        });
    }

    progress.on_event(ProgressEvent::Finished { stage: stage.to_string() });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::PromptRecord;
    use crate::progress::NoopProgressSink;
    use crate::prompts::tldr_comparison_template;
    use fedrlhf_models::MockLanguageModel;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_majority_vote_ties_pick_lowest_index() {
        assert_eq!(majority_vote(&[0, 1, 1, 0]), 0);
        assert_eq!(majority_vote(&[3, 1, 3, 1, 2]), 1);
        assert_eq!(majority_vote(&[2, 2, 0]), 2);
        assert_eq!(majority_vote(&[]), 0);
    }

    #[test]
    fn test_column_majority_matches_mode_per_example() {
        let voters = vec![vec![0, 5, 2], vec![1, 5, 3], vec![1, 4, 3], vec![0, 4, 2]];
        assert_eq!(column_majority(&voters).unwrap(), vec![0, 4, 2]);
        assert!(column_majority(&[vec![0], vec![0, 1]]).is_err());
        assert!(column_majority(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_argmax_first_on_tie() {
        assert_eq!(argmax(&[0.5, 0.5]), 0);
        assert_eq!(argmax(&[0.1, 0.9]), 1);
        assert_eq!(argmax(&[f32::NEG_INFINITY, -3.0]), 1);
    }

    #[test]
    fn test_mode_detection() {
        let single = MockLanguageModel::new("m");
        assert_eq!(SelectorMode::detect(&single), SelectorMode::Single);

        let multi = MockLanguageModel::new("m").with_adapters(["Client_1", "Client_2"]);
        assert_eq!(
            SelectorMode::detect(&multi),
            SelectorMode::AdapterVote(vec!["Client_1".to_string(), "Client_2".to_string()])
        );
    }

    fn samples(n: usize) -> Vec<PairwiseSample> {
        (0..n)
            .map(|i| {
                PairwiseSample::new(
                    PromptRecord::from([("subreddit", "s"), ("title", "t"), ("post", format!("p{i}").as_str())]),
                    format!(" first {i}"),
                    format!(" second {i}"),
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn test_choose_better_response_labels_every_sample() {
        let mut data = samples(23);
        let mut model = MockLanguageModel::new("m").with_adapters(["Client_1", "Client_2", "Client_3"]);
        let mut rng = StdRng::seed_from_u64(0);

        choose_better_response(&mut data, &mut model, &tldr_comparison_template(), &mut rng, &NoopProgressSink)
            .await
            .unwrap();

        assert!(data.iter().all(|s| matches!(s.choice, Some(0 | 1))));
    }

    #[tokio::test]
    async fn test_labels_independent_of_placeholder_target() {
        let data = samples(8);
        let template = tldr_comparison_template();
        let mut model = MockLanguageModel::new("m");

        let q1 = build_queries(&template, &data, &mut StdRng::seed_from_u64(1)).unwrap();
        let q2 = build_queries(&template, &data, &mut StdRng::seed_from_u64(2)).unwrap();
        let p1 = predict_batch(&mut model, &q1, &SelectorMode::Single).await.unwrap();
        let p2 = predict_batch(&mut model, &q2, &SelectorMode::Single).await.unwrap();
        assert_eq!(p1, p2);
    }
}
