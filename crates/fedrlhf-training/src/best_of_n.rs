//! Best-of-N selection.
//!
//! Every sample carries N candidate summaries. A policy reduces them to one index per
//! sample:
//! - `Tournament`: the current best meets candidates `1..N` in order; a win for the
//!   challenger makes it the new best. Non-transitive preferences make the result
//!   order dependent.
//! - `Reward`: argmax of the reward head over all N candidates.
//! - `MultiAdapter`: a tournament whose decisions are adapter majority votes.
//! - `Federated`: one tournament per client adapter, then a per-sample majority vote.

use crate::builders::{ensure_parent, load_jsonl, read_json_cache, write_json_cache};
use crate::checkpoint::load_latest_checkpoint;
use crate::config::ExperimentConfig;
use crate::dataset::{BestOfNSample, JudgeVerdict, PairwiseSample, PromptRecord, validate_best_of_n};
use crate::download::download_url;
use crate::error::{TrainingError, TrainingResult};
use crate::layout::BestOfNLayout;
use crate::progress::{ProgressEvent, ProgressSink};
use crate::prompts::{PromptTemplate, tldr_comparison_template, tldr_summary_template};
use crate::selection::{SELECT_BATCH, SelectorMode, argmax, build_queries, column_majority, predict_batch};
use fedrlhf_abstraction::{LanguageModel, SamplingParams};
use fedrlhf_models::LanguageModelFactory;
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Prompts per generation call for best-of-N candidates.
pub const BEST_OF_N_BATCH: usize = 5;
pub const BEST_OF_N_MAX_NEW_TOKENS: u32 = 80;
pub const DEFAULT_N: usize = 16;
pub const DEFAULT_LIMIT: usize = 3000;
/// Texts per reward-head call.
pub const REWARD_BATCH: usize = 25;

const RECORD_SEPARATOR: &str = "==========================\n\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BestOfNPolicy {
    Tournament,
    Reward,
    MultiAdapter,
    Federated { client_num: u32 },
}

impl BestOfNPolicy {
    /// `local_only` wins over several adapters, which win over a reward trainer.
    #[must_use]
    pub fn from_config(config: &ExperimentConfig) -> Self {
        if config.llm.adapter.local_only {
            Self::Federated { client_num: config.federate.client_num }
        } else if config.llm.adapter.count > 1 {
            Self::MultiAdapter
        } else if config.trainer.is_reward_trainer() {
            Self::Reward
        } else {
            Self::Tournament
        }
    }
}

/// Selected index per sample, plus each client's own picks for `Federated`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BestOfNOutcome {
    pub selected: Vec<usize>,
    pub per_client: Vec<Vec<usize>>,
}

#[must_use]
pub fn best_of_n_sampling(n: usize) -> SamplingParams {
    SamplingParams {
        top_p: 1.0,
        temperature: 0.7,
        do_sample: true,
        max_new_tokens: BEST_OF_N_MAX_NEW_TOKENS,
        num_return_sequences: u32::try_from(n).unwrap_or(u32::MAX),
    }
}

/// Splits prompt-major sequences into `n` completions per prompt with the prompt text
/// and `</s>` removed.
pub fn split_completions(
    prompts: &[String],
    sequences: &[String],
    n: usize,
) -> TrainingResult<Vec<Vec<String>>> {
    if sequences.len() != prompts.len() * n {
        return Err(TrainingError::Dataset(format!(
            "expected {} generated sequences, got {}",
            prompts.len() * n,
            sequences.len()
        )));
    }
    Ok(prompts
        .iter()
        .zip(sequences.chunks(n.max(1)))
        .map(|(prompt, chunk)| {
            chunk
                .iter()
                .map(|seq| {
                    let completion = seq.strip_prefix(prompt.as_str()).unwrap_or(seq);
                    completion.trim().replace("</s>", "")
                })
                .collect()
        })
        .collect())
}

fn with_leading_space(text: &str) -> String {
    if text.starts_with(' ') { text.to_string() } else { format!(" {text}") }
}

/// Rating rendered the way the transcript parser reads it back (`7.0`, `6.5`).
#[must_use]
pub fn format_rating(rating: f64) -> String {
    if rating.fract() == 0.0 && rating.is_finite() { format!("{rating:.1}") } else { rating.to_string() }
}

/// Samples `n` candidates for every record and writes the human-readable transcript.
pub async fn generate_best_of_n_dataset<M: LanguageModel + ?Sized, W: Write>(
    records: Vec<PromptRecord>,
    model: &mut M,
    template: &PromptTemplate,
    n: usize,
    transcript: &mut W,
    progress: &dyn ProgressSink,
) -> TrainingResult<Vec<BestOfNSample>> {
    let stage = "best-of-n-generate";
    let batches = records.len().div_ceil(BEST_OF_N_BATCH) as u64;
    progress.on_event(ProgressEvent::Started { stage: stage.to_string(), total: Some(batches) });

    let params = best_of_n_sampling(n);
    let mut samples = Vec::with_capacity(records.len());

    for (step, input_data) in records.chunks(BEST_OF_N_BATCH).enumerate() {
        let input_texts = input_data
            .iter()
            .map(|record| template.format_map(record))
            .collect::<TrainingResult<Vec<_>>>()?;
        let sequences = model.generate(&input_texts, &params).await?;
        let completions = split_completions(&input_texts, &sequences, n)?;

        for (record, summaries) in input_data.iter().zip(completions) {
            write!(
                transcript,
                "Post:\n{}\n\nHuman summary:\n{}\n\n",
                record.text("post").unwrap_or_default(),
                record.text("summary").unwrap_or_default()
            )?;
            for (j, summary) in summaries.iter().enumerate() {
                write!(transcript, "Model-generated summary {j}:\n{summary}\n\n")?;
            }
            transcript.write_all(RECORD_SEPARATOR.as_bytes())?;
            transcript.flush()?;

            samples.push(BestOfNSample { prompt: record.clone(), summaries, autoj_eval_results: None });
        }

        progress.on_event(ProgressEvent::Step {
            stage: stage.to_string(),
            step: step as u64 + 1,
            total: Some(batches),
        });
    }

    progress.on_event(ProgressEvent::Finished { stage: stage.to_string() });
    Ok(samples)
}

/// Loads the best-of-N candidate set, generating and caching it on a miss.
///
/// `init` decides the cache root; `gen_config` names the generating model, the raw test file
/// root and the transcript directory. With `load_eval_version` the judged copy is
/// preferred when it exists.
pub async fn best_of_n_dataset(
    init: &ExperimentConfig,
    gen_config: &ExperimentConfig,
    n: usize,
    load_eval_version: bool,
    progress: &dyn ProgressSink,
) -> TrainingResult<Vec<BestOfNSample>> {
    let spec = gen_config.model.spec()?;
    let layout = BestOfNLayout::new(init.data.root.clone());

    let judged = layout.judged_cache(n, spec.short_name());
    if load_eval_version {
        if let Some(samples) = read_json_cache::<BestOfNSample>(&judged)? {
            info!(path = %judged.display(), samples = samples.len(), "Loaded judged best-of-n dataset");
            return Ok(samples);
        }
    }

    let gen_fp = layout.candidates_cache(n, spec.short_name());
    if let Some(samples) = read_json_cache::<BestOfNSample>(&gen_fp)? {
        info!(path = %gen_fp.display(), samples = samples.len(), "Loaded best-of-n dataset");
        return Ok(samples);
    }

    let source = BestOfNLayout::new(gen_config.data.root.clone()).test_prompts();
    if !source.exists() && !gen_config.data.tldr_test_url.is_empty() {
        download_url(&gen_config.data.tldr_test_url, &source).await?;
    }
    let records = load_jsonl(
        &source,
        &[("subreddit", "subreddit"), ("title", "title"), ("post", "post"), ("summary", "summary")],
    )?;

    let mut model = LanguageModelFactory::create(&spec, &gen_config.model.backend_options())?;
    let transcript_path = gen_config.outdir.join(format!("{}_summarization.txt", spec.short_name()));
    ensure_parent(&transcript_path)?;
    let mut transcript = std::io::BufWriter::new(std::fs::File::create(&transcript_path)?);

    let samples = generate_best_of_n_dataset(
        records,
        &mut model,
        &tldr_summary_template(),
        n,
        &mut transcript,
        progress,
    )
    .await?;

    write_json_cache(&gen_fp, &samples)?;
    info!(
        path = %gen_fp.display(),
        transcript = %transcript_path.display(),
        samples = samples.len(),
        "Generated best-of-n dataset"
    );
    Ok(samples)
}

/// Sequential single-elimination over the candidates. `N == 1` selects 0 everywhere.
pub async fn tournament<M: LanguageModel + ?Sized, R: Rng + ?Sized>(
    model: &mut M,
    samples: &[BestOfNSample],
    template: &PromptTemplate,
    mode: &SelectorMode,
    rng: &mut R,
    progress: &dyn ProgressSink,
) -> TrainingResult<Vec<usize>> {
    let Some(first) = samples.first() else {
        return Ok(Vec::new());
    };
    let n = first.summaries.len();
    validate_best_of_n(samples, n)?;

    let stage = "tournament";
    let rounds = n.saturating_sub(1) as u64;
    progress.on_event(ProgressEvent::Started { stage: stage.to_string(), total: Some(rounds) });

    let mut best = vec![0usize; samples.len()];
    for i in 1..n {
        info!("===== This is {i}-th evaluation =====");
        let pairs: Vec<PairwiseSample> = samples
            .iter()
            .zip(&best)
            .map(|(sample, &b)| {
                PairwiseSample::new(
                    sample.prompt.clone(),
                    with_leading_space(&sample.summaries[b]),
                    with_leading_space(&sample.summaries[i]),
                )
            })
            .collect();

        let mut predicted = Vec::with_capacity(pairs.len());
        for chunk in pairs.chunks(SELECT_BATCH) {
            let queries = build_queries(template, chunk, rng)?;
            predicted.extend(predict_batch(model, &queries, mode).await?);
        }
        for (b, p) in best.iter_mut().zip(predicted) {
            if p == 1 {
                *b = i;
            }
        }
        progress.on_event(ProgressEvent::Step { stage: stage.to_string(), step: i as u64, total: Some(rounds) });
    }

    progress.on_event(ProgressEvent::Finished { stage: stage.to_string() });
    Ok(best)
}

/// Reward-head argmax over every candidate, first index on ties.
pub async fn best_of_n_by_reward<M: LanguageModel + ?Sized>(
    model: &mut M,
    samples: &[BestOfNSample],
    template: &PromptTemplate,
) -> TrainingResult<Vec<usize>> {
    let Some(first) = samples.first() else {
        return Ok(Vec::new());
    };
    let n = first.summaries.len();
    validate_best_of_n(samples, n)?;

    let mut texts = Vec::with_capacity(samples.len() * n);
    for sample in samples {
        let prompt = template.format_map(&sample.prompt)?;
        texts.extend(sample.summaries.iter().map(|s| format!("{prompt}{s}")));
    }

    let mut ratings = Vec::with_capacity(texts.len());
    for chunk in texts.chunks(REWARD_BATCH) {
        ratings.extend(model.reward_scores(chunk).await?);
    }
    if ratings.len() != texts.len() {
        return Err(TrainingError::Trainer(format!(
            "reward head returned {} scores for {} texts",
            ratings.len(),
            texts.len()
        )));
    }

    let best: Vec<usize> = ratings.chunks(n).map(argmax).collect();
    debug!(best = ?best, "Reward selection");
    Ok(best)
}

/// One tournament per client adapter `Client_{k}`, then a per-sample majority vote.
///
/// With `output_dir` each client's picks are written to `test_results_client_{k}.txt`.
pub async fn best_of_n_local<M: LanguageModel + ?Sized, R: Rng + ?Sized>(
    model: &mut M,
    samples: &[BestOfNSample],
    template: &PromptTemplate,
    client_num: u32,
    output_dir: Option<&Path>,
    rng: &mut R,
    progress: &dyn ProgressSink,
) -> TrainingResult<BestOfNOutcome> {
    if client_num == 0 {
        return Err(TrainingError::InvalidSpec("best-of-n by client vote needs client_num >= 1".to_string()));
    }
    let mut per_client = Vec::with_capacity(client_num as usize);
    for client_id in 1..=client_num {
        info!("============ Client {client_id} ============");
        model.set_active_adapter(&format!("Client_{client_id}"))?;
        let picks = tournament(model, samples, template, &SelectorMode::Single, rng, progress).await?;

        if let Some(dir) = output_dir {
            let path = dir.join(format!("test_results_client_{client_id}.txt"));
            write_results_file(&path, samples, &picks)?;
        }
        per_client.push(picks);
    }

    let selected = column_majority(&per_client)?;
    Ok(BestOfNOutcome { selected, per_client })
}

/// Tournament whose every decision is a vote of the non-default adapters.
pub async fn best_of_n_multilora<M: LanguageModel + ?Sized, R: Rng + ?Sized>(
    model: &mut M,
    samples: &[BestOfNSample],
    template: &PromptTemplate,
    rng: &mut R,
    progress: &dyn ProgressSink,
) -> TrainingResult<Vec<usize>> {
    let mode = SelectorMode::voters(&model.adapter_names());
    tournament(model, samples, template, &mode, rng, progress).await
}

/// Runs `policy` over `samples`.
pub async fn run_policy<M: LanguageModel + ?Sized, R: Rng + ?Sized>(
    policy: &BestOfNPolicy,
    model: &mut M,
    samples: &[BestOfNSample],
    output_dir: Option<&Path>,
    rng: &mut R,
    progress: &dyn ProgressSink,
) -> TrainingResult<BestOfNOutcome> {
    let cmp = tldr_comparison_template();
    let selected = match policy {
        BestOfNPolicy::Federated { client_num } => {
            return best_of_n_local(model, samples, &cmp, *client_num, output_dir, rng, progress).await;
        }
        BestOfNPolicy::MultiAdapter => best_of_n_multilora(model, samples, &cmp, rng, progress).await?,
        BestOfNPolicy::Reward => best_of_n_by_reward(model, samples, &tldr_summary_template()).await?,
        BestOfNPolicy::Tournament => {
            tournament(model, samples, &cmp, &SelectorMode::Single, rng, progress).await?
        }
    };
    Ok(BestOfNOutcome { selected, per_client: Vec::new() })
}

/// Writes one record per sample with its selected candidate and, when judged, the Auto-J
/// comment and rating. The rating list and average close the file.
pub fn print_results<W: Write>(out: &mut W, samples: &[BestOfNSample], selected: &[usize]) -> TrainingResult<()> {
    let mut ratings = Vec::new();
    for (sample, &best_idx) in samples.iter().zip(selected) {
        let summary = sample.summaries.get(best_idx).ok_or_else(|| {
            TrainingError::Dataset(format!("selected index {best_idx} out of range"))
        })?;
        write!(
            out,
            "Subreddit: r/{}\n\nTitle:\n{}\n\nPost:\n{}\n\nBest generated summary [[{best_idx}]]:\n{summary}\n\n",
            sample.prompt.text("subreddit").unwrap_or_default(),
            sample.prompt.text("title").unwrap_or_default(),
            sample.prompt.text("post").unwrap_or_default(),
        )?;
        if let Some(JudgeVerdict { comment, rating }) = sample.verdict(best_idx) {
            ratings.push(*rating);
            write!(out, "Auto-J Comment:\n{comment}\n\nAuto-J Rating: {}\n\n", format_rating(*rating))?;
        }
        out.write_all(RECORD_SEPARATOR.as_bytes())?;
    }

    if !ratings.is_empty() {
        let listed: Vec<String> = ratings.iter().map(|r| format_rating(*r)).collect();
        let mean = ratings.iter().sum::<f64>() / ratings.len() as f64;
        write!(out, "[{}]\n\nAverage Auto-J Rating: {}\n\n", listed.join(", "), format_rating(mean))?;
    }
    out.flush()?;
    Ok(())
}

fn write_results_file(path: &Path, samples: &[BestOfNSample], selected: &[usize]) -> TrainingResult<()> {
    ensure_parent(path)?;
    let mut out = std::io::BufWriter::new(std::fs::File::create(path)?);
    print_results(&mut out, samples, selected)
}

/// A sample with its selection, as stored in `test_results.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectedSample {
    #[serde(flatten)]
    pub prompt: PromptRecord,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autoj_eval_results: Option<BTreeMap<String, JudgeVerdict>>,
    pub select_index: String,
    pub select_summary: String,
}

#[must_use]
pub fn selected_samples(samples: &[BestOfNSample], selected: &[usize]) -> Vec<SelectedSample> {
    samples
        .iter()
        .zip(selected)
        .map(|(sample, &idx)| SelectedSample {
            prompt: sample.prompt.clone(),
            autoj_eval_results: sample.autoj_eval_results.clone(),
            select_index: idx.to_string(),
            select_summary: sample.summaries.get(idx).cloned().unwrap_or_default(),
        })
        .collect()
}

/// Files written by [`select_best_of_n`].
#[derive(Debug, Clone)]
pub struct BestOfNReport {
    pub policy: BestOfNPolicy,
    pub outcome: BestOfNOutcome,
    pub results_txt: PathBuf,
    pub results_json: PathBuf,
    /// Checkpoint the selector was restored from, if any.
    pub checkpoint: Option<PathBuf>,
}

/// Loads the candidates, restores the latest checkpoint, selects one candidate per
/// sample and writes `test_results.txt` and `test_results.json` under `init.outdir`.
pub async fn select_best_of_n(
    init: &ExperimentConfig,
    gen_config: &ExperimentConfig,
    n: usize,
    limit: usize,
    progress: &dyn ProgressSink,
) -> TrainingResult<BestOfNReport> {
    let mut dataset = best_of_n_dataset(init, gen_config, n, true, progress).await?;
    dataset.truncate(limit);

    let spec = init.model.spec()?;
    let mut model = LanguageModelFactory::create(&spec, &init.model.backend_options())?;
    let checkpoint = load_latest_checkpoint(
        &mut model,
        Path::new(&init.federate.save_to),
        init.federate.total_round_num,
        init.federate.save_freq,
    )?
    .map(|(path, _)| path);

    let policy = BestOfNPolicy::from_config(init);
    info!(policy = ?policy, samples = dataset.len(), n, "Selecting best-of-n candidates");

    let mut rng = StdRng::seed_from_u64(init.seed);
    let outcome = run_policy(&policy, &mut model, &dataset, Some(&init.outdir), &mut rng, progress).await?;

    let results_txt = init.outdir.join("test_results.txt");
    write_results_file(&results_txt, &dataset, &outcome.selected)?;
    let results_json = init.outdir.join("test_results.json");
    write_json_cache(&results_json, &selected_samples(&dataset, &outcome.selected))?;
    info!(path = %results_txt.display(), "Wrote best-of-n results");

    Ok(BestOfNReport { policy, outcome, results_txt, results_json, checkpoint })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoopProgressSink;
    use fedrlhf_models::MockLanguageModel;

    fn sample(i: usize, n: usize) -> BestOfNSample {
        BestOfNSample {
            prompt: PromptRecord::from([
                ("subreddit", "cats"),
                ("title", format!("title {i}").as_str()),
                ("post", format!("post body {i}").as_str()),
                ("summary", "human"),
            ]),
            summaries: (0..n).map(|j| format!("candidate {i} {j}")).collect(),
            autoj_eval_results: None,
        }
    }

    #[test]
    fn test_policy_precedence() {
        let mut config = ExperimentConfig::default();
        assert_eq!(BestOfNPolicy::from_config(&config), BestOfNPolicy::Tournament);
        config.trainer.trainer_type = "llmpporewardtrainer".to_string();
        assert_eq!(BestOfNPolicy::from_config(&config), BestOfNPolicy::Reward);
        config.llm.adapter.count = 3;
        assert_eq!(BestOfNPolicy::from_config(&config), BestOfNPolicy::MultiAdapter);
        config.llm.adapter.local_only = true;
        config.federate.client_num = 3;
        assert_eq!(BestOfNPolicy::from_config(&config), BestOfNPolicy::Federated { client_num: 3 });
    }

    #[test]
    fn test_split_completions_strips_prompt() {
        let prompts = vec!["P1".to_string(), "P2".to_string()];
        let seqs: Vec<String> =
            ["P1 a</s>", "P1 b", "P2 c</s>", "P2 d"].iter().map(ToString::to_string).collect();
        let out = split_completions(&prompts, &seqs, 2).unwrap();
        assert_eq!(out, vec![vec!["a", "b"], vec!["c", "d"]]);
        assert!(split_completions(&prompts, &seqs[..3], 2).is_err());
    }

    #[test]
    fn test_format_rating() {
        assert_eq!(format_rating(7.0), "7.0");
        assert_eq!(format_rating(6.5), "6.5");
    }

    #[tokio::test]
    async fn test_generate_writes_transcript() {
        let records = vec![sample(0, 0).prompt, sample(1, 0).prompt];
        let mut model = MockLanguageModel::new("m");
        let mut transcript = Vec::new();

        let samples = generate_best_of_n_dataset(
            records,
            &mut model,
            &tldr_summary_template(),
            3,
            &mut transcript,
            &NoopProgressSink,
        )
        .await
        .unwrap();

        assert_eq!(samples.len(), 2);
        assert!(samples.iter().all(|s| s.summaries.len() == 3));
        let text = String::from_utf8(transcript).unwrap();
        assert!(text.starts_with("Post:\npost body 0\n\nHuman summary:\nhuman\n\nModel-generated summary 0:\n"));
        assert_eq!(text.matches(RECORD_SEPARATOR).count(), 2);
    }

    #[tokio::test]
    async fn test_tournament_single_candidate_selects_zero() {
        let samples: Vec<BestOfNSample> = (0..4).map(|i| sample(i, 1)).collect();
        let mut model = MockLanguageModel::new("m");
        let mut rng = StdRng::seed_from_u64(0);
        let best = tournament(
            &mut model,
            &samples,
            &tldr_comparison_template(),
            &SelectorMode::Single,
            &mut rng,
            &NoopProgressSink,
        )
        .await
        .unwrap();
        assert_eq!(best, vec![0; 4]);
    }

    #[tokio::test]
    async fn test_tournament_indices_in_range() {
        let samples: Vec<BestOfNSample> = (0..12).map(|i| sample(i, 5)).collect();
        let mut model = MockLanguageModel::new("m").with_adapters(["Client_1", "Client_2"]);
        let mut rng = StdRng::seed_from_u64(3);
        let best = best_of_n_multilora(&mut model, &samples, &tldr_comparison_template(), &mut rng, &NoopProgressSink)
            .await
            .unwrap();
        assert_eq!(best.len(), 12);
        assert!(best.iter().all(|b| *b < 5));
    }

    #[tokio::test]
    async fn test_reward_selection_follows_permutation() {
        let samples: Vec<BestOfNSample> = (0..6).map(|i| sample(i, 4)).collect();
        let mut model = MockLanguageModel::new("m");
        let template = tldr_summary_template();
        let best = best_of_n_by_reward(&mut model, &samples, &template).await.unwrap();
        assert!(best.iter().all(|b| *b < 4));

        let reversed: Vec<BestOfNSample> = samples
            .iter()
            .map(|s| {
                let mut s = s.clone();
                s.summaries.reverse();
                s
            })
            .collect();
        let best_rev = best_of_n_by_reward(&mut model, &reversed, &template).await.unwrap();
        for (a, b) in best.iter().zip(&best_rev) {
            assert_eq!(*b, 3 - a);
        }
    }

    #[tokio::test]
    async fn test_local_writes_client_files_and_votes() {
        let temp = tempfile::TempDir::new().unwrap();
        let samples: Vec<BestOfNSample> = (0..7).map(|i| sample(i, 3)).collect();
        let mut model = MockLanguageModel::new("m").with_adapters(["Client_1", "Client_2", "Client_3"]);
        let mut rng = StdRng::seed_from_u64(1);

        let outcome = best_of_n_local(
            &mut model,
            &samples,
            &tldr_comparison_template(),
            3,
            Some(temp.path()),
            &mut rng,
            &NoopProgressSink,
        )
        .await
        .unwrap();

        assert_eq!(outcome.per_client.len(), 3);
        assert_eq!(outcome.selected, column_majority(&outcome.per_client).unwrap());
        for k in 1..=3 {
            assert!(temp.path().join(format!("test_results_client_{k}.txt")).exists());
        }
    }

    #[tokio::test]
    async fn test_local_rejects_zero_clients() {
        let temp = tempfile::TempDir::new().unwrap();
        let samples: Vec<BestOfNSample> = (0..2).map(|i| sample(i, 3)).collect();
        let mut model = MockLanguageModel::new("m");
        let mut rng = StdRng::seed_from_u64(1);

        let result = best_of_n_local(
            &mut model,
            &samples,
            &tldr_comparison_template(),
            0,
            Some(temp.path()),
            &mut rng,
            &NoopProgressSink,
        )
        .await;

        assert!(matches!(result, Err(TrainingError::InvalidSpec(_))));
        assert!(std::fs::read_dir(temp.path()).unwrap().next().is_none());
    }

    #[test]
    fn test_print_results_with_verdicts() {
        let mut judged = sample(0, 2);
        judged.autoj_eval_results = Some(BTreeMap::from([(
            "1".to_string(),
            JudgeVerdict { comment: "fine".to_string(), rating: 6.0 },
        )]));
        let plain = sample(1, 2);

        let mut out = Vec::new();
        print_results(&mut out, &[judged, plain], &[1, 0]).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.starts_with("Subreddit: r/cats\n\nTitle:\ntitle 0\n\nPost:\npost body 0\n\n"));
        assert!(text.contains("Best generated summary [[1]]:\ncandidate 0 1\n\n"));
        assert!(text.contains("Auto-J Comment:\nfine\n\nAuto-J Rating: 6.0\n\n"));
        assert_eq!(text.matches(RECORD_SEPARATOR).count(), 2);
        assert!(text.ends_with("[6.0]\n\nAverage Auto-J Rating: 6.0\n\n"));
    }

    #[test]
    fn test_selected_samples_drop_summaries() {
        let samples = vec![sample(0, 3)];
        let json = serde_json::to_value(selected_samples(&samples, &[2])).unwrap();
        assert_eq!(json[0]["select_index"], "2");
        assert_eq!(json[0]["select_summary"], "candidate 0 2");
        assert!(json[0].get("summaries").is_none());
        assert_eq!(json[0]["title"], "title 0");
    }
}
