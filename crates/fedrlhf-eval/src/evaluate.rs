//! Judge-backed evaluations over transcripts and best-of-N datasets.

use crate::error::{EvalError, EvalResult};
use crate::extract::PairwiseDecision;
use crate::judge::AutoJudge;
use crate::transcript::{TranscriptRecord, read_transcript};
use fedrlhf_training::best_of_n::format_rating;
use fedrlhf_training::builders::{read_json_cache, write_json_cache};
use fedrlhf_training::layout::with_suffix;
use fedrlhf_training::{BestOfNSample, JudgeVerdict, column_majority};
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::info;
use walkdir::WalkDir;

const RECORD_SEPARATOR: &str = "==========================\n\n";

#[derive(Debug, Clone, PartialEq)]
pub struct RatingSummary {
    pub ratings: Vec<f64>,
    /// Mean rating; 0 without records.
    pub average: f64,
    pub output: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WinRateSummary {
    pub choices: Vec<i8>,
    pub win: usize,
    pub lose: usize,
    pub tie: usize,
    /// Percentage of wins among win, lose and tie decisions; unparsed ones (`-1`) are left
    /// out. 0 without decisions.
    pub rate: f64,
    pub output: PathBuf,
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() { 0.0 } else { values.iter().sum::<f64>() / values.len() as f64 }
}

fn rating_list(ratings: &[f64]) -> String {
    let items: Vec<String> = ratings.iter().map(|r| format_rating(*r)).collect();
    format!("[{}]", items.join(", "))
}

fn record_header(out: &mut String, record: &TranscriptRecord) {
    let _ = write!(
        out,
        "Subreddit: {}\n\nTitle:\n{}\n\nPost:\n{}\n\nBest generated summary:\n{}\n\n",
        record.subreddit, record.title, record.post, record.response
    );
}

async fn rate_records(judge: &AutoJudge, records: &[TranscriptRecord], output: PathBuf) -> EvalResult<RatingSummary> {
    let items: Vec<(String, String)> = records.iter().map(|r| (r.query.clone(), r.response.clone())).collect();
    let judgements = judge.rate(&items).await?;

    let mut out = String::new();
    for (record, judgement) in records.iter().zip(&judgements) {
        record_header(&mut out, record);
        let _ = write!(
            out,
            "Auto-J Comment:\n{}\n\nAuto-J Rating: {}\n\n{RECORD_SEPARATOR}",
            judgement.comment,
            format_rating(judgement.verdict)
        );
    }

    let ratings: Vec<f64> = judgements.iter().map(|j| j.verdict).collect();
    let average = mean(&ratings);
    let _ = write!(out, "{}\n\nAverage Auto-J Rating: {}\n\n", rating_list(&ratings), format_rating(average));
    std::fs::write(&output, out)?;

    info!(path = %output.display(), records = ratings.len(), average, "Wrote Auto-J ratings");
    Ok(RatingSummary { ratings, average, output })
}

/// Rates the selected response of every record in `file`; writes `{file}_autoj_eval.txt`.
pub async fn evaluate_ratings(judge: &AutoJudge, file: &Path) -> EvalResult<RatingSummary> {
    let report = read_transcript(file)?;
    rate_records(judge, &report.records, with_suffix(file, "_autoj_eval.txt")).await
}

/// Judges the generated response against the human one for every record in `file`;
/// writes `{file}_autoj_eval_win.txt`.
pub async fn evaluate_win_rate(judge: &AutoJudge, file: &Path) -> EvalResult<WinRateSummary> {
    let records = read_transcript(file)?.records;
    let items: Vec<(String, String, String)> = records
        .iter()
        .map(|r| (r.query.clone(), r.response.clone(), r.response_another.clone()))
        .collect();
    let judgements = judge.compare(&items).await?;

    let mut out = String::new();
    for (record, judgement) in records.iter().zip(&judgements) {
        record_header(&mut out, record);
        let _ = write!(
            out,
            "Human summary:\n{}\n\nAuto-J Comment:\n{}\n\nAuto-J Selection: {}\n\n{RECORD_SEPARATOR}",
            record.response_another,
            judgement.comment,
            judgement.verdict.code()
        );
    }

    let choices: Vec<i8> = judgements.iter().map(|j| j.verdict.code()).collect();
    let count = |d: PairwiseDecision| judgements.iter().filter(|j| j.verdict == d).count();
    let (win, lose, tie) = (count(PairwiseDecision::Response1), count(PairwiseDecision::Response2), count(PairwiseDecision::Tie));
    let decided = win + lose + tie;
    let rate = if decided == 0 { 0.0 } else { win as f64 / decided as f64 * 100.0 };

    let listed: Vec<String> = choices.iter().map(ToString::to_string).collect();
    let _ = write!(
        out,
        "[{}]\n\nWin Rate (win/lose/tie): {}% ({win}/{lose}/{tie})\n\n",
        listed.join(", "),
        format_rating(rate)
    );

    let output = with_suffix(file, "_autoj_eval_win.txt");
    std::fs::write(&output, out)?;
    info!(path = %output.display(), win, lose, tie, rate, "Wrote Auto-J win rate");
    Ok(WinRateSummary { choices, win, lose, tie, rate, output })
}

/// Majority-votes the clients' picks per record and rates the winning responses;
/// writes `selected_autoj_eval.txt` in `dir`.
pub async fn evaluate_clients(judge: &AutoJudge, dir: &Path, clients: &[u32]) -> EvalResult<RatingSummary> {
    if clients.is_empty() {
        return Err(EvalError::InvalidInput("at least one client is required".to_string()));
    }

    let mut datasets = Vec::with_capacity(clients.len());
    for client in clients {
        let path = dir.join(format!("test_results_client_{client}.txt"));
        if !path.exists() {
            return Err(EvalError::missing(&path, "run best-of-n selection with local adapters first"));
        }
        datasets.push(read_transcript(&path)?.records);
    }

    let votes: Vec<Vec<usize>> = datasets.iter().map(|d| d.iter().map(|r| r.choice).collect()).collect();
    let majority = column_majority(&votes)?;

    let mut best: Vec<Option<TranscriptRecord>> = vec![None; majority.len()];
    for dataset in &datasets {
        for (idx, record) in dataset.iter().enumerate() {
            if record.choice == majority[idx] {
                best[idx] = Some(record.clone());
            }
        }
    }
    let best: Vec<TranscriptRecord> = best.into_iter().flatten().collect();

    rate_records(judge, &best, dir.join("selected_autoj_eval.txt")).await
}

/// Runs the win-rate evaluation for every `*_summarization.txt` under `dir` that has no
/// `_autoj_eval_win.txt` next to it yet.
pub async fn scan_directory(judge: &AutoJudge, dir: &Path) -> EvalResult<Vec<WinRateSummary>> {
    let mut pending = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry?;
        let path = entry.path();
        let is_transcript = entry.file_type().is_file()
            && path.file_name().is_some_and(|n| n.to_string_lossy().ends_with("_summarization.txt"));
        if is_transcript && !with_suffix(path, "_autoj_eval_win.txt").exists() {
            pending.push(path.to_path_buf());
        }
    }

    let mut summaries = Vec::with_capacity(pending.len());
    for path in pending {
        info!(path = %path.display(), "Running win-rate evaluation");
        summaries.push(evaluate_win_rate(judge, &path).await?);
    }
    Ok(summaries)
}

/// Rates every candidate of a best-of-N cache and writes the judged copy
/// (`{cache}_autoj_eval.json`) plus raw `_comments.txt` and `_ratings.txt` dumps.
///
/// Samples are keyed by title; a later sample with the same title replaces the earlier
/// one and both contribute verdicts.
pub async fn rate_best_of_n_dataset(judge: &AutoJudge, cache: &Path) -> EvalResult<PathBuf> {
    let samples: Vec<BestOfNSample> = read_json_cache(cache)?
        .ok_or_else(|| EvalError::missing(cache, "Create the best_of_n dataset first"))?;

    let mut items = Vec::new();
    let mut keys = Vec::new();
    for sample in &samples {
        let title = sample.prompt.text("title").unwrap_or_default();
        let post = sample.prompt.text("post").unwrap_or_default();
        let query = format!("Summarize the following post\n\nTitle: {title}\n\nPost: {post}");
        for (idx, summary) in sample.summaries.iter().enumerate() {
            items.push((query.clone(), summary.clone()));
            keys.push((title.to_string(), idx));
        }
    }

    let judgements = judge.rate(&items).await?;
    let comments: Vec<&str> = judgements.iter().map(|j| j.comment.as_str()).collect();
    let ratings: Vec<f64> = judgements.iter().map(|j| j.verdict).collect();
    std::fs::write(with_suffix(cache, "_comments.txt"), serde_json::to_string(&comments)?)?;
    std::fs::write(with_suffix(cache, "_ratings.txt"), rating_list(&ratings))?;

    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut entries: Vec<BestOfNSample> = Vec::new();
    for sample in samples {
        let title = sample.prompt.text("title").unwrap_or_default().to_string();
        match positions.get(&title) {
            Some(&pos) => entries[pos] = sample,
            None => {
                positions.insert(title, entries.len());
                entries.push(sample);
            }
        }
    }

    for ((title, idx), judgement) in keys.into_iter().zip(judgements) {
        if let Some(&pos) = positions.get(&title) {
            entries[pos]
                .autoj_eval_results
                .get_or_insert_with(BTreeMap::new)
                .insert(idx.to_string(), JudgeVerdict { comment: judgement.comment, rating: judgement.verdict });
        }
    }

    let output = with_suffix(cache, "_autoj_eval.json");
    write_json_cache(&output, &entries)?;
    info!(path = %output.display(), samples = entries.len(), "Wrote judged best-of-n dataset");
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fedrlhf_models::MockModel;
    use fedrlhf_training::PromptRecord;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn judge() -> AutoJudge {
        AutoJudge::new(Arc::new(MockModel::new("autoj".to_string())), 1024)
    }

    fn results_file(choices: &[usize]) -> String {
        choices
            .iter()
            .enumerate()
            .map(|(i, c)| {
                format!(
                    "Subreddit: r/s\n\nTitle:\nt{i}\n\nPost:\np{i}\n\nBest generated summary [[{c}]]:\n summary {c} of {i}\n\n{RECORD_SEPARATOR}"
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn test_evaluate_ratings_writes_average() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("test_results.txt");
        std::fs::write(&file, results_file(&[0, 2, 1])).unwrap();

        let summary = evaluate_ratings(&judge(), &file).await.unwrap();
        assert_eq!(summary.ratings.len(), 3);
        assert_eq!(summary.output, temp.path().join("test_results.txt_autoj_eval.txt"));

        let text = std::fs::read_to_string(&summary.output).unwrap();
        assert_eq!(text.matches(RECORD_SEPARATOR).count(), 3);
        assert!(text.contains("Average Auto-J Rating: "));
        assert!(text.starts_with("Subreddit: r/s\n\nTitle:\nt0\n\n"));
    }

    #[tokio::test]
    async fn test_win_rate_counts_decisions() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("gpt_summarization.txt");
        let text: String = (0..4)
            .map(|i| {
                format!(
                    "Post:\npost {i}\n\nHuman summary:\nhuman {i}\n\nModel-generated summary 0:\nmodel words {}\n\n{RECORD_SEPARATOR}",
                    "x ".repeat(i)
                )
            })
            .collect();
        std::fs::write(&file, text).unwrap();

        let summary = evaluate_win_rate(&judge(), &file).await.unwrap();
        assert_eq!(summary.choices.len(), 4);
        assert_eq!(summary.win + summary.lose + summary.tie, 4);
        assert!((summary.rate - summary.win as f64 * 25.0).abs() < 1e-9);
        let out = std::fs::read_to_string(&summary.output).unwrap();
        assert!(out.contains("Win Rate (win/lose/tie): "));
    }

    /// Decides only for the first record and gives no verdict otherwise.
    struct FirstOnlyJudge;

    #[async_trait::async_trait]
    impl fedrlhf_abstraction::Model for FirstOnlyJudge {
        async fn generate_text(
            &self,
            prompt: &str,
            _parameters: Option<fedrlhf_abstraction::ModelParameters>,
        ) -> Result<fedrlhf_abstraction::ModelResponse, fedrlhf_abstraction::ModelError> {
            let content = if prompt.contains("human 0") {
                "So, the final decision is Response 1"
            } else {
                "Both are fine."
            };
            Ok(fedrlhf_abstraction::ModelResponse { content: content.to_string(), model_id: None, usage: None })
        }

        async fn generate_chat_completion(
            &self,
            _messages: &[fedrlhf_abstraction::ChatMessage],
            _parameters: Option<fedrlhf_abstraction::ModelParameters>,
        ) -> Result<fedrlhf_abstraction::ModelResponse, fedrlhf_abstraction::ModelError> {
            Err(fedrlhf_abstraction::ModelError::UnsupportedSource("chat".to_string()))
        }

        fn model_id(&self) -> &str {
            "first-only"
        }
    }

    #[tokio::test]
    async fn test_win_rate_leaves_out_undecided() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("gpt_summarization.txt");
        let text: String = (0..4)
            .map(|i| {
                format!(
                    "Post:\npost {i}\n\nHuman summary:\nhuman {i}\n\nModel-generated summary 0:\nmodel {i}\n\n{RECORD_SEPARATOR}"
                )
            })
            .collect();
        std::fs::write(&file, text).unwrap();

        let judge = AutoJudge::new(Arc::new(FirstOnlyJudge), 1024);
        let summary = evaluate_win_rate(&judge, &file).await.unwrap();
        assert_eq!(summary.choices, vec![0, -1, -1, -1]);
        assert_eq!((summary.win, summary.lose, summary.tie), (1, 0, 0));
        assert!((summary.rate - 100.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_scan_skips_evaluated_transcripts() {
        let temp = TempDir::new().unwrap();
        let nested = temp.path().join("run");
        std::fs::create_dir_all(&nested).unwrap();
        let body = format!("Post:\np\n\nHuman summary:\nh\n\nModel-generated summary 0:\nm\n\n{RECORD_SEPARATOR}");
        std::fs::write(nested.join("a_summarization.txt"), &body).unwrap();
        std::fs::write(temp.path().join("b_summarization.txt"), &body).unwrap();
        std::fs::write(temp.path().join("b_summarization.txt_autoj_eval_win.txt"), "done").unwrap();

        let summaries = scan_directory(&judge(), temp.path()).await.unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].output, nested.join("a_summarization.txt_autoj_eval_win.txt"));
    }

    #[tokio::test]
    async fn test_clients_majority_selection() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("test_results_client_1.txt"), results_file(&[0, 2])).unwrap();
        std::fs::write(temp.path().join("test_results_client_2.txt"), results_file(&[1, 2])).unwrap();
        std::fs::write(temp.path().join("test_results_client_3.txt"), results_file(&[1, 0])).unwrap();

        let summary = evaluate_clients(&judge(), temp.path(), &[1, 2, 3]).await.unwrap();
        assert_eq!(summary.ratings.len(), 2);
        let text = std::fs::read_to_string(temp.path().join("selected_autoj_eval.txt")).unwrap();
        assert!(text.contains("Best generated summary:\n summary 1 of 0\n\n"));
        assert!(text.contains("Best generated summary:\n summary 2 of 1\n\n"));

        assert!(matches!(
            evaluate_clients(&judge(), temp.path(), &[4]).await,
            Err(EvalError::MissingArtifact { .. })
        ));
    }

    #[tokio::test]
    async fn test_rate_best_of_n_dataset() {
        let temp = TempDir::new().unwrap();
        let cache = temp.path().join("reddit-tldr_test_2-gen_gpt.json");
        let samples: Vec<BestOfNSample> = (0..2)
            .map(|i| BestOfNSample {
                prompt: PromptRecord::from([("title", format!("t{i}").as_str()), ("post", "p")]),
                summaries: vec!["one".to_string(), "two words".to_string()],
                autoj_eval_results: None,
            })
            .collect();
        write_json_cache(&cache, &samples).unwrap();

        let output = rate_best_of_n_dataset(&judge(), &cache).await.unwrap();
        let judged: Vec<BestOfNSample> = read_json_cache(&output).unwrap().unwrap();
        assert_eq!(judged.len(), 2);
        assert!(judged.iter().all(|s| s.verdict(0).is_some() && s.verdict(1).is_some()));
        assert!(with_suffix(&cache, "_ratings.txt").exists());
        assert!(with_suffix(&cache, "_comments.txt").exists());

        let missing = temp.path().join("none.json");
        assert!(matches!(
            rate_best_of_n_dataset(&judge(), &missing).await,
            Err(EvalError::MissingArtifact { .. })
        ));
    }
}
