use crate::error::{TrainingError, TrainingResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Stable identifier for a dataset (content hash).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatasetId(pub String);

/// A raw prompt record: context fields such as `subreddit`, `title`, `post` or `history`.
///
/// Immutable once loaded; later stages copy it and add their own fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PromptRecord(pub Map<String, Value>);

impl PromptRecord {
    /// String value of `field`, if present and a string.
    #[must_use]
    pub fn text(&self, field: &str) -> Option<&str> {
        self.0.get(field).and_then(Value::as_str)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(field.into(), value.into());
    }

    /// String value of `field`, or an error naming the missing field.
    pub fn require(&self, field: &str) -> TrainingResult<&str> {
        self.text(field)
            .ok_or_else(|| TrainingError::Dataset(format!("record has no text field '{field}'")))
    }
}

impl<const N: usize> From<[(&str, &str); N]> for PromptRecord {
    fn from(fields: [(&str, &str); N]) -> Self {
        Self(
            fields
                .into_iter()
                .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
                .collect(),
        )
    }
}

/// A prompt record plus two candidate completions and, once labeled, the preferred side.
///
/// `choice == Some(0)` means `output_A` is preferred.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairwiseSample {
    #[serde(flatten)]
    pub prompt: PromptRecord,
    #[serde(rename = "output_A")]
    pub output_a: String,
    #[serde(rename = "output_B")]
    pub output_b: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub choice: Option<u8>,
}

impl PairwiseSample {
    #[must_use]
    pub fn new(prompt: PromptRecord, output_a: String, output_b: String) -> Self {
        Self { prompt, output_a, output_b, choice: None }
    }

    /// `(chosen, rejected)` according to `choice`, or `None` when unlabeled.
    #[must_use]
    pub fn ordered(&self) -> Option<(&str, &str)> {
        match self.choice? {
            0 => Some((&self.output_a, &self.output_b)),
            _ => Some((&self.output_b, &self.output_a)),
        }
    }
}

/// One judge verdict stored with a best-of-N candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeVerdict {
    pub comment: String,
    pub rating: f64,
}

/// A prompt record plus N candidate completions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestOfNSample {
    #[serde(flatten)]
    pub prompt: PromptRecord,
    pub summaries: Vec<String>,
    /// Judge verdicts keyed by the candidate index as a string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autoj_eval_results: Option<BTreeMap<String, JudgeVerdict>>,
}

impl BestOfNSample {
    /// Judge verdict for candidate `idx`, if rated.
    #[must_use]
    pub fn verdict(&self, idx: usize) -> Option<&JudgeVerdict> {
        self.autoj_eval_results.as_ref()?.get(&idx.to_string())
    }
}

/// Checks that every sample carries exactly `n` candidates.
pub fn validate_best_of_n(samples: &[BestOfNSample], n: usize) -> TrainingResult<()> {
    if n == 0 {
        return Err(TrainingError::Dataset("best-of-n needs at least one candidate".to_string()));
    }
    for (idx, sample) in samples.iter().enumerate() {
        if sample.summaries.len() != n {
            return Err(TrainingError::Dataset(format!(
                "sample[{idx}] has {} candidates, expected {n}",
                sample.summaries.len()
            )));
        }
    }
    Ok(())
}

/// Content hash over the JSON encoding of `items`, one line each.
pub fn compute_dataset_id<T: Serialize>(items: &[T]) -> TrainingResult<DatasetId> {
    let mut hasher = Sha256::new();

    for item in items {
        let bytes = serde_json::to_vec(item)?;
        hasher.update(bytes);
        hasher.update(b"\n");
    }

    Ok(DatasetId(hex::encode(hasher.finalize())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> PromptRecord {
        PromptRecord::from([("subreddit", "cats"), ("title", "t"), ("post", "p")])
    }

    #[test]
    fn test_pairwise_sample_json_layout() {
        let mut sample = PairwiseSample::new(record(), "a".to_string(), "b".to_string());
        let json = serde_json::to_value(&sample).unwrap();
        assert_eq!(json["output_A"], "a");
        assert_eq!(json["subreddit"], "cats");
        assert!(json.get("choice").is_none());

        sample.choice = Some(1);
        let json = serde_json::to_value(&sample).unwrap();
        assert_eq!(json["choice"], 1);
        assert_eq!(sample.ordered(), Some(("b", "a")));
    }

    #[test]
    fn test_validate_best_of_n_counts() {
        let sample = BestOfNSample {
            prompt: record(),
            summaries: vec!["x".to_string(), "y".to_string()],
            autoj_eval_results: None,
        };
        assert!(validate_best_of_n(std::slice::from_ref(&sample), 2).is_ok());
        assert!(validate_best_of_n(&[sample], 3).is_err());
    }

    #[test]
    fn test_compute_dataset_id_stable_for_same_content() {
        let samples = vec![PairwiseSample::new(record(), "a".to_string(), "b".to_string())];
        let id1 = compute_dataset_id(&samples).unwrap();
        let id2 = compute_dataset_id(&samples).unwrap();
        assert_eq!(id1, id2);
        assert_eq!(id1.0.len(), 64);
    }
}
