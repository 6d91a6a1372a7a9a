use crate::dataset::PromptRecord;
use crate::error::{TrainingError, TrainingResult};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::path::Path;
use tracing::debug;

/// Reads a JSONL file into prompt records.
///
/// `fields` maps each target key to the source key it is read from. An empty mapping
/// keeps every source field as is. Records missing a mapped source key get an empty
/// string for it.
pub fn load_jsonl(path: &Path, fields: &[(&str, &str)]) -> TrainingResult<Vec<PromptRecord>> {
    if !path.exists() {
        return Err(TrainingError::missing(path, "prompt file not found; download or create it first"));
    }
    let contents = std::fs::read_to_string(path)?;
    let mut records = Vec::new();

    for (idx, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let raw: serde_json::Map<String, Value> = serde_json::from_str(line).map_err(|e| {
            TrainingError::Dataset(format!("failed to parse jsonl line {}: {}", idx + 1, e))
        })?;

        if fields.is_empty() {
            records.push(PromptRecord(raw));
            continue;
        }

        let mut record = PromptRecord::default();
        for (target, source) in fields {
            let value = raw.get(*source).cloned().unwrap_or_else(|| Value::String(String::new()));
            record.insert(*target, value);
        }
        records.push(record);
    }

    debug!(path = %path.display(), records = records.len(), "Loaded jsonl records");
    Ok(records)
}

/// Reads a JSON array cache, or `None` when the file does not exist.
pub fn read_json_cache<T: DeserializeOwned>(path: &Path) -> TrainingResult<Option<Vec<T>>> {
    if !path.exists() {
        return Ok(None);
    }
    let bytes = std::fs::read(path)?;
    Ok(Some(serde_json::from_slice(&bytes)?))
}

/// Writes `items` as a flat JSON array.
///
/// The file is written whole; there is no locking against concurrent writers.
pub fn write_json_cache<T: Serialize>(path: &Path, items: &[T]) -> TrainingResult<()> {
    ensure_parent(path)?;
    std::fs::write(path, serde_json::to_vec(items)?)?;
    Ok(())
}

pub(crate) fn ensure_parent(path: &Path) -> TrainingResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::PairwiseSample;
    use tempfile::TempDir;

    #[test]
    fn test_load_jsonl_with_field_mapping() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("test.jsonl");
        std::fs::write(
            &path,
            "{\"subreddit\":\"cats\",\"title\":\"t1\",\"post\":\"p1\",\"summary\":\"s1\",\"id\":1}\n\n{\"subreddit\":\"dogs\",\"title\":\"t2\",\"post\":\"p2\"}\n",
        )
        .unwrap();

        let records = load_jsonl(&path, &[("title", "title"), ("tldr", "summary")]).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].text("tldr"), Some("s1"));
        assert!(records[0].text("subreddit").is_none());
        assert_eq!(records[1].text("tldr"), Some(""));
    }

    #[test]
    fn test_load_jsonl_missing_file_is_missing_artifact() {
        let temp = TempDir::new().unwrap();
        let err = load_jsonl(&temp.path().join("none.jsonl"), &[]).unwrap_err();
        assert!(matches!(err, TrainingError::MissingArtifact { .. }));
    }

    #[test]
    fn test_json_cache_round_trip_preserves_order() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("cache.json");
        let samples: Vec<PairwiseSample> = (0..5)
            .map(|i| {
                PairwiseSample::new(
                    PromptRecord::from([("post", format!("post {i}").as_str())]),
                    format!("a{i}"),
                    format!("b{i}"),
                )
            })
            .collect();

        assert!(read_json_cache::<PairwiseSample>(&path).unwrap().is_none());
        write_json_cache(&path, &samples).unwrap();
        let loaded: Vec<PairwiseSample> = read_json_cache(&path).unwrap().unwrap();
        assert_eq!(loaded, samples);
    }
}
