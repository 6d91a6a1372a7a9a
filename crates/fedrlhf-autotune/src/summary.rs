//! Tabular summaries of finished trials.

use crate::config::{Configuration, ParamValue};
use crate::error::{AutotuneError, AutotuneResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const PERFORMANCE_COLUMN: &str = "performance";

/// One evaluated configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HpoTrial {
    pub config: Configuration,
    pub performance: f64,
}

/// Reads a JSON array of `{"config": {...}, "performance": x}` objects.
pub fn read_trials(path: &Path) -> AutotuneResult<Vec<HpoTrial>> {
    let bytes = std::fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[derive(Debug, Clone, PartialEq)]
pub struct SummaryRow {
    /// One cell per non-performance column; `None` where the trial lacks the key.
    pub values: Vec<Option<ParamValue>>,
    pub performance: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HpoSummary {
    /// Column names, `performance` last.
    pub columns: Vec<String>,
    pub rows: Vec<SummaryRow>,
}

/// Tabulates trials sorted by performance, ascending unless `desc`.
///
/// Columns are `white_list` when given, otherwise the keys of the first configuration.
pub fn summarize_hpo_results(
    configs: &[Configuration],
    perfs: &[f64],
    white_list: Option<&[String]>,
    desc: bool,
) -> AutotuneResult<HpoSummary> {
    if configs.len() != perfs.len() {
        return Err(AutotuneError::InvalidInput(format!(
            "{} configurations but {} performances",
            configs.len(),
            perfs.len()
        )));
    }

    let keys: Vec<String> = match white_list {
        Some(list) => list.to_vec(),
        None => configs.first().map(|c| c.keys().cloned().collect()).unwrap_or_default(),
    };

    let mut rows: Vec<SummaryRow> = configs
        .iter()
        .zip(perfs)
        .map(|(config, perf)| SummaryRow {
            values: keys.iter().map(|k| config.get(k).cloned()).collect(),
            performance: *perf,
        })
        .collect();
    rows.sort_by(|a, b| {
        let ord = a.performance.total_cmp(&b.performance);
        if desc { ord.reverse() } else { ord }
    });

    let mut columns = keys;
    columns.push(PERFORMANCE_COLUMN.to_string());
    Ok(HpoSummary { columns, rows })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configs() -> Vec<Configuration> {
        vec![
            Configuration::from([("lr".to_string(), ParamValue::Float(0.1)), ("bs".to_string(), ParamValue::Int(8))]),
            Configuration::from([("lr".to_string(), ParamValue::Float(0.01)), ("bs".to_string(), ParamValue::Int(16))]),
            Configuration::from([("lr".to_string(), ParamValue::Float(0.5))]),
        ]
    }

    #[test]
    fn test_sorted_ascending_by_default() {
        let summary = summarize_hpo_results(&configs(), &[0.3, 0.1, 0.2], None, false).unwrap();
        assert_eq!(summary.columns, vec!["bs", "lr", "performance"]);
        let perfs: Vec<f64> = summary.rows.iter().map(|r| r.performance).collect();
        assert_eq!(perfs, vec![0.1, 0.2, 0.3]);
        assert_eq!(summary.rows[1].values, vec![None, Some(ParamValue::Float(0.5))]);
    }

    #[test]
    fn test_white_list_and_desc() {
        let white = vec!["lr".to_string()];
        let summary = summarize_hpo_results(&configs(), &[0.3, 0.1, 0.2], Some(&white), true).unwrap();
        assert_eq!(summary.columns, vec!["lr", "performance"]);
        assert_eq!(summary.rows[0].values, vec![Some(ParamValue::Float(0.1))]);
        assert!((summary.rows[2].performance - 0.1).abs() < f64::EPSILON);
    }

    #[test]
    fn test_length_mismatch() {
        assert!(summarize_hpo_results(&configs(), &[0.1], None, false).is_err());
        let empty = summarize_hpo_results(&[], &[], None, false).unwrap();
        assert_eq!(empty.columns, vec!["performance"]);
    }

    #[test]
    fn test_read_trials() {
        let temp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(temp.path(), r#"[{"config": {"lr": 0.1, "type": "gcn"}, "performance": 0.4}]"#).unwrap();
        let trials = read_trials(temp.path()).unwrap();
        assert_eq!(trials[0].config["type"], ParamValue::from("gcn"));
        assert!((trials[0].performance - 0.4).abs() < f64::EPSILON);
    }
}
