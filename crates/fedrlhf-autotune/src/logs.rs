//! HPO log parsing and best-seen curves.
//!
//! Trial lines look like
//! `2023-05-01 10:00:00 (hpo:120) INFO: {'federate.total_round_num': 10, ...} performance 0.53`.

use crate::config::{Configuration, parse_python_dict};
use crate::error::{AutotuneError, AutotuneResult};
use crate::summary::HpoTrial;
use std::path::Path;
use tracing::{debug, info};

/// Config key holding the budget spent by a trial.
pub const BUDGET_KEY: &str = "federate.total_round_num";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedLine {
    /// 1-based line number.
    pub line: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogParseReport {
    pub history: Vec<HpoTrial>,
    pub malformed: Vec<MalformedLine>,
}

/// Parses one trial line.
pub fn parse_log_line(line: &str) -> Result<HpoTrial, String> {
    let (_, rest) = line.split_once("INFO: ").ok_or("no 'INFO: ' marker")?;
    if rest.contains("INFO: ") {
        return Err("more than one 'INFO: ' marker".to_string());
    }

    let open = rest.find('{').ok_or("no configuration")?;
    let close = rest.find('}').filter(|c| *c > open).ok_or("unterminated configuration")?;
    let config: Configuration = parse_python_dict(&rest[open..=close])?;

    let at = rest.find("performance").ok_or("no performance")?;
    let token = rest[at..].split(' ').nth(1).ok_or("no performance value")?;
    let performance = token.trim().parse::<f64>().map_err(|_| format!("bad performance '{}'", token.trim()))?;

    Ok(HpoTrial { config, performance })
}

/// Parses every non-blank line; lines that are not trial records are collected as malformed.
#[must_use]
pub fn parse_log(text: &str) -> LogParseReport {
    let mut report = LogParseReport::default();
    for (idx, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match parse_log_line(line) {
            Ok(trial) => {
                debug!(performance = trial.performance, "Parsed trial");
                report.history.push(trial);
            }
            Err(reason) => report.malformed.push(MalformedLine { line: idx + 1, reason }),
        }
    }
    report
}

pub fn parse_log_file(path: &Path) -> AutotuneResult<LogParseReport> {
    let text = std::fs::read_to_string(path)?;
    let report = parse_log(&text);
    info!(
        path = %path.display(),
        trials = report.history.len(),
        malformed = report.malformed.len(),
        "Parsed HPO log"
    );
    Ok(report)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CurvePoint {
    /// Cumulative budget over the total budget.
    pub budget_fraction: f64,
    pub best_seen: f64,
}

/// Best performance seen so far against the fraction of budget spent.
///
/// A trial run with a larger budget than the one before it resets the best-seen value,
/// since results at different fidelities are not comparable.
pub fn best_seen_curve(history: &[HpoTrial]) -> AutotuneResult<Vec<CurvePoint>> {
    let mut best_seen = f64::INFINITY;
    let mut total = 0.0;
    let mut previous = 0.0;
    let mut raw = Vec::with_capacity(history.len());

    for (idx, trial) in history.iter().enumerate() {
        let budget = trial
            .config
            .get(BUDGET_KEY)
            .and_then(|v| v.as_f64())
            .ok_or_else(|| AutotuneError::InvalidInput(format!("trial {idx} has no numeric '{BUDGET_KEY}'")))?;
        total += budget;
        if trial.performance < best_seen || budget > previous {
            best_seen = trial.performance;
        }
        raw.push((total, best_seen));
        previous = budget;
    }

    if total <= 0.0 {
        return Ok(raw.into_iter().map(|(_, best_seen)| CurvePoint { budget_fraction: 0.0, best_seen }).collect());
    }
    Ok(raw
        .into_iter()
        .map(|(spent, best_seen)| CurvePoint { budget_fraction: spent / total, best_seen })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ParamValue;

    const LOG: &str = "\
2023-05-01 10:00:00 (hpo:120) INFO: {'federate.total_round_num': 10, 'lr': 0.1} performance 0.8
2023-05-01 10:01:00 (hpo:120) INFO: {'federate.total_round_num': 10, 'lr': 0.2} performance 0.9
some unrelated output

2023-05-01 10:02:00 (hpo:120) INFO: {'federate.total_round_num': 20, 'lr': 0.2} performance 0.95
2023-05-01 10:03:00 (hpo:120) INFO: {'federate.total_round_num': 20, 'lr': 0.3} performance oops
2023-05-01 10:04:00 (hpo:120) INFO: {'federate.total_round_num': 20, 'lr': 0.4} performance 0.5
";

    #[test]
    fn test_parse_log_collects_malformed_lines() {
        let report = parse_log(LOG);
        assert_eq!(report.history.len(), 4);
        assert_eq!(report.malformed.len(), 2);
        assert_eq!(report.malformed[0].line, 3);
        assert!(report.malformed[1].reason.contains("oops"));
        assert_eq!(report.history[0].config["lr"], ParamValue::Float(0.1));
    }

    #[test]
    fn test_best_seen_curve() {
        let report = parse_log(LOG);
        let curve = best_seen_curve(&report.history).unwrap();
        let best: Vec<f64> = curve.iter().map(|p| p.best_seen).collect();
        // the first 20-round trial resets the best-seen value
        assert_eq!(best, vec![0.8, 0.8, 0.95, 0.5]);
        let fractions: Vec<f64> = curve.iter().map(|p| p.budget_fraction).collect();
        assert_eq!(fractions, vec![10.0 / 60.0, 20.0 / 60.0, 40.0 / 60.0, 1.0]);
    }

    #[test]
    fn test_curve_requires_budget() {
        let trial = parse_log_line("x INFO: {'lr': 0.1} performance 0.3").unwrap();
        assert!(best_seen_curve(&[trial]).is_err());
        assert!(best_seen_curve(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_parse_log_file() {
        let temp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(temp.path(), LOG).unwrap();
        let report = parse_log_file(temp.path()).unwrap();
        assert_eq!(report.history.len(), 4);
    }
}
