//! Parser for the plain-text result transcripts.
//!
//! Lines are matched against field tags in a fixed order; a matching line switches the
//! current field, every other line is appended to it. A line containing `=============`
//! closes the record.

use crate::error::EvalResult;
use std::path::Path;
use tracing::{info, warn};

const SEPARATOR: &str = "=============";

/// One record recovered from a transcript.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TranscriptRecord {
    pub subreddit: String,
    pub title: String,
    pub post: String,
    pub response: String,
    pub response_another: String,
    pub score: String,
    pub selector_choice: String,
    /// Index from a `generated summary [[k]]` header; 0 when absent.
    pub choice: usize,
    /// `"Summarize the following post\n\nTitle: {title}\n\nPost: {post}"`.
    pub query: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptIssue {
    /// 1-based line number.
    pub line: usize,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TranscriptReport {
    pub records: Vec<TranscriptRecord>,
    pub issues: Vec<TranscriptIssue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Subreddit,
    Title,
    Post,
    Response,
    ResponseAnother,
    Score,
    SelectorChoice,
}

impl TranscriptRecord {
    fn field_mut(&mut self, field: Field) -> &mut String {
        match field {
            Field::Subreddit => &mut self.subreddit,
            Field::Title => &mut self.title,
            Field::Post => &mut self.post,
            Field::Response => &mut self.response,
            Field::ResponseAnother => &mut self.response_another,
            Field::Score => &mut self.score,
            Field::SelectorChoice => &mut self.selector_choice,
        }
    }

    fn finish(mut self) -> Self {
        for field in [
            Field::Subreddit,
            Field::Title,
            Field::Post,
            Field::Response,
            Field::ResponseAnother,
            Field::Score,
            Field::SelectorChoice,
        ] {
            let value = self.field_mut(field);
            if value.ends_with("\n\n") {
                value.truncate(value.len() - 2);
            }
        }
        self.query = format!("Summarize the following post\n\nTitle: {}\n\nPost: {}", self.title, self.post);
        self
    }
}

/// Index inside the last `[[k]]` of a header line.
fn bracket_index(line: &str) -> Option<Result<usize, String>> {
    let pos = line.rfind("[[")?;
    let start = pos + 2;
    let raw = match line[start..].find("]]") {
        Some(len) => line[start..start + len].trim(),
        None => line[start..].trim(),
    };
    Some(raw.parse::<usize>().map_err(|_| raw.to_string()))
}

/// Parses transcript text. Lines outside any field and bad `[[k]]` markers are reported
/// as issues and skipped.
#[must_use]
pub fn parse_transcript(text: &str) -> TranscriptReport {
    let mut report = TranscriptReport::default();
    let mut record = TranscriptRecord::default();
    let mut tag: Option<Field> = None;

    for (idx, line) in text.split_inclusive('\n').enumerate() {
        if line.contains("Subreddit:") {
            record.subreddit = line.replace("Subreddit: ", "");
            tag = Some(Field::Subreddit);
        } else if line.contains("Title:") {
            tag = Some(Field::Title);
        } else if line.contains("Post:") {
            tag = Some(Field::Post);
        } else if line.contains("generated summary") {
            tag = Some(Field::Response);
            match bracket_index(line) {
                Some(Ok(k)) => record.choice = k,
                Some(Err(raw)) => report.issues.push(TranscriptIssue {
                    line: idx + 1,
                    message: format!("malformed candidate index '{raw}'"),
                }),
                None => {}
            }
        } else if line.contains("Human summary") {
            tag = Some(Field::ResponseAnother);
        } else if line.contains("Score") {
            tag = Some(Field::Score);
        } else if line.contains("Selector choice") {
            tag = Some(Field::SelectorChoice);
        } else if line.contains(SEPARATOR) {
            report.records.push(std::mem::take(&mut record).finish());
            tag = None;
        } else if let Some(field) = tag {
            record.field_mut(field).push_str(line);
        } else if !line.trim().is_empty() {
            report.issues.push(TranscriptIssue {
                line: idx + 1,
                message: "text outside of any field".to_string(),
            });
        }
    }

    report
}

/// Reads and parses a transcript file.
pub fn read_transcript(path: &Path) -> EvalResult<TranscriptReport> {
    let text = std::fs::read_to_string(path)?;
    let report = parse_transcript(&text);
    for issue in &report.issues {
        warn!(path = %path.display(), line = issue.line, "{}", issue.message);
    }
    info!(
        path = %path.display(),
        records = report.records.len(),
        issues = report.issues.len(),
        "Parsed transcript"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESULTS: &str = "Subreddit: r/cats\n\nTitle:\nMy cat\n\nPost:\nShe sat.\nThen left.\n\n\
Best generated summary [[3]]:\n Cat sat and left.\n\n\
Auto-J Comment:\nok\n\nAuto-J Rating: 6.0\n\n\
==========================\n\n\
Subreddit: r/dogs\n\nTitle:\nDog\n\nPost:\nWoof\n\nBest generated summary [[0]]:\n Barks.\n\n\
==========================\n\n";

    #[test]
    fn test_parse_results_file() {
        let report = parse_transcript(RESULTS);
        assert_eq!(report.records.len(), 2);
        let first = &report.records[0];
        assert_eq!(first.subreddit, "r/cats");
        assert_eq!(first.title, "My cat");
        assert_eq!(first.post, "She sat.\nThen left.");
        assert_eq!(first.choice, 3);
        // comment lines belong to the current field
        assert!(first.response.starts_with(" Cat sat and left.\n\nAuto-J Comment:"));
        assert_eq!(first.query, "Summarize the following post\n\nTitle: My cat\n\nPost: She sat.\nThen left.");
        assert_eq!(report.records[1].choice, 0);
        assert!(report.issues.is_empty());
    }

    #[test]
    fn test_parse_summarization_transcript() {
        let text = "Post:\nLong post\n\nHuman summary:\nHuman words\n\n\
Model-generated summary 0:\nfirst\n\nModel-generated summary 1:\nsecond\n\n\
==========================\n\n";
        let report = parse_transcript(text);
        let record = &report.records[0];
        assert_eq!(record.post, "Long post");
        assert_eq!(record.response_another, "Human words");
        assert_eq!(record.response, "first\n\nsecond");
    }

    #[test]
    fn test_issues_are_reported_not_fatal() {
        let text = "stray text\nSubreddit: r/x\n\nTitle:\nT\n\nBest generated summary [[two]]:\ns\n\n=============\n";
        let report = parse_transcript(text);
        assert_eq!(report.records.len(), 1);
        assert_eq!(report.issues.len(), 2);
        assert_eq!(report.issues[0].line, 1);
        assert_eq!(report.records[0].choice, 0);
    }
}
