//! Prompt templates and RLHF prompt datasets.

use crate::builders::load_jsonl;
use crate::dataset::PromptRecord;
use crate::error::{TrainingError, TrainingResult};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Choice strings a comparison prompt is answered with; index 0 prefers `output_A`.
pub const CHOICES: [&str; 2] = [" A", " B"];

const TLDR_SUMMARY: &str = "Below is a forum post. Write a precise and concise summary that \
includes the most important points of the post.\n\n\
### SUBREDDIT: r/{subreddit}\n\
### TITLE: {title}\n\
### POST: {post}\n\
### TL;DR:";

const TLDR_SUMMARY_CMP: &str = "Below is a forum post followed by two summaries. Pick a more \
precise and concise one that summarizes the most important points in the given forum post, \
without including unimportant or irrelevant details. State your choice with a single capital \
letter, i.e., \"A\" if SUMMARY A is better, \"B\" if SUMMARY B is better.\n\n\
### SUBREDDIT: r/{subreddit}\n\
### TITLE: {title}\n\
### POST: {post}\n\
### SUMMARY A:{output_A}\n\
### SUMMARY B:{output_B}\n\
### YOUR CHOICE:";

const SHP_RESPONSE: &str = "Below is a query followed by a conversation history. Write a \
helpful and harmless response to the query.\n\n\
### QUERY: {history}\n\
### RESPONSE:";

const SHP_RESPONSE_CMP: &str = "Below is a query followed by two responses. Pick the more \
helpful and harmless response. State your choice with a single capital letter, i.e., \"A\" if \
RESPONSE A is better, \"B\" if RESPONSE B is better.\n\n\
### QUERY: {history}\n\
### RESPONSE A:{output_A}\n\
### RESPONSE B:{output_B}\n\
### YOUR CHOICE:";

/// A prompt with `{field}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate(String);

impl PromptTemplate {
    #[must_use]
    pub fn new(template: impl Into<String>) -> Self {
        Self(template.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Substitutes every `{field}` with the record's value. `{{` and `}}` escape braces.
    ///
    /// Non-string values are rendered as JSON. A placeholder the record lacks is an error.
    pub fn format_map(&self, record: &PromptRecord) -> TrainingResult<String> {
        self.format_with(|field| {
            record.0.get(field).map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
        })
    }

    /// Same as [`format_map`](Self::format_map) with extra fields layered over the record.
    pub fn format_with_extra(
        &self,
        record: &PromptRecord,
        extra: &[(&str, &str)],
    ) -> TrainingResult<String> {
        self.format_with(|field| {
            extra
                .iter()
                .find(|(k, _)| *k == field)
                .map(|(_, v)| (*v).to_string())
                .or_else(|| {
                    record.0.get(field).map(|v| match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                })
        })
    }

    fn format_with(&self, lookup: impl Fn(&str) -> Option<String>) -> TrainingResult<String> {
        let mut out = String::with_capacity(self.0.len());
        let mut rest = self.0.as_str();

        while let Some(pos) = rest.find(['{', '}']) {
            out.push_str(&rest[..pos]);
            let tail = &rest[pos..];
            if let Some(after) = tail.strip_prefix("{{") {
                out.push('{');
                rest = after;
            } else if let Some(after) = tail.strip_prefix("}}") {
                out.push('}');
                rest = after;
            } else if tail.starts_with('{') {
                let end = tail.find('}').ok_or_else(|| {
                    TrainingError::Dataset(format!("unclosed placeholder in template: {tail}"))
                })?;
                let field = &tail[1..end];
                let value = lookup(field).ok_or_else(|| {
                    TrainingError::Dataset(format!("template field '{field}' missing from record"))
                })?;
                out.push_str(&value);
                rest = &tail[end + 1..];
            } else {
                return Err(TrainingError::Dataset("single '}' in template".to_string()));
            }
        }
        out.push_str(rest);
        Ok(out)
    }
}

/// Prompt datasets the RLHF loop can draw from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RlhfDataset {
    RedditTldr,
    Shp,
    ShpSafe,
}

impl FromStr for RlhfDataset {
    type Err = TrainingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "reddit-tldr-rlhf" => Ok(Self::RedditTldr),
            "shp-rlhf" => Ok(Self::Shp),
            "shp-safe" => Ok(Self::ShpSafe),
            other => Err(TrainingError::UnsupportedSource(format!("unknown RLHF dataset '{other}'"))),
        }
    }
}

/// Prompts plus the two templates used with them.
#[derive(Debug, Clone)]
pub struct PromptSet {
    pub data_root: PathBuf,
    pub prompts: Vec<PromptRecord>,
    pub generation: PromptTemplate,
    pub selector: PromptTemplate,
}

impl RlhfDataset {
    /// Directory under the data root holding this dataset's files and caches.
    #[must_use]
    pub fn data_root(self, root: &Path) -> PathBuf {
        match self {
            Self::RedditTldr => root.join("reddit-tldr-comparison"),
            Self::Shp | Self::ShpSafe => root.join("shp"),
        }
    }

    #[must_use]
    pub fn prompt_file(self, root: &Path) -> PathBuf {
        let name = match self {
            Self::RedditTldr | Self::Shp => "rlhf_prompts.jsonl",
            Self::ShpSafe => "safe_prompts.jsonl",
        };
        self.data_root(root).join(name)
    }

    fn fields(self) -> &'static [(&'static str, &'static str)] {
        match self {
            Self::RedditTldr => &[("subreddit", "subreddit"), ("title", "title"), ("post", "post")],
            Self::Shp | Self::ShpSafe => &[("history", "history")],
        }
    }

    #[must_use]
    pub fn generation_template(self) -> PromptTemplate {
        match self {
            Self::RedditTldr => PromptTemplate::new(TLDR_SUMMARY),
            Self::Shp | Self::ShpSafe => PromptTemplate::new(SHP_RESPONSE),
        }
    }

    #[must_use]
    pub fn selector_template(self) -> PromptTemplate {
        match self {
            Self::RedditTldr => PromptTemplate::new(TLDR_SUMMARY_CMP),
            Self::Shp | Self::ShpSafe => PromptTemplate::new(SHP_RESPONSE_CMP),
        }
    }

    /// Loads the prompts and templates for this dataset.
    pub fn load(self, root: &Path) -> TrainingResult<PromptSet> {
        let prompts = load_jsonl(&self.prompt_file(root), self.fields())?;
        Ok(PromptSet {
            data_root: self.data_root(root),
            prompts,
            generation: self.generation_template(),
            selector: self.selector_template(),
        })
    }
}

/// Template for reddit TL;DR summaries, used by best-of-N.
#[must_use]
pub fn tldr_summary_template() -> PromptTemplate {
    PromptTemplate::new(TLDR_SUMMARY)
}

/// Comparison template for reddit TL;DR summaries, used by best-of-N.
#[must_use]
pub fn tldr_comparison_template() -> PromptTemplate {
    PromptTemplate::new(TLDR_SUMMARY_CMP)
}
