//! Auto-J judge prompts.

use std::fmt;

const PROMPT_INPUT_WO_SYSTEM: &str = "[INST] {input} [/INST]";

const PROMPT_SINGLE: &str = "Write critiques for a submitted response on a given user's query, \
and grade the response:\n\n\
[BEGIN DATA]\n\
***\n\
[Query]: {prompt}\n\
***\n\
[Response]: {response}\n\
***\n\
[END DATA]\n\n\
Write critiques for this response. After that, you should give a final rating for the response \
on a scale of 1 to 10 by strictly following this format: \"[[rating]]\", for example: \
\"Rating: [[5]]\".";

const PROMPT_PAIRWISE_TIE: &str = "You are assessing two submitted responses on a given user's \
query and judging which response is better or they are tied. Here is the data:\n\n\
[BEGIN DATA]\n\
***\n\
[Query]: {prompt}\n\
***\n\
[Response 1]: {response}\n\
***\n\
[Response 2]: {response_another}\n\
***\n\
[END DATA]\n\n\
Here are the instructions to assess and compare the two responses:\n\n\
1. Pinpoint the key factors to distinguish these two responses.\n\
2. Conclude your comparison by providing a final decision on which response is better, or they \
are tied. Begin your final decision statement with \"So, the final decision is Response 1 / \
Response 2 / Tie\". Ensure that your decision aligns coherently with the comprehensive \
evaluation and comparison you've provided.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// Critique and 1-10 rating of one response.
    Single,
    /// Compare two responses; ties allowed.
    PairwiseTie,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single => write!(f, "single"),
            Self::PairwiseTie => write!(f, "pairwise_tie"),
        }
    }
}

/// Builds the judge input. `resp2` is ignored by [`Protocol::Single`].
#[must_use]
pub fn build_autoj_input(query: &str, resp1: &str, resp2: Option<&str>, protocol: Protocol) -> String {
    let template = match protocol {
        Protocol::Single => PROMPT_SINGLE,
        Protocol::PairwiseTie => PROMPT_PAIRWISE_TIE,
    };
    let user_msg = fill(
        template,
        &[("prompt", query), ("response", resp1), ("response_another", resp2.unwrap_or_default())],
    );
    fill(PROMPT_INPUT_WO_SYSTEM, &[("input", &user_msg)])
}

/// Single pass over `template`; substituted text is never rescanned.
fn fill(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(pos) = rest.find('{') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        let hit = values.iter().find_map(|(key, value)| {
            let marker = format!("{{{key}}}");
            tail.starts_with(&marker).then(|| (marker.len(), *value))
        });
        match hit {
            Some((len, value)) => {
                out.push_str(value);
                rest = &tail[len..];
            }
            None => {
                out.push('{');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_input() {
        let input = build_autoj_input("Summarize it", "a summary", None, Protocol::Single);
        assert!(input.starts_with("[INST] Write critiques"));
        assert!(input.contains("[Query]: Summarize it\n***\n[Response]: a summary\n"));
        assert!(input.ends_with(" [/INST]"));
        assert!(!input.contains("[Response 2]"));
    }

    #[test]
    fn test_pairwise_input() {
        let input = build_autoj_input("Q", "first", Some("second"), Protocol::PairwiseTie);
        assert!(input.contains("[Response 1]: first\n***\n[Response 2]: second\n"));
        assert!(input.contains("So, the final decision is Response 1 / Response 2 / Tie"));
    }

    #[test]
    fn test_substituted_text_is_not_rescanned() {
        let input = build_autoj_input("{response}", "r", None, Protocol::Single);
        assert!(input.contains("[Query]: {response}\n"));
    }
}
