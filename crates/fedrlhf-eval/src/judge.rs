use crate::error::{EvalError, EvalResult};
use crate::extract::{PairwiseDecision, extract_pairwise_result, extract_single_rating};
use crate::prompts::{Protocol, build_autoj_input};
use fedrlhf_abstraction::{Model, ModelParameters};
use fedrlhf_models::{ModelConfig, ModelFactory, ModelType};
use fedrlhf_training::config::JudgeSection;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};

/// One judged answer: the raw critique plus what was read out of it.
#[derive(Debug, Clone, PartialEq)]
pub struct Judgement<T> {
    pub comment: String,
    pub verdict: T,
}

/// Auto-J judge over any [`Model`]. Requests are sent one at a time with greedy decoding.
pub struct AutoJudge {
    model: Arc<dyn Model + Send + Sync>,
    parameters: ModelParameters,
}

impl AutoJudge {
    #[must_use]
    pub fn new(model: Arc<dyn Model + Send + Sync>, max_tokens: u32) -> Self {
        Self { model, parameters: ModelParameters::greedy(max_tokens) }
    }

    pub fn from_config(section: &JudgeSection) -> EvalResult<Self> {
        let model_type = ModelType::from_str(&section.hub).map_err(|()| {
            EvalError::InvalidInput(format!("unknown judge hub '{}'", section.hub))
        })?;
        let mut config = ModelConfig::new(model_type, section.model_id.clone());
        config.base_url = section.base_url.clone();
        info!(hub = %section.hub, model_id = %section.model_id, "Creating Auto-J judge");
        Ok(Self::new(ModelFactory::create(config)?, section.max_tokens))
    }

    #[must_use]
    pub fn model_id(&self) -> &str {
        self.model.model_id()
    }

    async fn ask(&self, prompt: &str) -> EvalResult<String> {
        let response = self.model.generate_text(prompt, Some(self.parameters.clone())).await?;
        debug!(chars = response.content.len(), "Judge answered");
        Ok(response.content)
    }

    /// Rates every `(query, response)` pair on the 1-10 scale.
    pub async fn rate(&self, items: &[(String, String)]) -> EvalResult<Vec<Judgement<f64>>> {
        let mut out = Vec::with_capacity(items.len());
        for (query, response) in items {
            let comment = self.ask(&build_autoj_input(query, response, None, Protocol::Single)).await?;
            let verdict = extract_single_rating(&comment)?;
            out.push(Judgement { comment, verdict });
        }
        Ok(out)
    }

    /// Compares `response` (as Response 1) with `response_another` for every item.
    pub async fn compare(&self, items: &[(String, String, String)]) -> EvalResult<Vec<Judgement<PairwiseDecision>>> {
        let mut out = Vec::with_capacity(items.len());
        for (query, response, response_another) in items {
            let prompt = build_autoj_input(query, response, Some(response_another), Protocol::PairwiseTie);
            let comment = self.ask(&prompt).await?;
            let verdict = extract_pairwise_result(&comment);
            out.push(Judgement { comment, verdict });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fedrlhf_models::MockModel;

    fn judge() -> AutoJudge {
        AutoJudge::new(Arc::new(MockModel::new("autoj".to_string())), 1024)
    }

    #[tokio::test]
    async fn test_rate_with_mock_judge() {
        let out = judge().rate(&[("q".to_string(), "r".to_string())]).await.unwrap();
        assert_eq!(out.len(), 1);
        assert!((1.0..=10.0).contains(&out[0].verdict));
        assert!(out[0].comment.contains("Rating: [["));
    }

    #[tokio::test]
    async fn test_compare_with_mock_judge() {
        let out = judge()
            .compare(&[("q".to_string(), "a".to_string(), "b".to_string())])
            .await
            .unwrap();
        assert_ne!(out[0].verdict, PairwiseDecision::Unknown);
    }

    #[test]
    fn test_from_config_mock_and_unknown() {
        let mut section = JudgeSection { hub: "mock".to_string(), ..JudgeSection::default() };
        assert_eq!(AutoJudge::from_config(&section).unwrap().model_id(), "GAIR/autoj-13b");
        section.hub = "bedrock".to_string();
        assert!(AutoJudge::from_config(&section).is_err());
    }
}
