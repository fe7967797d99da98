//! Sentiment classifier and narrative generator contracts, plus an
//! OpenAI-compatible chat-completions client implementing both.

use std::time::Duration;

use async_trait::async_trait;
use pulse_core::{AppConfig, SentimentLabel, SentimentSummary};
use serde::{Deserialize, Serialize};

use crate::error::HarvestError;

const SYSTEM_PROMPT: &str = "You are an expert sentiment analyst. Classify the following \
social media text. Respond ONLY with a JSON object with two keys: 'sentiment' (Positive, \
Negative or Neutral) and 'explanation' (a brief reason).";

const CLASSIFY_MAX_TOKENS: u32 = 200;
const NARRATIVE_MAX_TOKENS: u32 = 600;
const NARRATIVE_TEMPERATURE: f32 = 0.7;

/// One classifier verdict. `cost` is the token usage reported by the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub label: SentimentLabel,
    pub explanation: String,
    pub cost: u64,
}

impl Classification {
    #[must_use]
    pub fn error(explanation: impl Into<String>) -> Self {
        Self {
            label: SentimentLabel::Error,
            explanation: explanation.into(),
            cost: 0,
        }
    }

    #[must_use]
    pub fn not_applicable(explanation: impl Into<String>) -> Self {
        Self {
            label: SentimentLabel::NotApplicable,
            explanation: explanation.into(),
            cost: 0,
        }
    }
}

/// Labels a single piece of text. Rate limiting is the caller's concern.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, text: &str) -> Result<Classification, HarvestError>;
}

/// Turns summary statistics into a short prose report.
#[async_trait]
pub trait Narrator: Send + Sync {
    async fn narrate(&self, topic: &str, summary: &SentimentSummary)
        -> Result<String, HarvestError>;
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatUsage {
    #[serde(default)]
    total_tokens: u64,
}

#[derive(Deserialize)]
struct Verdict {
    sentiment: String,
    #[serde(default)]
    explanation: String,
}

/// Chat-completions client (`POST {base}/chat/completions`).
///
/// Without an API key every call answers `NotApplicable` and no request is
/// sent.
pub struct ChatClassifier {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl ChatClassifier {
    /// # Errors
    ///
    /// Returns [`HarvestError::Http`] if the HTTP client cannot be built.
    pub fn new(
        base_url: &str,
        model: &str,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, HarvestError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            model: model.to_string(),
            api_key,
        })
    }

    /// # Errors
    ///
    /// Returns [`HarvestError::Http`] if the HTTP client cannot be built.
    pub fn from_app_config(config: &AppConfig) -> Result<Self, HarvestError> {
        Self::new(
            &config.classifier_url,
            &config.classifier_model,
            config.classifier_api_key.clone(),
            Duration::from_secs(config.classifier_timeout_secs),
        )
    }

    #[must_use]
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    async fn chat(
        &self,
        api_key: &str,
        messages: Vec<ChatMessage<'_>>,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<(String, u64), HarvestError> {
        let request = ChatRequest {
            model: &self.model,
            messages,
            temperature,
            max_tokens,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(HarvestError::Classification(format!(
                "classifier returned status {}",
                response.status()
            )));
        }

        let body: ChatResponse = response.json().await?;
        let cost = body.usage.map_or(0, |u| u.total_tokens);
        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| HarvestError::Classification("response had no choices".to_string()))?;

        Ok((content, cost))
    }
}

#[async_trait]
impl Classifier for ChatClassifier {
    async fn classify(&self, text: &str) -> Result<Classification, HarvestError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Ok(Classification::not_applicable(
                "classifier API key not configured",
            ));
        };

        let user = format!("Text: {text}");
        let (content, cost) = self
            .chat(
                api_key,
                vec![
                    ChatMessage {
                        role: "system",
                        content: SYSTEM_PROMPT,
                    },
                    ChatMessage {
                        role: "user",
                        content: &user,
                    },
                ],
                0.0,
                CLASSIFY_MAX_TOKENS,
            )
            .await?;

        let mut verdict = parse_verdict(&content)?;
        verdict.cost = cost;
        Ok(verdict)
    }
}

#[async_trait]
impl Narrator for ChatClassifier {
    async fn narrate(
        &self,
        topic: &str,
        summary: &SentimentSummary,
    ) -> Result<String, HarvestError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(HarvestError::Classification(
                "classifier API key not configured".to_string(),
            ));
        };

        let prompt = narrative_prompt(topic, summary)?;
        let (content, _) = self
            .chat(
                api_key,
                vec![ChatMessage {
                    role: "user",
                    content: &prompt,
                }],
                NARRATIVE_TEMPERATURE,
                NARRATIVE_MAX_TOKENS,
            )
            .await?;

        Ok(content.trim().to_string())
    }
}

fn narrative_prompt(topic: &str, summary: &SentimentSummary) -> Result<String, HarvestError> {
    let stats = serde_json::to_string_pretty(summary)?;
    Ok(format!(
        "Act as an expert data analyst and sociologist. A social media sentiment analysis was \
         run on the topic '{topic}'.\n\n\
         QUANTITATIVE DATA:\n{stats}\n\n\
         TASK:\n\
         Write a short executive report of 3 paragraphs interpreting these results.\n\
         1. Global summary: what is the overall feeling? Is there polarization?\n\
         2. Comparison by platform: do the platforms behave differently, and why?\n\
         3. Qualitative insights: what strategic conclusions follow from the numbers?\n\n\
         Use a professional but engaging tone. Tell the story behind the numbers."
    ))
}

/// Remove a surrounding Markdown code fence, if any.
fn strip_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Parse the model's JSON answer. Unknown labels become `Error`.
fn parse_verdict(content: &str) -> Result<Classification, HarvestError> {
    let cleaned = strip_fences(content);
    let verdict: Verdict = serde_json::from_str(cleaned).map_err(|e| {
        let preview: String = cleaned.chars().take(50).collect();
        HarvestError::Classification(format!("unparseable classifier answer ({e}): {preview}"))
    })?;

    Ok(match verdict.sentiment.parse::<SentimentLabel>() {
        Ok(label) => Classification {
            label,
            explanation: verdict.explanation,
            cost: 0,
        },
        Err(reason) => Classification::error(reason),
    })
}
