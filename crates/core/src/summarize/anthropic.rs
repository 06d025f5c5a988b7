use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{split_into_chunks, SummarizeError, Summarizer, SummaryResult};
use crate::config::SummarizerConfig;

const DEFAULT_API_BASE: &str = "https://api.anthropic.com";

/// [`Summarizer`] backed by the Anthropic messages API.
pub struct AnthropicSummarizer {
    client: reqwest::Client,
    api_key: String,
    model: String,
    api_base: String,
    max_chunk_chars: usize,
    engine: String,
}

impl AnthropicSummarizer {
    pub fn new(config: &SummarizerConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            api_base: config
                .api_base
                .clone()
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            max_chunk_chars: config.max_chunk_chars,
            engine: format!("anthropic:{}", config.model),
        }
    }

    async fn complete(&self, system: &str, prompt: String) -> Result<String, SummarizeError> {
        let request = MessagesRequest {
            model: self.model.clone(),
            max_tokens: 2048,
            system: system.to_string(),
            messages: vec![Message {
                role: "user".to_string(),
                content: prompt,
            }],
        };

        let response = self
            .client
            .post(format!("{}/v1/messages", self.api_base))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| SummarizeError::Http(e.to_string()))?;

        let status = response.status().as_u16();
        if status != 200 {
            let error_text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiError>(&error_text)
                .map(|e| e.error.message)
                .unwrap_or(error_text);
            return Err(SummarizeError::Api { status, message });
        }

        let body: MessagesResponse = response
            .json()
            .await
            .map_err(|e| SummarizeError::Http(e.to_string()))?;

        let text = body
            .content
            .into_iter()
            .filter(|c| c.content_type == "text")
            .map(|c| c.text)
            .collect::<Vec<_>>()
            .join("");

        if text.trim().is_empty() {
            return Err(SummarizeError::EmptyResponse);
        }
        Ok(text.trim().to_string())
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    system: String,
    messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    content_type: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

fn system_prompt(language: &str) -> String {
    format!(
        "You summarize transcripts of talks and videos. Write a structured summary in language '{}': \
         a one-paragraph overview followed by the key points as a bulleted list. \
         Do not invent facts that are not in the transcript.",
        language
    )
}

#[async_trait]
impl Summarizer for AnthropicSummarizer {
    fn name(&self) -> &str {
        &self.engine
    }

    async fn summarize(&self, text: &str, language: &str) -> Result<SummaryResult, SummarizeError> {
        let chunks = split_into_chunks(text, self.max_chunk_chars);
        if chunks.is_empty() {
            return Err(SummarizeError::EmptyInput);
        }
        let system = system_prompt(language);

        let content = if chunks.len() == 1 {
            self.complete(&system, chunks[0].clone()).await?
        } else {
            let mut partials = Vec::with_capacity(chunks.len());
            for (i, chunk) in chunks.iter().enumerate() {
                debug!(chunk = i + 1, total = chunks.len(), "Summarizing chunk");
                let prompt = format!(
                    "Part {} of {} of a longer transcript:\n\n{}",
                    i + 1,
                    chunks.len(),
                    chunk
                );
                partials.push(self.complete(&system, prompt).await?);
            }
            let combined = format!(
                "Combine these partial summaries into one summary:\n\n{}",
                partials.join("\n\n---\n\n")
            );
            self.complete(&system, combined).await?
        };

        Ok(SummaryResult {
            content,
            engine: self.engine.clone(),
            chunks: chunks.len() as u32,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SummarizerConfig {
        SummarizerConfig {
            api_key: "sk-test".to_string(),
            model: "claude-test".to_string(),
            api_base: Some("http://127.0.0.1:9".to_string()),
            language: "en".to_string(),
            max_chunk_chars: 1000,
        }
    }

    #[test]
    fn test_engine_name() {
        let summarizer = AnthropicSummarizer::new(&config());
        assert_eq!(summarizer.name(), "anthropic:claude-test");
        assert_eq!(summarizer.api_base, "http://127.0.0.1:9");
    }

    #[tokio::test]
    async fn test_empty_input_rejected_before_request() {
        let summarizer = AnthropicSummarizer::new(&config());
        let result = summarizer.summarize("   ", "en").await;
        assert!(matches!(result, Err(SummarizeError::EmptyInput)));
    }

    #[test]
    fn test_response_parsing() {
        let json = r#"{"content": [{"type": "text", "text": "Overview"}], "model": "m"}"#;
        let body: MessagesResponse = serde_json::from_str(json).unwrap();
        assert_eq!(body.content[0].text, "Overview");
    }
}
