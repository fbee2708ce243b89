//! Gemini API 客户端
//!
//! 通过 REST generateContent 调用 Google Generative Language API。
//! - Base URL: https://generativelanguage.googleapis.com/v1beta
//! - 模型: gemini-pro（默认）/ gemini-1.5-flash
//!
//! 历史以「上次用户消息 / 上次回复」两条引导轮表达，再附新消息。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::llm::Generator;
use crate::memory::ContextPair;

/// Gemini API 常量
pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const GEMINI_PRO: &str = "gemini-pro";
pub const GEMINI_FLASH: &str = "gemini-1.5-flash";

#[derive(Debug, Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    role: String,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    text: String,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    candidates: Option<Vec<Candidate>>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

/// Gemini 客户端：持有 reqwest Client 与模型名
pub struct GeminiClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl GeminiClient {
    pub fn new(base_url: Option<&str>, model: &str, api_key: &str, timeout_secs: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            base_url: base_url
                .unwrap_or(GEMINI_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            model: model.to_string(),
            api_key: api_key.to_string(),
        }
    }

    fn build_contents(&self, context: &ContextPair, message: &str) -> Vec<Content> {
        vec![
            Content {
                role: "user".to_string(),
                parts: vec![Part {
                    text: format!(
                        "The user's previous message was: \"{}\"",
                        context.last_user
                    ),
                }],
            },
            Content {
                role: "model".to_string(),
                parts: vec![Part {
                    text: format!(
                        "Your previous reply was: \"{}\"",
                        context.last_assistant
                    ),
                }],
            },
            Content {
                role: "user".to_string(),
                parts: vec![Part {
                    text: message.to_string(),
                }],
            },
        ]
    }
}

#[async_trait]
impl Generator for GeminiClient {
    async fn generate(&self, context: &ContextPair, message: &str) -> Result<String, String> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );
        let request = GenerateContentRequest {
            contents: self.build_contents(context, message),
        };

        let resp = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| format!("Gemini request failed: {}", e))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(format!("Gemini API error ({}): {}", status, text));
        }

        let body: GenerateContentResponse = resp
            .json()
            .await
            .map_err(|e| format!("Gemini response parse failed: {}", e))?;

        body.candidates
            .and_then(|mut c| (!c.is_empty()).then(|| c.remove(0)))
            .and_then(|c| c.content)
            .and_then(|mut content| (!content.parts.is_empty()).then(|| content.parts.remove(0).text))
            .ok_or_else(|| "Gemini response contained no candidates".to_string())
    }
}
