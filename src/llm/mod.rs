//! 生成层：后端抽象与实现（Gemini / OpenAI 兼容 / Mock）

use std::sync::Arc;

pub mod gemini;
pub mod mock;
pub mod openai;
pub mod traits;

pub use gemini::{GeminiClient, GEMINI_BASE_URL, GEMINI_FLASH, GEMINI_PRO};
pub use mock::MockGenerator;
pub use openai::{OpenAiGenerator, TokenUsage};
pub use traits::Generator;

use crate::config::AppConfig;
use crate::core::BotError;

/// 按配置创建生成客户端；对应 API Key 缺失时报错（启动期致命）。
/// Mock 后端必须显式配置 provider = "mock"，不作为缺 Key 时的静默回退。
pub fn create_generator_from_config(cfg: &AppConfig) -> Result<Arc<dyn Generator>, BotError> {
    let provider = cfg.llm.provider.to_lowercase();
    match provider.as_str() {
        "gemini" => {
            let api_key = std::env::var("GEMINI_API_KEY").map_err(|_| {
                BotError::Config("GEMINI_API_KEY must be set for provider \"gemini\"".to_string())
            })?;
            let model = cfg
                .llm
                .gemini
                .model
                .clone()
                .unwrap_or_else(|| cfg.llm.model.clone());
            tracing::info!("Using Gemini generator ({})", model);
            Ok(Arc::new(GeminiClient::new(
                cfg.llm.base_url.as_deref(),
                &model,
                &api_key,
                cfg.llm.timeouts.request,
            )))
        }
        "openai" => {
            let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| {
                BotError::Config("OPENAI_API_KEY must be set for provider \"openai\"".to_string())
            })?;
            let model = cfg
                .llm
                .openai
                .model
                .clone()
                .unwrap_or_else(|| "gpt-4o-mini".to_string());
            tracing::info!("Using OpenAI-compatible generator ({})", model);
            Ok(Arc::new(OpenAiGenerator::new(
                cfg.llm.base_url.as_deref(),
                &model,
                Some(api_key.as_str()),
            )))
        }
        "mock" => {
            tracing::warn!("Using Mock generator; replies are echoes");
            Ok(Arc::new(MockGenerator::new()))
        }
        other => Err(BotError::Config(format!("Unknown LLM provider: {}", other))),
    }
}
