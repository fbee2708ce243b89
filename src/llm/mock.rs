//! Mock 生成客户端（用于测试，无需 API）
//!
//! 回显新消息，并记录每次调用收到的上下文对，便于断言占位上下文是否生效。
//! 可配置人为延迟，用于串行化与突发场景的测试。

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::llm::Generator;
use crate::memory::ContextPair;

/// Mock 客户端：回显用户消息
#[derive(Debug, Default)]
pub struct MockGenerator {
    delay: Option<Duration>,
    calls: Mutex<Vec<(ContextPair, String)>>,
}

impl MockGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// 每次生成前人为等待，模拟慢后端
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// 已收到的 (上下文对, 新消息) 记录
    pub fn calls(&self) -> Vec<(ContextPair, String)> {
        self.calls.lock().expect("calls mutex poisoned").clone()
    }
}

#[async_trait]
impl Generator for MockGenerator {
    async fn generate(&self, context: &ContextPair, message: &str) -> Result<String, String> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.calls
            .lock()
            .expect("calls mutex poisoned")
            .push((context.clone(), message.to_string()));
        Ok(format!("Echo from Mock: {}", message))
    }
}
