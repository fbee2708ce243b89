//! 生成后端抽象
//!
//! 所有后端（Gemini / OpenAI 兼容 / Mock）实现 Generator：
//! 以最近一轮 user/assistant 上下文对 + 新消息生成回复文本。

use async_trait::async_trait;

use crate::memory::ContextPair;

/// 生成客户端 trait
#[async_trait]
pub trait Generator: Send + Sync {
    /// 以上下文对与新消息生成回复；两侧占位文本由调用方先行填好
    async fn generate(&self, context: &ContextPair, message: &str) -> Result<String, String>;

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
