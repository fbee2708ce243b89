//! Bot 错误类型
//!
//! Generation / Delivery 在任务边界兜底（见 serial_queue 与 dispatcher），
//! Config 在启动期即失败，不处理任何消息。

use thiserror::Error;

/// 消息处理过程中可能出现的错误
#[derive(Error, Debug)]
pub enum BotError {
    /// 外部生成后端调用失败（超时、配额、响应不合法等）
    #[error("Generation failed: {0}")]
    Generation(String),

    /// 传输层发送失败；核心不重试（Cloud API 发送器内部有有界重试）
    #[error("Delivery failed: {0}")]
    Delivery(String),

    /// 缺少必需的凭据或配置
    #[error("Config error: {0}")]
    Config(String),
}
