//! 外部集成：传输层抽象与实现（WhatsApp Cloud API / Mock）

use async_trait::async_trait;

pub mod mock;
pub mod whatsapp;

pub use mock::MockTransport;
pub use whatsapp::{create_router, AppState, CloudApiTransport};

/// 传输能力 trait：向发送者投递一条文本
#[async_trait]
pub trait Transport: Send + Sync {
    /// address 形如 `<sender_id>@<domain_suffix>`；失败以 Err 返回，核心不重试
    async fn send_text(&self, address: &str, message: &str) -> Result<(), String>;
}
