//! Mock 传输（用于测试，不出网）
//!
//! 记录每次发送的 (地址, 文本)；可切换为失败模式验证投递错误路径。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::integrations::Transport;

/// Mock 传输：按序记录发出的消息
#[derive(Debug, Default)]
pub struct MockTransport {
    sent: Mutex<Vec<(String, String)>>,
    fail: AtomicBool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// 置为失败模式：后续 send_text 一律返回 Err
    pub fn set_failing(&self, failing: bool) {
        self.fail.store(failing, Ordering::SeqCst);
    }

    /// 已发送的 (地址, 文本) 记录
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().expect("sent mutex poisoned").clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send_text(&self, address: &str, message: &str) -> Result<(), String> {
        if self.fail.load(Ordering::SeqCst) {
            return Err("mock transport failure".to_string());
        }
        self.sent
            .lock()
            .expect("sent mutex poisoned")
            .push((address.to_string(), message.to_string()));
        Ok(())
    }
}
