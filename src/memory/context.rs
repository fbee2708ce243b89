//! 会话上下文：按发送者维护的有界滚动窗口
//!
//! 每个发送者一条 Conversation（容量默认 5），超容量时先逐出最旧条目（FIFO）。
//! Conversation 仅由 ContextStore 持有与修改；取上下文采用
//! 「user 与 assistant 都有才算有」策略，缺任意一方即视为无历史。

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

/// 消息角色（与生成后端 API 一致）
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

/// 单条上下文条目，创建后不可变
#[derive(Clone, Debug)]
pub struct ContextEntry {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// 最近一轮 user / assistant 文本对
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContextPair {
    pub last_user: String,
    pub last_assistant: String,
}

/// 单个发送者的会话窗口：插入序即对话序
#[derive(Clone, Debug)]
pub struct Conversation {
    entries: VecDeque<ContextEntry>,
    capacity: usize,
}

impl Conversation {
    fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn push(&mut self, role: Role, content: String) {
        self.entries.push_back(ContextEntry {
            role,
            content,
            timestamp: Utc::now(),
        });
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    /// 最近的 user 条目与最近的 assistant 条目；缺任意一方返回 None
    fn latest_pair(&self) -> Option<ContextPair> {
        let last_user = self.entries.iter().rev().find(|e| e.role == Role::User)?;
        let last_assistant = self
            .entries
            .iter()
            .rev()
            .find(|e| e.role == Role::Assistant)?;
        Some(ContextPair {
            last_user: last_user.content.clone(),
            last_assistant: last_assistant.content.clone(),
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// 进程级上下文存储：sender_id -> Conversation，首次 append 时惰性创建
///
/// 随进程存活，不显式销毁；内存上界为 发送者数 × 容量。
/// 到达线程的同步 append 与队列工作者的读 + append 走同一把锁，
/// 并发交错见 dispatcher 的说明。
pub struct ContextStore {
    conversations: RwLock<HashMap<String, Conversation>>,
    capacity: usize,
}

impl ContextStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            conversations: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// 追加一条记录；未知发送者先建会话。总是成功，无错误分支。
    pub async fn append(&self, sender_id: &str, content: impl Into<String>, role: Role) {
        let mut conversations = self.conversations.write().await;
        conversations
            .entry(sender_id.to_string())
            .or_insert_with(|| Conversation::new(self.capacity))
            .push(role, content.into());
    }

    /// 最近一轮上下文；user / assistant 任意一方缺失（含全新发送者）时为 None
    pub async fn latest_pair(&self, sender_id: &str) -> Option<ContextPair> {
        self.conversations
            .read()
            .await
            .get(sender_id)?
            .latest_pair()
    }

    /// 指定发送者当前条目数（未知发送者为 0）
    pub async fn len(&self, sender_id: &str) -> usize {
        self.conversations
            .read()
            .await
            .get(sender_id)
            .map(|c| c.len())
            .unwrap_or(0)
    }

    /// 是否已有该发送者的会话
    pub async fn is_known(&self, sender_id: &str) -> bool {
        self.conversations.read().await.contains_key(sender_id)
    }

    /// 条目快照（测试与渲染用）
    pub async fn entries_of(&self, sender_id: &str) -> Vec<ContextEntry> {
        self.conversations
            .read()
            .await
            .get(sender_id)
            .map(|c| c.entries.iter().cloned().collect())
            .unwrap_or_default()
    }
}
