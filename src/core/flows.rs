//! 关键词问候流
//!
//! 命中关键词的消息直接回固定问候语（可附媒体 URL 与跟进提示），
//! 不进入上下文存储，也不经过生成队列。

/// 问候流：关键词整词命中（忽略大小写与首尾空白）
#[derive(Clone, Debug)]
pub struct GreetingFlow {
    keywords: Vec<String>,
    pub reply: String,
    pub media_url: Option<String>,
    pub followup: Option<String>,
}

impl GreetingFlow {
    pub fn new(keywords: Vec<String>, reply: impl Into<String>) -> Self {
        Self {
            keywords,
            reply: reply.into(),
            media_url: None,
            followup: None,
        }
    }

    pub fn with_media_url(mut self, url: impl Into<String>) -> Self {
        self.media_url = Some(url.into());
        self
    }

    pub fn with_followup(mut self, followup: impl Into<String>) -> Self {
        self.followup = Some(followup.into());
        self
    }

    /// 整条正文与任一关键词相等时命中
    pub fn matches(&self, body: &str) -> bool {
        let trimmed = body.trim();
        self.keywords.iter().any(|k| trimmed.eq_ignore_ascii_case(k))
    }
}
