//! 入站消息分类：文本 vs 传输层哨兵
//!
//! 传输层用 `_event_(media|document|voice_note)_` 前缀的正文占位非文本内容，
//! 这里只做无副作用的判定，不触达任何状态。

use std::sync::OnceLock;

use regex::Regex;

static UNSUPPORTED_RE: OnceLock<Regex> = OnceLock::new();

/// 正文是否为不支持的消息类型哨兵
pub fn is_unsupported(body: &str) -> bool {
    let re = UNSUPPORTED_RE
        .get_or_init(|| Regex::new(r"^_event_(media|document|voice_note)_").unwrap());
    re.is_match(body)
}
