//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `WASP__*` 覆盖
//! （双下划线表示嵌套，如 `WASP__LLM__PROVIDER=openai`）。
//! API Key 等机密只走环境变量，不进配置文件。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub queue: QueueSection,
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub whatsapp: WhatsappSection,
    #[serde(default)]
    pub prompts: PromptsSection,
    #[serde(default)]
    pub greeting: GreetingSection,
}

/// [app] 段：应用名、每发送者上下文容量
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    pub name: Option<String>,
    /// 每个发送者保留的上下文条目数（user + assistant 合计）
    #[serde(default = "default_context_capacity")]
    pub context_capacity: usize,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            context_capacity: default_context_capacity(),
        }
    }
}

fn default_context_capacity() -> usize {
    5
}

/// [queue] 段：串行队列最小出队间隔
#[derive(Debug, Clone, Deserialize)]
pub struct QueueSection {
    #[serde(default = "default_queue_interval_ms")]
    pub interval_ms: u64,
}

impl Default for QueueSection {
    fn default() -> Self {
        Self {
            interval_ms: default_queue_interval_ms(),
        }
    }
}

fn default_queue_interval_ms() -> u64 {
    100
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 后端：gemini / openai / mock（mock 需显式选择）
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    #[serde(default)]
    pub gemini: LlmGeminiSection,
    #[serde(default)]
    pub openai: LlmOpenAiSection,
    #[serde(default)]
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            gemini: LlmGeminiSection::default(),
            openai: LlmOpenAiSection::default(),
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

fn default_provider() -> String {
    "gemini".to_string()
}

fn default_model() -> String {
    "gemini-pro".to_string()
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LlmGeminiSection {
    pub model: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LlmOpenAiSection {
    pub model: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmTimeoutsSection {
    #[serde(default = "default_request_timeout")]
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self {
            request: default_request_timeout(),
        }
    }
}

fn default_request_timeout() -> u64 {
    60
}

/// [whatsapp] 段：地址后缀、Webhook 验证、端口、发送重试、通知文案
#[derive(Debug, Clone, Deserialize)]
pub struct WhatsappSection {
    #[serde(default = "default_domain_suffix")]
    pub domain_suffix: String,
    #[serde(default = "default_verify_token")]
    pub verify_token: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// 单条消息发送失败的最大重试次数（0 表示不重试）
    #[serde(default = "default_send_max_retries")]
    pub send_max_retries: u32,
    /// 首次重试前的等待（毫秒），之后逐次翻倍
    #[serde(default = "default_send_retry_base_ms")]
    pub send_retry_base_ms: u64,
    #[serde(default = "default_unsupported_notice")]
    pub unsupported_notice: String,
    /// 生成失败时回给发送者的文案；不设置则只记日志
    pub failure_notice: Option<String>,
}

impl Default for WhatsappSection {
    fn default() -> Self {
        Self {
            domain_suffix: default_domain_suffix(),
            verify_token: default_verify_token(),
            port: default_port(),
            send_max_retries: default_send_max_retries(),
            send_retry_base_ms: default_send_retry_base_ms(),
            unsupported_notice: default_unsupported_notice(),
            failure_notice: None,
        }
    }
}

fn default_domain_suffix() -> String {
    "s.whatsapp.net".to_string()
}

fn default_verify_token() -> String {
    "wasp".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_send_max_retries() -> u32 {
    2
}

fn default_send_retry_base_ms() -> u64 {
    500
}

fn default_unsupported_notice() -> String {
    "Sorry, I can't process this type of message.".to_string()
}

/// [prompts] 段：无历史上下文时的占位提示对（配置数据，非核心逻辑）
#[derive(Debug, Clone, Deserialize)]
pub struct PromptsSection {
    #[serde(default = "default_no_user_context")]
    pub no_user_context: String,
    #[serde(default = "default_no_assistant_context")]
    pub no_assistant_context: String,
}

impl Default for PromptsSection {
    fn default() -> Self {
        Self {
            no_user_context: default_no_user_context(),
            no_assistant_context: default_no_assistant_context(),
        }
    }
}

fn default_no_user_context() -> String {
    "There are no messages from the user with ID {sender_id} yet.".to_string()
}

fn default_no_assistant_context() -> String {
    "There are no previous replies to the user with ID {sender_id} yet; \
     if there is no history, open with a short greeting or welcome. \
     Read the current message carefully to identify the user's intent, \
     give answers that are relevant and proactive, and keep the tone \
     clear, coherent and encouraging."
        .to_string()
}

/// [greeting] 段：关键词问候流
#[derive(Debug, Clone, Deserialize)]
pub struct GreetingSection {
    #[serde(default = "default_greeting_enabled")]
    pub enabled: bool,
    #[serde(default = "default_greeting_keywords")]
    pub keywords: Vec<String>,
    #[serde(default = "default_greeting_reply")]
    pub reply: String,
    pub media_url: Option<String>,
    pub followup: Option<String>,
}

impl Default for GreetingSection {
    fn default() -> Self {
        Self {
            enabled: default_greeting_enabled(),
            keywords: default_greeting_keywords(),
            reply: default_greeting_reply(),
            media_url: None,
            followup: None,
        }
    }
}

fn default_greeting_enabled() -> bool {
    true
}

fn default_greeting_keywords() -> Vec<String> {
    vec!["hi".into(), "hello".into(), "hola".into()]
}

fn default_greeting_reply() -> String {
    "Hi there, I'm the corporate client-care assistant.".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app: AppSection::default(),
            queue: QueueSection::default(),
            llm: LlmSection::default(),
            whatsapp: WhatsappSection::default(),
            prompts: PromptsSection::default(),
            greeting: GreetingSection::default(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 WASP__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 WASP__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("WASP")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
