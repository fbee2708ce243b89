//! WhatsApp Cloud API 集成
//!
//! 入站：Webhook 接收消息，非文本类型映射为 `_event_*` 哨兵正文后交给派发器。
//! 出站：CloudApiTransport 实现 Transport，长消息分段、失败有界重试。

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::core::Bot;
use crate::integrations::Transport;

/// Webhook 服务状态
pub struct AppState {
    pub bot: Arc<Bot>,
    pub verify_token: String,
}

/// Webhook 验证参数
#[derive(Debug, Deserialize)]
pub struct WebhookVerifyQuery {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
}

/// WhatsApp Webhook 请求体
#[derive(Debug, Deserialize)]
pub struct WebhookPayload {
    pub object: Option<String>,
    pub entry: Option<Vec<WebhookEntry>>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookEntry {
    pub id: Option<String>,
    pub changes: Option<Vec<WebhookChange>>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookChange {
    pub value: Option<WebhookValue>,
    pub field: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookValue {
    pub messaging_product: Option<String>,
    pub messages: Option<Vec<WebhookMessage>>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookMessage {
    pub from: String,
    pub id: Option<String>,
    pub timestamp: Option<String>,
    #[serde(rename = "type")]
    pub msg_type: Option<String>,
    pub text: Option<WebhookText>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookText {
    pub body: String,
}

/// WhatsApp 发送消息 API 请求体
#[derive(Debug, Serialize)]
struct SendMessageRequest {
    messaging_product: String,
    to: String,
    #[serde(rename = "type")]
    msg_type: String,
    text: SendMessageText,
}

#[derive(Debug, Serialize)]
struct SendMessageText {
    body: String,
}

/// 创建 Webhook 路由
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/webhook", get(webhook_verify).post(webhook_receive))
        .route("/health", get(|| async { "OK" }))
        .with_state(state)
}

/// GET /webhook - Meta 验证 Webhook
async fn webhook_verify(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WebhookVerifyQuery>,
) -> Result<String, StatusCode> {
    if query.mode.as_deref() == Some("subscribe")
        && query.verify_token.as_deref() == Some(&state.verify_token)
    {
        Ok(query.challenge.unwrap_or_default())
    } else {
        Err(StatusCode::FORBIDDEN)
    }
}

/// 非文本消息映射为分类器约定的哨兵正文；未知类型返回 None（忽略）
fn map_body(msg: &WebhookMessage) -> Option<String> {
    let id = msg.id.as_deref().unwrap_or("unknown");
    match msg.msg_type.as_deref() {
        Some("text") => msg.text.as_ref().map(|t| t.body.clone()),
        Some("image") | Some("video") | Some("sticker") => Some(format!("_event_media_{}", id)),
        Some("document") => Some(format!("_event_document_{}", id)),
        Some("audio") => Some(format!("_event_voice_note_{}", id)),
        _ => None,
    }
}

/// POST /webhook - 接收 WhatsApp 消息
async fn webhook_receive(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<WebhookPayload>,
) -> StatusCode {
    if payload.object.as_deref() != Some("whatsapp_business_account") {
        return StatusCode::OK;
    }

    let Some(entries) = payload.entry else {
        return StatusCode::OK;
    };

    for entry in entries {
        let Some(changes) = entry.changes else { continue };
        for change in changes {
            let Some(value) = change.value else { continue };
            let Some(messages) = value.messages else { continue };

            for msg in messages {
                let Some(body) = map_body(&msg) else { continue };
                if let Err(e) = state.bot.handle_message(&msg.from, &body).await {
                    tracing::error!("Failed to handle message from {}: {}", msg.from, e);
                }
            }
        }
    }

    StatusCode::OK
}

/// 长消息按字符分段（WhatsApp 上限 4096 字符）
fn chunk_message(body: &str, max_len: usize) -> Vec<String> {
    if body.chars().count() <= max_len {
        vec![body.to_string()]
    } else {
        body.chars()
            .collect::<Vec<_>>()
            .chunks(max_len)
            .map(|c| c.iter().collect())
            .collect()
    }
}

/// WhatsApp Cloud API 传输：分段发送 + 有界退避重试
pub struct CloudApiTransport {
    client: reqwest::Client,
    access_token: String,
    phone_number_id: String,
    max_retries: u32,
    retry_base: Duration,
}

impl CloudApiTransport {
    pub fn new(
        access_token: String,
        phone_number_id: String,
        max_retries: u32,
        retry_base: Duration,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            access_token,
            phone_number_id,
            max_retries,
            retry_base,
        }
    }

    async fn post_chunk(&self, to: &str, body: String) -> Result<(), String> {
        let url = format!(
            "https://graph.facebook.com/v18.0/{}/messages",
            self.phone_number_id
        );
        let req = SendMessageRequest {
            messaging_product: "whatsapp".to_string(),
            to: to.replace('+', "").to_string(),
            msg_type: "text".to_string(),
            text: SendMessageText { body },
        };

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&req)
            .send()
            .await
            .map_err(|e| format!("WhatsApp request failed: {}", e))?;

        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(format!("WhatsApp API error: {}", text));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Transport for CloudApiTransport {
    async fn send_text(&self, address: &str, message: &str) -> Result<(), String> {
        // 地址形如 <sender_id>@<domain_suffix>，API 只要号码部分
        let to = address.split('@').next().unwrap_or(address);

        for chunk in chunk_message(message, 4000) {
            let mut delay = self.retry_base;
            let mut attempt = 0u32;
            loop {
                match self.post_chunk(to, chunk.clone()).await {
                    Ok(()) => break,
                    Err(e) if attempt < self.max_retries => {
                        tracing::warn!(
                            "Send to {} failed (attempt {}): {}, retrying in {:?}",
                            to,
                            attempt + 1,
                            e,
                            delay
                        );
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                        attempt += 1;
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(())
    }
}
