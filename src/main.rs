//! Wasp WhatsApp 服务
//!
//! 入口：初始化日志、加载配置、构建生成后端与传输层，
//! 启动串行工作者与 Webhook 服务器。
//!
//! 环境变量:
//! - WHATSAPP_ACCESS_TOKEN: Meta WhatsApp API 访问令牌
//! - WHATSAPP_PHONE_NUMBER_ID: 企业电话号码 ID
//! - GEMINI_API_KEY 或 OPENAI_API_KEY: 生成后端 API Key（按 [llm].provider）
//!
//! 启动: cargo run

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use wasp::config::load_config;
use wasp::core::{Bot, BotOptions, GreetingFlow, PromptDefaults};
use wasp::integrations::{create_router, AppState, CloudApiTransport};
use wasp::llm::create_generator_from_config;
use wasp::memory::ContextStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 日志：默认 info，可通过 RUST_LOG 覆盖
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .with(fmt::layer())
        .init();

    let cfg = load_config(None).context("Failed to load config")?;

    // 凭据缺失属启动期致命错误，不处理任何消息
    let generator = create_generator_from_config(&cfg).context("Failed to create generator")?;

    let access_token =
        std::env::var("WHATSAPP_ACCESS_TOKEN").context("WHATSAPP_ACCESS_TOKEN must be set")?;
    let phone_number_id = std::env::var("WHATSAPP_PHONE_NUMBER_ID")
        .context("WHATSAPP_PHONE_NUMBER_ID must be set")?;

    let transport = Arc::new(CloudApiTransport::new(
        access_token,
        phone_number_id,
        cfg.whatsapp.send_max_retries,
        Duration::from_millis(cfg.whatsapp.send_retry_base_ms),
    ));

    let store = Arc::new(ContextStore::new(cfg.app.context_capacity));

    let greeting = cfg.greeting.enabled.then(|| {
        let mut flow = GreetingFlow::new(cfg.greeting.keywords.clone(), cfg.greeting.reply.clone());
        if let Some(url) = &cfg.greeting.media_url {
            flow = flow.with_media_url(url.clone());
        }
        if let Some(followup) = &cfg.greeting.followup {
            flow = flow.with_followup(followup.clone());
        }
        flow
    });

    let options = BotOptions {
        domain_suffix: cfg.whatsapp.domain_suffix.clone(),
        unsupported_notice: cfg.whatsapp.unsupported_notice.clone(),
        failure_notice: cfg.whatsapp.failure_notice.clone(),
        queue_interval: Duration::from_millis(cfg.queue.interval_ms),
        prompts: PromptDefaults {
            no_user_context: cfg.prompts.no_user_context.clone(),
            no_assistant_context: cfg.prompts.no_assistant_context.clone(),
        },
    };

    let shutdown = CancellationToken::new();
    let (bot, worker) = Bot::start(
        store,
        generator,
        transport,
        greeting,
        options,
        shutdown.clone(),
    );

    let state = Arc::new(AppState {
        bot,
        verify_token: cfg.whatsapp.verify_token.clone(),
    });
    let app = create_router(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], cfg.whatsapp.port));
    tracing::info!("Wasp WhatsApp server listening on http://{}", addr);
    tracing::info!("Webhook URL: http://YOUR_HOST:{}/webhook", cfg.whatsapp.port);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    // 停止串行工作者后再退出，避免丢弃执行中的任务
    shutdown.cancel();
    let _ = worker.await;

    Ok(())
}
