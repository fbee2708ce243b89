//! 派发器：分类 → 上下文 → 队列 → 生成 → 上下文 → 发送
//!
//! Bot 以组合持有 Transport / Generator 能力（窄接口），每条入站消息
//! 按固定分支终结：问候流命中 / 不支持类型 / 入队生成。
//!
//! 并发模型：user 轮在到达时同步追加（不进串行段）；上下文对在入队时刻
//! 快照进 GenerationTask，同一发送者的连发消息不会把后到的 user 轮
//! 混进先到任务的提示。生成与发送只发生在串行工作者内，任意时刻至多一个。

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::core::classify::is_unsupported;
use crate::core::flows::GreetingFlow;
use crate::core::serial_queue::{run_worker, GenerationTask, ProcessFn, SerialQueue};
use crate::core::BotError;
use crate::integrations::Transport;
use crate::llm::Generator;
use crate::memory::{ContextPair, ContextStore, Role};

/// 无历史上下文时的占位提示对模板，`{sender_id}` 会被替换
#[derive(Clone, Debug)]
pub struct PromptDefaults {
    pub no_user_context: String,
    pub no_assistant_context: String,
}

impl PromptDefaults {
    fn render(&self, sender_id: &str) -> ContextPair {
        ContextPair {
            last_user: self.no_user_context.replace("{sender_id}", sender_id),
            last_assistant: self.no_assistant_context.replace("{sender_id}", sender_id),
        }
    }
}

impl Default for PromptDefaults {
    fn default() -> Self {
        Self {
            no_user_context: "There are no messages from the user with ID {sender_id} yet."
                .to_string(),
            no_assistant_context: "There are no previous replies to the user with ID {sender_id} yet; open with a short greeting."
                .to_string(),
        }
    }
}

/// 派发器选项：地址后缀、通知文案、队列间隔、占位提示
#[derive(Clone, Debug)]
pub struct BotOptions {
    /// 传输层地址后缀，地址形如 `<sender_id>@<domain_suffix>`
    pub domain_suffix: String,
    pub unsupported_notice: String,
    /// 生成失败时回给发送者的文案；None 表示只记日志
    pub failure_notice: Option<String>,
    /// 串行队列最小出队间隔
    pub queue_interval: Duration,
    pub prompts: PromptDefaults,
}

impl Default for BotOptions {
    fn default() -> Self {
        Self {
            domain_suffix: "s.whatsapp.net".to_string(),
            unsupported_notice: "Sorry, I can't process this type of message.".to_string(),
            failure_notice: None,
            queue_interval: Duration::from_millis(100),
            prompts: PromptDefaults::default(),
        }
    }
}

/// 会话机器人：上下文存储 + 串行队列 + 外部 Transport / Generator
pub struct Bot {
    store: Arc<ContextStore>,
    queue: SerialQueue,
    transport: Arc<dyn Transport>,
    greeting: Option<GreetingFlow>,
    options: BotOptions,
}

impl Bot {
    /// 构建并启动串行工作者，返回 Bot 与工作者句柄
    pub fn start(
        store: Arc<ContextStore>,
        generator: Arc<dyn Generator>,
        transport: Arc<dyn Transport>,
        greeting: Option<GreetingFlow>,
        options: BotOptions,
        shutdown: CancellationToken,
    ) -> (Arc<Self>, tokio::task::JoinHandle<()>) {
        let (queue, rx) = SerialQueue::new();
        let process_fn =
            make_process_fn(store.clone(), generator, transport.clone(), options.clone());
        let worker = tokio::spawn(run_worker(rx, options.queue_interval, shutdown, process_fn));

        let bot = Arc::new(Self {
            store,
            queue,
            transport,
            greeting,
            options,
        });
        (bot, worker)
    }

    fn address(&self, sender_id: &str) -> String {
        format!("{}@{}", sender_id, self.options.domain_suffix)
    }

    /// 处理一条入站消息；本函数只做到入队为止，生成与回复由串行工作者完成
    pub async fn handle_message(&self, sender_id: &str, body: &str) -> Result<(), BotError> {
        if let Some(flow) = &self.greeting {
            if flow.matches(body) {
                tracing::info!("Greeting flow hit for {}", sender_id);
                let mut reply = flow.reply.clone();
                if let Some(url) = &flow.media_url {
                    reply.push('\n');
                    reply.push_str(url);
                }
                self.transport
                    .send_text(&self.address(sender_id), &reply)
                    .await
                    .map_err(BotError::Delivery)?;
                if let Some(followup) = &flow.followup {
                    self.transport
                        .send_text(&self.address(sender_id), followup)
                        .await
                        .map_err(BotError::Delivery)?;
                }
                return Ok(());
            }
        }

        if is_unsupported(body) {
            tracing::info!("Unsupported message type from {}: {}", sender_id, body);
            return self
                .transport
                .send_text(&self.address(sender_id), &self.options.unsupported_notice)
                .await
                .map_err(BotError::Delivery);
        }

        // 到达即追加 user 轮；上下文随后快照，见模块说明
        self.store.append(sender_id, body, Role::User).await;
        let snapshot = self.store.latest_pair(sender_id).await;

        if !self.queue.enqueue(GenerationTask::new(sender_id, body, snapshot)) {
            return Err(BotError::Config("Serial queue worker is not running".into()));
        }
        Ok(())
    }
}

/// 串行任务体：取快照或占位上下文 → 生成 → 追加 assistant 轮 → 发送
fn make_process_fn(
    store: Arc<ContextStore>,
    generator: Arc<dyn Generator>,
    transport: Arc<dyn Transport>,
    options: BotOptions,
) -> ProcessFn {
    Arc::new(move |task: GenerationTask| {
        let store = store.clone();
        let generator = generator.clone();
        let transport = transport.clone();
        let options = options.clone();
        Box::pin(async move {
            let address = format!("{}@{}", task.sender_id, options.domain_suffix);
            let pair = task
                .context
                .clone()
                .unwrap_or_else(|| options.prompts.render(&task.sender_id));

            let reply = match generator.generate(&pair, &task.body).await {
                Ok(text) => text,
                Err(e) => {
                    // 失败只影响本任务；按配置回兜底文案，不拦截后续任务
                    if let Some(notice) = &options.failure_notice {
                        if let Err(send_err) = transport.send_text(&address, notice).await {
                            tracing::error!(
                                "Failed to deliver failure notice to {}: {}",
                                task.sender_id,
                                send_err
                            );
                        }
                    }
                    return Err(BotError::Generation(e));
                }
            };

            store
                .append(&task.sender_id, reply.clone(), Role::Assistant)
                .await;

            transport
                .send_text(&address, &reply)
                .await
                .map_err(BotError::Delivery)
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrations::MockTransport;
    use crate::llm::{Generator, MockGenerator};
    use async_trait::async_trait;
    use tokio::time::sleep;

    fn test_options() -> BotOptions {
        BotOptions {
            queue_interval: Duration::from_millis(1),
            failure_notice: Some("Something went wrong.".to_string()),
            ..BotOptions::default()
        }
    }

    fn start_bot(
        generator: Arc<dyn Generator>,
        transport: Arc<MockTransport>,
    ) -> (Arc<Bot>, Arc<ContextStore>, CancellationToken) {
        let store = Arc::new(ContextStore::new(5));
        let shutdown = CancellationToken::new();
        let (bot, _worker) = Bot::start(
            store.clone(),
            generator,
            transport,
            Some(
                GreetingFlow::new(vec!["hola".into()], "Hi, I'm the assistant.")
                    .with_followup("Type any question."),
            ),
            test_options(),
            shutdown.clone(),
        );
        (bot, store, shutdown)
    }

    #[tokio::test]
    async fn first_message_uses_default_context_and_appends_both_turns() {
        let generator = Arc::new(MockGenerator::new());
        let transport = Arc::new(MockTransport::new());
        let (bot, store, shutdown) = start_bot(generator.clone(), transport.clone());

        bot.handle_message("u1", "hello").await.unwrap();
        sleep(Duration::from_millis(50)).await;

        // 生成时拿到的是占位上下文对
        let calls = generator.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].0.last_user.contains("u1"));
        assert!(calls[0].0.last_assistant.contains("u1"));
        assert_eq!(calls[0].1, "hello");

        // 上下文为 [user, assistant]，回复发往带后缀的地址
        let entries = store.entries_of("u1").await;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].role, Role::User);
        assert_eq!(entries[0].content, "hello");
        assert_eq!(entries[1].role, Role::Assistant);

        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "u1@s.whatsapp.net");
        assert_eq!(sent[0].1, "Echo from Mock: hello");

        shutdown.cancel();
    }

    #[tokio::test]
    async fn second_turn_sees_previous_pair() {
        let generator = Arc::new(MockGenerator::new());
        let transport = Arc::new(MockTransport::new());
        let (bot, _store, shutdown) = start_bot(generator.clone(), transport.clone());

        bot.handle_message("u1", "first").await.unwrap();
        sleep(Duration::from_millis(50)).await;
        bot.handle_message("u1", "second").await.unwrap();
        sleep(Duration::from_millis(50)).await;

        let calls = generator.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].0.last_user, "second");
        assert_eq!(calls[1].0.last_assistant, "Echo from Mock: first");

        shutdown.cancel();
    }

    #[tokio::test]
    async fn unsupported_message_gets_notice_and_touches_nothing() {
        let generator = Arc::new(MockGenerator::new());
        let transport = Arc::new(MockTransport::new());
        let (bot, store, shutdown) = start_bot(generator.clone(), transport.clone());

        bot.handle_message("u1", "_event_media_abcd").await.unwrap();
        sleep(Duration::from_millis(50)).await;

        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, "Sorry, I can't process this type of message.");

        assert!(!store.is_known("u1").await);
        assert!(generator.calls().is_empty());

        shutdown.cancel();
    }

    #[tokio::test]
    async fn greeting_flow_bypasses_store_and_queue() {
        let generator = Arc::new(MockGenerator::new());
        let transport = Arc::new(MockTransport::new());
        let (bot, store, shutdown) = start_bot(generator.clone(), transport.clone());

        bot.handle_message("u1", " Hola ").await.unwrap();
        sleep(Duration::from_millis(50)).await;

        let sent = transport.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].1, "Hi, I'm the assistant.");
        assert_eq!(sent[1].1, "Type any question.");
        assert!(!store.is_known("u1").await);
        assert!(generator.calls().is_empty());

        shutdown.cancel();
    }

    struct FailingGenerator;

    #[async_trait]
    impl Generator for FailingGenerator {
        async fn generate(&self, _context: &ContextPair, _message: &str) -> Result<String, String> {
            Err("quota exceeded".to_string())
        }
    }

    #[tokio::test]
    async fn generation_failure_sends_notice_and_worker_continues() {
        let transport = Arc::new(MockTransport::new());
        let (bot, store, shutdown) = start_bot(Arc::new(FailingGenerator), transport.clone());

        bot.handle_message("u1", "hello").await.unwrap();
        bot.handle_message("u2", "hello again").await.unwrap();
        sleep(Duration::from_millis(100)).await;

        // 两个任务都到达了失败兜底，工作者没有被第一个失败卡住
        let sent = transport.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].0, "u1@s.whatsapp.net");
        assert_eq!(sent[0].1, "Something went wrong.");
        assert_eq!(sent[1].0, "u2@s.whatsapp.net");

        // user 轮已记录，assistant 轮没有
        assert_eq!(store.len("u1").await, 1);
        assert_eq!(store.len("u2").await, 1);

        shutdown.cancel();
    }

    #[tokio::test]
    async fn delivery_failure_is_contained_to_its_task() {
        let generator = Arc::new(MockGenerator::new());
        let transport = Arc::new(MockTransport::new());
        let (bot, store, shutdown) = start_bot(generator.clone(), transport.clone());

        transport.set_failing(true);
        bot.handle_message("u1", "hello").await.unwrap();
        sleep(Duration::from_millis(50)).await;

        // 发送失败只记日志；assistant 轮在发送前已入上下文
        assert!(transport.sent().is_empty());
        assert_eq!(store.len("u1").await, 2);

        // 工作者继续服务后续消息
        transport.set_failing(false);
        bot.handle_message("u2", "still there?").await.unwrap();
        sleep(Duration::from_millis(50)).await;

        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "u2@s.whatsapp.net");

        shutdown.cancel();
    }

    #[tokio::test]
    async fn burst_from_one_sender_keeps_per_task_snapshots() {
        let generator = Arc::new(MockGenerator::new().with_delay(Duration::from_millis(20)));
        let transport = Arc::new(MockTransport::new());
        let (bot, _store, shutdown) = start_bot(generator.clone(), transport.clone());

        // 两条消息在第一条生成完成前到达
        bot.handle_message("u1", "one").await.unwrap();
        bot.handle_message("u1", "two").await.unwrap();
        sleep(Duration::from_millis(200)).await;

        let calls = generator.calls();
        assert_eq!(calls.len(), 2);
        // 两个任务入队时都还没有 assistant 轮，各自退回占位上下文；
        // 第一条任务的提示不会因为第二条消息先到而改变
        assert!(calls[0].0.last_assistant.contains("u1"));
        assert_eq!(calls[0].1, "one");
        assert!(calls[1].0.last_assistant.contains("u1"));
        assert_eq!(calls[1].1, "two");

        shutdown.cancel();
    }
}
