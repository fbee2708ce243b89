//! 串行生成队列：单工作者 + 最小出队间隔
//!
//! 所有发送者的生成任务进同一条队列，完成序 == 入队序（全局 FIFO）；
//! 任意时刻至多一个任务在执行，任务间至少间隔 interval，对外部生成后端限速。
//! 全局（而非按发送者）串行是有意为之：后端是共享的限流资源，
//! 代价是队头阻塞，一个慢任务会推迟所有发送者的回复。
//! 单个任务失败（返回 Err 或 panic）只影响自身，工作者继续取下一个。

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::BotError;
use crate::memory::ContextPair;

/// 生成任务：入队后不可变；context 为入队时刻的上下文快照
#[derive(Clone, Debug)]
pub struct GenerationTask {
    pub id: String,
    pub sender_id: String,
    pub body: String,
    pub context: Option<ContextPair>,
}

impl GenerationTask {
    pub fn new(
        sender_id: impl Into<String>,
        body: impl Into<String>,
        context: Option<ContextPair>,
    ) -> Self {
        Self {
            id: format!("task_{}", uuid::Uuid::new_v4()),
            sender_id: sender_id.into(),
            body: body.into(),
            context,
        }
    }
}

/// 任务体：由 dispatcher 提供，错误在工作者内兜底
pub type ProcessFn = Arc<
    dyn Fn(GenerationTask) -> Pin<Box<dyn Future<Output = Result<(), BotError>> + Send>>
        + Send
        + Sync,
>;

/// 入队端：非阻塞追加，完成顺序由工作者保证
#[derive(Clone)]
pub struct SerialQueue {
    tx: mpsc::UnboundedSender<GenerationTask>,
}

impl SerialQueue {
    /// 创建队列，返回 (入队端, 工作者消费端)
    pub fn new() -> (Self, mpsc::UnboundedReceiver<GenerationTask>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// 追加到队尾并立即返回；工作者已退出时返回 false
    pub fn enqueue(&self, task: GenerationTask) -> bool {
        self.tx.send(task).is_ok()
    }
}

/// 单工作者循环：取队头 → 执行到完成 → 等待 interval → 取下一个
///
/// 任务 spawn 后随即 await：既保持互斥（下一个任务必须等本任务完结），
/// 又兜住任务内的 panic。
pub async fn run_worker(
    mut rx: mpsc::UnboundedReceiver<GenerationTask>,
    interval: Duration,
    shutdown: CancellationToken,
    process_fn: ProcessFn,
) {
    loop {
        let task = tokio::select! {
            _ = shutdown.cancelled() => break,
            task = rx.recv() => match task {
                Some(t) => t,
                None => break,
            },
        };

        let task_id = task.id.clone();
        let sender_id = task.sender_id.clone();
        tracing::debug!("Running {} for {}", task_id, sender_id);

        match tokio::spawn(process_fn(task)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::error!("Task {} for {} failed: {}", task_id, sender_id, e);
            }
            Err(e) => {
                tracing::error!("Task {} for {} panicked: {}", task_id, sender_id, e);
            }
        }

        tokio::time::sleep(interval).await;
    }

    tracing::info!("Serial queue worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::time::{sleep, Instant};

    fn task(sender: &str, body: &str) -> GenerationTask {
        GenerationTask::new(sender, body, None)
    }

    #[tokio::test]
    async fn tasks_complete_in_enqueue_order() {
        let (queue, rx) = SerialQueue::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let seen = order.clone();
        let process: ProcessFn = Arc::new(move |t: GenerationTask| {
            let seen = seen.clone();
            Box::pin(async move {
                seen.lock().expect("order mutex poisoned").push(t.body.clone());
                Ok(())
            })
        });

        let shutdown = CancellationToken::new();
        let worker = tokio::spawn(run_worker(
            rx,
            Duration::from_millis(1),
            shutdown.clone(),
            process,
        ));

        for i in 0..5 {
            assert!(queue.enqueue(task("u1", &format!("t{}", i))));
        }
        sleep(Duration::from_millis(100)).await;

        let seen = order.lock().expect("order mutex poisoned").clone();
        assert_eq!(seen, vec!["t0", "t1", "t2", "t3", "t4"]);

        shutdown.cancel();
        let _ = worker.await;
    }

    #[tokio::test]
    async fn at_most_one_task_executes_at_a_time() {
        let (queue, rx) = SerialQueue::new();
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let flight = in_flight.clone();
        let max = max_seen.clone();
        let process: ProcessFn = Arc::new(move |_t: GenerationTask| {
            let flight = flight.clone();
            let max = max.clone();
            Box::pin(async move {
                let now = flight.fetch_add(1, Ordering::SeqCst) + 1;
                max.fetch_max(now, Ordering::SeqCst);
                sleep(Duration::from_millis(10)).await;
                flight.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            })
        });

        let shutdown = CancellationToken::new();
        let worker = tokio::spawn(run_worker(
            rx,
            Duration::from_millis(1),
            shutdown.clone(),
            process,
        ));

        for i in 0..4 {
            queue.enqueue(task("u1", &format!("t{}", i)));
        }
        sleep(Duration::from_millis(200)).await;

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);

        shutdown.cancel();
        let _ = worker.await;
    }

    #[tokio::test]
    async fn consecutive_tasks_are_spaced_by_interval() {
        let (queue, rx) = SerialQueue::new();
        let stamps = Arc::new(Mutex::new(Vec::new()));

        let seen = stamps.clone();
        let process: ProcessFn = Arc::new(move |_t: GenerationTask| {
            let seen = seen.clone();
            Box::pin(async move {
                seen.lock().expect("stamps mutex poisoned").push(Instant::now());
                Ok(())
            })
        });

        let shutdown = CancellationToken::new();
        let interval = Duration::from_millis(50);
        let worker = tokio::spawn(run_worker(rx, interval, shutdown.clone(), process));

        queue.enqueue(task("u1", "first"));
        queue.enqueue(task("u2", "second"));
        sleep(Duration::from_millis(200)).await;

        let stamps = stamps.lock().expect("stamps mutex poisoned").clone();
        assert_eq!(stamps.len(), 2);
        assert!(stamps[1] - stamps[0] >= interval);

        shutdown.cancel();
        let _ = worker.await;
    }

    #[tokio::test]
    async fn failing_task_does_not_stop_the_worker() {
        let (queue, rx) = SerialQueue::new();
        let completed = Arc::new(Mutex::new(Vec::new()));

        let seen = completed.clone();
        let process: ProcessFn = Arc::new(move |t: GenerationTask| {
            let seen = seen.clone();
            Box::pin(async move {
                if t.body == "boom" {
                    return Err(BotError::Generation("backend down".into()));
                }
                seen.lock().expect("completed mutex poisoned").push(t.body.clone());
                Ok(())
            })
        });

        let shutdown = CancellationToken::new();
        let worker = tokio::spawn(run_worker(
            rx,
            Duration::from_millis(1),
            shutdown.clone(),
            process,
        ));

        queue.enqueue(task("u1", "boom"));
        queue.enqueue(task("u2", "after"));
        sleep(Duration::from_millis(100)).await;

        let seen = completed.lock().expect("completed mutex poisoned").clone();
        assert_eq!(seen, vec!["after"]);

        shutdown.cancel();
        let _ = worker.await;
    }

    #[tokio::test]
    async fn panicking_task_is_contained() {
        let (queue, rx) = SerialQueue::new();
        let completed = Arc::new(AtomicUsize::new(0));

        let count = completed.clone();
        let process: ProcessFn = Arc::new(move |t: GenerationTask| {
            let count = count.clone();
            Box::pin(async move {
                if t.body == "panic" {
                    panic!("task blew up");
                }
                count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        });

        let shutdown = CancellationToken::new();
        let worker = tokio::spawn(run_worker(
            rx,
            Duration::from_millis(1),
            shutdown.clone(),
            process,
        ));

        queue.enqueue(task("u1", "panic"));
        queue.enqueue(task("u2", "fine"));
        sleep(Duration::from_millis(100)).await;

        assert_eq!(completed.load(Ordering::SeqCst), 1);

        shutdown.cancel();
        let _ = worker.await;
    }

    #[tokio::test]
    async fn enqueue_reports_dead_worker() {
        let (queue, rx) = SerialQueue::new();
        drop(rx);
        assert!(!queue.enqueue(task("u1", "orphan")));
    }
}
