//! 核心编排层：错误类型、消息分类、串行队列、问候流、派发器

pub mod classify;
pub mod dispatcher;
pub mod error;
pub mod flows;
pub mod serial_queue;

pub use classify::is_unsupported;
pub use dispatcher::{Bot, BotOptions, PromptDefaults};
pub use error::BotError;
pub use flows::GreetingFlow;
pub use serial_queue::{run_worker, GenerationTask, ProcessFn, SerialQueue};
