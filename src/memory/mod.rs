//! 记忆层：按发送者的有界会话上下文

pub mod context;

pub use context::{ContextEntry, ContextPair, ContextStore, Conversation, Role};
