//! 记忆层：对话轮次（短期记忆）与按会话分组的历史存储

pub mod conversation;
pub mod history;

pub use conversation::{ConversationMemory, Role, Turn};
pub use history::{ConversationHistoryStore, InMemoryHistoryStore};
