//! 短期记忆：对话轮次
//!
//! 保留最近 N 轮对话（user/agent 对），超出时自动剪枝，供 LLM 上下文与会话历史使用。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 轮次角色
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Agent,
    System,
}

/// 单条对话轮次
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn agent(content: impl Into<String>) -> Self {
        Self::new(Role::Agent, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// 同角色同内容视为同一轮（忽略时间戳），用于避免重复追加用户输入
    pub fn same_as(&self, other: &Turn) -> bool {
        self.role == other.role && self.content == other.content
    }
}

/// 短期记忆：最近 N 轮对话（每轮含 user + agent，故实际保留约 max_turns*2 条）
#[derive(Clone, Debug)]
pub struct ConversationMemory {
    turns: Vec<Turn>,
    max_turns: usize,
}

impl ConversationMemory {
    pub fn new(max_turns: usize) -> Self {
        Self {
            turns: Vec::new(),
            max_turns,
        }
    }

    pub fn extend(&mut self, turns: impl IntoIterator<Item = Turn>) {
        self.turns.extend(turns);
        self.prune();
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// 超出 max_turns*2 时丢弃最旧的轮次
    fn prune(&mut self) {
        let keep = self.max_turns * 2;
        if self.turns.len() > keep {
            self.turns.drain(..self.turns.len() - keep);
        }
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prune_keeps_latest() {
        let mut mem = ConversationMemory::new(2);
        for i in 0..6 {
            mem.extend([Turn::user(format!("q{i}"))]);
        }
        assert_eq!(mem.len(), 4);
        assert_eq!(mem.turns()[0].content, "q2");
        assert_eq!(mem.turns()[3].content, "q5");
    }

    #[test]
    fn test_same_as_ignores_timestamp() {
        let a = Turn::user("hello");
        let mut b = Turn::user("hello");
        b.timestamp = b.timestamp + chrono::Duration::seconds(5);
        assert!(a.same_as(&b));
        assert!(!a.same_as(&Turn::agent("hello")));
    }
}
