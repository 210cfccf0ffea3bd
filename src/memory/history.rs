//! 会话历史存储抽象层
//!
//! 编排器在一次请求完全结束后（成功或已处理的错误）才追加本轮产生的轮次；
//! 进行中的状态对同一会话的其他请求不可见。内存实现带轮数上限与空闲过期清理。

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::conversation::{ConversationMemory, Turn};

/// 会话历史存储接口（内存实现用于测试与单进程部署，外部存储可自行实现）
#[async_trait]
pub trait ConversationHistoryStore: Send + Sync {
    /// 获取会话历史（不存在时返回空）
    async fn get(&self, session_id: &str) -> Vec<Turn>;

    /// 追加轮次到会话末尾
    async fn append(&self, session_id: &str, turns: Vec<Turn>);

    /// 清空会话历史
    async fn clear(&self, session_id: &str);

    /// 清理过期会话，返回清理数量
    async fn cleanup_expired(&self) -> usize {
        0
    }

    /// 当前会话数
    async fn session_count(&self) -> usize;
}

struct SessionEntry {
    memory: ConversationMemory,
    last_active: Instant,
}

/// 内存会话历史：每会话保留最近 max_turns 轮，空闲超过 session_ttl 的会话可被清理
pub struct InMemoryHistoryStore {
    sessions: RwLock<HashMap<String, SessionEntry>>,
    max_turns: usize,
    session_ttl: Duration,
}

impl InMemoryHistoryStore {
    pub fn new(max_turns: usize, session_ttl: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_turns,
            session_ttl,
        }
    }
}

impl Default for InMemoryHistoryStore {
    fn default() -> Self {
        Self::new(20, Duration::from_secs(3600))
    }
}

#[async_trait]
impl ConversationHistoryStore for InMemoryHistoryStore {
    async fn get(&self, session_id: &str) -> Vec<Turn> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .map(|s| s.memory.turns().to_vec())
            .unwrap_or_default()
    }

    async fn append(&self, session_id: &str, turns: Vec<Turn>) {
        let mut sessions = self.sessions.write().await;
        let entry = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| SessionEntry {
                memory: ConversationMemory::new(self.max_turns),
                last_active: Instant::now(),
            });
        entry.memory.extend(turns);
        entry.last_active = Instant::now();
    }

    async fn clear(&self, session_id: &str) {
        self.sessions.write().await.remove(session_id);
    }

    async fn cleanup_expired(&self) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        let ttl = self.session_ttl;
        sessions.retain(|_, s| s.last_active.elapsed() <= ttl);
        let removed = before - sessions.len();
        if removed > 0 {
            tracing::info!(removed, "expired conversation sessions cleaned up");
        }
        removed
    }

    async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}
