//! 会话监管：进行中请求的取消管理
//!
//! 每个进行中的请求持有根令牌的子 CancellationToken；cancel(session_id) 只中止该会话的请求，
//! cancel_all（进程退出 / Ctrl+C）中止全部。注册表的后台刷新不受任何令牌影响。
//! begin 返回 ActiveRequest，丢弃时注销自己（请求 future 被提前丢弃也一样）。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

type ActiveMap = Arc<Mutex<HashMap<String, (u64, CancellationToken)>>>;

/// 会话级生命周期管理
#[derive(Debug)]
pub struct SessionSupervisor {
    root: CancellationToken,
    active: ActiveMap,
    next_id: AtomicU64,
}

/// 一次进行中的请求；Drop 时只移除自己注册的令牌
#[derive(Debug)]
pub struct ActiveRequest {
    session_id: String,
    id: u64,
    token: CancellationToken,
    active: ActiveMap,
}

impl ActiveRequest {
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

impl Drop for ActiveRequest {
    fn drop(&mut self) {
        let Ok(mut active) = self.active.lock() else {
            return;
        };
        if matches!(active.get(&self.session_id), Some((id, _)) if *id == self.id) {
            active.remove(&self.session_id);
        }
    }
}

impl SessionSupervisor {
    pub fn new() -> Self {
        Self {
            root: CancellationToken::new(),
            active: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
        }
    }

    /// 为会话的新请求创建令牌
    pub async fn begin(&self, session_id: &str) -> ActiveRequest {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = self.root.child_token();
        if let Ok(mut active) = self.active.lock() {
            active.insert(session_id.to_string(), (id, token.clone()));
        }
        ActiveRequest {
            session_id: session_id.to_string(),
            id,
            token,
            active: self.active.clone(),
        }
    }

    /// 取消该会话进行中的请求，返回是否存在
    pub async fn cancel(&self, session_id: &str) -> bool {
        let token = match self.active.lock() {
            Ok(active) => active.get(session_id).map(|(_, t)| t.clone()),
            Err(_) => None,
        };
        match token {
            Some(token) => {
                token.cancel();
                tracing::info!(%session_id, "session request cancelled");
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        self.root.cancel();
    }

    pub async fn active_count(&self) -> usize {
        self.active.lock().map(|a| a.len()).unwrap_or(0)
    }
}

impl Default for SessionSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cancel_only_target_session() {
        let sup = SessionSupervisor::new();
        let a = sup.begin("a").await;
        let b = sup.begin("b").await;
        assert!(sup.cancel("a").await);
        assert!(a.token().is_cancelled());
        assert!(!b.token().is_cancelled());
        assert!(!sup.cancel("missing").await);
    }

    #[tokio::test]
    async fn test_cancel_all_and_drop() {
        let sup = SessionSupervisor::new();
        let a = sup.begin("a").await;
        assert_eq!(sup.active_count().await, 1);
        sup.cancel_all();
        assert!(a.token().is_cancelled());
        drop(a);
        assert_eq!(sup.active_count().await, 0);
    }

    #[tokio::test]
    async fn test_stale_request_does_not_remove_newer_one() {
        let sup = SessionSupervisor::new();
        let first = sup.begin("a").await;
        let second = sup.begin("a").await;
        drop(first);
        assert_eq!(sup.active_count().await, 1);
        assert!(sup.cancel("a").await);
        assert!(second.token().is_cancelled());
        drop(second);
        assert_eq!(sup.active_count().await, 0);
    }

    #[tokio::test]
    async fn test_dropped_request_future_unregisters() {
        let sup = Arc::new(SessionSupervisor::new());
        let inner = sup.clone();
        let task = tokio::spawn(async move {
            let request = inner.begin("a").await;
            request.token().cancelled().await;
        });
        while sup.active_count().await == 0 {
            tokio::task::yield_now().await;
        }
        task.abort();
        let _ = task.await;
        assert_eq!(sup.active_count().await, 0);
    }
}
