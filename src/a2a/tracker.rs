//! A2A 委派记录
//!
//! 记录逻辑智能体之间「谁把什么操作交给了谁」以及完成情况，按 session_id 分组，只追加。
//! 仅用于观测：进程重启丢失可接受，从不用于重放或正确性判断。
//! 每条记录同时作为进度子步骤发出（若配置了 ProgressSink）。

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::RwLock;

use crate::core::ProgressSink;

/// 记录类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DelegationPhase {
    Delegation,
    SpecificOperation,
    Completion,
}

/// 单条委派记录
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DelegationRecord {
    pub from_agent: String,
    pub to_agent: String,
    pub operation: String,
    pub phase: DelegationPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    pub details: Map<String, Value>,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
}

impl DelegationRecord {
    fn progress_message(&self) -> String {
        match self.phase {
            DelegationPhase::Delegation => format!(
                "{} -> {}: delegating {}",
                self.from_agent, self.to_agent, self.operation
            ),
            DelegationPhase::SpecificOperation => format!(
                "{} -> {}: executing {}",
                self.from_agent, self.to_agent, self.operation
            ),
            DelegationPhase::Completion => {
                let status = if self.success.unwrap_or(true) {
                    "completed"
                } else {
                    "failed"
                };
                format!(
                    "{} -> {}: {} {}",
                    self.from_agent, self.to_agent, self.operation, status
                )
            }
        }
    }
}

/// 统计：按操作计数、涉及的智能体；全局统计额外给出会话数
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct A2AStats {
    pub total: usize,
    pub operations: BTreeMap<String, usize>,
    pub agents: BTreeSet<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threads: Option<usize>,
}

impl A2AStats {
    fn add(&mut self, record: &DelegationRecord) {
        self.total += 1;
        *self.operations.entry(record.operation.clone()).or_insert(0) += 1;
        self.agents.insert(record.from_agent.clone());
        self.agents.insert(record.to_agent.clone());
    }
}

/// 委派记录器（可注入，内部加锁，多请求并发安全）
#[derive(Debug, Default)]
pub struct DelegationTracker {
    logs: RwLock<HashMap<String, Vec<DelegationRecord>>>,
    progress: Option<ProgressSink>,
}

impl DelegationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_progress(progress: ProgressSink) -> Self {
        Self {
            logs: RwLock::new(HashMap::new()),
            progress: Some(progress),
        }
    }

    /// 记录一次委派
    pub async fn log_delegation(
        &self,
        from: &str,
        to: &str,
        operation: &str,
        details: Map<String, Value>,
        session_id: &str,
    ) -> DelegationRecord {
        tracing::info!(%session_id, %from, %to, %operation, "a2a delegation");
        self.append(DelegationRecord {
            from_agent: from.to_string(),
            to_agent: to.to_string(),
            operation: operation.to_string(),
            phase: DelegationPhase::Delegation,
            success: None,
            details,
            session_id: session_id.to_string(),
            timestamp: Utc::now(),
        })
        .await
    }

    /// 记录一次完成（结果回传）；`result` 中 `success: false` 视为失败，缺省为成功
    pub async fn log_completion(
        &self,
        from: &str,
        to: &str,
        operation: &str,
        result: Map<String, Value>,
        session_id: &str,
    ) -> DelegationRecord {
        let success = result
            .get("success")
            .and_then(Value::as_bool)
            .unwrap_or(true);
        tracing::info!(%session_id, %from, %to, %operation, success, "a2a completion");
        self.append(DelegationRecord {
            from_agent: from.to_string(),
            to_agent: to.to_string(),
            operation: operation.to_string(),
            phase: DelegationPhase::Completion,
            success: Some(success),
            details: result,
            session_id: session_id.to_string(),
            timestamp: Utc::now(),
        })
        .await
    }

    /// 记录一个具体操作（如 schema 发现、参数抽取）
    pub async fn log_specific_operation(
        &self,
        from: &str,
        to: &str,
        operation: &str,
        details: Map<String, Value>,
        session_id: &str,
    ) -> DelegationRecord {
        tracing::debug!(%session_id, %from, %to, %operation, "a2a operation");
        self.append(DelegationRecord {
            from_agent: from.to_string(),
            to_agent: to.to_string(),
            operation: operation.to_string(),
            phase: DelegationPhase::SpecificOperation,
            success: None,
            details,
            session_id: session_id.to_string(),
            timestamp: Utc::now(),
        })
        .await
    }

    async fn append(&self, record: DelegationRecord) -> DelegationRecord {
        if let Some(progress) = &self.progress {
            progress.substep(&record.session_id, record.progress_message());
        }
        self.logs
            .write()
            .await
            .entry(record.session_id.clone())
            .or_default()
            .push(record.clone());
        record
    }

    pub async fn logs_for_thread(&self, session_id: &str) -> Vec<DelegationRecord> {
        self.logs
            .read()
            .await
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn clear_logs_for_thread(&self, session_id: &str) {
        self.logs.write().await.remove(session_id);
    }

    /// 指定会话的统计；None 时为全局统计（含会话数）
    pub async fn stats(&self, session_id: Option<&str>) -> A2AStats {
        let logs = self.logs.read().await;
        let mut stats = A2AStats::default();
        match session_id {
            Some(id) => {
                for record in logs.get(id).into_iter().flatten() {
                    stats.add(record);
                }
            }
            None => {
                for record in logs.values().flatten() {
                    stats.add(record);
                }
                stats.threads = Some(logs.len());
            }
        }
        stats
    }
}
