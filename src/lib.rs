//! Hive - Rust 多智能体编排引擎
//!
//! 模块划分：
//! - **a2a**: Agent-to-Agent 委派记录（按会话分组，仅用于观测）
//! - **agents**: 通用智能体（直接回答 / 汇总能力调用结果）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 编排状态机、错误与恢复、进度事件、会话监管
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Mock）
//! - **memory**: 对话轮次与会话历史存储
//! - **observability**: 日志初始化
//! - **routing**: 意图路由（选择能力并抽取参数）
//! - **tools**: 能力描述、发现、注册表缓存与调用

pub mod a2a;
pub mod agents;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod routing;
pub mod tools;

pub use crate::core::{Orchestrator, OrchestratorBuilder, Phase, TurnOutcome};
