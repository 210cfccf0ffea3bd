//! Hive - Rust 多智能体编排引擎
//!
//! 入口：初始化日志、加载配置、构建编排器，从标准输入逐行读取用户消息并打印回复。
//! 命令：`/clear` 清空当前会话，`/stats` 查看 A2A 统计，`/tool <name>` 查看能力描述，`/quit` 退出。

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use hive::config::load_config_or_default;
use hive::core::OrchestratorBuilder;
use hive::observability;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config_or_default(config_path);
    let app_name = cfg.app.name.clone().unwrap_or_else(|| "hive".to_string());
    let orchestrator = std::sync::Arc::new(OrchestratorBuilder::new(cfg).build());
    let session_id = uuid::Uuid::new_v4().to_string();

    // 进度事件只做日志输出
    let mut progress = orchestrator.progress().subscribe();
    tokio::spawn(async move {
        while let Ok(event) = progress.recv().await {
            if let Ok(line) = serde_json::to_string(&event) {
                tracing::debug!(progress = %line, "progress");
            }
        }
    });

    // 定期清理过期会话
    let store = orchestrator.history_store();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(60));
        loop {
            tick.tick().await;
            let removed = store.cleanup_expired().await;
            if removed > 0 {
                tracing::info!(removed, "expired sessions cleaned up");
            }
        }
    });

    let supervisor = orchestrator.supervisor();
    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    stdout
        .write_all(format!("{app_name} ready (session {session_id}). Type /quit to exit.\n").as_bytes())
        .await
        .context("Failed to write to stdout")?;

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read stdin")?,
            _ = tokio::signal::ctrl_c() => {
                supervisor.cancel_all();
                None
            }
        };
        let Some(line) = line else { break };
        let text = line.trim();
        if text.is_empty() {
            continue;
        }

        let reply = match text {
            "/quit" | "/exit" => break,
            "/clear" => {
                orchestrator.clear_session(&session_id).await;
                "Session cleared.".to_string()
            }
            "/stats" => {
                let stats = orchestrator.tracker().stats(Some(&session_id)).await;
                serde_json::to_string_pretty(&stats).context("Failed to render stats")?
            }
            _ if text.starts_with("/tool ") => {
                let name = text["/tool ".len()..].trim();
                match orchestrator.registry().lookup(name).await {
                    Some(descriptor) => serde_json::to_string_pretty(&descriptor)
                        .context("Failed to render capability")?,
                    None => format!("No capability named '{name}' in the current snapshot."),
                }
            }
            _ => {
                // Ctrl+C 只取消进行中的请求，回复仍会打印
                let run = orchestrator.handle_user_message(&session_id, text);
                tokio::pin!(run);
                let outcome = tokio::select! {
                    outcome = &mut run => outcome,
                    _ = tokio::signal::ctrl_c() => {
                        supervisor.cancel(&session_id).await;
                        run.await
                    }
                };
                if let Some(err) = &outcome.error {
                    tracing::warn!(error = %err, phase = %outcome.phase, "request ended with error");
                }
                outcome.final_response
            }
        };
        stdout.write_all(format!("{reply}\n").as_bytes()).await?;
    }

    Ok(())
}
