//! SSE 流式能力调用
//!
//! 订阅端点并收集事件，直到：
//! - 监听默认 `message` 事件时收到第一条（resolve-on-first-message）
//! - 流结束或出错
//! - 固定上限时间到达
//!
//! 收到过事件则以最后一条为结果（部分成功策略：上游协议不保证结束标记）；
//! 一条都没收到则按出错或超时失败。

use std::time::Duration;

use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use reqwest::header::ACCEPT;
use reqwest::Client;
use serde_json::Value;

use crate::tools::invoker::{parse_payload, FailureKind};

/// 订阅 SSE 端点；Ok 为最后收到的事件负载
pub async fn subscribe(
    client: &Client,
    url: &str,
    query: &[(String, String)],
    event_name: &str,
    ceiling: Duration,
) -> Result<Value, (FailureKind, String)> {
    let resolve_on_first = event_name == "message";
    let mut last: Option<Value> = None;
    let mut received = 0usize;

    let collect = async {
        let response = client
            .get(url)
            .query(query)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| format!("transport error: {e}"))?;
        let status = response.status();
        if !status.is_success() {
            return Err(format!("HTTP {status}"));
        }
        tracing::debug!(%url, event = %event_name, "SSE connection opened");

        let mut events = response.bytes_stream().eventsource();
        while let Some(event) = events.next().await {
            match event {
                Ok(ev) => {
                    let name = if ev.event.is_empty() { "message" } else { ev.event.as_str() };
                    if name != event_name {
                        continue;
                    }
                    received += 1;
                    last = Some(parse_payload(&ev.data));
                    if resolve_on_first {
                        return Ok(());
                    }
                }
                Err(e) => return Err(format!("stream error: {e}")),
            }
        }
        Err("stream closed by upstream".to_string())
    };

    let outcome = tokio::time::timeout(ceiling, collect).await;

    match (outcome, last) {
        (Ok(Ok(())), Some(payload)) => Ok(payload),
        (Ok(Err(reason)), Some(payload)) => {
            tracing::debug!(%url, %reason, received, "SSE ended after data, using last event");
            Ok(payload)
        }
        (Err(_), Some(payload)) => {
            tracing::warn!(%url, received, "SSE ceiling reached, using last event");
            Ok(payload)
        }
        (Ok(Err(reason)), None) => Err((FailureKind::InvocationError, reason)),
        (Ok(Ok(())), None) => Err((
            FailureKind::InvocationError,
            "stream resolved without payload".to_string(),
        )),
        (Err(_), None) => Err((
            FailureKind::Timeout,
            format!("no '{event_name}' event within {}s", ceiling.as_secs()),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// 声明的 Content-Length 大于实际发送的字节后断开，客户端读取正文时得到传输错误
    async fn truncated_stream(body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            let head = "HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\ncontent-length: 4096\r\n\r\n";
            socket.write_all(head.as_bytes()).await.unwrap();
            socket.write_all(body.as_bytes()).await.unwrap();
            socket.flush().await.unwrap();
        });
        format!("http://{addr}/train")
    }

    #[tokio::test]
    async fn test_transport_error_after_event_keeps_payload() {
        let url = truncated_stream("event: progress\ndata: {\"epoch\": 3}\n\n").await;
        let result = subscribe(&Client::new(), &url, &[], "progress", Duration::from_secs(5)).await;
        assert_eq!(result, Ok(json!({"epoch": 3})));
    }

    #[tokio::test]
    async fn test_transport_error_before_event_fails() {
        let url = truncated_stream(": keep-alive\n\n").await;
        let result = subscribe(&Client::new(), &url, &[], "progress", Duration::from_secs(5)).await;
        match result {
            Err((kind, reason)) => {
                assert_eq!(kind, FailureKind::InvocationError);
                assert!(reason.starts_with("stream error"), "{reason}");
            }
            Ok(v) => panic!("expected failure, got {v}"),
        }
    }
}
