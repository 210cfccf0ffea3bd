//! 编排集成测试：wiremock 提供能力发现与能力端点，MockLlmClient 提供路由回答与最终回复

use std::sync::Arc;
use std::time::Duration;

use hive::config::AppConfig;
use hive::core::{OrchestratorBuilder, OrchestratorError, Phase};
use hive::llm::MockLlmClient;
use hive::memory::Role;
use hive::tools::InvocationResult;
use hive::Orchestrator;
use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_for(server: &MockServer) -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.discovery.base_url = server.uri();
    cfg.discovery.path = "/tools".into();
    cfg.invoker.timeout_secs = 5;
    cfg.invoker.stream_ceiling_secs = 2;
    cfg.orchestrator.request_timeout_secs = 10;
    cfg
}

fn build(cfg: AppConfig, llm: Arc<MockLlmClient>) -> Orchestrator {
    OrchestratorBuilder::new(cfg).with_llm(llm).build()
}

fn tool(base: &str, name: &str, route: &str, method: &str) -> Value {
    json!({
        "name": name,
        "description": format!("{name} capability"),
        "endpoint_url": format!("{base}{route}"),
        "method": method,
        "parameters": {}
    })
}

async fn mount_tools(server: &MockServer, tools: Value) {
    Mock::given(method("GET"))
        .and(path("/tools"))
        .respond_with(ResponseTemplate::new(200).set_body_json(tools))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_weather_request_end_to_end() {
    let server = MockServer::start().await;
    let mut weather = tool(&server.uri(), "get_weather", "/weather/{location}", "GET");
    weather["parameters"] = json!({"location": {"type": "string", "description": "city", "required": true}});
    mount_tools(&server, json!([weather])).await;
    Mock::given(method("GET"))
        .and(path("/weather/Rome"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"temp_c": 24, "sky": "clear"})))
        .expect(1)
        .mount(&server)
        .await;

    let llm = Arc::new(MockLlmClient::scripted([
        r#"{"selected_tool_name": "get_weather", "extracted_params": {"location": "Rome"}}"#,
        "It is 24°C and clear in Rome.",
    ]));
    let orch = build(config_for(&server), llm.clone());

    let outcome = orch.handle_user_message("t1", "What's the weather in Rome?").await;
    assert_eq!(outcome.phase, Phase::Completed);
    assert!(outcome.error.is_none());
    assert_eq!(outcome.final_response, "It is 24°C and clear in Rome.");
    assert_eq!(outcome.updated_history.len(), 2);
    assert_eq!(outcome.updated_history[0].role, Role::User);
    assert_eq!(outcome.updated_history[1].role, Role::Agent);

    // 汇总 prompt 中带有能力返回的数据
    let summary_prompt = llm.call(1).unwrap();
    assert!(summary_prompt.last().unwrap().content.contains("\"temp_c\": 24"));

    let stats = orch.tracker().stats(Some("t1")).await;
    assert_eq!(stats.operations["invoke"], 2);
    assert!(stats.agents.contains("get_weather"));
}

#[tokio::test]
async fn test_zero_capabilities_routes_to_general() {
    let server = MockServer::start().await;
    mount_tools(&server, json!([])).await;

    let llm = Arc::new(MockLlmClient::scripted(["I have no external capabilities right now."]));
    let orch = build(config_for(&server), llm.clone());

    let state = orch
        .run(
            "t1",
            "What capabilities are available?",
            vec![],
            tokio_util::sync::CancellationToken::new(),
        )
        .await;
    assert_eq!(state.current_phase, Phase::Completed);
    assert!(state.routing_decision.unwrap().is_general());
    // 路由没有调用模型，只有最终回答调用了一次
    assert_eq!(llm.call_count(), 1);
}

#[tokio::test]
async fn test_discovery_failure_without_snapshot_is_handled() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/tools"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let llm = Arc::new(MockLlmClient::new());
    let orch = build(config_for(&server), llm.clone());

    let outcome = orch.handle_user_message("t1", "hello").await;
    assert_eq!(outcome.phase, Phase::ErrorHandled);
    assert!(matches!(outcome.error, Some(OrchestratorError::Discovery(_))));
    assert!(outcome
        .final_response
        .starts_with("A problem occurred: capability discovery failed"));
    // 致歉消息同样写入会话历史
    assert_eq!(
        outcome.updated_history.last().unwrap().content,
        outcome.final_response
    );
    assert_eq!(llm.call_count(), 0);
}

#[tokio::test]
async fn test_stale_snapshot_survives_discovery_outage() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/tools"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([tool(&server.uri(), "ping", "/ping", "GET")])),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/tools"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let mut cfg = config_for(&server);
    cfg.discovery.ttl_secs = 0;
    let llm = Arc::new(MockLlmClient::scripted([
        r#"{"selected_tool_name": "none"}"#,
        "first",
        r#"{"selected_tool_name": "none"}"#,
        "second",
    ]));
    let orch = build(cfg, llm);

    let first = orch.handle_user_message("t1", "one").await;
    assert_eq!(first.phase, Phase::Completed);
    tokio::time::sleep(Duration::from_millis(5)).await;
    let second = orch.handle_user_message("t1", "two").await;
    assert_eq!(second.phase, Phase::Completed);
    assert_eq!(second.final_response, "second");
    assert_eq!(orch.registry().current().await.len(), 1);
}

#[tokio::test]
async fn test_multi_capability_partial_success() {
    let server = MockServer::start().await;
    let base = server.uri();
    mount_tools(
        &server,
        json!([
            tool(&base, "alpha", "/alpha", "GET"),
            tool(&base, "beta", "/beta", "POST"),
            tool(&base, "gamma", "/gamma", "GET"),
        ]),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/alpha"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"a": 1})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/beta"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/gamma"))
        .respond_with(ResponseTemplate::new(200).set_body_string("g"))
        .mount(&server)
        .await;

    let llm = Arc::new(MockLlmClient::scripted([
        r#"{"selected_tool_name": "alpha", "extracted_params": {},
            "additional_tools": [{"selected_tool_name": "beta"}, {"selected_tool_name": "gamma"}]}"#,
        "Two of three sources answered.",
    ]));
    let orch = build(config_for(&server), llm);

    let state = orch
        .run("t1", "ask everyone", vec![], tokio_util::sync::CancellationToken::new())
        .await;
    assert_eq!(state.current_phase, Phase::Completed);
    let batch = state.invocation_results.unwrap();
    assert_eq!(batch.len(), 3);
    assert_eq!(batch.success_count(), 2);
    assert!(batch.is_success());
    assert!(matches!(&batch.results[1], InvocationResult::Failure { capability, .. } if capability == "beta"));
}

#[tokio::test]
async fn test_streaming_capability_keeps_event_before_stream_end() {
    let server = MockServer::start().await;
    let mut stream = tool(&server.uri(), "train_model", "/train", "SSE");
    stream["sse_event_name"] = json!("progress");
    mount_tools(&server, json!([stream])).await;
    Mock::given(method("GET"))
        .and(path("/train"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string("event: progress\ndata: {\"epoch\": 1}\n\n"),
        )
        .mount(&server)
        .await;

    let llm = Arc::new(MockLlmClient::scripted([
        r#"{"selected_tool_name": "train_model"}"#,
        "Training reached epoch 1.",
    ]));
    let orch = build(config_for(&server), llm);

    let state = orch
        .run("t1", "train it", vec![], tokio_util::sync::CancellationToken::new())
        .await;
    assert_eq!(state.current_phase, Phase::Completed);
    let batch = state.invocation_results.unwrap();
    assert_eq!(
        batch.results[0],
        InvocationResult::success("train_model", json!({"epoch": 1}))
    );
}

#[tokio::test]
async fn test_cancel_in_flight_request() {
    let server = MockServer::start().await;
    mount_tools(&server, json!([tool(&server.uri(), "slow", "/slow", "GET")])).await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
        .mount(&server)
        .await;

    let llm = Arc::new(MockLlmClient::scripted([r#"{"selected_tool_name": "slow"}"#]));
    let orch = build(config_for(&server), llm);
    let supervisor = orch.supervisor();

    let (outcome, cancelled) = tokio::join!(orch.handle_user_message("t1", "go slow"), async {
        tokio::time::sleep(Duration::from_millis(300)).await;
        supervisor.cancel("t1").await
    });
    assert!(cancelled);
    assert_eq!(outcome.phase, Phase::ErrorHandled);
    assert_eq!(outcome.error, Some(OrchestratorError::Cancelled));
    assert_eq!(outcome.final_response, "A problem occurred: request cancelled");
    // 取消同样留下一条 agent 轮次
    let last = outcome.updated_history.last().unwrap();
    assert_eq!(last.role, Role::Agent);
    assert_eq!(last.content, outcome.final_response);
    assert_eq!(supervisor.active_count().await, 0);
}

#[tokio::test]
async fn test_every_run_terminates() {
    let server = MockServer::start().await;
    mount_tools(&server, json!([tool(&server.uri(), "ping", "/ping", "GET")])).await;

    let llm = Arc::new(MockLlmClient::scripted([
        "not json at all",
        "fallback answer",
        r#"{"selected_tool_name": "ping", "extracted_params": [1, 2]}"#,
        "ping failed",
    ]));
    let orch = build(config_for(&server), llm);

    for query in ["", "ping please"] {
        let outcome = orch.handle_user_message("t1", query).await;
        assert!(outcome.phase.is_terminal(), "query {query:?} ended in {:?}", outcome.phase);
    }
}
