//! Backend failure and retry tests for the logs pipeline
//!
//! Server errors are retried on the main destination until they succeed,
//! client errors drop the payload. Only delivered records move the offsets.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{body::Bytes, http::StatusCode, routing::post, Router};
use datadog_logs_agent::config::endpoints::{build_endpoints, HttpConnectivity};
use datadog_logs_agent::config::Config;
use datadog_logs_agent::logs::agent::LogsAgent;
use datadog_logs_agent::logs::auditor::Registry;
use datadog_logs_agent::logs::message::{LogSource, LogsConfig, Message, Origin};

/// Intake answering with a scripted status per call, 200 once the script
/// runs out.
struct ScriptedIntake {
    address: String,
    calls: Arc<AtomicUsize>,
    accepted: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl ScriptedIntake {
    async fn start(script: Vec<StatusCode>) -> Self {
        let calls = Arc::new(AtomicUsize::new(0));
        let accepted = Arc::new(Mutex::new(Vec::new()));
        let (counter, sink) = (Arc::clone(&calls), Arc::clone(&accepted));
        let script = Arc::new(script);

        let router = Router::new().route(
            "/api/v1/logs/input",
            post(move |body: Bytes| {
                let (counter, sink, script) =
                    (Arc::clone(&counter), Arc::clone(&sink), Arc::clone(&script));
                async move {
                    let call = counter.fetch_add(1, Ordering::SeqCst);
                    let status = script.get(call).copied().unwrap_or(StatusCode::OK);
                    if status.is_success() {
                        sink.lock().expect("lock").push(body.to_vec());
                    }
                    status
                }
            }),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind scripted intake");
        let address = listener.local_addr().expect("local addr").to_string();
        tokio::spawn(async move {
            axum::serve(listener, router).await.expect("serve");
        });

        Self {
            address,
            calls,
            accepted,
        }
    }

    fn accepted(&self) -> Vec<serde_json::Value> {
        self.accepted
            .lock()
            .expect("lock")
            .iter()
            .map(|body| serde_json::from_slice(body).expect("json payload"))
            .collect()
    }

    async fn wait_for_accepted(&self, count: usize) {
        tokio::time::timeout(Duration::from_secs(10), async {
            while self.accepted.lock().expect("lock").len() < count {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("intake accepted the payloads in time");
    }
}

fn agent(intake: &ScriptedIntake, run_path: &std::path::Path) -> LogsAgent {
    let config = Config {
        api_key: "failure-api-key".to_string(),
        hostname: Some("failure-host".to_string()),
        logs_config_logs_dd_url: format!("http://{}", intake.address),
        logs_config_use_http: true,
        logs_config_use_compression: false,
        logs_config_pipelines: 1,
        logs_config_run_path: run_path.to_path_buf(),
        logs_config_sender_backoff_base: 0.01,
        logs_config_sender_backoff_max: 0.05,
        ..Config::default()
    };
    let endpoints = build_endpoints(&config, HttpConnectivity::Success).expect("endpoints");
    LogsAgent::with_endpoints(&config, endpoints)
}

fn record(source: &Arc<LogSource>, content: &str, identifier: &str, offset: &str) -> Message {
    Message::new(
        content,
        Origin::with_position(Arc::clone(source), identifier, offset),
        "info",
    )
}

#[tokio::test]
async fn test_server_errors_are_retried_until_delivered() {
    let intake = ScriptedIntake::start(vec![
        StatusCode::INTERNAL_SERVER_ERROR,
        StatusCode::SERVICE_UNAVAILABLE,
    ])
    .await;
    let dir = tempfile::tempdir().expect("tempdir");
    let agent = agent(&intake, dir.path());
    agent.start().await.expect("start");

    let source = Arc::new(LogSource::new("failures", LogsConfig::default()));
    agent
        .next_pipeline_chan()
        .expect("started")
        .send(record(&source, "eventually", "f1", "7"))
        .await
        .expect("send");

    intake.wait_for_accepted(1).await;
    agent.stop().await.expect("stop");

    assert_eq!(intake.calls.load(Ordering::SeqCst), 3);
    assert_eq!(intake.accepted()[0]["message"], "eventually");
    assert_eq!(agent.get_offset("f1"), "7");
}

#[tokio::test]
async fn test_client_errors_drop_the_payload() {
    let intake = ScriptedIntake::start(vec![StatusCode::FORBIDDEN]).await;
    let dir = tempfile::tempdir().expect("tempdir");
    let agent = agent(&intake, dir.path());
    agent.start().await.expect("start");

    let source = Arc::new(LogSource::new("failures", LogsConfig::default()));
    let input = agent.next_pipeline_chan().expect("started");
    input
        .send(record(&source, "rejected", "f1", "1"))
        .await
        .expect("send");
    input
        .send(record(&source, "accepted", "f2", "2"))
        .await
        .expect("send");

    intake.wait_for_accepted(1).await;
    agent.stop().await.expect("stop");

    // One call for each record: the rejected one is not retried.
    assert_eq!(intake.calls.load(Ordering::SeqCst), 2);
    let messages: Vec<_> = intake
        .accepted()
        .iter()
        .map(|payload| payload["message"].clone())
        .collect();
    assert_eq!(messages, vec!["accepted"]);
    assert_eq!(agent.get_offset("f1"), "");
    assert_eq!(agent.get_offset("f2"), "2");
}
