//! End-to-end tests for the logs pipeline
//!
//! A mock intake stands in for the Datadog backend. Records pushed to the
//! agent must come out the other side redacted, JSON encoded, gzip
//! compressed, in order, and their offsets must be in the registry once the
//! agent has stopped.

use std::io::Read;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    body::Bytes,
    http::{HeaderMap, StatusCode},
    routing::post,
    Router,
};
use datadog_logs_agent::config::endpoints::{build_endpoints, HttpConnectivity};
use datadog_logs_agent::config::processing_rule::{Kind, ProcessingRule};
use datadog_logs_agent::config::Config;
use datadog_logs_agent::logs::agent::LogsAgent;
use datadog_logs_agent::logs::auditor::{registry, Registry};
use datadog_logs_agent::logs::message::{LogSource, LogsConfig, Message, Origin};
use flate2::read::GzDecoder;

#[derive(Debug, Clone)]
struct CapturedRequest {
    headers: HeaderMap,
    body: Vec<u8>,
}

/// Intake answering 200 to everything and keeping what it received.
struct MockIntake {
    address: String,
    captured: Arc<Mutex<Vec<CapturedRequest>>>,
}

impl MockIntake {
    async fn start() -> Self {
        let captured = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&captured);
        let router = Router::new().route(
            "/api/v1/logs/input",
            post(move |headers: HeaderMap, body: Bytes| {
                let sink = Arc::clone(&sink);
                async move {
                    sink.lock().expect("lock").push(CapturedRequest {
                        headers,
                        body: body.to_vec(),
                    });
                    StatusCode::OK
                }
            }),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock intake");
        let address = listener.local_addr().expect("local addr").to_string();
        tokio::spawn(async move {
            axum::serve(listener, router).await.expect("serve");
        });

        Self { address, captured }
    }

    fn requests(&self) -> Vec<CapturedRequest> {
        self.captured.lock().expect("lock").clone()
    }

    async fn wait_for(&self, count: usize) -> Vec<CapturedRequest> {
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let requests = self.requests();
                if requests.len() >= count {
                    return requests;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("intake received the payloads in time")
    }
}

fn config(intake: &MockIntake, run_path: &Path) -> Config {
    Config {
        api_key: "e2e-api-key".to_string(),
        hostname: Some("e2e-host".to_string()),
        logs_config_logs_dd_url: format!("http://{}", intake.address),
        logs_config_use_http: true,
        logs_config_use_compression: true,
        logs_config_pipelines: 1,
        logs_config_run_path: run_path.to_path_buf(),
        logs_config_sender_backoff_base: 0.0,
        ..Config::default()
    }
}

fn agent(config: &Config) -> LogsAgent {
    let endpoints = build_endpoints(config, HttpConnectivity::Success).expect("endpoints");
    LogsAgent::with_endpoints(config, endpoints)
}

fn gunzip(body: &[u8]) -> serde_json::Value {
    let mut decoded = String::new();
    GzDecoder::new(body)
        .read_to_string(&mut decoded)
        .expect("gzip body");
    serde_json::from_str(&decoded).expect("json payload")
}

async fn push(agent: &LogsAgent, source: &Arc<LogSource>, content: &str, offset: &str) {
    agent
        .next_pipeline_chan()
        .expect("agent started")
        .send(Message::new(
            content,
            Origin::with_position(Arc::clone(source), "f1", offset),
            "info",
        ))
        .await
        .expect("pipeline accepts records");
}

#[tokio::test]
async fn test_records_are_delivered_in_order_and_audited() {
    let intake = MockIntake::start().await;
    let dir = tempfile::tempdir().expect("tempdir");
    let config = config(&intake, dir.path());
    let agent = agent(&config);
    agent.start().await.expect("start");

    let source = Arc::new(LogSource::new(
        "e2e",
        LogsConfig {
            service: "checkout".to_string(),
            source: "nginx".to_string(),
            ..LogsConfig::default()
        },
    ));
    for (content, offset) in [("a", "10"), ("b", "20"), ("c", "30")] {
        push(&agent, &source, content, offset).await;
    }

    let requests = intake.wait_for(3).await;
    let messages: Vec<String> = requests
        .iter()
        .map(|request| {
            assert_eq!(request.headers["DD-API-KEY"], "e2e-api-key");
            assert_eq!(request.headers["Content-Encoding"], "gzip");
            assert_eq!(request.headers["Content-Type"], "application/json");
            let payload = gunzip(&request.body);
            assert_eq!(payload["hostname"], "e2e-host");
            assert_eq!(payload["service"], "checkout");
            assert_eq!(payload["source"], "nginx");
            payload["message"].as_str().expect("message").to_string()
        })
        .collect();
    assert_eq!(messages, vec!["a", "b", "c"]);

    agent.stop().await.expect("stop");
    assert_eq!(agent.get_offset("f1"), "30");

    let persisted =
        registry::read(&dir.path().join("registry.json")).expect("registry written on stop");
    assert_eq!(persisted["f1"].offset, "30");
}

#[tokio::test]
async fn test_processing_rules_apply_before_delivery() {
    let intake = MockIntake::start().await;
    let dir = tempfile::tempdir().expect("tempdir");
    let config = Config {
        logs_config_processing_rules: Some(vec![
            ProcessingRule {
                kind: Kind::ExcludeAtMatch,
                name: "drop_healthchecks".to_string(),
                pattern: "GET /health".to_string(),
                replace_placeholder: None,
            },
            ProcessingRule {
                kind: Kind::MaskSequences,
                name: "mask_tokens".to_string(),
                pattern: r"token=\w+".to_string(),
                replace_placeholder: Some("token=[masked]".to_string()),
            },
        ]),
        ..config(&intake, dir.path())
    };
    let agent = agent(&config);
    agent.start().await.expect("start");

    let source = Arc::new(LogSource::new("e2e", LogsConfig::default()));
    push(&agent, &source, "GET /health 200", "1").await;
    push(&agent, &source, "login token=abc123 ok", "2").await;

    let requests = intake.wait_for(1).await;
    agent.stop().await.expect("stop");

    assert_eq!(intake.requests().len(), 1);
    assert_eq!(
        gunzip(&requests[0].body)["message"],
        "login token=[masked] ok"
    );
    assert_eq!(agent.get_offset("f1"), "2");
}

#[tokio::test]
async fn test_offsets_survive_a_restart() {
    let intake = MockIntake::start().await;
    let dir = tempfile::tempdir().expect("tempdir");
    let config = config(&intake, dir.path());

    let first = agent(&config);
    first.start().await.expect("start");
    let source = Arc::new(LogSource::new("e2e", LogsConfig::default()));
    push(&first, &source, "before restart", "42").await;
    intake.wait_for(1).await;
    first.stop().await.expect("stop");

    let second = agent(&config);
    second.start().await.expect("restart");
    assert_eq!(second.get_offset("f1"), "42");
    second.stop().await.expect("stop");
}
