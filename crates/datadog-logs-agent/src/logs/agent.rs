//! Composition root of the logs pipeline.
//!
//! [`LogsAgent`] owns the destinations context, the auditor, the pipeline
//! provider and the diagnostic receiver. Tailers live outside of it: they
//! look up where to resume with [`Registry::get_offset`] and push records to
//! [`LogsAgent::next_pipeline_chan`].
//!
//! # Shutdown
//!
//! Tailers must be stopped before [`LogsAgent::stop`] is called. The agent
//! then stops its components one after the other:
//!
//! 1. the provider, which stops each pipeline (processor, then sender)
//! 2. the auditor, which persists the offsets of everything delivered
//! 3. the destinations context
//! 4. the diagnostic receiver
//!
//! If this takes longer than `logs_config.stop_grace_period`, the
//! destinations context is cancelled to abort in-flight sends, and after
//! [`FORCE_STOP_TIMEOUT`] more the agent gives up waiting and reports which
//! components are still stopping.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::endpoints::{
    build_endpoints, build_http_endpoints, needs_connectivity_probe, Endpoints, HttpConnectivity,
};
use crate::config::processing_rule::compile_rules;
use crate::config::{Config, ConfigError};
use crate::hostname::resolve_hostname;
use crate::logs::auditor::{Auditor, NullAuditor, Registry, RegistryAuditor};
use crate::logs::constants::FORCE_STOP_TIMEOUT;
use crate::logs::destination::context::DestinationsContext;
use crate::logs::destination::http::check_connectivity;
use crate::logs::diagnostic::BufferedMessageReceiver;
use crate::logs::encoder::JsonEncoder;
use crate::logs::message::Message;
use crate::logs::provider::{PipelineSettings, Provider};
use crate::logs::sender::Backoff;
use crate::logs::tag::HostTagProvider;

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("logs agent already started")]
    AlreadyStarted,
    #[error("logs agent not started")]
    NotStarted,
    #[error(transparent)]
    Config(#[from] ConfigError),
}

const STOP_ORDER: [&str; 4] = [
    "pipeline provider",
    "auditor",
    "destinations context",
    "diagnostic receiver",
];

#[allow(clippy::module_name_repetitions)]
pub struct LogsAgent {
    context: Arc<DestinationsContext>,
    auditor: Arc<dyn Auditor>,
    provider: Arc<Provider>,
    diagnostic: Arc<BufferedMessageReceiver>,
    stop_grace_period: Duration,
    started: AtomicBool,
}

impl LogsAgent {
    /// Resolves the transport (probing HTTP connectivity when neither
    /// `use_http` nor `use_tcp` is set) and builds the agent.
    pub async fn new(config: &Config) -> Result<Self, AgentError> {
        let connectivity = if needs_connectivity_probe(config) {
            check_connectivity(&build_http_endpoints(config)?.main).await
        } else {
            HttpConnectivity::Failure
        };
        let endpoints = build_endpoints(config, connectivity)?;
        Ok(Self::with_endpoints(config, endpoints))
    }

    /// Builds the agent for already resolved endpoints.
    #[must_use]
    pub fn with_endpoints(config: &Config, endpoints: Endpoints) -> Self {
        let context = Arc::new(DestinationsContext::new());
        let auditor = build_auditor(&config.logs_config_run_path, config.logs_config_auditor_ttl);
        let diagnostic = Arc::new(BufferedMessageReceiver::default());

        let hostname = resolve_hostname(config.hostname.as_deref());
        let rules = compile_rules(
            config
                .logs_config_processing_rules
                .as_deref()
                .unwrap_or_default(),
        );
        let settings = PipelineSettings {
            rules: rules.into(),
            backoff: Backoff::from_config(config),
            encoder: Arc::new(
                JsonEncoder::new(hostname, config.ident.clone(), config.alias.clone())
                    .with_host_tags(HostTagProvider::new(
                        config.tags.clone(),
                        config.logs_config_expected_tags_duration,
                    )),
            ),
            diagnostic: Arc::clone(&diagnostic) as _,
        };
        let provider = Arc::new(Provider::new(
            config.logs_config_pipelines,
            Arc::clone(&auditor),
            endpoints,
            Arc::clone(&context),
            settings,
        ));

        Self {
            context,
            auditor,
            provider,
            diagnostic,
            stop_grace_period: config.logs_config_stop_grace_period,
            started: AtomicBool::new(false),
        }
    }

    /// Starts the destinations context, the auditor, the pipelines and the
    /// diagnostic receiver, in that order.
    pub async fn start(&self) -> Result<(), AgentError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(AgentError::AlreadyStarted);
        }
        self.context.start();
        self.auditor.start().await;
        self.provider.start().await;
        self.diagnostic.enable();
        info!("LOGS | Logs agent started");
        Ok(())
    }

    /// Runs the ordered shutdown, bounded by the stop grace period.
    pub async fn stop(&self) -> Result<(), AgentError> {
        if !self.started.swap(false, Ordering::SeqCst) {
            return Err(AgentError::NotStarted);
        }

        let stage = Arc::new(AtomicUsize::new(0));
        let mut shutdown = tokio::spawn(ordered_stop(
            Arc::clone(&self.provider),
            Arc::clone(&self.auditor),
            Arc::clone(&self.context),
            Arc::clone(&self.diagnostic),
            Arc::clone(&stage),
        ));

        if tokio::time::timeout(self.stop_grace_period, &mut shutdown)
            .await
            .is_ok()
        {
            info!("LOGS | Logs agent stopped");
            return Ok(());
        }

        info!("LOGS | Timed out when stopping logs agent, forcing it to stop now");
        self.context.stop();
        if tokio::time::timeout(FORCE_STOP_TIMEOUT, &mut shutdown)
            .await
            .is_err()
        {
            let pending = STOP_ORDER
                .get(stage.load(Ordering::SeqCst)..)
                .unwrap_or_default()
                .join(", ");
            warn!("LOGS | Force close of the logs agent, still stopping: {pending}");
        }
        Ok(())
    }

    /// Flushes every pipeline, until `token` is cancelled.
    pub async fn flush(&self, token: &CancellationToken) {
        self.provider.flush(token).await;
    }

    /// Input queue of the next pipeline, `None` until the agent is started.
    #[must_use]
    pub fn next_pipeline_chan(&self) -> Option<mpsc::Sender<Message>> {
        self.provider.next_pipeline_chan()
    }

    #[must_use]
    pub fn provider(&self) -> &Arc<Provider> {
        &self.provider
    }

    #[must_use]
    pub fn diagnostic(&self) -> &Arc<BufferedMessageReceiver> {
        &self.diagnostic
    }

    /// Offset lookups for tailers, backed by the auditor.
    #[must_use]
    pub fn registry(&self) -> &dyn Registry {
        self
    }
}

impl Registry for LogsAgent {
    fn get_offset(&self, identifier: &str) -> String {
        self.auditor.get_offset(identifier)
    }

    fn get_tailing_mode(&self, identifier: &str) -> String {
        self.auditor.get_tailing_mode(identifier)
    }
}

fn build_auditor(run_path: &Path, ttl: Duration) -> Arc<dyn Auditor> {
    if run_path.as_os_str().is_empty() {
        debug!("LOGS | No run path configured, offsets will not be persisted");
        Arc::new(NullAuditor::new())
    } else {
        Arc::new(RegistryAuditor::new(run_path, ttl))
    }
}

async fn ordered_stop(
    provider: Arc<Provider>,
    auditor: Arc<dyn Auditor>,
    context: Arc<DestinationsContext>,
    diagnostic: Arc<BufferedMessageReceiver>,
    stage: Arc<AtomicUsize>,
) {
    provider.stop().await;
    stage.store(1, Ordering::SeqCst);
    auditor.stop().await;
    stage.store(2, Ordering::SeqCst);
    context.stop();
    stage.store(3, Ordering::SeqCst);
    diagnostic.disable();
    stage.store(4, Ordering::SeqCst);
}
