//! A fixed set of pipelines with round-robin distribution.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use futures::future::join_all;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::config::endpoints::Endpoints;
use crate::config::processing_rule::Rule;
use crate::logs::auditor::Auditor;
use crate::logs::destination::context::DestinationsContext;
use crate::logs::diagnostic::MessageReceiver;
use crate::logs::encoder::Encoder;
use crate::logs::message::Message;
use crate::logs::pipeline::Pipeline;
use crate::logs::sender::Backoff;

/// Everything a pipeline needs besides its destinations.
pub struct PipelineSettings {
    pub rules: Arc<[Rule]>,
    pub backoff: Backoff,
    pub encoder: Arc<dyn Encoder>,
    pub diagnostic: Arc<dyn MessageReceiver>,
}

/// Owns `number_of_pipelines` pipelines, all created on [`Provider::start`]
/// and forwarding delivered records to the auditor.
///
/// Ordering is only preserved within one pipeline: records pushed to the
/// queues returned by consecutive [`Provider::next_pipeline_chan`] calls
/// may be delivered in any order.
pub struct Provider {
    number_of_pipelines: usize,
    auditor: Arc<dyn Auditor>,
    endpoints: Endpoints,
    context: Arc<DestinationsContext>,
    settings: PipelineSettings,
    pipelines: Mutex<Vec<Pipeline>>,
    inputs: RwLock<Vec<mpsc::Sender<Message>>>,
    current: AtomicUsize,
}

impl Provider {
    #[must_use]
    pub fn new(
        number_of_pipelines: usize,
        auditor: Arc<dyn Auditor>,
        endpoints: Endpoints,
        context: Arc<DestinationsContext>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            number_of_pipelines,
            auditor,
            endpoints,
            context,
            settings,
            pipelines: Mutex::new(Vec::new()),
            inputs: RwLock::new(Vec::new()),
            current: AtomicUsize::new(0),
        }
    }

    /// Creates and starts the pipelines. The auditor must be running.
    pub async fn start(&self) {
        let mut pipelines = self.pipelines.lock().await;
        if !pipelines.is_empty() {
            return;
        }
        let Some(output) = self.auditor.channel() else {
            error!("LOGS | Cannot start pipelines, the auditor is not running");
            return;
        };
        let mut inputs = Vec::with_capacity(self.number_of_pipelines);
        for _ in 0..self.number_of_pipelines {
            let mut pipeline = Pipeline::from_endpoints(
                output.clone(),
                Arc::clone(&self.settings.rules),
                &self.endpoints,
                &self.context,
                self.settings.backoff,
                Arc::clone(&self.settings.encoder),
                Arc::clone(&self.settings.diagnostic),
            );
            pipeline.start();
            inputs.push(pipeline.input_chan());
            pipelines.push(pipeline);
        }
        *self.write_inputs() = inputs;
        debug!("LOGS | Started {} pipelines", pipelines.len());
    }

    /// Stops every pipeline in parallel and waits for all of them.
    pub async fn stop(&self) {
        self.write_inputs().clear();
        let mut pipelines = self.pipelines.lock().await;
        join_all(pipelines.iter_mut().map(|pipeline| pipeline.stop())).await;
        pipelines.clear();
    }

    /// Flushes the pipelines one after the other, until `token` is cancelled.
    pub async fn flush(&self, token: &CancellationToken) {
        let pipelines = self.pipelines.lock().await;
        for pipeline in pipelines.iter() {
            if token.is_cancelled() {
                return;
            }
            pipeline.flush(token).await;
        }
    }

    /// Input queue of the next pipeline in rotation, `None` when not started.
    #[must_use]
    pub fn next_pipeline_chan(&self) -> Option<mpsc::Sender<Message>> {
        let inputs = match self.inputs.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if inputs.is_empty() {
            return None;
        }
        let index = self
            .current
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                Some((current + 1) % inputs.len())
            })
            .unwrap_or_default();
        inputs.get(index % inputs.len()).cloned()
    }

    fn write_inputs(&self) -> std::sync::RwLockWriteGuard<'_, Vec<mpsc::Sender<Message>>> {
        match self.inputs.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::endpoints::Endpoint;
    use crate::logs::auditor::NullAuditor;
    use crate::logs::diagnostic::NoopMessageReceiver;
    use crate::logs::encoder::JsonEncoder;
    use std::time::Duration;

    async fn provider(number_of_pipelines: usize) -> Provider {
        let auditor = Arc::new(NullAuditor::new());
        auditor.start().await;
        let endpoint = Endpoint {
            api_key: "key".to_string(),
            host: "127.0.0.1".to_string(),
            port: 9,
            use_ssl: false,
            use_compression: false,
            compression_level: 0,
            proxy_address: None,
            connection_reset_interval: Duration::ZERO,
        };
        let endpoints = Endpoints {
            main: endpoint,
            additionals: Vec::new(),
            use_http: true,
            batch_wait: Duration::from_secs(5),
            batch_max_concurrent_send: 0,
            batch_max_size: 100,
            batch_max_content_size: 1_000_000,
        };
        Provider::new(
            number_of_pipelines,
            auditor,
            endpoints,
            Arc::new(DestinationsContext::new()),
            PipelineSettings {
                rules: Arc::from(Vec::new()),
                backoff: Backoff::none(),
                encoder: Arc::new(JsonEncoder::new(String::new(), String::new(), String::new())),
                diagnostic: Arc::new(NoopMessageReceiver),
            },
        )
    }

    #[tokio::test]
    async fn test_round_robin_returns_each_pipeline_twice() {
        let provider = provider(3).await;
        assert!(provider.next_pipeline_chan().is_none());
        provider.start().await;

        let chans: Vec<_> = (0..6)
            .map(|_| provider.next_pipeline_chan().expect("started"))
            .collect();
        for i in 0..3 {
            assert!(chans[i].same_channel(&chans[i + 3]));
            assert!(!chans[i].same_channel(&chans[(i + 1) % 3]));
        }

        provider.stop().await;
        assert!(provider.next_pipeline_chan().is_none());
    }

    #[tokio::test]
    async fn test_start_requires_running_auditor() {
        let provider = Provider::new(
            1,
            Arc::new(NullAuditor::new()),
            provider(1).await.endpoints,
            Arc::new(DestinationsContext::new()),
            PipelineSettings {
                rules: Arc::from(Vec::new()),
                backoff: Backoff::none(),
                encoder: Arc::new(JsonEncoder::new(String::new(), String::new(), String::new())),
                diagnostic: Arc::new(NoopMessageReceiver),
            },
        );
        provider.start().await;
        assert!(provider.next_pipeline_chan().is_none());
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let provider = provider(2).await;
        provider.start().await;
        provider.start().await;
        assert_eq!(provider.pipelines.lock().await.len(), 2);
        provider.stop().await;
    }

    #[tokio::test]
    async fn test_flush_honors_cancelled_token() {
        let provider = provider(2).await;
        provider.start().await;
        let token = CancellationToken::new();
        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), provider.flush(&token))
            .await
            .expect("returns immediately");
        provider.stop().await;
    }
}
