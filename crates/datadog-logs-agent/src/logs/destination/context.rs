//! Shared cancellation scope for in-flight deliveries.

use std::sync::Mutex;

use tokio_util::sync::CancellationToken;

/// Every destination fetches its token from here before a network call.
///
/// Stopping the context cancels that token, which aborts outstanding sends
/// and ends the background workers of additional destinations. Until the
/// context is started (and after it is stopped) the returned token is
/// already cancelled.
#[derive(Debug, Default)]
pub struct DestinationsContext {
    token: Mutex<Option<CancellationToken>>,
}

impl DestinationsContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a fresh scope.
    pub fn start(&self) {
        let mut token = match self.token.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(previous) = token.replace(CancellationToken::new()) {
            previous.cancel();
        }
    }

    /// Cancels the current scope.
    pub fn stop(&self) {
        let mut token = match self.token.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(current) = token.take() {
            current.cancel();
        }
    }

    #[must_use]
    pub fn token(&self) -> CancellationToken {
        let token = match self.token.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        token.clone().unwrap_or_else(|| {
            let stopped = CancellationToken::new();
            stopped.cancel();
            stopped
        })
    }
}
