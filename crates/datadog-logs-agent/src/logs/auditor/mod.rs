//! Durable record of delivery progress.
//!
//! The auditor consumes every record the senders delivered and keeps, per
//! origin identifier, the offset of the last one. The registry is flushed
//! to `<run_path>/registry.json` every second and read back on start, so a
//! restarted agent can tell its tailers where to resume:
//!
//! ```text
//!   created ──start──> recovering ──> running ──stop──> stopping ──> stopped
//!                     (read file)    (update,          (drain, cleanup,
//!                                     cleanup, flush)    flush)
//! ```
//!
//! A missing or unreadable registry file is never fatal: the auditor starts
//! from an empty registry.

pub mod registry;

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::logs::constants::{
    CHAN_SIZE, DEFAULT_CLEANUP_PERIOD, DEFAULT_FLUSH_PERIOD, REGISTRY_FILENAME,
};
use crate::logs::message::Message;
use registry::{RegistryEntry, RegistryError};

/// Offset lookups for tailers.
pub trait Registry: Send + Sync {
    /// Last committed offset for `identifier`, empty when unknown.
    fn get_offset(&self, identifier: &str) -> String;
    /// Tailing mode recorded with the last committed offset, empty when unknown.
    fn get_tailing_mode(&self, identifier: &str) -> String;
}

#[async_trait]
pub trait Auditor: Registry {
    async fn start(&self);
    /// Drains the records already queued, then persists the registry.
    async fn stop(&self);
    /// Where senders forward delivered records, `None` while stopped.
    fn channel(&self) -> Option<mpsc::Sender<Message>>;
}

type Entries = Arc<RwLock<HashMap<String, RegistryEntry>>>;

struct Running {
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

/// The auditor backed by the registry file.
pub struct RegistryAuditor {
    registry_path: PathBuf,
    entry_ttl: Duration,
    entries: Entries,
    running: Mutex<Option<Running>>,
    input: RwLock<Option<mpsc::Sender<Message>>>,
}

impl RegistryAuditor {
    #[must_use]
    pub fn new(run_path: &Path, entry_ttl: Duration) -> Self {
        Self::with_filename(run_path, REGISTRY_FILENAME, entry_ttl)
    }

    #[must_use]
    pub fn with_filename(run_path: &Path, filename: &str, entry_ttl: Duration) -> Self {
        Self {
            registry_path: run_path.join(filename),
            entry_ttl,
            entries: Arc::new(RwLock::new(HashMap::new())),
            running: Mutex::new(None),
            input: RwLock::new(None),
        }
    }

    #[must_use]
    pub fn registry_path(&self) -> &Path {
        &self.registry_path
    }

    fn recover(&self) -> HashMap<String, RegistryEntry> {
        match registry::read(&self.registry_path) {
            Ok(entries) => entries,
            Err(RegistryError::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
                debug!(
                    "AUDITOR | Could not find state file at {}, will start with default offsets",
                    self.registry_path.display()
                );
                HashMap::new()
            }
            Err(e) => {
                error!(
                    "AUDITOR | Could not recover registry from {}, starting empty: {e}",
                    self.registry_path.display()
                );
                HashMap::new()
            }
        }
    }

    fn entry(&self, identifier: &str) -> Option<RegistryEntry> {
        read_entries(&self.entries).get(identifier).cloned()
    }
}

#[async_trait]
impl Auditor for RegistryAuditor {
    async fn start(&self) {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return;
        }

        *write_entries(&self.entries) = self.recover();
        cleanup(&self.entries, self.entry_ttl);

        let (tx, rx) = mpsc::channel(CHAN_SIZE);
        let stop = CancellationToken::new();
        let worker = AuditorWorker {
            input: rx,
            stop: stop.clone(),
            entries: Arc::clone(&self.entries),
            registry_path: self.registry_path.clone(),
            entry_ttl: self.entry_ttl,
        };
        *write_input(&self.input) = Some(tx);
        *running = Some(Running {
            stop,
            handle: tokio::spawn(worker.run()),
        });
    }

    async fn stop(&self) {
        let mut running = self.running.lock().await;
        write_input(&self.input).take();
        if let Some(Running { stop, handle }) = running.take() {
            stop.cancel();
            if let Err(e) = handle.await {
                error!("AUDITOR | Worker failed: {e}");
            }
        }
        cleanup(&self.entries, self.entry_ttl);
        if let Err(e) = flush(&self.entries, &self.registry_path).await {
            warn!("AUDITOR | {e}");
        }
    }

    fn channel(&self) -> Option<mpsc::Sender<Message>> {
        match self.input.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl Registry for RegistryAuditor {
    fn get_offset(&self, identifier: &str) -> String {
        self.entry(identifier)
            .map(|entry| entry.offset)
            .unwrap_or_default()
    }

    fn get_tailing_mode(&self, identifier: &str) -> String {
        self.entry(identifier)
            .map(|entry| entry.tailing_mode)
            .unwrap_or_default()
    }
}

struct AuditorWorker {
    input: mpsc::Receiver<Message>,
    stop: CancellationToken,
    entries: Entries,
    registry_path: PathBuf,
    entry_ttl: Duration,
}

impl AuditorWorker {
    async fn run(mut self) {
        let mut cleanup_ticker = ticker(DEFAULT_CLEANUP_PERIOD);
        let mut flush_ticker = ticker(DEFAULT_FLUSH_PERIOD);
        let mut file_error_logged = false;

        loop {
            tokio::select! {
                biased;
                () = self.stop.cancelled() => break,
                msg = self.input.recv() => match msg {
                    Some(msg) => self.update(&msg),
                    None => break,
                },
                _ = cleanup_ticker.tick() => cleanup(&self.entries, self.entry_ttl),
                _ = flush_ticker.tick() => {
                    match flush(&self.entries, &self.registry_path).await {
                        Ok(()) => {}
                        Err(RegistryError::Io(e))
                            if matches!(
                                e.kind(),
                                io::ErrorKind::PermissionDenied | io::ErrorKind::NotFound
                            ) =>
                        {
                            if !file_error_logged {
                                file_error_logged = true;
                                warn!("AUDITOR | Could not write registry: {e}");
                            }
                        }
                        Err(e) => warn!("AUDITOR | Could not write registry: {e}"),
                    }
                }
            }
        }

        self.input.close();
        while let Some(msg) = self.input.recv().await {
            self.update(&msg);
        }
        debug!("AUDITOR | Stopped");
    }

    fn update(&self, msg: &Message) {
        let origin = &msg.origin;
        // Origins without a durable position are not tracked.
        if origin.identifier.is_empty() {
            return;
        }
        write_entries(&self.entries).insert(
            origin.identifier.clone(),
            RegistryEntry {
                last_updated: Utc::now(),
                offset: origin.offset.clone(),
                tailing_mode: origin.tailing_mode().to_string(),
            },
        );
    }
}

fn ticker(period: Duration) -> tokio::time::Interval {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

/// Removes entries not updated within `ttl`.
fn cleanup(entries: &Entries, ttl: Duration) {
    let Ok(ttl) = chrono::Duration::from_std(ttl) else {
        return;
    };
    let Some(expire_before) = Utc::now().checked_sub_signed(ttl) else {
        return;
    };
    write_entries(entries).retain(|_, entry| entry.last_updated >= expire_before);
}

/// Writes a snapshot of `entries` to `path` on the blocking pool.
async fn flush(entries: &Entries, path: &Path) -> Result<(), RegistryError> {
    let snapshot = read_entries(entries).clone();
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || registry::write(&path, &snapshot)).await?
}

fn read_entries(entries: &Entries) -> RwLockReadGuard<'_, HashMap<String, RegistryEntry>> {
    match entries.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn write_entries(entries: &Entries) -> RwLockWriteGuard<'_, HashMap<String, RegistryEntry>> {
    match entries.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn write_input(
    input: &RwLock<Option<mpsc::Sender<Message>>>,
) -> RwLockWriteGuard<'_, Option<mpsc::Sender<Message>>> {
    match input.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Accepts delivered records and forgets them.
///
/// Used when no run path is configured.
#[derive(Default)]
pub struct NullAuditor {
    running: Mutex<Option<Running>>,
    input: RwLock<Option<mpsc::Sender<Message>>>,
}

impl NullAuditor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Auditor for NullAuditor {
    async fn start(&self) {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return;
        }
        let (tx, mut rx) = mpsc::channel::<Message>(CHAN_SIZE);
        let stop = CancellationToken::new();
        let token = stop.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = token.cancelled() => break,
                    msg = rx.recv() => if msg.is_none() { break },
                }
            }
        });
        *write_input(&self.input) = Some(tx);
        *running = Some(Running { stop, handle });
    }

    async fn stop(&self) {
        let mut running = self.running.lock().await;
        write_input(&self.input).take();
        if let Some(Running { stop, handle }) = running.take() {
            stop.cancel();
            if let Err(e) = handle.await {
                error!("AUDITOR | Worker failed: {e}");
            }
        }
    }

    fn channel(&self) -> Option<mpsc::Sender<Message>> {
        match self.input.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl Registry for NullAuditor {
    fn get_offset(&self, _identifier: &str) -> String {
        String::new()
    }

    fn get_tailing_mode(&self, _identifier: &str) -> String {
        String::new()
    }
}
