//! Store lifecycle and the persistence disciplines.
//!
//! The [`Store`] owns the state graph behind a single async mutex and a
//! background flusher task. Three write paths exist:
//!
//! * [`Store::save_now`] writes the whole graph before returning.
//! * [`Store::schedule_save`] asks the flusher to write once no further
//!   request arrived for the debounce window; a burst of requests produces
//!   one write.
//! * The flusher also writes unconditionally every flush interval.
//!
//! Writes run on the blocking pool against a copy of the graph. Disk
//! failures on these paths are logged and never propagated: the
//! in-memory graph stays authoritative and the next flush retries.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use minichat_shared::constants::{FLUSH_INTERVAL_SECS, SAVE_DEBOUNCE_MS};
use tokio::sync::{mpsc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};

use crate::error::Result;
use crate::models::StateGraph;
use crate::snapshot;

/// Timing knobs for the flusher.
#[derive(Debug, Clone, Copy)]
pub struct StoreOptions {
    pub debounce: Duration,
    pub flush_interval: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(SAVE_DEBOUNCE_MS),
            flush_interval: Duration::from_secs(FLUSH_INTERVAL_SECS),
        }
    }
}

enum FlushRequest {
    Debounced,
    Shutdown,
}

struct Inner {
    path: PathBuf,
    state: Mutex<StateGraph>,
    /// Held for a whole flush so writes land in the order they copied the graph.
    writer: Mutex<()>,
    flushes: AtomicU64,
}

impl Inner {
    /// Copy the graph under the state lock, then write the copy on the
    /// blocking pool. Mutators only wait for the copy, never for the disk.
    async fn flush(&self) -> Result<()> {
        let _writer = self.writer.lock().await;
        let graph = self.state.lock().await.clone();
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || snapshot::write(&path, &graph)).await??;
        self.flushes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn flush_logged(&self, reason: &'static str) {
        match self.flush().await {
            Ok(()) => tracing::trace!(reason, path = %self.path.display(), "state flushed"),
            Err(e) => tracing::error!(reason, error = %e, "state flush failed"),
        }
    }
}

/// Cheaply cloneable handle to the state graph and its persistence.
#[derive(Clone)]
pub struct Store {
    inner: Arc<Inner>,
    tx: mpsc::UnboundedSender<FlushRequest>,
    flusher: Arc<std::sync::Mutex<Option<JoinHandle<()>>>>,
}

impl Store {
    /// Load the document at `path`, or create an empty one, and start the
    /// flusher. Must be called inside a tokio runtime.
    ///
    /// A migrated document is rewritten immediately in the current layout.
    pub async fn open(path: impl AsRef<Path>, options: StoreOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        tracing::info!(path = %path.display(), "opening state document");

        let (state, rewrite) = match snapshot::load(&path)? {
            Some(loaded) => {
                let migrated = loaded.migrated();
                tracing::info!(
                    users = loaded.state.users.len(),
                    chats = loaded.state.chats.len(),
                    groups = loaded.state.groups.len(),
                    channels = loaded.state.channels.len(),
                    "state document loaded"
                );
                (loaded.state, migrated)
            }
            None => {
                tracing::info!("creating new state document");
                (StateGraph::default(), true)
            }
        };

        let inner = Arc::new(Inner {
            path,
            state: Mutex::new(state),
            writer: Mutex::new(()),
            flushes: AtomicU64::new(0),
        });

        if rewrite {
            inner.flush().await?;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_flusher(inner.clone(), rx, options));

        Ok(Self {
            inner,
            tx,
            flusher: Arc::new(std::sync::Mutex::new(Some(handle))),
        })
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Run `f` against the graph without mutating it.
    pub async fn read<R>(&self, f: impl FnOnce(&StateGraph) -> R) -> R {
        let state = self.inner.state.lock().await;
        f(&state)
    }

    /// Run `f` with exclusive access to the graph. Persisting the change is
    /// up to the caller.
    pub async fn write<R>(&self, f: impl FnOnce(&mut StateGraph) -> R) -> R {
        let mut state = self.inner.state.lock().await;
        f(&mut state)
    }

    /// Direct guard for callers that need to interleave reads and writes
    /// with other async work. Never hold it across a save.
    pub async fn lock(&self) -> MutexGuard<'_, StateGraph> {
        self.inner.state.lock().await
    }

    /// Write the whole graph before returning.
    pub async fn save_now(&self) {
        self.inner.flush_logged("sync").await;
    }

    /// Like [`save_now`](Self::save_now) but hands the error back.
    pub async fn try_save_now(&self) -> Result<()> {
        self.inner.flush().await
    }

    /// Request a coalesced write after the debounce window.
    pub fn schedule_save(&self) {
        if self.tx.send(FlushRequest::Debounced).is_err() {
            tracing::warn!("flusher stopped; dropping debounced save");
        }
    }

    /// Number of completed disk writes since the store was opened.
    pub fn flush_count(&self) -> u64 {
        self.inner.flushes.load(Ordering::Relaxed)
    }

    /// Stop the flusher after a final write.
    pub async fn shutdown(&self) {
        let handle = match self.flusher.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some(handle) = handle else {
            return;
        };

        let _ = self.tx.send(FlushRequest::Shutdown);
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "flusher task failed");
        }
    }
}

async fn run_flusher(
    inner: Arc<Inner>,
    mut rx: mpsc::UnboundedReceiver<FlushRequest>,
    options: StoreOptions,
) {
    let mut ticker = interval_at(Instant::now() + options.flush_interval, options.flush_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut deadline: Option<Instant> = None;

    loop {
        let pending = deadline.unwrap_or_else(Instant::now);

        tokio::select! {
            req = rx.recv() => match req {
                Some(FlushRequest::Debounced) => {
                    deadline = Some(Instant::now() + options.debounce);
                }
                Some(FlushRequest::Shutdown) | None => {
                    inner.flush_logged("shutdown").await;
                    break;
                }
            },
            _ = sleep_until(pending), if deadline.is_some() => {
                deadline = None;
                inner.flush_logged("debounce").await;
            }
            _ = ticker.tick() => {
                inner.flush_logged("periodic").await;
            }
        }
    }

    tracing::debug!("flusher stopped");
}
