//! Message Dispatcher
//!
//! Owns a single background polling loop. Each tick pulls a bounded batch of
//! pending messages and drives them through the delivery protocol one at a
//! time. `stop` waits for the message in flight before returning.

use crate::cache::SideCache;
use crate::channel::DeliveryChannel;
use crate::delivery::{deliver, DeliveryFailure, TickReport};
use crate::error::{DispatchError, Result};
use ams_store::MessageStore;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Start/stop control over a dispatcher, as used by the HTTP API
#[async_trait]
pub trait DispatchControl: Send + Sync {
    /// Launch the polling loop; succeeds without effect if already running.
    async fn start(&self) -> Result<()>;

    /// Stop the polling loop and wait for it to exit; no-op if not running.
    async fn stop(&self) -> Result<()>;

    fn is_running(&self) -> bool;
}

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Time between ticks; the first tick fires one interval after start
    pub poll_interval: Duration,
    /// Maximum messages fetched per tick
    pub batch_size: u32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(120),
            batch_size: 2,
        }
    }
}

struct RunningLoop {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Everything the loop task needs, shared with the task by `Arc`
struct DispatchWorker {
    config: DispatchConfig,
    store: Arc<dyn MessageStore>,
    channel: Arc<dyn DeliveryChannel>,
    cache: Arc<dyn SideCache>,
}

pub struct Dispatcher {
    worker: Arc<DispatchWorker>,
    state: Mutex<Option<RunningLoop>>,
    running: AtomicBool,
}

impl Dispatcher {
    pub fn new(
        config: DispatchConfig,
        store: Arc<dyn MessageStore>,
        channel: Arc<dyn DeliveryChannel>,
        cache: Arc<dyn SideCache>,
    ) -> Self {
        Self {
            worker: Arc::new(DispatchWorker {
                config,
                store,
                channel,
                cache,
            }),
            state: Mutex::new(None),
            running: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.worker.config
    }

    /// Run a single tick on the caller's task.
    ///
    /// Refused while the polling loop is running. The state lock is held for
    /// the whole tick, so `start` waits for it to finish.
    pub async fn run_once(&self) -> Result<TickReport> {
        let state = self.state.lock().await;
        if state.is_some() {
            return Err(DispatchError::AlreadyRunning);
        }
        self.worker.tick(None).await
    }
}

#[async_trait]
impl DispatchControl for Dispatcher {
    async fn start(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.is_some() {
            info!("Message dispatcher already running");
            return Ok(());
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = Arc::clone(&self.worker);
        let handle = tokio::spawn(async move { worker.run(shutdown_rx).await });

        *state = Some(RunningLoop {
            shutdown_tx,
            handle,
        });
        self.running.store(true, Ordering::SeqCst);

        info!(
            poll_interval_secs = self.worker.config.poll_interval.as_secs(),
            batch_size = self.worker.config.batch_size,
            "Message dispatcher started"
        );
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        let Some(running) = state.take() else {
            debug!("Message dispatcher not running");
            return Ok(());
        };

        info!("Stopping message dispatcher");
        // Fails only if the loop already exited
        let _ = running.shutdown_tx.send(true);
        let joined = running.handle.await;
        self.running.store(false, Ordering::SeqCst);

        joined.map_err(|e| DispatchError::LoopAborted(e.to_string()))?;
        info!("Message dispatcher stopped");
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// A stop was requested, or the dispatcher holding the sender was dropped
fn stop_requested(shutdown_rx: &watch::Receiver<bool>) -> bool {
    shutdown_rx.has_changed().is_err() || *shutdown_rx.borrow()
}

impl DispatchWorker {
    async fn run(self: Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) {
        let period = self.config.poll_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }

                _ = ticker.tick() => {
                    match self.tick(Some(&shutdown_rx)).await {
                        Ok(report) if report.is_empty() => {
                            debug!("No pending messages");
                        }
                        Ok(report) => {
                            info!(
                                fetched = report.fetched,
                                delivered = report.delivered.len(),
                                failed = report.failed.len(),
                                skipped = report.skipped,
                                "Dispatch tick complete"
                            );
                        }
                        Err(e) => {
                            error!(error = %e, "Dispatch tick failed");
                        }
                    }
                }
            }
        }

        debug!("Dispatch loop exited");
    }

    async fn tick(&self, shutdown_rx: Option<&watch::Receiver<bool>>) -> Result<TickReport> {
        let batch = self.store.fetch_pending(self.config.batch_size).await?;

        let mut report = TickReport {
            fetched: batch.len(),
            ..Default::default()
        };

        for (index, message) in batch.iter().enumerate() {
            if shutdown_rx.is_some_and(stop_requested) {
                report.skipped = batch.len() - index;
                warn!(skipped = report.skipped, "Stop requested, leaving remaining messages pending");
                break;
            }

            match deliver(
                self.store.as_ref(),
                self.channel.as_ref(),
                self.cache.as_ref(),
                message,
            )
            .await
            {
                Ok(delivered) => report.delivered.push(delivered),
                Err(e) => {
                    error!(
                        message_id = %message.id,
                        external_id = e.external_id().unwrap_or(""),
                        error = %e,
                        "Message delivery failed"
                    );
                    report.failed.push(DeliveryFailure {
                        message_id: message.id,
                        error: e,
                    });
                }
            }
        }

        Ok(report)
    }
}
