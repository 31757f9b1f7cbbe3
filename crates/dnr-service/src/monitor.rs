//! Provider lifecycle monitor
//!
//! Turns activation and deactivation events into manager updates. Loads run
//! on the blocking pool and may overlap; their results are forwarded to the
//! evaluation task strictly in submission order, so a deactivation is never
//! applied before the activation it follows.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use log::{debug, info, warn};
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::task::{JoinError, JoinHandle};

use dnr_core::{LoadError, ProviderId, ProviderInfo, RulesetMatcher};

use crate::error::ServiceError;
use crate::evaluator::EvaluatorHandle;

/// Location and integrity value of a persisted ruleset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RulesetSource {
    pub path: PathBuf,
    pub checksum: u32,
}

/// A provider became active.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderActivation {
    pub provider_id: ProviderId,
    pub activation_time: SystemTime,
    pub private_enabled: bool,
    /// `None` when the provider ships no rules
    pub ruleset: Option<RulesetSource>,
}

type LoadTask = JoinHandle<Result<Result<RulesetMatcher, LoadError>, JoinError>>;

enum Pending {
    Load { info: ProviderInfo, path: PathBuf, task: LoadTask },
    Unload(ProviderId),
    Flush(oneshot::Sender<()>),
    Shutdown,
}

/// Cloneable entry point for lifecycle events.
#[derive(Clone)]
pub struct MonitorHandle {
    tx: mpsc::Sender<Pending>,
    loads: Arc<Semaphore>,
}

impl std::fmt::Debug for MonitorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorHandle")
            .field("closed", &self.tx.is_closed())
            .field("available_loads", &self.loads.available_permits())
            .finish()
    }
}

impl MonitorHandle {
    async fn send(&self, pending: Pending) -> Result<(), ServiceError> {
        self.tx.send(pending).await.map_err(|_| ServiceError::MonitorClosed)
    }

    /// Start loading the provider's ruleset. Returns once the load is queued.
    pub async fn on_provider_activated(&self, activation: ProviderActivation) -> Result<(), ServiceError> {
        let ProviderActivation {
            provider_id,
            activation_time,
            private_enabled,
            ruleset,
        } = activation;

        let Some(source) = ruleset else {
            debug!("Provider {} activated without a ruleset", provider_id);
            return Ok(());
        };

        let info = ProviderInfo::new(provider_id, activation_time).private_enabled(private_enabled);
        debug!("Loading ruleset for provider {} from {}", info.id, source.path.display());

        let loads = Arc::clone(&self.loads);
        let RulesetSource { path, checksum } = source;
        let load_path = path.clone();
        let task = tokio::spawn(async move {
            let _permit = loads.acquire_owned().await.ok();
            tokio::task::spawn_blocking(move || RulesetMatcher::load(&load_path, checksum)).await
        });

        self.send(Pending::Load { info, path, task }).await
    }

    /// Queue removal of the provider's ruleset.
    pub async fn on_provider_deactivated(&self, provider_id: ProviderId) -> Result<(), ServiceError> {
        debug!("Provider {} deactivated", provider_id);
        self.send(Pending::Unload(provider_id)).await
    }

    /// Wait until every event queued so far has reached the manager.
    pub async fn flush(&self) -> Result<(), ServiceError> {
        let (reply, rx) = oneshot::channel();
        self.send(Pending::Flush(reply)).await?;
        rx.await.map_err(|_| ServiceError::MonitorClosed)
    }

    pub(crate) async fn shutdown(&self) -> Result<(), ServiceError> {
        self.send(Pending::Shutdown).await
    }
}

/// Start the forwarding task that feeds `evaluator`.
///
/// Zero values for `capacity` or `max_concurrent_loads` are treated as 1.
pub fn spawn_monitor(
    evaluator: EvaluatorHandle,
    capacity: usize,
    max_concurrent_loads: usize,
) -> (MonitorHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let handle = MonitorHandle {
        tx,
        loads: Arc::new(Semaphore::new(max_concurrent_loads.max(1))),
    };
    let task = tokio::spawn(forward(rx, evaluator));
    (handle, task)
}

async fn forward(mut rx: mpsc::Receiver<Pending>, evaluator: EvaluatorHandle) {
    debug!("Monitor: started");

    while let Some(pending) = rx.recv().await {
        let sent = match pending {
            Pending::Load { info, path, task } => match join_load(task).await {
                Some(Ok(matcher)) => {
                    info!(
                        "Activated ruleset for provider {} ({} rules)",
                        info.id,
                        matcher.rule_count()
                    );
                    evaluator.add(info, matcher).await
                }
                Some(Err(e)) => {
                    warn!(
                        "Failed to load ruleset for provider {} from {}: {} ({})",
                        info.id,
                        path.display(),
                        e,
                        e.load_result()
                    );
                    Ok(())
                }
                None => Ok(()),
            },
            Pending::Unload(id) => evaluator.remove(id).await,
            Pending::Flush(reply) => evaluator.sync(reply).await,
            Pending::Shutdown => break,
        };

        if sent.is_err() {
            warn!("Monitor: evaluator stopped, dropping lifecycle events");
            break;
        }
    }

    debug!("Monitor: stopped");
}

async fn join_load(task: LoadTask) -> Option<Result<RulesetMatcher, LoadError>> {
    match task.await {
        Ok(Ok(result)) => Some(result),
        Ok(Err(e)) | Err(e) => {
            warn!("Ruleset load task failed: {}", e);
            None
        }
    }
}
