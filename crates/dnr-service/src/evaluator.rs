//! Evaluation task
//!
//! A single task owns the [`RulesetManager`]. Every add, remove and query is
//! a message on one FIFO channel, so the manager needs no locks and sees
//! lifecycle changes in the order they were sent.

use log::{debug, warn};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use dnr_core::{Decision, ElementType, ProviderId, ProviderInfo, RequestContext, RulesetManager, RulesetMatcher};

use crate::error::ServiceError;

/// Owned form of a request to evaluate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluationRequest {
    pub url: String,
    /// Origin of the initiating frame, if any
    pub initiator: Option<String>,
    pub element_type: ElementType,
    pub is_third_party: bool,
    pub is_private: bool,
}

impl EvaluationRequest {
    /// `resource_type` is a resource type name; unknown names count as `other`.
    pub fn new(url: impl Into<String>, resource_type: &str) -> Self {
        Self {
            url: url.into(),
            initiator: None,
            element_type: ElementType::from_request_type(resource_type),
            is_third_party: false,
            is_private: false,
        }
    }

    pub fn with_initiator(mut self, initiator: impl Into<String>) -> Self {
        self.initiator = Some(initiator.into());
        self
    }

    pub fn third_party(mut self, is_third_party: bool) -> Self {
        self.is_third_party = is_third_party;
        self
    }

    pub fn private(mut self, is_private: bool) -> Self {
        self.is_private = is_private;
        self
    }

    pub fn context(&self) -> RequestContext<'_> {
        let ctx = RequestContext::new(&self.url, self.element_type).third_party(self.is_third_party);
        match &self.initiator {
            Some(initiator) => ctx.with_initiator(initiator),
            None => ctx,
        }
    }
}

pub(crate) enum Command {
    Add {
        info: ProviderInfo,
        matcher: RulesetMatcher,
    },
    Remove(ProviderId),
    Evaluate {
        request: EvaluationRequest,
        reply: oneshot::Sender<Decision>,
    },
    MatcherCount(oneshot::Sender<usize>),
    /// Answered once every earlier command has been applied
    Sync(oneshot::Sender<()>),
    Shutdown,
}

/// Cloneable sender side of the evaluation task.
#[derive(Clone)]
pub struct EvaluatorHandle {
    tx: mpsc::Sender<Command>,
}

impl std::fmt::Debug for EvaluatorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvaluatorHandle")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl EvaluatorHandle {
    async fn send(&self, command: Command) -> Result<(), ServiceError> {
        self.tx.send(command).await.map_err(|_| ServiceError::EvaluatorClosed)
    }

    /// Combined decision of every active provider.
    pub async fn evaluate(&self, request: EvaluationRequest) -> Result<Decision, ServiceError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Evaluate { request, reply }).await?;
        rx.await.map_err(|_| ServiceError::EvaluatorClosed)
    }

    pub async fn matcher_count(&self) -> Result<usize, ServiceError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::MatcherCount(reply)).await?;
        rx.await.map_err(|_| ServiceError::EvaluatorClosed)
    }

    pub(crate) async fn add(&self, info: ProviderInfo, matcher: RulesetMatcher) -> Result<(), ServiceError> {
        self.send(Command::Add { info, matcher }).await
    }

    pub(crate) async fn remove(&self, id: ProviderId) -> Result<(), ServiceError> {
        self.send(Command::Remove(id)).await
    }

    pub(crate) async fn sync(&self, reply: oneshot::Sender<()>) -> Result<(), ServiceError> {
        self.send(Command::Sync(reply)).await
    }

    pub(crate) async fn shutdown(&self) -> Result<(), ServiceError> {
        self.send(Command::Shutdown).await
    }
}

/// Start the evaluation task. It hands the manager back when it stops.
///
/// A `capacity` of 0 is treated as 1.
pub fn spawn_evaluator(manager: RulesetManager, capacity: usize) -> (EvaluatorHandle, JoinHandle<RulesetManager>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let task = tokio::spawn(run(manager, rx));
    (EvaluatorHandle { tx }, task)
}

async fn run(mut manager: RulesetManager, mut rx: mpsc::Receiver<Command>) -> RulesetManager {
    debug!("Evaluator: started");

    while let Some(command) = rx.recv().await {
        match command {
            Command::Add { info, matcher } => {
                // Activation is delivered once per provider; a repeat replaces the old matcher
                if manager.remove(&info.id) {
                    warn!("Provider {} activated twice, replacing its ruleset", info.id);
                }
                manager.add(info, matcher);
            }
            Command::Remove(id) => {
                if !manager.remove(&id) {
                    debug!("Provider {} had no active ruleset", id);
                }
            }
            Command::Evaluate { request, reply } => {
                let decision = manager.evaluate(request.is_private, &request.context());
                let _ = reply.send(decision);
            }
            Command::MatcherCount(reply) => {
                let _ = reply.send(manager.matcher_count());
            }
            Command::Sync(reply) => {
                let _ = reply.send(());
            }
            Command::Shutdown => break,
        }
    }

    debug!("Evaluator: stopped with {} active rulesets", manager.matcher_count());
    manager
}
