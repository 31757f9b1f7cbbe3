//! DNR Filtering Service
//!
//! Runs the ruleset manager behind a tokio task and keeps it in step with
//! provider activations and deactivations.
//!
//! # Modules
//!
//! - `config`: service configuration
//! - `evaluator`: the task that owns the manager and answers queries
//! - `monitor`: lifecycle events, background loading, ordered forwarding
//! - `service`: start and shutdown of both tasks

pub mod config;
pub mod error;
pub mod evaluator;
pub mod monitor;
pub mod service;

pub use config::ServiceConfig;
pub use error::{ConfigError, ServiceError};
pub use evaluator::{spawn_evaluator, EvaluationRequest, EvaluatorHandle};
pub use monitor::{spawn_monitor, MonitorHandle, ProviderActivation, RulesetSource};
pub use service::FilteringService;
