//! Filtering service
//!
//! Wires the evaluation task and the lifecycle monitor together and owns
//! their join handles.

use log::info;
use tokio::task::JoinHandle;

use dnr_core::{Decision, RulesetManager};

use crate::config::ServiceConfig;
use crate::error::ServiceError;
use crate::evaluator::{spawn_evaluator, EvaluationRequest, EvaluatorHandle};
use crate::monitor::{spawn_monitor, MonitorHandle};

/// Running evaluation task plus lifecycle monitor.
pub struct FilteringService {
    evaluator: EvaluatorHandle,
    monitor: MonitorHandle,
    evaluator_task: JoinHandle<RulesetManager>,
    monitor_task: JoinHandle<()>,
}

impl FilteringService {
    /// Validate `config` and spawn both tasks on the current runtime.
    pub fn start(config: &ServiceConfig) -> Result<Self, ServiceError> {
        config.validate()?;

        let manager = RulesetManager::new(config.manager_config());
        let (evaluator, evaluator_task) = spawn_evaluator(manager, config.queue_capacity);
        let (monitor, monitor_task) =
            spawn_monitor(evaluator.clone(), config.queue_capacity, config.max_concurrent_loads);

        info!(
            "Filtering service started (enabled: {}, max concurrent loads: {})",
            config.enabled, config.max_concurrent_loads
        );

        Ok(Self {
            evaluator,
            monitor,
            evaluator_task,
            monitor_task,
        })
    }

    pub fn evaluator(&self) -> EvaluatorHandle {
        self.evaluator.clone()
    }

    pub fn monitor(&self) -> MonitorHandle {
        self.monitor.clone()
    }

    pub async fn evaluate(&self, request: EvaluationRequest) -> Result<Decision, ServiceError> {
        self.evaluator.evaluate(request).await
    }

    /// Apply every queued lifecycle event, then stop both tasks.
    ///
    /// Returns the manager as it stood at shutdown.
    pub async fn shutdown(self) -> Result<RulesetManager, ServiceError> {
        self.monitor.shutdown().await?;
        self.monitor_task.await?;

        self.evaluator.shutdown().await?;
        let manager = self.evaluator_task.await?;

        info!("Filtering service stopped ({} active rulesets)", manager.matcher_count());
        Ok(manager)
    }
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};
    use std::time::{Duration, SystemTime};

    use dnr_compiler::{index_rules, write_ruleset};
    use dnr_core::ProviderId;

    use super::*;
    use crate::error::ConfigError;
    use crate::monitor::{ProviderActivation, RulesetSource};

    const BLOCK_ADS: &str = r#"[{"id": 1, "condition": {"urlFilter": "ads.example.com"}, "action": {"type": "block"}}]"#;
    const REDIRECT_ADS: &str = r#"[{"id": 1, "priority": 1, "condition": {"urlFilter": "ads.example.com"},
        "action": {"type": "redirect", "redirectUrl": "https://b.example/empty.js"}}]"#;

    fn persist(root: &Path, name: &str, json: &str) -> RulesetSource {
        let ruleset = index_rules(json).unwrap();
        let path = write_ruleset(&root.join(name), &ruleset).unwrap();
        RulesetSource {
            path,
            checksum: ruleset.checksum,
        }
    }

    fn activation(id: &str, secs: u64, ruleset: Option<RulesetSource>) -> ProviderActivation {
        ProviderActivation {
            provider_id: ProviderId::from(id),
            activation_time: SystemTime::UNIX_EPOCH + Duration::from_secs(secs),
            private_enabled: false,
            ruleset,
        }
    }

    fn ad_request() -> EvaluationRequest {
        EvaluationRequest::new("http://ads.example.com/banner.js", "script")
    }

    #[tokio::test]
    async fn activated_ruleset_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let service = FilteringService::start(&ServiceConfig::default()).unwrap();
        let monitor = service.monitor();

        monitor
            .on_provider_activated(activation("a", 1, Some(persist(dir.path(), "a", BLOCK_ADS))))
            .await
            .unwrap();
        monitor.flush().await.unwrap();

        assert_eq!(service.evaluator().matcher_count().await.unwrap(), 1);
        assert_eq!(service.evaluate(ad_request()).await.unwrap(), Decision::Blocked);
        assert_eq!(
            service
                .evaluate(EvaluationRequest::new("http://example.com/", "script"))
                .await
                .unwrap(),
            Decision::Allowed
        );

        let manager = service.shutdown().await.unwrap();
        assert_eq!(manager.matcher_count(), 1);
    }

    #[tokio::test]
    async fn activate_then_deactivate_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let service = FilteringService::start(&ServiceConfig::default()).unwrap();
        let monitor = service.monitor();

        monitor
            .on_provider_activated(activation("a", 1, Some(persist(dir.path(), "a", BLOCK_ADS))))
            .await
            .unwrap();
        monitor.on_provider_deactivated(ProviderId::from("a")).await.unwrap();
        monitor.flush().await.unwrap();

        assert_eq!(service.evaluator().matcher_count().await.unwrap(), 0);
        assert_eq!(service.evaluate(ad_request()).await.unwrap(), Decision::Allowed);
        service.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn failed_loads_never_reach_the_manager() {
        let dir = tempfile::tempdir().unwrap();
        let service = FilteringService::start(&ServiceConfig::default()).unwrap();
        let monitor = service.monitor();

        let mut stale = persist(dir.path(), "stale", BLOCK_ADS);
        stale.checksum ^= 1;
        let missing = RulesetSource {
            path: PathBuf::from("/nonexistent/provider/rules.dnr"),
            checksum: 0,
        };

        monitor.on_provider_activated(activation("stale", 1, Some(stale))).await.unwrap();
        monitor.on_provider_activated(activation("missing", 2, Some(missing))).await.unwrap();
        monitor.on_provider_activated(activation("empty", 3, None)).await.unwrap();
        monitor.flush().await.unwrap();

        assert_eq!(service.evaluator().matcher_count().await.unwrap(), 0);
        assert_eq!(service.evaluate(ad_request()).await.unwrap(), Decision::Allowed);

        // Deactivating a provider that never loaded is harmless
        monitor.on_provider_deactivated(ProviderId::from("stale")).await.unwrap();
        monitor.flush().await.unwrap();
        service.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn newest_provider_decides_and_private_mode_filters() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServiceConfig {
            max_concurrent_loads: 1,
            ..ServiceConfig::default()
        };
        let service = FilteringService::start(&config).unwrap();
        let monitor = service.monitor();

        let mut a = activation("a", 1, Some(persist(dir.path(), "a", BLOCK_ADS)));
        a.private_enabled = true;
        monitor.on_provider_activated(a).await.unwrap();
        monitor
            .on_provider_activated(activation("b", 2, Some(persist(dir.path(), "b", REDIRECT_ADS))))
            .await
            .unwrap();
        monitor.flush().await.unwrap();

        assert_eq!(
            service.evaluate(ad_request()).await.unwrap(),
            Decision::RedirectTo("https://b.example/empty.js".to_string())
        );
        assert_eq!(
            service.evaluate(ad_request().private(true)).await.unwrap(),
            Decision::Blocked
        );
        service.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn disabled_service_allows_everything() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServiceConfig {
            enabled: false,
            ..ServiceConfig::default()
        };
        let service = FilteringService::start(&config).unwrap();
        let monitor = service.monitor();

        monitor
            .on_provider_activated(activation("a", 1, Some(persist(dir.path(), "a", BLOCK_ADS))))
            .await
            .unwrap();
        monitor.flush().await.unwrap();

        assert_eq!(service.evaluate(ad_request()).await.unwrap(), Decision::Allowed);
        service.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_drains_pending_loads() {
        let dir = tempfile::tempdir().unwrap();
        let service = FilteringService::start(&ServiceConfig::default()).unwrap();
        let monitor = service.monitor();

        for (i, name) in ["a", "b", "c"].into_iter().enumerate() {
            monitor
                .on_provider_activated(activation(name, i as u64, Some(persist(dir.path(), name, BLOCK_ADS))))
                .await
                .unwrap();
        }

        let manager = service.shutdown().await.unwrap();
        assert_eq!(manager.matcher_count(), 3);
        assert!(matches!(monitor.flush().await, Err(ServiceError::MonitorClosed)));
    }

    #[tokio::test]
    async fn zero_sized_config_is_rejected() {
        for config in [
            ServiceConfig {
                queue_capacity: 0,
                ..ServiceConfig::default()
            },
            ServiceConfig {
                max_concurrent_loads: 0,
                ..ServiceConfig::default()
            },
        ] {
            assert!(matches!(
                FilteringService::start(&config),
                Err(ServiceError::Config(ConfigError::Invalid(_)))
            ));
        }
    }

    #[tokio::test]
    async fn zero_sized_spawn_arguments_still_make_progress() {
        let dir = tempfile::tempdir().unwrap();
        let (evaluator, evaluator_task) = spawn_evaluator(RulesetManager::default(), 0);
        let (monitor, monitor_task) = spawn_monitor(evaluator.clone(), 0, 0);

        monitor
            .on_provider_activated(activation("a", 1, Some(persist(dir.path(), "a", BLOCK_ADS))))
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_secs(10), monitor.flush())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(evaluator.matcher_count().await.unwrap(), 1);

        monitor.shutdown().await.unwrap();
        monitor_task.await.unwrap();
        evaluator.shutdown().await.unwrap();
        evaluator_task.await.unwrap();
    }

    #[tokio::test]
    async fn quick_reactivation_keeps_latest_ruleset() {
        let dir = tempfile::tempdir().unwrap();
        let service = FilteringService::start(&ServiceConfig::default()).unwrap();
        let monitor = service.monitor();

        monitor
            .on_provider_activated(activation("a", 1, Some(persist(dir.path(), "a1", REDIRECT_ADS))))
            .await
            .unwrap();
        monitor.on_provider_deactivated(ProviderId::from("a")).await.unwrap();
        monitor
            .on_provider_activated(activation("a", 2, Some(persist(dir.path(), "a2", BLOCK_ADS))))
            .await
            .unwrap();
        monitor.flush().await.unwrap();

        assert_eq!(service.evaluator().matcher_count().await.unwrap(), 1);
        assert_eq!(service.evaluate(ad_request()).await.unwrap(), Decision::Blocked);
        service.shutdown().await.unwrap();
    }
}
