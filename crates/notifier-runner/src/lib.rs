//! Runner (C7): validates configuration, owns the lifecycle of C2/C3/C4/C6,
//! drives the poll loop, and orchestrates per-event dedup -> enrich ->
//! publish -> ack processing.

use futures::future::join_all;
use notifier_consumer::AuditConsumer;
use notifier_core::{AppConfig, AuditEvent, Classifier, NotifierError, RunnerMetrics};
use notifier_publisher::NotificationPublisher;
use notifier_registry::RegistryClient;
use notifier_state::{DedupStore, JsonFileDedupStore};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const BATCH_JOIN_TIMEOUT: Duration = Duration::from_secs(60);
const FLUSH_INTERVAL: Duration = Duration::from_secs(60);

/// Everything the per-event processing closure needs, grouped so it can
/// be cheaply cloned (via `Arc`) into each worker-pool task.
#[derive(Clone)]
struct Shared {
    classifier: Arc<Classifier>,
    registry: Arc<RegistryClient>,
    dedup: Arc<dyn DedupStore>,
    dedup_enabled: bool,
    publisher: Arc<NotificationPublisher>,
    metrics: Arc<RunnerMetrics>,
}

impl Shared {
    async fn process_event(&self, event: AuditEvent) {
        let key = self.classifier.dedup_key_for(&event);
        if self.dedup_enabled && self.dedup.is_duplicate(&key).await {
            self.metrics.inc_duplicates_skipped();
            return;
        }

        let notification = match self.classifier.process(&event, self.registry.as_ref()).await {
            Some(n) => n,
            None => return,
        };
        self.metrics.inc_events_processed();

        if self.publisher.send(&notification).await {
            self.metrics.inc_notifications_produced();
            if self.dedup_enabled {
                self.dedup.mark_processed(&key).await;
            }
        } else {
            tracing::warn!(key, "publish failed, leaving event unmarked for a later retry pass");
        }
    }
}

pub struct Runner {
    config: AppConfig,
    running: Arc<AtomicBool>,
    consumer: AuditConsumer,
    shared: Shared,
    metrics: Arc<RunnerMetrics>,
}

impl Runner {
    /// Validates configuration and constructs every collaborator.
    /// Refuses to start (returns `NotifierError::Configuration`) on any
    /// violation before anything with a network or file side effect is
    /// touched.
    pub async fn new(config: AppConfig) -> anyhow::Result<Runner> {
        let violations = config.validate();
        if !violations.is_empty() {
            return Err(NotifierError::Configuration { violations }.into());
        }

        let running = Arc::new(AtomicBool::new(true));
        let metrics = Arc::new(RunnerMetrics::new());

        let dedup: Arc<dyn DedupStore> = Arc::new(JsonFileDedupStore::open(&config.state_store_path));

        let registry = match RegistryClient::new(config.environments.clone()) {
            Ok(r) => Arc::new(r),
            Err(err) => {
                let _ = dedup.close().await;
                return Err(err);
            }
        };

        let consumer = match AuditConsumer::connect(&config, running.clone()).await {
            Ok(c) => c,
            Err(err) => {
                registry.close().await;
                let _ = dedup.close().await;
                return Err(err);
            }
        };

        let publisher = match NotificationPublisher::connect(&config).await {
            Ok(p) => Arc::new(p),
            Err(err) => {
                let _ = consumer.close().await;
                registry.close().await;
                let _ = dedup.close().await;
                return Err(err);
            }
        };

        let classifier = Arc::new(Classifier::new(config.clone()));
        let dedup_enabled = config.enable_deduplication;

        Ok(Runner {
            shared: Shared { classifier, registry, dedup, dedup_enabled, publisher, metrics: metrics.clone() },
            config,
            running,
            consumer,
            metrics,
        })
    }

    /// Spawns a task that flips the running flag on `SIGINT`/`SIGTERM`
    /// equivalent (`ctrl_c` on all supported platforms).
    pub fn install_shutdown_hook(&self) {
        let running = self.running.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!(reason = %NotifierError::Interrupted, "shutting down after the current batch");
                running.store(false, Ordering::Relaxed);
            }
        });
    }

    pub fn metrics(&self) -> Arc<RunnerMetrics> {
        self.metrics.clone()
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Main poll loop: runs until the running flag flips (via shutdown
    /// hook or the consumer's own termination predicates).
    pub async fn run(&mut self) -> anyhow::Result<()> {
        let mut last_flush = Instant::now();

        while self.is_running() {
            let events = self.consumer.poll().await;
            if events.is_empty() && !self.is_running() {
                break;
            }
            self.metrics.add_events_consumed(events.len() as u64);

            if self.config.processing_threads > 1 && events.len() > 1 {
                self.process_batch_parallel(events).await;
            } else {
                for event in events {
                    self.shared.process_event(event).await;
                }
            }

            self.consumer.commit_sync();

            if last_flush.elapsed() >= FLUSH_INTERVAL {
                self.metrics.flush();
                last_flush = Instant::now();
            }
        }

        self.metrics.flush();
        Ok(())
    }

    async fn process_batch_parallel(&self, events: Vec<AuditEvent>) {
        let tasks: Vec<_> = events
            .into_iter()
            .map(|event| {
                let shared = self.shared.clone();
                tokio::spawn(async move { shared.process_event(event).await })
            })
            .collect();

        if tokio::time::timeout(BATCH_JOIN_TIMEOUT, join_all(tasks)).await.is_err() {
            tracing::warn!("batch processing exceeded the 60s join bound; continuing to next poll");
        }
    }

    /// Flips the running flag, closes every collaborator in order, and
    /// emits a final status log.
    pub async fn shutdown(self) -> anyhow::Result<()> {
        // The worker pool has no dedicated tasks to force-stop beyond a
        // batch's own 60s join bound, so there is no separate grace
        // period to wait out here: the running flag is already down by
        // the time the last `run` iteration returns.
        self.running.store(false, Ordering::Relaxed);

        if let Err(err) = self.shared.dedup.close().await {
            tracing::warn!(error = %err, "failed to flush dedup store on shutdown");
        }
        if let Err(err) = self.shared.publisher.close().await {
            tracing::warn!(error = %err, "failed to close publisher on shutdown");
        }
        self.shared.registry.close().await;
        self.consumer.close().await?;

        self.metrics.set_live(false);
        tracing::info!(
            events_consumed = self.metrics.events_consumed(),
            events_processed = self.metrics.events_processed(),
            notifications_produced = self.metrics.notifications_produced(),
            duplicates_skipped = self.metrics.duplicates_skipped(),
            "runner shut down",
        );
        Ok(())
    }
}
