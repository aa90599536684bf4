//! Reliability-minded notification publisher (C6): upfront schema
//! pre-registration (fail-fast), keyed synchronous publish, dry-run mode.

use notifier_core::{AppConfig, Notification, NotifierError};
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use std::time::Duration;

const SEND_TIMEOUT: Duration = Duration::from_secs(30);
const FLUSH_TIMEOUT: Duration = Duration::from_secs(10);
const REGISTRY_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REGISTRY_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// A loose JSON Schema describing the notification envelope. Exact
/// schema content is not load-bearing for this component's behavior —
/// only that *some* value schema is registered upfront under the target
/// subject before the first publish is attempted.
const NOTIFICATION_SCHEMA: &str = r#"{
  "type": "object",
  "properties": {
    "eventType": { "type": "string" },
    "schemaId": { "type": "integer" },
    "subject": { "type": "string" },
    "version": { "type": "integer" },
    "schemaType": { "type": "string" },
    "timestamp": { "type": "string" },
    "auditLogEventId": { "type": "string" },
    "environmentId": { "type": "string" }
  },
  "required": ["eventType", "timestamp"]
}"#;

pub struct NotificationPublisher {
    producer: Option<FutureProducer>,
    target_topic: String,
    dry_run: bool,
}

impl NotificationPublisher {
    /// Registers the notification value schema (unless dry-run) and
    /// constructs the underlying producer. Registration failure is
    /// fatal: callers should refuse to start the runner.
    pub async fn connect(config: &AppConfig) -> anyhow::Result<Self> {
        let subject = format!("{}-value", config.target.topic);

        if !config.dry_run {
            register_schema(config, &subject).await.map_err(|err| NotifierError::PublisherFatal {
                subject: subject.clone(),
                message: err.to_string(),
            })?;
        }

        let producer = if config.dry_run {
            None
        } else {
            let mut client_config = ClientConfig::new();
            client_config
                .set("bootstrap.servers", &config.target.bootstrap_servers)
                .set("security.protocol", &config.security_protocol)
                .set("sasl.mechanism", &config.sasl_mechanism)
                .set("sasl.username", &config.target.api_key)
                .set("sasl.password", &config.target.api_secret)
                .set("acks", "all")
                .set("enable.idempotence", "true")
                .set("retries", "3")
                .set("retry.backoff.ms", "1000")
                .set("batch.size", "16384")
                .set("linger.ms", "10")
                .set("compression.type", "snappy");
            Some(client_config.create()?)
        };

        Ok(NotificationPublisher {
            producer,
            target_topic: config.target.topic.clone(),
            dry_run: config.dry_run,
        })
    }

    /// Publishes keyed on `notification.subject` (or the literal
    /// `"unknown"`), blocking for confirmation up to 30s. Returns `false`
    /// (logged, never panics) on timeout or broker error so the caller
    /// can skip marking the event processed.
    pub async fn send(&self, notification: &Notification) -> bool {
        if self.dry_run {
            tracing::info!(subject = ?notification.subject, "dry run: would publish notification");
            return true;
        }
        let key = notification.subject.clone().unwrap_or_else(|| "unknown".to_string());
        let payload = notification.to_bytes();
        let producer = self.producer.as_ref().expect("producer present outside dry-run");
        let record = FutureRecord::to(&self.target_topic).key(&key).payload(&payload);

        match producer.send(record, SEND_TIMEOUT).await {
            Ok(_) => true,
            Err((err, _)) => {
                tracing::warn!(error = %err, subject = key, "publish failed");
                false
            }
        }
    }

    pub async fn close(&self) -> anyhow::Result<()> {
        if let Some(producer) = &self.producer {
            producer.flush(FLUSH_TIMEOUT)?;
        }
        Ok(())
    }
}

async fn register_schema(config: &AppConfig, subject: &str) -> anyhow::Result<()> {
    let http = reqwest::Client::builder()
        .connect_timeout(REGISTRY_CONNECT_TIMEOUT)
        .timeout(REGISTRY_READ_TIMEOUT)
        .build()?;

    let url = format!(
        "{}/subjects/{}/versions",
        config.target_schema_registry.url.trim_end_matches('/'),
        subject
    );
    let body = serde_json::json!({ "schema": NOTIFICATION_SCHEMA, "schemaType": "JSON" });

    let response = http
        .post(&url)
        .basic_auth(&config.target_schema_registry.api_key, Some(&config.target_schema_registry.api_secret))
        .header(reqwest::header::ACCEPT, "application/vnd.schemaregistry.v1+json")
        .json(&body)
        .send()
        .await?;

    if !response.status().is_success() {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        anyhow::bail!("schema registration for '{subject}' failed with status {status}: {text}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use notifier_core::NotificationBody;

    fn sample_notification() -> Notification {
        Notification {
            schema_id: Some(1),
            subject: Some("orders-value".to_string()),
            version: Some(1),
            schema_type: None,
            timestamp: Utc::now(),
            audit_log_event_id: Some("e1".to_string()),
            environment_id: Some("env-test123".to_string()),
            body: NotificationBody::SchemaDeleted { permanent: false },
        }
    }

    #[tokio::test]
    async fn dry_run_publish_always_succeeds_without_a_producer() {
        let publisher = NotificationPublisher {
            producer: None,
            target_topic: "schema-change-notifications".to_string(),
            dry_run: true,
        };
        assert!(publisher.send(&sample_notification()).await);
    }
}
