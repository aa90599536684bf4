//! Multi-mode positioned consumer for the audit-log stream (C4).
//!
//! Single-owner by construction: `poll`/`commit_sync` take `&mut self`
//! and the type carries no `Clone` impl, so invoking it from more than
//! one task is a compile error rather than a runtime race.

use chrono::{DateTime, Utc};
use notifier_core::{AppConfig, AuditEvent, ProcessingMode};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::topic_partition_list::{Offset, TopicPartitionList};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const ASSIGNMENT_POLL_ATTEMPTS: usize = 25;
const ASSIGNMENT_POLL_INTERVAL: Duration = Duration::from_millis(200);
const WATERMARK_TIMEOUT: Duration = Duration::from_secs(10);
const SEEK_TIMEOUT: Duration = Duration::from_secs(10);
const CLOSE_TIMEOUT: Duration = Duration::from_secs(10);

/// The source marks a partition reached at `offset >= high - 1` rather
/// than strictly `>= high`, to cope with a log-end semantics edge case
/// where the high watermark itself is never assigned to a record.
/// Preserved here as a standalone, independently testable predicate.
pub fn partition_reached(offset: i64, high_watermark: i64) -> bool {
    offset >= high_watermark - 1
}

fn auto_offset_reset(mode: ProcessingMode) -> &'static str {
    match mode {
        ProcessingMode::Stream => "latest",
        ProcessingMode::Backfill | ProcessingMode::Timestamp | ProcessingMode::Resume => "earliest",
    }
}

/// Positioned subscription to the audit topic. Owns exactly one
/// `StreamConsumer`; mode-specific seeking happens once at construction,
/// right after the initial partition assignment settles.
pub struct AuditConsumer {
    consumer: StreamConsumer,
    running: Arc<AtomicBool>,
    stop_at_current: bool,
    end_timestamp: Option<DateTime<Utc>>,
    batch_size: usize,
    poll_timeout: Duration,
    /// `(topic, partition) -> high watermark observed at startup`, used
    /// by `stop_at_current` to know when a partition has caught up.
    end_offsets: HashMap<(String, i32), i64>,
    reached: HashSet<(String, i32)>,
}

impl AuditConsumer {
    pub async fn connect(config: &AppConfig, running: Arc<AtomicBool>) -> anyhow::Result<Self> {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &config.audit.bootstrap_servers)
            .set("group.id", &config.consumer_group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", auto_offset_reset(config.processing_mode))
            .set("security.protocol", &config.security_protocol)
            .set("sasl.mechanism", &config.sasl_mechanism)
            .set("sasl.username", &config.audit.api_key)
            .set("sasl.password", &config.audit.api_secret);

        let consumer: StreamConsumer = client_config.create()?;
        consumer.subscribe(&[&config.audit.topic])?;

        let mut this = AuditConsumer {
            consumer,
            running,
            stop_at_current: config.stop_at_current,
            end_timestamp: config.end_timestamp,
            batch_size: config.batch_size,
            poll_timeout: Duration::from_millis(config.poll_timeout_ms),
            end_offsets: HashMap::new(),
            reached: HashSet::new(),
        };

        this.position(config).await?;
        Ok(this)
    }

    /// Drives the consumer's internal event loop (via repeated bounded
    /// polls) until librdkafka reports a non-empty partition assignment,
    /// then performs the mode-specific seek from §4.4.
    async fn position(&mut self, config: &AppConfig) -> anyhow::Result<()> {
        let assignment = self.wait_for_assignment().await?;

        match config.processing_mode {
            ProcessingMode::Stream => {
                for elem in assignment.elements() {
                    self.consumer
                        .seek(elem.topic(), elem.partition(), Offset::End, SEEK_TIMEOUT)?;
                }
            }
            ProcessingMode::Backfill => {
                for elem in assignment.elements() {
                    self.consumer
                        .seek(elem.topic(), elem.partition(), Offset::Beginning, SEEK_TIMEOUT)?;
                }
                if self.stop_at_current {
                    self.snapshot_end_offsets(&assignment)?;
                }
            }
            ProcessingMode::Timestamp => {
                let start = config
                    .start_timestamp
                    .ok_or_else(|| anyhow::anyhow!("TIMESTAMP mode requires start.timestamp"))?;
                self.seek_to_timestamp(&assignment, start)?;
                if config.end_timestamp.is_some() {
                    self.snapshot_end_offsets(&assignment)?;
                }
            }
            ProcessingMode::Resume => {
                // No seek: poll from committed positions.
            }
        }
        Ok(())
    }

    async fn wait_for_assignment(&self) -> anyhow::Result<TopicPartitionList> {
        for _ in 0..ASSIGNMENT_POLL_ATTEMPTS {
            // Driving a bounded poll is what causes librdkafka to process
            // the rebalance and populate the assignment; we intentionally
            // discard whatever message (if any) arrives here since seeking
            // is about to reposition every partition anyway.
            let _ = self.consumer.poll(ASSIGNMENT_POLL_INTERVAL);
            let assignment = self.consumer.assignment()?;
            if !assignment.elements().is_empty() {
                return Ok(assignment);
            }
        }
        anyhow::bail!("timed out waiting for partition assignment")
    }

    fn snapshot_end_offsets(&mut self, assignment: &TopicPartitionList) -> anyhow::Result<()> {
        for elem in assignment.elements() {
            let (_, high) = self
                .consumer
                .fetch_watermarks(elem.topic(), elem.partition(), WATERMARK_TIMEOUT)?;
            self.end_offsets.insert((elem.topic().to_string(), elem.partition()), high);
        }
        Ok(())
    }

    fn seek_to_timestamp(&mut self, assignment: &TopicPartitionList, start: DateTime<Utc>) -> anyhow::Result<()> {
        let mut query = TopicPartitionList::new();
        for elem in assignment.elements() {
            query.add_partition_offset(elem.topic(), elem.partition(), Offset::Offset(start.timestamp_millis()))?;
        }
        let resolved = self.consumer.offsets_for_times(query, SEEK_TIMEOUT)?;
        for elem in resolved.elements() {
            match elem.offset() {
                Offset::Offset(offset) if offset >= 0 => {
                    self.consumer.seek(elem.topic(), elem.partition(), Offset::Offset(offset), SEEK_TIMEOUT)?;
                }
                _ => {
                    // No record exists at or after `start` on this partition.
                    self.consumer.seek(elem.topic(), elem.partition(), Offset::End, SEEK_TIMEOUT)?;
                }
            }
        }
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    /// Polls up to `batch_size` records, applying the stop-at-current and
    /// end-timestamp termination predicates before each record is parsed.
    /// Parse failures are logged and skipped; they never halt polling.
    pub async fn poll(&mut self) -> Vec<AuditEvent> {
        let mut events = Vec::new();
        for _ in 0..self.batch_size {
            if !self.is_running() {
                break;
            }
            let message = match tokio::time::timeout(self.poll_timeout, self.consumer.recv()).await {
                Ok(Ok(m)) => m,
                Ok(Err(err)) => {
                    tracing::warn!(error = %err, "consumer recv error");
                    continue;
                }
                Err(_elapsed) => break,
            };

            let topic = message.topic().to_string();
            let partition = message.partition();
            let offset = message.offset();

            if self.stop_at_current && !self.end_offsets.is_empty() {
                if let Some(&high) = self.end_offsets.get(&(topic.clone(), partition)) {
                    if partition_reached(offset, high) {
                        self.reached.insert((topic.clone(), partition));
                    }
                }
                if !self.end_offsets.is_empty()
                    && self.end_offsets.keys().all(|k| self.reached.contains(k))
                {
                    self.running.store(false, Ordering::Relaxed);
                }
            }

            if let Some(end_ts) = self.end_timestamp {
                if let rdkafka::message::Timestamp::CreateTime(ms) | rdkafka::message::Timestamp::LogAppendTime(ms) =
                    message.timestamp()
                {
                    if ms > end_ts.timestamp_millis() {
                        self.running.store(false, Ordering::Relaxed);
                        continue;
                    }
                }
            }

            let payload = match message.payload() {
                Some(p) => p,
                None => continue,
            };

            match serde_json::from_slice::<AuditEvent>(payload) {
                Ok(event) => events.push(event),
                Err(err) => {
                    let skip = notifier_core::NotifierError::ParseSkip {
                        offset: Some(offset),
                        message: err.to_string(),
                    };
                    tracing::warn!(error = %skip, topic, "skipping unparseable audit event");
                }
            }
        }
        events
    }

    /// Commits the consumer group's current offsets synchronously.
    /// Failures are logged, never fatal.
    pub fn commit_sync(&mut self) {
        if let Err(err) = self.consumer.commit_consumer_state(CommitMode::Sync) {
            tracing::warn!(error = %err, "commit_sync failed");
        }
    }

    pub async fn close(self) -> anyhow::Result<()> {
        tokio::time::timeout(CLOSE_TIMEOUT, async move {
            drop(self);
        })
        .await
        .map_err(|_| anyhow::anyhow!("consumer close timed out"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_offset_reset_matches_mode() {
        assert_eq!(auto_offset_reset(ProcessingMode::Stream), "latest");
        assert_eq!(auto_offset_reset(ProcessingMode::Backfill), "earliest");
        assert_eq!(auto_offset_reset(ProcessingMode::Timestamp), "earliest");
        assert_eq!(auto_offset_reset(ProcessingMode::Resume), "earliest");
    }

    #[test]
    fn partition_reached_uses_high_minus_one_bound() {
        assert!(!partition_reached(7, 10));
        assert!(partition_reached(8, 10));
        assert!(partition_reached(9, 10));
        assert!(partition_reached(10, 10));
    }
}
