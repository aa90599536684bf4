//! Typed configuration surface, assembled from a flat `key=value`
//! properties file (CLI overrides are layered on top by `notifier-cli`).
//!
//! The properties format is a deliberate choice over TOML/YAML: every
//! recognized key is either a literal dotted path (`audit.log.topic`) or
//! a repeatable, prefix-scanned group (`environments.<envId>.schema.
//! registry.url`). A dot inside a TOML table key fights the format; a
//! flat properties file does not.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

use crate::model::EnvironmentConfig;

pub const DEFAULT_AUDIT_TOPIC: &str = "confluent-audit-log-events";
pub const DEFAULT_CONSUMER_GROUP: &str = "schema-change-notifier";
pub const DEFAULT_STATE_STORE_PATH: &str = "./schema-change-notifier-state.json";
pub const DEFAULT_SECURITY_PROTOCOL: &str = "SASL_SSL";
pub const DEFAULT_SASL_MECHANISM: &str = "PLAIN";
pub const DEFAULT_POLL_TIMEOUT_MS: u64 = 1000;
pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_PROCESSING_THREADS: usize = 1;
pub const MAX_DEDUP_EVENTS: usize = 100_000;

const DEFAULT_INCLUDE_METHODS: &[&str] = &[
    "schema-registry.RegisterSchema",
    "schema-registry.DeleteSchema",
    "schema-registry.DeleteSubject",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingMode {
    Stream,
    Backfill,
    Timestamp,
    Resume,
}

impl FromStr for ProcessingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "STREAM" => Ok(ProcessingMode::Stream),
            "BACKFILL" => Ok(ProcessingMode::Backfill),
            "TIMESTAMP" => Ok(ProcessingMode::Timestamp),
            "RESUME" => Ok(ProcessingMode::Resume),
            other => Err(format!("unrecognized processing.mode '{other}'")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TopicEndpoint {
    pub bootstrap_servers: String,
    pub api_key: String,
    pub api_secret: String,
    pub topic: String,
}

impl TopicEndpoint {
    fn validate(&self, prefix: &str) -> Vec<String> {
        let mut v = Vec::new();
        if self.bootstrap_servers.trim().is_empty() {
            v.push(format!("{prefix}.bootstrap.servers must not be empty"));
        }
        if self.api_key.trim().is_empty() {
            v.push(format!("{prefix}.api.key must not be empty"));
        }
        if self.api_secret.trim().is_empty() {
            v.push(format!("{prefix}.api.secret must not be empty"));
        }
        if self.topic.trim().is_empty() {
            v.push(format!("{prefix}.topic must not be empty"));
        }
        v
    }
}

#[derive(Debug, Clone)]
pub struct TargetSchemaRegistry {
    pub url: String,
    pub api_key: String,
    pub api_secret: String,
}

/// The fully validated, immutable configuration the runner assembles
/// every other component from.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub audit: TopicEndpoint,
    pub environments: HashMap<String, EnvironmentConfig>,
    pub target: TopicEndpoint,
    pub target_schema_registry: TargetSchemaRegistry,

    pub processing_mode: ProcessingMode,
    pub start_timestamp: Option<DateTime<Utc>>,
    pub end_timestamp: Option<DateTime<Utc>>,
    pub stop_at_current: bool,

    pub consumer_group_id: String,

    pub include_methods: Vec<String>,
    pub include_config_changes: bool,
    pub filter_subjects: Vec<String>,
    pub only_successful: bool,

    pub enable_deduplication: bool,
    pub state_store_path: String,

    pub security_protocol: String,
    pub sasl_mechanism: String,

    pub health_port: u16,
    pub processing_threads: usize,
    pub dry_run: bool,
    pub poll_timeout_ms: u64,
    pub batch_size: usize,
}

impl AppConfig {
    /// Validates every invariant from the runner's startup checklist,
    /// aggregating every violation instead of stopping at the first.
    pub fn validate(&self) -> Vec<String> {
        let mut v = Vec::new();
        v.extend(self.audit.validate("audit.log"));
        v.extend(self.target.validate("target"));
        if self.target_schema_registry.url.trim().is_empty() {
            v.push("target.schema.registry.url must not be empty".to_string());
        }
        if self.target_schema_registry.api_key.trim().is_empty() {
            v.push("target.schema.registry.api.key must not be empty".to_string());
        }
        if self.target_schema_registry.api_secret.trim().is_empty() {
            v.push("target.schema.registry.api.secret must not be empty".to_string());
        }
        if self.environments.is_empty() {
            v.push("at least one environments.<envId>.* entry is required".to_string());
        }
        for env in self.environments.values() {
            v.extend(env.validate());
        }
        if self.processing_mode == ProcessingMode::Timestamp && self.start_timestamp.is_none() {
            v.push("start.timestamp is required when processing.mode=TIMESTAMP".to_string());
        }
        v
    }

    #[cfg(test)]
    pub fn test_default() -> Self {
        AppConfig {
            audit: TopicEndpoint {
                bootstrap_servers: "localhost:9092".to_string(),
                api_key: "key".to_string(),
                api_secret: "secret".to_string(),
                topic: DEFAULT_AUDIT_TOPIC.to_string(),
            },
            environments: HashMap::new(),
            target: TopicEndpoint {
                bootstrap_servers: "localhost:9092".to_string(),
                api_key: "key".to_string(),
                api_secret: "secret".to_string(),
                topic: "schema-change-notifications".to_string(),
            },
            target_schema_registry: TargetSchemaRegistry {
                url: "https://registry.example".to_string(),
                api_key: "key".to_string(),
                api_secret: "secret".to_string(),
            },
            processing_mode: ProcessingMode::Stream,
            start_timestamp: None,
            end_timestamp: None,
            stop_at_current: false,
            consumer_group_id: DEFAULT_CONSUMER_GROUP.to_string(),
            include_methods: DEFAULT_INCLUDE_METHODS.iter().map(|s| s.to_string()).collect(),
            include_config_changes: false,
            filter_subjects: Vec::new(),
            only_successful: true,
            enable_deduplication: true,
            state_store_path: DEFAULT_STATE_STORE_PATH.to_string(),
            security_protocol: DEFAULT_SECURITY_PROTOCOL.to_string(),
            sasl_mechanism: DEFAULT_SASL_MECHANISM.to_string(),
            health_port: 0,
            processing_threads: DEFAULT_PROCESSING_THREADS,
            dry_run: false,
            poll_timeout_ms: DEFAULT_POLL_TIMEOUT_MS,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

/// Parses a flat `key=value` properties file: `#`-prefixed lines and
/// blank lines are ignored, everything else is split on the first `=`.
pub fn parse_properties(text: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            out.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    out
}

pub fn load_properties_file(path: &Path) -> anyhow::Result<HashMap<String, String>> {
    let text = std::fs::read_to_string(path)?;
    Ok(parse_properties(&text))
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_bool(value: &str, default: bool) -> bool {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => true,
        "false" | "0" | "no" => false,
        _ => default,
    }
}

/// Scans `environments.<envId>.schema.registry.*` keys by prefix, since
/// the set of tenant environments is open-ended and can't be enumerated
/// by fixed field names.
fn extract_environments(props: &HashMap<String, String>) -> HashMap<String, EnvironmentConfig> {
    let mut ids = std::collections::HashSet::new();
    for key in props.keys() {
        if let Some(rest) = key.strip_prefix("environments.") {
            if let Some((id, _)) = rest.split_once(".schema.registry.") {
                ids.insert(id.to_string());
            }
        }
    }
    ids.into_iter()
        .map(|id| {
            let base = format!("environments.{id}.schema.registry");
            let env = EnvironmentConfig {
                env_id: id.clone(),
                schema_registry_url: props.get(&format!("{base}.url")).cloned().unwrap_or_default(),
                api_key: props.get(&format!("{base}.api.key")).cloned().unwrap_or_default(),
                api_secret: props.get(&format!("{base}.api.secret")).cloned().unwrap_or_default(),
            };
            (id, env)
        })
        .collect()
}

/// Builds an [`AppConfig`] from the merged key/value map. Values absent
/// from `props` fall back to the spec-mandated defaults; the result is
/// not validated here — callers must call [`AppConfig::validate`] and
/// refuse to start on any violation.
pub fn build_config(props: &HashMap<String, String>) -> anyhow::Result<AppConfig> {
    let get = |k: &str| props.get(k).cloned().unwrap_or_default();
    let get_or = |k: &str, default: &str| props.get(k).cloned().unwrap_or_else(|| default.to_string());

    let processing_mode = props
        .get("processing.mode")
        .map(|s| ProcessingMode::from_str(s))
        .transpose()
        .map_err(anyhow::Error::msg)?
        .unwrap_or(ProcessingMode::Stream);

    let start_timestamp = props
        .get("start.timestamp")
        .map(|s| DateTime::parse_from_rfc3339(s).map(|d| d.with_timezone(&Utc)))
        .transpose()?;
    let end_timestamp = props
        .get("end.timestamp")
        .map(|s| DateTime::parse_from_rfc3339(s).map(|d| d.with_timezone(&Utc)))
        .transpose()?;

    let include_config_changes = props
        .get("include.config.changes")
        .map(|v| parse_bool(v, false))
        .unwrap_or(false);
    let base_methods: Vec<String> = props
        .get("filter.method.names")
        .map(|v| split_csv(v))
        .unwrap_or_else(|| DEFAULT_INCLUDE_METHODS.iter().map(|s| s.to_string()).collect());
    let include_methods = crate::classify::include_methods(&base_methods, include_config_changes);

    Ok(AppConfig {
        audit: TopicEndpoint {
            bootstrap_servers: get("audit.log.bootstrap.servers"),
            api_key: get("audit.log.api.key"),
            api_secret: get("audit.log.api.secret"),
            topic: get_or("audit.log.topic", DEFAULT_AUDIT_TOPIC),
        },
        environments: extract_environments(props),
        target: TopicEndpoint {
            bootstrap_servers: get("target.bootstrap.servers"),
            api_key: get("target.api.key"),
            api_secret: get("target.api.secret"),
            topic: get("target.topic"),
        },
        target_schema_registry: TargetSchemaRegistry {
            url: get("target.schema.registry.url"),
            api_key: get("target.schema.registry.api.key"),
            api_secret: get("target.schema.registry.api.secret"),
        },
        processing_mode,
        start_timestamp,
        end_timestamp,
        stop_at_current: props.get("stop.at.current").map(|v| parse_bool(v, false)).unwrap_or(false),
        consumer_group_id: get_or("consumer.group.id", DEFAULT_CONSUMER_GROUP),
        include_methods,
        include_config_changes,
        filter_subjects: props.get("filter.subjects").map(|v| split_csv(v)).unwrap_or_default(),
        only_successful: props.get("only.successful").map(|v| parse_bool(v, true)).unwrap_or(true),
        enable_deduplication: props.get("enable.deduplication").map(|v| parse_bool(v, true)).unwrap_or(true),
        state_store_path: get_or("state.store.path", DEFAULT_STATE_STORE_PATH),
        security_protocol: get_or("security.protocol", DEFAULT_SECURITY_PROTOCOL),
        sasl_mechanism: get_or("sasl.mechanism", DEFAULT_SASL_MECHANISM),
        health_port: props.get("health.port").and_then(|v| v.parse().ok()).unwrap_or(0),
        processing_threads: props
            .get("processing.threads")
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_PROCESSING_THREADS),
        dry_run: props.get("dry.run").map(|v| parse_bool(v, false)).unwrap_or(false),
        poll_timeout_ms: props
            .get("poll.timeout.ms")
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_POLL_TIMEOUT_MS),
        batch_size: props.get("batch.size").and_then(|v| v.parse().ok()).unwrap_or(DEFAULT_BATCH_SIZE),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_properties_ignoring_comments_and_blanks() {
        let text = "\n# a comment\naudit.log.topic=my-topic\n\nconsumer.group.id = my-group\n";
        let props = parse_properties(text);
        assert_eq!(props.get("audit.log.topic").unwrap(), "my-topic");
        assert_eq!(props.get("consumer.group.id").unwrap(), "my-group");
        assert_eq!(props.len(), 2);
    }

    #[test]
    fn extracts_repeatable_environment_groups() {
        let mut props = HashMap::new();
        props.insert("environments.env-a.schema.registry.url".to_string(), "https://a".to_string());
        props.insert("environments.env-a.schema.registry.api.key".to_string(), "ka".to_string());
        props.insert("environments.env-a.schema.registry.api.secret".to_string(), "sa".to_string());
        props.insert("environments.env-b.schema.registry.url".to_string(), "https://b".to_string());
        props.insert("environments.env-b.schema.registry.api.key".to_string(), "kb".to_string());
        props.insert("environments.env-b.schema.registry.api.secret".to_string(), "sb".to_string());

        let envs = extract_environments(&props);
        assert_eq!(envs.len(), 2);
        assert_eq!(envs["env-a"].schema_registry_url, "https://a");
        assert_eq!(envs["env-b"].api_key, "kb");
    }

    #[test]
    fn validate_requires_timestamp_in_timestamp_mode() {
        let mut config = AppConfig::test_default();
        config.audit.bootstrap_servers = "b".to_string();
        config.environments = crate::classify::test_environments(&["env-a"]);
        config.processing_mode = ProcessingMode::Timestamp;
        config.start_timestamp = None;
        let violations = config.validate();
        assert!(violations.iter().any(|v| v.contains("start.timestamp")));
    }

    #[test]
    fn validate_passes_for_well_formed_config() {
        let mut config = AppConfig::test_default();
        config.environments = crate::classify::test_environments(&["env-a"]);
        assert!(config.validate().is_empty());
    }
}
