//! `schema-change-notifier` — watches an audit-log stream for schema
//! registry mutations and republishes typed notifications downstream.

use anyhow::{Context, Result};
use clap::Parser;
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "schema-change-notifier")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Watches an audit-log stream for schema-registry mutations and republishes typed notifications", long_about = None)]
struct Cli {
    /// Path to a `key=value` properties file. CLI flags below override
    /// values loaded from it.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Emit JSON-formatted log lines instead of human-readable ones.
    #[arg(long)]
    json: bool,

    /// Default log level when `RUST_LOG` is unset.
    #[arg(long, default_value = "info")]
    log_level: String,

    #[arg(long = "audit-log-bootstrap-servers")]
    audit_log_bootstrap_servers: Option<String>,
    #[arg(long = "audit-log-api-key")]
    audit_log_api_key: Option<String>,
    #[arg(long = "audit-log-api-secret")]
    audit_log_api_secret: Option<String>,
    #[arg(long = "audit-log-topic")]
    audit_log_topic: Option<String>,

    /// Repeatable: `<envId>,<schemaRegistryUrl>,<apiKey>,<apiSecret>`.
    /// Comma-separated (not colon-separated) since registry URLs contain
    /// colons themselves.
    #[arg(long = "environment", action = clap::ArgAction::Append)]
    environment: Vec<String>,

    #[arg(long = "target-bootstrap-servers")]
    target_bootstrap_servers: Option<String>,
    #[arg(long = "target-api-key")]
    target_api_key: Option<String>,
    #[arg(long = "target-api-secret")]
    target_api_secret: Option<String>,
    #[arg(long = "target-topic")]
    target_topic: Option<String>,

    #[arg(long = "target-schema-registry-url")]
    target_schema_registry_url: Option<String>,
    #[arg(long = "target-schema-registry-api-key")]
    target_schema_registry_api_key: Option<String>,
    #[arg(long = "target-schema-registry-api-secret")]
    target_schema_registry_api_secret: Option<String>,

    #[arg(long = "processing-mode")]
    processing_mode: Option<String>,
    #[arg(long = "start-timestamp")]
    start_timestamp: Option<String>,
    #[arg(long = "end-timestamp")]
    end_timestamp: Option<String>,
    #[arg(long = "stop-at-current")]
    stop_at_current: Option<bool>,

    #[arg(long = "consumer-group-id")]
    consumer_group_id: Option<String>,

    #[arg(long = "filter-method-names")]
    filter_method_names: Option<String>,
    #[arg(long = "include-config-changes")]
    include_config_changes: Option<bool>,
    #[arg(long = "filter-subjects")]
    filter_subjects: Option<String>,
    #[arg(long = "only-successful")]
    only_successful: Option<bool>,

    #[arg(long = "enable-deduplication")]
    enable_deduplication: Option<bool>,
    #[arg(long = "state-store-path")]
    state_store_path: Option<String>,

    #[arg(long = "security-protocol")]
    security_protocol: Option<String>,
    #[arg(long = "sasl-mechanism")]
    sasl_mechanism: Option<String>,

    #[arg(long = "health-port")]
    health_port: Option<u16>,
    #[arg(long = "processing-threads")]
    processing_threads: Option<usize>,
    #[arg(long = "dry-run")]
    dry_run: Option<bool>,
    #[arg(long = "poll-timeout-ms")]
    poll_timeout_ms: Option<u64>,
    #[arg(long = "batch-size")]
    batch_size: Option<usize>,
}

impl Cli {
    /// Folds every `Some` flag into the properties map loaded from
    /// `--config`, with CLI values taking precedence.
    fn apply_overrides(&self, props: &mut HashMap<String, String>) {
        let mut set = |key: &str, value: &Option<impl ToString>| {
            if let Some(v) = value {
                props.insert(key.to_string(), v.to_string());
            }
        };
        set("audit.log.bootstrap.servers", &self.audit_log_bootstrap_servers);
        set("audit.log.api.key", &self.audit_log_api_key);
        set("audit.log.api.secret", &self.audit_log_api_secret);
        set("audit.log.topic", &self.audit_log_topic);
        set("target.bootstrap.servers", &self.target_bootstrap_servers);
        set("target.api.key", &self.target_api_key);
        set("target.api.secret", &self.target_api_secret);
        set("target.topic", &self.target_topic);
        set("target.schema.registry.url", &self.target_schema_registry_url);
        set("target.schema.registry.api.key", &self.target_schema_registry_api_key);
        set("target.schema.registry.api.secret", &self.target_schema_registry_api_secret);
        set("processing.mode", &self.processing_mode);
        set("start.timestamp", &self.start_timestamp);
        set("end.timestamp", &self.end_timestamp);
        set("stop.at.current", &self.stop_at_current);
        set("consumer.group.id", &self.consumer_group_id);
        set("filter.method.names", &self.filter_method_names);
        set("include.config.changes", &self.include_config_changes);
        set("filter.subjects", &self.filter_subjects);
        set("only.successful", &self.only_successful);
        set("enable.deduplication", &self.enable_deduplication);
        set("state.store.path", &self.state_store_path);
        set("security.protocol", &self.security_protocol);
        set("sasl.mechanism", &self.sasl_mechanism);
        set("health.port", &self.health_port);
        set("processing.threads", &self.processing_threads);
        set("dry.run", &self.dry_run);
        set("poll.timeout.ms", &self.poll_timeout_ms);
        set("batch.size", &self.batch_size);

        for spec in &self.environment {
            let parts: Vec<&str> = spec.splitn(4, ',').collect();
            if let [env_id, url, key, secret] = parts[..] {
                props.insert(format!("environments.{env_id}.schema.registry.url"), url.to_string());
                props.insert(format!("environments.{env_id}.schema.registry.api.key"), key.to_string());
                props.insert(format!("environments.{env_id}.schema.registry.api.secret"), secret.to_string());
            } else {
                tracing::warn!(spec, "ignoring malformed --environment flag, expected <envId>,<url>,<key>,<secret>");
            }
        }
    }
}

fn load_config(cli: &Cli) -> Result<notifier_core::AppConfig> {
    let mut props = match &cli.config {
        Some(path) => notifier_core::config::load_properties_file(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?,
        None => HashMap::new(),
    };
    cli.apply_overrides(&mut props);

    let config = notifier_core::config::build_config(&props)?;
    let violations = config.validate();
    if !violations.is_empty() {
        anyhow::bail!("configuration error: {}", violations.join("; "));
    }
    Ok(config)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    notifier_core::init_tracing(cli.json, &cli.log_level);

    let config = match load_config(&cli) {
        Ok(c) => c,
        Err(err) => {
            tracing::error!(error = %err, "refusing to start");
            std::process::exit(1);
        }
    };

    let runtime = tokio::runtime::Runtime::new()?;
    let exit_code = runtime.block_on(run(config));
    std::process::exit(exit_code);
}

async fn run(config: notifier_core::AppConfig) -> i32 {
    let health_port = config.health_port;

    let mut runner = match notifier_runner::Runner::new(config).await {
        Ok(r) => r,
        Err(err) => {
            tracing::error!(error = %err, "fatal startup failure");
            return 1;
        }
    };

    runner.install_shutdown_hook();

    if health_port != 0 {
        let metrics = runner.metrics();
        tokio::spawn(async move {
            if let Err(err) = notifier_health::serve(health_port, metrics).await {
                tracing::error!(error = %err, "health surface exited");
            }
        });
    }

    let run_result = runner.run().await;
    if let Err(err) = &run_result {
        tracing::error!(error = %err, "runner exited with an error");
    }

    if let Err(err) = runner.shutdown().await {
        tracing::error!(error = %err, "shutdown encountered an error");
    }

    if run_result.is_err() {
        1
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_flag_parses_four_colon_separated_fields() {
        let cli = Cli::parse_from([
            "schema-change-notifier",
            "--environment",
            "env-a,https://reg,key,secret",
        ]);
        let mut props = HashMap::new();
        cli.apply_overrides(&mut props);
        assert_eq!(props.get("environments.env-a.schema.registry.url").unwrap(), "https://reg");
        assert_eq!(props.get("environments.env-a.schema.registry.api.key").unwrap(), "key");
        assert_eq!(props.get("environments.env-a.schema.registry.api.secret").unwrap(), "secret");
    }

    #[test]
    fn cli_flags_override_file_values() {
        let cli = Cli::parse_from(["schema-change-notifier", "--audit-log-topic", "from-cli"]);
        let mut props = HashMap::new();
        props.insert("audit.log.topic".to_string(), "from-file".to_string());
        cli.apply_overrides(&mut props);
        assert_eq!(props.get("audit.log.topic").unwrap(), "from-cli");
    }

    #[test]
    fn load_config_reports_aggregated_violations() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notifier.properties");
        std::fs::write(&path, "audit.log.topic=my-topic\n").unwrap();

        let cli = Cli::parse_from(["schema-change-notifier", "--config", path.to_str().unwrap()]);
        let err = load_config(&cli).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("bootstrap.servers"));
    }
}
