//! Relevance filtering, tenant/subject extraction, and notification
//! construction. This is the only module that reaches into the registry
//! client — it takes a reference, it never owns one (ownership lives with
//! the runner).

use async_trait::async_trait;
use regex::Regex;

use crate::config::AppConfig;
use crate::model::{
    dedup_key, AuditEvent, EnvironmentConfig, Notification, NotificationBody, SchemaType,
    AUDIT_EVENT_TYPE,
};

/// The capability the classifier needs from the registry client. Kept as
/// a trait so `notifier-core` does not depend on `notifier-registry`
/// (which would need an async HTTP stack this crate otherwise has no use
/// for) and so tests can substitute a stub.
#[async_trait]
pub trait SchemaLookup: Send + Sync {
    async fn get_by_id(&self, env_id: &str, schema_id: i32) -> anyhow::Result<Option<LookupResult>>;
}

/// The subset of `SchemaInfo` the classifier needs back from a lookup.
#[derive(Debug, Clone)]
pub struct LookupResult {
    pub subject: Option<String>,
    pub version: Option<i32>,
    pub schema: String,
    pub schema_type: SchemaType,
    pub references: Option<serde_json::Value>,
}

const METHOD_REGISTER: &str = "schema-registry.RegisterSchema";
const METHOD_DELETE_SCHEMA: &str = "schema-registry.DeleteSchema";
const METHOD_DELETE_SUBJECT: &str = "schema-registry.DeleteSubject";
const METHOD_UPDATE_COMPATIBILITY: &str = "schema-registry.UpdateCompatibility";
const METHOD_UPDATE_MODE: &str = "schema-registry.UpdateMode";

/// A `filter.subjects` glob, precompiled once at construction instead of
/// per event. Only `*` is a wildcard; everything else is a literal match
/// anchored to the whole string.
struct SubjectGlob {
    regex: Regex,
}

impl SubjectGlob {
    fn compile(pattern: &str) -> SubjectGlob {
        let mut out = String::with_capacity(pattern.len() * 2 + 2);
        out.push('^');
        for ch in pattern.chars() {
            match ch {
                '*' => out.push_str(".*"),
                c if ".+?()|[]{}^$\\".contains(c) => {
                    out.push('\\');
                    out.push(c);
                }
                c => out.push(c),
            }
        }
        out.push('$');
        SubjectGlob {
            regex: Regex::new(&out).expect("glob pattern always compiles to a valid regex"),
        }
    }

    fn matches(&self, subject: &str) -> bool {
        self.regex.is_match(subject)
    }
}

pub struct Classifier {
    config: AppConfig,
    environment_regex: Regex,
    subject_globs: Vec<SubjectGlob>,
}

impl Classifier {
    pub fn new(config: AppConfig) -> Self {
        let subject_globs = config
            .filter_subjects
            .iter()
            .map(|p| SubjectGlob::compile(p))
            .collect();
        Classifier {
            config,
            environment_regex: Regex::new(r"environment=([^/]+)").expect("static pattern"),
            subject_globs,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    fn extract_environment_id(&self, data_resource_name: Option<&str>, event_source: Option<&str>) -> Option<String> {
        data_resource_name
            .and_then(|s| self.environment_regex.captures(s))
            .or_else(|| event_source.and_then(|s| self.environment_regex.captures(s)))
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
    }

    fn subject_matches(&self, subject: &str) -> bool {
        if self.subject_globs.is_empty() {
            return true;
        }
        self.subject_globs.iter().any(|g| g.matches(subject))
    }

    /// The `subject:methodName:schemaId` key, computed independently of
    /// the notification body's own subject field.
    pub fn dedup_key_for(&self, event: &AuditEvent) -> String {
        let data = event.data.as_ref();
        let method_name = data.and_then(|d| d.method_name.as_deref());
        let subject = data
            .and_then(|d| d.request.as_ref())
            .and_then(|r| r.data.as_ref())
            .and_then(|rd| rd.subject.as_deref())
            .or_else(|| data.and_then(|d| d.resource_name.as_deref()));
        let schema_id = data
            .and_then(|d| d.result.as_ref())
            .and_then(|r| r.data.as_ref())
            .and_then(|rd| rd.id)
            .map(i32::from);
        dedup_key(subject, method_name, schema_id)
    }

    /// `subject:methodName:schemaId` variant used for relevance/dispatch:
    /// prefers `request.data.subject`, then `request.subject`, then falls
    /// back to the resource name (used as-is by delete operations).
    fn extraction_subject(&self, event: &AuditEvent) -> Option<String> {
        let data = event.data.as_ref()?;
        data.request
            .as_ref()
            .and_then(|r| r.data.as_ref())
            .and_then(|rd| rd.subject.clone())
            .or_else(|| data.request.as_ref().and_then(|r| r.subject.clone()))
            .or_else(|| data.resource_name.clone())
    }

    fn environment(&self, env_id: &str) -> Option<&EnvironmentConfig> {
        self.config.environments.get(env_id)
    }

    /// Runs the six ordered relevance checks from the spec, short-circuiting
    /// on the first failure. Returns the extracted environment id on
    /// success so callers don't re-derive it.
    fn relevant(&self, event: &AuditEvent) -> Option<String> {
        if event.event_type != AUDIT_EVENT_TYPE {
            return None;
        }
        let data = event.data.as_ref()?;
        let method_name = data.method_name.as_deref()?;
        if !self.config.include_methods.iter().any(|m| m == method_name) {
            return None;
        }
        let env_id = self.extract_environment_id(data.resource_name.as_deref(), event.source.as_deref())?;
        if self.environment(&env_id).is_none() {
            return None;
        }
        if self.config.only_successful {
            let status_ok = data
                .result
                .as_ref()
                .and_then(|r| r.status.as_deref())
                .map(|s| s.eq_ignore_ascii_case("SUCCESS"))
                .unwrap_or(false);
            if !status_ok {
                return None;
            }
        }
        if !self.config.filter_subjects.is_empty() {
            let subject = self.extraction_subject(event)?;
            if !self.subject_matches(&subject) {
                return None;
            }
        }
        Some(env_id)
    }

    /// Classifies and enriches one event, consulting `registry` for
    /// `RegisterSchema` events. Returns `None` when the event is filtered
    /// or an internal error occurs (errors are logged, never propagated).
    pub async fn process(
        &self,
        event: &AuditEvent,
        registry: &dyn SchemaLookup,
    ) -> Option<Notification> {
        let env_id = match self.relevant(event) {
            Some(id) => id,
            None => return None,
        };
        let data = event.data.as_ref()?;
        let method_name = data.method_name.as_deref()?;

        let body = match method_name {
            METHOD_REGISTER => self.build_schema_registered(event, &env_id, registry).await,
            METHOD_DELETE_SCHEMA => self.build_schema_deleted(event),
            METHOD_DELETE_SUBJECT => self.build_subject_deleted(event),
            METHOD_UPDATE_COMPATIBILITY => self.build_compatibility_updated(event),
            METHOD_UPDATE_MODE => self.build_mode_updated(event),
            _ => return None,
        };

        let (body, schema_id, subject, version, schema_type) = match body {
            Some(parts) => parts,
            None => return None,
        };

        Some(Notification {
            schema_id,
            subject,
            version,
            schema_type,
            timestamp: event.time,
            audit_log_event_id: Some(event.id.clone()),
            environment_id: Some(env_id),
            body,
        })
    }

    #[allow(clippy::type_complexity)]
    async fn build_schema_registered(
        &self,
        event: &AuditEvent,
        env_id: &str,
        registry: &dyn SchemaLookup,
    ) -> Option<(NotificationBody, Option<i32>, Option<String>, Option<i32>, Option<SchemaType>)> {
        let data = event.data.as_ref()?;
        let schema_id = data
            .result
            .as_ref()
            .and_then(|r| r.data.as_ref())
            .and_then(|rd| rd.id)
            .map(i32::from);

        let fallback_schema_type = data
            .request
            .as_ref()
            .and_then(|r| r.data.as_ref())
            .and_then(|rd| rd.schema_type.as_deref())
            .and_then(|s| s.parse::<SchemaType>().ok())
            .unwrap_or(SchemaType::Avro);

        let request_subject = data
            .request
            .as_ref()
            .and_then(|r| r.data.as_ref())
            .and_then(|rd| rd.subject.clone());
        let request_schema = data
            .request
            .as_ref()
            .and_then(|r| r.data.as_ref())
            .and_then(|rd| rd.schema.clone());

        if let Some(id) = schema_id {
            match registry.get_by_id(env_id, id).await {
                Ok(Some(info)) => {
                    return Some((
                        NotificationBody::SchemaRegistered {
                            schema: info.schema,
                            references: info.references,
                        },
                        Some(id),
                        info.subject.or(request_subject),
                        info.version,
                        Some(info.schema_type),
                    ));
                }
                Ok(None) => {
                    tracing::warn!(env_id, schema_id = id, "schema id not found in registry");
                }
                Err(err) => {
                    // A genuine registry error (non-404 status, network
                    // failure) yields no notification rather than a
                    // payload-sourced fallback; only "not found" degrades.
                    tracing::warn!(env_id, schema_id = id, error = %err, "registry lookup failed");
                    return None;
                }
            }
        }

        // Degrade gracefully: no registry data available, fall back to
        // whatever the audit payload itself carried.
        let schema = request_schema?;
        Some((
            NotificationBody::SchemaRegistered { schema, references: None },
            schema_id,
            request_subject,
            None,
            Some(fallback_schema_type),
        ))
    }

    fn build_schema_deleted(
        &self,
        event: &AuditEvent,
    ) -> Option<(NotificationBody, Option<i32>, Option<String>, Option<i32>, Option<SchemaType>)> {
        let data = event.data.as_ref()?;
        let subject = data.resource_name.clone();
        let version = data.request.as_ref().and_then(|r| r.version);
        Some((
            NotificationBody::SchemaDeleted { permanent: false },
            None,
            subject,
            version,
            None,
        ))
    }

    fn build_subject_deleted(
        &self,
        event: &AuditEvent,
    ) -> Option<(NotificationBody, Option<i32>, Option<String>, Option<i32>, Option<SchemaType>)> {
        let data = event.data.as_ref()?;
        let subject = data.resource_name.clone();
        Some((
            NotificationBody::SubjectDeleted { permanent: false, versions_deleted: None },
            None,
            subject,
            None,
            None,
        ))
    }

    fn build_compatibility_updated(
        &self,
        event: &AuditEvent,
    ) -> Option<(NotificationBody, Option<i32>, Option<String>, Option<i32>, Option<SchemaType>)> {
        let data = event.data.as_ref()?;
        let new_compatibility = data.request.as_ref().and_then(|r| r.compatibility.clone());
        let subject = data.resource_name.clone();
        Some((
            NotificationBody::CompatibilityUpdated { new_compatibility },
            None,
            subject,
            None,
            None,
        ))
    }

    fn build_mode_updated(
        &self,
        event: &AuditEvent,
    ) -> Option<(NotificationBody, Option<i32>, Option<String>, Option<i32>, Option<SchemaType>)> {
        let data = event.data.as_ref()?;
        let new_mode = data.request.as_ref().and_then(|r| r.mode.clone());
        let subject = data.resource_name.clone();
        Some((
            NotificationBody::ModeUpdated { new_mode },
            None,
            subject,
            None,
            None,
        ))
    }
}

/// `include.config.changes` toggles whether `UpdateCompatibility`/
/// `UpdateMode` are part of the allow-list; kept here rather than in
/// `config` since it's purely a derivation of the recognized method set.
pub fn include_methods(base: &[String], include_config_changes: bool) -> Vec<String> {
    let mut methods: Vec<String> = base.to_vec();
    if include_config_changes {
        methods.push(METHOD_UPDATE_COMPATIBILITY.to_string());
        methods.push(METHOD_UPDATE_MODE.to_string());
    }
    methods
}

/// Minimal environment map used only for unit tests in this module;
/// production config loading lives in `config.rs`.
#[cfg(test)]
pub(crate) fn test_environments(ids: &[&str]) -> std::collections::HashMap<String, EnvironmentConfig> {
    ids.iter()
        .map(|id| {
            (
                id.to_string(),
                EnvironmentConfig {
                    env_id: id.to_string(),
                    schema_registry_url: "https://registry.example".to_string(),
                    api_key: "key".to_string(),
                    api_secret: "secret".to_string(),
                },
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::model::{AuditEventData, AuditRequest, AuditRequestData, AuditResult, AuditResultData};
    use crate::codec::SchemaId;
    use chrono::{DateTime, Utc};

    struct StubRegistry {
        result: Option<LookupResult>,
        fail: bool,
    }

    impl StubRegistry {
        fn with_result(result: Option<LookupResult>) -> Self {
            StubRegistry { result, fail: false }
        }

        fn failing() -> Self {
            StubRegistry { result: None, fail: true }
        }
    }

    #[async_trait]
    impl SchemaLookup for StubRegistry {
        async fn get_by_id(&self, _env_id: &str, _schema_id: i32) -> anyhow::Result<Option<LookupResult>> {
            if self.fail {
                anyhow::bail!("simulated registry 500");
            }
            Ok(self.result.clone())
        }
    }

    fn base_config() -> AppConfig {
        let mut config = AppConfig::test_default();
        config.environments = test_environments(&["env-test123"]);
        config.include_methods = vec![
            METHOD_REGISTER.to_string(),
            METHOD_DELETE_SCHEMA.to_string(),
            METHOD_DELETE_SUBJECT.to_string(),
        ];
        config
    }

    fn register_event(status: &str, env: &str) -> AuditEvent {
        AuditEvent {
            id: "e1".to_string(),
            event_type: AUDIT_EVENT_TYPE.to_string(),
            source: None,
            time: DateTime::parse_from_rfc3339("2024-01-15T10:30:00Z").unwrap().with_timezone(&Utc),
            data: Some(AuditEventData {
                service_name: None,
                method_name: Some(METHOD_REGISTER.to_string()),
                resource_name: Some(format!("crn://confluent.cloud/organization=org/environment={env}/schema-registry=x/subject/orders-value")),
                result: Some(AuditResult {
                    status: Some(status.to_string()),
                    data: Some(AuditResultData { id: Some(SchemaId(100001)) }),
                }),
                request: Some(AuditRequest {
                    data: Some(AuditRequestData {
                        subject: Some("orders-value".to_string()),
                        schema: None,
                        schema_type: None,
                        references: None,
                    }),
                    subject: None,
                    version: None,
                    compatibility: None,
                    mode: None,
                }),
            }),
        }
    }

    #[tokio::test]
    async fn register_schema_enriches_from_registry() {
        let config = base_config();
        let classifier = Classifier::new(config);
        let registry = StubRegistry::with_result(Some(LookupResult {
            subject: Some("orders-value".to_string()),
            version: Some(1),
            schema: "{\"type\":\"record\",\"name\":\"Order\"}".to_string(),
            schema_type: SchemaType::Avro,
            references: None,
        }));
        let event = register_event("SUCCESS", "env-test123");
        let notification = classifier.process(&event, &registry).await.expect("notification");
        assert_eq!(notification.schema_id, Some(100001));
        assert_eq!(notification.subject.as_deref(), Some("orders-value"));
        assert_eq!(notification.version, Some(1));
        assert_eq!(classifier.dedup_key_for(&event), "orders-value:schema-registry.RegisterSchema:100001");
    }

    #[tokio::test]
    async fn failed_status_is_filtered() {
        let classifier = Classifier::new(base_config());
        let registry = StubRegistry::with_result(None);
        let event = register_event("FAILURE", "env-test123");
        assert!(classifier.process(&event, &registry).await.is_none());
    }

    #[tokio::test]
    async fn unmonitored_environment_is_filtered() {
        let classifier = Classifier::new(base_config());
        let registry = StubRegistry::with_result(None);
        let event = register_event("SUCCESS", "env-other");
        assert!(classifier.process(&event, &registry).await.is_none());
    }

    #[tokio::test]
    async fn subject_glob_mismatch_filters() {
        let mut config = base_config();
        config.filter_subjects = vec!["payments-*".to_string()];
        let classifier = Classifier::new(config);
        let registry = StubRegistry::with_result(None);
        let event = register_event("SUCCESS", "env-test123");
        assert!(classifier.process(&event, &registry).await.is_none());
    }

    #[tokio::test]
    async fn registry_error_yields_no_notification() {
        let classifier = Classifier::new(base_config());
        let registry = StubRegistry::failing();
        let event = register_event("SUCCESS", "env-test123");
        assert!(classifier.process(&event, &registry).await.is_none());
    }

    #[tokio::test]
    async fn delete_subject_uses_resource_name_as_subject() {
        let classifier = Classifier::new(base_config());
        let registry = StubRegistry::with_result(None);
        let mut event = register_event("SUCCESS", "env-test123");
        event.data.as_mut().unwrap().method_name = Some(METHOD_DELETE_SUBJECT.to_string());
        event.data.as_mut().unwrap().resource_name =
            Some("crn://confluent.cloud/organization=org/environment=env-test123/schema-registry=x/subject/legacy-value".to_string());
        let notification = classifier.process(&event, &registry).await.expect("notification");
        assert_eq!(
            notification.subject.as_deref(),
            Some("crn://confluent.cloud/organization=org/environment=env-test123/schema-registry=x/subject/legacy-value")
        );
        match notification.body {
            NotificationBody::SubjectDeleted { permanent, .. } => assert!(!permanent),
            _ => panic!("expected SubjectDeleted"),
        }
    }
}
