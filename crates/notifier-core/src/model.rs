//! Domain types shared by every crate in the workspace: the audit event
//! tree consumed off the wire, the per-tenant configuration and schema
//! records produced while enriching it, and the notification envelope
//! published downstream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::codec::SchemaId;

/// One row from the audit-log stream. Unknown fields are ignored by
/// `serde`'s default behavior; we never opt into `deny_unknown_fields`.
#[derive(Debug, Clone, Deserialize)]
pub struct AuditEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub source: Option<String>,
    pub time: DateTime<Utc>,
    #[serde(default)]
    pub data: Option<AuditEventData>,
}

/// The sentinel value `AuditEvent::event_type` must equal for the event
/// to be in scope at all.
pub const AUDIT_EVENT_TYPE: &str = "io.confluent.sg.server/request";

#[derive(Debug, Clone, Deserialize)]
pub struct AuditEventData {
    #[serde(default)]
    pub service_name: Option<String>,
    #[serde(default)]
    pub method_name: Option<String>,
    #[serde(default)]
    pub resource_name: Option<String>,
    #[serde(default)]
    pub result: Option<AuditResult>,
    #[serde(default)]
    pub request: Option<AuditRequest>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuditResult {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub data: Option<AuditResultData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuditResultData {
    /// May arrive as a JSON float; narrowed to a signed 32-bit id by
    /// [`SchemaId`]'s deserializer.
    #[serde(default)]
    pub id: Option<SchemaId>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuditRequest {
    #[serde(default)]
    pub data: Option<AuditRequestData>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub version: Option<i32>,
    #[serde(default)]
    pub compatibility: Option<String>,
    #[serde(default)]
    pub mode: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuditRequestData {
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default)]
    pub schema_type: Option<String>,
    #[serde(default)]
    pub references: Option<serde_json::Value>,
}

/// Per-tenant schema-registry credentials. Loaded once at startup and
/// never mutated afterward.
#[derive(Clone, Serialize)]
pub struct EnvironmentConfig {
    pub env_id: String,
    pub schema_registry_url: String,
    pub api_key: String,
    #[serde(skip_serializing)]
    pub api_secret: String,
}

impl fmt::Debug for EnvironmentConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvironmentConfig")
            .field("env_id", &self.env_id)
            .field("schema_registry_url", &self.schema_registry_url)
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .finish()
    }
}

impl EnvironmentConfig {
    /// Returns the non-empty violations for this environment, prefixed
    /// with its id so the aggregated startup error is actionable.
    pub fn validate(&self) -> Vec<String> {
        let mut violations = Vec::new();
        if self.env_id.trim().is_empty() {
            violations.push("environment id must not be empty".to_string());
        }
        if self.schema_registry_url.trim().is_empty() {
            violations.push(format!("environments.{}.schema.registry.url must not be empty", self.env_id));
        }
        if self.api_key.trim().is_empty() {
            violations.push(format!("environments.{}.schema.registry.api.key must not be empty", self.env_id));
        }
        if self.api_secret.trim().is_empty() {
            violations.push(format!("environments.{}.schema.registry.api.secret must not be empty", self.env_id));
        }
        violations
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SchemaType {
    Avro,
    Json,
    Protobuf,
}

impl Default for SchemaType {
    fn default() -> Self {
        SchemaType::Avro
    }
}

impl fmt::Display for SchemaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SchemaType::Avro => "AVRO",
            SchemaType::Json => "JSON",
            SchemaType::Protobuf => "PROTOBUF",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for SchemaType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "AVRO" => Ok(SchemaType::Avro),
            "JSON" => Ok(SchemaType::Json),
            "PROTOBUF" => Ok(SchemaType::Protobuf),
            _ => Err(()),
        }
    }
}

/// A schema fetched from a tenant registry and cached by `(env_id, schema_id)`.
#[derive(Debug, Clone)]
pub struct SchemaInfo {
    pub env_id: String,
    pub schema_id: i32,
    pub subject: Option<String>,
    pub version: Option<i32>,
    pub schema: String,
    pub schema_type: SchemaType,
    pub references: Option<serde_json::Value>,
}

/// The five possible shapes of the downstream notification. Exactly one
/// variant's body is populated per notification, mirroring the tagged
/// union in the upstream audit protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum NotificationBody {
    SchemaRegistered {
        schema: String,
        references: Option<serde_json::Value>,
    },
    SchemaDeleted {
        permanent: bool,
    },
    SubjectDeleted {
        permanent: bool,
        versions_deleted: Option<i32>,
    },
    CompatibilityUpdated {
        new_compatibility: Option<String>,
    },
    ModeUpdated {
        new_mode: Option<String>,
    },
}

impl NotificationBody {
    fn event_type(&self) -> &'static str {
        match self {
            NotificationBody::SchemaRegistered { .. } => "SCHEMA_REGISTERED",
            NotificationBody::SchemaDeleted { .. } => "SCHEMA_DELETED",
            NotificationBody::SubjectDeleted { .. } => "SUBJECT_DELETED",
            NotificationBody::CompatibilityUpdated { .. } => "COMPATIBILITY_UPDATED",
            NotificationBody::ModeUpdated { .. } => "MODE_UPDATED",
        }
    }

    /// Field name the body nests under on the wire. Preserved verbatim
    /// from the source protocol; not derivable from `event_type`.
    fn field_name(&self) -> &'static str {
        match self {
            NotificationBody::SchemaRegistered { .. } => "dataContractRegistered",
            NotificationBody::SchemaDeleted { .. } => "schemaDeleted",
            NotificationBody::SubjectDeleted { .. } => "subjectDeleted",
            NotificationBody::CompatibilityUpdated { .. } => "compatibilityUpdated",
            NotificationBody::ModeUpdated { .. } => "modeUpdated",
        }
    }

    fn to_json(&self) -> serde_json::Value {
        match self {
            NotificationBody::SchemaRegistered { schema, references } => {
                let mut m = serde_json::Map::new();
                m.insert("schema".to_string(), serde_json::Value::String(schema.clone()));
                if let Some(r) = references {
                    m.insert("references".to_string(), r.clone());
                }
                serde_json::Value::Object(m)
            }
            NotificationBody::SchemaDeleted { permanent } => {
                serde_json::json!({ "permanent": permanent })
            }
            NotificationBody::SubjectDeleted { permanent, versions_deleted } => {
                let mut m = serde_json::Map::new();
                m.insert("permanent".to_string(), serde_json::Value::Bool(*permanent));
                if let Some(v) = versions_deleted {
                    m.insert("versionsDeleted".to_string(), serde_json::json!(v));
                }
                serde_json::Value::Object(m)
            }
            NotificationBody::CompatibilityUpdated { new_compatibility } => {
                let mut m = serde_json::Map::new();
                if let Some(c) = new_compatibility {
                    m.insert("newCompatibility".to_string(), serde_json::Value::String(c.clone()));
                }
                serde_json::Value::Object(m)
            }
            NotificationBody::ModeUpdated { new_mode } => {
                let mut m = serde_json::Map::new();
                if let Some(mode) = new_mode {
                    m.insert("newMode".to_string(), serde_json::Value::String(mode.clone()));
                }
                serde_json::Value::Object(m)
            }
        }
    }
}

/// The full downstream record: a common envelope plus one populated
/// [`NotificationBody`].
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub schema_id: Option<i32>,
    pub subject: Option<String>,
    pub version: Option<i32>,
    pub schema_type: Option<SchemaType>,
    pub timestamp: DateTime<Utc>,
    pub audit_log_event_id: Option<String>,
    pub environment_id: Option<String>,
    pub body: NotificationBody,
}

impl Notification {
    /// Render as the wire JSON value: envelope fields flattened with the
    /// variant body nested under its own field name, nulls omitted.
    pub fn to_json(&self) -> serde_json::Value {
        let mut m = serde_json::Map::new();
        m.insert("eventType".to_string(), serde_json::Value::String(self.body.event_type().to_string()));
        if let Some(id) = self.schema_id {
            m.insert("schemaId".to_string(), serde_json::json!(id));
        }
        if let Some(s) = &self.subject {
            m.insert("subject".to_string(), serde_json::Value::String(s.clone()));
        }
        if let Some(v) = self.version {
            m.insert("version".to_string(), serde_json::json!(v));
        }
        if let Some(st) = self.schema_type {
            m.insert("schemaType".to_string(), serde_json::Value::String(st.to_string()));
        }
        m.insert(
            "timestamp".to_string(),
            serde_json::Value::String(self.timestamp.to_rfc3339()),
        );
        if let Some(id) = &self.audit_log_event_id {
            m.insert("auditLogEventId".to_string(), serde_json::Value::String(id.clone()));
        }
        if let Some(env) = &self.environment_id {
            m.insert("environmentId".to_string(), serde_json::Value::String(env.clone()));
        }
        m.insert(self.body.field_name().to_string(), self.body.to_json());
        serde_json::Value::Object(m)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        // `to_json` only ever produces well-formed values, so this cannot fail.
        serde_json::to_vec(&self.to_json()).expect("notification serializes")
    }
}

/// `subject:methodName:schemaId`, with missing components rendered as the
/// literal strings `"unknown"`/`"null"`. Note that `subject` here is the
/// dedup-specific extraction (`request.data.subject` or `resourceName`),
/// not the envelope subject a delete notification carries.
pub fn dedup_key(subject: Option<&str>, method_name: Option<&str>, schema_id: Option<i32>) -> String {
    format!(
        "{}:{}:{}",
        subject.unwrap_or("unknown"),
        method_name.unwrap_or("unknown"),
        schema_id.map(|i| i.to_string()).unwrap_or_else(|| "null".to_string()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_key_renders_missing_components() {
        assert_eq!(dedup_key(None, None, None), "unknown:unknown:null");
        assert_eq!(dedup_key(Some("orders-value"), Some("m"), Some(5)), "orders-value:m:5");
    }

    #[test]
    fn environment_config_debug_redacts_secret() {
        let env = EnvironmentConfig {
            env_id: "env-test123".into(),
            schema_registry_url: "https://registry".into(),
            api_key: "key".into(),
            api_secret: "super-secret".into(),
        };
        let rendered = format!("{env:?}");
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn notification_to_json_omits_absent_fields() {
        let n = Notification {
            schema_id: None,
            subject: None,
            version: None,
            schema_type: None,
            timestamp: DateTime::parse_from_rfc3339("2024-01-15T10:30:00Z").unwrap().with_timezone(&Utc),
            audit_log_event_id: None,
            environment_id: None,
            body: NotificationBody::SchemaDeleted { permanent: false },
        };
        let v = n.to_json();
        assert!(v.get("schemaId").is_none());
        assert!(v.get("subject").is_none());
        assert_eq!(v["eventType"], "SCHEMA_DELETED");
        assert_eq!(v["schemaDeleted"]["permanent"], false);
    }

    #[test]
    fn schema_registered_field_name_matches_source_protocol() {
        let n = Notification {
            schema_id: Some(100001),
            subject: Some("orders-value".into()),
            version: Some(1),
            schema_type: Some(SchemaType::Avro),
            timestamp: Utc::now(),
            audit_log_event_id: Some("e1".into()),
            environment_id: Some("env-test123".into()),
            body: NotificationBody::SchemaRegistered {
                schema: "{\"type\":\"record\",\"name\":\"Order\"}".into(),
                references: None,
            },
        };
        let v = n.to_json();
        assert_eq!(v["dataContractRegistered"]["schema"], "{\"type\":\"record\",\"name\":\"Order\"}");
    }
}
