//! Domain model, JSON codec, classifier/enricher, configuration, error
//! taxonomy, metrics, and tracing setup shared by every crate in the
//! schema-change-notifier workspace.

pub mod classify;
pub mod codec;
pub mod config;
pub mod error;
pub mod metrics;
pub mod model;
pub mod telemetry;

pub use classify::{Classifier, LookupResult, SchemaLookup};
pub use codec::SchemaId;
pub use config::{AppConfig, ProcessingMode, MAX_DEDUP_EVENTS};
pub use error::{NotifierError, Result};
pub use metrics::RunnerMetrics;
pub use model::{
    dedup_key, AuditEvent, AuditEventData, AuditRequest, AuditRequestData, AuditResult,
    AuditResultData, EnvironmentConfig, Notification, NotificationBody, SchemaInfo, SchemaType,
    AUDIT_EVENT_TYPE,
};
pub use telemetry::init_tracing;
