//! Per-tenant schema registry client (C3): authenticated HTTPS lookups
//! by schema id or `(subject, version)`, with an in-memory cache keyed
//! by `(envId, schemaId)`.

use async_trait::async_trait;
use notifier_core::{EnvironmentConfig, NotifierError, SchemaInfo, SchemaType};
use reqwest::StatusCode;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Mutex;
use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const READ_TIMEOUT: Duration = Duration::from_secs(30);
const SCHEMA_REGISTRY_ACCEPT: &str = "application/vnd.schemaregistry.v1+json";

#[derive(serde::Deserialize)]
struct SchemaByIdResponse {
    schema: String,
    #[serde(rename = "schemaType")]
    schema_type: Option<String>,
    references: Option<serde_json::Value>,
}

#[derive(serde::Deserialize)]
struct SubjectVersion {
    subject: String,
    version: i32,
}

#[derive(serde::Deserialize)]
struct SubjectVersionResponse {
    id: Option<i32>,
    schema: String,
    #[serde(rename = "schemaType")]
    schema_type: Option<String>,
    references: Option<serde_json::Value>,
}

struct TenantClient {
    env: EnvironmentConfig,
    http: reqwest::Client,
}

impl TenantClient {
    fn new(env: EnvironmentConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(READ_TIMEOUT)
            .build()?;
        Ok(TenantClient { env, http })
    }

    fn base_url(&self) -> &str {
        self.env.schema_registry_url.trim_end_matches('/')
    }

    fn request(&self, url: &str) -> reqwest::RequestBuilder {
        self.http
            .get(url)
            .basic_auth(&self.env.api_key, Some(&self.env.api_secret))
            .header(reqwest::header::ACCEPT, SCHEMA_REGISTRY_ACCEPT)
    }
}

/// The C3 component: routes lookups to the right tenant, caches results,
/// and degrades gracefully on partial failures per the spec (a failed
/// versions lookup does not fail the outer `get_by_id` call).
pub struct RegistryClient {
    tenants: HashMap<String, TenantClient>,
    cache: Mutex<HashMap<(String, i32), SchemaInfo>>,
}

impl RegistryClient {
    pub fn new(environments: HashMap<String, EnvironmentConfig>) -> anyhow::Result<Self> {
        let mut tenants = HashMap::new();
        for (id, env) in environments {
            tenants.insert(id, TenantClient::new(env)?);
        }
        Ok(RegistryClient { tenants, cache: Mutex::new(HashMap::new()) })
    }

    pub fn has_environment(&self, env_id: &str) -> bool {
        self.tenants.contains_key(env_id)
    }

    pub fn clear_cache(&self) {
        self.cache.lock().expect("registry cache mutex poisoned").clear();
    }

    pub fn cache_size(&self) -> usize {
        self.cache.lock().expect("registry cache mutex poisoned").len()
    }

    pub async fn close(&self) {
        self.clear_cache();
    }

    /// `GET /schemas/ids/{id}`, degrading gracefully if the follow-up
    /// versions lookup fails. Returns `Ok(None)` on 404.
    pub async fn get_by_id(&self, env_id: &str, schema_id: i32) -> anyhow::Result<Option<SchemaInfo>> {
        if let Some(cached) = self.cache.lock().expect("registry cache mutex poisoned").get(&(env_id.to_string(), schema_id)) {
            return Ok(Some(cached.clone()));
        }

        let tenant = match self.tenants.get(env_id) {
            Some(t) => t,
            None => {
                tracing::warn!(env_id, "schema lookup for unknown environment");
                return Ok(None);
            }
        };

        let url = format!("{}/schemas/ids/{}", tenant.base_url(), schema_id);
        let response = tenant.request(&url).send().await.map_err(|err| {
            NotifierError::Registry {
                env_id: env_id.to_string(),
                schema_id: Some(schema_id),
                status_code: None,
                message: err.to_string(),
            }
        })?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(NotifierError::Registry {
                env_id: env_id.to_string(),
                schema_id: Some(schema_id),
                status_code: Some(status),
                message: body,
            }
            .into());
        }

        let parsed: SchemaByIdResponse = response.json().await.map_err(|err| NotifierError::Registry {
            env_id: env_id.to_string(),
            schema_id: Some(schema_id),
            status_code: None,
            message: err.to_string(),
        })?;

        let (subject, version) = match self.fetch_versions(tenant, schema_id).await {
            Ok(Some((subject, version))) => (Some(subject), Some(version)),
            Ok(None) => (None, None),
            Err(err) => {
                tracing::warn!(env_id, schema_id, error = %err, "versions lookup degraded, continuing without subject/version");
                (None, None)
            }
        };

        let schema_type = parsed
            .schema_type
            .as_deref()
            .and_then(|s| SchemaType::from_str(s).ok())
            .unwrap_or(SchemaType::Avro);

        let info = SchemaInfo {
            env_id: env_id.to_string(),
            schema_id,
            subject,
            version,
            schema: parsed.schema,
            schema_type,
            references: parsed.references,
        };

        self.cache
            .lock()
            .expect("registry cache mutex poisoned")
            .insert((env_id.to_string(), schema_id), info.clone());
        Ok(Some(info))
    }

    async fn fetch_versions(&self, tenant: &TenantClient, schema_id: i32) -> anyhow::Result<Option<(String, i32)>> {
        let url = format!("{}/schemas/ids/{}/versions", tenant.base_url(), schema_id);
        let response = tenant.request(&url).send().await?;
        if !response.status().is_success() {
            anyhow::bail!("versions lookup returned status {}", response.status());
        }
        let versions: Vec<SubjectVersion> = response.json().await?;
        Ok(versions.into_iter().next().map(|v| (v.subject, v.version)))
    }

    /// `GET /subjects/{subject}/versions/{version}`.
    pub async fn get_by_subject_version(
        &self,
        env_id: &str,
        subject: &str,
        version: i32,
    ) -> anyhow::Result<Option<SchemaInfo>> {
        let tenant = match self.tenants.get(env_id) {
            Some(t) => t,
            None => {
                tracing::warn!(env_id, "schema lookup for unknown environment");
                return Ok(None);
            }
        };

        let url = format!("{}/subjects/{}/versions/{}", tenant.base_url(), subject, version);
        let response = tenant.request(&url).send().await.map_err(|err| NotifierError::Registry {
            env_id: env_id.to_string(),
            schema_id: None,
            status_code: None,
            message: err.to_string(),
        })?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(NotifierError::Registry {
                env_id: env_id.to_string(),
                schema_id: None,
                status_code: Some(status),
                message: body,
            }
            .into());
        }

        let parsed: SubjectVersionResponse = response.json().await.map_err(|err| NotifierError::Registry {
            env_id: env_id.to_string(),
            schema_id: None,
            status_code: None,
            message: err.to_string(),
        })?;

        let schema_type = parsed
            .schema_type
            .as_deref()
            .and_then(|s| SchemaType::from_str(s).ok())
            .unwrap_or(SchemaType::Avro);

        let info = SchemaInfo {
            env_id: env_id.to_string(),
            schema_id: parsed.id.unwrap_or_default(),
            subject: Some(subject.to_string()),
            version: Some(version),
            schema: parsed.schema,
            schema_type,
            references: parsed.references,
        };

        if let Some(id) = parsed.id {
            self.cache
                .lock()
                .expect("registry cache mutex poisoned")
                .insert((env_id.to_string(), id), info.clone());
        }
        Ok(Some(info))
    }
}

#[async_trait]
impl notifier_core::SchemaLookup for RegistryClient {
    async fn get_by_id(&self, env_id: &str, schema_id: i32) -> anyhow::Result<Option<notifier_core::LookupResult>> {
        Ok(RegistryClient::get_by_id(self, env_id, schema_id)
            .await?
            .map(|info| notifier_core::LookupResult {
                subject: info.subject,
                version: info.version,
                schema: info.schema,
                schema_type: info.schema_type,
                references: info.references,
            }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_env(url: &str) -> EnvironmentConfig {
        EnvironmentConfig {
            env_id: "env-test123".to_string(),
            schema_registry_url: url.to_string(),
            api_key: "key".to_string(),
            api_secret: "secret".to_string(),
        }
    }

    #[test]
    fn base_url_trims_trailing_slash() {
        let tenant = TenantClient::new(test_env("https://registry.example/")).unwrap();
        assert_eq!(tenant.base_url(), "https://registry.example");
    }

    #[tokio::test]
    async fn has_environment_reflects_configured_tenants() {
        let mut envs = HashMap::new();
        envs.insert("env-test123".to_string(), test_env("https://registry.example"));
        let client = RegistryClient::new(envs).unwrap();
        assert!(client.has_environment("env-test123"));
        assert!(!client.has_environment("env-other"));
    }

    #[tokio::test]
    async fn unknown_environment_returns_none_without_error() {
        let client = RegistryClient::new(HashMap::new()).unwrap();
        let result = client.get_by_id("env-missing", 1).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn clear_cache_resets_size() {
        let mut envs = HashMap::new();
        envs.insert("env-test123".to_string(), test_env("https://registry.example"));
        let client = RegistryClient::new(envs).unwrap();
        client.cache.lock().unwrap().insert(
            ("env-test123".to_string(), 1),
            SchemaInfo {
                env_id: "env-test123".to_string(),
                schema_id: 1,
                subject: None,
                version: None,
                schema: "{}".to_string(),
                schema_type: SchemaType::Avro,
                references: None,
            },
        );
        assert_eq!(client.cache_size(), 1);
        client.clear_cache();
        assert_eq!(client.cache_size(), 0);
    }
}
