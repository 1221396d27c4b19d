//! Base FHIR REST client
//!
//! Maps domain operations onto FHIR R4 REST interactions:
//!
//! | Operation | Request |
//! |-----------|---------|
//! | search | `GET <base>/<Type>?<params>` |
//! | read | `GET <base>/<Type>/<id>` |
//! | create | `POST <base>/<Type>` |
//! | update | `PUT <base>/<Type>/<id>` |
//! | delete | `DELETE <base>/<Type>/<id>` |
//! | batch | `POST <base>` with a batch/transaction Bundle |
//! | check_connection | `GET <base>/metadata` |
//!
//! Every request carries `Accept: application/fhir+json`; bodies are sent
//! as `application/fhir+json`. Each request runs under its own timeout.
//! Resource ids must match the FHIR id grammar before they reach a URL.

use std::collections::BTreeMap;
use std::time::Duration;

use clinview_domain::constants::{
    CAPABILITY_STATEMENT_PATH, DEFAULT_REQUEST_TIMEOUT_MS, DEFAULT_USER_AGENT,
    FHIR_JSON_MEDIA_TYPE, MAX_RESOURCE_ID_LEN,
};
use clinview_domain::{Bundle, FhirConfig, ResourceType, SearchParams};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, instrument};

use super::errors::{FhirError, FhirResult};
use crate::http::HttpClient;

/// Configuration for the base client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FhirClientConfig {
    /// Server base, e.g. `https://fhir.example.org/r4`
    pub base_url: String,
    /// Scopes patient searches to this organization when set
    pub organization_id: Option<String>,
    /// Extra headers sent with every request
    pub headers: BTreeMap<String, String>,
    /// Per-request timeout
    pub timeout: Duration,
}

impl Default for FhirClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/fhir".to_string(),
            organization_id: None,
            headers: BTreeMap::new(),
            timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
        }
    }
}

impl From<&FhirConfig> for FhirClientConfig {
    fn from(config: &FhirConfig) -> Self {
        Self {
            base_url: config.base_url.clone(),
            organization_id: config.organization_id.clone(),
            headers: config.headers.clone(),
            timeout: Duration::from_millis(config.timeout_ms),
        }
    }
}

/// FHIR REST client without resilience features
#[derive(Debug, Clone)]
pub struct FhirClient {
    http: HttpClient,
    base_url: String,
    config: FhirClientConfig,
}

impl FhirClient {
    /// Create a client.
    ///
    /// # Errors
    ///
    /// Returns `FhirError::Config` if the base URL does not parse or a
    /// configured header is not a valid HTTP header.
    pub fn new(config: FhirClientConfig) -> FhirResult<Self> {
        let parsed = url::Url::parse(&config.base_url)
            .map_err(|err| FhirError::Config(format!("Invalid base URL {}: {err}", config.base_url)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(FhirError::Config(format!(
                "Unsupported base URL scheme: {}",
                parsed.scheme()
            )));
        }

        let mut builder = HttpClient::builder()
            .timeout(config.timeout)
            .user_agent(DEFAULT_USER_AGENT)
            .header(ACCEPT.as_str(), FHIR_JSON_MEDIA_TYPE)?;
        for (name, value) in &config.headers {
            builder = builder.header(name, value)?;
        }
        let http = builder.build()?;

        Ok(Self { http, base_url: config.base_url.trim_end_matches('/').to_string(), config })
    }

    /// Create a builder for fluent configuration
    pub fn builder() -> FhirClientBuilder {
        FhirClientBuilder::default()
    }

    pub fn config(&self) -> &FhirClientConfig {
        &self.config
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        if path.is_empty() {
            self.base_url.clone()
        } else {
            format!("{}/{}", self.base_url, path.trim_start_matches('/'))
        }
    }

    /// Issue one request and decode the response body.
    ///
    /// An empty success body decodes from JSON `null`, so `T = ()` or
    /// `Option<_>` accept `204 No Content`.
    #[instrument(skip_all, fields(%method, path = %path))]
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: Option<&SearchParams>,
        body: Option<&Value>,
        headers: &[(&str, &str)],
    ) -> FhirResult<T> {
        let mut builder = self.http.request(method.clone(), self.url(path));

        if let Some(params) = query.filter(|p| !p.is_empty()) {
            builder = builder.query(params.pairs());
        }
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        if let Some(body) = body {
            builder = builder.header(CONTENT_TYPE, FHIR_JSON_MEDIA_TYPE).body(serde_json::to_vec(body)?);
        }

        // One deadline covers both the response head and the body.
        let timeout = self.config.timeout;
        let deadline = Instant::now() + timeout;
        let response = match tokio::time::timeout_at(deadline, self.http.send(builder)).await {
            Ok(result) => result?,
            Err(_) => return Err(FhirError::Timeout(timeout)),
        };

        let status = response.status();
        let text = match tokio::time::timeout_at(deadline, response.text()).await {
            Ok(Ok(text)) => text,
            Ok(Err(err)) if err.is_timeout() => return Err(FhirError::Timeout(timeout)),
            Ok(Err(err)) => return Err(FhirError::Network(err.to_string())),
            Err(_) => return Err(FhirError::Timeout(timeout)),
        };

        if !status.is_success() {
            debug!(status = status.as_u16(), "FHIR request failed");
            return Err(FhirError::from_response(status.as_u16(), status.canonical_reason(), &text));
        }

        if text.trim().is_empty() {
            return Ok(serde_json::from_value(Value::Null)?);
        }
        Ok(serde_json::from_str(&text)?)
    }

    /// `GET <Type>?params`; patient searches are scoped to the configured
    /// organization unless the caller already filters on one
    pub async fn search(&self, resource_type: ResourceType, params: &SearchParams) -> FhirResult<Bundle> {
        let mut params = params.clone();
        if resource_type == ResourceType::Patient && !params.contains_key("organization") {
            if let Some(org) = &self.config.organization_id {
                params.push("organization", format!("Organization/{org}"));
            }
        }

        self.request(Method::GET, resource_type.as_str(), Some(&params), None, &[]).await
    }

    /// `GET <Type>/<id>`
    pub async fn read(&self, resource_type: ResourceType, id: &str) -> FhirResult<Value> {
        self.request(Method::GET, &instance_path(&resource_type, id)?, None, None, &[]).await
    }

    /// `POST <Type>`; returns the created resource as echoed by the server
    pub async fn create(&self, resource_type: ResourceType, resource: &Value) -> FhirResult<Value> {
        self.request(Method::POST, resource_type.as_str(), None, Some(resource), &[]).await
    }

    /// `PUT <Type>/<id>`
    pub async fn update(
        &self,
        resource_type: ResourceType,
        id: &str,
        resource: &Value,
    ) -> FhirResult<Value> {
        self.request(Method::PUT, &instance_path(&resource_type, id)?, None, Some(resource), &[]).await
    }

    /// `DELETE <Type>/<id>`; any response body is ignored
    pub async fn delete(&self, resource_type: ResourceType, id: &str) -> FhirResult<()> {
        self.request::<Value>(Method::DELETE, &instance_path(&resource_type, id)?, None, None, &[])
            .await
            .map(|_| ())
    }

    /// Search a clinical type within one encounter
    pub async fn search_by_encounter(
        &self,
        resource_type: ResourceType,
        encounter_id: &str,
        params: &SearchParams,
    ) -> FhirResult<Bundle> {
        let params = encounter_params(encounter_id, params);
        self.search(resource_type, &params).await
    }

    /// Submit a batch or transaction Bundle to the server root
    pub async fn batch(&self, bundle: &Bundle) -> FhirResult<Bundle> {
        let body = serde_json::to_value(bundle)?;
        self.request(Method::POST, "", None, Some(&body), &[]).await
    }

    /// The server's CapabilityStatement
    pub async fn capabilities(&self) -> FhirResult<Value> {
        self.request(Method::GET, CAPABILITY_STATEMENT_PATH, None, None, &[]).await
    }

    /// Whether `GET metadata` succeeds
    pub async fn check_connection(&self) -> bool {
        match self.capabilities().await {
            Ok(_) => true,
            Err(err) => {
                debug!(error = %err, "FHIR connection check failed");
                false
            }
        }
    }
}

/// Check `id` against the FHIR id grammar: 1 to 64 of `[A-Za-z0-9-.]`
pub fn validate_resource_id(id: &str) -> FhirResult<()> {
    let valid = (1..=MAX_RESOURCE_ID_LEN).contains(&id.len())
        && id.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'.');
    if valid {
        Ok(())
    } else {
        Err(FhirError::InvalidId(id.to_string()))
    }
}

/// `<Type>/<id>` for a validated id
fn instance_path(resource_type: &ResourceType, id: &str) -> FhirResult<String> {
    validate_resource_id(id)?;
    Ok(format!("{resource_type}/{id}"))
}

/// `params` plus `encounter=Encounter/<id>`
pub(crate) fn encounter_params(encounter_id: &str, params: &SearchParams) -> SearchParams {
    params.clone().with("encounter", format!("Encounter/{encounter_id}"))
}

/// Generates typed wrappers over the generic interactions
macro_rules! resource_methods {
    ($(
        $variant:ident => {
            search: $search:ident,
            read: $read:ident,
            create: $create:ident,
            update: $update:ident,
            delete: $delete:ident $(,)?
        }
    ),* $(,)?) => {
        impl FhirClient {
            $(
                #[doc = concat!("Search `", stringify!($variant), "` resources")]
                pub async fn $search(&self, params: &SearchParams) -> FhirResult<Bundle> {
                    self.search(ResourceType::$variant, params).await
                }

                #[doc = concat!("Read one `", stringify!($variant), "`")]
                pub async fn $read(&self, id: &str) -> FhirResult<Value> {
                    self.read(ResourceType::$variant, id).await
                }

                #[doc = concat!("Create a `", stringify!($variant), "`")]
                pub async fn $create(&self, resource: &Value) -> FhirResult<Value> {
                    self.create(ResourceType::$variant, resource).await
                }

                #[doc = concat!("Update a `", stringify!($variant), "`")]
                pub async fn $update(&self, id: &str, resource: &Value) -> FhirResult<Value> {
                    self.update(ResourceType::$variant, id, resource).await
                }

                #[doc = concat!("Delete a `", stringify!($variant), "`")]
                pub async fn $delete(&self, id: &str) -> FhirResult<()> {
                    self.delete(ResourceType::$variant, id).await
                }
            )*
        }
    };
}

/// Invokes `$callback!` with the typed method table shared by both clients
macro_rules! resource_methods_list {
    ($callback:ident) => {
        $callback! {
            Patient => {
                search: search_patients, read: get_patient, create: create_patient,
                update: update_patient, delete: delete_patient,
            },
            Encounter => {
                search: search_encounters, read: get_encounter, create: create_encounter,
                update: update_encounter, delete: delete_encounter,
            },
            Observation => {
                search: search_observations, read: get_observation, create: create_observation,
                update: update_observation, delete: delete_observation,
            },
            Condition => {
                search: search_conditions, read: get_condition, create: create_condition,
                update: update_condition, delete: delete_condition,
            },
            MedicationRequest => {
                search: search_medication_requests, read: get_medication_request,
                create: create_medication_request, update: update_medication_request,
                delete: delete_medication_request,
            },
            DiagnosticReport => {
                search: search_diagnostic_reports, read: get_diagnostic_report,
                create: create_diagnostic_report, update: update_diagnostic_report,
                delete: delete_diagnostic_report,
            },
            Procedure => {
                search: search_procedures, read: get_procedure, create: create_procedure,
                update: update_procedure, delete: delete_procedure,
            },
            Organization => {
                search: search_organizations, read: get_organization,
                create: create_organization, update: update_organization,
                delete: delete_organization,
            },
        }
    };
}

pub(crate) use resource_methods_list;

resource_methods_list!(resource_methods);

/// Builder for [`FhirClient`]
#[derive(Debug, Default)]
pub struct FhirClientBuilder {
    config: FhirClientConfig,
}

impl FhirClientBuilder {
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.config.base_url = base_url.into();
        self
    }

    pub fn organization_id(mut self, organization_id: impl Into<String>) -> Self {
        self.config.organization_id = Some(organization_id.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.headers.insert(name.into(), value.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn build(self) -> FhirResult<FhirClient> {
        FhirClient::new(self.config)
    }
}
