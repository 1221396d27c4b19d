//! Enhanced FHIR client
//!
//! Decorates [`FhirClient`] with, from the inside out:
//!
//! 1. a circuit breaker around each attempt,
//! 2. retry with exponential backoff around the breaker,
//! 3. response caching in the [`OfflineStore`] for reads,
//! 4. cached fallback when the server is unavailable.
//!
//! A rejected call (`FhirError::CircuitOpen`) is never retried, but it counts
//! as unavailable: a cached read is served in its place. Successful mutations drop every cached read of the
//! resource type they touched. Mutations that fail are not queued
//! automatically; callers queue them with
//! [`EnhancedFhirClient::queue_offline_operation`] and replay them with
//! [`EnhancedFhirClient::process_offline_queue`].

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use clinview_common::resilience::{
    with_retry, CircuitBreaker, CircuitBreakerConfig, CircuitState, RetryConfig, RetryHook,
    RetryPolicy,
};
use clinview_domain::{resource_id, resource_type_of, Bundle, Config, ResourceType, SearchParams};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use super::client::{
    encounter_params, resource_methods_list, validate_resource_id, FhirClient, FhirClientConfig,
};
use super::errors::{fhir_retry_condition, FhirError, FhirResult};
use super::request::RequestDescriptor;
use crate::config::{breaker_config_from, retry_config_from};
use crate::offline::store::{
    CacheEntry, OfflineOperation, OfflineStore, QueueReport, QueuedOperation, CREATE_OPERATION,
    DELETE_OPERATION, UPDATE_OPERATION,
};

/// Observer of every failed call, before any cached fallback
pub type ErrorHook = Arc<dyn Fn(&FhirError) + Send + Sync>;

/// Observer of network failures while offline support is enabled
pub type OfflineHook = Arc<dyn Fn() + Send + Sync>;

/// Optional lifecycle callbacks
#[derive(Clone, Default)]
pub struct ClientHooks {
    pub on_error: Option<ErrorHook>,
    pub on_retry: Option<RetryHook<FhirError>>,
    pub on_offline: Option<OfflineHook>,
}

impl ClientHooks {
    pub fn on_error<H>(mut self, hook: H) -> Self
    where
        H: Fn(&FhirError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(hook));
        self
    }

    pub fn on_retry<H>(mut self, hook: H) -> Self
    where
        H: Fn(u32, &FhirError) + Send + Sync + 'static,
    {
        self.on_retry = Some(Arc::new(hook));
        self
    }

    pub fn on_offline<H>(mut self, hook: H) -> Self
    where
        H: Fn() + Send + Sync + 'static,
    {
        self.on_offline = Some(Arc::new(hook));
        self
    }
}

impl fmt::Debug for ClientHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientHooks")
            .field("on_error", &self.on_error.is_some())
            .field("on_retry", &self.on_retry.is_some())
            .field("on_offline", &self.on_offline.is_some())
            .finish()
    }
}

/// Construction options
#[derive(Debug, Clone)]
pub struct EnhancedClientOptions {
    pub client: FhirClientConfig,
    pub enable_retry: bool,
    pub enable_circuit_breaker: bool,
    pub enable_offline_support: bool,
    pub retry: RetryConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub hooks: ClientHooks,
}

impl Default for EnhancedClientOptions {
    fn default() -> Self {
        Self {
            client: FhirClientConfig::default(),
            enable_retry: true,
            enable_circuit_breaker: true,
            enable_offline_support: true,
            retry: RetryConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            hooks: ClientHooks::default(),
        }
    }
}

impl EnhancedClientOptions {
    /// Options from a loaded configuration, without hooks
    pub fn from_config(config: &Config) -> Self {
        Self {
            client: FhirClientConfig::from(&config.fhir),
            enable_retry: config.resilience.enable_retry,
            enable_circuit_breaker: config.resilience.enable_circuit_breaker,
            enable_offline_support: config.offline.enabled,
            retry: retry_config_from(&config.resilience.retry),
            circuit_breaker: breaker_config_from(&config.resilience.circuit_breaker),
            hooks: ClientHooks::default(),
        }
    }

    pub fn with_hooks(mut self, hooks: ClientHooks) -> Self {
        self.hooks = hooks;
        self
    }
}

/// Breaker state as reported to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitBreakerStatus {
    Closed,
    Open,
    HalfOpen,
    /// The client was built without a breaker
    Disabled,
}

impl CircuitBreakerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitBreakerStatus::Closed => "closed",
            CircuitBreakerStatus::Open => "open",
            CircuitBreakerStatus::HalfOpen => "half-open",
            CircuitBreakerStatus::Disabled => "disabled",
        }
    }
}

impl From<CircuitState> for CircuitBreakerStatus {
    fn from(state: CircuitState) -> Self {
        match state {
            CircuitState::Closed => CircuitBreakerStatus::Closed,
            CircuitState::Open => CircuitBreakerStatus::Open,
            CircuitState::HalfOpen => CircuitBreakerStatus::HalfOpen,
        }
    }
}

impl fmt::Display for CircuitBreakerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// FHIR client with retry, circuit breaking, caching and offline replay
#[derive(Debug, Clone)]
pub struct EnhancedFhirClient {
    client: FhirClient,
    breaker: Option<CircuitBreaker>,
    retry: Option<RetryPolicy<FhirError>>,
    offline_enabled: bool,
    store: OfflineStore,
    hooks: ClientHooks,
}

impl EnhancedFhirClient {
    /// Build the client over `store`.
    ///
    /// # Errors
    ///
    /// `FhirError::Config` for an invalid base URL, header, retry or
    /// breaker configuration.
    pub fn new(options: EnhancedClientOptions, store: OfflineStore) -> FhirResult<Self> {
        let client = FhirClient::new(options.client)?;

        let breaker = if options.enable_circuit_breaker {
            Some(
                CircuitBreaker::new(options.circuit_breaker)
                    .map_err(|err| FhirError::Config(err.to_string()))?,
            )
        } else {
            None
        };

        let retry = if options.enable_retry {
            options.retry.validate().map_err(|err| FhirError::Config(err.to_string()))?;
            let mut policy = RetryPolicy::with_condition(options.retry, fhir_retry_condition);
            if let Some(hook) = &options.hooks.on_retry {
                policy = policy.on_retry_shared(Arc::clone(hook));
            }
            Some(policy)
        } else {
            None
        };

        Ok(Self {
            client,
            breaker,
            retry,
            offline_enabled: options.enable_offline_support,
            store,
            hooks: options.hooks,
        })
    }

    /// The undecorated client
    pub fn inner(&self) -> &FhirClient {
        &self.client
    }

    pub fn store(&self) -> &OfflineStore {
        &self.store
    }

    // ---- orchestration -----------------------------------------------------

    /// One breaker-guarded attempt
    async fn guarded<T, F, Fut>(&self, call: &F) -> FhirResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = FhirResult<T>>,
    {
        match &self.breaker {
            Some(breaker) => breaker.execute(call).await.map_err(FhirError::from),
            None => call().await,
        }
    }

    #[instrument(
        skip(self, call),
        fields(resource_type = %descriptor.resource_type, operation = %descriptor.operation)
    )]
    async fn execute<T, F, Fut>(&self, descriptor: RequestDescriptor, call: F) -> FhirResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: Fn() -> Fut,
        Fut: Future<Output = FhirResult<T>>,
    {
        let cache_key = if self.offline_enabled { descriptor.cache_key() } else { None };

        let result = match &self.retry {
            Some(policy) => with_retry(policy, || self.guarded(&call)).await,
            None => self.guarded(&call).await,
        };

        match result {
            Ok(value) => {
                if let Some(key) = &cache_key {
                    self.store.store_offline_data(key, &CacheEntry::new(&value));
                }
                for prefix in descriptor.invalidated_prefixes() {
                    self.store.invalidate_prefix(&prefix);
                }
                Ok(value)
            }
            Err(error) => self.recover(cache_key.as_deref(), error),
        }
    }

    fn recover<T: DeserializeOwned>(&self, cache_key: Option<&str>, error: FhirError) -> FhirResult<T> {
        warn!(error = %error, status = error.status(), "FHIR request failed");
        if let Some(hook) = &self.hooks.on_error {
            hook(&error);
        }

        if self.offline_enabled && error.is_unavailable() {
            if let Some(hook) = &self.hooks.on_offline {
                hook();
            }
            if let Some(entry) =
                cache_key.and_then(|key| self.store.get_offline_data::<CacheEntry<T>>(key))
            {
                info!(cached_at = %entry.timestamp, "Serving cached response while offline");
                return Ok(entry.data);
            }
        }

        Err(error)
    }

    fn cached<T: DeserializeOwned>(&self, descriptor: &RequestDescriptor) -> Option<CacheEntry<T>> {
        descriptor.cache_key().and_then(|key| self.store.get_offline_data(&key))
    }

    // ---- generic operations ------------------------------------------------

    pub async fn search(&self, resource_type: ResourceType, params: &SearchParams) -> FhirResult<Bundle> {
        let descriptor = RequestDescriptor::search(resource_type.clone(), params.clone());
        self.execute(descriptor, || self.client.search(resource_type.clone(), params)).await
    }

    /// Ids outside the FHIR id grammar fail with `InvalidId` before any
    /// hook or the breaker sees the call
    pub async fn read(&self, resource_type: ResourceType, id: &str) -> FhirResult<Value> {
        validate_resource_id(id)?;
        let descriptor = RequestDescriptor::read(resource_type.clone(), id);
        self.execute(descriptor, || self.client.read(resource_type.clone(), id)).await
    }

    pub async fn create(&self, resource_type: ResourceType, resource: &Value) -> FhirResult<Value> {
        let descriptor = RequestDescriptor::create(resource_type.clone());
        self.execute(descriptor, || self.client.create(resource_type.clone(), resource)).await
    }

    pub async fn update(
        &self,
        resource_type: ResourceType,
        id: &str,
        resource: &Value,
    ) -> FhirResult<Value> {
        validate_resource_id(id)?;
        let descriptor = RequestDescriptor::update(resource_type.clone(), id);
        self.execute(descriptor, || self.client.update(resource_type.clone(), id, resource)).await
    }

    pub async fn delete(&self, resource_type: ResourceType, id: &str) -> FhirResult<()> {
        validate_resource_id(id)?;
        let descriptor = RequestDescriptor::delete(resource_type.clone(), id);
        self.execute(descriptor, || self.client.delete(resource_type.clone(), id)).await
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

    /// Submit a batch or transaction; invalidates every type it writes
    pub async fn batch(&self, bundle: &Bundle) -> FhirResult<Bundle> {
        let descriptor = RequestDescriptor::batch(touched_types(bundle));
        self.execute(descriptor, || self.client.batch(bundle)).await
    }

    /// Last cached result of a search, with its age, without touching the
    /// network
    pub fn cached_search(
        &self,
        resource_type: ResourceType,
        params: &SearchParams,
    ) -> Option<CacheEntry<Bundle>> {
        self.cached(&RequestDescriptor::search(resource_type, params.clone()))
    }

    /// Last cached result of a read
    pub fn cached_read(&self, resource_type: ResourceType, id: &str) -> Option<CacheEntry<Value>> {
        self.cached(&RequestDescriptor::read(resource_type, id))
    }

    // ---- offline queue -----------------------------------------------------

    pub fn queue_offline_operation(&self, operation: OfflineOperation) -> Option<String> {
        self.store.queue_offline_operation(operation)
    }

    pub fn get_queue_size(&self) -> usize {
        self.store.get_queue_size()
    }

    pub fn pending_operations(&self) -> Vec<QueuedOperation> {
        self.store.pending_operations()
    }

    /// Replay queued mutations in order through this client
    pub async fn process_offline_queue(&self) -> QueueReport {
        self.store.process_offline_queue(|operation| async move { self.replay(&operation).await }).await
    }

    async fn replay(&self, operation: &QueuedOperation) -> FhirResult<()> {
        debug!(id = %operation.id, operation_type = %operation.operation_type, "Replaying queued operation");
        match operation.operation_type.as_str() {
            CREATE_OPERATION => {
                let resource_type = payload_type(&operation.data)?;
                self.create(resource_type, &operation.data).await.map(|_| ())
            }
            UPDATE_OPERATION => {
                let resource_type = payload_type(&operation.data)?;
                let id = payload_id(&operation.data)?;
                self.update(resource_type, id, &operation.data).await.map(|_| ())
            }
            DELETE_OPERATION => {
                let resource_type = payload_type(&operation.data)?;
                let id = payload_id(&operation.data)?;
                self.delete(resource_type, id).await
            }
            other => Err(FhirError::InvalidPayload(format!("Unknown queued operation type: {other}"))),
        }
    }

    // ---- introspection -----------------------------------------------------

    /// `GET metadata`, bypassing retry and the breaker
    pub async fn check_connection(&self) -> bool {
        self.client.check_connection().await
    }

    pub fn get_circuit_breaker_state(&self) -> CircuitBreakerStatus {
        self.breaker
            .as_ref()
            .map_or(CircuitBreakerStatus::Disabled, |breaker| breaker.get_state().into())
    }

    /// Force the breaker closed; no-op when disabled
    pub fn reset_circuit_breaker(&self) {
        if let Some(breaker) = &self.breaker {
            breaker.reset();
            info!("Circuit breaker reset");
        }
    }
}

fn payload_type(data: &Value) -> FhirResult<ResourceType> {
    resource_type_of(data)
        .ok_or_else(|| FhirError::InvalidPayload("Queued payload has no resourceType".to_string()))
}

fn payload_id(data: &Value) -> FhirResult<&str> {
    resource_id(data).ok_or_else(|| FhirError::InvalidPayload("Queued payload has no id".to_string()))
}

/// Resource types named by the request URLs of a batch
fn touched_types(bundle: &Bundle) -> Vec<ResourceType> {
    let mut touched: Vec<ResourceType> = Vec::new();
    for request in bundle.entry.iter().filter_map(|entry| entry.request.as_ref()) {
        let segment = request.url.trim_start_matches('/').split(['/', '?']).next().unwrap_or_default();
        if segment.is_empty() {
            continue;
        }
        let resource_type = ResourceType::from(segment);
        if !touched.contains(&resource_type) {
            touched.push(resource_type);
        }
    }
    touched
}

macro_rules! enhanced_resource_methods {
    ($(
        $variant:ident => {
            search: $search:ident,
            read: $read:ident,
            create: $create:ident,
            update: $update:ident,
            delete: $delete:ident $(,)?
        }
    ),* $(,)?) => {
        impl EnhancedFhirClient {
            $(
                pub async fn $search(&self, params: &SearchParams) -> FhirResult<Bundle> {
                    self.search(ResourceType::$variant, params).await
                }

                pub async fn $read(&self, id: &str) -> FhirResult<Value> {
                    self.read(ResourceType::$variant, id).await
                }

                pub async fn $create(&self, resource: &Value) -> FhirResult<Value> {
                    self.create(ResourceType::$variant, resource).await
                }

                pub async fn $update(&self, id: &str, resource: &Value) -> FhirResult<Value> {
                    self.update(ResourceType::$variant, id, resource).await
                }

                pub async fn $delete(&self, id: &str) -> FhirResult<()> {
                    self.delete(ResourceType::$variant, id).await
                }
            )*
        }
    };
}

resource_methods_list!(enhanced_resource_methods);

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_touched_types_from_batch_urls() {
        let bundle = Bundle::transaction()
            .with_request("POST", "Patient", Some(json!({"resourceType": "Patient"})))
            .with_request("PUT", "Observation/o1", Some(json!({"resourceType": "Observation"})))
            .with_request("DELETE", "/Patient/p2", None)
            .with_request("GET", "Condition?patient=p1", None);

        assert_eq!(
            touched_types(&bundle),
            vec![ResourceType::Patient, ResourceType::Observation, ResourceType::Condition]
        );
    }

    #[test]
    fn test_options_from_config() {
        let mut config = Config::for_base_url("https://fhir.example.org/r4");
        config.resilience.enable_circuit_breaker = false;
        config.resilience.retry.max_attempts = 7;
        config.resilience.circuit_breaker.failure_threshold = 2;

        let options = EnhancedClientOptions::from_config(&config);
        assert!(options.enable_retry);
        assert!(!options.enable_circuit_breaker);
        assert!(options.enable_offline_support);
        assert_eq!(options.retry.max_attempts, 7);
        assert_eq!(options.circuit_breaker.failure_threshold, 2);
        assert_eq!(options.client.base_url, "https://fhir.example.org/r4");
    }

    #[test]
    fn test_breaker_status_reporting() {
        let client =
            EnhancedFhirClient::new(EnhancedClientOptions::default(), OfflineStore::in_memory())
                .expect("client");
        assert_eq!(client.get_circuit_breaker_state(), CircuitBreakerStatus::Closed);

        let disabled = EnhancedFhirClient::new(
            EnhancedClientOptions { enable_circuit_breaker: false, ..Default::default() },
            OfflineStore::in_memory(),
        )
        .expect("client");
        assert_eq!(disabled.get_circuit_breaker_state(), CircuitBreakerStatus::Disabled);
        disabled.reset_circuit_breaker();
        assert_eq!(disabled.get_circuit_breaker_state().to_string(), "disabled");
    }

    #[test]
    fn test_invalid_retry_config_rejected() {
        let options = EnhancedClientOptions {
            retry: RetryConfig { max_attempts: 0, ..RetryConfig::default() },
            ..Default::default()
        };
        assert!(matches!(
            EnhancedFhirClient::new(options, OfflineStore::in_memory()),
            Err(FhirError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_queue_tag_stays_queued() {
        let client =
            EnhancedFhirClient::new(EnhancedClientOptions::default(), OfflineStore::in_memory())
                .expect("client");
        client.queue_offline_operation(OfflineOperation::new("archive", json!({})));
        client.queue_offline_operation(OfflineOperation::update(json!({"resourceType": "Patient"})));

        let report = client.process_offline_queue().await;

        assert_eq!(report.processed, 0);
        assert_eq!(report.failed, 2);
        assert_eq!(client.get_queue_size(), 2);
    }
}
