#![allow(dead_code)]

use std::net::TcpListener;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clinview_common::resilience::{CircuitBreakerConfig, RetryConfig};
use clinview_infra::fhir::{ClientHooks, EnhancedClientOptions, EnhancedFhirClient, FhirClientConfig};
use clinview_infra::offline::OfflineStore;

/// URL of a local port nothing listens on
pub fn dead_base_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);
    format!("http://{addr}/fhir")
}

/// Retry settings fast enough for tests
pub fn fast_retry(max_attempts: u32) -> RetryConfig {
    RetryConfig::builder()
        .max_attempts(max_attempts)
        .base_delay(Duration::from_millis(10))
        .max_delay(Duration::from_millis(50))
        .build()
        .expect("valid retry config")
}

pub fn options(base_url: &str) -> EnhancedClientOptions {
    EnhancedClientOptions {
        client: FhirClientConfig {
            base_url: base_url.to_string(),
            timeout: Duration::from_secs(2),
            ..FhirClientConfig::default()
        },
        retry: fast_retry(3),
        circuit_breaker: CircuitBreakerConfig::default(),
        ..EnhancedClientOptions::default()
    }
}

pub fn client(options: EnhancedClientOptions, store: &OfflineStore) -> EnhancedFhirClient {
    EnhancedFhirClient::new(options, store.clone()).expect("enhanced client")
}

/// Hook counters shared with the client under test
#[derive(Clone, Default)]
pub struct HookCounts {
    pub errors: Arc<AtomicU32>,
    pub retries: Arc<AtomicU32>,
    pub offline: Arc<AtomicU32>,
}

impl HookCounts {
    pub fn hooks(&self) -> ClientHooks {
        let errors = Arc::clone(&self.errors);
        let retries = Arc::clone(&self.retries);
        let offline = Arc::clone(&self.offline);
        ClientHooks::default()
            .on_error(move |_| {
                errors.fetch_add(1, Ordering::SeqCst);
            })
            .on_retry(move |_, _| {
                retries.fetch_add(1, Ordering::SeqCst);
            })
            .on_offline(move || {
                offline.fetch_add(1, Ordering::SeqCst);
            })
    }

    pub fn errors(&self) -> u32 {
        self.errors.load(Ordering::SeqCst)
    }

    pub fn retries(&self) -> u32 {
        self.retries.load(Ordering::SeqCst)
    }

    pub fn offline(&self) -> u32 {
        self.offline.load(Ordering::SeqCst)
    }
}
