//! Gateway walkthrough with an in-process backend.
//!
//! The backend below enforces a quota of 5 `hits` per user key, counted only
//! from reported usage. Requests are served from the authorization cache
//! until a flush delivers the usage; the next request for that key is then
//! verified with the backend again, which is how the quota is noticed.
//!
//! Run with `RUST_LOG=authrep_cache=debug` to see cache and flush activity.

use async_trait::async_trait;
use authrep_cache::{
    ApiRequest, ApiResponse, AuthRepConfig, AuthRepPolicy, AuthorizeRequest, BackendVerdict,
    BatchPayload, RemoteBackend, TransportError,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const QUOTA: i64 = 5;

#[derive(Debug, Default)]
struct QuotaBackend {
    used: Mutex<HashMap<String, i64>>,
}

#[async_trait]
impl RemoteBackend for QuotaBackend {
    async fn authorize(&self, request: &AuthorizeRequest) -> Result<BackendVerdict, TransportError> {
        let key = request.identity.credential().unwrap_or_default();
        let used = self.used.lock().get(key).copied().unwrap_or(0);
        let wanted = request.usage.get("hits").unwrap_or(0);
        if used + wanted > QUOTA {
            Ok(BackendVerdict::denied("usage limits are exceeded"))
        } else {
            Ok(BackendVerdict::authorized())
        }
    }

    async fn report(&self, payload: &BatchPayload) -> Result<(), TransportError> {
        let transactions = payload.len() as i64;
        *self
            .used
            .lock()
            .entry(payload.bucket().credential().to_string())
            .or_default() += transactions;
        println!(
            "  backend: received {} transaction(s) for {}",
            payload.len(),
            payload.bucket()
        );
        Ok(())
    }
}

const CONFIG: &str = r#"
service_id: "2555417735060"
service_token: demo-token
report_endpoint: https://backend.example/transactions.xml
proxy_rules:
  - http_method: GET
    pattern: /widgets
    metric_system_name: hits
batch:
  full_threshold: 3
flush_interval_ms: 60000
forced_sync_window_ms: 60000
"#;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("=== AuthRep Gateway Demo ===\n");
    println!("Quota: {} hits per user key, flush every 3 queued requests\n", QUOTA);

    let config = AuthRepConfig::from_yaml(CONFIG)?;
    let policy = AuthRepPolicy::builder(config, Arc::new(QuotaBackend::default())).build()?;
    policy.start_flusher();

    for i in 1..=10 {
        let request = ApiRequest::new("widgets", "GET", "/widgets").with_header("user_key", "abc123");
        match policy.authrep().authorize(&request).await {
            Ok(authorized) => {
                println!("request {:>2}: allowed ({:?})", i, authorized.source());
                policy.authrep().report(authorized, &ApiResponse::with_status(200));
            }
            Err(error) => println!("request {:>2}: rejected ({})", i, error),
        }
        // Give the flusher a chance to run after a full-bucket wakeup
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }

    policy.shutdown().await?;

    let snapshot = policy.metrics().snapshot();
    println!("\n=== Metrics ===");
    println!("cache hit rate:   {:.0}%", snapshot.cache_hit_rate() * 100.0);
    println!("forced syncs:     {}", snapshot.forced_syncs);
    println!("denials:          {}", snapshot.denials);
    println!("payloads sent:    {}", snapshot.payloads_delivered);

    Ok(())
}
