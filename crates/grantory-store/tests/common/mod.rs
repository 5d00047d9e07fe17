//! Shared helpers for grantory-store integration tests.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use grantory_store::*;

/// Route store logs to the test writer when `RUST_LOG` is set.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

pub fn labels(pairs: &[(&str, &str)]) -> Labels {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub fn open_store(data_dir: &Path, namespace: &str) -> Arc<NamespaceStore> {
    Registry::new(data_dir).get_or_create(namespace).unwrap()
}

/// Check `has_grant`/`grant_id` of every request against the grants.
pub async fn assert_grant_links(store: &NamespaceStore) {
    let cancel = CancellationToken::new();
    let requests = store.list_requests(&cancel, &Labels::new()).await.unwrap();
    let grants = store.list_grants(&cancel).await.unwrap();
    for request in &requests {
        let owned: Vec<&Grant> = grants.iter().filter(|g| g.request_id == request.id).collect();
        assert!(owned.len() <= 1, "request {} has {} grants", request.id, owned.len());
        match owned.first() {
            Some(grant) => {
                assert!(request.has_grant, "request {} should be granted", request.id);
                assert_eq!(request.grant_id.as_deref(), Some(grant.id.as_str()));
            }
            None => {
                assert!(!request.has_grant, "request {} should not be granted", request.id);
                assert_eq!(request.grant_id, None);
            }
        }
    }
}
