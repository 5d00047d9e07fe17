//! Restart durability: state written by one registry reads back identically
//! from a fresh registry over the same data directory.

mod common;

use grantory_store::*;
use serde_json::json;

use common::{assert_grant_links, init_tracing, labels, open_store};

#[tokio::test]
async fn all_entities_survive_restart() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let cancel = CancellationToken::new();

    let (host, register, request, grant) = {
        let store = open_store(dir.path(), "prod");
        let host = store.create_host(&cancel, labels(&[("env", "prod")])).await.unwrap();
        let register = store
            .create_register(
                &cancel,
                &host.id,
                Some(json!({"cpu": 4})),
                labels(&[("tier", "gold")]),
            )
            .await
            .unwrap();
        let request = store
            .create_request(&cancel, &host.id, Some(json!({"need": "cpu"})), Labels::new())
            .await
            .unwrap();
        let grant = store
            .create_grant(&cancel, &request.id, Some(b"token=s3cr3t".to_vec()))
            .await
            .unwrap();
        let request = store.get_request(&cancel, &request.id).await.unwrap();
        (host, register, request, grant)
    };

    let store = open_store(dir.path(), "prod");
    assert_eq!(store.get_host(&cancel, &host.id).await.unwrap(), host);
    assert_eq!(store.get_register(&cancel, &register.id).await.unwrap(), register);
    assert_eq!(store.get_grant(&cancel, &grant.id).await.unwrap(), grant);

    let reloaded = store.get_request(&cancel, &request.id).await.unwrap();
    assert_eq!(reloaded, request);
    assert!(reloaded.has_grant);
    assert_eq!(reloaded.grant_id.as_deref(), Some(grant.id.as_str()));
    assert_grant_links(&store).await;
}

#[tokio::test]
async fn deletes_and_updates_survive_restart() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let cancel = CancellationToken::new();

    let (kept, request_id) = {
        let store = open_store(dir.path(), "ns");
        let gone = store.create_host(&cancel, Labels::new()).await.unwrap();
        let kept = store.create_host(&cancel, Labels::new()).await.unwrap();
        store.delete_host(&cancel, &gone.id).await.unwrap();
        let kept = store
            .update_host_labels(&cancel, &kept.id, labels(&[("zone", "b")]))
            .await
            .unwrap();

        let request = store
            .create_request(&cancel, &kept.id, None, Labels::new())
            .await
            .unwrap();
        let grant = store.create_grant(&cancel, &request.id, None).await.unwrap();
        store.delete_grant(&cancel, &grant.id).await.unwrap();
        (kept, request.id)
    };

    let store = open_store(dir.path(), "ns");
    assert_eq!(store.list_hosts(&cancel, &Labels::new()).await.unwrap(), vec![kept]);
    let request = store.get_request(&cancel, &request_id).await.unwrap();
    assert!(!request.has_grant);
    assert_eq!(request.grant_id, None);
    assert!(store.list_grants(&cancel).await.unwrap().is_empty());
}

#[tokio::test]
async fn payload_absence_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let cancel = CancellationToken::new();

    let (absent, empty, null) = {
        let store = open_store(dir.path(), "ns");
        let host = store.create_host(&cancel, Labels::new()).await.unwrap();
        let absent = store.create_register(&cancel, &host.id, None, Labels::new()).await.unwrap();
        let empty = store
            .create_register(&cancel, &host.id, Some(json!({})), Labels::new())
            .await
            .unwrap();
        let null = store
            .create_register(&cancel, &host.id, Some(serde_json::Value::Null), Labels::new())
            .await
            .unwrap();
        (absent.id, empty.id, null.id)
    };

    let store = open_store(dir.path(), "ns");
    assert_eq!(store.get_register(&cancel, &absent).await.unwrap().payload, None);
    assert_eq!(store.get_register(&cancel, &empty).await.unwrap().payload, Some(json!({})));
    assert_eq!(
        store.get_register(&cancel, &null).await.unwrap().payload,
        Some(serde_json::Value::Null)
    );
}

#[tokio::test]
async fn grant_bytes_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let cancel = CancellationToken::new();
    let credential = vec![0xde, 0xad, 0x00, 0xbe, 0xef, 0xff];
    let document = br#"{"z":1,"a":1.0}"#.to_vec();

    let (raw, empty, doc, absent) = {
        let store = open_store(dir.path(), "ns");
        let host = store.create_host(&cancel, Labels::new()).await.unwrap();
        let mut grants = Vec::new();
        for payload in [Some(credential.clone()), Some(Vec::new()), Some(document.clone()), None] {
            let request = store
                .create_request(&cancel, &host.id, None, Labels::new())
                .await
                .unwrap();
            let grant = store.create_grant(&cancel, &request.id, payload).await.unwrap();
            grants.push(grant.id);
        }
        let [raw, empty, doc, absent]: [String; 4] = grants.try_into().unwrap();
        (raw, empty, doc, absent)
    };

    let store = open_store(dir.path(), "ns");
    assert_eq!(store.get_grant(&cancel, &raw).await.unwrap().payload, Some(credential));
    assert_eq!(store.get_grant(&cancel, &empty).await.unwrap().payload, Some(Vec::new()));
    assert_eq!(store.get_grant(&cancel, &doc).await.unwrap().payload, Some(document));
    assert_eq!(store.get_grant(&cancel, &absent).await.unwrap().payload, None);
    assert_grant_links(&store).await;
}

#[tokio::test]
async fn order_and_ids_continue_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let cancel = CancellationToken::new();

    let first_ids = {
        let store = open_store(dir.path(), "ns");
        let mut ids = Vec::new();
        for _ in 0..3 {
            ids.push(store.create_host(&cancel, Labels::new()).await.unwrap().id);
        }
        // The most recent id is deleted; it must still never come back.
        store.delete_host(&cancel, &ids[2]).await.unwrap();
        ids
    };

    let store = open_store(dir.path(), "ns");
    let fresh = store.create_host(&cancel, Labels::new()).await.unwrap();
    assert!(!first_ids.contains(&fresh.id));

    let listed: Vec<String> = store
        .list_hosts(&cancel, &Labels::new())
        .await
        .unwrap()
        .into_iter()
        .map(|h| h.id)
        .collect();
    assert_eq!(listed, vec![first_ids[0].clone(), first_ids[1].clone(), fresh.id]);
}

#[test]
fn unreadable_namespace_fails_loudly() {
    let dir = tempfile::tempdir().unwrap();
    let ns_dir = dir.path().join("broken");
    std::fs::create_dir_all(&ns_dir).unwrap();
    std::fs::write(ns_dir.join(persist::STORE_FILE), vec![0x5a; 64 * 1024]).unwrap();

    let registry = Registry::new(dir.path());
    let err = registry.get_or_create("broken").err().unwrap();
    assert_eq!(err.kind(), ErrorKind::Corrupt);

    // Other namespaces are unaffected.
    assert!(registry.get_or_create("healthy").is_ok());
}
