//! End-to-end walk through a host, its register and request, and a grant.

mod common;

use grantory_store::*;
use serde_json::json;

use common::{assert_grant_links, init_tracing, labels, open_store};

#[tokio::test]
async fn register_request_grant_lifecycle() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path(), "default");
    let cancel = CancellationToken::new();

    let h1 = store.create_host(&cancel, labels(&[("env", "prod")])).await.unwrap();
    let register = store
        .create_register(&cancel, &h1.id, Some(json!({"cpu": 4})), labels(&[("tier", "gold")]))
        .await
        .unwrap();
    assert_eq!(register.host_id, h1.id);

    let request = store
        .create_request(&cancel, &h1.id, Some(json!({"need": "cpu"})), Labels::new())
        .await
        .unwrap();

    let listed = store.list_requests(&cancel, &Labels::new()).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert!(!listed[0].has_grant);

    let delivery = br#"{"cpu":4}"#.to_vec();
    let grant = store
        .create_grant(&cancel, &request.id, Some(delivery.clone()))
        .await
        .unwrap();
    assert_eq!(grant.request_id, request.id);
    assert_eq!(grant.payload, Some(delivery));
    let granted = store.get_request(&cancel, &request.id).await.unwrap();
    assert!(granted.has_grant);
    assert_eq!(granted.grant_id.as_deref(), Some(grant.id.as_str()));
    assert_grant_links(&store).await;

    let err = store
        .create_grant(&cancel, &request.id, Some(br#"{"cpu":8}"#.to_vec()))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    store.delete_grant(&cancel, &grant.id).await.unwrap();
    let restored = store.get_request(&cancel, &request.id).await.unwrap();
    assert!(!restored.has_grant);
    assert_eq!(restored.grant_id, None);
    assert_grant_links(&store).await;
}

#[tokio::test]
async fn label_filters_across_kinds() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path(), "filters");
    let cancel = CancellationToken::new();

    let prod = store.create_host(&cancel, labels(&[("env", "prod")])).await.unwrap();
    let dev = store.create_host(&cancel, labels(&[("env", "dev")])).await.unwrap();
    store.create_host(&cancel, Labels::new()).await.unwrap();

    let hosts = store.list_hosts(&cancel, &labels(&[("env", "prod")])).await.unwrap();
    assert_eq!(hosts, vec![prod.clone()]);
    assert_eq!(store.list_hosts(&cancel, &Labels::new()).await.unwrap().len(), 3);

    let gold_prod = store
        .create_register(&cancel, &prod.id, None, labels(&[("tier", "gold"), ("env", "prod")]))
        .await
        .unwrap();
    store
        .create_register(&cancel, &dev.id, None, labels(&[("tier", "gold"), ("env", "dev")]))
        .await
        .unwrap();

    let gold = store.list_registers(&cancel, &labels(&[("tier", "gold")])).await.unwrap();
    assert_eq!(gold.len(), 2);
    let gold_and_prod = store
        .list_registers(&cancel, &labels(&[("tier", "gold"), ("env", "prod")]))
        .await
        .unwrap();
    assert_eq!(gold_and_prod, vec![gold_prod]);
    let zone = store.list_registers(&cancel, &labels(&[("zone", "a")])).await.unwrap();
    assert!(zone.is_empty());
}

#[tokio::test]
async fn parsed_payloads_flow_through() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path(), "payloads");
    let cancel = CancellationToken::new();
    let host = store.create_host(&cancel, Labels::new()).await.unwrap();

    let payload = parse_document(r#"{"need": "gpu", "count": 2}"#).unwrap();
    let request = store
        .create_request(&cancel, &host.id, payload.clone(), Labels::new())
        .await
        .unwrap();
    assert_eq!(store.get_request(&cancel, &request.id).await.unwrap().payload, payload);

    let err = parse_document("{not json").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
}
