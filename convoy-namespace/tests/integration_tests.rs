use std::sync::Arc;

use convoy_core::*;
use convoy_namespace::*;

fn group(name: &str) -> Group {
    Group::new(GroupName::new(name).unwrap())
}

#[tokio::test]
async fn test_namespace_lifecycle() {
    let backend = MockNamespaceBackend::new();
    let manager = NamespaceManager::new(Arc::new(backend.clone()));

    let handle = manager.provision(&group("shop")).await.unwrap();
    for name in ["web", "db"] {
        manager
            .attach(&handle, &ContainerRef::new(format!("shop.{name}")))
            .await
            .unwrap();
    }
    assert_eq!(manager.attached_count(handle.group()).await, Some(2));

    for name in ["web", "db"] {
        manager
            .detach(&handle, &ContainerRef::new(format!("shop.{name}")))
            .await;
    }
    manager.release(&handle).await.unwrap();

    assert_eq!(backend.created_count().await, 1);
    assert_eq!(backend.destroyed_count().await, 1);
}

#[tokio::test]
async fn test_group_name_reusable_after_release() {
    let backend = MockNamespaceBackend::new();
    let manager = NamespaceManager::new(Arc::new(backend.clone()));

    let first = manager.provision(&group("shop")).await.unwrap();
    manager.release(&first).await.unwrap();

    let second = manager.provision(&group("shop")).await.unwrap();
    assert_eq!(first, second);
    assert!(backend.is_live(second.network()).await);
}

#[tokio::test]
async fn test_destroy_failure_is_reported_once() {
    let backend = MockNamespaceBackend::new();
    let manager = NamespaceManager::new(Arc::new(backend.clone()));

    let handle = manager.provision(&group("shop")).await.unwrap();
    backend.fail_destroy(true).await;

    let err = manager.release(&handle).await.unwrap_err();
    assert!(matches!(err, ResourceError::Namespace { .. }));

    let err = manager.release(&handle).await.unwrap_err();
    assert!(matches!(err, ResourceError::UnknownNamespace { .. }));
}

#[tokio::test]
async fn test_concurrent_provision_of_same_group() {
    let manager = Arc::new(NamespaceManager::new(Arc::new(MockNamespaceBackend::new())));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let manager = manager.clone();
        handles.push(tokio::spawn(async move {
            manager.provision(&group("shop")).await.is_ok()
        }));
    }

    let mut ok = 0;
    for handle in handles {
        if handle.await.unwrap() {
            ok += 1;
        }
    }
    assert_eq!(ok, 1);
}
