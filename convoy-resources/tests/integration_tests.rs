use std::sync::Arc;

use convoy_core::*;
use convoy_resources::*;

fn shop() -> Group {
    Group::new(GroupName::new("shop").unwrap())
        .with_volume(Volume::new("data"))
        .with_container(
            ContainerSpec::new("web", "nginx")
                .with_port(PortMapping::new("http", 80).with_host_port(8080))
                .with_mount(VolumeMount::new("data", "/usr/share/nginx/html").read_only()),
        )
        .with_container(
            ContainerSpec::new("writer", "busybox")
                .with_mount(VolumeMount::new("data", "/out")),
        )
}

#[tokio::test]
async fn test_group_resources_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let volumes = VolumeManager::new(dir.path());
    let ports = PortAllocator::new();
    let group = shop();

    PortAllocator::check(&group).unwrap();
    let bindings = ports.allocate(&group).await.unwrap();
    assert_eq!(bindings.len(), 1);
    assert_eq!(bindings[0].owner.to_string(), "shop/web/http");

    let set = volumes.provision(&group.name, &group.volumes).await.unwrap();

    let web = set.resolve_all(&group.containers[0]).unwrap();
    let writer = set.resolve_all(&group.containers[1]).unwrap();
    // both containers see the same host directory
    assert_eq!(web[0].host_path, writer[0].host_path);
    assert!(web[0].read_only);
    assert!(!writer[0].read_only);

    std::fs::write(writer[0].host_path.join("index.html"), b"hello").unwrap();
    assert_eq!(std::fs::read(web[0].host_path.join("index.html")).unwrap(), b"hello");

    assert_eq!(ports.release(&group.name).await, 1);
    volumes.release(set).await.unwrap();

    assert_eq!(ports.reserved_count().await, 0);
    assert!(!dir.path().join("shop").exists());
}

#[tokio::test]
async fn test_concurrent_groups_race_for_port() {
    let ports = Arc::new(PortAllocator::new());

    let mut handles = Vec::new();
    for name in ["one", "two", "three", "four"] {
        let ports = ports.clone();
        handles.push(tokio::spawn(async move {
            let group = Group::new(GroupName::new(name).unwrap()).with_container(
                ContainerSpec::new("app", "img").with_port(PortMapping::new("http", 9000)),
            );
            ports.allocate(&group).await.is_ok()
        }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap() {
            winners += 1;
        }
    }

    assert_eq!(winners, 1);
    assert_eq!(ports.reserved_count().await, 1);
}

#[tokio::test]
async fn test_volumes_are_isolated_per_group() {
    let dir = tempfile::tempdir().unwrap();
    let volumes = VolumeManager::new(dir.path());

    let a = volumes
        .provision(&GroupName::new("a").unwrap(), &[Volume::new("data")])
        .await
        .unwrap();
    let b = volumes
        .provision(&GroupName::new("b").unwrap(), &[Volume::new("data")])
        .await
        .unwrap();

    assert_ne!(a.path("data"), b.path("data"));

    volumes.release(a).await.unwrap();
    assert!(dir.path().join("b/data").is_dir());
    volumes.release(b).await.unwrap();
}
