//! Repository registration against a mock vendor server.

mod common;

use std::time::Duration;

use gpu_driver::package::{Apt, Yum};
use gpu_driver::{ContentKind, DriverError, Registrar, RepositoryDescriptor};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::FakeHost;

fn registrar() -> Registrar {
    Registrar::new(Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn test_register_writes_repo_file() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rhel8/x86_64/cuda-rhel8.repo"))
        .respond_with(ResponseTemplate::new(200).set_body_string("[cuda-rhel8-x86_64]\n"))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let descriptor = RepositoryDescriptor {
        source_url: format!("{}/rhel8/x86_64/cuda-rhel8.repo", server.uri()),
        local_path: dir.path().join("yum.repos.d").join("cuda-rhel8.repo"),
        content_kind: ContentKind::TextRepoFile,
    };
    let host = FakeHost::new("4.18.0-513.el8.x86_64");
    let yum = Yum::new(host.clone());

    registrar().register(&descriptor, &yum).await.unwrap();

    assert_eq!(
        std::fs::read_to_string(&descriptor.local_path).unwrap(),
        "[cuda-rhel8-x86_64]\n"
    );
    assert!(host.calls().is_empty());
}

#[tokio::test]
async fn test_register_overwrites_existing_repo_file() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("new\n"))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let local_path = dir.path().join("cuda-rhel9.repo");
    std::fs::write(&local_path, "old\n").unwrap();
    let descriptor = RepositoryDescriptor {
        source_url: format!("{}/rhel9/x86_64/cuda-rhel9.repo", server.uri()),
        local_path,
        content_kind: ContentKind::TextRepoFile,
    };
    let yum = Yum::new(FakeHost::new("5.14.0"));

    registrar().register(&descriptor, &yum).await.unwrap();
    assert_eq!(std::fs::read_to_string(&descriptor.local_path).unwrap(), "new\n");
}

#[tokio::test]
async fn test_register_installs_keyring_through_package_manager() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ubuntu2004/x86_64/cuda-keyring_1.1-1_all.deb"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"keyring".to_vec()))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let descriptor = RepositoryDescriptor {
        source_url: format!("{}/ubuntu2004/x86_64/cuda-keyring_1.1-1_all.deb", server.uri()),
        local_path: dir.path().join("cuda-ubuntu2004-x86_64.list"),
        content_kind: ContentKind::BinaryKeyringPackage,
    };
    let host = FakeHost::new("5.4.0-150-generic");
    let apt = Apt::new(host.clone());

    registrar().register(&descriptor, &apt).await.unwrap();

    let calls = host.calls();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].line.starts_with("dpkg -i "));
    let keyring = &calls[0].existing_files[0];
    assert_eq!(keyring.file_name().unwrap(), "cuda-keyring_1.1-1_all.deb");
    assert!(!keyring.exists());
    // The package manager writes the source list, not the registrar.
    assert!(!descriptor.local_path.exists());
}

#[tokio::test]
async fn test_fetch_non_success_is_network_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let descriptor = RepositoryDescriptor {
        source_url: format!("{}/rhel7/x86_64/cuda-rhel7.repo", server.uri()),
        local_path: dir.path().join("cuda-rhel7.repo"),
        content_kind: ContentKind::TextRepoFile,
    };

    let err = registrar().fetch(&descriptor).await.unwrap_err();
    assert!(matches!(err, DriverError::Network(_)));
    assert!(err.to_string().contains("500"));
    assert!(!descriptor.local_path.exists());
}

#[tokio::test]
async fn test_fetch_unreachable_host_is_network_error() {
    let descriptor = RepositoryDescriptor {
        source_url: "http://127.0.0.1:9/cuda-rhel7.repo".to_string(),
        local_path: "/nonexistent/cuda-rhel7.repo".into(),
        content_kind: ContentKind::TextRepoFile,
    };

    let err = registrar().fetch(&descriptor).await.unwrap_err();
    assert!(matches!(err, DriverError::Network(_)));
}

#[tokio::test]
async fn test_persist_unwritable_path_is_write_error() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, "").unwrap();
    let descriptor = RepositoryDescriptor {
        source_url: "http://unused/cuda-rhel7.repo".to_string(),
        local_path: blocker.join("cuda-rhel7.repo"),
        content_kind: ContentKind::TextRepoFile,
    };
    let yum = Yum::new(FakeHost::new("3.10.0"));

    let err = registrar()
        .persist(&descriptor, b"[cuda]\n", &yum)
        .await
        .unwrap_err();
    assert!(matches!(err, DriverError::Write(_)));
}

#[tokio::test]
async fn test_unregister_keyring_purges_package_then_list() {
    let dir = tempfile::tempdir().unwrap();
    let descriptor = RepositoryDescriptor {
        source_url: "http://unused/ubuntu2204/x86_64/cuda-keyring_1.1-1_all.deb".to_string(),
        local_path: dir.path().join("cuda-ubuntu2204-x86_64.list"),
        content_kind: ContentKind::BinaryKeyringPackage,
    };
    std::fs::write(&descriptor.local_path, "deb [signed-by=...] https://example/ /\n").unwrap();
    let host = FakeHost::new("5.15.0-60-generic");
    let apt = Apt::new(host.clone());

    assert!(registrar().unregister(&descriptor, &apt).await.unwrap());
    assert_eq!(host.lines(), vec!["apt-get purge -y cuda-keyring".to_string()]);
    assert!(!descriptor.local_path.exists());

    // A keyring left installed without its list is still purged.
    host.clear();
    assert!(!registrar().unregister(&descriptor, &apt).await.unwrap());
    assert_eq!(host.lines(), vec!["apt-get purge -y cuda-keyring".to_string()]);
}

#[tokio::test]
async fn test_unregister_repo_file_runs_no_commands() {
    let dir = tempfile::tempdir().unwrap();
    let descriptor = RepositoryDescriptor {
        source_url: "http://unused/rhel7/x86_64/cuda-rhel7.repo".to_string(),
        local_path: dir.path().join("cuda-rhel7.repo"),
        content_kind: ContentKind::TextRepoFile,
    };
    std::fs::write(&descriptor.local_path, "[cuda]\n").unwrap();
    let host = FakeHost::new("3.10.0-1160.el7.x86_64");
    let yum = Yum::new(host.clone());

    assert!(registrar().unregister(&descriptor, &yum).await.unwrap());
    assert!(host.calls().is_empty());
}
