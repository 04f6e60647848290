//! Socket client against the server adapter wrapping the in-memory manager.

use std::sync::Arc;

use keel_repo::{
    bind, serve, MemoryRepositoryManager, RepoError, RepoOp, RepoRequest, RepositoryManager,
    SocketRepositoryManager,
};
use tempfile::TempDir;
use tokio::sync::broadcast;

struct Harness {
    _dir: TempDir,
    backend: Arc<MemoryRepositoryManager>,
    client: SocketRepositoryManager,
    shutdown: broadcast::Sender<()>,
    server: tokio::task::JoinHandle<Result<(), RepoError>>,
}

async fn start() -> Harness {
    let dir = TempDir::new().expect("tempdir");
    let socket = dir.path().join("repo-manager.sock");
    let backend = Arc::new(MemoryRepositoryManager::new());
    let listener = bind(&socket).expect("bind");
    let (shutdown, shutdown_rx) = broadcast::channel(1);
    let server = tokio::spawn(serve(listener, backend.clone(), shutdown_rx));

    Harness {
        _dir: dir,
        backend,
        client: SocketRepositoryManager::new(socket),
        shutdown,
        server,
    }
}

impl Harness {
    async fn stop(self) {
        let _ = self.shutdown.send(());
        self.server.await.expect("join").expect("serve");
    }
}

#[tokio::test]
async fn create_list_delete_over_the_socket() {
    let h = start().await;

    h.client.create("P1").await.expect("create");
    h.client.create("P2").await.expect("create");
    assert!(h.backend.contains("P1"));

    let mut listed = h.client.list().await.expect("list");
    listed.sort();
    assert_eq!(listed, vec!["P1".to_string(), "P2".to_string()]);

    h.client.delete("P1").await.expect("delete");
    h.client.delete("P1").await.expect("repeat delete is a no-op");
    assert_eq!(h.backend.paths(), vec!["P2".to_string()]);

    h.stop().await;
}

#[tokio::test]
async fn remote_refusal_surfaces_as_rejected() {
    let h = start().await;
    h.backend.fail_creates(true);

    let err = h.client.create("P1").await.unwrap_err();
    match &err {
        RepoError::Rejected { op, path, message } => {
            assert_eq!(*op, "create");
            assert_eq!(path, "P1");
            assert!(message.contains("injected create failure"), "got: {message}");
        }
        other => panic!("expected Rejected, got: {other}"),
    }
    assert!(!err.is_ambiguous());

    h.stop().await;
}

#[tokio::test]
async fn request_without_path_is_refused_before_the_backend() {
    let h = start().await;

    let response = h
        .client
        .send(&RepoRequest {
            op: RepoOp::Create,
            repository_path: None,
        })
        .await
        .expect("send");
    assert!(!response.ok);
    assert!(response
        .error
        .as_deref()
        .unwrap_or_default()
        .contains("requires repository_path"));
    assert_eq!(h.backend.create_calls(), 0);

    h.stop().await;
}

#[tokio::test]
async fn stale_socket_file_is_replaced_on_bind() {
    let dir = TempDir::new().expect("tempdir");
    let socket = dir.path().join("repo-manager.sock");
    std::fs::write(&socket, b"").expect("stale file");

    let listener = bind(&socket).expect("bind over stale file");
    drop(listener);
}
