//! Expose any [`RepositoryManager`] over the JSON-lines socket protocol.

use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::Path;
use std::sync::Arc;

use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;

use crate::error::{io_err, RepoError};
use crate::manager::RepositoryManager;
use crate::protocol::{RepoOp, RepoRequest, RepoResponse};

/// Bind `socket`, replacing a stale socket file left by a dead process.
pub fn bind(socket: &Path) -> Result<UnixListener, RepoError> {
    prepare_socket_for_bind(socket)?;
    if let Some(parent) = socket.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
    }
    let listener = UnixListener::bind(socket).map_err(|e| io_err(socket, e))?;
    set_socket_permissions(socket)?;
    Ok(listener)
}

/// Accept clients until `shutdown` fires, one task per connection.
pub async fn serve(
    listener: UnixListener,
    manager: Arc<dyn RepositoryManager>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), RepoError> {
    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err("repository manager accept", e))?;
                let manager = manager.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_client(stream, manager).await {
                        tracing::error!(error = %err, "repository manager client error");
                    }
                });
            }
        }
    }
    Ok(())
}

async fn handle_client(
    stream: UnixStream,
    manager: Arc<dyn RepositoryManager>,
) -> Result<(), RepoError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("repository manager socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<RepoRequest>(&line) {
            Ok(request) => dispatch(manager.as_ref(), request).await,
            Err(err) => RepoResponse::error(format!("invalid request JSON: {err}")),
        };
        write_response(&mut writer, &response).await?;
    }

    Ok(())
}

async fn dispatch(manager: &dyn RepositoryManager, request: RepoRequest) -> RepoResponse {
    let outcome = match (request.op, request.repository_path.as_deref()) {
        (RepoOp::List, _) => {
            return match manager.list().await {
                Ok(paths) => RepoResponse::ok(json!(paths)),
                Err(err) => RepoResponse::error(err.to_string()),
            };
        }
        (op, None) => {
            return RepoResponse::error(format!("{} requires repository_path", op.as_str()))
        }
        (RepoOp::Create, Some(path)) => manager.create(path).await,
        (RepoOp::Delete, Some(path)) => manager.delete(path).await,
    };
    match outcome {
        Ok(()) => RepoResponse::ack(),
        Err(err) => RepoResponse::error(err.to_string()),
    }
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &RepoResponse,
) -> Result<(), RepoError> {
    let mut payload = serde_json::to_vec(response)?;
    payload.push(b'\n');
    writer
        .write_all(&payload)
        .await
        .map_err(|e| io_err("repository manager socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("repository manager socket flush", e))?;
    Ok(())
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), RepoError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(RepoError::Protocol(format!(
                "repository manager socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale repository manager socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

fn set_socket_permissions(path: &Path) -> Result<(), RepoError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}
