//! JSON-lines wire format and the socket client.
//!
//! One request object per line, one response object per line:
//!
//! ```text
//! -> {"op":"create","repository_path":"01HV..."}
//! <- {"ok":true}
//! -> {"op":"list"}
//! <- {"ok":true,"data":["01HV...","01HW..."]}
//! -> {"op":"delete","repository_path":"01HV..."}
//! <- {"ok":false,"error":"disk full"}
//! ```

use std::io::ErrorKind;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use crate::error::{io_err, RepoError};
use crate::manager::RepositoryManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepoOp {
    Create,
    Delete,
    List,
}

impl RepoOp {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Delete => "delete",
            Self::List => "list",
        }
    }
}

/// JSON newline-delimited request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoRequest {
    pub op: RepoOp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository_path: Option<String>,
}

/// JSON newline-delimited response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RepoResponse {
    pub fn ack() -> Self {
        Self {
            ok: true,
            data: None,
            error: None,
        }
    }

    pub fn ok(data: Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Client for a Repository Manager listening on a Unix socket.
///
/// Opens one connection per call.
#[derive(Debug, Clone)]
pub struct SocketRepositoryManager {
    socket: PathBuf,
}

impl SocketRepositoryManager {
    pub fn new(socket: impl Into<PathBuf>) -> Self {
        Self {
            socket: socket.into(),
        }
    }

    /// Send one request and return one response.
    pub async fn send(&self, request: &RepoRequest) -> Result<RepoResponse, RepoError> {
        let socket = &self.socket;
        if !socket.exists() {
            return Err(RepoError::Unavailable {
                socket: socket.clone(),
            });
        }

        let stream = UnixStream::connect(socket).await.map_err(|err| {
            if matches!(
                err.kind(),
                ErrorKind::NotFound | ErrorKind::ConnectionRefused | ErrorKind::ConnectionReset
            ) {
                RepoError::Unavailable {
                    socket: socket.clone(),
                }
            } else {
                io_err(socket, err)
            }
        })?;
        let (reader, mut writer) = stream.into_split();

        let mut payload = serde_json::to_vec(request)?;
        payload.push(b'\n');
        writer
            .write_all(&payload)
            .await
            .map_err(|e| io_err(socket, e))?;
        writer.flush().await.map_err(|e| io_err(socket, e))?;

        let mut lines = BufReader::new(reader).lines();
        let line = lines
            .next_line()
            .await
            .map_err(|e| io_err(socket, e))?
            .ok_or_else(|| {
                RepoError::Protocol(
                    "repository manager closed connection before responding".to_string(),
                )
            })?;

        Ok(serde_json::from_str(line.trim_end())?)
    }

    async fn call(&self, op: RepoOp, path: Option<&str>) -> Result<Value, RepoError> {
        let request = RepoRequest {
            op,
            repository_path: path.map(str::to_owned),
        };
        let response = self.send(&request).await?;
        if response.ok {
            tracing::debug!(op = op.as_str(), path = path.unwrap_or(""), "repository manager ack");
            Ok(response.data.unwrap_or(Value::Null))
        } else {
            Err(RepoError::Rejected {
                op: op.as_str(),
                path: path.unwrap_or_default().to_owned(),
                message: response
                    .error
                    .unwrap_or_else(|| "unknown repository manager error".to_string()),
            })
        }
    }
}

#[async_trait]
impl RepositoryManager for SocketRepositoryManager {
    async fn create(&self, path: &str) -> Result<(), RepoError> {
        self.call(RepoOp::Create, Some(path)).await.map(|_| ())
    }

    async fn delete(&self, path: &str) -> Result<(), RepoError> {
        self.call(RepoOp::Delete, Some(path)).await.map(|_| ())
    }

    async fn list(&self) -> Result<Vec<String>, RepoError> {
        let data = self.call(RepoOp::List, None).await?;
        Ok(serde_json::from_value(data)?)
    }
}
