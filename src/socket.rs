//! Unix domain socket server for controlling a running session.
//!
//! Provides a socket (default `/tmp/dialog-pilot-{pid}.sock`) that accepts
//! JSON-line [`ControlRequest`]s. Requests are not handled here: each one is
//! forwarded to the session loop together with a oneshot reply channel, so
//! the session stays single-owner.

use crate::protocol::{ControlRequest, ControlResponse};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

/// A request on its way to the session loop
pub struct ControlCommand {
    pub request: ControlRequest,
    pub response_tx: oneshot::Sender<ControlResponse>,
}

/// Socket server for control requests
pub struct ControlServer {
    /// Path to the Unix socket
    socket_path: PathBuf,
    /// Channel into the session loop
    command_tx: mpsc::Sender<ControlCommand>,
}

impl ControlServer {
    pub fn new(socket_path: impl Into<PathBuf>, command_tx: mpsc::Sender<ControlCommand>) -> Self {
        Self {
            socket_path: socket_path.into(),
            command_tx,
        }
    }

    /// Bind the socket. Separate from [`run`](Self::run) so bind errors
    /// surface before the session starts.
    pub fn bind(&self) -> Result<UnixListener> {
        let path = self.socket_path.as_path();
        if path.exists() {
            std::fs::remove_file(path).context("Failed to remove existing socket")?;
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .context(format!("Failed to create socket directory {:?}", parent))?;
        }

        let listener = UnixListener::bind(path)
            .context(format!("Failed to bind socket at {}", path.display()))?;

        // Owner only: the socket can type into the terminal
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            if let Err(e) = std::fs::set_permissions(path, perms) {
                warn!("Failed to set socket permissions: {}", e);
            }
        }

        info!("Control socket listening at {}", path.display());
        Ok(listener)
    }

    /// Accept connections until the task is dropped.
    pub async fn run(self, listener: UnixListener) {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let command_tx = self.command_tx.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, command_tx).await {
                            error!("Connection error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    error!("Accept error: {}", e);
                }
            }
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

/// Serve one client until it disconnects or asks for shutdown.
async fn handle_connection(stream: UnixStream, command_tx: mpsc::Sender<ControlCommand>) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    debug!("New control connection");

    loop {
        line.clear();
        let bytes_read = reader.read_line(&mut line).await?;
        if bytes_read == 0 {
            debug!("Client disconnected");
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let (response, shutdown) = match serde_json::from_str::<ControlRequest>(trimmed) {
            Ok(request) => {
                let shutdown = request == ControlRequest::Shutdown;
                (forward(request, &command_tx).await, shutdown)
            }
            Err(e) => (
                ControlResponse::Error {
                    message: format!("Invalid JSON: {}", e),
                },
                false,
            ),
        };

        let response_json = serde_json::to_string(&response)?;
        writer.write_all(response_json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;

        if shutdown {
            break;
        }
    }

    Ok(())
}

/// Hand a request to the session loop and wait for its reply.
async fn forward(request: ControlRequest, command_tx: &mpsc::Sender<ControlCommand>) -> ControlResponse {
    let (response_tx, response_rx) = oneshot::channel();
    if command_tx
        .send(ControlCommand {
            request,
            response_tx,
        })
        .await
        .is_err()
    {
        return ControlResponse::Error {
            message: "Session loop closed".to_string(),
        };
    }
    response_rx.await.unwrap_or_else(|_| ControlResponse::Error {
        message: "Session loop dropped the request".to_string(),
    })
}

/// Client for the control socket (tests and scripting)
pub struct ControlClient {
    socket_path: PathBuf,
}

impl ControlClient {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }

    pub async fn status(&self) -> Result<ControlResponse> {
        self.send_request(&ControlRequest::Status).await
    }

    pub async fn shutdown(&self) -> Result<ControlResponse> {
        self.send_request(&ControlRequest::Shutdown).await
    }

    pub async fn send_request(&self, request: &ControlRequest) -> Result<ControlResponse> {
        let stream = UnixStream::connect(&self.socket_path)
            .await
            .context("Failed to connect to socket")?;

        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        let request_json = serde_json::to_string(request)?;
        writer.write_all(request_json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;

        let mut line = String::new();
        reader.read_line(&mut line).await?;

        let response: ControlResponse =
            serde_json::from_str(line.trim()).context("Invalid response from control socket")?;
        Ok(response)
    }
}
