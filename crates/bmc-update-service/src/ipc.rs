//! Unix domain socket server speaking the line-delimited JSON protocol

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::dispatch::Command;
use crate::protocol::{Response, encode_response, parse_request};

/// Socket server configuration
#[derive(Debug, Clone)]
pub struct IpcConfig {
    /// Socket file
    pub socket_path: PathBuf,
    /// Permission bits applied after binding
    pub socket_mode: u32,
    /// Longest request line accepted, newline included
    pub max_request_bytes: usize,
}

/// Request server forwarding every request to the dispatcher
#[derive(Debug, Clone)]
pub struct IpcServer {
    config: IpcConfig,
    commands: mpsc::Sender<Command>,
}

impl IpcServer {
    /// Create a server posting to `commands`
    pub fn new(config: IpcConfig, commands: mpsc::Sender<Command>) -> Self {
        Self { config, commands }
    }

    /// Accept connections until `shutdown` fires
    pub async fn serve(&self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        let socket_path = &self.config.socket_path;
        info!("Starting Unix Domain Socket server: {}", socket_path.display());

        if socket_path.exists() {
            tokio::fs::remove_file(socket_path)
                .await
                .context("Failed to remove existing socket file")?;
        }
        if let Some(parent) = socket_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create socket directory")?;
        }

        let listener = UnixListener::bind(socket_path).context("Failed to bind Unix socket")?;
        restrict_permissions(socket_path, self.config.socket_mode).await?;

        info!("Unix socket server listening on {}", socket_path.display());

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Unix socket server shutting down");
                    break;
                }
                result = listener.accept() => {
                    match result {
                        Ok((stream, _addr)) => {
                            debug!("New connection");
                            let commands = self.commands.clone();
                            let limit = self.config.max_request_bytes;
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, commands, limit).await {
                                    warn!("Connection ended with error: {:#}", e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                        }
                    }
                }
            }
        }

        if let Err(e) = tokio::fs::remove_file(socket_path).await {
            debug!("Socket file already gone: {}", e);
        }
        Ok(())
    }
}

async fn restrict_permissions(socket_path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = tokio::fs::metadata(socket_path)
        .await
        .context("Failed to get socket metadata")?;
    let mut permissions = metadata.permissions();
    permissions.set_mode(mode);
    tokio::fs::set_permissions(socket_path, permissions)
        .await
        .context("Failed to set socket permissions")?;
    Ok(())
}

/// Serve one client: one request per line, one response per line
///
/// A line longer than `limit` gets an error response and closes the
/// connection.
async fn handle_connection(
    stream: UnixStream,
    commands: mpsc::Sender<Command>,
    limit: usize,
) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let cap = u64::try_from(limit).unwrap_or(u64::MAX);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        let read = (&mut reader)
            .take(cap)
            .read_until(b'\n', &mut buf)
            .await
            .context("Failed to read request")?;
        if read == 0 {
            break;
        }
        if !buf.ends_with(b"\n") && buf.len() >= limit {
            warn!(limit, "Request line too long, closing connection");
            let response = Response::error(
                "request_too_large",
                format!("request exceeds {limit} bytes"),
            );
            writer
                .write_all(encode_response(&response).as_bytes())
                .await
                .context("Failed to write response")?;
            return Ok(());
        }

        let line = String::from_utf8_lossy(&buf);
        let response = match parse_request(line.trim_end_matches(['\n', '\r'])) {
            Ok(request) => dispatch(&commands, request).await,
            Err(e) => {
                debug!("Rejected request line: {}", e);
                e.into()
            }
        };
        writer
            .write_all(encode_response(&response).as_bytes())
            .await
            .context("Failed to write response")?;
    }
    debug!("Connection closed");
    Ok(())
}

async fn dispatch(commands: &mpsc::Sender<Command>, request: crate::protocol::Request) -> Response {
    let (reply, response) = oneshot::channel();
    if commands
        .send(Command::Request { request, reply })
        .await
        .is_err()
    {
        return Response::error("unavailable", "dispatcher is not running");
    }
    response
        .await
        .unwrap_or_else(|_| Response::error("unavailable", "dispatcher dropped the request"))
}
