//! Admin socket server
//!
//! Provides:
//! - Unix stream socket listener
//! - Per-client line loop
//! - Request routing through a RequestHandler

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;

use crate::config::default_socket_path;
use crate::error::{Result, TaskbotError};
use crate::ipc::messages::{AdminError, AdminRequest, AdminResponse};

/// Configuration for the admin server
#[derive(Debug, Clone)]
pub struct IpcServerConfig {
    pub socket_path: PathBuf,
    /// Maximum number of concurrent clients
    pub max_clients: usize,
}

impl Default for IpcServerConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            max_clients: 8,
        }
    }
}

impl IpcServerConfig {
    pub fn with_socket_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.socket_path = path.as_ref().to_path_buf();
        self
    }

    pub fn with_max_clients(mut self, max: usize) -> Self {
        self.max_clients = max;
        self
    }
}

/// Handler trait for processing requests
pub trait RequestHandler: Send + Sync {
    fn handle(&self, request: AdminRequest) -> impl std::future::Future<Output = AdminResponse> + Send;
}

/// Decrements the client count when a connection ends
struct ClientSlot(Arc<AtomicUsize>);

impl Drop for ClientSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct IpcServer {
    config: IpcServerConfig,
    clients: Arc<AtomicUsize>,
    shutdown_tx: mpsc::Sender<()>,
    shutdown_rx: Option<mpsc::Receiver<()>>,
}

impl IpcServer {
    pub fn new(config: IpcServerConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        Self {
            config,
            clients: Arc::new(AtomicUsize::new(0)),
            shutdown_tx,
            shutdown_rx: Some(shutdown_rx),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.config.socket_path
    }

    pub fn client_count(&self) -> usize {
        self.clients.load(Ordering::SeqCst)
    }

    /// Sender that stops `run` when signalled
    pub fn shutdown_handle(&self) -> mpsc::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Bind the socket and serve until shutdown
    pub async fn run<H: RequestHandler + 'static>(&mut self, handler: Arc<H>) -> Result<()> {
        let mut shutdown_rx = self
            .shutdown_rx
            .take()
            .ok_or_else(|| TaskbotError::Ipc("Server already ran".to_string()))?;

        // Remove a stale socket left by a previous process
        if self.config.socket_path.exists() {
            std::fs::remove_file(&self.config.socket_path)?;
        }
        if let Some(parent) = self.config.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(&self.config.socket_path)
            .map_err(|e| TaskbotError::Ipc(format!("Failed to bind socket: {}", e)))?;
        log::info!("Admin socket listening on {}", self.config.socket_path.display());

        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, _addr)) => {
                            if self.clients.load(Ordering::SeqCst) >= self.config.max_clients {
                                log::warn!("Admin socket at capacity; rejecting connection");
                                continue;
                            }
                            self.clients.fetch_add(1, Ordering::SeqCst);
                            let slot = ClientSlot(Arc::clone(&self.clients));
                            let handler = Arc::clone(&handler);
                            tokio::spawn(async move {
                                let _slot = slot;
                                if let Err(e) = handle_client(stream, handler).await {
                                    log::debug!("Admin client ended with error: {}", e);
                                }
                            });
                        }
                        Err(e) => log::error!("Accept error: {}", e),
                    }
                }
                _ = shutdown_rx.recv() => {
                    break;
                }
            }
        }

        let _ = std::fs::remove_file(&self.config.socket_path);
        log::info!("Admin socket closed");
        Ok(())
    }
}

async fn write_response(writer: &mut tokio::net::unix::OwnedWriteHalf, response: &AdminResponse) -> Result<()> {
    let mut line = serde_json::to_string(response)?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    Ok(())
}

/// Serve one connection: one request per line, one response per line
async fn handle_client<H: RequestHandler>(stream: UnixStream, handler: Arc<H>) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            break;
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<AdminRequest>(trimmed) {
            Ok(request) => {
                log::debug!("Admin request {} {}", request.id, request.method);
                handler.handle(request).await
            }
            Err(e) => AdminResponse::error(0, AdminError::parse_error(format!("Parse error: {}", e))),
        };
        write_response(&mut writer, &response).await?;
    }
    Ok(())
}
