//! Admin socket client used by the CLI.
//!
//! One connection, one request in flight at a time; each response is
//! matched to its request by id.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;

use crate::allocation::{BatchRequest, SettingsOverride};
use crate::config::default_socket_path;
use crate::error::{Result, TaskbotError};
use crate::ipc::messages::{AdminRequest, AdminResponse, Methods};

#[derive(Debug, Clone)]
pub struct IpcClientConfig {
    pub socket_path: PathBuf,
    /// How long to wait for a response. Verification and assignment talk to
    /// external services, so this is generous.
    pub request_timeout: Duration,
}

impl Default for IpcClientConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            request_timeout: Duration::from_secs(60),
        }
    }
}

impl IpcClientConfig {
    pub fn with_socket(path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: path.into(),
            ..Default::default()
        }
    }
}

struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

pub struct IpcClient {
    config: IpcClientConfig,
    connection: Mutex<Option<Connection>>,
    next_id: AtomicU64,
}

impl IpcClient {
    pub fn new(config: IpcClientConfig) -> Self {
        Self {
            config,
            connection: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn with_socket(path: impl Into<PathBuf>) -> Self {
        Self::new(IpcClientConfig::with_socket(path))
    }

    pub fn socket_path(&self) -> &Path {
        &self.config.socket_path
    }

    pub async fn connect(&self) -> Result<()> {
        let stream = UnixStream::connect(&self.config.socket_path).await.map_err(|e| {
            TaskbotError::Ipc(format!(
                "Failed to connect to {}: {} (is `taskbot run` active?)",
                self.config.socket_path.display(),
                e
            ))
        })?;
        let (reader, writer) = stream.into_split();
        *self.connection.lock().await = Some(Connection {
            reader: BufReader::new(reader),
            writer,
        });
        Ok(())
    }

    pub async fn is_connected(&self) -> bool {
        self.connection.lock().await.is_some()
    }

    /// Send a request and wait for its response
    pub async fn request(&self, method: &str, params: Value) -> Result<AdminResponse> {
        let mut guard = self.connection.lock().await;
        let connection = guard
            .as_mut()
            .ok_or_else(|| TaskbotError::Ipc("Not connected".to_string()))?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut line = serde_json::to_string(&AdminRequest::new(id, method, params))?;
        line.push('\n');
        connection
            .writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| TaskbotError::Ipc(format!("Failed to write: {}", e)))?;

        let read = async {
            let mut buf = String::new();
            loop {
                buf.clear();
                if connection.reader.read_line(&mut buf).await? == 0 {
                    return Err(TaskbotError::Ipc("Connection closed by service".to_string()));
                }
                let response: AdminResponse = serde_json::from_str(buf.trim())?;
                if response.id == id {
                    return Ok(response);
                }
                log::debug!("Skipping response {} while waiting for {}", response.id, id);
            }
        };
        let outcome = tokio::time::timeout(self.config.request_timeout, read).await;
        match outcome {
            Ok(result) => result,
            Err(_) => {
                *guard = None;
                Err(TaskbotError::Ipc("Request timeout".to_string()))
            }
        }
    }

    pub async fn ping(&self) -> Result<bool> {
        Ok(self.request(Methods::PING, json!({})).await?.is_success())
    }

    pub async fn status(&self) -> Result<AdminResponse> {
        self.request(Methods::STATUS, json!({})).await
    }

    pub async fn start_batch(&self, request: &BatchRequest) -> Result<AdminResponse> {
        self.request(Methods::BATCH_START, serde_json::to_value(request)?).await
    }

    pub async fn pause(&self) -> Result<AdminResponse> {
        self.request(Methods::BATCH_PAUSE, json!({})).await
    }

    pub async fn resume(&self) -> Result<AdminResponse> {
        self.request(Methods::BATCH_RESUME, json!({})).await
    }

    pub async fn stop(&self) -> Result<AdminResponse> {
        self.request(Methods::BATCH_STOP, json!({})).await
    }

    pub async fn configure(&self, update: &SettingsOverride) -> Result<AdminResponse> {
        self.request(Methods::SETTINGS_CONFIGURE, serde_json::to_value(update)?).await
    }

    pub async fn assign(&self, task: u32, user: u64) -> Result<AdminResponse> {
        self.request(Methods::TASK_ASSIGN, json!({"task": task, "user": user})).await
    }

    pub async fn verify(&self, user: u64, username: &str) -> Result<AdminResponse> {
        self.request(Methods::IDENTITY_VERIFY, json!({"user": user, "username": username}))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::server::{IpcServer, IpcServerConfig, RequestHandler};
    use std::sync::Arc;
    use tempfile::tempdir;

    struct MethodEcho;

    impl RequestHandler for MethodEcho {
        fn handle(&self, request: AdminRequest) -> impl std::future::Future<Output = AdminResponse> + Send {
            async move { AdminResponse::success(request.id, json!({"method": request.method, "params": request.params})) }
        }
    }

    #[tokio::test]
    async fn test_request_without_connection_fails() {
        let client = IpcClient::with_socket("/nonexistent/taskbot.sock");
        assert!(!client.is_connected().await);
        assert!(matches!(client.ping().await, Err(TaskbotError::Ipc(_))));
        assert!(client.connect().await.is_err());
    }

    #[tokio::test]
    async fn test_convenience_methods_reach_server() {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("admin.sock");
        let mut server = IpcServer::new(IpcServerConfig::default().with_socket_path(&socket_path));
        let shutdown = server.shutdown_handle();
        let task = tokio::spawn(async move { server.run(Arc::new(MethodEcho)).await });

        let client = IpcClient::with_socket(&socket_path);
        while client.connect().await.is_err() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(client.ping().await.unwrap());

        let response = client.assign(4, 99).await.unwrap();
        let result = response.result.unwrap();
        assert_eq!(result["method"], Methods::TASK_ASSIGN);
        assert_eq!(result["params"]["task"], 4);

        let response = client
            .start_batch(&BatchRequest {
                total_tasks: 3,
                label: "comment".to_string(),
                winners_per_round: Some(2),
                description: None,
            })
            .await
            .unwrap();
        assert_eq!(response.result.unwrap()["params"]["total_tasks"], 3);

        shutdown.send(()).await.unwrap();
        task.await.unwrap().unwrap();
    }
}
