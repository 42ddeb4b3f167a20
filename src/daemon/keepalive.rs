//! Liveness probe - `GET /ping` for hosting platforms that poll the service

use std::net::SocketAddr;

use axum::Router;
use axum::routing::get;
use tokio::net::TcpListener;

use crate::error::{Result, TaskbotError};

pub const ALIVE_BODY: &str = "🟢 Bot is alive";

async fn ping() -> &'static str {
    ALIVE_BODY
}

pub fn router() -> Router {
    Router::new().route("/ping", get(ping))
}

/// Bind the probe port; port 0 picks a free one
pub async fn bind(port: u16) -> Result<(TcpListener, SocketAddr)> {
    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .map_err(|e| TaskbotError::Configuration(format!("failed to bind keepalive port {}: {}", port, e)))?;
    let addr = listener.local_addr()?;
    log::info!("Keepalive probe listening on {}", addr);
    Ok((listener, addr))
}

pub async fn serve(listener: TcpListener, shutdown: impl std::future::Future<Output = ()> + Send + 'static) -> Result<()> {
    axum::serve(listener, router())
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_ping_responds_alive() {
        let (listener, addr) = bind(0).await.unwrap();
        let (tx, rx) = oneshot::channel::<()>();
        let server = tokio::spawn(serve(listener, async move {
            let _ = rx.await;
        }));

        let url = format!("http://127.0.0.1:{}/ping", addr.port());
        let response = reqwest::get(&url).await.unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(response.text().await.unwrap(), ALIVE_BODY);

        let missing = reqwest::get(format!("http://127.0.0.1:{}/nope", addr.port())).await.unwrap();
        assert_eq!(missing.status(), 404);

        tx.send(()).unwrap();
        server.await.unwrap().unwrap();
    }
}
