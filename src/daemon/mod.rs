//! Daemon Core - the long-running service process
//!
//! The daemon:
//! - Sweeps cooldown roles left over from a previous run
//! - Serves admin requests on a Unix socket
//! - Runs the recurring allocation loop when a batch is started
//! - Answers the liveness probe

pub mod context;
pub mod handlers;
pub mod keepalive;
pub mod recovery;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;

pub use context::DaemonContext;
pub use handlers::AdminHandler;
pub use recovery::{Recovery, RecoveryAction, RecoveryConfig};

use crate::config::Config;
use crate::error::{Result, TaskbotError};
use crate::ipc::{IpcServer, IpcServerConfig};
use crate::platform::{
    Collaborators, DiscordClient, DiscordConfig, RedditClient, RedditConfig, SheetsClient, SheetsConfig,
};

/// Build the REST collaborators from configuration and the environment
pub fn build_collaborators(config: &Config) -> Result<Collaborators> {
    let discord = Arc::new(DiscordClient::from_env(
        &config.discord.token_env,
        DiscordConfig {
            api_base: config.discord.api_base.clone(),
            guild_id: config.discord.guild_id,
            ..Default::default()
        },
    )?);
    let sheets = Arc::new(SheetsClient::from_env(
        &config.ledger.token_env,
        SheetsConfig {
            api_base: config.ledger.api_base.clone(),
            ..Default::default()
        },
    )?);
    let verification = &config.verification;
    let reddit = Arc::new(RedditClient::new(RedditConfig::from_env(
        &verification.client_id_env,
        &verification.client_secret_env,
        &verification.user_agent_env,
    ))?);

    Ok(Collaborators {
        messaging: discord.clone(),
        membership: discord,
        ledger: sheets,
        reputation: reddit,
    })
}

/// Run the service with REST collaborators until Ctrl-C
pub async fn run_daemon(config: Config) -> Result<()> {
    let collaborators = build_collaborators(&config)?;
    serve(&config, collaborators, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Failed to listen for shutdown signal: {}", e);
        }
    })
    .await
}

/// Run the service against the given collaborators until `shutdown` resolves
pub async fn serve(config: &Config, collaborators: Collaborators, shutdown: impl Future<Output = ()>) -> Result<()> {
    let ctx = Arc::new(DaemonContext::new(config, collaborators));
    let settings = ctx.controller.settings();
    if !settings.is_configured() {
        log::warn!("Announce or logs channel not configured; batches cannot start until they are set.");
    }

    let recovery = Recovery::new(
        ctx.collaborators.membership.clone(),
        ctx.roles.clone(),
        RecoveryConfig {
            role_name: settings.task_role_name.clone(),
            pause: Duration::from_millis(config.allocation.sweep_pause_ms),
        },
    );
    if let Err(e) = recovery.recover_all().await {
        log::error!("Error during startup role cleanup: {}", e);
    }

    let (keepalive_tx, keepalive_rx) = oneshot::channel::<()>();
    let keepalive_task = if config.keepalive.enabled {
        let (listener, _addr) = keepalive::bind(config.keepalive.port).await?;
        Some(tokio::spawn(keepalive::serve(listener, async move {
            let _ = keepalive_rx.await;
        })))
    } else {
        None
    };

    let mut server = IpcServer::new(IpcServerConfig::default().with_socket_path(&config.ipc.socket_path));
    let server_stop = server.shutdown_handle();
    let handler = Arc::new(AdminHandler::new(ctx.clone()));
    let server_task = tokio::spawn(async move { server.run(handler).await });
    log::info!("Taskbot is running");

    shutdown.await;
    log::info!("Shutting down");

    if ctx.stop_loop().await {
        log::info!("Stopped the running task loop");
    }
    let _ = server_stop.send(()).await;
    let _ = keepalive_tx.send(());
    if let Some(task) = keepalive_task
        && let Err(e) = task.await
    {
        log::warn!("Keepalive task ended abnormally: {}", e);
    }
    server_task
        .await
        .map_err(|e| TaskbotError::Ipc(format!("Admin server task failed: {}", e)))?
}
