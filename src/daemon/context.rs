//! Daemon context - shared state for request handlers
//!
//! DaemonContext owns every component the admin handlers need: the
//! controller, the allocation cycle and its recurring loop, settlement and
//! verification.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::allocation::{
    AllocationController, AllocationCycle, CycleState, LoopSignals, OpsLog, ReactionBook, RoleLifecycleManager,
    Settler, SharedController,
};
use crate::config::Config;
use crate::platform::Collaborators;
use crate::verify::IdentityVerifier;

/// A running recurring loop
struct LoopHandle {
    task: JoinHandle<CycleState>,
    signals: Arc<LoopSignals>,
}

impl LoopHandle {
    fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

pub struct DaemonContext {
    pub controller: SharedController,
    pub collaborators: Collaborators,
    pub ops: OpsLog,
    pub roles: Arc<RoleLifecycleManager>,
    pub settler: Arc<Settler>,
    pub cycle: Arc<AllocationCycle>,
    pub verifier: IdentityVerifier,
    loop_handle: Mutex<Option<LoopHandle>>,
}

impl DaemonContext {
    pub fn new(config: &Config, collaborators: Collaborators) -> Self {
        let settings = config.settings();
        let reactions = ReactionBook::new(settings.selection_emoji.clone());
        let controller = SharedController::new(AllocationController::new(settings));
        let ops = OpsLog::new(collaborators.messaging.clone(), controller.clone());
        let roles = Arc::new(RoleLifecycleManager::new(collaborators.membership.clone(), ops.clone()));
        let settler = Arc::new(Settler::new(&collaborators, roles.clone(), ops.clone()));
        let cycle = Arc::new(AllocationCycle::new(
            controller.clone(),
            &collaborators,
            reactions,
            settler.clone(),
            ops.clone(),
        ));
        let verifier = IdentityVerifier::new(&collaborators, controller.clone(), ops.clone(), &config.verification);

        Self {
            controller,
            collaborators,
            ops,
            roles,
            settler,
            cycle,
            verifier,
            loop_handle: Mutex::new(None),
        }
    }

    /// Start the recurring loop, replacing any loop already running.
    ///
    /// A replaced loop is retired, not cancelled: a round in progress runs
    /// through settlement and the new loop's first tick follows it.
    pub async fn restart_loop(&self) {
        let mut handle = self.loop_handle.lock().await;
        let previous = handle.take().map(|old| {
            if old.is_running() {
                log::info!("Restarting task loop once the current tick finishes");
            }
            old.signals.retire();
            old.task
        });

        let signals = LoopSignals::new();
        let cycle = Arc::clone(&self.cycle);
        let run_signals = Arc::clone(&signals);
        let task = tokio::spawn(async move {
            if let Some(previous) = previous
                && let Err(e) = previous.await
            {
                log::warn!("Previous task loop ended abnormally: {}", e);
            }
            cycle.run(run_signals).await
        });
        *handle = Some(LoopHandle { task, signals });
    }

    /// Request a stop and wake the loop. Returns false if no loop was running.
    ///
    /// A round in its reaction window finishes the window and then abandons
    /// itself without settling.
    pub async fn stop_loop(&self) -> bool {
        self.controller.lock().request_stop();
        let handle = self.loop_handle.lock().await;
        match handle.as_ref() {
            Some(running) if running.is_running() => {
                running.signals.wake();
                true
            }
            _ => false,
        }
    }

    pub async fn loop_running(&self) -> bool {
        self.loop_handle
            .lock()
            .await
            .as_ref()
            .is_some_and(LoopHandle::is_running)
    }

    /// Wait for the current loop to finish; for tests and shutdown
    pub async fn join_loop(&self) -> Option<CycleState> {
        let handle = self.loop_handle.lock().await.take()?;
        handle.task.await.ok()
    }
}
