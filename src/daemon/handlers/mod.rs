//! Request handlers for the daemon
//!
//! Each submodule handles a category of admin methods:
//! - batch: batch lifecycle (start, pause, resume, stop) and settings.configure
//! - members: manual assignment and identity verification
//! - status: status and ping
//!
//! AdminHandler routes a request to the matching handler.

pub mod batch;
pub mod members;
pub mod status;

use std::sync::Arc;

pub use batch::*;
pub use members::*;
pub use status::*;

use crate::daemon::context::DaemonContext;
use crate::ipc::messages::{AdminError, AdminRequest, AdminResponse, Methods};
use crate::ipc::server::RequestHandler;

/// Routes admin requests to handlers
pub struct AdminHandler {
    ctx: Arc<DaemonContext>,
}

impl AdminHandler {
    pub fn new(ctx: Arc<DaemonContext>) -> Self {
        Self { ctx }
    }

    pub async fn dispatch(&self, request: AdminRequest) -> AdminResponse {
        let ctx = self.ctx.as_ref();
        let id = request.id;
        let params = &request.params;
        match request.method.as_str() {
            Methods::PING => handle_ping(id).await,
            Methods::STATUS => handle_status(id, ctx).await,
            Methods::BATCH_START => handle_batch_start(id, params, ctx).await,
            Methods::BATCH_PAUSE => handle_batch_pause(id, ctx).await,
            Methods::BATCH_RESUME => handle_batch_resume(id, ctx).await,
            Methods::BATCH_STOP => handle_batch_stop(id, ctx).await,
            Methods::SETTINGS_CONFIGURE => handle_settings_configure(id, params, ctx).await,
            Methods::TASK_ASSIGN => handle_task_assign(id, params, ctx).await,
            Methods::IDENTITY_VERIFY => handle_identity_verify(id, params, ctx).await,
            other => {
                log::warn!("Unknown admin method: {}", other);
                AdminResponse::error(id, AdminError::method_not_found(other))
            }
        }
    }
}

impl RequestHandler for AdminHandler {
    fn handle(&self, request: AdminRequest) -> impl std::future::Future<Output = AdminResponse> + Send {
        self.dispatch(request)
    }
}
