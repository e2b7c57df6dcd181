//! Sender and receiver sessions.
//!
//! Each session owns its own [`crate::transport::SessionTransport`] for its
//! whole lifetime and runs one actor task that reacts to transport events.
//! Public methods take `&mut self`; the actor is the only place session
//! state changes after `start`.
//!
//! - [`SenderSession`] - geolocation watch → transport
//! - [`ReceiverSession`] - transport → [`ReceiverListener`]
//! - [`foreground`] - execution lease held by an active sender

pub mod foreground;
pub mod receiver;
pub mod sender;

use tokio::task::JoinHandle;

use crate::constants::SESSION_STOP_TIMEOUT;

pub use foreground::{ExecutionLease, ForegroundService, LoggingForeground};
pub use receiver::{
    ChannelListener, CloseKind, CloseStatus, LocationUpdate, ReceiverConfig, ReceiverEvent,
    ReceiverListener, ReceiverSession,
};
pub use sender::{SenderConfig, SenderSession, SenderStats};

/// Wait for a session actor to finish its teardown, aborting it if it
/// takes longer than [`SESSION_STOP_TIMEOUT`].
async fn join_actor(task: JoinHandle<()>, tag: &str) {
    let abort = task.abort_handle();
    match tokio::time::timeout(SESSION_STOP_TIMEOUT, task).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) if e.is_cancelled() => {}
        Ok(Err(e)) => log::error!("[{}] Session task failed: {}", tag, e),
        Err(_) => {
            log::warn!(
                "[{}] Session task did not stop within {:?}, aborting",
                tag,
                SESSION_STOP_TIMEOUT
            );
            abort.abort();
        }
    }
}
