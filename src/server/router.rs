//! Message delivery between sessions.
//!
//! Deliveries go through each recipient's channel and are written by the
//! recipient's own task, so a dead recipient never blocks or fails the sender.

use log::{debug, warn};

use super::state::{SessionId, SharedState};
use crate::{Error, Result};

pub async fn unicast(state: &SharedState, from: &str, target: &str, message: &str) -> Result<()> {
    let state = state.read().await;
    let Some(recipient) = state.lookup(target) else {
        debug!("Unicast from {from} to unknown handle {target}");
        return Err(Error::HandleNotFound(target.to_string()));
    };

    if !recipient.send(format!("Unicast from {from}: {message}")) {
        warn!(
            "Unicast from {from} to {target}@{} dropped, session is closing",
            recipient.addr
        );
        return Err(Error::HandleNotFound(target.to_string()));
    }
    Ok(())
}

/// Deliver to every registered session except the sender. Returns the number
/// of sessions reached.
pub async fn broadcast(state: &SharedState, from_id: SessionId, from: &str, message: &str) -> usize {
    let text = format!("Broadcast from {from}: {message}");
    let state = state.read().await;

    let mut reached = 0;
    for recipient in state.registered().filter(|s| s.id != from_id) {
        if recipient.send(text.clone()) {
            reached += 1;
        } else {
            debug!("Broadcast from {from} skipped closing session {}", recipient.addr);
        }
    }
    reached
}

/// Deliver to every live session, registered or not.
pub async fn notify_all(state: &SharedState, text: &str) -> usize {
    let state = state.read().await;
    state.sessions().filter(|s| s.send(text.to_string())).count()
}
