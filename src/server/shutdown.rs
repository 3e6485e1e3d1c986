//! Coordinated shutdown.
//!
//! The phase only moves forward: `Running -> Draining -> Stopped`. Sessions and
//! the acceptor watch it; the coordinator drives it.

use std::sync::Arc;
use std::time::Duration;

use log::info;
use tokio::sync::watch;

use super::router;
use super::state::SharedState;
use crate::constants::FINAL_SHUTDOWN_NOTICE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Running,
    Draining,
    Stopped,
}

#[derive(Debug)]
pub struct Coordinator {
    phase: watch::Sender<Phase>,
    state: SharedState,
    countdown: u32,
    interval: Duration,
}

impl Coordinator {
    pub fn new(state: SharedState, countdown: u32, interval: Duration) -> Self {
        let (phase, _) = watch::channel(Phase::Running);
        Self {
            phase,
            state,
            countdown,
            interval,
        }
    }

    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    /// Move from `Running` to `Draining`. Only the first caller wins.
    pub fn begin(&self) -> bool {
        self.phase.send_if_modified(|phase| {
            if *phase == Phase::Running {
                *phase = Phase::Draining;
                true
            } else {
                false
            }
        })
    }

    /// Start shutting down in the background. Returns false if a shutdown is
    /// already under way.
    pub fn trigger(self: &Arc<Self>, initiator: &str) -> bool {
        if !self.begin() {
            return false;
        }
        let coordinator = Arc::clone(self);
        let initiator = initiator.to_string();
        tokio::spawn(async move { coordinator.drain(&initiator).await });
        true
    }

    /// Send the countdown to every live session, then mark the server stopped.
    async fn drain(&self, initiator: &str) {
        let live = router::notify_all(
            &self.state,
            &format!("Server is shutting down for maintenance by {initiator}."),
        )
        .await;
        info!("Shutdown initiated by {initiator}, {live} session(s) live");

        for remaining in (1..=self.countdown).rev() {
            router::notify_all(
                &self.state,
                &format!("Server shutting down in {remaining} seconds..."),
            )
            .await;
            tokio::time::sleep(self.interval).await;
        }

        router::notify_all(&self.state, FINAL_SHUTDOWN_NOTICE).await;
        self.phase.send_replace(Phase::Stopped);
        info!("Server stopped");
    }
}

/// Cloneable handle for stopping a running server from outside.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    coordinator: Arc<Coordinator>,
}

impl ShutdownHandle {
    pub(crate) fn new(coordinator: Arc<Coordinator>) -> Self {
        Self { coordinator }
    }

    pub fn trigger(&self, initiator: &str) -> bool {
        self.coordinator.trigger(initiator)
    }

    pub fn phase(&self) -> Phase {
        self.coordinator.phase()
    }

    pub async fn wait_stopped(&self) {
        let mut rx = self.coordinator.subscribe();
        let _ = rx.wait_for(|phase| *phase == Phase::Stopped).await;
    }
}
