//! The fxchat server: acceptor, sessions, registry, router and shutdown.
//!
//! Each accepted connection runs as its own task. The acceptor stops taking
//! connections as soon as shutdown begins, waits for the coordinator to reach
//! [`Phase::Stopped`], then joins every session task.

pub mod connection;
pub mod handlers;
pub mod router;
pub mod shutdown;
pub mod state;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tokio::task::{JoinError, JoinSet};

use crate::Result;
use crate::config::Config;
use crate::storage::FileStore;
use connection::handle_connection;
use shutdown::Coordinator;
pub use shutdown::{Phase, ShutdownHandle};
use state::{ServerState, SharedState};

/// Everything a session needs from the server.
#[derive(Debug, Clone)]
pub struct Context {
    pub config: Arc<Config>,
    pub state: SharedState,
    pub store: FileStore,
    pub coordinator: Arc<Coordinator>,
}

pub struct Server {
    listener: TcpListener,
    ctx: Context,
}

impl Server {
    /// Prepare the storage directory and bind the command port.
    pub async fn bind(config: Config) -> Result<Self> {
        let store = FileStore::new(&config.storage_dir);
        store.ensure_root().await?;

        let listener = TcpListener::bind(config.bind_addr()).await?;
        let state: SharedState = Arc::new(RwLock::new(ServerState::new()));
        let coordinator = Arc::new(Coordinator::new(
            state.clone(),
            config.shutdown_countdown,
            config.shutdown_interval(),
        ));

        Ok(Self {
            listener,
            ctx: Context {
                config: Arc::new(config),
                state,
                store,
                coordinator,
            },
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle::new(self.ctx.coordinator.clone())
    }

    pub fn state(&self) -> SharedState {
        self.ctx.state.clone()
    }

    /// Accept connections until shutdown, then wait for every session.
    pub async fn run(self) -> Result<()> {
        let Server { listener, ctx } = self;
        let mut phase = ctx.coordinator.subscribe();
        let mut sessions = JoinSet::new();

        info!(
            "Listening on {} (storage: {})",
            listener.local_addr()?,
            ctx.store.root().display()
        );

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        info!("New connection from {addr}");
                        let ctx = ctx.clone();
                        sessions.spawn(async move {
                            if let Err(e) = handle_connection(stream, addr, ctx).await {
                                warn!("Connection error from {addr}: {e}");
                            }
                        });
                    }
                    Err(e) => {
                        error!("Accept error: {e}");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },

                Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                    log_join(joined);
                }

                changed = phase.changed() => {
                    if changed.is_err() || *phase.borrow() != Phase::Running {
                        break;
                    }
                }
            }
        }

        drop(listener);
        info!("No longer accepting connections");

        let _ = phase.wait_for(|p| *p == Phase::Stopped).await;

        let grace = ctx.config.shutdown_grace();
        let drained = tokio::time::timeout(grace, async {
            while let Some(joined) = sessions.join_next().await {
                log_join(joined);
            }
        })
        .await;
        if drained.is_err() {
            warn!(
                "{} session(s) still open after {grace:?}, closing them",
                sessions.len()
            );
            sessions.shutdown().await;
        }

        ctx.state.write().await.clear();
        info!("Server closed.");
        Ok(())
    }
}

fn log_join(joined: std::result::Result<(), JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            error!("Session task panicked: {e}");
        }
    }
}
