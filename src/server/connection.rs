//! Client connection handling.

use std::net::SocketAddr;

use log::{debug, info};
use tokio::io::BufReader;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, watch};

use super::Context;
use super::handlers::{Flow, dispatch};
use super::shutdown::Phase;
use super::state::{SessionId, next_session_id};
use crate::Result;
use crate::protocol::{Frame, LineBuffer};

/// Server side of one connection. Only the session's own task touches the
/// socket; other sessions reach it through the delivery channel.
pub struct Session {
    pub id: SessionId,
    pub addr: SocketAddr,
    pub handle: Option<String>,
    pub(crate) reader: BufReader<OwnedReadHalf>,
    pub(crate) writer: OwnedWriteHalf,
    pub(crate) ctx: Context,
    lines: LineBuffer,
}

impl Session {
    pub fn label(&self) -> String {
        match &self.handle {
            Some(handle) => format!("{handle}@{}", self.addr),
            None => self.addr.to_string(),
        }
    }

    pub(crate) async fn reply(&mut self, text: impl Into<String>) -> Result<()> {
        Frame::Reply(text.into()).send(&mut self.writer).await
    }

    pub(crate) async fn reply_error(&mut self, err: &crate::Error) -> Result<()> {
        Frame::Error(err.to_reply()).send(&mut self.writer).await
    }

    /// Process commands until the peer leaves, the connection fails, or the
    /// server stops. Deliveries are only written between commands.
    async fn run(
        &mut self,
        phase: &mut watch::Receiver<Phase>,
        deliveries: &mut mpsc::UnboundedReceiver<String>,
    ) -> Result<()> {
        if *phase.borrow_and_update() == Phase::Stopped {
            while let Ok(text) = deliveries.try_recv() {
                Frame::Notice(text).send(&mut self.writer).await?;
            }
            return Ok(());
        }

        loop {
            tokio::select! {
                biased;

                changed = phase.changed() => {
                    if changed.is_err() || *phase.borrow() == Phase::Stopped {
                        while let Ok(text) = deliveries.try_recv() {
                            Frame::Notice(text).send(&mut self.writer).await?;
                        }
                        return Ok(());
                    }
                }

                Some(text) = deliveries.recv() => {
                    Frame::Notice(text).send(&mut self.writer).await?;
                }

                line = self.lines.read_line(&mut self.reader) => {
                    let Some(line) = line? else {
                        return Ok(());
                    };
                    if let Flow::Close = self.process(&line).await? {
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn process(&mut self, line: &str) -> Result<Flow> {
        debug!("{} > {line}", self.label());

        match dispatch(self, line).await {
            Ok(flow) => Ok(flow),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                info!("{}: {e}", self.label());
                self.reply_error(&e).await?;
                Ok(Flow::Continue)
            }
        }
    }
}

pub async fn handle_connection(stream: TcpStream, addr: SocketAddr, ctx: Context) -> Result<()> {
    stream.set_nodelay(true)?;
    let (read_half, write_half) = stream.into_split();

    // Subscribe before joining the state so a stop issued meanwhile is seen.
    let mut phase = ctx.coordinator.subscribe();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let id = next_session_id();
    ctx.state.write().await.add_session(id, addr, tx);

    let mut session = Session {
        id,
        addr,
        handle: None,
        reader: BufReader::new(read_half),
        writer: write_half,
        ctx: ctx.clone(),
        lines: LineBuffer::default(),
    };

    let result = session.run(&mut phase, &mut rx).await;

    // Clean up on disconnect
    let removed = ctx.state.write().await.remove_session(id);
    match removed.and_then(|s| s.handle) {
        Some(handle) => info!("User disconnected: {handle} ({addr})"),
        None => info!("Connection closed: {addr}"),
    }
    result
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::net::TcpListener;
    use tokio::sync::RwLock;

    use super::*;
    use crate::config::Config;
    use crate::server::shutdown::{Coordinator, ShutdownHandle};
    use crate::server::state::ServerState;
    use crate::storage::FileStore;

    #[tokio::test]
    async fn test_session_after_stop_exits_at_once() {
        let dir = tempfile::tempdir().unwrap();
        let state = Arc::new(RwLock::new(ServerState::new()));
        let coordinator = Arc::new(Coordinator::new(state.clone(), 0, Duration::from_millis(1)));
        let handle = ShutdownHandle::new(coordinator.clone());
        assert!(handle.trigger("test"));
        handle.wait_stopped().await;

        let ctx = Context {
            config: Arc::new(Config::default()),
            state: state.clone(),
            store: FileStore::new(dir.path()),
            coordinator,
        };

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).await.unwrap();
        let (stream, addr) = listener.accept().await.unwrap();

        // The peer stays silent, so only the stopped phase can end the session.
        tokio::time::timeout(Duration::from_secs(2), handle_connection(stream, addr, ctx))
            .await
            .expect("session ignored the stopped phase")
            .unwrap();
        assert_eq!(state.read().await.session_count(), 0);
        drop(client);
    }
}
