//! Client side of the protocol.
//!
//! [`Client`] sends one command at a time and waits for its answer. Messages
//! from other users can arrive at any point before that answer; they are kept
//! in order and handed out by [`Client::next_notice`].

use std::collections::VecDeque;
use std::path::Path;

use log::debug;
use tokio::fs::{self, File};
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};

use crate::command::Command;
use crate::constants::{DIRECTORY_HEADER, NO_FILES};
use crate::protocol::{Frame, write_line};
use crate::transfer::{self, TransferOptions, TransferReport};
use crate::{Error, Result};

pub struct Client {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    notices: VecDeque<String>,
    opts: TransferOptions,
}

impl Client {
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(read_half),
            writer: write_half,
            notices: VecDeque::new(),
            opts: TransferOptions::default(),
        })
    }

    pub fn with_transfer_options(mut self, opts: TransferOptions) -> Self {
        self.opts = opts;
        self
    }

    /// Send a raw line and wait for the reply. Error replies become
    /// [`Error::Remote`].
    pub async fn send_line(&mut self, line: &str) -> Result<String> {
        write_line(&mut self.writer, line).await?;
        self.read_reply().await
    }

    pub async fn request(&mut self, command: &Command) -> Result<String> {
        self.send_line(&command.to_line()).await
    }

    async fn read_reply(&mut self) -> Result<String> {
        loop {
            match Frame::read_from(&mut self.reader).await? {
                Frame::Notice(text) => self.notices.push_back(text),
                Frame::Reply(text) => return Ok(text),
                Frame::Error(text) => return Err(Error::Remote(text)),
                other => {
                    return Err(Error::Protocol(format!("expected reply, got {other:?}")));
                }
            }
        }
    }

    pub async fn register(&mut self, handle: &str) -> Result<String> {
        self.request(&Command::Register {
            handle: handle.to_string(),
        })
        .await
    }

    pub async fn unicast(&mut self, target: &str, message: &str) -> Result<String> {
        self.request(&Command::Unicast {
            target: target.to_string(),
            message: message.to_string(),
        })
        .await
    }

    pub async fn broadcast(&mut self, message: &str) -> Result<String> {
        self.request(&Command::Broadcast {
            message: message.to_string(),
        })
        .await
    }

    pub async fn help(&mut self) -> Result<String> {
        self.request(&Command::Help).await
    }

    pub async fn shutdown(&mut self) -> Result<String> {
        self.request(&Command::Shutdown).await
    }

    /// Say goodbye. The server closes the connection after replying.
    pub async fn leave(mut self) -> Result<String> {
        self.request(&Command::Leave).await
    }

    /// Names of the files on the server.
    pub async fn dir(&mut self) -> Result<Vec<String>> {
        let listing = self.request(&Command::Dir).await?;
        let mut lines = listing.lines();
        if lines.next() != Some(DIRECTORY_HEADER) {
            return Err(Error::Protocol(format!("unexpected listing {listing:?}")));
        }
        Ok(lines
            .filter(|line| *line != NO_FILES)
            .map(str::to_string)
            .collect())
    }

    /// Upload `len` bytes from `source` as `name`.
    pub async fn store<S>(&mut self, name: &str, source: &mut S, len: u64) -> Result<String>
    where
        S: AsyncRead + Unpin,
    {
        let command = Command::Store {
            filename: name.to_string(),
        };
        write_line(&mut self.writer, &command.to_line()).await?;
        let report = transfer::send(
            &mut self.reader,
            &mut self.writer,
            source,
            len,
            &self.opts,
            Some(&mut self.notices),
        )
        .await?;
        debug!("Uploaded {name}: {} bytes", report.bytes);
        self.read_reply().await
    }

    pub async fn store_file(&mut self, name: &str, path: &Path) -> Result<String> {
        let mut file = File::open(path).await?;
        let len = file.metadata().await?.len();
        self.store(name, &mut file, len).await
    }

    /// Download `name` into `sink`.
    pub async fn get<D>(&mut self, name: &str, sink: &mut D) -> Result<TransferReport>
    where
        D: AsyncWrite + Unpin,
    {
        let command = Command::Get {
            filename: name.to_string(),
        };
        write_line(&mut self.writer, &command.to_line()).await?;

        loop {
            match Frame::read_from(&mut self.reader).await? {
                Frame::Notice(text) => self.notices.push_back(text),
                Frame::Error(text) => return Err(Error::Remote(text)),
                Frame::Size { len, mode } => {
                    return transfer::receive_body(
                        &mut self.reader,
                        &mut self.writer,
                        sink,
                        len,
                        mode,
                        &self.opts,
                    )
                    .await;
                }
                other => {
                    return Err(Error::Protocol(format!(
                        "expected transfer, got {other:?}"
                    )));
                }
            }
        }
    }

    /// Download `name` to `dest`. Nothing is left at `dest` if the transfer fails.
    pub async fn get_file(&mut self, name: &str, dest: &Path) -> Result<TransferReport> {
        let file_name = dest
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| name.to_string());
        let temp = dest.with_file_name(format!(".{file_name}.part"));

        let mut file = File::create(&temp).await?;
        match self.get(name, &mut file).await {
            Ok(report) => {
                drop(file);
                fs::rename(&temp, dest).await?;
                Ok(report)
            }
            Err(e) => {
                drop(file);
                let _ = fs::remove_file(&temp).await;
                Err(e)
            }
        }
    }

    /// Next message from another user, waiting for one if none is queued.
    pub async fn next_notice(&mut self) -> Result<String> {
        if let Some(text) = self.notices.pop_front() {
            return Ok(text);
        }
        match Frame::read_from(&mut self.reader).await? {
            Frame::Notice(text) => Ok(text),
            other => Err(Error::Protocol(format!("expected message, got {other:?}"))),
        }
    }

    /// Messages received so far, without waiting.
    pub fn take_notices(&mut self) -> Vec<String> {
        self.notices.drain(..).collect()
    }
}
