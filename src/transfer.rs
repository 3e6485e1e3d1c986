//! Chunked file transfer, used in both directions.
//!
//! A transfer is a `SIZE` header, exactly that many raw bytes, and an `EOF`
//! terminator carrying the MD5 digest of the payload. The declared size is the
//! only stop condition for the data phase; the terminator is validated after
//! it. In [`AckMode::Ack`] the receiver answers every read with the cumulative
//! byte count and the sender waits for its chunk to be covered before writing
//! the next one.

use std::collections::VecDeque;
use std::future::Future;
use std::time::Duration;

use log::debug;
use tokio::io::{AsyncBufRead, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::constants::{AckMode, CHUNK_SIZE};
use crate::protocol::Frame;
use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct TransferOptions {
    /// Acknowledgement mode announced when sending.
    pub mode: AckMode,
    /// Compare the received digest against the one in the terminator.
    pub verify_digest: bool,
    /// Limit on any single wait for the peer.
    pub timeout: Duration,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            mode: AckMode::Ack,
            verify_digest: true,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Outcome of a completed transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReport {
    pub bytes: u64,
    pub digest: String,
}

pub fn digest_hex(data: &[u8]) -> String {
    format!("{:x}", md5::compute(data))
}

async fn timed<T>(limit: Duration, fut: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| Error::Timeout)?
}

/// Send `len` bytes from `source`.
///
/// `reader` is the inbound half of the same connection, needed for
/// acknowledgements. A client may see messages from other users queued ahead
/// of the first acknowledgement; those go to `notices`, and without a place to
/// put them they are a protocol error. Once the header is out the peer expects
/// exactly `len` bytes, so a source that comes up short fails with an I/O error
/// and the connection has to be dropped.
pub async fn send<R, W, S>(
    reader: &mut R,
    writer: &mut W,
    source: &mut S,
    len: u64,
    opts: &TransferOptions,
    mut notices: Option<&mut VecDeque<String>>,
) -> Result<TransferReport>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
    S: AsyncRead + Unpin,
{
    Frame::Size {
        len,
        mode: opts.mode,
    }
    .send(writer)
    .await?;

    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut ctx = md5::Context::new();
    let mut sent: u64 = 0;

    while sent < len {
        let n = (len - sent).min(CHUNK_SIZE as u64) as usize;
        source.read_exact(&mut buf[..n]).await?;
        writer.write_all(&buf[..n]).await?;
        ctx.consume(&buf[..n]);
        sent += n as u64;

        if opts.mode == AckMode::Ack {
            writer.flush().await?;
            wait_for_ack(reader, sent, opts.timeout, notices.as_deref_mut()).await?;
        }
    }

    let digest = format!("{:x}", ctx.compute());
    Frame::Eof(Some(digest.clone())).send(writer).await?;
    debug!("Sent {sent} bytes, digest {digest}");

    Ok(TransferReport {
        bytes: sent,
        digest,
    })
}

async fn wait_for_ack<R>(
    reader: &mut R,
    sent: u64,
    limit: Duration,
    mut notices: Option<&mut VecDeque<String>>,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        match timed(limit, Frame::read_from(reader)).await? {
            Frame::Notice(text) if notices.is_some() => {
                if let Some(queue) = notices.as_deref_mut() {
                    queue.push_back(text);
                }
            }
            Frame::Ack(total) if total == sent => return Ok(()),
            Frame::Ack(total) if total < sent => continue,
            Frame::Ack(total) => {
                return Err(Error::Protocol(format!(
                    "acknowledged {total} bytes but only {sent} were sent"
                )));
            }
            other => {
                return Err(Error::Protocol(format!(
                    "expected acknowledgement, got {other:?}"
                )));
            }
        }
    }
}

/// Receive a whole transfer, header included, into `sink`.
pub async fn receive<R, W, D>(
    reader: &mut R,
    writer: &mut W,
    sink: &mut D,
    opts: &TransferOptions,
) -> Result<TransferReport>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
    D: AsyncWrite + Unpin,
{
    match timed(opts.timeout, Frame::read_from(reader)).await? {
        Frame::Size { len, mode } => receive_body(reader, writer, sink, len, mode, opts).await,
        other => Err(Error::Protocol(format!(
            "expected size header, got {other:?}"
        ))),
    }
}

/// Receive the data and terminator of a transfer whose header was already read.
///
/// A failing sink does not stop the data phase: the remaining bytes are still
/// read and acknowledged so the connection stays aligned, and the storage
/// error is returned at the end.
pub async fn receive_body<R, W, D>(
    reader: &mut R,
    writer: &mut W,
    sink: &mut D,
    len: u64,
    mode: AckMode,
    opts: &TransferOptions,
) -> Result<TransferReport>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
    D: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut ctx = md5::Context::new();
    let mut received: u64 = 0;
    let mut sink_error = None;

    while received < len {
        let want = (len - received).min(buf.len() as u64) as usize;
        let n = timed(opts.timeout, async {
            reader.read(&mut buf[..want]).await.map_err(Error::from)
        })
        .await?;
        if n == 0 {
            return Err(Error::SizeMismatch {
                expected: len,
                received,
            });
        }

        if sink_error.is_none() {
            if let Err(e) = sink.write_all(&buf[..n]).await {
                sink_error = Some(e);
            }
        }
        ctx.consume(&buf[..n]);
        received += n as u64;

        if mode == AckMode::Ack {
            Frame::Ack(received).send(writer).await?;
        }
    }

    let expected = match timed(opts.timeout, Frame::read_from(reader)).await {
        Ok(Frame::Eof(digest)) => digest,
        Ok(other) => {
            return Err(Error::Protocol(format!(
                "expected transfer terminator, got {other:?}"
            )));
        }
        Err(Error::ConnectionClosed) => {
            return Err(Error::Protocol("transfer terminator missing".to_string()));
        }
        Err(e) => return Err(e),
    };

    if let Some(e) = sink_error {
        return Err(Error::Storage(e));
    }
    sink.flush().await.map_err(Error::Storage)?;

    let digest = format!("{:x}", ctx.compute());
    if opts.verify_digest {
        if let Some(expected) = expected {
            if !expected.eq_ignore_ascii_case(&digest) {
                return Err(Error::Integrity {
                    expected,
                    actual: digest,
                });
            }
        }
    }
    debug!("Received {received} bytes, digest {digest}");

    Ok(TransferReport {
        bytes: received,
        digest,
    })
}
