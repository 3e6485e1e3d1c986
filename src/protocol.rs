//! Wire framing.
//!
//! Clients send plain command lines. Everything else travels as a frame: one
//! ASCII header line, optionally followed by a body whose length the header
//! declares. Text frames carry their byte length so replies may span lines.
//!
//! ```text
//! OK <len>\n<body>        reply to the current command
//! ERR <len>\n<body>       rejected command, body starts with "Error: "
//! MSG <len>\n<body>       message delivered from another session
//! SIZE <n> <ack|stream>\n start of a file transfer
//! ACK <total>\n           bytes received so far
//! EOF [md5hex]\n          end of a file transfer
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::constants::{AckMode, MAX_LINE_LEN, tokens};
use crate::{Error, Result};

/// Largest text frame body accepted.
pub const MAX_TEXT_LEN: usize = 1 << 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Reply(String),
    Error(String),
    Notice(String),
    Size { len: u64, mode: AckMode },
    Ack(u64),
    Eof(Option<String>),
}

impl Frame {
    pub fn write_to<B: BufMut>(&self, buf: &mut B) {
        match self {
            Frame::Reply(text) => write_text(buf, tokens::REPLY, text),
            Frame::Error(text) => write_text(buf, tokens::ERROR, text),
            Frame::Notice(text) => write_text(buf, tokens::NOTICE, text),
            Frame::Size { len, mode } => {
                buf.put_slice(format!("{} {} {}\n", tokens::SIZE, len, mode.as_str()).as_bytes());
            }
            Frame::Ack(total) => {
                buf.put_slice(format!("{} {}\n", tokens::ACK, total).as_bytes());
            }
            Frame::Eof(Some(digest)) => {
                buf.put_slice(format!("{} {}\n", tokens::EOF, digest).as_bytes());
            }
            Frame::Eof(None) => {
                buf.put_slice(format!("{}\n", tokens::EOF).as_bytes());
            }
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.write_to(&mut buf);
        buf.freeze()
    }

    pub async fn read_from<R>(reader: &mut R) -> Result<Frame>
    where
        R: AsyncBufRead + Unpin,
    {
        let line = read_line(reader).await?.ok_or(Error::ConnectionClosed)?;
        let mut parts = line.split_ascii_whitespace();
        let keyword = parts
            .next()
            .ok_or_else(|| Error::Protocol("empty frame header".to_string()))?;

        match keyword {
            tokens::REPLY | tokens::ERROR | tokens::NOTICE => {
                let len = parse_number(parts.next(), keyword)? as usize;
                if len > MAX_TEXT_LEN {
                    return Err(Error::Protocol(format!("text frame of {len} bytes")));
                }
                let mut body = vec![0u8; len];
                reader.read_exact(&mut body).await?;
                let text = String::from_utf8(body)?;
                Ok(match keyword {
                    tokens::REPLY => Frame::Reply(text),
                    tokens::ERROR => Frame::Error(text),
                    _ => Frame::Notice(text),
                })
            }
            tokens::SIZE => {
                let len = parse_number(parts.next(), keyword)?;
                let mode = parts
                    .next()
                    .ok_or_else(|| Error::Protocol("size header without ack mode".to_string()))?;
                Ok(Frame::Size {
                    len,
                    mode: AckMode::parse(mode)?,
                })
            }
            tokens::ACK => Ok(Frame::Ack(parse_number(parts.next(), keyword)?)),
            tokens::EOF => Ok(Frame::Eof(parts.next().map(str::to_string))),
            other => Err(Error::Protocol(format!("unexpected frame {other:?}"))),
        }
    }

    /// Write the frame and flush.
    pub async fn send<W>(&self, writer: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        writer.write_all(&self.to_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }
}

fn write_text<B: BufMut>(buf: &mut B, keyword: &str, text: &str) {
    buf.put_slice(format!("{} {}\n", keyword, text.len()).as_bytes());
    buf.put_slice(text.as_bytes());
}

fn parse_number(field: Option<&str>, keyword: &str) -> Result<u64> {
    let field = field.ok_or_else(|| Error::Protocol(format!("{keyword} header without a length")))?;
    field
        .parse()
        .map_err(|_| Error::Protocol(format!("{keyword} header has invalid length {field:?}")))
}

/// Accumulates one inbound line across reads.
///
/// Partial input stays in the buffer when a read is cancelled, so
/// [`LineBuffer::read_line`] can sit in a `select!` without losing bytes.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    /// Read one newline-terminated line, without the terminator.
    ///
    /// Returns `None` when the peer closed the stream at a line boundary.
    /// A line cut short by end of stream is [`Error::ConnectionClosed`].
    pub async fn read_line<R>(&mut self, reader: &mut R) -> Result<Option<String>>
    where
        R: AsyncBufRead + Unpin,
    {
        let limit = MAX_LINE_LEN.saturating_sub(self.buf.len()) as u64;
        (&mut *reader)
            .take(limit)
            .read_until(b'\n', &mut self.buf)
            .await?;

        if self.buf.last() != Some(&b'\n') {
            let len = self.buf.len();
            self.buf.clear();
            return match len {
                0 => Ok(None),
                n if n >= MAX_LINE_LEN => Err(Error::LineTooLong(MAX_LINE_LEN)),
                _ => Err(Error::ConnectionClosed),
            };
        }

        let mut line = std::mem::take(&mut self.buf);
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Ok(Some(String::from_utf8(line)?))
    }
}

/// Read one line with a fresh buffer. Not for use inside `select!`.
pub async fn read_line<R>(reader: &mut R) -> Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    LineBuffer::default().read_line(reader).await
}

/// Write a client command line.
pub async fn write_line<W>(writer: &mut W, line: &str) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut buf = BytesMut::with_capacity(line.len() + 1);
    buf.put_slice(line.as_bytes());
    buf.put_u8(b'\n');
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}
