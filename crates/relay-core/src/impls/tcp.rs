//! TcpForwarder - one short-lived TCP connection per payload.
//!
//! Wire format: raw payload bytes followed by a single `\n`. No length prefix,
//! no response is read, the connection is closed right after the write.

use std::time::Duration;

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::domain::{ForwardError, ForwardResult};
use crate::ports::Forwarder;

#[derive(Debug, Clone)]
pub struct TcpForwarder {
    addr: String,
    connect_timeout: Duration,
    write_timeout: Option<Duration>,
}

impl TcpForwarder {
    /// `addr` is a `host:port` pair, resolved on every call.
    pub fn new(addr: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            connect_timeout,
            write_timeout: None,
        }
    }

    /// Bound the write (and close) of each frame. `None` leaves it unbounded.
    pub fn with_write_timeout(mut self, write_timeout: Option<Duration>) -> Self {
        self.write_timeout = write_timeout;
        self
    }

    async fn dial(&self) -> Result<TcpStream, ForwardError> {
        timeout(self.connect_timeout, async {
            TcpStream::connect(self.addr.as_str())
                .await
                .map_err(|source| ForwardError::Dial {
                    addr: self.addr.clone(),
                    source,
                })
        })
        .await
        .map_err(|_| ForwardError::DialTimeout {
            addr: self.addr.clone(),
            timeout: self.connect_timeout,
        })?
    }
}

/// Payload plus the trailing newline, in one buffer so the frame goes out in a
/// single write.
fn frame(payload: &[u8]) -> BytesMut {
    let mut buf = BytesMut::with_capacity(payload.len() + 1);
    buf.put_slice(payload);
    buf.put_u8(b'\n');
    buf
}

async fn write_frame(stream: &mut TcpStream, payload: &[u8]) -> std::io::Result<()> {
    stream.write_all(&frame(payload)).await?;
    stream.shutdown().await
}

#[async_trait]
impl Forwarder for TcpForwarder {
    async fn forward(&self, payload: &[u8]) -> ForwardResult {
        let mut stream = self.dial().await?;

        // The stream is dropped (and the socket closed) on every path below.
        let written = match self.write_timeout {
            Some(limit) => match timeout(limit, write_frame(&mut stream, payload)).await {
                Ok(result) => result,
                Err(_) => {
                    return Err(ForwardError::WriteTimeout {
                        addr: self.addr.clone(),
                        timeout: limit,
                    });
                }
            },
            None => write_frame(&mut stream, payload).await,
        };

        written.map_err(|source| ForwardError::Write {
            addr: self.addr.clone(),
            source,
        })
    }

    fn destination(&self) -> &str {
        &self.addr
    }
}
