/*
 * Copyright 2017-2023 Ben Ashford
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

//! The transport under the connection: either a TCP stream (host and port,
//! DNS-resolved) or a UNIX-domain socket (filesystem path). Which one is
//! used is decided once, at connect time; everything above sees a plain
//! byte stream split into independently-owned read and write halves.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{tcp, TcpStream};
#[cfg(unix)]
use tokio::net::{unix, UnixStream};

use tokio_util::codec::{FramedRead, FramedWrite};

use crate::error::Error;
use crate::protocol::RespCodec;

pub(crate) enum RedisStream {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

pub(crate) enum StreamReadHalf {
    Tcp(tcp::OwnedReadHalf),
    #[cfg(unix)]
    Unix(unix::OwnedReadHalf),
}

pub(crate) enum StreamWriteHalf {
    Tcp(tcp::OwnedWriteHalf),
    #[cfg(unix)]
    Unix(unix::OwnedWriteHalf),
}

/// The decoded-reply side of a connection
pub(crate) type RespReader = FramedRead<StreamReadHalf, RespCodec>;

/// The query-encoding side of a connection
pub(crate) type RespWriter = FramedWrite<StreamWriteHalf, RespCodec>;

impl RedisStream {
    pub(crate) async fn connect_tcp(host: &str, port: u16) -> Result<RedisStream, Error> {
        let stream = TcpStream::connect((host, port)).await?;
        Ok(RedisStream::Tcp(stream))
    }

    #[cfg(unix)]
    pub(crate) async fn connect_unix(path: &str) -> Result<RedisStream, Error> {
        let stream = UnixStream::connect(path).await?;
        Ok(RedisStream::Unix(stream))
    }

    #[cfg(not(unix))]
    pub(crate) async fn connect_unix(path: &str) -> Result<RedisStream, Error> {
        Err(Error::Internal(format!(
            "Cannot connect to '{}': UNIX socket paths are not supported on this platform",
            path
        )))
    }

    pub(crate) fn into_framed(self) -> (RespReader, RespWriter) {
        let (read_half, write_half) = match self {
            RedisStream::Tcp(stream) => {
                let (r, w) = stream.into_split();
                (StreamReadHalf::Tcp(r), StreamWriteHalf::Tcp(w))
            }
            #[cfg(unix)]
            RedisStream::Unix(stream) => {
                let (r, w) = stream.into_split();
                (StreamReadHalf::Unix(r), StreamWriteHalf::Unix(w))
            }
        };
        (
            FramedRead::new(read_half, RespCodec),
            FramedWrite::new(write_half, RespCodec),
        )
    }
}

impl AsyncRead for StreamReadHalf {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            StreamReadHalf::Tcp(stream) => Pin::new(stream).poll_read(cx, buf),
            #[cfg(unix)]
            StreamReadHalf::Unix(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for StreamWriteHalf {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            StreamWriteHalf::Tcp(stream) => Pin::new(stream).poll_write(cx, buf),
            #[cfg(unix)]
            StreamWriteHalf::Unix(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            StreamWriteHalf::Tcp(stream) => Pin::new(stream).poll_flush(cx),
            #[cfg(unix)]
            StreamWriteHalf::Unix(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            StreamWriteHalf::Tcp(stream) => Pin::new(stream).poll_shutdown(cx),
            #[cfg(unix)]
            StreamWriteHalf::Unix(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}
