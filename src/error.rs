/*
 * Copyright 2017-2023 Ben Ashford
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

use std::{error, fmt, io};

use crate::protocol::resp::RespValue;

#[derive(Debug)]
pub enum Error {
    /// A non-specific internal error that prevented an operation from completing
    Internal(String),

    /// An IO error occurred
    IO(io::Error),

    /// A RESP parsing/serialising error occurred
    Resp(String),

    /// A remote error was returned while establishing a connection.
    ///
    /// Error replies to ordinary queries are *not* reported through this
    /// variant; they are delivered to the caller as
    /// [`RespValue::Error`](../protocol/resp/enum.RespValue.html) values.
    Remote(String),

    /// The connection is unavailable
    Connection(ConnectionReason),

    /// The stream closed while replies were still outstanding
    EndOfStream,
}

/// Details of connection-state errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionReason {
    /// The connection has been shut down and accepts no further queries
    NotConnected,
    /// The connection was lost with this operation in flight
    ConnectionLost,
}

pub(crate) fn resp(msg: &str, value: RespValue) -> Error {
    Error::Resp(format!("{}: {:?}", msg, value))
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::IO(err)
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::IO(err) => Some(err),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Internal(s) => write!(f, "{}", s),
            Error::IO(err) => write!(f, "{}", err),
            Error::Resp(s) => write!(f, "{}", s),
            Error::Remote(s) => write!(f, "{}", s),
            Error::Connection(reason) => write!(f, "{}", reason),
            Error::EndOfStream => write!(f, "end of stream"),
        }
    }
}

impl fmt::Display for ConnectionReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConnectionReason::NotConnected => write!(f, "not connected"),
            ConnectionReason::ConnectionLost => write!(f, "connection lost"),
        }
    }
}
