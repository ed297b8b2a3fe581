/*
 * Copyright 2017-2023 Ben Ashford
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

use crate::client::multiplexed::{ConnectedCallback, Handshake, MultiplexedConnection};

/// Describes one Redis endpoint and how to log into it.
///
/// If a UNIX socket `path` is configured the TCP settings are ignored;
/// otherwise `host` and `port` are used. `AUTH` is issued when a password
/// is set, `SELECT` when the database index is non-zero, both before any
/// queued query is transmitted.
pub struct ConnectionBuilder {
    pub(crate) host: String,
    pub(crate) port: u16,
    pub(crate) path: String,
    pub(crate) password: Option<String>,
    pub(crate) db: u32,
    pub(crate) connected_callback: Option<ConnectedCallback>,
}

impl ConnectionBuilder {
    pub fn new(host: impl Into<String>) -> Self {
        ConnectionBuilder {
            host: host.into(),
            port: 6379,
            path: String::new(),
            password: None,
            db: 0,
            connected_callback: None,
        }
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Use a UNIX socket path instead of TCP. An empty path means TCP.
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn db(mut self, db: u32) -> Self {
        self.db = db;
        self
    }

    /// Register a callback that runs each time a connection is successfully
    /// established, after authentication and database selection but before
    /// any user query is transmitted. The callback runs on the connection's
    /// own executor and must not block; it is handed a
    /// [`Handshake`](multiplexed/struct.Handshake.html) through which it can
    /// queue hello/handshake queries ahead of regular traffic.
    pub fn on_connected(
        mut self,
        callback: impl FnMut(&mut Handshake<'_>) + Send + 'static,
    ) -> Self {
        self.connected_callback = Some(Box::new(callback));
        self
    }

    /// Create the connection handle. The connection is idle until
    /// [`start`](multiplexed/struct.MultiplexedConnection.html#method.start)
    /// is called; queries submitted before then are queued.
    pub fn build(self) -> MultiplexedConnection {
        MultiplexedConnection::new(self)
    }
}
