/*
 * Copyright 2017-2023 Ben Ashford
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

//! A multiplexed connection: one socket, many callers.
//!
//! The connection runs on its own thread as a set of cooperating tasks: a
//! writer that picks the next eligible query and pipelines it onto the
//! socket, a reader that matches decoded replies back to waiting callers,
//! and a connector that (re-)establishes the transport. Handles are cheap
//! to clone and submissions are safe from any thread; they are handed over
//! to the connection's executor in arrival order.
//!
//! Submissions come in two flavours. `fire_and_forget_*` enqueue the query
//! and return; the eventual reply is read off the wire and discarded.
//! `execute_*` return the reply (or replies) to the caller, or an error if
//! the transport failed with the query in flight.

pub(crate) mod event;

mod inner;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use futures_channel::{mpsc, oneshot};

use crate::client::builder::ConnectionBuilder;
use crate::error::{ConnectionReason, Error};
use crate::protocol::resp::{Queries, Query, Replies, RespValue};

pub use inner::Handshake;

use inner::WriteQueueItem;

/// The urgency classes a query can be submitted under.
///
/// The writer always transmits the oldest query of the most urgent
/// non-suppressed class first; within one class, queries leave in
/// submission order. Declaration order is urgency order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum QueryPriority {
    Heartbeat,
    Config,
    State,
    History,
    CheckResult,
}

impl QueryPriority {
    pub(crate) const COUNT: usize = 5;

    pub(crate) const ALL: [QueryPriority; QueryPriority::COUNT] = [
        QueryPriority::Heartbeat,
        QueryPriority::Config,
        QueryPriority::State,
        QueryPriority::History,
        QueryPriority::CheckResult,
    ];

    #[inline]
    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

/// Callback invoked on the connection's executor after every successful
/// connect (and authentication/database selection)
pub type ConnectedCallback = Box<dyn FnMut(&mut Handshake<'_>) + Send>;

pub(crate) enum Command {
    Submit {
        item: WriteQueueItem,
        priority: QueryPriority,
    },
    Suppress(QueryPriority),
    Unsuppress(QueryPriority),
}

pub(crate) struct ActorSetup {
    pub(crate) config: ConnectionConfig,
    pub(crate) connected_callback: Option<ConnectedCallback>,
    pub(crate) commands: mpsc::UnboundedReceiver<Command>,
    pub(crate) connected: Arc<AtomicBool>,
}

pub(crate) struct ConnectionConfig {
    pub(crate) host: String,
    pub(crate) port: u16,
    pub(crate) path: String,
    pub(crate) password: Option<String>,
    pub(crate) db: u32,
}

/// A handle onto one priority-aware, pipelining Redis connection.
///
/// Created by [`ConnectionBuilder::build`](../builder/struct.ConnectionBuilder.html#method.build).
#[derive(Clone)]
pub struct MultiplexedConnection {
    inner: Arc<ConnectionInner>,
}

struct ConnectionInner {
    commands: mpsc::UnboundedSender<Command>,
    connected: Arc<AtomicBool>,
    started: AtomicBool,
    setup: Mutex<Option<ActorSetup>>,
    actor_thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl MultiplexedConnection {
    pub(crate) fn new(builder: ConnectionBuilder) -> Self {
        let (tx, rx) = mpsc::unbounded();
        let connected = Arc::new(AtomicBool::new(false));
        let setup = ActorSetup {
            config: ConnectionConfig {
                host: builder.host,
                port: builder.port,
                path: builder.path,
                password: builder.password,
                db: builder.db,
            },
            connected_callback: builder.connected_callback,
            commands: rx,
            connected: connected.clone(),
        };
        MultiplexedConnection {
            inner: Arc::new(ConnectionInner {
                commands: tx,
                connected,
                started: AtomicBool::new(false),
                setup: Mutex::new(Some(setup)),
                actor_thread: Mutex::new(None),
            }),
        }
    }

    /// Spawn the connection's thread and arm the connector. Idempotent;
    /// only the first call has any effect.
    pub fn start(&self) {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let setup = self
            .inner
            .setup
            .lock()
            .expect("Lock is tainted")
            .take()
            .expect("Connection already started");
        let handle = thread::Builder::new()
            .name("redis-mux".into())
            .spawn(move || inner::run(setup))
            .expect("Cannot spawn connection thread");
        *self.inner.actor_thread.lock().expect("Lock is tainted") = Some(handle);
    }

    /// Whether a connection to the server is currently established
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// Queue a query for sending; its reply is read and discarded.
    ///
    /// Never fails: if the connection has been shut down, the loss is
    /// logged instead.
    pub fn fire_and_forget_query(&self, query: Query, priority: QueryPriority) {
        log::debug!("Firing and forgetting query:{}", render_query(&query));
        let item = WriteQueueItem::FireAndForget(query);
        if self.post(Command::Submit { item, priority }).is_err() {
            log::error!("Cannot queue fire-and-forget query, the connection is shut down");
        }
    }

    /// Queue a batch of queries for sending; all their replies are read
    /// and discarded. The batch is transmitted back-to-back, never
    /// interleaved with higher-priority traffic.
    pub fn fire_and_forget_queries(&self, queries: Queries, priority: QueryPriority) {
        for query in &queries {
            log::debug!("Firing and forgetting query:{}", render_query(query));
        }
        let item = WriteQueueItem::FireAndForgetMany(queries);
        if self.post(Command::Submit { item, priority }).is_err() {
            log::error!("Cannot queue fire-and-forget queries, the connection is shut down");
        }
    }

    /// Queue a query for sending and wait for its reply.
    ///
    /// An error reply from the server is a *successful* result, returned
    /// as [`RespValue::Error`](../../protocol/resp/enum.RespValue.html);
    /// `Err` is reserved for transport and protocol failures.
    pub async fn execute_query(
        &self,
        query: Query,
        priority: QueryPriority,
    ) -> Result<RespValue, Error> {
        log::debug!("Executing query:{}", render_query(&query));
        let (tx, rx) = oneshot::channel();
        let item = WriteQueueItem::Execute(query, tx);
        self.post(Command::Submit { item, priority })?;
        match rx.await {
            Ok(result) => result,
            Err(_) => Err(Error::Connection(ConnectionReason::ConnectionLost)),
        }
    }

    /// Queue a batch of queries for sending and wait for all their
    /// replies, delivered together in command order. An empty batch
    /// resolves to an empty vector without touching the socket.
    pub async fn execute_queries(
        &self,
        queries: Queries,
        priority: QueryPriority,
    ) -> Result<Replies, Error> {
        for query in &queries {
            log::debug!("Executing query:{}", render_query(query));
        }
        let (tx, rx) = oneshot::channel();
        let item = WriteQueueItem::ExecuteMany(queries, tx);
        self.post(Command::Submit { item, priority })?;
        match rx.await {
            Ok(result) => result,
            Err(_) => Err(Error::Connection(ConnectionReason::ConnectionLost)),
        }
    }

    /// Stop transmitting queries of the given priority. Submissions keep
    /// accumulating; they are sent once the priority is unsuppressed.
    pub fn suppress_query_kind(&self, kind: QueryPriority) {
        let _ = self.post(Command::Suppress(kind));
    }

    /// Resume transmitting queries of the given priority.
    pub fn unsuppress_query_kind(&self, kind: QueryPriority) {
        let _ = self.post(Command::Unsuppress(kind));
    }

    fn post(&self, command: Command) -> Result<(), Error> {
        self.inner
            .commands
            .unbounded_send(command)
            .map_err(|_| Error::Connection(ConnectionReason::NotConnected))
    }
}

impl Drop for ConnectionInner {
    fn drop(&mut self) {
        self.commands.close_channel();
        let handle = self.actor_thread.lock().ok().and_then(|mut h| h.take());
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

/// Render a query for the log, bounded in size: at most 7 arguments, each
/// shown with at most 64 characters.
pub(crate) fn render_query(query: &Query) -> String {
    let mut rendered = String::new();
    for (i, arg) in query.iter().enumerate() {
        if i == 7 {
            rendered.push_str(" ...");
            break;
        }
        let text = String::from_utf8_lossy(arg);
        if text.chars().count() > 64 {
            let head: String = text.chars().take(61).collect();
            rendered.push_str(&format!(" '{}...'", head));
        } else {
            rendered.push_str(&format!(" '{}'", text));
        }
    }
    rendered
}
