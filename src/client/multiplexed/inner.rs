/*
 * Copyright 2017-2023 Ben Ashford
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

//! The tasks behind a `MultiplexedConnection`.
//!
//! Everything here runs on one current-thread executor owned by the
//! connection's thread: a pump that applies submissions posted by caller
//! threads, the write loop, the read loop, and the connector. They only
//! interleave at await points, so the shared state lives in plain
//! `RefCell`s rather than behind locks.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_channel::{mpsc, oneshot};
use futures_util::{Sink, SinkExt, Stream, StreamExt};

use tokio::task::{spawn_local, LocalSet};
use tokio::time::sleep;

use crate::client::connect::{RedisStream, RespReader, RespWriter};
use crate::error::{ConnectionReason, Error};
use crate::protocol::resp::{FromResp, Queries, Query, Replies, RespValue};
use crate::query;

use super::event::Event;
use super::{
    render_query, ActorSetup, Command, ConnectedCallback, ConnectionConfig, QueryPriority,
};

const RETRY_INTERVAL: Duration = Duration::from_secs(5);

pub(crate) type ReplySender = oneshot::Sender<Result<RespValue, Error>>;
pub(crate) type RepliesSender = oneshot::Sender<Result<Replies, Error>>;

/// One submission, in one of its four shapes
pub(crate) enum WriteQueueItem {
    FireAndForget(Query),
    FireAndForgetMany(Queries),
    Execute(Query, ReplySender),
    ExecuteMany(Queries, RepliesSender),
}

/// How the next `amount` decoded replies are to be routed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResponseAction {
    /// Read and discard
    Ignore,
    /// Each reply goes to the next single-reply waiter
    Deliver,
    /// All `amount` replies are collected for the next batch waiter
    DeliverBulk,
}

#[derive(Debug)]
struct FutureResponseAction {
    amount: usize,
    action: ResponseAction,
}

struct Queues {
    writes: [VecDeque<WriteQueueItem>; QueryPriority::COUNT],
    response_actions: VecDeque<FutureResponseAction>,
    reply_senders: VecDeque<ReplySender>,
    replies_senders: VecDeque<RepliesSender>,
}

impl Queues {
    fn new() -> Self {
        Queues {
            writes: Default::default(),
            response_actions: VecDeque::new(),
            reply_senders: VecDeque::new(),
            replies_senders: VecDeque::new(),
        }
    }
}

struct Shared {
    config: ConnectionConfig,
    connected: Arc<AtomicBool>,
    queues: RefCell<Queues>,
    suppressed: RefCell<[bool; QueryPriority::COUNT]>,
    queued_writes: Event,
    queued_reads: Event,
    connected_event: Event,
    connecting: Cell<bool>,
    shutdown: Cell<bool>,
    /// Bumped on every (re)connect and teardown; a task whose captured
    /// value no longer matches must abandon its session instead of
    /// touching the plan.
    epoch: Cell<u64>,
    reader: RefCell<Option<RespReader>>,
    writer: RefCell<Option<RespWriter>>,
    connected_callback: RefCell<Option<ConnectedCallback>>,
}

/// Submission surface handed to the on-connected callback. Queries queued
/// through it land before any query is transmitted on the new connection.
pub struct Handshake<'a> {
    shared: &'a Shared,
}

impl Handshake<'_> {
    pub fn fire_and_forget_query(&mut self, query: Query, priority: QueryPriority) {
        log::debug!("Firing and forgetting query:{}", render_query(&query));
        self.shared
            .enqueue(WriteQueueItem::FireAndForget(query), priority);
    }

    pub fn fire_and_forget_queries(&mut self, queries: Queries, priority: QueryPriority) {
        for query in &queries {
            log::debug!("Firing and forgetting query:{}", render_query(query));
        }
        self.shared
            .enqueue(WriteQueueItem::FireAndForgetMany(queries), priority);
    }
}

impl Shared {
    fn new(
        config: ConnectionConfig,
        connected: Arc<AtomicBool>,
        connected_callback: Option<ConnectedCallback>,
    ) -> Self {
        Shared {
            config,
            connected,
            queues: RefCell::new(Queues::new()),
            suppressed: RefCell::new([false; QueryPriority::COUNT]),
            queued_writes: Event::new(),
            queued_reads: Event::new(),
            connected_event: Event::new(),
            connecting: Cell::new(false),
            shutdown: Cell::new(false),
            epoch: Cell::new(0),
            reader: RefCell::new(None),
            writer: RefCell::new(None),
            connected_callback: RefCell::new(connected_callback),
        }
    }

    fn enqueue(&self, item: WriteQueueItem, priority: QueryPriority) {
        self.queues.borrow_mut().writes[priority.index()].push_back(item);
        self.queued_writes.set();
    }

    /// The front item of the most urgent non-suppressed, non-empty queue
    fn next_write_item(&self) -> Option<WriteQueueItem> {
        let suppressed = self.suppressed.borrow();
        let mut queues = self.queues.borrow_mut();
        for kind in QueryPriority::ALL {
            if suppressed[kind.index()] {
                continue;
            }
            if let Some(item) = queues.writes[kind.index()].pop_front() {
                return Some(item);
            }
        }
        None
    }

    /// Append to the response plan, extending the trailing record when the
    /// kinds match. `DeliverBulk` records are one-per-batch and never merge.
    fn record_response_actions(&self, amount: usize, action: ResponseAction) {
        let mut queues = self.queues.borrow_mut();
        match queues.response_actions.back_mut() {
            Some(last) if last.action == action && action != ResponseAction::DeliverBulk => {
                last.amount += amount;
            }
            _ => queues
                .response_actions
                .push_back(FutureResponseAction { amount, action }),
        }
    }

    fn pipeline_reset(&self, epoch: u64) -> bool {
        self.shutdown.get() || self.epoch.get() != epoch
    }

    /// Fail every in-flight waiter and drop the response plan
    fn fail_pending(&self, reason: ConnectionReason) {
        let mut queues = self.queues.borrow_mut();
        queues.response_actions.clear();
        for sender in queues.reply_senders.drain(..) {
            let _ = sender.send(Err(Error::Connection(reason)));
        }
        for sender in queues.replies_senders.drain(..) {
            let _ = sender.send(Err(Error::Connection(reason)));
        }
    }

    /// Tear down the pipeline after a transport fault and re-arm the
    /// connector. In-flight waiters are failed; queued-but-unsent items are
    /// kept for transmission once reconnected. A no-op if the fault belongs
    /// to an already-replaced connection.
    fn handle_disconnect(self: &Rc<Self>, epoch: u64) {
        if self.pipeline_reset(epoch) {
            return;
        }
        self.epoch.set(epoch + 1);
        self.connected.store(false, Ordering::SeqCst);
        self.connected_event.clear();
        self.reader.borrow_mut().take();
        self.writer.borrow_mut().take();
        self.fail_pending(ConnectionReason::ConnectionLost);
        self.queued_writes.set();
        self.queued_reads.set();
        if !self.connecting.replace(true) {
            spawn_local(connect(self.clone()));
        }
    }

    fn begin_shutdown(&self) {
        self.shutdown.set(true);
        self.connected.store(false, Ordering::SeqCst);
        self.reader.borrow_mut().take();
        self.writer.borrow_mut().take();
        {
            let mut queues = self.queues.borrow_mut();
            for queue in &mut queues.writes {
                for item in queue.drain(..) {
                    match item {
                        WriteQueueItem::Execute(_, sender) => {
                            let _ = sender
                                .send(Err(Error::Connection(ConnectionReason::ConnectionLost)));
                        }
                        WriteQueueItem::ExecuteMany(_, sender) => {
                            let _ = sender
                                .send(Err(Error::Connection(ConnectionReason::ConnectionLost)));
                        }
                        _ => (),
                    }
                }
            }
        }
        self.fail_pending(ConnectionReason::ConnectionLost);
        self.connected_event.set();
        self.queued_writes.set();
        self.queued_reads.set();
    }
}

/// Entry point of the connection's thread
pub(crate) fn run(setup: ActorSetup) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_io()
        .enable_time()
        .build()
        .expect("Cannot build connection runtime");
    let local = LocalSet::new();

    let shared = Rc::new(Shared::new(
        setup.config,
        setup.connected,
        setup.connected_callback,
    ));
    local.spawn_local(write_loop(shared.clone()));
    local.spawn_local(read_loop(shared.clone()));
    shared.connecting.set(true);
    local.spawn_local(connect(shared.clone()));

    runtime.block_on(local.run_until(command_loop(shared, setup.commands)));
}

/// Apply submissions posted by caller threads, in arrival order. Ends when
/// the last handle is dropped, taking the whole connection down with it.
async fn command_loop(shared: Rc<Shared>, mut commands: mpsc::UnboundedReceiver<Command>) {
    while let Some(command) = commands.next().await {
        match command {
            Command::Submit { item, priority } => shared.enqueue(item, priority),
            Command::Suppress(kind) => {
                shared.suppressed.borrow_mut()[kind.index()] = true;
            }
            Command::Unsuppress(kind) => {
                shared.suppressed.borrow_mut()[kind.index()] = false;
                shared.queued_writes.set();
            }
        }
    }
    shared.begin_shutdown();
}

/// Dial the endpoint until a connection is established, then publish it and
/// exit. Re-spawned after every disconnect.
async fn connect(shared: Rc<Shared>) {
    loop {
        if shared.shutdown.get() {
            break;
        }
        match try_connect(&shared).await {
            Ok((reader, writer)) => {
                *shared.reader.borrow_mut() = Some(reader);
                *shared.writer.borrow_mut() = Some(writer);
                shared.epoch.set(shared.epoch.get() + 1);
                shared.connected.store(true, Ordering::SeqCst);
                log::info!("Connected to Redis server");
                shared.connected_event.set();
                shared.queued_writes.set();

                let callback = shared.connected_callback.borrow_mut().take();
                if let Some(mut callback) = callback {
                    callback(&mut Handshake { shared: &*shared });
                    *shared.connected_callback.borrow_mut() = Some(callback);
                }
                break;
            }
            Err(e) => {
                if shared.config.path.is_empty() {
                    log::error!(
                        "Cannot connect to {}:{}: {}",
                        shared.config.host,
                        shared.config.port,
                        e
                    );
                } else {
                    log::error!("Cannot connect to {}: {}", shared.config.path, e);
                }
                sleep(RETRY_INTERVAL).await;
            }
        }
    }
    shared.connecting.set(false);
}

async fn try_connect(shared: &Rc<Shared>) -> Result<(RespReader, RespWriter), Error> {
    let stream = if shared.config.path.is_empty() {
        log::info!(
            "Trying to connect to Redis server on host '{}:{}'",
            shared.config.host,
            shared.config.port
        );
        RedisStream::connect_tcp(&shared.config.host, shared.config.port).await?
    } else {
        log::info!(
            "Trying to connect to Redis server on unix socket path '{}'",
            shared.config.path
        );
        RedisStream::connect_unix(&shared.config.path).await?
    };

    let (mut reader, mut writer) = stream.into_framed();

    if let Some(password) = &shared.config.password {
        setup_query(&mut reader, &mut writer, query!["AUTH", password.as_str()]).await?;
    }
    if shared.config.db != 0 {
        setup_query(&mut reader, &mut writer, query!["SELECT", shared.config.db]).await?;
    }

    Ok((reader, writer))
}

/// Run one query on a fresh connection, ahead of all user traffic, and
/// require an `OK`. An error reply is fatal for this connection attempt.
async fn setup_query(
    reader: &mut RespReader,
    writer: &mut RespWriter,
    query: Query,
) -> Result<(), Error> {
    writer.send(query).await?;
    match reader.next().await {
        Some(Ok(reply)) => <()>::from_resp(reply),
        Some(Err(e)) => Err(e),
        None => Err(Error::EndOfStream),
    }
}

/// Transmit queued items, most urgent priority first, one item per scan so
/// urgent submissions pre-empt between items but never mid-item
async fn write_loop(shared: Rc<Shared>) {
    loop {
        shared.connected_event.wait().await;
        if shared.shutdown.get() {
            return;
        }
        let writer = shared.writer.borrow_mut().take();
        let mut writer = match writer {
            Some(writer) => writer,
            None => {
                tokio::task::yield_now().await;
                continue;
            }
        };
        let epoch = shared.epoch.get();

        'session: loop {
            shared.queued_writes.wait().await;
            if shared.shutdown.get() {
                return;
            }
            if shared.pipeline_reset(epoch) {
                break 'session;
            }
            while let Some(item) = shared.next_write_item() {
                if write_item(&shared, &mut writer, item, epoch).await.is_err() {
                    shared.handle_disconnect(epoch);
                    break 'session;
                }
            }
            if shared.pipeline_reset(epoch) {
                break 'session;
            }
            shared.queued_writes.clear();
        }
    }
}

/// Send one item and record how its replies are to be routed. `Err` means
/// the pipeline is broken and the session must end; the item itself has
/// already been logged or failed as its shape requires.
async fn write_item<W>(
    shared: &Rc<Shared>,
    writer: &mut W,
    item: WriteQueueItem,
    epoch: u64,
) -> Result<(), ()>
where
    W: Sink<Query, Error = Error> + Unpin,
{
    match item {
        WriteQueueItem::FireAndForget(query) => {
            let logged = query.clone();
            if let Err(e) = writer.send(query).await {
                log::error!(
                    "Error during sending query{} which has been fired and forgotten: {}",
                    render_query(&logged),
                    e
                );
                return Err(());
            }
            if shared.pipeline_reset(epoch) {
                return Err(());
            }
            shared.record_response_actions(1, ResponseAction::Ignore);
            shared.queued_reads.set();
        }
        WriteQueueItem::FireAndForgetMany(queries) => {
            if queries.is_empty() {
                return Ok(());
            }
            for query in &queries {
                if let Err(e) = writer.send(query.clone()).await {
                    log::error!(
                        "Error during sending query{} which has been fired and forgotten: {}",
                        render_query(query),
                        e
                    );
                    return Err(());
                }
                if shared.pipeline_reset(epoch) {
                    return Err(());
                }
            }
            shared.record_response_actions(queries.len(), ResponseAction::Ignore);
            shared.queued_reads.set();
        }
        WriteQueueItem::Execute(query, sender) => {
            if let Err(e) = writer.send(query).await {
                let _ = sender.send(Err(e));
                return Err(());
            }
            if shared.pipeline_reset(epoch) {
                let _ = sender.send(Err(Error::Connection(ConnectionReason::ConnectionLost)));
                return Err(());
            }
            shared.queues.borrow_mut().reply_senders.push_back(sender);
            shared.record_response_actions(1, ResponseAction::Deliver);
            shared.queued_reads.set();
        }
        WriteQueueItem::ExecuteMany(queries, sender) => {
            if queries.is_empty() {
                let _ = sender.send(Ok(Vec::new()));
                return Ok(());
            }
            for query in &queries {
                if let Err(e) = writer.send(query.clone()).await {
                    let _ = sender.send(Err(e));
                    return Err(());
                }
                if shared.pipeline_reset(epoch) {
                    let _ =
                        sender.send(Err(Error::Connection(ConnectionReason::ConnectionLost)));
                    return Err(());
                }
            }
            let amount = queries.len();
            shared.queues.borrow_mut().replies_senders.push_back(sender);
            shared.record_response_actions(amount, ResponseAction::DeliverBulk);
            shared.queued_reads.set();
        }
    }
    Ok(())
}

/// Consume the response plan: decode replies and route each to its waiter,
/// the log, or the void
async fn read_loop(shared: Rc<Shared>) {
    loop {
        shared.connected_event.wait().await;
        if shared.shutdown.get() {
            return;
        }
        let reader = shared.reader.borrow_mut().take();
        let mut reader = match reader {
            Some(reader) => reader,
            None => {
                tokio::task::yield_now().await;
                continue;
            }
        };
        let epoch = shared.epoch.get();

        'session: loop {
            shared.queued_reads.wait().await;
            if shared.shutdown.get() {
                return;
            }
            if shared.pipeline_reset(epoch) {
                break 'session;
            }
            loop {
                let action = shared.queues.borrow_mut().response_actions.pop_front();
                let Some(action) = action else { break };
                if run_response_action(&shared, &mut reader, action, epoch)
                    .await
                    .is_err()
                {
                    shared.handle_disconnect(epoch);
                    break 'session;
                }
            }
            if shared.pipeline_reset(epoch) {
                break 'session;
            }
            shared.queued_reads.clear();
        }
    }
}

/// Route the replies one plan record accounts for. `Err` means the session
/// must end and the connection be re-established. Every read failure is
/// fatal: transport errors for the obvious reason, decode errors because
/// the stream cannot be re-synchronised past one. A decode error is still
/// delivered to the waiter it robbed of a reply (or logged, when nobody
/// waits) before the pipeline goes down.
async fn run_response_action<R>(
    shared: &Rc<Shared>,
    reader: &mut R,
    action: FutureResponseAction,
    epoch: u64,
) -> Result<(), ()>
where
    R: Stream<Item = Result<RespValue, Error>> + Unpin,
{
    match action.action {
        ResponseAction::Ignore => {
            for _ in 0..action.amount {
                match read_reply(reader).await {
                    Ok(_) => (),
                    Err(e) => {
                        log::error!(
                            "Error during receiving the response to a query which has been \
                             fired and forgotten: {}",
                            e
                        );
                        return Err(());
                    }
                }
                if shared.pipeline_reset(epoch) {
                    return Err(());
                }
            }
        }
        ResponseAction::Deliver => {
            for _ in 0..action.amount {
                let sender = shared.queues.borrow_mut().reply_senders.pop_front();
                let Some(sender) = sender else { return Err(()) };
                match read_reply(reader).await {
                    Ok(reply) => {
                        let _ = sender.send(Ok(reply));
                    }
                    Err(e) => {
                        let _ = sender.send(Err(e));
                        return Err(());
                    }
                }
                if shared.pipeline_reset(epoch) {
                    return Err(());
                }
            }
        }
        ResponseAction::DeliverBulk => {
            let sender = shared.queues.borrow_mut().replies_senders.pop_front();
            let Some(sender) = sender else { return Err(()) };
            let mut replies = Replies::with_capacity(action.amount);
            for _ in 0..action.amount {
                match read_reply(reader).await {
                    Ok(reply) => replies.push(reply),
                    Err(e) => {
                        let _ = sender.send(Err(e));
                        return Err(());
                    }
                }
                if shared.pipeline_reset(epoch) {
                    return Err(());
                }
            }
            let _ = sender.send(Ok(replies));
        }
    }
    Ok(())
}

async fn read_reply<R>(reader: &mut R) -> Result<RespValue, Error>
where
    R: Stream<Item = Result<RespValue, Error>> + Unpin,
{
    match reader.next().await {
        Some(result) => result,
        None => Err(Error::EndOfStream),
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::io;
    use std::pin::Pin;
    use std::rc::Rc;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;
    use std::task::{Context, Poll};

    use futures_channel::oneshot;
    use futures_util::{stream, Sink};

    use crate::error::Error;
    use crate::protocol::resp::{Query, RespValue};
    use crate::query;

    use super::super::{ConnectionConfig, QueryPriority};
    use super::{
        run_response_action, write_item, FutureResponseAction, ResponseAction, Shared,
        WriteQueueItem,
    };

    fn test_shared() -> Rc<Shared> {
        Rc::new(Shared::new(
            ConnectionConfig {
                host: "127.0.0.1".into(),
                port: 6379,
                path: String::new(),
                password: None,
                db: 0,
            },
            Arc::new(AtomicBool::new(false)),
            None,
        ))
    }

    fn plan(shared: &Shared) -> Vec<(usize, ResponseAction)> {
        shared
            .queues
            .borrow()
            .response_actions
            .iter()
            .map(|a| (a.amount, a.action))
            .collect()
    }

    struct CollectSink {
        sent: Rc<RefCell<Vec<Query>>>,
        fail_after: usize,
    }

    impl CollectSink {
        fn new() -> (Self, Rc<RefCell<Vec<Query>>>) {
            let sent = Rc::new(RefCell::new(Vec::new()));
            (
                CollectSink {
                    sent: sent.clone(),
                    fail_after: usize::MAX,
                },
                sent,
            )
        }

        fn failing_after(n: usize) -> (Self, Rc<RefCell<Vec<Query>>>) {
            let (mut sink, sent) = Self::new();
            sink.fail_after = n;
            (sink, sent)
        }
    }

    impl Sink<Query> for CollectSink {
        type Error = Error;

        fn poll_ready(self: Pin<&mut Self>, _: &mut Context) -> Poll<Result<(), Error>> {
            Poll::Ready(Ok(()))
        }

        fn start_send(self: Pin<&mut Self>, item: Query) -> Result<(), Error> {
            let this = self.get_mut();
            if this.sent.borrow().len() >= this.fail_after {
                return Err(Error::IO(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "sink broken",
                )));
            }
            this.sent.borrow_mut().push(item);
            Ok(())
        }

        fn poll_flush(self: Pin<&mut Self>, _: &mut Context) -> Poll<Result<(), Error>> {
            Poll::Ready(Ok(()))
        }

        fn poll_close(self: Pin<&mut Self>, _: &mut Context) -> Poll<Result<(), Error>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn fire_and_forget_coalesces_into_trailing_ignore() {
        let shared = test_shared();
        let (mut sink, sent) = CollectSink::new();

        for _ in 0..3 {
            let item = WriteQueueItem::FireAndForget(query!["PING"]);
            write_item(&shared, &mut sink, item, 0).await.unwrap();
        }
        let item = WriteQueueItem::FireAndForgetMany(vec![query!["PING"], query!["PING"]]);
        write_item(&shared, &mut sink, item, 0).await.unwrap();

        assert_eq!(sent.borrow().len(), 5);
        assert_eq!(plan(&shared), vec![(5, ResponseAction::Ignore)]);
    }

    #[tokio::test]
    async fn deliver_coalesces_but_bulk_does_not() {
        let shared = test_shared();
        let (mut sink, _) = CollectSink::new();

        let (tx, _rx1) = oneshot::channel();
        write_item(&shared, &mut sink, WriteQueueItem::Execute(query!["GET", "a"], tx), 0)
            .await
            .unwrap();
        let (tx, _rx2) = oneshot::channel();
        write_item(&shared, &mut sink, WriteQueueItem::Execute(query!["GET", "b"], tx), 0)
            .await
            .unwrap();
        let (tx, _rx3) = oneshot::channel();
        write_item(
            &shared,
            &mut sink,
            WriteQueueItem::ExecuteMany(vec![query!["GET", "c"], query!["GET", "d"]], tx),
            0,
        )
        .await
        .unwrap();
        let (tx, _rx4) = oneshot::channel();
        write_item(
            &shared,
            &mut sink,
            WriteQueueItem::ExecuteMany(vec![query!["GET", "e"]], tx),
            0,
        )
        .await
        .unwrap();

        assert_eq!(
            plan(&shared),
            vec![
                (2, ResponseAction::Deliver),
                (2, ResponseAction::DeliverBulk),
                (1, ResponseAction::DeliverBulk),
            ]
        );
        assert_eq!(shared.queues.borrow().reply_senders.len(), 2);
        assert_eq!(shared.queues.borrow().replies_senders.len(), 2);
    }

    #[tokio::test]
    async fn interleaving_shapes_break_coalescing() {
        let shared = test_shared();
        let (mut sink, _) = CollectSink::new();

        write_item(
            &shared,
            &mut sink,
            WriteQueueItem::FireAndForget(query!["PING"]),
            0,
        )
        .await
        .unwrap();
        let (tx, _rx) = oneshot::channel();
        write_item(&shared, &mut sink, WriteQueueItem::Execute(query!["PING"], tx), 0)
            .await
            .unwrap();
        write_item(
            &shared,
            &mut sink,
            WriteQueueItem::FireAndForget(query!["PING"]),
            0,
        )
        .await
        .unwrap();

        assert_eq!(
            plan(&shared),
            vec![
                (1, ResponseAction::Ignore),
                (1, ResponseAction::Deliver),
                (1, ResponseAction::Ignore),
            ]
        );
    }

    #[tokio::test]
    async fn empty_batch_resolves_immediately() {
        let shared = test_shared();
        let (mut sink, sent) = CollectSink::new();

        let (tx, mut rx) = oneshot::channel();
        write_item(&shared, &mut sink, WriteQueueItem::ExecuteMany(Vec::new(), tx), 0)
            .await
            .unwrap();

        assert!(sent.borrow().is_empty());
        assert!(plan(&shared).is_empty());
        match rx.try_recv() {
            Ok(Some(Ok(replies))) => assert!(replies.is_empty()),
            other => panic!("Expected empty replies, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn write_failure_fails_the_waiter_and_records_nothing() {
        let shared = test_shared();
        let (mut sink, _) = CollectSink::failing_after(1);

        let (tx, mut rx) = oneshot::channel();
        let item =
            WriteQueueItem::ExecuteMany(vec![query!["GET", "a"], query!["GET", "b"]], tx);
        assert!(write_item(&shared, &mut sink, item, 0).await.is_err());

        assert!(plan(&shared).is_empty());
        assert_eq!(shared.queues.borrow().replies_senders.len(), 0);
        match rx.try_recv() {
            Ok(Some(Err(Error::IO(_)))) => (),
            other => panic!("Expected an IO error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn scan_prefers_urgent_and_skips_suppressed() {
        let shared = test_shared();
        shared.enqueue(
            WriteQueueItem::FireAndForget(query!["history"]),
            QueryPriority::History,
        );
        shared.enqueue(
            WriteQueueItem::FireAndForget(query!["state"]),
            QueryPriority::State,
        );
        shared.enqueue(
            WriteQueueItem::FireAndForget(query!["heartbeat"]),
            QueryPriority::Heartbeat,
        );

        shared.suppressed.borrow_mut()[QueryPriority::Heartbeat.index()] = true;
        let picked = shared.next_write_item();
        match picked {
            Some(WriteQueueItem::FireAndForget(q)) => assert_eq!(&q[0][..], b"state"),
            _ => panic!("Expected the state query"),
        }

        shared.suppressed.borrow_mut()[QueryPriority::Heartbeat.index()] = false;
        let picked = shared.next_write_item();
        match picked {
            Some(WriteQueueItem::FireAndForget(q)) => assert_eq!(&q[0][..], b"heartbeat"),
            _ => panic!("Expected the heartbeat query"),
        }
    }

    #[tokio::test]
    async fn deliver_routes_replies_in_order() {
        let shared = test_shared();
        let (tx1, rx1) = oneshot::channel();
        let (tx2, rx2) = oneshot::channel();
        {
            let mut queues = shared.queues.borrow_mut();
            queues.reply_senders.push_back(tx1);
            queues.reply_senders.push_back(tx2);
        }
        let mut replies = stream::iter(vec![
            Ok(RespValue::Integer(1)),
            Ok(RespValue::Integer(2)),
        ]);

        let action = FutureResponseAction {
            amount: 2,
            action: ResponseAction::Deliver,
        };
        run_response_action(&shared, &mut replies, action, 0)
            .await
            .unwrap();

        assert_eq!(rx1.await.unwrap().unwrap(), RespValue::Integer(1));
        assert_eq!(rx2.await.unwrap().unwrap(), RespValue::Integer(2));
    }

    #[tokio::test]
    async fn deliver_decode_failure_fails_the_waiter_and_ends_the_session() {
        let shared = test_shared();
        let (tx1, rx1) = oneshot::channel();
        let (tx2, _rx2) = oneshot::channel();
        {
            let mut queues = shared.queues.borrow_mut();
            queues.reply_senders.push_back(tx1);
            queues.reply_senders.push_back(tx2);
        }
        let mut replies = stream::iter(vec![
            Err(Error::Resp("Unexpected reply byte: 33".into())),
            Ok(RespValue::SimpleString("OK".into())),
        ]);

        let action = FutureResponseAction {
            amount: 2,
            action: ResponseAction::Deliver,
        };
        assert!(run_response_action(&shared, &mut replies, action, 0)
            .await
            .is_err());

        assert!(rx1.await.unwrap().is_err());
        // the rest of the run is abandoned; the second waiter is failed by
        // the disconnect handling, not here
        assert_eq!(shared.queues.borrow().reply_senders.len(), 1);
    }

    #[tokio::test]
    async fn bulk_collects_all_replies() {
        let shared = test_shared();
        let (tx, rx) = oneshot::channel();
        shared.queues.borrow_mut().replies_senders.push_back(tx);
        let mut replies = stream::iter(vec![
            Ok(RespValue::Integer(1)),
            Ok(RespValue::Integer(2)),
            Ok(RespValue::Integer(3)),
        ]);

        let action = FutureResponseAction {
            amount: 3,
            action: ResponseAction::DeliverBulk,
        };
        run_response_action(&shared, &mut replies, action, 0)
            .await
            .unwrap();

        assert_eq!(
            rx.await.unwrap().unwrap(),
            vec![
                RespValue::Integer(1),
                RespValue::Integer(2),
                RespValue::Integer(3),
            ]
        );
    }

    #[tokio::test]
    async fn bulk_decode_failure_discards_partial_replies() {
        let shared = test_shared();
        let (tx, rx) = oneshot::channel();
        shared.queues.borrow_mut().replies_senders.push_back(tx);
        let mut replies = stream::iter(vec![
            Ok(RespValue::Integer(1)),
            Err(Error::Resp("Unexpected reply byte: 33".into())),
            Ok(RespValue::Integer(3)),
        ]);

        let action = FutureResponseAction {
            amount: 3,
            action: ResponseAction::DeliverBulk,
        };
        assert!(run_response_action(&shared, &mut replies, action, 0)
            .await
            .is_err());

        assert!(rx.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn transport_failure_during_ignore_ends_the_session() {
        let shared = test_shared();
        let mut replies = stream::iter(vec![Ok(RespValue::Integer(1))]);

        let action = FutureResponseAction {
            amount: 2,
            action: ResponseAction::Ignore,
        };
        // the stream ends before the second reply arrives
        assert!(run_response_action(&shared, &mut replies, action, 0)
            .await
            .is_err());
    }
}
