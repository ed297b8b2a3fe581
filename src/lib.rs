/*
 * Copyright 2017-2023 Ben Ashford
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

//! A priority-aware multiplexing client for Redis, using Tokio.
//!
//! The crate is built around a single long-lived connection per Redis
//! endpoint onto which an arbitrary number of caller threads multiplex
//! their commands. Commands are pipelined: they are written without
//! waiting for earlier replies, and replies are matched back to callers
//! by position, which Redis guarantees.
//!
//! Two submission styles are provided by
//! [`MultiplexedConnection`](client/multiplexed/struct.MultiplexedConnection.html):
//! fire-and-forget, where the reply is read off the wire and discarded,
//! and executed queries, where the caller `await`s the reply (or replies,
//! for a batch). Every submission carries a
//! [`QueryPriority`](client/multiplexed/enum.QueryPriority.html); the
//! connection always transmits the oldest query of the most urgent
//! non-suppressed priority first, so bulk background traffic cannot
//! starve urgent traffic sharing the same socket.
//!
//! The connection survives transport failures: outstanding replies are
//! failed over to their callers, queued-but-unsent queries are retained,
//! and the endpoint is re-dialled until it comes back.

pub mod client;
pub mod error;
pub mod protocol;
