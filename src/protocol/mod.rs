/*
 * Copyright 2017-2023 Ben Ashford
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

//! The RESP wire protocol: the reply value model, query building, and the
//! codec that frames both onto a byte stream.

pub mod resp;

mod codec;

pub(crate) use codec::RespCodec;

pub use resp::{FromResp, Queries, Query, Replies, RespValue, ToQueryArg};
