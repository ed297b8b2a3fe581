/*
 * Copyright 2017-2023 Ben Ashford
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

mod decode;
mod encode;

use bytes::{Buf, BytesMut};

use tokio_util::codec::{Decoder, Encoder};

use crate::{
    error::Error,
    protocol::resp::{Query, RespValue},
};

/// Codec to frame queries going out and replies coming in
pub struct RespCodec;

impl Decoder for RespCodec {
    type Item = RespValue;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match decode::parse_reply(&buf[..]) {
            Ok(None) => Ok(None),
            Ok(Some((pos, reply))) => {
                buf.advance(pos);
                Ok(Some(reply))
            }
            Err(e) => Err(e),
        }
    }
}

impl Encoder<Query> for RespCodec {
    type Error = Error;

    fn encode(&mut self, query: Query, buf: &mut BytesMut) -> Result<(), Self::Error> {
        encode::encode(&query, buf);
        Ok(())
    }
}
