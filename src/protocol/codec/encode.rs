/*
 * Copyright 2017-2023 Ben Ashford
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

use std::cmp;

use bytes::{BufMut, BytesMut};

use crate::protocol::resp::Query;

const DEFAULT_MESSAGE_SIZE: usize = 1024;

fn check_and_reserve(buf: &mut BytesMut, amt: usize) {
    let remaining_bytes = buf.remaining_mut();
    if remaining_bytes < amt {
        buf.reserve(cmp::max(amt, DEFAULT_MESSAGE_SIZE));
    }
}

fn write_rn(buf: &mut BytesMut) {
    buf.put_u8(b'\r');
    buf.put_u8(b'\n');
}

fn write_header(symb: u8, len: i64, buf: &mut BytesMut) {
    let len_as_string = len.to_string();
    let len_as_bytes = len_as_string.as_bytes();
    let header_bytes = 1 + len_as_bytes.len() + 2;
    check_and_reserve(buf, header_bytes);
    buf.put_u8(symb);
    buf.extend(len_as_bytes);
    write_rn(buf);
}

/// A query is framed as an array of bulk strings: `*N`, then `$len` and the
/// raw argument bytes for each argument. Arguments are opaque, there is no
/// escaping.
pub(crate) fn encode(query: &Query, buf: &mut BytesMut) {
    write_header(b'*', query.len() as i64, buf);
    for arg in query {
        let len = arg.len();
        write_header(b'$', len as i64, buf);
        check_and_reserve(buf, len + 2);
        buf.extend_from_slice(arg);
        write_rn(buf);
    }
}
