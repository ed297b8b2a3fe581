/*
 * Copyright 2017-2023 Ben Ashford
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

//! Incremental parsing of RESP replies.
//!
//! Parsing never consumes input: a successful parse reports how many bytes
//! the reply occupied so the codec can advance past it, and an incomplete
//! frame reports `None` so more bytes can be awaited. Malformed input is a
//! protocol error; the stream cannot be trusted past it, so the connection
//! treats it like any other transport fault.

use std::str;

use crate::{error::Error, protocol::resp::RespValue};

type Parsed<T> = Result<Option<(usize, T)>, Error>;

/// Parse one complete reply from the front of `buf`.
pub(crate) fn parse_reply(buf: &[u8]) -> Parsed<RespValue> {
    parse_value(buf, 0)
}

fn parse_value(buf: &[u8], from: usize) -> Parsed<RespValue> {
    let tag = match buf.get(from) {
        Some(&tag) => tag,
        None => return Ok(None),
    };
    let payload = from + 1;
    match tag {
        b'+' => Ok(take_line(buf, payload)
            .map(|(next, line)| (next, RespValue::SimpleString(text_of(line))))),
        b'-' => {
            Ok(take_line(buf, payload).map(|(next, line)| (next, RespValue::Error(text_of(line)))))
        }
        b':' => match take_integer(buf, payload)? {
            Some((next, value)) => Ok(Some((next, RespValue::Integer(value)))),
            None => Ok(None),
        },
        b'$' => parse_bulk_string(buf, payload),
        b'*' => parse_array(buf, payload),
        tag => Err(Error::Resp(format!("Unexpected reply byte: {}", tag))),
    }
}

/// A length line, the raw bytes, and a closing `\r\n`. Length -1 is the nil
/// bulk string.
fn parse_bulk_string(buf: &[u8], from: usize) -> Parsed<RespValue> {
    match take_length(buf, from)? {
        None => Ok(None),
        Some((next, None)) => Ok(Some((next, RespValue::BulkString(None)))),
        Some((next, Some(len))) => {
            let end = next + len;
            if buf.len() < end + 2 {
                return Ok(None);
            }
            if &buf[end..end + 2] != b"\r\n" {
                return Err(Error::Resp("Bulk string not terminated by CRLF".into()));
            }
            let bytes = buf[next..end].to_vec();
            Ok(Some((end + 2, RespValue::BulkString(Some(bytes)))))
        }
    }
}

/// A length line followed by that many nested replies. Length -1 is the nil
/// array.
fn parse_array(buf: &[u8], from: usize) -> Parsed<RespValue> {
    match take_length(buf, from)? {
        None => Ok(None),
        Some((next, None)) => Ok(Some((next, RespValue::Array(None)))),
        Some((mut at, Some(len))) => {
            let mut items = Vec::with_capacity(len);
            for _ in 0..len {
                match parse_value(buf, at)? {
                    None => return Ok(None),
                    Some((next, item)) => {
                        items.push(item);
                        at = next;
                    }
                }
            }
            Ok(Some((at, RespValue::Array(Some(items)))))
        }
    }
}

/// A length prefix: -1 marks a nil value, any other negative length is
/// malformed.
fn take_length(buf: &[u8], from: usize) -> Parsed<Option<usize>> {
    match take_integer(buf, from)? {
        None => Ok(None),
        Some((next, -1)) => Ok(Some((next, None))),
        Some((_, len)) if len < 0 => Err(Error::Resp(format!("Invalid length: {}", len))),
        Some((next, len)) => Ok(Some((next, Some(len as usize)))),
    }
}

/// Integers (length prefixes and `:` replies alike) travel as a decimal
/// line. The value is signed 64-bit:
/// https://redis.io/topics/protocol#resp-integers
fn take_integer(buf: &[u8], from: usize) -> Parsed<i64> {
    let (next, line) = match take_line(buf, from) {
        Some(found) => found,
        None => return Ok(None),
    };
    let value = str::from_utf8(line)
        .ok()
        .and_then(|text| text.parse().ok())
        .ok_or_else(|| Error::Resp(format!("Not an integer: {}", text_of(line))))?;
    Ok(Some((next, value)))
}

/// The payload of the next CRLF-terminated line and the offset just past
/// its terminator. A lone `\r` is part of the payload.
fn take_line(buf: &[u8], from: usize) -> Option<(usize, &[u8])> {
    let mut search = from;
    loop {
        let offset = buf.get(search..)?.iter().position(|&b| b == b'\r')?;
        let cr = search + offset;
        match buf.get(cr + 1) {
            Some(b'\n') => return Some((cr + 2, &buf[from..cr])),
            Some(_) => search = cr + 1,
            None => return None,
        }
    }
}

fn text_of(line: &[u8]) -> String {
    String::from_utf8_lossy(line).into_owned()
}
