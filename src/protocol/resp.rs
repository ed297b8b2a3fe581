/*
 * Copyright 2017-2023 Ben Ashford
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

//! The RESP value model.

use bytes::Bytes;

use crate::error::{self, Error};

/// A single Redis command: the ordered argument vector that is framed as a
/// RESP array of bulk strings. Build one with the [`query!`](../../macro.query.html)
/// macro, or from anything satisfying [`ToQueryArg`](trait.ToQueryArg.html).
pub type Query = Vec<Bytes>;

/// A batch of commands submitted as one unit.
pub type Queries = Vec<Query>;

/// The replies to a batch of commands, in command order.
pub type Replies = Vec<RespValue>;

/// A single decoded RESP reply, owning its data.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum RespValue {
    /// A `+`-prefixed one-line string, e.g. `+OK`
    SimpleString(String),

    /// An error reply from the Redis server.
    ///
    /// Decoding one of these is a *successful* decode: it is delivered to
    /// the waiting caller as a value, who decides whether it is fatal.
    Error(String),

    /// Redis documentation defines an integer as being a signed 64-bit integer:
    /// https://redis.io/topics/protocol#resp-integers
    Integer(i64),

    /// A bulk string. In Redis terminology a string is a byte-array, stored
    /// here as raw bytes to allow clients to interpret them as appropriate.
    /// `None` is the RESP nil bulk string (`$-1`).
    BulkString(Option<Vec<u8>>),

    /// Zero, one or more other `RespValue`s. `None` is the RESP nil array
    /// (`*-1`).
    Array(Option<Vec<RespValue>>),
}

impl RespValue {
    fn into_result(self) -> Result<RespValue, Error> {
        match self {
            RespValue::Error(string) => Err(Error::Remote(string)),
            x => Ok(x),
        }
    }
}

/// A trait to be implemented for every type which can be read from a RESP
/// reply.
pub trait FromResp: Sized {
    /// Return a `Result` containing either `Self` or `Error`. Errors occur
    /// when the particular `RespValue` is incompatible with the required
    /// type, or when the value is a remote error reply.
    fn from_resp(resp: RespValue) -> Result<Self, Error> {
        Self::from_resp_int(resp.into_result()?)
    }

    fn from_resp_int(resp: RespValue) -> Result<Self, Error>;
}

impl FromResp for RespValue {
    fn from_resp_int(resp: RespValue) -> Result<RespValue, Error> {
        Ok(resp)
    }
}

impl FromResp for String {
    fn from_resp_int(resp: RespValue) -> Result<String, Error> {
        match resp {
            RespValue::BulkString(Some(ref bytes)) => {
                Ok(String::from_utf8_lossy(bytes).into_owned())
            }
            RespValue::SimpleString(string) => Ok(string),
            _ => Err(error::resp("Cannot convert into a string", resp)),
        }
    }
}

impl FromResp for Vec<u8> {
    fn from_resp_int(resp: RespValue) -> Result<Vec<u8>, Error> {
        match resp {
            RespValue::BulkString(Some(bytes)) => Ok(bytes),
            _ => Err(error::resp("Not a bulk string", resp)),
        }
    }
}

impl FromResp for i64 {
    fn from_resp_int(resp: RespValue) -> Result<i64, Error> {
        match resp {
            RespValue::Integer(i) => Ok(i),
            _ => Err(error::resp("Cannot be converted into an i64", resp)),
        }
    }
}

macro_rules! impl_fromresp_integers {
    ($($int_ty:ident),* $(,)*) => {
        $(
            #[allow(clippy::cast_lossless)]
            impl FromResp for $int_ty {
                fn from_resp_int(resp: RespValue) -> Result<Self, Error> {
                    i64::from_resp_int(resp).and_then(|x| {
                        // $int_ty::MAX as i64 > 0 should be optimized out. It tests if
                        // the target integer type needs an "upper bounds" check
                        if x < ($int_ty::MIN as i64)
                            || ($int_ty::MAX as i64 > 0 && x > ($int_ty::MAX as i64))
                        {
                            Err(error::resp(
                                concat!(
                                    "i64 value cannot be represented as ",
                                    stringify!($int_ty),
                                ),
                                RespValue::Integer(x),
                            ))
                        } else {
                            Ok(x as $int_ty)
                        }
                    })
                }
            }
        )*
    };
}

impl_fromresp_integers!(isize, usize, i32, u32, u64);

impl FromResp for bool {
    fn from_resp_int(resp: RespValue) -> Result<bool, Error> {
        i64::from_resp_int(resp).and_then(|x| match x {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(error::resp(
                "i64 value cannot be represented as bool",
                RespValue::Integer(x),
            )),
        })
    }
}

impl<T: FromResp> FromResp for Option<T> {
    fn from_resp_int(resp: RespValue) -> Result<Option<T>, Error> {
        match resp {
            RespValue::BulkString(None) | RespValue::Array(None) => Ok(None),
            x => Ok(Some(T::from_resp_int(x)?)),
        }
    }
}

impl<T: FromResp> FromResp for Vec<T> {
    fn from_resp_int(resp: RespValue) -> Result<Vec<T>, Error> {
        match resp {
            RespValue::Array(Some(ary)) => {
                let mut ar = Vec::with_capacity(ary.len());
                for value in ary {
                    ar.push(T::from_resp(value)?);
                }
                Ok(ar)
            }
            _ => Err(error::resp("Cannot be converted into a vector", resp)),
        }
    }
}

impl FromResp for () {
    fn from_resp_int(resp: RespValue) -> Result<(), Error> {
        match resp {
            RespValue::SimpleString(string) => match string.as_ref() {
                "OK" => Ok(()),
                _ => Err(Error::Resp(format!(
                    "Unexpected value within SimpleString: {}",
                    string
                ))),
            },
            _ => Err(error::resp("Unexpected value", resp)),
        }
    }
}

/// Macro to build a [`Query`](protocol/resp/type.Query.html), useful for
/// preparing commands to send. Arguments can be any type, or a mixture of
/// types, that satisfy `ToQueryArg`.
///
/// As a general rule, if a value is moved, the raw data is moved into the
/// corresponding argument; if a reference is provided, the data is copied
/// instead.
///
/// # Examples
///
/// ```
/// use redis_mux::query;
///
/// let value = format!("something_{}", 123);
/// query!["SET", "key_name", value];
/// ```
#[macro_export]
macro_rules! query {
    ($($e:expr),* $(,)?) => {
        vec![
            $(
                $crate::protocol::resp::ToQueryArg::to_query_arg($e),
            )*
        ]
    }
}

/// A trait for every type that can become one argument of a [`Query`](type.Query.html).
pub trait ToQueryArg {
    fn to_query_arg(self) -> Bytes;
}

impl ToQueryArg for Bytes {
    fn to_query_arg(self) -> Bytes {
        self
    }
}

impl<'a> ToQueryArg for &'a Bytes {
    fn to_query_arg(self) -> Bytes {
        self.clone()
    }
}

impl ToQueryArg for String {
    fn to_query_arg(self) -> Bytes {
        Bytes::from(self.into_bytes())
    }
}

impl<'a> ToQueryArg for &'a String {
    fn to_query_arg(self) -> Bytes {
        Bytes::copy_from_slice(self.as_bytes())
    }
}

impl<'a> ToQueryArg for &'a str {
    fn to_query_arg(self) -> Bytes {
        Bytes::copy_from_slice(self.as_bytes())
    }
}

impl<'a> ToQueryArg for &'a [u8] {
    fn to_query_arg(self) -> Bytes {
        Bytes::copy_from_slice(self)
    }
}

impl ToQueryArg for Vec<u8> {
    fn to_query_arg(self) -> Bytes {
        Bytes::from(self)
    }
}

macro_rules! impl_toqueryarg_integers {
    ($($int_ty:ident),* $(,)*) => {
        $(
            impl ToQueryArg for $int_ty {
                fn to_query_arg(self) -> Bytes {
                    Bytes::from(self.to_string().into_bytes())
                }
            }
        )*
    };
}

impl_toqueryarg_integers!(i32, i64, isize, u16, u32, u64, usize);
