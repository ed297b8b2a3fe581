//! A scripted in-process Redis stand-in, answering at the byte level.
//!
//! Implements just enough of the command set for the integration tests:
//! `PING`, `SET`/`GET`, `INCR`, `AUTH`, `SELECT`, and a test-only `CLOSE`
//! that drops the connection without replying. Every received command is
//! recorded so tests can assert on transmission order.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
#[cfg(unix)]
use tokio::net::UnixListener;

pub type CommandLog = Arc<Mutex<Vec<Vec<Vec<u8>>>>>;

struct State {
    received: CommandLog,
    kv: Mutex<HashMap<Vec<u8>, Vec<u8>>>,
}

pub struct MockServer {
    pub addr: SocketAddr,
    pub received: CommandLog,
}

pub async fn start_tcp() -> MockServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let received: CommandLog = Default::default();
    let state = Arc::new(State {
        received: received.clone(),
        kv: Mutex::new(HashMap::new()),
    });
    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((socket, _)) => serve(socket, state.clone()).await,
                Err(_) => return,
            }
        }
    });
    MockServer { addr, received }
}

#[cfg(unix)]
pub async fn start_unix(path: &std::path::Path) -> CommandLog {
    let listener = UnixListener::bind(path).unwrap();
    let received: CommandLog = Default::default();
    let state = Arc::new(State {
        received: received.clone(),
        kv: Mutex::new(HashMap::new()),
    });
    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((socket, _)) => serve(socket, state.clone()).await,
                Err(_) => return,
            }
        }
    });
    received
}

async fn serve<S>(mut socket: S, state: Arc<State>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = BytesMut::new();
    loop {
        while let Some(args) = parse_command(&mut buf) {
            state.received.lock().unwrap().push(args.clone());
            match respond(&args, &state) {
                Some(reply) => {
                    if socket.write_all(&reply).await.is_err() {
                        return;
                    }
                }
                // drop the connection without replying
                None => return,
            }
        }
        match socket.read_buf(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(_) => (),
        }
    }
}

fn respond(args: &[Vec<u8>], state: &State) -> Option<Vec<u8>> {
    let command = args[0].to_ascii_uppercase();
    match command.as_slice() {
        b"PING" => Some(b"+PONG\r\n".to_vec()),
        b"AUTH" | b"SELECT" => Some(b"+OK\r\n".to_vec()),
        b"SET" if args.len() == 3 => {
            state
                .kv
                .lock()
                .unwrap()
                .insert(args[1].clone(), args[2].clone());
            Some(b"+OK\r\n".to_vec())
        }
        b"GET" if args.len() == 2 => match state.kv.lock().unwrap().get(&args[1]) {
            Some(value) => {
                let mut reply = format!("${}\r\n", value.len()).into_bytes();
                reply.extend_from_slice(value);
                reply.extend_from_slice(b"\r\n");
                Some(reply)
            }
            None => Some(b"$-1\r\n".to_vec()),
        },
        b"GET" => Some(b"-ERR wrong number of arguments for 'get' command\r\n".to_vec()),
        b"INCR" if args.len() == 2 => {
            let mut kv = state.kv.lock().unwrap();
            let entry = kv.entry(args[1].clone()).or_insert_with(|| b"0".to_vec());
            let current: i64 = std::str::from_utf8(entry).unwrap().parse().unwrap();
            let next = current + 1;
            *entry = next.to_string().into_bytes();
            Some(format!(":{}\r\n", next).into_bytes())
        }
        b"CLOSE" => None,
        _ => Some(b"-ERR unknown command\r\n".to_vec()),
    }
}

/// Take one complete command (a RESP array of bulk strings) off the front
/// of the buffer, or `None` if more bytes are needed.
fn parse_command(buf: &mut BytesMut) -> Option<Vec<Vec<u8>>> {
    let (args, consumed) = {
        let data: &[u8] = &buf[..];
        let mut pos = 0usize;
        let header = read_line(data, &mut pos)?;
        assert!(
            header.starts_with(b"*"),
            "malformed command header: {:?}",
            header
        );
        let count: usize = std::str::from_utf8(&header[1..]).unwrap().parse().unwrap();
        let mut args = Vec::with_capacity(count);
        for _ in 0..count {
            let len_line = read_line(data, &mut pos)?;
            assert!(
                len_line.starts_with(b"$"),
                "malformed argument header: {:?}",
                len_line
            );
            let len: usize = std::str::from_utf8(&len_line[1..]).unwrap().parse().unwrap();
            if data.len() < pos + len + 2 {
                return None;
            }
            args.push(data[pos..pos + len].to_vec());
            pos += len + 2;
        }
        (args, pos)
    };
    buf.advance(consumed);
    Some(args)
}

fn read_line<'a>(data: &'a [u8], pos: &mut usize) -> Option<&'a [u8]> {
    let start = *pos;
    let mut i = start;
    while i + 1 < data.len() {
        if data[i] == b'\r' && data[i + 1] == b'\n' {
            *pos = i + 2;
            return Some(&data[start..i]);
        }
        i += 1;
    }
    None
}
