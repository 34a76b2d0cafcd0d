//! netpoll Echo Client
//!
//! Connects to netpoll-echo, sends one length-prefixed frame per second
//! carrying the current timestamp, and prints the echo with its round trip.
//!
//! Usage:
//!     ./target/release/netpoll-client [addr] [count]
//!
//! `addr` defaults to `NETPOLL_ADDR` or 127.0.0.1:9000; `count` 0 runs
//! until interrupted.

use netpoll_core::buffer::Buffer;
use netpoll_core::codec::{Decoder, Encoder};
use netpoll_core::error::CodecError;
use netpoll_core::{env_get_str, log_error, log_info};
use netpoll_module::LengthPrefixCodec;

use std::io::{Read, Write};
use std::net::TcpStream;
use std::process;
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

const READ_CHUNK: usize = 4096;

fn timestamp() -> String {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    format!("{}.{:06}", now.as_secs(), now.subsec_micros())
}

/// Read from `stream` until one whole frame decodes.
fn read_frame(stream: &mut TcpStream, codec: &LengthPrefixCodec, buf: &mut Buffer) -> std::io::Result<Vec<u8>> {
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        match codec.decode(buf) {
            Ok(frame) => return Ok(frame),
            Err(CodecError::NotEnoughData) => {}
            Err(e) => return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())),
        }
        let n = stream.read(&mut chunk)?;
        if n == 0 {
            return Err(std::io::ErrorKind::UnexpectedEof.into());
        }
        buf.write(&chunk[..n]);
    }
}

fn main() {
    netpoll_core::log::init();

    let args: Vec<String> = std::env::args().collect();
    let addr = args.get(1).cloned().unwrap_or_else(|| env_get_str("ADDR", "127.0.0.1:9000"));
    let count: u64 = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(0);

    let mut stream = match TcpStream::connect(&addr) {
        Ok(stream) => stream,
        Err(e) => {
            log_error!("connect {} failed: {}", addr, e);
            process::exit(1);
        }
    };
    let _ = stream.set_nodelay(true);
    log_info!("netpoll-client: connected to {}", addr);

    let codec = LengthPrefixCodec::new();
    let mut buf = Buffer::with_capacity(READ_CHUNK);
    let mut sent = 0u64;

    while count == 0 || sent < count {
        let payload = timestamp();
        let frame = match codec.encode(payload.as_bytes()) {
            Ok(frame) => frame,
            Err(e) => {
                log_error!("encode failed: {}", e);
                process::exit(1);
            }
        };

        let start = Instant::now();
        if let Err(e) = stream.write_all(&frame) {
            log_error!("send failed: {}", e);
            process::exit(1);
        }
        sent += 1;

        match read_frame(&mut stream, &codec, &mut buf) {
            Ok(echo) => {
                log_info!("#{} echo {:?} rtt={:?}", sent, String::from_utf8_lossy(&echo), start.elapsed());
            }
            Err(e) => {
                log_error!("receive failed: {}", e);
                process::exit(1);
            }
        }
        buf.reset();

        thread::sleep(Duration::from_secs(1));
    }
}
