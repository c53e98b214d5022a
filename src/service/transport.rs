// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
//! Responsibilities:
//! - The engine's view of the network: `Transport` opens and accepts peer
//!   connections, nothing more. Everything above works against trait objects
//!   so tests can substitute transports.
//! - `TcpTransport`: the default implementation over blocking `std::net`
//!   sockets. Connections are split with `try_clone` so one thread reads
//!   while another writes.

use std::fmt;
use std::io::{Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream};

use crate::common::error::{Error, Result};

pub trait Connection: Read + Write + Send + Sync {
    fn try_clone(&self) -> Result<Box<dyn Connection>>;

    /// Stop the write direction; the peer's reads see end-of-file.
    fn shutdown_write(&self) -> Result<()>;

    /// Tear down both directions. Wakes any thread blocked reading from
    /// this connection.
    fn shutdown(&self) -> Result<()>;
}

impl fmt::Debug for dyn Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection").finish_non_exhaustive()
    }
}

pub trait Listener: Send {
    fn accept(&self) -> Result<Box<dyn Connection>>;

    fn local_addr(&self) -> Result<String>;
}

pub trait Transport: Send + Sync {
    fn listen(&self, addr: &str) -> Result<Box<dyn Listener>>;

    fn dial(&self, addr: &str) -> Result<Box<dyn Connection>>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TcpTransport;

struct TcpConnection(TcpStream);

struct TcpListenerImpl(TcpListener);

impl Transport for TcpTransport {
    fn listen(&self, addr: &str) -> Result<Box<dyn Listener>> {
        let listener = TcpListener::bind(addr)
            .map_err(|e| Error::Transport(format!("listen on {}: {}", addr, e)))?;
        Ok(Box::new(TcpListenerImpl(listener)))
    }

    fn dial(&self, addr: &str) -> Result<Box<dyn Connection>> {
        let stream = TcpStream::connect(addr)
            .map_err(|e| Error::Transport(format!("dial {}: {}", addr, e)))?;
        stream.set_nodelay(true)?;
        Ok(Box::new(TcpConnection(stream)))
    }
}

impl Listener for TcpListenerImpl {
    fn accept(&self) -> Result<Box<dyn Connection>> {
        let (stream, _) = self
            .0
            .accept()
            .map_err(|e| Error::Transport(format!("accept: {}", e)))?;
        stream.set_nodelay(true)?;
        Ok(Box::new(TcpConnection(stream)))
    }

    fn local_addr(&self) -> Result<String> {
        Ok(self.0.local_addr()?.to_string())
    }
}

impl Read for TcpConnection {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.0.read(buf)
    }
}

impl Write for TcpConnection {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.0.flush()
    }
}

impl Connection for TcpConnection {
    fn try_clone(&self) -> Result<Box<dyn Connection>> {
        let clone = self.0.try_clone()?;
        Ok(Box::new(TcpConnection(clone)))
    }

    fn shutdown_write(&self) -> Result<()> {
        self.0.shutdown(Shutdown::Write)?;
        Ok(())
    }

    fn shutdown(&self) -> Result<()> {
        // Both directions may already be gone; that is not an error here.
        match self.0.shutdown(Shutdown::Both) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn dial_and_accept_round_trip() {
        let transport = TcpTransport;
        let listener = transport.listen("127.0.0.1:0").expect("listen");
        let addr = listener.local_addr().expect("local addr");

        thread::scope(|s| {
            s.spawn(move || {
                let mut conn = listener.accept().expect("accept");
                let mut buf = [0u8; 5];
                conn.read_exact(&mut buf).expect("read");
                conn.write_all(&buf).expect("write back");
            });

            let mut conn = transport.dial(&addr).expect("dial");
            conn.write_all(b"hello").expect("write");
            let mut echo = [0u8; 5];
            conn.read_exact(&mut echo).expect("read echo");
            assert_eq!(&echo, b"hello");
        });
    }

    #[test]
    fn split_halves_share_the_stream() {
        let transport = TcpTransport;
        let listener = transport.listen("127.0.0.1:0").expect("listen");
        let addr = listener.local_addr().expect("local addr");

        thread::scope(|s| {
            s.spawn(move || {
                let conn = listener.accept().expect("accept");
                let mut reader = conn.try_clone().expect("clone");
                let mut writer = conn;
                let mut buf = [0u8; 4];
                reader.read_exact(&mut buf).expect("read");
                writer.write_all(&buf).expect("write");
            });

            let mut conn = transport.dial(&addr).expect("dial");
            conn.write_all(b"ping").expect("write");
            let mut buf = [0u8; 4];
            conn.read_exact(&mut buf).expect("read");
            assert_eq!(&buf, b"ping");
        });
    }

    #[test]
    fn write_shutdown_is_end_of_file_for_the_peer() {
        let transport = TcpTransport;
        let listener = transport.listen("127.0.0.1:0").expect("listen");
        let addr = listener.local_addr().expect("local addr");

        thread::scope(|s| {
            let handle = s.spawn(move || {
                let mut conn = listener.accept().expect("accept");
                let mut buf = Vec::new();
                conn.read_to_end(&mut buf).expect("read to end");
                buf
            });

            let mut conn = transport.dial(&addr).expect("dial");
            conn.write_all(b"bye").expect("write");
            conn.shutdown_write().expect("shutdown write");
            assert_eq!(handle.join().expect("join"), b"bye");
        });
    }

    #[test]
    fn dial_to_unbound_port_fails() {
        let transport = TcpTransport;
        // Bind then drop to get a port that is very likely closed.
        let addr = {
            let listener = transport.listen("127.0.0.1:0").expect("listen");
            listener.local_addr().expect("local addr")
        };
        let err = transport.dial(&addr).unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }
}
