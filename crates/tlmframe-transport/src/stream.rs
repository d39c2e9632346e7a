use std::collections::VecDeque;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::error::Result;

/// A connected byte stream — implements `Read + Write`.
///
/// The framing chain neither knows nor cares which concrete transport
/// supplies the bytes. A TCP stream covers the common case; the in-process
/// loopback pair exists for tests and local tooling.
pub struct RawStream {
    inner: RawStreamInner,
}

enum RawStreamInner {
    Tcp(TcpStream),
    Loopback(LoopbackStream),
}

impl RawStream {
    /// Connect to a TCP endpoint.
    pub fn connect_tcp(address: &str) -> Result<Self> {
        let stream = TcpStream::connect(address).map_err(|source| {
            crate::error::TransportError::Connect {
                address: address.to_string(),
                source,
            }
        })?;
        Ok(Self {
            inner: RawStreamInner::Tcp(stream),
        })
    }

    /// Wrap an already-connected TCP stream.
    pub fn from_tcp(stream: TcpStream) -> Self {
        Self {
            inner: RawStreamInner::Tcp(stream),
        }
    }

    /// A connected in-process pair; bytes written to one side are read from
    /// the other.
    pub fn loopback_pair() -> (Self, Self) {
        let (a, b) = LoopbackStream::pair();
        (
            Self {
                inner: RawStreamInner::Loopback(a),
            },
            Self {
                inner: RawStreamInner::Loopback(b),
            },
        )
    }

    /// Set the read timeout on the underlying stream.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        match &self.inner {
            RawStreamInner::Tcp(stream) => stream.set_read_timeout(timeout).map_err(Into::into),
            RawStreamInner::Loopback(stream) => {
                stream.set_read_timeout(timeout);
                Ok(())
            }
        }
    }

    /// Try to clone this stream (shares the underlying connection).
    pub fn try_clone(&self) -> Result<Self> {
        let inner = match &self.inner {
            RawStreamInner::Tcp(stream) => RawStreamInner::Tcp(stream.try_clone()?),
            RawStreamInner::Loopback(stream) => RawStreamInner::Loopback(stream.clone()),
        };
        Ok(Self { inner })
    }

    /// Shut down the stream; a blocked reader on the other side observes
    /// end-of-stream.
    pub fn shutdown(&self) {
        match &self.inner {
            RawStreamInner::Tcp(stream) => {
                let _ = stream.shutdown(std::net::Shutdown::Both);
            }
            RawStreamInner::Loopback(stream) => stream.close(),
        }
    }
}

impl Read for RawStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            RawStreamInner::Tcp(stream) => stream.read(buf),
            RawStreamInner::Loopback(stream) => stream.read(buf),
        }
    }
}

impl Write for RawStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            RawStreamInner::Tcp(stream) => stream.write(buf),
            RawStreamInner::Loopback(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.inner {
            RawStreamInner::Tcp(stream) => stream.flush(),
            RawStreamInner::Loopback(stream) => stream.flush(),
        }
    }
}

impl std::fmt::Debug for RawStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match &self.inner {
            RawStreamInner::Tcp(_) => "tcp",
            RawStreamInner::Loopback(_) => "loopback",
        };
        f.debug_struct("RawStream").field("type", &kind).finish()
    }
}

/// One direction of an in-process byte pipe.
#[derive(Debug, Default)]
struct Pipe {
    state: Mutex<PipeState>,
    readable: Condvar,
}

#[derive(Debug, Default)]
struct PipeState {
    buffer: VecDeque<u8>,
    closed: bool,
}

impl Pipe {
    fn push(&self, bytes: &[u8]) -> std::io::Result<usize> {
        let mut state = self.state.lock().expect("pipe lock poisoned");
        if state.closed {
            return Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "loopback peer closed",
            ));
        }
        state.buffer.extend(bytes);
        self.readable.notify_all();
        Ok(bytes.len())
    }

    fn pull(&self, buf: &mut [u8], timeout: Option<Duration>) -> std::io::Result<usize> {
        let mut state = self.state.lock().expect("pipe lock poisoned");
        loop {
            if !state.buffer.is_empty() {
                let n = buf.len().min(state.buffer.len());
                for slot in buf.iter_mut().take(n) {
                    *slot = state.buffer.pop_front().unwrap_or(0);
                }
                return Ok(n);
            }
            if state.closed {
                return Ok(0);
            }
            state = match timeout {
                Some(timeout) => {
                    let (guard, result) = self
                        .readable
                        .wait_timeout(state, timeout)
                        .expect("pipe lock poisoned");
                    if result.timed_out() && guard.buffer.is_empty() && !guard.closed {
                        return Err(std::io::Error::new(
                            std::io::ErrorKind::TimedOut,
                            "loopback read timed out",
                        ));
                    }
                    guard
                }
                None => self.readable.wait(state).expect("pipe lock poisoned"),
            };
        }
    }

    fn close(&self) {
        let mut state = self.state.lock().expect("pipe lock poisoned");
        state.closed = true;
        self.readable.notify_all();
    }
}

/// One endpoint of a loopback pair.
#[derive(Debug, Clone)]
struct LoopbackStream {
    incoming: Arc<Pipe>,
    outgoing: Arc<Pipe>,
    read_timeout: Arc<Mutex<Option<Duration>>>,
}

impl LoopbackStream {
    fn pair() -> (Self, Self) {
        let forward = Arc::new(Pipe::default());
        let backward = Arc::new(Pipe::default());
        let a = Self {
            incoming: backward.clone(),
            outgoing: forward.clone(),
            read_timeout: Arc::new(Mutex::new(None)),
        };
        let b = Self {
            incoming: forward,
            outgoing: backward,
            read_timeout: Arc::new(Mutex::new(None)),
        };
        (a, b)
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) {
        *self.read_timeout.lock().expect("timeout lock poisoned") = timeout;
    }

    fn read(&self, buf: &mut [u8]) -> std::io::Result<usize> {
        let timeout = *self.read_timeout.lock().expect("timeout lock poisoned");
        self.incoming.pull(buf, timeout)
    }

    fn write(&self, buf: &[u8]) -> std::io::Result<usize> {
        self.outgoing.push(buf)
    }

    fn flush(&self) -> std::io::Result<()> {
        Ok(())
    }

    fn close(&self) {
        self.incoming.close();
        self.outgoing.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_roundtrip() {
        let (mut left, mut right) = RawStream::loopback_pair();
        left.write_all(b"ping").unwrap();

        let mut buf = [0u8; 16];
        let n = right.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"ping");
    }

    #[test]
    fn loopback_is_bidirectional() {
        let (mut left, mut right) = RawStream::loopback_pair();
        left.write_all(b"to-right").unwrap();
        right.write_all(b"to-left").unwrap();

        let mut buf = [0u8; 16];
        let n = right.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"to-right");
        let n = left.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"to-left");
    }

    #[test]
    fn closed_loopback_reads_eof() {
        let (left, mut right) = RawStream::loopback_pair();
        left.shutdown();

        let mut buf = [0u8; 4];
        assert_eq!(right.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn closed_loopback_write_errors() {
        let (left, mut right) = RawStream::loopback_pair();
        left.shutdown();
        assert!(right.write(b"x").is_err());
    }

    #[test]
    fn read_timeout_observed() {
        let (left, mut right) = RawStream::loopback_pair();
        right
            .set_read_timeout(Some(Duration::from_millis(10)))
            .unwrap();
        let mut buf = [0u8; 4];
        let err = right.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::TimedOut);
        drop(left);
    }

    #[test]
    fn clone_shares_the_connection() {
        let (mut left, right) = RawStream::loopback_pair();
        let mut reader = right.try_clone().unwrap();
        left.write_all(b"shared").unwrap();

        let mut buf = [0u8; 16];
        let n = reader.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"shared");
    }

    #[test]
    fn blocked_reader_wakes_on_write() {
        let (mut left, mut right) = RawStream::loopback_pair();
        let handle = std::thread::spawn(move || {
            let mut buf = [0u8; 8];
            let n = right.read(&mut buf).unwrap();
            buf[..n].to_vec()
        });
        std::thread::sleep(Duration::from_millis(20));
        left.write_all(b"wake").unwrap();
        assert_eq!(handle.join().unwrap(), b"wake");
    }
}
