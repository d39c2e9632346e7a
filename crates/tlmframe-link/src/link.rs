//! Drives inbound bytes through a read chain and outbound packets through a
//! write chain over one transport stream.
//!
//! The read direction belongs to a single dedicated worker that blocks on
//! the transport and yields one packet at a time; the chain is never
//! invoked concurrently for one connection. The write direction may be
//! called from many producers and is serialized by a mutex held across all
//! attached protocols, so the byte stream on the wire is never interleaved
//! mid-packet.

use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bytes::BytesMut;
use tracing::{debug, info, info_span};

use tlmframe_packet::Packet;
use tlmframe_protocol::{mark_chain_positions, Extra, Outcome, Protocol};
use tlmframe_transport::RawStream;

use crate::error::{LinkError, Result};

const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Serialized write half of a connection.
struct LinkWriter {
    stream: RawStream,
    /// Write-direction protocol instances, stored left-to-right (transport
    /// first); hooks run right-to-left.
    chain: Vec<Protocol>,
    write_count: u64,
}

/// One logical connection: a transport stream plus its protocol chains.
///
/// Read and write chains are separate protocol instances built from the
/// same configuration, so per-direction state is never shared. No protocol
/// instance is reused across connections.
pub struct Link {
    name: String,
    stream: RawStream,
    read_chain: Vec<Protocol>,
    writer: Arc<Mutex<LinkWriter>>,
    cancel: Arc<AtomicBool>,
    read_count: u64,
}

/// Handle used to cancel a blocked read from another thread.
#[derive(Clone)]
pub struct LinkCancel {
    cancel: Arc<AtomicBool>,
    stream: Option<Arc<RawStream>>,
}

impl LinkCancel {
    /// Flag the link for teardown and unblock any in-progress read.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
        if let Some(stream) = &self.stream {
            stream.shutdown();
        }
    }
}

impl Link {
    /// Attach protocol chains to a connected stream. Both chains are given
    /// in logical order (transport side first); the write path runs them in
    /// reverse.
    pub fn new(
        name: impl Into<String>,
        stream: RawStream,
        mut read_chain: Vec<Protocol>,
        write_chain: Vec<Protocol>,
    ) -> Result<Self> {
        mark_chain_positions(&mut read_chain);
        let writer_stream = stream.try_clone()?;

        let mut link = Self {
            name: name.into(),
            stream,
            read_chain,
            writer: Arc::new(Mutex::new(LinkWriter {
                stream: writer_stream,
                chain: write_chain,
                write_count: 0,
            })),
            cancel: Arc::new(AtomicBool::new(false)),
            read_count: 0,
        };
        link.reset();
        Ok(link)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn read_count(&self) -> u64 {
        self.read_count
    }

    pub fn write_count(&self) -> u64 {
        self.writer.lock().expect("writer lock poisoned").write_count
    }

    /// Handle for cancelling a blocked read from another thread.
    pub fn cancel_handle(&self) -> LinkCancel {
        let stream = self.stream.try_clone().ok().map(Arc::new);
        LinkCancel {
            cancel: self.cancel.clone(),
            stream,
        }
    }

    /// Reset every protocol on both chains. Called on connect and
    /// disconnect.
    pub fn reset(&mut self) {
        for protocol in &mut self.read_chain {
            protocol.reset();
        }
        let mut writer = self.writer.lock().expect("writer lock poisoned");
        for protocol in &mut writer.chain {
            protocol.reset();
        }
    }

    /// Tear the connection down: reset chains and release the transport.
    pub fn disconnect(&mut self) {
        self.stream.shutdown();
        self.reset();
    }

    /// Retrieve the next packet from the connection.
    ///
    /// Returns `Ok(None)` when the connection is finished: transport EOF,
    /// cancellation, or a protocol `Disconnect`. The packet comes back
    /// unidentified unless a protocol stamped identity during framing.
    pub fn read(&mut self) -> Result<Option<Packet>> {
        let span = info_span!("link_read", name = %self.name);
        let _entered = span.enter();

        // Protocols may hold a fully-buffered packet from a previous
        // transport read, so each call starts with a zero-byte poll instead
        // of blocking on the transport.
        let mut first = true;
        loop {
            if self.cancel.load(Ordering::SeqCst) {
                info!("read cancelled");
                return Ok(None);
            }

            let data: BytesMut = if first && !self.read_chain.is_empty() {
                first = false;
                BytesMut::new()
            } else {
                let mut chunk = [0u8; READ_CHUNK_SIZE];
                let n = match self.stream.read(&mut chunk) {
                    Ok(0) => {
                        info!("transport closed, disconnecting");
                        return Ok(None);
                    }
                    Ok(n) => n,
                    Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                    Err(err)
                        if err.kind() == ErrorKind::TimedOut
                            || err.kind() == ErrorKind::WouldBlock =>
                    {
                        continue;
                    }
                    Err(err) => {
                        if self.cancel.load(Ordering::SeqCst) {
                            info!("read cancelled");
                            return Ok(None);
                        }
                        return Err(LinkError::Io(err));
                    }
                };
                BytesMut::from(&chunk[..n])
            };

            let (current, extra) = match drive_read_data(&mut self.read_chain, data)? {
                ChainStep::Ready(output) => output,
                ChainStep::Stopped => continue,
                ChainStep::Disconnected => return Ok(None),
            };

            let mut packet = Packet::from_buffer(current);
            packet.extra = extra;

            let packet = match drive_read_packet(&mut self.read_chain, packet)? {
                ChainStep::Ready(packet) => packet,
                ChainStep::Stopped => continue,
                ChainStep::Disconnected => return Ok(None),
            };

            self.read_count += 1;
            return Ok(Some(packet));
        }
    }

    /// Writer handle shareable across producer threads.
    pub fn writer(&self) -> LinkWriterHandle {
        LinkWriterHandle {
            name: self.name.clone(),
            writer: self.writer.clone(),
        }
    }

    /// Send a packet out the connection (serialized with all other
    /// writers).
    pub fn write(&self, packet: Packet) -> Result<()> {
        self.writer().write(packet)
    }
}

/// Result of driving data or a packet through one chain pass.
enum ChainStep<T> {
    Ready(T),
    /// A protocol needs more bytes; return to the transport.
    Stopped,
    /// A protocol asked for teardown.
    Disconnected,
}

/// Push bytes through every protocol's `read_data`, left to right.
fn drive_read_data(
    chain: &mut [Protocol],
    data: BytesMut,
) -> Result<ChainStep<(BytesMut, Option<Extra>)>> {
    let mut data = data;
    let mut extra: Option<Extra> = None;
    for protocol in chain {
        match protocol.read_data(data, extra.take())? {
            Outcome::Ready((next, next_extra)) => {
                data = next;
                extra = next_extra;
            }
            Outcome::Stop => return Ok(ChainStep::Stopped),
            Outcome::Disconnect => {
                info!(protocol = protocol.name(), "protocol requested disconnect");
                return Ok(ChainStep::Disconnected);
            }
            Outcome::Resync => {
                debug!(protocol = protocol.name(), "protocol requested resync");
                return Ok(ChainStep::Stopped);
            }
        }
    }
    Ok(ChainStep::Ready((data, extra)))
}

/// Run the packet finalization hooks, left to right.
fn drive_read_packet(chain: &mut [Protocol], packet: Packet) -> Result<ChainStep<Packet>> {
    let mut packet = packet;
    for protocol in chain {
        match protocol.read_packet(packet)? {
            Outcome::Ready(next) => packet = next,
            Outcome::Stop => return Ok(ChainStep::Stopped),
            Outcome::Disconnect | Outcome::Resync => {
                info!(protocol = protocol.name(), "protocol requested disconnect");
                return Ok(ChainStep::Disconnected);
            }
        }
    }
    Ok(ChainStep::Ready(packet))
}

/// Cloneable handle to the serialized write half of a link.
#[derive(Clone)]
pub struct LinkWriterHandle {
    name: String,
    writer: Arc<Mutex<LinkWriter>>,
}

impl LinkWriterHandle {
    /// Run `packet` through the write chain and put the bytes on the wire.
    ///
    /// The mutex is held for the duration of every hook so concurrent
    /// producers can never interleave bytes mid-packet.
    pub fn write(&self, mut packet: Packet) -> Result<()> {
        let span = info_span!("link_write", name = %self.name);
        let _entered = span.enter();

        let mut writer = self.writer.lock().expect("writer lock poisoned");
        writer.write_count += 1;

        // Hooks run right-to-left: the protocol nearest the packet layer
        // sees the packet first.
        let chain_len = writer.chain.len();
        for i in (0..chain_len).rev() {
            match writer.chain[i].write_packet(packet)? {
                Outcome::Ready(next) => packet = next,
                Outcome::Stop => return Ok(()),
                Outcome::Disconnect | Outcome::Resync => {
                    return Err(LinkError::DisconnectRequested)
                }
            }
        }

        let mut data = packet.buffer.clone();
        let mut extra = packet.extra.clone();
        for i in (0..chain_len).rev() {
            match writer.chain[i].write_data(data, extra.take())? {
                Outcome::Ready((next, next_extra)) => {
                    data = next;
                    extra = next_extra;
                }
                Outcome::Stop => return Ok(()),
                Outcome::Disconnect | Outcome::Resync => {
                    return Err(LinkError::DisconnectRequested)
                }
            }
        }

        writer.stream.write_all(&data)?;
        writer.stream.flush()?;

        for i in (0..chain_len).rev() {
            match writer.chain[i].post_write(&packet, &data)? {
                Outcome::Ready(()) => {}
                Outcome::Stop => return Ok(()),
                Outcome::Disconnect | Outcome::Resync => {
                    return Err(LinkError::DisconnectRequested)
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tlmframe_protocol::{BurstProtocol, LengthConfig, LengthProtocol};

    use super::*;

    fn length_protocol() -> Protocol {
        Protocol::Length(
            LengthProtocol::new(
                LengthConfig {
                    bit_offset: 0,
                    bit_size: 8,
                    ..LengthConfig::default()
                },
                0,
                None,
                false,
                None,
            )
            .unwrap(),
        )
    }

    #[test]
    fn reads_framed_packets_from_loopback() {
        let (client, mut server) = RawStream::loopback_pair();
        let mut link = Link::new("test", client, vec![length_protocol()], vec![]).unwrap();

        server.write_all(b"\x03\x01\x02\x02\xAA").unwrap();

        let packet = link.read().unwrap().unwrap();
        assert_eq!(packet.buffer.as_ref(), b"\x03\x01\x02");
        let packet = link.read().unwrap().unwrap();
        assert_eq!(packet.buffer.as_ref(), b"\x02\xAA");
        assert_eq!(link.read_count(), 2);
    }

    #[test]
    fn eof_returns_none() {
        let (client, server) = RawStream::loopback_pair();
        let mut link = Link::new("test", client, vec![length_protocol()], vec![]).unwrap();
        server.shutdown();
        assert!(link.read().unwrap().is_none());
    }

    #[test]
    fn write_serializes_through_chain() {
        let (client, mut server) = RawStream::loopback_pair();
        let link = Link::new(
            "test",
            client,
            vec![],
            vec![Protocol::Burst(BurstProtocol::default())],
        )
        .unwrap();

        link.write(Packet::from_buffer(BytesMut::from(&b"\x09\x08"[..])))
            .unwrap();
        assert_eq!(link.write_count(), 1);

        let mut buf = [0u8; 8];
        let n = server.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"\x09\x08");
    }

    #[test]
    fn cancel_unblocks_reader() {
        let (client, _server) = RawStream::loopback_pair();
        let mut link = Link::new("test", client, vec![length_protocol()], vec![]).unwrap();
        let cancel = link.cancel_handle();

        let handle = std::thread::spawn(move || link.read().unwrap());
        std::thread::sleep(std::time::Duration::from_millis(20));
        cancel.cancel();
        assert!(handle.join().unwrap().is_none());
    }

    #[test]
    fn concurrent_writers_never_interleave() {
        let (client, mut server) = RawStream::loopback_pair();
        let link = Link::new(
            "test",
            client,
            vec![],
            vec![Protocol::Burst(BurstProtocol::default())],
        )
        .unwrap();

        let mut handles = Vec::new();
        for writer_id in 0u8..4 {
            let writer = link.writer();
            handles.push(std::thread::spawn(move || {
                for _ in 0..16 {
                    let payload = vec![writer_id; 8];
                    writer
                        .write(Packet::from_buffer(BytesMut::from(payload.as_slice())))
                        .unwrap();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        // Every 8-byte slot on the wire must be a single writer's bytes.
        let mut wire = vec![0u8; 4 * 16 * 8];
        server.read_exact(&mut wire).unwrap();
        for slot in wire.chunks(8) {
            assert!(slot.iter().all(|&b| b == slot[0]));
        }
        assert_eq!(link.write_count(), 64);
    }
}
