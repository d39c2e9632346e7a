//! Full-chain roundtrips over the loopback transport: what one link writes,
//! the peer link reads back byte-for-byte.

use bytes::BytesMut;

use tlmframe_link::Link;
use tlmframe_packet::Packet;
use tlmframe_protocol::{
    BadCrcStrategy, CrcConfig, CrcProtocol, LengthConfig, LengthProtocol, PreidentifiedProtocol,
    Protocol, SlipConfig, SlipProtocol,
};
use tlmframe_transport::RawStream;

fn length_protocol(fill: bool) -> Protocol {
    Protocol::Length(
        LengthProtocol::new(
            LengthConfig {
                // Past the 2-byte sync pattern
                bit_offset: 16,
                bit_size: 16,
                ..LengthConfig::default()
            },
            0,
            Some(vec![0x1A, 0xCF]),
            fill,
            None,
        )
        .expect("valid length protocol config"),
    )
}

#[test]
fn length_framed_roundtrip_with_sync_fill() {
    let (client, server) = RawStream::loopback_pair();
    let writer = Link::new("writer", client, vec![], vec![length_protocol(true)]).unwrap();
    let mut reader = Link::new("reader", server, vec![length_protocol(false)], vec![]).unwrap();

    // Sync and length placeholders are back-filled on write.
    let payload = b"\x00\x00\x00\x00\x07\x08\x09";
    writer
        .write(Packet::from_buffer(BytesMut::from(&payload[..])))
        .unwrap();

    let packet = reader.read().unwrap().expect("reader should get a packet");
    assert_eq!(&packet.buffer[..2], b"\x1A\xCF");
    assert_eq!(&packet.buffer[4..], b"\x07\x08\x09");
    assert_eq!(packet.buffer.len(), payload.len());
}

#[test]
fn crc_wrapped_slip_chain_roundtrip() {
    // Chain order: transport <-> SLIP framing <-> CRC check.
    let chain = || -> Vec<Protocol> {
        vec![
            Protocol::Slip(SlipProtocol::new(SlipConfig::default(), None).unwrap()),
            Protocol::Crc(
                CrcProtocol::with_default_crc(
                    CrcConfig {
                        strip_crc: true,
                        bad_strategy: BadCrcStrategy::Disconnect,
                        ..CrcConfig::default()
                    },
                    None,
                )
                .unwrap(),
            ),
        ]
    };

    let (client, server) = RawStream::loopback_pair();
    let writer = Link::new("writer", client, vec![], chain()).unwrap();
    let mut reader = Link::new("reader", server, chain(), vec![]).unwrap();

    // Payload includes bytes that SLIP must escape.
    let payload = b"\xC0\xDB\x01\x02";
    writer
        .write(Packet::from_buffer(BytesMut::from(&payload[..])))
        .unwrap();

    let packet = reader.read().unwrap().expect("reader should get a packet");
    assert_eq!(packet.buffer.as_ref(), payload);
}

#[test]
fn corrupted_crc_disconnects_the_reader() {
    let crc_chain = |strategy| -> Vec<Protocol> {
        vec![Protocol::Crc(
            CrcProtocol::with_default_crc(
                CrcConfig {
                    bad_strategy: strategy,
                    ..CrcConfig::default()
                },
                None,
            )
            .unwrap(),
        )]
    };

    let (client, mut server_stream) = RawStream::loopback_pair();
    let writer = Link::new("writer", client, vec![], crc_chain(BadCrcStrategy::Error)).unwrap();

    writer
        .write(Packet::from_buffer(BytesMut::from(&b"\x01\x02\x03\x04"[..])))
        .unwrap();

    // Corrupt one payload bit on the wire before the reader sees it.
    use std::io::{Read, Write};
    let mut wire = [0u8; 8];
    server_stream.read_exact(&mut wire).unwrap();
    wire[0] ^= 0x01;

    let (reader_stream, mut feeder) = RawStream::loopback_pair();
    let mut reader = Link::new(
        "reader",
        reader_stream,
        crc_chain(BadCrcStrategy::Disconnect),
        vec![],
    )
    .unwrap();
    feeder.write_all(&wire).unwrap();

    assert!(reader.read().unwrap().is_none());
}

#[test]
fn preidentified_chain_carries_identity() {
    let chain = || vec![Protocol::Preidentified(
        PreidentifiedProtocol::new(None, Some(1024), None).unwrap(),
    )];

    let (client, server) = RawStream::loopback_pair();
    let writer = Link::new("writer", client, vec![], chain()).unwrap();
    let mut reader = Link::new("reader", server, chain(), vec![]).unwrap();

    let mut outgoing = Packet::from_buffer(BytesMut::from(&b"\x10\x20\x30"[..]));
    outgoing.target_name = Some("SAT".to_string());
    outgoing.packet_name = Some("HEALTH".to_string());
    writer.write(outgoing).unwrap();

    let packet = reader.read().unwrap().expect("reader should get a packet");
    assert_eq!(packet.buffer.as_ref(), b"\x10\x20\x30");
    assert_eq!(packet.target_name.as_deref(), Some("SAT"));
    assert_eq!(packet.packet_name.as_deref(), Some("HEALTH"));
    assert!(packet.received_time.is_some());
}

#[test]
fn byte_at_a_time_stream_yields_identical_packets() {
    use std::io::Write;

    let make_reader_chain = || vec![length_protocol(false)];

    // Reference: the whole stream at once.
    let (client, mut feeder) = RawStream::loopback_pair();
    let mut reference = Link::new("ref", client, make_reader_chain(), vec![]).unwrap();
    let wire = b"\x1A\xCF\x00\x06\x01\x02\x1A\xCF\x00\x05\x03";
    feeder.write_all(wire).unwrap();
    let first = reference.read().unwrap().unwrap();
    let second = reference.read().unwrap().unwrap();

    // Byte-at-a-time on a fresh link.
    let (client, mut feeder) = RawStream::loopback_pair();
    let mut chunked = Link::new("chunked", client, make_reader_chain(), vec![]).unwrap();
    let feed = std::thread::spawn(move || {
        for byte in wire {
            feeder.write_all(&[*byte]).unwrap();
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        feeder
    });
    let chunked_first = chunked.read().unwrap().unwrap();
    let chunked_second = chunked.read().unwrap().unwrap();
    let _feeder = feed.join().unwrap();

    assert_eq!(first.buffer, chunked_first.buffer);
    assert_eq!(second.buffer, chunked_second.buffer);
    assert_eq!(chunked_first.buffer.as_ref(), b"\x1A\xCF\x00\x06\x01\x02");
    assert_eq!(chunked_second.buffer.as_ref(), b"\x1A\xCF\x00\x05\x03");
}
