use std::sync::Arc;

use tracing::info;

use tlmframe_link::Link;
use tlmframe_packet::{load_registry, parse_hex_bytes};
use tlmframe_protocol::{
    BurstProtocol, FixedConfig, FixedProtocol, LengthConfig, LengthProtocol,
    PreidentifiedProtocol, Protocol, SlipConfig, SlipProtocol,
};
use tlmframe_transport::RawStream;

use crate::cmd::{Framing, SniffArgs};
use crate::exit::{
    link_error, protocol_error, registry_error, transport_error, CliError, CliResult, SUCCESS,
    USAGE,
};

fn build_chain(args: &SniffArgs) -> CliResult<Vec<Protocol>> {
    let sync = match &args.sync {
        Some(text) => Some(
            parse_hex_bytes(text)
                .ok_or_else(|| CliError::new(USAGE, format!("invalid sync pattern {text:?}")))?,
        ),
        None => None,
    };

    let framing = match args.framing {
        Framing::Burst => Protocol::Burst(
            BurstProtocol::new(0, sync, false, None)
                .map_err(|err| protocol_error("building protocol", err))?,
        ),
        Framing::Length => Protocol::Length(
            LengthProtocol::new(
                LengthConfig {
                    bit_offset: args.length_bit_offset,
                    bit_size: args.length_bit_size,
                    max_length: args.max_length,
                    ..LengthConfig::default()
                },
                0,
                sync,
                false,
                None,
            )
            .map_err(|err| protocol_error("building protocol", err))?,
        ),
        Framing::Preidentified => Protocol::Preidentified(
            PreidentifiedProtocol::new(sync, args.max_length, None)
                .map_err(|err| protocol_error("building protocol", err))?,
        ),
        Framing::Slip => Protocol::Slip(
            SlipProtocol::new(SlipConfig::default(), None)
                .map_err(|err| protocol_error("building protocol", err))?,
        ),
    };

    let mut chain = vec![framing];
    if let Some(path) = &args.registry {
        let index = load_registry(path).map_err(|err| registry_error("loading registry", err))?;
        chain.push(Protocol::Fixed(
            FixedProtocol::new(FixedConfig::default(), Arc::new(index), 0, None, false, None)
                .map_err(|err| protocol_error("building protocol", err))?,
        ));
    }
    Ok(chain)
}

fn hex_dump(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn run(args: SniffArgs) -> CliResult<i32> {
    let chain = build_chain(&args)?;
    for protocol in &chain {
        info!(protocol = protocol.name(), details = %protocol.details(), "attached");
    }

    let stream = RawStream::connect_tcp(&args.address)
        .map_err(|err| transport_error("connecting", err))?;
    let mut link = Link::new(args.address.clone(), stream, chain, vec![])
        .map_err(|err| link_error("attaching chain", err))?;

    let mut printed = 0usize;
    loop {
        let packet = match link.read().map_err(|err| link_error("reading", err))? {
            Some(packet) => packet,
            None => {
                info!("link disconnected");
                return Ok(SUCCESS);
            }
        };

        let identity = match (&packet.target_name, &packet.packet_name) {
            (Some(target), Some(name)) => format!("{target}/{name}"),
            _ => "UNIDENTIFIED".to_string(),
        };
        println!(
            "[{identity}] {} bytes: {}",
            packet.buffer.len(),
            hex_dump(&packet.buffer)
        );

        printed += 1;
        if args.count.is_some_and(|count| printed >= count) {
            return Ok(SUCCESS);
        }
    }
}
