//! The protocol abstraction: one stage of a bidirectional framing pipeline.
//!
//! A chain of protocols sits between a transport and the packet layer.
//! Inbound bytes flow through `read_data` hooks left-to-right until one
//! protocol emits a delineated buffer; outbound packets flow through
//! `write_packet`/`write_data` hooks in the reverse direction. Control flow
//! between stages is carried by [`Outcome`], never by in-band byte values.

use bytes::BytesMut;
use serde_json::json;

use tlmframe_packet::Packet;

use crate::burst::BurstProtocol;
use crate::crc_protocol::CrcProtocol;
use crate::error::Result;
use crate::fixed::FixedProtocol;
use crate::length::LengthProtocol;
use crate::preidentified::PreidentifiedProtocol;
use crate::slip::SlipProtocol;
use crate::terminated::TerminatedProtocol;

/// Out-of-band metadata that rides alongside a data buffer through the
/// chain (e.g. the preidentified framing's extra JSON).
pub type Extra = serde_json::Value;

/// Control result of a protocol hook.
///
/// `Stop` means no further output is currently derivable and the caller
/// should supply more bytes; it is an expected condition, not an error.
/// `Disconnect` tells the owning connection to tear down. `Resync` asks the
/// framing layer to restart its sync search.
#[derive(Debug, PartialEq)]
pub enum Outcome<T> {
    Ready(T),
    Stop,
    Disconnect,
    Resync,
}

impl<T> Outcome<T> {
    pub fn is_ready(&self) -> bool {
        matches!(self, Outcome::Ready(_))
    }

    /// Unwrap `Ready` or panic; intended for tests.
    pub fn unwrap_ready(self) -> T {
        match self {
            Outcome::Ready(value) => value,
            Outcome::Stop => panic!("outcome was Stop"),
            Outcome::Disconnect => panic!("outcome was Disconnect"),
            Outcome::Resync => panic!("outcome was Resync"),
        }
    }
}

/// State shared by every protocol: the empty-data contract and chain
/// position. Owned by value inside each concrete protocol.
#[derive(Debug, Clone, Default)]
pub struct ProtocolBase {
    /// Tri-state empty-input behavior: `Some(true)` always passes an empty
    /// poll onward, `Some(false)` always answers `Stop`, `None` inherits
    /// from chain position (only the last protocol in the read chain
    /// answers `Stop`).
    pub allow_empty_data: Option<bool>,
    /// Set during chain assembly; consulted only when `allow_empty_data`
    /// is `None`.
    pub last_in_chain: bool,
}

impl ProtocolBase {
    pub fn new(allow_empty_data: Option<bool>) -> Self {
        Self {
            allow_empty_data,
            last_in_chain: false,
        }
    }

    /// Response to a zero-byte poll when this protocol has nothing buffered.
    pub fn empty_response(&self, extra: Option<Extra>) -> Outcome<(BytesMut, Option<Extra>)> {
        match self.allow_empty_data {
            Some(true) => Outcome::Ready((BytesMut::new(), extra)),
            Some(false) => Outcome::Stop,
            None if self.last_in_chain => Outcome::Stop,
            None => Outcome::Ready((BytesMut::new(), extra)),
        }
    }
}

/// Behavior of one pipeline stage. Implementations keep all partial-read
/// state private and never assume a chain position.
pub trait ProtocolHandler {
    /// Accumulate inbound bytes and emit one delineated buffer if possible.
    fn read_data(
        &mut self,
        data: BytesMut,
        extra: Option<Extra>,
    ) -> Result<Outcome<(BytesMut, Option<Extra>)>>;

    /// Transform an outbound buffer before the next (leftward) stage.
    fn write_data(
        &mut self,
        data: BytesMut,
        extra: Option<Extra>,
    ) -> Result<Outcome<(BytesMut, Option<Extra>)>> {
        Ok(Outcome::Ready((data, extra)))
    }

    /// Finalize a fully-identified inbound packet (e.g. stamp identity
    /// discovered during framing).
    fn read_packet(&mut self, packet: Packet) -> Result<Outcome<Packet>> {
        Ok(Outcome::Ready(packet))
    }

    /// Modify an outbound packet before it is serialized.
    fn write_packet(&mut self, packet: Packet) -> Result<Outcome<Packet>> {
        Ok(Outcome::Ready(packet))
    }

    /// Hook invoked after the transport write completes, for protocols that
    /// block on a response. The base implementation passes through.
    fn post_write(&mut self, _packet: &Packet, _data: &[u8]) -> Result<Outcome<()>> {
        Ok(Outcome::Ready(()))
    }

    /// Clear buffered bytes and per-connection state. Called on connect and
    /// disconnect.
    fn reset(&mut self);

    fn base(&self) -> &ProtocolBase;

    fn base_mut(&mut self) -> &mut ProtocolBase;

    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Effective configuration for diagnostics.
    fn details(&self) -> Extra {
        json!({})
    }
}

/// The closed set of framing protocols a chain can contain.
#[derive(Debug)]
pub enum Protocol {
    Burst(BurstProtocol),
    Length(LengthProtocol),
    Fixed(FixedProtocol),
    Preidentified(PreidentifiedProtocol),
    Crc(CrcProtocol),
    Terminated(TerminatedProtocol),
    Slip(SlipProtocol),
}

impl Protocol {
    fn handler(&mut self) -> &mut dyn ProtocolHandler {
        match self {
            Protocol::Burst(p) => p,
            Protocol::Length(p) => p,
            Protocol::Fixed(p) => p,
            Protocol::Preidentified(p) => p,
            Protocol::Crc(p) => p,
            Protocol::Terminated(p) => p,
            Protocol::Slip(p) => p,
        }
    }

    fn handler_ref(&self) -> &dyn ProtocolHandler {
        match self {
            Protocol::Burst(p) => p,
            Protocol::Length(p) => p,
            Protocol::Fixed(p) => p,
            Protocol::Preidentified(p) => p,
            Protocol::Crc(p) => p,
            Protocol::Terminated(p) => p,
            Protocol::Slip(p) => p,
        }
    }

    pub fn read_data(
        &mut self,
        data: BytesMut,
        extra: Option<Extra>,
    ) -> Result<Outcome<(BytesMut, Option<Extra>)>> {
        self.handler().read_data(data, extra)
    }

    pub fn write_data(
        &mut self,
        data: BytesMut,
        extra: Option<Extra>,
    ) -> Result<Outcome<(BytesMut, Option<Extra>)>> {
        self.handler().write_data(data, extra)
    }

    pub fn read_packet(&mut self, packet: Packet) -> Result<Outcome<Packet>> {
        self.handler().read_packet(packet)
    }

    pub fn write_packet(&mut self, packet: Packet) -> Result<Outcome<Packet>> {
        self.handler().write_packet(packet)
    }

    pub fn post_write(&mut self, packet: &Packet, data: &[u8]) -> Result<Outcome<()>> {
        self.handler().post_write(packet, data)
    }

    pub fn reset(&mut self) {
        self.handler().reset();
    }

    pub fn name(&self) -> &'static str {
        self.handler_ref().name()
    }

    pub fn details(&self) -> Extra {
        self.handler_ref().details()
    }

    /// Mark whether this protocol is the final stage of its read chain.
    /// Consulted by the empty-input contract when `allow_empty_data` is
    /// left to inherit.
    pub fn set_last_in_chain(&mut self, last: bool) {
        self.handler().base_mut().last_in_chain = last;
    }

    pub fn allow_empty_data(&self) -> Option<bool> {
        self.handler_ref().base().allow_empty_data
    }
}

/// Mark the final protocol of a read chain so the inherit mode of the
/// empty-input contract resolves correctly.
pub fn mark_chain_positions(chain: &mut [Protocol]) {
    let last = chain.len().saturating_sub(1);
    for (i, protocol) in chain.iter_mut().enumerate() {
        protocol.set_last_in_chain(i == last);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_response_tristate() {
        let mut base = ProtocolBase::new(Some(true));
        assert!(base.empty_response(None).is_ready());

        base.allow_empty_data = Some(false);
        assert_eq!(base.empty_response(None), Outcome::Stop);

        base.allow_empty_data = None;
        base.last_in_chain = false;
        assert!(base.empty_response(None).is_ready());
        base.last_in_chain = true;
        assert_eq!(base.empty_response(None), Outcome::Stop);
    }

    #[test]
    fn mark_chain_positions_flags_only_last() {
        let mut chain = vec![
            Protocol::Burst(BurstProtocol::default()),
            Protocol::Burst(BurstProtocol::default()),
        ];
        mark_chain_positions(&mut chain);
        assert!(!chain[0].handler_ref().base().last_in_chain);
        assert!(chain[1].handler_ref().base().last_in_chain);
    }
}
