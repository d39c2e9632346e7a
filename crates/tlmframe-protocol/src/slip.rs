//! RFC 1055 (SLIP) framing: end-character delimited packets with
//! byte-escaping so the delimiter can appear in payloads.

use bytes::{Buf, BytesMut};
use serde_json::json;

use crate::burst::{burst_read_data, BurstFramed, BurstFraming, Reduced};
use crate::error::Result;
use crate::protocol::{Extra, Outcome, ProtocolBase, ProtocolHandler};
use crate::terminated::find_subsequence;

/// SLIP framing configuration. Defaults are the RFC 1055 character values.
#[derive(Debug, Clone)]
pub struct SlipConfig {
    /// Optional character placed at the start of frames.
    pub start_char: Option<u8>,
    /// Strip start/end characters from read packets.
    pub read_strip_characters: bool,
    pub read_enable_escaping: bool,
    pub write_enable_escaping: bool,
    pub end_char: u8,
    pub esc_char: u8,
    pub esc_end_char: u8,
    pub esc_esc_char: u8,
}

impl Default for SlipConfig {
    fn default() -> Self {
        Self {
            start_char: None,
            read_strip_characters: true,
            read_enable_escaping: true,
            write_enable_escaping: true,
            end_char: 0xC0,
            esc_char: 0xDB,
            esc_end_char: 0xDC,
            esc_esc_char: 0xDD,
        }
    }
}

/// SLIP protocol stage.
#[derive(Debug)]
pub struct SlipProtocol {
    framing: BurstFraming,
    config: SlipConfig,
}

impl SlipProtocol {
    pub fn new(config: SlipConfig, allow_empty_data: Option<bool>) -> Result<Self> {
        // The start character doubles as a sync pattern so reads align on
        // frame starts after noise.
        let sync_pattern = config.start_char.map(|c| vec![c]);
        Ok(Self {
            framing: BurstFraming::new(0, sync_pattern, false, allow_empty_data)?,
            config,
        })
    }

    fn unescape(&self, data: &[u8]) -> BytesMut {
        let replace_end = [self.config.esc_char, self.config.esc_end_char];
        let replace_esc = [self.config.esc_char, self.config.esc_esc_char];
        let pass = replace_bytes(data, &replace_end, &[self.config.end_char]);
        replace_bytes(&pass, &replace_esc, &[self.config.esc_char])
    }

    fn escape(&self, data: &[u8]) -> BytesMut {
        let replace_end = [self.config.esc_char, self.config.esc_end_char];
        let replace_esc = [self.config.esc_char, self.config.esc_esc_char];
        let pass = replace_bytes(data, &[self.config.esc_char], &replace_esc);
        replace_bytes(&pass, &[self.config.end_char], &replace_end)
    }
}

/// Replace every occurrence of `from` with `to`, left to right.
fn replace_bytes(data: &[u8], from: &[u8], to: &[u8]) -> BytesMut {
    let mut out = BytesMut::with_capacity(data.len());
    let mut i = 0;
    while i < data.len() {
        if data.len() - i >= from.len() && &data[i..i + from.len()] == from {
            out.extend_from_slice(to);
            i += from.len();
        } else {
            out.extend_from_slice(&data[i..i + 1]);
            i += 1;
        }
    }
    out
}

impl BurstFramed for SlipProtocol {
    fn framing(&mut self) -> &mut BurstFraming {
        &mut self.framing
    }

    fn framing_ref(&self) -> &BurstFraming {
        &self.framing
    }

    fn reduce_to_single_packet(&mut self) -> Result<Reduced> {
        if self.framing.data.is_empty() {
            return Ok(Reduced::Stop);
        }
        // With a start character at index 0 the terminator can legally
        // begin only past it.
        let search_from = usize::from(self.config.start_char.is_some());
        let Some(index) = find_subsequence(&self.framing.data, &[self.config.end_char], search_from)
        else {
            return Ok(Reduced::Stop);
        };

        let packet_data = self.framing.data.split_to(index + 1);
        Ok(Reduced::Packet(packet_data, self.framing.extra.clone()))
    }
}

impl ProtocolHandler for SlipProtocol {
    fn read_data(
        &mut self,
        data: BytesMut,
        extra: Option<Extra>,
    ) -> Result<Outcome<(BytesMut, Option<Extra>)>> {
        let outcome = burst_read_data(self, data, extra)?;
        let Outcome::Ready((mut data, extra)) = outcome else {
            return Ok(outcome);
        };
        if data.is_empty() {
            return Ok(Outcome::Ready((data, extra)));
        }

        if self.config.read_strip_characters {
            if self.config.start_char.is_some() {
                data.advance(1);
            }
            data.truncate(data.len().saturating_sub(1));
        }
        if self.config.read_enable_escaping {
            data = self.unescape(&data);
        }
        Ok(Outcome::Ready((data, extra)))
    }

    fn write_data(
        &mut self,
        data: BytesMut,
        extra: Option<Extra>,
    ) -> Result<Outcome<(BytesMut, Option<Extra>)>> {
        let mut out = BytesMut::with_capacity(data.len() + 2);
        if let Some(start) = self.config.start_char {
            out.extend_from_slice(&[start]);
        }
        if self.config.write_enable_escaping {
            out.extend_from_slice(&self.escape(&data));
        } else {
            out.extend_from_slice(&data);
        }
        out.extend_from_slice(&[self.config.end_char]);
        Ok(Outcome::Ready((out, extra)))
    }

    fn reset(&mut self) {
        self.framing.reset();
    }

    fn base(&self) -> &ProtocolBase {
        &self.framing.base
    }

    fn base_mut(&mut self) -> &mut ProtocolBase {
        &mut self.framing.base
    }

    fn name(&self) -> &'static str {
        "SlipProtocol"
    }

    fn details(&self) -> Extra {
        json!({
            "start_char": self.config.start_char,
            "end_char": self.config.end_char,
            "esc_char": self.config.esc_char,
            "esc_end_char": self.config.esc_end_char,
            "esc_esc_char": self.config.esc_esc_char,
            "read_strip_characters": self.config.read_strip_characters,
            "read_enable_escaping": self.config.read_enable_escaping,
            "write_enable_escaping": self.config.write_enable_escaping,
        })
    }
}
