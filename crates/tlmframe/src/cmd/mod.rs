use clap::{Args, Subcommand};
use std::path::PathBuf;

use crate::exit::CliResult;

pub mod crc;
pub mod defs;
pub mod sniff;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show version information.
    Version(VersionArgs),
    /// Print the packet definitions in a registry file.
    Defs(DefsArgs),
    /// Compute a CRC over hex bytes.
    Crc(CrcArgs),
    /// Connect to a TCP endpoint, frame the stream, and print packets.
    Sniff(SniffArgs),
}

pub fn run(command: Command) -> CliResult<i32> {
    match command {
        Command::Version(args) => version::run(args),
        Command::Defs(args) => defs::run(args),
        Command::Crc(args) => crc::run(args),
        Command::Sniff(args) => sniff::run(args),
    }
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build information.
    #[arg(long)]
    pub extended: bool,
}

#[derive(Args, Debug)]
pub struct DefsArgs {
    /// Registry JSON file.
    pub registry: PathBuf,
}

#[derive(Args, Debug)]
pub struct CrcArgs {
    /// Bytes to checksum, as hex (e.g. 0xDEADBEEF).
    pub data: String,
    /// CRC width in bits.
    #[arg(long, default_value = "32")]
    pub bits: u32,
    /// Polynomial override, as hex.
    #[arg(long)]
    pub poly: Option<String>,
    /// Seed override, as hex.
    #[arg(long)]
    pub seed: Option<String>,
    /// XOR the final value with all ones.
    #[arg(long)]
    pub xor: Option<bool>,
    /// Bit-reflect input bytes and the final value.
    #[arg(long)]
    pub reflect: Option<bool>,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum Framing {
    Burst,
    Length,
    Preidentified,
    Slip,
}

#[derive(Args, Debug)]
pub struct SniffArgs {
    /// TCP endpoint to connect to (host:port).
    pub address: String,
    /// Framing strategy for the inbound stream.
    #[arg(long, value_enum, default_value = "burst")]
    pub framing: Framing,
    /// Sync pattern to search for, as hex.
    #[arg(long)]
    pub sync: Option<String>,
    /// Length field bit offset (length framing).
    #[arg(long, default_value = "0")]
    pub length_bit_offset: u32,
    /// Length field bit size (length framing).
    #[arg(long, default_value = "16")]
    pub length_bit_size: u32,
    /// Maximum declared length accepted before treating the stream as
    /// corrupt.
    #[arg(long)]
    pub max_length: Option<u64>,
    /// Registry file used to identify packets after framing.
    #[arg(long)]
    pub registry: Option<PathBuf>,
    /// Exit after printing this many packets.
    #[arg(long)]
    pub count: Option<usize>,
}
