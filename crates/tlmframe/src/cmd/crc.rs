use tlmframe_packet::parse_hex_bytes;
use tlmframe_protocol::Crc;

use crate::cmd::CrcArgs;
use crate::exit::{protocol_error, CliError, CliResult, SUCCESS, USAGE};

fn parse_hex_u64(text: &str) -> Result<u64, CliError> {
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    u64::from_str_radix(digits, 16)
        .map_err(|err| CliError::new(USAGE, format!("invalid hex value {text:?}: {err}")))
}

pub fn run(args: CrcArgs) -> CliResult<i32> {
    let data = parse_hex_bytes(&args.data)
        .ok_or_else(|| CliError::new(USAGE, format!("invalid hex data {:?}", args.data)))?;

    let poly = args.poly.as_deref().map(parse_hex_u64).transpose()?;
    let seed = args.seed.as_deref().map(parse_hex_u64).transpose()?;

    let crc = Crc::with_params(args.bits, poly, seed, args.xor, args.reflect)
        .map_err(|err| protocol_error("building CRC", err))?;

    let value = crc.calc(&data);
    let hex_digits = (args.bits / 4) as usize;
    println!("0x{value:0width$X}", width = hex_digits);
    Ok(SUCCESS)
}
