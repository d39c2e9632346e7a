//! Bit-precise reads and writes of typed fields inside a byte buffer.
//!
//! Integer fields may be any width from 1 to 64 bits and need not be byte
//! aligned; extraction shifts across byte boundaries in either endianness.
//! Float, string, and block fields must start on a byte boundary. A negative
//! `bit_offset` addresses from the end of the buffer, which is how trailing
//! fields (e.g. a CRC) are located in variable-length packets.

use bytes::BytesMut;

use crate::error::{AccessorError, Result};
use crate::field::{DataType, Endianness, FieldSpec, Overflow, Value};

/// Stateless engine for reading and writing packet fields.
pub struct BinaryAccessor;

impl BinaryAccessor {
    /// Read a field's value out of `buffer`.
    pub fn read(buffer: &[u8], field: &FieldSpec) -> Result<Value> {
        match field.array_element_count {
            Some(count) => read_array(buffer, field, count),
            None => read_scalar(
                buffer,
                field.bit_offset,
                field.bit_size,
                field.data_type,
                field.endianness,
            ),
        }
    }

    /// Write `value` into `buffer` at the field's position.
    ///
    /// The buffer is never grown: a field that extends past the end fails
    /// with `BufferInsufficient` unless the caller pre-sized the buffer.
    pub fn write(buffer: &mut BytesMut, field: &FieldSpec, value: &Value) -> Result<()> {
        match field.array_element_count {
            Some(count) => write_array(buffer, field, count, value),
            None => write_scalar(
                buffer,
                field.bit_offset,
                field.bit_size,
                field.data_type,
                field.endianness,
                field.overflow,
                value,
            ),
        }
    }
}

fn insufficient(
    op: &'static str,
    buffer_len: usize,
    data_type: DataType,
    bit_offset: i32,
    bit_size: i32,
) -> AccessorError {
    AccessorError::BufferInsufficient {
        op,
        buffer_len,
        data_type,
        bit_offset,
        bit_size,
    }
}

/// Validate the given offset/size combination and resolve a negative offset
/// (measured from the buffer end) into an absolute bit offset.
fn resolve_offset(
    op: &'static str,
    bit_offset: i32,
    bit_size: i32,
    data_type: DataType,
    buffer_len: usize,
) -> Result<i64> {
    if bit_size <= 0 && !matches!(data_type, DataType::String | DataType::Block) {
        return Err(AccessorError::NonPositiveBitSize {
            bit_size,
            data_type,
        });
    }
    if bit_size <= 0 && bit_offset < 0 {
        return Err(AccessorError::NegativeSizeNegativeOffset {
            bit_size,
            bit_offset,
        });
    }

    let mut offset = i64::from(bit_offset);
    if offset < 0 {
        offset += buffer_len as i64 * 8;
        if offset < 0 {
            return Err(insufficient(op, buffer_len, data_type, bit_offset, bit_size));
        }
    }
    Ok(offset)
}

fn byte_aligned(bit_offset: i64) -> bool {
    bit_offset % 8 == 0
}

fn even_bit_size(bit_size: i64) -> bool {
    matches!(bit_size, 8 | 16 | 32 | 64)
}

/// Byte bounds of the field, plus whether the buffer can hold it. A
/// little-endian bitfield is allowed to nominally extend past the end because
/// its window is recomputed around the most significant bit.
fn check_bounds(
    offset: i64,
    bit_size: i64,
    buffer_len: usize,
    endianness: Endianness,
    data_type: DataType,
) -> (bool, i64, i64) {
    let lower = offset / 8;
    let upper = (offset + bit_size - 1) / 8;

    let mut fits = true;
    if upper >= buffer_len as i64 {
        let le_bitfield = endianness == Endianness::Little
            && matches!(data_type, DataType::Int | DataType::Uint)
            && !(byte_aligned(offset) && even_bit_size(bit_size))
            && lower < buffer_len as i64;
        if !le_bitfield {
            fits = false;
        }
    }
    (fits, lower, upper)
}

/// Byte window holding a bitfield. Little-endian bitfields anchor on the
/// byte containing the most significant bit and extend backwards.
fn bitfield_window(
    op: &'static str,
    offset: i64,
    bit_size: i64,
    endianness: Endianness,
    data_type: DataType,
    lower: i64,
    upper: i64,
    buffer_len: usize,
    given_offset: i32,
    given_size: i32,
) -> Result<(usize, usize, bool)> {
    match endianness {
        Endianness::Big => Ok((lower as usize, upper as usize, false)),
        Endianness::Little => {
            let num_bytes = ((offset % 8) + bit_size - 1) / 8 + 1;
            let win_upper = offset / 8;
            let win_lower = win_upper - num_bytes + 1;
            if win_lower < 0 {
                return Err(AccessorError::InvalidLittleEndianBitfield {
                    bit_offset: given_offset,
                    bit_size: given_size,
                });
            }
            if win_upper >= buffer_len as i64 {
                return Err(insufficient(
                    op,
                    buffer_len,
                    data_type,
                    given_offset,
                    given_size,
                ));
            }
            Ok((win_lower as usize, win_upper as usize, true))
        }
    }
}

fn read_bitfield(window: &[u8], start_bits: u32, bit_size: i64) -> u128 {
    let start_mask: u8 = if start_bits == 0 {
        0xFF
    } else {
        0xFF >> start_bits
    };
    let mut acc = u128::from(window[0] & start_mask);
    for &byte in &window[1..] {
        acc = (acc << 8) | u128::from(byte);
    }
    let right_shift = window.len() as i64 * 8 - i64::from(start_bits) - bit_size;
    acc >> right_shift
}

fn sign_extend(value: u128, bit_size: i64) -> i64 {
    if bit_size > 1 && (value >> (bit_size - 1)) & 1 == 1 {
        (value as i128 - (1i128 << bit_size)) as i64
    } else {
        value as i64
    }
}

fn read_scalar(
    buffer: &[u8],
    given_offset: i32,
    given_size: i32,
    data_type: DataType,
    endianness: Endianness,
) -> Result<Value> {
    let offset = resolve_offset("read", given_offset, given_size, data_type, buffer.len())?;
    let mut bit_size = i64::from(given_size);

    // Non-positive sizes on strings/blocks consume to the end of the buffer,
    // a negative size excluding that many trailing bits.
    if bit_size <= 0 {
        bit_size = buffer.len() as i64 * 8 - offset + bit_size;
        if bit_size == 0 {
            return Ok(match data_type {
                DataType::String => Value::Text(String::new()),
                _ => Value::Bytes(Vec::new()),
            });
        }
        if bit_size < 0 {
            return Err(insufficient(
                "read",
                buffer.len(),
                data_type,
                given_offset,
                given_size,
            ));
        }
    }

    let (fits, lower, upper) = check_bounds(offset, bit_size, buffer.len(), endianness, data_type);
    if !fits {
        return Err(insufficient(
            "read",
            buffer.len(),
            data_type,
            given_offset,
            given_size,
        ));
    }

    match data_type {
        DataType::String | DataType::Block => {
            if !byte_aligned(offset) {
                return Err(AccessorError::NotByteAligned {
                    bit_offset: given_offset,
                    data_type,
                });
            }
            let bytes = &buffer[lower as usize..=upper as usize];
            if data_type == DataType::Block {
                return Ok(Value::Bytes(bytes.to_vec()));
            }
            // Strings terminate at the first NUL; non-UTF-8 contents come
            // back as raw bytes rather than failing the read.
            let text = match bytes.iter().position(|&b| b == 0) {
                Some(pos) => &bytes[..pos],
                None => bytes,
            };
            match std::str::from_utf8(text) {
                Ok(s) => Ok(Value::Text(s.to_string())),
                Err(_) => Ok(Value::Bytes(bytes.to_vec())),
            }
        }
        DataType::Int | DataType::Uint => {
            let raw = if byte_aligned(offset) && even_bit_size(bit_size) {
                let bytes = &buffer[lower as usize..=upper as usize];
                let mut acc: u128 = 0;
                match endianness {
                    Endianness::Big => {
                        for &byte in bytes {
                            acc = (acc << 8) | u128::from(byte);
                        }
                    }
                    Endianness::Little => {
                        for &byte in bytes.iter().rev() {
                            acc = (acc << 8) | u128::from(byte);
                        }
                    }
                }
                acc
            } else {
                let (win_lower, win_upper, reversed) = bitfield_window(
                    "read",
                    offset,
                    bit_size,
                    endianness,
                    data_type,
                    lower,
                    upper,
                    buffer.len(),
                    given_offset,
                    given_size,
                )?;
                let mut window = buffer[win_lower..=win_upper].to_vec();
                if reversed {
                    window.reverse();
                }
                read_bitfield(&window, (offset % 8) as u32, bit_size)
            };
            if data_type == DataType::Int {
                Ok(Value::Int(sign_extend(raw, bit_size)))
            } else {
                Ok(Value::Uint(raw as u64))
            }
        }
        DataType::Float => {
            if !byte_aligned(offset) {
                return Err(AccessorError::NotByteAligned {
                    bit_offset: given_offset,
                    data_type,
                });
            }
            let bytes = &buffer[lower as usize..=upper as usize];
            match bit_size {
                32 => {
                    let raw: [u8; 4] = bytes.try_into().unwrap();
                    let v = match endianness {
                        Endianness::Big => f32::from_be_bytes(raw),
                        Endianness::Little => f32::from_le_bytes(raw),
                    };
                    Ok(Value::Float(f64::from(v)))
                }
                64 => {
                    let raw: [u8; 8] = bytes.try_into().unwrap();
                    let v = match endianness {
                        Endianness::Big => f64::from_be_bytes(raw),
                        Endianness::Little => f64::from_le_bytes(raw),
                    };
                    Ok(Value::Float(v))
                }
                _ => Err(AccessorError::InvalidFloatSize {
                    bit_size: given_size,
                }),
            }
        }
    }
}

/// Signed/unsigned range of an integer field, plus the unsigned "hex"
/// maximum used by the `ErrorAllowHex` fill-pattern escape hatch.
fn overflow_ranges(bit_size: i64, data_type: DataType) -> (i128, i128, u128) {
    let hex_max: u128 = if bit_size >= 128 {
        u128::MAX
    } else {
        (1u128 << bit_size) - 1
    };
    match data_type {
        DataType::Int if bit_size > 1 => {
            let max = (1i128 << (bit_size - 1)) - 1;
            (-(max + 1), max, hex_max)
        }
        DataType::Int => (-1, 1, 1),
        _ => (0, hex_max as i128, hex_max),
    }
}

fn check_overflow(
    value: i128,
    bit_size: i64,
    data_type: DataType,
    overflow: Overflow,
    given_size: i32,
) -> Result<i128> {
    let (min, max, hex_max) = overflow_ranges(bit_size, data_type);
    let out_of_range = || AccessorError::Overflow {
        value: value.to_string(),
        bit_size: given_size,
        data_type,
    };

    match overflow {
        Overflow::Truncate => {
            let masked = (value as u128) & hex_max;
            if data_type == DataType::Int && bit_size > 1 && masked as i128 > max {
                Ok(masked as i128 - (hex_max as i128 + 1))
            } else {
                Ok(masked as i128)
            }
        }
        Overflow::Saturate => Ok(value.clamp(min, max)),
        Overflow::Error | Overflow::ErrorAllowHex => {
            if value > max {
                if overflow == Overflow::ErrorAllowHex && value >= 0 && value as u128 <= hex_max {
                    Ok(value)
                } else {
                    Err(out_of_range())
                }
            } else if value < min {
                Err(out_of_range())
            } else {
                Ok(value)
            }
        }
    }
}

fn write_bitfield(
    buffer: &mut BytesMut,
    offset: i64,
    bit_size: i64,
    endianness: Endianness,
    data_type: DataType,
    pattern: u128,
    lower: i64,
    upper: i64,
    given_offset: i32,
    given_size: i32,
) -> Result<()> {
    let (win_lower, win_upper, reversed) = bitfield_window(
        "write",
        offset,
        bit_size,
        endianness,
        data_type,
        lower,
        upper,
        buffer.len(),
        given_offset,
        given_size,
    )?;
    let mut window = buffer[win_lower..=win_upper].to_vec();
    if reversed {
        window.reverse();
    }

    let start_bits = offset % 8;
    let start_mask: u8 = if start_bits == 0 {
        0
    } else {
        ((0xFFu16 << (8 - start_bits)) & 0xFF) as u8
    };
    let total_bits = window.len() as i64 * 8;
    let end_bits = total_bits - start_bits - bit_size;
    let end_mask: u8 = if end_bits == 0 { 0 } else { 0xFF >> (8 - end_bits) };

    let mut acc = u128::from(window[0] & start_mask);
    let shift = bit_size - (8 - start_bits);
    if shift < 0 {
        acc = (acc >> -shift) + pattern;
    } else {
        acc = (acc << shift) + pattern;
    }
    acc = (acc << end_bits) + u128::from(window[window.len() - 1] & end_mask);

    for slot in window.iter_mut().rev() {
        *slot = (acc & 0xFF) as u8;
        acc >>= 8;
    }
    if reversed {
        window.reverse();
    }
    buffer[win_lower..=win_upper].copy_from_slice(&window);
    Ok(())
}

fn write_scalar(
    buffer: &mut BytesMut,
    given_offset: i32,
    given_size: i32,
    data_type: DataType,
    endianness: Endianness,
    overflow: Overflow,
    value: &Value,
) -> Result<()> {
    let offset = resolve_offset("write", given_offset, given_size, data_type, buffer.len())?;
    let mut bit_size = i64::from(given_size);

    let mismatch = || AccessorError::TypeMismatch {
        value: value.to_string(),
        data_type,
    };

    if bit_size <= 0 {
        // Only STRING/BLOCK reach here; size tracks the value being written.
        let len = value.as_bytes().ok_or_else(mismatch)?.len();
        bit_size = len as i64 * 8;
    }

    let (fits, lower, upper) = check_bounds(offset, bit_size, buffer.len(), endianness, data_type);
    if !fits && given_size > 0 {
        return Err(insufficient(
            "write",
            buffer.len(),
            data_type,
            given_offset,
            given_size,
        ));
    }

    match data_type {
        DataType::String | DataType::Block => {
            if !byte_aligned(offset) {
                return Err(AccessorError::NotByteAligned {
                    bit_offset: given_offset,
                    data_type,
                });
            }
            let bytes = value.as_bytes().ok_or_else(mismatch)?;
            let lower = lower as usize;

            if given_size <= 0 {
                // Consume-to-end field: the value must exactly fill the
                // region from the offset up to the excluded trailing bytes.
                // The buffer is never resized.
                let end_bytes = (-i64::from(given_size) / 8) as usize;
                let region_end = buffer
                    .len()
                    .checked_sub(end_bytes)
                    .filter(|end| *end >= lower)
                    .ok_or_else(|| {
                        insufficient("write", buffer.len(), data_type, given_offset, given_size)
                    })?;
                if bytes.len() != region_end - lower {
                    return Err(insufficient(
                        "write",
                        buffer.len(),
                        data_type,
                        given_offset,
                        given_size,
                    ));
                }
                buffer[lower..region_end].copy_from_slice(bytes);
            } else {
                let field_len = (bit_size / 8) as usize;
                if bytes.len() > field_len {
                    if overflow == Overflow::Truncate {
                        buffer[lower..lower + field_len].copy_from_slice(&bytes[..field_len]);
                    } else {
                        return Err(AccessorError::ValueTooLong {
                            value_len: bytes.len(),
                            field_len,
                            data_type,
                        });
                    }
                } else {
                    buffer[lower..lower + bytes.len()].copy_from_slice(bytes);
                    // Pad the rest of the field with zeros.
                    for slot in &mut buffer[lower + bytes.len()..lower + field_len] {
                        *slot = 0;
                    }
                }
            }
            Ok(())
        }
        DataType::Int | DataType::Uint => {
            let raw: i128 = match value {
                Value::Int(v) => i128::from(*v),
                Value::Uint(v) => i128::from(*v),
                _ => return Err(mismatch()),
            };
            let resolved = check_overflow(raw, bit_size, data_type, overflow, given_size)?;
            let (_, _, hex_max) = overflow_ranges(bit_size, data_type);
            let pattern = (resolved as u128) & hex_max;

            if byte_aligned(offset) && even_bit_size(bit_size) {
                let lower = lower as usize;
                let upper = upper as usize;
                let n = upper - lower + 1;
                match endianness {
                    Endianness::Big => {
                        for (i, slot) in buffer[lower..=upper].iter_mut().enumerate() {
                            *slot = (pattern >> ((n - 1 - i) * 8)) as u8;
                        }
                    }
                    Endianness::Little => {
                        for (i, slot) in buffer[lower..=upper].iter_mut().enumerate() {
                            *slot = (pattern >> (i * 8)) as u8;
                        }
                    }
                }
                Ok(())
            } else {
                write_bitfield(
                    buffer,
                    offset,
                    bit_size,
                    endianness,
                    data_type,
                    pattern,
                    lower,
                    upper,
                    given_offset,
                    given_size,
                )
            }
        }
        DataType::Float => {
            if !byte_aligned(offset) {
                return Err(AccessorError::NotByteAligned {
                    bit_offset: given_offset,
                    data_type,
                });
            }
            let v: f64 = match value {
                Value::Float(v) => *v,
                Value::Int(v) => *v as f64,
                Value::Uint(v) => *v as f64,
                _ => return Err(mismatch()),
            };
            let lower = lower as usize;
            match bit_size {
                32 => {
                    let bytes = match endianness {
                        Endianness::Big => (v as f32).to_be_bytes(),
                        Endianness::Little => (v as f32).to_le_bytes(),
                    };
                    buffer[lower..lower + 4].copy_from_slice(&bytes);
                    Ok(())
                }
                64 => {
                    let bytes = match endianness {
                        Endianness::Big => v.to_be_bytes(),
                        Endianness::Little => v.to_le_bytes(),
                    };
                    buffer[lower..lower + 8].copy_from_slice(&bytes);
                    Ok(())
                }
                _ => Err(AccessorError::InvalidFloatSize {
                    bit_size: given_size,
                }),
            }
        }
    }
}

/// Number of elements and resolved start offset for an array field.
fn array_extent(
    op: &'static str,
    buffer_len: usize,
    field: &FieldSpec,
    count: i32,
) -> Result<(i64, usize)> {
    if field.bit_size <= 0 {
        return Err(AccessorError::NonPositiveBitSize {
            bit_size: field.bit_size,
            data_type: field.data_type,
        });
    }
    if count <= 0 && field.bit_offset < 0 {
        return Err(AccessorError::NegativeSizeNegativeOffset {
            bit_size: count,
            bit_offset: field.bit_offset,
        });
    }

    let mut offset = i64::from(field.bit_offset);
    if offset < 0 {
        offset += buffer_len as i64 * 8;
        if offset < 0 {
            return Err(insufficient(
                op,
                buffer_len,
                field.data_type,
                field.bit_offset,
                field.bit_size,
            ));
        }
    }

    let n = if count > 0 {
        count as usize
    } else {
        let available = buffer_len as i64 * 8 - offset;
        if available < 0 {
            return Err(insufficient(
                op,
                buffer_len,
                field.data_type,
                field.bit_offset,
                field.bit_size,
            ));
        }
        if available % i64::from(field.bit_size) != 0 {
            return Err(AccessorError::UnevenArrayFill {
                available_bits: available,
                bit_size: field.bit_size,
            });
        }
        (available / i64::from(field.bit_size)) as usize
    };
    Ok((offset, n))
}

fn read_array(buffer: &[u8], field: &FieldSpec, count: i32) -> Result<Value> {
    if buffer.is_empty() {
        return Ok(Value::Array(Vec::new()));
    }
    let (offset, n) = array_extent("read", buffer.len(), field, count)?;

    let mut items = Vec::with_capacity(n);
    for i in 0..n {
        let element_offset = offset + i as i64 * i64::from(field.bit_size);
        items.push(read_scalar(
            buffer,
            element_offset as i32,
            field.bit_size,
            field.data_type,
            field.endianness,
        )?);
    }
    Ok(Value::Array(items))
}

fn write_array(buffer: &mut BytesMut, field: &FieldSpec, count: i32, value: &Value) -> Result<()> {
    let items = match value {
        Value::Array(items) => items,
        _ => {
            return Err(AccessorError::TypeMismatch {
                value: value.to_string(),
                data_type: field.data_type,
            })
        }
    };
    let (offset, n) = array_extent("write", buffer.len(), field, count)?;
    if items.len() != n {
        return Err(AccessorError::ArrayLengthMismatch {
            value_len: items.len(),
            expected: n,
        });
    }

    for (i, item) in items.iter().enumerate() {
        let element_offset = offset + i as i64 * i64::from(field.bit_size);
        write_scalar(
            buffer,
            element_offset as i32,
            field.bit_size,
            field.data_type,
            field.endianness,
            field.overflow,
            item,
        )?;
    }
    Ok(())
}
