//! Block payload compression for the N5 codecs.
//!
//! `lz4` payloads use the `LZ4Block` framing written by the Java N5
//! implementation: a sequence of frames, each a 21-byte header (magic,
//! method and level token, little-endian compressed length, original length
//! and a masked xxhash32 checksum) followed by the frame bytes, closed by an
//! empty frame.

use std::hash::Hasher;
use std::io::{self, Read, Write};

use bzip2::read::BzDecoder;
use bzip2::write::BzEncoder;
use flate2::read::{GzDecoder, ZlibDecoder};
use flate2::write::{GzEncoder, ZlibEncoder};
use twox_hash::XxHash32;
use xz2::read::XzDecoder;
use xz2::write::XzEncoder;

use crate::domain::Compression;

const LZ4_MAGIC: &[u8; 8] = b"LZ4Block";
const LZ4_HEADER_LEN: usize = LZ4_MAGIC.len() + 13;
const LZ4_METHOD_RAW: u8 = 0x10;
const LZ4_METHOD_LZ4: u8 = 0x20;
const LZ4_LEVEL_BASE: u32 = 10;
const LZ4_MIN_BLOCK: usize = 64;
const LZ4_MAX_BLOCK: usize = 1 << (LZ4_LEVEL_BASE + 0x0F);
const LZ4_SEED: u32 = 0x9747_b28c;

pub fn compress(compression: Compression, raw: &[u8]) -> io::Result<Vec<u8>> {
    match compression {
        Compression::Raw => Ok(raw.to_vec()),
        Compression::Gzip {
            level,
            use_zlib: false,
        } => {
            let mut encoder = GzEncoder::new(Vec::new(), gzip_level(level));
            encoder.write_all(raw)?;
            encoder.finish()
        }
        Compression::Gzip {
            level,
            use_zlib: true,
        } => {
            let mut encoder = ZlibEncoder::new(Vec::new(), gzip_level(level));
            encoder.write_all(raw)?;
            encoder.finish()
        }
        Compression::Bzip2 { block_size } => {
            let level = bzip2::Compression::new(block_size.clamp(1, 9));
            let mut encoder = BzEncoder::new(Vec::new(), level);
            encoder.write_all(raw)?;
            encoder.finish()
        }
        Compression::Xz { preset } => {
            let mut encoder = XzEncoder::new(Vec::new(), preset.min(9));
            encoder.write_all(raw)?;
            encoder.finish()
        }
        Compression::Lz4 { block_size } => lz4_block_encode(raw, block_size as usize),
    }
}

pub fn decompress(compression: Compression, bytes: &[u8]) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    match compression {
        Compression::Raw => out.extend_from_slice(bytes),
        Compression::Gzip {
            use_zlib: false, ..
        } => {
            GzDecoder::new(bytes).read_to_end(&mut out)?;
        }
        Compression::Gzip { use_zlib: true, .. } => {
            ZlibDecoder::new(bytes).read_to_end(&mut out)?;
        }
        Compression::Bzip2 { .. } => {
            BzDecoder::new(bytes).read_to_end(&mut out)?;
        }
        Compression::Xz { .. } => {
            XzDecoder::new(bytes).read_to_end(&mut out)?;
        }
        Compression::Lz4 { .. } => return lz4_block_decode(bytes),
    }
    Ok(out)
}

fn gzip_level(level: i32) -> flate2::Compression {
    match level {
        0..=9 => flate2::Compression::new(level as u32),
        _ => flate2::Compression::default(),
    }
}

fn invalid(reason: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, reason)
}

fn lz4_checksum(frame: &[u8]) -> u32 {
    let mut hasher = XxHash32::with_seed(LZ4_SEED);
    hasher.write(frame);
    (hasher.finish() as u32) & 0x0FFF_FFFF
}

/// Level bits of the frame token: `ceil(log2(block_size)) - 10`.
fn lz4_level(block_size: usize) -> u8 {
    let bits = usize::BITS - (block_size - 1).leading_zeros();
    bits.saturating_sub(LZ4_LEVEL_BASE) as u8
}

fn lz4_header(token: u8, compressed: usize, original: usize, check: u32) -> [u8; LZ4_HEADER_LEN] {
    let mut header = [0u8; LZ4_HEADER_LEN];
    header[..LZ4_MAGIC.len()].copy_from_slice(LZ4_MAGIC);
    header[8] = token;
    header[9..13].copy_from_slice(&(compressed as u32).to_le_bytes());
    header[13..17].copy_from_slice(&(original as u32).to_le_bytes());
    header[17..21].copy_from_slice(&check.to_le_bytes());
    header
}

fn lz4_block_encode(raw: &[u8], block_size: usize) -> io::Result<Vec<u8>> {
    let block_size = block_size.clamp(LZ4_MIN_BLOCK, LZ4_MAX_BLOCK);
    let level = lz4_level(block_size);
    let mut out = Vec::with_capacity(raw.len() + 2 * LZ4_HEADER_LEN);
    for frame in raw.chunks(block_size) {
        let packed = lz4::block::compress(frame, None, false)?;
        let check = lz4_checksum(frame);
        if packed.len() < frame.len() {
            out.extend(lz4_header(LZ4_METHOD_LZ4 | level, packed.len(), frame.len(), check));
            out.extend(packed);
        } else {
            out.extend(lz4_header(LZ4_METHOD_RAW | level, frame.len(), frame.len(), check));
            out.extend_from_slice(frame);
        }
    }
    out.extend(lz4_header(LZ4_METHOD_RAW | level, 0, 0, 0));
    Ok(out)
}

fn lz4_block_decode(bytes: &[u8]) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut offset = 0;
    while offset < bytes.len() {
        let header = bytes
            .get(offset..offset + LZ4_HEADER_LEN)
            .ok_or_else(|| invalid("truncated lz4 frame header".to_string()))?;
        if &header[..LZ4_MAGIC.len()] != LZ4_MAGIC {
            return Err(invalid("missing LZ4Block magic".to_string()));
        }
        let token = header[8];
        let le = |at: usize| {
            u32::from_le_bytes([header[at], header[at + 1], header[at + 2], header[at + 3]])
        };
        let compressed = le(9) as usize;
        let original = le(13) as usize;
        let check = le(17);
        let max_len = 1usize << (LZ4_LEVEL_BASE + u32::from(token & 0x0F));
        if original > max_len || compressed > max_len || (original == 0) != (compressed == 0) {
            return Err(invalid(format!(
                "lz4 frame lengths {compressed}/{original} invalid for blocks of {max_len}"
            )));
        }
        offset += LZ4_HEADER_LEN;

        if compressed == 0 && original == 0 {
            if check != 0 {
                return Err(invalid("non-zero checksum on the closing lz4 frame".to_string()));
            }
            break;
        }
        let body = bytes
            .get(offset..offset + compressed)
            .ok_or_else(|| invalid("truncated lz4 frame".to_string()))?;
        offset += compressed;

        let frame = match token & 0xF0 {
            LZ4_METHOD_RAW if compressed == original => body.to_vec(),
            LZ4_METHOD_LZ4 => lz4::block::decompress(body, Some(original as i32))?,
            method => {
                return Err(invalid(format!(
                    "lz4 frame method {method:#x} with {compressed} of {original} bytes"
                )));
            }
        };
        if frame.len() != original {
            return Err(invalid(format!(
                "lz4 frame decoded to {} bytes, expected {original}",
                frame.len()
            )));
        }
        if lz4_checksum(&frame) != check {
            return Err(invalid("lz4 frame checksum mismatch".to_string()));
        }
        out.extend(frame);
    }
    Ok(out)
}
