//! 落盘索引字节的外层封装（压缩 + 校验）
//!
//! ```text
//! ┌──────────────────────────────────┐
//! │ flags        (u8)                │  bit0 = LZ4
//! │ uncomp_size  (u32 LE)            │
//! │ payload      (raw / compressed)  │
//! │ CRC32        (u32 LE)            │  覆盖之前的所有字节
//! └──────────────────────────────────┘
//! ```

use byteorder::{ByteOrder, LittleEndian};

use crate::common::{QueryError, Result};

const FLAG_LZ4:    u8    = 0b0000_0001;
const HEADER_LEN:  usize = 5;
const TRAILER_LEN: usize = 4;

/// 压缩方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionType {
    None,
    #[default]
    Lz4,
}

pub fn compress(data: &[u8], codec: CompressionType) -> Result<Vec<u8>> {
    match codec {
        CompressionType::None => Ok(data.to_vec()),
        CompressionType::Lz4  =>
            lz4::block::compress(data, None, false)
                .map_err(|e| QueryError::Compression(e.to_string())),
    }
}

pub fn decompress(data: &[u8], codec: CompressionType, uncompressed_len: usize) -> Result<Vec<u8>> {
    match codec {
        CompressionType::None => Ok(data.to_vec()),
        CompressionType::Lz4  => {
            let len = i32::try_from(uncompressed_len)
                .map_err(|_| QueryError::Compression(format!("size too large: {uncompressed_len}")))?;
            lz4::block::decompress(data, Some(len))
                .map_err(|e| QueryError::Compression(e.to_string()))
        }
    }
}

/// 封装：header + payload + CRC
pub fn seal(data: &[u8], codec: CompressionType) -> Result<Vec<u8>> {
    let uncomp_size = u32::try_from(data.len())
        .map_err(|_| QueryError::InvalidData(format!("index too large: {} bytes", data.len())))?;
    let payload = compress(data, codec)?;
    let flags = match codec {
        CompressionType::None => 0,
        CompressionType::Lz4  => FLAG_LZ4,
    };

    let mut out = Vec::with_capacity(HEADER_LEN + payload.len() + TRAILER_LEN);
    out.push(flags);
    out.extend_from_slice(&uncomp_size.to_le_bytes());
    out.extend_from_slice(&payload);

    let crc = crc32fast::hash(&out);
    out.extend_from_slice(&crc.to_le_bytes());
    Ok(out)
}

/// 解封：校验 CRC 后解压
pub fn open(data: &[u8]) -> Result<Vec<u8>> {
    if data.len() < HEADER_LEN + TRAILER_LEN {
        return Err(QueryError::Truncated(format!("envelope too short: {} bytes", data.len())));
    }
    let payload_end = data.len() - TRAILER_LEN;
    let stored_crc  = LittleEndian::read_u32(&data[payload_end..]);
    if stored_crc != crc32fast::hash(&data[..payload_end]) {
        return Err(QueryError::ChecksumMismatch);
    }

    let flags       = data[0];
    let uncomp_size = LittleEndian::read_u32(&data[1..HEADER_LEN]) as usize;
    let codec = if flags & FLAG_LZ4 != 0 { CompressionType::Lz4 } else { CompressionType::None };
    let raw = decompress(&data[HEADER_LEN..payload_end], codec, uncomp_size)?;
    if raw.len() != uncomp_size {
        return Err(QueryError::InvalidData(format!(
            "envelope size mismatch: header {uncomp_size}, payload {}", raw.len(),
        )));
    }
    Ok(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> Vec<u8> {
        (0..512u32).flat_map(|i| (i % 7).to_le_bytes()).collect()
    }

    #[test]
    fn sealed_bytes_open_to_same_payload() {
        for codec in [CompressionType::None, CompressionType::Lz4] {
            let sealed = seal(&payload(), codec).unwrap();
            assert_eq!(open(&sealed).unwrap(), payload());
        }
    }

    #[test]
    fn lz4_shrinks_repetitive_payload() {
        let plain = seal(&payload(), CompressionType::None).unwrap();
        let lz4   = seal(&payload(), CompressionType::Lz4).unwrap();
        assert!(lz4.len() < plain.len());
    }

    #[test]
    fn corruption_is_detected() {
        let mut sealed = seal(&payload(), CompressionType::Lz4).unwrap();
        sealed[HEADER_LEN] ^= 0xFF;
        assert!(matches!(open(&sealed), Err(QueryError::ChecksumMismatch)));
        assert!(matches!(open(&[0u8; 3]), Err(QueryError::Truncated(_))));
    }
}
