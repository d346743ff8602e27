//! yEnc content encoding
//!
//! Articles carry binary payloads as yEnc text:
//!
//! ```text
//! =ybegin part=2 total=3 line=128 size=300 name=file.bin
//! =ypart begin=101 end=200
//! <escaped data lines>
//! =yend size=100 part=2 pcrc32=89abcdef
//! ```
//!
//! The codec itself is `nntp_rs::yenc_decode`, which also computes the CRC-32
//! of the decoded bytes. This module turns its output into the pipeline's
//! [`DecodedPart`]: part index, terminal-part detection and the declared
//! checksum.

use crate::error::NntpError;
use crate::types::DecodedPart;
use nntp_rs::YencDecoded;

/// Decode a raw article body
///
/// Lines before `=ybegin` are skipped. Both CRLF and LF line endings are accepted.
pub fn decode(body: &[u8], fragment_id: &str) -> Result<DecodedPart, NntpError> {
    let body = skip_preamble(body)
        .ok_or_else(|| NntpError::InvalidResponse("Missing =ybegin header".to_string()))?;
    let decoded = nntp_rs::yenc_decode(body)?;
    if decoded.trailer.size != decoded.data.len() as u64 {
        return Err(NntpError::InvalidResponse(format!(
            "decoded {} bytes, trailer declares {}",
            decoded.data.len(),
            decoded.trailer.size
        )));
    }
    let name = full_name(body).unwrap_or_else(|| decoded.header.name.clone());
    if name.is_empty() {
        return Err(NntpError::InvalidResponse(
            "Empty 'name' parameter".to_string(),
        ));
    }

    Ok(DecodedPart {
        part_index: decoded.header.part.unwrap_or(1),
        is_terminal: is_terminal(&decoded),
        checksum_hex: declared_checksum(&decoded).map(|crc| format!("{:08x}", crc)),
        computed_checksum: decoded.calculated_crc32,
        output_name: name,
        payload: decoded.data,
        fragment_id: fragment_id.to_string(),
    })
}

/// Whether this is the last part of its set
///
/// The last part is the one whose end offset reaches the declared file size;
/// its index is then the part count. Single-part posts are always terminal.
pub fn is_terminal(decoded: &YencDecoded) -> bool {
    match (decoded.header.part, decoded.part.as_ref()) {
        (None, _) => true,
        (Some(_), Some(range)) => range.end == decoded.header.size,
        (Some(part), None) => decoded.header.total.is_none_or(|total| total == part),
    }
}

/// Checksum that covers exactly the decoded bytes
fn declared_checksum(decoded: &YencDecoded) -> Option<u32> {
    if decoded.header.part.is_some() {
        decoded.trailer.pcrc32
    } else {
        decoded.trailer.crc32.or(decoded.trailer.pcrc32)
    }
}

/// Compare a computed CRC-32 with a declared hex value, ignoring case
pub fn verify_checksum(computed: u32, expected_hex: &str) -> bool {
    u32::from_str_radix(expected_hex.trim(), 16).is_ok_and(|expected| expected == computed)
}

fn skip_preamble(body: &[u8]) -> Option<&[u8]> {
    if body.starts_with(b"=ybegin ") {
        return Some(body);
    }
    body.windows(9)
        .position(|w| w == b"\n=ybegin ")
        .map(|at| &body[at + 1..])
}

/// `name=` runs to the end of the `=ybegin` line, spaces included
fn full_name(body: &[u8]) -> Option<String> {
    let end = body.iter().position(|&b| b == b'\n').unwrap_or(body.len());
    let header = String::from_utf8_lossy(&body[..end]);
    let header = header.trim_end_matches('\r');
    let at = header.find(" name=")?;
    Some(header[at + 6..].trim_end().to_string())
}

/// Single-part article body, for fixtures and tests
pub fn encode(data: &[u8], name: &str) -> Result<Vec<u8>, NntpError> {
    nntp_rs::yenc_encode(data, name, 128, None)
}

/// Position of one part within a multi-part set
#[derive(Debug, Clone, Copy)]
pub struct PartInfo {
    /// 1-based part number
    pub part: u32,
    /// Number of parts in the set
    pub total: u32,
    /// 1-based offset of the part's first byte in the whole file
    pub begin: u64,
    /// Size of the whole file
    pub file_size: u64,
}

/// One part of a multi-part set, for fixtures and tests
pub fn encode_part(data: &[u8], name: &str, info: PartInfo) -> Result<Vec<u8>, NntpError> {
    let end = info.begin + data.len() as u64 - 1;
    nntp_rs::yenc_encode(
        data,
        name,
        128,
        Some((info.part, info.total, info.begin, end, info.file_size)),
    )
}
