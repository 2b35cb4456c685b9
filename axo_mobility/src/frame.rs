//! Length-prefixed segment framing
//!
//! A frame is a concatenation of segments, each preceded by its length as a
//! big-endian `u32`. Decoding recovers the encoded segments byte-for-byte;
//! truncated segments and trailing bytes are rejected.

use axo_types::{AxoError, AxoResult};

/// Size of the length prefix in bytes.
pub const LENGTH_PREFIX: usize = 4;

/// Concatenates segments into a single length-prefixed buffer.
pub fn encode_segments<S: AsRef<[u8]>>(segments: &[S]) -> AxoResult<Vec<u8>> {
    let total: usize = segments
        .iter()
        .map(|s| s.as_ref().len() + LENGTH_PREFIX)
        .sum();
    let mut out = Vec::with_capacity(total);
    for segment in segments {
        let segment = segment.as_ref();
        let len = u32::try_from(segment.len()).map_err(|_| {
            AxoError::validation(format!("segment of {} bytes is too large", segment.len()))
        })?;
        out.extend_from_slice(&len.to_be_bytes());
        out.extend_from_slice(segment);
    }
    Ok(out)
}

/// Splits a buffer produced by [`encode_segments`].
pub fn decode_segments(bytes: &[u8]) -> AxoResult<Vec<Vec<u8>>> {
    let mut segments = Vec::new();
    let mut offset = 0;
    while offset < bytes.len() {
        let header = bytes
            .get(offset..offset + LENGTH_PREFIX)
            .ok_or_else(|| AxoError::validation("truncated segment header"))?;
        let len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
        offset += LENGTH_PREFIX;
        let body = bytes.get(offset..offset + len).ok_or_else(|| {
            AxoError::validation(format!(
                "segment declares {} bytes but only {} remain",
                len,
                bytes.len() - offset
            ))
        })?;
        segments.push(body.to_vec());
        offset += len;
    }
    Ok(segments)
}

/// Splits a buffer that must contain exactly `expected` segments.
pub fn decode_exact(bytes: &[u8], expected: usize) -> AxoResult<Vec<Vec<u8>>> {
    let segments = decode_segments(bytes)?;
    if segments.len() != expected {
        return Err(AxoError::validation(format!(
            "expected {} segments, found {}",
            expected,
            segments.len()
        )));
    }
    Ok(segments)
}

/// The transportable form of an active object: its attribute map and the
/// textual definition of its behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectFrame {
    pub attributes: Vec<u8>,
    pub behavior: String,
}

impl ObjectFrame {
    pub fn encode(&self) -> AxoResult<Vec<u8>> {
        encode_segments(&[self.attributes.as_slice(), self.behavior.as_bytes()])
    }

    pub fn decode(bytes: &[u8]) -> AxoResult<Self> {
        let mut segments = decode_exact(bytes, 2)?;
        let behavior = segments.pop().unwrap_or_default();
        let attributes = segments.pop().unwrap_or_default();
        let behavior = String::from_utf8(behavior)
            .map_err(|_| AxoError::validation("behavior segment is not valid UTF-8"))?;
        Ok(Self {
            attributes,
            behavior,
        })
    }
}
