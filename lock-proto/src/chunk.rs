//! Chunked notifications
//!
//! A serialized envelope larger than one notification is sent as a run of
//! chunks. Every chunk carries the total length of the whole envelope, so
//! the receiver knows when it is complete without extra framing.

use std::ops::RangeInclusive;

use crate::crypto::{IV_LEN, TAG_LEN};
use crate::tlv::{TlvDecode, TlvEncode, TlvReader, TlvWriter};
use crate::{Error, Result};

/// ATT notification header
pub const ATT_HEADER_LEN: usize = 3;

/// TLV overhead of a chunk: the `total` record (2 + 4) and a long-form
/// `payload` header (2 + 4)
pub const CHUNK_OVERHEAD: usize = 12;

/// Largest value a run of chunks may declare
pub const MAX_VALUE_LEN: u32 = 64 * 1024;

/// Smallest envelope that can decrypt: IV and tag around empty plaintext
pub const MIN_ENVELOPE_LEN: u32 = (IV_LEN + TAG_LEN) as u32;

/// Payload bytes that fit in one notification at `mtu`, never below 1
pub fn payload_size(mtu: u16) -> usize {
    usize::from(mtu)
        .saturating_sub(ATT_HEADER_LEN + CHUNK_OVERHEAD)
        .max(1)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Length of the whole reassembled value, not of what remains
    pub total: u32,
    pub payload: Vec<u8>,
}

impl Chunk {
    const TOTAL: u8 = 0x01;
    const PAYLOAD: u8 = 0x02;

    /// Split `bytes` into chunks of at most `max_payload` bytes
    ///
    /// An empty buffer still yields one chunk, with `total = 0`.
    pub fn split(bytes: &[u8], max_payload: usize) -> Vec<Chunk> {
        let total = bytes.len() as u32;
        if bytes.is_empty() {
            return vec![Chunk {
                total,
                payload: Vec::new(),
            }];
        }

        bytes
            .chunks(max_payload.max(1))
            .map(|payload| Chunk {
                total,
                payload: payload.to_vec(),
            })
            .collect()
    }
}

impl TlvEncode for Chunk {
    fn encode_tlv(&self, writer: &mut TlvWriter<'_>) {
        writer.u32(Self::TOTAL, self.total);
        writer.bytes(Self::PAYLOAD, &self.payload);
    }
}

impl TlvDecode for Chunk {
    fn decode_tlv(reader: &TlvReader<'_>) -> Result<Self> {
        Ok(Self {
            total: reader.u32(Self::TOTAL)?,
            payload: reader.bytes(Self::PAYLOAD)?.to_vec(),
        })
    }
}

/// Accumulates chunks of one subscription into complete values
///
/// The first chunk of a value fixes its total, which must lie within the
/// accepted range.
#[derive(Debug)]
pub struct Reassembler {
    buffer: Vec<u8>,
    total: Option<u32>,
    accepted: RangeInclusive<u32>,
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::with_limits(0..=MAX_VALUE_LEN)
    }
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only totals in `accepted` are buffered
    pub fn with_limits(accepted: RangeInclusive<u32>) -> Self {
        Self {
            buffer: Vec::new(),
            total: None,
            accepted,
        }
    }

    /// For encrypted notification envelopes
    pub fn for_envelopes() -> Self {
        Self::with_limits(MIN_ENVELOPE_LEN..=MAX_VALUE_LEN)
    }

    /// Bytes held for the value in progress
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Feed one chunk; returns the whole value once its total is reached
    pub fn push(&mut self, chunk: Chunk) -> Result<Option<Vec<u8>>> {
        if self.total.is_none() && !self.accepted.contains(&chunk.total) {
            return Err(Error::invalid(format!(
                "chunk declares total {}, accepted {:?}",
                chunk.total, self.accepted
            )));
        }
        let total = *self.total.get_or_insert(chunk.total);
        if chunk.total != total {
            let error = Error::invalid(format!(
                "chunk declares total {}, value in progress declares {total}",
                chunk.total
            ));
            self.reset();
            return Err(error);
        }

        self.buffer.extend_from_slice(&chunk.payload);
        let received = self.buffer.len();
        let total = total as usize;

        tracing::debug!(received, total, "chunk received");

        match received.cmp(&total) {
            std::cmp::Ordering::Less => Ok(None),
            std::cmp::Ordering::Equal => {
                self.total = None;
                Ok(Some(std::mem::take(&mut self.buffer)))
            }
            std::cmp::Ordering::Greater => {
                self.reset();
                Err(Error::invalid(format!(
                    "received {received} bytes for a value of {total}"
                )))
            }
        }
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.total = None;
    }
}
