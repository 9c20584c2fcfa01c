//! Per-stream transfer progress

use crate::chunker::TransferChunker;
use crate::dma::{EngineId, TransferRequest};
use spmv_chip::regs::Direction;

/// Progress of one operand or result stream through its DMA engine
///
/// `next_address` always equals `base_address + (total_bytes - bytes_remaining)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelState {
    label: String,
    engine: EngineId,
    direction: Direction,
    base_address: u64,
    next_address: u64,
    bytes_remaining: u64,
    total_bytes: u64,
    chunks_issued: u64,
}

impl ChannelState {
    /// Track `total_bytes` starting at `base_address`
    pub fn new(
        label: impl Into<String>,
        engine: EngineId,
        direction: Direction,
        base_address: u64,
        total_bytes: u64,
    ) -> Self {
        Self {
            label: label.into(),
            engine,
            direction,
            base_address,
            next_address: base_address,
            bytes_remaining: total_bytes,
            total_bytes,
            chunks_issued: 0,
        }
    }

    /// Human-readable name, e.g. `col[2]`
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Engine this stream runs on
    pub const fn engine(&self) -> EngineId {
        self.engine
    }

    /// Transfer direction
    pub const fn direction(&self) -> Direction {
        self.direction
    }

    /// First byte of the stream
    pub const fn base_address(&self) -> u64 {
        self.base_address
    }

    /// Address the next chunk starts at
    pub const fn next_address(&self) -> u64 {
        self.next_address
    }

    /// Bytes not yet submitted
    pub const fn bytes_remaining(&self) -> u64 {
        self.bytes_remaining
    }

    /// Length of the whole stream
    pub const fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Chunks submitted so far
    pub const fn chunks_issued(&self) -> u64 {
        self.chunks_issued
    }

    /// Whether every byte has been submitted
    pub const fn is_drained(&self) -> bool {
        self.bytes_remaining == 0
    }

    /// Descriptor for the next chunk, or `None` once drained
    pub fn next_request(&self, chunker: &TransferChunker) -> Option<TransferRequest> {
        if self.is_drained() {
            return None;
        }
        Some(TransferRequest {
            engine: self.engine,
            address: self.next_address,
            length_bytes: chunker.next_chunk(self.bytes_remaining),
            direction: self.direction,
        })
    }

    /// Record that `request` was accepted by the engine
    pub fn advance(&mut self, request: &TransferRequest) {
        let len = u64::from(request.length_bytes).min(self.bytes_remaining);
        self.next_address += len;
        self.bytes_remaining -= len;
        self.chunks_issued += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spmv_chip::memory::StreamKind;

    #[test]
    fn address_tracks_consumed_bytes() {
        let chunker = TransferChunker::new(64).unwrap();
        let engine = EngineId::new(0, StreamKind::Values);
        let mut ch = ChannelState::new("val[0]", engine, Direction::ToDevice, 0x1000, 200);

        let mut sizes = Vec::new();
        while let Some(req) = ch.next_request(&chunker) {
            assert_eq!(req.address, ch.base_address() + (ch.total_bytes() - ch.bytes_remaining()));
            sizes.push(req.length_bytes);
            ch.advance(&req);
        }

        assert_eq!(sizes, vec![64, 64, 64, 8]);
        assert!(ch.is_drained());
        assert_eq!(ch.next_address(), 0x1000 + 200);
        assert_eq!(ch.chunks_issued(), 4);
    }

    #[test]
    fn empty_stream_is_drained() {
        let chunker = TransferChunker::new(64).unwrap();
        let engine = EngineId::new(1, StreamKind::Output);
        let ch = ChannelState::new("output[1]", engine, Direction::FromDevice, 0, 0);
        assert!(ch.is_drained());
        assert!(ch.next_request(&chunker).is_none());
    }
}
