//! Pooled NAL unit storage and classification.
//!
//! Units are allocated once at startup and cycled between the network
//! receiver and the decoder driver. A unit is owned by exactly one
//! stage at a time; move semantics enforce that, so the pool mutex only
//! guards the free list itself.

use std::sync::Mutex;
use tracing::debug;
use vireo_media::Codec;

const H264_NAL_TYPE_IDR: u8 = 5;
const H264_NAL_TYPE_SPS: u8 = 7;
const H265_NAL_TYPE_IDR_W_RADL: u8 = 19;
const H265_NAL_TYPE_VPS: u8 = 32;

/// Classified role of a NAL unit in the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NalKind {
    /// Parameter sets (VPS/SPS/PPS, concatenated by the sender). Feeds
    /// decoder configuration, not the streaming input.
    Config,
    /// IDR frame, decodable without prior state.
    KeyFrame,
    /// P-frame, decodable only with correct prior state.
    DeltaFrame,
}

/// One compressed video unit in a reusable backing buffer.
#[derive(Debug)]
pub struct NalUnit {
    pub frame_index: u64,
    pub kind: NalKind,
    buf: Vec<u8>,
    len: usize,
    consumed: usize,
}

impl NalUnit {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            frame_index: 0,
            kind: NalKind::DeltaFrame,
            buf: vec![0; capacity],
            len: 0,
            consumed: 0,
        }
    }

    /// The valid payload; may be shorter than the backing buffer.
    pub fn payload(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// Mutable payload for the network receiver to fill.
    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.buf[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Bytes not yet copied into decoder input buffers. Partial
    /// consumption persists on the head of the pending queue between
    /// feed attempts.
    pub fn remaining(&self) -> &[u8] {
        &self.buf[self.consumed..self.len]
    }

    pub fn advance(&mut self, n: usize) {
        self.consumed = (self.consumed + n).min(self.len);
    }

    pub fn fully_consumed(&self) -> bool {
        self.consumed >= self.len
    }

    fn reset(&mut self, len: usize) {
        if self.buf.len() < len {
            self.buf.resize(len, 0);
        }
        self.frame_index = 0;
        self.kind = NalKind::DeltaFrame;
        self.len = len;
        self.consumed = 0;
    }
}

/// Fixed-size pool of NAL units.
///
/// `obtain` is called from the network context, `recycle` from the
/// decoder-driving context; one mutex over the free list is the only
/// synchronization between them. Contention stays low because the slot
/// count exceeds the steady-state in-flight count by a wide margin.
pub struct NalPool {
    free: Mutex<Vec<NalUnit>>,
    slots: usize,
}

impl NalPool {
    pub fn new(slots: usize, buffer_bytes: usize) -> Self {
        let free = (0..slots)
            .map(|_| NalUnit::with_capacity(buffer_bytes))
            .collect();
        Self {
            free: Mutex::new(free),
            slots,
        }
    }

    /// Claim a free unit with at least `len` bytes of backing storage,
    /// or `None` when the pool is exhausted. Never blocks; the caller's
    /// policy on `None` is to drop the incoming unit.
    pub fn obtain(&self, len: usize) -> Option<NalUnit> {
        let mut free = self.free.lock().unwrap();
        let mut unit = free.pop()?;
        drop(free);
        unit.reset(len);
        Some(unit)
    }

    /// Return a unit to the free list.
    pub fn recycle(&self, unit: NalUnit) {
        let mut free = self.free.lock().unwrap();
        if free.len() >= self.slots {
            // A unit was recycled twice or came from another pool.
            debug!("recycling into a full pool, dropping unit");
            return;
        }
        free.push(unit);
    }

    pub fn free_count(&self) -> usize {
        self.free.lock().unwrap().len()
    }

    pub fn slots(&self) -> usize {
        self.slots
    }
}

/// Classify a NAL unit by the type code at byte 4, after the Annex-B
/// start code. Returns `None` for units too short to carry a header.
pub fn classify(codec: Codec, payload: &[u8]) -> Option<NalKind> {
    let header = *payload.get(4)?;
    let kind = match codec {
        Codec::H264 => match header & 0x1f {
            H264_NAL_TYPE_SPS => NalKind::Config,
            H264_NAL_TYPE_IDR => NalKind::KeyFrame,
            _ => NalKind::DeltaFrame,
        },
        Codec::H265 => match (header >> 1) & 0x3f {
            H265_NAL_TYPE_VPS => NalKind::Config,
            H265_NAL_TYPE_IDR_W_RADL => NalKind::KeyFrame,
            _ => NalKind::DeltaFrame,
        },
    };
    Some(kind)
}
