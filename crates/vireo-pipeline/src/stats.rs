//! Pipeline counters and per-frame decode latency tracking.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::frame_map::FrameMap;
use vireo_common::now_us;

/// Shared counters updated from all three pipeline contexts.
#[derive(Debug, Default)]
pub struct PipelineStats {
    /// Units accepted from the network.
    pub nals_received: AtomicU64,
    /// Units dropped before decode (pool exhausted, queue cap, gating).
    pub nals_dropped: AtomicU64,
    /// Frames reported decoded by the codec.
    pub frames_decoded: AtomicU64,
    /// Decoded frames evicted or released undisplayed.
    pub frames_discarded: AtomicU64,
    /// Frames handed to the renderer.
    pub frames_presented: AtomicU64,
    /// Output buffers with no matching frame-map entry.
    pub correlation_failures: AtomicU64,
    /// Errors reported by the codec.
    pub decoder_errors: AtomicU64,

    latency_sum_us: AtomicU64,
    latency_samples: AtomicU64,
    in_flight: Mutex<FrameMap>,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineStatsSnapshot {
    pub nals_received: u64,
    pub nals_dropped: u64,
    pub frames_decoded: u64,
    pub frames_discarded: u64,
    pub frames_presented: u64,
    pub correlation_failures: u64,
    pub decoder_errors: u64,
    pub avg_decode_latency_us: u64,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a frame entering the decoder.
    pub fn decoder_input(&self, frame_index: u64) {
        let mut in_flight = self.in_flight.lock().unwrap();
        in_flight.put(frame_index, now_us());
    }

    /// Mark a frame leaving the decoder; accumulates its latency if the
    /// input mark is still present.
    pub fn decoder_output(&self, frame_index: u64) {
        self.frames_decoded.fetch_add(1, Ordering::Relaxed);
        let submitted = {
            let mut in_flight = self.in_flight.lock().unwrap();
            in_flight.find(frame_index)
        };
        if let Some(submitted_us) = submitted {
            let latency = now_us().saturating_sub(submitted_us);
            self.latency_sum_us.fetch_add(latency, Ordering::Relaxed);
            self.latency_samples.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> PipelineStatsSnapshot {
        let samples = self.latency_samples.load(Ordering::Relaxed);
        let avg = if samples == 0 {
            0
        } else {
            self.latency_sum_us.load(Ordering::Relaxed) / samples
        };
        PipelineStatsSnapshot {
            nals_received: self.nals_received.load(Ordering::Relaxed),
            nals_dropped: self.nals_dropped.load(Ordering::Relaxed),
            frames_decoded: self.frames_decoded.load(Ordering::Relaxed),
            frames_discarded: self.frames_discarded.load(Ordering::Relaxed),
            frames_presented: self.frames_presented.load(Ordering::Relaxed),
            correlation_failures: self.correlation_failures.load(Ordering::Relaxed),
            decoder_errors: self.decoder_errors.load(Ordering::Relaxed),
            avg_decode_latency_us: avg,
        }
    }
}
