//! Pipeline and session configuration.
//!
//! All knobs are immutable once handed to the pipeline: construction
//! parameters live in [`PipelineConfig`], per-connection parameters
//! arrive in a fresh [`SessionConfig`] with every connect.

use serde::{Deserialize, Serialize};
use vireo_common::Error;
use vireo_media::{Codec, DecoderPriority};

/// Construction-time tunables for the pipeline.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Total NAL units allocated up front. Caps outstanding compressed
    /// data end to end; the network side drops when this runs out.
    pub pool_slots: usize,

    /// Initial backing-buffer size per pooled unit. Buffers grow on
    /// first contact with a larger unit and then stay grown.
    pub buffer_bytes: usize,

    /// Decoded-frame backlog depth in the output queue. 1 means every
    /// newly decoded frame evicts the previous undisplayed one.
    pub backlog_capacity: usize,

    /// Slot count of the timestamp correlation table. Must be a power
    /// of two.
    pub frame_map_slots: usize,
}

impl PipelineConfig {
    /// Check the invariants the pipeline assumes at construction time.
    pub fn validate(&self) -> vireo_common::Result<()> {
        if self.pool_slots == 0 {
            return Err(Error::config("pool_slots must be at least 1"));
        }
        if self.backlog_capacity == 0 {
            return Err(Error::config("backlog_capacity must be at least 1"));
        }
        if !self.frame_map_slots.is_power_of_two() {
            return Err(Error::config("frame_map_slots must be a power of two"));
        }
        Ok(())
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            pool_slots: 100,
            buffer_bytes: 64 * 1024,
            backlog_capacity: 1,
            frame_map_slots: 4096,
        }
    }
}

/// Parameters supplied by the server at connect time. Replaced wholesale
/// on reconnect; never mutated in place.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SessionConfig {
    pub codec: Codec,
    pub priority: DecoderPriority,
    pub view_width: u32,
    pub view_height: u32,
    pub refresh_rate: f32,
}

impl SessionConfig {
    pub fn new(codec: Codec, realtime: bool, view_width: u32, view_height: u32, refresh_rate: f32) -> Self {
        Self {
            codec,
            priority: if realtime {
                DecoderPriority::Realtime
            } else {
                DecoderPriority::Background
            },
            view_width,
            view_height,
            refresh_rate,
        }
    }
}
