//! Hardware video decoder abstraction.
//!
//! This crate provides:
//! - Codec and decoder configuration types
//! - The `VideoDecoder`/`DecoderFactory` traits the frame pipeline drives
//! - The closed `DecoderEvent` set a decoder reports back through
//! - A `StubDecoder` implementation for tests and demos
//!
//! The platform decoder is a black box: the pipeline copies compressed
//! units into numbered input buffers it was told are free, and later
//! receives numbered output buffers tagged with the presentation
//! timestamp it supplied. Which OS thread delivers an event is
//! unspecified; consumers are expected to funnel events onto a single
//! processing context.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub mod stub;
pub use stub::{StubDecoder, StubDecoderFactory, StubSubmission};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("no decoder available: {0}")]
    Unavailable(String),
    #[error("decoder error: {0}")]
    Decoder(String),
    #[error("invalid input buffer {0}")]
    InvalidBuffer(usize),
}

pub type MediaResult<T> = Result<T, MediaError>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Codec {
    H264,
    H265,
}

/// Latency tier requested from the platform decoder.
///
/// `Realtime` maps to the low-latency decoder path; switching tiers
/// requires a full decoder rebuild, same as a codec switch.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DecoderPriority {
    Realtime,
    Background,
}

/// Everything needed to bring up one decoder instance.
///
/// `csd` carries the codec-specific initialization data (the parameter
/// set unit received from the stream) verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoderConfig {
    pub codec: Codec,
    pub priority: DecoderPriority,
    pub csd: Vec<u8>,
}

/// Events a decoder reports back to its consumer.
///
/// Delivery order is meaningful per kind (output buffers arrive in
/// decode order) but events may originate on any thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecoderEvent {
    /// Input buffer `index` is free and may be filled.
    InputBufferAvailable(usize),
    /// Output buffer `index` holds a decoded frame tagged with the
    /// presentation timestamp supplied at queue time.
    OutputBufferAvailable { index: usize, timestamp_us: u64 },
    /// The output format changed (resolution, color space).
    FormatChanged { width: u32, height: u32 },
    /// The codec reported an error. Not fatal by contract; the stream
    /// is expected to resync via a key-frame.
    Error(String),
}

/// Sink through which a decoder delivers its events.
pub type EventSink = Arc<dyn Fn(DecoderEvent) + Send + Sync>;

/// One live hardware decoder instance.
pub trait VideoDecoder: Send {
    /// Copy as much of `data` as fits into input buffer `index`.
    /// Returns the number of bytes copied.
    fn write_input(&mut self, index: usize, data: &[u8]) -> MediaResult<usize>;

    /// Submit input buffer `index` to the codec. `codec_config` marks
    /// the buffer as initialization data rather than stream input.
    fn queue_input(&mut self, index: usize, timestamp_us: u64, codec_config: bool)
        -> MediaResult<()>;

    /// Release output buffer `index` back to the codec. With `render`
    /// set, the buffer is forwarded to the display surface; completion
    /// is signaled out of band by the surface, not by this call.
    fn release_output(&mut self, index: usize, render: bool);

    /// Stop the codec. Late events become no-ops.
    fn stop(&mut self);
}

/// Creates decoder instances. The factory outlives individual decoders
/// since a codec or priority switch rebuilds the instance.
pub trait DecoderFactory: Send + Sync {
    fn create(&self, config: &DecoderConfig, events: EventSink)
        -> MediaResult<Box<dyn VideoDecoder>>;
}
