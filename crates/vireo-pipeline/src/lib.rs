//! Frame pipeline and server-connection pacing core.
//!
//! This crate coordinates three independent timelines:
//! - network arrival of compressed NAL units
//! - decoder completion events arriving from arbitrary threads
//! - a fixed-cadence render loop
//!
//! It provides:
//! - A fixed-size NAL buffer pool and pending-NAL FIFO
//! - The decoder driver (classification, IDR gating, input feeding)
//! - The output frame queue arbitrating the single display surface slot
//! - The self-rescheduling pacing loop
//! - Session orchestration across connect/disconnect and codec switches

#![forbid(unsafe_code)]

pub mod config;
pub mod driver;
pub mod frame_map;
pub mod nal;
pub mod output;
pub mod pacing;
pub mod pending;
pub mod session;
pub mod stats;

pub use config::{PipelineConfig, SessionConfig};
pub use driver::{DecoderDriver, DriverCommand, StreamSignal};
pub use nal::{NalKind, NalPool, NalUnit};
pub use output::OutputFrameQueue;
pub use pacing::{FrameSink, PacingLoop};
pub use session::StreamSession;
pub use stats::{PipelineStats, PipelineStatsSnapshot};
