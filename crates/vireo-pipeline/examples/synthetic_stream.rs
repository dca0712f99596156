//! Runs the full pipeline against the in-memory decoder with a
//! synthetic H.264 stream: one parameter set, one key-frame, then
//! delta frames at the session refresh rate.
//!
//!     cargo run -p vireo-pipeline --example synthetic_stream

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use vireo_media::{Codec, StubDecoderFactory};
use vireo_pipeline::{FrameSink, PipelineConfig, SessionConfig, StreamSession};

const H264_SPS: u8 = 0x67;
const H264_IDR: u8 = 0x65;
const H264_P: u8 = 0x41;

const REFRESH_RATE: f32 = 72.0;
const FRAMES: u64 = 144;

struct LogSink;

impl FrameSink for LogSink {
    fn present(&mut self, frame_index: u64) {
        info!(frame_index, "presented");
    }
}

fn push(session: &StreamSession, frame_index: u64, header: u8, len: usize) {
    let Some(mut unit) = session.obtain_nal(len) else {
        return;
    };
    unit.frame_index = frame_index;
    let payload = unit.payload_mut();
    payload.fill(0);
    payload[..5].copy_from_slice(&[0, 0, 0, 1, header]);
    session.push_nal(unit);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let factory = Arc::new(StubDecoderFactory::new(8, 256 * 1024));
    let (session, mut signals) = StreamSession::new(PipelineConfig::default(), factory)?;

    tokio::spawn(async move {
        while let Some(signal) = signals.recv().await {
            info!(?signal, "stream signal");
        }
    });

    session
        .on_connected(
            SessionConfig::new(Codec::H264, true, 1920, 1080, REFRESH_RATE),
            Box::new(LogSink),
        )
        .await;

    let interval = Duration::from_secs_f32(1.0 / REFRESH_RATE);
    push(&session, 0, H264_SPS, 64);
    for frame_index in 1..=FRAMES {
        let header = if frame_index == 1 { H264_IDR } else { H264_P };
        push(&session, frame_index, header, 16 * 1024);
        tokio::time::sleep(interval).await;
        // The platform surface callback, simulated.
        session.on_frame_available();
    }

    // Let the last frame drain.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let stats = session.stats();
    info!(
        received = stats.nals_received,
        decoded = stats.frames_decoded,
        presented = stats.frames_presented,
        discarded = stats.frames_discarded,
        avg_decode_latency_us = stats.avg_decode_latency_us,
        "synthetic stream finished"
    );

    session.on_disconnected().await;
    session.shutdown().await;
    Ok(())
}
