//! Top-level pipeline handle.
//!
//! Owns the pooled buffers, the output queue, the driver task, and the
//! pacing task, and exposes the narrow surface the platform layer talks
//! to: obtain/push on the network side, connect/disconnect on the
//! control side, frame-available on the display side.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use vireo_media::DecoderFactory;

use crate::config::{PipelineConfig, SessionConfig};
use crate::driver::{DecoderDriver, DriverCommand, StreamSignal};
use crate::nal::{NalPool, NalUnit};
use crate::output::OutputFrameQueue;
use crate::pacing::{FrameSink, PacingLoop};
use crate::stats::{PipelineStats, PipelineStatsSnapshot};

pub struct StreamSession {
    pool: Arc<NalPool>,
    output: Arc<OutputFrameQueue>,
    driver: DecoderDriver,
    commands: UnboundedSender<DriverCommand>,
    pacing: Mutex<Option<PacingLoop>>,
    frame_notify: Arc<Notify>,
    stats: Arc<PipelineStats>,
    session: Mutex<Option<SessionConfig>>,
}

impl StreamSession {
    /// Build the pipeline and spawn its driver task. The returned
    /// receiver carries [`StreamSignal`]s for the transport layer.
    pub fn new(
        config: PipelineConfig,
        factory: Arc<dyn DecoderFactory>,
    ) -> vireo_common::Result<(Self, UnboundedReceiver<StreamSignal>)> {
        config.validate()?;
        let pool = Arc::new(NalPool::new(config.pool_slots, config.buffer_bytes));
        let stats = Arc::new(PipelineStats::new());
        let output = Arc::new(OutputFrameQueue::new(
            config.backlog_capacity,
            config.frame_map_slots,
            Arc::clone(&stats),
        ));
        let frame_notify = Arc::new(Notify::new());
        let (signals_tx, signals_rx) = mpsc::unbounded_channel();

        let driver = DecoderDriver::spawn(
            factory,
            Arc::clone(&pool),
            Arc::clone(&output),
            signals_tx,
            Arc::clone(&frame_notify),
            Arc::clone(&stats),
            config.pool_slots,
        );
        let commands = driver.sender();

        Ok((
            Self {
                pool,
                output,
                driver,
                commands,
                pacing: Mutex::new(None),
                frame_notify,
                stats,
                session: Mutex::new(None),
            },
            signals_rx,
        ))
    }

    /// Borrow a pooled unit for an incoming packet of `len` bytes.
    /// `None` means the pool is exhausted and the packet is dropped.
    pub fn obtain_nal(&self, len: usize) -> Option<NalUnit> {
        let unit = self.pool.obtain(len);
        if unit.is_none() {
            warn!(len, "nal pool exhausted, dropping packet");
            self.stats
                .nals_dropped
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }
        unit
    }

    /// Hand a filled unit to the driver. Ordering is preserved per
    /// sender.
    pub fn push_nal(&self, unit: NalUnit) {
        let _ = self.commands.send(DriverCommand::PushNal(unit));
    }

    /// Stream connected: start decoding and presenting with the given
    /// parameters, frames going to `sink`.
    pub async fn on_connected(&self, config: SessionConfig, sink: Box<dyn FrameSink>) {
        info!(codec = ?config.codec, refresh_rate = config.refresh_rate, "session connected");
        *self.session.lock().unwrap() = Some(config);
        let _ = self.commands.send(DriverCommand::Connect(config));
        self.start_pacing(config.refresh_rate, sink).await;
    }

    /// Stream disconnected: halt presentation and tear down decode
    /// state. The session can reconnect later.
    pub async fn on_disconnected(&self) {
        info!("session disconnected");
        self.stop_pacing().await;
        let _ = self.commands.send(DriverCommand::Disconnect);
        *self.session.lock().unwrap() = None;
    }

    /// The display surface went away (app backgrounded); presentation
    /// stops but decode state is kept.
    pub async fn pause(&self) {
        debug!("pausing presentation");
        self.stop_pacing().await;
    }

    /// The display surface is back; presentation resumes into `sink`.
    /// No-op while disconnected.
    pub async fn resume(&self, sink: Box<dyn FrameSink>) {
        let Some(config) = *self.session.lock().unwrap() else {
            return;
        };
        debug!("resuming presentation");
        self.start_pacing(config.refresh_rate, sink).await;
    }

    /// Platform callback: the rendered frame is now consumable.
    pub fn on_frame_available(&self) {
        self.output.on_frame_available();
        self.frame_notify.notify_one();
    }

    pub fn stats(&self) -> PipelineStatsSnapshot {
        self.stats.snapshot()
    }

    /// Tear down both tasks. Consumes the session.
    pub async fn shutdown(self) {
        self.stop_pacing().await;
        self.driver.shutdown().await;
    }

    async fn start_pacing(&self, refresh_rate: f32, sink: Box<dyn FrameSink>) {
        self.stop_pacing().await;
        let pacing = PacingLoop::spawn(
            Arc::clone(&self.output),
            sink,
            refresh_rate,
            Arc::clone(&self.frame_notify),
        );
        *self.pacing.lock().unwrap() = Some(pacing);
    }

    async fn stop_pacing(&self) {
        let pacing = self.pacing.lock().unwrap().take();
        if let Some(pacing) = pacing {
            pacing.stop().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use vireo_media::{Codec, StubDecoderFactory};

    struct RecordingSink(Arc<Mutex<Vec<u64>>>);

    impl FrameSink for RecordingSink {
        fn present(&mut self, frame_index: u64) {
            self.0.lock().unwrap().push(frame_index);
        }
    }

    fn small_config() -> PipelineConfig {
        PipelineConfig {
            pool_slots: 8,
            buffer_bytes: 64,
            backlog_capacity: 1,
            frame_map_slots: 64,
        }
    }

    fn push(session: &StreamSession, frame_index: u64, header: u8) {
        let mut unit = session.obtain_nal(16).expect("pool exhausted in test");
        unit.frame_index = frame_index;
        let payload = unit.payload_mut();
        payload.fill(0);
        payload[..5].copy_from_slice(&[0, 0, 0, 1, header]);
        session.push_nal(unit);
    }

    async fn wait_until(mut probe: impl FnMut() -> bool) -> bool {
        for _ in 0..200 {
            if probe() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_end_to_end_first_frame() {
        let factory = Arc::new(StubDecoderFactory::new(4, 1024));
        let (session, mut signals) = StreamSession::new(small_config(), factory).unwrap();

        let presented = Arc::new(Mutex::new(Vec::new()));
        session
            .on_connected(
                SessionConfig::new(Codec::H264, true, 1920, 1080, 250.0),
                Box::new(RecordingSink(Arc::clone(&presented))),
            )
            .await;
        assert_eq!(signals.recv().await, Some(StreamSignal::RequestKeyFrame));

        push(&session, 1, 0x67); // SPS
        push(&session, 2, 0x65); // IDR

        assert!(wait_until(|| session.stats().frames_decoded >= 1).await);
        session.on_frame_available();
        assert!(wait_until(|| *presented.lock().unwrap() == [2]).await);

        let stats = session.stats();
        assert_eq!(stats.frames_presented, 1);
        assert_eq!(stats.correlation_failures, 0);
        session.shutdown().await;
    }

    #[tokio::test]
    async fn test_disconnect_returns_pool_to_full() {
        let factory = Arc::new(StubDecoderFactory::new(4, 1024));
        let (session, _signals) = StreamSession::new(small_config(), factory).unwrap();

        session
            .on_connected(
                SessionConfig::new(Codec::H264, true, 1920, 1080, 72.0),
                Box::new(RecordingSink(Arc::new(Mutex::new(Vec::new())))),
            )
            .await;
        push(&session, 1, 0x67);
        push(&session, 2, 0x65);
        session.on_disconnected().await;

        assert!(wait_until(|| session.pool.free_count() == session.pool.slots()).await);
        session.shutdown().await;
    }

    #[tokio::test]
    async fn test_pool_exhaustion_counts_drop() {
        let factory = Arc::new(StubDecoderFactory::new(4, 1024));
        let config = PipelineConfig {
            pool_slots: 1,
            ..small_config()
        };
        let (session, _signals) = StreamSession::new(config, factory).unwrap();

        let held = session.obtain_nal(16).unwrap();
        assert!(session.obtain_nal(16).is_none());
        assert_eq!(session.stats().nals_dropped, 1);
        drop(held);
        session.shutdown().await;
    }

    #[tokio::test]
    async fn test_pause_resume() {
        let factory = Arc::new(StubDecoderFactory::new(4, 1024));
        let (session, _signals) = StreamSession::new(small_config(), factory).unwrap();

        let presented = Arc::new(Mutex::new(Vec::new()));
        session
            .on_connected(
                SessionConfig::new(Codec::H264, true, 1920, 1080, 250.0),
                Box::new(RecordingSink(Arc::clone(&presented))),
            )
            .await;
        session.pause().await;

        push(&session, 1, 0x67);
        push(&session, 2, 0x65);
        assert!(wait_until(|| session.stats().frames_decoded >= 1).await);

        // Nothing presents while paused even with a frame available.
        session.on_frame_available();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(presented.lock().unwrap().is_empty());

        session
            .resume(Box::new(RecordingSink(Arc::clone(&presented))))
            .await;
        assert!(wait_until(|| *presented.lock().unwrap() == [2]).await);
        session.shutdown().await;
    }
}
