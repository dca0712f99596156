//! Display pacing loop.
//!
//! Polls the output queue for a consumable frame and hands it to the
//! renderer. After presenting it re-polls almost immediately to drain
//! any backlog; with nothing to show it sleeps one refresh interval.
//! The driver shortcuts the idle sleep through a notify when a freshly
//! decoded frame lands, so a frame never waits a full interval just
//! because it arrived right after a poll.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::output::OutputFrameQueue;

/// Wherever presented frames go: a compositor, a recording, a test vec.
pub trait FrameSink: Send {
    fn present(&mut self, frame_index: u64);
}

const DRAIN_DELAY: Duration = Duration::from_millis(1);

/// Handle to the spawned pacing task.
pub struct PacingLoop {
    shutdown: oneshot::Sender<()>,
    join: JoinHandle<()>,
}

impl PacingLoop {
    pub fn spawn(
        output: Arc<OutputFrameQueue>,
        sink: Box<dyn FrameSink>,
        refresh_rate: f32,
        frame_notify: Arc<Notify>,
    ) -> Self {
        let (shutdown, shutdown_rx) = oneshot::channel();
        let join = tokio::spawn(run_loop(output, sink, refresh_rate, frame_notify, shutdown_rx));
        Self { shutdown, join }
    }

    /// Stop the loop and await task exit.
    pub async fn stop(self) {
        let _ = self.shutdown.send(());
        let _ = self.join.await;
    }
}

async fn run_loop(
    output: Arc<OutputFrameQueue>,
    mut sink: Box<dyn FrameSink>,
    refresh_rate: f32,
    frame_notify: Arc<Notify>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let idle_delay = Duration::from_secs_f32(1.0 / refresh_rate.max(1.0));
    info!(refresh_rate, ?idle_delay, "pacing loop started");

    loop {
        let delay = match output.clear_available() {
            Some(frame_index) => {
                debug!(frame_index, "presenting frame");
                sink.present(frame_index);
                DRAIN_DELAY
            }
            None => idle_delay,
        };

        tokio::select! {
            _ = &mut shutdown => break,
            _ = frame_notify.notified() => {}
            _ = tokio::time::sleep(delay) => {}
        }
    }
    info!("pacing loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::stats::PipelineStats;
    use vireo_media::{Codec, DecoderConfig, DecoderFactory, DecoderPriority, StubDecoderFactory};

    struct RecordingSink(Arc<Mutex<Vec<u64>>>);

    impl FrameSink for RecordingSink {
        fn present(&mut self, frame_index: u64) {
            self.0.lock().unwrap().push(frame_index);
        }
    }

    fn queue_with_decoder() -> Arc<OutputFrameQueue> {
        let stats = Arc::new(PipelineStats::new());
        let queue = Arc::new(OutputFrameQueue::new(1, 64, stats));
        let factory = StubDecoderFactory::new(4, 1024);
        let decoder = factory
            .create(
                &DecoderConfig {
                    codec: Codec::H264,
                    priority: DecoderPriority::Realtime,
                    csd: vec![],
                },
                Arc::new(|_| {}),
            )
            .unwrap();
        queue.set_decoder(Arc::new(Mutex::new(decoder)));
        queue
    }

    async fn wait_for(presented: &Arc<Mutex<Vec<u64>>>, expected: &[u64]) -> bool {
        for _ in 0..200 {
            if *presented.lock().unwrap() == expected {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_presents_on_early_wake() {
        let queue = queue_with_decoder();
        let presented = Arc::new(Mutex::new(Vec::new()));
        let notify = Arc::new(Notify::new());

        // Very slow idle poll; only the notify can deliver in time.
        let pacing = PacingLoop::spawn(
            Arc::clone(&queue),
            Box::new(RecordingSink(Arc::clone(&presented))),
            1.0,
            Arc::clone(&notify),
        );

        queue.record_submission(100, 7);
        queue.push_output_buffer(0, 100);
        queue.on_frame_available();
        notify.notify_one();

        assert!(wait_for(&presented, &[7]).await);
        pacing.stop().await;
    }

    #[tokio::test]
    async fn test_idle_poll_picks_up_frame() {
        let queue = queue_with_decoder();
        let presented = Arc::new(Mutex::new(Vec::new()));
        let notify = Arc::new(Notify::new());

        let pacing = PacingLoop::spawn(
            Arc::clone(&queue),
            Box::new(RecordingSink(Arc::clone(&presented))),
            250.0,
            notify,
        );

        queue.record_submission(100, 1);
        queue.push_output_buffer(0, 100);
        queue.on_frame_available();

        // No notify; the refresh-interval poll must find it.
        assert!(wait_for(&presented, &[1]).await);
        pacing.stop().await;
    }

    #[tokio::test]
    async fn test_stop_ends_task() {
        let queue = queue_with_decoder();
        let presented = Arc::new(Mutex::new(Vec::new()));
        let pacing = PacingLoop::spawn(
            queue,
            Box::new(RecordingSink(presented)),
            72.0,
            Arc::new(Notify::new()),
        );
        pacing.stop().await;
    }
}
