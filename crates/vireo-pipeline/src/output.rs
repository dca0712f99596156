//! Output frame queue and render-slot state machine.
//!
//! Bridges the decoder's asynchronous output events to the pacing loop
//! while enforcing that at most one decoded frame is ever in flight to
//! the display surface. The platform's release-with-render call is
//! fire-and-forget, but the surface can only hold one outstanding
//! request; issuing a second before the first completes tears. The
//! three-state flag serializes those requests while the backlog lets
//! the decoder keep producing without blocking its callback thread.
//!
//! Lock order: the queue mutex is taken before the decoder mutex,
//! never the other way around.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tracing::{debug, error, info, warn};
use vireo_media::VideoDecoder;

use crate::frame_map::FrameMap;
use crate::stats::PipelineStats;

/// Decoder instance shared between the driver (input side) and this
/// queue (output-buffer release).
pub type SharedDecoder = Arc<Mutex<Box<dyn VideoDecoder>>>;

/// State of the single display-surface slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceState {
    /// No frame owned by the surface.
    Idle,
    /// A frame was released to the surface; completion not yet signaled.
    Rendering,
    /// The surface signaled the frame is consumable.
    Available,
}

#[derive(Debug, Clone, Copy)]
struct FrameRef {
    index: usize,
    frame_index: u64,
}

struct Inner {
    stopped: bool,
    state: SurfaceState,
    surface: FrameRef,
    backlog: VecDeque<FrameRef>,
    capacity: usize,
    frame_map: FrameMap,
    decoder: Option<SharedDecoder>,
}

pub struct OutputFrameQueue {
    inner: Mutex<Inner>,
    stats: Arc<PipelineStats>,
}

impl OutputFrameQueue {
    pub fn new(backlog_capacity: usize, frame_map_slots: usize, stats: Arc<PipelineStats>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                stopped: false,
                state: SurfaceState::Idle,
                surface: FrameRef {
                    index: 0,
                    frame_index: 0,
                },
                backlog: VecDeque::with_capacity(backlog_capacity),
                capacity: backlog_capacity.max(1),
                frame_map: FrameMap::new(frame_map_slots),
                decoder: None,
            }),
            stats,
        }
    }

    /// Attach the decoder whose output buffers this queue releases.
    /// Called once per decoder instance, right after creation.
    pub fn set_decoder(&self, decoder: SharedDecoder) {
        let mut inner = self.inner.lock().unwrap();
        inner.decoder = Some(decoder);
    }

    /// Drop the decoder attachment. Called when the decoder instance is
    /// destroyed; any buffer indices still queued belong to it and must
    /// not be released afterwards.
    pub fn detach_decoder(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.decoder = None;
    }

    /// Record the correlation key for a frame about to be submitted to
    /// the decoder input side.
    pub fn record_submission(&self, timestamp_us: u64, frame_index: u64) {
        let mut inner = self.inner.lock().unwrap();
        inner.frame_map.put(timestamp_us, frame_index);
    }

    /// Accept a decoded output buffer from the decoder event stream.
    /// Returns the correlated frame index when the frame was enqueued.
    pub fn push_output_buffer(&self, index: usize, timestamp_us: u64) -> Option<u64> {
        let mut inner = self.inner.lock().unwrap();
        if inner.stopped {
            warn!(index, "output buffer after stop, releasing undisplayed");
            Self::release(&mut inner, index, false);
            return None;
        }

        let Some(frame_index) = inner.frame_map.find(timestamp_us) else {
            error!(index, timestamp_us, "unknown timestamp on output buffer");
            self.stats
                .correlation_failures
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            Self::release(&mut inner, index, false);
            return None;
        };

        if inner.backlog.len() >= inner.capacity {
            // Favor freshness: the oldest undisplayed frame goes.
            let evicted = inner.backlog.pop_front();
            if let Some(old) = evicted {
                debug!(frame_index = old.frame_index, "backlog full, discarding old frame");
                self.stats
                    .frames_discarded
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                Self::release(&mut inner, old.index, false);
            }
        }
        inner.backlog.push_back(FrameRef { index, frame_index });
        self.stats.decoder_output(frame_index);

        Self::render_locked(&mut inner);
        Some(frame_index)
    }

    /// Try to move the oldest backlog entry onto the display surface.
    /// No-op unless the surface slot is idle.
    pub fn render(&self) -> Option<u64> {
        let mut inner = self.inner.lock().unwrap();
        if inner.stopped {
            return None;
        }
        Self::render_locked(&mut inner)
    }

    fn render_locked(inner: &mut Inner) -> Option<u64> {
        if inner.state != SurfaceState::Idle {
            // A frame already owns the surface; retried on the next
            // clear_available.
            return None;
        }
        let elem = inner.backlog.pop_front()?;
        inner.state = SurfaceState::Rendering;
        inner.surface = elem;
        debug!(
            frame_index = elem.frame_index,
            index = elem.index,
            "releasing output buffer to surface"
        );
        Self::release(inner, elem.index, true);
        Some(elem.frame_index)
    }

    /// The platform surface signaled that the rendered buffer is now
    /// consumable. Only meaningful while a render is outstanding.
    pub fn on_frame_available(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.stopped || inner.state != SurfaceState::Rendering {
            return;
        }
        inner.state = SurfaceState::Available;
    }

    /// Consume the available frame, if any. Returns its frame index and
    /// immediately pipelines the next backlog entry.
    pub fn clear_available(&self) -> Option<u64> {
        let mut inner = self.inner.lock().unwrap();
        if inner.stopped || inner.state != SurfaceState::Available {
            return None;
        }
        let frame_index = inner.surface.frame_index;
        inner.state = SurfaceState::Idle;
        self.stats
            .frames_presented
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);

        // Render deferred frame without waiting for another trigger.
        Self::render_locked(&mut inner);

        Some(frame_index)
    }

    /// Mark the queue inert and release all pending buffers undisplayed.
    /// Every later operation is a defensive no-op; late decoder events
    /// must not touch torn-down state.
    pub fn stop(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.stopped {
            return;
        }
        info!("stopping output queue");
        inner.stopped = true;
        while let Some(elem) = inner.backlog.pop_front() {
            Self::release(&mut inner, elem.index, false);
        }
    }

    /// Clear the inert flag and drop stale state. Used on reconnect and
    /// codec switch. The decoder attachment survives: a reconnect with
    /// an unchanged codec keeps the instance, and it must still be able
    /// to release frames decoded after the reset. Stale backlog indices
    /// are dropped without release; they were queued against state the
    /// reset discards.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        info!("resetting output queue");
        inner.stopped = false;
        inner.state = SurfaceState::Idle;
        inner.backlog.clear();
        inner.frame_map.clear();
    }

    pub fn surface_state(&self) -> SurfaceState {
        self.inner.lock().unwrap().state
    }

    pub fn backlog_len(&self) -> usize {
        self.inner.lock().unwrap().backlog.len()
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.lock().unwrap().stopped
    }

    fn release(inner: &mut Inner, index: usize, render: bool) {
        if let Some(decoder) = inner.decoder.as_ref() {
            decoder.lock().unwrap().release_output(index, render);
        }
    }
}
