//! Decoder driver: owns the hardware decoder instance and its
//! lifecycle, classifies incoming NAL units, enforces key-frame gating,
//! and feeds the decoder's input side under backpressure.
//!
//! All decoder-state mutation happens on one logical thread: every
//! stimulus (network push, decoder event, connection change) is a
//! [`DriverCommand`] delivered over a single-consumer channel, so the
//! state itself needs no locking regardless of which OS thread
//! originated the stimulus.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use vireo_common::now_us;
use vireo_media::{DecoderConfig, DecoderEvent, DecoderFactory, EventSink};

use crate::config::SessionConfig;
use crate::nal::{classify, NalKind, NalPool, NalUnit};
use crate::output::{OutputFrameQueue, SharedDecoder};
use crate::pending::PendingQueue;
use crate::stats::PipelineStats;

/// One-way notifications from the driver toward external collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamSignal {
    /// Ask the sender for a fresh key-frame; issued after every decoder
    /// reset to bound recovery time.
    RequestKeyFrame,
    /// Key-frame gating edge, for the renderer's waiting indicator.
    WaitingKeyFrame(bool),
}

/// Stimuli processed by the driver loop.
#[derive(Debug)]
pub enum DriverCommand {
    /// A filled NAL unit from the network receiver.
    PushNal(NalUnit),
    /// Event forwarded from decoder instance `generation`.
    Decoder { generation: u64, event: DecoderEvent },
    /// Stream (re)connected with the given parameters.
    Connect(SessionConfig),
    /// Stream disconnected.
    Disconnect,
    /// Tear down and exit the loop.
    Shutdown,
}

pub(crate) struct DriverState {
    factory: Arc<dyn DecoderFactory>,
    pool: Arc<NalPool>,
    output: Arc<OutputFrameQueue>,
    signals: UnboundedSender<StreamSignal>,
    frame_notify: Arc<Notify>,
    stats: Arc<PipelineStats>,
    commands: UnboundedSender<DriverCommand>,

    session: Option<SessionConfig>,
    pending: PendingQueue,
    available_inputs: VecDeque<usize>,
    decoder: Option<SharedDecoder>,
    generation: u64,
    wait_keyframe: bool,
    /// Timestamp assigned to the head unit on its first feed attempt;
    /// reused across retries so a split unit keeps one correlation key.
    head_timestamp: Option<u64>,
}

impl DriverState {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        factory: Arc<dyn DecoderFactory>,
        pool: Arc<NalPool>,
        output: Arc<OutputFrameQueue>,
        signals: UnboundedSender<StreamSignal>,
        frame_notify: Arc<Notify>,
        stats: Arc<PipelineStats>,
        commands: UnboundedSender<DriverCommand>,
        pending_capacity: usize,
    ) -> Self {
        Self {
            factory,
            pool,
            output,
            signals,
            frame_notify,
            stats,
            commands,
            session: None,
            pending: PendingQueue::new(pending_capacity),
            available_inputs: VecDeque::new(),
            decoder: None,
            generation: 0,
            wait_keyframe: true,
            head_timestamp: None,
        }
    }

    pub(crate) fn handle_command(&mut self, command: DriverCommand) {
        match command {
            DriverCommand::PushNal(unit) => self.handle_push_nal(unit),
            DriverCommand::Decoder { generation, event } => {
                self.handle_decoder_event(generation, event)
            }
            DriverCommand::Connect(config) => self.handle_connect(config),
            DriverCommand::Disconnect => self.handle_disconnect(),
            DriverCommand::Shutdown => {
                info!("driver shutdown");
                self.handle_disconnect();
            }
        }
    }

    fn handle_push_nal(&mut self, mut unit: NalUnit) {
        let Some(session) = self.session else {
            debug!("nal while disconnected, recycling");
            self.pool.recycle(unit);
            return;
        };
        self.stats
            .nals_received
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);

        let Some(kind) = classify(session.codec, unit.payload()) else {
            warn!(
                frame_index = unit.frame_index,
                len = unit.len(),
                "nal too short to classify, dropping"
            );
            self.drop_unit(unit);
            return;
        };
        unit.kind = kind;
        debug!(
            frame_index = unit.frame_index,
            ?kind,
            len = unit.len(),
            queued = self.pending.len(),
            "got nal"
        );

        if self.decoder.is_none() {
            // The first parameter set brings the decoder up; anything
            // before it cannot be decoded and is not worth queuing.
            if kind != NalKind::Config {
                debug!(frame_index = unit.frame_index, "no decoder yet, dropping");
                self.drop_unit(unit);
                return;
            }
            if !self.create_decoder(unit.payload()) {
                self.drop_unit(unit);
                return;
            }
        }

        match self.pending.push(unit) {
            Ok(()) => self.feed_pending(),
            Err(unit) => {
                warn!(
                    frame_index = unit.frame_index,
                    "pending queue full, dropping newest"
                );
                self.drop_unit(unit);
            }
        }
    }

    /// Bring up a decoder using the parameter-set bytes as its codec
    /// configuration. On failure the pipeline stays decoder-less and
    /// waits for the next parameter set.
    fn create_decoder(&mut self, csd: &[u8]) -> bool {
        let Some(session) = self.session else {
            return false;
        };
        let config = DecoderConfig {
            codec: session.codec,
            priority: session.priority,
            csd: csd.to_vec(),
        };

        self.generation += 1;
        let generation = self.generation;
        let commands = self.commands.clone();
        let sink: EventSink = Arc::new(move |event| {
            let _ = commands.send(DriverCommand::Decoder { generation, event });
        });

        let decoder = match self.factory.create(&config, sink) {
            Ok(decoder) => decoder,
            Err(err) => {
                error!("decoder creation failed: {err}");
                return false;
            }
        };
        info!(codec = ?session.codec, priority = ?session.priority, "decoder created");

        let shared: SharedDecoder = Arc::new(Mutex::new(decoder));
        self.output.set_decoder(Arc::clone(&shared));
        self.decoder = Some(shared);
        self.available_inputs.clear();
        self.head_timestamp = None;
        self.set_waiting(true);
        let _ = self.signals.send(StreamSignal::RequestKeyFrame);
        true
    }

    fn handle_decoder_event(&mut self, generation: u64, event: DecoderEvent) {
        if generation != self.generation {
            debug!(generation, ?event, "event from stale decoder, ignoring");
            return;
        }
        match event {
            DecoderEvent::InputBufferAvailable(index) => {
                self.available_inputs.push_back(index);
                self.feed_pending();
            }
            DecoderEvent::OutputBufferAvailable {
                index,
                timestamp_us,
            } => {
                if self.output.push_output_buffer(index, timestamp_us).is_some() {
                    // Wake the pacing loop instead of waiting for its
                    // next poll tick.
                    self.frame_notify.notify_one();
                }
            }
            DecoderEvent::FormatChanged { width, height } => {
                info!(width, height, "decoder output format changed");
            }
            DecoderEvent::Error(message) => {
                // Not fatal: the stream resyncs through the gating and
                // reconnect paths once new key-frames arrive.
                error!("codec error: {message}");
                self.stats
                    .decoder_errors
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            }
        }
    }

    fn handle_connect(&mut self, config: SessionConfig) {
        info!(codec = ?config.codec, priority = ?config.priority, "stream connected");
        self.output.reset();

        let changed = self.session.map_or(true, |current| {
            current.codec != config.codec || current.priority != config.priority
        });
        self.session = Some(config);

        if changed {
            self.teardown_decoder();
        }
        let _ = self.signals.send(StreamSignal::RequestKeyFrame);
    }

    fn handle_disconnect(&mut self) {
        info!("stream disconnected");
        self.output.stop();
        self.teardown_decoder();
        self.session = None;
    }

    fn teardown_decoder(&mut self) {
        if let Some(decoder) = self.decoder.take() {
            info!("destroying decoder instance");
            decoder.lock().unwrap().stop();
            self.output.detach_decoder();
        }
        self.generation += 1;
        self.available_inputs.clear();
        self.head_timestamp = None;
        for unit in self.pending.take_all() {
            self.pool.recycle(unit);
        }
        self.set_waiting(true);
    }

    fn set_waiting(&mut self, waiting: bool) {
        if self.wait_keyframe != waiting {
            self.wait_keyframe = waiting;
            let _ = self.signals.send(StreamSignal::WaitingKeyFrame(waiting));
        }
    }

    /// Drain the pending queue into decoder input buffers, in arrival
    /// order, until either the queue or the available-buffer list runs
    /// out. A unit leaves the queue only once fully consumed.
    fn feed_pending(&mut self) {
        loop {
            let Some(decoder) = self.decoder.clone() else {
                return;
            };
            let Some(head) = self.pending.peek() else {
                return;
            };
            let kind = head.kind;
            let frame_index = head.frame_index;

            let consumed = match kind {
                NalKind::Config => {
                    debug!(frame_index, len = head.len(), "feeding codec config");
                    self.feed_head(&decoder, 0, true)
                }
                NalKind::KeyFrame => {
                    let timestamp_us = self.head_timestamp(frame_index);
                    debug!(frame_index, timestamp_us, "feeding key-frame");
                    let consumed = self.feed_head(&decoder, timestamp_us, false);
                    if consumed {
                        self.set_waiting(false);
                    }
                    consumed
                }
                NalKind::DeltaFrame => {
                    if self.wait_keyframe {
                        // Decoding this without a preceding key-frame
                        // would produce corrupt output.
                        debug!(frame_index, "ignoring delta frame until next key-frame");
                        self.stats
                            .nals_dropped
                            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                        true
                    } else {
                        let timestamp_us = self.head_timestamp(frame_index);
                        debug!(frame_index, timestamp_us, "feeding delta frame");
                        self.feed_head(&decoder, timestamp_us, false)
                    }
                }
            };

            if !consumed {
                // Insufficient input buffers; resume on the next
                // InputBufferAvailable event.
                return;
            }
            self.head_timestamp = None;
            if let Some(unit) = self.pending.remove() {
                self.pool.recycle(unit);
            }
        }
    }

    /// Correlation timestamp for the head unit, assigned once on the
    /// first attempt and kept across retries.
    fn head_timestamp(&mut self, frame_index: u64) -> u64 {
        if let Some(timestamp_us) = self.head_timestamp {
            return timestamp_us;
        }
        let timestamp_us = now_us();
        self.head_timestamp = Some(timestamp_us);
        self.output.record_submission(timestamp_us, frame_index);
        self.stats.decoder_input(frame_index);
        timestamp_us
    }

    /// Copy the head unit into as many input buffers as it needs.
    /// Returns true when the unit is fully consumed (or abandoned after
    /// a codec error), false when input buffers ran out mid-unit.
    fn feed_head(&mut self, decoder: &SharedDecoder, timestamp_us: u64, codec_config: bool) -> bool {
        while let Some(head) = self.pending.head_mut() {
            if head.fully_consumed() {
                return true;
            }
            let Some(index) = self.available_inputs.pop_front() else {
                return false;
            };

            let mut dec = decoder.lock().unwrap();
            let copied = match dec.write_input(index, head.remaining()) {
                Ok(copied) => copied,
                Err(err) => {
                    error!(index, "write_input failed: {err}");
                    self.stats
                        .decoder_errors
                        .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    return true;
                }
            };
            if let Err(err) = dec.queue_input(index, timestamp_us, codec_config) {
                error!(index, "queue_input failed: {err}");
                self.stats
                    .decoder_errors
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                return true;
            }
            drop(dec);

            head.advance(copied);
            if !head.fully_consumed() {
                debug!(
                    frame_index = head.frame_index,
                    remaining = head.remaining().len(),
                    "splitting nal across input buffers"
                );
            }
        }
        true
    }

    fn drop_unit(&mut self, unit: NalUnit) {
        self.stats
            .nals_dropped
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        self.pool.recycle(unit);
    }

    #[cfg(test)]
    fn wait_keyframe(&self) -> bool {
        self.wait_keyframe
    }
}

/// Handle to the spawned driver loop.
pub struct DecoderDriver {
    tx: UnboundedSender<DriverCommand>,
    join: JoinHandle<()>,
}

impl DecoderDriver {
    /// Spawn the single-consumer driver loop on the current runtime.
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        factory: Arc<dyn DecoderFactory>,
        pool: Arc<NalPool>,
        output: Arc<OutputFrameQueue>,
        signals: UnboundedSender<StreamSignal>,
        frame_notify: Arc<Notify>,
        stats: Arc<PipelineStats>,
        pending_capacity: usize,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = DriverState::new(
            factory,
            pool,
            output,
            signals,
            frame_notify,
            stats,
            tx.clone(),
            pending_capacity,
        );
        let join = tokio::spawn(run_loop(state, rx));
        Self { tx, join }
    }

    pub fn sender(&self) -> UnboundedSender<DriverCommand> {
        self.tx.clone()
    }

    /// Tear down the decoder and await loop exit.
    pub async fn shutdown(self) {
        let _ = self.tx.send(DriverCommand::Shutdown);
        let _ = self.join.await;
    }
}

async fn run_loop(mut state: DriverState, mut rx: UnboundedReceiver<DriverCommand>) {
    info!("decoder driver loop started");
    while let Some(command) = rx.recv().await {
        let shutdown = matches!(command, DriverCommand::Shutdown);
        state.handle_command(command);
        if shutdown {
            break;
        }
    }
    info!("decoder driver loop stopped");
}
